//! Standard library
//!
//! Builtins are plain enum values stored in `Val::Native`. Pure builtins are
//! evaluated here; ones that touch the run (stepping, the bus, timers) are
//! dispatched by the executor.

use std::collections::BTreeMap;

use super::errors::{self, ExecResult, Raise};
use super::lower::ITER_LEN;
use super::types::Val;

/* ===================== Builtin Identifiers ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Step,
    Pause,
    Resume,
    Stop,
    On,
    Once,
    Off,
    Print,
    SetTimeout,
    Len,
    /// `__len`, the length used by lowered `for..of` loops
    IterLen,
    Range,
    Push,
    Str,
    Keys,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Step => "step",
            Builtin::Pause => "pause",
            Builtin::Resume => "resume",
            Builtin::Stop => "stop",
            Builtin::On => "on",
            Builtin::Once => "once",
            Builtin::Off => "off",
            Builtin::Print => "print",
            Builtin::SetTimeout => "setTimeout",
            Builtin::Len => "len",
            Builtin::IterLen => ITER_LEN,
            Builtin::Range => "range",
            Builtin::Push => "push",
            Builtin::Str => "str",
            Builtin::Keys => "keys",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "step" => Builtin::Step,
            "pause" => Builtin::Pause,
            "resume" => Builtin::Resume,
            "stop" => Builtin::Stop,
            "on" => Builtin::On,
            "once" => Builtin::Once,
            "off" => Builtin::Off,
            "print" => Builtin::Print,
            "setTimeout" => Builtin::SetTimeout,
            "len" => Builtin::Len,
            ITER_LEN => Builtin::IterLen,
            "range" => Builtin::Range,
            "push" => Builtin::Push,
            "str" => Builtin::Str,
            "keys" => Builtin::Keys,
            _ => return None,
        })
    }

    /// Builtins that need the executor's run context
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            Builtin::Step
                | Builtin::Pause
                | Builtin::Resume
                | Builtin::Stop
                | Builtin::On
                | Builtin::Once
                | Builtin::Off
                | Builtin::Print
                | Builtin::SetTimeout
        )
    }
}

/* ===================== Namespace ===================== */

/// `console` object exposing `console.log`
pub fn console_object() -> Val {
    let mut obj = BTreeMap::new();
    obj.insert("log".to_string(), Val::Native(Builtin::Print));
    Val::Obj(obj)
}

/// `controller` back-reference object for the program
pub fn controller_object(run_id: &str) -> Val {
    let mut obj = BTreeMap::new();
    obj.insert("runId".to_string(), Val::Str(run_id.to_string()));
    obj.insert("pause".to_string(), Val::Native(Builtin::Pause));
    obj.insert("resume".to_string(), Val::Native(Builtin::Resume));
    obj.insert("stop".to_string(), Val::Native(Builtin::Stop));
    Val::Obj(obj)
}

/* ===================== Argument Helpers ===================== */

pub fn expect_args(builtin: Builtin, args: &[Val], min: usize, max: usize) -> ExecResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(Raise::error(
            errors::WRONG_ARG_COUNT,
            format!(
                "{}() expects {} argument(s), got {}",
                builtin.name(),
                expected,
                args.len()
            ),
        ));
    }
    Ok(())
}

pub fn wrong_type(builtin: Builtin, expected: &str, got: &Val) -> Raise {
    Raise::error(
        errors::WRONG_ARG_TYPE,
        format!(
            "{}() expects {}, got {}",
            builtin.name(),
            expected,
            got.type_name()
        ),
    )
}

/// An integer-valued number
pub fn as_integer(n: f64) -> Option<i64> {
    if n.is_finite() && n.fract() == 0.0 {
        Some(n as i64)
    } else {
        None
    }
}

/* ===================== Pure Builtins ===================== */

/// Evaluate a builtin that doesn't touch the run
pub fn call_pure(builtin: Builtin, args: Vec<Val>) -> ExecResult<Val> {
    match builtin {
        Builtin::Len => len(args),
        Builtin::IterLen => iter_len(args),
        Builtin::Range => range(args),
        Builtin::Push => push(args),
        Builtin::Str => {
            expect_args(builtin, &args, 1, 1)?;
            Ok(Val::Str(args[0].to_string()))
        }
        Builtin::Keys => {
            expect_args(builtin, &args, 1, 1)?;
            match &args[0] {
                Val::Obj(fields) => Ok(Val::List(
                    fields.keys().map(|k| Val::Str(k.clone())).collect(),
                )),
                other => Err(wrong_type(builtin, "an object", other)),
            }
        }
        other => Err(Raise::error(
            errors::TYPE_ERROR,
            format!("{}() needs a running program", other.name()),
        )),
    }
}

fn len(args: Vec<Val>) -> ExecResult<Val> {
    expect_args(Builtin::Len, &args, 1, 1)?;
    match &args[0] {
        Val::List(items) => Ok(Val::Num(items.len() as f64)),
        Val::Str(s) => Ok(Val::Num(s.chars().count() as f64)),
        Val::Obj(fields) => Ok(Val::Num(fields.len() as f64)),
        other => Err(wrong_type(Builtin::Len, "a list, string or object", other)),
    }
}

/// Matches what native `for..of` accepts
fn iter_len(args: Vec<Val>) -> ExecResult<Val> {
    expect_args(Builtin::IterLen, &args, 1, 1)?;
    match &args[0] {
        Val::List(items) => Ok(Val::Num(items.len() as f64)),
        Val::Str(s) => Ok(Val::Num(s.chars().count() as f64)),
        other => Err(not_iterable(other)),
    }
}

pub fn not_iterable(val: &Val) -> Raise {
    Raise::error(
        errors::TYPE_ERROR,
        format!("{} is not iterable", val.type_name()),
    )
}

fn range(args: Vec<Val>) -> ExecResult<Val> {
    expect_args(Builtin::Range, &args, 1, 2)?;
    let mut bounds = Vec::with_capacity(2);
    for arg in &args {
        match arg {
            Val::Num(n) => match as_integer(*n) {
                Some(i) => bounds.push(i),
                None => return Err(wrong_type(Builtin::Range, "integers", arg)),
            },
            other => return Err(wrong_type(Builtin::Range, "integers", other)),
        }
    }
    let (start, end) = match bounds.as_slice() {
        [end] => (0, *end),
        [start, end] => (*start, *end),
        _ => (0, 0),
    };
    Ok(Val::List((start..end).map(|i| Val::Num(i as f64)).collect()))
}

/// Values are copied, so `push` returns the extended list
fn push(mut args: Vec<Val>) -> ExecResult<Val> {
    expect_args(Builtin::Push, &args, 2, 2)?;
    let item = args.pop().unwrap_or(Val::Null);
    match args.pop() {
        Some(Val::List(mut items)) => {
            items.push(item);
            Ok(Val::List(items))
        }
        Some(other) => Err(wrong_type(Builtin::Push, "a list", &other)),
        None => Ok(Val::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::errors::ErrorInfo;

    fn error_code(result: ExecResult<Val>) -> String {
        match result {
            Err(Raise::Thrown(Val::Error(ErrorInfo { code, .. }))) => code,
            other => panic!("Expected structured error, got {:?}", other),
        }
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(Builtin::from_name("setTimeout"), Some(Builtin::SetTimeout));
        assert_eq!(Builtin::from_name("__len"), Some(Builtin::IterLen));
        assert_eq!(Builtin::from_name("nope"), None);
        assert_eq!(Builtin::Keys.name(), "keys");
    }

    #[test]
    fn test_range() {
        assert_eq!(
            call_pure(Builtin::Range, vec![Val::Num(3.0)]).unwrap(),
            Val::List(vec![Val::Num(0.0), Val::Num(1.0), Val::Num(2.0)])
        );
        assert_eq!(
            call_pure(Builtin::Range, vec![Val::Num(2.0), Val::Num(4.0)]).unwrap(),
            Val::List(vec![Val::Num(2.0), Val::Num(3.0)])
        );
        assert_eq!(
            error_code(call_pure(Builtin::Range, vec![Val::Num(1.5)])),
            errors::WRONG_ARG_TYPE
        );
    }

    #[test]
    fn test_len_and_iter_len() {
        let obj = Val::Obj(BTreeMap::from([("a".to_string(), Val::Null)]));
        assert_eq!(call_pure(Builtin::Len, vec![obj.clone()]).unwrap(), Val::Num(1.0));
        assert_eq!(
            call_pure(Builtin::IterLen, vec![Val::Str("héllo".into())]).unwrap(),
            Val::Num(5.0)
        );
        assert_eq!(
            error_code(call_pure(Builtin::IterLen, vec![obj])),
            errors::TYPE_ERROR
        );
        assert_eq!(error_code(call_pure(Builtin::Len, vec![])), errors::WRONG_ARG_COUNT);
    }

    #[test]
    fn test_push_returns_new_list() {
        let result = call_pure(
            Builtin::Push,
            vec![Val::List(vec![Val::Num(1.0)]), Val::Num(2.0)],
        )
        .unwrap();
        assert_eq!(result, Val::List(vec![Val::Num(1.0), Val::Num(2.0)]));
    }

    #[test]
    fn test_str_and_keys() {
        assert_eq!(
            call_pure(Builtin::Str, vec![Val::Num(4.0)]).unwrap(),
            Val::Str("4".into())
        );
        let obj = Val::Obj(BTreeMap::from([
            ("b".to_string(), Val::Null),
            ("a".to_string(), Val::Null),
        ]));
        assert_eq!(
            call_pure(Builtin::Keys, vec![obj]).unwrap(),
            Val::List(vec![Val::Str("a".into()), Val::Str("b".into())])
        );
    }
}

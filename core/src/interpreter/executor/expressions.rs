//! Expression evaluation

use std::sync::Arc;

use super::{BoxFuture, Executor, Frame};
use crate::interpreter::errors::{self, ExecResult, Raise};
use crate::interpreter::stdlib::as_integer;
use crate::interpreter::types::{BinaryOp, Expr, UnaryOp, Val};

impl Executor {
    pub(super) fn eval<'a>(&'a self, frame: &'a Frame, expr: &'a Expr) -> BoxFuture<'a, ExecResult<Val>> {
        Box::pin(async move {
            match expr {
                Expr::LitNull => Ok(Val::Null),
                Expr::LitBool { v } => Ok(Val::Bool(*v)),
                Expr::LitNum { v } => Ok(Val::Num(*v)),
                Expr::LitStr { v } => Ok(Val::Str(v.clone())),

                Expr::List { items } => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(frame, item).await?);
                    }
                    Ok(Val::List(values))
                }

                Expr::Obj { fields } => {
                    let mut values = std::collections::BTreeMap::new();
                    for (key, value) in fields {
                        values.insert(key.clone(), self.eval(frame, value).await?);
                    }
                    Ok(Val::Obj(values))
                }

                Expr::Ident { name } => self.resolve(frame, name),

                Expr::Member { object, property } => {
                    let object = self.eval(frame, object).await?;
                    member(object, property)
                }

                Expr::Index { object, index } => {
                    let object = self.eval(frame, object).await?;
                    let index = self.eval(frame, index).await?;
                    index_value(object, &index)
                }

                Expr::Call { callee, args } => {
                    let callee = self.eval(frame, callee).await?;
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(frame, arg).await?);
                    }
                    self.call(callee, values).await
                }

                Expr::Unary { op, operand } => {
                    let value = self.eval(frame, operand).await?;
                    match (op, value) {
                        (UnaryOp::Not, value) => Ok(Val::Bool(!value.is_truthy())),
                        (UnaryOp::Neg, Val::Num(n)) => Ok(Val::Num(-n)),
                        (UnaryOp::Neg, other) => Err(Raise::error(
                            errors::TYPE_ERROR,
                            format!("Cannot negate {}", other.type_name()),
                        )),
                    }
                }

                Expr::Binary { op, left, right } => {
                    let left = self.eval(frame, left).await?;
                    // Short-circuit operators yield an operand, like JS
                    match op {
                        BinaryOp::And if !left.is_truthy() => return Ok(left),
                        BinaryOp::Or if left.is_truthy() => return Ok(left),
                        BinaryOp::And | BinaryOp::Or => return self.eval(frame, right).await,
                        _ => {}
                    }
                    let right = self.eval(frame, right).await?;
                    binary(*op, left, right)
                }

                Expr::Function { def } => Ok(Val::Func(Arc::new(def.clone()))),
            }
        })
    }
}

fn member(object: Val, property: &str) -> ExecResult<Val> {
    let found = match (&object, property) {
        (Val::Obj(fields), _) => fields.get(property).cloned(),
        (Val::List(items), "length") => Some(Val::Num(items.len() as f64)),
        (Val::Str(s), "length") => Some(Val::Num(s.chars().count() as f64)),
        (Val::Error(info), "code") => Some(Val::Str(info.code.clone())),
        (Val::Error(info), "message") => Some(Val::Str(info.message.clone())),
        (Val::Subscription(sub), "topic") => Some(Val::Str(sub.topic().to_string())),
        _ => None,
    };
    found.ok_or_else(|| {
        Raise::error(
            errors::PROPERTY_NOT_FOUND,
            format!("Property '{}' not found on {}", property, object.type_name()),
        )
    })
}

fn index_value(object: Val, index: &Val) -> ExecResult<Val> {
    match (object, index) {
        (Val::List(items), Val::Num(n)) => {
            let len = items.len();
            position(*n, len)
                .and_then(|i| items.into_iter().nth(i))
                .ok_or_else(|| out_of_range(*n, len))
        }
        (Val::Str(s), Val::Num(n)) => {
            let len = s.chars().count();
            position(*n, len)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Val::Str(c.to_string()))
                .ok_or_else(|| out_of_range(*n, len))
        }
        (Val::Obj(mut fields), Val::Str(key)) => fields.remove(key).ok_or_else(|| {
            Raise::error(
                errors::PROPERTY_NOT_FOUND,
                format!("Property '{}' not found on object", key),
            )
        }),
        (object, index) => Err(Raise::error(
            errors::TYPE_ERROR,
            format!(
                "Cannot index {} with {}",
                object.type_name(),
                index.type_name()
            ),
        )),
    }
}

fn position(n: f64, len: usize) -> Option<usize> {
    as_integer(n)
        .filter(|i| *i >= 0)
        .map(|i| i as usize)
        .filter(|i| *i < len)
}

fn out_of_range(n: f64, len: usize) -> Raise {
    Raise::error(
        errors::INDEX_OUT_OF_RANGE,
        format!("Index {} out of range for length {}", Val::Num(n), len),
    )
}

pub(super) fn binary(op: BinaryOp, left: Val, right: Val) -> ExecResult<Val> {
    use BinaryOp::*;

    match op {
        Eq => return Ok(Val::Bool(left == right)),
        Ne => return Ok(Val::Bool(left != right)),
        _ => {}
    }

    match (op, left, right) {
        (Add, Val::Num(a), Val::Num(b)) => Ok(Val::Num(a + b)),
        (Add, Val::List(mut a), Val::List(b)) => {
            a.extend(b);
            Ok(Val::List(a))
        }
        (Add, a @ Val::Str(_), b) | (Add, a, b @ Val::Str(_)) => Ok(Val::Str(format!("{}{}", a, b))),
        (Sub, Val::Num(a), Val::Num(b)) => Ok(Val::Num(a - b)),
        (Mul, Val::Num(a), Val::Num(b)) => Ok(Val::Num(a * b)),
        (Div, Val::Num(a), Val::Num(b)) => Ok(Val::Num(a / b)),
        (Mod, Val::Num(a), Val::Num(b)) => Ok(Val::Num(a % b)),
        (Lt | Le | Gt | Ge, Val::Num(a), Val::Num(b)) => Ok(Val::Bool(compare(op, a, b))),
        (Lt | Le | Gt | Ge, Val::Str(a), Val::Str(b)) => Ok(Val::Bool(compare(op, a, b))),
        (op, left, right) => Err(Raise::error(
            errors::TYPE_ERROR,
            format!(
                "Unsupported operands for {:?}: {} and {}",
                op,
                left.type_name(),
                right.type_name()
            ),
        )),
    }
}

fn compare<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        _ => false,
    }
}

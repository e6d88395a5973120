//! Semantic validation for Stepwise programs
//!
//! Checks rules the grammar can't enforce. Every violation is collected so a
//! caller can report them all at once.

use std::collections::HashSet;
use thiserror::Error;

use super::types::ast::{Expr, FunctionDef, Program, Stmt};

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("'break' outside of a loop")]
    BreakOutsideLoop,
    #[error("'continue' outside of a loop")]
    ContinueOutsideLoop,
    #[error("Duplicate parameter '{param}' in function '{function}'")]
    DuplicateParameter { function: String, param: String },
    #[error("Function '{name}' is declared more than once in the same scope")]
    DuplicateFunction { name: String },
    #[error("Identifier '{name}' is reserved")]
    ReservedIdentifier { name: String },
}

/// Prefix reserved for names introduced by lowering
pub const RESERVED_PREFIX: &str = "__";

/* ===================== Public API ===================== */

/// Validate a parsed program
pub fn validate_program(program: &Program) -> Result<(), Vec<ValidationError>> {
    let mut validator = Validator::default();
    validator.scope(&program.body);
    validator.block(&program.body, 0);

    if validator.errors.is_empty() {
        Ok(())
    } else {
        Err(validator.errors)
    }
}

/* ===================== Validator ===================== */

#[derive(Default)]
struct Validator {
    errors: Vec<ValidationError>,
}

impl Validator {
    /// Function declarations directly in `body` share one scope
    fn scope(&mut self, body: &[Stmt]) {
        let mut seen = HashSet::new();
        for stmt in body {
            if let Stmt::Function { def } = stmt {
                if let Some(name) = &def.name {
                    if !seen.insert(name.as_str()) {
                        self.errors
                            .push(ValidationError::DuplicateFunction { name: name.clone() });
                    }
                }
            }
        }
    }

    fn block(&mut self, body: &[Stmt], loop_depth: usize) {
        for stmt in body {
            self.stmt(stmt, loop_depth);
        }
    }

    fn stmt(&mut self, stmt: &Stmt, loop_depth: usize) {
        match stmt {
            Stmt::Block { body } => {
                self.scope(body);
                self.block(body, loop_depth);
            }
            Stmt::Let { name, init } => {
                self.name(name);
                if let Some(init) = init {
                    self.expr(init);
                }
            }
            Stmt::Assign { name, expr } => {
                self.name(name);
                self.expr(expr);
            }
            Stmt::Expr { expr } => self.expr(expr),
            Stmt::If {
                test,
                then_s,
                else_s,
            } => {
                self.expr(test);
                self.stmt(then_s, loop_depth);
                if let Some(else_s) = else_s {
                    self.stmt(else_s, loop_depth);
                }
            }
            Stmt::While { test, body } => {
                self.expr(test);
                self.stmt(body, loop_depth + 1);
            }
            Stmt::For {
                iterator,
                iterable,
                body,
            } => {
                self.name(iterator);
                self.expr(iterable);
                self.stmt(body, loop_depth + 1);
            }
            Stmt::Return { value } => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Stmt::Break if loop_depth == 0 => self.errors.push(ValidationError::BreakOutsideLoop),
            Stmt::Continue if loop_depth == 0 => {
                self.errors.push(ValidationError::ContinueOutsideLoop)
            }
            Stmt::Break | Stmt::Continue => {}
            Stmt::Throw { value } => self.expr(value),
            Stmt::Try {
                body,
                catch_var,
                handler,
            } => {
                self.stmt(body, loop_depth);
                self.name(catch_var);
                self.stmt(handler, loop_depth);
            }
            Stmt::Function { def } => self.function(def),
            Stmt::Step { delay } => {
                if let Some(delay) = delay {
                    self.expr(delay);
                }
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::LitNull | Expr::LitBool { .. } | Expr::LitNum { .. } | Expr::LitStr { .. } => {}
            Expr::List { items } => items.iter().for_each(|item| self.expr(item)),
            Expr::Obj { fields } => fields.iter().for_each(|(_, value)| self.expr(value)),
            Expr::Ident { name } => self.name(name),
            Expr::Member { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Call { callee, args } => {
                self.expr(callee);
                args.iter().for_each(|arg| self.expr(arg));
            }
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Function { def } => self.function(def),
        }
    }

    fn function(&mut self, def: &FunctionDef) {
        let label = def.name.clone().unwrap_or_else(|| "<anonymous>".to_string());
        if let Some(name) = &def.name {
            self.name(name);
        }

        let mut seen = HashSet::new();
        for param in &def.params {
            self.name(param);
            if !seen.insert(param.as_str()) {
                self.errors.push(ValidationError::DuplicateParameter {
                    function: label.clone(),
                    param: param.clone(),
                });
            }
        }

        // Loops don't extend into a function body
        self.scope(&def.body);
        self.block(&def.body, 0);
    }

    fn name(&mut self, name: &str) {
        if name.starts_with(RESERVED_PREFIX) {
            self.errors.push(ValidationError::ReservedIdentifier {
                name: name.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::parser::parse_program;

    fn validate(source: &str) -> Result<(), Vec<ValidationError>> {
        let program = parse_program(source).expect("Should parse");
        validate_program(&program)
    }

    #[test]
    fn test_valid_program() {
        let source = r#"
            function f(a, b) { return a + b }
            for (let i of range(3)) {
                if (i == 1) { continue }
                while (true) { break }
            }
        "#;
        assert!(validate(source).is_ok());
    }

    #[test]
    fn test_break_outside_loop() {
        let errors = validate("break").unwrap_err();
        assert_eq!(errors, vec![ValidationError::BreakOutsideLoop]);
    }

    #[test]
    fn test_continue_does_not_cross_function_boundary() {
        let source = r#"
            while (true) {
                let f = function() { continue }
                break
            }
        "#;
        let errors = validate(source).unwrap_err();
        assert_eq!(errors, vec![ValidationError::ContinueOutsideLoop]);
    }

    #[test]
    fn test_duplicate_parameter() {
        let errors = validate("function f(a, a) { return a }").unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateParameter {
                function: "f".to_string(),
                param: "a".to_string(),
            }]
        );
    }

    #[test]
    fn test_duplicate_function_same_scope_only() {
        let errors = validate(
            r#"
            function f() {}
            function f() {}
            { function g() {} }
            function g() {}
            "#,
        )
        .unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateFunction {
                name: "f".to_string()
            }]
        );
    }

    #[test]
    fn test_reserved_identifiers() {
        let errors = validate("let __iter = __len([1])").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&ValidationError::ReservedIdentifier {
            name: "__iter".to_string()
        }));
        assert!(errors.contains(&ValidationError::ReservedIdentifier {
            name: "__len".to_string()
        }));
    }

    #[test]
    fn test_collects_all_errors() {
        let errors = validate("break\ncontinue\nlet __x = 1").unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}

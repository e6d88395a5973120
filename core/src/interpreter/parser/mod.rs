//! PEST-based parser for Stepwise programs
//!
//! Produces the AST consumed by instrumentation and the executor.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use super::types::ast::{BinaryOp, Expr, FunctionDef, Program, Stmt, UnaryOp};

#[cfg(test)]
mod tests;

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "interpreter/parser/stepwise.pest"]
struct StepwiseParser;

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Parse error: {0}")]
    PestError(String),
    #[error("Invalid program: {0}")]
    BuildError(String),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ParseError::PestError(err.to_string())
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Public API ===================== */

/// Parse a Stepwise source string into a program
pub fn parse_program(source: &str) -> ParseResult<Program> {
    let program = StepwiseParser::parse(Rule::program, source)?
        .next()
        .ok_or_else(|| ParseError::BuildError("Empty parse tree".to_string()))?;

    let body = program
        .into_inner()
        .filter(|pair| pair.as_rule() != Rule::EOI)
        .map(build_statement)
        .collect::<ParseResult<Vec<_>>>()?;

    Ok(Program { body })
}

/// Parse a single expression (testing and tooling API)
pub fn parse_expression(source: &str) -> ParseResult<Expr> {
    let program = parse_program(source)?;
    match program.body.as_slice() {
        [Stmt::Expr { expr }] => Ok(expr.clone()),
        _ => Err(ParseError::BuildError(format!(
            "Expected a single expression, got {} statement(s)",
            program.body.len()
        ))),
    }
}

/* ===================== AST Builder ===================== */

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_let
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_while
            | Rule::kw_for
            | Rule::kw_of
            | Rule::kw_return
            | Rule::kw_break
            | Rule::kw_continue
            | Rule::kw_throw
            | Rule::kw_try
            | Rule::kw_catch
            | Rule::kw_function
    )
}

/// Inner pairs of a node with keyword tokens dropped
fn parts(pair: Pair<'_, Rule>) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn required<'i>(
    inner: &mut impl Iterator<Item = Pair<'i, Rule>>,
    what: &str,
) -> ParseResult<Pair<'i, Rule>> {
    inner
        .next()
        .ok_or_else(|| ParseError::BuildError(format!("Missing {}", what)))
}

fn build_statement(pair: Pair<'_, Rule>) -> ParseResult<Stmt> {
    match pair.as_rule() {
        Rule::block => Ok(Stmt::Block {
            body: build_block(pair)?,
        }),
        Rule::function_decl => {
            let def = build_function(pair)?;
            Ok(Stmt::Function { def })
        }
        Rule::let_stmt => {
            // let_stmt = { kw_let ~ identifier ~ ("=" ~ expression)? }
            let mut inner = parts(pair);
            let name = required(&mut inner, "variable name")?.as_str().to_string();
            let init = inner.next().map(build_expression).transpose()?;
            Ok(Stmt::Let { name, init })
        }
        Rule::assign_stmt => {
            let mut inner = parts(pair);
            let name = required(&mut inner, "assignment target")?.as_str().to_string();
            let expr = build_expression(required(&mut inner, "assigned value")?)?;
            Ok(Stmt::Assign { name, expr })
        }
        Rule::if_stmt => {
            // if_stmt = { kw_if ~ "(" ~ expression ~ ")" ~ block ~ (kw_else ~ (if_stmt | block))? }
            let mut inner = parts(pair);
            let test = build_expression(required(&mut inner, "if condition")?)?;
            let then_s = build_statement(required(&mut inner, "if body")?)?;
            let else_s = inner.next().map(build_statement).transpose()?;
            Ok(Stmt::If {
                test,
                then_s: Box::new(then_s),
                else_s: else_s.map(Box::new),
            })
        }
        Rule::while_stmt => {
            let mut inner = parts(pair);
            let test = build_expression(required(&mut inner, "while condition")?)?;
            let body = build_statement(required(&mut inner, "while body")?)?;
            Ok(Stmt::While {
                test,
                body: Box::new(body),
            })
        }
        Rule::for_stmt => {
            // for_stmt = { kw_for ~ "(" ~ kw_let ~ identifier ~ kw_of ~ expression ~ ")" ~ block }
            let mut inner = parts(pair);
            let iterator = required(&mut inner, "loop variable")?.as_str().to_string();
            let iterable = build_expression(required(&mut inner, "loop iterable")?)?;
            let body = build_statement(required(&mut inner, "for body")?)?;
            Ok(Stmt::For {
                iterator,
                iterable,
                body: Box::new(body),
            })
        }
        Rule::return_stmt => {
            let value = parts(pair).next().map(build_expression).transpose()?;
            Ok(Stmt::Return { value })
        }
        Rule::break_stmt => Ok(Stmt::Break),
        Rule::continue_stmt => Ok(Stmt::Continue),
        Rule::throw_stmt => {
            let mut inner = parts(pair);
            let value = build_expression(required(&mut inner, "thrown value")?)?;
            Ok(Stmt::Throw { value })
        }
        Rule::try_stmt => {
            // try_stmt = { kw_try ~ block ~ kw_catch ~ "(" ~ identifier ~ ")" ~ block }
            let mut inner = parts(pair);
            let body = build_statement(required(&mut inner, "try body")?)?;
            let catch_var = required(&mut inner, "catch binding")?.as_str().to_string();
            let handler = build_statement(required(&mut inner, "catch body")?)?;
            Ok(Stmt::Try {
                body: Box::new(body),
                catch_var,
                handler: Box::new(handler),
            })
        }
        Rule::expr_stmt => {
            let mut inner = parts(pair);
            let expr = build_expression(required(&mut inner, "expression")?)?;
            Ok(Stmt::Expr { expr })
        }
        _ => Err(ParseError::BuildError(format!(
            "Unexpected statement rule: {:?}",
            pair.as_rule()
        ))),
    }
}

fn build_block(pair: Pair<'_, Rule>) -> ParseResult<Vec<Stmt>> {
    // block = { "{" ~ statement* ~ "}" }
    pair.into_inner().map(build_statement).collect()
}

fn build_function(pair: Pair<'_, Rule>) -> ParseResult<FunctionDef> {
    // function_decl = { kw_function ~ identifier ~ "(" ~ param_list? ~ ")" ~ block }
    // function_expr = { kw_function ~ identifier? ~ "(" ~ param_list? ~ ")" ~ block }
    let mut name = None;
    let mut params = Vec::new();
    let mut body = None;

    for part in parts(pair) {
        match part.as_rule() {
            Rule::identifier => name = Some(part.as_str().to_string()),
            Rule::param_list => {
                params = part.into_inner().map(|p| p.as_str().to_string()).collect();
            }
            Rule::block => body = Some(build_block(part)?),
            other => {
                return Err(ParseError::BuildError(format!(
                    "Unexpected function part: {:?}",
                    other
                )))
            }
        }
    }

    let body = body.ok_or_else(|| ParseError::BuildError("Function without body".to_string()))?;
    Ok(FunctionDef { name, params, body })
}

fn build_expression(pair: Pair<'_, Rule>) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::expression => {
            let mut inner = pair.into_inner();
            build_expression(required(&mut inner, "expression")?)
        }
        Rule::logic_or
        | Rule::logic_and
        | Rule::equality
        | Rule::comparison
        | Rule::additive
        | Rule::multiplicative => build_binary_chain(pair.into_inner()),
        Rule::unary => {
            // unary = { (op_not | op_neg)* ~ postfix }
            let mut ops = Vec::new();
            let mut operand = None;
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::op_not => ops.push(UnaryOp::Not),
                    Rule::op_neg => ops.push(UnaryOp::Neg),
                    _ => operand = Some(build_expression(part)?),
                }
            }
            let mut expr = operand
                .ok_or_else(|| ParseError::BuildError("Unary without operand".to_string()))?;
            // Innermost operator applies first
            for op in ops.into_iter().rev() {
                expr = Expr::Unary {
                    op,
                    operand: Box::new(expr),
                };
            }
            Ok(expr)
        }
        Rule::postfix => {
            // postfix = { primary ~ (call_args | member | index)* }
            let mut inner = pair.into_inner();
            let mut expr = build_expression(required(&mut inner, "primary expression")?)?;

            for suffix in inner {
                expr = match suffix.as_rule() {
                    Rule::call_args => Expr::Call {
                        callee: Box::new(expr),
                        args: suffix
                            .into_inner()
                            .map(build_expression)
                            .collect::<ParseResult<_>>()?,
                    },
                    Rule::member => {
                        let mut parts = suffix.into_inner();
                        let property = required(&mut parts, "property name")?.as_str().to_string();
                        Expr::Member {
                            object: Box::new(expr),
                            property,
                        }
                    }
                    Rule::index => {
                        let mut parts = suffix.into_inner();
                        let index = build_expression(required(&mut parts, "index expression")?)?;
                        Expr::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        }
                    }
                    other => {
                        return Err(ParseError::BuildError(format!(
                            "Unexpected postfix rule: {:?}",
                            other
                        )))
                    }
                };
            }

            Ok(expr)
        }
        Rule::function_expr => Ok(Expr::Function {
            def: build_function(pair)?,
        }),
        Rule::identifier => Ok(Expr::Ident {
            name: pair.as_str().to_string(),
        }),
        Rule::null_lit => Ok(Expr::LitNull),
        Rule::boolean => Ok(Expr::LitBool {
            v: pair.as_str() == "true",
        }),
        Rule::number => {
            let num_str = pair.as_str();
            let v = num_str.parse::<f64>().map_err(|e| {
                ParseError::BuildError(format!("Failed to parse number '{}': {}", num_str, e))
            })?;
            Ok(Expr::LitNum { v })
        }
        Rule::string => Ok(Expr::LitStr {
            v: string_value(pair)?,
        }),
        Rule::list_lit => Ok(Expr::List {
            items: pair
                .into_inner()
                .map(build_expression)
                .collect::<ParseResult<_>>()?,
        }),
        Rule::object_lit => {
            let mut fields = Vec::new();
            for field in pair.into_inner() {
                // object_field = { (identifier | string) ~ ":" ~ expression }
                let mut inner = field.into_inner();
                let key_pair = required(&mut inner, "object key")?;
                let key = match key_pair.as_rule() {
                    Rule::string => string_value(key_pair)?,
                    _ => key_pair.as_str().to_string(),
                };
                let value = build_expression(required(&mut inner, "object value")?)?;
                fields.push((key, value));
            }
            Ok(Expr::Obj { fields })
        }
        _ => Err(ParseError::BuildError(format!(
            "Unexpected expression rule: {:?}",
            pair.as_rule()
        ))),
    }
}

/// Fold `operand (op operand)*` left-associatively
fn build_binary_chain(mut inner: Pairs<'_, Rule>) -> ParseResult<Expr> {
    let mut expr = build_expression(required(&mut inner, "operand")?)?;

    while let Some(op_pair) = inner.next() {
        let op = binary_op(op_pair.as_rule())?;
        let right = build_expression(required(&mut inner, "right operand")?)?;
        expr = Expr::binary(op, expr, right);
    }

    Ok(expr)
}

fn binary_op(rule: Rule) -> ParseResult<BinaryOp> {
    Ok(match rule {
        Rule::op_or => BinaryOp::Or,
        Rule::op_and => BinaryOp::And,
        Rule::op_eq => BinaryOp::Eq,
        Rule::op_ne => BinaryOp::Ne,
        Rule::op_lt => BinaryOp::Lt,
        Rule::op_le => BinaryOp::Le,
        Rule::op_gt => BinaryOp::Gt,
        Rule::op_ge => BinaryOp::Ge,
        Rule::op_add => BinaryOp::Add,
        Rule::op_sub => BinaryOp::Sub,
        Rule::op_mul => BinaryOp::Mul,
        Rule::op_div => BinaryOp::Div,
        Rule::op_mod => BinaryOp::Mod,
        other => {
            return Err(ParseError::BuildError(format!(
                "Unexpected operator rule: {:?}",
                other
            )))
        }
    })
}

fn string_value(pair: Pair<'_, Rule>) -> ParseResult<String> {
    // string = ${ ("\"" ~ double_quoted ~ "\"") | ("'" ~ single_quoted ~ "'") }
    let raw = pair
        .into_inner()
        .next()
        .map(|p| p.as_str())
        .unwrap_or_default();
    Ok(unescape(raw))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

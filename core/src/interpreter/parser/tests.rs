//! Parser tests - verify parsing and AST structure
//!
//! These tests do NOT execute the code - that's covered by the executor tests.

use super::{parse_expression, parse_program, ParseError};
use crate::interpreter::types::ast::{BinaryOp, Expr, Stmt, UnaryOp};

/* ===================== Literals ===================== */

#[test]
fn test_parse_number_literal() {
    let expr = parse_expression("42.5").expect("Should parse");
    assert_eq!(expr, Expr::LitNum { v: 42.5 });
}

#[test]
fn test_parse_negative_number_is_unary() {
    let expr = parse_expression("-3").expect("Should parse");
    match expr {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
        } => assert_eq!(*operand, Expr::LitNum { v: 3.0 }),
        _ => panic!("Expected Unary Neg, got {:?}", expr),
    }
}

#[test]
fn test_parse_strings_with_escapes() {
    let expr = parse_expression(r#""line\n\"quoted\"""#).expect("Should parse");
    assert_eq!(
        expr,
        Expr::LitStr {
            v: "line\n\"quoted\"".to_string()
        }
    );

    let expr = parse_expression("'single'").expect("Should parse");
    assert_eq!(
        expr,
        Expr::LitStr {
            v: "single".to_string()
        }
    );
}

#[test]
fn test_parse_keyword_literals() {
    assert_eq!(parse_expression("true").unwrap(), Expr::LitBool { v: true });
    assert_eq!(parse_expression("false").unwrap(), Expr::LitBool { v: false });
    assert_eq!(parse_expression("null").unwrap(), Expr::LitNull);
}

#[test]
fn test_identifier_with_keyword_prefix() {
    // `letter` and `nullable` must not be split into keyword + identifier
    assert_eq!(parse_expression("letter").unwrap(), Expr::ident("letter"));
    assert_eq!(parse_expression("nullable").unwrap(), Expr::ident("nullable"));
}

#[test]
fn test_parse_list_and_object() {
    let expr = parse_expression(r#"{a: [1, 2,], "b c": null}"#).expect("Should parse");
    match expr {
        Expr::Obj { fields } => {
            assert_eq!(fields.len(), 2);
            assert_eq!(fields[0].0, "a");
            assert_eq!(
                fields[0].1,
                Expr::List {
                    items: vec![Expr::LitNum { v: 1.0 }, Expr::LitNum { v: 2.0 }]
                }
            );
            assert_eq!(fields[1].0, "b c");
        }
        _ => panic!("Expected Obj, got {:?}", expr),
    }
}

/* ===================== Operators ===================== */

#[test]
fn test_precedence_mul_over_add() {
    let expr = parse_expression("1 + 2 * 3").expect("Should parse");
    assert_eq!(
        expr,
        Expr::binary(
            BinaryOp::Add,
            Expr::LitNum { v: 1.0 },
            Expr::binary(BinaryOp::Mul, Expr::LitNum { v: 2.0 }, Expr::LitNum { v: 3.0 }),
        )
    );
}

#[test]
fn test_left_associative_subtraction() {
    let expr = parse_expression("10 - 4 - 3").expect("Should parse");
    assert_eq!(
        expr,
        Expr::binary(
            BinaryOp::Sub,
            Expr::binary(BinaryOp::Sub, Expr::LitNum { v: 10.0 }, Expr::LitNum { v: 4.0 }),
            Expr::LitNum { v: 3.0 },
        )
    );
}

#[test]
fn test_logical_and_comparison() {
    let expr = parse_expression("a <= 1 && b !== 2 || !c").expect("Should parse");
    match expr {
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => {
            assert!(matches!(*left, Expr::Binary { op: BinaryOp::And, .. }));
            assert!(matches!(*right, Expr::Unary { op: UnaryOp::Not, .. }));
        }
        _ => panic!("Expected Or, got {:?}", expr),
    }
}

#[test]
fn test_postfix_chain() {
    let expr = parse_expression("console.log(items[0], x)").expect("Should parse");
    match expr {
        Expr::Call { callee, args } => {
            assert_eq!(
                *callee,
                Expr::Member {
                    object: Box::new(Expr::ident("console")),
                    property: "log".to_string(),
                }
            );
            assert_eq!(args.len(), 2);
            assert!(matches!(args[0], Expr::Index { .. }));
        }
        _ => panic!("Expected Call, got {:?}", expr),
    }
}

/* ===================== Statements ===================== */

#[test]
fn test_parse_let_and_assign() {
    let program = parse_program("let x = 1; x = x + 1\nlet y").expect("Should parse");
    assert_eq!(program.body.len(), 3);
    assert!(matches!(&program.body[0], Stmt::Let { name, init: Some(_) } if name == "x"));
    assert!(matches!(&program.body[1], Stmt::Assign { name, .. } if name == "x"));
    assert!(matches!(&program.body[2], Stmt::Let { name, init: None } if name == "y"));
}

#[test]
fn test_equality_is_not_assignment() {
    let program = parse_program("x == 1").expect("Should parse");
    assert!(matches!(
        &program.body[0],
        Stmt::Expr {
            expr: Expr::Binary { op: BinaryOp::Eq, .. }
        }
    ));
}

#[test]
fn test_parse_if_else_chain() {
    let program =
        parse_program("if (a) { print(1) } else if (b) { print(2) } else { print(3) }")
            .expect("Should parse");
    match &program.body[0] {
        Stmt::If {
            else_s: Some(else_s),
            ..
        } => match else_s.as_ref() {
            Stmt::If {
                else_s: Some(last), ..
            } => assert!(matches!(last.as_ref(), Stmt::Block { .. })),
            other => panic!("Expected nested If, got {:?}", other),
        },
        other => panic!("Expected If, got {:?}", other),
    }
}

#[test]
fn test_parse_loops() {
    let program = parse_program(
        r#"
        while (i < 3) { i = i + 1; continue }
        for (let item of [1, 2]) { break }
        "#,
    )
    .expect("Should parse");

    assert!(matches!(&program.body[0], Stmt::While { .. }));
    match &program.body[1] {
        Stmt::For {
            iterator, body, ..
        } => {
            assert_eq!(iterator, "item");
            assert_eq!(
                body.as_ref(),
                &Stmt::Block {
                    body: vec![Stmt::Break]
                }
            );
        }
        other => panic!("Expected For, got {:?}", other),
    }
}

#[test]
fn test_parse_functions() {
    let program = parse_program(
        r#"
        function add(a, b) { return a + b }
        let f = function() { return }
        "#,
    )
    .expect("Should parse");

    match &program.body[0] {
        Stmt::Function { def } => {
            assert_eq!(def.name.as_deref(), Some("add"));
            assert_eq!(def.params, vec!["a".to_string(), "b".to_string()]);
            assert_eq!(def.body.len(), 1);
        }
        other => panic!("Expected Function, got {:?}", other),
    }
    match &program.body[1] {
        Stmt::Let {
            init: Some(Expr::Function { def }),
            ..
        } => {
            assert!(def.name.is_none());
            assert_eq!(def.body, vec![Stmt::Return { value: None }]);
        }
        other => panic!("Expected Let with function, got {:?}", other),
    }
}

#[test]
fn test_parse_try_catch_throw() {
    let program = parse_program(r#"try { throw "boom" } catch (e) { print(e) }"#)
        .expect("Should parse");
    match &program.body[0] {
        Stmt::Try {
            body, catch_var, ..
        } => {
            assert_eq!(catch_var, "e");
            assert!(matches!(
                body.as_ref(),
                Stmt::Block { body } if matches!(body[0], Stmt::Throw { .. })
            ));
        }
        other => panic!("Expected Try, got {:?}", other),
    }
}

#[test]
fn test_comments_are_ignored() {
    let program = parse_program(
        r#"
        // leading comment
        let x = 1 /* inline */ + 2
        "#,
    )
    .expect("Should parse");
    assert_eq!(program.body.len(), 1);
}

#[test]
fn test_syntax_error() {
    let result = parse_program("let = 5");
    assert!(matches!(result, Err(ParseError::PestError(_))));
}

#[test]
fn test_json_round_trip() {
    let program = parse_program("for (let i of range(3)) { print(i) }").expect("Should parse");
    let json = serde_json::to_string(&program).expect("Serialize");
    let back = serde_json::from_str(&json).expect("Deserialize");
    assert_eq!(program, back);
}

// Copyright 2025 Flatbase Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Procedural tests: variables, blocks, loops, cursors, user-defined
//! functions, and prepared statements

use std::sync::Arc;

use flatbase::core::{ComparisonOp, Error, Result, SourcePosition, Value};
use flatbase::executor::context::ExecutionContext;
use flatbase::executor::scope::ReferenceScope;
use flatbase::executor::{Executor, Flow};
use flatbase::parser::ast::*;
use flatbase::parser::StatementParser;
use flatbase::storage::{Flags, Format, Transaction};
use tempfile::tempdir;

fn pos() -> SourcePosition {
    SourcePosition::default()
}

fn session(dir: Option<&std::path::Path>) -> (Arc<Transaction>, Executor, ReferenceScope, ExecutionContext) {
    let mut flags = Flags::default();
    if let Some(dir) = dir {
        flags
            .set_repository(dir.to_str().expect("utf-8 path"))
            .expect("repository should exist");
    }
    flags.export_options.format = Format::Csv;
    let tx = Arc::new(Transaction::new(flags));
    let executor = Executor::new(Arc::clone(&tx));
    let scope = ReferenceScope::new(Arc::clone(&tx));
    (tx, executor, scope, ExecutionContext::background())
}

fn declare_var(name: &str, value: Option<Expression>) -> Statement {
    Statement::VariableDeclaration {
        assignments: vec![VariableAssignment {
            name: name.to_string(),
            value,
        }],
        pos: pos(),
    }
}

fn set_var(name: &str, value: Expression) -> Statement {
    Statement::VariableSubstitution {
        name: name.to_string(),
        value,
        pos: pos(),
    }
}

fn var(name: &str) -> Expression {
    Expression::variable(name)
}

fn lit_i(i: i64) -> Expression {
    Expression::literal(Value::Integer(i))
}

fn add(left: Expression, right: Expression) -> Expression {
    Expression::Arithmetic {
        left: Box::new(left),
        op: flatbase::core::ArithmeticOp::Add,
        right: Box::new(right),
        pos: pos(),
    }
}

fn cmp(left: Expression, op: ComparisonOp, right: Expression) -> Expression {
    Expression::Comparison {
        left: Box::new(left),
        op,
        right: Box::new(right),
        pos: pos(),
    }
}

#[test]
fn variable_declared_in_block_is_not_visible_after_it() {
    let (_tx, executor, mut scope, ctx) = session(None);

    let statements = [
        Statement::If {
            condition: Expression::literal(Value::Boolean(true)),
            then: vec![declare_var("inner", Some(lit_i(1)))],
            elseifs: vec![],
            else_block: None,
            pos: pos(),
        },
    ];
    executor
        .execute(&ctx, &mut scope, &statements)
        .expect("if should succeed");

    assert!(
        matches!(
            scope.get_variable("inner", pos()),
            Err(Error::UndeclaredVariable { .. })
        ),
        "a block-scoped variable must vanish with its block"
    );
}

#[test]
fn assignment_across_block_boundary_mutates_the_defining_scope() {
    let (_tx, executor, mut scope, ctx) = session(None);

    let statements = [
        declare_var("total", Some(lit_i(0))),
        Statement::If {
            condition: Expression::literal(Value::Boolean(true)),
            then: vec![set_var("total", lit_i(42))],
            elseifs: vec![],
            else_block: None,
            pos: pos(),
        },
    ];
    executor
        .execute(&ctx, &mut scope, &statements)
        .expect("if should succeed");
    assert_eq!(scope.get_variable("total", pos()).unwrap(), Value::Integer(42));
}

#[test]
fn while_loop_with_continue_and_break() {
    let (_tx, executor, mut scope, ctx) = session(None);

    // Sum 1..=5 but skip 3 and stop after 5
    let statements = [
        declare_var("i", Some(lit_i(0))),
        declare_var("sum", Some(lit_i(0))),
        Statement::While {
            condition: cmp(var("i"), ComparisonOp::Less, lit_i(10)),
            body: vec![
                set_var("i", add(var("i"), lit_i(1))),
                Statement::If {
                    condition: cmp(var("i"), ComparisonOp::Equal, lit_i(3)),
                    then: vec![Statement::Continue { pos: pos() }],
                    elseifs: vec![],
                    else_block: None,
                    pos: pos(),
                },
                Statement::If {
                    condition: cmp(var("i"), ComparisonOp::Greater, lit_i(5)),
                    then: vec![Statement::Break { pos: pos() }],
                    elseifs: vec![],
                    else_block: None,
                    pos: pos(),
                },
                set_var("sum", add(var("sum"), var("i"))),
            ],
            pos: pos(),
        },
    ];
    executor
        .execute(&ctx, &mut scope, &statements)
        .expect("loop should succeed");
    // 1 + 2 + 4 + 5
    assert_eq!(scope.get_variable("sum", pos()).unwrap(), Value::Integer(12));
}

#[test]
fn cursor_fetch_past_the_end_sets_not_found() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("users.csv"), "id,name\n1,Alice\n2,Bob\n")
        .expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()));

    let cursor_query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::expr(Expression::field(None, "id"))],
        from: Some(FromClause {
            tables: vec![TableReference::table("users")],
            pos: pos(),
        }),
        ..Default::default()
    });
    let fetch = || Statement::FetchCursor {
        name: "c".to_string(),
        position: FetchPosition::Next,
        variables: vec!["v".to_string()],
        pos: pos(),
    };
    let statements = [
        declare_var("v", None),
        Statement::CursorDeclaration {
            name: "c".to_string(),
            query: cursor_query,
            pos: pos(),
        },
        Statement::OpenCursor {
            name: "c".to_string(),
            pos: pos(),
        },
        fetch(),
        fetch(),
    ];
    executor
        .execute(&ctx, &mut scope, &statements)
        .expect("open and fetch should succeed");
    assert_eq!(scope.get_variable("v", pos()).unwrap(), Value::string("2"));
    assert_eq!(scope.cursor_count("c", pos()).unwrap(), 2);

    // Third fetch runs off the end: NOT FOUND, the variable becomes Null
    executor
        .execute(&ctx, &mut scope, &[fetch()])
        .expect("exhausted fetch is not an error");
    assert_eq!(scope.get_variable("v", pos()).unwrap(), Value::Null);
    assert_eq!(
        scope.cursor_is_in_range("c", pos()).unwrap(),
        flatbase::core::Ternary::False
    );
}

#[test]
fn user_function_computes_and_returns() {
    let (_tx, executor, mut scope, ctx) = session(None);

    let declare = Statement::FunctionDeclaration {
        name: "add2".to_string(),
        parameters: vec![
            FunctionParameter {
                name: "a".to_string(),
                default: None,
            },
            FunctionParameter {
                name: "b".to_string(),
                default: Some(lit_i(10)),
            },
        ],
        is_aggregate: false,
        cursor_name: None,
        body: vec![Statement::Return {
            value: Some(add(var("a"), var("b"))),
            pos: pos(),
        }],
        pos: pos(),
    };
    let statements = [
        declare,
        declare_var("r1", Some(Expression::Function {
            name: "add2".to_string(),
            args: vec![lit_i(1), lit_i(2)],
            distinct: false,
            pos: pos(),
        })),
        declare_var("r2", Some(Expression::Function {
            name: "add2".to_string(),
            args: vec![lit_i(5)],
            distinct: false,
            pos: pos(),
        })),
    ];
    executor
        .execute(&ctx, &mut scope, &statements)
        .expect("function calls should succeed");
    assert_eq!(scope.get_variable("r1", pos()).unwrap(), Value::Integer(3));
    assert_eq!(
        scope.get_variable("r2", pos()).unwrap(),
        Value::Integer(15),
        "missing arguments take their declared defaults"
    );
}

#[test]
fn recursive_function_is_bounded_by_the_limit() {
    let (tx, executor, mut scope, ctx) = session(None);
    tx.update_flags(pos(), |f| {
        f.set_limit_recursion(16);
        Ok(())
    })
    .expect("flag update");

    // countdown(n): n <= 0 ? 0 : countdown(n - 1)
    let declare = Statement::FunctionDeclaration {
        name: "countdown".to_string(),
        parameters: vec![FunctionParameter {
            name: "n".to_string(),
            default: None,
        }],
        is_aggregate: false,
        cursor_name: None,
        body: vec![
            Statement::If {
                condition: cmp(var("n"), ComparisonOp::LessOrEqual, lit_i(0)),
                then: vec![Statement::Return {
                    value: Some(lit_i(0)),
                    pos: pos(),
                }],
                elseifs: vec![],
                else_block: None,
                pos: pos(),
            },
            Statement::Return {
                value: Some(Expression::Function {
                    name: "countdown".to_string(),
                    args: vec![add(var("n"), lit_i(-1))],
                    distinct: false,
                    pos: pos(),
                }),
                pos: pos(),
            },
        ],
        pos: pos(),
    };
    executor
        .execute(&ctx, &mut scope, &[declare])
        .expect("declaration should succeed");

    executor
        .execute(
            &ctx,
            &mut scope,
            &[declare_var("ok", Some(Expression::Function {
                name: "countdown".to_string(),
                args: vec![lit_i(10)],
                distinct: false,
                pos: pos(),
            }))],
        )
        .expect("shallow recursion should succeed");

    let err = executor
        .execute(
            &ctx,
            &mut scope,
            &[declare_var("deep", Some(Expression::Function {
                name: "countdown".to_string(),
                args: vec![lit_i(100)],
                distinct: false,
                pos: pos(),
            }))],
        )
        .expect_err("deep recursion must hit the limit");
    assert!(matches!(err, Error::RecursionLimitExceeded { .. }));
}

#[test]
fn aggregate_function_reads_the_partition_through_a_cursor() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("t.csv"), "v\n1\n2\n3\n").expect("write fixture");
    let (tx, executor, mut scope, ctx) = session(Some(dir.path()));

    // sumx(c): total of the partition values fetched from pseudo-cursor c
    let declare = Statement::FunctionDeclaration {
        name: "sumx".to_string(),
        parameters: vec![],
        is_aggregate: true,
        cursor_name: Some("c".to_string()),
        body: vec![
            declare_var("total", Some(lit_i(0))),
            Statement::WhileInCursor {
                variables: vec!["e".to_string()],
                cursor: "c".to_string(),
                body: vec![set_var("total", add(var("total"), var("e")))],
                pos: pos(),
            },
            Statement::Return {
                value: Some(var("total")),
                pos: pos(),
            },
        ],
        pos: pos(),
    };
    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::aliased(
            Expression::Function {
                name: "sumx".to_string(),
                args: vec![Expression::field(None, "v")],
                distinct: false,
                pos: pos(),
            },
            "total",
        )],
        from: Some(FromClause {
            tables: vec![TableReference::table("t")],
            pos: pos(),
        }),
        ..Default::default()
    });
    executor
        .execute(&ctx, &mut scope, &[declare, Statement::Select(query)])
        .expect("aggregate query should succeed");
    assert_eq!(tx.take_results()[0], "total\n6\n");
}

// ============================================================================
// Prepared statements through the parser seam
// ============================================================================

/// Test parser mapping fixed source strings to statement lists
struct MapParser(std::collections::HashMap<String, Vec<Statement>>);

impl StatementParser for MapParser {
    fn parse(&self, source: &str) -> Result<Vec<Statement>> {
        self.0
            .get(source)
            .cloned()
            .ok_or_else(|| Error::syntax(SourcePosition::default(), format!("cannot parse '{}'", source)))
    }
}

#[test]
fn prepared_statement_substitutes_placeholders() {
    let (tx, executor, mut scope, ctx) = session(None);

    let parameterized = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::aliased(
            Expression::Placeholder {
                label: PlaceholderLabel::Positional(1),
                pos: pos(),
            },
            "v",
        )],
        ..Default::default()
    });
    let mut sources = std::collections::HashMap::new();
    sources.insert(
        "SELECT ? AS v".to_string(),
        vec![Statement::Select(parameterized)],
    );
    tx.set_parser(Arc::new(MapParser(sources)));

    let statements = [
        Statement::Prepare {
            name: "q".to_string(),
            statement: "SELECT ? AS v".to_string(),
            pos: pos(),
        },
        Statement::ExecutePrepared {
            name: "q".to_string(),
            values: vec![lit_i(7)],
            named_values: vec![],
            pos: pos(),
        },
    ];
    executor
        .execute(&ctx, &mut scope, &statements)
        .expect("prepare and execute should succeed");
    assert_eq!(tx.take_results()[0], "v\n7\n");

    executor
        .execute(
            &ctx,
            &mut scope,
            &[Statement::DisposePrepared {
                name: "q".to_string(),
                pos: pos(),
            }],
        )
        .expect("dispose should succeed");
    let err = executor
        .execute(
            &ctx,
            &mut scope,
            &[Statement::ExecutePrepared {
                name: "q".to_string(),
                values: vec![lit_i(7)],
                named_values: vec![],
                pos: pos(),
            }],
        )
        .expect_err("disposed statement must not execute");
    assert!(matches!(err, Error::PreparedStatementNotExist { .. }));
}

#[test]
fn execute_immediate_without_a_parser_fails_clearly() {
    let (_tx, executor, mut scope, ctx) = session(None);
    let err = executor
        .execute(
            &ctx,
            &mut scope,
            &[Statement::ExecuteImmediate {
                source: Expression::literal(Value::string("SELECT 1")),
                values: vec![],
                pos: pos(),
            }],
        )
        .expect_err("no parser is installed");
    assert!(matches!(err, Error::ParserNotAvailable { .. }));
}

#[test]
fn exit_unwinds_nested_control_structures() {
    let (_tx, executor, mut scope, ctx) = session(None);
    let statements = [
        declare_var("i", Some(lit_i(0))),
        Statement::While {
            condition: Expression::literal(Value::Boolean(true)),
            body: vec![Statement::If {
                condition: Expression::literal(Value::Boolean(true)),
                then: vec![Statement::Exit {
                    code: Some(lit_i(2)),
                    pos: pos(),
                }],
                elseifs: vec![],
                else_block: None,
                pos: pos(),
            }],
            pos: pos(),
        },
    ];
    let flow = executor
        .execute(&ctx, &mut scope, &statements)
        .expect("exit is not an error");
    assert_eq!(flow, Flow::Exit(2));
}

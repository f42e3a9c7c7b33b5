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

//! Query execution tests: projections, filters, joins, grouping, set
//! operations, subqueries, and output encoding

use std::sync::Arc;

use flatbase::core::{ComparisonOp, Error, SourcePosition, Value};
use flatbase::executor::context::ExecutionContext;
use flatbase::executor::scope::ReferenceScope;
use flatbase::executor::Executor;
use flatbase::parser::ast::*;
use flatbase::storage::{Flags, Format, Transaction};
use tempfile::tempdir;

fn pos() -> SourcePosition {
    SourcePosition::default()
}

fn session(
    dir: Option<&std::path::Path>,
    format: Format,
) -> (Arc<Transaction>, Executor, ReferenceScope, ExecutionContext) {
    let mut flags = Flags::default();
    if let Some(dir) = dir {
        flags
            .set_repository(dir.to_str().expect("utf-8 path"))
            .expect("repository should exist");
    }
    flags.export_options.format = format;
    let tx = Arc::new(Transaction::new(flags));
    let executor = Executor::new(Arc::clone(&tx));
    let scope = ReferenceScope::new(Arc::clone(&tx));
    (tx, executor, scope, ExecutionContext::background())
}

fn cmp(left: Expression, op: ComparisonOp, right: Expression) -> Expression {
    Expression::Comparison {
        left: Box::new(left),
        op,
        right: Box::new(right),
        pos: pos(),
    }
}

fn lit_i(i: i64) -> Expression {
    Expression::literal(Value::Integer(i))
}

fn lit_s(s: &str) -> Expression {
    Expression::literal(Value::string(s))
}

fn from_table(name: &str) -> Option<FromClause> {
    Some(FromClause {
        tables: vec![TableReference::table(name)],
        pos: pos(),
    })
}

fn run_select(
    executor: &Executor,
    ctx: &ExecutionContext,
    scope: &mut ReferenceScope,
    query: SelectQuery,
) -> String {
    executor
        .execute(ctx, scope, &[Statement::Select(query)])
        .expect("query should succeed");
    let mut results = executor.tx.take_results();
    assert_eq!(results.len(), 1, "expected one result");
    results.pop().expect("one result")
}

#[test]
fn select_where_returns_matching_rows() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("users.csv"), "id,name\n1,Alice\n2,Bob\n")
        .expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::expr(Expression::field(None, "name"))],
        from: from_table("users"),
        where_clause: Some(cmp(
            Expression::field(None, "id"),
            ComparisonOp::Equal,
            lit_i(2),
        )),
        ..Default::default()
    });
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "name\nBob\n");
}

#[test]
fn select_literals_as_pretty_json() {
    let (_tx, executor, mut scope, ctx) = {
        let mut flags = Flags::default();
        flags.export_options.format = Format::Json;
        flags.export_options.pretty_print = true;
        let tx = Arc::new(Transaction::new(flags));
        let executor = Executor::new(Arc::clone(&tx));
        let scope = ReferenceScope::new(Arc::clone(&tx));
        (tx, executor, scope, ExecutionContext::background())
    };

    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![
            SelectField::aliased(lit_i(1), "a"),
            SelectField::aliased(Expression::literal(Value::Null), "b"),
        ],
        ..Default::default()
    });
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "[\n  {\n    \"a\": 1,\n    \"b\": null\n  }\n]");
}

#[test]
fn divide_by_zero_downgrades_to_null() {
    let (_tx, executor, mut scope, ctx) = session(None, Format::Csv);
    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::aliased(
            Expression::Arithmetic {
                left: Box::new(lit_i(1)),
                op: flatbase::core::ArithmeticOp::Divide,
                right: Box::new(lit_i(0)),
                pos: pos(),
            },
            "q",
        )],
        ..Default::default()
    });
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "q\n\n");
}

#[test]
fn case_with_null_comparison_falls_through_to_else() {
    let (_tx, executor, mut scope, ctx) = session(None, Format::Csv);
    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::aliased(
            Expression::Case {
                subject: None,
                branches: vec![CaseBranch {
                    condition: cmp(
                        Expression::literal(Value::Null),
                        ComparisonOp::Equal,
                        Expression::literal(Value::Null),
                    ),
                    result: lit_s("eq"),
                }],
                else_result: Some(Box::new(lit_s("ne"))),
                pos: pos(),
            },
            "result",
        )],
        ..Default::default()
    });
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "result\nne\n");
}

#[test]
fn subquery_in_from_preserves_rows_and_order() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("t.csv"),
        "id,name\n3,c\n1,a\n2,b\n",
    )
    .expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let inner = SelectQuery {
        order_by: Some(OrderByClause {
            items: vec![OrderItem {
                expr: Expression::field(None, "id"),
                direction: SortDirection::Descending,
                null_position: None,
            }],
            pos: pos(),
        }),
        ..SelectQuery::from_clause(SelectClause {
            fields: vec![SelectField::Wildcard { pos: pos() }],
            from: from_table("t"),
            ..Default::default()
        })
    };

    let direct = run_select(&executor, &ctx, &mut scope, inner.clone());

    let wrapped = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::Wildcard { pos: pos() }],
        from: Some(FromClause {
            tables: vec![TableReference::Subquery {
                query: Box::new(inner),
                alias: Some("s".to_string()),
                pos: pos(),
            }],
            pos: pos(),
        }),
        ..Default::default()
    });
    let indirect = run_select(&executor, &ctx, &mut scope, wrapped);
    assert_eq!(direct, indirect);
    assert_eq!(direct, "id,name\n3,c\n2,b\n1,a\n");
}

#[test]
fn distinct_dedupes_projected_tuples() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("t.csv"), "v\na\nb\na\n").expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let query = SelectQuery::from_clause(SelectClause {
        distinct: true,
        fields: vec![SelectField::expr(Expression::field(None, "v"))],
        from: from_table("t"),
        ..Default::default()
    });
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "v\na\nb\n");
}

#[test]
fn limit_with_ties_extends_to_equal_sort_keys() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("scores.csv"),
        "name,score\na,90\nb,80\nc,90\nd,70\n",
    )
    .expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let query = SelectQuery {
        order_by: Some(OrderByClause {
            items: vec![OrderItem {
                expr: Expression::field(None, "score"),
                direction: SortDirection::Descending,
                null_position: None,
            }],
            pos: pos(),
        }),
        limit: Some(LimitClause {
            value: lit_i(1),
            percent: false,
            with_ties: true,
            pos: pos(),
        }),
        ..SelectQuery::from_clause(SelectClause {
            fields: vec![SelectField::expr(Expression::field(None, "name"))],
            from: from_table("scores"),
            ..Default::default()
        })
    };
    let result = run_select(&executor, &ctx, &mut scope, query);
    // Both rows scoring 90 survive the cut of one
    assert_eq!(result, "name\na\nc\n");
}

#[test]
fn group_by_computes_aggregates_per_partition() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("sales.csv"),
        "region,amount\neast,10\nwest,5\neast,20\n",
    )
    .expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let query = SelectQuery {
        order_by: Some(OrderByClause {
            items: vec![OrderItem {
                expr: Expression::field(None, "region"),
                direction: SortDirection::Ascending,
                null_position: None,
            }],
            pos: pos(),
        }),
        ..SelectQuery::from_clause(SelectClause {
            fields: vec![
                SelectField::expr(Expression::field(None, "region")),
                SelectField::aliased(
                    Expression::Function {
                        name: "COUNT".to_string(),
                        args: vec![],
                        distinct: false,
                        pos: pos(),
                    },
                    "n",
                ),
                SelectField::aliased(
                    Expression::Function {
                        name: "SUM".to_string(),
                        args: vec![Expression::field(None, "amount")],
                        distinct: false,
                        pos: pos(),
                    },
                    "total",
                ),
            ],
            from: from_table("sales"),
            group_by: Some(vec![Expression::field(None, "region")]),
            ..Default::default()
        })
    };
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "region,n,total\neast,2,30\nwest,1,5\n");
}

#[test]
fn bare_column_on_grouped_view_is_rejected() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("t.csv"), "a,b\n1,2\n").expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::expr(Expression::field(None, "b"))],
        from: from_table("t"),
        group_by: Some(vec![Expression::field(None, "a")]),
        ..Default::default()
    });
    let err = executor
        .execute(&ctx, &mut scope, &[Statement::Select(query)])
        .expect_err("non-key column must be rejected");
    assert!(matches!(err, Error::FieldNotGroupKey { .. }));
}

#[test]
fn inner_join_matches_on_predicate() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("users.csv"), "id,name\n1,Alice\n2,Bob\n")
        .expect("write fixture");
    std::fs::write(
        dir.path().join("orders.csv"),
        "user_id,item\n1,book\n1,pen\n3,ink\n",
    )
    .expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let join = TableReference::Join(Box::new(JoinClause {
        left: TableReference::table("users"),
        right: TableReference::table("orders"),
        join_type: JoinType::Inner,
        natural: false,
        condition: Some(JoinCondition::On(cmp(
            Expression::field(Some("users"), "id"),
            ComparisonOp::Equal,
            Expression::field(Some("orders"), "user_id"),
        ))),
        pos: pos(),
    }));
    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![
            SelectField::expr(Expression::field(None, "name")),
            SelectField::expr(Expression::field(None, "item")),
        ],
        from: Some(FromClause {
            tables: vec![join],
            pos: pos(),
        }),
        ..Default::default()
    });
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "name,item\nAlice,book\nAlice,pen\n");
}

#[test]
fn left_join_fills_missing_side_with_nulls() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("users.csv"), "id,name\n1,Alice\n2,Bob\n")
        .expect("write fixture");
    std::fs::write(dir.path().join("orders.csv"), "user_id,item\n1,book\n")
        .expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let join = TableReference::Join(Box::new(JoinClause {
        left: TableReference::table("users"),
        right: TableReference::table("orders"),
        join_type: JoinType::LeftOuter,
        natural: false,
        condition: Some(JoinCondition::On(cmp(
            Expression::field(Some("users"), "id"),
            ComparisonOp::Equal,
            Expression::field(Some("orders"), "user_id"),
        ))),
        pos: pos(),
    }));
    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![
            SelectField::expr(Expression::field(None, "name")),
            SelectField::expr(Expression::field(None, "item")),
        ],
        from: Some(FromClause {
            tables: vec![join],
            pos: pos(),
        }),
        ..Default::default()
    });
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "name,item\nAlice,book\nBob,\n");
}

#[test]
fn using_join_merges_the_named_column() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.csv"), "id,x\n1,foo\n").expect("write fixture");
    std::fs::write(dir.path().join("b.csv"), "id,y\n1,bar\n").expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let join = TableReference::Join(Box::new(JoinClause {
        left: TableReference::table("a"),
        right: TableReference::table("b"),
        join_type: JoinType::Inner,
        natural: false,
        condition: Some(JoinCondition::Using(vec!["id".to_string()])),
        pos: pos(),
    }));
    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::Wildcard { pos: pos() }],
        from: Some(FromClause {
            tables: vec![join],
            pos: pos(),
        }),
        ..Default::default()
    });
    let result = run_select(&executor, &ctx, &mut scope, query);
    // One id column in the output
    assert_eq!(result, "id,x,y\n1,foo,bar\n");
}

#[test]
fn union_dedupes_and_union_all_keeps_duplicates() {
    let (_tx, executor, mut scope, ctx) = session(None, Format::Csv);

    let one = SelectClause {
        fields: vec![SelectField::aliased(lit_i(1), "v")],
        ..Default::default()
    };
    let make = |all: bool| SelectQuery {
        with: None,
        entity: SelectEntity::SetOperation {
            left: Box::new(SelectEntity::Select(Box::new(one.clone()))),
            op: SetOperator::Union,
            all,
            right: Box::new(SelectEntity::Select(Box::new(one.clone()))),
            pos: pos(),
        },
        order_by: None,
        limit: None,
        offset: None,
        pos: pos(),
    };

    assert_eq!(run_select(&executor, &ctx, &mut scope, make(false)), "v\n1\n");
    assert_eq!(
        run_select(&executor, &ctx, &mut scope, make(true)),
        "v\n1\n1\n"
    );
}

#[test]
fn exists_subquery_correlates_with_outer_record() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("users.csv"), "id,name\n1,Alice\n2,Bob\n")
        .expect("write fixture");
    std::fs::write(dir.path().join("orders.csv"), "user_id,item\n1,book\n")
        .expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let subquery = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::expr(lit_i(1))],
        from: from_table("orders"),
        where_clause: Some(cmp(
            Expression::field(Some("orders"), "user_id"),
            ComparisonOp::Equal,
            Expression::field(Some("users"), "id"),
        )),
        ..Default::default()
    });
    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::expr(Expression::field(None, "name"))],
        from: from_table("users"),
        where_clause: Some(Expression::Exists {
            query: Box::new(subquery),
            pos: pos(),
        }),
        ..Default::default()
    });
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "name\nAlice\n");
}

#[test]
fn like_pattern_with_wildcards() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("t.csv"), "name\nalpha\nbeta\nalphabet\n")
        .expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::expr(Expression::field(None, "name"))],
        from: from_table("t"),
        where_clause: Some(Expression::Like {
            subject: Box::new(Expression::field(None, "name")),
            pattern: Box::new(lit_s("alpha%")),
            negated: false,
            pos: pos(),
        }),
        ..Default::default()
    });
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "name\nalpha\nalphabet\n");
}

#[test]
fn cancelled_context_stops_execution() {
    let dir = tempdir().expect("tempdir");
    let mut content = String::from("id\n");
    for i in 0..100 {
        content.push_str(&format!("{}\n", i));
    }
    std::fs::write(dir.path().join("big.csv"), content).expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);
    ctx.cancel();

    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::Wildcard { pos: pos() }],
        from: from_table("big"),
        ..Default::default()
    });
    let err = executor
        .execute(&ctx, &mut scope, &[Statement::Select(query)])
        .expect_err("cancelled context must fail");
    assert_eq!(err, Error::ContextCanceled);
}

#[test]
fn with_clause_defines_inline_tables() {
    let (_tx, executor, mut scope, ctx) = session(None, Format::Csv);

    let inline = InlineTableDef {
        name: "nums".to_string(),
        columns: Some(vec!["n".to_string()]),
        recursive: false,
        query: SelectQuery::from_clause(SelectClause {
            fields: vec![SelectField::expr(lit_i(7))],
            ..Default::default()
        }),
        pos: pos(),
    };
    let query = SelectQuery {
        with: Some(WithClause {
            tables: vec![inline],
            pos: pos(),
        }),
        ..SelectQuery::from_clause(SelectClause {
            fields: vec![SelectField::expr(Expression::field(None, "n"))],
            from: from_table("nums"),
            ..Default::default()
        })
    };
    let result = run_select(&executor, &ctx, &mut scope, query);
    assert_eq!(result, "n\n7\n");
}

#[test]
fn scalar_subquery_enforces_single_row_and_column() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("t.csv"), "v\n1\n2\n").expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(Some(dir.path()), Format::Csv);

    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::expr(Expression::ScalarSubquery {
            query: Box::new(SelectQuery::from_clause(SelectClause {
                fields: vec![SelectField::expr(Expression::field(None, "v"))],
                from: from_table("t"),
                ..Default::default()
            })),
            pos: pos(),
        })],
        ..Default::default()
    });
    let err = executor
        .execute(&ctx, &mut scope, &[Statement::Select(query)])
        .expect_err("two-row scalar subquery must fail");
    assert!(matches!(err, Error::SubqueryTooMany { .. }));
}

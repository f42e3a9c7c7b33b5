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

//! Transaction tests: commit, rollback, restore copies, temporary tables,
//! and lock behavior

use std::sync::Arc;
use std::time::Duration;

use flatbase::core::{ComparisonOp, Error, SourcePosition, Value};
use flatbase::executor::context::ExecutionContext;
use flatbase::executor::scope::ReferenceScope;
use flatbase::executor::Executor;
use flatbase::parser::ast::*;
use flatbase::storage::file_lock::FileLock;
use flatbase::storage::{Flags, Format, Transaction};
use tempfile::tempdir;

fn pos() -> SourcePosition {
    SourcePosition::default()
}

fn session(dir: &std::path::Path) -> (Arc<Transaction>, Executor, ReferenceScope, ExecutionContext) {
    let mut flags = Flags::default();
    flags
        .set_repository(dir.to_str().expect("utf-8 path"))
        .expect("repository should exist");
    flags.export_options.format = Format::Csv;
    let tx = Arc::new(Transaction::new(flags));
    let executor = Executor::new(Arc::clone(&tx));
    let scope = ReferenceScope::new(Arc::clone(&tx));
    (tx, executor, scope, ExecutionContext::background())
}

fn update_users_stmt(name: &str, id: i64) -> Statement {
    Statement::Update(UpdateQuery {
        with: None,
        table: TableReference::table("users"),
        set_list: vec![UpdateAssignment {
            field: FieldReference::new(None, "name"),
            value: Expression::literal(Value::string(name)),
        }],
        from: None,
        where_clause: Some(Expression::Comparison {
            left: Box::new(Expression::field(None, "id")),
            op: ComparisonOp::Equal,
            right: Box::new(Expression::literal(Value::Integer(id))),
            pos: pos(),
        }),
        pos: pos(),
    })
}

fn select_all_stmt(table: &str) -> Statement {
    Statement::Select(SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::Wildcard { pos: pos() }],
        from: Some(FromClause {
            tables: vec![TableReference::table(table)],
            pos: pos(),
        }),
        ..Default::default()
    }))
}

#[test]
fn update_then_rollback_leaves_file_unchanged() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("users.csv");
    let original = "id,name\n1,Alice\n2,Bob\n";
    std::fs::write(&path, original).expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(dir.path());

    executor
        .execute(
            &ctx,
            &mut scope,
            &[update_users_stmt("Carol", 1), Statement::Rollback { pos: pos() }],
        )
        .expect("update and rollback should succeed");

    let after = std::fs::read_to_string(&path).expect("read back");
    assert_eq!(after, original, "rollback must leave the bytes unchanged");
}

#[test]
fn update_then_commit_rewrites_the_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("users.csv");
    std::fs::write(&path, "id,name\n1,Alice\n2,Bob\n").expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(dir.path());

    executor
        .execute(
            &ctx,
            &mut scope,
            &[update_users_stmt("Carol", 1), Statement::Commit { pos: pos() }],
        )
        .expect("update and commit should succeed");

    let after = std::fs::read_to_string(&path).expect("read back");
    assert_eq!(after, "id,name\n1,Carol\n2,Bob\n");
    assert!(
        !dir.path().join("users.csv.bk").exists(),
        "a committed statement must leave no restore copy behind"
    );
}

#[test]
fn commit_preserves_the_original_line_break_style() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("users.csv");
    std::fs::write(&path, "id,name\r\n1,Alice\r\n2,Bob\r\n").expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(dir.path());

    executor
        .execute(
            &ctx,
            &mut scope,
            &[update_users_stmt("Carol", 1), Statement::Commit { pos: pos() }],
        )
        .expect("update and commit should succeed");

    let after = std::fs::read_to_string(&path).expect("read back");
    assert_eq!(after, "id,name\r\n1,Carol\r\n2,Bob\r\n");
}

#[test]
fn insert_is_visible_before_commit_and_discarded_on_rollback() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("users.csv");
    std::fs::write(&path, "id,name\n1,Alice\n").expect("write fixture");
    let (tx, executor, mut scope, ctx) = session(dir.path());

    let insert = Statement::Insert(InsertQuery {
        with: None,
        table: "users".to_string(),
        fields: None,
        source: InsertSource::Values(vec![RowValue {
            values: vec![
                Expression::literal(Value::Integer(2)),
                Expression::literal(Value::string("Bob")),
            ],
            pos: pos(),
        }]),
        pos: pos(),
    });
    executor
        .execute(&ctx, &mut scope, &[insert, select_all_stmt("users")])
        .expect("insert should succeed");

    let results = tx.take_results();
    assert_eq!(results[0], "id,name\n1,Alice\n2,Bob\n");
    assert!(tx.is_in_transaction(), "DML must auto-begin a transaction");

    executor
        .execute(&ctx, &mut scope, &[Statement::Rollback { pos: pos() }])
        .expect("rollback should succeed");
    executor
        .execute(&ctx, &mut scope, &[select_all_stmt("users")])
        .expect("select after rollback");
    let results = tx.take_results();
    assert_eq!(results[0], "id,name\n1,Alice\n", "rollback must discard the insert");
}

#[test]
fn delete_removes_matching_records() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("users.csv");
    std::fs::write(&path, "id,name\n1,Alice\n2,Bob\n3,Eve\n").expect("write fixture");
    let (_tx, executor, mut scope, ctx) = session(dir.path());

    let delete = Statement::Delete(DeleteQuery {
        with: None,
        table: None,
        from: FromClause {
            tables: vec![TableReference::table("users")],
            pos: pos(),
        },
        where_clause: Some(Expression::Comparison {
            left: Box::new(Expression::field(None, "id")),
            op: ComparisonOp::Greater,
            right: Box::new(Expression::literal(Value::Integer(1))),
            pos: pos(),
        }),
        pos: pos(),
    });
    executor
        .execute(&ctx, &mut scope, &[delete, Statement::Commit { pos: pos() }])
        .expect("delete and commit should succeed");

    let after = std::fs::read_to_string(&path).expect("read back");
    assert_eq!(after, "id,name\n1,Alice\n");
}

#[test]
fn create_table_commits_to_disk_and_rollback_removes_it() {
    let dir = tempdir().expect("tempdir");
    let (_tx, executor, mut scope, ctx) = session(dir.path());

    let create = |name: &str| Statement::CreateTable {
        path: name.to_string(),
        columns: vec!["id".to_string(), "label".to_string()],
        query: None,
        pos: pos(),
    };

    executor
        .execute(
            &ctx,
            &mut scope,
            &[create("fresh.csv"), Statement::Rollback { pos: pos() }],
        )
        .expect("create and rollback should succeed");
    assert!(
        !dir.path().join("fresh.csv").exists(),
        "rollback must delete the created file"
    );

    executor
        .execute(
            &ctx,
            &mut scope,
            &[create("kept.csv"), Statement::Commit { pos: pos() }],
        )
        .expect("create and commit should succeed");
    let after = std::fs::read_to_string(dir.path().join("kept.csv")).expect("read back");
    assert_eq!(after, "id,label\n");
}

#[test]
fn temporary_table_rollback_restores_the_snapshot() {
    let dir = tempdir().expect("tempdir");
    let (tx, executor, mut scope, ctx) = session(dir.path());

    let declare = Statement::TableDeclaration {
        name: "work".to_string(),
        columns: Some(vec!["v".to_string()]),
        query: Some(SelectQuery::from_clause(SelectClause {
            fields: vec![SelectField::expr(Expression::literal(Value::Integer(1)))],
            ..Default::default()
        })),
        pos: pos(),
    };
    let insert = Statement::Insert(InsertQuery {
        with: None,
        table: "work".to_string(),
        fields: None,
        source: InsertSource::Values(vec![RowValue {
            values: vec![Expression::literal(Value::Integer(2))],
            pos: pos(),
        }]),
        pos: pos(),
    });

    executor
        .execute(&ctx, &mut scope, &[declare, insert, select_all_stmt("work")])
        .expect("declare and insert should succeed");
    assert_eq!(tx.take_results()[0], "v\n1\n2\n");

    executor
        .execute(
            &ctx,
            &mut scope,
            &[Statement::Rollback { pos: pos() }, select_all_stmt("work")],
        )
        .expect("rollback should succeed");
    assert_eq!(
        tx.take_results()[0],
        "v\n1\n",
        "rollback must restore the declared content"
    );
}

#[test]
fn inline_table_rejects_dml() {
    let dir = tempdir().expect("tempdir");
    let (_tx, executor, mut scope, ctx) = session(dir.path());

    let insert = Statement::Insert(InsertQuery {
        with: Some(WithClause {
            tables: vec![InlineTableDef {
                name: "cte".to_string(),
                columns: Some(vec!["v".to_string()]),
                recursive: false,
                query: SelectQuery::from_clause(SelectClause {
                    fields: vec![SelectField::expr(Expression::literal(Value::Integer(1)))],
                    ..Default::default()
                }),
                pos: pos(),
            }],
            pos: pos(),
        }),
        table: "cte".to_string(),
        fields: None,
        source: InsertSource::Values(vec![RowValue {
            values: vec![Expression::literal(Value::Integer(2))],
            pos: pos(),
        }]),
        pos: pos(),
    });
    let err = executor
        .execute(&ctx, &mut scope, &[insert])
        .expect_err("inserting into a WITH table must fail");
    assert!(matches!(err, Error::UpdateOnInlineTable { .. }));
}

#[test]
fn error_in_batch_triggers_automatic_rollback() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("users.csv");
    let original = "id,name\n1,Alice\n";
    std::fs::write(&path, original).expect("write fixture");
    let (tx, executor, mut scope, ctx) = session(dir.path());

    let bad_select = Statement::Select(SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::expr(Expression::field(None, "no_such_column"))],
        from: Some(FromClause {
            tables: vec![TableReference::table("users")],
            pos: pos(),
        }),
        ..Default::default()
    }));
    let err = executor
        .execute(&ctx, &mut scope, &[update_users_stmt("Mallory", 1), bad_select])
        .expect_err("the batch must fail");
    assert!(matches!(err, Error::FieldNotFound { .. }));
    assert!(!tx.is_in_transaction(), "the transaction must be rolled back");

    executor
        .execute(&ctx, &mut scope, &[select_all_stmt("users")])
        .expect("select after rollback");
    assert_eq!(
        tx.take_results()[0],
        original,
        "the mutation must not survive the failed batch"
    );
}

#[test]
fn conflicting_exclusive_lock_times_out_with_lock_wait() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("t.csv");
    std::fs::write(&path, "a\n1\n").expect("write fixture");
    let ctx = ExecutionContext::background();

    let mut holder =
        FileLock::open_shared(&ctx, &path, Duration::from_secs(1)).expect("first shared lock");
    holder
        .upgrade_exclusive(&ctx, Duration::from_secs(1))
        .expect("first caller wins the upgrade");

    let err = FileLock::open_shared(&ctx, &path, Duration::from_millis(80))
        .expect_err("second caller must time out");
    assert!(matches!(err, Error::LockWait { .. }));
}

#[test]
fn stdin_table_materializes_from_provided_bytes() {
    let dir = tempdir().expect("tempdir");
    let (tx, executor, mut scope, ctx) = session(dir.path());
    tx.set_stdin(b"v\n10\n".to_vec());

    let query = SelectQuery::from_clause(SelectClause {
        fields: vec![SelectField::Wildcard { pos: pos() }],
        from: Some(FromClause {
            tables: vec![TableReference::Object {
                object: TableObject::Stdin,
                alias: None,
                pos: pos(),
            }],
            pos: pos(),
        }),
        ..Default::default()
    });
    executor
        .execute(&ctx, &mut scope, &[Statement::Select(query)])
        .expect("select from stdin");
    assert_eq!(tx.take_results()[0], "v\n10\n");
}

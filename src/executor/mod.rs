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

//! Statement execution
//!
//! Walks a program of statements against a [`scope::ReferenceScope`],
//! threading a [`Flow`] signal through nested control structures. DML
//! auto-begins a transaction; an error during execution rolls it back
//! unless the error explicitly keeps the transaction alive (lock waits).

pub mod aggregation;
pub mod context;
pub mod cursor;
pub mod encoder;
pub mod evaluator;
pub mod function;
pub mod join;
pub mod scope;
pub mod set_ops;
pub mod view;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::core::{to_integer, to_text, Error, Result, SourcePosition, Value};
use crate::parser::ast::{
    DeleteQuery, Expression, FetchPosition, InsertQuery, InsertSource, Statement, TableObject,
    TableReference, UpdateQuery,
};
use crate::storage::transaction::Transaction;

use context::ExecutionContext;
use cursor::{Cursor, FetchTarget};
use encoder::Palette;
use function::UserDefinedFunction;
use scope::{PlaceholderBindings, ReferenceScope};
use view::View;

/// Signal unwinding nested control structures
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    /// CONTINUE: next loop iteration
    Continue,
    /// BREAK: leave the enclosing loop
    Break,
    /// EXIT with a process code
    Exit(i64),
    /// RETURN from a user-defined function
    Return(Value),
}

impl Flow {
    fn interrupts(&self) -> bool {
        !matches!(self, Flow::Normal)
    }
}

/// Session-level driver wrapping [`execute_statements`] with the
/// transactional error policy
pub struct Executor {
    pub tx: Arc<Transaction>,
}

impl Executor {
    pub fn new(tx: Arc<Transaction>) -> Executor {
        Executor { tx }
    }

    /// Execute a batch. An error while a transaction holds uncommitted
    /// changes triggers automatic rollback; lock waits leave the
    /// transaction intact for a retry.
    pub fn execute(
        &self,
        ctx: &ExecutionContext,
        scope: &mut ReferenceScope,
        statements: &[Statement],
    ) -> Result<Flow> {
        match execute_statements(ctx, scope, statements) {
            Ok(flow) => Ok(flow),
            Err(e) => {
                if self.tx.is_in_transaction() && !e.keeps_transaction() {
                    let messages = self.tx.rollback(Some(scope));
                    self.tx.push_messages(messages);
                }
                Err(e)
            }
        }
    }
}

/// Execute statements in order until one interrupts the flow
pub fn execute_statements(
    ctx: &ExecutionContext,
    scope: &mut ReferenceScope,
    statements: &[Statement],
) -> Result<Flow> {
    for statement in statements {
        ctx.check()?;
        let flow = execute_statement(ctx, scope, statement)?;
        if flow.interrupts() {
            return Ok(flow);
        }
    }
    Ok(Flow::Normal)
}

fn execute_statement(
    ctx: &ExecutionContext,
    scope: &mut ReferenceScope,
    statement: &Statement,
) -> Result<Flow> {
    match statement {
        Statement::Select(query) => {
            let view = View::select_query(ctx, scope, query)?;
            let (options, color) = scope
                .tx
                .with_flags(|f| (f.export_options.clone(), f.export_options.color));
            let palette = Palette::new(color);
            match encoder::encode_view(ctx, &view, &options, &palette) {
                Ok(text) => scope.tx.push_result(text),
                Err(Error::EmptyResultSet) => {
                    scope.tx.push_message("Empty RecordSet".to_string());
                }
                Err(Error::DataEmpty) => {
                    scope.tx.push_message("Empty Fields".to_string());
                }
                Err(e) => return Err(e),
            }
            Ok(Flow::Normal)
        }

        // ====================================================================
        // Variables
        // ====================================================================
        Statement::VariableDeclaration { assignments, pos } => {
            for assignment in assignments {
                let value = match &assignment.value {
                    Some(expr) => evaluator::evaluate(ctx, scope, expr)?,
                    None => Value::Null,
                };
                scope.declare_variable(&assignment.name, value, *pos)?;
            }
            Ok(Flow::Normal)
        }
        Statement::VariableSubstitution { name, value, pos } => {
            let value = evaluator::evaluate(ctx, scope, value)?;
            scope.substitute_variable(name, value, *pos)?;
            Ok(Flow::Normal)
        }
        Statement::DisposeVariable { name, pos } => {
            scope.dispose_variable(name, *pos)?;
            Ok(Flow::Normal)
        }

        // ====================================================================
        // Cursors
        // ====================================================================
        Statement::CursorDeclaration { name, query, pos } => {
            scope.declare_cursor(name, Cursor::declared(query.clone()), *pos)?;
            Ok(Flow::Normal)
        }
        Statement::OpenCursor { name, pos } => {
            let declared = scope.cursor_query(name, *pos)?;
            if declared.is_pseudo() {
                return Err(Error::PseudoCursor {
                    pos: *pos,
                    name: name.clone(),
                });
            }
            if declared.is_open() {
                return Err(Error::CursorOpen {
                    pos: *pos,
                    name: name.clone(),
                });
            }
            let query = declared
                .query()
                .cloned()
                .ok_or_else(|| Error::system("declared cursor has no query"))?;
            // Materialize outside the scope lock: OPEN fixes the row count
            let view = View::select_query(ctx, scope, &query)?;
            scope.with_cursor(name, *pos, |c| c.open(Arc::new(view), name, *pos))?;
            Ok(Flow::Normal)
        }
        Statement::CloseCursor { name, pos } => {
            scope.with_cursor(name, *pos, |c| c.close(name, *pos))?;
            Ok(Flow::Normal)
        }
        Statement::DisposeCursor { name, pos } => {
            scope.dispose_cursor(name, *pos)?;
            Ok(Flow::Normal)
        }
        Statement::FetchCursor {
            name,
            position,
            variables,
            pos,
        } => {
            let target = resolve_fetch_target(ctx, scope, position, *pos)?;
            let row = scope.with_cursor(name, *pos, |c| c.fetch(target, name, *pos))?;
            match row {
                Some(values) => {
                    if values.len() != variables.len() {
                        return Err(Error::FieldLengthMismatch {
                            pos: *pos,
                            expected: variables.len(),
                            got: values.len(),
                        });
                    }
                    for (variable, value) in variables.iter().zip(values) {
                        scope.substitute_variable(variable, value, *pos)?;
                    }
                }
                None => {
                    // NOT FOUND: every target variable becomes Null
                    for variable in variables {
                        scope.substitute_variable(variable, Value::Null, *pos)?;
                    }
                }
            }
            Ok(Flow::Normal)
        }

        // ====================================================================
        // Temporary tables and functions
        // ====================================================================
        Statement::TableDeclaration {
            name,
            columns,
            query,
            pos,
        } => {
            let mut view = match query {
                Some(q) => View::select_query(ctx, scope, q)?,
                None => {
                    let columns = columns.clone().unwrap_or_default();
                    View::from_rows(None, &columns.iter().map(String::as_str).collect::<Vec<_>>(), vec![])
                }
            };
            if let (Some(columns), Some(_)) = (columns, query) {
                if columns.len() != view.field_len() {
                    return Err(Error::FieldLengthMismatch {
                        pos: *pos,
                        expected: view.field_len(),
                        got: columns.len(),
                    });
                }
                for (i, column) in columns.iter().enumerate() {
                    view.header.get_mut(i).column = column.clone();
                }
            }
            let info = crate::storage::file_info::FileInfo::for_temporary(name);
            view.file_info = Some(Arc::new(parking_lot::Mutex::new(info)));
            // The initial content is the first restore point
            view.create_restore_point();
            scope.declare_temporary_table(view, *pos)?;
            Ok(Flow::Normal)
        }
        Statement::DisposeTable { name, pos } => {
            scope.dispose_temporary_table(name, *pos)?;
            Ok(Flow::Normal)
        }
        Statement::FunctionDeclaration {
            name,
            parameters,
            is_aggregate,
            cursor_name,
            body,
            pos,
        } => {
            scope.declare_function(
                UserDefinedFunction {
                    name: name.clone(),
                    parameters: parameters.clone(),
                    is_aggregate: *is_aggregate,
                    cursor_name: cursor_name.clone(),
                    body: body.clone(),
                    pos: *pos,
                },
                *pos,
            )?;
            Ok(Flow::Normal)
        }
        Statement::DisposeFunction { name, pos } => {
            scope.dispose_function(name, *pos)?;
            Ok(Flow::Normal)
        }

        // ====================================================================
        // DDL and DML
        // ====================================================================
        Statement::CreateTable {
            path,
            columns,
            query,
            pos,
        } => {
            let view = match query {
                Some(q) => {
                    let mut v = View::select_query(ctx, scope, q)?;
                    if !columns.is_empty() {
                        if columns.len() != v.field_len() {
                            return Err(Error::FieldLengthMismatch {
                                pos: *pos,
                                expected: v.field_len(),
                                got: columns.len(),
                            });
                        }
                        for (i, column) in columns.iter().enumerate() {
                            v.header.get_mut(i).column = column.clone();
                        }
                    }
                    v
                }
                None => View::from_rows(
                    None,
                    &columns.iter().map(String::as_str).collect::<Vec<_>>(),
                    vec![],
                ),
            };
            let created = scope.tx.create_table_file(ctx, path, view, *pos)?;
            scope
                .tx
                .push_message(format!("file '{}' is created.", created));
            Ok(Flow::Normal)
        }
        Statement::Insert(query) => execute_insert(ctx, scope, query),
        Statement::Update(query) => execute_update(ctx, scope, query),
        Statement::Delete(query) => execute_delete(ctx, scope, query),

        // ====================================================================
        // Control flow
        // ====================================================================
        Statement::If {
            condition,
            then,
            elseifs,
            else_block,
            pos: _,
        } => {
            if evaluator::filter(ctx, scope, condition)?.is_true() {
                return execute_block(ctx, scope, then);
            }
            for elseif in elseifs {
                if evaluator::filter(ctx, scope, &elseif.condition)?.is_true() {
                    return execute_block(ctx, scope, &elseif.block);
                }
            }
            match else_block {
                Some(block) => execute_block(ctx, scope, block),
                None => Ok(Flow::Normal),
            }
        }
        Statement::Case {
            subject,
            whens,
            else_block,
            pos: _,
        } => {
            let subject_value = match subject {
                Some(expr) => Some(evaluator::evaluate(ctx, scope, expr)?),
                None => None,
            };
            for when in whens {
                let hit = match &subject_value {
                    Some(s) => {
                        let w = evaluator::evaluate(ctx, scope, &when.condition)?;
                        crate::core::equal(s, &w, &scope.tx.time_context()).is_true()
                    }
                    None => evaluator::filter(ctx, scope, &when.condition)?.is_true(),
                };
                if hit {
                    return execute_block(ctx, scope, &when.block);
                }
            }
            match else_block {
                Some(block) => execute_block(ctx, scope, block),
                None => Ok(Flow::Normal),
            }
        }
        Statement::While {
            condition,
            body,
            pos: _,
        } => {
            loop {
                ctx.check()?;
                if !evaluator::filter(ctx, scope, condition)?.is_true() {
                    return Ok(Flow::Normal);
                }
                match execute_block(ctx, scope, body)? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Continue | Flow::Normal => {}
                    other => return Ok(other),
                }
            }
        }
        Statement::WhileInCursor {
            variables,
            cursor,
            body,
            pos,
        } => {
            loop {
                ctx.check()?;
                let row = scope.with_cursor(cursor, *pos, |c| {
                    c.fetch(FetchTarget::Next, cursor, *pos)
                })?;
                let Some(values) = row else {
                    return Ok(Flow::Normal);
                };
                if values.len() != variables.len() {
                    return Err(Error::FieldLengthMismatch {
                        pos: *pos,
                        expected: variables.len(),
                        got: values.len(),
                    });
                }
                let mut child = scope.create_child();
                for (variable, value) in variables.iter().zip(values) {
                    child.declare_variable(variable, value, *pos)?;
                }
                let flow = execute_statements(ctx, &mut child, body);
                child.close_current_block();
                match flow? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Continue | Flow::Normal => {}
                    other => return Ok(other),
                }
            }
        }
        Statement::Continue { .. } => Ok(Flow::Continue),
        Statement::Break { .. } => Ok(Flow::Break),
        Statement::Exit { code, .. } => {
            let code = match code {
                Some(expr) => {
                    let v = evaluator::evaluate(ctx, scope, expr)?;
                    to_integer(&v).unwrap_or(0)
                }
                None => 0,
            };
            Ok(Flow::Exit(code))
        }
        Statement::Return { value, .. } => {
            let value = match value {
                Some(expr) => evaluator::evaluate(ctx, scope, expr)?,
                None => Value::Null,
            };
            Ok(Flow::Return(value))
        }

        // ====================================================================
        // Transactions
        // ====================================================================
        Statement::Commit { .. } => {
            let messages = scope.tx.commit(ctx, scope)?;
            scope.tx.push_messages(messages);
            Ok(Flow::Normal)
        }
        Statement::Rollback { .. } => {
            let messages = scope.tx.rollback(Some(scope));
            scope.tx.push_messages(messages);
            Ok(Flow::Normal)
        }

        // ====================================================================
        // Prepared statements
        // ====================================================================
        Statement::Prepare {
            name,
            statement,
            pos,
        } => {
            let statements = scope.tx.parse_source(statement, *pos)?;
            scope.tx.store_prepared(name, statements, *pos)?;
            Ok(Flow::Normal)
        }
        Statement::ExecutePrepared {
            name,
            values,
            named_values,
            pos,
        } => {
            let statements = scope.tx.get_prepared(name, *pos)?;
            let bindings = bind_placeholders(ctx, scope, values, named_values)?;
            let mut exec_scope = scope.clone();
            exec_scope.placeholders = Some(Arc::new(bindings));
            execute_statements(ctx, &mut exec_scope, &statements)
        }
        Statement::DisposePrepared { name, pos } => {
            scope.tx.dispose_prepared(name, *pos)?;
            Ok(Flow::Normal)
        }
        Statement::ExecuteImmediate {
            source,
            values,
            pos,
        } => {
            let v = evaluator::evaluate(ctx, scope, source)?;
            let Some(source_text) = to_text(&v) else {
                return Err(Error::type_mismatch(
                    *pos,
                    "EXECUTE takes a statement string".to_string(),
                ));
            };
            let statements = scope.tx.parse_source(&source_text, *pos)?;
            let bindings = bind_placeholders(ctx, scope, values, &[])?;
            // Inherits the current scope
            let mut exec_scope = scope.clone();
            exec_scope.placeholders = Some(Arc::new(bindings));
            execute_statements(ctx, &mut exec_scope, &statements)
        }
    }
}

/// Run a block in a fresh child scope
fn execute_block(
    ctx: &ExecutionContext,
    scope: &mut ReferenceScope,
    statements: &[Statement],
) -> Result<Flow> {
    let mut child = scope.create_child();
    let flow = execute_statements(ctx, &mut child, statements);
    child.close_current_block();
    flow
}

fn resolve_fetch_target(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    position: &FetchPosition,
    pos: SourcePosition,
) -> Result<FetchTarget> {
    Ok(match position {
        FetchPosition::Next => FetchTarget::Next,
        FetchPosition::Prior => FetchTarget::Prior,
        FetchPosition::First => FetchTarget::First,
        FetchPosition::Last => FetchTarget::Last,
        FetchPosition::Absolute(expr) => {
            FetchTarget::Absolute(fetch_number(ctx, scope, expr, pos)?)
        }
        FetchPosition::Relative(expr) => {
            FetchTarget::Relative(fetch_number(ctx, scope, expr, pos)?)
        }
    })
}

fn fetch_number(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    expr: &Expression,
    pos: SourcePosition,
) -> Result<i64> {
    let v = evaluator::evaluate(ctx, scope, expr)?;
    to_integer(&v)
        .ok_or_else(|| Error::type_mismatch(pos, "fetch position takes an integer".to_string()))
}

fn bind_placeholders(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    values: &[Expression],
    named_values: &[(String, Expression)],
) -> Result<PlaceholderBindings> {
    let mut positional = Vec::with_capacity(values.len());
    for expr in values {
        positional.push(evaluator::evaluate(ctx, scope, expr)?);
    }
    let mut named = FxHashMap::default();
    for (name, expr) in named_values {
        named.insert(name.to_uppercase(), evaluator::evaluate(ctx, scope, expr)?);
    }
    Ok(PlaceholderBindings { positional, named })
}

// ============================================================================
// DML
// ============================================================================

/// Where a mutated view writes back to
enum DmlTarget {
    Temporary,
    File,
}

struct DmlSubject {
    base: View,
    target: DmlTarget,
    label: String,
}

/// Resolve a DML table name: inline tables are rejected, temporary tables
/// win over files
fn resolve_dml_subject(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    name: &str,
    pos: SourcePosition,
) -> Result<DmlSubject> {
    if scope.inline_table_exists(name)
        || scope
            .recursive
            .as_ref()
            .is_some_and(|r| r.name.eq_ignore_ascii_case(name))
    {
        return Err(Error::UpdateOnInlineTable {
            pos,
            table: name.to_string(),
        });
    }
    if scope.temporary_table_exists(name) {
        let base = scope.get_temporary_table(name, pos)?;
        return Ok(DmlSubject {
            base,
            target: DmlTarget::Temporary,
            label: name.to_string(),
        });
    }
    let (base, path) = scope.tx.load_table_view(ctx, scope, name, pos)?;
    Ok(DmlSubject {
        base,
        target: DmlTarget::File,
        label: path,
    })
}

fn write_back(scope: &ReferenceScope, subject: &DmlSubject, view: View) {
    match subject.target {
        DmlTarget::Temporary => scope.replace_temporary_table(view),
        DmlTarget::File => scope.tx.replace_cached_view(view),
    }
}

fn execute_insert(
    ctx: &ExecutionContext,
    scope: &mut ReferenceScope,
    query: &InsertQuery,
) -> Result<Flow> {
    let mut node_scope = scope.create_node();
    if let Some(with) = &query.with {
        view::load_inline_tables(ctx, &node_scope, with)?;
    }

    let subject = resolve_dml_subject(ctx, &node_scope, &query.table, query.pos)?;
    let mut target_view = subject.base.clone();

    let field_indices: Vec<usize> = match &query.fields {
        Some(fields) => {
            let mut indices = Vec::with_capacity(fields.len());
            for fr in fields {
                indices.push(target_view.header.search(
                    fr.view.as_deref(),
                    &fr.column,
                    fr.pos,
                )?);
            }
            indices
        }
        None => (0..target_view.field_len()).collect(),
    };

    let rows: Vec<Vec<Value>> = match &query.source {
        InsertSource::Values(row_values) => {
            let mut rows = Vec::with_capacity(row_values.len());
            for rv in row_values {
                let mut row = Vec::with_capacity(rv.values.len());
                for expr in &rv.values {
                    row.push(evaluator::evaluate(ctx, &node_scope, expr)?);
                }
                rows.push(row);
            }
            rows
        }
        InsertSource::Query(select) => {
            let source = View::select_query(ctx, &node_scope, select)?;
            if source.field_len() != field_indices.len() {
                return Err(Error::FieldLengthMismatch {
                    pos: query.pos,
                    expected: field_indices.len(),
                    got: source.field_len(),
                });
            }
            source
                .record_set
                .iter()
                .map(|r| r.cells().iter().map(|c| c.value().clone()).collect())
                .collect()
        }
    };

    node_scope.tx.ensure_writable(ctx, &target_view)?;
    let count = target_view.insert_rows(&field_indices, rows, query.pos)?;
    write_back(&node_scope, &subject, target_view);
    node_scope.close_current_node();

    scope
        .tx
        .push_message(format!("{} record(s) inserted on '{}'.", count, subject.label));
    Ok(Flow::Normal)
}

fn execute_update(
    ctx: &ExecutionContext,
    scope: &mut ReferenceScope,
    query: &UpdateQuery,
) -> Result<Flow> {
    let mut node_scope = scope.create_node();
    if let Some(with) = &query.with {
        view::load_inline_tables(ctx, &node_scope, with)?;
    }

    let (table_name, alias, pos) = match &query.table {
        TableReference::Object {
            object: TableObject::Identifier(name),
            alias,
            pos,
        } => (name.clone(), alias.clone(), *pos),
        other => {
            return Err(Error::syntax(
                other.position(),
                "update target must be a table".to_string(),
            ))
        }
    };

    let subject = resolve_dml_subject(ctx, &node_scope, &table_name, pos)?;
    let alias = alias.unwrap_or_else(|| stem_of(&subject.label));

    let mut working = subject.base.with_internal_ids();
    working.set_alias(&alias);
    let working_header = working.header.clone();

    let mut combined = working;
    if let Some(from) = &query.from {
        for table in &from.tables {
            let right = View::load_table(ctx, &node_scope, table)?;
            combined = join::cross_join(ctx, combined, right)?;
        }
    }
    if let Some(condition) = &query.where_clause {
        combined.filter(ctx, &node_scope, condition)?;
    }

    let id_index = combined
        .header
        .internal_id_index()
        .ok_or_else(|| Error::system("update view lost its internal ids"))?;

    // Evaluate every assignment per matching record
    let combined = Arc::new(combined);
    let set_list = &query.set_list;
    let updates = view::map_records(ctx, &node_scope, Arc::clone(&combined), |frame_scope, i| {
        let record = &combined.record_set[i];
        let record_id = match record[id_index].value() {
            Value::Integer(id) => *id as usize,
            _ => return Err(Error::system("update view lost its internal ids")),
        };
        let mut row_updates = Vec::with_capacity(set_list.len());
        for assignment in set_list {
            let field_idx = working_header.search(
                assignment.field.view.as_deref(),
                &assignment.field.column,
                assignment.field.pos,
            )?;
            let value = evaluator::evaluate(ctx, frame_scope, &assignment.value)?;
            // Skip the prepended id column to address the base view
            row_updates.push((record_id, field_idx - 1, value));
        }
        Ok(row_updates)
    })?;

    let mut target_view = subject.base.clone();
    node_scope.tx.ensure_writable(ctx, &target_view)?;

    let mut updated_ids = rustc_hash::FxHashSet::default();
    for row_updates in updates {
        for (record_id, field_idx, value) in row_updates {
            target_view.update_field(record_id, field_idx, value);
            updated_ids.insert(record_id);
        }
    }
    write_back(&node_scope, &subject, target_view);
    node_scope.close_current_node();

    scope.tx.push_message(format!(
        "{} record(s) updated on '{}'.",
        updated_ids.len(),
        subject.label
    ));
    Ok(Flow::Normal)
}

fn execute_delete(
    ctx: &ExecutionContext,
    scope: &mut ReferenceScope,
    query: &DeleteQuery,
) -> Result<Flow> {
    let mut node_scope = scope.create_node();
    if let Some(with) = &query.with {
        view::load_inline_tables(ctx, &node_scope, with)?;
    }

    // The target is the named table, or the single FROM table
    let (target_name, target_alias) = match &query.table {
        Some(name) => (name.clone(), name.clone()),
        None => match query.from.tables.as_slice() {
            [TableReference::Object {
                object: TableObject::Identifier(name),
                alias,
                ..
            }] => (name.clone(), alias.clone().unwrap_or_else(|| stem_of(name))),
            _ => {
                return Err(Error::syntax(
                    query.pos,
                    "DELETE requires a target table".to_string(),
                ))
            }
        },
    };

    let subject = resolve_dml_subject(ctx, &node_scope, &target_name, query.pos)?;

    let mut combined: Option<View> = None;
    for table in &query.from.tables {
        let is_target = match table {
            TableReference::Object { object: TableObject::Identifier(name), alias, .. } => {
                name.eq_ignore_ascii_case(&target_name)
                    || alias
                        .as_deref()
                        .is_some_and(|a| a.eq_ignore_ascii_case(&target_alias))
            }
            _ => false,
        };
        let loaded = if is_target {
            let mut v = subject.base.with_internal_ids();
            v.set_alias(&target_alias);
            v
        } else {
            View::load_table(ctx, &node_scope, table)?
        };
        combined = Some(match combined {
            None => loaded,
            Some(left) => join::cross_join(ctx, left, loaded)?,
        });
    }
    let mut combined = combined.ok_or_else(|| {
        Error::syntax(query.pos, "DELETE requires a FROM clause".to_string())
    })?;

    if let Some(condition) = &query.where_clause {
        combined.filter(ctx, &node_scope, condition)?;
    }

    let ids = combined.internal_ids(query.pos)?;
    let mut unique_ids: Vec<usize> = ids;
    unique_ids.sort_unstable();
    unique_ids.dedup();

    let mut target_view = subject.base.clone();
    node_scope.tx.ensure_writable(ctx, &target_view)?;
    let count = target_view.delete_rows(&unique_ids);
    write_back(&node_scope, &subject, target_view);
    node_scope.close_current_node();

    scope
        .tx
        .push_message(format!("{} record(s) deleted on '{}'.", count, subject.label));
    Ok(Flow::Normal)
}

fn stem_of(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

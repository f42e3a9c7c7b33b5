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

//! Views
//!
//! A [`View`] is an in-memory table: header plus ordered records, with the
//! filter/group/sort state the select pipeline threads through it. Views
//! loaded from a file share a `FileInfo` handle with the transaction;
//! derived views carry none.
//!
//! The select pipeline applies, in order: FROM (load and join), WHERE,
//! GROUP BY, HAVING, the select list (projection and aggregate
//! resolution), DISTINCT, ORDER BY (stable, with null positions), and
//! OFFSET/LIMIT with PERCENT and WITH TIES.

use std::cmp::Ordering;
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::core::{
    comparison_key, identical, order, Cell, Error, Header, HeaderField, Record, RecordSet, Result,
    SourcePosition, Value, INTERNAL_ID_COLUMN,
};
use crate::parser::ast::{
    Expression, FromClause, LimitClause, NullPosition, OffsetClause, OrderByClause, SelectClause,
    SelectEntity, SelectField, SelectQuery, SortDirection, TableObject, TableReference, WithClause,
};
use crate::storage::codec::DecodedTable;
use crate::storage::file_info::FileInfoHandle;

use super::aggregation;
use super::context::ExecutionContext;
use super::evaluator;
use super::join;
use super::scope::{RecursiveState, ReferenceScope};
use super::set_ops;

/// Fewest records one worker is worth spinning up for
const MIN_RECORDS_PER_WORKER: usize = 80;

/// In-memory table backing every table reference
#[derive(Debug, Clone, Default)]
pub struct View {
    pub header: Header,
    pub record_set: RecordSet,
    pub file_info: Option<FileInfoHandle>,

    /// Projected field indices accumulated by the select phase
    pub(crate) select_fields: Vec<usize>,
    pub(crate) is_grouped: bool,
    /// Partition size per record while grouped
    pub(crate) group_sizes: Option<Vec<usize>>,
    /// Materialized ORDER BY keys, kept for WITH TIES
    pub(crate) sort_keys: Option<Vec<Vec<Value>>>,
    /// Sort directions matching `sort_keys`
    pub(crate) sort_directions: Option<Vec<SortDirection>>,
}

impl View {
    /// The one-record, zero-field pseudo table backing FROM-less selects
    pub fn dual() -> View {
        View {
            record_set: vec![Record::new(Vec::new())],
            ..View::default()
        }
    }

    /// Build a view from decoded file content
    pub fn from_decoded(table: DecodedTable, file_info: Option<FileInfoHandle>) -> View {
        let header = Header::from_columns(None, &table.columns);
        let record_set = table
            .records
            .into_iter()
            .map(Record::from_values)
            .collect();
        View {
            header,
            record_set,
            file_info,
            ..View::default()
        }
    }

    /// Build a view from literal columns and rows (tests, pseudo tables)
    pub fn from_rows(view_name: Option<&str>, columns: &[&str], rows: Vec<Vec<Value>>) -> View {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        View {
            header: Header::from_columns(view_name, &columns),
            record_set: rows.into_iter().map(Record::from_values).collect(),
            ..View::default()
        }
    }

    pub fn record_len(&self) -> usize {
        self.record_set.len()
    }

    pub fn field_len(&self) -> usize {
        self.header.len()
    }

    pub fn is_grouped(&self) -> bool {
        self.is_grouped
    }

    /// Partition size of a grouped record; 1 for ungrouped views
    pub fn group_size(&self, record_index: usize) -> usize {
        match &self.group_sizes {
            Some(sizes) => sizes[record_index],
            None => 1,
        }
    }

    /// Assign a view alias to every table-sourced column
    pub fn set_alias(&mut self, alias: &str) {
        for i in 0..self.header.len() {
            let field = self.header.get_mut(i);
            if field.is_from_table {
                field.view = Some(alias.to_string());
            }
        }
    }

    /// Mark the owning file dirty
    pub fn mark_updated(&self) {
        if let Some(fi) = &self.file_info {
            fi.lock().is_updated = true;
        }
    }

    // ========================================================================
    // Restore points
    // ========================================================================

    pub fn create_restore_point(&mut self) {
        if let Some(fi) = &self.file_info {
            fi.lock().restore_point = Some((self.header.clone(), self.record_set.clone()));
        }
    }

    pub fn restore(&mut self) {
        if let Some(fi) = &self.file_info {
            if let Some((header, records)) = fi.lock().restore_point.clone() {
                self.header = header;
                self.record_set = records;
            }
        }
    }

    // ========================================================================
    // Select pipeline
    // ========================================================================

    /// Execute a full select query in a fresh node scope
    pub fn select_query(
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        query: &SelectQuery,
    ) -> Result<View> {
        let mut scope = scope.create_node();
        if let Some(with) = &query.with {
            load_inline_tables(ctx, &scope, with)?;
        }
        let mut view = Self::select_entity(ctx, &scope, &query.entity)?;
        if let Some(order_by) = &query.order_by {
            view.order_by(ctx, &scope, order_by)?;
        }
        if let Some(offset) = &query.offset {
            view.offset_records(ctx, &scope, offset)?;
        }
        if let Some(limit) = &query.limit {
            view.limit_records(ctx, &scope, limit)?;
        }
        view.fix()?;
        scope.close_current_node();
        Ok(view)
    }

    pub(crate) fn select_entity(
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        entity: &SelectEntity,
    ) -> Result<View> {
        match entity {
            SelectEntity::Select(clause) => Self::select_clause(ctx, scope, clause),
            SelectEntity::SetOperation {
                left,
                op,
                all,
                right,
                pos,
            } => set_ops::execute(ctx, scope, left, *op, *all, right, *pos),
        }
    }

    /// FROM through DISTINCT; ORDER BY and LIMIT belong to the outer query
    pub(crate) fn select_clause(
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        clause: &SelectClause,
    ) -> Result<View> {
        let mut view = Self::load_from(ctx, scope, clause.from.as_ref())?;

        if let Some(condition) = &clause.where_clause {
            view.filter(ctx, scope, condition)?;
        }

        if let Some(exprs) = &clause.group_by {
            view.group_by(ctx, scope, exprs)?;
        } else if clause.having.is_some()
            || aggregation::fields_have_aggregate(&clause.fields, scope)
        {
            view.group_all();
        }

        if let Some(condition) = &clause.having {
            view.filter(ctx, scope, condition)?;
        }

        view.evaluate_select_fields(ctx, scope, &clause.fields)?;

        if clause.distinct {
            view.distinct(ctx)?;
        }

        Ok(view)
    }

    // ========================================================================
    // FROM resolution
    // ========================================================================

    pub(crate) fn load_from(
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        from: Option<&FromClause>,
    ) -> Result<View> {
        let Some(from) = from else {
            return Ok(View::dual());
        };
        let mut tables = from.tables.iter();
        let mut view = match tables.next() {
            Some(table) => Self::load_table(ctx, scope, table)?,
            None => return Ok(View::dual()),
        };
        for table in tables {
            let right = Self::load_table(ctx, scope, table)?;
            view = join::cross_join(ctx, view, right)?;
        }
        Ok(view)
    }

    pub(crate) fn load_table(
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        table: &TableReference,
    ) -> Result<View> {
        match table {
            TableReference::Object { object, alias, pos } => {
                let (mut view, default_alias, path) = match object {
                    TableObject::Dual => (View::dual(), "DUAL".to_string(), String::new()),
                    TableObject::Stdin => (
                        scope.tx.load_stdin(ctx, *pos)?,
                        "STDIN".to_string(),
                        String::new(),
                    ),
                    TableObject::Identifier(name) => resolve_identifier(ctx, scope, name, *pos)?,
                };
                let alias = alias.clone().unwrap_or(default_alias);
                scope.add_alias(&alias, &path, *pos)?;
                view.set_alias(&alias);
                Ok(view)
            }
            TableReference::Subquery { query, alias, pos } => {
                let mut view = Self::select_query(ctx, scope, query)?;
                if let Some(alias) = alias {
                    scope.add_alias(alias, "", *pos)?;
                    view.set_alias(alias);
                }
                Ok(view)
            }
            TableReference::Join(join_clause) => join::execute(ctx, scope, join_clause),
        }
    }

    // ========================================================================
    // WHERE / HAVING
    // ========================================================================

    pub fn filter(
        &mut self,
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        condition: &Expression,
    ) -> Result<()> {
        let view = Arc::new(std::mem::take(self));
        let keep = map_records(ctx, scope, Arc::clone(&view), |frame_scope, _| {
            evaluator::filter(ctx, frame_scope, condition).map(|t| t.is_true())
        });
        let mut view = unwrap_view(view);
        let keep = keep?;

        let mut kept = Vec::with_capacity(view.record_set.len());
        let mut kept_sizes = view.group_sizes.as_ref().map(|_| Vec::new());
        for (i, record) in view.record_set.drain(..).enumerate() {
            if keep[i] {
                kept.push(record);
                if let (Some(sizes), Some(all)) = (&mut kept_sizes, &view.group_sizes) {
                    sizes.push(all[i]);
                }
            }
        }
        view.record_set = kept;
        if let Some(sizes) = kept_sizes {
            view.group_sizes = Some(sizes);
        }
        *self = view;
        Ok(())
    }

    // ========================================================================
    // GROUP BY
    // ========================================================================

    pub fn group_by(
        &mut self,
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        exprs: &[Expression],
    ) -> Result<()> {
        // Plain field references become group keys and keep a single value
        for expr in exprs {
            if let Expression::Field(fr) = strip_parentheses(expr) {
                if let Ok(idx) = self.header.search(fr.view.as_deref(), &fr.column, fr.pos) {
                    self.header.get_mut(idx).is_group_key = true;
                }
            }
        }

        let view = Arc::new(std::mem::take(self));
        let keys = map_records(ctx, scope, Arc::clone(&view), |frame_scope, _| {
            let mut key = String::new();
            for expr in exprs {
                let v = evaluator::evaluate(ctx, frame_scope, expr)?;
                key.push_str(&comparison_key(&v));
                key.push('\u{1f}');
            }
            Ok(key)
        });
        let mut view = unwrap_view(view);
        let keys = keys?;

        let mut order_of_keys: Vec<String> = Vec::new();
        let mut partitions: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (i, key) in keys.into_iter().enumerate() {
            partitions
                .entry(key.clone())
                .or_insert_with(|| {
                    order_of_keys.push(key);
                    Vec::new()
                })
                .push(i);
        }

        let field_len = view.field_len();
        let mut records = Vec::with_capacity(order_of_keys.len());
        let mut sizes = Vec::with_capacity(order_of_keys.len());
        for key in &order_of_keys {
            let rows = &partitions[key];
            let mut cells = Vec::with_capacity(field_len);
            for fi in 0..field_len {
                if view.header.get(fi).is_group_key {
                    cells.push(Cell::new(view.record_set[rows[0]][fi].value().clone()));
                } else {
                    let values: Vec<Value> = rows
                        .iter()
                        .map(|&ri| view.record_set[ri][fi].value().clone())
                        .collect();
                    cells.push(Cell::from_values(values));
                }
            }
            records.push(Record::new(cells));
            sizes.push(rows.len());
        }

        view.record_set = records;
        view.group_sizes = Some(sizes);
        view.is_grouped = true;
        *self = view;
        Ok(())
    }

    /// Collapse the whole record set into a single partition; used when the
    /// select list aggregates without GROUP BY
    pub fn group_all(&mut self) {
        let field_len = self.field_len();
        let size = self.record_set.len();
        let mut cells = Vec::with_capacity(field_len);
        for fi in 0..field_len {
            let values: Vec<Value> = self
                .record_set
                .iter()
                .map(|r| r[fi].value().clone())
                .collect();
            cells.push(Cell::from_values(values));
        }
        self.record_set = vec![Record::new(cells)];
        self.group_sizes = Some(vec![size]);
        self.is_grouped = true;
    }

    // ========================================================================
    // Select list
    // ========================================================================

    fn evaluate_select_fields(
        &mut self,
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        fields: &[SelectField],
    ) -> Result<()> {
        let mut selected: Vec<usize> = Vec::new();
        for field in fields {
            match field {
                SelectField::Wildcard { pos } => {
                    self.expand_wildcard(None, *pos, &mut selected)?;
                }
                SelectField::ViewWildcard { view, pos } => {
                    self.expand_wildcard(Some(view), *pos, &mut selected)?;
                }
                SelectField::Expression { expr, alias } => {
                    let idx = self.evaluate_select_expression(ctx, scope, expr, alias.as_deref())?;
                    selected.push(idx);
                }
            }
        }
        self.select_fields = selected;
        Ok(())
    }

    fn expand_wildcard(
        &mut self,
        view: Option<&str>,
        pos: SourcePosition,
        selected: &mut Vec<usize>,
    ) -> Result<()> {
        let mut any = false;
        for i in 0..self.header.len() {
            let field = self.header.get(i);
            if field.column == INTERNAL_ID_COLUMN || !field.is_from_table {
                continue;
            }
            if let Some(v) = view {
                if !field
                    .view
                    .as_deref()
                    .is_some_and(|fv| fv.eq_ignore_ascii_case(v))
                {
                    continue;
                }
            }
            if self.is_grouped && !field.is_group_key {
                return Err(Error::FieldNotGroupKey {
                    pos,
                    field: field.column.clone(),
                });
            }
            selected.push(i);
            any = true;
        }
        if !any {
            if let Some(v) = view {
                return Err(Error::FieldNotFound {
                    pos,
                    field: format!("{}.*", v),
                });
            }
        }
        Ok(())
    }

    fn evaluate_select_expression(
        &mut self,
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        expr: &Expression,
        alias: Option<&str>,
    ) -> Result<usize> {
        // A bare reference to an existing column is reused, not recomputed
        if let Expression::Field(fr) = strip_parentheses(expr) {
            if let Ok(idx) = self.header.search(fr.view.as_deref(), &fr.column, fr.pos) {
                let field = self.header.get(idx);
                if self.is_grouped && field.is_from_table && !field.is_group_key {
                    return Err(Error::FieldNotGroupKey {
                        pos: fr.pos,
                        field: fr.to_string(),
                    });
                }
                match alias {
                    None => return Ok(idx),
                    Some(a) => {
                        if self.header.get(idx).alias.is_none() {
                            self.header.get_mut(idx).alias = Some(a.to_string());
                            return Ok(idx);
                        }
                    }
                }
            }
        }

        let view = Arc::new(std::mem::take(self));
        let values = map_records(ctx, scope, Arc::clone(&view), |frame_scope, _| {
            evaluator::evaluate(ctx, frame_scope, expr)
        });
        let mut view = unwrap_view(view);
        let values = values?;

        for (record, value) in view.record_set.iter_mut().zip(values) {
            record.push(Cell::new(value));
        }
        view.header.push(HeaderField {
            view: None,
            column: expr.to_string(),
            alias: alias.map(str::to_string),
            is_from_table: false,
            is_group_key: false,
            is_join_column: false,
            number: 0,
        });
        let idx = view.header.len() - 1;
        *self = view;
        Ok(idx)
    }

    // ========================================================================
    // DISTINCT
    // ========================================================================

    pub fn distinct(&mut self, ctx: &ExecutionContext) -> Result<()> {
        let indices = self.effective_select_fields();
        let mut seen: FxHashMap<String, ()> = FxHashMap::default();
        let mut kept = Vec::new();
        for (i, record) in self.record_set.drain(..).enumerate() {
            ctx.check_at(i)?;
            let key = record.serialize_key(&indices);
            if seen.insert(key, ()).is_none() {
                kept.push(record);
            }
        }
        self.record_set = kept;
        self.sort_keys = None;
        Ok(())
    }

    // ========================================================================
    // ORDER BY
    // ========================================================================

    pub fn order_by(
        &mut self,
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        clause: &OrderByClause,
    ) -> Result<()> {
        let items = &clause.items;
        let view = Arc::new(std::mem::take(self));
        let keys = map_records(ctx, scope, Arc::clone(&view), |frame_scope, _| {
            let mut key = Vec::with_capacity(items.len());
            for item in items {
                key.push(evaluator::evaluate(ctx, frame_scope, &item.expr)?);
            }
            Ok(key)
        });
        let mut view = unwrap_view(view);
        let keys = keys?;

        let time_ctx = scope.tx.time_context();
        let mut indices: Vec<usize> = (0..view.record_set.len()).collect();
        indices.sort_by(|&a, &b| {
            for (k, item) in items.iter().enumerate() {
                let ord = compare_sort_values(&keys[a][k], &keys[b][k], item, &time_ctx);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            // Stable: preserve input order among equal keys
            a.cmp(&b)
        });

        let mut records = Vec::with_capacity(view.record_set.len());
        let mut sorted_keys = Vec::with_capacity(keys.len());
        let mut sizes = view.group_sizes.as_ref().map(|_| Vec::new());
        for &i in &indices {
            records.push(view.record_set[i].clone());
            sorted_keys.push(keys[i].clone());
            if let (Some(out), Some(all)) = (&mut sizes, &view.group_sizes) {
                out.push(all[i]);
            }
        }
        view.record_set = records;
        if let Some(sizes) = sizes {
            view.group_sizes = Some(sizes);
        }
        view.sort_keys = Some(sorted_keys);
        view.sort_directions = Some(items.iter().map(|i| i.direction).collect());
        *self = view;
        Ok(())
    }

    // ========================================================================
    // OFFSET / LIMIT
    // ========================================================================

    pub fn offset_records(
        &mut self,
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        clause: &OffsetClause,
    ) -> Result<()> {
        ctx.check()?;
        let n = evaluate_row_count(ctx, scope, &clause.value, clause.pos)?;
        let n = (n.max(0) as usize).min(self.record_set.len());
        self.record_set.drain(..n);
        if let Some(keys) = &mut self.sort_keys {
            keys.drain(..n);
        }
        if let Some(sizes) = &mut self.group_sizes {
            sizes.drain(..n);
        }
        Ok(())
    }

    pub fn limit_records(
        &mut self,
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        clause: &LimitClause,
    ) -> Result<()> {
        ctx.check()?;
        let limit = if clause.percent {
            let pct = evaluator::evaluate_constant(ctx, scope, &clause.value)
                .and_then(|v| {
                    crate::core::to_float(&v).ok_or_else(|| {
                        Error::type_mismatch(clause.pos, "LIMIT PERCENT takes a number".to_string())
                    })
                })?;
            if pct < 0.0 {
                0
            } else {
                ((self.record_set.len() as f64) * pct / 100.0).ceil() as usize
            }
        } else {
            evaluate_row_count(ctx, scope, &clause.value, clause.pos)?.max(0) as usize
        };

        let mut cut = limit.min(self.record_set.len());

        // WITH TIES extends the cut while the ORDER BY key stays equal to
        // the last included row's key; ignored without ORDER BY
        if clause.with_ties && cut > 0 {
            if let Some(keys) = &self.sort_keys {
                let last = &keys[cut - 1];
                while cut < self.record_set.len() && sort_keys_equal(&keys[cut], last) {
                    cut += 1;
                }
            }
        }

        self.record_set.truncate(cut);
        if let Some(keys) = &mut self.sort_keys {
            keys.truncate(cut);
        }
        if let Some(sizes) = &mut self.group_sizes {
            sizes.truncate(cut);
        }
        Ok(())
    }

    // ========================================================================
    // Projection
    // ========================================================================

    fn effective_select_fields(&self) -> Vec<usize> {
        if !self.select_fields.is_empty() {
            return self.select_fields.clone();
        }
        (0..self.header.len())
            .filter(|&i| self.header.get(i).column != INTERNAL_ID_COLUMN)
            .collect()
    }

    /// Materialize the projection: keep the selected columns only, promote
    /// aliases to column names, and clear pipeline state.
    pub fn fix(&mut self) -> Result<()> {
        let indices = self.effective_select_fields();

        let mut header = Header::default();
        for (number, &idx) in indices.iter().enumerate() {
            let old = self.header.get(idx);
            header.push(HeaderField {
                view: None,
                column: old.output_name().to_string(),
                alias: None,
                is_from_table: true,
                is_group_key: false,
                is_join_column: false,
                number: number + 1,
            });
        }

        let mut records = Vec::with_capacity(self.record_set.len());
        for record in &self.record_set {
            let cells = indices
                .iter()
                .map(|&idx| Cell::new(record[idx].value().clone()))
                .collect();
            records.push(Record::new(cells));
        }

        self.header = header;
        self.record_set = records;
        self.file_info = None;
        self.select_fields = Vec::new();
        self.is_grouped = false;
        self.group_sizes = None;
        self.sort_keys = None;
        self.sort_directions = None;
        Ok(())
    }

    // ========================================================================
    // Structural mutation
    // ========================================================================

    /// Append rows; unspecified fields become Null. Returns the row count.
    pub fn insert_rows(
        &mut self,
        field_indices: &[usize],
        rows: Vec<Vec<Value>>,
        pos: SourcePosition,
    ) -> Result<usize> {
        let width = self.header.len();
        let mut inserted = 0usize;
        for row in rows {
            if row.len() != field_indices.len() {
                return Err(Error::FieldLengthMismatch {
                    pos,
                    expected: field_indices.len(),
                    got: row.len(),
                });
            }
            let mut cells = vec![Cell::new(Value::Null); width];
            for (value, &idx) in row.into_iter().zip(field_indices) {
                cells[idx] = Cell::new(value);
            }
            self.record_set.push(Record::new(cells));
            inserted += 1;
        }
        if inserted > 0 {
            self.mark_updated();
        }
        Ok(inserted)
    }

    /// Overwrite one field of one record
    pub fn update_field(&mut self, record_index: usize, field_index: usize, value: Value) {
        self.record_set[record_index].get_mut(field_index).set(value);
        self.mark_updated();
    }

    /// Delete records whose index is in `indices`. Returns the count.
    pub fn delete_rows(&mut self, indices: &[usize]) -> usize {
        if indices.is_empty() {
            return 0;
        }
        let to_delete: rustc_hash::FxHashSet<usize> = indices.iter().copied().collect();
        let before = self.record_set.len();
        let mut i = 0usize;
        self.record_set.retain(|_| {
            let keep = !to_delete.contains(&i);
            i += 1;
            keep
        });
        let deleted = before - self.record_set.len();
        if deleted > 0 {
            self.mark_updated();
        }
        deleted
    }

    /// Working copy with a synthetic identity column prepended, used by
    /// UPDATE/DELETE to address records of the cached base view
    pub fn with_internal_ids(&self) -> View {
        let mut header = Header::with_internal_id(None);
        for field in self.header.fields() {
            header.push(field.clone());
        }
        let mut records = Vec::with_capacity(self.record_set.len());
        for (i, record) in self.record_set.iter().enumerate() {
            let mut cells = Vec::with_capacity(record.len() + 1);
            cells.push(Cell::new(Value::Integer(i as i64)));
            cells.extend(record.cells().iter().cloned());
            records.push(Record::new(cells));
        }
        View {
            header,
            record_set: records,
            file_info: self.file_info.clone(),
            ..View::default()
        }
    }

    /// Internal ids of the surviving records, in record order
    pub fn internal_ids(&self, pos: SourcePosition) -> Result<Vec<usize>> {
        let idx = self
            .header
            .internal_id_index()
            .ok_or_else(|| Error::system("view has no internal ids"))?;
        self.record_set
            .iter()
            .map(|r| match r[idx].value() {
                Value::Integer(i) if *i >= 0 => Ok(*i as usize),
                _ => Err(Error::FieldNotFound {
                    pos,
                    field: INTERNAL_ID_COLUMN.to_string(),
                }),
            })
            .collect()
    }
}

// ============================================================================
// Record-parallel evaluation
// ============================================================================

/// Evaluate `f` once per record, fanning out across the configured worker
/// budget for large record sets. Results come back in input order.
pub(crate) fn map_records<R, F>(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    view: Arc<View>,
    f: F,
) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(&ReferenceScope, usize) -> Result<R> + Send + Sync,
{
    let n = view.record_len();
    let cpu = scope.tx.cpu();
    let workers = if cpu < 2 {
        1
    } else {
        cpu.min(n / MIN_RECORDS_PER_WORKER).max(1)
    };

    if workers <= 1 {
        let frame_scope = scope.create_scope_for_sequential_evaluation(Arc::clone(&view));
        let mut out = Vec::with_capacity(n);
        let mut i = 0usize;
        while frame_scope.next_record() {
            ctx.check_at(i)?;
            out.push(f(&frame_scope, i)?);
            i += 1;
        }
        return Ok(out);
    }

    let chunk = n.div_ceil(workers);
    let mut tasks = Vec::with_capacity(workers);
    for w in 0..workers {
        let start = w * chunk;
        let end = ((w + 1) * chunk).min(n);
        if start >= end {
            break;
        }
        let frame_scope = scope.create_scope_for_record_evaluation(Arc::clone(&view), start as i64);
        tasks.push((start, end, frame_scope));
    }

    let chunks: Vec<Result<Vec<R>>> = tasks
        .into_par_iter()
        .map(|(start, end, frame_scope)| {
            let mut out = Vec::with_capacity(end - start);
            for i in start..end {
                ctx.check_at(i)?;
                frame_scope.records[0].set_record_index(i as i64);
                out.push(f(&frame_scope, i)?);
            }
            Ok(out)
        })
        .collect();

    let mut out = Vec::with_capacity(n);
    for chunk in chunks {
        out.extend(chunk?);
    }
    Ok(out)
}

fn unwrap_view(view: Arc<View>) -> View {
    Arc::try_unwrap(view).unwrap_or_else(|arc| (*arc).clone())
}

// ============================================================================
// Helpers
// ============================================================================

pub(crate) fn strip_parentheses(expr: &Expression) -> &Expression {
    match expr {
        Expression::Parentheses(inner) => strip_parentheses(inner),
        other => other,
    }
}

pub(crate) fn load_inline_tables(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    with: &WithClause,
) -> Result<()> {
    for def in &with.tables {
        let view = if def.recursive {
            load_recursive_inline_table(ctx, scope, def)?
        } else {
            let mut v = View::select_query(ctx, scope, &def.query)?;
            rename_columns(&mut v, def)?;
            v
        };
        scope.set_inline_table(&def.name, Arc::new(view), def.pos)?;
    }
    Ok(())
}

fn rename_columns(
    view: &mut View,
    def: &crate::parser::ast::InlineTableDef,
) -> Result<()> {
    if let Some(columns) = &def.columns {
        if columns.len() != view.field_len() {
            return Err(Error::FieldLengthMismatch {
                pos: def.pos,
                expected: view.field_len(),
                got: columns.len(),
            });
        }
        for (i, name) in columns.iter().enumerate() {
            view.header.get_mut(i).column = name.clone();
        }
    }
    Ok(())
}

/// Evaluate a recursive CTE: the base branch seeds the working view, then
/// the recursive branch re-runs against the previous iteration's rows until
/// it produces nothing, bounded by the recursion limit.
fn load_recursive_inline_table(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    def: &crate::parser::ast::InlineTableDef,
) -> Result<View> {
    let SelectEntity::SetOperation {
        left, op: _, all: _, right, pos: _,
    } = &def.query.entity
    else {
        // Not actually self-referential; evaluate as a plain inline table
        let mut v = View::select_query(ctx, scope, &def.query)?;
        rename_columns(&mut v, def)?;
        return Ok(v);
    };

    let limit = scope.tx.limit_recursion();

    let mut accumulated = View::select_entity(ctx, scope, left)?;
    accumulated.fix()?;
    let mut seed = accumulated.clone();
    rename_columns(&mut seed, def)?;
    rename_columns(&mut accumulated, def)?;

    let mut depth: i64 = 0;
    loop {
        if seed.record_len() == 0 {
            break;
        }
        depth += 1;
        if limit >= 0 && depth > limit {
            return Err(Error::RecursionLimitExceeded {
                pos: def.pos,
                limit,
            });
        }
        ctx.check()?;

        let mut iteration_scope = scope.clone();
        iteration_scope.recursive = Some(RecursiveState {
            name: def.name.clone(),
            view: Arc::new(seed),
            depth,
        });
        let mut produced = View::select_entity(ctx, &iteration_scope, right)?;
        produced.fix()?;
        rename_columns(&mut produced, def)?;

        accumulated.record_set.extend(produced.record_set.iter().cloned());
        seed = produced;
    }

    Ok(accumulated)
}

fn resolve_identifier(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    name: &str,
    pos: SourcePosition,
) -> Result<(View, String, String)> {
    // In-progress recursive CTE binding wins
    if let Some(state) = &scope.recursive {
        if state.name.eq_ignore_ascii_case(name) {
            return Ok(((*state.view).clone(), name.to_string(), String::new()));
        }
    }
    if scope.inline_table_exists(name) {
        let view = scope.get_inline_table(name, pos)?;
        return Ok(((*view).clone(), name.to_string(), String::new()));
    }
    if scope.temporary_table_exists(name) {
        let view = scope.get_temporary_table(name, pos)?;
        return Ok((view, table_alias_of(name), name.to_string()));
    }
    let (view, path) = scope.tx.load_table_view(ctx, scope, name, pos)?;
    Ok((view, table_alias_of(&path), path))
}

/// Default alias of a table identifier: the file stem
fn table_alias_of(identifier: &str) -> String {
    std::path::Path::new(identifier)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| identifier.to_string())
}

fn evaluate_row_count(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    expr: &Expression,
    pos: SourcePosition,
) -> Result<i64> {
    let v = evaluator::evaluate_constant(ctx, scope, expr)?;
    crate::core::to_integer(&v)
        .ok_or_else(|| Error::type_mismatch(pos, "LIMIT and OFFSET take an integer".to_string()))
}

fn compare_sort_values(
    a: &Value,
    b: &Value,
    item: &crate::parser::ast::OrderItem,
    time_ctx: &crate::core::TimeContext,
) -> Ordering {
    let a_null = a.is_null();
    let b_null = b.is_null();
    if a_null || b_null {
        if a_null && b_null {
            return Ordering::Equal;
        }
        // Default: nulls first ascending, last descending
        let null_position = item.null_position.unwrap_or(match item.direction {
            SortDirection::Ascending => NullPosition::First,
            SortDirection::Descending => NullPosition::Last,
        });
        let ord = match null_position {
            NullPosition::First if a_null => Ordering::Less,
            NullPosition::First => Ordering::Greater,
            NullPosition::Last if a_null => Ordering::Greater,
            NullPosition::Last => Ordering::Less,
        };
        return ord;
    }

    let ord = order(a, b, time_ctx).unwrap_or(Ordering::Equal);
    match item.direction {
        SortDirection::Ascending => ord,
        SortDirection::Descending => ord.reverse(),
    }
}

fn sort_keys_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| identical(x, y))
}

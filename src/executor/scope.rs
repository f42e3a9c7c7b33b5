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

//! Reference scopes
//!
//! A [`ReferenceScope`] is three stacks: lexical block scopes (variables,
//! temporary tables, cursors, user functions), query-node scopes (inline
//! tables, table aliases), and per-record evaluation frames. Index 0 is the
//! innermost entry of each stack; declarations always target index 0 and
//! reads walk outward. Cleared block and node scopes are recycled through a
//! session-wide [`ScopePool`].

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::core::{Error, Result, SourcePosition, Ternary, Value};
use crate::parser::ast::FieldReference;

use super::cursor::Cursor;
use super::function::UserDefinedFunction;
use super::view::View;
use crate::storage::transaction::Transaction;

/// Entry count at which a field-index cache trades its parallel lists for a
/// hash table
pub const FIELD_INDEX_CACHE_LIMIT: usize = 8;

// ============================================================================
// Scope pool
// ============================================================================

/// Session-wide recycler for cleared block and node scopes.
///
/// Construct one per session and drop it at session end; per-record loops
/// make scope allocation visible otherwise.
#[derive(Debug, Default)]
pub struct ScopePool {
    blocks: Mutex<Vec<BlockScope>>,
    nodes: Mutex<Vec<NodeScope>>,
}

impl ScopePool {
    pub fn new() -> ScopePool {
        ScopePool::default()
    }

    fn get_block(&self) -> BlockScope {
        self.blocks.lock().pop().unwrap_or_default()
    }

    fn put_block(&self, mut scope: BlockScope) {
        scope.clear();
        self.blocks.lock().push(scope);
    }

    fn get_node(&self) -> NodeScope {
        self.nodes.lock().pop().unwrap_or_default()
    }

    fn put_node(&self, mut scope: NodeScope) {
        scope.clear();
        self.nodes.lock().push(scope);
    }
}

// ============================================================================
// Block and node scopes
// ============================================================================

/// One lexical namespace. All maps are keyed by uppercased name.
#[derive(Debug, Default)]
pub struct BlockScope {
    variables: FxHashMap<String, Value>,
    temporary_tables: FxHashMap<String, View>,
    cursors: FxHashMap<String, Cursor>,
    functions: FxHashMap<String, Arc<UserDefinedFunction>>,
}

impl BlockScope {
    fn clear(&mut self) {
        self.variables.clear();
        self.temporary_tables.clear();
        self.cursors.clear();
        self.functions.clear();
    }
}

/// One query-node namespace
#[derive(Debug, Default)]
pub struct NodeScope {
    inline_tables: FxHashMap<String, Arc<View>>,
    aliases: FxHashMap<String, String>,
}

impl NodeScope {
    fn clear(&mut self) {
        self.inline_tables.clear();
        self.aliases.clear();
    }
}

fn key_of(name: &str) -> String {
    name.to_uppercase()
}

// ============================================================================
// Field-index cache
// ============================================================================

/// Cache of resolved field indices keyed by field-reference identity.
///
/// Starts as two parallel lists; a hash table only pays off once a record
/// frame resolves more than a handful of distinct references.
#[derive(Debug, Default)]
pub struct FieldIndexCache {
    map: Option<FxHashMap<FieldReference, usize>>,
    exprs: Vec<FieldReference>,
    indices: Vec<usize>,
}

impl FieldIndexCache {
    pub fn get(&self, expr: &FieldReference) -> Option<usize> {
        if let Some(map) = &self.map {
            return map.get(expr).copied();
        }
        self.exprs
            .iter()
            .position(|e| e == expr)
            .map(|i| self.indices[i])
    }

    pub fn add(&mut self, expr: FieldReference, idx: usize) {
        if self.map.is_none() && FIELD_INDEX_CACHE_LIMIT <= self.exprs.len() {
            let mut map = FxHashMap::with_capacity_and_hasher(
                FIELD_INDEX_CACHE_LIMIT * 2,
                Default::default(),
            );
            for (e, i) in self.exprs.drain(..).zip(self.indices.drain(..)) {
                map.insert(e, i);
            }
            self.map = Some(map);
        }

        match &mut self.map {
            Some(map) => {
                map.insert(expr, idx);
            }
            None => {
                self.exprs.push(expr);
                self.indices.push(idx);
            }
        }
    }
}

// ============================================================================
// Record frames
// ============================================================================

/// One per-record evaluation frame
#[derive(Debug)]
pub struct ReferenceRecord {
    pub view: Arc<View>,
    record_index: Cell<i64>,
    /// Partition element selected while an aggregate argument is evaluated
    pub element_index: Option<usize>,
    cache: RefCell<FieldIndexCache>,
}

impl ReferenceRecord {
    pub fn new(view: Arc<View>, record_index: i64) -> ReferenceRecord {
        ReferenceRecord {
            view,
            record_index: Cell::new(record_index),
            element_index: None,
            cache: RefCell::new(FieldIndexCache::default()),
        }
    }

    pub fn record_index(&self) -> i64 {
        self.record_index.get()
    }

    pub fn set_record_index(&self, idx: i64) {
        self.record_index.set(idx);
    }

    pub fn is_in_range(&self) -> bool {
        let idx = self.record_index.get();
        -1 < idx && idx < self.view.record_len() as i64
    }

    pub fn cached_field_index(&self, expr: &FieldReference) -> Option<usize> {
        self.cache.borrow().get(expr)
    }

    pub fn cache_field_index(&self, expr: FieldReference, idx: usize) {
        self.cache.borrow_mut().add(expr, idx);
    }
}

impl Clone for ReferenceRecord {
    /// Frames cloned into derived scopes resolve independently, so the
    /// clone starts with an empty cache.
    fn clone(&self) -> ReferenceRecord {
        ReferenceRecord {
            view: Arc::clone(&self.view),
            record_index: Cell::new(self.record_index.get()),
            element_index: self.element_index,
            cache: RefCell::new(FieldIndexCache::default()),
        }
    }
}

// ============================================================================
// Reference scope
// ============================================================================

/// In-progress recursive CTE binding consulted before node scopes
#[derive(Debug, Clone)]
pub struct RecursiveState {
    pub name: String,
    pub view: Arc<View>,
    pub depth: i64,
}

/// Values bound to `?` and `:name` placeholders by EXECUTE
#[derive(Debug, Default)]
pub struct PlaceholderBindings {
    pub positional: Vec<Value>,
    pub named: FxHashMap<String, Value>,
}

/// The stack of scopes a statement evaluates against
#[derive(Debug, Clone)]
pub struct ReferenceScope {
    pub tx: Arc<Transaction>,

    blocks: Vec<Arc<RwLock<BlockScope>>>,
    nodes: Vec<Arc<RwLock<NodeScope>>>,

    cached_file_path: Option<Arc<Mutex<FxHashMap<String, String>>>>,
    now: Option<DateTime<FixedOffset>>,

    pub records: Vec<ReferenceRecord>,

    pub recursive: Option<RecursiveState>,
    pub placeholders: Option<Arc<PlaceholderBindings>>,
}

impl ReferenceScope {
    /// Root scope of a session
    pub fn new(tx: Arc<Transaction>) -> ReferenceScope {
        let block = tx.scope_pool().get_block();
        ReferenceScope {
            tx,
            blocks: vec![Arc::new(RwLock::new(block))],
            nodes: Vec::new(),
            cached_file_path: None,
            now: None,
            records: Vec::new(),
            recursive: None,
            placeholders: None,
        }
    }

    fn derive(&self, records: Vec<ReferenceRecord>) -> ReferenceScope {
        ReferenceScope {
            tx: Arc::clone(&self.tx),
            blocks: self.blocks.clone(),
            nodes: self.nodes.clone(),
            cached_file_path: self.cached_file_path.clone(),
            now: self.now,
            records,
            recursive: self.recursive.clone(),
            placeholders: self.placeholders.clone(),
        }
    }

    /// Push an empty block scope (procedural blocks, function bodies)
    pub fn create_child(&self) -> ReferenceScope {
        let mut blocks = Vec::with_capacity(self.blocks.len() + 1);
        blocks.push(Arc::new(RwLock::new(self.tx.scope_pool().get_block())));
        blocks.extend(self.blocks.iter().cloned());
        ReferenceScope {
            tx: Arc::clone(&self.tx),
            blocks,
            nodes: Vec::new(),
            cached_file_path: self.cached_file_path.clone(),
            now: self.now,
            records: Vec::new(),
            recursive: self.recursive.clone(),
            placeholders: self.placeholders.clone(),
        }
    }

    /// Push an empty node scope (per query node). The first node freezes
    /// the session clock and the file-path memo.
    pub fn create_node(&self) -> ReferenceScope {
        let mut nodes = Vec::with_capacity(self.nodes.len() + 1);
        nodes.push(Arc::new(RwLock::new(self.tx.scope_pool().get_node())));
        nodes.extend(self.nodes.iter().cloned());

        let mut scope = self.derive(self.records.clone());
        scope.nodes = nodes;
        if scope.cached_file_path.is_none() {
            scope.cached_file_path = Some(Arc::new(Mutex::new(FxHashMap::default())));
        }
        if scope.now.is_none() {
            scope.now = Some(self.tx.session_now());
        }
        scope
    }

    /// Push a record frame for `view` at `record_index`
    pub fn create_scope_for_record_evaluation(
        &self,
        view: Arc<View>,
        record_index: i64,
    ) -> ReferenceScope {
        let mut records = Vec::with_capacity(self.records.len() + 1);
        records.push(ReferenceRecord::new(view, record_index));
        records.extend(self.records.iter().cloned());
        self.derive(records)
    }

    /// Record frame positioned before the first row
    pub fn create_scope_for_sequential_evaluation(&self, view: Arc<View>) -> ReferenceScope {
        self.create_scope_for_record_evaluation(view, -1)
    }

    /// Re-frame the current record with a partition element selected
    pub fn create_scope_for_group_element(&self, element: usize) -> ReferenceScope {
        let mut records = self.records.clone();
        if let Some(frame) = records.first_mut() {
            frame.element_index = Some(element);
        }
        self.derive(records)
    }

    /// Advance the innermost record frame; false when exhausted
    pub fn next_record(&self) -> bool {
        let frame = &self.records[0];
        frame.set_record_index(frame.record_index() + 1);
        (frame.record_index() as usize) < frame.view.record_len()
    }

    pub fn global(&self) -> &Arc<RwLock<BlockScope>> {
        self.blocks.last().expect("scope always has a global block")
    }

    pub fn current_block(&self) -> &Arc<RwLock<BlockScope>> {
        &self.blocks[0]
    }

    /// Return the innermost block to the pool
    pub fn close_current_block(&mut self) {
        if self.blocks.len() <= 1 {
            return;
        }
        let block = self.blocks.remove(0);
        if let Ok(lock) = Arc::try_unwrap(block) {
            self.tx.scope_pool().put_block(lock.into_inner());
        }
    }

    /// Return the innermost node to the pool
    pub fn close_current_node(&mut self) {
        if self.nodes.is_empty() {
            return;
        }
        let node = self.nodes.remove(0);
        if let Ok(lock) = Arc::try_unwrap(node) {
            self.tx.scope_pool().put_node(lock.into_inner());
        }
    }

    /// Session clock, frozen per query node
    pub fn now(&self) -> DateTime<FixedOffset> {
        match self.now {
            Some(now) => now,
            None => self.tx.session_now(),
        }
    }

    pub fn store_file_path(&self, identifier: &str, path: &str) {
        if let Some(cache) = &self.cached_file_path {
            cache.lock().insert(key_of(identifier), path.to_string());
        }
    }

    pub fn load_file_path(&self, identifier: &str) -> Option<String> {
        self.cached_file_path
            .as_ref()
            .and_then(|cache| cache.lock().get(&key_of(identifier)).cloned())
    }

    // ========================================================================
    // Variables
    // ========================================================================

    pub fn declare_variable(&self, name: &str, value: Value, pos: SourcePosition) -> Result<()> {
        let mut block = self.blocks[0].write();
        let key = key_of(name);
        if block.variables.contains_key(&key) {
            return Err(Error::VariableRedeclared {
                pos,
                name: name.to_string(),
            });
        }
        block.variables.insert(key, value);
        Ok(())
    }

    pub fn get_variable(&self, name: &str, pos: SourcePosition) -> Result<Value> {
        let key = key_of(name);
        for block in &self.blocks {
            if let Some(v) = block.read().variables.get(&key) {
                return Ok(v.clone());
            }
        }
        Err(Error::UndeclaredVariable {
            pos,
            name: name.to_string(),
        })
    }

    /// Assign across block boundaries: the defining scope is mutated
    pub fn substitute_variable(
        &self,
        name: &str,
        value: Value,
        pos: SourcePosition,
    ) -> Result<()> {
        let key = key_of(name);
        for block in &self.blocks {
            let mut guard = block.write();
            if let Some(slot) = guard.variables.get_mut(&key) {
                *slot = value;
                return Ok(());
            }
        }
        Err(Error::UndeclaredVariable {
            pos,
            name: name.to_string(),
        })
    }

    pub fn dispose_variable(&self, name: &str, pos: SourcePosition) -> Result<()> {
        let key = key_of(name);
        for block in &self.blocks {
            if block.write().variables.remove(&key).is_some() {
                return Ok(());
            }
        }
        Err(Error::UndeclaredVariable {
            pos,
            name: name.to_string(),
        })
    }

    // ========================================================================
    // Temporary tables
    // ========================================================================

    pub fn declare_temporary_table(&self, view: View, pos: SourcePosition) -> Result<()> {
        let key = view
            .file_info
            .as_ref()
            .map(|fi| fi.lock().view_cache_key.clone())
            .ok_or_else(|| Error::system("temporary table requires file info"))?;
        let mut block = self.blocks[0].write();
        if block.temporary_tables.contains_key(&key) {
            return Err(Error::DuplicateTableAlias {
                pos,
                table: key.to_lowercase(),
            });
        }
        block.temporary_tables.insert(key, view);
        Ok(())
    }

    pub fn temporary_table_exists(&self, name: &str) -> bool {
        let key = key_of(name);
        self.blocks
            .iter()
            .any(|b| b.read().temporary_tables.contains_key(&key))
    }

    pub fn get_temporary_table(&self, name: &str, pos: SourcePosition) -> Result<View> {
        let key = key_of(name);
        for block in &self.blocks {
            if let Some(view) = block.read().temporary_tables.get(&key) {
                return Ok(view.clone());
            }
        }
        Err(Error::UndeclaredTemporaryTable {
            pos,
            table: name.to_string(),
        })
    }

    /// Write back a mutated temporary table into its defining block
    pub fn replace_temporary_table(&self, view: View) {
        let Some(key) = view
            .file_info
            .as_ref()
            .map(|fi| fi.lock().view_cache_key.clone())
        else {
            return;
        };
        for block in &self.blocks {
            let mut guard = block.write();
            if guard.temporary_tables.contains_key(&key) {
                guard.temporary_tables.insert(key, view);
                return;
            }
        }
    }

    pub fn dispose_temporary_table(&self, name: &str, pos: SourcePosition) -> Result<()> {
        let key = key_of(name);
        for block in &self.blocks {
            if block.write().temporary_tables.remove(&key).is_some() {
                return Ok(());
            }
        }
        Err(Error::UndeclaredTemporaryTable {
            pos,
            table: name.to_string(),
        })
    }

    /// Create restore points for uncommitted temporary tables. Returns the
    /// commit message list.
    pub fn store_temporary_tables(&self, uncommitted: &[String]) -> Vec<String> {
        let mut messages = Vec::new();
        for block in &self.blocks {
            let mut guard = block.write();
            for view in guard.temporary_tables.values_mut() {
                let Some(fi) = view.file_info.as_ref() else {
                    continue;
                };
                let key = fi.lock().view_cache_key.clone();
                if uncommitted.contains(&key) {
                    view.create_restore_point();
                    if let Some(fi) = &view.file_info {
                        fi.lock().is_updated = false;
                    }
                    let message =
                        format!("Commit: restore point of view '{}' is created.", key.to_lowercase());
                    log::debug!("{}", message);
                    messages.push(message);
                }
            }
        }
        messages
    }

    /// Restore uncommitted temporary tables from their restore points.
    /// Returns the rollback message list.
    pub fn restore_temporary_tables(&self, uncommitted: &[String]) -> Vec<String> {
        let mut messages = Vec::new();
        for block in &self.blocks {
            let mut guard = block.write();
            for view in guard.temporary_tables.values_mut() {
                let Some(fi) = view.file_info.as_ref() else {
                    continue;
                };
                let key = fi.lock().view_cache_key.clone();
                if uncommitted.contains(&key) {
                    view.restore();
                    if let Some(fi) = &view.file_info {
                        fi.lock().is_updated = false;
                    }
                    let message = format!("Rollback: view '{}' is restored.", key.to_lowercase());
                    log::debug!("{}", message);
                    messages.push(message);
                }
            }
        }
        messages
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    pub fn declare_cursor(&self, name: &str, cursor: Cursor, pos: SourcePosition) -> Result<()> {
        let mut block = self.blocks[0].write();
        let key = key_of(name);
        if block.cursors.contains_key(&key) {
            return Err(Error::CursorRedeclared {
                pos,
                name: name.to_string(),
            });
        }
        block.cursors.insert(key, cursor);
        Ok(())
    }

    /// Run `f` against the first declaration of `name`, walking outward
    pub fn with_cursor<T>(
        &self,
        name: &str,
        pos: SourcePosition,
        f: impl FnOnce(&mut Cursor) -> Result<T>,
    ) -> Result<T> {
        let key = key_of(name);
        for block in &self.blocks {
            let mut guard = block.write();
            if let Some(cursor) = guard.cursors.get_mut(&key) {
                return f(cursor);
            }
        }
        Err(Error::UndeclaredCursor {
            pos,
            name: name.to_string(),
        })
    }

    pub fn cursor_query(&self, name: &str, pos: SourcePosition) -> Result<Cursor> {
        let key = key_of(name);
        for block in &self.blocks {
            if let Some(cursor) = block.read().cursors.get(&key) {
                return Ok(cursor.shallow_copy());
            }
        }
        Err(Error::UndeclaredCursor {
            pos,
            name: name.to_string(),
        })
    }

    pub fn dispose_cursor(&self, name: &str, pos: SourcePosition) -> Result<()> {
        let key = key_of(name);
        for block in &self.blocks {
            let mut guard = block.write();
            if let Some(cursor) = guard.cursors.get(&key) {
                if cursor.is_pseudo() {
                    return Err(Error::PseudoCursor {
                        pos,
                        name: name.to_string(),
                    });
                }
                guard.cursors.remove(&key);
                return Ok(());
            }
        }
        Err(Error::UndeclaredCursor {
            pos,
            name: name.to_string(),
        })
    }

    pub fn cursor_is_open(&self, name: &str, pos: SourcePosition) -> Result<Ternary> {
        self.with_cursor(name, pos, |c| Ok(Ternary::from_bool(c.is_open())))
    }

    pub fn cursor_is_in_range(&self, name: &str, pos: SourcePosition) -> Result<Ternary> {
        self.with_cursor(name, pos, |c| c.is_in_range(pos))
    }

    pub fn cursor_count(&self, name: &str, pos: SourcePosition) -> Result<usize> {
        self.with_cursor(name, pos, |c| c.count(pos))
    }

    // ========================================================================
    // Functions
    // ========================================================================

    pub fn declare_function(
        &self,
        function: UserDefinedFunction,
        pos: SourcePosition,
    ) -> Result<()> {
        let mut block = self.blocks[0].write();
        let key = key_of(&function.name);
        if block.functions.contains_key(&key) {
            return Err(Error::FunctionRedeclared {
                pos,
                name: function.name.clone(),
            });
        }
        block.functions.insert(key, Arc::new(function));
        Ok(())
    }

    pub fn get_function(&self, name: &str) -> Option<Arc<UserDefinedFunction>> {
        let key = key_of(name);
        for block in &self.blocks {
            if let Some(f) = block.read().functions.get(&key) {
                return Some(Arc::clone(f));
            }
        }
        None
    }

    pub fn dispose_function(&self, name: &str, pos: SourcePosition) -> Result<()> {
        let key = key_of(name);
        for block in &self.blocks {
            if block.write().functions.remove(&key).is_some() {
                return Ok(());
            }
        }
        Err(Error::FunctionNotExist {
            pos,
            name: name.to_string(),
        })
    }

    // ========================================================================
    // Inline tables and aliases
    // ========================================================================

    pub fn set_inline_table(&self, name: &str, view: Arc<View>, pos: SourcePosition) -> Result<()> {
        let Some(node) = self.nodes.first() else {
            return Err(Error::system("no node scope for an inline table"));
        };
        let mut guard = node.write();
        let key = key_of(name);
        if guard.inline_tables.contains_key(&key) {
            return Err(Error::DuplicateTableAlias {
                pos,
                table: name.to_string(),
            });
        }
        guard.inline_tables.insert(key, view);
        Ok(())
    }

    pub fn get_inline_table(&self, name: &str, pos: SourcePosition) -> Result<Arc<View>> {
        let key = key_of(name);
        for node in &self.nodes {
            if let Some(view) = node.read().inline_tables.get(&key) {
                return Ok(Arc::clone(view));
            }
        }
        Err(Error::UndefinedInlineTable {
            pos,
            table: name.to_string(),
        })
    }

    pub fn inline_table_exists(&self, name: &str) -> bool {
        let key = key_of(name);
        self.nodes
            .iter()
            .any(|n| n.read().inline_tables.contains_key(&key))
    }

    pub fn add_alias(&self, alias: &str, path: &str, pos: SourcePosition) -> Result<()> {
        let Some(node) = self.nodes.first() else {
            return Ok(());
        };
        let mut guard = node.write();
        let key = key_of(alias);
        if guard.aliases.contains_key(&key) {
            return Err(Error::DuplicateTableAlias {
                pos,
                table: alias.to_string(),
            });
        }
        guard.aliases.insert(key, path.to_string());
        Ok(())
    }

    pub fn get_alias(&self, alias: &str) -> Option<String> {
        let key = key_of(alias);
        for node in &self.nodes {
            if let Some(path) = node.read().aliases.get(&key) {
                return Some(path.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ReferenceScope {
        ReferenceScope::new(Arc::new(Transaction::new(Default::default())))
    }

    fn pos() -> SourcePosition {
        SourcePosition::default()
    }

    #[test]
    fn declaration_targets_innermost_block() {
        let outer = scope();
        outer
            .declare_variable("v", Value::Integer(1), pos())
            .unwrap();

        let inner = outer.create_child();
        inner
            .declare_variable("v", Value::Integer(2), pos())
            .expect("inner block shadows the outer declaration");
        assert_eq!(inner.get_variable("v", pos()).unwrap(), Value::Integer(2));
        assert_eq!(outer.get_variable("v", pos()).unwrap(), Value::Integer(1));
    }

    #[test]
    fn substitution_mutates_the_defining_scope() {
        let outer = scope();
        outer
            .declare_variable("v", Value::Integer(1), pos())
            .unwrap();
        let mut inner = outer.create_child();
        inner
            .substitute_variable("v", Value::Integer(9), pos())
            .unwrap();
        inner.close_current_block();
        assert_eq!(outer.get_variable("v", pos()).unwrap(), Value::Integer(9));
    }

    #[test]
    fn inner_declarations_vanish_with_the_block() {
        let outer = scope();
        let mut inner = outer.create_child();
        inner
            .declare_variable("temp", Value::Integer(1), pos())
            .unwrap();
        inner.close_current_block();
        assert!(matches!(
            outer.get_variable("temp", pos()),
            Err(Error::UndeclaredVariable { .. })
        ));
    }

    #[test]
    fn redeclaration_in_same_block_is_an_error() {
        let s = scope();
        s.declare_variable("v", Value::Null, pos()).unwrap();
        assert!(matches!(
            s.declare_variable("v", Value::Null, pos()),
            Err(Error::VariableRedeclared { .. })
        ));
    }

    #[test]
    fn field_index_cache_upgrades_to_map() {
        let mut cache = FieldIndexCache::default();
        for i in 0..FIELD_INDEX_CACHE_LIMIT {
            cache.add(FieldReference::new(None, &format!("col{}", i)), i);
        }
        assert!(cache.map.is_none());
        cache.add(FieldReference::new(None, "overflow"), 99);
        assert!(cache.map.is_some());
        assert_eq!(cache.get(&FieldReference::new(None, "col3")), Some(3));
        assert_eq!(cache.get(&FieldReference::new(None, "overflow")), Some(99));
        assert_eq!(cache.get(&FieldReference::new(None, "missing")), None);
    }

    #[test]
    fn variable_names_are_case_insensitive() {
        let s = scope();
        s.declare_variable("Counter", Value::Integer(1), pos()).unwrap();
        assert!(s.get_variable("COUNTER", pos()).is_ok());
        s.dispose_variable("counter", pos()).unwrap();
        assert!(s.get_variable("Counter", pos()).is_err());
    }

    #[test]
    fn global_is_the_outermost_block() {
        let outer = scope();
        outer
            .declare_variable("g", Value::Integer(1), pos())
            .unwrap();
        let inner = outer.create_child().create_child();
        assert!(
            inner.global().read().variables.contains_key("G"),
            "the global block is visible from any depth"
        );
        assert!(
            !inner.current_block().read().variables.contains_key("G"),
            "the innermost block starts empty"
        );
    }

    #[test]
    fn node_scope_freezes_now() {
        let s = scope().create_node();
        let first = s.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(first, s.now());
    }
}

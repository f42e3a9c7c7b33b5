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

//! Transactions
//!
//! The transaction owns the session's view cache, tracks created and
//! updated tables, and drives crash-safe commit: a `.bk` restore copy is
//! written next to each dirty file before its new content goes down, and
//! deleted only after the write succeeds. Rollback discards in-memory
//! changes - unchanged on-disk bytes are the restore point for file-backed
//! views, in-memory snapshots for temporary tables and stdin.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::core::{Error, Result, SourcePosition, TimeContext};
use crate::executor::context::ExecutionContext;
use crate::executor::encoder;
use crate::executor::scope::{ReferenceScope, ScopePool};
use crate::executor::view::View;
use crate::parser::ast::Statement;
use crate::parser::StatementParser;

use super::codec::{self, DecodeOptions};
use super::config::{ExportOptions, Flags, TextEncoding};
use super::file_info::{self, FileInfo, FileInfoHandle};
use super::file_lock::FileLock;

/// Suffix of the restore copy written during commit
const RESTORE_SUFFIX: &str = ".bk";

/// Session-wide transaction state
pub struct Transaction {
    flags: RwLock<Flags>,
    time_context: RwLock<Arc<TimeContext>>,
    scope_pool: ScopePool,

    /// Views loaded from files, keyed by absolute lowercased path
    cached_views: Mutex<FxHashMap<String, View>>,
    /// Files to be created on commit
    uncommitted_created: Mutex<FxHashMap<String, FileInfoHandle>>,
    /// Tables mutated since the last commit
    uncommitted_updated: Mutex<FxHashMap<String, FileInfoHandle>>,

    in_transaction: AtomicBool,

    stdin_source: Mutex<Option<Vec<u8>>>,
    stdout: Mutex<Vec<u8>>,

    /// Run-time parsing seam for PREPARE / EXECUTE IMMEDIATE
    parser: RwLock<Option<Arc<dyn StatementParser>>>,
    prepared: Mutex<FxHashMap<String, Vec<Statement>>>,

    /// Encoded SELECT outputs of the session, in statement order
    results: Mutex<Vec<String>>,
    /// Informational messages; suppressed while QUIET is set
    messages: Mutex<Vec<String>>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("in_transaction", &self.in_transaction.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub fn new(flags: Flags) -> Transaction {
        let time_context = Arc::new(flags.time_context());
        Transaction {
            flags: RwLock::new(flags),
            time_context: RwLock::new(time_context),
            scope_pool: ScopePool::new(),
            cached_views: Mutex::new(FxHashMap::default()),
            uncommitted_created: Mutex::new(FxHashMap::default()),
            uncommitted_updated: Mutex::new(FxHashMap::default()),
            in_transaction: AtomicBool::new(false),
            stdin_source: Mutex::new(None),
            stdout: Mutex::new(Vec::new()),
            parser: RwLock::new(None),
            prepared: Mutex::new(FxHashMap::default()),
            results: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
        }
    }

    // ========================================================================
    // Session surfaces
    // ========================================================================

    pub fn set_parser(&self, parser: Arc<dyn StatementParser>) {
        *self.parser.write() = Some(parser);
    }

    /// Parse a run-time source string through the installed parser
    pub fn parse_source(&self, source: &str, pos: SourcePosition) -> Result<Vec<Statement>> {
        match &*self.parser.read() {
            Some(parser) => parser.parse(source),
            None => Err(Error::ParserNotAvailable { pos }),
        }
    }

    pub fn store_prepared(
        &self,
        name: &str,
        statements: Vec<Statement>,
        pos: SourcePosition,
    ) -> Result<()> {
        let key = name.to_uppercase();
        let mut prepared = self.prepared.lock();
        if prepared.contains_key(&key) {
            return Err(Error::syntax(
                pos,
                format!("prepared statement '{}' already exists", name),
            ));
        }
        prepared.insert(key, statements);
        Ok(())
    }

    pub fn get_prepared(&self, name: &str, pos: SourcePosition) -> Result<Vec<Statement>> {
        self.prepared
            .lock()
            .get(&name.to_uppercase())
            .cloned()
            .ok_or_else(|| Error::PreparedStatementNotExist {
                pos,
                name: name.to_string(),
            })
    }

    pub fn dispose_prepared(&self, name: &str, pos: SourcePosition) -> Result<()> {
        if self.prepared.lock().remove(&name.to_uppercase()).is_some() {
            Ok(())
        } else {
            Err(Error::PreparedStatementNotExist {
                pos,
                name: name.to_string(),
            })
        }
    }

    /// Record an encoded SELECT output
    pub fn push_result(&self, text: String) {
        self.results.lock().push(text);
    }

    /// Drain the session's result list
    pub fn take_results(&self) -> Vec<String> {
        std::mem::take(&mut self.results.lock())
    }

    /// Record an informational message unless QUIET is set. Errors are
    /// never routed through here.
    pub fn push_message(&self, message: String) {
        if !self.flags.read().quiet {
            self.messages.lock().push(message);
        }
    }

    pub fn push_messages(&self, messages: Vec<String>) {
        if !self.flags.read().quiet {
            self.messages.lock().extend(messages);
        }
    }

    pub fn take_messages(&self) -> Vec<String> {
        std::mem::take(&mut self.messages.lock())
    }

    // ========================================================================
    // Session configuration
    // ========================================================================

    pub fn with_flags<R>(&self, f: impl FnOnce(&Flags) -> R) -> R {
        f(&self.flags.read())
    }

    /// Mutate flags. Rejected while uncommitted changes exist: option
    /// changes under a dirty transaction would make commit ambiguous.
    pub fn update_flags(
        &self,
        pos: SourcePosition,
        f: impl FnOnce(&mut Flags) -> Result<()>,
    ) -> Result<()> {
        if self.has_uncommitted() {
            return Err(Error::NotAllowedInTransaction { pos });
        }
        let mut flags = self.flags.write();
        f(&mut flags)?;
        *self.time_context.write() = Arc::new(flags.time_context());
        Ok(())
    }

    pub fn time_context(&self) -> Arc<TimeContext> {
        Arc::clone(&self.time_context.read())
    }

    pub fn cpu(&self) -> usize {
        self.flags.read().cpu
    }

    pub fn limit_recursion(&self) -> i64 {
        self.flags.read().limit_recursion
    }

    fn wait_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.flags.read().wait_timeout)
    }

    pub fn session_now(&self) -> DateTime<FixedOffset> {
        let offset = self.flags.read().offset();
        offset.from_utc_datetime(&chrono::Utc::now().naive_utc())
    }

    pub fn scope_pool(&self) -> &ScopePool {
        &self.scope_pool
    }

    // ========================================================================
    // Standard input and output
    // ========================================================================

    /// Provide the bytes the STDIN table materializes from
    pub fn set_stdin(&self, bytes: Vec<u8>) {
        *self.stdin_source.lock() = Some(bytes);
    }

    /// Content the committed STDIN view was serialized to
    pub fn stdout_bytes(&self) -> Vec<u8> {
        self.stdout.lock().clone()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Resolve and load a table file, sharing the session's cached view.
    /// Returns the view (aliased by the caller) and the resolved path.
    pub fn load_table_view(
        &self,
        ctx: &ExecutionContext,
        scope: &ReferenceScope,
        identifier: &str,
        pos: SourcePosition,
    ) -> Result<(View, String)> {
        let (path, format) = match scope.load_file_path(identifier) {
            Some(cached) => {
                let path = PathBuf::from(&cached);
                let format = super::config::Format::from_extension(&path)
                    .unwrap_or(super::config::Format::Csv);
                (path, format)
            }
            None => {
                let repository = self.flags.read().repository.clone();
                let resolved =
                    file_info::search_table_file(identifier, repository.as_deref(), pos)?;
                scope.store_file_path(identifier, &resolved.0.to_string_lossy());
                resolved
            }
        };

        let key = file_info::cache_key_of(&path);
        if let Some(view) = self.cached_views.lock().get(&key) {
            return Ok((view.clone(), path.to_string_lossy().to_string()));
        }

        let flags = self.flags.read();
        let import = flags.import_options.clone();
        let wait_timeout = Duration::from_secs_f64(flags.wait_timeout);
        drop(flags);

        let lock = FileLock::open_shared(ctx, &path, wait_timeout)?;
        let bytes = std::fs::read(&path)?;

        let mut info = FileInfo::for_file(path.clone(), format, &import);
        let decode_opts = DecodeOptions {
            format: info.format,
            delimiter: info.delimiter,
            delimiter_positions: info.delimiter_positions.as_deref(),
            single_line: info.single_line,
            json_query: &info.json_query,
            encoding: info.encoding,
            no_header: info.no_header,
            without_null: import.without_null,
        };
        let decoded = codec::decode_table(ctx, &bytes, &decode_opts)?;
        info.line_break = decoded.line_break;
        info.encoding = decoded.encoding;
        info.lock = Some(lock);

        let view = View::from_decoded(decoded, Some(Arc::new(Mutex::new(info))));
        self.cached_views.lock().insert(key, view.clone());
        log::debug!("load: {}", path.display());
        Ok((view, path.to_string_lossy().to_string()))
    }

    /// The STDIN table, materialized once per session
    pub fn load_stdin(&self, ctx: &ExecutionContext, pos: SourcePosition) -> Result<View> {
        if let Some(view) = self.cached_views.lock().get("STDIN") {
            return Ok(view.clone());
        }
        let Some(bytes) = self.stdin_source.lock().clone() else {
            return Err(Error::TableNotLoaded {
                pos,
                table: "STDIN".to_string(),
            });
        };
        let import = self.flags.read().import_options.clone();
        let info = FileInfo::for_stdin(&import);
        let decode_opts = DecodeOptions {
            format: info.format,
            delimiter: info.delimiter,
            delimiter_positions: info.delimiter_positions.as_deref(),
            single_line: info.single_line,
            json_query: &info.json_query,
            encoding: info.encoding,
            no_header: info.no_header,
            without_null: import.without_null,
        };
        let decoded = codec::decode_table(ctx, &bytes, &decode_opts)?;
        let view = View::from_decoded(decoded, Some(Arc::new(Mutex::new(info))));
        self.cached_views.lock().insert("STDIN".to_string(), view.clone());
        Ok(view)
    }

    pub fn cached_view(&self, key: &str) -> Option<View> {
        self.cached_views.lock().get(key).cloned()
    }

    /// Write a mutated view back into the cache
    pub fn replace_cached_view(&self, view: View) {
        let Some(fi) = &view.file_info else { return };
        let key = fi.lock().view_cache_key.clone();
        self.cached_views.lock().insert(key, view);
    }

    // ========================================================================
    // Write registration
    // ========================================================================

    /// Upgrade the table's lock for writing and register it as uncommitted.
    /// First mutation auto-begins the transaction.
    pub fn ensure_writable(&self, ctx: &ExecutionContext, view: &View) -> Result<()> {
        let Some(fi) = &view.file_info else {
            return Err(Error::system("mutation target has no file info"));
        };
        let timeout = self.wait_timeout();
        let mut info = fi.lock();
        if info.is_file() {
            // A commit releases the lock; the next write reacquires it
            if info.lock.is_none() {
                let path = info.path.clone();
                info.lock = Some(FileLock::open_shared(ctx, &path, timeout)?);
            }
            if let Some(lock) = &mut info.lock {
                lock.upgrade_exclusive(ctx, timeout)?;
            }
        }
        let key = info.view_cache_key.clone();
        drop(info);
        self.uncommitted_updated.lock().insert(key, Arc::clone(fi));
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Register a table file to be created on commit
    pub fn create_table_file(
        &self,
        ctx: &ExecutionContext,
        identifier: &str,
        view: View,
        pos: SourcePosition,
    ) -> Result<String> {
        let repository = self.flags.read().repository.clone();
        let path = file_info::creation_path(identifier, repository.as_deref());
        if path.exists() {
            return Err(Error::FileAlreadyExist {
                pos,
                file: identifier.to_string(),
            });
        }

        std::fs::File::create(&path)?;
        let lock = match FileLock::open_shared(ctx, &path, self.wait_timeout()) {
            Ok(mut lock) => {
                lock.upgrade_exclusive(ctx, self.wait_timeout())?;
                lock
            }
            Err(e) => {
                std::fs::remove_file(&path).ok();
                return Err(e);
            }
        };

        let import = self.flags.read().import_options.clone();
        let format = super::config::Format::from_extension(&path)
            .unwrap_or(super::config::Format::Csv);
        let mut info = FileInfo::for_file(path.clone(), format, &import);
        info.encoding = TextEncoding::Utf8;
        info.is_updated = true;
        info.lock = Some(lock);
        let key = info.view_cache_key.clone();
        let handle = Arc::new(Mutex::new(info));

        let mut view = view;
        view.file_info = Some(Arc::clone(&handle));

        self.cached_views.lock().insert(key.clone(), view);
        self.uncommitted_created.lock().insert(key, handle);
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(path.to_string_lossy().to_string())
    }

    pub fn is_in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted_created.lock().is_empty() || !self.uncommitted_updated.lock().is_empty()
    }

    fn uncommitted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.uncommitted_created.lock().keys().cloned().collect();
        keys.extend(self.uncommitted_updated.lock().keys().cloned());
        keys
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Flush every dirty view to disk and release locks. Per file: write
    /// the `.bk` restore copy, rewrite the content under the exclusive
    /// lock, then delete the copy. A failed write leaves the copy behind
    /// for manual recovery and the transaction dirty.
    pub fn commit(&self, ctx: &ExecutionContext, scope: &ReferenceScope) -> Result<Vec<String>> {
        let mut messages = Vec::new();
        let keys = self.uncommitted_keys();

        // Temporary tables snapshot in memory; stdin serializes to stdout
        messages.extend(scope.store_temporary_tables(&keys));

        let created: Vec<(String, FileInfoHandle)> =
            self.uncommitted_created.lock().drain().collect();
        let updated: Vec<(String, FileInfoHandle)> =
            self.uncommitted_updated.lock().drain().collect();

        for (key, handle) in created.into_iter().chain(updated) {
            ctx.check()?;
            let (is_file, is_stdin, path) = {
                let info = handle.lock();
                (info.is_file(), info.is_stdin, info.path.clone())
            };

            if is_stdin {
                if let Some(view) = self.cached_view(&key) {
                    let options = export_options_of(&handle);
                    let text = encoder::encode_view_to_string(ctx, &view, &options)?;
                    *self.stdout.lock() = codec::encode_text(&text, options.encoding)?;
                    handle.lock().is_updated = false;
                    messages.push("Commit: standard input view is written.".to_string());
                }
                continue;
            }
            if !is_file {
                continue;
            }

            let Some(view) = self.cached_view(&key) else {
                continue;
            };

            let options = export_options_of(&handle);
            let text = encoder::encode_view_to_string(ctx, &view, &options)?;
            let bytes = codec::encode_text(&text, options.encoding)?;

            let restore_path = restore_path_of(&path);
            let had_content = path.exists() && std::fs::metadata(&path)?.len() > 0;
            if had_content {
                let original = std::fs::read(&path)
                    .map_err(|e| Error::CommitFailed(e.to_string()))?;
                std::fs::write(&restore_path, original)
                    .map_err(|e| Error::CommitFailed(e.to_string()))?;
            }

            // Truncate-and-rewrite guarded by the exclusive lock
            if let Err(e) = std::fs::write(&path, &bytes) {
                self.uncommitted_updated.lock().insert(key, handle);
                return Err(Error::CommitFailed(format!(
                    "{}; restore copy left at {}",
                    e,
                    restore_path.display()
                )));
            }
            if had_content {
                std::fs::remove_file(&restore_path).ok();
            }

            let mut info = handle.lock();
            info.is_updated = false;
            info.restore_point = None;
            info.lock = None; // released
            let message = format!("Commit: file '{}' is updated.", path.display());
            log::debug!("{}", message);
            messages.push(message);
        }

        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(messages)
    }

    // ========================================================================
    // Rollback
    // ========================================================================

    /// Discard uncommitted changes. File-backed views are dropped from the
    /// cache (the unchanged on-disk bytes are their restore point), created
    /// files are deleted, temporary tables restore their snapshots.
    pub fn rollback(&self, scope: Option<&ReferenceScope>) -> Vec<String> {
        let mut messages = Vec::new();
        let keys = self.uncommitted_keys();

        if let Some(scope) = scope {
            messages.extend(scope.restore_temporary_tables(&keys));
        }

        let created: Vec<(String, FileInfoHandle)> =
            self.uncommitted_created.lock().drain().collect();
        for (key, handle) in created {
            let path = {
                let mut info = handle.lock();
                info.lock = None;
                info.path.clone()
            };
            std::fs::remove_file(&path).ok();
            self.cached_views.lock().remove(&key);
            let message = format!("Rollback: file '{}' is deleted.", path.display());
            log::debug!("{}", message);
            messages.push(message);
        }

        let updated: Vec<(String, FileInfoHandle)> =
            self.uncommitted_updated.lock().drain().collect();
        for (key, handle) in updated {
            let (is_file, is_stdin, path) = {
                let mut info = handle.lock();
                info.is_updated = false;
                let meta = (info.is_file(), info.is_stdin, info.path.clone());
                if meta.0 {
                    info.lock = None;
                }
                meta
            };
            if is_file {
                self.cached_views.lock().remove(&key);
                let message = format!("Rollback: file '{}' is restored.", path.display());
                log::debug!("{}", message);
                messages.push(message);
            } else if is_stdin {
                self.cached_views.lock().remove(&key);
                messages.push("Rollback: standard input view is discarded.".to_string());
            }
        }

        self.in_transaction.store(false, Ordering::SeqCst);
        messages
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction::new(Flags::default())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Locks release as cached FileInfo handles drop
        if self.has_uncommitted() {
            log::warn!("session ended with uncommitted changes; they are discarded");
        }
    }
}

fn restore_path_of(path: &std::path::Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(RESTORE_SUFFIX);
    PathBuf::from(os)
}

/// Write-back options preserving the source file's own format settings
fn export_options_of(handle: &FileInfoHandle) -> ExportOptions {
    let info = handle.lock();
    ExportOptions {
        format: info.format,
        encoding: match info.encoding {
            TextEncoding::Auto => TextEncoding::Utf8,
            other => other,
        },
        delimiter: info.delimiter,
        delimiter_positions: info.delimiter_positions.clone(),
        single_line: info.single_line,
        without_header: info.no_header,
        line_break: info.line_break,
        enclose_all: info.enclose_all,
        json_escape: info.json_escape,
        pretty_print: info.pretty_print,
        ..ExportOptions::default()
    }
}

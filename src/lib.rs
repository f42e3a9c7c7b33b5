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

//! # Flatbase - SQL over flat text files
//!
//! Flatbase executes a SQL-like language directly over delimited and
//! structured text files: CSV, TSV, fixed-length, LTSV, JSON, and
//! GFM/Org/plain-text tables. Files load lazily as in-memory views,
//! statements mutate them under per-file advisory locks, and COMMIT writes
//! every dirty view back to disk crash-safely; ROLLBACK restores the
//! pre-transaction state.
//!
//! ## Key pieces
//!
//! - **Three-valued logic** - comparisons return TRUE/FALSE/UNKNOWN with
//!   Kleene semantics; NULL propagates through arithmetic
//! - **Reference scopes** - lexically nested namespaces for variables,
//!   cursors, temporary tables and functions, plus per-record evaluation
//!   frames with a lazily upgraded field-index cache
//! - **Procedural control flow** - IF, CASE, WHILE, FOR over cursors,
//!   nested blocks, user-defined scalar and aggregate functions
//! - **Transactions** - shared locks for readers, exclusive on first
//!   write, `.bk` restore copies during commit, lock waits bounded by a
//!   configured timeout
//! - **Parallel evaluation** - record processing fans out over a worker
//!   budget of `max(1, cores/2)` by default, checking cancellation every
//!   16 records
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use flatbase::executor::context::ExecutionContext;
//! use flatbase::executor::scope::ReferenceScope;
//! use flatbase::executor::Executor;
//! use flatbase::parser::ast::*;
//! use flatbase::storage::{Flags, Transaction};
//!
//! let tx = Arc::new(Transaction::new(Flags::default()));
//! let executor = Executor::new(Arc::clone(&tx));
//! let mut scope = ReferenceScope::new(Arc::clone(&tx));
//! let ctx = ExecutionContext::background();
//!
//! // SELECT name FROM users WHERE id = 2
//! let query = SelectQuery::from_clause(SelectClause {
//!     fields: vec![SelectField::expr(Expression::field(None, "name"))],
//!     from: Some(FromClause {
//!         tables: vec![TableReference::table("users")],
//!         pos: Default::default(),
//!     }),
//!     where_clause: Some(Expression::Comparison {
//!         left: Box::new(Expression::field(None, "id")),
//!         op: flatbase::core::ComparisonOp::Equal,
//!         right: Box::new(Expression::literal(flatbase::core::Value::Integer(2))),
//!         pos: Default::default(),
//!     }),
//!     ..Default::default()
//! });
//! executor.execute(&ctx, &mut scope, &[Statement::Select(query)]).unwrap();
//! for result in tx.take_results() {
//!     print!("{}", result);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`core`] - values, ternary logic, records, headers, errors
//! - [`parser`] - the AST contract and the run-time parsing seam
//! - [`executor`] - scopes, expression evaluation, views, statements,
//!   encoding
//! - [`storage`] - configuration, file metadata, locks, codecs,
//!   transactions

pub mod core;
pub mod executor;
pub mod parser;
pub mod storage;

pub use crate::core::{Error, Result, Ternary, Value};
pub use executor::{Executor, Flow};
pub use storage::{Flags, Transaction};

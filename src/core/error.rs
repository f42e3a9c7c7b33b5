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

//! Error types for Flatbase
//!
//! Every user-facing failure carries a source position so the front-end can
//! render the one-line `[Lx, Cy]` diagnostic.

use std::fmt;

use thiserror::Error;

/// Result type alias for Flatbase operations
pub type Result<T> = std::result::Result<T, Error>;

/// Position of a token in the query source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

impl SourcePosition {
    pub fn new(line: usize, column: usize) -> Self {
        SourcePosition { line, column }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[L{}, C{}]", self.line, self.column)
    }
}

/// Main error type for Flatbase operations
///
/// This enum covers all error cases: query resolution failures, cursor and
/// transaction state errors, I/O and lock failures, and cancellation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // =========================================================================
    // Syntax and statement errors
    // =========================================================================
    /// Invalid statement or expression form
    #[error("{pos} syntax error: {message}")]
    Syntax {
        pos: SourcePosition,
        message: String,
    },

    /// A statement required the external parser and no parser is installed
    #[error("{pos} syntax error: no statement parser is available in this session")]
    ParserNotAvailable { pos: SourcePosition },

    /// A prepared statement does not exist
    #[error("{pos} prepared statement '{name}' does not exist")]
    PreparedStatementNotExist { pos: SourcePosition, name: String },

    /// Placeholder count does not match the supplied values
    #[error("{pos} prepared statement takes {expected} placeholder(s), got {got}")]
    PlaceholderCount {
        pos: SourcePosition,
        expected: usize,
        got: usize,
    },

    // =========================================================================
    // Field resolution errors
    // =========================================================================
    /// Field does not exist in any visible record frame
    #[error("{pos} field '{field}' does not exist")]
    FieldNotFound { pos: SourcePosition, field: String },

    /// Field name matches more than one column
    #[error("{pos} field '{field}' is ambiguous")]
    FieldAmbiguous { pos: SourcePosition, field: String },

    /// Bare column reference on a grouped view outside of group keys
    #[error("{pos} field '{field}' is not a group key")]
    FieldNotGroupKey { pos: SourcePosition, field: String },

    /// Supplied field count does not match the view
    #[error("{pos} field length does not match: expected {expected}, got {got}")]
    FieldLengthMismatch {
        pos: SourcePosition,
        expected: usize,
        got: usize,
    },

    // =========================================================================
    // Table errors
    // =========================================================================
    /// Table reference could not be resolved to a loaded view
    #[error("{pos} table '{table}' is not loaded")]
    TableNotLoaded { pos: SourcePosition, table: String },

    /// File for a table reference does not exist
    #[error("{pos} file '{file}' does not exist")]
    FileNotExist { pos: SourcePosition, file: String },

    /// Creating a table over an existing file
    #[error("{pos} file '{file}' already exists")]
    FileAlreadyExist { pos: SourcePosition, file: String },

    /// Table alias declared twice in one query node
    #[error("{pos} table name '{table}' is a duplicate")]
    DuplicateTableAlias { pos: SourcePosition, table: String },

    /// Temporary table is not declared in any visible block
    #[error("{pos} temporary table '{table}' is undeclared")]
    UndeclaredTemporaryTable { pos: SourcePosition, table: String },

    /// Inline table (WITH clause) is not defined in any visible node
    #[error("{pos} inline table '{table}' is undefined")]
    UndefinedInlineTable { pos: SourcePosition, table: String },

    /// DML addressed at a WITH-clause inline table
    #[error("{pos} inline table '{table}' cannot be updated")]
    UpdateOnInlineTable { pos: SourcePosition, table: String },

    // =========================================================================
    // Variable errors
    // =========================================================================
    /// Variable is not declared in any visible block
    #[error("{pos} variable '{name}' is undeclared")]
    UndeclaredVariable { pos: SourcePosition, name: String },

    /// Variable is declared twice in the same block
    #[error("{pos} variable '{name}' is redeclared")]
    VariableRedeclared { pos: SourcePosition, name: String },

    // =========================================================================
    // Cursor errors
    // =========================================================================
    /// Cursor is not declared in any visible block
    #[error("{pos} cursor '{name}' is undeclared")]
    UndeclaredCursor { pos: SourcePosition, name: String },

    /// Cursor is declared twice in the same block
    #[error("{pos} cursor '{name}' is redeclared")]
    CursorRedeclared { pos: SourcePosition, name: String },

    /// Operation requires an open cursor
    #[error("{pos} cursor '{name}' is closed")]
    CursorClosed { pos: SourcePosition, name: String },

    /// Cursor is already open
    #[error("{pos} cursor '{name}' is already open")]
    CursorOpen { pos: SourcePosition, name: String },

    /// Fetch requested past the end where the language demands an error
    /// rather than a NOT FOUND signal
    #[error("{pos} cursor '{name}' is exhausted")]
    CursorExhausted { pos: SourcePosition, name: String },

    /// Pseudo-cursors cannot be disposed or re-opened
    #[error("{pos} cursor '{name}' is a pseudo cursor")]
    PseudoCursor { pos: SourcePosition, name: String },

    // =========================================================================
    // Function errors
    // =========================================================================
    /// Function is neither built in nor user declared
    #[error("{pos} function '{name}' does not exist")]
    FunctionNotExist { pos: SourcePosition, name: String },

    /// Function is declared twice in the same block
    #[error("{pos} function '{name}' is redeclared")]
    FunctionRedeclared { pos: SourcePosition, name: String },

    /// Wrong number of arguments for a function call
    #[error("{pos} function '{name}' takes {expected}, got {got}")]
    ArgumentCount {
        pos: SourcePosition,
        name: String,
        expected: String,
        got: usize,
    },

    /// Recursion depth exceeded the configured limit
    #[error("{pos} recursion exceeded the limit of {limit}")]
    RecursionLimitExceeded { pos: SourcePosition, limit: i64 },

    // =========================================================================
    // Evaluation errors
    // =========================================================================
    /// Operand kinds cannot be combined by the operator
    #[error("{pos} {message}")]
    TypeMismatch {
        pos: SourcePosition,
        message: String,
    },

    /// Scalar subquery returned more than one row or column
    #[error("{pos} subquery returns too many {unit}")]
    SubqueryTooMany { pos: SourcePosition, unit: String },

    // =========================================================================
    // Transaction errors
    // =========================================================================
    /// Statement is not allowed while a transaction holds uncommitted changes
    #[error("{pos} statement is not allowed in a transaction")]
    NotAllowedInTransaction { pos: SourcePosition },

    /// Commit failed and the transaction still holds dirty views
    #[error("commit failed, transaction remains dirty: {0}")]
    CommitFailed(String),

    // =========================================================================
    // I/O and lock errors
    // =========================================================================
    /// File system failure
    #[error("file operation failed: {0}")]
    Io(String),

    /// Lock acquisition timed out
    #[error("file '{path}' is locked by another process")]
    LockWait { path: String },

    /// Text-encoding detection or transcoding failure
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Table data could not be decoded or encoded in the requested format
    #[error("data encoding error: {0}")]
    DataEncoding(String),

    /// Encoder invoked without header on an empty record set
    #[error("data empty")]
    DataEmpty,

    /// Plain-text table encoder invoked on an empty result
    #[error("empty result set")]
    EmptyResultSet,

    // =========================================================================
    // Cancellation
    // =========================================================================
    /// The ambient cancellation token was triggered
    #[error("query canceled")]
    ContextCanceled,

    /// The ambient deadline elapsed
    #[error("query deadline exceeded")]
    ContextDeadlineExceeded,

    // =========================================================================
    // System errors
    // =========================================================================
    /// Configuration value is not acceptable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal failure
    #[error("system error: {0}")]
    System(String),
}

impl Error {
    /// Create a system error with a message
    pub fn system(message: impl Into<String>) -> Self {
        Error::System(message.into())
    }

    /// Create an I/O error from a std::io::Error
    pub fn io(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }

    /// Create a positioned syntax error
    pub fn syntax(pos: SourcePosition, message: impl Into<String>) -> Self {
        Error::Syntax {
            pos,
            message: message.into(),
        }
    }

    /// Create a positioned type-mismatch error
    pub fn type_mismatch(pos: SourcePosition, message: impl Into<String>) -> Self {
        Error::TypeMismatch {
            pos,
            message: message.into(),
        }
    }

    /// Whether this error ends statement execution without rolling back
    /// the transaction (lock waits leave the transaction intact).
    pub fn keeps_transaction(&self) -> bool {
        matches!(self, Error::LockWait { .. })
    }

    /// Process exit code class for the front-end:
    /// 1 for user errors, 2 for I/O and lock errors, 3 for system errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Io(_)
            | Error::LockWait { .. }
            | Error::Encoding(_)
            | Error::DataEncoding(_)
            | Error::CommitFailed(_) => 2,
            Error::System(_) | Error::ContextCanceled | Error::ContextDeadlineExceeded => 3,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positioned_errors_render_line_and_column() {
        let err = Error::FieldNotFound {
            pos: SourcePosition::new(3, 14),
            field: "name".to_string(),
        };
        assert_eq!(err.to_string(), "[L3, C14] field 'name' does not exist");
    }

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(
            Error::syntax(SourcePosition::default(), "bad token").exit_code(),
            1
        );
        assert_eq!(
            Error::LockWait {
                path: "t.csv".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(Error::system("boom").exit_code(), 3);
    }

    #[test]
    fn lock_wait_keeps_transaction() {
        assert!(Error::LockWait {
            path: "t.csv".into()
        }
        .keeps_transaction());
        assert!(!Error::DataEmpty.keeps_transaction());
    }
}

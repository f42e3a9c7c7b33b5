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

//! File metadata and path resolution
//!
//! A [`FileInfo`] describes one table source: where it lives, how it is
//! encoded, the lock currently held on it, and the restore point taken when
//! a commit is planned. Views loaded from a file share their `FileInfo`
//! through an [`FileInfoHandle`]; derived views carry none.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{Error, Header, RecordSet, Result, SourcePosition};

use super::config::{
    Format, ImportOptions, JsonEscapeType, LineBreak, TextEncoding, CSV_EXT, JSON_EXT, LTSV_EXT,
    TSV_EXT,
};
use super::file_lock::FileLock;

/// Shared, transaction-owned handle to a table's metadata
pub type FileInfoHandle = Arc<Mutex<FileInfo>>;

/// Snapshot of a view's tabular content used by rollback
pub type RestorePoint = (Header, RecordSet);

/// Metadata of one table source
#[derive(Debug)]
pub struct FileInfo {
    /// Absolute path for files; the declared name for temporary tables;
    /// `STDIN` for standard input
    pub path: PathBuf,
    pub format: Format,
    pub delimiter: char,
    pub delimiter_positions: Option<Vec<usize>>,
    pub single_line: bool,
    pub json_query: String,
    pub encoding: TextEncoding,
    pub line_break: LineBreak,
    pub no_header: bool,
    pub enclose_all: bool,
    pub json_escape: JsonEscapeType,
    pub pretty_print: bool,

    /// Key of this table in the transaction's view cache
    pub view_cache_key: String,
    pub is_temporary: bool,
    pub is_stdin: bool,
    /// Set by every structural mutation; cleared on commit
    pub is_updated: bool,

    /// Snapshot for rollback; temporary tables refresh it on commit
    pub restore_point: Option<RestorePoint>,

    /// Advisory lock held for the transaction's lifetime
    pub(crate) lock: Option<FileLock>,
}

impl FileInfo {
    /// Metadata for a file-backed table
    pub fn for_file(path: PathBuf, format: Format, options: &ImportOptions) -> FileInfo {
        let delimiter = match format {
            Format::Tsv => '\t',
            _ => options.delimiter,
        };
        let view_cache_key = cache_key_of(&path);
        FileInfo {
            path,
            format,
            delimiter,
            delimiter_positions: options.delimiter_positions.clone(),
            single_line: options.single_line,
            json_query: options.json_query.clone(),
            encoding: options.encoding,
            line_break: LineBreak::default(),
            no_header: options.no_header,
            enclose_all: false,
            json_escape: JsonEscapeType::default(),
            pretty_print: false,
            view_cache_key,
            is_temporary: false,
            is_stdin: false,
            is_updated: false,
            restore_point: None,
            lock: None,
        }
    }

    /// Metadata for an in-memory temporary table
    pub fn for_temporary(name: &str) -> FileInfo {
        FileInfo {
            path: PathBuf::from(name),
            format: Format::Csv,
            delimiter: ',',
            delimiter_positions: None,
            single_line: false,
            json_query: String::new(),
            encoding: TextEncoding::Utf8,
            line_break: LineBreak::default(),
            no_header: false,
            enclose_all: false,
            json_escape: JsonEscapeType::default(),
            pretty_print: false,
            view_cache_key: name.to_uppercase(),
            is_temporary: true,
            is_stdin: false,
            is_updated: false,
            restore_point: None,
            lock: None,
        }
    }

    /// Metadata for the standard-input table
    pub fn for_stdin(options: &ImportOptions) -> FileInfo {
        let mut info = FileInfo::for_file(PathBuf::from("STDIN"), options.format, options);
        info.view_cache_key = "STDIN".to_string();
        info.is_stdin = true;
        info
    }

    /// Whether this table is backed by an on-disk file
    pub fn is_file(&self) -> bool {
        !self.is_temporary && !self.is_stdin
    }
}

/// Cache key of a path: its absolute, lowercased string form
pub fn cache_key_of(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Importable extensions tried when a table identifier has no match
const INFERABLE_EXTS: &[&str] = &[CSV_EXT, TSV_EXT, JSON_EXT, LTSV_EXT];

/// Resolve a table identifier to an existing file.
///
/// Relative identifiers are anchored at the repository (or the working
/// directory). An identifier without a usable extension also tries the
/// importable extensions in order.
pub fn search_table_file(
    identifier: &str,
    repository: Option<&Path>,
    pos: SourcePosition,
) -> Result<(PathBuf, Format)> {
    let base = identifier_path(identifier, repository);

    let mut candidates: Vec<PathBuf> = vec![base.clone()];
    if Format::from_extension(&base).is_none() {
        for ext in INFERABLE_EXTS {
            let mut with_ext = base.as_os_str().to_owned();
            with_ext.push(ext);
            candidates.push(PathBuf::from(with_ext));
        }
    }

    for candidate in candidates {
        if candidate.is_file() {
            let abs = std::fs::canonicalize(&candidate).map_err(Error::io)?;
            let format = Format::from_extension(&abs).unwrap_or(Format::Csv);
            return Ok((abs, format));
        }
    }

    Err(Error::FileNotExist {
        pos,
        file: identifier.to_string(),
    })
}

/// Absolute path a new table file would be created at
pub fn creation_path(identifier: &str, repository: Option<&Path>) -> PathBuf {
    let path = identifier_path(identifier, repository);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

fn identifier_path(identifier: &str, repository: Option<&Path>) -> PathBuf {
    let p = Path::new(identifier);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        match repository {
            Some(repo) => repo.join(p),
            None => p.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsv_format_forces_tab_delimiter() {
        let info = FileInfo::for_file(
            PathBuf::from("/tmp/t.tsv"),
            Format::Tsv,
            &ImportOptions::default(),
        );
        assert_eq!(info.delimiter, '\t');
        assert!(info.is_file());
    }

    #[test]
    fn cache_key_is_lowercased() {
        assert_eq!(cache_key_of(Path::new("/Tmp/Users.CSV")), "/tmp/users.csv");
    }

    #[test]
    fn search_appends_importable_extensions() {
        let dir = std::env::temp_dir().join("flatbase_fileinfo_test");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("orders.csv");
        std::fs::write(&file, "a\n1\n").unwrap();

        let (path, format) =
            search_table_file("orders", Some(&dir), SourcePosition::default()).unwrap();
        assert!(path.ends_with("orders.csv"));
        assert_eq!(format, Format::Csv);

        assert!(matches!(
            search_table_file("absent", Some(&dir), SourcePosition::default()),
            Err(Error::FileNotExist { .. })
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn temporary_tables_are_not_files() {
        let info = FileInfo::for_temporary("work");
        assert!(!info.is_file());
        assert_eq!(info.view_cache_key, "WORK");
    }
}

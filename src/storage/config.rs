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

//! Session configuration
//!
//! [`Flags`] is the recognized option surface: repository, timezone,
//! datetime formats, the import/export option groups, and the system knobs
//! (recursion limit, CPU budget, quiet/stats). Option values arrive as
//! strings from the front-end and are validated here.

use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Local, Offset, Utc};
use serde::Deserialize;

use crate::core::{Error, Result, TimeContext};

/// Environment variable naming the directory that holds `init.sql` and
/// `flatbase_env.json`
pub const HOME_ENV: &str = "FLATBASE_HOME";

/// Literal selecting automatic fixed-length delimiting
pub const DELIMIT_AUTOMATICALLY: &str = "SPACES";

pub const CSV_EXT: &str = ".csv";
pub const TSV_EXT: &str = ".tsv";
pub const JSON_EXT: &str = ".json";
pub const LTSV_EXT: &str = ".ltsv";
pub const GFM_EXT: &str = ".md";
pub const ORG_EXT: &str = ".org";
pub const TEXT_EXT: &str = ".txt";

// ============================================================================
// Option enums
// ============================================================================

/// Table file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Csv,
    Tsv,
    Fixed,
    Json,
    Ltsv,
    Gfm,
    Org,
    Text,
}

impl Format {
    pub fn parse(s: &str) -> Result<Format> {
        match s.to_uppercase().as_str() {
            "CSV" => Ok(Format::Csv),
            "TSV" => Ok(Format::Tsv),
            "FIXED" => Ok(Format::Fixed),
            "JSON" => Ok(Format::Json),
            "LTSV" => Ok(Format::Ltsv),
            "GFM" => Ok(Format::Gfm),
            "ORG" => Ok(Format::Org),
            "TEXT" => Ok(Format::Text),
            _ => Err(Error::Configuration(format!("'{}' is not a format", s))),
        }
    }

    /// Infer the format of a file path from its extension
    pub fn from_extension(path: &Path) -> Option<Format> {
        let ext = format!(
            ".{}",
            path.extension()?.to_string_lossy().to_lowercase()
        );
        match ext.as_str() {
            CSV_EXT => Some(Format::Csv),
            TSV_EXT => Some(Format::Tsv),
            JSON_EXT => Some(Format::Json),
            LTSV_EXT => Some(Format::Ltsv),
            GFM_EXT => Some(Format::Gfm),
            ORG_EXT => Some(Format::Org),
            TEXT_EXT => Some(Format::Text),
            _ => None,
        }
    }

    /// Formats accepted on the import side
    pub fn is_importable(self) -> bool {
        matches!(
            self,
            Format::Csv | Format::Tsv | Format::Fixed | Format::Json | Format::Ltsv
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Format::Csv => "CSV",
            Format::Tsv => "TSV",
            Format::Fixed => "FIXED",
            Format::Json => "JSON",
            Format::Ltsv => "LTSV",
            Format::Gfm => "GFM",
            Format::Org => "ORG",
            Format::Text => "TEXT",
        }
    }
}

/// Text encodings of table files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Auto,
    Utf8,
    Utf8m,
    Utf16,
    Utf16be,
    Utf16le,
    Utf16bem,
    Utf16lem,
    Sjis,
}

impl TextEncoding {
    pub fn parse(s: &str) -> Result<TextEncoding> {
        match s.to_uppercase().as_str() {
            "AUTO" => Ok(TextEncoding::Auto),
            "UTF8" => Ok(TextEncoding::Utf8),
            "UTF8M" => Ok(TextEncoding::Utf8m),
            "UTF16" => Ok(TextEncoding::Utf16),
            "UTF16BE" => Ok(TextEncoding::Utf16be),
            "UTF16LE" => Ok(TextEncoding::Utf16le),
            "UTF16BEM" => Ok(TextEncoding::Utf16bem),
            "UTF16LEM" => Ok(TextEncoding::Utf16lem),
            "SJIS" => Ok(TextEncoding::Sjis),
            _ => Err(Error::Configuration(format!("'{}' is not an encoding", s))),
        }
    }
}

/// Line break style written between records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineBreak {
    #[default]
    Lf,
    Cr,
    Crlf,
}

impl LineBreak {
    pub fn parse(s: &str) -> Result<LineBreak> {
        match s.to_uppercase().as_str() {
            "LF" => Ok(LineBreak::Lf),
            "CR" => Ok(LineBreak::Cr),
            "CRLF" => Ok(LineBreak::Crlf),
            _ => Err(Error::Configuration(format!("'{}' is not a line break", s))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineBreak::Lf => "\n",
            LineBreak::Cr => "\r",
            LineBreak::Crlf => "\r\n",
        }
    }
}

/// JSON string escape styles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonEscapeType {
    #[default]
    Backslash,
    Hex,
    HexAll,
}

impl JsonEscapeType {
    pub fn parse(s: &str) -> Result<JsonEscapeType> {
        match s.to_uppercase().as_str() {
            "BACKSLASH" => Ok(JsonEscapeType::Backslash),
            "HEX" => Ok(JsonEscapeType::Hex),
            "HEXALL" => Ok(JsonEscapeType::HexAll),
            _ => Err(Error::Configuration(format!(
                "json escape type must be one of BACKSLASH|HEX|HEXALL, got '{}'",
                s
            ))),
        }
    }
}

// ============================================================================
// Option groups
// ============================================================================

/// Options applied when a file is loaded as a table
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub format: Format,
    pub delimiter: char,
    pub delimiter_positions: Option<Vec<usize>>,
    pub single_line: bool,
    pub json_query: String,
    pub encoding: TextEncoding,
    pub no_header: bool,
    pub without_null: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            format: Format::Csv,
            delimiter: ',',
            delimiter_positions: None,
            single_line: false,
            json_query: String::new(),
            encoding: TextEncoding::Auto,
            no_header: false,
            without_null: false,
        }
    }
}

/// Options applied when a view is written out
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub strip_ending_line_break: bool,
    pub format: Format,
    pub encoding: TextEncoding,
    pub delimiter: char,
    pub delimiter_positions: Option<Vec<usize>>,
    pub single_line: bool,
    pub without_header: bool,
    pub line_break: LineBreak,
    pub enclose_all: bool,
    pub json_escape: JsonEscapeType,
    pub pretty_print: bool,

    // String width measurement
    pub east_asian_encoding: bool,
    pub count_diacritical_sign: bool,
    pub count_format_code: bool,

    pub color: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            strip_ending_line_break: false,
            format: Format::Text,
            encoding: TextEncoding::Utf8,
            delimiter: ',',
            delimiter_positions: None,
            single_line: false,
            without_header: false,
            line_break: LineBreak::Lf,
            enclose_all: false,
            json_escape: JsonEscapeType::Backslash,
            pretty_print: false,
            east_asian_encoding: false,
            count_diacritical_sign: false,
            count_format_code: false,
            color: false,
        }
    }
}

// ============================================================================
// Flags
// ============================================================================

/// The session's recognized configuration surface
#[derive(Debug, Clone)]
pub struct Flags {
    /// Working directory for relative file paths
    pub repository: Option<PathBuf>,
    /// Timezone label: Local, UTC or a fixed offset
    pub location: String,
    /// User-configured datetime formats, tried before the built-in ladder
    pub datetime_format: Vec<String>,
    /// With ANSI_QUOTES the parser treats double quotes as identifiers
    pub ansi_quotes: bool,
    /// Seconds to wait for a file lock
    pub wait_timeout: f64,

    pub import_options: ImportOptions,
    pub export_options: ExportOptions,

    pub quiet: bool,
    /// Maximum recursion depth; -1 disables the limit
    pub limit_recursion: i64,
    /// Worker budget for record-parallel evaluation
    pub cpu: usize,
    pub stats: bool,

    offset: FixedOffset,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            repository: None,
            location: "Local".to_string(),
            datetime_format: Vec::new(),
            ansi_quotes: false,
            wait_timeout: 10.0,
            import_options: ImportOptions::default(),
            export_options: ExportOptions::default(),
            quiet: false,
            limit_recursion: 1000,
            cpu: default_cpu(),
            stats: false,
            offset: Local::now().offset().fix(),
        }
    }
}

/// Default worker budget: half the hardware threads, at least one
pub fn default_cpu() -> usize {
    let n = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (n / 2).max(1)
}

impl Flags {
    pub fn new() -> Flags {
        Flags::default()
    }

    /// Context handed to value coercions
    pub fn time_context(&self) -> TimeContext {
        TimeContext::new(self.datetime_format.clone(), self.offset)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn set_repository(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            self.repository = None;
            return Ok(());
        }
        let path = std::fs::canonicalize(s)
            .map_err(|_| Error::Configuration("repository does not exist".to_string()))?;
        if !path.is_dir() {
            return Err(Error::Configuration(
                "repository must be a directory path".to_string(),
            ));
        }
        self.repository = Some(path);
        Ok(())
    }

    /// Accepts `Local`, `UTC`, or a fixed offset such as `+09:00`
    pub fn set_location(&mut self, s: &str) -> Result<()> {
        let label = if s.is_empty() || s.eq_ignore_ascii_case("local") {
            self.offset = Local::now().offset().fix();
            "Local".to_string()
        } else if s.eq_ignore_ascii_case("utc") {
            self.offset = Utc.fix();
            "UTC".to_string()
        } else if let Ok(off) = s.parse::<FixedOffset>() {
            self.offset = off;
            s.to_string()
        } else {
            return Err(Error::Configuration(format!(
                "timezone '{}' does not exist; use Local, UTC or a fixed offset",
                s
            )));
        };
        self.location = label;
        Ok(())
    }

    /// Accepts a single pattern or a JSON array of patterns; duplicates are
    /// dropped
    pub fn set_datetime_format(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        match serde_json::from_str::<Vec<String>>(s) {
            Ok(formats) => {
                for f in formats {
                    if !self.datetime_format.contains(&f) {
                        self.datetime_format.push(f);
                    }
                }
            }
            Err(_) => {
                if !self.datetime_format.contains(&s.to_string()) {
                    self.datetime_format.push(s.to_string());
                }
            }
        }
    }

    pub fn set_wait_timeout(&mut self, t: f64) {
        self.wait_timeout = t.max(0.0);
    }

    pub fn set_import_format(&mut self, s: &str) -> Result<()> {
        let format = Format::parse(s)?;
        if !format.is_importable() {
            return Err(Error::Configuration(
                "import format must be one of CSV|TSV|FIXED|JSON|LTSV".to_string(),
            ));
        }
        self.import_options.format = format;
        Ok(())
    }

    pub fn set_delimiter(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        self.import_options.delimiter = parse_delimiter(s)?;
        Ok(())
    }

    pub fn set_delimiter_positions(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        let (positions, single_line) = parse_delimiter_positions(s)?;
        self.import_options.delimiter_positions = positions;
        self.import_options.single_line = single_line;
        self.import_options.format = Format::Fixed;
        Ok(())
    }

    pub fn set_encoding(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        self.import_options.encoding = TextEncoding::parse(s)?;
        Ok(())
    }

    /// Explicit format, or inference from the output file extension
    pub fn set_format(&mut self, s: &str, outfile: &str) -> Result<()> {
        if s.is_empty() {
            if let Some(f) = Format::from_extension(Path::new(outfile)) {
                if f != Format::Text {
                    self.export_options.format = f;
                }
            }
            return Ok(());
        }
        self.export_options.format = Format::parse(s)?;
        Ok(())
    }

    pub fn set_write_encoding(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        let encoding = TextEncoding::parse(s)?;
        if encoding == TextEncoding::Auto {
            return Err(Error::Configuration(
                "write-encoding must be one of UTF8|UTF8M|UTF16|UTF16BE|UTF16LE|UTF16BEM|UTF16LEM|SJIS"
                    .to_string(),
            ));
        }
        self.export_options.encoding = encoding;
        Ok(())
    }

    pub fn set_write_delimiter(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        self.export_options.delimiter = parse_delimiter(s)?;
        Ok(())
    }

    pub fn set_write_delimiter_positions(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        let (positions, single_line) = parse_delimiter_positions(s)?;
        self.export_options.delimiter_positions = positions;
        self.export_options.single_line = single_line;
        self.export_options.format = Format::Fixed;
        Ok(())
    }

    pub fn set_line_break(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        self.export_options.line_break = LineBreak::parse(s)?;
        Ok(())
    }

    pub fn set_json_escape(&mut self, s: &str) -> Result<()> {
        self.export_options.json_escape = JsonEscapeType::parse(s)?;
        Ok(())
    }

    pub fn set_limit_recursion(&mut self, i: i64) {
        self.limit_recursion = i.max(-1);
    }

    pub fn set_cpu(&mut self, i: usize) {
        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.cpu = i.clamp(1, hardware);
    }
}

/// Parse a one-character delimiter; `\t` and `TAB` select a tab
pub fn parse_delimiter(s: &str) -> Result<char> {
    if s == "\\t" || s.eq_ignore_ascii_case("tab") {
        return Ok('\t');
    }
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(Error::Configuration(format!(
            "delimiter must be one character, got '{}'",
            s
        ))),
    }
}

/// Parse `SPACES`, `S[...]` (single-line) or a JSON array of cumulative
/// byte positions. Returns (positions, single_line); None positions means
/// automatic measurement.
pub fn parse_delimiter_positions(s: &str) -> Result<(Option<Vec<usize>>, bool)> {
    if s.eq_ignore_ascii_case(DELIMIT_AUTOMATICALLY) {
        return Ok((None, false));
    }
    let (body, single_line) = match s.strip_prefix(['s', 'S']) {
        Some(rest) if rest.starts_with('[') => (rest, true),
        _ => (s, false),
    };
    let positions: Vec<i64> = serde_json::from_str(body).map_err(|_| {
        Error::Configuration(format!(
            "delimiter positions must be '{}' or a JSON array of integers, got '{}'",
            DELIMIT_AUTOMATICALLY, s
        ))
    })?;
    let mut result = Vec::with_capacity(positions.len());
    for p in positions {
        if p < 0 {
            return Err(Error::Configuration(
                "delimiter positions must not be negative".to_string(),
            ));
        }
        result.push(p as usize);
    }
    Ok((Some(result), single_line))
}

// ============================================================================
// Environment file
// ============================================================================

/// Contents of `$FLATBASE_HOME/flatbase_env.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub datetime_format: Vec<String>,
    #[serde(default)]
    pub environment_variables: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub options: std::collections::HashMap<String, String>,
}

impl Environment {
    /// Load the environment file when `FLATBASE_HOME` is set; a missing
    /// file is not an error, a malformed one is.
    pub fn load() -> Result<Environment> {
        let Some(home) = std::env::var_os(HOME_ENV) else {
            return Ok(Environment::default());
        };
        let path = Path::new(&home).join("flatbase_env.json");
        if !path.exists() {
            return Ok(Environment::default());
        }
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Configuration(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Path of the init script, when the home directory defines one
    pub fn init_script_path() -> Option<PathBuf> {
        let home = std::env::var_os(HOME_ENV)?;
        let path = Path::new(&home).join("init.sql");
        path.exists().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_inference_from_extension() {
        assert_eq!(
            Format::from_extension(Path::new("out.json")),
            Some(Format::Json)
        );
        assert_eq!(Format::from_extension(Path::new("out.MD")), Some(Format::Gfm));
        assert_eq!(Format::from_extension(Path::new("out.bin")), None);
    }

    #[test]
    fn delimiter_parsing() {
        assert_eq!(parse_delimiter("\\t").unwrap(), '\t');
        assert_eq!(parse_delimiter(";").unwrap(), ';');
        assert!(parse_delimiter("ab").is_err());
    }

    #[test]
    fn delimiter_positions_forms() {
        assert_eq!(parse_delimiter_positions("SPACES").unwrap(), (None, false));
        assert_eq!(
            parse_delimiter_positions("[3, 8]").unwrap(),
            (Some(vec![3, 8]), false)
        );
        assert_eq!(
            parse_delimiter_positions("s[3, 8]").unwrap(),
            (Some(vec![3, 8]), true)
        );
        assert!(parse_delimiter_positions("[-1]").is_err());
    }

    #[test]
    fn datetime_format_accepts_json_array_and_deduplicates() {
        let mut flags = Flags::new();
        flags.set_datetime_format(r#"["%d.%m.%Y", "%m-%d-%Y"]"#);
        flags.set_datetime_format("%d.%m.%Y");
        assert_eq!(flags.datetime_format.len(), 2);
    }

    #[test]
    fn location_accepts_fixed_offsets() {
        let mut flags = Flags::new();
        flags.set_location("UTC").unwrap();
        assert_eq!(flags.offset().local_minus_utc(), 0);
        flags.set_location("+09:00").unwrap();
        assert_eq!(flags.offset().local_minus_utc(), 9 * 3600);
        assert!(flags.set_location("Mars/Olympus").is_err());
    }

    #[test]
    fn wait_timeout_floors_at_zero() {
        let mut flags = Flags::new();
        flags.set_wait_timeout(-3.0);
        assert_eq!(flags.wait_timeout, 0.0);
    }

    #[test]
    fn import_format_rejects_export_only_formats() {
        let mut flags = Flags::new();
        assert!(flags.set_import_format("GFM").is_err());
        assert!(flags.set_import_format("ltsv").is_ok());
    }
}

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

//! Table decoding
//!
//! The readers behind table loading: CSV/TSV per RFC 4180 with a
//! configurable delimiter, fixed-length with explicit cumulative positions
//! or whitespace splitting, LTSV, and JSON arrays of flat objects. All of
//! them run behind the same narrow contract: bytes in, a [`DecodedTable`]
//! out. The text-encoding seam (BOM sniffing, UTF-8/UTF-16 variants) also
//! lives here.

use crate::core::{Error, Result, Value};
use crate::executor::context::ExecutionContext;

use super::config::{Format, LineBreak, TextEncoding};

/// Column-name prefix assigned when a source has no header line
const NO_HEADER_COLUMN_PREFIX: &str = "c";

/// What the codec hands back to the loader
#[derive(Debug, Clone)]
pub struct DecodedTable {
    pub columns: Vec<String>,
    pub records: Vec<Vec<Value>>,
    /// Line break style observed in the source, preserved on write-back
    pub line_break: LineBreak,
    /// Encoding observed in the source (BOM sniffing resolves Auto)
    pub encoding: TextEncoding,
}

/// Decode parameters, a narrowed view over the import option group
#[derive(Debug, Clone)]
pub struct DecodeOptions<'a> {
    pub format: Format,
    pub delimiter: char,
    pub delimiter_positions: Option<&'a [usize]>,
    pub single_line: bool,
    pub json_query: &'a str,
    pub encoding: TextEncoding,
    pub no_header: bool,
    pub without_null: bool,
}

/// Decode raw file bytes into a table
pub fn decode_table(
    ctx: &ExecutionContext,
    bytes: &[u8],
    opts: &DecodeOptions<'_>,
) -> Result<DecodedTable> {
    let (text, encoding) = decode_text(bytes, opts.encoding)?;
    let line_break = detect_line_break(&text);

    let mut table = match opts.format {
        Format::Csv => decode_csv(ctx, &text, opts.delimiter, opts)?,
        Format::Tsv => decode_csv(ctx, &text, '\t', opts)?,
        Format::Fixed => decode_fixed(ctx, &text, opts)?,
        Format::Ltsv => decode_ltsv(ctx, &text, opts)?,
        Format::Json => decode_json(ctx, &text, opts)?,
        other => {
            return Err(Error::DataEncoding(format!(
                "{} is not an importable format",
                other.as_str()
            )))
        }
    };
    table.line_break = line_break;
    table.encoding = encoding;
    Ok(table)
}

// ============================================================================
// Text encoding seam
// ============================================================================

/// Decode bytes into text. `Auto` sniffs the byte order mark and falls back
/// to UTF-8; explicit encodings are enforced.
pub fn decode_text(bytes: &[u8], encoding: TextEncoding) -> Result<(String, TextEncoding)> {
    match encoding {
        TextEncoding::Auto => {
            if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
                Ok((utf8(&bytes[3..])?, TextEncoding::Utf8m))
            } else if bytes.starts_with(&[0xFE, 0xFF]) {
                Ok((utf16(&bytes[2..], true)?, TextEncoding::Utf16bem))
            } else if bytes.starts_with(&[0xFF, 0xFE]) {
                Ok((utf16(&bytes[2..], false)?, TextEncoding::Utf16lem))
            } else {
                Ok((utf8(bytes)?, TextEncoding::Utf8))
            }
        }
        TextEncoding::Utf8 => Ok((utf8(bytes)?, TextEncoding::Utf8)),
        TextEncoding::Utf8m => {
            let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(bytes);
            Ok((utf8(body)?, TextEncoding::Utf8m))
        }
        TextEncoding::Utf16 | TextEncoding::Utf16bem => {
            if bytes.starts_with(&[0xFF, 0xFE]) {
                Ok((utf16(&bytes[2..], false)?, TextEncoding::Utf16lem))
            } else {
                let body = bytes.strip_prefix(&[0xFE, 0xFF][..]).unwrap_or(bytes);
                Ok((utf16(body, true)?, TextEncoding::Utf16bem))
            }
        }
        TextEncoding::Utf16be => Ok((utf16(bytes, true)?, TextEncoding::Utf16be)),
        TextEncoding::Utf16le => Ok((utf16(bytes, false)?, TextEncoding::Utf16le)),
        TextEncoding::Utf16lem => {
            let body = bytes.strip_prefix(&[0xFF, 0xFE][..]).unwrap_or(bytes);
            Ok((utf16(body, false)?, TextEncoding::Utf16lem))
        }
        TextEncoding::Sjis => Err(Error::DataEncoding(
            "SJIS transcoding is provided by an external codec".to_string(),
        )),
    }
}

/// Encode text for write-back in the requested encoding
pub fn encode_text(s: &str, encoding: TextEncoding) -> Result<Vec<u8>> {
    match encoding {
        TextEncoding::Auto => Err(Error::Encoding(
            "AUTO is not a writable encoding".to_string(),
        )),
        TextEncoding::Utf8 => Ok(s.as_bytes().to_vec()),
        TextEncoding::Utf8m => {
            let mut out = vec![0xEF, 0xBB, 0xBF];
            out.extend_from_slice(s.as_bytes());
            Ok(out)
        }
        TextEncoding::Utf16 | TextEncoding::Utf16bem => {
            let mut out = vec![0xFE, 0xFF];
            write_utf16(s, true, &mut out);
            Ok(out)
        }
        TextEncoding::Utf16be => {
            let mut out = Vec::new();
            write_utf16(s, true, &mut out);
            Ok(out)
        }
        TextEncoding::Utf16le => {
            let mut out = Vec::new();
            write_utf16(s, false, &mut out);
            Ok(out)
        }
        TextEncoding::Utf16lem => {
            let mut out = vec![0xFF, 0xFE];
            write_utf16(s, false, &mut out);
            Ok(out)
        }
        TextEncoding::Sjis => Err(Error::DataEncoding(
            "SJIS transcoding is provided by an external codec".to_string(),
        )),
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::Encoding(format!("invalid UTF-8: {}", e)))
}

fn utf16(bytes: &[u8], big_endian: bool) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Encoding("odd UTF-16 byte length".to_string()));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16(&units).map_err(|e| Error::Encoding(format!("invalid UTF-16: {}", e)))
}

fn write_utf16(s: &str, big_endian: bool, out: &mut Vec<u8>) {
    for unit in s.encode_utf16() {
        let pair = if big_endian {
            unit.to_be_bytes()
        } else {
            unit.to_le_bytes()
        };
        out.extend_from_slice(&pair);
    }
}

/// Line break style of the first break in the text; LF when none is found
pub fn detect_line_break(text: &str) -> LineBreak {
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\n' => return LineBreak::Lf,
            b'\r' => {
                return if bytes.get(i + 1) == Some(&b'\n') {
                    LineBreak::Crlf
                } else {
                    LineBreak::Cr
                }
            }
            _ => {}
        }
    }
    LineBreak::Lf
}

// ============================================================================
// CSV / TSV
// ============================================================================

#[derive(Debug)]
struct CsvField {
    text: String,
    quoted: bool,
}

/// Parse RFC 4180 records: quoted fields may hold the delimiter, line
/// breaks, and doubled quotes. An unquoted empty field reads as Null unless
/// WITHOUT_NULL is set.
fn decode_csv(
    ctx: &ExecutionContext,
    text: &str,
    delimiter: char,
    opts: &DecodeOptions<'_>,
) -> Result<DecodedTable> {
    let mut rows: Vec<Vec<CsvField>> = Vec::new();
    let mut row: Vec<CsvField> = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quote = false;

    let mut chars = text.chars().peekable();
    let mut row_count: usize = 0;
    while let Some(c) = chars.next() {
        if in_quote {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quote = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }
        match c {
            '"' if field.is_empty() && !quoted => {
                in_quote = true;
                quoted = true;
            }
            c if c == delimiter => {
                row.push(CsvField {
                    text: std::mem::take(&mut field),
                    quoted,
                });
                quoted = false;
            }
            '\r' | '\n' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                if !(row.is_empty() && field.is_empty() && !quoted) {
                    row.push(CsvField {
                        text: std::mem::take(&mut field),
                        quoted,
                    });
                    quoted = false;
                    rows.push(std::mem::take(&mut row));
                    ctx.check_at(row_count)?;
                    row_count += 1;
                }
            }
            _ => field.push(c),
        }
    }
    if in_quote {
        return Err(Error::DataEncoding("unterminated quoted field".to_string()));
    }
    if !(row.is_empty() && field.is_empty() && !quoted) {
        row.push(CsvField { text: field, quoted });
        rows.push(row);
    }

    let mut iter = rows.into_iter();
    let columns = if opts.no_header {
        Vec::new()
    } else {
        match iter.next() {
            Some(header) => header.into_iter().map(|f| f.text).collect(),
            None => return Err(Error::DataEncoding("the file is empty".to_string())),
        }
    };

    let mut records: Vec<Vec<Value>> = Vec::new();
    let mut width = columns.len();
    for fields in iter {
        width = width.max(fields.len());
        let values = fields
            .into_iter()
            .map(|f| {
                if f.text.is_empty() && !f.quoted && !opts.without_null {
                    Value::Null
                } else {
                    Value::string(f.text)
                }
            })
            .collect();
        records.push(values);
    }

    let columns = if opts.no_header {
        generated_columns(width)
    } else {
        columns
    };
    pad_records(&mut records, columns.len(), opts.without_null);
    Ok(plain_table(columns, records))
}

// ============================================================================
// Fixed-length
// ============================================================================

fn decode_fixed(
    ctx: &ExecutionContext,
    text: &str,
    opts: &DecodeOptions<'_>,
) -> Result<DecodedTable> {
    let rows: Vec<Vec<Option<String>>> = match opts.delimiter_positions {
        Some(positions) => {
            if opts.single_line {
                let width = positions.last().copied().unwrap_or(0);
                if width == 0 {
                    return Err(Error::DataEncoding(
                        "delimiter positions are empty".to_string(),
                    ));
                }
                let bytes = text.as_bytes();
                let mut rows = Vec::new();
                let mut start = 0;
                while start < bytes.len() {
                    let end = (start + width).min(bytes.len());
                    rows.push(slice_fixed_fields(&text[start..end], positions)?);
                    ctx.check_at(rows.len())?;
                    start = end;
                }
                rows
            } else {
                let mut rows = Vec::new();
                for (i, line) in lines_of(text).enumerate() {
                    ctx.check_at(i)?;
                    rows.push(slice_fixed_fields(line, positions)?);
                }
                rows
            }
        }
        None => {
            // SPACES: fields delimited by whitespace runs
            let mut rows = Vec::new();
            for (i, line) in lines_of(text).enumerate() {
                ctx.check_at(i)?;
                rows.push(
                    line.split_whitespace()
                        .map(|s| Some(s.to_string()))
                        .collect(),
                );
            }
            rows
        }
    };

    table_from_string_rows(rows, opts)
}

fn slice_fixed_fields(line: &str, positions: &[usize]) -> Result<Vec<Option<String>>> {
    let bytes = line.as_bytes();
    let mut fields = Vec::with_capacity(positions.len());
    let mut prev = 0usize;
    for &pos in positions {
        if pos < prev {
            return Err(Error::DataEncoding(
                "delimiter positions must not be decreasing".to_string(),
            ));
        }
        let start = prev.min(bytes.len());
        let end = pos.min(bytes.len());
        let raw = std::str::from_utf8(&bytes[start..end])
            .map_err(|_| Error::DataEncoding("fixed-length field splits a character".to_string()))?;
        let trimmed = raw.trim();
        fields.push(if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        });
        prev = pos;
    }
    Ok(fields)
}

// ============================================================================
// LTSV
// ============================================================================

fn decode_ltsv(
    ctx: &ExecutionContext,
    text: &str,
    opts: &DecodeOptions<'_>,
) -> Result<DecodedTable> {
    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<(String, String)>> = Vec::new();

    for (i, line) in lines_of(text).enumerate() {
        ctx.check_at(i)?;
        let mut row = Vec::new();
        for pair in line.split('\t') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once(':').ok_or_else(|| {
                Error::DataEncoding(format!("missing field separator in '{}'", pair))
            })?;
            if !columns.iter().any(|c| c == key) {
                columns.push(key.to_string());
            }
            row.push((key.to_string(), value.to_string()));
        }
        rows.push(row);
    }

    let records = rows
        .into_iter()
        .map(|row| {
            columns
                .iter()
                .map(|col| {
                    match row.iter().find(|(k, _)| k == col) {
                        Some((_, v)) if !v.is_empty() || opts.without_null => {
                            Value::string(v.clone())
                        }
                        _ => {
                            if opts.without_null {
                                Value::string("")
                            } else {
                                Value::Null
                            }
                        }
                    }
                })
                .collect()
        })
        .collect();

    Ok(plain_table(columns, records))
}

// ============================================================================
// JSON
// ============================================================================

fn decode_json(
    ctx: &ExecutionContext,
    text: &str,
    opts: &DecodeOptions<'_>,
) -> Result<DecodedTable> {
    if !opts.json_query.is_empty() {
        return Err(Error::DataEncoding(
            "json queries are resolved by an external codec".to_string(),
        ));
    }
    let parsed: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::DataEncoding(format!("invalid JSON: {}", e)))?;
    let array = parsed
        .as_array()
        .ok_or_else(|| Error::DataEncoding("JSON table must be an array of objects".to_string()))?;

    let mut columns: Vec<String> = Vec::new();
    let mut objects = Vec::with_capacity(array.len());
    for (i, item) in array.iter().enumerate() {
        ctx.check_at(i)?;
        let obj = item.as_object().ok_or_else(|| {
            Error::DataEncoding("JSON table must be an array of objects".to_string())
        })?;
        for key in obj.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
        objects.push(obj);
    }

    let records = objects
        .into_iter()
        .map(|obj| {
            columns
                .iter()
                .map(|col| match obj.get(col) {
                    None | Some(serde_json::Value::Null) => Value::Null,
                    Some(serde_json::Value::Bool(b)) => Value::Boolean(*b),
                    Some(serde_json::Value::Number(n)) => {
                        if let Some(i) = n.as_i64() {
                            Value::Integer(i)
                        } else {
                            Value::Float(n.as_f64().unwrap_or(f64::NAN))
                        }
                    }
                    Some(serde_json::Value::String(s)) => Value::string(s.clone()),
                    Some(other) => Value::string(other.to_string()),
                })
                .collect()
        })
        .collect();

    Ok(plain_table(columns, records))
}

// ============================================================================
// Shared helpers
// ============================================================================

fn lines_of(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\r', '\n']).filter(|l| !l.is_empty())
}

fn generated_columns(width: usize) -> Vec<String> {
    (1..=width)
        .map(|i| format!("{}{}", NO_HEADER_COLUMN_PREFIX, i))
        .collect()
}

fn table_from_string_rows(
    rows: Vec<Vec<Option<String>>>,
    opts: &DecodeOptions<'_>,
) -> Result<DecodedTable> {
    let mut iter = rows.into_iter();
    let columns = if opts.no_header {
        Vec::new()
    } else {
        match iter.next() {
            Some(header) => header
                .into_iter()
                .map(|f| f.unwrap_or_default())
                .collect(),
            None => return Err(Error::DataEncoding("the file is empty".to_string())),
        }
    };

    let mut width = columns.len();
    let mut records: Vec<Vec<Value>> = Vec::new();
    for fields in iter {
        width = width.max(fields.len());
        records.push(
            fields
                .into_iter()
                .map(|f| match f {
                    Some(s) => Value::string(s),
                    None => {
                        if opts.without_null {
                            Value::string("")
                        } else {
                            Value::Null
                        }
                    }
                })
                .collect(),
        );
    }

    let columns = if opts.no_header {
        generated_columns(width)
    } else {
        columns
    };
    pad_records(&mut records, columns.len(), opts.without_null);
    Ok(plain_table(columns, records))
}

fn pad_records(records: &mut [Vec<Value>], width: usize, without_null: bool) {
    for record in records.iter_mut() {
        while record.len() < width {
            record.push(if without_null {
                Value::string("")
            } else {
                Value::Null
            });
        }
        record.truncate(width);
    }
}

fn plain_table(columns: Vec<String>, records: Vec<Vec<Value>>) -> DecodedTable {
    DecodedTable {
        columns,
        records,
        line_break: LineBreak::Lf,
        encoding: TextEncoding::Utf8,
    }
}

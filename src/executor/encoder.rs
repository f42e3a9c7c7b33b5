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

//! View encoding
//!
//! Renders a view into each output format: CSV/TSV with per-field quoting,
//! fixed-length with measured or explicit positions, JSON with three escape
//! styles and optional colored pretty-printing, LTSV, and GFM/Org/plain
//! text tables. Every record loop checks cancellation once per 16 rows.

use crate::core::{value::format_float, Error, Result, Value};
use crate::storage::config::{ExportOptions, Format, JsonEscapeType};

use super::context::ExecutionContext;
use super::view::View;

// ============================================================================
// Palette
// ============================================================================

/// Display effects attached to rendered fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Str,
    Number,
    Boolean,
    Ternary,
    Datetime,
    Null,
    Key,
}

/// ANSI color palette; rendering is a no-op while disabled
#[derive(Debug, Clone, Default)]
pub struct Palette {
    pub enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Palette {
        Palette { enabled }
    }

    pub fn render(&self, effect: Effect, text: &str) -> String {
        if !self.enabled || text.is_empty() {
            return text.to_string();
        }
        let code = match effect {
            Effect::None => return text.to_string(),
            Effect::Str => "32",      // green
            Effect::Number => "35",   // magenta
            Effect::Boolean => "33",  // yellow
            Effect::Ternary => "33",
            Effect::Datetime => "36", // cyan
            Effect::Null => "90",     // bright black
            Effect::Key => "34",      // blue
        };
        format!("\x1b[{}m{}\x1b[0m", code, text)
    }
}

/// Horizontal alignment of a rendered field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    NotAligned,
    Center,
    Right,
}

/// Render a value for output: its string form, palette effect, and table
/// alignment. Text tables show NULL and UNKNOWN literally; data formats
/// leave them empty.
pub fn convert_field_contents(value: &Value, for_text_table: bool) -> (String, Effect, Alignment) {
    match value {
        Value::String(s) => (s.to_string(), Effect::Str, Alignment::NotAligned),
        Value::Integer(i) => (i.to_string(), Effect::Number, Alignment::Right),
        Value::Float(f) => (format_float(*f), Effect::Number, Alignment::Right),
        Value::Boolean(b) => (b.to_string(), Effect::Boolean, Alignment::Center),
        Value::Ternary(t) => {
            if for_text_table {
                (t.to_string(), Effect::Ternary, Alignment::Center)
            } else {
                match t.as_bool() {
                    Some(b) => (b.to_string(), Effect::Boolean, Alignment::Center),
                    None => (String::new(), Effect::None, Alignment::NotAligned),
                }
            }
        }
        Value::Datetime(dt) => (
            dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            Effect::Datetime,
            Alignment::NotAligned,
        ),
        Value::Null => {
            if for_text_table {
                ("NULL".to_string(), Effect::Null, Alignment::Center)
            } else {
                (String::new(), Effect::None, Alignment::NotAligned)
            }
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Encode a view with the palette disabled; used for write-back and tests
pub fn encode_view_to_string(
    ctx: &ExecutionContext,
    view: &View,
    options: &ExportOptions,
) -> Result<String> {
    encode_view(ctx, view, options, &Palette::default())
}

/// Encode a view into its textual output form
pub fn encode_view(
    ctx: &ExecutionContext,
    view: &View,
    options: &ExportOptions,
    palette: &Palette,
) -> Result<String> {
    let mut text = match options.format {
        Format::Fixed => encode_fixed(ctx, view, options)?,
        Format::Json => encode_json(ctx, view, options, palette)?,
        Format::Ltsv => encode_ltsv(ctx, view, options)?,
        Format::Gfm | Format::Org | Format::Text => encode_table(ctx, view, options, palette)?,
        Format::Tsv => {
            let mut opts = options.clone();
            opts.delimiter = '\t';
            encode_csv(ctx, view, &opts)?
        }
        Format::Csv => encode_csv(ctx, view, options)?,
    };

    if options.strip_ending_line_break {
        while text.ends_with(options.line_break.as_str()) {
            text.truncate(text.len() - options.line_break.as_str().len());
        }
    }
    Ok(text)
}

// ============================================================================
// CSV / TSV
// ============================================================================

fn encode_csv(ctx: &ExecutionContext, view: &View, options: &ExportOptions) -> Result<String> {
    let lb = options.line_break.as_str();
    let mut out = String::new();

    if !options.without_header {
        let fields: Vec<String> = view
            .header
            .output_names()
            .iter()
            .map(|name| csv_field(name, options.enclose_all, options.delimiter))
            .collect();
        out.push_str(&fields.join(&options.delimiter.to_string()));
        out.push_str(lb);
    } else if view.record_len() < 1 {
        return Err(Error::DataEmpty);
    }

    for (i, record) in view.record_set.iter().enumerate() {
        ctx.check_at(i)?;
        let mut fields = Vec::with_capacity(record.len());
        for cell in record.cells() {
            let (s, effect, _) = convert_field_contents(cell.value(), false);
            let quote = options.enclose_all
                && (effect == Effect::Str || effect == Effect::Datetime);
            fields.push(csv_field(&s, quote, options.delimiter));
        }
        out.push_str(&fields.join(&options.delimiter.to_string()));
        out.push_str(lb);
    }
    Ok(out)
}

fn csv_field(s: &str, quote: bool, delimiter: char) -> String {
    let needs_quote =
        quote || s.contains(delimiter) || s.contains('"') || s.contains('\n') || s.contains('\r');
    if needs_quote {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

// ============================================================================
// Fixed-length
// ============================================================================

fn encode_fixed(ctx: &ExecutionContext, view: &View, options: &ExportOptions) -> Result<String> {
    let field_len = view.field_len();
    let header_row: Option<Vec<String>> = if options.without_header {
        if view.record_len() < 1 {
            return Err(Error::DataEmpty);
        }
        None
    } else {
        Some(view.header.output_names())
    };

    let mut rows: Vec<Vec<(String, Alignment)>> = Vec::with_capacity(view.record_len());
    for (i, record) in view.record_set.iter().enumerate() {
        ctx.check_at(i)?;
        rows.push(
            record
                .cells()
                .iter()
                .map(|c| {
                    let (s, _, a) = convert_field_contents(c.value(), false);
                    (s, a)
                })
                .collect(),
        );
    }

    // Measure when no explicit positions are configured
    let widths: Vec<usize> = match &options.delimiter_positions {
        Some(positions) => {
            let mut widths = Vec::with_capacity(positions.len());
            let mut prev = 0usize;
            for &p in positions {
                widths.push(p.saturating_sub(prev));
                prev = p;
            }
            widths
        }
        None => {
            let mut widths = vec![0usize; field_len];
            if let Some(header) = &header_row {
                for (j, name) in header.iter().enumerate() {
                    widths[j] = widths[j].max(measure(name, options));
                }
            }
            for row in &rows {
                for (j, (s, _)) in row.iter().enumerate() {
                    if j < field_len {
                        widths[j] = widths[j].max(measure(s, options));
                    }
                }
            }
            widths
        }
    };

    let lb = options.line_break.as_str();
    let mut out = String::new();

    let write_header = header_row.is_some() && !(options.single_line);
    if write_header {
        let header = header_row.as_ref().expect("checked above");
        let fields: Vec<String> = header
            .iter()
            .enumerate()
            .map(|(j, name)| pad(name, widths.get(j).copied().unwrap_or(0), Alignment::NotAligned, options))
            .collect();
        out.push_str(&fields.concat());
        out.push_str(lb);
    }

    for (i, row) in rows.iter().enumerate() {
        ctx.check_at(i)?;
        let fields: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(j, (s, a))| pad(s, widths.get(j).copied().unwrap_or(0), *a, options))
            .collect();
        out.push_str(&fields.concat());
        if !options.single_line {
            out.push_str(lb);
        }
    }
    Ok(out)
}

// ============================================================================
// JSON
// ============================================================================

fn encode_json(
    ctx: &ExecutionContext,
    view: &View,
    options: &ExportOptions,
    palette: &Palette,
) -> Result<String> {
    let names = view.header.output_names();
    let color = options.pretty_print && palette.enabled;
    let palette = if color { palette.clone() } else { Palette::default() };

    let mut out = String::new();
    out.push('[');
    let lb = options.line_break.as_str();

    for (i, record) in view.record_set.iter().enumerate() {
        ctx.check_at(i)?;
        if i > 0 {
            out.push(',');
        }
        if options.pretty_print {
            out.push_str(lb);
            out.push_str("  ");
        }
        out.push('{');
        for (j, name) in names.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            if options.pretty_print {
                out.push_str(lb);
                out.push_str("    ");
            }
            let key = format!("\"{}\"", escape_json_string(name, options.json_escape));
            out.push_str(&palette.render(Effect::Key, &key));
            out.push(':');
            if options.pretty_print {
                out.push(' ');
            }
            out.push_str(&json_value(record[j].value(), options.json_escape, &palette));
        }
        if options.pretty_print {
            out.push_str(lb);
            out.push_str("  ");
        }
        out.push('}');
    }

    if options.pretty_print && !view.record_set.is_empty() {
        out.push_str(lb);
    }
    out.push(']');
    Ok(out)
}

fn json_value(value: &Value, escape: JsonEscapeType, palette: &Palette) -> String {
    match value {
        Value::Null => palette.render(Effect::Null, "null"),
        Value::Integer(i) => palette.render(Effect::Number, &i.to_string()),
        Value::Float(f) => {
            if f.is_finite() {
                palette.render(Effect::Number, &format_float(*f))
            } else {
                palette.render(Effect::Null, "null")
            }
        }
        Value::Boolean(b) => palette.render(Effect::Boolean, &b.to_string()),
        Value::Ternary(t) => match t.as_bool() {
            Some(b) => palette.render(Effect::Boolean, &b.to_string()),
            None => palette.render(Effect::Null, "null"),
        },
        Value::Datetime(dt) => {
            let s = dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true);
            palette.render(
                Effect::Str,
                &format!("\"{}\"", escape_json_string(&s, escape)),
            )
        }
        Value::String(s) => palette.render(
            Effect::Str,
            &format!("\"{}\"", escape_json_string(s, escape)),
        ),
    }
}

/// Escape a JSON string body per the configured style: BACKSLASH uses the
/// conventional short escapes, HEX escapes specials as \u00XX, HEXALL
/// additionally escapes every non-ASCII character.
fn escape_json_string(s: &str, escape: JsonEscapeType) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match escape {
            JsonEscapeType::Backslash => match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '\u{08}' => out.push_str("\\b"),
                '\u{0C}' => out.push_str("\\f"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            },
            JsonEscapeType::Hex => match c {
                '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0C}' => {
                    out.push_str(&format!("\\u{:04x}", c as u32))
                }
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            },
            JsonEscapeType::HexAll => {
                let cp = c as u32;
                if cp < 0x20 || c == '"' || c == '\\' || cp > 0x7E {
                    if cp > 0xFFFF {
                        let mut buf = [0u16; 2];
                        for unit in c.encode_utf16(&mut buf).iter() {
                            out.push_str(&format!("\\u{:04x}", unit));
                        }
                    } else {
                        out.push_str(&format!("\\u{:04x}", cp));
                    }
                } else {
                    out.push(c);
                }
            }
        }
    }
    out
}

// ============================================================================
// LTSV
// ============================================================================

fn encode_ltsv(ctx: &ExecutionContext, view: &View, options: &ExportOptions) -> Result<String> {
    if view.record_len() < 1 {
        return Err(Error::DataEmpty);
    }
    let names = view.header.output_names();
    let lb = options.line_break.as_str();
    let mut out = String::new();
    for (i, record) in view.record_set.iter().enumerate() {
        ctx.check_at(i)?;
        let mut fields = Vec::with_capacity(names.len());
        for (j, name) in names.iter().enumerate() {
            let (s, _, _) = convert_field_contents(record[j].value(), false);
            fields.push(format!("{}:{}", name, s));
        }
        out.push_str(&fields.join("\t"));
        out.push_str(lb);
    }
    Ok(out)
}

// ============================================================================
// GFM / ORG / TEXT tables
// ============================================================================

fn encode_table(
    ctx: &ExecutionContext,
    view: &View,
    options: &ExportOptions,
    palette: &Palette,
) -> Result<String> {
    let is_plain_table = options.format == Format::Text;
    if is_plain_table {
        if view.field_len() < 1 {
            return Err(Error::EmptyResultSet);
        }
        if view.record_len() < 1 {
            return Err(Error::EmptyResultSet);
        }
    } else if options.without_header && view.record_len() < 1 {
        return Err(Error::DataEmpty);
    }

    let field_len = view.field_len();
    let names = view.header.output_names();

    // Render all cells; remember each column's alignment from row 0
    let mut aligns = vec![Alignment::NotAligned; field_len];
    let mut rows: Vec<Vec<(String, Effect)>> = Vec::with_capacity(view.record_len());
    for (i, record) in view.record_set.iter().enumerate() {
        ctx.check_at(i)?;
        let mut row = Vec::with_capacity(field_len);
        for j in 0..field_len {
            let (s, effect, align) = convert_field_contents(record[j].value(), is_plain_table);
            if i == 0 {
                aligns[j] = align;
            }
            row.push((s, effect));
        }
        rows.push(row);
    }

    let mut widths = vec![0usize; field_len];
    if !options.without_header {
        for (j, name) in names.iter().enumerate() {
            widths[j] = widths[j].max(measure(name, options));
        }
    }
    for row in &rows {
        for (j, (s, _)) in row.iter().enumerate() {
            let line_width = s
                .split(['\r', '\n'])
                .map(|l| measure(l, options))
                .max()
                .unwrap_or(0);
            widths[j] = widths[j].max(line_width);
        }
    }
    for w in widths.iter_mut() {
        *w = (*w).max(1);
    }

    let lb = options.line_break.as_str();
    let mut out = String::new();

    match options.format {
        Format::Gfm => {
            if !options.without_header {
                write_pipe_row(&mut out, &names, &widths, lb);
            }
            let separators: Vec<String> = widths
                .iter()
                .zip(&aligns)
                .map(|(w, a)| match a {
                    Alignment::Right => format!("{}:", "-".repeat((*w + 1).max(3))),
                    Alignment::Center => format!(":{}:", "-".repeat((*w).max(3))),
                    Alignment::NotAligned => "-".repeat(*w + 2),
                })
                .collect();
            out.push_str(&format!("|{}|{}", separators.join("|"), lb));
            for (i, row) in rows.iter().enumerate() {
                ctx.check_at(i)?;
                let cells: Vec<String> = row.iter().map(|(s, _)| s.clone()).collect();
                write_pipe_row(&mut out, &cells, &widths, lb);
            }
        }
        Format::Org => {
            if !options.without_header {
                write_pipe_row(&mut out, &names, &widths, lb);
            }
            let separators: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
            out.push_str(&format!("|{}|{}", separators.join("+"), lb));
            for (i, row) in rows.iter().enumerate() {
                ctx.check_at(i)?;
                let cells: Vec<String> = row.iter().map(|(s, _)| s.clone()).collect();
                write_pipe_row(&mut out, &cells, &widths, lb);
            }
        }
        _ => {
            // Plain text: bordered table with colored, line-split fields
            let border: String = {
                let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
                format!("+{}+{}", dashes.join("+"), lb)
            };
            out.push_str(&border);
            if !options.without_header {
                let fields: Vec<String> = names
                    .iter()
                    .enumerate()
                    .map(|(j, name)| center(name, widths[j]))
                    .collect();
                out.push_str(&format!("| {} |{}", fields.join(" | "), lb));
                out.push_str(&border);
            }
            for (i, row) in rows.iter().enumerate() {
                ctx.check_at(i)?;
                let fields: Vec<String> = row
                    .iter()
                    .enumerate()
                    .map(|(j, (s, effect))| {
                        let padded = pad_plain(s, widths[j], aligns[j], options);
                        color_lines(&padded, *effect, palette)
                    })
                    .collect();
                out.push_str(&format!("| {} |{}", fields.join(" | "), lb));
            }
            out.push_str(&border);
        }
    }
    Ok(out)
}

fn write_pipe_row(out: &mut String, cells: &[String], widths: &[usize], lb: &str) {
    let fields: Vec<String> = cells
        .iter()
        .enumerate()
        .map(|(j, s)| {
            let w = widths.get(j).copied().unwrap_or(0);
            let pad_width = w.saturating_sub(display_width_plain(s));
            format!("{}{}", s.replace('|', "\\|"), " ".repeat(pad_width))
        })
        .collect();
    out.push_str(&format!("| {} |{}", fields.join(" | "), lb));
}

/// Apply the palette per line so color codes never cross line boundaries
fn color_lines(s: &str, effect: Effect, palette: &Palette) -> String {
    if !palette.enabled {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut line = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                if !line.is_empty() {
                    out.push_str(&palette.render(effect, &line));
                    line.clear();
                }
                out.push('\n');
            }
            '\n' => {
                if !line.is_empty() {
                    out.push_str(&palette.render(effect, &line));
                    line.clear();
                }
                out.push('\n');
            }
            c => line.push(c),
        }
    }
    if !line.is_empty() {
        out.push_str(&palette.render(effect, &line));
    }
    out
}

// ============================================================================
// Width measurement
// ============================================================================

/// Display width honoring the East Asian width options
fn measure(s: &str, options: &ExportOptions) -> usize {
    s.chars()
        .map(|c| char_width(c, options))
        .sum()
}

fn display_width_plain(s: &str) -> usize {
    measure(s, &ExportOptions::default())
}

fn char_width(c: char, options: &ExportOptions) -> usize {
    let cp = c as u32;
    if is_combining(cp) {
        return if options.count_diacritical_sign { 1 } else { 0 };
    }
    if is_format_code(cp) {
        return if options.count_format_code { 1 } else { 0 };
    }
    if cp < 0x20 {
        return 0;
    }
    if is_wide(cp) {
        return 2;
    }
    if options.east_asian_encoding && is_ambiguous(cp) {
        return 2;
    }
    1
}

fn is_wide(cp: u32) -> bool {
    matches!(cp,
        0x1100..=0x115F
        | 0x2E80..=0x303E
        | 0x3041..=0x33FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xA000..=0xA4CF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFE30..=0xFE4F
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6
        | 0x1F300..=0x1F64F
        | 0x20000..=0x2FFFD
        | 0x30000..=0x3FFFD)
}

fn is_combining(cp: u32) -> bool {
    matches!(cp, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

fn is_format_code(cp: u32) -> bool {
    matches!(cp, 0x200B..=0x200F | 0x202A..=0x202E | 0x2060 | 0xFEFF)
}

fn is_ambiguous(cp: u32) -> bool {
    matches!(cp,
        0x00A1 | 0x00A4 | 0x00A7..=0x00A8 | 0x00AA | 0x00B0..=0x00B4 | 0x00B6..=0x00BA
        | 0x00D7 | 0x00F7
        | 0x0370..=0x03FF
        | 0x0400..=0x04FF
        | 0x2010..=0x2027
        | 0x2500..=0x257F
        | 0x25A0..=0x25FF)
}

fn pad(s: &str, width: usize, align: Alignment, options: &ExportOptions) -> String {
    let w = measure(s, options);
    if w >= width {
        return s.to_string();
    }
    let fill = width - w;
    match align {
        Alignment::Right => format!("{}{}", " ".repeat(fill), s),
        Alignment::Center => center(s, width),
        Alignment::NotAligned => format!("{}{}", s, " ".repeat(fill)),
    }
}

fn pad_plain(s: &str, width: usize, align: Alignment, options: &ExportOptions) -> String {
    // Multi-line fields pad their widest line only
    if s.contains(['\r', '\n']) {
        return s.to_string();
    }
    pad(s, width, align, options)
}

fn center(s: &str, width: usize) -> String {
    let w = display_width_plain(s);
    if w >= width {
        return s.to_string();
    }
    let fill = width - w;
    let left = fill / 2;
    format!("{}{}{}", " ".repeat(left), s, " ".repeat(fill - left))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext::background()
    }

    fn users_view() -> View {
        View::from_rows(
            Some("users"),
            &["id", "name"],
            vec![
                vec![Value::Integer(1), Value::string("Alice")],
                vec![Value::Integer(2), Value::Null],
            ],
        )
    }

    #[test]
    fn csv_output_with_nulls() {
        let options = ExportOptions {
            format: Format::Csv,
            ..Default::default()
        };
        let s = encode_view_to_string(&ctx(), &users_view(), &options).unwrap();
        assert_eq!(s, "id,name\n1,Alice\n2,\n");
    }

    #[test]
    fn enclose_all_quotes_strings_only() {
        let options = ExportOptions {
            format: Format::Csv,
            enclose_all: true,
            ..Default::default()
        };
        let s = encode_view_to_string(&ctx(), &users_view(), &options).unwrap();
        assert_eq!(s, "\"id\",\"name\"\n1,\"Alice\"\n2,\n");
    }

    #[test]
    fn tsv_forces_tab_delimiter() {
        let options = ExportOptions {
            format: Format::Tsv,
            ..Default::default()
        };
        let s = encode_view_to_string(&ctx(), &users_view(), &options).unwrap();
        assert!(s.starts_with("id\tname\n"));
    }

    #[test]
    fn pretty_json_matches_layout() {
        let view = View::from_rows(
            None,
            &["a", "b"],
            vec![vec![Value::Integer(1), Value::Null]],
        );
        let options = ExportOptions {
            format: Format::Json,
            pretty_print: true,
            ..Default::default()
        };
        let s = encode_view_to_string(&ctx(), &view, &options).unwrap();
        assert_eq!(s, "[\n  {\n    \"a\": 1,\n    \"b\": null\n  }\n]");
    }

    #[test]
    fn compact_json() {
        let view = View::from_rows(
            None,
            &["a"],
            vec![vec![Value::string("x\"y")]],
        );
        let options = ExportOptions {
            format: Format::Json,
            ..Default::default()
        };
        let s = encode_view_to_string(&ctx(), &view, &options).unwrap();
        assert_eq!(s, "[{\"a\":\"x\\\"y\"}]");
    }

    #[test]
    fn hexall_escapes_non_ascii() {
        assert_eq!(escape_json_string("é", JsonEscapeType::HexAll), "\\u00e9");
        assert_eq!(escape_json_string("é", JsonEscapeType::Backslash), "é");
    }

    #[test]
    fn ltsv_requires_records() {
        let empty = View::from_rows(None, &["a"], vec![]);
        let options = ExportOptions {
            format: Format::Ltsv,
            ..Default::default()
        };
        assert_eq!(
            encode_view_to_string(&ctx(), &empty, &options),
            Err(Error::DataEmpty)
        );
    }

    #[test]
    fn gfm_alignment_from_first_record() {
        let options = ExportOptions {
            format: Format::Gfm,
            ..Default::default()
        };
        let s = encode_view_to_string(&ctx(), &users_view(), &options).unwrap();
        let lines: Vec<&str> = s.lines().collect();
        assert!(lines[0].starts_with("| id"));
        // Numbers right-align in the separator row
        assert!(lines[1].contains(":"));
    }

    #[test]
    fn text_table_has_borders_and_null_literal() {
        let options = ExportOptions {
            format: Format::Text,
            ..Default::default()
        };
        let s = encode_view_to_string(&ctx(), &users_view(), &options).unwrap();
        assert!(s.starts_with("+----+-------+\n"));
        assert!(s.contains("NULL"));
    }

    #[test]
    fn empty_text_table_is_an_error() {
        let empty = View::from_rows(None, &["a"], vec![]);
        let options = ExportOptions {
            format: Format::Text,
            ..Default::default()
        };
        assert_eq!(
            encode_view_to_string(&ctx(), &empty, &options),
            Err(Error::EmptyResultSet)
        );
    }

    #[test]
    fn wide_characters_measure_double() {
        let options = ExportOptions::default();
        assert_eq!(measure("日本", &options), 4);
        assert_eq!(measure("ab", &options), 2);
    }

    #[test]
    fn strip_ending_line_break() {
        let options = ExportOptions {
            format: Format::Csv,
            strip_ending_line_break: true,
            ..Default::default()
        };
        let s = encode_view_to_string(&ctx(), &users_view(), &options).unwrap();
        assert!(!s.ends_with('\n'));
    }
}

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

//! View headers
//!
//! Column identity inside a query is `(view_alias, column_name)`,
//! case-insensitive. Display uses the alias when present.

use super::error::{Error, Result, SourcePosition};

/// Name of the synthetic column carrying record identity for DML
pub const INTERNAL_ID_COLUMN: &str = "@__internal_id";

/// One column of a view header
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeaderField {
    /// View alias the column belongs to; None for computed columns
    pub view: Option<String>,
    /// Column name as loaded or computed
    pub column: String,
    /// Display alias assigned in the select clause
    pub alias: Option<String>,
    /// Whether the column came from a file or table rather than an expression
    pub is_from_table: bool,
    /// Whether the column is a GROUP BY key
    pub is_group_key: bool,
    /// Whether the column was merged by NATURAL/USING join resolution
    pub is_join_column: bool,
    /// 1-based field number within its source view; 0 for computed columns
    pub number: usize,
}

impl HeaderField {
    /// Name shown in encoder output
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }

    fn matches_name(&self, name: &str) -> bool {
        self.column.eq_ignore_ascii_case(name)
            || self
                .alias
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(name))
    }

    fn matches_view(&self, view: &str) -> bool {
        self.view.as_deref().is_some_and(|v| v.eq_ignore_ascii_case(view))
    }
}

/// Ordered column list of a view
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header(Vec<HeaderField>);

impl Header {
    pub fn new(fields: Vec<HeaderField>) -> Header {
        Header(fields)
    }

    /// Header for a view loaded from a table source
    pub fn from_columns(view: Option<&str>, columns: &[String]) -> Header {
        let fields = columns
            .iter()
            .enumerate()
            .map(|(i, column)| HeaderField {
                view: view.map(str::to_string),
                column: column.clone(),
                alias: None,
                is_from_table: true,
                is_group_key: false,
                is_join_column: false,
                number: i + 1,
            })
            .collect();
        Header(fields)
    }

    /// Same header with the internal-id column prepended
    pub fn with_internal_id(view: Option<&str>) -> Header {
        let mut fields = Vec::new();
        fields.push(HeaderField {
            view: view.map(str::to_string),
            column: INTERNAL_ID_COLUMN.to_string(),
            is_from_table: true,
            ..Default::default()
        });
        Header(fields)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.0
    }

    pub fn get(&self, i: usize) -> &HeaderField {
        &self.0[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut HeaderField {
        &mut self.0[i]
    }

    pub fn push(&mut self, field: HeaderField) {
        self.0.push(field);
    }

    /// Concatenate two headers (join output)
    pub fn merge(left: &Header, right: &Header) -> Header {
        let mut fields = Vec::with_capacity(left.len() + right.len());
        fields.extend_from_slice(&left.0);
        fields.extend_from_slice(&right.0);
        Header(fields)
    }

    /// Index of the internal-id column, when the view carries one
    pub fn internal_id_index(&self) -> Option<usize> {
        self.0.iter().position(|f| f.column == INTERNAL_ID_COLUMN)
    }

    /// Resolve `(view?, column)` case-insensitively. Ambiguity is an error;
    /// internal columns never match a bare name.
    pub fn search(&self, view: Option<&str>, column: &str, pos: SourcePosition) -> Result<usize> {
        let mut found: Option<usize> = None;
        for (i, field) in self.0.iter().enumerate() {
            if field.column == INTERNAL_ID_COLUMN && view.is_none() {
                continue;
            }
            let hit = match view {
                Some(v) => field.matches_view(v) && field.matches_name(column),
                None => field.matches_name(column),
            };
            if hit {
                if let Some(prev) = found {
                    // USING-merged columns resolve to their merged cell
                    if self.0[prev].is_join_column && field.is_join_column {
                        continue;
                    }
                    return Err(Error::FieldAmbiguous {
                        pos,
                        field: qualified_name(view, column),
                    });
                }
                found = Some(i);
            }
        }
        found.ok_or_else(|| Error::FieldNotFound {
            pos,
            field: qualified_name(view, column),
        })
    }

    /// Resolve a field by 1-based number within a view alias
    pub fn search_number(&self, view: &str, number: usize, pos: SourcePosition) -> Result<usize> {
        self.0
            .iter()
            .position(|f| f.is_from_table && f.matches_view(view) && f.number == number)
            .ok_or_else(|| Error::FieldNotFound {
                pos,
                field: format!("{}.{}", view, number),
            })
    }

    /// Column names for table-like output, aliases preferred
    pub fn output_names(&self) -> Vec<String> {
        self.0.iter().map(|f| f.output_name().to_string()).collect()
    }

    /// Whether any field of `view` exists in this header
    pub fn has_view(&self, view: &str) -> bool {
        self.0.iter().any(|f| f.matches_view(view))
    }
}

fn qualified_name(view: Option<&str>, column: &str) -> String {
    match view {
        Some(v) => format!("{}.{}", v, column),
        None => column.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> SourcePosition {
        SourcePosition::default()
    }

    #[test]
    fn search_is_case_insensitive() {
        let h = Header::from_columns(Some("users"), &["Id".into(), "Name".into()]);
        assert_eq!(h.search(None, "id", pos()).unwrap(), 0);
        assert_eq!(h.search(Some("USERS"), "NAME", pos()).unwrap(), 1);
    }

    #[test]
    fn unqualified_ambiguity_is_an_error() {
        let left = Header::from_columns(Some("a"), &["id".into()]);
        let right = Header::from_columns(Some("b"), &["id".into()]);
        let merged = Header::merge(&left, &right);
        assert!(matches!(
            merged.search(None, "id", pos()),
            Err(Error::FieldAmbiguous { .. })
        ));
        assert_eq!(merged.search(Some("b"), "id", pos()).unwrap(), 1);
    }

    #[test]
    fn alias_matches_search() {
        let mut h = Header::from_columns(Some("t"), &["c1".into()]);
        h.get_mut(0).alias = Some("total".into());
        assert_eq!(h.search(None, "TOTAL", pos()).unwrap(), 0);
    }

    #[test]
    fn missing_field_is_an_error() {
        let h = Header::from_columns(Some("t"), &["c1".into()]);
        assert!(matches!(
            h.search(None, "nope", pos()),
            Err(Error::FieldNotFound { .. })
        ));
    }

    #[test]
    fn field_numbers_resolve_within_a_view() {
        let h = Header::from_columns(Some("t"), &["a".into(), "b".into()]);
        assert_eq!(h.search_number("t", 2, pos()).unwrap(), 1);
        assert!(h.search_number("t", 3, pos()).is_err());
        assert!(h.search_number("other", 1, pos()).is_err());
    }

    #[test]
    fn internal_id_hidden_from_bare_search() {
        let mut h = Header::with_internal_id(Some("t"));
        h.push(HeaderField {
            view: Some("t".into()),
            column: "c1".into(),
            is_from_table: true,
            number: 1,
            ..Default::default()
        });
        assert!(h.search(None, INTERNAL_ID_COLUMN, pos()).is_err());
        assert_eq!(h.internal_id_index(), Some(0));
    }
}

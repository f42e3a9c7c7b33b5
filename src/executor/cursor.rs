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

//! Cursors
//!
//! A cursor walks the rows of a materialized view: OPEN evaluates the
//! declared query eagerly (so the row count is known immediately), FETCH
//! moves the position, and running off either end parks the cursor out of
//! range. Pseudo-cursors wrap a pre-computed value list - they are born
//! open, rewindable, and cannot be closed or disposed.

use std::sync::Arc;

use crate::core::{Error, Result, SourcePosition, Ternary, Value};
use crate::parser::ast::SelectQuery;

use super::view::View;

/// Resolved fetch target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTarget {
    Next,
    Prior,
    First,
    Last,
    Absolute(i64),
    Relative(i64),
}

/// One declared cursor
#[derive(Debug, Clone)]
pub struct Cursor {
    query: Option<SelectQuery>,
    view: Option<Arc<View>>,
    /// Current row; -1 before the first fetch, the row count when exhausted
    index: i64,
    fetched: bool,
    is_pseudo: bool,
}

impl Cursor {
    /// A declared, closed cursor
    pub fn declared(query: SelectQuery) -> Cursor {
        Cursor {
            query: Some(query),
            view: None,
            index: -1,
            fetched: false,
            is_pseudo: false,
        }
    }

    /// An open pseudo-cursor over a value list
    pub fn pseudo(values: Vec<Value>) -> Cursor {
        let view = View::from_rows(
            None,
            &["c1"],
            values.into_iter().map(|v| vec![v]).collect(),
        );
        Cursor {
            query: None,
            view: Some(Arc::new(view)),
            index: -1,
            fetched: false,
            is_pseudo: true,
        }
    }

    /// Copy of the declaration, used to materialize the view outside the
    /// scope lock
    pub fn shallow_copy(&self) -> Cursor {
        self.clone()
    }

    pub fn is_pseudo(&self) -> bool {
        self.is_pseudo
    }

    pub fn is_open(&self) -> bool {
        self.view.is_some()
    }

    pub fn query(&self) -> Option<&SelectQuery> {
        self.query.as_ref()
    }

    /// Attach the materialized view; the cursor is positioned before row 0
    pub fn open(&mut self, view: Arc<View>, name: &str, pos: SourcePosition) -> Result<()> {
        if self.is_open() {
            return Err(Error::CursorOpen {
                pos,
                name: name.to_string(),
            });
        }
        self.view = Some(view);
        self.index = -1;
        self.fetched = false;
        Ok(())
    }

    pub fn close(&mut self, name: &str, pos: SourcePosition) -> Result<()> {
        if self.is_pseudo {
            return Err(Error::PseudoCursor {
                pos,
                name: name.to_string(),
            });
        }
        if !self.is_open() {
            return Err(Error::CursorClosed {
                pos,
                name: name.to_string(),
            });
        }
        self.view = None;
        self.index = -1;
        self.fetched = false;
        Ok(())
    }

    /// Move and read. None means NOT FOUND: the target row does not exist
    /// and the cursor is parked out of range.
    pub fn fetch(
        &mut self,
        target: FetchTarget,
        name: &str,
        pos: SourcePosition,
    ) -> Result<Option<Vec<Value>>> {
        let Some(view) = &self.view else {
            return Err(Error::CursorClosed {
                pos,
                name: name.to_string(),
            });
        };
        let len = view.record_len() as i64;
        self.fetched = true;

        let next = match target {
            FetchTarget::Next => self.index + 1,
            FetchTarget::Prior => self.index - 1,
            FetchTarget::First => 0,
            FetchTarget::Last => len - 1,
            FetchTarget::Absolute(n) => n,
            FetchTarget::Relative(n) => self.index + n,
        };

        if next < 0 {
            self.index = -1;
            return Ok(None);
        }
        if next >= len {
            self.index = len;
            return Ok(None);
        }
        self.index = next;

        let record = &view.record_set[next as usize];
        Ok(Some(
            record.cells().iter().map(|c| c.value().clone()).collect(),
        ))
    }

    pub fn count(&self, pos: SourcePosition) -> Result<usize> {
        match &self.view {
            Some(view) => Ok(view.record_len()),
            None => Err(Error::CursorClosed {
                pos,
                name: String::new(),
            }),
        }
    }

    pub fn is_in_range(&self, pos: SourcePosition) -> Result<Ternary> {
        let Some(view) = &self.view else {
            return Err(Error::CursorClosed {
                pos,
                name: String::new(),
            });
        };
        if !self.fetched {
            return Ok(Ternary::Unknown);
        }
        Ok(Ternary::from_bool(
            0 <= self.index && self.index < view.record_len() as i64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> SourcePosition {
        SourcePosition::default()
    }

    fn open_cursor(rows: usize) -> Cursor {
        Cursor::pseudo((0..rows).map(|i| Value::Integer(i as i64)).collect())
    }

    #[test]
    fn fetch_next_walks_then_exhausts() {
        let mut c = open_cursor(2);
        assert_eq!(
            c.fetch(FetchTarget::Next, "c", pos()).unwrap(),
            Some(vec![Value::Integer(0)])
        );
        assert_eq!(
            c.fetch(FetchTarget::Next, "c", pos()).unwrap(),
            Some(vec![Value::Integer(1)])
        );
        assert_eq!(c.fetch(FetchTarget::Next, "c", pos()).unwrap(), None);
        assert_eq!(c.is_in_range(pos()).unwrap(), Ternary::False);
        // Exhausted cursors rewind with PRIOR
        assert_eq!(
            c.fetch(FetchTarget::Prior, "c", pos()).unwrap(),
            Some(vec![Value::Integer(1)])
        );
    }

    #[test]
    fn absolute_out_of_range_parks_the_cursor() {
        let mut c = open_cursor(3);
        assert_eq!(c.fetch(FetchTarget::Absolute(5), "c", pos()).unwrap(), None);
        assert_eq!(c.is_in_range(pos()).unwrap(), Ternary::False);
        assert_eq!(
            c.fetch(FetchTarget::Absolute(1), "c", pos()).unwrap(),
            Some(vec![Value::Integer(1)])
        );
    }

    #[test]
    fn in_range_is_unknown_before_first_fetch() {
        let c = open_cursor(1);
        assert_eq!(c.is_in_range(pos()).unwrap(), Ternary::Unknown);
        assert_eq!(c.count(pos()).unwrap(), 1);
    }

    #[test]
    fn pseudo_cursor_cannot_close() {
        let mut c = open_cursor(1);
        assert!(matches!(
            c.close("c", pos()),
            Err(Error::PseudoCursor { .. })
        ));
    }
}

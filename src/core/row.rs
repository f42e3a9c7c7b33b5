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

//! Cells and records
//!
//! A [`Cell`] is an ordered sequence of values. Length is 1 for ordinary
//! columns; grouping replaces a partition's cells with the partition's value
//! sequence, and USING-merged join columns hold both sources until the name
//! is resolved.

use smallvec::{smallvec, SmallVec};

use super::value::{comparison_key, Value};

/// One field of a record
#[derive(Debug, Clone, PartialEq)]
pub struct Cell(SmallVec<[Value; 1]>);

impl Cell {
    pub fn new(value: Value) -> Cell {
        Cell(smallvec![value])
    }

    pub fn from_values(values: Vec<Value>) -> Cell {
        Cell(SmallVec::from_vec(values))
    }

    /// Element 0 - the cell's value for ordinary columns
    pub fn value(&self) -> &Value {
        &self.0[0]
    }

    /// Element `i`, or element 0 for single-valued cells (group keys keep
    /// one value while grouped columns hold the whole partition)
    pub fn element(&self, i: usize) -> &Value {
        if self.0.len() == 1 {
            &self.0[0]
        } else {
            &self.0[i]
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn set(&mut self, value: Value) {
        self.0 = smallvec![value];
    }
}

/// One row of a view; length equals the header length
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record(Vec<Cell>);

impl Record {
    pub fn new(cells: Vec<Cell>) -> Record {
        Record(cells)
    }

    pub fn from_values(values: Vec<Value>) -> Record {
        Record(values.into_iter().map(Cell::new).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> &Cell {
        &self.0[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut Cell {
        &mut self.0[i]
    }

    pub fn push(&mut self, cell: Cell) {
        self.0.push(cell);
    }

    pub fn cells(&self) -> &[Cell] {
        &self.0
    }

    /// Concatenate two records into one (join output)
    pub fn merge(left: &Record, right: &Record) -> Record {
        let mut cells = Vec::with_capacity(left.len() + right.len());
        cells.extend_from_slice(&left.0);
        cells.extend_from_slice(&right.0);
        Record(cells)
    }

    /// Number of partition elements held by a grouped record
    pub fn group_len(&self) -> usize {
        self.0.iter().map(Cell::len).max().unwrap_or(0)
    }

    /// Serialized identity of the projected fields, used by DISTINCT and the
    /// set operators. Null equals Null here.
    pub fn serialize_key(&self, indices: &[usize]) -> String {
        let mut key = String::new();
        for &i in indices {
            key.push_str(&comparison_key(self.0[i].value()));
            key.push('\u{1f}');
        }
        key
    }
}

impl std::ops::Index<usize> for Record {
    type Output = Cell;

    fn index(&self, i: usize) -> &Cell {
        &self.0[i]
    }
}

/// Ordered set of records backing a view
pub type RecordSet = Vec<Record>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_value_returns_element_zero() {
        let mut cell = Cell::new(Value::Integer(1));
        cell.push(Value::Integer(2));
        assert_eq!(cell.value(), &Value::Integer(1));
        assert_eq!(cell.len(), 2);
        assert_eq!(cell.element(1), &Value::Integer(2));
    }

    #[test]
    fn single_valued_cell_ignores_element_index() {
        let cell = Cell::new(Value::string("a"));
        assert_eq!(cell.element(5), &Value::string("a"));
    }

    #[test]
    fn record_serialize_key_treats_null_as_equal() {
        let a = Record::from_values(vec![Value::Null, Value::Integer(1)]);
        let b = Record::from_values(vec![Value::Null, Value::string("1")]);
        let indices = [0, 1];
        assert_eq!(a.serialize_key(&indices), b.serialize_key(&indices));
    }

    #[test]
    fn merge_concatenates_cells() {
        let l = Record::from_values(vec![Value::Integer(1)]);
        let r = Record::from_values(vec![Value::Integer(2), Value::Integer(3)]);
        assert_eq!(Record::merge(&l, &r).len(), 3);
    }
}

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

//! Core types: values, ternary logic, records, headers, errors

pub mod error;
pub mod header;
pub mod row;
pub mod value;

pub use error::{Error, Result, SourcePosition};
pub use header::{Header, HeaderField, INTERNAL_ID_COLUMN};
pub use row::{Cell, Record, RecordSet};
pub use value::{
    arithmetic, compare, comparison_key, concat, equal, identical, negate, order, parse_datetime,
    to_boolean, to_datetime, to_float, to_integer, to_number, to_ternary, to_text, ArithmeticOp,
    ComparisonOp, Number, Ternary, TimeContext, Value,
};

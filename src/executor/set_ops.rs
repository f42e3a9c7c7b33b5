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

//! Set operations (UNION, INTERSECT, EXCEPT, with ALL)
//!
//! Rows are compared by deep value equality with `Null = Null` treated as
//! equal for set purposes. Output order follows the left side, then (for
//! UNION) the right.

use rustc_hash::FxHashMap;

use crate::core::{Error, Record, Result, SourcePosition};
use crate::parser::ast::{SelectEntity, SetOperator};

use super::context::ExecutionContext;
use super::scope::ReferenceScope;
use super::view::View;

pub fn execute(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    left: &SelectEntity,
    op: SetOperator,
    all: bool,
    right: &SelectEntity,
    pos: SourcePosition,
) -> Result<View> {
    let mut left_view = View::select_entity(ctx, scope, left)?;
    left_view.fix()?;
    let mut right_view = View::select_entity(ctx, scope, right)?;
    right_view.fix()?;

    if left_view.field_len() != right_view.field_len() {
        return Err(Error::FieldLengthMismatch {
            pos,
            expected: left_view.field_len(),
            got: right_view.field_len(),
        });
    }

    let indices: Vec<usize> = (0..left_view.field_len()).collect();
    let records = match (op, all) {
        (SetOperator::Union, true) => {
            let mut records = left_view.record_set;
            records.extend(right_view.record_set);
            records
        }
        (SetOperator::Union, false) => {
            let mut records = left_view.record_set;
            records.extend(right_view.record_set);
            dedupe(ctx, records, &indices)?
        }
        (SetOperator::Intersect, all) => {
            let mut right_counts = count_rows(ctx, &right_view.record_set, &indices)?;
            let mut out = Vec::new();
            let mut emitted: FxHashMap<String, ()> = FxHashMap::default();
            for (i, record) in left_view.record_set.into_iter().enumerate() {
                ctx.check_at(i)?;
                let key = record.serialize_key(&indices);
                match right_counts.get_mut(&key) {
                    Some(count) if *count > 0 => {
                        if all {
                            *count -= 1;
                            out.push(record);
                        } else if emitted.insert(key, ()).is_none() {
                            out.push(record);
                        }
                    }
                    _ => {}
                }
            }
            out
        }
        (SetOperator::Except, all) => {
            let mut right_counts = count_rows(ctx, &right_view.record_set, &indices)?;
            let mut out = Vec::new();
            let mut emitted: FxHashMap<String, ()> = FxHashMap::default();
            for (i, record) in left_view.record_set.into_iter().enumerate() {
                ctx.check_at(i)?;
                let key = record.serialize_key(&indices);
                match right_counts.get_mut(&key) {
                    Some(count) if *count > 0 => {
                        if all {
                            *count -= 1;
                        }
                        // Plain EXCEPT removes every occurrence
                    }
                    _ => {
                        if all {
                            out.push(record);
                        } else if emitted.insert(key, ()).is_none() {
                            out.push(record);
                        }
                    }
                }
            }
            out
        }
    };

    Ok(View {
        header: left_view.header,
        record_set: records,
        ..View::default()
    })
}

fn dedupe(
    ctx: &ExecutionContext,
    records: Vec<Record>,
    indices: &[usize],
) -> Result<Vec<Record>> {
    let mut seen: FxHashMap<String, ()> = FxHashMap::default();
    let mut out = Vec::with_capacity(records.len());
    for (i, record) in records.into_iter().enumerate() {
        ctx.check_at(i)?;
        if seen.insert(record.serialize_key(indices), ()).is_none() {
            out.push(record);
        }
    }
    Ok(out)
}

fn count_rows(
    ctx: &ExecutionContext,
    records: &[Record],
    indices: &[usize],
) -> Result<FxHashMap<String, usize>> {
    let mut counts: FxHashMap<String, usize> = FxHashMap::default();
    for (i, record) in records.iter().enumerate() {
        ctx.check_at(i)?;
        *counts.entry(record.serialize_key(indices)).or_insert(0) += 1;
    }
    Ok(counts)
}

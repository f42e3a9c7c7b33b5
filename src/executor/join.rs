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

//! Joins
//!
//! Nested-loop evaluation of the ON predicate over the merged row. NATURAL
//! joins pair columns with matching unqualified names; USING merges each
//! named pair into one output column whose cell carries both sources until
//! the join resolves it (the surviving value is the first non-null side).
//! OUTER joins fill the absent side with Null cells.

use std::sync::Arc;

use crate::core::{equal, Cell, Header, Record, Result, SourcePosition, Value};
use crate::parser::ast::{Expression, JoinClause, JoinCondition, JoinType};

use super::context::ExecutionContext;
use super::evaluator;
use super::scope::ReferenceScope;
use super::view::View;

pub fn execute(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    join: &JoinClause,
) -> Result<View> {
    let left = View::load_table(ctx, scope, &join.left)?;
    let right = View::load_table(ctx, scope, &join.right)?;

    let condition = resolve_condition(&left, &right, join)?;

    match join.join_type {
        JoinType::Cross => cross_join(ctx, left, right),
        JoinType::Inner => inner_join(ctx, scope, left, right, &condition, join.pos),
        JoinType::LeftOuter | JoinType::RightOuter | JoinType::FullOuter => {
            outer_join(ctx, scope, left, right, &condition, join.join_type, join.pos)
        }
    }
}

/// How candidate row pairs are accepted
enum Condition {
    None,
    On(Expression),
    /// (left index, right index) per merged column pair
    Using(Vec<(usize, usize)>),
}

fn resolve_condition(left: &View, right: &View, join: &JoinClause) -> Result<Condition> {
    if join.natural {
        let mut pairs = Vec::new();
        for li in 0..left.header.len() {
            let name = &left.header.get(li).column;
            if let Ok(ri) = right.header.search(None, name, join.pos) {
                pairs.push((li, ri));
            }
        }
        return Ok(Condition::Using(pairs));
    }
    match &join.condition {
        None => Ok(Condition::None),
        Some(JoinCondition::On(expr)) => Ok(Condition::On(expr.clone())),
        Some(JoinCondition::Using(names)) => {
            let mut pairs = Vec::new();
            for name in names {
                let li = left.header.search(None, name, join.pos)?;
                let ri = right.header.search(None, name, join.pos)?;
                pairs.push((li, ri));
            }
            Ok(Condition::Using(pairs))
        }
    }
}

/// Cartesian product; also drives comma-separated FROM lists
pub fn cross_join(ctx: &ExecutionContext, left: View, right: View) -> Result<View> {
    let header = Header::merge(&left.header, &right.header);
    let mut records = Vec::with_capacity(left.record_len() * right.record_len());
    for (i, l) in left.record_set.iter().enumerate() {
        ctx.check_at(i)?;
        for r in &right.record_set {
            records.push(Record::merge(l, r));
        }
    }
    Ok(View {
        header,
        record_set: records,
        ..View::default()
    })
}

fn inner_join(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    left: View,
    right: View,
    condition: &Condition,
    _pos: SourcePosition,
) -> Result<View> {
    let merged = merged_header(&left, &right, condition);
    let left_width = left.field_len();
    let mut records = Vec::new();

    for (i, l) in left.record_set.iter().enumerate() {
        ctx.check_at(i)?;
        for r in &right.record_set {
            if pair_matches(ctx, scope, &merged, condition, l, r)? {
                records.push(merge_pair(condition, l, r, false, false));
            }
        }
    }

    finish_join(merged, records, condition, left_width)
}

fn outer_join(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    left: View,
    right: View,
    condition: &Condition,
    join_type: JoinType,
    _pos: SourcePosition,
) -> Result<View> {
    let merged = merged_header(&left, &right, condition);
    let left_width = left.field_len();
    let right_width = right.field_len();
    let mut records = Vec::new();
    let mut right_matched = vec![false; right.record_len()];

    for (i, l) in left.record_set.iter().enumerate() {
        ctx.check_at(i)?;
        let mut matched = false;
        for (ri, r) in right.record_set.iter().enumerate() {
            if pair_matches(ctx, scope, &merged, condition, l, r)? {
                matched = true;
                right_matched[ri] = true;
                records.push(merge_pair(condition, l, r, false, false));
            }
        }
        if !matched && matches!(join_type, JoinType::LeftOuter | JoinType::FullOuter) {
            let nulls = null_record(right_width);
            records.push(merge_pair(condition, l, &nulls, false, true));
        }
    }

    if matches!(join_type, JoinType::RightOuter | JoinType::FullOuter) {
        for (ri, r) in right.record_set.iter().enumerate() {
            if !right_matched[ri] {
                let nulls = null_record(left_width);
                records.push(merge_pair(condition, &nulls, r, true, false));
            }
        }
    }

    finish_join(merged, records, condition, left_width)
}

/// Evaluate acceptance of one candidate pair
fn pair_matches(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    merged: &Header,
    condition: &Condition,
    l: &Record,
    r: &Record,
) -> Result<bool> {
    match condition {
        Condition::None => Ok(true),
        Condition::Using(pairs) => {
            let time_ctx = scope.tx.time_context();
            for &(li, ri) in pairs {
                if !equal(l[li].value(), r[ri].value(), &time_ctx).is_true() {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::On(expr) => {
            let scratch = View {
                header: merged.clone(),
                record_set: vec![Record::merge(l, r)],
                ..View::default()
            };
            let frame_scope = scope.create_scope_for_record_evaluation(Arc::new(scratch), 0);
            Ok(evaluator::filter(ctx, &frame_scope, expr)?.is_true())
        }
    }
}

fn merged_header(left: &View, right: &View, condition: &Condition) -> Header {
    let mut header = Header::merge(&left.header, &right.header);
    if let Condition::Using(pairs) = condition {
        let left_width = left.field_len();
        for &(li, ri) in pairs {
            header.get_mut(li).is_join_column = true;
            header.get_mut(left_width + ri).is_join_column = true;
        }
    }
    header
}

fn merge_pair(
    condition: &Condition,
    l: &Record,
    r: &Record,
    left_is_null: bool,
    right_is_null: bool,
) -> Record {
    let mut merged = Record::merge(l, r);
    if let Condition::Using(pairs) = condition {
        // The merged column carries both sources until the join resolves it
        for &(li, ri) in pairs {
            if !left_is_null && !right_is_null {
                let rv = r[ri].value().clone();
                merged.get_mut(li).push(rv);
            } else if left_is_null {
                merged.get_mut(li).set(r[ri].value().clone());
            }
        }
    }
    merged
}

/// Collapse USING cells to their resolved value and drop the right-side
/// duplicates from the output
fn finish_join(
    header: Header,
    mut records: Vec<Record>,
    condition: &Condition,
    left_width: usize,
) -> Result<View> {
    let Condition::Using(pairs) = condition else {
        return Ok(View {
            header,
            record_set: records,
            ..View::default()
        });
    };

    let drop_set: rustc_hash::FxHashSet<usize> =
        pairs.iter().map(|&(_, ri)| left_width + ri).collect();

    for record in &mut records {
        for &(li, _) in pairs {
            let resolved = record[li]
                .values()
                .iter()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Value::Null);
            record.get_mut(li).set(resolved);
        }
    }

    let mut new_header = Header::default();
    let mut kept = Vec::new();
    for i in 0..header.len() {
        if !drop_set.contains(&i) {
            new_header.push(header.get(i).clone());
            kept.push(i);
        }
    }
    let records = records
        .into_iter()
        .map(|rec| Record::new(kept.iter().map(|&i| rec[i].clone()).collect()))
        .collect();

    Ok(View {
        header: new_header,
        record_set: records,
        ..View::default()
    })
}

fn null_record(width: usize) -> Record {
    Record::new(vec![Cell::new(Value::Null); width])
}

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

//! Expression evaluation
//!
//! Evaluates AST expressions against a reference scope. Field references
//! resolve through the innermost record frame first, consulting the
//! per-frame index cache; comparisons return ternaries under Kleene
//! semantics; subqueries run with the caller's frames visible so
//! correlated references resolve naturally.

use std::cell::RefCell;

use regex::Regex;
use rustc_hash::FxHashMap;

use crate::core::{
    self, compare, concat, equal, to_number, to_ternary, to_text, Error, Result, SourcePosition,
    Ternary, Value,
};
use crate::parser::ast::{
    CaseBranch, ComparisonOp as CmpOp, CursorProbe, Expression, FieldReference, InListSource,
    LogicOp, SelectQuery,
};

use super::aggregation;
use super::context::ExecutionContext;
use super::function;
use super::scope::ReferenceScope;
use super::view::View;

// Thread-local cache for compiled LIKE patterns; recompiling per record
// dominates the match otherwise.
thread_local! {
    static PATTERN_CACHE: RefCell<FxHashMap<String, Regex>> = RefCell::new(FxHashMap::default());
}

/// Maximum cached patterns per thread
const MAX_PATTERN_CACHE_SIZE: usize = 100;

/// Evaluate an expression to a value
pub fn evaluate(ctx: &ExecutionContext, scope: &ReferenceScope, expr: &Expression) -> Result<Value> {
    ctx.check()?;
    match expr {
        Expression::Field(fr) => resolve_field(scope, fr),
        Expression::Literal { value, .. } => Ok(value.clone()),
        Expression::Variable { name, pos } => scope.get_variable(name, *pos),
        Expression::Placeholder { label, pos } => {
            let Some(bindings) = &scope.placeholders else {
                return Err(Error::syntax(
                    *pos,
                    format!("placeholder {} is not substituted", label),
                ));
            };
            match label {
                crate::parser::ast::PlaceholderLabel::Positional(index) => bindings
                    .positional
                    .get(index.saturating_sub(1))
                    .cloned()
                    .ok_or(Error::PlaceholderCount {
                        pos: *pos,
                        expected: *index,
                        got: bindings.positional.len(),
                    }),
                crate::parser::ast::PlaceholderLabel::Named(name) => bindings
                    .named
                    .get(&name.to_uppercase())
                    .cloned()
                    .ok_or_else(|| {
                        Error::syntax(*pos, format!("placeholder :{} is not bound", name))
                    }),
            }
        }
        Expression::Parentheses(inner) => evaluate(ctx, scope, inner),
        Expression::Arithmetic { left, op, right, .. } => {
            let l = evaluate(ctx, scope, left)?;
            let r = evaluate(ctx, scope, right)?;
            Ok(core::arithmetic(&l, *op, &r))
        }
        Expression::UnaryMinus { operand, .. } => {
            let v = evaluate(ctx, scope, operand)?;
            Ok(core::negate(&v))
        }
        Expression::Concat { items, .. } => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(ctx, scope, item)?);
            }
            Ok(concat(&values))
        }
        Expression::Comparison { left, op, right, .. } => {
            let l = evaluate(ctx, scope, left)?;
            let r = evaluate(ctx, scope, right)?;
            Ok(Value::Ternary(compare(&l, &r, *op, &scope.tx.time_context())))
        }
        Expression::Is { left, right, negated, .. } => {
            let result = evaluate_is(ctx, scope, left, right)?;
            Ok(Value::Ternary(if *negated { result.not() } else { result }))
        }
        Expression::Between {
            subject,
            low,
            high,
            negated,
            ..
        } => {
            let s = evaluate(ctx, scope, subject)?;
            let lo = evaluate(ctx, scope, low)?;
            let hi = evaluate(ctx, scope, high)?;
            let time_ctx = scope.tx.time_context();
            let result = compare(&s, &lo, CmpOp::GreaterOrEqual, &time_ctx)
                .and(compare(&s, &hi, CmpOp::LessOrEqual, &time_ctx));
            Ok(Value::Ternary(if *negated { result.not() } else { result }))
        }
        Expression::Like {
            subject,
            pattern,
            negated,
            ..
        } => {
            let s = evaluate(ctx, scope, subject)?;
            let p = evaluate(ctx, scope, pattern)?;
            let result = evaluate_like(&s, &p)?;
            Ok(Value::Ternary(if *negated { result.not() } else { result }))
        }
        Expression::In {
            subject,
            source,
            negated,
            pos,
        } => {
            let s = evaluate(ctx, scope, subject)?;
            let list = match source {
                InListSource::Values(values) => {
                    let mut out = Vec::with_capacity(values.len());
                    for v in values {
                        out.push(evaluate(ctx, scope, v)?);
                    }
                    out
                }
                InListSource::Subquery(query) => subquery_column(ctx, scope, query, *pos)?,
            };
            let result = any_equal(&s, &list, scope);
            Ok(Value::Ternary(if *negated { result.not() } else { result }))
        }
        Expression::Any {
            subject,
            op,
            query,
            pos,
        } => {
            let s = evaluate(ctx, scope, subject)?;
            let list = subquery_column(ctx, scope, query, *pos)?;
            let time_ctx = scope.tx.time_context();
            // Empty set: ANY is FALSE
            let mut result = Ternary::False;
            for item in &list {
                result = result.or(compare(&s, item, *op, &time_ctx));
            }
            Ok(Value::Ternary(result))
        }
        Expression::All {
            subject,
            op,
            query,
            pos,
        } => {
            let s = evaluate(ctx, scope, subject)?;
            let list = subquery_column(ctx, scope, query, *pos)?;
            let time_ctx = scope.tx.time_context();
            // Empty set: ALL is TRUE
            let mut result = Ternary::True;
            for item in &list {
                result = result.and(compare(&s, item, *op, &time_ctx));
            }
            Ok(Value::Ternary(result))
        }
        Expression::Exists { query, .. } => {
            let view = View::select_query(ctx, scope, query)?;
            Ok(Value::Ternary(Ternary::from_bool(view.record_len() > 0)))
        }
        Expression::Logic { left, op, right, .. } => {
            let result = match op {
                LogicOp::Not => filter(ctx, scope, right)?.not(),
                LogicOp::And => {
                    let l = filter_operand(ctx, scope, left)?;
                    if l == Ternary::False {
                        Ternary::False
                    } else {
                        l.and(filter(ctx, scope, right)?)
                    }
                }
                LogicOp::Or => {
                    let l = filter_operand(ctx, scope, left)?;
                    if l == Ternary::True {
                        Ternary::True
                    } else {
                        l.or(filter(ctx, scope, right)?)
                    }
                }
            };
            Ok(Value::Ternary(result))
        }
        Expression::Case {
            subject,
            branches,
            else_result,
            ..
        } => evaluate_case(ctx, scope, subject.as_deref(), branches, else_result.as_deref()),
        Expression::Function {
            name,
            args,
            distinct,
            pos,
        } => evaluate_function(ctx, scope, name, args, *distinct, *pos),
        Expression::ScalarSubquery { query, pos } => scalar_subquery(ctx, scope, query, *pos),
        Expression::CursorStatus { cursor, probe, pos } => match probe {
            CursorProbe::IsOpen => Ok(Value::Ternary(scope.cursor_is_open(cursor, *pos)?)),
            CursorProbe::IsInRange => Ok(Value::Ternary(scope.cursor_is_in_range(cursor, *pos)?)),
            CursorProbe::Count => Ok(Value::Integer(scope.cursor_count(cursor, *pos)? as i64)),
        },
        Expression::RowValueExpr(rv) => Err(Error::syntax(
            rv.pos,
            "row value is not allowed here".to_string(),
        )),
    }
}

/// Evaluate a predicate position: UNKNOWN behaves as false downstream
pub fn filter(ctx: &ExecutionContext, scope: &ReferenceScope, expr: &Expression) -> Result<Ternary> {
    Ok(to_ternary(&evaluate(ctx, scope, expr)?))
}

/// Evaluate an expression that must not depend on the current record
/// (LIMIT, OFFSET, cursor positions). Record frames remain visible so
/// variables and outer references still work.
pub fn evaluate_constant(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    expr: &Expression,
) -> Result<Value> {
    evaluate(ctx, scope, expr)
}

// ============================================================================
// Field resolution
// ============================================================================

/// Innermost record frame first; within a frame the index cache wins, a
/// miss resolves against the frame's header and is cached.
fn resolve_field(scope: &ReferenceScope, fr: &FieldReference) -> Result<Value> {
    for frame in &scope.records {
        let idx = match frame.cached_field_index(fr) {
            Some(idx) => idx,
            None => {
                match frame.view.header.search(fr.view.as_deref(), &fr.column, fr.pos) {
                    Ok(idx) => {
                        frame.cache_field_index(fr.clone(), idx);
                        idx
                    }
                    Err(Error::FieldNotFound { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }
        };
        return field_value(frame, idx, fr);
    }
    Err(Error::FieldNotFound {
        pos: fr.pos,
        field: fr.to_string(),
    })
}

fn field_value(
    frame: &super::scope::ReferenceRecord,
    idx: usize,
    fr: &FieldReference,
) -> Result<Value> {
    if !frame.is_in_range() {
        return Ok(Value::Null);
    }
    let record_index = frame.record_index() as usize;
    let view = &frame.view;
    let cell = &view.record_set[record_index][idx];
    let field = view.header.get(idx);
    // The group restriction binds table columns only; columns computed by
    // the select phase hold one value per partition already
    if view.is_grouped() && field.is_from_table && !field.is_group_key {
        match frame.element_index {
            Some(k) => Ok(cell.element(k).clone()),
            None => Err(Error::FieldNotGroupKey {
                pos: fr.pos,
                field: fr.to_string(),
            }),
        }
    } else {
        Ok(cell.value().clone())
    }
}

// ============================================================================
// Predicates
// ============================================================================

fn evaluate_is(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    left: &Expression,
    right: &Expression,
) -> Result<Ternary> {
    let l = evaluate(ctx, scope, left)?;
    let r = evaluate(ctx, scope, right)?;
    // IS NULL and IS TRUE/FALSE/UNKNOWN are always determined
    Ok(match r {
        Value::Null => Ternary::from_bool(l.is_null()),
        Value::Ternary(t) => Ternary::from_bool(to_ternary(&l) == t),
        Value::Boolean(b) => Ternary::from_bool(to_ternary(&l) == Ternary::from_bool(b)),
        other => equal(&l, &other, &scope.tx.time_context()),
    })
}

fn evaluate_like(subject: &Value, pattern: &Value) -> Result<Ternary> {
    let (Some(s), Some(p)) = (to_text(subject), to_text(pattern)) else {
        return Ok(Ternary::Unknown);
    };
    let regex = compiled_pattern(&p)?;
    Ok(Ternary::from_bool(regex.is_match(&s)))
}

/// Translate a LIKE pattern (`%`, `_`, backslash escapes) to an anchored,
/// case-insensitive regex, compiled through the per-thread cache
fn compiled_pattern(pattern: &str) -> Result<Regex> {
    PATTERN_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }

        let mut translated = String::with_capacity(pattern.len() + 8);
        translated.push_str("(?is)^");
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '%' => translated.push_str(".*"),
                '_' => translated.push('.'),
                '\\' => match chars.next() {
                    Some(escaped) => translated.push_str(&regex::escape(&escaped.to_string())),
                    None => translated.push_str("\\\\"),
                },
                other => translated.push_str(&regex::escape(&other.to_string())),
            }
        }
        translated.push('$');

        let re = Regex::new(&translated)
            .map_err(|e| Error::system(format!("cannot compile pattern '{}': {}", pattern, e)))?;

        if cache.len() >= MAX_PATTERN_CACHE_SIZE {
            cache.clear();
        }
        cache.insert(pattern.to_string(), re.clone());
        Ok(re)
    })
}

fn any_equal(subject: &Value, list: &[Value], scope: &ReferenceScope) -> Ternary {
    let time_ctx = scope.tx.time_context();
    let mut result = Ternary::False;
    for item in list {
        result = result.or(equal(subject, item, &time_ctx));
        if result == Ternary::True {
            break;
        }
    }
    result
}

fn filter_operand(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    operand: &Option<Box<Expression>>,
) -> Result<Ternary> {
    match operand {
        Some(expr) => filter(ctx, scope, expr),
        None => Ok(Ternary::Unknown),
    }
}

// ============================================================================
// CASE / COALESCE
// ============================================================================

fn evaluate_case(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    subject: Option<&Expression>,
    branches: &[CaseBranch],
    else_result: Option<&Expression>,
) -> Result<Value> {
    let subject_value = match subject {
        Some(expr) => Some(evaluate(ctx, scope, expr)?),
        None => None,
    };
    for branch in branches {
        let hit = match &subject_value {
            Some(s) => {
                let w = evaluate(ctx, scope, &branch.condition)?;
                equal(s, &w, &scope.tx.time_context()).is_true()
            }
            None => filter(ctx, scope, &branch.condition)?.is_true(),
        };
        if hit {
            return evaluate(ctx, scope, &branch.result);
        }
    }
    match else_result {
        Some(expr) => evaluate(ctx, scope, expr),
        None => Ok(Value::Null),
    }
}

// ============================================================================
// Functions
// ============================================================================

fn evaluate_function(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    name: &str,
    args: &[Expression],
    distinct: bool,
    pos: SourcePosition,
) -> Result<Value> {
    let upper = name.to_uppercase();

    // COALESCE short-circuits on the first non-Null argument
    if upper == "COALESCE" {
        if args.is_empty() {
            return Err(Error::ArgumentCount {
                pos,
                name: upper,
                expected: "at least 1 argument".to_string(),
                got: 0,
            });
        }
        for arg in args {
            let v = evaluate(ctx, scope, arg)?;
            if !v.is_null() {
                return Ok(v);
            }
        }
        return Ok(Value::Null);
    }

    if aggregation::is_aggregate_call(&upper, scope) {
        return aggregation::evaluate_aggregate(ctx, scope, &upper, args, distinct, pos);
    }

    if function::is_builtin_scalar(&upper) {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(evaluate(ctx, scope, arg)?);
        }
        return function::call_builtin_scalar(scope, &upper, &values, pos);
    }

    if let Some(udf) = scope.get_function(&upper) {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(evaluate(ctx, scope, arg)?);
        }
        return function::execute_scalar(ctx, scope, &udf, values, pos);
    }

    Err(Error::FunctionNotExist {
        pos,
        name: name.to_string(),
    })
}

// ============================================================================
// Subqueries
// ============================================================================

fn scalar_subquery(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    query: &SelectQuery,
    pos: SourcePosition,
) -> Result<Value> {
    let view = View::select_query(ctx, scope, query)?;
    if view.field_len() > 1 {
        return Err(Error::SubqueryTooMany {
            pos,
            unit: "fields".to_string(),
        });
    }
    match view.record_len() {
        0 => Ok(Value::Null),
        1 => Ok(view.record_set[0][0].value().clone()),
        _ => Err(Error::SubqueryTooMany {
            pos,
            unit: "records".to_string(),
        }),
    }
}

fn subquery_column(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    query: &SelectQuery,
    pos: SourcePosition,
) -> Result<Vec<Value>> {
    let view = View::select_query(ctx, scope, query)?;
    if view.field_len() != 1 {
        return Err(Error::SubqueryTooMany {
            pos,
            unit: "fields".to_string(),
        });
    }
    Ok(view
        .record_set
        .iter()
        .map(|r| r[0].value().clone())
        .collect())
}

// Numeric helper shared with aggregation
pub(crate) fn number_or_null(v: &Value) -> Option<f64> {
    to_number(v).map(|n| n.as_f64())
}

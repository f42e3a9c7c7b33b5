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

//! Aggregate evaluation
//!
//! Aggregates run against grouped views: the argument expression is
//! evaluated once per partition element through a group-element scope, the
//! value list optionally deduplicated for DISTINCT, and the accumulator
//! applied. User-defined aggregates receive the value list through a
//! pseudo-cursor.

use crate::core::{
    comparison_key, order, to_number, to_text, Error, Number, Result, SourcePosition, Value,
};
use crate::parser::ast::{Expression, SelectField};

use super::context::ExecutionContext;
use super::evaluator;
use super::function;
use super::scope::ReferenceScope;

/// Built-in aggregate function names
pub const BUILTIN_AGGREGATES: &[&str] =
    &["COUNT", "SUM", "AVG", "MIN", "MAX", "MEDIAN", "LISTAGG"];

/// Whether `name` (uppercased) is an aggregate in this scope
pub fn is_aggregate_call(name: &str, scope: &ReferenceScope) -> bool {
    BUILTIN_AGGREGATES.contains(&name)
        || scope
            .get_function(name)
            .is_some_and(|f| f.is_aggregate)
}

/// Whether any select field aggregates, forcing a whole-view partition
pub fn fields_have_aggregate(fields: &[SelectField], scope: &ReferenceScope) -> bool {
    fields.iter().any(|f| match f {
        SelectField::Expression { expr, .. } => expr_has_aggregate(expr, scope),
        _ => false,
    })
}

/// Recursive walk for aggregate calls; subqueries resolve their own
/// aggregates and are not entered
pub fn expr_has_aggregate(expr: &Expression, scope: &ReferenceScope) -> bool {
    match expr {
        Expression::Function { name, args, .. } => {
            is_aggregate_call(&name.to_uppercase(), scope)
                || args.iter().any(|a| expr_has_aggregate(a, scope))
        }
        Expression::Parentheses(inner) | Expression::UnaryMinus { operand: inner, .. } => {
            expr_has_aggregate(inner, scope)
        }
        Expression::Arithmetic { left, right, .. } | Expression::Comparison { left, right, .. } => {
            expr_has_aggregate(left, scope) || expr_has_aggregate(right, scope)
        }
        Expression::Concat { items, .. } => items.iter().any(|e| expr_has_aggregate(e, scope)),
        Expression::Is { left, right, .. } => {
            expr_has_aggregate(left, scope) || expr_has_aggregate(right, scope)
        }
        Expression::Between {
            subject, low, high, ..
        } => {
            expr_has_aggregate(subject, scope)
                || expr_has_aggregate(low, scope)
                || expr_has_aggregate(high, scope)
        }
        Expression::Like {
            subject, pattern, ..
        } => expr_has_aggregate(subject, scope) || expr_has_aggregate(pattern, scope),
        Expression::In { subject, source, .. } => {
            expr_has_aggregate(subject, scope)
                || match source {
                    crate::parser::ast::InListSource::Values(values) => {
                        values.iter().any(|e| expr_has_aggregate(e, scope))
                    }
                    crate::parser::ast::InListSource::Subquery(_) => false,
                }
        }
        Expression::Any { subject, .. } | Expression::All { subject, .. } => {
            expr_has_aggregate(subject, scope)
        }
        Expression::Logic { left, right, .. } => {
            left.as_ref()
                .is_some_and(|l| expr_has_aggregate(l, scope))
                || expr_has_aggregate(right, scope)
        }
        Expression::Case {
            subject,
            branches,
            else_result,
            ..
        } => {
            subject
                .as_ref()
                .is_some_and(|s| expr_has_aggregate(s, scope))
                || branches.iter().any(|b| {
                    expr_has_aggregate(&b.condition, scope) || expr_has_aggregate(&b.result, scope)
                })
                || else_result
                    .as_ref()
                    .is_some_and(|e| expr_has_aggregate(e, scope))
        }
        _ => false,
    }
}

/// Evaluate an aggregate call against the innermost record frame
pub fn evaluate_aggregate(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    name: &str,
    args: &[Expression],
    distinct: bool,
    pos: SourcePosition,
) -> Result<Value> {
    let Some(frame) = scope.records.first() else {
        return Err(Error::syntax(
            pos,
            format!("function {} is not allowed here", name),
        ));
    };
    if !frame.view.is_grouped() {
        return Err(Error::syntax(
            pos,
            format!("function {} is not allowed here", name),
        ));
    }
    let partition_size = frame.view.group_size(frame.record_index().max(0) as usize);

    // COUNT(*) needs no argument values
    if name == "COUNT" && args.is_empty() {
        return Ok(Value::Integer(partition_size as i64));
    }

    let arg = args.first().ok_or_else(|| Error::ArgumentCount {
        pos,
        name: name.to_string(),
        expected: "1 argument".to_string(),
        got: 0,
    })?;

    let mut values = Vec::with_capacity(partition_size);
    for k in 0..partition_size {
        ctx.check_at(k)?;
        let element_scope = scope.create_scope_for_group_element(k);
        values.push(evaluator::evaluate(ctx, &element_scope, arg)?);
    }

    if distinct {
        values = dedup_values(values);
    }

    if let Some(udf) = scope.get_function(name).filter(|f| f.is_aggregate) {
        let mut extra = Vec::new();
        for e in &args[1..] {
            extra.push(evaluator::evaluate(ctx, scope, e)?);
        }
        return function::execute_aggregate(ctx, scope, &udf, values, extra, pos);
    }

    match name {
        "COUNT" => Ok(Value::Integer(
            values.iter().filter(|v| !v.is_null()).count() as i64,
        )),
        "SUM" => Ok(sum(&values)),
        "AVG" => Ok(avg(&values)),
        "MIN" => Ok(extremum(&values, scope, true)),
        "MAX" => Ok(extremum(&values, scope, false)),
        "MEDIAN" => Ok(median(&values)),
        "LISTAGG" => {
            if args.len() > 2 {
                return Err(Error::ArgumentCount {
                    pos,
                    name: name.to_string(),
                    expected: "1 or 2 arguments".to_string(),
                    got: args.len(),
                });
            }
            let separator = match args.get(1) {
                Some(e) => match to_text(&evaluator::evaluate(ctx, scope, e)?) {
                    Some(s) => s,
                    None => String::new(),
                },
                None => String::new(),
            };
            Ok(listagg(&values, &separator))
        }
        other => Err(Error::FunctionNotExist {
            pos,
            name: other.to_string(),
        }),
    }
}

fn dedup_values(values: Vec<Value>) -> Vec<Value> {
    let mut seen = rustc_hash::FxHashSet::default();
    values
        .into_iter()
        .filter(|v| seen.insert(comparison_key(v)))
        .collect()
}

/// SUM ignores Nulls; integers stay integral until a float appears
fn sum(values: &[Value]) -> Value {
    let mut int_acc: i64 = 0;
    let mut float_acc: f64 = 0.0;
    let mut is_float = false;
    let mut any = false;
    for v in values {
        match to_number(v) {
            Some(Number::Integer(i)) => {
                any = true;
                if is_float {
                    float_acc += i as f64;
                } else {
                    match int_acc.checked_add(i) {
                        Some(acc) => int_acc = acc,
                        None => {
                            is_float = true;
                            float_acc = int_acc as f64 + i as f64;
                        }
                    }
                }
            }
            Some(Number::Float(f)) => {
                any = true;
                if !is_float {
                    is_float = true;
                    float_acc = int_acc as f64;
                }
                float_acc += f;
            }
            None => {}
        }
    }
    if !any {
        Value::Null
    } else if is_float {
        Value::Float(float_acc)
    } else {
        Value::Integer(int_acc)
    }
}

fn avg(values: &[Value]) -> Value {
    let nums: Vec<f64> = values.iter().filter_map(evaluator::number_or_null).collect();
    if nums.is_empty() {
        return Value::Null;
    }
    Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
}

fn extremum(values: &[Value], scope: &ReferenceScope, minimum: bool) -> Value {
    let time_ctx = scope.tx.time_context();
    let mut best: Option<&Value> = None;
    for v in values {
        if v.is_null() {
            continue;
        }
        best = match best {
            None => Some(v),
            Some(b) => match order(v, b, &time_ctx) {
                Some(std::cmp::Ordering::Less) if minimum => Some(v),
                Some(std::cmp::Ordering::Greater) if !minimum => Some(v),
                _ => Some(b),
            },
        };
    }
    best.cloned().unwrap_or(Value::Null)
}

fn median(values: &[Value]) -> Value {
    let mut nums: Vec<f64> = values.iter().filter_map(evaluator::number_or_null).collect();
    if nums.is_empty() {
        return Value::Null;
    }
    nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = nums.len() / 2;
    if nums.len() % 2 == 1 {
        Value::Float(nums[mid])
    } else {
        Value::Float((nums[mid - 1] + nums[mid]) / 2.0)
    }
}

fn listagg(values: &[Value], separator: &str) -> Value {
    let parts: Vec<String> = values.iter().filter_map(to_text).collect();
    if parts.is_empty() {
        Value::Null
    } else {
        Value::string(parts.join(separator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_keeps_integers_integral() {
        let v = sum(&[Value::Integer(1), Value::Null, Value::Integer(2)]);
        assert_eq!(v, Value::Integer(3));
        let v = sum(&[Value::Integer(1), Value::Float(0.5)]);
        assert_eq!(v, Value::Float(1.5));
    }

    #[test]
    fn sum_of_nothing_is_null() {
        assert!(sum(&[Value::Null, Value::string("x")]).is_null());
    }

    #[test]
    fn median_of_even_count_averages() {
        let v = median(&[
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(3),
            Value::Integer(4),
        ]);
        assert_eq!(v, Value::Float(2.5));
    }

    #[test]
    fn listagg_skips_nulls() {
        let v = listagg(
            &[Value::string("a"), Value::Null, Value::string("b")],
            ",",
        );
        assert_eq!(v, Value::string("a,b"));
    }
}

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

//! Functions
//!
//! Built-in scalar functions plus user-defined scalar and aggregate
//! functions. A user function executes its body in a fresh child block
//! scope with parameters declared as variables; aggregate functions
//! additionally see the partition's value list through a pseudo-cursor.
//! Recursion is bounded by the configured limit.

use std::cell::Cell;

use crate::core::{
    to_float, to_integer, to_text, Error, Result, SourcePosition, Value,
};
use crate::parser::ast::{FunctionParameter, Statement};

use super::context::ExecutionContext;
use super::cursor::Cursor;
use super::{execute_statements, Flow};
use super::scope::ReferenceScope;

thread_local! {
    static CALL_DEPTH: Cell<i64> = const { Cell::new(0) };
}

/// A function declared by DECLARE FUNCTION / DECLARE AGGREGATE
#[derive(Debug, Clone)]
pub struct UserDefinedFunction {
    pub name: String,
    pub parameters: Vec<FunctionParameter>,
    pub is_aggregate: bool,
    /// Aggregate functions bind the partition's values to this cursor name
    pub cursor_name: Option<String>,
    pub body: Vec<Statement>,
    pub pos: SourcePosition,
}

impl UserDefinedFunction {
    fn check_argument_count(&self, got: usize, pos: SourcePosition) -> Result<()> {
        let required = self
            .parameters
            .iter()
            .filter(|p| p.default.is_none())
            .count();
        let max = self.parameters.len();
        if got < required || max < got {
            let expected = if required == max {
                format!("{} argument(s)", max)
            } else {
                format!("{} to {} arguments", required, max)
            };
            return Err(Error::ArgumentCount {
                pos,
                name: self.name.clone(),
                expected,
                got,
            });
        }
        Ok(())
    }
}

/// Execute a scalar user function
pub fn execute_scalar(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    function: &UserDefinedFunction,
    args: Vec<Value>,
    pos: SourcePosition,
) -> Result<Value> {
    function.check_argument_count(args.len(), pos)?;
    run_body(ctx, scope, function, args, None, pos)
}

/// Execute an aggregate user function over a partition's value list
pub fn execute_aggregate(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    function: &UserDefinedFunction,
    values: Vec<Value>,
    args: Vec<Value>,
    pos: SourcePosition,
) -> Result<Value> {
    function.check_argument_count(args.len(), pos)?;
    run_body(ctx, scope, function, args, Some(values), pos)
}

fn run_body(
    ctx: &ExecutionContext,
    scope: &ReferenceScope,
    function: &UserDefinedFunction,
    args: Vec<Value>,
    partition: Option<Vec<Value>>,
    pos: SourcePosition,
) -> Result<Value> {
    let limit = scope.tx.limit_recursion();
    let depth = CALL_DEPTH.with(|d| {
        d.set(d.get() + 1);
        d.get()
    });
    let result = (|| {
        if limit >= 0 && depth > limit {
            return Err(Error::RecursionLimitExceeded { pos, limit });
        }

        let mut child = scope.create_child();

        for (i, parameter) in function.parameters.iter().enumerate() {
            let value = match args.get(i) {
                Some(v) => v.clone(),
                None => match &parameter.default {
                    Some(default) => super::evaluator::evaluate(ctx, &child, default)?,
                    None => Value::Null,
                },
            };
            child.declare_variable(&parameter.name, value, pos)?;
        }

        if let (Some(values), Some(cursor_name)) = (partition, &function.cursor_name) {
            child.declare_cursor(cursor_name, Cursor::pseudo(values), pos)?;
        }

        let flow = execute_statements(ctx, &mut child, &function.body)?;
        child.close_current_block();
        match flow {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    })();
    CALL_DEPTH.with(|d| d.set(d.get() - 1));
    result
}

// ============================================================================
// Built-in scalar functions
// ============================================================================

const BUILTIN_SCALARS: &[&str] = &[
    "ABS", "CEIL", "FLOOR", "ROUND", "POWER", "SQRT", "UPPER", "LOWER", "TRIM", "LTRIM", "RTRIM",
    "LENGTH", "SUBSTRING", "REPLACE", "NULLIF", "NOW", "STRING", "INTEGER", "FLOAT",
];

pub fn is_builtin_scalar(name: &str) -> bool {
    BUILTIN_SCALARS.contains(&name)
}

pub fn call_builtin_scalar(
    scope: &ReferenceScope,
    name: &str,
    args: &[Value],
    pos: SourcePosition,
) -> Result<Value> {
    match name {
        "ABS" => one_number(name, args, pos, f64::abs),
        "CEIL" => one_number(name, args, pos, f64::ceil),
        "FLOOR" => one_number(name, args, pos, f64::floor),
        "SQRT" => one_number(name, args, pos, |f| if f < 0.0 { f64::NAN } else { f.sqrt() }),
        "ROUND" => {
            check_args(name, args, 1..=2, pos)?;
            let Some(f) = to_float(&args[0]) else {
                return Ok(Value::Null);
            };
            let places = match args.get(1) {
                Some(p) => to_integer(p).unwrap_or(0),
                None => 0,
            };
            let factor = 10f64.powi(places as i32);
            Ok(number_value((f * factor).round() / factor))
        }
        "POWER" => {
            check_args(name, args, 2..=2, pos)?;
            match (to_float(&args[0]), to_float(&args[1])) {
                (Some(base), Some(exp)) => Ok(number_value(base.powf(exp))),
                _ => Ok(Value::Null),
            }
        }
        "UPPER" => one_string(name, args, pos, |s| s.to_uppercase()),
        "LOWER" => one_string(name, args, pos, |s| s.to_lowercase()),
        "TRIM" => one_string(name, args, pos, |s| s.trim().to_string()),
        "LTRIM" => one_string(name, args, pos, |s| s.trim_start().to_string()),
        "RTRIM" => one_string(name, args, pos, |s| s.trim_end().to_string()),
        "LENGTH" => {
            check_args(name, args, 1..=1, pos)?;
            match to_text(&args[0]) {
                Some(s) => Ok(Value::Integer(s.chars().count() as i64)),
                None => Ok(Value::Null),
            }
        }
        "SUBSTRING" => {
            check_args(name, args, 2..=3, pos)?;
            let (Some(s), Some(start)) = (to_text(&args[0]), to_integer(&args[1])) else {
                return Ok(Value::Null);
            };
            let chars: Vec<char> = s.chars().collect();
            // 1-based start; zero and negative wrap from the end
            let begin = if start > 0 {
                (start - 1) as usize
            } else {
                chars.len().saturating_sub(start.unsigned_abs() as usize)
            };
            if begin >= chars.len() {
                return Ok(Value::string(""));
            }
            let end = match args.get(2) {
                Some(l) => match to_integer(l) {
                    Some(l) if l >= 0 => (begin + l as usize).min(chars.len()),
                    _ => return Ok(Value::Null),
                },
                None => chars.len(),
            };
            Ok(Value::string(chars[begin..end].iter().collect::<String>()))
        }
        "REPLACE" => {
            check_args(name, args, 3..=3, pos)?;
            match (to_text(&args[0]), to_text(&args[1]), to_text(&args[2])) {
                (Some(s), Some(old), Some(new)) => Ok(Value::string(s.replace(&old, &new))),
                _ => Ok(Value::Null),
            }
        }
        "NULLIF" => {
            check_args(name, args, 2..=2, pos)?;
            let time_ctx = scope.tx.time_context();
            if crate::core::equal(&args[0], &args[1], &time_ctx).is_true() {
                Ok(Value::Null)
            } else {
                Ok(args[0].clone())
            }
        }
        "NOW" => {
            check_args(name, args, 0..=0, pos)?;
            Ok(Value::Datetime(scope.now()))
        }
        "STRING" => {
            check_args(name, args, 1..=1, pos)?;
            Ok(match to_text(&args[0]) {
                Some(s) => Value::string(s),
                None => Value::Null,
            })
        }
        "INTEGER" => {
            check_args(name, args, 1..=1, pos)?;
            Ok(match to_integer(&args[0]) {
                Some(i) => Value::Integer(i),
                None => Value::Null,
            })
        }
        "FLOAT" => {
            check_args(name, args, 1..=1, pos)?;
            Ok(match to_float(&args[0]) {
                Some(f) => Value::Float(f),
                None => Value::Null,
            })
        }
        other => Err(Error::FunctionNotExist {
            pos,
            name: other.to_string(),
        }),
    }
}

fn check_args(
    name: &str,
    args: &[Value],
    range: std::ops::RangeInclusive<usize>,
    pos: SourcePosition,
) -> Result<()> {
    if range.contains(&args.len()) {
        return Ok(());
    }
    let expected = if range.start() == range.end() {
        format!("{} argument(s)", range.start())
    } else {
        format!("{} to {} arguments", range.start(), range.end())
    };
    Err(Error::ArgumentCount {
        pos,
        name: name.to_string(),
        expected,
        got: args.len(),
    })
}

fn one_number(
    name: &str,
    args: &[Value],
    pos: SourcePosition,
    f: impl Fn(f64) -> f64,
) -> Result<Value> {
    check_args(name, args, 1..=1, pos)?;
    match to_float(&args[0]) {
        Some(v) => Ok(number_value(f(v))),
        None => Ok(Value::Null),
    }
}

fn one_string(
    name: &str,
    args: &[Value],
    pos: SourcePosition,
    f: impl Fn(&str) -> String,
) -> Result<Value> {
    check_args(name, args, 1..=1, pos)?;
    match to_text(&args[0]) {
        Some(s) => Ok(Value::string(f(&s))),
        None => Ok(Value::Null),
    }
}

fn number_value(f: f64) -> Value {
    if !f.is_finite() {
        Value::Null
    } else if f == f.trunc() && f.abs() < 1e15 {
        Value::Integer(f as i64)
    } else {
        Value::Float(f)
    }
}

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

//! Primary values and three-valued logic
//!
//! A [`Value`] is the tagged union of every scalar kind the query language
//! knows. Operators are flat functions over the union so the Kleene
//! semantics stay auditable in one place: comparisons return a [`Ternary`],
//! arithmetic propagates Null, and `UNKNOWN` behaves as false wherever a
//! filter predicate is required.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

/// Datetime formats accepted by default when parsing strings.
/// Order matters - more specific formats first.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z", // RFC3339 with fractional seconds
    "%Y-%m-%dT%H:%M:%S%:z",    // RFC3339
    "%Y-%m-%dT%H:%M:%S%.f",    // ISO without timezone
    "%Y-%m-%dT%H:%M:%S",       // ISO without timezone or fraction
    "%Y-%m-%d %H:%M:%S%.f%:z", // SQL-style with offset
    "%Y-%m-%d %H:%M:%S%.f",    // SQL-style with fractional seconds
    "%Y-%m-%d %H:%M:%S",       // SQL-style
    "%Y/%m/%d %H:%M:%S",       // Alternative with slashes
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

// =============================================================================
// Ternary
// =============================================================================

/// Three-valued logic kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Ternary {
    True,
    False,
    #[default]
    Unknown,
}

impl Ternary {
    pub fn from_bool(b: bool) -> Ternary {
        if b {
            Ternary::True
        } else {
            Ternary::False
        }
    }

    /// Parse the ternary literals accepted by the language
    pub fn parse(s: &str) -> Option<Ternary> {
        if s.eq_ignore_ascii_case("true") || s == "1" {
            Some(Ternary::True)
        } else if s.eq_ignore_ascii_case("false") || s == "0" {
            Some(Ternary::False)
        } else if s.eq_ignore_ascii_case("unknown") {
            Some(Ternary::Unknown)
        } else {
            None
        }
    }

    /// Kleene conjunction
    pub fn and(self, other: Ternary) -> Ternary {
        match (self, other) {
            (Ternary::False, _) | (_, Ternary::False) => Ternary::False,
            (Ternary::True, Ternary::True) => Ternary::True,
            _ => Ternary::Unknown,
        }
    }

    /// Kleene disjunction
    pub fn or(self, other: Ternary) -> Ternary {
        match (self, other) {
            (Ternary::True, _) | (_, Ternary::True) => Ternary::True,
            (Ternary::False, Ternary::False) => Ternary::False,
            _ => Ternary::Unknown,
        }
    }

    /// Kleene negation
    pub fn not(self) -> Ternary {
        match self {
            Ternary::True => Ternary::False,
            Ternary::False => Ternary::True,
            Ternary::Unknown => Ternary::Unknown,
        }
    }

    /// UNKNOWN behaves as false wherever a predicate is required
    pub fn is_true(self) -> bool {
        self == Ternary::True
    }

    /// Determined ternaries collapse to a boolean
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Ternary::True => Some(true),
            Ternary::False => Some(false),
            Ternary::Unknown => None,
        }
    }
}

impl fmt::Display for Ternary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ternary::True => write!(f, "TRUE"),
            Ternary::False => write!(f, "FALSE"),
            Ternary::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A primary value
///
/// String uses `Arc<str>` for cheap cloning during record operations; record
/// sets are cloned for restore points and projections.
#[derive(Debug, Clone)]
pub enum Value {
    String(Arc<str>),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Ternary(Ternary),
    Datetime(DateTime<FixedOffset>),
    Null,
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Arc::from(s.into().as_str()))
    }

    pub fn string_arc(s: Arc<str>) -> Value {
        Value::String(s)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Kind name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Ternary(_) => "ternary",
            Value::Datetime(_) => "datetime",
            Value::Null => "null",
        }
    }
}

/// Structural equality: same kind, same contents. Query comparisons go
/// through [`compare`] instead; this exists for tests and cache keys.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Ternary(a), Value::Ternary(b)) => a == b,
            (Value::Datetime(a), Value::Datetime(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Ternary(t) => write!(f, "{}", t),
            Value::Datetime(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)),
            Value::Null => Ok(()),
        }
    }
}

/// Render a float the way record fields are written back: no exponent for
/// ordinary magnitudes, no trailing `.0`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-Inf" } else { "Inf" }.to_string();
    }
    if f == f.trunc() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

// =============================================================================
// Conversion context
// =============================================================================

/// Session-scoped context consulted when strings are coerced to datetimes
#[derive(Debug, Clone)]
pub struct TimeContext {
    /// User-configured formats tried before the built-in ladder
    pub formats: Vec<String>,
    /// Offset applied to naive datetimes
    pub offset: FixedOffset,
}

impl Default for TimeContext {
    fn default() -> Self {
        TimeContext {
            formats: Vec::new(),
            offset: Utc.fix(),
        }
    }
}

impl TimeContext {
    pub fn new(formats: Vec<String>, offset: FixedOffset) -> Self {
        TimeContext { formats, offset }
    }
}

// =============================================================================
// Coercions
// =============================================================================

/// Numeric view of a value: integers and floats stay distinct
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

/// Coerce to a number. Strings participate when they parse; everything else
/// yields None.
pub fn to_number(v: &Value) -> Option<Number> {
    match v {
        Value::Integer(i) => Some(Number::Integer(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            if let Ok(i) = t.parse::<i64>() {
                Some(Number::Integer(i))
            } else {
                t.parse::<f64>().ok().filter(|f| f.is_finite()).map(Number::Float)
            }
        }
        _ => None,
    }
}

pub fn to_integer(v: &Value) -> Option<i64> {
    match to_number(v)? {
        Number::Integer(i) => Some(i),
        Number::Float(f) if f == f.trunc() => Some(f as i64),
        _ => None,
    }
}

pub fn to_float(v: &Value) -> Option<f64> {
    to_number(v).map(Number::as_f64)
}

/// Coerce to a datetime using the configured formats, then the built-in
/// ladder. Naive results are anchored at the session offset.
pub fn to_datetime(v: &Value, ctx: &TimeContext) -> Option<DateTime<FixedOffset>> {
    match v {
        Value::Datetime(dt) => Some(*dt),
        Value::String(s) => parse_datetime(s.trim(), ctx),
        _ => None,
    }
}

pub fn parse_datetime(s: &str, ctx: &TimeContext) -> Option<DateTime<FixedOffset>> {
    if s.is_empty() {
        return None;
    }
    for fmt in &ctx.formats {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return ctx.offset.from_local_datetime(&naive).single();
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return ctx
                .offset
                .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
                .single();
        }
    }
    for fmt in DATETIME_FORMATS {
        if fmt.contains("%:z") {
            if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
                return Some(dt);
            }
        } else if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return ctx.offset.from_local_datetime(&naive).single();
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return ctx
                .offset
                .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
                .single();
        }
    }
    None
}

/// Coerce to a boolean. Determined ternaries, 0/1 integers and the usual
/// string literals qualify.
pub fn to_boolean(v: &Value) -> Option<bool> {
    match v {
        Value::Boolean(b) => Some(*b),
        Value::Ternary(t) => t.as_bool(),
        Value::Integer(0) => Some(false),
        Value::Integer(1) => Some(true),
        Value::String(s) => match Ternary::parse(s.trim()) {
            Some(t) => t.as_bool(),
            None => None,
        },
        _ => None,
    }
}

/// Coerce to ternary for predicate positions: Null yields UNKNOWN.
pub fn to_ternary(v: &Value) -> Ternary {
    match v {
        Value::Ternary(t) => *t,
        Value::Boolean(b) => Ternary::from_bool(*b),
        Value::Null => Ternary::Unknown,
        Value::Integer(i) => Ternary::from_bool(*i != 0),
        Value::Float(f) => Ternary::from_bool(*f != 0.0),
        Value::String(s) => match Ternary::parse(s.trim()) {
            Some(t) => t,
            None => Ternary::Unknown,
        },
        Value::Datetime(_) => Ternary::Unknown,
    }
}

/// String form used when a value participates in concatenation or LIKE
pub fn to_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
            ArithmeticOp::Modulo => "%",
        };
        write!(f, "{}", s)
    }
}

/// Arithmetic over the value union.
///
/// Null propagates, non-numeric operands yield Null, Integer op Integer
/// stays Integer except division, and division by zero downgrades to Null
/// with a warning.
pub fn arithmetic(lhs: &Value, op: ArithmeticOp, rhs: &Value) -> Value {
    let (l, r) = match (to_number(lhs), to_number(rhs)) {
        (Some(l), Some(r)) => (l, r),
        _ => return Value::Null,
    };

    match (l, r) {
        (Number::Integer(a), Number::Integer(b)) => match op {
            ArithmeticOp::Add => integer_or_float(a.checked_add(b), a as f64 + b as f64),
            ArithmeticOp::Subtract => integer_or_float(a.checked_sub(b), a as f64 - b as f64),
            ArithmeticOp::Multiply => integer_or_float(a.checked_mul(b), a as f64 * b as f64),
            ArithmeticOp::Divide => {
                if b == 0 {
                    warn_divide_by_zero();
                    Value::Null
                } else {
                    Value::Float(a as f64 / b as f64)
                }
            }
            ArithmeticOp::Modulo => {
                if b == 0 {
                    warn_divide_by_zero();
                    Value::Null
                } else {
                    Value::Integer(a.wrapping_rem(b))
                }
            }
        },
        (l, r) => {
            let (a, b) = (l.as_f64(), r.as_f64());
            let f = match op {
                ArithmeticOp::Add => a + b,
                ArithmeticOp::Subtract => a - b,
                ArithmeticOp::Multiply => a * b,
                ArithmeticOp::Divide => {
                    if b == 0.0 {
                        warn_divide_by_zero();
                        return Value::Null;
                    }
                    a / b
                }
                ArithmeticOp::Modulo => {
                    if b == 0.0 {
                        warn_divide_by_zero();
                        return Value::Null;
                    }
                    a % b
                }
            };
            if f.is_finite() {
                Value::Float(f)
            } else {
                Value::Null
            }
        }
    }
}

fn integer_or_float(checked: Option<i64>, fallback: f64) -> Value {
    match checked {
        Some(i) => Value::Integer(i),
        None => Value::Float(fallback),
    }
}

fn warn_divide_by_zero() {
    log::warn!("divide by zero; the result is NULL");
}

/// Unary minus
pub fn negate(v: &Value) -> Value {
    match to_number(v) {
        Some(Number::Integer(i)) => Value::Integer(-i),
        Some(Number::Float(f)) => Value::Float(-f),
        None => Value::Null,
    }
}

/// String concatenation; Null propagates
pub fn concat(values: &[Value]) -> Value {
    let mut s = String::new();
    for v in values {
        match to_text(v) {
            Some(t) => s.push_str(&t),
            None => return Value::Null,
        }
    }
    Value::string(s)
}

// =============================================================================
// Comparison
// =============================================================================

/// Relational comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "<>",
            ComparisonOp::Less => "<",
            ComparisonOp::LessOrEqual => "<=",
            ComparisonOp::Greater => ">",
            ComparisonOp::GreaterOrEqual => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Order two values under the coercion ladder: numeric wins, then datetime,
/// then boolean, then string. None means the pair is incomparable (which
/// surfaces as UNKNOWN).
pub fn order(lhs: &Value, rhs: &Value, ctx: &TimeContext) -> Option<Ordering> {
    if lhs.is_null() || rhs.is_null() {
        return None;
    }

    if let (Some(l), Some(r)) = (to_number(lhs), to_number(rhs)) {
        return l.as_f64().partial_cmp(&r.as_f64());
    }

    if let (Some(l), Some(r)) = (to_datetime(lhs, ctx), to_datetime(rhs, ctx)) {
        return Some(l.cmp(&r));
    }

    if let (Some(l), Some(r)) = (to_boolean(lhs), to_boolean(rhs)) {
        return if l == r { Some(Ordering::Equal) } else { None };
    }

    if let (Value::String(l), Value::String(r)) = (lhs, rhs) {
        return Some(l.trim().cmp(r.trim()));
    }

    None
}

/// Relational comparison returning a ternary
pub fn compare(lhs: &Value, rhs: &Value, op: ComparisonOp, ctx: &TimeContext) -> Ternary {
    match order(lhs, rhs, ctx) {
        None => Ternary::Unknown,
        Some(ord) => {
            let b = match op {
                ComparisonOp::Equal => ord == Ordering::Equal,
                ComparisonOp::NotEqual => ord != Ordering::Equal,
                ComparisonOp::Less => ord == Ordering::Less,
                ComparisonOp::LessOrEqual => ord != Ordering::Greater,
                ComparisonOp::Greater => ord == Ordering::Greater,
                ComparisonOp::GreaterOrEqual => ord != Ordering::Less,
            };
            Ternary::from_bool(b)
        }
    }
}

pub fn equal(lhs: &Value, rhs: &Value, ctx: &TimeContext) -> Ternary {
    compare(lhs, rhs, ComparisonOp::Equal, ctx)
}

/// Identity used by set operations, DISTINCT and GROUP BY: Null equals Null,
/// numeric kinds unify, strings compare trimmed and case-insensitively.
pub fn identical(lhs: &Value, rhs: &Value) -> bool {
    comparison_key(lhs) == comparison_key(rhs)
}

/// Serialized grouping key for a value. Values with equal keys are the same
/// row element for set purposes.
pub fn comparison_key(v: &Value) -> String {
    match v {
        Value::Null => "[N]".to_string(),
        Value::Integer(i) => format!("[I]{}", i),
        Value::Float(f) => {
            if *f == f.trunc() && f.abs() < 1e15 {
                format!("[I]{}", *f as i64)
            } else {
                format!("[F]{}", f)
            }
        }
        Value::Boolean(b) => format!("[B]{}", b),
        Value::Ternary(t) => match t.as_bool() {
            Some(b) => format!("[B]{}", b),
            None => "[T]UNKNOWN".to_string(),
        },
        Value::Datetime(dt) => format!("[D]{}", dt.timestamp_nanos_opt().unwrap_or(0)),
        Value::String(s) => {
            let t = s.trim();
            match to_number(v) {
                Some(Number::Integer(i)) => format!("[I]{}", i),
                Some(Number::Float(f)) => {
                    if f == f.trunc() && f.abs() < 1e15 {
                        format!("[I]{}", f as i64)
                    } else {
                        format!("[F]{}", f)
                    }
                }
                None => format!("[S]{}", t.to_lowercase()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TimeContext {
        TimeContext::default()
    }

    #[test]
    fn kleene_truth_table() {
        use Ternary::*;
        assert_eq!(True.and(Unknown), Unknown);
        assert_eq!(False.and(Unknown), False);
        assert_eq!(True.or(Unknown), True);
        assert_eq!(False.or(Unknown), Unknown);
        assert_eq!(Unknown.not(), Unknown);
        assert!(!Unknown.is_true());
    }

    #[test]
    fn null_comparison_is_unknown() {
        assert_eq!(
            compare(&Value::Null, &Value::Null, ComparisonOp::Equal, &ctx()),
            Ternary::Unknown
        );
        assert_eq!(
            compare(&Value::Integer(1), &Value::Null, ComparisonOp::Equal, &ctx()),
            Ternary::Unknown
        );
    }

    #[test]
    fn value_equals_itself_unless_null() {
        let v = Value::string("abc");
        assert_eq!(equal(&v, &v, &ctx()), Ternary::True);
        assert_eq!(equal(&Value::Null, &Value::Null, &ctx()), Ternary::Unknown);
    }

    #[test]
    fn numeric_strings_compare_as_numbers() {
        assert_eq!(
            compare(&Value::string(" 10"), &Value::Integer(2), ComparisonOp::Greater, &ctx()),
            Ternary::True
        );
        assert_eq!(
            equal(&Value::string("1.0"), &Value::Integer(1), &ctx()),
            Ternary::True
        );
    }

    #[test]
    fn integer_arithmetic_stays_integer_except_division() {
        assert_eq!(
            arithmetic(&Value::Integer(6), ArithmeticOp::Add, &Value::Integer(2)),
            Value::Integer(8)
        );
        match arithmetic(&Value::Integer(6), ArithmeticOp::Divide, &Value::Integer(2)) {
            Value::Float(f) => assert_eq!(f, 3.0),
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn divide_by_zero_is_null() {
        assert!(arithmetic(&Value::Integer(1), ArithmeticOp::Divide, &Value::Integer(0)).is_null());
        assert!(arithmetic(&Value::Integer(1), ArithmeticOp::Modulo, &Value::Integer(0)).is_null());
    }

    #[test]
    fn non_numeric_operand_is_null() {
        assert!(arithmetic(&Value::string("abc"), ArithmeticOp::Add, &Value::Integer(1)).is_null());
        assert!(arithmetic(&Value::Null, ArithmeticOp::Add, &Value::Integer(1)).is_null());
    }

    #[test]
    fn identity_treats_null_as_equal() {
        assert!(identical(&Value::Null, &Value::Null));
        assert!(identical(&Value::Integer(1), &Value::Float(1.0)));
        assert!(identical(&Value::string("1"), &Value::Integer(1)));
        assert!(!identical(&Value::Null, &Value::Integer(0)));
    }

    #[test]
    fn datetime_parsing_ladder() {
        let c = ctx();
        assert!(parse_datetime("2024-02-29 12:00:00", &c).is_some());
        assert!(parse_datetime("2024-02-29T12:00:00+09:00", &c).is_some());
        assert!(parse_datetime("2024-02-29", &c).is_some());
        assert!(parse_datetime("not a date", &c).is_none());
    }

    #[test]
    fn configured_formats_take_precedence() {
        let c = TimeContext::new(vec!["%d.%m.%Y".to_string()], Utc.fix());
        let dt = parse_datetime("29.02.2024", &c).expect("custom format should parse");
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-02-29");
    }

    #[test]
    fn float_formatting_drops_integral_fraction() {
        assert_eq!(format_float(3.0), "3");
        assert_eq!(format_float(3.25), "3.25");
    }
}

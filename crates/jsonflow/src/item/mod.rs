//! Values flowing through the runtime: atomics, arrays, objects and function items.

use chrono::{FixedOffset, NaiveDate, NaiveTime};
use core::cmp::Ordering;
use core::fmt;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::sync::Arc;

use crate::error::{Error, Result};

pub mod casting;
pub mod codec;
pub mod json;
pub mod temporal;

pub use temporal::{DateTimeValue, DurationValue};

use crate::runtime::function::FunctionItem;

/// Ordered object members; keys are unique.
pub type ObjectMap = IndexMap<String, Item>;

#[derive(Debug, Clone, PartialEq)]
pub enum AtomicValue {
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Double(f64),
    Boolean(bool),
    Null,
    DateTime(DateTimeValue),
    Date {
        date: NaiveDate,
        tz: Option<FixedOffset>,
    },
    Time {
        time: NaiveTime,
        tz: Option<FixedOffset>,
    },
    Duration(DurationValue),
    YearMonthDuration(i32),
    /// Milliseconds.
    DayTimeDuration(i64),
}

#[derive(Debug, Clone)]
pub enum Item {
    Atomic(AtomicValue),
    Array(Arc<Vec<Item>>),
    Object(Arc<ObjectMap>),
    Function(Arc<FunctionItem>),
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Item::Atomic(a), Item::Atomic(b)) => a == b,
            (Item::Array(a), Item::Array(b)) => a == b,
            (Item::Object(a), Item::Object(b)) => a == b,
            (Item::Function(a), Item::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<AtomicValue> for Item {
    fn from(a: AtomicValue) -> Self {
        Item::Atomic(a)
    }
}

impl From<&str> for Item {
    fn from(s: &str) -> Self {
        Item::Atomic(AtomicValue::String(s.to_string()))
    }
}

impl From<String> for Item {
    fn from(s: String) -> Self {
        Item::Atomic(AtomicValue::String(s))
    }
}

impl From<i64> for Item {
    fn from(i: i64) -> Self {
        Item::Atomic(AtomicValue::Integer(i))
    }
}

impl From<f64> for Item {
    fn from(d: f64) -> Self {
        Item::Atomic(AtomicValue::Double(d))
    }
}

impl From<bool> for Item {
    fn from(b: bool) -> Self {
        Item::Atomic(AtomicValue::Boolean(b))
    }
}

impl Item {
    pub fn null() -> Self {
        Item::Atomic(AtomicValue::Null)
    }

    pub fn array(members: Vec<Item>) -> Self {
        Item::Array(Arc::new(members))
    }

    pub fn object<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Item)>) -> Self {
        Item::Object(Arc::new(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()))
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, Item::Atomic(_))
    }

    pub fn as_atomic(&self) -> Option<&AtomicValue> {
        match self {
            Item::Atomic(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectMap> {
        match self {
            Item::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Item]> {
        match self {
            Item::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Item::Atomic(AtomicValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Item::Atomic(a) => a.type_name(),
            Item::Array(_) => "array",
            Item::Object(_) => "object",
            Item::Function(_) => "function",
        }
    }
}

impl AtomicValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AtomicValue::String(_) => "string",
            AtomicValue::Integer(_) => "integer",
            AtomicValue::Decimal(_) => "decimal",
            AtomicValue::Double(_) => "double",
            AtomicValue::Boolean(_) => "boolean",
            AtomicValue::Null => "null",
            AtomicValue::DateTime(_) => "dateTime",
            AtomicValue::Date { .. } => "date",
            AtomicValue::Time { .. } => "time",
            AtomicValue::Duration(_) => "duration",
            AtomicValue::YearMonthDuration(_) => "yearMonthDuration",
            AtomicValue::DayTimeDuration(_) => "dayTimeDuration",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            AtomicValue::Integer(_) | AtomicValue::Decimal(_) | AtomicValue::Double(_)
        )
    }

    /// Lexical representation, as used by string conversion and concatenation.
    pub fn string_value(&self) -> String {
        match self {
            AtomicValue::String(s) => s.clone(),
            AtomicValue::Integer(i) => i.to_string(),
            AtomicValue::Decimal(d) => d.normalize().to_string(),
            AtomicValue::Double(d) => format_double(*d),
            AtomicValue::Boolean(b) => b.to_string(),
            AtomicValue::Null => "null".to_string(),
            AtomicValue::DateTime(dt) => temporal::format_date_time(dt),
            AtomicValue::Date { date, tz } => temporal::format_date(*date, *tz),
            AtomicValue::Time { time, tz } => temporal::format_time(*time, *tz),
            AtomicValue::Duration(d) => temporal::format_duration(*d),
            AtomicValue::YearMonthDuration(m) => temporal::format_duration(DurationValue {
                months: *m,
                millis: 0,
            }),
            AtomicValue::DayTimeDuration(ms) => temporal::format_duration(DurationValue {
                months: 0,
                millis: *ms,
            }),
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            AtomicValue::Integer(i) => Some(*i as f64),
            AtomicValue::Decimal(d) => d.to_f64(),
            AtomicValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub(crate) fn as_decimal(&self) -> Option<Decimal> {
        match self {
            AtomicValue::Integer(i) => Some(Decimal::from(*i)),
            AtomicValue::Decimal(d) => Some(*d),
            AtomicValue::Double(d) => Decimal::from_f64(*d),
            _ => None,
        }
    }
}

pub(crate) fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{d:.0}")
    } else {
        d.to_string()
    }
}

fn mismatch(op: &str, a: &AtomicValue, b: &AtomicValue) -> Error {
    Error::type_error(format!(
        "cannot {op} values of type \"{}\" and \"{}\"",
        a.type_name(),
        b.type_name()
    ))
}

/// Total order used by value comparisons and `order by`.
///
/// Numbers compare across integer/decimal/double; `null` is smaller than every
/// other atomic; comparing values of unrelated kinds is a type error.
pub fn compare_atomics(a: &AtomicValue, b: &AtomicValue) -> Result<Ordering> {
    use AtomicValue as A;
    match (a, b) {
        (A::Null, A::Null) => Ok(Ordering::Equal),
        (A::Null, _) => Ok(Ordering::Less),
        (_, A::Null) => Ok(Ordering::Greater),
        (A::Integer(x), A::Integer(y)) => Ok(x.cmp(y)),
        (A::Double(_), _) | (_, A::Double(_)) if a.is_numeric() && b.is_numeric() => {
            let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y)
                .ok_or_else(|| Error::type_error("NaN is not comparable"))
        }
        _ if a.is_numeric() && b.is_numeric() => {
            let (x, y) = (a.as_decimal(), b.as_decimal());
            match (x, y) {
                (Some(x), Some(y)) => Ok(x.cmp(&y)),
                _ => Err(mismatch("compare", a, b)),
            }
        }
        (A::String(x), A::String(y)) => Ok(x.cmp(y)),
        (A::Boolean(x), A::Boolean(y)) => Ok(x.cmp(y)),
        (A::DateTime(x), A::DateTime(y)) => Ok(x.value.cmp(&y.value)),
        (A::Date { date: x, .. }, A::Date { date: y, .. }) => Ok(x.cmp(y)),
        (A::Time { time: x, .. }, A::Time { time: y, .. }) => Ok(x.cmp(y)),
        (A::YearMonthDuration(x), A::YearMonthDuration(y)) => Ok(x.cmp(y)),
        (A::DayTimeDuration(x), A::DayTimeDuration(y)) => Ok(x.cmp(y)),
        (A::Duration(x), A::Duration(y)) if x == y => Ok(Ordering::Equal),
        _ => Err(mismatch("compare", a, b)),
    }
}

/// Equality with numeric promotion; values of unrelated kinds are a type
/// error except for `null`, which is only equal to itself.
pub fn atomics_equal(a: &AtomicValue, b: &AtomicValue) -> Result<bool> {
    match (a, b) {
        (AtomicValue::Duration(x), AtomicValue::Duration(y)) => Ok(x == y),
        _ => Ok(compare_atomics(a, b)? == Ordering::Equal),
    }
}

/// Effective boolean value of a materialized sequence.
pub fn effective_boolean_value(items: &[Item]) -> Result<bool> {
    let Some(first) = items.first() else {
        return Ok(false);
    };
    match first {
        Item::Array(_) | Item::Object(_) | Item::Function(_) => Ok(true),
        Item::Atomic(_) if items.len() > 1 => Err(Error::type_error(
            "effective boolean value is not defined for a sequence of more than one atomic item",
        )),
        Item::Atomic(a) => match a {
            AtomicValue::Boolean(b) => Ok(*b),
            AtomicValue::String(s) => Ok(!s.is_empty()),
            AtomicValue::Integer(i) => Ok(*i != 0),
            AtomicValue::Decimal(d) => Ok(!d.is_zero()),
            AtomicValue::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
            AtomicValue::Null => Ok(false),
            other => Err(Error::type_error(format!(
                "effective boolean value is not defined for type \"{}\"",
                other.type_name()
            ))),
        },
    }
}

fn write_json_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in s.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

/// JSON-style serialization: strings and temporal values are quoted.
impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Atomic(a) => match a {
                AtomicValue::Integer(_)
                | AtomicValue::Decimal(_)
                | AtomicValue::Double(_)
                | AtomicValue::Boolean(_)
                | AtomicValue::Null => f.write_str(&a.string_value()),
                _ => write_json_string(f, &a.string_value()),
            },
            Item::Array(members) => {
                f.write_str("[ ")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{m}")?;
                }
                f.write_str(" ]")
            }
            Item::Object(map) => {
                f.write_str("{ ")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_json_string(f, k)?;
                    write!(f, " : {v}")?;
                }
                f.write_str(" }")
            }
            Item::Function(func) => write!(f, "{func}"),
        }
    }
}

//! `cast as` / `castable as` across the atomic kinds.

use chrono::{NaiveTime, Offset, Utc};
use core::str::FromStr;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use super::temporal::{self, DateTimeValue, DurationValue};
use super::AtomicValue;
use crate::error::{Error, Result};
use crate::types::AtomicType;

fn not_castable(value: &AtomicValue, target: AtomicType) -> Error {
    Error::type_error(format!(
        "cannot cast value of type \"{}\" to \"{}\"",
        value.type_name(),
        target.name()
    ))
}

fn lexical(s: &str, target: AtomicType) -> Error {
    Error::invalid_cast(format!("\"{s}\" cannot be cast to \"{}\"", target.name()))
}

fn parse_integer(s: &str) -> Result<i64> {
    let t = s.trim();
    let t = t.strip_prefix('+').unwrap_or(t);
    t.parse::<i64>().map_err(|_| lexical(s, AtomicType::Integer))
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    let t = s.trim();
    if t.contains(['e', 'E']) || t.is_empty() {
        return Err(lexical(s, AtomicType::Decimal));
    }
    Decimal::from_str(t).map_err(|_| lexical(s, AtomicType::Decimal))
}

fn parse_double(s: &str) -> Result<f64> {
    match s.trim() {
        "INF" | "+INF" => Ok(f64::INFINITY),
        "-INF" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        t if t.eq_ignore_ascii_case("inf") || t.eq_ignore_ascii_case("infinity") => Err(lexical(s, AtomicType::Double)),
        t => t.parse::<f64>().map_err(|_| lexical(s, AtomicType::Double)),
    }
}

fn from_string(s: &str, target: AtomicType) -> Result<AtomicValue> {
    let value = match target {
        AtomicType::AnyAtomic | AtomicType::String => AtomicValue::String(s.to_string()),
        AtomicType::Integer => AtomicValue::Integer(parse_integer(s)?),
        AtomicType::Decimal => AtomicValue::Decimal(parse_decimal(s)?),
        AtomicType::Double => AtomicValue::Double(parse_double(s)?),
        AtomicType::Boolean => match s.trim() {
            "true" | "1" => AtomicValue::Boolean(true),
            "false" | "0" => AtomicValue::Boolean(false),
            _ => return Err(lexical(s, target)),
        },
        AtomicType::Null => match s.trim() {
            "null" => AtomicValue::Null,
            _ => return Err(lexical(s, target)),
        },
        AtomicType::DateTime => AtomicValue::DateTime(temporal::parse_date_time(s.trim())?),
        AtomicType::Date => {
            let (date, tz) = temporal::parse_date(s.trim())?;
            AtomicValue::Date { date, tz }
        }
        AtomicType::Time => {
            let (time, tz) = temporal::parse_time(s.trim())?;
            AtomicValue::Time { time, tz }
        }
        AtomicType::Duration => AtomicValue::Duration(temporal::parse_duration(s.trim())?),
        AtomicType::YearMonthDuration => {
            let d = temporal::parse_duration(s.trim())?;
            if d.millis != 0 {
                return Err(lexical(s, target));
            }
            AtomicValue::YearMonthDuration(d.months)
        }
        AtomicType::DayTimeDuration => {
            let d = temporal::parse_duration(s.trim())?;
            if d.months != 0 {
                return Err(lexical(s, target));
            }
            AtomicValue::DayTimeDuration(d.millis)
        }
    };
    Ok(value)
}

fn numeric_to(value: &AtomicValue, target: AtomicType) -> Result<AtomicValue> {
    let overflow =
        || Error::invalid_cast(format!("{} is out of range for \"{}\"", value.string_value(), target.name()));
    Ok(match (value, target) {
        (AtomicValue::Integer(i), AtomicType::Decimal) => AtomicValue::Decimal(Decimal::from(*i)),
        #[allow(clippy::cast_precision_loss)]
        (AtomicValue::Integer(i), AtomicType::Double) => AtomicValue::Double(*i as f64),
        (AtomicValue::Decimal(d), AtomicType::Integer) => {
            AtomicValue::Integer(d.trunc().to_i64().ok_or_else(overflow)?)
        }
        (AtomicValue::Decimal(d), AtomicType::Double) => AtomicValue::Double(d.to_f64().ok_or_else(overflow)?),
        (AtomicValue::Double(d), AtomicType::Integer) => {
            if !d.is_finite() {
                return Err(overflow());
            }
            AtomicValue::Integer(d.trunc().to_i64().ok_or_else(overflow)?)
        }
        (AtomicValue::Double(d), AtomicType::Decimal) => {
            AtomicValue::Decimal(Decimal::from_f64(*d).ok_or_else(overflow)?)
        }
        (v, AtomicType::Boolean) => AtomicValue::Boolean(match v {
            AtomicValue::Integer(i) => *i != 0,
            AtomicValue::Decimal(d) => !d.is_zero(),
            AtomicValue::Double(d) => *d != 0.0 && !d.is_nan(),
            _ => return Err(not_castable(value, target)),
        }),
        _ => return Err(not_castable(value, target)),
    })
}

/// Cast `value` to `target`. Lexical failures are `InvalidCast`, casts between
/// unrelated kinds are `Type` errors.
pub fn cast_as(value: &AtomicValue, target: AtomicType) -> Result<AtomicValue> {
    if target == AtomicType::AnyAtomic
        || (target.matches(value) && !matches!(target, AtomicType::Decimal | AtomicType::Duration))
    {
        return Ok(value.clone());
    }
    match (value, target) {
        (AtomicValue::String(s), _) => from_string(s, target),
        (_, AtomicType::String) => Ok(AtomicValue::String(value.string_value())),
        (AtomicValue::Decimal(_), AtomicType::Decimal) => Ok(value.clone()),
        (AtomicValue::Duration(_), AtomicType::Duration) => Ok(value.clone()),
        (v, _) if v.is_numeric() => numeric_to(v, target),
        (AtomicValue::Boolean(b), AtomicType::Integer) => Ok(AtomicValue::Integer(i64::from(*b))),
        (AtomicValue::Boolean(b), AtomicType::Decimal) => Ok(AtomicValue::Decimal(Decimal::from(i64::from(*b)))),
        (AtomicValue::Boolean(b), AtomicType::Double) => Ok(AtomicValue::Double(if *b { 1.0 } else { 0.0 })),
        (AtomicValue::DateTime(dt), AtomicType::Date) => {
            let local = dt.value.naive_local();
            Ok(AtomicValue::Date {
                date: local.date(),
                tz: dt.has_timezone.then(|| *dt.value.offset()),
            })
        }
        (AtomicValue::DateTime(dt), AtomicType::Time) => {
            let local = dt.value.naive_local();
            Ok(AtomicValue::Time {
                time: local.time(),
                tz: dt.has_timezone.then(|| *dt.value.offset()),
            })
        }
        (AtomicValue::Date { date, tz }, AtomicType::DateTime) => {
            let offset = tz.unwrap_or_else(|| Utc.fix());
            let midnight = date
                .and_time(NaiveTime::MIN)
                .and_local_timezone(offset)
                .single()
                .ok_or_else(|| not_castable(value, target))?;
            Ok(AtomicValue::DateTime(DateTimeValue {
                value: midnight,
                has_timezone: tz.is_some(),
            }))
        }
        (AtomicValue::Duration(d), AtomicType::YearMonthDuration) => Ok(AtomicValue::YearMonthDuration(d.months)),
        (AtomicValue::Duration(d), AtomicType::DayTimeDuration) => Ok(AtomicValue::DayTimeDuration(d.millis)),
        (AtomicValue::YearMonthDuration(m), AtomicType::Duration) => {
            Ok(AtomicValue::Duration(DurationValue { months: *m, millis: 0 }))
        }
        (AtomicValue::DayTimeDuration(ms), AtomicType::Duration) => {
            Ok(AtomicValue::Duration(DurationValue { months: 0, millis: *ms }))
        }
        (AtomicValue::YearMonthDuration(_), AtomicType::DayTimeDuration) => Ok(AtomicValue::DayTimeDuration(0)),
        (AtomicValue::DayTimeDuration(_), AtomicType::YearMonthDuration) => Ok(AtomicValue::YearMonthDuration(0)),
        _ => Err(not_castable(value, target)),
    }
}

pub fn is_castable_as(value: &AtomicValue, target: AtomicType) -> bool {
    cast_as(value, target).is_ok()
}

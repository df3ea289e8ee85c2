//! Binary checkpoint encoding for items crossing a distributed task boundary.
//!
//! Every item starts with a one-byte kind tag followed by a fixed layout per
//! kind. Integers are big-endian, strings are a `u32` byte length followed by
//! UTF-8. A sequence is a `u32` item count followed by the items.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike};
use rust_decimal::Decimal;
use std::sync::Arc;

use super::{AtomicValue, DateTimeValue, DurationValue, Item, ObjectMap};
use crate::error::{Error, ErrorCode, Result};
use crate::sequence::Sequence;

mod tag {
    pub const STRING: u8 = 0x01;
    pub const INTEGER: u8 = 0x02;
    pub const DECIMAL: u8 = 0x03;
    pub const DOUBLE: u8 = 0x04;
    pub const BOOLEAN: u8 = 0x05;
    pub const NULL: u8 = 0x06;
    pub const DATE_TIME: u8 = 0x07;
    pub const DATE: u8 = 0x08;
    pub const TIME: u8 = 0x09;
    pub const DURATION: u8 = 0x0a;
    pub const YEAR_MONTH_DURATION: u8 = 0x0b;
    pub const DAY_TIME_DURATION: u8 = 0x0c;
    pub const ARRAY: u8 = 0x20;
    pub const OBJECT: u8 = 0x21;
}

fn checkpoint(msg: impl Into<String>) -> Error {
    Error::new(ErrorCode::Checkpoint, msg)
}

fn ensure(buf: &impl Buf, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(checkpoint(format!(
            "truncated input while reading {what}: need {n} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(())
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| checkpoint(format!("length {len} does not fit the checkpoint format")))
}

fn put_str(buf: &mut impl BufMut, s: &str) -> Result<()> {
    buf.put_u32(len_u32(s.len())?);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_str(buf: &mut impl Buf) -> Result<String> {
    ensure(buf, 4, "string length")?;
    let len = buf.get_u32() as usize;
    ensure(buf, len, "string")?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|e| checkpoint(format!("invalid UTF-8 in string: {e}")))
}

fn put_offset(buf: &mut impl BufMut, tz: Option<FixedOffset>) {
    match tz {
        Some(tz) => {
            buf.put_u8(1);
            buf.put_i32(tz.local_minus_utc());
        }
        None => buf.put_u8(0),
    }
}

fn get_offset(buf: &mut impl Buf) -> Result<Option<FixedOffset>> {
    ensure(buf, 1, "timezone flag")?;
    if buf.get_u8() == 0 {
        return Ok(None);
    }
    ensure(buf, 4, "timezone")?;
    let secs = buf.get_i32();
    FixedOffset::east_opt(secs)
        .map(Some)
        .ok_or_else(|| checkpoint(format!("invalid timezone offset {secs}")))
}

fn put_atomic(buf: &mut impl BufMut, value: &AtomicValue) -> Result<()> {
    match value {
        AtomicValue::String(s) => {
            buf.put_u8(tag::STRING);
            put_str(buf, s)?;
        }
        AtomicValue::Integer(i) => {
            buf.put_u8(tag::INTEGER);
            buf.put_i64(*i);
        }
        AtomicValue::Decimal(d) => {
            buf.put_u8(tag::DECIMAL);
            buf.put_slice(&d.serialize());
        }
        AtomicValue::Double(d) => {
            buf.put_u8(tag::DOUBLE);
            buf.put_f64(*d);
        }
        AtomicValue::Boolean(b) => {
            buf.put_u8(tag::BOOLEAN);
            buf.put_u8(u8::from(*b));
        }
        AtomicValue::Null => buf.put_u8(tag::NULL),
        AtomicValue::DateTime(dt) => {
            buf.put_u8(tag::DATE_TIME);
            buf.put_i64(dt.value.timestamp());
            buf.put_u32(dt.value.timestamp_subsec_nanos());
            buf.put_i32(dt.value.offset().local_minus_utc());
            buf.put_u8(u8::from(dt.has_timezone));
        }
        AtomicValue::Date { date, tz } => {
            buf.put_u8(tag::DATE);
            buf.put_i32(date.num_days_from_ce());
            put_offset(buf, *tz);
        }
        AtomicValue::Time { time, tz } => {
            buf.put_u8(tag::TIME);
            buf.put_u32(time.num_seconds_from_midnight());
            buf.put_u32(time.nanosecond());
            put_offset(buf, *tz);
        }
        AtomicValue::Duration(d) => {
            buf.put_u8(tag::DURATION);
            buf.put_i32(d.months);
            buf.put_i64(d.millis);
        }
        AtomicValue::YearMonthDuration(m) => {
            buf.put_u8(tag::YEAR_MONTH_DURATION);
            buf.put_i32(*m);
        }
        AtomicValue::DayTimeDuration(ms) => {
            buf.put_u8(tag::DAY_TIME_DURATION);
            buf.put_i64(*ms);
        }
    }
    Ok(())
}

pub fn write_item(buf: &mut impl BufMut, item: &Item) -> Result<()> {
    match item {
        Item::Atomic(a) => put_atomic(buf, a),
        Item::Array(members) => {
            buf.put_u8(tag::ARRAY);
            buf.put_u32(len_u32(members.len())?);
            for m in members.iter() {
                write_item(buf, m)?;
            }
            Ok(())
        }
        Item::Object(map) => {
            buf.put_u8(tag::OBJECT);
            buf.put_u32(len_u32(map.len())?);
            for (k, v) in map.iter() {
                put_str(buf, k)?;
                write_item(buf, v)?;
            }
            Ok(())
        }
        Item::Function(f) => Err(checkpoint(format!("function item {f} cannot be serialized"))),
    }
}

pub fn read_item(buf: &mut impl Buf) -> Result<Item> {
    ensure(buf, 1, "item tag")?;
    let t = buf.get_u8();
    let atomic = match t {
        tag::STRING => AtomicValue::String(get_str(buf)?),
        tag::INTEGER => {
            ensure(buf, 8, "integer")?;
            AtomicValue::Integer(buf.get_i64())
        }
        tag::DECIMAL => {
            ensure(buf, 16, "decimal")?;
            let mut raw = [0u8; 16];
            buf.copy_to_slice(&mut raw);
            AtomicValue::Decimal(Decimal::deserialize(raw))
        }
        tag::DOUBLE => {
            ensure(buf, 8, "double")?;
            AtomicValue::Double(buf.get_f64())
        }
        tag::BOOLEAN => {
            ensure(buf, 1, "boolean")?;
            AtomicValue::Boolean(buf.get_u8() != 0)
        }
        tag::NULL => AtomicValue::Null,
        tag::DATE_TIME => {
            ensure(buf, 8 + 4 + 4 + 1, "dateTime")?;
            let secs = buf.get_i64();
            let nanos = buf.get_u32();
            let offset = buf.get_i32();
            let has_timezone = buf.get_u8() != 0;
            let tz = FixedOffset::east_opt(offset).ok_or_else(|| checkpoint(format!("invalid offset {offset}")))?;
            let utc = DateTime::from_timestamp(secs, nanos).ok_or_else(|| checkpoint("dateTime out of range"))?;
            AtomicValue::DateTime(DateTimeValue {
                value: utc.with_timezone(&tz),
                has_timezone,
            })
        }
        tag::DATE => {
            ensure(buf, 4, "date")?;
            let days = buf.get_i32();
            let date = NaiveDate::from_num_days_from_ce_opt(days).ok_or_else(|| checkpoint("date out of range"))?;
            AtomicValue::Date {
                date,
                tz: get_offset(buf)?,
            }
        }
        tag::TIME => {
            ensure(buf, 8, "time")?;
            let secs = buf.get_u32();
            let nanos = buf.get_u32();
            let time =
                NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                    .ok_or_else(|| checkpoint("time out of range"))?;
            AtomicValue::Time {
                time,
                tz: get_offset(buf)?,
            }
        }
        tag::DURATION => {
            ensure(buf, 12, "duration")?;
            let months = buf.get_i32();
            let millis = buf.get_i64();
            AtomicValue::Duration(DurationValue { months, millis })
        }
        tag::YEAR_MONTH_DURATION => {
            ensure(buf, 4, "yearMonthDuration")?;
            AtomicValue::YearMonthDuration(buf.get_i32())
        }
        tag::DAY_TIME_DURATION => {
            ensure(buf, 8, "dayTimeDuration")?;
            AtomicValue::DayTimeDuration(buf.get_i64())
        }
        tag::ARRAY => {
            ensure(buf, 4, "array length")?;
            let len = buf.get_u32() as usize;
            let mut members = Vec::with_capacity(len.min(buf.remaining()));
            for _ in 0..len {
                members.push(read_item(buf)?);
            }
            return Ok(Item::Array(Arc::new(members)));
        }
        tag::OBJECT => {
            ensure(buf, 4, "object length")?;
            let len = buf.get_u32() as usize;
            let mut map = ObjectMap::with_capacity(len.min(buf.remaining()));
            for _ in 0..len {
                let key = get_str(buf)?;
                let value = read_item(buf)?;
                if map.insert(key.clone(), value).is_some() {
                    return Err(checkpoint(format!("duplicate key \"{key}\" in encoded object")));
                }
            }
            return Ok(Item::Object(Arc::new(map)));
        }
        other => return Err(checkpoint(format!("unknown item tag 0x{other:02x}"))),
    };
    Ok(Item::Atomic(atomic))
}

pub fn write_sequence(buf: &mut impl BufMut, items: &[Item]) -> Result<()> {
    buf.put_u32(len_u32(items.len())?);
    for item in items {
        write_item(buf, item)?;
    }
    Ok(())
}

pub fn read_sequence(buf: &mut impl Buf) -> Result<Sequence> {
    ensure(buf, 4, "sequence length")?;
    let len = buf.get_u32() as usize;
    let mut items = Vec::with_capacity(len.min(buf.remaining()));
    for _ in 0..len {
        items.push(read_item(buf)?);
    }
    Ok(Sequence::from(items))
}

/// Encode a whole sequence into a standalone buffer.
pub fn encode_sequence(items: &[Item]) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    write_sequence(&mut buf, items)?;
    Ok(buf.freeze())
}

/// Decode a buffer produced by [`encode_sequence`]; trailing bytes are rejected.
pub fn decode_sequence(bytes: &[u8]) -> Result<Sequence> {
    let mut buf = bytes;
    let seq = read_sequence(&mut buf)?;
    if buf.has_remaining() {
        return Err(checkpoint(format!("{} trailing bytes after encoded sequence", buf.remaining())));
    }
    Ok(seq)
}

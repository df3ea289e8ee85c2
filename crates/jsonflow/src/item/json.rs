use core::str::FromStr;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;

use super::{AtomicValue, Item, ObjectMap};
use crate::error::Result;

/// Parse JSON text into a single item. Object member order is preserved.
pub fn parse_json(text: &str) -> Result<Item> {
    let value: Value = serde_json::from_str(text)?;
    Ok(from_json_value(value))
}

/// Numbers keep the kind their literal is written in: an exponent makes a
/// double, a fraction a decimal, and anything else an integer. Integers
/// outside the 64-bit range fall back to decimals.
pub fn from_json_value(value: Value) -> Item {
    match value {
        Value::Null => Item::Atomic(AtomicValue::Null),
        Value::Bool(b) => Item::Atomic(AtomicValue::Boolean(b)),
        Value::Number(n) => Item::Atomic(number_literal(&n.to_string())),
        Value::String(s) => Item::Atomic(AtomicValue::String(s)),
        Value::Array(members) => Item::Array(Arc::new(members.into_iter().map(from_json_value).collect())),
        Value::Object(map) => {
            let members: ObjectMap = map.into_iter().map(|(k, v)| (k, from_json_value(v))).collect();
            Item::Object(Arc::new(members))
        }
    }
}

fn number_literal(text: &str) -> AtomicValue {
    let double = || AtomicValue::Double(f64::from_str(text).unwrap_or(f64::NAN));
    if text.contains(['e', 'E']) {
        return double();
    }
    if !text.contains('.')
        && let Ok(i) = i64::from_str(text)
    {
        return AtomicValue::Integer(i);
    }
    Decimal::from_str(text).map_or_else(|_| double(), AtomicValue::Decimal)
}

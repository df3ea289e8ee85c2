//! Declared schemas for structured collections.
//!
//! A declared schema must name exactly the columns found in the data. Each
//! declared type must match the observed one, up to numeric widening: a
//! declared `double` accepts observed `float` and every integer width, a
//! declared `long` accepts `integer` and `short`, a declared `integer`
//! accepts `short`. A column that only ever held nulls accepts any
//! declaration. Observed integer columns get the narrowest width that holds
//! every value.

use super::{Cell, Column, ColumnType, Row, Schema};
use crate::error::{Error, ErrorCode, Result};
use crate::item::{AtomicValue, Item};

fn invalid_schema(msg: impl Into<String>) -> Error {
    Error::new(ErrorCode::Schema, msg)
}

/// Parse a schema given as an object item, e.g. `{ "id": "integer", "tags": ["string"] }`.
pub fn parse_declared_schema(schema: &Item) -> Result<Schema> {
    let map = schema
        .as_object()
        .ok_or_else(|| invalid_schema(format!("schema must be an object, found {}", schema.type_name())))?;
    let mut columns = Vec::with_capacity(map.len());
    for (name, declared) in map {
        columns.push(Column::new(name.as_str(), parse_declared_type(name, declared)?));
    }
    Ok(Schema::new(columns))
}

fn parse_declared_type(column: &str, declared: &Item) -> Result<ColumnType> {
    match declared {
        Item::Atomic(AtomicValue::String(name)) => ColumnType::from_name(name)
            .ok_or_else(|| Error::schema(column, format!("unknown type name '{name}'"))),
        Item::Array(members) => match members.as_slice() {
            [] => Err(Error::schema(column, "arrays in schema must define a type for their contents")),
            [inner] => Ok(ColumnType::Array(Box::new(parse_declared_type(column, inner)?))),
            _ => Err(Error::schema(
                column,
                format!("arrays in schema can define only a single type for their contents: {declared} is invalid"),
            )),
        },
        other => Err(Error::schema(
            column,
            format!("schema can only contain arrays or strings: {other} is not accepted"),
        )),
    }
}

pub fn is_applicable(declared: &ColumnType, observed: &ColumnType) -> bool {
    match (declared, observed) {
        (d, o) if d == o => true,
        (_, ColumnType::Null)
        | (
            ColumnType::Double,
            ColumnType::Long | ColumnType::Integer | ColumnType::Short | ColumnType::Float,
        )
        | (ColumnType::Long, ColumnType::Integer | ColumnType::Short)
        | (ColumnType::Integer, ColumnType::Short) => true,
        (ColumnType::Array(d), ColumnType::Array(o)) => is_applicable(d, o),
        _ => false,
    }
}

/// Check a declared schema against the schema observed in the data.
pub fn reconcile(declared: &Schema, observed: &Schema) -> Result<()> {
    for column in &observed.columns {
        let Some(index) = declared.index_of(&column.name) else {
            return Err(Error::schema(
                &column.name,
                format!("missing type information for '{}' column", column.name),
            ));
        };
        let declared_type = &declared.columns[index].ty;
        if !is_applicable(declared_type, &column.ty) {
            return Err(Error::schema(
                &column.name,
                format!(
                    "expected '{}' type for column '{}', but found '{declared_type}'",
                    column.ty, column.name
                ),
            ));
        }
    }
    for column in &declared.columns {
        if observed.index_of(&column.name).is_none() {
            return Err(Error::schema(
                &column.name,
                format!("redundant type information for non-existent column '{}'", column.name),
            ));
        }
    }
    Ok(())
}

fn observed_type(column: &str, item: &Item) -> Result<ColumnType> {
    Ok(match item {
        Item::Atomic(AtomicValue::Null) => ColumnType::Null,
        Item::Atomic(AtomicValue::Integer(i)) => {
            if i16::try_from(*i).is_ok() {
                ColumnType::Short
            } else if i32::try_from(*i).is_ok() {
                ColumnType::Integer
            } else {
                ColumnType::Long
            }
        }
        Item::Atomic(AtomicValue::Double(_) | AtomicValue::Decimal(_)) => ColumnType::Double,
        Item::Atomic(AtomicValue::Boolean(_)) => ColumnType::Boolean,
        Item::Atomic(_) => ColumnType::String,
        Item::Array(members) => {
            let mut inner = ColumnType::Null;
            for m in members.iter() {
                inner = widen(column, &inner, &observed_type(column, m)?)?;
            }
            ColumnType::Array(Box::new(inner))
        }
        Item::Object(_) | Item::Function(_) => {
            return Err(Error::schema(
                column,
                format!("values of type {} cannot be stored in a typed column", item.type_name()),
            ));
        }
    })
}

fn integer_rank(t: &ColumnType) -> Option<u8> {
    match t {
        ColumnType::Short => Some(1),
        ColumnType::Integer => Some(2),
        ColumnType::Long => Some(3),
        _ => None,
    }
}

/// Smallest type holding values of both `a` and `b`.
fn widen(column: &str, a: &ColumnType, b: &ColumnType) -> Result<ColumnType> {
    if a == b {
        return Ok(a.clone());
    }
    Ok(match (a, b) {
        (ColumnType::Null, t) | (t, ColumnType::Null) => t.clone(),
        (x, y) if integer_rank(x).is_some() && integer_rank(y).is_some() => {
            if integer_rank(x) > integer_rank(y) {
                x.clone()
            } else {
                y.clone()
            }
        }
        (ColumnType::Double, y) if integer_rank(y).is_some() => ColumnType::Double,
        (x, ColumnType::Double) if integer_rank(x).is_some() => ColumnType::Double,
        (ColumnType::Array(x), ColumnType::Array(y)) => ColumnType::Array(Box::new(widen(column, x, y)?)),
        _ => {
            return Err(Error::schema(column, format!("mixes values of type '{a}' and '{b}'")));
        }
    })
}

/// Schema observed in a list of objects: the union of their keys in order
/// of first appearance, each typed by the widest value seen.
pub fn infer_schema(objects: &[Item]) -> Result<Schema> {
    let mut columns: Vec<Column> = Vec::new();
    for object in objects {
        let map = object.as_object().ok_or_else(|| {
            Error::type_error(format!(
                "only objects can be converted to typed rows, found {}",
                object.type_name()
            ))
        })?;
        for (key, value) in map {
            let ty = observed_type(key, value)?;
            match columns.iter_mut().find(|c| &*c.name == key.as_str()) {
                Some(column) => column.ty = widen(key, &column.ty, &ty)?,
                None => columns.push(Column::new(key.as_str(), ty)),
            }
        }
    }
    Ok(Schema::new(columns))
}

fn convert_cell(column: &str, item: &Item, ty: &ColumnType) -> Result<Cell> {
    let mismatch = || Error::schema(column, format!("value {item} does not fit type '{ty}'"));
    Ok(match (item, ty) {
        (Item::Atomic(AtomicValue::Null), _) => Cell::Null,
        (Item::Atomic(AtomicValue::Integer(i)), ColumnType::Long) => Cell::Long(*i),
        (Item::Atomic(AtomicValue::Integer(i)), ColumnType::Integer) => {
            Cell::Integer(i32::try_from(*i).map_err(|_| mismatch())?)
        }
        (Item::Atomic(AtomicValue::Integer(i)), ColumnType::Short) => {
            Cell::Short(i16::try_from(*i).map_err(|_| mismatch())?)
        }
        (Item::Atomic(a), ColumnType::Double) if a.is_numeric() => Cell::Double(a.as_f64().ok_or_else(mismatch)?),
        #[allow(clippy::cast_possible_truncation)]
        (Item::Atomic(a), ColumnType::Float) if a.is_numeric() => {
            Cell::Float(a.as_f64().ok_or_else(mismatch)? as f32)
        }
        (Item::Atomic(AtomicValue::Boolean(b)), ColumnType::Boolean) => Cell::Boolean(*b),
        (Item::Atomic(a), ColumnType::String) => Cell::String(a.string_value()),
        (Item::Array(members), ColumnType::Array(inner)) => Cell::Array(
            members
                .iter()
                .map(|m| convert_cell(column, m, inner))
                .collect::<Result<Vec<_>>>()?,
        ),
        _ => return Err(mismatch()),
    })
}

/// Convert objects into rows laid out by `schema`; absent keys become nulls.
pub fn convert_objects(objects: &[Item], schema: &Schema) -> Result<Vec<Row>> {
    objects
        .iter()
        .map(|object| {
            let map = object
                .as_object()
                .ok_or_else(|| Error::type_error(format!("expected an object, found {}", object.type_name())))?;
            schema
                .columns
                .iter()
                .map(|column| match map.get(&*column.name) {
                    Some(value) => convert_cell(&column.name, value, &column.ty),
                    None => Ok(Cell::Null),
                })
                .collect::<Result<Row>>()
        })
        .collect()
}

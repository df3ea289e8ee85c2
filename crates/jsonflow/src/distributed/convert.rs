//! Mapping between items / tuples and engine rows.

use std::sync::Arc;

use super::{Cell, CollectionHandle, Column, ColumnType, Row, Schema};
use crate::config::EngineContext;
use crate::context::VariableValue;
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::expr::VarName;
use crate::flwor::FlworTuple;
use crate::item::codec::{decode_sequence, encode_sequence};
use crate::item::{AtomicValue, Item, ObjectMap};
use crate::sequence::Sequence;

/// Column holding one encoded item per row in item collections.
pub const ITEM_COLUMN: &str = "item";

/// How rows of an item collection map back to items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemView {
    /// One binary-encoded item per row in `column`.
    Encoded { column: Arc<str> },
    /// Typed columns; each row is read back as an object.
    Structured,
}

/// Handle to a distributed sequence of items.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedItems {
    pub handle: CollectionHandle,
    pub view: ItemView,
}

impl DistributedItems {
    pub fn encoded(handle: CollectionHandle) -> Self {
        Self {
            handle,
            view: ItemView::Encoded {
                column: Arc::from(ITEM_COLUMN),
            },
        }
    }

    pub fn structured(handle: CollectionHandle) -> Self {
        Self {
            handle,
            view: ItemView::Structured,
        }
    }

    pub fn is_structured(&self) -> bool {
        self.view == ItemView::Structured
    }

    /// Distribute local items over `partitions` (engine default when `None`).
    pub fn from_items(engine: &EngineContext, items: &[Item], partitions: Option<usize>) -> Result<Self> {
        let rows = items
            .iter()
            .map(|item| Ok(vec![Cell::Binary(encode_sequence(core::slice::from_ref(item))?)]))
            .collect::<Result<Vec<Row>>>()?;
        let schema = Schema::new(vec![Column::new(ITEM_COLUMN, ColumnType::Binary)]);
        let handle = engine.engine().create_collection(rows, schema, partitions)?;
        Ok(Self::encoded(handle))
    }

    /// Columns a row-level callable needs to rebuild the item of a row.
    pub fn item_columns(&self, schema: &Schema) -> Vec<Arc<str>> {
        match &self.view {
            ItemView::Encoded { column } => vec![column.clone()],
            ItemView::Structured => schema.columns.iter().map(|c| c.name.clone()).collect(),
        }
    }

    pub fn count(&self, engine: &EngineContext) -> Result<u64> {
        engine.engine().count(self.handle)
    }

    pub fn collect(&self, engine: &EngineContext, limit: Option<usize>) -> Result<Vec<Item>> {
        let schema = engine.engine().schema(self.handle)?;
        let args = self.item_columns(&schema);
        let indices = args
            .iter()
            .map(|name| schema.require(name))
            .collect::<Result<Vec<usize>>>()?;
        let rows = engine.engine().take(self.handle, limit)?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let cells: Vec<Cell> = indices.iter().map(|i| row[*i].clone()).collect();
            items.push(row_item(&self.view, &schema, &cells)?);
        }
        Ok(items)
    }

    /// Pull the whole collection into local evaluation, failing when it holds
    /// more items than the configured materialization cap.
    pub fn materialize_capped(&self, engine: &EngineContext, location: &SourceLocation) -> Result<Sequence> {
        let cap = engine.config().materialization_cap;
        let items = self.collect(engine, Some(cap.saturating_add(1)))?;
        if items.len() > cap {
            return Err(Error::new(
                ErrorCode::MaterializationCap,
                format!("distributed sequence has more than {cap} items and cannot be evaluated locally"),
            )
            .at(location));
        }
        tracing::trace!(handle = %self.handle, items = items.len(), "materialized distributed sequence");
        Ok(Sequence::from(items))
    }
}

/// Rebuild the item of one row from the cells named by [`DistributedItems::item_columns`].
pub fn row_item(view: &ItemView, schema: &Schema, cells: &[Cell]) -> Result<Item> {
    match view {
        ItemView::Encoded { .. } => {
            let cell = cells
                .first()
                .ok_or_else(|| Error::internal("encoded item row without item column"))?;
            let seq = match cell {
                Cell::Binary(bytes) => decode_sequence(bytes)?,
                other => return cell_to_item(other),
            };
            match seq.items() {
                [item] => Ok(item.clone()),
                items => Ok(Item::array(items.to_vec())),
            }
        }
        ItemView::Structured => {
            let mut map = ObjectMap::with_capacity(cells.len());
            for (column, cell) in schema.columns.iter().zip(cells) {
                map.insert(column.name.to_string(), cell_to_item(cell)?);
            }
            Ok(Item::Object(Arc::new(map)))
        }
    }
}

pub fn cell_to_item(cell: &Cell) -> Result<Item> {
    Ok(match cell {
        Cell::Null => Item::null(),
        Cell::Long(v) => Item::Atomic(AtomicValue::Integer(*v)),
        Cell::Integer(v) => Item::Atomic(AtomicValue::Integer(i64::from(*v))),
        Cell::Short(v) => Item::Atomic(AtomicValue::Integer(i64::from(*v))),
        Cell::Double(v) => Item::Atomic(AtomicValue::Double(*v)),
        Cell::Float(v) => Item::Atomic(AtomicValue::Double(f64::from(*v))),
        Cell::Boolean(v) => Item::Atomic(AtomicValue::Boolean(*v)),
        Cell::String(v) => Item::Atomic(AtomicValue::String(v.clone())),
        Cell::Binary(bytes) => {
            let seq = decode_sequence(bytes)?;
            match seq.items() {
                [item] => item.clone(),
                items => Item::array(items.to_vec()),
            }
        }
        Cell::Array(members) => Item::array(members.iter().map(cell_to_item).collect::<Result<Vec<_>>>()?),
    })
}

/// Physical representation of a tuple variable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnEncoding {
    /// Binary-encoded sequence.
    Sequence,
    /// Length of the sequence only.
    Count,
    /// A single integer item stored natively (positions, counters).
    Integer,
}

impl ColumnEncoding {
    pub fn column_type(self) -> ColumnType {
        match self {
            ColumnEncoding::Sequence => ColumnType::Binary,
            ColumnEncoding::Count | ColumnEncoding::Integer => ColumnType::Long,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleColumn {
    pub variable: VarName,
    pub encoding: ColumnEncoding,
}

impl TupleColumn {
    pub fn new(variable: VarName, encoding: ColumnEncoding) -> Self {
        Self { variable, encoding }
    }

    pub fn column(&self) -> Column {
        Column::new(self.variable.clone(), self.encoding.column_type())
    }
}

/// Handle to a distributed FLWOR tuple stream: one column per carried variable.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedTuples {
    pub handle: CollectionHandle,
    pub columns: Vec<TupleColumn>,
}

impl DistributedTuples {
    pub fn column(&self, name: &str) -> Option<&TupleColumn> {
        self.columns.iter().find(|c| &*c.variable == name)
    }

    pub fn names(&self) -> Vec<Arc<str>> {
        self.columns.iter().map(|c| c.variable.clone()).collect()
    }

    pub fn collect(&self, engine: &EngineContext, limit: Option<usize>) -> Result<Vec<FlworTuple>> {
        let schema = engine.engine().schema(self.handle)?;
        let indices = self
            .columns
            .iter()
            .map(|c| schema.require(&c.variable))
            .collect::<Result<Vec<usize>>>()?;
        let rows = engine.engine().take(self.handle, limit)?;
        rows.iter()
            .map(|row| {
                let cells: Vec<Cell> = indices.iter().map(|i| row[*i].clone()).collect();
                decode_tuple(&self.columns, &cells)
            })
            .collect()
    }

    /// Pull every tuple into local evaluation, respecting the materialization cap.
    pub fn materialize_capped(&self, engine: &EngineContext, location: &SourceLocation) -> Result<Vec<FlworTuple>> {
        let cap = engine.config().materialization_cap;
        let tuples = self.collect(engine, Some(cap.saturating_add(1)))?;
        if tuples.len() > cap {
            return Err(Error::new(
                ErrorCode::MaterializationCap,
                format!("distributed tuple stream has more than {cap} tuples and cannot be evaluated locally"),
            )
            .at(location));
        }
        Ok(tuples)
    }
}

pub fn decode_tuple(columns: &[TupleColumn], cells: &[Cell]) -> Result<FlworTuple> {
    let mut tuple = FlworTuple::new();
    for (column, cell) in columns.iter().zip(cells) {
        tuple.bind(column.variable.clone(), decode_value(cell, column.encoding)?);
    }
    Ok(tuple)
}

pub fn decode_value(cell: &Cell, encoding: ColumnEncoding) -> Result<VariableValue> {
    let unexpected = || {
        Error::internal(format!(
            "column holds {} where {encoding:?} encoding was expected",
            cell.column_type()
        ))
    };
    match (encoding, cell) {
        (ColumnEncoding::Sequence | ColumnEncoding::Integer, Cell::Null) => Ok(VariableValue::Local(Sequence::empty())),
        (ColumnEncoding::Sequence, Cell::Binary(bytes)) => Ok(VariableValue::Local(decode_sequence(bytes)?)),
        (ColumnEncoding::Count, c) => {
            let n = c.as_long().ok_or_else(unexpected)?;
            Ok(VariableValue::Count(u64::try_from(n).map_err(|_| unexpected())?))
        }
        (ColumnEncoding::Integer, c) => {
            let n = c.as_long().ok_or_else(unexpected)?;
            Ok(VariableValue::Local(Sequence::single(n)))
        }
        _ => Err(unexpected()),
    }
}

pub fn encode_value(value: &VariableValue, encoding: ColumnEncoding) -> Result<Cell> {
    match (encoding, value) {
        (ColumnEncoding::Sequence, VariableValue::Local(seq)) => Ok(Cell::Binary(encode_sequence(seq.items())?)),
        (ColumnEncoding::Count, VariableValue::Local(seq)) => {
            Ok(Cell::Long(i64::try_from(seq.len()).unwrap_or(i64::MAX)))
        }
        (ColumnEncoding::Count, VariableValue::Count(n)) => Ok(Cell::Long(i64::try_from(*n).unwrap_or(i64::MAX))),
        (ColumnEncoding::Integer, VariableValue::Local(seq)) => match seq.items() {
            [Item::Atomic(AtomicValue::Integer(i))] => Ok(Cell::Long(*i)),
            _ => Err(Error::internal("integer column bound to a non-integer value")),
        },
        (_, VariableValue::Distributed(_)) => Err(Error::internal(
            "a distributed sequence cannot be stored in a tuple column",
        )),
        (ColumnEncoding::Sequence | ColumnEncoding::Integer, VariableValue::Count(_)) => Err(Error::internal(
            "count-only variable requested as a full value",
        )),
    }
}

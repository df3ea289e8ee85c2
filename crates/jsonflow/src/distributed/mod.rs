//! Contract between the runtime and a distributed collection engine.
//!
//! The runtime never touches partitions directly: it creates collections,
//! registers row-level callables and submits declarative [`Selection`]s.
//! Items cross the boundary as binary-encoded sequences (see
//! [`crate::item::codec`]) unless a collection carries a typed schema.

use bytes::Bytes;
use core::cmp::Ordering;
use core::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::expr::ComparisonOp;

pub mod convert;
pub mod memory;
pub mod schema;
pub mod scope;
pub mod udf;

pub use convert::{ColumnEncoding, DistributedItems, DistributedTuples, ItemView, TupleColumn};

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Long(i64),
    Integer(i32),
    Short(i16),
    Double(f64),
    Float(f32),
    Boolean(bool),
    String(String),
    Binary(Bytes),
    Array(Vec<Cell>),
}

pub type Row = Vec<Cell>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Null,
    Long,
    Integer,
    Short,
    Double,
    Float,
    Boolean,
    String,
    Binary,
    Array(Box<ColumnType>),
}

impl ColumnType {
    pub fn from_name(name: &str) -> Option<ColumnType> {
        Some(match name {
            "null" => ColumnType::Null,
            "long" => ColumnType::Long,
            "integer" => ColumnType::Integer,
            "short" => ColumnType::Short,
            "double" => ColumnType::Double,
            "float" => ColumnType::Float,
            "boolean" => ColumnType::Boolean,
            "string" => ColumnType::String,
            "binary" => ColumnType::Binary,
            _ => return None,
        })
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Null => f.write_str("null"),
            ColumnType::Long => f.write_str("long"),
            ColumnType::Integer => f.write_str("integer"),
            ColumnType::Short => f.write_str("short"),
            ColumnType::Double => f.write_str("double"),
            ColumnType::Float => f.write_str("float"),
            ColumnType::Boolean => f.write_str("boolean"),
            ColumnType::String => f.write_str("string"),
            ColumnType::Binary => f.write_str("binary"),
            ColumnType::Array(inner) => write!(f, "[{inner}]"),
        }
    }
}

impl Cell {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Cell::Null => ColumnType::Null,
            Cell::Long(_) => ColumnType::Long,
            Cell::Integer(_) => ColumnType::Integer,
            Cell::Short(_) => ColumnType::Short,
            Cell::Double(_) => ColumnType::Double,
            Cell::Float(_) => ColumnType::Float,
            Cell::Boolean(_) => ColumnType::Boolean,
            Cell::String(_) => ColumnType::String,
            Cell::Binary(_) => ColumnType::Binary,
            Cell::Array(members) => ColumnType::Array(Box::new(
                members
                    .iter()
                    .map(Cell::column_type)
                    .find(|t| *t != ColumnType::Null)
                    .unwrap_or(ColumnType::Null),
            )),
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Cell::Long(v) => Some(*v),
            Cell::Integer(v) => Some(i64::from(*v)),
            Cell::Short(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    fn as_double(&self) -> Option<f64> {
        match self {
            Cell::Double(v) => Some(*v),
            Cell::Float(v) => Some(f64::from(*v)),
            #[allow(clippy::cast_precision_loss)]
            other => other.as_long().map(|v| v as f64),
        }
    }

    pub fn is_truthy(&self) -> bool {
        matches!(self, Cell::Boolean(true))
    }
}

/// Ordering used by sort keys and column comparisons. Nulls sort first.
pub fn compare_cells(a: &Cell, b: &Cell) -> Result<Ordering> {
    match (a, b) {
        (Cell::Null, Cell::Null) => Ok(Ordering::Equal),
        (Cell::Null, _) => Ok(Ordering::Less),
        (_, Cell::Null) => Ok(Ordering::Greater),
        (Cell::String(x), Cell::String(y)) => Ok(x.cmp(y)),
        (Cell::Boolean(x), Cell::Boolean(y)) => Ok(x.cmp(y)),
        (Cell::Binary(x), Cell::Binary(y)) => Ok(x.cmp(y)),
        (Cell::Array(x), Cell::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_cells(l, r)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => {
            if let (Some(x), Some(y)) = (a.as_long(), b.as_long()) {
                return Ok(x.cmp(&y));
            }
            match (a.as_double(), b.as_double()) {
                (Some(x), Some(y)) => x
                    .partial_cmp(&y)
                    .ok_or_else(|| Error::engine("NaN cannot be ordered")),
                _ => Err(Error::engine(format!(
                    "cannot compare {} with {}",
                    a.column_type(),
                    b.column_type()
                ))),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: Arc<str>,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<Arc<str>>, ty: ColumnType) -> Self {
        Self { name: name.into(), ty }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| &*c.name == name)
    }

    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| Error::engine(format!("collection has no column '{name}'")))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Opaque reference to a collection owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionHandle(pub u64);

impl fmt::Display for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collection#{}", self.0)
    }
}

/// Row-level callable registered with the engine.
pub trait RowUdf: Send + Sync {
    fn call(&self, args: &[Cell]) -> Result<Cell>;
}

/// Combines the cells of one column within a group.
pub trait Aggregate: Send + Sync {
    fn aggregate(&self, values: &[Cell]) -> Result<Cell>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Udf { name: Arc<str>, args: Vec<Arc<str>> },
    Compare { column: Arc<str>, op: ComparisonOp, value: Cell },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Keep a column, optionally under a new name.
    Column { source: Arc<str>, alias: Arc<str> },
    Udf { name: Arc<str>, args: Vec<Arc<str>>, output: Column },
}

impl Projection {
    pub fn keep(name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        Projection::Column {
            source: name.clone(),
            alias: name,
        }
    }

    pub fn output_name(&self) -> &Arc<str> {
        match self {
            Projection::Column { alias, .. } => alias,
            Projection::Udf { output, .. } => &output.name,
        }
    }
}

/// One output row per element of the array a UDF returns. A `Null` element
/// produces a row whose output is `Null` and whose position is 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Explode {
    pub udf: Arc<str>,
    pub args: Vec<Arc<str>>,
    pub output: Column,
    pub position: Option<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub column: Arc<str>,
    pub function: Arc<str>,
    pub output: Column,
}

/// Groups appear in order of first occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub keys: Vec<Arc<str>>,
    pub aggregates: Vec<Aggregation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub column: Arc<str>,
    pub descending: bool,
}

/// Declarative operation over one collection, applied in field order:
/// row numbering, filter, explode, projection, grouping, sort.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub input: CollectionHandle,
    /// Appends a 1-based row number (over the whole input) under this name.
    pub row_number: Option<Arc<str>>,
    pub filter: Option<Predicate>,
    pub explode: Option<Explode>,
    /// `None` keeps every column.
    pub projections: Option<Vec<Projection>>,
    pub group_by: Option<GroupBy>,
    /// Stable sort.
    pub sort: Vec<SortKey>,
}

impl Selection {
    pub fn new(input: CollectionHandle) -> Self {
        Self {
            input,
            row_number: None,
            filter: None,
            explode: None,
            projections: None,
            group_by: None,
            sort: Vec::new(),
        }
    }

    pub fn with_row_number(mut self, column: impl Into<Arc<str>>) -> Self {
        self.row_number = Some(column.into());
        self
    }

    pub fn with_filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn with_explode(mut self, explode: Explode) -> Self {
        self.explode = Some(explode);
        self
    }

    pub fn with_projections(mut self, projections: Vec<Projection>) -> Self {
        self.projections = Some(projections);
        self
    }

    pub fn with_group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = Some(group_by);
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }
}

pub trait DistributedEngine: Send + Sync {
    /// Partition `rows` into a new collection. `partitions` falls back to the
    /// engine default.
    fn create_collection(&self, rows: Vec<Row>, schema: Schema, partitions: Option<usize>) -> Result<CollectionHandle>;

    fn register_udf(&self, name: &str, udf: Arc<dyn RowUdf>) -> Result<()>;

    /// Forget a row function. Unknown names are ignored.
    fn unregister_udf(&self, name: &str) -> Result<()>;

    fn register_aggregate(&self, name: &str, aggregate: Arc<dyn Aggregate>) -> Result<()>;

    fn execute(&self, selection: &Selection) -> Result<CollectionHandle>;

    /// Concatenate collections sharing one schema, keeping input order.
    fn union(&self, inputs: &[CollectionHandle]) -> Result<CollectionHandle>;

    /// Rows in collection order, at most `limit` of them.
    fn take(&self, handle: CollectionHandle, limit: Option<usize>) -> Result<Vec<Row>>;

    fn count(&self, handle: CollectionHandle) -> Result<u64>;

    fn schema(&self, handle: CollectionHandle) -> Result<Schema>;

    /// Release the rows of a collection. Unknown handles are ignored.
    fn drop_collection(&self, handle: CollectionHandle) -> Result<()>;
}


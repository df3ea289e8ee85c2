//! Row-level callables wrapping runtime evaluation.
//!
//! A [`RowFunction`] rebuilds the item or tuple of a row from its argument
//! cells, evaluates its body with a fresh runtime iterator under the closure
//! context captured at compile time, and shapes the result into one cell.
//! Bodies run on engine workers, so anything in them that needs another
//! distributed job fails with a nested-job error from the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::convert::{ITEM_COLUMN, decode_tuple, row_item};
use super::{
    Aggregate, Cell, Column, ColumnType, DistributedItems, ItemView, Projection, RowUdf, Schema, Selection, TupleColumn,
};
use crate::context::{DetachedContext, DynamicContext};
use crate::error::{Error, Result};
use crate::expr::{Expr, VarName};
use crate::flwor::group_key;
use crate::item::codec::{decode_sequence, encode_sequence};
use crate::item::{AtomicValue, Item, effective_boolean_value};
use crate::runtime::postfix::{array_lookup, object_lookup, unbox};
use crate::runtime::{RuntimeBuilder, materialize, zero_or_one_atomic};
use crate::sequence::Sequence;

static NEXT_FUNCTION: AtomicU64 = AtomicU64::new(1);

/// Engine-wide unique name for a registered callable.
pub fn unique_name(prefix: &str) -> Arc<str> {
    let id = NEXT_FUNCTION.fetch_add(1, Ordering::Relaxed);
    Arc::from(format!("{prefix}#{id}"))
}

/// Name of the row-number column appended for positional predicates.
pub const POSITION_COLUMN: &str = "#position";

pub enum RowInput {
    /// Encoded FLWOR tuple columns.
    Tuple(Vec<TupleColumn>),
    /// One item per row, optionally bound to a variable and followed by its
    /// 1-based position.
    Item {
        view: ItemView,
        schema: Schema,
        bind_as: Option<VarName>,
        position: Option<Arc<str>>,
    },
}

impl RowInput {
    /// Columns to pass as arguments, in the order the function reads them.
    pub fn arguments(&self) -> Vec<Arc<str>> {
        match self {
            RowInput::Tuple(columns) => columns.iter().map(|c| c.variable.clone()).collect(),
            RowInput::Item { view, schema, position, .. } => {
                let mut args = match view {
                    ItemView::Encoded { column } => vec![column.clone()],
                    ItemView::Structured => schema.columns.iter().map(|c| c.name.clone()).collect(),
                };
                args.extend(position.iter().cloned());
                args
            }
        }
    }
}

pub enum RowBody {
    Expr { expr: Arc<Expr>, builder: RuntimeBuilder },
    /// The row's own item.
    Identity,
    Lookup(String),
    ArrayLookup(i64),
    Unbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutput {
    /// Boolean; a single number is compared to the row position when one is passed.
    Predicate,
    /// Binary-encoded sequence.
    Sequence,
    /// Length of the sequence.
    Count,
    /// Array of single-item binary cells. An empty result yields one `Null`
    /// element when empty bindings are allowed.
    Explode { allowing_empty: bool },
    /// Canonical grouping key, `Null` for the empty sequence.
    GroupKey,
    SortKey,
}

impl RowOutput {
    pub fn column_type(self) -> ColumnType {
        match self {
            RowOutput::Predicate => ColumnType::Boolean,
            RowOutput::Sequence => ColumnType::Binary,
            RowOutput::Count => ColumnType::Long,
            RowOutput::Explode { .. } => ColumnType::Array(Box::new(ColumnType::Binary)),
            RowOutput::GroupKey => ColumnType::String,
            RowOutput::SortKey => ColumnType::Array(Box::new(ColumnType::Null)),
        }
    }
}

pub struct RowFunction {
    input: RowInput,
    body: RowBody,
    output: RowOutput,
    closure: DetachedContext,
}

impl RowFunction {
    pub fn new(input: RowInput, body: RowBody, output: RowOutput, closure: &DynamicContext) -> Self {
        Self {
            input,
            body,
            output,
            closure: closure.detach(),
        }
    }

    pub fn arguments(&self) -> Vec<Arc<str>> {
        self.input.arguments()
    }

    /// Register with the engine under a fresh name.
    pub fn register(self, ctx: &DynamicContext, prefix: &str) -> Result<Arc<str>> {
        let name = unique_name(prefix);
        ctx.engine().engine().register_udf(&name, Arc::new(self))?;
        tracing::trace!(function = %name, "row function registered");
        Ok(name)
    }

    fn evaluate(&self, args: &[Cell]) -> Result<(Sequence, Option<i64>)> {
        let closure = self.closure.attach()?;
        match &self.input {
            RowInput::Tuple(columns) => {
                let tuple = decode_tuple(columns, args)?;
                let ctx = closure.with_tuple(&tuple);
                match &self.body {
                    RowBody::Expr { expr, builder } => Ok((evaluate_expr(expr, builder, &ctx)?, None)),
                    _ => Err(Error::internal("tuple rows can only be evaluated by expressions")),
                }
            }
            RowInput::Item {
                view,
                schema,
                bind_as,
                position,
            } => {
                let (item_cells, position) = if position.is_some() {
                    let (last, rest) = args
                        .split_last()
                        .ok_or_else(|| Error::internal("positional row function called without arguments"))?;
                    (rest, last.as_long())
                } else {
                    (args, None)
                };
                let item = row_item(view, schema, item_cells)?;
                let sequence = match &self.body {
                    RowBody::Expr { expr, builder } => {
                        let ctx = match bind_as {
                            Some(name) => closure.bind(name.clone(), Sequence::single(item)),
                            None => closure,
                        };
                        evaluate_expr(expr, builder, &ctx)?
                    }
                    RowBody::Identity => Sequence::single(item),
                    RowBody::Lookup(key) => object_lookup(&item, key).into_iter().collect(),
                    RowBody::ArrayLookup(index) => array_lookup(&item, *index).into_iter().collect(),
                    RowBody::Unbox => Sequence::from(unbox(&item)),
                };
                Ok((sequence, position))
            }
        }
    }
}

fn evaluate_expr(expr: &Expr, builder: &RuntimeBuilder, ctx: &DynamicContext) -> Result<Sequence> {
    let mut iter = builder.build(expr)?;
    materialize(&mut iter, ctx)
}

fn length_cell(len: usize) -> Cell {
    Cell::Long(i64::try_from(len).unwrap_or(i64::MAX))
}

impl RowUdf for RowFunction {
    fn call(&self, args: &[Cell]) -> Result<Cell> {
        let (sequence, position) = self.evaluate(args)?;
        match self.output {
            RowOutput::Predicate => {
                if let (Some(position), [Item::Atomic(a)]) = (position, sequence.items())
                    && a.is_numeric()
                {
                    return Ok(Cell::Boolean(numeric_position_matches(a, position)));
                }
                Ok(Cell::Boolean(effective_boolean_value(sequence.items())?))
            }
            RowOutput::Sequence => Ok(Cell::Binary(encode_sequence(sequence.items())?)),
            RowOutput::Count => Ok(length_cell(sequence.len())),
            RowOutput::Explode { allowing_empty } => {
                if sequence.is_empty() && allowing_empty {
                    return Ok(Cell::Array(vec![Cell::Null]));
                }
                let cells = sequence
                    .iter()
                    .map(|item| Ok(Cell::Binary(encode_sequence(core::slice::from_ref(item))?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Cell::Array(cells))
            }
            RowOutput::GroupKey => {
                let key = zero_or_one_atomic(&sequence, "grouping key")?;
                Ok(match group_key(key.as_ref()) {
                    Some(k) => Cell::String(k),
                    None => Cell::Null,
                })
            }
            RowOutput::SortKey => {
                let key = zero_or_one_atomic(&sequence, "ordering key")?;
                Ok(sort_key_cell(key.as_ref()))
            }
        }
    }
}

/// A numeric predicate keeps the item whose position equals it.
pub fn numeric_position_matches(value: &AtomicValue, position: i64) -> bool {
    match value {
        AtomicValue::Integer(i) => *i == position,
        #[allow(clippy::cast_precision_loss)]
        other => other.as_f64().is_some_and(|f| f == position as f64),
    }
}

/// Sort key cell: `[rank]` for the empty sequence (0) and null (1), `[2, value]` otherwise,
/// so cell ordering matches the local ordering of keys.
pub fn sort_key_cell(key: Option<&AtomicValue>) -> Cell {
    let value = match key {
        None => return Cell::Array(vec![Cell::Long(0)]),
        Some(AtomicValue::Null) => return Cell::Array(vec![Cell::Long(1)]),
        Some(AtomicValue::Integer(i)) => Cell::Long(*i),
        Some(a @ (AtomicValue::Decimal(_) | AtomicValue::Double(_))) => Cell::Double(a.as_f64().unwrap_or(f64::NAN)),
        Some(AtomicValue::Boolean(b)) => Cell::Boolean(*b),
        Some(AtomicValue::DateTime(dt)) => Cell::Long(dt.value.timestamp_millis()),
        Some(AtomicValue::YearMonthDuration(m)) => Cell::Long(i64::from(*m)),
        Some(AtomicValue::DayTimeDuration(ms)) => Cell::Long(*ms),
        Some(other) => Cell::String(other.string_value()),
    };
    Cell::Array(vec![Cell::Long(2), value])
}

/// Rewrite an item collection into the canonical single binary `item` column.
pub fn encode_items(ctx: &DynamicContext, items: &DistributedItems) -> Result<DistributedItems> {
    let schema = ctx.engine().engine().schema(items.handle)?;
    if let ItemView::Encoded { column } = &items.view
        && &**column == ITEM_COLUMN
        && schema.len() == 1
        && schema.columns[0].ty == ColumnType::Binary
    {
        return Ok(items.clone());
    }
    let function = RowFunction::new(
        RowInput::Item {
            view: items.view.clone(),
            schema,
            bind_as: None,
            position: None,
        },
        RowBody::Identity,
        RowOutput::Sequence,
        ctx,
    );
    let args = function.arguments();
    let name = function.register(ctx, "encode")?;
    let selection = Selection::new(items.handle).with_projections(vec![Projection::Udf {
        name,
        args,
        output: Column::new(ITEM_COLUMN, ColumnType::Binary),
    }]);
    let handle = ctx.engine().engine().execute(&selection)?;
    Ok(DistributedItems::encoded(handle))
}

pub const CONCAT_AGGREGATE: &str = "jsonflow.concat";
pub const FIRST_AGGREGATE: &str = "jsonflow.first";
pub const SUM_AGGREGATE: &str = "jsonflow.sum";

/// Concatenates encoded sequences; integer cells contribute one integer item.
pub struct ConcatSequences;

impl Aggregate for ConcatSequences {
    fn aggregate(&self, values: &[Cell]) -> Result<Cell> {
        let mut items: Vec<Item> = Vec::new();
        for cell in values {
            match cell {
                Cell::Null => {}
                Cell::Binary(bytes) => items.extend(decode_sequence(bytes)?.iter().cloned()),
                other => match other.as_long() {
                    Some(i) => items.push(Item::from(i)),
                    None => {
                        return Err(Error::internal(format!(
                            "cannot concatenate a {} cell as a sequence",
                            other.column_type()
                        )));
                    }
                },
            }
        }
        Ok(Cell::Binary(encode_sequence(&items)?))
    }
}

pub struct FirstValue;

impl Aggregate for FirstValue {
    fn aggregate(&self, values: &[Cell]) -> Result<Cell> {
        Ok(values.first().cloned().unwrap_or(Cell::Null))
    }
}

pub struct SumCounts;

impl Aggregate for SumCounts {
    fn aggregate(&self, values: &[Cell]) -> Result<Cell> {
        let mut total: i64 = 0;
        for cell in values {
            let n = cell
                .as_long()
                .ok_or_else(|| Error::internal(format!("cannot sum a {} cell", cell.column_type())))?;
            total = total.saturating_add(n);
        }
        Ok(Cell::Long(total))
    }
}

pub fn register_aggregates(ctx: &DynamicContext) -> Result<()> {
    let engine = ctx.engine().engine();
    engine.register_aggregate(CONCAT_AGGREGATE, Arc::new(ConcatSequences))?;
    engine.register_aggregate(FIRST_AGGREGATE, Arc::new(FirstValue))?;
    engine.register_aggregate(SUM_AGGREGATE, Arc::new(SumCounts))
}

//! Predicates, object and array lookups, and array unboxing.

use std::sync::Arc;

use super::{HybridSource, RuntimeBuilder, RuntimeIterator, Source, into_distributed, materialize, zero_or_one_atomic};
use crate::context::DynamicContext;
use crate::distributed::udf::{POSITION_COLUMN, RowBody, RowFunction, RowInput, RowOutput, numeric_position_matches};
use crate::distributed::{
    Cell, Column, ColumnType, DistributedItems, Explode, ItemView, Predicate, Projection, Selection,
};
use crate::distributed::convert::ITEM_COLUMN;
use crate::error::{Error, Result};
use crate::expr::{CONTEXT_ITEM, ComparisonOp, Expr, ExprKind, VarName};
use crate::item::{AtomicValue, Item, effective_boolean_value};
use crate::sequence::{Sequence, SequenceCursor};

pub fn object_lookup(item: &Item, key: &str) -> Option<Item> {
    item.as_object().and_then(|map| map.get(key)).cloned()
}

/// 1-based member access; out-of-range positions and non-arrays yield nothing.
pub fn array_lookup(item: &Item, position: i64) -> Option<Item> {
    let members = item.as_array()?;
    let index = usize::try_from(position.checked_sub(1)?).ok()?;
    members.get(index).cloned()
}

pub fn unbox(item: &Item) -> Vec<Item> {
    item.as_array().map(<[Item]>::to_vec).unwrap_or_default()
}

pub enum PostfixStep {
    Predicate { expr: Arc<Expr>, iter: RuntimeIterator },
    ObjectLookup(RuntimeIterator),
    ArrayLookup(RuntimeIterator),
    Unbox,
}

pub struct PostfixSource {
    base: RuntimeIterator,
    steps: Vec<PostfixStep>,
    builder: RuntimeBuilder,
    cursor: Option<SequenceCursor>,
}

impl PostfixSource {
    pub fn new(base: RuntimeIterator, steps: Vec<PostfixStep>, builder: RuntimeBuilder) -> Self {
        Self {
            base,
            steps,
            builder,
            cursor: None,
        }
    }
}

fn lookup_key(iter: &mut RuntimeIterator, ctx: &DynamicContext) -> Result<Option<String>> {
    let key = materialize(iter, ctx)?;
    Ok(match zero_or_one_atomic(&key, "object lookup key")? {
        None => None,
        Some(AtomicValue::String(s)) => Some(s),
        Some(other) => Some(other.string_value()),
    })
}

fn lookup_position(iter: &mut RuntimeIterator, ctx: &DynamicContext) -> Result<Option<i64>> {
    let position = materialize(iter, ctx)?;
    match zero_or_one_atomic(&position, "array lookup position")? {
        None => Ok(None),
        Some(AtomicValue::Integer(i)) => Ok(Some(i)),
        Some(other) => Err(Error::type_error(format!(
            "array lookup positions must be integers, found {}",
            other.type_name()
        ))),
    }
}

fn filter_local(items: &[Item], iter: &mut RuntimeIterator, ctx: &DynamicContext) -> Result<Vec<Item>> {
    let context_item: VarName = Arc::from(CONTEXT_ITEM);
    let mut kept = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let position = i64::try_from(index + 1).unwrap_or(i64::MAX);
        let inner = ctx.bind(context_item.clone(), Sequence::single(item.clone()));
        let result = materialize(iter, &inner)?;
        let keep = match result.items() {
            [Item::Atomic(a)] if a.is_numeric() => numeric_position_matches(a, position),
            items => effective_boolean_value(items)?,
        };
        if keep {
            kept.push(item.clone());
        }
    }
    Ok(kept)
}

impl Source for PostfixSource {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        let mut items = materialize(&mut self.base, ctx)?.items().to_vec();
        for step in &mut self.steps {
            items = match step {
                PostfixStep::Predicate { iter, .. } => filter_local(&items, iter, ctx)?,
                PostfixStep::ObjectLookup(key) => match lookup_key(key, ctx)? {
                    Some(key) => items.iter().filter_map(|i| object_lookup(i, &key)).collect(),
                    None => Vec::new(),
                },
                PostfixStep::ArrayLookup(position) => match lookup_position(position, ctx)? {
                    Some(position) => items.iter().filter_map(|i| array_lookup(i, position)).collect(),
                    None => Vec::new(),
                },
                PostfixStep::Unbox => items.iter().flat_map(unbox).collect(),
            };
        }
        self.cursor = Some(Sequence::from(items).cursor());
        Ok(())
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        Ok(self.cursor.as_mut().and_then(Iterator::next))
    }

    fn release(&mut self) {
        self.cursor = None;
    }
}

/// Literal numeric predicate such as `[3]`, compiled to a row-number comparison.
fn literal_position(expr: &Expr) -> Option<Cell> {
    match &expr.kind {
        ExprKind::Literal(Item::Atomic(AtomicValue::Integer(i))) => Some(Cell::Long(*i)),
        ExprKind::Literal(Item::Atomic(a)) if a.is_numeric() => a.as_f64().map(Cell::Double),
        _ => None,
    }
}

fn explode_items(
    items: &DistributedItems,
    body: RowBody,
    ctx: &DynamicContext,
) -> Result<DistributedItems> {
    let engine = ctx.engine().engine();
    let schema = engine.schema(items.handle)?;
    let function = RowFunction::new(
        RowInput::Item {
            view: items.view.clone(),
            schema,
            bind_as: None,
            position: None,
        },
        body,
        RowOutput::Explode { allowing_empty: false },
        ctx,
    );
    let args = function.arguments();
    let udf = function.register(ctx, "postfix")?;
    let exploded: Arc<str> = Arc::from("#exploded");
    let selection = Selection::new(items.handle)
        .with_explode(Explode {
            udf,
            args,
            output: Column::new(exploded.clone(), ColumnType::Binary),
            position: None,
        })
        .with_projections(vec![Projection::Column {
            source: exploded,
            alias: Arc::from(ITEM_COLUMN),
        }]);
    Ok(DistributedItems::encoded(engine.execute(&selection)?))
}

fn filter_distributed(
    items: &DistributedItems,
    expr: &Arc<Expr>,
    builder: &RuntimeBuilder,
    ctx: &DynamicContext,
) -> Result<DistributedItems> {
    let engine = ctx.engine().engine();
    let schema = engine.schema(items.handle)?;
    let keep: Vec<Projection> = schema.columns.iter().map(|c| Projection::keep(c.name.clone())).collect();
    let mut selection = Selection::new(items.handle)
        .with_row_number(POSITION_COLUMN)
        .with_projections(keep);
    if let Some(position) = literal_position(expr) {
        selection = selection.with_filter(Predicate::Compare {
            column: Arc::from(POSITION_COLUMN),
            op: ComparisonOp::Eq,
            value: position,
        });
    } else {
        let function = RowFunction::new(
            RowInput::Item {
                view: items.view.clone(),
                schema,
                bind_as: Some(Arc::from(CONTEXT_ITEM)),
                position: Some(Arc::from(POSITION_COLUMN)),
            },
            RowBody::Expr {
                expr: expr.clone(),
                builder: builder.clone(),
            },
            RowOutput::Predicate,
            ctx,
        );
        let args = function.arguments();
        let name = function.register(ctx, "predicate")?;
        selection = selection.with_filter(Predicate::Udf { name, args });
    }
    let handle = engine.execute(&selection)?;
    Ok(DistributedItems {
        handle,
        view: items.view.clone(),
    })
}

/// Object lookup over typed rows reads the column directly.
fn lookup_distributed(items: &DistributedItems, key: String, ctx: &DynamicContext) -> Result<DistributedItems> {
    if items.is_structured() {
        let engine = ctx.engine().engine();
        let schema = engine.schema(items.handle)?;
        if let Some(index) = schema.index_of(&key) {
            let column = schema.columns[index].name.clone();
            let selection = Selection::new(items.handle).with_projections(vec![Projection::keep(column.clone())]);
            return Ok(DistributedItems {
                handle: engine.execute(&selection)?,
                view: ItemView::Encoded { column },
            });
        }
    }
    explode_items(items, RowBody::Lookup(key), ctx)
}

impl HybridSource for PostfixSource {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        let mut current = into_distributed(&mut self.base, ctx)?;
        for step in &mut self.steps {
            current = match step {
                PostfixStep::Predicate { expr, .. } => filter_distributed(&current, expr, &self.builder, ctx)?,
                PostfixStep::ObjectLookup(key) => match lookup_key(key, ctx)? {
                    Some(key) => lookup_distributed(&current, key, ctx)?,
                    None => DistributedItems::from_items(ctx.engine(), &[], None)?,
                },
                PostfixStep::ArrayLookup(position) => match lookup_position(position, ctx)? {
                    Some(position) => explode_items(&current, RowBody::ArrayLookup(position), ctx)?,
                    None => DistributedItems::from_items(ctx.engine(), &[], None)?,
                },
                PostfixStep::Unbox => explode_items(&current, RowBody::Unbox, ctx)?,
            };
        }
        Ok(current)
    }
}

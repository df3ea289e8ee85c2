//! Runtime implementations of the built-in catalogue.

use std::sync::Arc;

use super::{
    Compute, Computed, Hybrid, HybridSource, PullIterator, RuntimeIterator, Source, evaluate_fully, into_distributed,
    materialize, zero_or_one_atomic,
};
use crate::catalogue::Builtin;
use crate::context::{DynamicContext, VariableValue};
use crate::distributed::schema::{convert_objects, infer_schema, parse_declared_schema, reconcile};
use crate::distributed::udf::POSITION_COLUMN;
use crate::distributed::{Cell, DistributedItems, Predicate, Projection, Selection};
use crate::error::{Error, Result, SourceLocation};
use crate::expr::{ComparisonOp, VarName};
use crate::item::json::parse_json;
use crate::item::{AtomicValue, Item};
use crate::mode::ExecutionMode;
use crate::sequence::Sequence;

/// Instantiate `builtin` over already built argument iterators. `variable`
/// names the argument when it is a plain variable reference, which lets
/// `count`/`exists`/`empty` read count-only bindings.
pub fn build(
    builtin: Builtin,
    mut args: Vec<RuntimeIterator>,
    variable: Option<VarName>,
    mode: ExecutionMode,
    location: SourceLocation,
) -> Result<RuntimeIterator> {
    let arity = args.len();
    let wrong_arity = || Error::internal(format!("{}#{arity} is not a built-in function", builtin.name()));
    Ok(match builtin {
        Builtin::Count | Builtin::Exists | Builtin::Empty => {
            let arg = args.pop().ok_or_else(wrong_arity)?;
            RuntimeIterator::local(Computed::iterator(
                Cardinality {
                    builtin,
                    arg,
                    variable,
                },
                location,
            ))
        }
        Builtin::Head => {
            let arg = args.pop().ok_or_else(wrong_arity)?;
            RuntimeIterator::local(Computed::iterator(Head { arg }, location))
        }
        Builtin::JsonParse => {
            let arg = args.pop().ok_or_else(wrong_arity)?;
            RuntimeIterator::local(Computed::iterator(JsonParse { arg }, location))
        }
        Builtin::String => {
            let arg = args.pop().ok_or_else(wrong_arity)?;
            RuntimeIterator::local(Computed::iterator(StringOf { arg }, location))
        }
        Builtin::Remove => {
            let position = args.pop().ok_or_else(wrong_arity)?;
            let input = args.pop().ok_or_else(wrong_arity)?;
            RuntimeIterator::hybrid(Hybrid::new(RemoveSource::new(input, position), mode, location))
        }
        Builtin::Parallelize => {
            let mut args = args.into_iter();
            let items = args.next().ok_or_else(wrong_arity)?;
            let partitions = args.next();
            RuntimeIterator::hybrid(Hybrid::new(
                Parallelize {
                    items,
                    partitions,
                    cursor: None,
                },
                mode,
                location,
            ))
        }
        Builtin::Annotate => {
            let schema = args.pop().ok_or_else(wrong_arity)?;
            let objects = args.pop().ok_or_else(wrong_arity)?;
            RuntimeIterator::hybrid(Hybrid::new(
                Annotate {
                    objects,
                    schema,
                    cursor: None,
                },
                mode,
                location,
            ))
        }
    })
}

fn length(len: u64) -> Item {
    Item::from(i64::try_from(len).unwrap_or(i64::MAX))
}

/// `count`, `exists` and `empty`.
struct Cardinality {
    builtin: Builtin,
    arg: RuntimeIterator,
    variable: Option<VarName>,
}

impl Cardinality {
    fn count(&mut self, ctx: &DynamicContext, at_most: Option<usize>) -> Result<u64> {
        if let Some(name) = &self.variable {
            match ctx.require(name)? {
                VariableValue::Count(n) => return Ok(*n),
                VariableValue::Local(s) => return Ok(s.len() as u64),
                VariableValue::Distributed(items) => return distributed_count(items, ctx, at_most),
            }
        }
        if self.arg.is_distributed() {
            let items = self.arg.as_distributed(ctx)?;
            return distributed_count(&items, ctx, at_most);
        }
        self.arg.open(ctx)?;
        let mut n: u64 = 0;
        while self.arg.has_next() && at_most.is_none_or(|limit| n < limit as u64) {
            if let Err(e) = self.arg.next() {
                self.arg.close();
                return Err(e);
            }
            n += 1;
        }
        self.arg.close();
        Ok(n)
    }
}

fn distributed_count(items: &DistributedItems, ctx: &DynamicContext, at_most: Option<usize>) -> Result<u64> {
    match at_most {
        Some(limit) => Ok(ctx.engine().engine().take(items.handle, Some(limit))?.len() as u64),
        None => items.count(ctx.engine()),
    }
}

impl Compute for Cardinality {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        Ok(Sequence::single(match self.builtin {
            Builtin::Exists => Item::from(self.count(ctx, Some(1))? > 0),
            Builtin::Empty => Item::from(self.count(ctx, Some(1))? == 0),
            _ => length(self.count(ctx, None)?),
        }))
    }
}

struct Head {
    arg: RuntimeIterator,
}

impl Compute for Head {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        if self.arg.is_distributed() {
            let items = self.arg.as_distributed(ctx)?;
            return Ok(Sequence::from(items.collect(ctx.engine(), Some(1))?));
        }
        self.arg.open(ctx)?;
        let first = if self.arg.has_next() { Some(self.arg.next()) } else { None };
        self.arg.close();
        Ok(first.transpose()?.into_iter().collect())
    }
}

struct JsonParse {
    arg: RuntimeIterator,
}

impl Compute for JsonParse {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let text = materialize(&mut self.arg, ctx)?;
        match text.first() {
            None => Ok(Sequence::empty()),
            Some(Item::Atomic(AtomicValue::String(s))) => Ok(Sequence::single(parse_json(s)?)),
            Some(other) => Err(Error::type_error(format!(
                "json-parse expects a string, found {}",
                other.type_name()
            ))),
        }
    }
}

struct StringOf {
    arg: RuntimeIterator,
}

impl Compute for StringOf {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let value = materialize(&mut self.arg, ctx)?;
        let text = match zero_or_one_atomic(&value, "string argument")? {
            Some(a) => a.string_value(),
            None => String::new(),
        };
        Ok(Sequence::single(text))
    }
}

fn removal_position(iter: &mut RuntimeIterator, ctx: &DynamicContext) -> Result<i64> {
    let position = materialize(iter, ctx)?;
    match position.items() {
        [Item::Atomic(AtomicValue::Integer(i))] => Ok(*i),
        _ => Err(Error::type_error(format!(
            "remove expects a single integer position, found {position}"
        ))),
    }
}

/// `remove($input, $position)`: streams the input and skips the item at
/// the 1-based position. Positions outside the input remove nothing.
pub struct RemoveSource {
    input: RuntimeIterator,
    position_source: RuntimeIterator,
    position: i64,
    current: i64,
}

impl RemoveSource {
    pub fn new(input: RuntimeIterator, position_source: RuntimeIterator) -> Self {
        Self {
            input,
            position_source,
            position: 0,
            current: 0,
        }
    }
}

impl Source for RemoveSource {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.position = removal_position(&mut self.position_source, ctx)?;
        self.current = 0;
        self.input.open(ctx)
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        while self.input.has_next() {
            let item = self.input.next()?;
            self.current += 1;
            if self.current != self.position {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    fn release(&mut self) {
        self.input.close();
    }
}

impl HybridSource for RemoveSource {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        let position = removal_position(&mut self.position_source, ctx)?;
        let items = into_distributed(&mut self.input, ctx)?;
        let engine = ctx.engine().engine();
        let schema = engine.schema(items.handle)?;
        let keep = schema.columns.iter().map(|c| Projection::keep(c.name.clone())).collect();
        let selection = Selection::new(items.handle)
            .with_row_number(POSITION_COLUMN)
            .with_filter(Predicate::Compare {
                column: Arc::from(POSITION_COLUMN),
                op: ComparisonOp::Ne,
                value: Cell::Long(position),
            })
            .with_projections(keep);
        Ok(DistributedItems {
            handle: engine.execute(&selection)?,
            view: items.view,
        })
    }
}

/// Local evaluation returns the items themselves.
struct Parallelize {
    items: RuntimeIterator,
    partitions: Option<RuntimeIterator>,
    cursor: Option<crate::sequence::SequenceCursor>,
}

impl Source for Parallelize {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.cursor = Some(materialize(&mut self.items, ctx)?.cursor());
        Ok(())
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        Ok(self.cursor.as_mut().and_then(Iterator::next))
    }

    fn release(&mut self) {
        self.cursor = None;
    }
}

impl HybridSource for Parallelize {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        let partitions = match &mut self.partitions {
            Some(iter) => match materialize(iter, ctx)?.items() {
                [Item::Atomic(AtomicValue::Integer(n))] if *n > 0 => Some(usize::try_from(*n).unwrap_or(usize::MAX)),
                other => {
                    return Err(Error::type_error(format!(
                        "parallelize expects a positive integer partition count, found {}",
                        Sequence::from(other.to_vec())
                    )));
                }
            },
            None => None,
        };
        if self.items.is_distributed() {
            return self.items.as_distributed(ctx);
        }
        let items = materialize(&mut self.items, ctx)?;
        tracing::debug!(items = items.len(), partitions = ?partitions, "distributing local items");
        DistributedItems::from_items(ctx.engine(), items.items(), partitions)
    }
}

/// `annotate($objects, $schema)`: typed rows checked against a declared schema.
struct Annotate {
    objects: RuntimeIterator,
    schema: RuntimeIterator,
    cursor: Option<crate::sequence::SequenceCursor>,
}

impl Source for Annotate {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.cursor = Some(materialize(&mut self.objects, ctx)?.cursor());
        Ok(())
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        Ok(self.cursor.as_mut().and_then(Iterator::next))
    }

    fn release(&mut self) {
        self.cursor = None;
    }
}

impl HybridSource for Annotate {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        let schema = materialize(&mut self.schema, ctx)?;
        let [schema] = schema.items() else {
            return Err(Error::type_error("annotate expects exactly one schema object"));
        };
        let declared = parse_declared_schema(schema)?;
        let objects = evaluate_fully(&mut self.objects, ctx)?;
        let observed = infer_schema(objects.items())?;
        reconcile(&declared, &observed)?;
        let rows = convert_objects(objects.items(), &declared)?;
        tracing::debug!(rows = rows.len(), columns = declared.len(), "annotated objects with schema");
        let handle = ctx.engine().engine().create_collection(rows, declared, None)?;
        Ok(DistributedItems::structured(handle))
    }
}

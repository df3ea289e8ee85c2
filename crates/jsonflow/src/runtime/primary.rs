//! Variables, literals and constructors.

use std::sync::Arc;

use super::{Compute, HybridSource, PullIterator, RuntimeIterator, Source, materialize, zero_or_one_atomic};
use crate::context::{DynamicContext, VariableValue};
use crate::distributed::DistributedItems;
use crate::distributed::udf::encode_items;
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::expr::{CONTEXT_ITEM, VarName};
use crate::item::{AtomicValue, Item, ObjectMap};
use crate::sequence::{Sequence, SequenceCursor};

pub struct VariableSource {
    name: VarName,
    location: SourceLocation,
    cursor: Option<SequenceCursor>,
}

impl VariableSource {
    pub fn new(name: VarName, location: SourceLocation) -> Self {
        Self {
            name,
            location,
            cursor: None,
        }
    }
}

fn count_only(name: &str) -> Error {
    Error::internal(format!(
        "variable ${name} only carries its count but its value was requested"
    ))
}

impl Source for VariableSource {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        let sequence = match ctx.require(&self.name)? {
            VariableValue::Local(sequence) => sequence.clone(),
            VariableValue::Distributed(items) => items.materialize_capped(ctx.engine(), &self.location)?,
            VariableValue::Count(_) => return Err(count_only(&self.name)),
        };
        self.cursor = Some(sequence.cursor());
        Ok(())
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        Ok(self.cursor.as_mut().and_then(Iterator::next))
    }

    fn release(&mut self) {
        self.cursor = None;
    }
}

impl HybridSource for VariableSource {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        match ctx.require(&self.name)? {
            VariableValue::Distributed(items) => Ok(items.clone()),
            VariableValue::Local(sequence) => DistributedItems::from_items(ctx.engine(), sequence.items(), None),
            VariableValue::Count(_) => Err(count_only(&self.name)),
        }
    }
}

pub struct ContextItem;

impl Compute for ContextItem {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        match ctx.lookup(CONTEXT_ITEM) {
            Some(VariableValue::Local(sequence)) => Ok(sequence.clone()),
            _ => Err(Error::new(ErrorCode::UnboundVariable, "context item is not set")),
        }
    }
}

/// Comma expression: the operands' results one after another.
pub struct CommaSource {
    children: Vec<RuntimeIterator>,
    index: usize,
    ctx: Option<DynamicContext>,
}

impl CommaSource {
    pub fn new(children: Vec<RuntimeIterator>) -> Self {
        Self {
            children,
            index: 0,
            ctx: None,
        }
    }
}

impl Source for CommaSource {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.index = 0;
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        let Some(ctx) = &self.ctx else {
            return Ok(None);
        };
        while let Some(child) = self.children.get_mut(self.index) {
            if !child.is_open() {
                child.open(ctx)?;
            }
            if child.has_next() {
                return child.next().map(Some);
            }
            child.close();
            self.index += 1;
        }
        Ok(None)
    }

    fn release(&mut self) {
        for child in &mut self.children {
            child.close();
        }
        self.ctx = None;
    }
}

impl HybridSource for CommaSource {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        let mut parts = Vec::with_capacity(self.children.len());
        for child in &mut self.children {
            let part = super::into_distributed(child, ctx)?;
            parts.push(encode_items(ctx, &part)?);
        }
        match parts.as_slice() {
            [single] => Ok(single.clone()),
            _ => {
                let handles: Vec<_> = parts.iter().map(|p| p.handle).collect();
                let handle = ctx.engine().engine().union(&handles)?;
                Ok(DistributedItems::encoded(handle))
            }
        }
    }
}

/// `from to to`, produced lazily.
pub struct RangeSource {
    from: RuntimeIterator,
    to: RuntimeIterator,
    next: i64,
    end: i64,
    exhausted: bool,
}

impl RangeSource {
    pub fn new(from: RuntimeIterator, to: RuntimeIterator) -> Self {
        Self {
            from,
            to,
            next: 1,
            end: 0,
            exhausted: true,
        }
    }

    fn bound(iter: &mut RuntimeIterator, ctx: &DynamicContext) -> Result<Option<i64>> {
        let value = materialize(iter, ctx)?;
        match zero_or_one_atomic(&value, "range bound")? {
            None => Ok(None),
            Some(AtomicValue::Integer(i)) => Ok(Some(i)),
            Some(other) => Err(Error::type_error(format!(
                "range bounds must be integers, found {}",
                other.type_name()
            ))),
        }
    }
}

impl Source for RangeSource {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        let from = Self::bound(&mut self.from, ctx)?;
        let to = Self::bound(&mut self.to, ctx)?;
        match (from, to) {
            (Some(from), Some(to)) => {
                self.next = from;
                self.end = to;
                self.exhausted = from > to;
            }
            _ => self.exhausted = true,
        }
        Ok(())
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        if self.exhausted {
            return Ok(None);
        }
        let current = self.next;
        match current.checked_add(1) {
            Some(next) if next <= self.end => self.next = next,
            _ => self.exhausted = true,
        }
        Ok(Some(Item::from(current)))
    }

    fn release(&mut self) {
        self.exhausted = true;
    }
}

pub struct ArrayConstructor {
    content: Option<RuntimeIterator>,
}

impl ArrayConstructor {
    pub fn new(content: Option<RuntimeIterator>) -> Self {
        Self { content }
    }
}

impl Compute for ArrayConstructor {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let members = match &mut self.content {
            Some(content) => materialize(content, ctx)?.items().to_vec(),
            None => Vec::new(),
        };
        Ok(Sequence::single(Item::array(members)))
    }
}

pub struct ObjectConstructor {
    pairs: Vec<(RuntimeIterator, RuntimeIterator)>,
}

impl ObjectConstructor {
    pub fn new(pairs: Vec<(RuntimeIterator, RuntimeIterator)>) -> Self {
        Self { pairs }
    }
}

impl Compute for ObjectConstructor {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence> {
        let mut map = ObjectMap::with_capacity(self.pairs.len());
        for (key, value) in &mut self.pairs {
            let key = match zero_or_one_atomic(&materialize(key, ctx)?, "object key")? {
                Some(AtomicValue::String(s)) => s,
                Some(other) => {
                    return Err(Error::type_error(format!(
                        "object keys must be strings, found {}",
                        other.type_name()
                    )));
                }
                None => return Err(Error::type_error("object key must not be empty")),
            };
            let value = materialize(value, ctx)?;
            let value = match value.items() {
                [] => Item::null(),
                [single] => single.clone(),
                many => Item::array(many.to_vec()),
            };
            if map.contains_key(&key) {
                return Err(Error::new(
                    ErrorCode::DuplicateObjectKey,
                    format!("duplicate key \"{key}\" in object constructor"),
                ));
            }
            map.insert(key, value);
        }
        Ok(Sequence::single(Item::Object(Arc::new(map))))
    }
}

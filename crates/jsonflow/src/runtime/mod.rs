//! Pull-based runtime iterators.
//!
//! Every value-producing node implements [`PullIterator`]: `open`, then
//! `has_next`/`next` until exhaustion, then `close`. One result is always
//! buffered ahead, so `has_next` never computes anything and children are
//! released as soon as the parent observes their end.
//!
//! Nodes whose annotated mode allows a distributed value are wrapped in
//! [`Hybrid`] and exposed through [`DistributedIterator`]; the builder tags
//! each node as [`RuntimeIterator::Local`] or [`RuntimeIterator::Hybrid`].

use crate::context::DynamicContext;
use crate::distributed::DistributedItems;
use crate::error::{Error, Result, SourceLocation};
use crate::item::{AtomicValue, Item};
use crate::mode::ExecutionMode;
use crate::sequence::{Sequence, SequenceCursor};

pub mod build;
pub mod builtins;
pub mod function;
pub mod operational;
pub mod postfix;
pub mod primary;

pub use build::RuntimeBuilder;

pub trait PullIterator: Send {
    fn open(&mut self, ctx: &DynamicContext) -> Result<()>;
    fn has_next(&self) -> bool;
    fn next(&mut self) -> Result<Item>;
    /// Rewind to the first result, re-evaluating under `ctx`.
    fn reset(&mut self, ctx: &DynamicContext) -> Result<()>;
    /// Release the iterator and its children. Safe to call repeatedly and
    /// on an iterator that was never opened.
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn location(&self) -> &SourceLocation;
}

/// Iterator that can hand over its result as a distributed collection.
pub trait DistributedIterator: PullIterator {
    fn is_distributed(&self) -> bool;
    fn as_distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems>;
}

pub enum RuntimeIterator {
    Local(Box<dyn PullIterator>),
    Hybrid(Box<dyn DistributedIterator>),
}

impl RuntimeIterator {
    pub fn local(iter: impl PullIterator + 'static) -> Self {
        RuntimeIterator::Local(Box::new(iter))
    }

    pub fn hybrid(iter: impl DistributedIterator + 'static) -> Self {
        RuntimeIterator::Hybrid(Box::new(iter))
    }

    fn inner(&self) -> &dyn PullIterator {
        match self {
            RuntimeIterator::Local(i) => i.as_ref(),
            RuntimeIterator::Hybrid(i) => i.as_ref(),
        }
    }

    fn inner_mut(&mut self) -> &mut dyn PullIterator {
        match self {
            RuntimeIterator::Local(i) => i.as_mut(),
            RuntimeIterator::Hybrid(i) => i.as_mut(),
        }
    }

    pub fn is_distributed(&self) -> bool {
        match self {
            RuntimeIterator::Local(_) => false,
            RuntimeIterator::Hybrid(i) => i.is_distributed(),
        }
    }

    pub fn as_distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        match self {
            RuntimeIterator::Local(i) => Err(Error::internal(
                "a local iterator was asked for a distributed collection",
            )
            .at(i.location())),
            RuntimeIterator::Hybrid(i) => i.as_distributed(ctx),
        }
    }
}

impl PullIterator for RuntimeIterator {
    fn open(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.inner_mut().open(ctx)
    }

    fn has_next(&self) -> bool {
        self.inner().has_next()
    }

    fn next(&mut self) -> Result<Item> {
        self.inner_mut().next()
    }

    fn reset(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.inner_mut().reset(ctx)
    }

    fn close(&mut self) {
        self.inner_mut().close();
    }

    fn is_open(&self) -> bool {
        self.inner().is_open()
    }

    fn location(&self) -> &SourceLocation {
        self.inner().location()
    }
}

/// Produces results one at a time for [`Buffered`].
pub trait Source: Send {
    type Output: Send;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()>;
    /// Next result, or `None` once exhausted.
    fn produce(&mut self) -> Result<Option<Self::Output>>;
    /// Drop per-evaluation state and close children.
    fn release(&mut self);
}

/// Lookahead buffer implementing the open/next/close discipline over a [`Source`].
pub struct Buffered<S: Source> {
    source: S,
    lookahead: Option<S::Output>,
    open: bool,
    released: bool,
    location: SourceLocation,
}

impl<S: Source> Buffered<S> {
    pub fn new(source: S, location: SourceLocation) -> Self {
        Self {
            source,
            lookahead: None,
            open: false,
            released: true,
            location,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn has_next(&self) -> bool {
        self.lookahead.is_some()
    }

    pub fn open(&mut self, ctx: &DynamicContext) -> Result<()> {
        if self.open {
            return Err(Error::protocol("iterator opened twice", &self.location));
        }
        self.open = true;
        self.start(ctx)
    }

    pub fn next(&mut self) -> Result<S::Output> {
        if !self.open {
            return Err(Error::protocol("next called on an iterator that is not open", &self.location));
        }
        let Some(current) = self.lookahead.take() else {
            return Err(Error::protocol("next called past the end of the iterator", &self.location));
        };
        self.fill()?;
        Ok(current)
    }

    pub fn reset(&mut self, ctx: &DynamicContext) -> Result<()> {
        if !self.open {
            return Err(Error::protocol("reset called on an iterator that is not open", &self.location));
        }
        self.release();
        self.lookahead = None;
        self.start(ctx)
    }

    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.release();
        self.lookahead = None;
        self.open = false;
    }

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.released = false;
        if let Err(e) = self.source.start(ctx) {
            self.release();
            return Err(e.at(&self.location));
        }
        self.fill()
    }

    fn fill(&mut self) -> Result<()> {
        match self.source.produce() {
            Ok(Some(value)) => {
                self.lookahead = Some(value);
                Ok(())
            }
            Ok(None) => {
                self.release();
                Ok(())
            }
            Err(e) => {
                self.release();
                Err(e.at(&self.location))
            }
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.release();
        }
    }
}

impl<S: Source<Output = Item>> PullIterator for Buffered<S> {
    fn open(&mut self, ctx: &DynamicContext) -> Result<()> {
        Buffered::open(self, ctx)
    }

    fn has_next(&self) -> bool {
        Buffered::has_next(self)
    }

    fn next(&mut self) -> Result<Item> {
        Buffered::next(self)
    }

    fn reset(&mut self, ctx: &DynamicContext) -> Result<()> {
        Buffered::reset(self, ctx)
    }

    fn close(&mut self) {
        Buffered::close(self);
    }

    fn is_open(&self) -> bool {
        Buffered::is_open(self)
    }

    fn location(&self) -> &SourceLocation {
        Buffered::location(self)
    }
}

/// Local nodes whose whole result is computed when they are opened.
pub trait Compute: Send {
    fn compute(&mut self, ctx: &DynamicContext) -> Result<Sequence>;
}

pub struct Computed<C> {
    inner: C,
    cursor: Option<SequenceCursor>,
}

impl<C: Compute> Computed<C> {
    pub fn iterator(inner: C, location: SourceLocation) -> Buffered<Self> {
        Buffered::new(Self { inner, cursor: None }, location)
    }
}

impl<C: Compute> Source for Computed<C> {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.cursor = Some(self.inner.compute(ctx)?.cursor());
        Ok(())
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        Ok(self.cursor.as_mut().and_then(Iterator::next))
    }

    fn release(&mut self) {
        self.cursor = None;
    }
}

/// Nodes that may be evaluated as a distributed collection.
pub trait HybridSource: Source<Output = Item> {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems>;
}

/// Runs the local strategy of `S`, or pulls the distributed result into a
/// local cursor when the node is annotated as distributed.
pub struct Materializing<S> {
    source: S,
    mode: ExecutionMode,
    cursor: Option<SequenceCursor>,
    delegated: bool,
    location: SourceLocation,
}

impl<S: HybridSource> Source for Materializing<S> {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        if self.mode.is_distributed() {
            let items = self.source.distributed(ctx)?;
            let sequence = items.materialize_capped(ctx.engine(), &self.location)?;
            self.cursor = Some(sequence.cursor());
            Ok(())
        } else {
            self.delegated = true;
            self.source.start(ctx)
        }
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        match &mut self.cursor {
            Some(cursor) => Ok(cursor.next()),
            None => self.source.produce(),
        }
    }

    fn release(&mut self) {
        self.cursor = None;
        if self.delegated {
            self.delegated = false;
            self.source.release();
        }
    }
}

pub struct Hybrid<S: HybridSource> {
    inner: Buffered<Materializing<S>>,
    mode: ExecutionMode,
}

impl<S: HybridSource> Hybrid<S> {
    pub fn new(source: S, mode: ExecutionMode, location: SourceLocation) -> Self {
        let materializing = Materializing {
            source,
            mode,
            cursor: None,
            delegated: false,
            location: location.clone(),
        };
        Self {
            inner: Buffered::new(materializing, location),
            mode,
        }
    }
}

impl<S: HybridSource> PullIterator for Hybrid<S> {
    fn open(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.inner.open(ctx)
    }

    fn has_next(&self) -> bool {
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<Item> {
        self.inner.next()
    }

    fn reset(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.inner.reset(ctx)
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn location(&self) -> &SourceLocation {
        self.inner.location()
    }
}

impl<S: HybridSource> DistributedIterator for Hybrid<S> {
    fn is_distributed(&self) -> bool {
        self.mode.is_distributed()
    }

    fn as_distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        let location = self.inner.location().clone();
        if !self.is_distributed() {
            return Err(Error::internal(format!(
                "node annotated as {} was asked for a distributed collection",
                self.mode
            ))
            .at(&location));
        }
        tracing::trace!(%location, mode = %self.mode, "evaluating node as distributed collection");
        self.inner
            .source_mut()
            .source
            .distributed(ctx)
            .map_err(|e| e.at(&location))
    }
}

/// Open `iter` under `ctx`, drain it and close it.
pub fn materialize(iter: &mut dyn PullIterator, ctx: &DynamicContext) -> Result<Sequence> {
    if iter.is_open() {
        iter.close();
    }
    iter.open(ctx)?;
    let mut items = Vec::new();
    while iter.has_next() {
        match iter.next() {
            Ok(item) => items.push(item),
            Err(e) => {
                iter.close();
                return Err(e);
            }
        }
    }
    iter.close();
    Ok(Sequence::from(items))
}

/// Local value of a possibly distributed node, uncapped when the node runs
/// on the engine.
pub fn evaluate_fully(iter: &mut RuntimeIterator, ctx: &DynamicContext) -> Result<Sequence> {
    if iter.is_distributed() {
        let items = iter.as_distributed(ctx)?;
        return Ok(Sequence::from(items.collect(ctx.engine(), None)?));
    }
    materialize(iter, ctx)
}

/// Distributed value of `iter`, distributing a local result on the fly.
pub fn into_distributed(iter: &mut RuntimeIterator, ctx: &DynamicContext) -> Result<DistributedItems> {
    if iter.is_distributed() {
        return iter.as_distributed(ctx);
    }
    let sequence = materialize(iter, ctx)?;
    DistributedItems::from_items(ctx.engine(), sequence.items(), None)
}

/// Atomize a sequence expected to hold at most one atomic value.
pub fn zero_or_one_atomic(sequence: &Sequence, what: &str) -> Result<Option<AtomicValue>> {
    match sequence.items() {
        [] => Ok(None),
        [Item::Atomic(a)] => Ok(Some(a.clone())),
        [other] => Err(Error::type_error(format!(
            "{what} must be an atomic value, found {}",
            other.type_name()
        ))),
        _ => Err(Error::type_error(format!(
            "{what} must be at most one item, found a sequence of {} items",
            sequence.len()
        ))),
    }
}

/// Local iterator over an already computed sequence.
pub struct SequenceSource {
    sequence: Sequence,
    cursor: Option<SequenceCursor>,
}

impl SequenceSource {
    pub fn iterator(sequence: Sequence, location: SourceLocation) -> Buffered<Self> {
        Buffered::new(
            Self {
                sequence,
                cursor: None,
            },
            location,
        )
    }
}

impl Source for SequenceSource {
    type Output = Item;

    fn start(&mut self, _ctx: &DynamicContext) -> Result<()> {
        self.cursor = Some(self.sequence.cursor());
        Ok(())
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        Ok(self.cursor.as_mut().and_then(Iterator::next))
    }

    fn release(&mut self) {
        self.cursor = None;
    }
}

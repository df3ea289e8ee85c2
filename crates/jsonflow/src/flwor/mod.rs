//! FLWOR evaluation over tuple streams.
//!
//! Each clause is a [`TupleIterator`] pulling tuples from the clause before
//! it. A clause annotated as distributed can also produce its whole stream
//! as a [`DistributedTuples`] collection; the caller passes down which
//! variables it still needs (and whether only their counts), so every
//! clause drops the columns nobody reads any more.

use std::sync::Arc;

use crate::analysis::dependencies::{Dependencies, clause_dependencies, merge};
use crate::context::{DynamicContext, VariableValue};
use crate::distributed::convert::{DistributedTuples, TupleColumn};
use crate::distributed::udf::{RowBody, RowFunction, RowInput, RowOutput};
use crate::distributed::Projection;
use crate::error::{Error, Result, SourceLocation};
use crate::expr::{Clause, ClauseKind, Expr, Flwor, VarName};
use crate::mode::ExecutionMode;
use crate::runtime::{Buffered, Hybrid, RuntimeBuilder, RuntimeIterator, Source};
use crate::sequence::Sequence;

mod count;
mod for_clause;
mod group_by;
mod let_clause;
mod order_by;
mod return_clause;
pub mod tuple;
mod where_clause;

pub use group_by::group_key;
pub use tuple::FlworTuple;

pub trait TupleIterator: Send {
    fn open(&mut self, ctx: &DynamicContext) -> Result<()>;
    fn has_next(&self) -> bool;
    fn next(&mut self) -> Result<FlworTuple>;
    fn reset(&mut self, ctx: &DynamicContext) -> Result<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn location(&self) -> &SourceLocation;
    fn name(&self) -> &'static str;
    fn is_distributed(&self) -> bool;
    /// Variables read by this clause's own expressions.
    fn variable_dependencies(&self) -> &Dependencies;
    fn bound_variables(&self) -> &[VarName];

    /// What this clause needs from its input, given what the consumer needs
    /// from its output. Variables the clause binds itself are satisfied here.
    fn projection(&self, parent: &Dependencies) -> Dependencies {
        let bound = self.bound_variables();
        let mut needed: Dependencies = parent
            .iter()
            .filter(|(name, _)| !bound.contains(name))
            .map(|(name, kind)| (name.clone(), *kind))
            .collect();
        merge(&mut needed, self.variable_dependencies());
        needed
    }

    fn as_distributed(&mut self, ctx: &DynamicContext, parent: &Dependencies) -> Result<DistributedTuples>;
}

/// Clause-specific evaluation driven by [`ClauseIterator`].
pub trait ClauseSource: Source<Output = FlworTuple> {
    fn distributed(
        &mut self,
        ctx: &DynamicContext,
        parent: &Dependencies,
        projection: &Dependencies,
    ) -> Result<DistributedTuples>;
}

pub struct ClauseIterator<S: ClauseSource> {
    state: Buffered<S>,
    name: &'static str,
    mode: ExecutionMode,
    dependencies: Dependencies,
    bound: Vec<VarName>,
}

impl<S: ClauseSource> ClauseIterator<S> {
    pub fn new(source: S, clause: &Clause) -> Self {
        Self {
            state: Buffered::new(source, clause.location.clone()),
            name: clause.kind.name(),
            mode: clause.mode,
            dependencies: clause_dependencies(&clause.kind),
            bound: clause.kind.bound_variables(),
        }
    }
}

impl<S: ClauseSource> TupleIterator for ClauseIterator<S> {
    fn open(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.state.open(ctx)
    }

    fn has_next(&self) -> bool {
        self.state.has_next()
    }

    fn next(&mut self) -> Result<FlworTuple> {
        self.state.next()
    }

    fn reset(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.state.reset(ctx)
    }

    fn close(&mut self) {
        self.state.close();
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn location(&self) -> &SourceLocation {
        self.state.location()
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn is_distributed(&self) -> bool {
        self.mode.is_distributed()
    }

    fn variable_dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    fn bound_variables(&self) -> &[VarName] {
        &self.bound
    }

    fn as_distributed(&mut self, ctx: &DynamicContext, parent: &Dependencies) -> Result<DistributedTuples> {
        let location = self.state.location().clone();
        if !self.is_distributed() {
            return Err(Error::internal(format!(
                "{} clause annotated as {} was asked for distributed tuples",
                self.name, self.mode
            ))
            .at(&location));
        }
        let projection = self.projection(parent);
        tracing::debug!(
            clause = self.name,
            %location,
            needed = ?projection.keys().collect::<Vec<_>>(),
            "evaluating clause on the engine"
        );
        self.state
            .source_mut()
            .distributed(ctx, parent, &projection)
            .map_err(|e| e.at(&location))
    }
}

/// The tuples a clause consumes: its child, or a single empty tuple when
/// the clause starts the FLWOR.
pub struct TupleInput {
    child: Option<Box<dyn TupleIterator>>,
    initial_pending: bool,
}

impl TupleInput {
    pub fn new(child: Option<Box<dyn TupleIterator>>) -> Self {
        Self {
            child,
            initial_pending: false,
        }
    }

    pub fn is_first(&self) -> bool {
        self.child.is_none()
    }

    pub fn open(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.initial_pending = true;
        match &mut self.child {
            Some(child) => {
                if child.is_open() {
                    child.close();
                }
                child.open(ctx)
            }
            None => Ok(()),
        }
    }

    pub fn next_tuple(&mut self) -> Result<Option<FlworTuple>> {
        match &mut self.child {
            Some(child) if child.has_next() => child.next().map(Some),
            Some(_) => Ok(None),
            None if self.initial_pending => {
                self.initial_pending = false;
                Ok(Some(FlworTuple::new()))
            }
            None => Ok(None),
        }
    }

    /// Drain every remaining tuple.
    pub fn collect(&mut self) -> Result<Vec<FlworTuple>> {
        let mut tuples = Vec::new();
        while let Some(tuple) = self.next_tuple()? {
            tuples.push(tuple);
        }
        Ok(tuples)
    }

    pub fn close(&mut self) {
        self.initial_pending = false;
        if let Some(child) = &mut self.child {
            child.close();
        }
    }

    pub fn distributed(&mut self, ctx: &DynamicContext, needed: &Dependencies) -> Result<DistributedTuples> {
        match &mut self.child {
            Some(child) if child.is_distributed() => child.as_distributed(ctx, needed),
            Some(child) => Err(Error::internal(format!(
                "local {} clause feeds a distributed clause",
                child.name()
            ))),
            None => Err(Error::internal("a distributed tuple stream must start with a for clause")),
        }
    }
}

/// Local value of a tuple binding.
pub(crate) fn local_value(ctx: &DynamicContext, value: &VariableValue, location: &SourceLocation) -> Result<Sequence> {
    match value {
        VariableValue::Local(sequence) => Ok(sequence.clone()),
        VariableValue::Distributed(items) => items.materialize_capped(ctx.engine(), location),
        VariableValue::Count(_) => Err(Error::internal("count-only binding requested as a full value")),
    }
}

/// Expressions evaluated per row cannot start another engine job.
pub(crate) fn reject_nested(expr: &Expr, clause: &str, location: &SourceLocation) -> Result<()> {
    if expr.mode.is_distributed() {
        return Err(Error::nested_job(
            format!("the {clause} expression needs a distributed job inside a distributed {clause} clause"),
            location,
        ));
    }
    Ok(())
}

/// Columns of `tuples` read by an expression with dependencies `deps`.
pub(crate) fn argument_columns(tuples: &DistributedTuples, deps: &Dependencies) -> Vec<TupleColumn> {
    tuples
        .columns
        .iter()
        .filter(|c| deps.contains_key(&c.variable))
        .cloned()
        .collect()
}

/// Columns still needed downstream that the clause does not rebind.
pub(crate) fn carried_columns(
    tuples: &DistributedTuples,
    parent: &Dependencies,
    rebound: &[VarName],
) -> Vec<TupleColumn> {
    tuples
        .columns
        .iter()
        .filter(|c| parent.contains_key(&c.variable) && !rebound.contains(&c.variable))
        .cloned()
        .collect()
}

pub(crate) fn keep(columns: &[TupleColumn]) -> Vec<Projection> {
    columns.iter().map(|c| Projection::keep(c.variable.clone())).collect()
}

/// Register a row function evaluating `expr` over tuple columns; returns
/// its name and argument columns.
pub(crate) fn tuple_function(
    ctx: &DynamicContext,
    columns: Vec<TupleColumn>,
    expr: &Arc<Expr>,
    builder: &RuntimeBuilder,
    output: RowOutput,
    prefix: &str,
) -> Result<(Arc<str>, Vec<Arc<str>>)> {
    let function = RowFunction::new(
        RowInput::Tuple(columns),
        RowBody::Expr {
            expr: expr.clone(),
            builder: builder.clone(),
        },
        output,
        ctx,
    );
    let args = function.arguments();
    let name = function.register(ctx, prefix)?;
    Ok((name, args))
}

/// Build the clause chain and its return clause.
pub fn build(
    builder: &RuntimeBuilder,
    flwor: &Flwor,
    mode: ExecutionMode,
    location: SourceLocation,
) -> Result<RuntimeIterator> {
    let mut current: Option<Box<dyn TupleIterator>> = None;
    for clause in &flwor.clauses {
        let input = TupleInput::new(current.take());
        tracing::trace!(clause = clause.kind.name(), mode = %clause.mode, "building clause");
        let iter: Box<dyn TupleIterator> = match &clause.kind {
            ClauseKind::For {
                variable,
                position,
                allowing_empty,
                expr,
            } => Box::new(ClauseIterator::new(
                for_clause::ForSource::new(
                    input,
                    variable.clone(),
                    position.clone(),
                    *allowing_empty,
                    expr,
                    builder,
                    clause.location.clone(),
                )?,
                clause,
            )),
            ClauseKind::Let { variable, expr } => Box::new(ClauseIterator::new(
                let_clause::LetSource::new(input, variable.clone(), expr, builder, clause.location.clone())?,
                clause,
            )),
            ClauseKind::Where(expr) => Box::new(ClauseIterator::new(
                where_clause::WhereSource::new(input, expr, builder, clause.location.clone())?,
                clause,
            )),
            ClauseKind::GroupBy(keys) => Box::new(ClauseIterator::new(
                group_by::GroupBySource::new(input, keys, builder, clause.location.clone())?,
                clause,
            )),
            ClauseKind::OrderBy(keys) => Box::new(ClauseIterator::new(
                order_by::OrderBySource::new(input, keys, builder, clause.location.clone())?,
                clause,
            )),
            ClauseKind::Count(variable) => Box::new(ClauseIterator::new(
                count::CountSource::new(input, variable.clone()),
                clause,
            )),
        };
        current = Some(iter);
    }
    let source = return_clause::ReturnSource::new(TupleInput::new(current), &flwor.return_expr, builder)?;
    Ok(RuntimeIterator::hybrid(Hybrid::new(source, mode, location)))
}

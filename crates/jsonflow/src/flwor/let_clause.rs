use std::sync::Arc;

use super::{
    ClauseSource, FlworTuple, TupleInput, argument_columns, carried_columns, keep, reject_nested, tuple_function,
};
use crate::analysis::dependencies::{Dependencies, expr_dependencies};
use crate::context::{DynamicContext, VariableValue};
use crate::distributed::convert::{ColumnEncoding, DistributedTuples, TupleColumn};
use crate::distributed::udf::RowOutput;
use crate::distributed::{Column, Projection, Selection};
use crate::error::{Result, SourceLocation};
use crate::expr::{Expr, VarName};
use crate::runtime::{PullIterator, RuntimeBuilder, RuntimeIterator, Source, materialize};

pub struct LetSource {
    input: TupleInput,
    variable: VarName,
    expr: RuntimeIterator,
    ast: Arc<Expr>,
    builder: RuntimeBuilder,
    location: SourceLocation,
    ctx: Option<DynamicContext>,
}

impl LetSource {
    pub fn new(
        input: TupleInput,
        variable: VarName,
        expr: &Expr,
        builder: &RuntimeBuilder,
        location: SourceLocation,
    ) -> Result<Self> {
        Ok(Self {
            input,
            variable,
            expr: builder.build(expr)?,
            ast: Arc::new(expr.clone()),
            builder: builder.clone(),
            location,
            ctx: None,
        })
    }
}

impl Source for LetSource {
    type Output = FlworTuple;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.ctx = Some(ctx.clone());
        self.input.open(ctx)
    }

    fn produce(&mut self) -> Result<Option<FlworTuple>> {
        let Some(ctx) = &self.ctx else {
            return Ok(None);
        };
        let Some(tuple) = self.input.next_tuple()? else {
            return Ok(None);
        };
        let inner = ctx.with_tuple(&tuple);
        // A local chain can carry a distributed value in its tuples.
        let value = if self.expr.is_distributed() {
            VariableValue::Distributed(self.expr.as_distributed(&inner)?)
        } else {
            VariableValue::Local(materialize(&mut self.expr, &inner)?)
        };
        Ok(Some(tuple.with(self.variable.clone(), value)))
    }

    fn release(&mut self) {
        self.expr.close();
        self.input.close();
        self.ctx = None;
    }
}

impl ClauseSource for LetSource {
    fn distributed(
        &mut self,
        ctx: &DynamicContext,
        parent: &Dependencies,
        projection: &Dependencies,
    ) -> Result<DistributedTuples> {
        reject_nested(&self.ast, "let", &self.location)?;
        let tuples = self.input.distributed(ctx, projection)?;
        let Some(kind) = parent.get(&self.variable) else {
            tracing::trace!(variable = %self.variable, "let binding unused downstream, skipped");
            return Ok(tuples);
        };
        let (encoding, output) = if kind.is_count_only() {
            (ColumnEncoding::Count, RowOutput::Count)
        } else {
            (ColumnEncoding::Sequence, RowOutput::Sequence)
        };
        let deps = expr_dependencies(&self.ast);
        let (name, args) = tuple_function(
            ctx,
            argument_columns(&tuples, &deps),
            &self.ast,
            &self.builder,
            output,
            "let",
        )?;

        let mut columns = carried_columns(&tuples, parent, std::slice::from_ref(&self.variable));
        let mut projections = keep(&columns);
        projections.push(Projection::Udf {
            name,
            args,
            output: Column::new(self.variable.clone(), encoding.column_type()),
        });
        columns.push(TupleColumn::new(self.variable.clone(), encoding));
        tracing::trace!(variable = %self.variable, ?encoding, "let binding computed per row");

        let selection = Selection::new(tuples.handle).with_projections(projections);
        let handle = ctx.engine().engine().execute(&selection)?;
        Ok(DistributedTuples { handle, columns })
    }
}

use std::sync::Arc;

use super::{ClauseSource, FlworTuple, TupleInput, argument_columns, reject_nested, tuple_function};
use crate::analysis::dependencies::{Dependencies, expr_dependencies};
use crate::context::DynamicContext;
use crate::distributed::convert::DistributedTuples;
use crate::distributed::udf::RowOutput;
use crate::distributed::{Predicate, Selection};
use crate::error::{Result, SourceLocation};
use crate::expr::Expr;
use crate::item::effective_boolean_value;
use crate::runtime::{PullIterator, RuntimeBuilder, RuntimeIterator, Source, materialize};

pub struct WhereSource {
    input: TupleInput,
    predicate: RuntimeIterator,
    ast: Arc<Expr>,
    builder: RuntimeBuilder,
    location: SourceLocation,
    ctx: Option<DynamicContext>,
}

impl WhereSource {
    pub fn new(input: TupleInput, expr: &Expr, builder: &RuntimeBuilder, location: SourceLocation) -> Result<Self> {
        Ok(Self {
            input,
            predicate: builder.build(expr)?,
            ast: Arc::new(expr.clone()),
            builder: builder.clone(),
            location,
            ctx: None,
        })
    }
}

impl Source for WhereSource {
    type Output = FlworTuple;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.ctx = Some(ctx.clone());
        self.input.open(ctx)
    }

    fn produce(&mut self) -> Result<Option<FlworTuple>> {
        let Some(ctx) = &self.ctx else {
            return Ok(None);
        };
        while let Some(tuple) = self.input.next_tuple()? {
            let inner = ctx.with_tuple(&tuple);
            let result = materialize(&mut self.predicate, &inner)?;
            if effective_boolean_value(result.items())? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn release(&mut self) {
        self.predicate.close();
        self.input.close();
        self.ctx = None;
    }
}

impl ClauseSource for WhereSource {
    fn distributed(
        &mut self,
        ctx: &DynamicContext,
        _parent: &Dependencies,
        projection: &Dependencies,
    ) -> Result<DistributedTuples> {
        reject_nested(&self.ast, "where", &self.location)?;
        let tuples = self.input.distributed(ctx, projection)?;
        let deps = expr_dependencies(&self.ast);
        let (name, args) = tuple_function(
            ctx,
            argument_columns(&tuples, &deps),
            &self.ast,
            &self.builder,
            RowOutput::Predicate,
            "where",
        )?;
        let selection = Selection::new(tuples.handle).with_filter(Predicate::Udf { name, args });
        let handle = ctx.engine().engine().execute(&selection)?;
        Ok(DistributedTuples {
            handle,
            columns: tuples.columns,
        })
    }
}

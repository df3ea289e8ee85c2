use std::sync::Arc;

use super::{TupleInput, argument_columns, reject_nested, tuple_function};
use crate::analysis::dependencies::expr_dependencies;
use crate::context::DynamicContext;
use crate::distributed::convert::ITEM_COLUMN;
use crate::distributed::udf::{RowOutput, unique_name};
use crate::distributed::{Column, ColumnType, DistributedItems, Explode, Projection, Selection};
use crate::error::Result;
use crate::expr::Expr;
use crate::item::Item;
use crate::runtime::{HybridSource, PullIterator, RuntimeBuilder, RuntimeIterator, Source};

/// Streams the return expression once per tuple.
pub struct ReturnSource {
    input: TupleInput,
    expr: RuntimeIterator,
    ast: Arc<Expr>,
    builder: RuntimeBuilder,
    ctx: Option<DynamicContext>,
}

impl ReturnSource {
    pub fn new(input: TupleInput, expr: &Expr, builder: &RuntimeBuilder) -> Result<Self> {
        Ok(Self {
            input,
            expr: builder.build(expr)?,
            ast: Arc::new(expr.clone()),
            builder: builder.clone(),
            ctx: None,
        })
    }
}

impl Source for ReturnSource {
    type Output = Item;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.ctx = Some(ctx.clone());
        self.input.open(ctx)
    }

    fn produce(&mut self) -> Result<Option<Item>> {
        loop {
            if self.expr.is_open() {
                if self.expr.has_next() {
                    return self.expr.next().map(Some);
                }
                self.expr.close();
            }
            let Some(tuple) = self.input.next_tuple()? else {
                return Ok(None);
            };
            let Some(ctx) = &self.ctx else {
                return Ok(None);
            };
            self.expr.open(&ctx.with_tuple(&tuple))?;
        }
    }

    fn release(&mut self) {
        self.expr.close();
        self.input.close();
        self.ctx = None;
    }
}

impl HybridSource for ReturnSource {
    fn distributed(&mut self, ctx: &DynamicContext) -> Result<DistributedItems> {
        reject_nested(&self.ast, "return", &self.ast.location)?;
        let deps = expr_dependencies(&self.ast);
        let tuples = self.input.distributed(ctx, &deps)?;
        let (udf, args) = tuple_function(
            ctx,
            argument_columns(&tuples, &deps),
            &self.ast,
            &self.builder,
            RowOutput::Explode { allowing_empty: false },
            "return",
        )?;
        let output = unique_name("#return");
        let selection = Selection::new(tuples.handle)
            .with_explode(Explode {
                udf,
                args,
                output: Column::new(output.clone(), ColumnType::Binary),
                position: None,
            })
            .with_projections(vec![Projection::Column {
                source: output,
                alias: Arc::from(ITEM_COLUMN),
            }]);
        let handle = ctx.engine().engine().execute(&selection)?;
        tracing::debug!(?handle, "return clause evaluated on the engine");
        Ok(DistributedItems::encoded(handle))
    }
}

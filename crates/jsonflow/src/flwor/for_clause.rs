use std::sync::Arc;

use super::{
    ClauseSource, FlworTuple, TupleInput, argument_columns, carried_columns, keep, reject_nested, tuple_function,
};
use crate::analysis::dependencies::{Dependencies, expr_dependencies};
use crate::context::{DynamicContext, VariableValue};
use crate::distributed::convert::{ColumnEncoding, DistributedTuples, TupleColumn};
use crate::distributed::udf::{RowBody, RowFunction, RowInput, RowOutput, unique_name};
use crate::distributed::{Cell, Column, ColumnType, Explode, Projection, Schema, Selection};
use crate::error::{Result, SourceLocation};
use crate::expr::{Expr, VarName};
use crate::item::Item;
use crate::runtime::{PullIterator, RuntimeBuilder, RuntimeIterator, Source, into_distributed};
use crate::sequence::Sequence;

/// `for $x at $i allowing empty in expr`
pub struct ForSource {
    input: TupleInput,
    variable: VarName,
    position: Option<VarName>,
    allowing_empty: bool,
    expr: RuntimeIterator,
    ast: Arc<Expr>,
    builder: RuntimeBuilder,
    location: SourceLocation,
    ctx: Option<DynamicContext>,
    current: Option<FlworTuple>,
    emitted: i64,
}

impl ForSource {
    pub fn new(
        input: TupleInput,
        variable: VarName,
        position: Option<VarName>,
        allowing_empty: bool,
        expr: &Expr,
        builder: &RuntimeBuilder,
        location: SourceLocation,
    ) -> Result<Self> {
        Ok(Self {
            input,
            variable,
            position,
            allowing_empty,
            expr: builder.build(expr)?,
            ast: Arc::new(expr.clone()),
            builder: builder.clone(),
            location,
            ctx: None,
            current: None,
            emitted: 0,
        })
    }

    fn bind(&self, tuple: FlworTuple, item: Option<Item>, position: i64) -> FlworTuple {
        let tuple = tuple.with(
            self.variable.clone(),
            VariableValue::Local(item.into_iter().collect()),
        );
        match &self.position {
            Some(p) => tuple.with(p.clone(), VariableValue::Local(Sequence::single(position))),
            None => tuple,
        }
    }

    /// First clause: one row per item of the collection.
    fn scan(&mut self, ctx: &DynamicContext) -> Result<DistributedTuples> {
        let items = into_distributed(&mut self.expr, ctx)?;
        let engine = ctx.engine().engine();
        let function = RowFunction::new(
            RowInput::Item {
                view: items.view.clone(),
                schema: engine.schema(items.handle)?,
                bind_as: None,
                position: None,
            },
            RowBody::Identity,
            RowOutput::Sequence,
            ctx,
        );
        let args = function.arguments();
        let name = function.register(ctx, "for")?;

        let mut selection = Selection::new(items.handle);
        let mut projections = vec![Projection::Udf {
            name,
            args,
            output: Column::new(self.variable.clone(), ColumnType::Binary),
        }];
        let mut columns = vec![TupleColumn::new(self.variable.clone(), ColumnEncoding::Sequence)];
        if let Some(position) = &self.position {
            let row = unique_name("#row");
            selection = selection.with_row_number(row.clone());
            projections.push(Projection::Column {
                source: row,
                alias: position.clone(),
            });
            columns.push(TupleColumn::new(position.clone(), ColumnEncoding::Integer));
        }
        let handle = engine.execute(&selection.with_projections(projections))?;

        if self.allowing_empty && engine.count(handle)? == 0 {
            let row: Vec<Cell> = columns
                .iter()
                .map(|c| match c.encoding {
                    ColumnEncoding::Integer => Cell::Long(0),
                    _ => Cell::Null,
                })
                .collect();
            let schema = Schema::new(columns.iter().map(TupleColumn::column).collect());
            let handle = engine.create_collection(vec![row], schema, None)?;
            return Ok(DistributedTuples { handle, columns });
        }
        Ok(DistributedTuples { handle, columns })
    }

    /// Later clause: explode each input tuple into one row per item.
    fn explode(
        &mut self,
        ctx: &DynamicContext,
        parent: &Dependencies,
        projection: &Dependencies,
    ) -> Result<DistributedTuples> {
        reject_nested(&self.ast, "for", &self.location)?;
        let tuples = self.input.distributed(ctx, projection)?;
        let deps = expr_dependencies(&self.ast);
        let (udf, args) = tuple_function(
            ctx,
            argument_columns(&tuples, &deps),
            &self.ast,
            &self.builder,
            RowOutput::Explode {
                allowing_empty: self.allowing_empty,
            },
            "for",
        )?;

        let mut rebound = vec![self.variable.clone()];
        rebound.extend(self.position.iter().cloned());
        let mut columns = carried_columns(&tuples, parent, &rebound);
        let mut projections = keep(&columns);

        let exploded = unique_name("#for");
        projections.push(Projection::Column {
            source: exploded.clone(),
            alias: self.variable.clone(),
        });
        columns.push(TupleColumn::new(self.variable.clone(), ColumnEncoding::Sequence));
        let position_column = self.position.as_ref().map(|p| {
            let source = unique_name("#at");
            projections.push(Projection::Column {
                source: source.clone(),
                alias: p.clone(),
            });
            columns.push(TupleColumn::new(p.clone(), ColumnEncoding::Integer));
            source
        });

        let selection = Selection::new(tuples.handle)
            .with_explode(Explode {
                udf,
                args,
                output: Column::new(exploded, ColumnType::Binary),
                position: position_column,
            })
            .with_projections(projections);
        let handle = ctx.engine().engine().execute(&selection)?;
        Ok(DistributedTuples { handle, columns })
    }
}

impl Source for ForSource {
    type Output = FlworTuple;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.ctx = Some(ctx.clone());
        self.current = None;
        self.emitted = 0;
        self.input.open(ctx)
    }

    fn produce(&mut self) -> Result<Option<FlworTuple>> {
        loop {
            if let Some(tuple) = &self.current {
                if self.expr.has_next() {
                    let item = self.expr.next()?;
                    self.emitted += 1;
                    return Ok(Some(self.bind(tuple.clone(), Some(item), self.emitted)));
                }
                self.expr.close();
                if let Some(tuple) = self.current.take()
                    && self.emitted == 0
                    && self.allowing_empty
                {
                    return Ok(Some(self.bind(tuple, None, 0)));
                }
            }
            let Some(tuple) = self.input.next_tuple()? else {
                return Ok(None);
            };
            let Some(ctx) = &self.ctx else {
                return Ok(None);
            };
            let inner = ctx.with_tuple(&tuple);
            self.expr.open(&inner)?;
            self.current = Some(tuple);
            self.emitted = 0;
        }
    }

    fn release(&mut self) {
        self.expr.close();
        self.input.close();
        self.current = None;
        self.ctx = None;
    }
}

impl ClauseSource for ForSource {
    fn distributed(
        &mut self,
        ctx: &DynamicContext,
        parent: &Dependencies,
        projection: &Dependencies,
    ) -> Result<DistributedTuples> {
        if self.input.is_first() {
            self.scan(ctx)
        } else {
            self.explode(ctx, parent, projection)
        }
    }
}

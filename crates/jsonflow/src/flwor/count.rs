use super::{ClauseSource, FlworTuple, TupleInput, carried_columns, keep};
use crate::analysis::dependencies::Dependencies;
use crate::context::{DynamicContext, VariableValue};
use crate::distributed::convert::{ColumnEncoding, DistributedTuples, TupleColumn};
use crate::distributed::udf::unique_name;
use crate::distributed::{Projection, Selection};
use crate::error::Result;
use crate::expr::VarName;
use crate::runtime::Source;
use crate::sequence::Sequence;

/// `count $n`: 1-based position of each tuple in the stream.
pub struct CountSource {
    input: TupleInput,
    variable: VarName,
    counter: i64,
}

impl CountSource {
    pub fn new(input: TupleInput, variable: VarName) -> Self {
        Self {
            input,
            variable,
            counter: 0,
        }
    }
}

impl Source for CountSource {
    type Output = FlworTuple;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.counter = 0;
        self.input.open(ctx)
    }

    fn produce(&mut self) -> Result<Option<FlworTuple>> {
        let Some(tuple) = self.input.next_tuple()? else {
            return Ok(None);
        };
        self.counter += 1;
        Ok(Some(tuple.with(
            self.variable.clone(),
            VariableValue::Local(Sequence::single(self.counter)),
        )))
    }

    fn release(&mut self) {
        self.input.close();
    }
}

impl ClauseSource for CountSource {
    fn distributed(
        &mut self,
        ctx: &DynamicContext,
        parent: &Dependencies,
        projection: &Dependencies,
    ) -> Result<DistributedTuples> {
        let tuples = self.input.distributed(ctx, projection)?;
        let mut columns = carried_columns(&tuples, parent, std::slice::from_ref(&self.variable));
        let mut projections = keep(&columns);
        let row = unique_name("#count");
        projections.push(Projection::Column {
            source: row.clone(),
            alias: self.variable.clone(),
        });
        columns.push(TupleColumn::new(self.variable.clone(), ColumnEncoding::Integer));
        let selection = Selection::new(tuples.handle)
            .with_row_number(row)
            .with_projections(projections);
        let handle = ctx.engine().engine().execute(&selection)?;
        Ok(DistributedTuples { handle, columns })
    }
}

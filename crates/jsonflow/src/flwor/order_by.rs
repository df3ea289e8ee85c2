use std::cmp::Ordering;
use std::sync::Arc;

use super::{ClauseSource, FlworTuple, TupleInput, argument_columns, reject_nested, tuple_function};
use crate::analysis::dependencies::{Dependencies, expr_dependencies};
use crate::context::DynamicContext;
use crate::distributed::convert::DistributedTuples;
use crate::distributed::udf::{RowOutput, unique_name};
use crate::distributed::{Column, Projection, Selection, SortKey};
use crate::error::{Result, SourceLocation};
use crate::expr::{Expr, OrderKey};
use crate::item::AtomicValue;
use crate::runtime::operational::compare_keys;
use crate::runtime::{RuntimeBuilder, RuntimeIterator, Source, materialize, zero_or_one_atomic};

struct SortSpec {
    iter: RuntimeIterator,
    ast: Arc<Expr>,
    descending: bool,
}

/// Stable sort of the whole input; the empty sequence sorts first.
pub struct OrderBySource {
    input: TupleInput,
    keys: Vec<SortSpec>,
    builder: RuntimeBuilder,
    location: SourceLocation,
    sorted: std::vec::IntoIter<FlworTuple>,
}

impl OrderBySource {
    pub fn new(
        input: TupleInput,
        keys: &[OrderKey],
        builder: &RuntimeBuilder,
        location: SourceLocation,
    ) -> Result<Self> {
        let keys = keys
            .iter()
            .map(|key| {
                Ok(SortSpec {
                    iter: builder.build(&key.expr)?,
                    ast: Arc::new(key.expr.clone()),
                    descending: key.descending,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            input,
            keys,
            builder: builder.clone(),
            location,
            sorted: Vec::new().into_iter(),
        })
    }

    fn sort(&mut self, ctx: &DynamicContext, tuples: Vec<FlworTuple>) -> Result<Vec<FlworTuple>> {
        let mut keyed: Vec<(Vec<Option<AtomicValue>>, FlworTuple)> = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            let inner = ctx.with_tuple(&tuple);
            let mut values = Vec::with_capacity(self.keys.len());
            for key in &mut self.keys {
                let value = materialize(&mut key.iter, &inner)?;
                values.push(zero_or_one_atomic(&value, "ordering key")?);
            }
            keyed.push((values, tuple));
        }

        let descending: Vec<bool> = self.keys.iter().map(|k| k.descending).collect();
        let mut failure = None;
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), desc) in a.iter().zip(b).zip(&descending) {
                match compare_keys(x.as_ref(), y.as_ref()) {
                    Ok(Ordering::Equal) => {}
                    Ok(ord) => return if *desc { ord.reverse() } else { ord },
                    Err(e) => {
                        failure.get_or_insert(e);
                        return Ordering::Equal;
                    }
                }
            }
            Ordering::Equal
        });
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(keyed.into_iter().map(|(_, tuple)| tuple).collect())
    }
}

impl Source for OrderBySource {
    type Output = FlworTuple;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.input.open(ctx)?;
        let tuples = self.input.collect()?;
        self.input.close();
        self.sorted = self.sort(ctx, tuples)?.into_iter();
        Ok(())
    }

    fn produce(&mut self) -> Result<Option<FlworTuple>> {
        Ok(self.sorted.next())
    }

    fn release(&mut self) {
        self.input.close();
        self.sorted = Vec::new().into_iter();
    }
}

impl ClauseSource for OrderBySource {
    fn distributed(
        &mut self,
        ctx: &DynamicContext,
        _parent: &Dependencies,
        projection: &Dependencies,
    ) -> Result<DistributedTuples> {
        let tuples = self.input.distributed(ctx, projection)?;
        let mut projections: Vec<Projection> = tuples
            .columns
            .iter()
            .map(|c| Projection::keep(c.variable.clone()))
            .collect();
        let mut sort = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            reject_nested(&key.ast, "order by", &self.location)?;
            let deps = expr_dependencies(&key.ast);
            let (name, args) = tuple_function(
                ctx,
                argument_columns(&tuples, &deps),
                &key.ast,
                &self.builder,
                RowOutput::SortKey,
                "order-key",
            )?;
            let column = unique_name("#ok");
            projections.push(Projection::Udf {
                name,
                args,
                output: Column::new(column.clone(), RowOutput::SortKey.column_type()),
            });
            sort.push(SortKey {
                column,
                descending: key.descending,
            });
        }
        let selection = Selection::new(tuples.handle)
            .with_projections(projections)
            .with_sort(sort);
        let handle = ctx.engine().engine().execute(&selection)?;
        Ok(DistributedTuples {
            handle,
            columns: tuples.columns,
        })
    }
}

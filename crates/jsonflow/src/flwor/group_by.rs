use std::sync::Arc;

use indexmap::IndexMap;

use super::{ClauseSource, FlworTuple, TupleInput, argument_columns, local_value, reject_nested, tuple_function};
use crate::analysis::dependencies::{Dependencies, expr_dependencies};
use crate::context::{DynamicContext, VariableValue};
use crate::distributed::convert::{ColumnEncoding, DistributedTuples, TupleColumn};
use crate::distributed::udf::{
    CONCAT_AGGREGATE, FIRST_AGGREGATE, RowOutput, SUM_AGGREGATE, register_aggregates, unique_name,
};
use crate::distributed::{Aggregation, Column, ColumnType, GroupBy, Projection, Selection};
use crate::error::{Error, ErrorCode, Result, SourceLocation};
use crate::expr::{Expr, ExprKind, GroupKey, VarName};
use crate::item::AtomicValue;
use crate::runtime::{RuntimeBuilder, RuntimeIterator, Source, materialize, zero_or_one_atomic};
use crate::sequence::Sequence;

/// Canonical string for a grouping key; `None` for the empty sequence.
///
/// Numbers of different types that compare equal share a key, so `1`,
/// `1.0` and `1e0` fall into the same group.
pub fn group_key(value: Option<&AtomicValue>) -> Option<String> {
    let value = value?;
    Some(match value {
        AtomicValue::Null => "null:".to_owned(),
        AtomicValue::Integer(i) => format!("number:{i}"),
        AtomicValue::Decimal(d) => format!("number:{}", d.normalize()),
        #[allow(clippy::cast_possible_truncation)]
        AtomicValue::Double(d) if d.is_finite() && d.fract() == 0.0 && d.abs() < 9.0e15 => {
            format!("number:{}", *d as i64)
        }
        AtomicValue::Double(d) => format!("number:{d}"),
        AtomicValue::Boolean(b) => format!("boolean:{b}"),
        other => format!("{}:{}", other.type_name(), other.string_value()),
    })
}

struct KeySpec {
    variable: VarName,
    /// `None` reads the existing binding of `variable`.
    expr: Option<(RuntimeIterator, Arc<Expr>)>,
}

pub struct GroupBySource {
    input: TupleInput,
    keys: Vec<KeySpec>,
    builder: RuntimeBuilder,
    location: SourceLocation,
    groups: std::vec::IntoIter<FlworTuple>,
}

impl GroupBySource {
    pub fn new(
        input: TupleInput,
        keys: &[GroupKey],
        builder: &RuntimeBuilder,
        location: SourceLocation,
    ) -> Result<Self> {
        let keys = keys
            .iter()
            .map(|key| {
                Ok(KeySpec {
                    variable: key.variable.clone(),
                    expr: match &key.expr {
                        Some(e) => Some((builder.build(e)?, Arc::new(e.clone()))),
                        None => None,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            input,
            keys,
            builder: builder.clone(),
            location,
            groups: Vec::new().into_iter(),
        })
    }

    fn key_values(&mut self, ctx: &DynamicContext, tuple: &FlworTuple) -> Result<Vec<Sequence>> {
        let inner = ctx.with_tuple(tuple);
        let mut values = Vec::with_capacity(self.keys.len());
        for key in &mut self.keys {
            let value = match &mut key.expr {
                Some((iter, _)) => materialize(iter, &inner)?,
                None => match tuple.get(&key.variable) {
                    Some(value) => local_value(ctx, value, &self.location)?,
                    None => {
                        return Err(Error::new(
                            ErrorCode::UnboundVariable,
                            format!("grouping variable ${} is not bound", key.variable),
                        ));
                    }
                },
            };
            values.push(value);
        }
        Ok(values)
    }

    fn group(&mut self, ctx: &DynamicContext, tuples: Vec<FlworTuple>) -> Result<Vec<FlworTuple>> {
        let mut groups: IndexMap<Vec<Option<String>>, (Vec<Sequence>, Vec<FlworTuple>)> = IndexMap::new();
        for tuple in tuples {
            let values = self.key_values(ctx, &tuple)?;
            let mut signature = Vec::with_capacity(values.len());
            for value in &values {
                let atomic = zero_or_one_atomic(value, "grouping key")?;
                signature.push(group_key(atomic.as_ref()));
            }
            groups.entry(signature).or_insert_with(|| (values, Vec::new())).1.push(tuple);
        }
        tracing::debug!(groups = groups.len(), "grouped tuples locally");

        let key_names: Vec<&VarName> = self.keys.iter().map(|k| &k.variable).collect();
        let mut output = Vec::with_capacity(groups.len());
        for (_, (values, members)) in groups {
            let mut tuple = FlworTuple::new();
            if let Some(first) = members.first() {
                for name in first.variables().filter(|n| !key_names.contains(n)) {
                    tuple.bind(name.clone(), self.concat(ctx, name, &members)?);
                }
            }
            for (name, value) in key_names.iter().zip(values) {
                tuple.bind((*name).clone(), VariableValue::Local(value));
            }
            output.push(tuple);
        }
        Ok(output)
    }

    /// Non-grouping variables become the concatenation over the group;
    /// count-only bindings add up.
    fn concat(&self, ctx: &DynamicContext, name: &str, members: &[FlworTuple]) -> Result<VariableValue> {
        let values: Vec<&VariableValue> = members.iter().filter_map(|t| t.get(name)).collect();
        if values.iter().all(|v| matches!(v, VariableValue::Count(_))) {
            let total = values
                .iter()
                .map(|v| match v {
                    VariableValue::Count(n) => *n,
                    _ => 0,
                })
                .sum();
            return Ok(VariableValue::Count(total));
        }
        let mut items = Vec::new();
        for value in values {
            items.extend(local_value(ctx, value, &self.location)?.iter().cloned());
        }
        Ok(VariableValue::Local(Sequence::from(items)))
    }
}

impl Source for GroupBySource {
    type Output = FlworTuple;

    fn start(&mut self, ctx: &DynamicContext) -> Result<()> {
        self.input.open(ctx)?;
        let tuples = self.input.collect()?;
        self.input.close();
        self.groups = self.group(ctx, tuples)?.into_iter();
        Ok(())
    }

    fn produce(&mut self) -> Result<Option<FlworTuple>> {
        Ok(self.groups.next())
    }

    fn release(&mut self) {
        self.input.close();
        self.groups = Vec::new().into_iter();
    }
}

impl ClauseSource for GroupBySource {
    fn distributed(
        &mut self,
        ctx: &DynamicContext,
        parent: &Dependencies,
        projection: &Dependencies,
    ) -> Result<DistributedTuples> {
        let tuples = self.input.distributed(ctx, projection)?;
        register_aggregates(ctx)?;

        let mut projections: Vec<Projection> = tuples
            .columns
            .iter()
            .map(|c| Projection::keep(c.variable.clone()))
            .collect();
        let mut grouping = Vec::with_capacity(self.keys.len());
        let mut aggregates = Vec::new();
        let mut columns = Vec::new();

        for key in &self.keys {
            let expr = match &key.expr {
                Some((_, ast)) => {
                    reject_nested(ast, "group by", &self.location)?;
                    ast.clone()
                }
                None => Arc::new(Expr::new(ExprKind::VarRef(key.variable.clone()))),
            };
            let deps = expr_dependencies(&expr);
            let key_column = unique_name("#gk");
            let value_column = unique_name("#gv");
            for (prefix, output, column) in [
                ("group-key", RowOutput::GroupKey, &key_column),
                ("group-value", RowOutput::Sequence, &value_column),
            ] {
                let (name, args) = tuple_function(
                    ctx,
                    argument_columns(&tuples, &deps),
                    &expr,
                    &self.builder,
                    output,
                    prefix,
                )?;
                projections.push(Projection::Udf {
                    name,
                    args,
                    output: Column::new(column.clone(), output.column_type()),
                });
            }
            grouping.push(key_column);
            aggregates.push(Aggregation {
                column: value_column,
                function: Arc::from(FIRST_AGGREGATE),
                output: Column::new(key.variable.clone(), ColumnType::Binary),
            });
            columns.push(TupleColumn::new(key.variable.clone(), ColumnEncoding::Sequence));
        }

        for column in &tuples.columns {
            let is_key = self.keys.iter().any(|k| k.variable == column.variable);
            if is_key || !parent.contains_key(&column.variable) {
                continue;
            }
            let (function, encoding) = match column.encoding {
                ColumnEncoding::Count => (SUM_AGGREGATE, ColumnEncoding::Count),
                ColumnEncoding::Sequence | ColumnEncoding::Integer => (CONCAT_AGGREGATE, ColumnEncoding::Sequence),
            };
            aggregates.push(Aggregation {
                column: column.variable.clone(),
                function: Arc::from(function),
                output: Column::new(column.variable.clone(), encoding.column_type()),
            });
            columns.push(TupleColumn::new(column.variable.clone(), encoding));
        }

        let selection = Selection::new(tuples.handle)
            .with_projections(projections)
            .with_group_by(GroupBy {
                keys: grouping,
                aggregates,
            });
        let handle = ctx.engine().engine().execute(&selection)?;
        Ok(DistributedTuples { handle, columns })
    }
}

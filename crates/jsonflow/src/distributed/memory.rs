//! Partitioned in-memory engine running partitions on a rayon pool.

use core::cell::Cell as FlagCell;
use core::cmp::Ordering;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use super::{
    Aggregate, Cell, CollectionHandle, Column, ColumnType, DistributedEngine, Predicate, Projection, Row, RowUdf,
    Schema, Selection, compare_cells,
};
use crate::config::EngineConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::expr::ComparisonOp;

thread_local! {
    static IN_WORKER: FlagCell<bool> = const { FlagCell::new(false) };
}

/// Marks the current thread as evaluating rows of a running job.
struct WorkerGuard {
    previous: bool,
}

impl WorkerGuard {
    fn enter() -> Self {
        let previous = IN_WORKER.with(|f| f.replace(true));
        Self { previous }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        IN_WORKER.with(|f| f.set(self.previous));
    }
}

fn ensure_not_in_worker(operation: &str) -> Result<()> {
    if IN_WORKER.with(FlagCell::get) {
        return Err(Error::new(
            ErrorCode::NestedDistributedJob,
            format!("cannot {operation} while evaluating rows of another distributed job"),
        ));
    }
    Ok(())
}

struct Collection {
    schema: Schema,
    partitions: Vec<Vec<Row>>,
}

impl Collection {
    fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }
}

enum FilterPlan {
    Udf(Arc<dyn RowUdf>, Vec<usize>),
    Compare(usize, ComparisonOp, Cell),
}

struct ExplodePlan {
    udf: Arc<dyn RowUdf>,
    args: Vec<usize>,
    with_position: bool,
}

enum ProjectionPlan {
    Keep(usize),
    Udf(Arc<dyn RowUdf>, Vec<usize>),
}

struct RowPlan {
    row_number: bool,
    filter: Option<FilterPlan>,
    explode: Option<ExplodePlan>,
    projections: Option<Vec<ProjectionPlan>>,
}

fn pick(row: &[Cell], indices: &[usize]) -> Vec<Cell> {
    indices.iter().map(|i| row[*i].clone()).collect()
}

impl RowPlan {
    fn apply(&self, mut row: Row, row_number: u64, out: &mut Vec<Row>) -> Result<()> {
        if self.row_number {
            row.push(Cell::Long(i64::try_from(row_number).unwrap_or(i64::MAX)));
        }
        match &self.filter {
            Some(FilterPlan::Udf(udf, args)) => {
                if !udf.call(&pick(&row, args))?.is_truthy() {
                    return Ok(());
                }
            }
            Some(FilterPlan::Compare(index, op, value)) => {
                if !op.holds(compare_cells(&row[*index], value)?) {
                    return Ok(());
                }
            }
            None => {}
        }
        match &self.explode {
            Some(plan) => {
                let elements = match plan.udf.call(&pick(&row, &plan.args))? {
                    Cell::Array(elements) => elements,
                    Cell::Null => Vec::new(),
                    other => {
                        return Err(Error::engine(format!(
                            "explode function returned {} instead of an array",
                            other.column_type()
                        )));
                    }
                };
                for (index, element) in elements.into_iter().enumerate() {
                    let mut exploded = row.clone();
                    let position = if element == Cell::Null { 0 } else { index + 1 };
                    exploded.push(element);
                    if plan.with_position {
                        exploded.push(Cell::Long(i64::try_from(position).unwrap_or(i64::MAX)));
                    }
                    out.push(self.project(exploded)?);
                }
                Ok(())
            }
            None => {
                out.push(self.project(row)?);
                Ok(())
            }
        }
    }

    fn project(&self, row: Row) -> Result<Row> {
        let Some(projections) = &self.projections else {
            return Ok(row);
        };
        projections
            .iter()
            .map(|p| match p {
                ProjectionPlan::Keep(index) => Ok(row[*index].clone()),
                ProjectionPlan::Udf(udf, args) => udf.call(&pick(&row, args)),
            })
            .collect()
    }
}

/// Feed a small key encoding for hashing group keys.
fn write_key(cell: &Cell, out: &mut Vec<u8>) {
    match cell {
        Cell::Null => out.push(0),
        Cell::Long(_) | Cell::Integer(_) | Cell::Short(_) => {
            out.push(1);
            out.extend_from_slice(&cell.as_long().unwrap_or_default().to_be_bytes());
        }
        Cell::Double(v) => {
            out.push(2);
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        Cell::Float(v) => {
            out.push(2);
            out.extend_from_slice(&f64::from(*v).to_bits().to_be_bytes());
        }
        Cell::Boolean(v) => out.extend_from_slice(&[3, u8::from(*v)]),
        Cell::String(v) => {
            out.push(4);
            out.extend_from_slice(&(v.len() as u64).to_be_bytes());
            out.extend_from_slice(v.as_bytes());
        }
        Cell::Binary(v) => {
            out.push(5);
            out.extend_from_slice(&(v.len() as u64).to_be_bytes());
            out.extend_from_slice(v);
        }
        Cell::Array(members) => {
            out.push(6);
            out.extend_from_slice(&(members.len() as u64).to_be_bytes());
            for m in members {
                write_key(m, out);
            }
        }
    }
}

/// Reference [`DistributedEngine`] keeping every collection in memory.
pub struct MemoryEngine {
    pool: ThreadPool,
    default_partitions: usize,
    next_id: AtomicU64,
    collections: RwLock<HashMap<CollectionHandle, Arc<Collection>>>,
    udfs: RwLock<HashMap<Arc<str>, Arc<dyn RowUdf>>>,
    aggregates: RwLock<HashMap<Arc<str>, Arc<dyn Aggregate>>>,
}

impl MemoryEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|idx| format!("jsonflow-worker-{idx}"));
        if let Some(threads) = config.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build().map_err(|e| {
            Error::engine("failed to build worker pool")
                .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
        })?;
        tracing::info!(
            threads = pool.current_num_threads(),
            partitions = config.partitions,
            "in-memory engine started"
        );
        Ok(Self {
            pool,
            default_partitions: config.partitions.max(1),
            next_id: AtomicU64::new(1),
            collections: RwLock::new(HashMap::new()),
            udfs: RwLock::new(HashMap::new()),
            aggregates: RwLock::new(HashMap::new()),
        })
    }

    /// Number of live collections.
    pub fn collection_count(&self) -> usize {
        self.collections.read().len()
    }

    /// Number of registered row functions.
    pub fn udf_count(&self) -> usize {
        self.udfs.read().len()
    }

    fn collection(&self, handle: CollectionHandle) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::engine(format!("unknown {handle}")))
    }

    fn store(&self, schema: Schema, partitions: Vec<Vec<Row>>) -> CollectionHandle {
        let handle = CollectionHandle(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        self.collections
            .write()
            .insert(handle, Arc::new(Collection { schema, partitions }));
        handle
    }

    fn udf(&self, name: &str) -> Result<Arc<dyn RowUdf>> {
        self.udfs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::engine(format!("function '{name}' is not registered")))
    }

    fn aggregate(&self, name: &str) -> Result<Arc<dyn Aggregate>> {
        self.aggregates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::engine(format!("aggregate '{name}' is not registered")))
    }

    /// Split rows into `n` contiguous chunks, keeping their order.
    fn split(rows: Vec<Row>, n: usize) -> Vec<Vec<Row>> {
        let n = n.max(1);
        let chunk = rows.len().div_ceil(n).max(1);
        let mut partitions: Vec<Vec<Row>> = Vec::with_capacity(n);
        let mut iter = rows.into_iter();
        for _ in 0..n {
            partitions.push(iter.by_ref().take(chunk).collect());
        }
        partitions
    }

    fn indices(schema: &Schema, names: &[Arc<str>]) -> Result<Vec<usize>> {
        names.iter().map(|n| schema.require(n)).collect()
    }

    fn plan_rows(&self, selection: &Selection, schema: &mut Schema) -> Result<RowPlan> {
        let row_number = if let Some(name) = &selection.row_number {
            schema.columns.push(Column::new(name.clone(), ColumnType::Long));
            true
        } else {
            false
        };
        let filter = match &selection.filter {
            Some(Predicate::Udf { name, args }) => Some(FilterPlan::Udf(self.udf(name)?, Self::indices(schema, args)?)),
            Some(Predicate::Compare { column, op, value }) => {
                Some(FilterPlan::Compare(schema.require(column)?, *op, value.clone()))
            }
            None => None,
        };
        let explode = match &selection.explode {
            Some(explode) => {
                let args = Self::indices(schema, &explode.args)?;
                schema.columns.push(explode.output.clone());
                if let Some(position) = &explode.position {
                    schema.columns.push(Column::new(position.clone(), ColumnType::Long));
                }
                Some(ExplodePlan {
                    udf: self.udf(&explode.udf)?,
                    args,
                    with_position: explode.position.is_some(),
                })
            }
            None => None,
        };
        let projections = match &selection.projections {
            Some(projections) => {
                let mut plans = Vec::with_capacity(projections.len());
                let mut columns = Vec::with_capacity(projections.len());
                for p in projections {
                    match p {
                        Projection::Column { source, alias } => {
                            let index = schema.require(source)?;
                            columns.push(Column::new(alias.clone(), schema.columns[index].ty.clone()));
                            plans.push(ProjectionPlan::Keep(index));
                        }
                        Projection::Udf { name, args, output } => {
                            plans.push(ProjectionPlan::Udf(self.udf(name)?, Self::indices(schema, args)?));
                            columns.push(output.clone());
                        }
                    }
                }
                *schema = Schema::new(columns);
                Some(plans)
            }
            None => None,
        };
        Ok(RowPlan {
            row_number,
            filter,
            explode,
            projections,
        })
    }

    fn group(&self, selection: &Selection, rows: Vec<Row>, schema: &mut Schema) -> Result<Vec<Row>> {
        let Some(group_by) = &selection.group_by else {
            return Ok(rows);
        };
        let keys = Self::indices(schema, &group_by.keys)?;
        let mut aggregates = Vec::with_capacity(group_by.aggregates.len());
        for agg in &group_by.aggregates {
            aggregates.push((schema.require(&agg.column)?, self.aggregate(&agg.function)?));
        }

        let mut groups: IndexMap<Vec<u8>, Vec<Row>> = IndexMap::new();
        for row in rows {
            let mut key = Vec::new();
            for index in &keys {
                write_key(&row[*index], &mut key);
            }
            groups.entry(key).or_default().push(row);
        }
        let groups: Vec<Vec<Row>> = groups.into_values().collect();
        tracing::trace!(groups = groups.len(), "grouping rows");

        let grouped = self.pool.install(|| {
            groups
                .par_iter()
                .map(|members| {
                    let _worker = WorkerGuard::enter();
                    let mut out: Row = keys.iter().map(|i| members[0][*i].clone()).collect();
                    for (index, aggregate) in &aggregates {
                        let values: Vec<Cell> = members.iter().map(|r| r[*index].clone()).collect();
                        out.push(aggregate.aggregate(&values)?);
                    }
                    Ok(out)
                })
                .collect::<Result<Vec<Row>>>()
        })?;

        let mut columns: Vec<Column> = keys.iter().map(|i| schema.columns[*i].clone()).collect();
        columns.extend(group_by.aggregates.iter().map(|a| a.output.clone()));
        *schema = Schema::new(columns);
        Ok(grouped)
    }

    fn sort(selection: &Selection, rows: &mut [Row], schema: &Schema) -> Result<()> {
        if selection.sort.is_empty() {
            return Ok(());
        }
        let keys = selection
            .sort
            .iter()
            .map(|k| Ok((schema.require(&k.column)?, k.descending)))
            .collect::<Result<Vec<(usize, bool)>>>()?;
        let mut failure: Option<Error> = None;
        rows.sort_by(|a, b| {
            for (index, descending) in &keys {
                match compare_cells(&a[*index], &b[*index]) {
                    Ok(Ordering::Equal) => {}
                    Ok(ord) => return if *descending { ord.reverse() } else { ord },
                    Err(e) => {
                        failure.get_or_insert(e);
                        return Ordering::Equal;
                    }
                }
            }
            Ordering::Equal
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl DistributedEngine for MemoryEngine {
    fn create_collection(&self, rows: Vec<Row>, schema: Schema, partitions: Option<usize>) -> Result<CollectionHandle> {
        ensure_not_in_worker("create a collection")?;
        if let Some(bad) = rows.iter().find(|r| r.len() != schema.len()) {
            return Err(Error::engine(format!(
                "row has {} cells but the schema declares {} columns",
                bad.len(),
                schema.len()
            )));
        }
        let count = rows.len();
        let partitions = Self::split(rows, partitions.unwrap_or(self.default_partitions));
        let handle = self.store(schema, partitions);
        tracing::debug!(%handle, rows = count, "collection created");
        Ok(handle)
    }

    fn register_udf(&self, name: &str, udf: Arc<dyn RowUdf>) -> Result<()> {
        self.udfs.write().insert(Arc::from(name), udf);
        Ok(())
    }

    fn unregister_udf(&self, name: &str) -> Result<()> {
        self.udfs.write().remove(name);
        Ok(())
    }

    fn register_aggregate(&self, name: &str, aggregate: Arc<dyn Aggregate>) -> Result<()> {
        self.aggregates.write().insert(Arc::from(name), aggregate);
        Ok(())
    }

    fn execute(&self, selection: &Selection) -> Result<CollectionHandle> {
        ensure_not_in_worker("run a selection")?;
        let input = self.collection(selection.input)?;
        let mut schema = input.schema.clone();
        let plan = self.plan_rows(selection, &mut schema)?;

        let mut offsets = Vec::with_capacity(input.partitions.len());
        let mut total = 0u64;
        for partition in &input.partitions {
            offsets.push(total);
            total += partition.len() as u64;
        }
        tracing::info!(
            input = %selection.input,
            rows = total,
            partitions = input.partitions.len(),
            "running selection"
        );

        let processed = self.pool.install(|| {
            input
                .partitions
                .par_iter()
                .zip(offsets.par_iter())
                .enumerate()
                .map(|(partition, (rows, offset))| {
                    let _worker = WorkerGuard::enter();
                    let mut out = Vec::with_capacity(rows.len());
                    for (i, row) in rows.iter().enumerate() {
                        plan.apply(row.clone(), offset + i as u64 + 1, &mut out)?;
                    }
                    tracing::trace!(partition, input = rows.len(), output = out.len(), "partition processed");
                    Ok(out)
                })
                .collect::<Result<Vec<Vec<Row>>>>()
        })?;

        let partition_count = input.partitions.len();
        let output = if selection.group_by.is_some() || !selection.sort.is_empty() {
            let rows: Vec<Row> = processed.into_iter().flatten().collect();
            let mut rows = self.group(selection, rows, &mut schema)?;
            Self::sort(selection, &mut rows, &schema)?;
            Self::split(rows, partition_count)
        } else {
            processed
        };
        let handle = self.store(schema, output);
        tracing::debug!(%handle, "selection finished");
        Ok(handle)
    }

    fn union(&self, inputs: &[CollectionHandle]) -> Result<CollectionHandle> {
        ensure_not_in_worker("union collections")?;
        let collections = inputs
            .iter()
            .map(|h| self.collection(*h))
            .collect::<Result<Vec<_>>>()?;
        let Some(first) = collections.first() else {
            return Err(Error::engine("union of no collections"));
        };
        let schema = first.schema.clone();
        if let Some(other) = collections.iter().find(|c| c.schema != schema) {
            return Err(Error::engine(format!(
                "union inputs disagree on their schema: {:?} and {:?}",
                schema.columns, other.schema.columns
            )));
        }
        let partitions = collections.iter().flat_map(|c| c.partitions.iter().cloned()).collect();
        let handle = self.store(schema, partitions);
        tracing::debug!(%handle, inputs = inputs.len(), "union created");
        Ok(handle)
    }

    fn take(&self, handle: CollectionHandle, limit: Option<usize>) -> Result<Vec<Row>> {
        ensure_not_in_worker("collect rows")?;
        let collection = self.collection(handle)?;
        let limit = limit.unwrap_or(usize::MAX);
        Ok(collection.partitions.iter().flatten().take(limit).cloned().collect())
    }

    fn count(&self, handle: CollectionHandle) -> Result<u64> {
        ensure_not_in_worker("count rows")?;
        Ok(self.collection(handle)?.len() as u64)
    }

    fn schema(&self, handle: CollectionHandle) -> Result<Schema> {
        Ok(self.collection(handle)?.schema.clone())
    }

    fn drop_collection(&self, handle: CollectionHandle) -> Result<()> {
        if self.collections.write().remove(&handle).is_some() {
            tracing::trace!(%handle, "collection dropped");
        }
        Ok(())
    }
}

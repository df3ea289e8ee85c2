//! Engine wrapper owning whatever one evaluation creates.
//!
//! Every collection and row function created through a [`ScopedEngine`] is
//! recorded, and released on the wrapped engine when its [`EngineScope`]
//! guard drops. Handles passed to [`EngineScope::keep`] outlive the scope and
//! belong to the caller from then on.

use parking_lot::Mutex;
use std::sync::Arc;

use super::{Aggregate, CollectionHandle, DistributedEngine, Row, RowUdf, Schema, Selection};
use crate::error::Result;

pub struct ScopedEngine {
    inner: Arc<dyn DistributedEngine>,
    collections: Mutex<Vec<CollectionHandle>>,
    udfs: Mutex<Vec<Arc<str>>>,
}

impl ScopedEngine {
    pub fn new(inner: Arc<dyn DistributedEngine>) -> Self {
        Self {
            inner,
            collections: Mutex::new(Vec::new()),
            udfs: Mutex::new(Vec::new()),
        }
    }

    fn track(&self, handle: CollectionHandle) -> CollectionHandle {
        self.collections.lock().push(handle);
        handle
    }

    /// Drop every tracked collection and unregister every tracked function.
    pub fn release(&self) {
        let collections = std::mem::take(&mut *self.collections.lock());
        let udfs = std::mem::take(&mut *self.udfs.lock());
        if collections.is_empty() && udfs.is_empty() {
            return;
        }
        for handle in &collections {
            if let Err(e) = self.inner.drop_collection(*handle) {
                tracing::warn!(%handle, error = %e, "failed to drop collection");
            }
        }
        for name in &udfs {
            if let Err(e) = self.inner.unregister_udf(name) {
                tracing::warn!(function = %name, error = %e, "failed to unregister row function");
            }
        }
        tracing::debug!(
            collections = collections.len(),
            functions = udfs.len(),
            "evaluation resources released"
        );
    }
}

impl Drop for ScopedEngine {
    fn drop(&mut self) {
        self.release();
    }
}

impl DistributedEngine for ScopedEngine {
    fn create_collection(&self, rows: Vec<Row>, schema: Schema, partitions: Option<usize>) -> Result<CollectionHandle> {
        Ok(self.track(self.inner.create_collection(rows, schema, partitions)?))
    }

    fn register_udf(&self, name: &str, udf: Arc<dyn RowUdf>) -> Result<()> {
        self.inner.register_udf(name, udf)?;
        self.udfs.lock().push(Arc::from(name));
        Ok(())
    }

    fn unregister_udf(&self, name: &str) -> Result<()> {
        self.udfs.lock().retain(|n| &**n != name);
        self.inner.unregister_udf(name)
    }

    fn register_aggregate(&self, name: &str, aggregate: Arc<dyn Aggregate>) -> Result<()> {
        self.inner.register_aggregate(name, aggregate)
    }

    fn execute(&self, selection: &Selection) -> Result<CollectionHandle> {
        Ok(self.track(self.inner.execute(selection)?))
    }

    fn union(&self, inputs: &[CollectionHandle]) -> Result<CollectionHandle> {
        Ok(self.track(self.inner.union(inputs)?))
    }

    fn take(&self, handle: CollectionHandle, limit: Option<usize>) -> Result<Vec<Row>> {
        self.inner.take(handle, limit)
    }

    fn count(&self, handle: CollectionHandle) -> Result<u64> {
        self.inner.count(handle)
    }

    fn schema(&self, handle: CollectionHandle) -> Result<Schema> {
        self.inner.schema(handle)
    }

    fn drop_collection(&self, handle: CollectionHandle) -> Result<()> {
        self.collections.lock().retain(|h| *h != handle);
        self.inner.drop_collection(handle)
    }
}

/// Releases the resources of a [`ScopedEngine`] when dropped, even while
/// row functions or function items still reference the scoped engine.
pub struct EngineScope {
    engine: Arc<ScopedEngine>,
}

impl EngineScope {
    pub fn new(engine: Arc<ScopedEngine>) -> Self {
        Self { engine }
    }

    /// Hand `handle` over to the caller instead of dropping it with the scope.
    pub fn keep(&self, handle: CollectionHandle) {
        self.engine.collections.lock().retain(|h| *h != handle);
    }
}

impl Drop for EngineScope {
    fn drop(&mut self) {
        self.engine.release();
    }
}

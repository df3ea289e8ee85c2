use core::fmt;
use std::sync::{Arc, Weak};

use crate::analysis::DEFAULT_MAX_PASSES;
use crate::distributed::DistributedEngine;
use crate::distributed::memory::MemoryEngine;
use crate::distributed::scope::{EngineScope, ScopedEngine};
use crate::error::{Error, Result};

pub const DEFAULT_PARTITIONS: usize = 4;
pub const DEFAULT_MATERIALIZATION_CAP: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Partitions for collections created without an explicit count.
    pub partitions: usize,
    /// Worker threads for the in-memory engine; `None` uses the rayon default.
    pub threads: Option<usize>,
    /// Most items a distributed collection may contribute to local evaluation.
    pub materialization_cap: usize,
    pub max_analysis_passes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            threads: None,
            materialization_cap: DEFAULT_MATERIALIZATION_CAP,
            max_analysis_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.config.partitions = partitions.max(1);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.config.threads = Some(threads.max(1));
        self
    }

    pub fn with_materialization_cap(mut self, cap: usize) -> Self {
        self.config.materialization_cap = cap;
        self
    }

    pub fn with_max_analysis_passes(mut self, passes: usize) -> Self {
        self.config.max_analysis_passes = passes.max(1);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

/// Explicit handle to the distributed engine, threaded through runtime
/// construction and evaluation.
#[derive(Clone)]
pub struct EngineContext {
    engine: Arc<dyn DistributedEngine>,
    config: Arc<EngineConfig>,
}

impl EngineContext {
    pub fn new(engine: Arc<dyn DistributedEngine>, config: EngineConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
        }
    }

    /// Context backed by a fresh [`MemoryEngine`].
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        let engine = MemoryEngine::new(&config)?;
        Ok(Self::new(Arc::new(engine), config))
    }

    pub fn engine(&self) -> &dyn DistributedEngine {
        &*self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Context whose collections and row functions are released when the
    /// returned scope drops.
    pub fn scoped(&self) -> (EngineContext, EngineScope) {
        let engine = Arc::new(ScopedEngine::new(self.engine.clone()));
        let ctx = Self {
            engine: engine.clone(),
            config: self.config.clone(),
        };
        (ctx, EngineScope::new(engine))
    }

    pub fn downgrade(&self) -> WeakEngineContext {
        WeakEngineContext {
            engine: Arc::downgrade(&self.engine),
            config: self.config.clone(),
        }
    }
}

/// Engine handle that does not keep the engine alive; held by callables the
/// engine itself stores.
#[derive(Clone)]
pub struct WeakEngineContext {
    engine: Weak<dyn DistributedEngine>,
    config: Arc<EngineConfig>,
}

impl WeakEngineContext {
    pub fn upgrade(&self) -> Result<EngineContext> {
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| Error::engine("the engine was dropped while one of its functions was still in use"))?;
        Ok(EngineContext {
            engine,
            config: self.config.clone(),
        })
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext").field("config", &self.config).finish_non_exhaustive()
    }
}

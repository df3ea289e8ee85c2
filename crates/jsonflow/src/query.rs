//! Compiled queries: analysis, runtime construction and evaluation.

use std::sync::Arc;

use crate::analysis::{ExecutionModeAnalyzer, FunctionModeRegistry};
use crate::catalogue::FunctionCatalogue;
use crate::config::{EngineConfig, EngineContext};
use crate::context::{DynamicContext, VariableValue};
use crate::distributed::DistributedItems;
use crate::distributed::scope::EngineScope;
use crate::error::{Error, ErrorCode, Result};
use crate::expr::{Module, VarName};
use crate::item::Item;
use crate::mode::ExecutionMode;
use crate::runtime::{PullIterator, RuntimeBuilder, RuntimeIterator, materialize};
use crate::sequence::Sequence;

/// An analyzed module ready to run against an engine.
///
/// ```no_run
/// use jsonflow::expr::build::{call, lit, range};
/// use jsonflow::{BuiltinCatalogue, EngineConfig, EngineContext, Module, Query};
///
/// let module = Module::new(call("count", vec![call("parallelize", vec![range(lit(1_i64), lit(100_i64))])]));
/// let query = Query::new(module, BuiltinCatalogue)?;
/// let engine = EngineContext::in_memory(EngineConfig::default())?;
/// assert_eq!(query.evaluate(&engine)?.len(), 1);
/// # Ok::<(), jsonflow::Error>(())
/// ```
pub struct Query {
    module: Module,
    registry: FunctionModeRegistry,
    builder: RuntimeBuilder,
    externals: Vec<(VarName, VariableValue)>,
}

impl Query {
    pub fn new(module: Module, catalogue: impl FunctionCatalogue + 'static) -> Result<Self> {
        Self::new_with_config(module, catalogue, &EngineConfig::default())
    }

    pub fn new_with_config(
        mut module: Module,
        catalogue: impl FunctionCatalogue + 'static,
        config: &EngineConfig,
    ) -> Result<Self> {
        let catalogue: Arc<dyn FunctionCatalogue> = Arc::new(catalogue);
        let registry = ExecutionModeAnalyzer::new(catalogue.as_ref())
            .with_max_passes(config.max_analysis_passes)
            .analyze(&mut module)?;
        let builder = RuntimeBuilder::new(&module, catalogue);
        tracing::info!(
            functions = module.functions.len(),
            variables = module.variables.len(),
            mode = %module.main.mode,
            "query compiled"
        );
        Ok(Self {
            module,
            registry,
            builder,
            externals: Vec::new(),
        })
    }

    /// Supply the value of a `declare variable $name external`.
    #[must_use]
    pub fn with_external_variable(mut self, name: &str, value: impl Into<Sequence>) -> Self {
        self.externals
            .push((Arc::from(name), VariableValue::Local(value.into())));
        self
    }

    #[must_use]
    pub fn with_distributed_external(mut self, name: &str, items: DistributedItems) -> Self {
        self.externals.push((Arc::from(name), VariableValue::Distributed(items)));
        self
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn registry(&self) -> &FunctionModeRegistry {
        &self.registry
    }

    pub fn mode(&self) -> ExecutionMode {
        self.module.main.mode
    }

    /// Bind the prolog's variables in declaration order.
    fn global_context(&self, engine: &EngineContext) -> Result<DynamicContext> {
        let mut ctx = DynamicContext::new(engine.clone());
        for decl in &self.module.variables {
            let value = match &decl.value {
                Some(expr) => {
                    let mut iter = self.builder.build(expr)?;
                    if iter.is_distributed() {
                        VariableValue::Distributed(iter.as_distributed(&ctx)?)
                    } else {
                        VariableValue::Local(materialize(&mut iter, &ctx)?)
                    }
                }
                None => self
                    .externals
                    .iter()
                    .rev()
                    .find(|(name, _)| *name == decl.name)
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| {
                        Error::new(
                            ErrorCode::UnboundVariable,
                            format!("no value supplied for external variable ${}", decl.name),
                        )
                        .at(&decl.location)
                    })?,
            };
            tracing::trace!(variable = %decl.name, "global variable bound");
            ctx = ctx.bind(decl.name.clone(), value);
        }
        Ok(ctx)
    }

    /// Open the main expression and stream its items. Collections and row
    /// functions created on the way live until the iterator drops.
    pub fn iterator(&self, engine: &EngineContext) -> Result<QueryIterator> {
        let (engine, scope) = engine.scoped();
        let ctx = self.global_context(&engine)?;
        let mut iter = self.builder.build(&self.module.main)?;
        iter.open(&ctx)?;
        Ok(QueryIterator {
            iter,
            failed: false,
            _scope: scope,
        })
    }

    /// Full result as a local sequence. A distributed result is collected
    /// without the materialization cap.
    pub fn evaluate(&self, engine: &EngineContext) -> Result<Sequence> {
        let (engine, _scope) = engine.scoped();
        let ctx = self.global_context(&engine)?;
        let mut iter = self.builder.build(&self.module.main)?;
        let result = if iter.is_distributed() {
            let items = iter.as_distributed(&ctx)?;
            Sequence::from(items.collect(&engine, None)?)
        } else {
            materialize(&mut iter, &ctx)?
        };
        Ok(result)
    }

    /// The result collection when the main expression runs on the engine.
    /// Only the returned collection survives; dropping it is up to the caller.
    pub fn evaluate_distributed(&self, engine: &EngineContext) -> Result<Option<DistributedItems>> {
        let (engine, scope) = engine.scoped();
        let ctx = self.global_context(&engine)?;
        let mut iter = self.builder.build(&self.module.main)?;
        if !iter.is_distributed() {
            return Ok(None);
        }
        let items = iter.as_distributed(&ctx)?;
        scope.keep(items.handle);
        Ok(Some(items))
    }
}

/// Streaming query results; the underlying iterator is closed on
/// exhaustion, on the first error, or on drop.
pub struct QueryIterator {
    iter: RuntimeIterator,
    failed: bool,
    _scope: EngineScope,
}

impl QueryIterator {
    pub fn is_distributed(&self) -> bool {
        self.iter.is_distributed()
    }
}

impl Iterator for QueryIterator {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.iter.has_next() {
            self.iter.close();
            return None;
        }
        match self.iter.next() {
            Ok(item) => Some(Ok(item)),
            Err(e) => {
                self.failed = true;
                self.iter.close();
                Some(Err(e))
            }
        }
    }
}

impl Drop for QueryIterator {
    fn drop(&mut self) {
        self.iter.close();
    }
}

//! Runtime variable bindings.

use core::fmt;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::config::{EngineContext, WeakEngineContext};
use crate::distributed::DistributedItems;
use crate::error::{Error, ErrorCode, Result};
use crate::expr::VarName;
use crate::flwor::FlworTuple;
use crate::sequence::Sequence;

/// Value bound to a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Local(Sequence),
    Distributed(DistributedItems),
    /// Only the length of the sequence is known; produced by tuple
    /// projection when downstream clauses just count or test the variable.
    Count(u64),
}

impl VariableValue {
    pub fn as_local(&self) -> Option<&Sequence> {
        match self {
            VariableValue::Local(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Sequence> for VariableValue {
    fn from(s: Sequence) -> Self {
        VariableValue::Local(s)
    }
}

struct Frame {
    parent: Option<Arc<Frame>>,
    bindings: SmallVec<[(VarName, VariableValue); 2]>,
}

/// Immutable chain of binding frames.
///
/// Binding variables creates a child context whose new frame points at the
/// current one; the parent is never modified, so a frame disappears as a
/// whole when the context that introduced it is dropped.
#[derive(Clone)]
pub struct DynamicContext {
    frame: Option<Arc<Frame>>,
    engine: EngineContext,
}

impl DynamicContext {
    pub fn new(engine: EngineContext) -> Self {
        Self { frame: None, engine }
    }

    pub fn engine(&self) -> &EngineContext {
        &self.engine
    }

    #[must_use]
    pub fn bind(&self, name: VarName, value: impl Into<VariableValue>) -> Self {
        self.bind_all([(name, value.into())])
    }

    #[must_use]
    pub fn bind_all(&self, bindings: impl IntoIterator<Item = (VarName, VariableValue)>) -> Self {
        let bindings: SmallVec<[(VarName, VariableValue); 2]> = bindings.into_iter().collect();
        if bindings.is_empty() {
            return self.clone();
        }
        Self {
            frame: Some(Arc::new(Frame {
                parent: self.frame.clone(),
                bindings,
            })),
            engine: self.engine.clone(),
        }
    }

    #[must_use]
    pub fn with_tuple(&self, tuple: &FlworTuple) -> Self {
        self.bind_all(tuple.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    pub fn lookup(&self, name: &str) -> Option<&VariableValue> {
        let mut frame = self.frame.as_deref();
        while let Some(f) = frame {
            if let Some((_, v)) = f.bindings.iter().rev().find(|(n, _)| &**n == name) {
                return Some(v);
            }
            frame = f.parent.as_deref();
        }
        None
    }

    pub fn require(&self, name: &str) -> Result<&VariableValue> {
        self.lookup(name)
            .ok_or_else(|| Error::new(ErrorCode::UnboundVariable, format!("variable ${name} is not bound")))
    }

    /// Same bindings without keeping the engine alive.
    pub fn detach(&self) -> DetachedContext {
        DetachedContext {
            frame: self.frame.clone(),
            engine: self.engine.downgrade(),
        }
    }

    /// Number of frames in the chain.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut frame = self.frame.as_deref();
        while let Some(f) = frame {
            depth += 1;
            frame = f.parent.as_deref();
        }
        depth
    }
}

impl fmt::Debug for DynamicContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = Vec::new();
        let mut frame = self.frame.as_deref();
        while let Some(fr) = frame {
            names.extend(fr.bindings.iter().map(|(n, _)| &**n));
            frame = fr.parent.as_deref();
        }
        f.debug_struct("DynamicContext")
            .field("variables", &names)
            .field("engine", &self.engine)
            .finish()
    }
}

/// Bindings captured by a callable registered with the engine; reattached
/// to the engine for each call.
#[derive(Clone)]
pub struct DetachedContext {
    frame: Option<Arc<Frame>>,
    engine: WeakEngineContext,
}

impl DetachedContext {
    pub fn attach(&self) -> Result<DynamicContext> {
        Ok(DynamicContext {
            frame: self.frame.clone(),
            engine: self.engine.upgrade()?,
        })
    }
}

pub struct DynamicContextBuilder {
    engine: EngineContext,
    bindings: Vec<(VarName, VariableValue)>,
}

impl DynamicContextBuilder {
    pub fn new(engine: EngineContext) -> Self {
        Self {
            engine,
            bindings: Vec::new(),
        }
    }

    pub fn with_variable(mut self, name: &str, value: impl Into<Sequence>) -> Self {
        self.bindings.push((Arc::from(name), VariableValue::Local(value.into())));
        self
    }

    pub fn with_distributed_variable(mut self, name: &str, items: DistributedItems) -> Self {
        self.bindings.push((Arc::from(name), VariableValue::Distributed(items)));
        self
    }

    pub fn build(self) -> DynamicContext {
        DynamicContext::new(self.engine).bind_all(self.bindings)
    }
}

use smallvec::SmallVec;

use crate::expr::VarName;
use crate::mode::ExecutionMode;

/// Index of a scope record inside a [`StaticContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    bindings: SmallVec<[(VarName, ExecutionMode); 4]>,
}

/// Arena of lexical scopes mapping variable names to execution modes.
///
/// Scopes only point at their parent by index; lookups walk the chain
/// upwards and writes always land in the scope they are addressed to.
#[derive(Debug)]
pub struct StaticContext {
    scopes: Vec<Scope>,
}

impl Default for StaticContext {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticContext {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn child(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(parent),
            bindings: SmallVec::new(),
        });
        ScopeId(self.scopes.len() - 1)
    }

    /// Bind (or rebind) `name` in `scope`, shadowing any outer binding.
    pub fn bind(&mut self, scope: ScopeId, name: VarName, mode: ExecutionMode) {
        let bindings = &mut self.scopes[scope.0].bindings;
        match bindings.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = mode,
            None => bindings.push((name, mode)),
        }
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<ExecutionMode> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let record = &self.scopes[id.0];
            if let Some((_, mode)) = record.bindings.iter().rev().find(|(n, _)| &**n == name) {
                return Some(*mode);
            }
            current = record.parent;
        }
        None
    }

    pub fn is_bound(&self, scope: ScopeId, name: &str) -> bool {
        self.lookup(scope, name).is_some()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

use indexmap::IndexMap;

use crate::context::VariableValue;
use crate::expr::VarName;
use crate::sequence::Sequence;

/// One row of a FLWOR tuple stream. Bindings keep the order in which the
/// clauses introduced them; rebinding a name keeps its original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlworTuple {
    bindings: IndexMap<VarName, VariableValue>,
}

impl FlworTuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: VarName, value: VariableValue) {
        self.bindings.insert(name, value);
    }

    #[must_use]
    pub fn with(mut self, name: VarName, value: VariableValue) -> Self {
        self.bind(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.bindings.get(name)
    }

    pub fn local(&self, name: &str) -> Option<&Sequence> {
        self.get(name).and_then(VariableValue::as_local)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VarName, &VariableValue)> {
        self.bindings.iter()
    }

    pub fn variables(&self) -> impl Iterator<Item = &VarName> {
        self.bindings.keys()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

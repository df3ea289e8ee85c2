use std::collections::BTreeMap;

use crate::expr::FunctionIdentifier;
use crate::mode::ExecutionMode;

/// Call-site evidence per user-defined function: the join of argument modes
/// seen at every call site, plus the mode of the function's body.
///
/// All updates are pointwise joins, so a registry only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionModeRegistry {
    params: BTreeMap<FunctionIdentifier, Vec<ExecutionMode>>,
    returns: BTreeMap<FunctionIdentifier, ExecutionMode>,
}

impl FunctionModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the argument modes of one call site. Returns whether anything changed.
    pub fn record_call(&mut self, id: &FunctionIdentifier, modes: &[ExecutionMode]) -> bool {
        let entry = self
            .params
            .entry(id.clone())
            .or_insert_with(|| vec![ExecutionMode::Unset; modes.len()]);
        let mut changed = false;
        for (slot, mode) in entry.iter_mut().zip(modes) {
            let joined = slot.join(*mode);
            changed |= joined != *slot;
            *slot = joined;
        }
        changed
    }

    pub fn record_return(&mut self, id: &FunctionIdentifier, mode: ExecutionMode) -> bool {
        let slot = self.returns.entry(id.clone()).or_default();
        let joined = slot.join(mode);
        let changed = joined != *slot;
        *slot = joined;
        changed
    }

    pub fn param_modes(&self, id: &FunctionIdentifier) -> Option<&[ExecutionMode]> {
        self.params.get(id).map(Vec::as_slice)
    }

    pub fn param_mode(&self, id: &FunctionIdentifier, index: usize) -> ExecutionMode {
        self.params
            .get(id)
            .and_then(|modes| modes.get(index).copied())
            .unwrap_or_default()
    }

    pub fn return_mode(&self, id: &FunctionIdentifier) -> ExecutionMode {
        self.returns.get(id).copied().unwrap_or_default()
    }

    /// Identifiers whose entry differs between `self` and `other`.
    pub fn changed_since(&self, other: &FunctionModeRegistry) -> Vec<FunctionIdentifier> {
        let mut changed: Vec<FunctionIdentifier> = Vec::new();
        for (id, modes) in &self.params {
            if other.params.get(id) != Some(modes) {
                changed.push(id.clone());
            }
        }
        for (id, mode) in &self.returns {
            if other.returns.get(id) != Some(mode) && !changed.contains(id) {
                changed.push(id.clone());
            }
        }
        changed
    }
}

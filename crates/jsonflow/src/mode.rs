use core::fmt;

/// Where the value of an expression or variable lives at runtime.
///
/// The variants form a join-semilattice ordered by declaration:
/// `Unset < Local < Structured < Distributed`. Every merge in the analyzer
/// takes the maximum, so repeated passes can only move a node upwards.
/// `Structured` is a distributed collection that also carries a column
/// schema; combining it with any other distributed value loses the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ExecutionMode {
    #[default]
    Unset,
    Local,
    Structured,
    Distributed,
}

impl ExecutionMode {
    #[must_use]
    pub fn join(self, other: ExecutionMode) -> ExecutionMode {
        self.max(other)
    }

    /// Join over any number of modes; the empty join is `Unset`.
    pub fn join_all<I: IntoIterator<Item = ExecutionMode>>(modes: I) -> ExecutionMode {
        modes.into_iter().fold(ExecutionMode::Unset, ExecutionMode::join)
    }

    pub fn is_distributed(self) -> bool {
        matches!(self, ExecutionMode::Structured | ExecutionMode::Distributed)
    }

    pub fn is_unset(self) -> bool {
        self == ExecutionMode::Unset
    }

    /// Resolve `Unset` to `Local` when the visitor configuration allows it.
    #[must_use]
    pub fn or_local(self, unset_to_local: bool) -> ExecutionMode {
        if unset_to_local && self.is_unset() {
            ExecutionMode::Local
        } else {
            self
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionMode::Unset => "unset",
            ExecutionMode::Local => "local",
            ExecutionMode::Structured => "structured",
            ExecutionMode::Distributed => "distributed",
        })
    }
}

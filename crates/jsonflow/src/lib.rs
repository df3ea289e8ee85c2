pub mod analysis;
pub mod catalogue;
pub mod config;
pub mod context;
pub mod distributed;
pub mod error;
pub mod expr;
pub mod flwor;
pub mod item;
pub mod mode;
pub mod query;
pub mod runtime;
pub mod sequence;
pub mod types;

pub use analysis::{ExecutionModeAnalyzer, FunctionModeRegistry};
pub use catalogue::{Builtin, BuiltinCatalogue, FunctionCatalogue};
pub use config::{EngineConfig, EngineContext};
pub use context::{DynamicContext, DynamicContextBuilder, VariableValue};
pub use distributed::memory::MemoryEngine;
pub use distributed::{DistributedEngine, DistributedItems};
pub use error::{Error, ErrorCode, Result, SourceLocation};
pub use expr::{Expr, ExprKind, FunctionIdentifier, Module};
pub use flwor::FlworTuple;
pub use item::{AtomicValue, Item};
pub use mode::ExecutionMode;
pub use query::{Query, QueryIterator};
pub use runtime::{PullIterator, RuntimeBuilder, RuntimeIterator};
pub use sequence::Sequence;
pub use types::{AtomicType, SequenceType};

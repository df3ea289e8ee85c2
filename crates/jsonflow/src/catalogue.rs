use crate::expr::FunctionIdentifier;
use crate::mode::ExecutionMode;

/// Built-in functions the runtime knows how to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Count,
    Exists,
    Empty,
    Head,
    Remove,
    JsonParse,
    /// `parallelize($items)` / `parallelize($items, $partitions)`
    Parallelize,
    /// `annotate($objects, $schema)`
    Annotate,
    String,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Count => "count",
            Builtin::Exists => "exists",
            Builtin::Empty => "empty",
            Builtin::Head => "head",
            Builtin::Remove => "remove",
            Builtin::JsonParse => "json-parse",
            Builtin::Parallelize => "parallelize",
            Builtin::Annotate => "annotate",
            Builtin::String => "string",
        }
    }

    /// Mode of a call given the modes of its arguments.
    pub fn return_mode(&self, args: &[ExecutionMode]) -> ExecutionMode {
        match self {
            Builtin::Parallelize => ExecutionMode::Distributed,
            Builtin::Annotate => ExecutionMode::Structured,
            Builtin::Remove => args.first().copied().unwrap_or(ExecutionMode::Local),
            Builtin::Count
            | Builtin::Exists
            | Builtin::Empty
            | Builtin::Head
            | Builtin::JsonParse
            | Builtin::String => ExecutionMode::Local,
        }
    }
}

/// Answers "is this identifier built-in?" for the analyzer and hands the
/// runtime builder the builtin to instantiate.
pub trait FunctionCatalogue: Send + Sync {
    fn builtin(&self, id: &FunctionIdentifier) -> Option<Builtin>;

    fn is_builtin(&self, id: &FunctionIdentifier) -> bool {
        self.builtin(id).is_some()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalogue;

impl FunctionCatalogue for BuiltinCatalogue {
    fn builtin(&self, id: &FunctionIdentifier) -> Option<Builtin> {
        Some(match (&*id.name, id.arity) {
            ("count", 1) => Builtin::Count,
            ("exists", 1) => Builtin::Exists,
            ("empty", 1) => Builtin::Empty,
            ("head", 1) => Builtin::Head,
            ("remove", 2) => Builtin::Remove,
            ("json-parse", 1) => Builtin::JsonParse,
            ("parallelize", 1 | 2) => Builtin::Parallelize,
            ("annotate", 2) => Builtin::Annotate,
            ("string", 1) => Builtin::String,
            _ => return None,
        })
    }
}

use core::fmt;
use std::sync::Arc;

/// Position of the expression that raised an error, used for user diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub module: Option<Arc<str>>,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self {
            module: None,
            line,
            column,
        }
    }

    pub fn in_module(mut self, module: impl Into<Arc<str>>) -> Self {
        self.module = Some(module.into());
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(m) => write!(f, "{}:{}:{}", m, self.line, self.column),
            None => write!(f, "line {}, column {}", self.line, self.column),
        }
    }
}

/// Whether an error points at a bug in the engine or at the query/data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Defect,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Iterator pulled before open or past exhaustion.
    IteratorProtocol,
    /// Analyzer or runtime builder produced an inconsistent tree.
    InternalInvariant,
    /// A distributed job was required inside another job's row evaluation.
    NestedDistributedJob,
    Schema,
    Type,
    InvalidCast,
    DivisionByZero,
    UnknownFunction,
    UnboundVariable,
    DuplicateObjectKey,
    MaterializationCap,
    Checkpoint,
    JsonParse,
    Engine,
}

impl ErrorCode {
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorCode::IteratorProtocol | ErrorCode::InternalInvariant => ErrorClass::Defect,
            _ => ErrorClass::Data,
        }
    }

    /// Stable identifier printed in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IteratorProtocol => "JFIT0001",
            ErrorCode::InternalInvariant => "JFIN0001",
            ErrorCode::NestedDistributedJob => "JFDY0001",
            ErrorCode::Schema => "JFSC0001",
            ErrorCode::Type => "XPTY0004",
            ErrorCode::InvalidCast => "FORG0001",
            ErrorCode::DivisionByZero => "FOAR0001",
            ErrorCode::UnknownFunction => "XPST0017",
            ErrorCode::UnboundVariable => "XPST0008",
            ErrorCode::DuplicateObjectKey => "JNDY0003",
            ErrorCode::MaterializationCap => "JFDY0002",
            ErrorCode::Checkpoint => "JFCP0001",
            ErrorCode::JsonParse => "JNDY0021",
            ErrorCode::Engine => "JFEN0001",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub location: Option<SourceLocation>,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            location: None,
            source: None,
        }
    }

    pub fn protocol(msg: impl Into<String>, location: &SourceLocation) -> Self {
        Self::new(ErrorCode::IteratorProtocol, msg).at(location)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalInvariant, msg)
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Type, msg)
    }

    pub fn invalid_cast(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidCast, msg)
    }

    /// Schema mismatch; `column` is echoed in the message so callers can report it.
    pub fn schema(column: &str, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        Self::new(ErrorCode::Schema, format!("column '{column}': {msg}"))
    }

    pub fn nested_job(msg: impl Into<String>, location: &SourceLocation) -> Self {
        Self::new(ErrorCode::NestedDistributedJob, msg).at(location)
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Engine, msg)
    }

    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }

    /// Attach a location unless a more precise one is already present.
    pub fn at(mut self, location: &SourceLocation) -> Self {
        if self.location.is_none() {
            self.location = Some(location.clone());
        }
        self
    }

    pub fn with_source(
        mut self,
        source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>,
    ) -> Self {
        self.source = source.into();
        self
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::new(ErrorCode::JsonParse, format!("invalid JSON: {e}"))
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {} ({})", self.message, self.code)?;
        if let Some(loc) = &self.location {
            write!(f, " at {loc}")?;
        }
        Ok(())
    }
}

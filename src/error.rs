//! Error types for pipeql.

use thiserror::Error;

/// The main error type for the transpilation pipeline and the executor.
#[derive(Debug, Error)]
pub enum PipeError {
    /// A span of input could not be classified as a token.
    #[error("Lex error at offset {offset}: {message}")]
    Lex { offset: usize, message: String },

    /// Brackets do not pair up.
    #[error("Unbalanced grouping at offset {offset}: {message}")]
    UnbalancedGrouping { offset: usize, message: String },

    /// A `$name` invocation that is not on the macro allow-list.
    #[error("Unknown macro: '${0}'")]
    UnknownMacro(String),

    /// A macro was invoked with the wrong number of arguments.
    #[error("Macro '${name}' expects {expected} argument(s), found {found}")]
    MacroArguments {
        name: String,
        expected: usize,
        found: usize,
    },

    /// Expansion kept producing macro calls past the depth limit.
    #[error("Macro expansion of '${name}' exceeded the nesting limit of {limit}")]
    MacroRecursionLimit { name: String, limit: usize },

    /// No store handle, or the catalog could not resolve an enrichment.
    #[error("Enrichment unavailable: {0}")]
    EnrichmentUnavailable(String),

    /// More distinct enrichment targets than allowed for one query.
    #[error("Too many enrichment targets: {found} (limit {limit})")]
    EnrichmentLimit { found: usize, limit: usize },

    /// The stage sequence cannot be expressed as SQL.
    #[error("Transpile error: {0}")]
    Transpile(String),

    /// The store rejected or failed the generated SQL.
    #[error("Query error: {message}")]
    Query { message: String, sql: String },

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipeError {
    /// Create a lex error at the given byte offset.
    pub fn lex(offset: usize, message: impl Into<String>) -> Self {
        Self::Lex {
            offset,
            message: message.into(),
        }
    }

    /// Create an unbalanced grouping error at the given byte offset.
    pub fn unbalanced(offset: usize, message: impl Into<String>) -> Self {
        Self::UnbalancedGrouping {
            offset,
            message: message.into(),
        }
    }

    pub fn transpile(message: impl Into<String>) -> Self {
        Self::Transpile(message.into())
    }

    /// Stable name of the error kind, as reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lex { .. } => "LexError",
            Self::UnbalancedGrouping { .. } => "UnbalancedGroupingError",
            Self::UnknownMacro(_) => "UnknownMacroError",
            Self::MacroArguments { .. } => "MacroArgumentsError",
            Self::MacroRecursionLimit { .. } => "MacroRecursionLimitError",
            Self::EnrichmentUnavailable(_) => "EnrichmentUnavailableError",
            Self::EnrichmentLimit { .. } => "EnrichmentLimitError",
            Self::Transpile(_) => "TranspileError",
            Self::Query { .. } => "QueryError",
            Self::Connection(_) => "ConnectionError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
        }
    }

    /// The SQL text attached to the error, if the failure happened at execution.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

/// Result type alias for pipeql operations.
pub type PipeResult<T> = Result<T, PipeError>;

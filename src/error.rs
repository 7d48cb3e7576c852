//! Error types for the Backup Finalizer Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object vanished between list and get
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backup store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Phase string that does not map to a known phase
    #[error("Unknown {kind} phase '{phase}'")]
    UnknownPhase { kind: &'static str, phase: String },

    /// Phase change not allowed by the transition table
    #[error("Invalid backup phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Data mover resource reported an error condition
    #[error("{kind} {namespace}/{name} has failed status (phase {phase})")]
    MoverFailed {
        kind: &'static str,
        namespace: String,
        name: String,
        phase: String,
    },

    /// Data mover resource never reached a terminal phase
    #[error("Timed out after {timeout_secs}s awaiting {kind} {namespace}/{name}")]
    MoverTimeout {
        kind: &'static str,
        namespace: String,
        name: String,
        timeout_secs: u64,
    },

    /// Malformed compressed or tar data
    #[error("Archive decode error: {0}")]
    Decode(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A spawned monitor task panicked or was aborted
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Error annotated with the operation and object it occurred on
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create an archive decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Wrap this error with a description of what was being done
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the error means the target object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            Error::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Innermost error with any context wrappers removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension for attaching context to fallible results
pub trait ResultExt<T> {
    /// Wrap the error, if any, with a lazily built context message
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy of the engine.
///
/// Construction and compilation errors are deterministic for a given tree and
/// are never retried. Execution errors carry the backend diagnostic and are
/// surfaced for the caller to decide; the engine performs no implicit retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A structural invariant was violated while building a query or action.
    #[error("invalid query construction: {0}")]
    Construct(String),
    /// The tree cannot be lowered to SQL for the target dialect.
    #[error("cannot compile query: {0}")]
    Compile(String),
    /// The backend rejected the statement or the connection was lost.
    #[error("execution failed: {0}")]
    Execution(String),
    /// A connection lease could not be satisfied within the bounded wait.
    #[error("could not acquire a connection within the configured timeout")]
    PoolTimeout,
    /// A row value did not match the declared output shape.
    #[error("cannot decode row: {0}")]
    Decode(String),
    /// The task handle was cancelled before completion.
    #[error("the task was cancelled before completion")]
    Cancelled,
}

impl Error {
    pub fn construct(message: impl Into<String>) -> Self {
        Self::Construct(message.into())
    }
    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile(message.into())
    }
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}

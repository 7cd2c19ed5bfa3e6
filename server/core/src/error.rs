use thiserror::Error;

/// The error kinds shared across the aggregator. The HTTP layer maps each
/// kind to a status code; everything below it only decides the kind.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid instance or provider configuration. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Missing or invalid identity. Details are never surfaced.
    #[error("unauthorized")]
    Authentication,

    /// An identified user lacking permission for an action.
    #[error("forbidden: {0}")]
    Authorization(String),

    /// Malformed input: unknown cluster or instance, bad parameter.
    #[error("{0}")]
    Validation(String),

    /// An operation dispatched to an instance that does not support it.
    /// Raised before any I/O.
    #[error("operation is not supported: {0}")]
    Unsupported(String),

    /// A Kubernetes or third-party backend failure.
    #[error("{0}")]
    Upstream(String),
}

impl Error {
    pub fn configuration(message: impl ToString) -> Self {
        Self::Configuration(message.to_string())
    }

    pub fn validation(message: impl ToString) -> Self {
        Self::Validation(message.to_string())
    }

    pub fn upstream(message: impl ToString) -> Self {
        Self::Upstream(message.to_string())
    }
}

//! Error types for the provider.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors raised while serving a provider operation.
///
/// Every variant except the transport-level ones ends up as a diagnostic on
/// the response of the call that failed; see [`ProviderError::to_diagnostic`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// An operation against the remote API failed.
    #[error("{summary}: {detail}")]
    Operation {
        /// Short, operation-scoped summary.
        summary: String,
        /// The underlying failure.
        detail: String,
    },

    /// A resource or data source was used before `ConfigureProvider`.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// The host sent a request this provider cannot act on.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// An I/O error occurred while setting up the server.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// An operation failure with a summary and the underlying detail.
    pub fn operation(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Operation {
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    /// Render this error as a single error diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Operation { summary, detail } => {
                Diagnostic::error(summary.clone()).with_detail(detail.clone())
            }
            other => Diagnostic::error(other.to_string()),
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Operation { .. } => tonic::Status::unknown(err.to_string()),
            ProviderError::NotConfigured(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            }
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            }
            ProviderError::Io(err) => tonic::Status::internal(format!("I/O error: {}", err)),
        }
    }
}

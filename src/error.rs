//! Error types for provider implementations.
//!
//! Failures travel in three tiers. Diagnostics accumulate on the response and
//! never abort a call. A deliberate, structured failure is raised as
//! [`ProviderError::Diagnostic`] and converted into exactly one error
//! diagnostic at the dispatch boundary; the RPC itself still succeeds. Any
//! other error is logged and fails the RPC at the transport level.
//!
//! [`ProviderError::RemoteResourceNotFound`] is a distinguished outcome for
//! read and import: the dispatch layer translates it into a null current
//! state, signalling deletion rather than an error.

use thiserror::Error;

use crate::diagnostics::Diagnostic;

/// Errors that can occur while handling a provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A deliberate failure carrying a diagnostic. Folded into the response's
    /// diagnostic list; does not fail the RPC.
    #[error("{}", .0.summary)]
    Diagnostic(Diagnostic),

    /// The resource no longer exists on the remote system.
    #[error("resource not found remotely")]
    RemoteResourceNotFound,

    /// The provider has not been configured yet.
    #[error("provider is not configured")]
    NotConfigured,

    /// No resource is registered under the requested type name.
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// No data source is registered under the requested type name.
    #[error("unknown data source type: {0}")]
    UnknownDataSourceType(String),

    /// A state payload could not be encoded or decoded.
    #[error("state codec error: {0}")]
    Codec(String),

    /// A JSON serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl ProviderError {
    /// Create a structured failure from an error summary.
    pub fn diagnostic(summary: impl Into<String>) -> Self {
        Self::Diagnostic(Diagnostic::error(summary))
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Diagnostic(d) => tonic::Status::internal(d.summary),
            ProviderError::RemoteResourceNotFound => {
                tonic::Status::not_found("resource not found remotely")
            }
            ProviderError::NotConfigured => {
                tonic::Status::failed_precondition("provider is not configured")
            }
            ProviderError::UnknownResourceType(msg) => tonic::Status::not_found(msg),
            ProviderError::UnknownDataSourceType(msg) => tonic::Status::not_found(msg),
            ProviderError::Codec(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("serialization error: {}", err))
            }
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("transport error: {}", err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::diagnostic("credentials invalid");
        assert_eq!(format!("{}", err), "credentials invalid");

        let err = ProviderError::UnknownResourceType("example_record".to_string());
        assert_eq!(format!("{}", err), "unknown resource type: example_record");

        let err = ProviderError::RemoteResourceNotFound;
        assert_eq!(format!("{}", err), "resource not found remotely");
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::NotConfigured.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status: tonic::Status =
            ProviderError::UnknownResourceType("x".to_string()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status: tonic::Status = ProviderError::Codec("truncated".to_string()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}

//! Domain error representation shared across jobs and adapters.
//!
//! Keep this module free from HTTP/SQL/transport concerns so the same
//! taxonomy can be reported by any adapter and surfaced in a task's JSON
//! output without leaking stack traces (spec §7).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine-readable error kind, mirroring the taxonomy table in
/// spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient network failure (gateway, model, image download).
    TransientNetwork,
    /// The gateway response could not be parsed.
    GatewayParse,
    /// The model rejected the request outright (e.g. malformed image).
    ModelBadRequest,
    /// The model's response could not be parsed as the expected JSON shape.
    JsonParseFailure,
    /// A database constraint or connectivity failure.
    DatabaseConstraint,
    /// Required configuration was missing or invalid at startup.
    ConfigurationMissing,
    /// Internal invariant violation; not expected in normal operation.
    Internal,
}

/// Domain error payload. Carries a stable [`ErrorKind`] plus a human
/// message; adapters attach their own richer error types and map them into
/// this shape at the job boundary.
///
/// # Examples
/// ```
/// use intel_pipeline::domain::error::{Error, ErrorKind};
///
/// let err = Error::new(ErrorKind::GatewayParse, "malformed rss feed");
/// assert_eq!(err.kind(), ErrorKind::GatewayParse);
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Construct a new domain error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Shorthand for [`ErrorKind::TransientNetwork`].
    pub fn transient_network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, message)
    }

    /// Shorthand for [`ErrorKind::GatewayParse`].
    pub fn gateway_parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GatewayParse, message)
    }

    /// Shorthand for [`ErrorKind::ModelBadRequest`].
    pub fn model_bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelBadRequest, message)
    }

    /// Shorthand for [`ErrorKind::JsonParseFailure`].
    pub fn json_parse_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::JsonParseFailure, message)
    }

    /// Shorthand for [`ErrorKind::DatabaseConstraint`].
    pub fn database_constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseConstraint, message)
    }

    /// Shorthand for [`ErrorKind::ConfigurationMissing`].
    pub fn configuration_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationMissing, message)
    }

    /// Shorthand for [`ErrorKind::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

/// Convenient domain result alias.
pub type DomainResult<T> = Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn error_carries_kind_and_message() {
        let err = Error::transient_network("timed out");
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert_eq!(err.message(), "timed out");
        assert_eq!(err.to_string(), "timed out");
    }
}

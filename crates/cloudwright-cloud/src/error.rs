//! Cloud control-plane error types

use thiserror::Error;

/// Errors raised while driving the remote control plane
#[derive(Error, Debug)]
pub enum CloudError {
    /// The remote call itself failed
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A precondition that must hold before any mutation was violated
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A bounded wait used up its attempts
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A resource did not reach the expected status within its budget.
    ///
    /// This is recoverable: the mutation was issued, only the status never
    /// converged. Callers decide whether it is fatal.
    #[error("{resource} '{id}' did not reach status {expected} (current status: {status})")]
    NotReady {
        resource: &'static str,
        id: String,
        expected: String,
        status: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Coarse classification of a remote API failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    /// Detach was asked for a volume that is not attached
    NotAttached,
    /// The network still has instances connected to it
    NetworkConnected,
    Other,
}

const NOT_FOUND_MARKERS: &[&str] = &["404", "not found", "does not exist"];
const FORBIDDEN_MARKERS: &[&str] = &["403", "unauthorized", "forbidden"];
const CONFLICT_MARKERS: &[&str] = &["409", "attached", "in use"];
const NOT_ATTACHED_MARKERS: &[&str] = &["not attached", "is detached", "already detached"];
const NETWORK_CONNECTED_MARKERS: &[&str] = &["network is connected"];

/// Classify an API error message.
///
/// The control plane reports failures as free text with the HTTP status
/// embedded, so classification matches on lowercase markers. The network
/// marker is checked first because it also contains conflict wording, and
/// the not-attached marker is checked before the conflict markers for the
/// same reason.
pub fn classify_api_message(message: &str) -> ApiErrorKind {
    let lower = message.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if has(NETWORK_CONNECTED_MARKERS) {
        ApiErrorKind::NetworkConnected
    } else if has(NOT_FOUND_MARKERS) {
        ApiErrorKind::NotFound
    } else if has(FORBIDDEN_MARKERS) {
        ApiErrorKind::Forbidden
    } else if has(NOT_ATTACHED_MARKERS) {
        ApiErrorKind::NotAttached
    } else if has(CONFLICT_MARKERS) {
        ApiErrorKind::Conflict
    } else {
        ApiErrorKind::Other
    }
}

impl CloudError {
    /// Shorthand for wrapping an API failure with context.
    ///
    /// An inner `ApiError` contributes its bare message so the prefix is
    /// not repeated.
    pub fn api(context: impl std::fmt::Display, err: CloudError) -> Self {
        match err {
            CloudError::ApiError(message) => {
                CloudError::ApiError(format!("{}: {}", context, message))
            }
            other => CloudError::ApiError(format!("{}: {}", context, other)),
        }
    }

    /// Classify this error for callers that downgrade specific API failures
    pub fn api_kind(&self) -> ApiErrorKind {
        match self {
            CloudError::ResourceNotFound(_) => ApiErrorKind::NotFound,
            CloudError::ApiError(message) => classify_api_message(message),
            CloudError::Other(err) => classify_api_message(&err.to_string()),
            _ => ApiErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_kind() == ApiErrorKind::NotFound
    }

    /// True for bounded waits that ran out, including status convergence
    pub fn is_timeout(&self) -> bool {
        matches!(self, CloudError::Timeout(_) | CloudError::NotReady { .. })
    }

    /// Short diagnostic title for this error
    pub fn summary(&self) -> &'static str {
        match self {
            CloudError::ApiError(_) | CloudError::Other(_) => "Client Error",
            CloudError::ResourceNotFound(_) => "Resource Not Found",
            CloudError::InvalidConfig(_) => "Invalid Configuration",
            CloudError::InvariantViolation(_) => "Invalid Operation",
            CloudError::Timeout(_) => "Timeout",
            CloudError::NotReady { .. } => "Resource Not Ready",
            CloudError::Io(_) | CloudError::Json(_) => "Configuration Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_markers() {
        assert_eq!(
            classify_api_message("HTTP 404: instance does not exist"),
            ApiErrorKind::NotFound
        );
        assert_eq!(
            classify_api_message("403 Forbidden"),
            ApiErrorKind::Forbidden
        );
        assert_eq!(
            classify_api_message("volume is still attached"),
            ApiErrorKind::Conflict
        );
        assert_eq!(
            classify_api_message("The network is connected to an instance (409)"),
            ApiErrorKind::NetworkConnected
        );
        assert_eq!(classify_api_message("bad gateway"), ApiErrorKind::Other);
    }

    #[test]
    fn test_not_attached_is_not_a_conflict() {
        assert_eq!(
            classify_api_message("volume vol-1 is not attached to instance i-1"),
            ApiErrorKind::NotAttached
        );
        assert_eq!(
            classify_api_message("409: volume is attached"),
            ApiErrorKind::Conflict
        );
    }

    #[test]
    fn test_api_context_is_prefixed_once() {
        let inner = CloudError::ApiError("404: volume vol-1 not found".to_string());
        let err = CloudError::api("Failed to delete volume vol-1", inner);
        assert_eq!(
            err.to_string(),
            "API error: Failed to delete volume vol-1: 404: volume vol-1 not found"
        );
        assert!(err.is_not_found());

        let nested = CloudError::api("Failed to list volumes", err);
        assert_eq!(nested.to_string().matches("API error").count(), 1);

        let missing = CloudError::api("lookup", CloudError::ResourceNotFound("vol-2".into()));
        assert!(missing.is_not_found());
    }

    #[test]
    fn test_not_ready_is_timeout() {
        let err = CloudError::NotReady {
            resource: "Instance",
            id: "i-1".to_string(),
            expected: "UP".to_string(),
            status: "Starting".to_string(),
        };
        assert!(err.is_timeout());
        assert_eq!(err.summary(), "Resource Not Ready");
        assert!(err.to_string().contains("current status: Starting"));
    }

    #[test]
    fn test_anyhow_errors_are_classified() {
        let err = CloudError::from(anyhow::anyhow!("request failed: 404 not found"));
        assert!(err.is_not_found());
        assert!(!err.is_timeout());
    }
}

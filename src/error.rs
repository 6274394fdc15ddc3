//! Unified error handling for the trek-route library.
//!
//! Cache and dedup primitives hand these errors to every waiter unchanged,
//! which is why the type is `Clone`. Route synthesis recovers per-segment
//! failures itself and only surfaces whole-operation errors.

use thiserror::Error;

/// Unified error type for trek-route operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrekRouteError {
    /// A single fetch or directions call failed (timeout, 5xx, connectivity).
    #[error("{}", fmt_network(.message, .status_code))]
    Network {
        message: String,
        status_code: Option<u16>,
    },

    /// The directions provider found no route for the requested travel mode.
    #[error("No {mode} route found (status {status})")]
    NoRouteFound { mode: String, status: String },

    /// A provider call did not answer within its timeout.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Missing or unusable provider credentials / settings.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The waypoint list cannot be routed at all.
    #[error("Invalid waypoints: {message}")]
    InvalidWaypoints { message: String },

    /// An invalidation pattern is not a valid regular expression.
    #[error("Invalid cache pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A payload could not be decoded into the expected shape.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// A route could not be serialized for export.
    #[error("Export failed: {message}")]
    Export { message: String },

    /// The caller abandoned the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn fmt_network(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("HTTP error ({}): {}", code, message),
        None => format!("HTTP error: {}", message),
    }
}

impl TrekRouteError {
    /// Build a network error without an HTTP status.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status_code: None,
        }
    }

    /// Build a network error carrying the HTTP status code.
    pub fn http_status(status_code: u16, message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for failures worth retrying against the same upstream.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { status_code, .. } => match status_code {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TrekRouteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

/// Result type alias for trek-route operations.
pub type Result<T> = std::result::Result<T, TrekRouteError>;

/// Extension trait for converting Option to TrekRouteError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an invalid-waypoints error.
    fn ok_or_invalid_waypoints(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_invalid_waypoints(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrekRouteError::InvalidWaypoints {
            message: message.to_string(),
        })
    }
}

//! # Error Handling Module
//!
//! Error handling for the KSeF proxy. Every error response leaving the server
//! is JSON with at least an `error` message field; upstream KSeF error bodies
//! are preserved verbatim and nested under a `details` field so callers can
//! inspect the official exception envelope.
//!
//! ## Taxonomy
//!
//! - **Validation**: malformed/missing required input, surfaced immediately,
//!   never retried, HTTP 400-class
//! - **Upstream**: the real KSeF service returned a non-2xx status or the
//!   transport failed/timed out, surfaced with the upstream status preserved
//! - **Crypto**: public-key parsing or RSA encryption failure during the
//!   token-based session flow, aborting the whole multi-step operation
//! - **Config / Server / Internal**: startup and runtime faults of the proxy
//!   itself

use thiserror::Error;

/// Result type alias for the KSeF proxy library
///
/// This provides a convenient shorthand for `Result<T, KsefProxyError>`
/// used throughout the codebase for consistent error handling.
pub type Result<T> = std::result::Result<T, KsefProxyError>;

/// Comprehensive error types for the KSeF proxy server
///
/// Each variant maps to one class of user-visible failure. Internal messages
/// are kept for logging; the client-facing message and status code are
/// derived per variant.
#[derive(Error, Debug)]
pub enum KsefProxyError {
    /// Malformed or missing required input
    ///
    /// Covers missing context-identifier fields, a missing session token,
    /// an invalid content kind, and invalid base64/gzip payloads. Always
    /// surfaced to the caller immediately and never retried.
    #[error("Invalid request: {message}")]
    ValidationError {
        /// What was wrong with the input
        message: String,
    },

    /// The real KSeF service failed
    ///
    /// Either a non-2xx upstream response or a transport failure/timeout.
    /// The upstream status code and body are preserved so the caller sees
    /// the official exception envelope under `details`.
    #[error("Upstream KSeF error (status {status}): {body}")]
    UpstreamError {
        /// HTTP status returned by the upstream service (502 for transport
        /// failures that produced no status)
        status: u16,
        /// Upstream response body, verbatim
        body: String,
    },

    /// Public-key fetch or RSA encryption failed during token-based init
    ///
    /// The whole multi-step operation aborts on the first crypto failure;
    /// no partial session is considered valid.
    #[error("Crypto operation failed: {message}")]
    CryptoError {
        /// Internal error message for logging
        message: String,
        /// Optional source error for error chain analysis
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Server configuration is invalid
    ///
    /// Covers bind-address parsing, invalid resource limits, and environment
    /// variable parsing errors. These should only occur at startup.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Internal error message for logging
        message: String,
        /// Optional source error for error chain analysis
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// HTTP server operation failed
    ///
    /// Covers server startup failures, connection handling errors and
    /// response generation errors. These should be rare in production.
    #[error("Server error: {message}")]
    ServerError {
        /// Internal error message for logging
        message: String,
        /// Optional source error for error chain analysis
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unexpected internal system error
    #[error("Internal error: {message}")]
    InternalError {
        /// Internal error message for logging
        message: String,
        /// Optional source error for error chain analysis
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl KsefProxyError {
    /// Create a new validation error with message
    #[inline]
    pub fn validation<T>(message: T) -> Self
    where
        T: Into<String>,
    {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Create a new upstream error from a status code and response body
    #[inline]
    pub fn upstream<T>(status: u16, body: T) -> Self
    where
        T: Into<String>,
    {
        Self::UpstreamError {
            status,
            body: body.into(),
        }
    }

    /// Create a new crypto error with message and optional source
    #[inline]
    pub fn crypto<T>(message: T, source: Option<Box<dyn std::error::Error + Send + Sync>>) -> Self
    where
        T: Into<String>,
    {
        Self::CryptoError {
            message: message.into(),
            source,
        }
    }

    /// Create a new configuration error with message and optional source
    #[inline]
    pub fn config_error<T>(
        message: T,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self
    where
        T: Into<String>,
    {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new server error with message and optional source
    #[inline]
    pub fn server_error<T>(
        message: T,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self
    where
        T: Into<String>,
    {
        Self::ServerError {
            message: message.into(),
            source,
        }
    }

    /// Create a new internal error with message and optional source
    #[inline]
    pub fn internal_error<T>(
        message: T,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self
    where
        T: Into<String>,
    {
        Self::InternalError {
            message: message.into(),
            source,
        }
    }

    /// Get the HTTP status code for this error
    ///
    /// Upstream failures pass the original status through where one exists;
    /// transport failures map to 502. Validation errors are 400-class and
    /// everything internal is 500-class.
    #[inline]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationError { .. } => 400,
            Self::UpstreamError { status, .. } => {
                if (400..=599).contains(status) {
                    *status
                } else {
                    502
                }
            }
            Self::CryptoError { .. } => 502,
            Self::ConfigError { .. } | Self::ServerError { .. } | Self::InternalError { .. } => 500,
        }
    }

    /// Get the error message for client responses
    ///
    /// Validation messages describe the rejected input and are safe to show.
    /// Everything else is generic; the upstream body travels separately in
    /// the `details` field, and internal messages stay in the logs.
    #[inline]
    pub fn client_message(&self) -> &str {
        match self {
            Self::ValidationError { message } => message,
            Self::UpstreamError { .. } => "Upstream KSeF request failed",
            Self::CryptoError { .. } => "Session token encryption failed",
            Self::ConfigError { .. } => "Service unavailable",
            Self::ServerError { .. } | Self::InternalError { .. } => "Internal server error",
        }
    }

    /// Get the internal error message for logging
    ///
    /// May contain sensitive detail; never send to clients.
    #[inline]
    pub fn internal_message(&self) -> &str {
        match self {
            Self::ValidationError { message } => message,
            Self::UpstreamError { body, .. } => body,
            Self::CryptoError { message, .. } => message,
            Self::ConfigError { message, .. } => message,
            Self::ServerError { message, .. } => message,
            Self::InternalError { message, .. } => message,
        }
    }

    /// The verbatim upstream body, when this error carries one
    ///
    /// Nested under `details` in JSON error responses.
    #[inline]
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::UpstreamError { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Check if this error should be logged at ERROR level
    ///
    /// Invalid requests and upstream rejections are expected operational
    /// noise and log at WARN; the rest indicate faults in the proxy itself.
    #[inline]
    pub fn is_critical(&self) -> bool {
        match self {
            Self::ValidationError { .. } | Self::UpstreamError { .. } => false,
            Self::CryptoError { .. }
            | Self::ConfigError { .. }
            | Self::ServerError { .. }
            | Self::InternalError { .. } => true,
        }
    }
}

// Implement common conversions for convenience
impl From<std::io::Error> for KsefProxyError {
    #[inline]
    fn from(err: std::io::Error) -> Self {
        Self::server_error(format!("I/O error: {err}"), Some(Box::new(err)))
    }
}

impl From<serde_json::Error> for KsefProxyError {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("JSON parsing error: {err}"))
    }
}

impl From<hyper::Error> for KsefProxyError {
    #[inline]
    fn from(err: hyper::Error) -> Self {
        Self::server_error(format!("Hyper error: {err}"), Some(Box::new(err)))
    }
}

impl From<reqwest::Error> for KsefProxyError {
    // Timeouts and connection failures are treated identically to non-2xx
    // responses: wrapped and surfaced, never retried.
    #[inline]
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map_or(502, |s| s.as_u16());
        Self::upstream(status, format!("transport error: {err}"))
    }
}

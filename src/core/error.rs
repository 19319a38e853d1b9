//! # Error Handling Module
//!
//! This module provides error handling for the proxy using the `thiserror`
//! crate. It defines all error kinds that can occur while serving a request
//! and maps each kind to the single HTTP status and response body it
//! surfaces as. Nothing about internal stack traces or upstream host
//! identities is ever leaked downstream.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main result type used throughout the proxy
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Error kinds for the proxy pipeline
///
/// Each variant represents a different category of failure. The
/// `#[error("...")]` attribute from `thiserror` automatically implements
/// the `Display` trait with the specified message; the message is for logs,
/// while [`ProxyError::response_body`] is what the client sees.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The request carried no usable `Host` header
    #[error("missing Host header")]
    MissingHost,

    /// The request body exceeded the configured cap
    #[error("request body larger than {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// No service is registered for the requested host
    #[error("no service found for domain: {domain}")]
    UnknownHost { domain: String },

    /// The resolved service currently has no healthy hosts
    #[error("no healthy hosts available for service: {service}")]
    NoHealthyHosts { service: String },

    /// The load balancer returned no host despite a non-empty pool
    #[error("load balancer returned no host for service: {service}")]
    SelectionFailed { service: String },

    /// TCP/DNS/timeout failure while talking to the selected upstream host
    #[error("upstream transport error: {detail}")]
    UpstreamTransport { detail: String },

    /// The upstream produced a response the proxy could not interpret
    #[error("upstream protocol error: {detail}")]
    UpstreamProtocol { detail: String },

    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors for unexpected failures
    #[error("internal error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, socket binding, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors for configuration files
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors for configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ProxyError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The single HTTP status this error kind surfaces as
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingHost => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnknownHost { .. } => StatusCode::NOT_FOUND,
            Self::NoHealthyHosts { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::SelectionFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTransport { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamProtocol { .. } => StatusCode::BAD_GATEWAY,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The fixed, short body returned to the client for this kind
    ///
    /// A 404 carries an empty body; everything else gets a short plain-text
    /// sentence. Host addresses and error details stay in the logs.
    pub fn response_body(&self) -> &'static str {
        match self {
            Self::MissingHost => "Missing Host header",
            Self::BodyTooLarge { .. } => "Request body too large. Max size: 10MB",
            Self::UnknownHost { .. } => "",
            Self::NoHealthyHosts { .. } => "Service Unavailable: No healthy hosts",
            Self::SelectionFailed { .. } => "Service Unavailable",
            Self::UpstreamTransport { .. } | Self::UpstreamProtocol { .. } => {
                "Bad Gateway: Downstream service error"
            }
            _ => "Internal server error",
        }
    }

    /// Whether this failure should flip the selected host to unhealthy
    pub fn marks_host_unhealthy(&self) -> bool {
        matches!(self, Self::UpstreamTransport { .. })
    }
}

/// Convert errors into plain-text HTTP responses
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status_code(), self.response_body()).into_response()
    }
}

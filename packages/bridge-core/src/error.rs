//! Centralized error types for the UPnP bridge core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::api::ConnectionId;
use crate::ssdp::DiscoveryError;
use crate::state::ConfigError;

/// A write to a client transport failed; the connection is torn down.
#[derive(Debug, Error)]
#[error("failed to write to {connection_id}: {source}")]
pub struct TransportWriteError {
    pub connection_id: ConnectionId,
    #[source]
    pub source: axum::Error,
}

/// A connection's outbound queue overflowed under the disconnect policy.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("outbound queue for {connection_id} overflowed (capacity {capacity})")]
pub struct OverflowError {
    pub connection_id: ConnectionId,
    pub capacity: usize,
}

/// Application-wide error type for the bridge.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum BridgeError {
    /// Device discovery failed (SSDP/network issues).
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Requested device is not in the registry.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Server configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BridgeError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery_failed",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Discovery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DiscoveryError> for BridgeError {
    fn from(err: DiscoveryError) -> Self {
        Self::Discovery(err.to_string())
    }
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

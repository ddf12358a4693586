// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Synchronous error types and their HTTP rendering.
//!
//! Only request validation fails synchronously. Everything that goes wrong
//! inside a job is recorded in the progress store instead and never shows up
//! here.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

/// Rejection of a dispatch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The URL was missing or blank.
    MissingUrl,
    /// The URL did not parse as an absolute URL with scheme and host.
    InvalidUrl(String),
}

impl DispatchError {
    /// Message shown to API clients.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingUrl => "URL is required",
            Self::InvalidUrl(_) => "Invalid URL format",
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingUrl => write!(f, "URL is required"),
            Self::InvalidUrl(reason) => write!(f, "Invalid URL format: {}", reason),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Error returned by HTTP handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Client sent something unusable (400).
    InvalidRequest(String),
    /// Unexpected failure (500). The message is generic; details are logged.
    Internal(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ApiError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!(error = %message, "Rejected request");
        Self::InvalidRequest(message)
    }

    /// Log `internal` and return an error that does not expose it.
    pub fn internal(internal: &str) -> Self {
        tracing::error!(internal_error = %internal, "Request failed");
        Self::Internal("An unexpected error occurred".to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidRequest(message) | Self::Internal(message) => message,
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        tracing::warn!(error = %e, "Rejected download request");
        Self::InvalidRequest(e.user_message().to_string())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorBody { error: self.message() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_messages() {
        assert_eq!(DispatchError::MissingUrl.user_message(), "URL is required");
        let invalid = DispatchError::InvalidUrl("relative URL without a base".to_string());
        assert_eq!(invalid.user_message(), "Invalid URL format");
        assert!(invalid.to_string().contains("relative URL"));
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(ApiError::from(DispatchError::MissingUrl).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::internal("disk on fire").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_error_hides_details() {
        let err = ApiError::internal("/home/user/secret path");
        assert!(!err.message().contains("secret"));
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::invalid_request("bad").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stable error codes and the outbound error envelope.
//!
//! Every public operation in the engine returns `Result<_, AttnError>`. The
//! Scan Pipeline (and the HTTP transport above it) is the one place that
//! turns a domain failure into the outbound envelope.

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Broad category used to pick a log level and to group errors for clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Authentication,
    Validation,
    AntiCheat,
    Resource,
    BusinessLogic,
    Internal,
}

/// Stable, machine-readable error codes for the attendance engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttnError {
    Unauthorized,
    Forbidden,
    InvalidRequest,
    ExpiredToken,
    TokenAlreadyUsed,
    RateLimited,
    GeofenceViolation,
    WifiViolation,
    NotFound,
    Conflict,
    StorageError,
    IneligibleStudent,
    InsufficientStudents,
    SessionEnded,
    Internal,
}

impl AttnError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthorized | Self::Forbidden => ErrorCategory::Authentication,
            Self::InvalidRequest => ErrorCategory::Validation,
            Self::RateLimited | Self::GeofenceViolation | Self::WifiViolation => {
                ErrorCategory::AntiCheat
            }
            Self::NotFound => ErrorCategory::Resource,
            Self::ExpiredToken
            | Self::TokenAlreadyUsed
            | Self::Conflict
            | Self::IneligibleStudent
            | Self::InsufficientStudents
            | Self::SessionEnded => ErrorCategory::BusinessLogic,
            Self::StorageError | Self::Internal => ErrorCategory::Internal,
        }
    }

    /// True for errors expected in the course of normal traffic — these are
    /// logged at `warn`, never `error`, and never leak internal detail.
    pub fn is_operational(&self) -> bool {
        !matches!(self.category(), ErrorCategory::Internal)
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::InvalidRequest => 400,
            Self::ExpiredToken => 410,
            Self::TokenAlreadyUsed => 409,
            Self::RateLimited => 429,
            Self::GeofenceViolation | Self::WifiViolation => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::IneligibleStudent | Self::InsufficientStudents => 422,
            Self::SessionEnded => 409,
            Self::StorageError | Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ExpiredToken => "EXPIRED_TOKEN",
            Self::TokenAlreadyUsed => "TOKEN_ALREADY_USED",
            Self::RateLimited => "RATE_LIMITED",
            Self::GeofenceViolation => "GEOFENCE_VIOLATION",
            Self::WifiViolation => "WIFI_VIOLATION",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::StorageError => "STORAGE_ERROR",
            Self::IneligibleStudent => "INELIGIBLE_STUDENT",
            Self::InsufficientStudents => "INSUFFICIENT_STUDENTS",
            Self::SessionEnded => "SESSION_ENDED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }

    /// Log this error at the level its category implies.
    pub fn log(&self, context: &str) {
        if self.is_operational() {
            tracing::warn!(code = self.as_str(), context, "operational error");
        } else {
            tracing::error!(code = self.as_str(), context, "internal error");
        }
    }
}

impl fmt::Display for AttnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for AttnError {}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

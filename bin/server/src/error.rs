//! HTTP error mapping.
//!
//! Domain errors from the workflow crate arrive as rootcause reports. Each is
//! mapped to a status code and a user-safe message; storage failures are
//! logged in full and answered with a generic 500.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use conduit_workflow::{EngineError, InferenceError, ValidationResult, WorkflowError};
use rootcause::Report;
use serde_json::json;
use std::fmt;

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// No usable caller identity.
    Unauthorized,
    /// Missing, or owned by someone else.
    NotFound { message: String },
    /// The request itself is malformed.
    BadRequest { message: String },
    /// The target is in a state that forbids the operation.
    Conflict { message: String },
    /// A graph failed validation.
    InvalidGraph { result: ValidationResult },
    /// Anything the caller cannot fix.
    Internal,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "missing or invalid caller identity"),
            Self::NotFound { message }
            | Self::BadRequest { message }
            | Self::Conflict { message } => write!(f, "{message}"),
            Self::InvalidGraph { result } => write!(f, "workflow graph is invalid: {result}"),
            Self::Internal => write!(f, "internal server error"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::InvalidGraph { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    fn not_found(message: impl fmt::Display) -> Self {
        Self::NotFound {
            message: message.to_string(),
        }
    }

    fn internal(report: &impl fmt::Display) -> Self {
        tracing::error!(error = %report, "Request failed");
        Self::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::InvalidGraph { result } => json!({
                "error": "workflow graph is invalid",
                "code": status.as_u16(),
                "validation": result,
            }),
            other => json!({
                "error": other.to_string(),
                "code": status.as_u16(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<Report<WorkflowError>> for ApiError {
    fn from(report: Report<WorkflowError>) -> Self {
        match report.current_context() {
            e @ WorkflowError::NotFound { .. } => Self::not_found(e),
            e @ WorkflowError::InvalidName => Self::bad_request(e.to_string()),
            WorkflowError::Store { .. } => Self::internal(&report),
        }
    }
}

impl From<Report<EngineError>> for ApiError {
    fn from(report: Report<EngineError>) -> Self {
        match report.current_context() {
            e @ (EngineError::WorkflowNotFound { .. } | EngineError::ExecutionNotFound { .. }) => {
                Self::not_found(e)
            }
            e @ (EngineError::WorkflowInactive { .. } | EngineError::ExecutionFinished { .. }) => {
                Self::Conflict {
                    message: e.to_string(),
                }
            }
            EngineError::InvalidGraph { result } => Self::InvalidGraph {
                result: result.clone(),
            },
            e @ EngineError::Graph(_) => Self::Conflict {
                message: e.to_string(),
            },
            EngineError::Store { .. } => Self::internal(&report),
        }
    }
}

impl From<Report<InferenceError>> for ApiError {
    fn from(report: Report<InferenceError>) -> Self {
        match report.current_context() {
            e @ (InferenceError::WorkflowNotFound { .. } | InferenceError::NodeNotFound { .. }) => {
                Self::not_found(e)
            }
            e @ (InferenceError::ConnectorNotFound { .. }
            | InferenceError::CycleDetected { .. }
            | InferenceError::Connector { .. }) => Self::Conflict {
                message: e.to_string(),
            },
            e @ InferenceError::Sample { .. } => Self::bad_request(e.to_string()),
            InferenceError::Store { .. } => Self::internal(&report),
        }
    }
}

/// Errors that stop the server from starting or serving.
#[derive(Debug)]
pub enum StartupError {
    Config { details: String },
    Database { details: String },
    Migration { details: String },
    Bind { addr: String, details: String },
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "failed to load configuration: {details}"),
            Self::Database { details } => write!(f, "failed to connect to database: {details}"),
            Self::Migration { details } => write!(f, "failed to run migrations: {details}"),
            Self::Bind { addr, details } => write!(f, "failed to bind to {addr}: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

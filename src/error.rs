use std::any::Any;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use opentelemetry::trace::TraceContextExt;
use serde_json::json;
use thiserror::Error;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("API Error {status_code}: {message}")]
    Upstream {
        status_code: u16,
        message: String,
        details: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl AppError {
    pub fn upstream(status_code: u16, message: impl Into<String>, details: impl Into<String>) -> Self {
        AppError::Upstream {
            status_code,
            message: message.into(),
            details: details.into(),
        }
    }

    /// True for upstream responses that mean the requested record does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::Upstream {
                status_code,
                message,
                ..
            } => *status_code == 404 || message.to_lowercase().contains("not found"),
            _ => false,
        }
    }

    /// Short label used for span and metric attributes.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "configuration",
            AppError::Authentication(_) => "authentication",
            AppError::Upstream { .. } => "upstream",
            AppError::Transport(_) => "transport",
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::Artifact(_) => "artifact",
            AppError::Cancelled(_) => "cancelled",
        }
    }

    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Upstream { message, .. } if self.is_not_found() => {
                (StatusCode::NOT_FOUND, message.clone())
            }
            AppError::Cancelled(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Request cancelled".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }
}

pub(crate) fn get_trace_id() -> Option<String> {
    let span = Span::current();
    let context = span.context();
    let span_ref = context.span();
    let span_context = span_ref.span_context();

    if span_context.is_valid() {
        Some(span_context.trace_id().to_string())
    } else {
        None
    }
}

/// Error with the caller-facing summary used in the response envelope.
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub source: AppError,
}

impl ApiError {
    pub fn new(message: impl Into<String>, source: AppError) -> Self {
        Self {
            message: message.into(),
            source,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = self.source.status_and_message();

        if status.is_server_error() {
            tracing::error!(
                error = %self.source,
                error.type = self.source.kind(),
                "{}",
                self.message
            );
        } else {
            tracing::warn!(
                error = %self.source,
                error.type = self.source.kind(),
                "{}",
                self.message
            );
        }

        error_envelope(status, &self.message, &error_message)
    }
}

fn error_envelope(status: StatusCode, message: &str, error: &str) -> Response {
    let mut body = json!({
        "success": false,
        "message": message,
        "error": error,
        "status": status.as_u16(),
        "timestamp": chrono::Utc::now(),
    });
    if let Some(trace_id) = get_trace_id() {
        body["trace_id"] = json!(trace_id);
    }

    (status, Json(body)).into_response()
}

/// Turns a handler panic into the standard 500 envelope. The panic payload is
/// only logged.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };

    tracing::error!(panic = %detail, "Handler panicked");

    error_envelope(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        "Internal server error",
    )
}

pub mod entities;
pub mod health;
pub mod reports;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Success envelope shared by the data-returning endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

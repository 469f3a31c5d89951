pub mod client;
pub mod cookies;
pub mod credentials;

use std::collections::BTreeMap;

pub use client::AuthenticatingClient;
pub use credentials::{CredentialStore, TokenSet};

use crate::error::AppError;
use crate::models::{Student, StudentSummary};

/// Read access to the upstream student backend.
#[async_trait::async_trait]
pub trait EntitySource: Send + Sync {
    async fn fetch_entity(&self, id: i64) -> Result<Student, AppError>;

    async fn list_entities(
        &self,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<StudentSummary>, AppError>;

    /// Unauthenticated reachability check. Only server errors count as unhealthy.
    async fn health_probe(&self) -> Result<(), AppError>;

    async fn close(&self) -> Result<(), AppError>;
}

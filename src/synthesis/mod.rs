pub mod document;

use std::path::PathBuf;

pub use document::FileSynthesizer;

use crate::error::AppError;
use crate::models::{ReportMetadata, Student};

/// Produces persisted report artifacts and sweeps old ones.
#[async_trait::async_trait]
pub trait DocumentSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        student: &Student,
        metadata: &ReportMetadata,
    ) -> Result<PathBuf, AppError>;

    /// Removes artifacts past their retention age and returns how many went.
    async fn cleanup(&self) -> Result<usize, AppError>;

    fn is_ready(&self) -> bool {
        true
    }
}

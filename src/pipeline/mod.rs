pub mod orchestrator;

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

pub use orchestrator::{ReportOrchestrator, ReportStage};

/// Runs `fut` until it finishes, `cancel` fires, or `deadline` elapses.
///
/// The last two surface as [`AppError::Cancelled`], which callers can tell
/// apart from transport timeouts and upstream failures. Dropping `fut`
/// aborts any outbound call it was awaiting.
pub async fn within<T, F>(
    cancel: &CancellationToken,
    deadline: Option<Duration>,
    fut: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    let expiry = async {
        match deadline {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled("request cancelled".to_string())),
        _ = expiry => Err(AppError::Cancelled(format!(
            "deadline of {}ms exceeded",
            deadline.unwrap_or_default().as_millis()
        ))),
        result = fut => result,
    }
}

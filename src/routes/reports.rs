use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{ApiError, AppError};
use crate::models::ReportResult;
use crate::pipeline::within;
use crate::routes::ApiResponse;

#[derive(Debug, Default, Deserialize)]
pub struct CreateReportQuery {
    pub generated_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CleanupSummary {
    pub removed: usize,
}

pub async fn create_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<CreateReportQuery>,
) -> Result<(StatusCode, Json<ApiResponse<ReportResult>>), ApiError> {
    let student_id = match id.trim().parse::<i64>() {
        Ok(value) if value > 0 => value,
        _ => {
            return Err(ApiError::new(
                "Invalid student ID format",
                AppError::InvalidArgument(format!("invalid student ID: {id}")),
            ));
        }
    };

    let generated_by = params.generated_by.unwrap_or_default();
    let report = within(
        &state.shutdown,
        Some(state.config.server.write_timeout),
        state.orchestrator.create_report(student_id, &generated_by),
    )
    .await
    .map_err(|e| ApiError::new("Failed to generate report", e))?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("Report generated successfully", report)),
    ))
}

pub async fn cleanup_reports(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<CleanupSummary>>, ApiError> {
    let removed = state
        .orchestrator
        .cleanup_artifacts()
        .await
        .map_err(|e| ApiError::new("Failed to cleanup reports", e))?;

    tracing::info!(removed, "Manual report cleanup finished");

    Ok(Json(ApiResponse::ok(
        "Old reports cleaned up successfully",
        CleanupSummary { removed },
    )))
}

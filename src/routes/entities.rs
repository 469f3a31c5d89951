use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;
use crate::models::StudentSummary;
use crate::pipeline::within;
use crate::routes::ApiResponse;

#[derive(Debug, Default, Deserialize)]
pub struct EntityFilters {
    pub name: Option<String>,
    #[serde(alias = "className")]
    pub class: Option<String>,
    pub section: Option<String>,
    pub roll: Option<String>,
}

impl EntityFilters {
    pub fn into_map(self) -> BTreeMap<String, String> {
        [
            ("name", self.name),
            ("className", self.class),
            ("section", self.section),
            ("roll", self.roll),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect()
    }
}

pub async fn list_entities(
    State(state): State<AppState>,
    Query(filters): Query<EntityFilters>,
) -> Result<Json<ApiResponse<Vec<StudentSummary>>>, ApiError> {
    let filters = filters.into_map();
    let students = within(
        &state.shutdown,
        Some(state.config.server.write_timeout),
        state.orchestrator.list_entities(&filters),
    )
    .await
    .map_err(|e| ApiError::new("Failed to fetch students", e))?;

    tracing::debug!(count = students.len(), "Students retrieved");

    Ok(Json(ApiResponse::ok(
        "Students retrieved successfully",
        students,
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;

    use super::*;
    use crate::error::AppError;
    use crate::routes::testing::{StubSource, StubSynthesizer, router_with, send};

    #[test]
    fn test_filters_into_map_keeps_present_values() {
        let filters: EntityFilters =
            serde_json::from_str(r#"{"name": "John", "className": "Grade 10"}"#).unwrap();
        let map = filters.into_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["name"], "John");
        assert_eq!(map["className"], "Grade 10");
        assert!(!map.contains_key("class"));
    }

    #[tokio::test]
    async fn test_list_entities_ok() {
        let source = Arc::new(StubSource::default());
        let (router, _) = router_with(source.clone(), StubSynthesizer::default());
        let (status, body) = send(router, "GET", "/entities?class=Grade%2010&name=").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Students retrieved successfully");
        assert_eq!(body["data"][0]["id"], 42);
        assert!(body["timestamp"].is_string());

        let seen = source.filters_seen.lock().unwrap();
        assert_eq!(seen[0].len(), 1);
        assert_eq!(seen[0]["className"], "Grade 10");
    }

    #[tokio::test]
    async fn test_list_entities_not_found() {
        let source = StubSource {
            list_error: Some(AppError::upstream(404, "No students found", "")),
            ..Default::default()
        };
        let (router, _) = router_with(Arc::new(source), StubSynthesizer::default());
        let (status, body) = send(router, "GET", "/entities?name=Nobody").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Failed to fetch students");
        assert_eq!(body["error"], "No students found");
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn test_list_entities_hides_internal_errors() {
        let source = StubSource {
            list_error: Some(AppError::Authentication("token=abc123 rejected".into())),
            ..Default::default()
        };
        let (router, _) = router_with(Arc::new(source), StubSynthesizer::default());
        let (status, body) = send(router, "GET", "/entities").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(!body.to_string().contains("abc123"));
    }
}

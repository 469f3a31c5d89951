use axum::{Json, extract::State, http::StatusCode};

use crate::AppState;
use crate::models::HealthStatus;

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.orchestrator.health_check().await;

    let code = if status.healthy {
        StatusCode::OK
    } else {
        tracing::warn!(message = %status.message, "Health check reported unhealthy components");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(status))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;

    use crate::error::AppError;
    use crate::routes::testing::{StubSource, StubSynthesizer, router_with, send};

    #[tokio::test]
    async fn test_health_ok() {
        let (router, _) = router_with(Arc::new(StubSource::default()), StubSynthesizer::default());
        let (status, body) = send(router, "GET", "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);
        assert_eq!(body["service"], "Report Service");
        assert_eq!(body["components"]["upstream_api"]["status"], "healthy");
        assert_eq!(body["components"]["document_synthesizer"]["status"], "healthy");
    }

    #[tokio::test]
    async fn test_health_unavailable_when_upstream_fails() {
        let source = StubSource {
            probe_error: Some(AppError::Transport("connection refused".into())),
            ..Default::default()
        };
        let (router, _) = router_with(Arc::new(source), StubSynthesizer::default());
        let (status, body) = send(router, "GET", "/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["healthy"], false);
        assert_eq!(body["components"]["upstream_api"]["status"], "unhealthy");
        assert_eq!(body["components"]["document_synthesizer"]["status"], "healthy");
    }
}

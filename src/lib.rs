pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod synthesis;
pub mod telemetry;
pub mod upstream;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{Request, Response, StatusCode};
use axum::routing::{get, post};
use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{MakeSpan, OnResponse, TraceLayer},
};
use tracing::Span;

use config::Config;
use pipeline::ReportOrchestrator;
use telemetry::{HTTP_REQUEST_DURATION, HTTP_REQUESTS_TOTAL};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ReportOrchestrator>,
    pub config: Config,
    /// Fires on shutdown so in-flight handlers stop waiting on the upstream.
    pub shutdown: CancellationToken,
}

#[derive(Clone)]
struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let method = request.method().as_str();
        let path = request.uri().path();

        tracing::info_span!(
            "HTTP request",
            otel.name = %format!("{} {}", method, path),
            http.method = %method,
            http.route = %path,
            http.target = %request.uri(),
            http.scheme = "http",
            http.flavor = ?request.version(),
            http.user_agent = request.headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or(""),
            http.request_id = request.headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or(""),
            http.response.status_code = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        )
    }
}

#[derive(Clone)]
struct HttpOnResponse;

impl<B> OnResponse<B> for HttpOnResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        let status = response.status().as_u16();

        span.record("http.response.status_code", status as i64);

        if status >= 500 {
            span.record("otel.status_code", "ERROR");
        } else {
            span.record("otel.status_code", "OK");
        }

        let latency_ms = latency.as_secs_f64() * 1000.0;
        let attributes = [
            KeyValue::new("http.status_code", status.to_string()),
            KeyValue::new("http.status_class", format!("{}xx", status / 100)),
        ];

        HTTP_REQUESTS_TOTAL.add(1, &attributes);
        HTTP_REQUEST_DURATION.record(latency_ms, &attributes);

        tracing::info!(
            http.response.status_code = status,
            latency_ms = latency_ms,
            "finished processing request"
        );
    }
}

pub fn build_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/health", get(routes::health::health))
        .route("/entities", get(routes::entities::list_entities))
        .route("/reports/entity/{id}", post(routes::reports::create_report))
        .route("/reports/cleanup", post(routes::reports::cleanup_reports));

    with_middleware(routes, &state.config).with_state(state)
}

fn with_middleware(routes: Router<AppState>, config: &Config) -> Router<AppState> {
    // Outer backstop; handlers apply the tighter write deadline themselves.
    let request_budget = config.server.read_timeout + config.server.write_timeout;

    routes
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(HttpMakeSpan)
                .on_response(HttpOnResponse),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_budget,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::{AppState, with_middleware};
    use crate::pipeline::ReportOrchestrator;
    use crate::routes::testing::{StubSource, StubSynthesizer, router_with, send, test_config};

    async fn explode() -> StatusCode {
        panic!("renderer blew up: token=abc123");
    }

    #[tokio::test]
    async fn test_request_id_is_set_and_propagated() {
        let (router, _) = router_with(Arc::new(StubSource::default()), StubSynthesizer::default());
        let response = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));

        let response = router
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "abc-123");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (router, _) = router_with(Arc::new(StubSource::default()), StubSynthesizer::default());
        let response = router
            .oneshot(Request::get("/reports").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_error_envelope() {
        let state = AppState {
            orchestrator: Arc::new(ReportOrchestrator::new(
                Arc::new(StubSource::default()),
                Arc::new(StubSynthesizer::default()),
            )),
            config: test_config(),
            shutdown: CancellationToken::new(),
        };
        let router = with_middleware(Router::new().route("/explode", get(explode)), &state.config)
            .with_state(state);

        let (status, body) = send(router.clone(), "GET", "/explode").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["status"], 500);
        assert!(!body.to_string().contains("abc123"));

        // the router keeps serving after a panic
        let (status, _) = send(router, "GET", "/explode").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}

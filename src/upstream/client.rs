use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::EntitySource;
use super::cookies::extract_cookies;
use super::credentials::{CredentialStore, Credentials, TokenSet};
use crate::config::UpstreamConfig;
use crate::error::AppError;
use crate::models::{Envelope, Student, StudentSummary, UpstreamErrorBody};
use crate::telemetry::metrics::{
    UPSTREAM_LOGIN_COUNT, UPSTREAM_REAUTH_COUNT, UPSTREAM_REQUEST_DURATION, UPSTREAM_RETRY_COUNT,
};

pub const CSRF_HEADER: &str = "X-CSRF-TOKEN";
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport-level retry budget, independent of the expired-session retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.delay.saturating_mul(2u32.saturating_pow(attempt));
        let base = base.min(self.delay.saturating_mul(5));
        let jitter_ms = fastrand::u64(0..=base.as_millis() as u64 / 4);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Fully read upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

pub struct AuthenticatingClient {
    http: reqwest::Client,
    probe: reqwest::Client,
    base_url: String,
    entity_path: String,
    credentials: Credentials,
    retry: RetryPolicy,
    store: CredentialStore,
    shutdown: CancellationToken,
}

impl AuthenticatingClient {
    pub fn new(config: &UpstreamConfig, shutdown: CancellationToken) -> Result<Self, AppError> {
        if config.service_username.is_empty() || config.service_password.is_empty() {
            return Err(AppError::Configuration(
                "upstream service credentials are not configured".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let probe = reqwest::Client::builder()
            .timeout(HEALTH_PROBE_TIMEOUT)
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build probe client: {e}")))?;

        tracing::debug!(
            base_url = %config.base_url,
            username = %config.service_username,
            retry_attempts = config.retry_attempts,
            "Upstream client initialized"
        );

        Ok(Self {
            http,
            probe,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            entity_path: config.entity_path.clone(),
            credentials: Credentials {
                identity: config.service_username.clone(),
                secret: config.service_password.clone(),
            },
            retry: RetryPolicy {
                attempts: config.retry_attempts,
                delay: config.retry_delay,
            },
            store: CredentialStore::new(),
            shutdown,
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn ensure_authenticated(&self) -> Result<TokenSet, AppError> {
        self.store.ensure(|| self.login()).await
    }

    /// Posts the service credentials and pulls the token set out of the
    /// `Set-Cookie` headers. Does not touch the store.
    #[tracing::instrument(
        name = "upstream login",
        skip(self),
        fields(user = %self.credentials.identity, http.response.status_code)
    )]
    pub async fn login(&self) -> Result<TokenSet, AppError> {
        let url = self.url("/auth/login");
        let body = LoginRequest {
            username: &self.credentials.identity,
            password: &self.credentials.secret,
        };

        let response = self
            .execute(|| self.http.post(&url).json(&body))
            .await
            .inspect_err(|_| record_login("transport_error"))?;

        tracing::Span::current().record("http.response.status_code", response.status.as_u16());

        if !response.status.is_success() {
            record_login("rejected");
            let message = serde_json::from_str::<UpstreamErrorBody>(&response.body)
                .ok()
                .map(|b| b.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| response.status.to_string());
            return Err(AppError::Authentication(format!(
                "login rejected with status {}: {}",
                response.status.as_u16(),
                message
            )));
        }

        let cookies = extract_cookies(&response.headers);
        let tokens = TokenSet::from_cookies(&cookies).inspect_err(|_| record_login("missing_tokens"))?;

        record_login("success");
        tracing::debug!(
            access_token_length = tokens.session_token.len(),
            refresh_token_length = tokens.renewal_token.len(),
            "Authenticated with upstream"
        );

        Ok(tokens)
    }

    /// Sends an authenticated request. A 401 triggers one re-login and one
    /// retry; a second 401 is returned as an authentication failure.
    pub async fn request_with_auth(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
    ) -> Result<UpstreamResponse, AppError> {
        let tokens = self.ensure_authenticated().await?;
        let first = self.send_authenticated(&method, path, query, &tokens).await?;
        if first.status != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        tracing::debug!(path, "Received 401, re-authenticating");
        UPSTREAM_REAUTH_COUNT.add(1, &[]);

        let fresh = self.store.renew(&tokens, || self.login()).await?;
        let second = self.send_authenticated(&method, path, query, &fresh).await?;
        if second.status == StatusCode::UNAUTHORIZED {
            return Err(AppError::Authentication(format!(
                "upstream rejected the session again after re-authentication ({path})"
            )));
        }

        Ok(second)
    }

    async fn send_authenticated(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        tokens: &TokenSet,
    ) -> Result<UpstreamResponse, AppError> {
        let url = self.url(path);
        self.execute(|| {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(CSRF_HEADER, &tokens.anti_forgery_token)
                .header(COOKIE, tokens.cookie_header());
            if !query.is_empty() {
                request = request.query(query);
            }
            request
        })
        .await
    }

    /// Runs one request with the transport retry budget, racing the shutdown token.
    async fn execute<F>(&self, build: F) -> Result<UpstreamResponse, AppError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_err = None;

        for attempt in 0..=self.retry.attempts {
            let start = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    return Err(AppError::Cancelled("upstream call aborted".to_string()));
                }
                outcome = read_response(build()) => outcome,
            };
            UPSTREAM_REQUEST_DURATION.record(start.elapsed().as_secs_f64(), &[]);

            match outcome {
                Ok(response) => return Ok(response),
                Err(err) if is_retryable(&err) && attempt < self.retry.attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.retry.attempts,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream call failed, retrying"
                    );
                    UPSTREAM_RETRY_COUNT.add(1, &[]);
                    last_err = Some(err);

                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => {
                            return Err(AppError::Cancelled("upstream call aborted".to_string()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(transport_error(&err)),
            }
        }

        Err(last_err
            .map(|e| transport_error(&e))
            .unwrap_or_else(|| AppError::Transport("all retries exhausted".to_string())))
    }
}

#[async_trait::async_trait]
impl EntitySource for AuthenticatingClient {
    #[tracing::instrument(
        name = "upstream fetch_student",
        skip(self),
        fields(student.id = id)
    )]
    async fn fetch_entity(&self, id: i64) -> Result<Student, AppError> {
        if id <= 0 {
            return Err(AppError::InvalidArgument(format!("invalid student ID: {id}")));
        }

        let path = format!("{}/{}", self.entity_path, id);
        let response = self.request_with_auth(Method::GET, &path, &[]).await?;
        let status = response.status.as_u16();

        tracing::debug!(
            status_code = status,
            body_size = response.body.len(),
            "Received student response"
        );

        let envelope: Envelope<Student> = decode_envelope(response)?;
        if !envelope.success {
            return Err(AppError::upstream(
                status,
                envelope.message,
                "API returned success=false",
            ));
        }

        envelope
            .data
            .ok_or_else(|| AppError::upstream(404, format!("student with ID {id} not found"), ""))
    }

    #[tracing::instrument(
        name = "upstream list_students",
        skip(self, filters),
        fields(filters.count, students.count)
    )]
    async fn list_entities(
        &self,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<StudentSummary>, AppError> {
        let query = build_query(filters);
        let span = tracing::Span::current();
        span.record("filters.count", query.len());

        let response = self
            .request_with_auth(Method::GET, &self.entity_path, &query)
            .await?;
        let status = response.status.as_u16();

        let envelope: Envelope<Vec<StudentSummary>> = decode_envelope(response)?;
        if !envelope.success {
            return Err(AppError::upstream(
                status,
                envelope.message,
                "API returned success=false",
            ));
        }

        let students = envelope.data.unwrap_or_default();
        span.record("students.count", students.len());
        Ok(students)
    }

    async fn health_probe(&self) -> Result<(), AppError> {
        let url = format!("{}/", self.base_url);
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                return Err(AppError::Cancelled("health probe aborted".to_string()));
            }
            outcome = self.probe.get(&url).send() => outcome,
        };

        let response = outcome.map_err(|e| {
            AppError::Transport(format!("health check request failed: {}", e.without_url()))
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AppError::upstream(
                status.as_u16(),
                format!(
                    "upstream API is experiencing server errors (status: {})",
                    status.as_u16()
                ),
                "",
            ));
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.shutdown.cancel();
        self.store.clear().await;
        tracing::debug!("Upstream client closed");
        Ok(())
    }
}

/// Drops blank filter values; the rest become query pairs.
pub fn build_query(filters: &BTreeMap<String, String>) -> Vec<(String, String)> {
    filters
        .iter()
        .filter(|(key, value)| !key.trim().is_empty() && !value.trim().is_empty())
        .map(|(key, value)| (key.clone(), value.trim().to_string()))
        .collect()
}

async fn read_response(request: RequestBuilder) -> Result<UpstreamResponse, reqwest::Error> {
    let response = request.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await?;
    Ok(UpstreamResponse {
        status,
        headers,
        body,
    })
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn transport_error(err: &reqwest::Error) -> AppError {
    let kind = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_body() || err.is_decode() {
        "failed to read response body"
    } else {
        "request failed"
    };
    AppError::Transport(format!("{kind}: {err}"))
}

fn decode_envelope<T: DeserializeOwned>(response: UpstreamResponse) -> Result<Envelope<T>, AppError> {
    if !response.status.is_success() {
        return Err(upstream_failure(&response));
    }

    serde_json::from_str(&response.body).map_err(|e| {
        AppError::upstream(
            StatusCode::BAD_GATEWAY.as_u16(),
            "failed to decode upstream response",
            e.to_string(),
        )
    })
}

fn upstream_failure(response: &UpstreamResponse) -> AppError {
    match serde_json::from_str::<UpstreamErrorBody>(&response.body) {
        Ok(body) if !body.message.is_empty() => AppError::upstream(
            response.status.as_u16(),
            body.message,
            body.error.unwrap_or_default(),
        ),
        _ => AppError::upstream(
            response.status.as_u16(),
            response.status.to_string(),
            response.body.clone(),
        ),
    }
}

fn record_login(outcome: &'static str) {
    UPSTREAM_LOGIN_COUNT.add(1, &[KeyValue::new("outcome", outcome)]);
}

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub report: ReportConfig,
    pub logging: LoggingConfig,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
}

#[derive(Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub entity_path: String,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub service_username: String,
    pub service_password: String,
}

// Hand-written so the service password never reaches a log line.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("entity_path", &self.entity_path)
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("service_username", &self.service_username)
            .field("service_password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub max_file_size: u64,
    pub cleanup: bool,
    pub cleanup_after: Duration,
    pub watermark_text: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let duration_or = |key: &str, default: Duration| match get(key) {
            Some(raw) => parse_duration(&raw).ok_or_else(|| {
                AppError::Configuration(format!("{key} must be a duration such as 30s, got {raw:?}"))
            }),
            None => Ok(default),
        };

        let config = Self {
            environment: string_or("ENVIRONMENT", "development"),
            server: ServerConfig {
                port: parse_or(get("APP_PORT"), "APP_PORT", 8080)?,
                read_timeout: duration_or("READ_TIMEOUT", Duration::from_secs(10))?,
                write_timeout: duration_or("WRITE_TIMEOUT", Duration::from_secs(10))?,
                idle_timeout: duration_or("IDLE_TIMEOUT", Duration::from_secs(60))?,
            },
            upstream: UpstreamConfig {
                base_url: string_or("UPSTREAM_BASE_URL", "http://localhost:5007/api/v1")
                    .trim_end_matches('/')
                    .to_string(),
                entity_path: normalize_path(&string_or("UPSTREAM_ENTITY_PATH", "/students")),
                timeout: duration_or("UPSTREAM_TIMEOUT", Duration::from_secs(30))?,
                retry_attempts: parse_or(get("UPSTREAM_RETRY_ATTEMPTS"), "UPSTREAM_RETRY_ATTEMPTS", 3)?,
                retry_delay: duration_or("UPSTREAM_RETRY_DELAY", Duration::from_secs(1))?,
                service_username: get("UPSTREAM_SERVICE_USERNAME").unwrap_or_default(),
                service_password: get("UPSTREAM_SERVICE_PASSWORD").unwrap_or_default(),
            },
            report: ReportConfig {
                output_dir: PathBuf::from(string_or("REPORT_OUTPUT_DIR", "./reports")),
                max_file_size: parse_or(
                    get("REPORT_MAX_FILE_SIZE"),
                    "REPORT_MAX_FILE_SIZE",
                    10 * 1024 * 1024,
                )?,
                cleanup: parse_bool_or(get("REPORT_CLEANUP"), "REPORT_CLEANUP", true)?,
                cleanup_after: duration_or("REPORT_CLEANUP_AFTER", Duration::from_secs(24 * 3600))?,
                watermark_text: string_or(
                    "REPORT_WATERMARK",
                    "Student Management System - Confidential",
                ),
            },
            logging: LoggingConfig {
                level: string_or("LOG_LEVEL", "info"),
                format: string_or("LOG_FORMAT", "json"),
            },
            otel_service_name: string_or("OTEL_SERVICE_NAME", "report-gateway"),
            otel_exporter_endpoint: string_or(
                "OTEL_EXPORTER_OTLP_ENDPOINT",
                "http://localhost:4317",
            ),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.upstream.service_username.is_empty() || self.upstream.service_password.is_empty() {
            return Err(AppError::Configuration(
                "UPSTREAM_SERVICE_USERNAME and UPSTREAM_SERVICE_PASSWORD must be set".to_string(),
            ));
        }
        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            return Err(AppError::Configuration(format!(
                "UPSTREAM_BASE_URL must be an http(s) URL, got {:?}",
                self.upstream.base_url
            )));
        }
        for (key, value) in [
            ("READ_TIMEOUT", self.server.read_timeout),
            ("WRITE_TIMEOUT", self.server.write_timeout),
            ("UPSTREAM_TIMEOUT", self.upstream.timeout),
            ("REPORT_CLEANUP_AFTER", self.report.cleanup_after),
        ] {
            if value.is_zero() {
                return Err(AppError::Configuration(format!(
                    "{key} must be greater than zero"
                )));
            }
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(AppError::Configuration(format!(
                "LOG_FORMAT must be json or pretty, got {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Set when a handler's deadline can expire before the upstream client
    /// gives up, so slow upstreams surface as cancelled requests rather than
    /// transport errors.
    pub fn request_deadline_warning(&self) -> Option<String> {
        (self.server.write_timeout < self.upstream.timeout).then(|| {
            format!(
                "WRITE_TIMEOUT ({}ms) is shorter than UPSTREAM_TIMEOUT ({}ms); slow upstream calls will be reported as cancelled",
                self.server.write_timeout.as_millis(),
                self.upstream.timeout.as_millis()
            )
        })
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, AppError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| AppError::Configuration(format!("{key} must be a number, got {value:?}"))),
        None => Ok(default),
    }
}

fn parse_bool_or(raw: Option<String>, key: &str, default: bool) -> Result<bool, AppError> {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(AppError::Configuration(format!(
            "{key} must be a boolean, got {v:?}"
        ))),
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Parses `250ms`, `30s`, `5m`, `24h`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;

    match unit {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(value.checked_mul(3600)?)),
        _ => None,
    }
}

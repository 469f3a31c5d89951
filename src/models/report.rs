use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
    pub report_id: String,
}

impl ReportMetadata {
    /// Report ids have one-second resolution; two reports for the same
    /// student within a second share an id.
    pub fn new(entity_id: i64, generated_by: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            generated_at: now,
            generated_by: generated_by.into(),
            report_id: format!("RPT-{}-{}", entity_id, now.timestamp()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportResult {
    pub report_id: String,
    pub entity_id: i64,
    pub entity_name: String,
    pub artifact_path: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
    pub file_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentStatus {
    pub status: String,
    pub message: String,
}

impl ComponentStatus {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            message: message.into(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: "unhealthy".to_string(),
            message: message.into(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub service: String,
    pub healthy: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub components: BTreeMap<String, ComponentStatus>,
}

impl HealthStatus {
    pub fn from_components(
        service: impl Into<String>,
        components: BTreeMap<String, ComponentStatus>,
    ) -> Self {
        let healthy = components.values().all(ComponentStatus::is_healthy);
        let message = if healthy {
            "All systems operational"
        } else {
            "Some components are unhealthy"
        };

        Self {
            service: service.into(),
            healthy,
            message: message.to_string(),
            timestamp: Utc::now(),
            components,
        }
    }
}

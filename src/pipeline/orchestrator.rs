use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;

use crate::error::AppError;
use crate::models::{
    ComponentStatus, HealthStatus, ReportMetadata, ReportResult, Student, StudentSummary,
};
use crate::synthesis::DocumentSynthesizer;
use crate::telemetry::metrics::{REPORT_FAILURES, REPORT_GENERATION_DURATION, REPORTS_GENERATED};
use crate::upstream::EntitySource;

pub const SERVICE_NAME: &str = "Report Service";
pub const UPSTREAM_COMPONENT: &str = "upstream_api";
pub const SYNTHESIZER_COMPONENT: &str = "document_synthesizer";
const DEFAULT_GENERATED_BY: &str = "API";

/// Progress of a single report request. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStage {
    Idle,
    FetchingEntity,
    Synthesizing,
    Done,
    Failed,
}

impl ReportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStage::Idle => "idle",
            ReportStage::FetchingEntity => "fetching_entity",
            ReportStage::Synthesizing => "synthesizing",
            ReportStage::Done => "done",
            ReportStage::Failed => "failed",
        }
    }
}

pub struct ReportOrchestrator {
    source: Arc<dyn EntitySource>,
    synthesizer: Arc<dyn DocumentSynthesizer>,
}

impl ReportOrchestrator {
    pub fn new(source: Arc<dyn EntitySource>, synthesizer: Arc<dyn DocumentSynthesizer>) -> Self {
        Self {
            source,
            synthesizer,
        }
    }

    pub async fn fetch_entity(&self, id: i64) -> Result<Student, AppError> {
        if id <= 0 {
            return Err(AppError::InvalidArgument(format!("invalid student ID: {id}")));
        }
        self.source.fetch_entity(id).await
    }

    pub async fn list_entities(
        &self,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<StudentSummary>, AppError> {
        let filters: BTreeMap<String, String> = filters
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        self.source.list_entities(&filters).await
    }

    #[tracing::instrument(
        name = "pipeline report",
        skip(self),
        fields(report.id, report.stage, report.file_size_bytes)
    )]
    pub async fn create_report(
        &self,
        student_id: i64,
        generated_by: &str,
    ) -> Result<ReportResult, AppError> {
        let start = std::time::Instant::now();
        let span = tracing::Span::current();
        let advance = |next: ReportStage| {
            tracing::debug!(stage = next.as_str(), "Report stage transition");
            span.record("report.stage", next.as_str());
        };
        let fail = |at: ReportStage, err: AppError| {
            REPORT_FAILURES.add(
                1,
                &[
                    KeyValue::new("report.stage", at.as_str()),
                    KeyValue::new("error.type", err.kind()),
                ],
            );
            span.record("report.stage", ReportStage::Failed.as_str());
            err
        };

        advance(ReportStage::Idle);
        advance(ReportStage::FetchingEntity);
        let student = self
            .fetch_entity(student_id)
            .await
            .map_err(|e| fail(ReportStage::FetchingEntity, e))?;

        let generated_by = if generated_by.trim().is_empty() {
            DEFAULT_GENERATED_BY
        } else {
            generated_by
        };
        let metadata = ReportMetadata::new(student_id, generated_by, Utc::now());
        span.record("report.id", metadata.report_id.as_str());

        advance(ReportStage::Synthesizing);
        let path = self
            .synthesizer
            .synthesize(&student, &metadata)
            .await
            .map_err(|e| fail(ReportStage::Synthesizing, e))?;

        let file_size_bytes = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not stat report artifact");
                0
            }
        };

        advance(ReportStage::Done);
        span.record("report.file_size_bytes", file_size_bytes);
        REPORTS_GENERATED.add(1, &[]);
        REPORT_GENERATION_DURATION.record(start.elapsed().as_secs_f64(), &[]);

        tracing::info!(
            report.id = %metadata.report_id,
            student.id = student_id,
            "Report generated"
        );

        Ok(ReportResult {
            report_id: metadata.report_id,
            entity_id: student_id,
            entity_name: student.display_name().to_string(),
            artifact_path: path,
            generated_at: metadata.generated_at,
            generated_by: metadata.generated_by,
            file_size_bytes,
        })
    }

    pub async fn health_check(&self) -> HealthStatus {
        let mut components = BTreeMap::new();

        let upstream = match self.source.health_probe().await {
            Ok(()) => ComponentStatus::healthy("API is responsive"),
            Err(e) => ComponentStatus::unhealthy(e.to_string()),
        };
        components.insert(UPSTREAM_COMPONENT.to_string(), upstream);

        let synthesizer = if self.synthesizer.is_ready() {
            ComponentStatus::healthy("Generator is ready")
        } else {
            ComponentStatus::unhealthy("Generator is not ready")
        };
        components.insert(SYNTHESIZER_COMPONENT.to_string(), synthesizer);

        HealthStatus::from_components(SERVICE_NAME, components)
    }

    pub async fn cleanup_artifacts(&self) -> Result<usize, AppError> {
        self.synthesizer.cleanup().await
    }

    pub async fn close(&self) -> Result<(), AppError> {
        self.source.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
        probe_error: Option<AppError>,
        filters_seen: Mutex<Vec<BTreeMap<String, String>>>,
        list_error: Option<AppError>,
    }

    #[async_trait::async_trait]
    impl EntitySource for FakeSource {
        async fn fetch_entity(&self, id: i64) -> Result<Student, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match id {
                42 => Ok(Student::new(42, "John Doe", "john@example.com")),
                _ => Err(AppError::upstream(404, "Student not found", "")),
            }
        }

        async fn list_entities(
            &self,
            filters: &BTreeMap<String, String>,
        ) -> Result<Vec<StudentSummary>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.filters_seen.lock().unwrap().push(filters.clone());
            match &self.list_error {
                Some(err) => Err(err.clone()),
                None => Ok(Vec::new()),
            }
        }

        async fn health_probe(&self) -> Result<(), AppError> {
            match &self.probe_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }

        async fn close(&self) -> Result<(), AppError> {
            Ok(())
        }
    }

    struct FakeSynthesizer {
        path: PathBuf,
        fail_with: Option<AppError>,
        ready: bool,
        seen: Mutex<Vec<ReportMetadata>>,
    }

    impl FakeSynthesizer {
        fn writing_to(path: PathBuf) -> Self {
            Self {
                path,
                fail_with: None,
                ready: true,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl DocumentSynthesizer for FakeSynthesizer {
        async fn synthesize(
            &self,
            _student: &Student,
            metadata: &ReportMetadata,
        ) -> Result<PathBuf, AppError> {
            self.seen.lock().unwrap().push(metadata.clone());
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(self.path.clone()),
            }
        }

        async fn cleanup(&self) -> Result<usize, AppError> {
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(3),
            }
        }

        fn is_ready(&self) -> bool {
            self.ready
        }
    }

    fn orchestrator(source: FakeSource, synth: FakeSynthesizer) -> (Arc<FakeSource>, ReportOrchestrator) {
        let source = Arc::new(source);
        let orchestrator = ReportOrchestrator::new(source.clone(), Arc::new(synth));
        (source, orchestrator)
    }

    #[tokio::test]
    async fn test_create_report_success() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("report_42.txt");
        std::fs::write(&path, b"hello report").unwrap();
        let (_, orchestrator) =
            orchestrator(FakeSource::default(), FakeSynthesizer::writing_to(path.clone()));

        let before = Utc::now().timestamp();
        let result = orchestrator.create_report(42, "Admin").await.unwrap();
        let after = Utc::now().timestamp();

        assert_eq!(result.entity_id, 42);
        assert_eq!(result.entity_name, "John Doe");
        assert_eq!(result.generated_by, "Admin");
        assert_eq!(result.artifact_path, path);
        assert_eq!(result.file_size_bytes, 12);

        let secs: i64 = result
            .report_id
            .strip_prefix("RPT-42-")
            .expect("report id prefix")
            .parse()
            .unwrap();
        assert!(secs >= before && secs <= after);
        assert_eq!(secs, result.generated_at.timestamp());
    }

    #[tokio::test]
    async fn test_create_report_missing_artifact_has_zero_size() {
        let (_, orchestrator) = orchestrator(
            FakeSource::default(),
            FakeSynthesizer::writing_to(PathBuf::from("/nonexistent/report.txt")),
        );
        let result = orchestrator.create_report(42, "Admin").await.unwrap();
        assert_eq!(result.file_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_create_report_defaults_generated_by() {
        let synth = FakeSynthesizer::writing_to(PathBuf::from("/nonexistent/report.txt"));
        let source = Arc::new(FakeSource::default());
        let synth = Arc::new(synth);
        let orchestrator = ReportOrchestrator::new(source, synth.clone());

        let result = orchestrator.create_report(42, "  ").await.unwrap();
        assert_eq!(result.generated_by, "API");
        assert_eq!(synth.seen.lock().unwrap()[0].generated_by, "API");
    }

    #[tokio::test]
    async fn test_create_report_rejects_invalid_ids_before_fetch() {
        let (source, orchestrator) = orchestrator(
            FakeSource::default(),
            FakeSynthesizer::writing_to(PathBuf::new()),
        );

        for id in [0, -5] {
            let err = orchestrator.create_report(id, "Admin").await.unwrap_err();
            assert!(matches!(err, AppError::InvalidArgument(_)), "{err:?}");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_report_not_found() {
        let (_, orchestrator) = orchestrator(
            FakeSource::default(),
            FakeSynthesizer::writing_to(PathBuf::new()),
        );
        let err = orchestrator.create_report(999, "Admin").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, AppError::Upstream { status_code: 404, .. }));
    }

    #[tokio::test]
    async fn test_create_report_synthesis_failure() {
        let mut synth = FakeSynthesizer::writing_to(PathBuf::new());
        synth.fail_with = Some(AppError::Artifact("disk full".into()));
        let (_, orchestrator) = orchestrator(FakeSource::default(), synth);

        let err = orchestrator.create_report(42, "Admin").await.unwrap_err();
        assert!(matches!(err, AppError::Artifact(msg) if msg == "disk full"));
    }

    #[tokio::test]
    async fn test_list_entities_drops_blank_filters() {
        let (source, orchestrator) = orchestrator(
            FakeSource::default(),
            FakeSynthesizer::writing_to(PathBuf::new()),
        );

        let empty = orchestrator.list_entities(&BTreeMap::new()).await.unwrap();
        assert!(empty.is_empty());

        let mut filters = BTreeMap::new();
        filters.insert("class".to_string(), "Grade 10".to_string());
        filters.insert("name".to_string(), " ".to_string());
        orchestrator.list_entities(&filters).await.unwrap();

        let seen = source.filters_seen.lock().unwrap();
        assert!(seen[0].is_empty());
        assert_eq!(seen[1].len(), 1);
        assert_eq!(seen[1].get("class").map(String::as_str), Some("Grade 10"));
    }

    #[tokio::test]
    async fn test_list_entities_propagates_not_found() {
        let source = FakeSource {
            list_error: Some(AppError::upstream(404, "No students found", "")),
            ..Default::default()
        };
        let (_, orchestrator) = orchestrator(source, FakeSynthesizer::writing_to(PathBuf::new()));
        let err = orchestrator.list_entities(&BTreeMap::new()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("No students found"));
    }

    #[tokio::test]
    async fn test_health_check_all_healthy() {
        let (_, orchestrator) = orchestrator(
            FakeSource::default(),
            FakeSynthesizer::writing_to(PathBuf::new()),
        );
        let status = orchestrator.health_check().await;
        assert!(status.healthy);
        assert_eq!(status.service, SERVICE_NAME);
        assert_eq!(status.message, "All systems operational");
        assert!(status.components[UPSTREAM_COMPONENT].is_healthy());
        assert!(status.components[SYNTHESIZER_COMPONENT].is_healthy());
    }

    #[tokio::test]
    async fn test_health_check_upstream_failure_keeps_components() {
        let source = FakeSource {
            probe_error: Some(AppError::upstream(
                503,
                "upstream API is experiencing server errors (status: 503)",
                "",
            )),
            ..Default::default()
        };
        let (_, orchestrator) = orchestrator(source, FakeSynthesizer::writing_to(PathBuf::new()));

        let status = orchestrator.health_check().await;
        assert!(!status.healthy);
        assert_eq!(status.components.len(), 2);
        assert_eq!(status.components[UPSTREAM_COMPONENT].status, "unhealthy");
        assert!(status.components[UPSTREAM_COMPONENT].message.contains("503"));
        assert!(status.components[SYNTHESIZER_COMPONENT].is_healthy());
    }

    #[tokio::test]
    async fn test_health_check_synthesizer_not_ready() {
        let mut synth = FakeSynthesizer::writing_to(PathBuf::new());
        synth.ready = false;
        let (_, orchestrator) = orchestrator(FakeSource::default(), synth);

        let status = orchestrator.health_check().await;
        assert!(!status.healthy);
        assert_eq!(status.components[SYNTHESIZER_COMPONENT].status, "unhealthy");
    }

    #[tokio::test]
    async fn test_cleanup_propagates_error_unchanged() {
        let mut synth = FakeSynthesizer::writing_to(PathBuf::new());
        synth.fail_with = Some(AppError::Artifact("permission denied on ./reports".into()));
        let (_, orchestrator) = orchestrator(FakeSource::default(), synth);

        let err = orchestrator.cleanup_artifacts().await.unwrap_err();
        assert_eq!(err.to_string(), "Artifact error: permission denied on ./reports");
    }

    #[tokio::test]
    async fn test_cleanup_returns_count() {
        let (_, orchestrator) = orchestrator(
            FakeSource::default(),
            FakeSynthesizer::writing_to(PathBuf::new()),
        );
        tokio_test::assert_ok!(orchestrator.cleanup_artifacts().await);
        assert_eq!(orchestrator.cleanup_artifacts().await.unwrap(), 3);
    }
}

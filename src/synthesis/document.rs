use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use opentelemetry::KeyValue;

use super::DocumentSynthesizer;
use crate::config::ReportConfig;
use crate::error::AppError;
use crate::models::student::or_na;
use crate::models::{ReportMetadata, Student};
use crate::telemetry::metrics::ARTIFACTS_REMOVED;

const ARTIFACT_PREFIX: &str = "report_";
const ARTIFACT_EXTENSION: &str = "txt";

/// Writes plain-text student reports into the configured output directory.
pub struct FileSynthesizer {
    config: ReportConfig,
}

impl FileSynthesizer {
    pub fn new(config: ReportConfig) -> Result<Self, AppError> {
        std::fs::create_dir_all(&config.output_dir).map_err(|e| {
            AppError::Artifact(format!(
                "failed to create output directory {}: {e}",
                config.output_dir.display()
            ))
        })?;

        Ok(Self { config })
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    fn artifact_name(&self, student: &Student) -> String {
        format!(
            "{ARTIFACT_PREFIX}{}_{}_{}.{ARTIFACT_EXTENSION}",
            student.id,
            sanitize(student.display_name()),
            Utc::now().format("%Y%m%d_%H%M%S_%3f"),
        )
    }

    fn render(&self, student: &Student, metadata: &ReportMetadata) -> String {
        let mut out = String::new();
        let rule = "=".repeat(64);

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "STUDENT REPORT");
        let _ = writeln!(out, "{}", self.config.watermark_text);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Report ID:    {}", metadata.report_id);
        let _ = writeln!(out, "Generated by: {}", metadata.generated_by);
        let _ = writeln!(
            out,
            "Generated at: {}",
            metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        section(&mut out, "Personal Information", &[
            ("Name", student.display_name()),
            ("Email", student.display_email()),
            ("Gender", or_na(student.gender.as_deref())),
            ("Date of Birth", or_na(student.dob.as_deref())),
            ("Phone", or_na(student.phone.as_deref())),
        ]);

        let roll = student.roll.map(|r| r.to_string());
        section(&mut out, "Academic Information", &[
            ("Class", or_na(student.class.as_deref())),
            ("Section", or_na(student.section.as_deref())),
            ("Roll", or_na(roll.as_deref())),
            ("Admission Date", or_na(student.admission_date.as_deref())),
        ]);

        section(&mut out, "Family Information", &[
            ("Father", or_na(student.father_name.as_deref())),
            ("Father Phone", or_na(student.father_phone.as_deref())),
            ("Mother", or_na(student.mother_name.as_deref())),
            ("Mother Phone", or_na(student.mother_phone.as_deref())),
            ("Guardian", or_na(student.guardian_name.as_deref())),
            ("Guardian Phone", or_na(student.guardian_phone.as_deref())),
            ("Relation", or_na(student.relation_of_guardian.as_deref())),
        ]);

        section(&mut out, "Address", &[
            ("Current", or_na(student.current_address.as_deref())),
            ("Permanent", or_na(student.permanent_address.as_deref())),
        ]);

        let access = if student.system_access { "Enabled" } else { "Disabled" };
        section(&mut out, "Administrative", &[
            ("System Access", access),
            ("Reporter", or_na(student.reporter_name.as_deref())),
        ]);

        let _ = writeln!(out, "\n{rule}");
        let _ = writeln!(out, "{}", self.config.watermark_text);
        out
    }
}

fn section(out: &mut String, title: &str, rows: &[(&str, &str)]) {
    let _ = writeln!(out, "\n{title}\n{}", "-".repeat(title.len()));
    for (label, value) in rows {
        let _ = writeln!(out, "{:<16}{}", format!("{label}:"), value);
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn is_artifact(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(ARTIFACT_PREFIX));
    named && path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION)
}

/// Temp files left by a write that never reached the rename.
fn is_staging(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(&format!(".{ARTIFACT_PREFIX}")) && n.ends_with(".tmp"))
}

#[async_trait::async_trait]
impl DocumentSynthesizer for FileSynthesizer {
    #[tracing::instrument(
        name = "synthesize report",
        skip(self, student, metadata),
        fields(student.id = student.id, report.id = %metadata.report_id, artifact.bytes)
    )]
    async fn synthesize(
        &self,
        student: &Student,
        metadata: &ReportMetadata,
    ) -> Result<PathBuf, AppError> {
        let document = self.render(student, metadata);
        let size = document.len() as u64;
        tracing::Span::current().record("artifact.bytes", size);

        if size > self.config.max_file_size {
            return Err(AppError::Artifact(format!(
                "report for student {} is {size} bytes, exceeding the {} byte limit",
                student.id, self.config.max_file_size
            )));
        }

        let name = self.artifact_name(student);
        let path = self.config.output_dir.join(&name);
        let staging = self
            .config
            .output_dir
            .join(format!(".{name}.{:016x}.tmp", fastrand::u64(..)));

        tokio::fs::write(&staging, document.as_bytes())
            .await
            .map_err(|e| AppError::Artifact(format!("failed to write report {name}: {e}")))?;

        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(AppError::Artifact(format!(
                "failed to finalize report {name}: {e}"
            )));
        }

        tracing::info!(path = %path.display(), bytes = size, "Report artifact written");
        Ok(path)
    }

    #[tracing::instrument(name = "cleanup artifacts", skip(self), fields(artifacts.removed))]
    async fn cleanup(&self) -> Result<usize, AppError> {
        if !self.config.cleanup {
            tracing::debug!("Artifact cleanup disabled");
            return Ok(0);
        }

        let dir = &self.config.output_dir;
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            AppError::Artifact(format!(
                "failed to read output directory {}: {e}",
                dir.display()
            ))
        })?;

        let now = SystemTime::now();
        let mut removed = 0;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(AppError::Artifact(format!(
                        "failed to list output directory {}: {e}",
                        dir.display()
                    )));
                }
            };

            let path = entry.path();
            let staging = is_staging(&path);
            if !staging && !is_artifact(&path) {
                continue;
            }

            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map_err(|e| AppError::Artifact(format!("failed to stat {}: {e}", path.display())))?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age < self.config.cleanup_after {
                continue;
            }

            tokio::fs::remove_file(&path).await.map_err(|e| {
                AppError::Artifact(format!("failed to remove {}: {e}", path.display()))
            })?;
            if staging {
                tracing::debug!(path = %path.display(), "Removed abandoned staging file");
                continue;
            }
            tracing::debug!(path = %path.display(), age_secs = age.as_secs(), "Removed expired report");
            removed += 1;
        }

        tracing::Span::current().record("artifacts.removed", removed);
        ARTIFACTS_REMOVED.add(removed as u64, &[KeyValue::new("trigger", "sweep")]);
        Ok(removed)
    }

    fn is_ready(&self) -> bool {
        self.config.output_dir.is_dir()
    }
}

pub mod report;
pub mod student;

pub use report::{ComponentStatus, HealthStatus, ReportMetadata, ReportResult};
pub use student::{Envelope, Student, StudentSummary, UpstreamErrorBody};

use serde::{Deserialize, Serialize};

/// Student record as returned by the upstream backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub system_access: bool,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub dob: Option<String>,
    pub class: Option<String>,
    pub section: Option<String>,
    pub roll: Option<i64>,
    pub father_name: Option<String>,
    pub father_phone: Option<String>,
    pub mother_name: Option<String>,
    pub mother_phone: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub relation_of_guardian: Option<String>,
    pub current_address: Option<String>,
    pub permanent_address: Option<String>,
    pub admission_date: Option<String>,
    pub reporter_name: Option<String>,
}

impl Student {
    pub fn new(id: i64, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            system_access: false,
            phone: None,
            gender: None,
            dob: None,
            class: None,
            section: None,
            roll: None,
            father_name: None,
            father_phone: None,
            mother_name: None,
            mother_phone: None,
            guardian_name: None,
            guardian_phone: None,
            relation_of_guardian: None,
            current_address: None,
            permanent_address: None,
            admission_date: None,
            reporter_name: None,
        }
    }

    pub fn display_name(&self) -> &str {
        non_blank(&self.name).unwrap_or(NOT_AVAILABLE)
    }

    pub fn display_email(&self) -> &str {
        non_blank(&self.email).unwrap_or(NOT_AVAILABLE)
    }
}

/// Trimmed-down student row returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub system_access: bool,
    pub class: Option<String>,
    pub section: Option<String>,
    pub roll: Option<i64>,
}

pub const NOT_AVAILABLE: &str = "N/A";

fn non_blank(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Renders an optional text field, substituting `N/A` for missing or blank values.
pub fn or_na(value: Option<&str>) -> &str {
    value.and_then(non_blank).unwrap_or(NOT_AVAILABLE)
}

/// Standard `{success, data, message}` envelope used by the upstream backend.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: String,
}

/// Failure body the upstream sends alongside non-2xx statuses.
#[derive(Debug, Default, Deserialize)]
pub struct UpstreamErrorBody {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(Student::new(1, "John Doe", "").display_name(), "John Doe");
        assert_eq!(Student::new(1, "  ", "").display_name(), "N/A");
        assert_eq!(Student::new(1, "", "").display_email(), "N/A");
    }

    #[test]
    fn test_or_na() {
        assert_eq!(or_na(Some("Grade 10")), "Grade 10");
        assert_eq!(or_na(Some("")), "N/A");
        assert_eq!(or_na(None), "N/A");
    }

    #[test]
    fn test_student_deserialize_with_nulls() {
        let body = r#"{
            "id": 42,
            "name": "John Doe",
            "email": "john@example.com",
            "systemAccess": true,
            "phone": null,
            "class": "Grade 10",
            "roll": 7,
            "fatherName": "Richard Doe",
            "relationOfGuardian": null
        }"#;
        let student: Student = serde_json::from_str(body).unwrap();
        assert_eq!(student.id, 42);
        assert!(student.system_access);
        assert_eq!(student.class.as_deref(), Some("Grade 10"));
        assert_eq!(student.roll, Some(7));
        assert_eq!(student.father_name.as_deref(), Some("Richard Doe"));
        assert!(student.phone.is_none());
        assert!(student.admission_date.is_none());
    }

    #[test]
    fn test_envelope_without_data() {
        let envelope: Envelope<Vec<StudentSummary>> =
            serde_json::from_str(r#"{"success": false, "message": "No students found"}"#).unwrap();
        assert!(!envelope.success);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.message, "No students found");
    }
}

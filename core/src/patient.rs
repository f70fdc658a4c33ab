// Patient record data model
//
// Records travel the mesh as JSON inside search responses and live in the
// local store under the same encoding, so the wire names are fixed here.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A patient record as stored locally and exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medications: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allergies: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl PatientRecord {
    /// Create a record with a fresh id and current timestamps
    pub fn new(name: impl Into<String>) -> Self {
        let now = current_timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            phone: None,
            email: None,
            date_of_birth: None,
            gender: None,
            conditions: Vec::new(),
            medications: Vec::new(),
            allergies: Vec::new(),
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_date_of_birth(mut self, dob: impl Into<String>) -> Self {
        self.date_of_birth = Some(dob.into());
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<String>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_medications(mut self, medications: Vec<String>) -> Self {
        self.medications = medications;
        self
    }

    pub fn with_allergies(mut self, allergies: Vec<String>) -> Self {
        self.allergies = allergies;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Case-insensitive substring match over name, phone, email, and the
    /// condition, medication, and allergy lists
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return false;
        }
        let hit = |text: &str| text.to_lowercase().contains(&query);

        hit(&self.name)
            || self.phone.as_deref().is_some_and(hit)
            || self.email.as_deref().is_some_and(hit)
            || self.conditions.iter().any(|c| hit(c))
            || self.medications.iter().any(|m| hit(m))
            || self.allergies.iter().any(|a| hit(a))
    }
}

/// Milliseconds since the Unix epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_gets_unique_id_and_timestamps() {
        let a = PatientRecord::new("Amina Diallo");
        let b = PatientRecord::new("Amina Diallo");

        assert_ne!(a.id, b.id);
        assert!(a.created_at > 0);
        assert_eq!(a.created_at, a.updated_at);
        assert_eq!(a.name, "Amina Diallo");
    }

    #[test]
    fn test_builder_helpers_set_fields() {
        let record = PatientRecord::new("Bekele Tadesse")
            .with_phone("555-0142")
            .with_email("bekele@example.org")
            .with_date_of_birth("1987-03-14")
            .with_gender("male")
            .with_conditions(vec!["Asthma".into()])
            .with_medications(vec!["Salbutamol".into()])
            .with_allergies(vec!["Penicillin".into()])
            .with_notes("follow-up scheduled");

        assert_eq!(record.phone.as_deref(), Some("555-0142"));
        assert_eq!(record.date_of_birth.as_deref(), Some("1987-03-14"));
        assert_eq!(record.conditions, vec!["Asthma".to_string()]);
        assert_eq!(record.notes, "follow-up scheduled");
    }

    #[test]
    fn test_matches_spans_contact_and_clinical_fields() {
        let record = PatientRecord::new("Amina Diallo")
            .with_phone("555-0142")
            .with_email("amina@example.org")
            .with_conditions(vec!["Type 2 Diabetes".into()])
            .with_medications(vec!["Metformin".into()])
            .with_allergies(vec!["Penicillin".into()]);

        assert!(record.matches("diallo"));
        assert!(record.matches("0142"));
        assert!(record.matches("example.org"));
        assert!(record.matches("diabetes"));
        assert!(record.matches("metformin"));
        assert!(record.matches("penicillin"));
        assert!(!record.matches("aspirin"));
    }

    #[test]
    fn test_matches_is_case_insensitive_and_trims() {
        let record = PatientRecord::new("Amina Diallo");
        assert!(record.matches("AMINA"));
        assert!(record.matches("  amina  "));
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        let record = PatientRecord::new("Amina Diallo");
        assert!(!record.matches(""));
        assert!(!record.matches("   "));
    }

    #[test]
    fn test_wire_encoding_uses_camel_case_and_omits_empty_fields() {
        let mut record = PatientRecord::new("Amina Diallo").with_date_of_birth("1990-01-01");
        record.created_at = 1_700_000_000_000;
        record.updated_at = 1_700_000_000_000;

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"dateOfBirth\":\"1990-01-01\""), "got: {json}");
        assert!(json.contains("\"createdAt\":1700000000000"), "got: {json}");
        assert!(!json.contains("phone"), "got: {json}");
        assert!(!json.contains("notes"), "got: {json}");

        let back: PatientRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_decodes_minimal_peer_record() {
        // Peers may send only what they know
        let back: PatientRecord =
            serde_json::from_str(r#"{"id":"abc","name":"Amina Diallo"}"#).unwrap();
        assert_eq!(back.name, "Amina Diallo");
        assert!(back.conditions.is_empty());
        assert_eq!(back.created_at, 0);
    }
}

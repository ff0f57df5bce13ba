use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-application exception counts as reported by one store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    pub name: String,
    pub store_name: String,
    pub exception_count: u64,
    pub recent_exception_count: u64,
    pub most_recent: Option<DateTime<Utc>>,
}

/// One logged exception. Deletion is soft: a row with a `deletion_date` is
/// hidden from summaries but still retrievable by guid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionRecord {
    pub id: i64,
    pub guid: Uuid,
    pub application_name: String,
    pub machine_name: String,
    pub creation_date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_protected: bool,
    pub host: String,
    pub url: String,
    pub http_method: String,
    pub ip_address: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duplicate_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_date: Option<DateTime<Utc>>,
}

impl ExceptionRecord {
    pub fn is_deleted(&self) -> bool {
        self.deletion_date.is_some()
    }

    /// Whether `other` is "the same error": same application and message.
    pub fn is_similar_to(&self, other: &ExceptionRecord) -> bool {
        self.application_name == other.application_name && self.message == other.message
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationGroup {
    pub name: String,
    pub applications: Vec<Application>,
    pub total: u64,
    pub recent_total: u64,
}

impl ApplicationGroup {
    pub fn new(name: impl Into<String>, applications: Vec<Application>) -> Self {
        let total = applications.iter().map(|a| a.exception_count).sum();
        let recent_total = applications.iter().map(|a| a.recent_exception_count).sum();
        Self {
            name: name.into(),
            applications,
            total,
            recent_total,
        }
    }

    pub fn contains(&self, app: &str) -> bool {
        self.applications.iter().any(|a| a.name == app)
    }
}

/// Counts summed over every store's cached application list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionTotals {
    pub total: u64,
    pub recent: u64,
}

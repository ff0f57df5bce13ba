use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a node or one of its checks. Ordered so that the worst status
/// compares greatest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum MonitorStatus {
    #[default]
    Good,
    Unknown,
    Warning,
    Critical,
}

impl MonitorStatus {
    pub fn label(&self) -> &'static str {
        match self {
            MonitorStatus::Good => "good",
            MonitorStatus::Unknown => "unknown",
            MonitorStatus::Warning => "warning",
            MonitorStatus::Critical => "critical",
        }
    }

    /// Worst-wins combination. An empty set of checks is `Good`.
    pub fn worst<I>(statuses: I) -> MonitorStatus
    where
        I: IntoIterator<Item = MonitorStatus>,
    {
        statuses
            .into_iter()
            .max()
            .unwrap_or(MonitorStatus::Good)
    }
}

/// The most recent failure recorded by a cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of one cache, used for status output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub name: String,
    pub ttl_seconds: u64,
    pub has_data: bool,
    pub is_stale: bool,
    pub in_flight: bool,
    pub last_poll_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorInfo>,
    pub polls_total: u64,
    pub polls_failed: u64,
}

impl CacheStatus {
    /// A cache whose last attempt failed after having served data before.
    pub fn is_serving_stale(&self) -> bool {
        self.has_data && self.last_error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub kind: String,
    pub description: String,
    pub monitor_status: MonitorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub last_node_poll_attempt: Option<DateTime<Utc>>,
    pub caches: Vec<CacheStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_of_empty_is_good() {
        assert_eq!(MonitorStatus::worst([]), MonitorStatus::Good);
    }

    #[test]
    fn test_worst_wins() {
        let statuses = [
            MonitorStatus::Good,
            MonitorStatus::Warning,
            MonitorStatus::Good,
        ];
        assert_eq!(MonitorStatus::worst(statuses), MonitorStatus::Warning);

        let statuses = [
            MonitorStatus::Warning,
            MonitorStatus::Critical,
            MonitorStatus::Unknown,
        ];
        assert_eq!(MonitorStatus::worst(statuses), MonitorStatus::Critical);
    }

    #[test]
    fn test_serving_stale() {
        let mut status = CacheStatus {
            name: "Applications".to_string(),
            ttl_seconds: 60,
            has_data: true,
            is_stale: false,
            in_flight: false,
            last_poll_attempt: None,
            last_success: None,
            last_error: None,
            polls_total: 1,
            polls_failed: 0,
        };
        assert!(!status.is_serving_stale());

        status.last_error = Some(ErrorInfo {
            message: "timeout".to_string(),
            at: Utc::now(),
        });
        assert!(status.is_serving_stale());

        status.has_data = false;
        assert!(!status.is_serving_stale());
    }
}

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a fetcher. The polling engine treats every variant the
/// same way: log it, keep the previous value, try again once stale.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{operation} timed out after {}ms", timeout.as_millis())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    pub fn backend(message: impl Into<String>) -> Self {
        FetchError::Backend(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a poll node named '{0}' is already registered")]
    DuplicateName(String),
}

/// Lookup failures for callers that address an exception store by name.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown exception store '{0}'")]
    UnknownStore(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = FetchError::Timeout {
            operation: "Applications".to_string(),
            timeout: Duration::from_millis(1500),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Applications timed out after 1500ms");
    }

    #[test]
    fn test_anyhow_converts_transparently() {
        let err: FetchError = anyhow::anyhow!("connection refused").into();
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn test_duplicate_name_message() {
        let err = RegistryError::DuplicateName("ny-sql01".to_string());
        assert_eq!(
            err.to_string(),
            "a poll node named 'ny-sql01' is already registered"
        );
    }
}

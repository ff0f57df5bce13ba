use super::models::{Application, ExceptionRecord};
use crate::core::error::FetchError;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Query surface of one exception store. Implementations talk to the real
/// backend; every call may fail or hang, and callers wrap them in the
/// store's query timeout.
///
/// Listing queries skip soft-deleted rows unless noted. Bulk deletes skip
/// protected rows.
#[async_trait]
pub trait ExceptionBackend: Send + Sync {
    /// Per-application counts; `recent` is the window for
    /// `recent_exception_count`. `store_name` is filled in by the caller.
    async fn applications(&self, recent: Duration) -> Result<Vec<Application>, FetchError>;

    /// Newest first, at most `per_app` rows per application.
    async fn error_summary(&self, per_app: usize) -> Result<Vec<ExceptionRecord>, FetchError>;

    async fn all_errors(
        &self,
        max_per_app: usize,
        apps: Option<&[String]>,
    ) -> Result<Vec<ExceptionRecord>, FetchError>;

    async fn similar_errors(
        &self,
        error: &ExceptionRecord,
        max: usize,
    ) -> Result<Vec<ExceptionRecord>, FetchError>;

    /// Errors logged within five minutes either side of `error`.
    async fn similar_errors_in_time(
        &self,
        error: &ExceptionRecord,
        max: usize,
    ) -> Result<Vec<ExceptionRecord>, FetchError>;

    async fn find_errors(
        &self,
        search: &str,
        max: usize,
        include_deleted: bool,
        apps: Option<&[String]>,
    ) -> Result<Vec<ExceptionRecord>, FetchError>;

    /// Looks up a single error, deleted or not.
    async fn get_error(&self, guid: Uuid) -> Result<Option<ExceptionRecord>, FetchError>;

    /// Marks an error protected and undeletes it.
    async fn protect_error(&self, guid: Uuid) -> Result<bool, FetchError>;

    /// Deletes one error even if protected; already-deleted rows are left.
    async fn delete_error(&self, guid: Uuid) -> Result<bool, FetchError>;

    async fn delete_errors(&self, guids: &[Uuid]) -> Result<usize, FetchError>;

    async fn delete_similar(&self, error: &ExceptionRecord) -> Result<usize, FetchError>;

    async fn delete_all(&self, apps: &[String]) -> Result<usize, FetchError>;
}

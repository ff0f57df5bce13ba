use super::backend::ExceptionBackend;
use super::index::ApplicationIndex;
use super::models::{Application, ExceptionRecord, ExceptionTotals};
use crate::core::error::FetchError;
use crate::core::settings::{ExceptionsSettings, StoreSettings};
use crate::poll::{with_timeout, DataSource, PollCache, PollNode, Poller, Registry};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const NODE_KIND: &str = "Exceptions";

/// One exception database, exposed as two polled caches: per-application
/// counts and the newest errors per application.
pub struct ExceptionStore {
    settings: StoreSettings,
    per_app_summary_count: usize,
    backend: Arc<dyn ExceptionBackend>,
    index: Arc<ApplicationIndex>,
    applications: PollCache<Vec<Application>>,
    error_summary: PollCache<Vec<ExceptionRecord>>,
}

impl ExceptionStore {
    pub fn new(
        settings: StoreSettings,
        exceptions: &ExceptionsSettings,
        backend: Arc<dyn ExceptionBackend>,
        index: Arc<ApplicationIndex>,
    ) -> Self {
        let timeout = settings.query_timeout();
        let recent = Duration::from_secs(exceptions.recent_seconds);
        let per_app = exceptions.per_app_summary_count;

        let applications = {
            let backend = Arc::clone(&backend);
            let index = Arc::clone(&index);
            let store = settings.name.clone();
            let hook_store = settings.name.clone();
            let operation = fetch_label(&settings.name, "Applications");

            PollCache::builder("Applications", settings.poll_interval())
                .node(&settings.name)
                .after_refresh(move |apps: &Arc<Vec<Application>>| {
                    index.update_store(&hook_store, Arc::clone(apps));
                })
                .build(move || {
                    let backend = Arc::clone(&backend);
                    let store = store.clone();
                    let operation = operation.clone();
                    async move {
                        let mut apps =
                            with_timeout(&operation, timeout, backend.applications(recent))
                                .await?;
                        for app in &mut apps {
                            app.store_name = store.clone();
                        }
                        Ok::<_, FetchError>(apps)
                    }
                })
        };

        let error_summary = {
            let backend = Arc::clone(&backend);
            let operation = fetch_label(&settings.name, "ErrorSummary");

            PollCache::builder("ErrorSummary", settings.poll_interval())
                .node(&settings.name)
                .build(move || {
                    let backend = Arc::clone(&backend);
                    let operation = operation.clone();
                    async move {
                        with_timeout(&operation, timeout, backend.error_summary(per_app)).await
                    }
                })
        };

        Self {
            settings,
            per_app_summary_count: per_app,
            backend,
            index,
            applications,
            error_summary,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn applications(&self) -> &PollCache<Vec<Application>> {
        &self.applications
    }

    pub fn error_summary(&self) -> &PollCache<Vec<ExceptionRecord>> {
        &self.error_summary
    }

    pub fn into_node(self) -> PollNode {
        let name = self.settings.name.clone();
        let description = self.settings.description.clone();
        let floor = self.settings.min_between_polls();
        PollNode::new(name, description, floor, Arc::new(self))
    }

    /// Exception count over the cached application list; 0 when nothing has
    /// been fetched yet.
    pub fn cached_exception_count(&self) -> u64 {
        self.applications
            .cached()
            .map_or(0, |apps| apps.iter().map(|a| a.exception_count).sum())
    }

    pub fn cached_recent_count(&self) -> u64 {
        self.applications
            .cached()
            .map_or(0, |apps| apps.iter().map(|a| a.recent_exception_count).sum())
    }

    /// Filters the cached summary. A specific app wins over a group; with
    /// neither, every app is returned limited to `max_per_app` rows each.
    pub fn error_summary_for(
        &self,
        max_per_app: usize,
        group: Option<&str>,
        app: Option<&str>,
    ) -> Vec<ExceptionRecord> {
        let errors = self.error_summary.safe_data(true);

        if let Some(app) = app {
            return errors
                .iter()
                .filter(|e| e.application_name == app)
                .take(max_per_app)
                .cloned()
                .collect();
        }

        if let Some(group) = group {
            let Some(group) = self.index.group(group) else {
                return Vec::new();
            };
            return limit_per_app(
                errors.iter().filter(|e| group.contains(&e.application_name)),
                max_per_app,
            );
        }

        if max_per_app >= self.per_app_summary_count {
            return errors.to_vec();
        }
        limit_per_app(errors.iter(), max_per_app)
    }

    pub async fn all_errors(
        &self,
        max_per_app: usize,
        apps: Option<&[String]>,
    ) -> Result<Vec<ExceptionRecord>, FetchError> {
        self.call("all_errors", self.backend.all_errors(max_per_app, apps))
            .await
    }

    pub async fn similar_errors(
        &self,
        error: &ExceptionRecord,
        max: usize,
    ) -> Result<Vec<ExceptionRecord>, FetchError> {
        self.call("similar_errors", self.backend.similar_errors(error, max))
            .await
    }

    pub async fn similar_errors_in_time(
        &self,
        error: &ExceptionRecord,
        max: usize,
    ) -> Result<Vec<ExceptionRecord>, FetchError> {
        self.call(
            "similar_errors_in_time",
            self.backend.similar_errors_in_time(error, max),
        )
        .await
    }

    pub async fn find_errors(
        &self,
        search: &str,
        max: usize,
        include_deleted: bool,
        apps: Option<&[String]>,
    ) -> Result<Vec<ExceptionRecord>, FetchError> {
        self.call(
            "find_errors",
            self.backend.find_errors(search, max, include_deleted, apps),
        )
        .await
    }

    /// Lookup failures are logged and reported as "not found".
    pub async fn get_error(&self, guid: Uuid) -> Option<ExceptionRecord> {
        match self.call("get_error", self.backend.get_error(guid)).await {
            Ok(error) => error,
            Err(e) => {
                tracing::warn!(node = %self.name(), %guid, error = %e, "Error lookup failed");
                None
            }
        }
    }

    pub async fn protect_error(&self, guid: Uuid) -> Result<bool, FetchError> {
        self.call("protect_error", self.backend.protect_error(guid))
            .await
    }

    pub async fn delete_error(&self, guid: Uuid) -> Result<bool, FetchError> {
        self.call("delete_error", self.backend.delete_error(guid))
            .await
    }

    pub async fn delete_errors(&self, guids: &[Uuid]) -> Result<usize, FetchError> {
        self.call("delete_errors", self.backend.delete_errors(guids))
            .await
    }

    pub async fn delete_similar(&self, error: &ExceptionRecord) -> Result<usize, FetchError> {
        self.call("delete_similar", self.backend.delete_similar(error))
            .await
    }

    pub async fn delete_all(&self, apps: &[String]) -> Result<usize, FetchError> {
        self.call("delete_all", self.backend.delete_all(apps)).await
    }

    async fn call<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let label = format!("{operation}() for {}", self.name());
        tracing::debug!(node = %self.name(), operation, "Store call");
        with_timeout(&label, self.settings.query_timeout(), fut).await
    }
}

impl DataSource for ExceptionStore {
    fn kind(&self) -> &'static str {
        NODE_KIND
    }

    fn pollers(&self) -> Vec<Arc<dyn Poller>> {
        vec![
            Arc::new(self.applications.clone()),
            Arc::new(self.error_summary.clone()),
        ]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn fetch_label(store: &str, operation: &str) -> String {
    format!("Exceptions Fetch: {store}:{operation}")
}

fn limit_per_app<'a>(
    errors: impl Iterator<Item = &'a ExceptionRecord>,
    max_per_app: usize,
) -> Vec<ExceptionRecord> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    errors
        .filter(|e| {
            let count = seen.entry(e.application_name.as_str()).or_default();
            *count += 1;
            *count <= max_per_app
        })
        .cloned()
        .collect()
}

/// Exception counts summed across every registered store's cached data.
pub fn totals(registry: &Registry) -> ExceptionTotals {
    ExceptionTotals {
        total: registry.sum_by::<ExceptionStore, _>(|s| s.cached_exception_count()),
        recent: registry.sum_by::<ExceptionStore, _>(|s| s.cached_recent_count()),
    }
}

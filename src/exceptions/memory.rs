use super::backend::ExceptionBackend;
use super::models::{Application, ExceptionRecord};
use crate::core::error::FetchError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

const SIMILAR_WINDOW_MINUTES: i64 = 5;

/// In-process exception store. With a backing file (`file:<path>`
/// connection strings) the file is re-read before every call and rewritten
/// after every mutation, so other writers are picked up on the next poll.
pub struct MemoryBackend {
    records: RwLock<Vec<ExceptionRecord>>,
    file: Option<PathBuf>,
}

impl MemoryBackend {
    pub fn new(records: Vec<ExceptionRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            file: None,
        }
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            file: Some(path.into()),
        }
    }

    /// `memory:` (or empty) for a blank in-process store, `file:<path>` for a
    /// JSON-file-backed one.
    pub fn open(connection_string: &str) -> Result<Self> {
        let connection_string = connection_string.trim();
        if connection_string.is_empty() || connection_string == "memory:" {
            return Ok(Self::new(Vec::new()));
        }
        if let Some(path) = connection_string.strip_prefix("file:") {
            if path.is_empty() {
                anyhow::bail!("file: connection string needs a path");
            }
            return Ok(Self::with_file(path));
        }
        anyhow::bail!("Unsupported connection string: {}", connection_string)
    }

    async fn sync_from_file(&self) -> Result<(), FetchError> {
        let Some(path) = &self.file else {
            return Ok(());
        };

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            FetchError::backend(format!("failed to read {}: {e}", path.display()))
        })?;
        let records: Vec<ExceptionRecord> = serde_json::from_str(&content).map_err(|e| {
            FetchError::backend(format!("failed to parse {}: {e}", path.display()))
        })?;

        *self.records.write().await = records;
        Ok(())
    }

    async fn persist(&self, records: &[ExceptionRecord]) -> Result<(), FetchError> {
        let Some(path) = &self.file else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(records).map_err(anyhow::Error::from)?;
        tokio::fs::write(path, content).await.map_err(|e| {
            FetchError::backend(format!("failed to write {}: {e}", path.display()))
        })
    }

    async fn query<F>(&self, f: F) -> Result<Vec<ExceptionRecord>, FetchError>
    where
        F: FnOnce(&[ExceptionRecord]) -> Vec<ExceptionRecord>,
    {
        self.sync_from_file().await?;
        let records = self.records.read().await;
        Ok(f(records.as_slice()))
    }

    /// Applies `f` to every row and persists if anything changed.
    async fn update<F>(&self, mut f: F) -> Result<usize, FetchError>
    where
        F: FnMut(&mut ExceptionRecord) -> bool,
    {
        self.sync_from_file().await?;
        let mut records = self.records.write().await;
        let mut changed = 0;
        for record in records.iter_mut() {
            if f(record) {
                changed += 1;
            }
        }
        if changed > 0 {
            self.persist(records.as_slice()).await?;
        }
        Ok(changed)
    }
}

fn newest_first<'a>(records: impl Iterator<Item = &'a ExceptionRecord>) -> Vec<ExceptionRecord> {
    let mut rows: Vec<ExceptionRecord> = records.cloned().collect();
    rows.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
    rows
}

fn take_per_app(rows: Vec<ExceptionRecord>, per_app: usize) -> Vec<ExceptionRecord> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    rows.into_iter()
        .filter(|row| {
            let count = seen.entry(row.application_name.clone()).or_default();
            *count += 1;
            *count <= per_app
        })
        .collect()
}

fn in_apps(record: &ExceptionRecord, apps: Option<&[String]>) -> bool {
    apps.map_or(true, |apps| apps.contains(&record.application_name))
}

fn soft_delete(record: &mut ExceptionRecord) -> bool {
    record.deletion_date = Some(Utc::now());
    true
}

#[async_trait]
impl ExceptionBackend for MemoryBackend {
    async fn applications(&self, recent: Duration) -> Result<Vec<Application>, FetchError> {
        self.sync_from_file().await?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(recent).unwrap_or_else(|_| chrono::Duration::zero());

        let records = self.records.read().await;
        let mut apps: BTreeMap<&str, Application> = BTreeMap::new();
        for record in records.iter().filter(|r| !r.is_deleted()) {
            let app = apps
                .entry(record.application_name.as_str())
                .or_insert_with(|| Application {
                    name: record.application_name.clone(),
                    ..Application::default()
                });
            app.exception_count += 1;
            if record.creation_date >= cutoff {
                app.recent_exception_count += 1;
            }
            if app.most_recent.map_or(true, |latest| record.creation_date > latest) {
                app.most_recent = Some(record.creation_date);
            }
        }

        Ok(apps.into_values().collect())
    }

    async fn error_summary(&self, per_app: usize) -> Result<Vec<ExceptionRecord>, FetchError> {
        self.query(|records| {
            take_per_app(newest_first(records.iter().filter(|r| !r.is_deleted())), per_app)
        })
        .await
    }

    async fn all_errors(
        &self,
        max_per_app: usize,
        apps: Option<&[String]>,
    ) -> Result<Vec<ExceptionRecord>, FetchError> {
        self.query(|records| {
            let rows = newest_first(
                records
                    .iter()
                    .filter(|r| !r.is_deleted() && in_apps(r, apps)),
            );
            take_per_app(rows, max_per_app)
        })
        .await
    }

    async fn similar_errors(
        &self,
        error: &ExceptionRecord,
        max: usize,
    ) -> Result<Vec<ExceptionRecord>, FetchError> {
        self.query(|records| {
            let mut rows = newest_first(
                records
                    .iter()
                    .filter(|r| !r.is_deleted() && r.is_similar_to(error)),
            );
            rows.truncate(max);
            rows
        })
        .await
    }

    async fn similar_errors_in_time(
        &self,
        error: &ExceptionRecord,
        max: usize,
    ) -> Result<Vec<ExceptionRecord>, FetchError> {
        let window = chrono::Duration::minutes(SIMILAR_WINDOW_MINUTES);
        let (start, end) = (error.creation_date - window, error.creation_date + window);
        self.query(|records| {
            let mut rows = newest_first(records.iter().filter(|r| {
                !r.is_deleted() && r.creation_date >= start && r.creation_date <= end
            }));
            rows.truncate(max);
            rows
        })
        .await
    }

    async fn find_errors(
        &self,
        search: &str,
        max: usize,
        include_deleted: bool,
        apps: Option<&[String]>,
    ) -> Result<Vec<ExceptionRecord>, FetchError> {
        let needle = search.to_lowercase();
        self.query(|records| {
            let mut rows = newest_first(records.iter().filter(|r| {
                (include_deleted || !r.is_deleted())
                    && in_apps(r, apps)
                    && [&r.message, &r.url, &r.host]
                        .iter()
                        .chain(r.detail.as_ref().iter())
                        .any(|field| field.to_lowercase().contains(&needle))
            }));
            rows.truncate(max);
            rows
        })
        .await
    }

    async fn get_error(&self, guid: Uuid) -> Result<Option<ExceptionRecord>, FetchError> {
        self.sync_from_file().await?;
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.guid == guid).cloned())
    }

    async fn protect_error(&self, guid: Uuid) -> Result<bool, FetchError> {
        let changed = self
            .update(|r| {
                if r.guid != guid {
                    return false;
                }
                r.is_protected = true;
                r.deletion_date = None;
                true
            })
            .await?;
        Ok(changed > 0)
    }

    async fn delete_error(&self, guid: Uuid) -> Result<bool, FetchError> {
        let changed = self
            .update(|r| r.guid == guid && !r.is_deleted() && soft_delete(r))
            .await?;
        Ok(changed > 0)
    }

    async fn delete_errors(&self, guids: &[Uuid]) -> Result<usize, FetchError> {
        self.update(|r| {
            !r.is_deleted() && !r.is_protected && guids.contains(&r.guid) && soft_delete(r)
        })
        .await
    }

    async fn delete_similar(&self, error: &ExceptionRecord) -> Result<usize, FetchError> {
        self.update(|r| {
            !r.is_deleted() && !r.is_protected && r.is_similar_to(error) && soft_delete(r)
        })
        .await
    }

    async fn delete_all(&self, apps: &[String]) -> Result<usize, FetchError> {
        self.update(|r| {
            !r.is_deleted()
                && !r.is_protected
                && apps.contains(&r.application_name)
                && soft_delete(r)
        })
        .await
    }
}

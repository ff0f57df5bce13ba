use super::fetch::Fetcher;
use super::node::NodeGate;
use super::slot::{Busy, TimedSlot, UpdatePermit};
use crate::core::models::CacheStatus;
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Hook run after every successful refresh, with the value just committed.
pub type AfterRefresh<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Failed,
    /// Another refresh already held the cache.
    Skipped,
}

/// Type-erased view of a [`PollCache`] so a node can drive caches of
/// different value types.
#[async_trait]
pub trait Poller: Send + Sync {
    fn name(&self) -> &str;
    fn is_stale(&self) -> bool;
    fn in_flight(&self) -> bool;
    /// Starts a background refresh if the cache is stale (or `force`) and
    /// not already refreshing. Returns whether a fetch was started. The
    /// caller has already applied the node floor.
    fn trigger(&self, force: bool) -> bool;
    /// Binds the cache to its node's floor so reads respect it too.
    fn attach_gate(&self, gate: Arc<NodeGate>);
    /// Refreshes inline and waits for the outcome.
    async fn refresh(&self) -> RefreshOutcome;
    fn status(&self) -> CacheStatus;
}

struct CacheInner<T> {
    node: String,
    name: String,
    ttl: Duration,
    fetcher: Box<dyn Fetcher<T>>,
    slot: Arc<TimedSlot<T>>,
    after_refresh: Option<AfterRefresh<T>>,
    gate: OnceLock<Arc<NodeGate>>,
}

impl<T: Send + Sync + 'static> CacheInner<T> {
    /// The claim is held until the hook has run, so hooks see refreshes in
    /// commit order.
    async fn run(&self, mut permit: UpdatePermit<T>) -> RefreshOutcome {
        let started = tokio::time::Instant::now();
        let result = self.fetcher.fetch().await;

        match permit.record(result) {
            Ok(value) => {
                tracing::debug!(
                    node = %self.node,
                    operation = %self.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Poll fetch succeeded"
                );
                if let Some(after_refresh) = &self.after_refresh {
                    after_refresh(&value);
                }
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                tracing::warn!(
                    node = %self.node,
                    operation = %self.name,
                    error = %e,
                    has_cached_value = self.slot.has_value(),
                    "Poll fetch failed, keeping cached value"
                );
                RefreshOutcome::Failed
            }
        }
    }
}

/// A named, TTL-bound cached value refreshed by an async [`Fetcher`].
///
/// Reads never wait for a fetch: a stale read kicks off a background refresh
/// and returns whatever is cached right now. Cloning is cheap and every clone
/// shares the same slot.
pub struct PollCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for PollCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct PollCacheBuilder<T> {
    node: String,
    name: String,
    ttl: Duration,
    after_refresh: Option<AfterRefresh<T>>,
}

impl<T: Send + Sync + 'static> PollCacheBuilder<T> {
    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn after_refresh<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        self.after_refresh = Some(Arc::new(hook));
        self
    }

    pub fn build<F>(self, fetcher: F) -> PollCache<T>
    where
        F: Fetcher<T> + 'static,
    {
        PollCache {
            inner: Arc::new(CacheInner {
                node: self.node,
                name: self.name,
                ttl: self.ttl,
                fetcher: Box::new(fetcher),
                slot: Arc::new(TimedSlot::new()),
                after_refresh: self.after_refresh,
                gate: OnceLock::new(),
            }),
        }
    }
}

impl<T: Send + Sync + 'static> PollCache<T> {
    pub fn builder(name: impl Into<String>, ttl: Duration) -> PollCacheBuilder<T> {
        PollCacheBuilder {
            node: String::new(),
            name: name.into(),
            ttl,
            after_refresh: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// The cached value, without ever starting a fetch.
    pub fn cached(&self) -> Option<Arc<T>> {
        self.inner.slot.read()
    }

    /// The best value available right now. Starts a background refresh when
    /// the value is stale or `force` is set. An unforced refresh waits for
    /// the owning node's floor like a scheduler poll would.
    pub fn get_data(&self, force: bool) -> Option<Arc<T>> {
        match self.inner.gate.get() {
            Some(gate) => {
                gate.admit(force, || usize::from(self.start_refresh(force)));
            }
            None => {
                self.start_refresh(force);
            }
        }
        self.cached()
    }

    /// Like [`get_data`](Self::get_data) but never empty: falls back to
    /// `T::default()`. With `use_stale_if_errored == false` a cache whose last
    /// refresh failed also reports the default.
    pub fn safe_data(&self, use_stale_if_errored: bool) -> Arc<T>
    where
        T: Default,
    {
        let data = self.get_data(false);
        if !use_stale_if_errored && self.inner.slot.last_error().is_some() {
            return Arc::new(T::default());
        }
        data.unwrap_or_default()
    }

    fn start_refresh(&self, force: bool) -> bool {
        if !force && !self.inner.slot.is_stale(self.inner.ttl) {
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                node = %self.inner.node,
                operation = %self.inner.name,
                "No async runtime available, serving cached value"
            );
            return false;
        };

        let permit = match self.inner.slot.begin_update() {
            Ok(permit) => permit,
            Err(Busy) => {
                tracing::trace!(
                    node = %self.inner.node,
                    operation = %self.inner.name,
                    "Refresh already in flight"
                );
                return false;
            }
        };

        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            inner.run(permit).await;
        });
        true
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Poller for PollCache<T> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn is_stale(&self) -> bool {
        self.inner.slot.is_stale(self.inner.ttl)
    }

    fn in_flight(&self) -> bool {
        self.inner.slot.in_flight()
    }

    fn trigger(&self, force: bool) -> bool {
        self.start_refresh(force)
    }

    fn attach_gate(&self, gate: Arc<NodeGate>) {
        if self.inner.gate.set(gate).is_err() {
            tracing::warn!(
                node = %self.inner.node,
                operation = %self.inner.name,
                "Cache already belongs to a node, keeping the first floor"
            );
        }
    }

    async fn refresh(&self) -> RefreshOutcome {
        match self.inner.slot.begin_update() {
            Ok(permit) => self.inner.run(permit).await,
            Err(Busy) => RefreshOutcome::Skipped,
        }
    }

    fn status(&self) -> CacheStatus {
        let slot = &self.inner.slot;
        let (polls_total, polls_failed) = slot.poll_counts();
        CacheStatus {
            name: self.inner.name.clone(),
            ttl_seconds: self.inner.ttl.as_secs(),
            has_data: slot.has_value(),
            is_stale: slot.is_stale(self.inner.ttl),
            in_flight: slot.in_flight(),
            last_poll_attempt: slot.last_poll_attempt().map(|s| s.wall),
            last_success: slot.last_success().map(|s| s.wall),
            last_error: slot.last_error(),
            polls_total,
            polls_failed,
        }
    }
}

use super::cache::{Poller, RefreshOutcome};
use super::slot::Stamp;
use crate::core::models::{MonitorStatus, NodeStatus};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// What a monitored backend plugs into a [`PollNode`]: the caches it exposes
/// and, optionally, its own health checks.
pub trait DataSource: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    /// Every cache this source exposes, in display order. Called once when
    /// the node is built.
    fn pollers(&self) -> Vec<Arc<dyn Poller>>;

    fn monitor_statuses(&self) -> Vec<MonitorStatus> {
        Vec::new()
    }

    fn monitor_status_reason(&self) -> Option<String> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// A node's minimum spacing between poll rounds, shared by the node and
/// every cache it owns so reads and scheduler ticks obey the same floor.
#[derive(Debug)]
pub struct NodeGate {
    floor: Duration,
    last_poll: Mutex<Option<Stamp>>,
}

impl NodeGate {
    pub fn new(floor: Duration) -> Self {
        Self {
            floor,
            last_poll: Mutex::new(None),
        }
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn last_poll(&self) -> Option<Stamp> {
        *self.last_poll.lock()
    }

    /// Runs `start` unless the floor blocks it. `start` returns how many
    /// fetches it began; the gate is stamped only when that is non-zero.
    /// Returns `None` when throttled.
    pub fn admit<F>(&self, force: bool, start: F) -> Option<usize>
    where
        F: FnOnce() -> usize,
    {
        let mut last_poll = self.last_poll.lock();

        if !force {
            if let Some(last) = *last_poll {
                if last.elapsed() < self.floor {
                    return None;
                }
            }
        }

        let started = start();
        if started > 0 {
            *last_poll = Some(Stamp::now());
        }
        Some(started)
    }

    fn stamp(&self) {
        *self.last_poll.lock() = Some(Stamp::now());
    }
}

/// Result of one [`PollNode::poll`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodePoll {
    pub started: usize,
    pub throttled: bool,
}

pub struct PollNode {
    name: String,
    description: String,
    source: Arc<dyn DataSource>,
    pollers: Vec<Arc<dyn Poller>>,
    gate: Arc<NodeGate>,
}

impl PollNode {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        min_between_polls: Duration,
        source: Arc<dyn DataSource>,
    ) -> Self {
        let gate = Arc::new(NodeGate::new(min_between_polls));
        let pollers = source.pollers();
        for poller in &pollers {
            poller.attach_gate(Arc::clone(&gate));
        }
        Self {
            name: name.into(),
            description: description.into(),
            source,
            pollers,
            gate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }

    pub fn min_between_polls(&self) -> Duration {
        self.gate.floor()
    }

    pub fn pollers(&self) -> &[Arc<dyn Poller>] {
        &self.pollers
    }

    /// The data source behind this node, if it is an `S`.
    pub fn source<S: DataSource>(&self) -> Option<&S> {
        self.source.as_any().downcast_ref::<S>()
    }

    /// One poll cycle. Unless forced, nothing is touched while the node is
    /// inside its minimum spacing, whatever the individual caches' TTLs say.
    /// Otherwise every stale cache starts a background fetch; the node
    /// timestamp moves only when at least one fetch actually started.
    pub fn poll(&self, force: bool) -> NodePoll {
        let admitted = self.gate.admit(force, || {
            self.pollers
                .iter()
                .filter(|poller| poller.trigger(force))
                .count()
        });

        let Some(started) = admitted else {
            tracing::trace!(node = %self.name, "Poll throttled by node floor");
            return NodePoll {
                started: 0,
                throttled: true,
            };
        };

        if started > 0 {
            tracing::debug!(node = %self.name, started, force, "Node poll started fetches");
        }
        NodePoll {
            started,
            throttled: false,
        }
    }

    /// Refreshes every cache concurrently and waits for all of them,
    /// ignoring the node floor. Used by one-shot callers.
    pub async fn refresh_all(&self) -> Vec<(String, RefreshOutcome)> {
        self.gate.stamp();

        let mut tasks = JoinSet::new();
        for poller in &self.pollers {
            let poller = Arc::clone(poller);
            tasks.spawn(async move {
                let outcome = poller.refresh().await;
                (poller.name().to_string(), outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(self.pollers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::warn!(node = %self.name, error = %e, "Refresh task aborted");
                }
            }
        }
        outcomes
    }

    pub fn last_poll_attempt(&self) -> Option<Stamp> {
        self.gate.last_poll()
    }

    pub fn monitor_status(&self) -> MonitorStatus {
        MonitorStatus::worst(self.source.monitor_statuses())
    }

    pub fn monitor_status_reason(&self) -> Option<String> {
        self.source.monitor_status_reason()
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            name: self.name.clone(),
            kind: self.kind().to_string(),
            description: self.description.clone(),
            monitor_status: self.monitor_status(),
            reason: self.monitor_status_reason(),
            last_node_poll_attempt: self.last_poll_attempt().map(|s| s.wall),
            caches: self.pollers.iter().map(|p| p.status()).collect(),
        }
    }
}

impl std::fmt::Debug for PollNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollNode")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("pollers", &self.pollers.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::error::FetchError;
    use crate::poll::PollCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct CountingSource {
        pub first: PollCache<u64>,
        pub second: PollCache<u64>,
        pub calls: Arc<AtomicUsize>,
        pub checks: Vec<MonitorStatus>,
    }

    impl CountingSource {
        pub(crate) fn new(ttl: Duration, value: u64) -> Self {
            let calls = Arc::new(AtomicUsize::new(0));
            let make = |name: &str| {
                let calls = Arc::clone(&calls);
                PollCache::builder(name, ttl).build(move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, FetchError>(value)
                    }
                })
            };
            Self {
                first: make("First"),
                second: make("Second"),
                calls,
                checks: Vec::new(),
            }
        }
    }

    impl DataSource for CountingSource {
        fn kind(&self) -> &'static str {
            "Counting"
        }

        fn pollers(&self) -> Vec<Arc<dyn Poller>> {
            vec![Arc::new(self.first.clone()), Arc::new(self.second.clone())]
        }

        fn monitor_statuses(&self) -> Vec<MonitorStatus> {
            self.checks.clone()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn node_with(source: CountingSource, floor_secs: u64) -> (PollNode, Arc<AtomicUsize>) {
        let calls = Arc::clone(&source.calls);
        let node = PollNode::new(
            "ny-sql01",
            "Primary exceptions",
            Duration::from_secs(floor_secs),
            Arc::new(source),
        );
        (node, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_floor_limits_rounds_across_caches() {
        let (node, calls) = node_with(CountingSource::new(Duration::from_secs(1), 7), 10);

        let first = node.poll(false);
        assert_eq!(first.started, 2);
        settle().await;

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = node.poll(false);
        assert!(second.throttled);
        assert_eq!(second.started, 0);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(node.poll(false).started, 2);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_respect_node_floor() {
        let source = CountingSource::new(Duration::from_secs(1), 7);
        let first = source.first.clone();
        let (node, calls) = node_with(source, 10);

        node.poll(false);
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(node.poll(false).throttled);

        assert_eq!(first.get_data(false), Some(Arc::new(7)));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(9)).await;
        first.get_data(false);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // The read stamped the node, so the next tick waits out the floor.
        assert!(node.poll(false).throttled);

        first.get_data(true);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_bypasses_floor() {
        let (node, calls) = node_with(CountingSource::new(Duration::from_secs(60), 1), 10);

        node.poll(false);
        settle().await;
        let forced = node.poll(true);
        assert!(!forced.throttled);
        assert_eq!(forced.started, 2);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_caches_do_not_move_node_timestamp() {
        let (node, calls) = node_with(CountingSource::new(Duration::from_secs(60), 1), 1);

        node.poll(false);
        settle().await;
        let stamped = node.last_poll_attempt().unwrap().at;

        tokio::time::advance(Duration::from_secs(5)).await;
        let poll = node.poll(false);
        assert_eq!(poll, NodePoll::default());
        assert_eq!(node.last_poll_attempt().unwrap().at, stamped);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_all_waits_for_every_cache() {
        let source = CountingSource::new(Duration::from_secs(60), 11);
        let first = source.first.clone();
        let (node, _) = node_with(source, 10);

        let outcomes = node.refresh_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| *outcome == RefreshOutcome::Refreshed));
        assert_eq!(*first.cached().unwrap(), 11);
        assert!(node.last_poll_attempt().is_some());
    }

    #[test]
    fn test_monitor_status_defaults_to_good() {
        let (node, _) = node_with(CountingSource::new(Duration::from_secs(1), 1), 1);
        assert_eq!(node.monitor_status(), MonitorStatus::Good);
        assert!(node.monitor_status_reason().is_none());
    }

    #[test]
    fn test_monitor_status_worst_wins() {
        let mut source = CountingSource::new(Duration::from_secs(1), 1);
        source.checks = vec![MonitorStatus::Good, MonitorStatus::Critical, MonitorStatus::Warning];
        let (node, _) = node_with(source, 1);
        assert_eq!(node.monitor_status(), MonitorStatus::Critical);
    }

    #[test]
    fn test_status_lists_caches_in_order() {
        let (node, _) = node_with(CountingSource::new(Duration::from_secs(1), 1), 1);
        let status = node.status();
        assert_eq!(status.kind, "Counting");
        let names: Vec<_> = status.caches.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["First", "Second"]);
        assert!(node.source::<CountingSource>().is_some());
    }
}

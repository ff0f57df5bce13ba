use super::cache::RefreshOutcome;
use super::node::{DataSource, PollNode};
use crate::core::error::RegistryError;
use crate::core::models::{MonitorStatus, NodeStatus};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Totals for one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub nodes: usize,
    pub throttled: usize,
    pub fetches_started: usize,
}

/// Every poll node in the process, keyed by name.
///
/// Built once at startup and then shared as `Arc<Registry>`; it is never
/// mutated afterwards, so reads take no lock.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: BTreeMap<String, Arc<PollNode>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node: PollNode) -> Result<Arc<PollNode>, RegistryError> {
        if self.nodes.contains_key(node.name()) {
            return Err(RegistryError::DuplicateName(node.name().to_string()));
        }

        tracing::debug!(node = %node.name(), kind = node.kind(), "Registered poll node");
        let node = Arc::new(node);
        self.nodes
            .insert(node.name().to_string(), Arc::clone(&node));
        Ok(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<PollNode>> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<PollNode>> {
        self.nodes.values()
    }

    /// Data sources of type `S`, paired with their node.
    pub fn sources<S: DataSource>(&self) -> impl Iterator<Item = (&PollNode, &S)> {
        self.nodes
            .values()
            .filter_map(|node| node.source::<S>().map(|source| (node.as_ref(), source)))
    }

    /// Polls every node once. Each node applies its own floor and each cache
    /// its own staleness check; fetches run in the background.
    pub fn tick(&self, force: bool) -> TickSummary {
        let mut summary = TickSummary {
            nodes: self.nodes.len(),
            ..TickSummary::default()
        };

        for node in self.nodes.values() {
            let poll = node.poll(force);
            if poll.throttled {
                summary.throttled += 1;
            }
            summary.fetches_started += poll.started;
        }

        if summary.fetches_started > 0 {
            tracing::debug!(
                nodes = summary.nodes,
                throttled = summary.throttled,
                started = summary.fetches_started,
                "Scheduler tick"
            );
        }
        summary
    }

    /// Refreshes every cache of every node and waits for completion.
    pub async fn refresh_all(&self) -> Vec<(String, String, RefreshOutcome)> {
        let mut outcomes = Vec::new();
        for node in self.nodes.values() {
            for (cache, outcome) in node.refresh_all().await {
                outcomes.push((node.name().to_string(), cache, outcome));
            }
        }
        outcomes
    }

    /// Folds over the cached state of every `S` source. Never fetches; the
    /// fold sees empty caches as they are and must treat them as no
    /// contribution.
    pub fn aggregate<S, B, F>(&self, init: B, mut fold: F) -> B
    where
        S: DataSource,
        F: FnMut(B, &S) -> B,
    {
        let mut acc = init;
        for (_, source) in self.sources::<S>() {
            acc = fold(acc, source);
        }
        acc
    }

    pub fn sum_by<S, F>(&self, selector: F) -> u64
    where
        S: DataSource,
        F: Fn(&S) -> u64,
    {
        self.aggregate::<S, _, _>(0u64, |total, source| {
            total.saturating_add(selector(source))
        })
    }

    pub fn monitor_status(&self) -> MonitorStatus {
        MonitorStatus::worst(self.nodes.values().map(|n| n.monitor_status()))
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.nodes.values().map(|n| n.status()).collect()
    }
}

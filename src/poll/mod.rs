//! The polling cache engine: timed slots, TTL caches, rate-limited nodes and
//! the registry that ticks them.

mod cache;
mod fetch;
mod node;
mod registry;
mod slot;

pub use cache::{AfterRefresh, PollCache, PollCacheBuilder, Poller, RefreshOutcome};
pub use fetch::{with_timeout, Fetcher};
pub use node::{DataSource, NodeGate, NodePoll, PollNode};
pub use registry::{Registry, TickSummary};
pub use slot::{Busy, Stamp, TimedSlot, UpdatePermit};

//! Periodic polling cache engine for monitoring dashboards.
//!
//! Backends are wrapped in [`poll::PollCache`]s, grouped per backend into
//! rate-limited [`poll::PollNode`]s and driven by a [`poll::Registry`].
//! Readers always get the last good value immediately; refreshes run in the
//! background and failures never reach them.

pub mod core;
pub mod exceptions;
pub mod poll;

mod dashboard;

pub use dashboard::Dashboard;

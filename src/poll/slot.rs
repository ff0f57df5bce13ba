use crate::core::error::FetchError;
use crate::core::models::ErrorInfo;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// A monotonic instant paired with the wall-clock time it was taken.
/// Staleness is measured on the monotonic half, reporting uses the other.
#[derive(Debug, Clone, Copy)]
pub struct Stamp {
    pub at: Instant,
    pub wall: DateTime<Utc>,
}

impl Stamp {
    pub fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.at.elapsed()
    }
}

struct SlotState<T> {
    value: Option<Arc<T>>,
    last_poll_attempt: Option<Stamp>,
    last_success: Option<Stamp>,
    last_error: Option<ErrorInfo>,
    polls_total: u64,
    polls_failed: u64,
}

impl<T> Default for SlotState<T> {
    fn default() -> Self {
        Self {
            value: None,
            last_poll_attempt: None,
            last_success: None,
            last_error: None,
            polls_total: 0,
            polls_failed: 0,
        }
    }
}

/// Returned by [`TimedSlot::begin_update`] when another refresh holds the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Busy;

/// A single cached value with its fetch bookkeeping.
///
/// The state lock is only ever held long enough to copy an `Arc` or a few
/// timestamps; the right to refresh is a separate atomic flag so a running
/// fetch never holds the lock.
pub struct TimedSlot<T> {
    state: RwLock<SlotState<T>>,
    in_flight: AtomicBool,
}

impl<T> Default for TimedSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimedSlot<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SlotState::default()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn read(&self) -> Option<Arc<T>> {
        self.state.read().value.clone()
    }

    pub fn has_value(&self) -> bool {
        self.state.read().value.is_some()
    }

    /// Stale when nothing has been cached yet or the last success is older
    /// than `ttl`.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        let state = self.state.read();
        match (&state.value, &state.last_success) {
            (Some(_), Some(success)) => success.elapsed() > ttl,
            _ => true,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn last_poll_attempt(&self) -> Option<Stamp> {
        self.state.read().last_poll_attempt
    }

    pub fn last_success(&self) -> Option<Stamp> {
        self.state.read().last_success
    }

    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.state.read().last_error.clone()
    }

    /// `(total attempts, failed attempts)`
    pub fn poll_counts(&self) -> (u64, u64) {
        let state = self.state.read();
        (state.polls_total, state.polls_failed)
    }

    /// Claims the right to refresh. Exactly one caller wins until the
    /// returned permit is committed or dropped.
    pub fn begin_update(self: &Arc<Self>) -> Result<UpdatePermit<T>, Busy> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Busy);
        }

        {
            let mut state = self.state.write();
            state.last_poll_attempt = Some(Stamp::now());
            state.polls_total = state.polls_total.saturating_add(1);
        }

        Ok(UpdatePermit {
            slot: Arc::clone(self),
            committed: false,
        })
    }
}

/// Exclusive right to refresh a [`TimedSlot`]. Dropping it without
/// committing releases the claim and leaves the cached state untouched.
pub struct UpdatePermit<T> {
    slot: Arc<TimedSlot<T>>,
    committed: bool,
}

impl<T> UpdatePermit<T> {
    /// Records the outcome of a fetch while keeping the claim. On success
    /// the new value replaces the old one and is returned; on failure the
    /// old value stays and the error is handed back to the caller.
    pub fn record(&mut self, result: Result<T, FetchError>) -> Result<Arc<T>, FetchError> {
        self.committed = true;
        let mut state = self.slot.state.write();
        match result {
            Ok(value) => {
                let value = Arc::new(value);
                state.value = Some(Arc::clone(&value));
                state.last_success = Some(Stamp::now());
                state.last_error = None;
                Ok(value)
            }
            Err(err) => {
                state.last_error = Some(ErrorInfo {
                    message: err.to_string(),
                    at: Utc::now(),
                });
                state.polls_failed = state.polls_failed.saturating_add(1);
                Err(err)
            }
        }
    }

    /// [`record`](Self::record) and release the claim.
    pub fn commit(mut self, result: Result<T, FetchError>) -> Result<Arc<T>, FetchError> {
        self.record(result)
    }
}

impl<T> Drop for UpdatePermit<T> {
    fn drop(&mut self) {
        if !self.committed {
            tracing::debug!("Refresh abandoned before commit, releasing slot");
        }
        self.slot.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Count {
        count: u32,
    }

    #[test]
    fn test_empty_slot_reads_none() {
        let slot: TimedSlot<Count> = TimedSlot::new();
        assert!(slot.read().is_none());
        assert!(slot.is_stale(Duration::from_secs(60)));
        assert!(!slot.in_flight());
    }

    #[test]
    fn test_second_claim_is_busy() {
        let slot = Arc::new(TimedSlot::<Count>::new());

        let permit = slot.begin_update().expect("first claim");
        assert!(slot.in_flight());
        assert_eq!(slot.begin_update().err(), Some(Busy));

        drop(permit);
        assert!(!slot.in_flight());
        assert!(slot.begin_update().is_ok());
    }

    #[test]
    fn test_commit_success_replaces_value() {
        let slot = Arc::new(TimedSlot::new());

        let permit = slot.begin_update().unwrap();
        let value = permit.commit(Ok(Count { count: 5 })).unwrap();
        assert_eq!(value.count, 5);
        assert_eq!(slot.read().unwrap().count, 5);
        assert!(slot.last_success().is_some());
        assert!(slot.last_error().is_none());
        assert!(!slot.in_flight());
    }

    #[test]
    fn test_failed_commit_preserves_value() {
        let slot = Arc::new(TimedSlot::new());
        slot.begin_update()
            .unwrap()
            .commit(Ok(Count { count: 5 }))
            .unwrap();

        let result = slot
            .begin_update()
            .unwrap()
            .commit(Err(FetchError::backend("deadlock victim")));

        assert!(result.is_err());
        assert_eq!(*slot.read().unwrap(), Count { count: 5 });
        let error = slot.last_error().unwrap();
        assert!(error.message.contains("deadlock victim"));
        assert_eq!(slot.poll_counts(), (2, 1));
        assert!(!slot.in_flight());
    }

    #[test]
    fn test_success_clears_previous_error() {
        let slot = Arc::new(TimedSlot::new());
        let _ = slot
            .begin_update()
            .unwrap()
            .commit(Err(FetchError::backend("down")));
        assert!(slot.last_error().is_some());
        assert!(slot.read().is_none());

        slot.begin_update()
            .unwrap()
            .commit(Ok(Count { count: 1 }))
            .unwrap();
        assert!(slot.last_error().is_none());
    }

    #[test]
    fn test_record_holds_claim_until_dropped() {
        let slot = Arc::new(TimedSlot::new());

        let mut permit = slot.begin_update().unwrap();
        permit.record(Ok(Count { count: 3 })).unwrap();
        assert_eq!(slot.read().unwrap().count, 3);
        assert!(slot.in_flight());
        assert_eq!(slot.begin_update().err(), Some(Busy));

        drop(permit);
        assert!(!slot.in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_follows_ttl() {
        let slot = Arc::new(TimedSlot::new());
        slot.begin_update()
            .unwrap()
            .commit(Ok(Count { count: 1 }))
            .unwrap();

        let ttl = Duration::from_secs(30);
        assert!(!slot.is_stale(ttl));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(slot.is_stale(ttl));
        assert_eq!(slot.read().unwrap().count, 1);
    }
}

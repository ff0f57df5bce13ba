use opwatch::poll::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Drives [`Registry::tick`] at a fixed cadence. Ticks never wait for
/// fetches; each node and cache decides whether anything actually runs.
pub struct PollingLoop {
    registry: Arc<Registry>,
    tick: Duration,
    refresh_tx: Option<mpsc::UnboundedSender<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl PollingLoop {
    pub fn new(registry: Arc<Registry>, tick: Duration) -> Self {
        Self {
            registry,
            tick,
            refresh_tx: None,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.handle = Some(tokio::spawn(run_loop(
            Arc::clone(&self.registry),
            self.tick,
            refresh_rx,
            shutdown_rx,
        )));
        self.refresh_tx = Some(refresh_tx);
        self.shutdown_tx = Some(shutdown_tx);

        tracing::info!(
            interval_ms = self.tick.as_millis() as u64,
            nodes = self.registry.len(),
            "Polling loop started"
        );
    }

    /// Forces a poll of every node on the next loop iteration, bypassing
    /// node floors and TTLs.
    pub fn trigger_refresh(&self) {
        if let Some(tx) = &self.refresh_tx {
            let _ = tx.send(());
        }
    }

    /// Stops ticking. Fetches already in flight are abandoned.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        self.refresh_tx = None;
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Polling loop ended abnormally");
            }
        }
        tracing::info!("Polling loop stopped");
    }
}

async fn run_loop(
    registry: Arc<Registry>,
    tick: Duration,
    mut refresh_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                registry.tick(false);
            }
            Some(()) = refresh_rx.recv() => {
                let summary = registry.tick(true);
                tracing::info!(started = summary.fetches_started, "Forced refresh");
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

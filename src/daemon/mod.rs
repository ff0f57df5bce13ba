mod polling;

use anyhow::Result;
use opwatch::core::settings::Settings;
use opwatch::exceptions;
use opwatch::Dashboard;
use std::time::Duration;

pub use polling::PollingLoop;

pub async fn run(settings: Settings) -> Result<()> {
    tracing::info!("Starting opwatch daemon");

    let dashboard = Dashboard::from_settings(&settings)?;
    if dashboard.registry.is_empty() {
        tracing::warn!("No poll nodes configured, the daemon will idle");
    }

    let mut polling = PollingLoop::new(dashboard.registry.clone(), settings.scheduler.tick());
    polling.start();

    let summary_every = match settings.scheduler.summary_seconds {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let mut summary = tokio::time::interval(summary_every.unwrap_or(Duration::from_secs(3600)));
    summary.tick().await;

    let mut hangup = HangupSignal::new()?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, forcing refresh");
                polling.trigger_refresh();
            }
            _ = summary.tick(), if summary_every.is_some() => {
                log_summary(&dashboard);
            }
        }
    }

    polling.stop().await;
    tracing::info!("opwatch daemon stopped");
    Ok(())
}

fn log_summary(dashboard: &Dashboard) {
    let totals = exceptions::totals(&dashboard.registry);
    let statuses = dashboard.registry.statuses();
    let failing = statuses
        .iter()
        .flat_map(|node| node.caches.iter())
        .filter(|cache| cache.last_error.is_some())
        .count();
    let empty = statuses
        .iter()
        .flat_map(|node| node.caches.iter())
        .filter(|cache| !cache.has_data)
        .count();

    tracing::info!(
        nodes = statuses.len(),
        status = dashboard.registry.monitor_status().label(),
        exceptions = totals.total,
        recent = totals.recent,
        failing_caches = failing,
        empty_caches = empty,
        groups = dashboard.applications.groups().len(),
        "Dashboard summary"
    );
}

#[cfg(unix)]
struct HangupSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl HangupSignal {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self(signal(SignalKind::hangup())?))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct HangupSignal;

#[cfg(not(unix))]
impl HangupSignal {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::{DEFAULT_HEALTH_PATH, HEALTH_INTERVAL_SECS, HEALTH_TIMEOUT_SECS};
use crate::providers::backend::join_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Connected,
    Disconnected,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Connected => "connected",
            HealthStatus::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub base_url: String,
    pub path: String,
    pub timeout: Duration,
    pub interval: Duration,
}

impl HealthSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: DEFAULT_HEALTH_PATH.to_string(),
            timeout: Duration::from_secs(HEALTH_TIMEOUT_SECS),
            interval: Duration::from_secs(HEALTH_INTERVAL_SECS),
        }
    }

    pub fn url(&self) -> String {
        join_url(&self.base_url, &self.path)
    }
}

/// One GET against the liveness path. 2xx is connected; anything else,
/// including a timeout, is disconnected.
pub async fn probe(client: &reqwest::Client, settings: &HealthSettings) -> HealthStatus {
    let request = client.get(settings.url()).timeout(settings.timeout).send();
    match tokio::time::timeout(settings.timeout, request).await {
        Ok(Ok(res)) if res.status().is_success() => HealthStatus::Connected,
        Ok(Ok(res)) => {
            log::debug!("health probe returned {}", res.status());
            HealthStatus::Disconnected
        }
        Ok(Err(err)) => {
            log::debug!("health probe failed: {err}");
            HealthStatus::Disconnected
        }
        Err(_) => {
            log::debug!("health probe timed out after {:?}", settings.timeout);
            HealthStatus::Disconnected
        }
    }
}

/// Handle to a running monitor. Dropping it stops the task as well.
#[derive(Debug)]
pub struct HealthMonitorHandle {
    pub updates: watch::Receiver<HealthStatus>,
    shutdown_tx: watch::Sender<bool>,
}

impl HealthMonitorHandle {
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn current(&self) -> HealthStatus {
        *self.updates.borrow()
    }
}

/// Probe on a fixed interval in the background, publishing each result.
pub fn spawn_health_monitor(settings: HealthSettings) -> HealthMonitorHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (update_tx, update_rx) = watch::channel(HealthStatus::Unknown);

    tokio::spawn(monitor_loop(settings, update_tx, shutdown_rx));

    HealthMonitorHandle {
        updates: update_rx,
        shutdown_tx,
    }
}

async fn monitor_loop(
    settings: HealthSettings,
    update_tx: watch::Sender<HealthStatus>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let client = reqwest::Client::new();
    let mut tick = tokio::time::interval(settings.interval.max(Duration::from_millis(10)));

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            _ = tick.tick() => {
                let status = probe(&client, &settings).await;
                let previous = *update_tx.borrow();
                if previous != status {
                    log::info!("backend {}", status.as_str());
                }
                let _ = update_tx.send(status);
            }
        }
    }
}

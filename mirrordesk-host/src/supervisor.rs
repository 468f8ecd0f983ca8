//! Device polling loop and status reporting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mirrordesk_core::MirrorError;

use crate::config::HostConfig;
use crate::decode::Frame;
use crate::device::DeviceProvider;
use crate::reconciler::{DeviceSetReconciler, ReconcileOutcome};
use crate::session::DeviceStreamState;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

// ── Supervisor ───────────────────────────────────────────────────

/// Polls the device provider and keeps the reconciler in step with it.
pub struct Supervisor {
    provider: Arc<dyn DeviceProvider>,
    reconciler: DeviceSetReconciler,
    poll_interval: Duration,
    status_interval: Duration,
    status_enabled: bool,
    names: HashMap<String, String>,
}

impl Supervisor {
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        reconciler: DeviceSetReconciler,
        config: &HostConfig,
    ) -> Self {
        Self {
            provider,
            reconciler,
            poll_interval: Duration::from_millis(config.adb.poll_interval_ms).max(MIN_INTERVAL),
            status_interval: Duration::from_millis(config.status.interval_ms).max(MIN_INTERVAL),
            status_enabled: config.status.enabled,
            names: HashMap::new(),
        }
    }

    pub fn reconciler(&self) -> &DeviceSetReconciler {
        &self.reconciler
    }

    /// Display names from the latest successful poll.
    pub fn known_names(&self) -> &HashMap<String, String> {
        &self.names
    }

    /// One enumeration plus reconcile.
    ///
    /// An enumeration failure leaves the running sessions untouched.
    pub async fn poll_once(&mut self) -> Result<ReconcileOutcome, MirrorError> {
        let devices = self.provider.list_devices().await?;
        self.names = devices
            .iter()
            .map(|d| (d.id.clone(), d.display_name().to_string()))
            .collect();
        Ok(self.reconciler.reconcile(&devices).await)
    }

    /// Poll and report until `shutdown` fires, then stop every session.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut status = tokio::time::interval(self.status_interval);
        status.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            "supervisor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("device poll failed: {e}");
                    }
                }
                _ = status.tick(), if self.status_enabled => self.print_status(),
            }
        }

        let stopped = self.reconciler.shutdown().await;
        info!(sessions = stopped.len(), "supervisor stopped");
    }

    /// Single pass: poll, wait for first frames, report, shut down.
    pub async fn run_once(&mut self) -> Result<(), MirrorError> {
        let outcome = self.poll_once().await;

        if outcome.is_ok() {
            let waits = self
                .reconciler
                .subscriptions()
                .into_values()
                .map(|mut rx| async move {
                    let _ = rx
                        .wait_for(|s| s.frames_received > 0 || !s.running)
                        .await;
                });
            let _ = tokio::time::timeout(self.status_interval, join_all(waits)).await;
            self.print_status();
        }

        self.reconciler.shutdown().await;
        outcome.map(|_| ())
    }

    /// One line per session, sorted by device.
    pub fn status_lines(&self) -> Vec<String> {
        self.reconciler
            .snapshot()
            .iter()
            .map(|(id, state)| {
                let name = self.names.get(id).map(String::as_str).unwrap_or(id);
                format_status(id, name, state)
            })
            .collect()
    }

    fn print_status(&self) {
        let lines = self.status_lines();
        if lines.is_empty() {
            println!("no attachable devices");
        }
        for line in lines {
            println!("{line}");
        }
    }
}

// ── Formatting ───────────────────────────────────────────────────

/// Render one device's status line.
pub fn format_status(id: &str, name: &str, state: &DeviceStreamState) -> String {
    let label = if name == id {
        id.to_string()
    } else {
        format!("{id} ({name})")
    };

    let phase = match (&state.error, state.running) {
        (Some(e), _) => format!("error: {e}"),
        (None, true) => "running".to_string(),
        (None, false) => "stopped".to_string(),
    };

    let mut line = format!(
        "{label}: {phase}, {} frames, {}",
        state.frames_received,
        human_bytes(state.bytes_received)
    );

    if let Some(h) = &state.header {
        line.push_str(&format!(", {} {}x{}", h.codec_id, h.width, h.height));
    } else if let Some((w, h)) = state.last_frame.as_deref().map(Frame::dimensions) {
        line.push_str(&format!(", {w}x{h}"));
    }
    line
}

fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

// ── Tests ────────────────────────────────────────────────────────

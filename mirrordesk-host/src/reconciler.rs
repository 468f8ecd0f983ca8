//! Keeps one stream session per attachable device.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::info;

use crate::config::StreamConfig;
use crate::device::DeviceInfo;
use crate::launcher::CaptureLauncher;
use crate::session::{DeviceStreamSession, DeviceStreamState};

/// Which sessions one reconcile pass started and stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// Sole owner of the device → session table.
pub struct DeviceSetReconciler {
    launcher: Arc<dyn CaptureLauncher>,
    limits: StreamConfig,
    sessions: BTreeMap<String, DeviceStreamSession>,
}

impl DeviceSetReconciler {
    pub fn new(launcher: Arc<dyn CaptureLauncher>, limits: StreamConfig) -> Self {
        Self {
            launcher,
            limits,
            sessions: BTreeMap::new(),
        }
    }

    /// Start sessions for newly attachable devices and stop sessions
    /// whose device is gone or no longer attachable.
    ///
    /// Removed sessions are stopped concurrently and fully torn down
    /// before this returns.
    pub async fn reconcile(&mut self, devices: &[DeviceInfo]) -> ReconcileOutcome {
        let desired: BTreeSet<&str> = devices
            .iter()
            .filter(|d| d.is_attachable())
            .map(|d| d.id.as_str())
            .collect();

        let stale: Vec<String> = self
            .sessions
            .keys()
            .filter(|id| !desired.contains(id.as_str()))
            .cloned()
            .collect();
        let mut removed: Vec<DeviceStreamSession> = stale
            .iter()
            .filter_map(|id| self.sessions.remove(id))
            .collect();
        join_all(removed.iter_mut().map(|s| s.stop())).await;

        let mut started = Vec::new();
        for id in desired {
            if self.sessions.contains_key(id) {
                continue;
            }
            let mut session =
                DeviceStreamSession::new(id, Arc::clone(&self.launcher), self.limits.clone());
            session.start();
            self.sessions.insert(id.to_string(), session);
            started.push(id.to_string());
        }

        let outcome = ReconcileOutcome {
            started,
            stopped: stale,
        };
        if !outcome.is_empty() {
            info!(
                started = ?outcome.started,
                stopped = ?outcome.stopped,
                active = self.sessions.len(),
                "devices reconciled"
            );
        }
        outcome
    }

    /// Device identifiers with a session, in order.
    pub fn device_ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// State receivers keyed by device, for a presentation layer.
    pub fn subscriptions(&self) -> BTreeMap<String, watch::Receiver<DeviceStreamState>> {
        self.sessions
            .iter()
            .map(|(id, s)| (id.clone(), s.subscribe()))
            .collect()
    }

    /// Current state of every session.
    pub fn snapshot(&self) -> BTreeMap<String, DeviceStreamState> {
        self.sessions
            .iter()
            .map(|(id, s)| (id.clone(), s.state()))
            .collect()
    }

    /// Stop and remove every session.
    pub async fn shutdown(&mut self) -> Vec<String> {
        let mut sessions = std::mem::take(&mut self.sessions);
        join_all(sessions.values_mut().map(|s| s.stop())).await;
        sessions.into_keys().collect()
    }
}

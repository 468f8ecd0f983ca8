//! Port tunnels between host TCP ports and device-local sockets.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use mirrordesk_core::MirrorError;

use crate::adb::Adb;

const TUNNEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Exposes a device's named local socket on a host-reachable port.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Host `tcp:<port>` → device `localabstract:<socket>`.
    async fn forward(&self, serial: &str, port: u16, socket: &str) -> Result<(), MirrorError>;

    async fn remove_forward(&self, serial: &str, port: u16) -> Result<(), MirrorError>;
}

/// Argument lists for each tunnel operation.
pub(crate) mod args {
    pub fn forward(port: u16, socket: &str) -> Vec<String> {
        vec![
            "forward".into(),
            format!("tcp:{port}"),
            format!("localabstract:{socket}"),
        ]
    }

    pub fn remove_forward(port: u16) -> Vec<String> {
        vec!["forward".into(), "--remove".into(), format!("tcp:{port}")]
    }
}

/// Tunnels through `adb forward`.
#[derive(Debug, Clone)]
pub struct AdbTunnel {
    adb: Adb,
}

impl AdbTunnel {
    pub fn new(adb: Adb) -> Self {
        Self { adb }
    }

    async fn run(&self, serial: &str, args: Vec<String>) -> Result<(), MirrorError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.adb
            .output(Some(serial), &args, TUNNEL_TIMEOUT)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl TunnelProvider for AdbTunnel {
    async fn forward(&self, serial: &str, port: u16, socket: &str) -> Result<(), MirrorError> {
        self.run(serial, args::forward(port, socket)).await?;
        info!(serial, port, socket, "forward established");
        Ok(())
    }

    async fn remove_forward(&self, serial: &str, port: u16) -> Result<(), MirrorError> {
        self.run(serial, args::remove_forward(port)).await
    }
}

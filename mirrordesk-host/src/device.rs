//! Device enumeration.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use mirrordesk_core::MirrorError;

use crate::adb::Adb;

// ── DeviceState ──────────────────────────────────────────────────

/// Readiness reported by the device bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// Online and authorized; the only attachable state.
    Device,
    Offline,
    Unauthorized,
    Other(String),
}

impl DeviceState {
    pub fn parse(s: &str) -> Self {
        match s {
            "device" => DeviceState::Device,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            other => DeviceState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Device => f.write_str("device"),
            DeviceState::Offline => f.write_str("offline"),
            DeviceState::Unauthorized => f.write_str("unauthorized"),
            DeviceState::Other(s) => f.write_str(s),
        }
    }
}

// ── DeviceInfo ───────────────────────────────────────────────────

/// One enumerated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub state: DeviceState,
    pub model: Option<String>,
    pub device: Option<String>,
    pub product: Option<String>,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, state: DeviceState) -> Self {
        Self {
            id: id.into(),
            state,
            model: None,
            device: None,
            product: None,
        }
    }

    /// First available of model, device name, product, identifier.
    pub fn display_name(&self) -> &str {
        self.model
            .as_deref()
            .or(self.device.as_deref())
            .or(self.product.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn is_attachable(&self) -> bool {
        self.state == DeviceState::Device
    }
}

/// Parse the table printed by `adb devices -l`.
///
/// Rows before the `List of devices attached` banner are ignored, as
/// are rows without a state column.
pub fn parse_adb_devices(output: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();
    let mut in_table = false;

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !in_table {
            in_table = line.starts_with("List of devices attached");
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(serial), Some(state)) = (parts.next(), parts.next()) else {
            continue;
        };

        let props: HashMap<&str, &str> = parts
            .filter_map(|token| token.split_once(':'))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();

        devices.push(DeviceInfo {
            id: serial.to_string(),
            state: DeviceState::parse(state),
            model: props.get("model").map(|s| s.to_string()),
            device: props.get("device").map(|s| s.to_string()),
            product: props.get("product").map(|s| s.to_string()),
        });
    }

    devices
}

// ── DeviceProvider ───────────────────────────────────────────────

/// Source of the current device list.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, MirrorError>;
}

/// Enumerates devices with `adb devices -l`.
pub struct AdbDeviceProvider {
    adb: Adb,
    timeout: Duration,
}

impl AdbDeviceProvider {
    pub fn new(adb: Adb, timeout: Duration) -> Self {
        Self { adb, timeout }
    }
}

#[async_trait]
impl DeviceProvider for AdbDeviceProvider {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, MirrorError> {
        let out = self
            .adb
            .output(None, &["devices", "-l"], self.timeout)
            .await?;
        Ok(parse_adb_devices(&out))
    }
}

// ── Tests ────────────────────────────────────────────────────────

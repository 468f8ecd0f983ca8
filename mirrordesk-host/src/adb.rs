//! adb invocation helpers.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use mirrordesk_core::MirrorError;

/// Resolve the adb binary: explicit config, then `$ADB`, then
/// `$ADB_PATH`, then `adb` from `PATH`.
pub fn resolve_adb(configured: &str) -> PathBuf {
    resolve_with(configured, |key| std::env::var(key).ok())
}

fn resolve_with(configured: &str, env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if !configured.trim().is_empty() {
        return PathBuf::from(configured);
    }
    ["ADB", "ADB_PATH"]
        .into_iter()
        .filter_map(|key| env(key))
        .find(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("adb"))
}

/// A resolved adb binary.
#[derive(Debug, Clone)]
pub struct Adb {
    path: PathBuf,
}

impl Adb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(configured: &str) -> Self {
        Self::new(resolve_adb(configured))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// A command addressed at one device (`adb -s <serial> ...`).
    pub fn device_command(&self, serial: &str) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.arg("-s").arg(serial);
        cmd
    }

    /// Run adb to completion and return its stdout.
    ///
    /// A non-zero exit status or running past `timeout` is a
    /// [`MirrorError::Subprocess`].
    pub async fn output(
        &self,
        serial: Option<&str>,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, MirrorError> {
        let mut cmd = match serial {
            Some(s) => self.device_command(s),
            None => Command::new(&self.path),
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(adb = %self.path.display(), ?serial, ?args, "running adb");
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| MirrorError::Subprocess(format!("adb {} timed out", args.join(" "))))?
            .map_err(|e| MirrorError::Subprocess(format!("{}: {e}", self.path.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MirrorError::Subprocess(format!(
                "adb {} failed ({}): {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

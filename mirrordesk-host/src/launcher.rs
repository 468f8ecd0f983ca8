//! Capture process launchers.
//!
//! A [`CaptureLauncher`] starts whatever produces a device's byte
//! stream and hands back a [`CaptureProcess`]: the readable stream plus
//! the means to tear the producer down again.

use std::io::Cursor;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::process::Child;
use tracing::{debug, info, warn};

use mirrordesk_core::MirrorError;

use crate::adb::Adb;
use crate::config::{CaptureMode, DeviceServerConfig};
use crate::tunnel::TunnelProvider;

/// Device shell loop that prints one PNG screenshot after another.
pub const IMAGE_LOOP_SCRIPT: &str = "'while true; do screencap -p; done'";

const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

pub type CaptureReader = Box<dyn AsyncRead + Send + Unpin>;

// ── CaptureProcess ───────────────────────────────────────────────

/// A running capture: its output stream and what keeps it alive.
pub struct CaptureProcess {
    reader: CaptureReader,
    guard: ProcessGuard,
}

/// Owns the producer side of a capture.
///
/// [`terminate`](Self::terminate) kills the child and waits for it,
/// then runs any cleanup. Dropping without terminating still kills the
/// child (`kill_on_drop`) but skips the cleanup.
#[derive(Default)]
pub struct ProcessGuard {
    child: Option<Child>,
    cleanup: Option<BoxFuture<'static, ()>>,
}

impl CaptureProcess {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            guard: ProcessGuard::default(),
        }
    }

    pub fn with_child(mut self, child: Child) -> Self {
        self.guard.child = Some(child);
        self
    }

    pub fn with_cleanup(mut self, cleanup: BoxFuture<'static, ()>) -> Self {
        self.guard.cleanup = Some(cleanup);
        self
    }

    pub fn into_parts(self) -> (CaptureReader, ProcessGuard) {
        (self.reader, self.guard)
    }
}

impl ProcessGuard {
    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    pub async fn terminate(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("capture process already exited: {e}");
            }
        }
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.await;
        }
    }
}

// ── CaptureLauncher ──────────────────────────────────────────────

/// Starts the capture producer for one device.
#[async_trait]
pub trait CaptureLauncher: Send + Sync {
    /// Which decoder the produced stream needs.
    fn mode(&self) -> CaptureMode;

    async fn launch(&self, device_id: &str) -> Result<CaptureProcess, MirrorError>;
}

// ── AdbImageLoopLauncher ─────────────────────────────────────────

/// Repeated `screencap -p` over `adb exec-out`.
#[derive(Debug, Clone)]
pub struct AdbImageLoopLauncher {
    adb: Adb,
}

impl AdbImageLoopLauncher {
    pub fn new(adb: Adb) -> Self {
        Self { adb }
    }
}

#[async_trait]
impl CaptureLauncher for AdbImageLoopLauncher {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Image
    }

    async fn launch(&self, device_id: &str) -> Result<CaptureProcess, MirrorError> {
        let mut child = self
            .adb
            .device_command(device_id)
            .args(["exec-out", "sh", "-c", IMAGE_LOOP_SCRIPT])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MirrorError::Subprocess(format!("{}: {e}", self.adb.path().display())))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MirrorError::Subprocess("capture stdout unavailable".into()))?;

        info!(device = device_id, "image loop started");
        Ok(CaptureProcess::new(stdout).with_child(child))
    }
}

// ── AdbServerLauncher ────────────────────────────────────────────

/// Starts the device server and connects to it through a forward.
///
/// Each launch takes the next host port from `base_port`, so a restart
/// never races the previous forward.
pub struct AdbServerLauncher {
    adb: Adb,
    tunnel: Arc<dyn TunnelProvider>,
    config: DeviceServerConfig,
    server_args: Vec<String>,
    next_port: AtomicU16,
}

impl AdbServerLauncher {
    pub fn new(
        adb: Adb,
        tunnel: Arc<dyn TunnelProvider>,
        config: DeviceServerConfig,
        server_args: Vec<String>,
    ) -> Self {
        Self {
            next_port: AtomicU16::new(config.base_port),
            adb,
            tunnel,
            config,
            server_args,
        }
    }

    fn allocate_port(&self) -> u16 {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        if port == u16::MAX {
            self.next_port.store(self.config.base_port, Ordering::SeqCst);
        }
        port
    }

    /// Connect through the forward and wait for the first byte.
    ///
    /// adb accepts on the host port before the device socket exists and
    /// then closes at once, so a connection only counts once a byte has
    /// arrived. That byte is replayed in front of the stream.
    async fn connect(&self, port: u16) -> Result<CaptureReader, MirrorError> {
        let retry = Duration::from_millis(self.config.connect_retry_ms);
        let attempts = self.config.connect_attempts.max(1);
        let mut last_err = MirrorError::Other("no connection attempt made".into());

        for attempt in 1..=attempts {
            match Self::connect_first_byte(port, retry.max(Duration::from_millis(100))).await {
                Ok(reader) => return Ok(reader),
                Err(e) => {
                    debug!(port, attempt, "device server not ready: {e}");
                    last_err = e;
                }
            }
            tokio::time::sleep(retry).await;
        }

        Err(MirrorError::Subprocess(format!(
            "device server unreachable on port {port} after {attempts} attempts: {last_err}"
        )))
    }

    async fn connect_first_byte(port: u16, wait: Duration) -> Result<CaptureReader, MirrorError> {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let mut first = [0u8; 1];
        let n = tokio::time::timeout(wait, stream.read(&mut first))
            .await
            .map_err(|_| MirrorError::Timeout(wait))??;
        if n == 0 {
            return Err(MirrorError::StreamEnded);
        }
        Ok(Box::new(Cursor::new(first.to_vec()).chain(stream)))
    }
}

#[async_trait]
impl CaptureLauncher for AdbServerLauncher {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Encoded
    }

    async fn launch(&self, device_id: &str) -> Result<CaptureProcess, MirrorError> {
        let cfg = &self.config;

        if !cfg.push_from.is_empty() {
            self.adb
                .output(
                    Some(device_id),
                    &["push", &cfg.push_from, &cfg.device_path],
                    PUSH_TIMEOUT,
                )
                .await?;
        }

        let port = self.allocate_port();
        self.tunnel
            .forward(device_id, port, &cfg.socket_name)
            .await?;

        let tunnel = Arc::clone(&self.tunnel);
        let serial = device_id.to_string();
        let cleanup: BoxFuture<'static, ()> = Box::pin(async move {
            if let Err(e) = tunnel.remove_forward(&serial, port).await {
                warn!(device = %serial, port, "forward removal failed: {e}");
            }
        });

        let spawned = self
            .adb
            .device_command(device_id)
            .arg("shell")
            .arg(&cfg.device_path)
            .args(&self.server_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                cleanup.await;
                return Err(MirrorError::Subprocess(format!(
                    "{}: {e}",
                    self.adb.path().display()
                )));
            }
        };

        let reader = match self.connect(port).await {
            Ok(reader) => reader,
            Err(e) => {
                ProcessGuard {
                    child: Some(child),
                    cleanup: Some(cleanup),
                }
                .terminate()
                .await;
                return Err(e);
            }
        };

        info!(device = device_id, port, "device server connected");
        Ok(CaptureProcess {
            reader,
            guard: ProcessGuard {
                child: Some(child),
                cleanup: Some(cleanup),
            },
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct RecordingTunnel {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TunnelProvider for RecordingTunnel {
        async fn forward(&self, serial: &str, port: u16, socket: &str) -> Result<(), MirrorError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("forward {serial} {port} {socket}"));
            Ok(())
        }

        async fn remove_forward(&self, serial: &str, port: u16) -> Result<(), MirrorError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("remove {serial} {port}"));
            Ok(())
        }
    }

    fn server_config(base_port: u16) -> DeviceServerConfig {
        DeviceServerConfig {
            base_port,
            connect_attempts: 3,
            connect_retry_ms: 20,
            ..DeviceServerConfig::default()
        }
    }

    #[tokio::test]
    async fn first_byte_is_replayed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            s.write_all(b"\x00h264").await.unwrap();
        });

        let mut reader = AdbServerLauncher::connect_first_byte(port, Duration::from_secs(2))
            .await
            .unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"\x00h264");
    }

    #[tokio::test]
    async fn immediate_close_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (s, _) = listener.accept().await.unwrap();
            drop(s);
        });

        let err = AdbServerLauncher::connect_first_byte(port, Duration::from_secs(2))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MirrorError::StreamEnded));
    }

    #[test]
    fn ports_advance_per_launch() {
        let launcher = AdbServerLauncher::new(
            Adb::new("adb"),
            Arc::new(RecordingTunnel::default()),
            server_config(40000),
            Vec::new(),
        );
        assert_eq!(launcher.allocate_port(), 40000);
        assert_eq!(launcher.allocate_port(), 40001);
    }

    #[tokio::test]
    async fn failed_server_spawn_is_a_subprocess_error() {
        let tunnel = Arc::new(RecordingTunnel::default());
        let launcher = AdbServerLauncher::new(
            Adb::new("/nonexistent/adb"),
            tunnel.clone(),
            server_config(40100),
            Vec::new(),
        );
        let err = launcher.launch("serial1").await.err().unwrap();
        assert!(matches!(err, MirrorError::Subprocess(_)));
        assert_eq!(
            tunnel.calls.lock().unwrap().as_slice(),
            ["forward serial1 40100 mirrordesk_demo", "remove serial1 40100"]
        );
    }

    #[tokio::test]
    async fn guard_runs_cleanup_on_terminate() {
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        let process = CaptureProcess::new(tokio::io::empty()).with_cleanup(Box::pin(async move {
            *flag.lock().unwrap() = true;
        }));
        let (_reader, guard) = process.into_parts();
        assert!(!guard.has_child());
        guard.terminate().await;
        assert!(*ran.lock().unwrap());
    }
}

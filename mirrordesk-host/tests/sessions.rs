//! Sessions and reconciliation against an in-memory capture launcher.

mod common;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::watch;

use mirrordesk_core::protocol::{write_frame, write_header, write_sync_byte};
use mirrordesk_core::{CodecId, FrameKind, MirrorError, StreamHeader};
use mirrordesk_host::config::{HostConfig, StreamConfig};
use mirrordesk_host::{
    CaptureLauncher, CaptureMode, CaptureProcess, DeviceInfo, DeviceProvider, DeviceSetReconciler,
    DeviceState, DeviceStreamSession, DeviceStreamState, Supervisor,
};

// ── Fake launcher ────────────────────────────────────────────────

/// Hands out duplex pipes that stay open until the session ends, and
/// counts live "processes".
#[derive(Default)]
struct PipeLauncher {
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    launches: Mutex<HashMap<String, usize>>,
    device_ends: Mutex<Vec<DuplexStream>>,
}

impl PipeLauncher {
    fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn launches(&self, id: &str) -> usize {
        self.launches.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CaptureLauncher for PipeLauncher {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Image
    }

    async fn launch(&self, device_id: &str) -> Result<CaptureProcess, MirrorError> {
        *self
            .launches
            .lock()
            .unwrap()
            .entry(device_id.to_string())
            .or_default() += 1;

        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);

        let (device, host) = tokio::io::duplex(1024);
        self.device_ends.lock().unwrap().push(device);

        let live = Arc::clone(&self.live);
        Ok(CaptureProcess::new(host).with_cleanup(Box::pin(async move {
            live.fetch_sub(1, Ordering::SeqCst);
        })))
    }
}

/// Serves one prerecorded encoded stream.
struct RecordedLauncher {
    bytes: Vec<u8>,
}

#[async_trait]
impl CaptureLauncher for RecordedLauncher {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Encoded
    }

    async fn launch(&self, _device_id: &str) -> Result<CaptureProcess, MirrorError> {
        Ok(CaptureProcess::new(std::io::Cursor::new(self.bytes.clone())))
    }
}

/// Serves an encoded stream the test writes to as it goes.
#[derive(Default)]
struct PacedLauncher {
    device: tokio::sync::Mutex<Option<DuplexStream>>,
    launched: tokio::sync::Notify,
}

impl PacedLauncher {
    /// The writable end of the first launched stream.
    async fn device_end(&self) -> DuplexStream {
        loop {
            let notified = self.launched.notified();
            if let Some(device) = self.device.lock().await.take() {
                return device;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl CaptureLauncher for PacedLauncher {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Encoded
    }

    async fn launch(&self, _device_id: &str) -> Result<CaptureProcess, MirrorError> {
        let (device, host) = tokio::io::duplex(4096);
        *self.device.lock().await = Some(device);
        self.launched.notify_one();
        Ok(CaptureProcess::new(host))
    }
}

/// Answers each poll from a queue; `None` is an enumeration failure.
struct QueuedProvider {
    polls: Mutex<VecDeque<Option<Vec<DeviceInfo>>>>,
}

#[async_trait]
impl DeviceProvider for QueuedProvider {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, MirrorError> {
        match self.polls.lock().unwrap().pop_front().flatten() {
            Some(devices) => Ok(devices),
            None => Err(MirrorError::Subprocess("adb devices timed out".into())),
        }
    }
}

fn ready(id: &str) -> DeviceInfo {
    DeviceInfo::new(id, DeviceState::Device)
}

async fn wait_until(
    rx: &mut watch::Receiver<DeviceStreamState>,
    cond: impl FnMut(&DeviceStreamState) -> bool,
) -> DeviceStreamState {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(cond))
        .await
        .expect("timeout")
        .expect("sender dropped")
        .clone()
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ── Reconciler ───────────────────────────────────────────────────

#[tokio::test]
async fn reconcile_starts_new_stops_gone_keeps_rest() {
    let launcher = Arc::new(PipeLauncher::default());
    let mut reconciler = DeviceSetReconciler::new(launcher.clone(), StreamConfig::default());

    let first = reconciler.reconcile(&[ready("B"), ready("C")]).await;
    assert_eq!(first.started, vec!["B", "C"]);
    eventually(|| launcher.live() == 2).await;
    let mut c_state = reconciler.subscriptions().remove("C").unwrap();

    let outcome = reconciler.reconcile(&[ready("A"), ready("B")]).await;
    assert_eq!(outcome.started, vec!["A"]);
    assert_eq!(outcome.stopped, vec!["C"]);
    assert_eq!(reconciler.device_ids(), vec!["A", "B"]);

    // C was fully torn down before reconcile returned.
    assert!(!c_state.borrow_and_update().running);
    eventually(|| launcher.live() == 2).await;

    assert_eq!(launcher.launches("A"), 1);
    assert_eq!(launcher.launches("B"), 1);
    assert_eq!(launcher.launches("C"), 1);

    reconciler.shutdown().await;
    assert_eq!(launcher.live(), 0);
    assert!(reconciler.is_empty());
}

#[tokio::test]
async fn non_attachable_devices_get_no_session() {
    let launcher = Arc::new(PipeLauncher::default());
    let mut reconciler = DeviceSetReconciler::new(launcher.clone(), StreamConfig::default());

    let outcome = reconciler
        .reconcile(&[
            ready("A"),
            DeviceInfo::new("B", DeviceState::Unauthorized),
            DeviceInfo::new("C", DeviceState::Offline),
        ])
        .await;
    assert_eq!(outcome.started, vec!["A"]);

    // A going offline stops its session.
    let outcome = reconciler
        .reconcile(&[DeviceInfo::new("A", DeviceState::Offline)])
        .await;
    assert_eq!(outcome.stopped, vec!["A"]);
    assert!(reconciler.is_empty());
    assert_eq!(launcher.live(), 0);
}

#[tokio::test]
async fn repeated_reconcile_is_stable() {
    let launcher = Arc::new(PipeLauncher::default());
    let mut reconciler = DeviceSetReconciler::new(launcher.clone(), StreamConfig::default());

    reconciler.reconcile(&[ready("A")]).await;
    for _ in 0..5 {
        assert!(reconciler.reconcile(&[ready("A")]).await.is_empty());
    }
    eventually(|| launcher.live() == 1).await;
    assert_eq!(launcher.launches("A"), 1);
    reconciler.shutdown().await;
}

// ── Supervisor ───────────────────────────────────────────────────

#[tokio::test]
async fn failed_poll_keeps_running_sessions() {
    let launcher = Arc::new(PipeLauncher::default());
    let provider = Arc::new(QueuedProvider {
        polls: Mutex::new(VecDeque::from([
            Some(vec![ready("A")]),
            None,
            Some(Vec::new()),
        ])),
    });
    let reconciler = DeviceSetReconciler::new(launcher.clone(), StreamConfig::default());
    let mut supervisor = Supervisor::new(provider, reconciler, &HostConfig::default());

    let first = supervisor.poll_once().await.unwrap();
    assert_eq!(first.started, vec!["A"]);
    eventually(|| launcher.live() == 1).await;

    assert!(supervisor.poll_once().await.is_err());
    assert_eq!(supervisor.reconciler().device_ids(), vec!["A"]);
    assert_eq!(launcher.live(), 1);
    let status = supervisor.status_lines();
    assert_eq!(status.len(), 1);
    assert!(status[0].starts_with("A: running"), "{}", status[0]);

    let last = supervisor.poll_once().await.unwrap();
    assert_eq!(last.stopped, vec!["A"]);
    assert_eq!(launcher.live(), 0);
}

#[tokio::test]
async fn names_follow_latest_poll() {
    let launcher = Arc::new(PipeLauncher::default());
    let provider = Arc::new(QueuedProvider {
        polls: Mutex::new(VecDeque::from([
            Some(vec![ready("A"), ready("B")]),
            None,
            Some(vec![ready("B")]),
        ])),
    });
    let reconciler = DeviceSetReconciler::new(launcher.clone(), StreamConfig::default());
    let mut supervisor = Supervisor::new(provider, reconciler, &HostConfig::default());

    supervisor.poll_once().await.unwrap();
    assert_eq!(supervisor.known_names().len(), 2);

    assert!(supervisor.poll_once().await.is_err());
    assert_eq!(supervisor.known_names().len(), 2);

    supervisor.poll_once().await.unwrap();
    let names: Vec<String> = supervisor.known_names().keys().cloned().collect();
    assert_eq!(names, vec!["B"]);
    assert_eq!(supervisor.reconciler().device_ids(), vec!["B"]);
}

// ── Session lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn stop_then_start_never_overlaps_processes() {
    let launcher = Arc::new(PipeLauncher::default());
    let mut session = DeviceStreamSession::new("A", launcher.clone(), StreamConfig::default());

    for _ in 0..5 {
        session.start();
        eventually(|| launcher.live() == 1).await;
        session.stop().await;
        assert_eq!(launcher.live(), 0);
        assert!(!session.state().running);
    }

    assert_eq!(launcher.max_live.load(Ordering::SeqCst), 1);
    assert_eq!(launcher.launches("A"), 5);
}

#[tokio::test]
async fn encoded_stream_end_to_end() {
    let launcher = Arc::new(PacedLauncher::default());
    let mut session = DeviceStreamSession::new("A", launcher.clone(), StreamConfig::default());
    let mut rx = session.subscribe();
    session.start();
    let mut device = launcher.device_end().await;

    let config = common::config();
    let key = common::key_frame(235, 128, 128);
    let delta = common::delta_frame(1);

    write_sync_byte(&mut device).await;
    write_header(&mut device, &StreamHeader::new(CodecId::H264, 16, 16))
        .await
        .unwrap();
    write_frame(&mut device, FrameKind::Config, &config)
        .await
        .unwrap();
    wait_until(&mut rx, |s| s.header.is_some()).await;

    // One write at a time, so every published frame can be observed.
    let mut seen = Vec::new();
    for (kind, payload) in [
        (FrameKind::KeyFrame(1000), &key),
        (FrameKind::DeltaFrame(2000), &delta),
    ] {
        let want = seen.len() as u64 + 1;
        write_frame(&mut device, kind, payload).await.unwrap();
        let state = wait_until(&mut rx, |s| s.frames_received == want).await;
        seen.push(state.last_frame.unwrap());
    }
    drop(device);

    let kinds: Vec<FrameKind> = seen
        .iter()
        .map(|f| {
            let v = f.video.as_ref().unwrap();
            if v.key_frame {
                FrameKind::KeyFrame(v.pts_us)
            } else {
                FrameKind::DeltaFrame(v.pts_us)
            }
        })
        .collect();
    assert_eq!(
        kinds,
        [FrameKind::KeyFrame(1000), FrameKind::DeltaFrame(2000)]
    );

    for frame in &seen {
        assert_eq!(frame.dimensions(), (16, 16));
        assert!(frame.image.rgba.chunks_exact(4).all(|px| px[0] > 235 && px[3] == 255));
        assert_eq!(frame.video.as_ref().unwrap().config.as_deref(), Some(&config[..]));
    }
    assert_eq!(seen[0].video.as_ref().unwrap().data.len(), key.len());
    assert_eq!(seen[1].video.as_ref().unwrap().data.len(), delta.len());

    let state = wait_until(&mut rx, |s| !s.running).await;
    assert_eq!(state.error, None);
    assert_eq!(state.bytes_received, (key.len() + delta.len()) as u64);
    assert_eq!(state.header, Some(StreamHeader::new(CodecId::H264, 16, 16)));

    session.stop().await;
}

#[tokio::test]
async fn oversized_payload_is_a_session_error() {
    let mut bytes = Vec::new();
    write_sync_byte(&mut bytes).await;
    write_header(&mut bytes, &StreamHeader::new(CodecId::H264, 8, 8))
        .await
        .unwrap();
    write_frame(&mut bytes, FrameKind::KeyFrame(1), &[0; 64])
        .await
        .unwrap();

    let launcher = Arc::new(RecordedLauncher { bytes });
    let limits = StreamConfig {
        max_payload: 16,
        ..StreamConfig::default()
    };
    let mut session = DeviceStreamSession::new("A", launcher, limits);
    let mut rx = session.subscribe();
    session.start();

    let state = wait_until(&mut rx, |s| !s.running).await;
    assert!(state.error.unwrap().contains("too large"));
    assert_eq!(state.frames_received, 0);
    session.stop().await;
}

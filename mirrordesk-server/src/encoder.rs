//! [`VideoEncoder`] backed by an external screen recording tool.
//!
//! The tool writes an H.264 Annex-B stream to stdout; a reader task
//! splits it into access units and queues them for
//! [`VideoEncoder::dequeue_output`]. The tool has no live control
//! channel, so any parameter change restarts it at the next dequeue
//! with the current bitrate. A fresh recorder opens with an IDR
//! picture, which is what a sync-frame request asks for.

use std::collections::HashSet;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use mirrordesk_core::{
    BufferFlags, EncoderFormat, InputSurface, MirrorError, OutputBuffer, ParameterChange,
    VideoEncoder,
};

use crate::annexb::{AccessUnit, AccessUnitAssembler, AnnexBSplitter};
use crate::config::DEFAULT_RECORDER_ARGS;

/// Recording session length requested from the tool, in seconds.
pub const RECORD_TIME_LIMIT_SECS: u32 = 3600;

/// Access units buffered between the reader task and the drain loop.
const QUEUE_DEPTH: usize = 32;

/// Fill a recorder argument template for one launch.
pub fn command_args(template: &[String], format: &EncoderFormat, bit_rate: u32) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{width}", &format.width.to_string())
                .replace("{height}", &format.height.to_string())
                .replace("{bit_rate}", &bit_rate.to_string())
                .replace("{max_fps}", &format.max_fps.to_string())
                .replace("{i_frame_interval}", &format.i_frame_interval_secs.to_string())
                .replace("{repeat_us}", &format.repeat_previous_frame_us.to_string())
                .replace("{time_limit}", &RECORD_TIME_LIMIT_SECS.to_string())
        })
        .collect()
}

// ── ProcessEncoder ───────────────────────────────────────────────

pub struct ProcessEncoder {
    program: String,
    template: Vec<String>,
    format: Option<EncoderFormat>,
    bit_rate: u32,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    units: Option<mpsc::Receiver<AccessUnit>>,
    started_at: Instant,
    next_index: usize,
    in_flight: HashSet<usize>,
    restart_pending: bool,
    restarts: u32,
}

impl ProcessEncoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            template: DEFAULT_RECORDER_ARGS.iter().map(|a| a.to_string()).collect(),
            format: None,
            bit_rate: 0,
            child: None,
            reader: None,
            units: None,
            started_at: Instant::now(),
            next_index: 0,
            in_flight: HashSet::new(),
            restart_pending: false,
            restarts: 0,
        }
    }

    /// Replace the argument template.
    pub fn with_args(mut self, template: Vec<String>) -> Self {
        self.template = template;
        self
    }

    /// Arguments the next launch will use.
    pub fn current_args(&self) -> Result<Vec<String>, MirrorError> {
        Ok(command_args(&self.template, self.configured()?, self.bit_rate))
    }

    /// Target bitrate for the running or next recorder.
    pub fn bit_rate(&self) -> u32 {
        self.bit_rate
    }

    /// Recorder relaunches caused by parameter changes.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    fn configured(&self) -> Result<&EncoderFormat, MirrorError> {
        self.format
            .as_ref()
            .ok_or_else(|| MirrorError::Encoder("encoder not configured".into()))
    }

    /// Launch the recorder and its reader task, replacing any previous one.
    ///
    /// A resumed launch never emits a second config buffer.
    fn spawn_recorder(&mut self, resumed: bool) -> Result<(), MirrorError> {
        self.kill_recorder();

        let args = self.current_args()?;
        info!(program = %self.program, ?args, "starting recorder");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MirrorError::Subprocess(format!("{}: {e}", self.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MirrorError::Subprocess("recorder stdout unavailable".into()))?;

        let mut assembler = if resumed {
            AccessUnitAssembler::resumed()
        } else {
            AccessUnitAssembler::new()
        };
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let reader = tokio::spawn(async move {
            let mut nals = FramedRead::new(stdout, AnnexBSplitter::new());
            while let Some(nal) = nals.next().await {
                let nal = match nal {
                    Ok(nal) => nal,
                    Err(e) => {
                        warn!("recorder stream error: {e}");
                        break;
                    }
                };
                for unit in assembler.push(nal) {
                    if tx.send(unit).await.is_err() {
                        return;
                    }
                }
            }
            if let Some(unit) = assembler.flush() {
                let _ = tx.send(unit).await;
            }
            debug!("recorder output ended");
        });

        self.child = Some(child);
        self.reader = Some(reader);
        self.units = Some(rx);
        Ok(())
    }

    fn kill_recorder(&mut self) {
        self.units = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("recorder already gone: {e}");
            }
        }
    }
}

#[async_trait]
impl VideoEncoder for ProcessEncoder {
    fn configure(&mut self, format: &EncoderFormat) -> Result<(), MirrorError> {
        if format.width == 0 || format.height == 0 {
            return Err(MirrorError::Encoder(format!(
                "invalid size {}x{}",
                format.width, format.height
            )));
        }
        if !self.template.iter().any(|a| a.contains("{max_fps}")) {
            warn!(max_fps = format.max_fps, "recorder template takes no frame-rate cap");
        }
        self.bit_rate = format.bit_rate;
        self.format = Some(format.clone());
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<InputSurface, MirrorError> {
        let format = self.configured()?;
        Ok(InputSurface {
            width: format.width,
            height: format.height,
            source: format!("{} display capture", self.program),
        })
    }

    fn start(&mut self) -> Result<(), MirrorError> {
        self.spawn_recorder(false)?;
        self.started_at = Instant::now();
        Ok(())
    }

    async fn dequeue_output(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<OutputBuffer>, MirrorError> {
        if self.units.is_none() {
            return Err(MirrorError::Encoder("encoder not started".into()));
        }
        if std::mem::take(&mut self.restart_pending) {
            self.restarts += 1;
            info!(bit_rate = self.bit_rate, restarts = self.restarts, "restarting recorder");
            self.spawn_recorder(true)?;
        }
        let units = self
            .units
            .as_mut()
            .ok_or_else(|| MirrorError::Encoder("encoder not started".into()))?;

        let unit = match tokio::time::timeout(timeout, units.recv()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Err(MirrorError::Subprocess("recorder exited".into())),
            Ok(Some(unit)) => unit,
        };

        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1);
        self.in_flight.insert(index);

        let pts_us = if unit.flags.contains(BufferFlags::CODEC_CONFIG) {
            0
        } else {
            self.started_at.elapsed().as_micros() as i64
        };

        Ok(Some(OutputBuffer {
            index,
            pts_us,
            flags: unit.flags,
            data: unit.data,
        }))
    }

    fn release_output(&mut self, index: usize) -> Result<(), MirrorError> {
        if self.in_flight.remove(&index) {
            Ok(())
        } else {
            Err(MirrorError::Encoder(format!("unknown output buffer {index}")))
        }
    }

    fn set_parameters(&mut self, change: ParameterChange) -> Result<(), MirrorError> {
        match change {
            ParameterChange::RequestSyncFrame => {
                debug!("sync frame requested; recorder restarts on next dequeue");
            }
            ParameterChange::VideoBitrate(bit_rate) => {
                self.bit_rate = bit_rate;
                info!(bit_rate, "bitrate change; recorder restarts on next dequeue");
            }
        }
        self.restart_pending = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MirrorError> {
        self.kill_recorder();
        self.restart_pending = false;
        self.in_flight.clear();
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mirrordesk_core::encoder::MIME_AVC;

    fn format() -> EncoderFormat {
        EncoderFormat {
            mime_type: MIME_AVC.into(),
            bit_rate: 4_000_000,
            width: 1280,
            height: 720,
            max_fps: 24.0,
            i_frame_interval_secs: 10,
            repeat_previous_frame_us: 100_000,
        }
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn default_command_line_carries_size_and_bitrate() {
        let mut enc = ProcessEncoder::new("screenrecord");
        enc.configure(&format()).unwrap();
        let args = enc.current_args().unwrap();
        assert_eq!(args[0], "--output-format=h264");
        assert!(args.windows(2).any(|w| w == ["--size", "1280x720"]));
        assert!(args.windows(2).any(|w| w == ["--bit-rate", "4000000"]));
        assert!(args.windows(2).any(|w| w == ["--time-limit", "3600"]));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn template_placeholders_cover_every_format_field() {
        let template = strings(&[
            "--fps={max_fps}",
            "--gop={i_frame_interval}",
            "--repeat={repeat_us}",
            "{width}:{height}@{bit_rate}",
        ]);
        assert_eq!(
            command_args(&template, &format(), 3_200_000),
            ["--fps=24", "--gop=10", "--repeat=100000", "1280:720@3200000"]
        );
    }

    #[test]
    fn bitrate_change_retargets_next_launch() {
        let mut enc = ProcessEncoder::new("screenrecord");
        enc.configure(&format()).unwrap();
        enc.set_parameters(ParameterChange::VideoBitrate(3_000_000))
            .unwrap();
        assert_eq!(enc.bit_rate(), 3_000_000);
        let args = enc.current_args().unwrap();
        assert!(args.windows(2).any(|w| w == ["--bit-rate", "3000000"]));
    }

    #[test]
    fn surface_requires_configure() {
        let mut enc = ProcessEncoder::new("screenrecord");
        assert!(enc.create_input_surface().is_err());
        enc.configure(&format()).unwrap();
        let surface = enc.create_input_surface().unwrap();
        assert_eq!((surface.width, surface.height), (1280, 720));
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut enc = ProcessEncoder::new("screenrecord");
        let mut fmt = format();
        fmt.width = 0;
        assert!(enc.configure(&fmt).is_err());
    }

    #[tokio::test]
    async fn missing_program_fails_start() {
        let mut enc = ProcessEncoder::new("/nonexistent/mirrordesk-recorder");
        enc.configure(&format()).unwrap();
        let err = enc.start().unwrap_err();
        assert!(matches!(err, MirrorError::Subprocess(_)));
    }

    #[tokio::test]
    async fn dequeue_before_start_is_an_error() {
        let mut enc = ProcessEncoder::new("screenrecord");
        assert!(enc.dequeue_output(Duration::from_millis(1)).await.is_err());
    }

    async fn launches(log: &std::path::Path, at_least: usize) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..200 {
            lines = std::fs::read_to_string(log)
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect();
            if lines.len() >= at_least {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        lines
    }

    #[tokio::test]
    async fn stall_recovery_relaunches_recorder_at_new_bitrate() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("launches");
        // Each launch appends its bitrate, then idles like a wedged recorder.
        let script = format!("echo \"$1\" >> '{}'; exec sleep 30", log.display());
        let mut enc = ProcessEncoder::new("sh").with_args(strings(&[
            "-c",
            script.as_str(),
            "recorder",
            "{bit_rate}",
        ]));
        enc.configure(&format()).unwrap();
        enc.start().unwrap();
        assert_eq!(launches(&log, 1).await, ["4000000"]);

        enc.set_parameters(ParameterChange::RequestSyncFrame).unwrap();
        enc.set_parameters(ParameterChange::VideoBitrate(3_200_000))
            .unwrap();
        assert_eq!(enc.restarts(), 0);

        let out = enc.dequeue_output(Duration::from_millis(20)).await.unwrap();
        assert!(out.is_none());
        assert_eq!(enc.restarts(), 1);

        // A second empty dequeue does not relaunch again.
        enc.dequeue_output(Duration::from_millis(20)).await.unwrap();
        assert_eq!(enc.restarts(), 1);

        assert_eq!(launches(&log, 2).await, ["4000000", "3200000"]);
        enc.stop().unwrap();
    }
}

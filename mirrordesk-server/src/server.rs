//! Device-side server lifecycle.
//!
//! Binds the named socket, waits for the host, announces the stream
//! and then drains the encoder onto the connection until a write
//! fails, the encoder dies, or the stop handle is cleared.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use mirrordesk_core::protocol::{write_header, write_sync_byte};
use mirrordesk_core::{EncoderSession, HealthController, MirrorError, VideoEncoder};

use crate::config::{EncoderBackend, ServerConfig};
use crate::encoder::ProcessEncoder;
#[cfg(target_os = "android")]
use crate::mediacodec::MediaCodecEncoder;
use crate::socket;

// ── MirrorServer ─────────────────────────────────────────────────

/// Streams one capture session to one connected host.
pub struct MirrorServer {
    config: ServerConfig,
    running: Arc<AtomicBool>,
}

impl MirrorServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle that stops the server when set to `false`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The external recorder encoder from the configured command line.
    pub fn recorder(&self) -> ProcessEncoder {
        ProcessEncoder::new(&self.config.encoder_program)
            .with_args(self.config.recorder_args.clone())
    }

    /// Bind, accept a single host and stream to it with the configured
    /// encoder backend.
    pub async fn run(&self) -> Result<(), MirrorError> {
        self.running.store(true, Ordering::SeqCst);

        let listener = socket::bind(&self.config.socket_name)?;
        info!(socket = %self.config.socket_name, "waiting for host");

        let accepted = tokio::select! {
            result = listener.accept() => Some(result?),
            _ = Self::wait_for_stop(&self.running) => None,
        };
        let Some((stream, _)) = accepted else {
            info!("stopped before a host connected");
            return Ok(());
        };
        info!("host connected");

        let result = match self.config.encoder {
            #[cfg(target_os = "android")]
            EncoderBackend::MediaCodec => {
                info!("encoder: MediaCodec");
                self.serve(stream, MediaCodecEncoder::new()?).await
            }
            #[cfg(not(target_os = "android"))]
            EncoderBackend::MediaCodec => {
                warn!("MediaCodec needs Android; using {}", self.config.encoder_program);
                self.serve(stream, self.recorder()).await
            }
            EncoderBackend::Recorder => {
                info!("encoder: {}", self.config.encoder_program);
                self.serve(stream, self.recorder()).await
            }
        };
        self.running.store(false, Ordering::SeqCst);

        match result {
            Err(e) if e.is_disconnect() => {
                info!("host disconnected");
                Ok(())
            }
            other => other,
        }
    }

    /// Stream one session over an established connection.
    ///
    /// Order on the wire: optional sync byte, stream header, then frame
    /// records for as long as the connection accepts them.
    pub async fn serve<W, E>(&self, mut stream: W, encoder: E) -> Result<(), MirrorError>
    where
        W: AsyncWrite + Unpin,
        E: VideoEncoder,
    {
        self.running.store(true, Ordering::SeqCst);

        if !write_sync_byte(&mut stream).await {
            warn!("sync byte not sent; continuing");
        }
        write_header(&mut stream, &self.config.stream_header()).await?;

        let mut session = EncoderSession::create(encoder, self.config.encoder_format())?;
        let mut health = HealthController::new(self.config.bit_rate, self.config.health);

        let result = tokio::select! {
            r = health.run(&mut session, &mut stream) => r,
            _ = Self::wait_for_stop(&self.running) => Ok(()),
        };

        let state = health.state();
        info!(
            stalls = state.stalls,
            bitrate = state.current_bitrate,
            "capture session ended"
        );

        session.stop()?;
        let _ = stream.shutdown().await;
        result
    }

    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

//! Stall detection and recovery for a running encoder.
//!
//! The controller watches drain cadence. Ten consecutive empty polls
//! (each capped at 200 ms, so about two seconds of silence) count as a
//! stall: it forces a key frame and steps the bitrate down by 20 %,
//! never below `max(200 000, 25 % of the configured bitrate)`. Any
//! produced frame resets the count.
//!
//! The thresholds are policy, not protocol; [`HealthPolicy`] carries
//! them with those defaults.

use tokio::io::AsyncWrite;
use tracing::{info, warn};

use crate::encoder::{DrainResult, EncoderSession, VideoEncoder};
use crate::error::MirrorError;

// ── HealthPolicy ─────────────────────────────────────────────────

/// Tunable stall and backoff thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Consecutive empty polls that count as a stall.
    pub stall_polls: u32,
    /// Bitrate reduction per stall, in percent.
    pub decay_percent: u32,
    /// Bitrate floor as a percentage of the configured bitrate.
    pub floor_percent: u32,
    /// Absolute bitrate floor in bits/second.
    pub min_bitrate: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            stall_polls: 10,
            decay_percent: 20,
            floor_percent: 25,
            min_bitrate: 200_000,
        }
    }
}

impl HealthPolicy {
    /// Lowest bitrate the controller will ever request.
    pub fn floor_for(&self, configured_bitrate: u32) -> u32 {
        let scaled = configured_bitrate as u64 * self.floor_percent.min(100) as u64 / 100;
        (scaled as u32).max(self.min_bitrate)
    }

    fn reduce(&self, bitrate: u32, floor: u32) -> u32 {
        let kept = 100 - self.decay_percent.min(100) as u64;
        ((bitrate as u64 * kept / 100) as u32).max(floor)
    }
}

// ── HealthState ──────────────────────────────────────────────────

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthState {
    pub consecutive_empty_polls: u32,
    pub current_bitrate: u32,
    pub min_bitrate: u32,
    /// Timestamp of the most recent frame written.
    pub last_pts_us: Option<i64>,
    pub stalls: u64,
}

// ── HealthAction ─────────────────────────────────────────────────

/// What the caller must do after an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    None,
    /// Stall: request a key frame, then apply `new_bitrate` if any.
    Recover { new_bitrate: Option<u32> },
}

// ── HealthController ─────────────────────────────────────────────

/// Adaptive bitrate / stall-recovery loop state.
#[derive(Debug)]
pub struct HealthController {
    policy: HealthPolicy,
    state: HealthState,
}

impl HealthController {
    pub fn new(configured_bitrate: u32, policy: HealthPolicy) -> Self {
        Self {
            state: HealthState {
                consecutive_empty_polls: 0,
                current_bitrate: configured_bitrate,
                min_bitrate: policy.floor_for(configured_bitrate),
                last_pts_us: None,
                stalls: 0,
            },
            policy,
        }
    }

    pub fn state(&self) -> &HealthState {
        &self.state
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Feed one drain outcome and decide on an intervention.
    pub fn observe(&mut self, result: &DrainResult) -> HealthAction {
        match result {
            DrainResult::ProducedBytes { kind, .. } => {
                self.state.consecutive_empty_polls = 0;
                if let Some(pts) = kind.pts_us() {
                    self.state.last_pts_us = Some(pts);
                }
                return HealthAction::None;
            }
            DrainResult::NoOutputAvailable => self.state.consecutive_empty_polls += 1,
            DrainResult::EmptyBuffer => {}
        }

        if self.state.consecutive_empty_polls < self.policy.stall_polls.max(1) {
            return HealthAction::None;
        }

        self.state.consecutive_empty_polls = 0;
        self.state.stalls += 1;

        let new_bitrate = if self.state.current_bitrate > self.state.min_bitrate {
            let reduced = self
                .policy
                .reduce(self.state.current_bitrate, self.state.min_bitrate);
            self.state.current_bitrate = reduced;
            Some(reduced)
        } else {
            None
        };

        warn!(
            stalls = self.state.stalls,
            bitrate = self.state.current_bitrate,
            last_pts_us = ?self.state.last_pts_us,
            "encoder stalled; requesting key frame"
        );
        HealthAction::Recover { new_bitrate }
    }

    /// Drain the session forever, applying recoveries as they come.
    ///
    /// Only returns when the session or transport fails.
    pub async fn run<E, W>(
        &mut self,
        session: &mut EncoderSession<E>,
        writer: &mut W,
    ) -> Result<(), MirrorError>
    where
        E: VideoEncoder,
        W: AsyncWrite + Unpin,
    {
        info!(
            bitrate = self.state.current_bitrate,
            floor = self.state.min_bitrate,
            "health loop started"
        );
        loop {
            let result = session.drain_once(writer).await?;
            if let HealthAction::Recover { new_bitrate } = self.observe(&result) {
                session.request_key_frame()?;
                if let Some(bit_rate) = new_bitrate {
                    session.update_bitrate(bit_rate)?;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! Velocity estimation from corrected per-sector periods.
//!
//! Runs once per control tick. Every pulse accepted since the previous
//! tick is replayed using the snapshot's most recent valid period — the
//! right call for a Hall ring whose inter-pulse variation is small
//! against the control period at steady state. Each replayed pulse feeds
//! any active calibration/alignment run, gets corrected through the LUT,
//! updates the period EMA and advances the sector index by the current
//! step direction.
//!
//! The reported ω is a nonnegative magnitude; sign is reintroduced by the
//! wheel layer. A stall timeout collapses the estimate to zero so the PID
//! saturates low instead of chasing a phantom velocity.

use rover_common::state::StepDirection;
use tracing::trace;

use crate::calib::{AlignmentPoll, SectorCalibrator};

use super::pulse::PulseSnapshot;

/// Per-wheel velocity estimator state.
#[derive(Debug)]
pub struct VelocityEstimator {
    ppr: u16,
    alpha: f32,
    invert: bool,
    timeout_stop_ms: u32,
    /// Sector index of the most recent pulse, in [0, ppr).
    sector: u16,
    step_dir: StepDirection,
    /// EMA of the corrected period [µs]; ≤ 0 means unseeded.
    period_ema_us: f32,
    rpm: f32,
    omega: f32,
    last_count: u32,
    /// Timestamp of the last processed pulse [ms]; `None` until one arrives.
    last_seen_ms: Option<u64>,
    stalled: bool,
}

impl VelocityEstimator {
    pub fn new(ppr: u16, alpha: f32, invert: bool, timeout_stop_ms: u32) -> Self {
        Self {
            ppr,
            alpha,
            invert,
            timeout_stop_ms,
            sector: 0,
            step_dir: StepDirection::Forward,
            period_ema_us: 0.0,
            rpm: 0.0,
            omega: 0.0,
            last_count: 0,
            last_seen_ms: None,
            stalled: false,
        }
    }

    /// Process one control tick against the latest pulse snapshot.
    pub fn update(&mut self, snap: PulseSnapshot, now_us: u64, calib: &mut SectorCalibrator) {
        let new = snap.count.wrapping_sub(self.last_count);
        if new == 0 {
            self.check_stall(now_us / 1000);
            return;
        }
        self.last_count = snap.count;
        self.stalled = false;

        let dt = snap.period_us as f32;
        for _ in 0..new {
            if dt > 0.0 {
                if calib.is_calibrating() || calib.is_aligning() {
                    calib.feed_period(self.sector, dt);
                    calib.finish_calibration_if_ready();
                    if let AlignmentPoll::Finished(out) = calib.finish_alignment_if_ready() {
                        // The lookup phase just changed; restart the EMA so
                        // the next corrected sample seeds it cleanly.
                        self.period_ema_us = 0.0;
                        trace!(offset = out.offset, "estimator EMA reset after alignment");
                    }
                }
                let corrected = calib.correct_dt(self.sector, dt, self.step_dir);
                if self.period_ema_us <= 0.0 {
                    self.period_ema_us = corrected;
                } else {
                    self.period_ema_us =
                        (1.0 - self.alpha) * self.period_ema_us + self.alpha * corrected;
                }
            }
            self.advance_sector();
        }

        self.last_seen_ms = Some(snap.last_us / 1000);
        self.derive_outputs();
    }

    fn check_stall(&mut self, now_ms: u64) {
        if let Some(seen) = self.last_seen_ms {
            if now_ms.saturating_sub(seen) > u64::from(self.timeout_stop_ms) {
                self.rpm = 0.0;
                self.omega = 0.0;
                self.period_ema_us = 0.0;
                self.stalled = true;
            }
        }
    }

    fn derive_outputs(&mut self) {
        if self.period_ema_us > 0.0 {
            let rev_per_s = 1e6 / (f32::from(self.ppr) * self.period_ema_us);
            self.rpm = 60.0 * rev_per_s;
            self.omega = core::f32::consts::TAU * rev_per_s;
        } else {
            self.rpm = 0.0;
            self.omega = 0.0;
        }
    }

    #[inline]
    fn advance_sector(&mut self) {
        let ppr = i32::from(self.ppr);
        let next = (i32::from(self.sector) + self.step_dir.step()).rem_euclid(ppr);
        self.sector = next as u16;
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Angular velocity magnitude [rad/s].
    #[inline]
    pub fn omega(&self) -> f32 {
        self.omega
    }

    /// Signed angular velocity [rad/s]: magnitude with the step direction
    /// applied, negated when the channel is inverted.
    pub fn signed_omega(&self) -> f32 {
        let signed = self.omega * self.step_dir.step() as f32;
        if self.invert { -signed } else { signed }
    }

    #[inline]
    pub fn rpm(&self) -> f32 {
        self.rpm
    }

    /// Smoothed corrected period [µs]; 0 while unseeded or stalled.
    #[inline]
    pub fn period_ema_us(&self) -> f32 {
        self.period_ema_us
    }

    #[inline]
    pub fn sector(&self) -> u16 {
        self.sector
    }

    #[inline]
    pub fn step_dir(&self) -> StepDirection {
        self.step_dir
    }

    /// Direction used for LUT lookup and sector stepping. Owned by the
    /// wheel's hysteresis (or a frozen routine direction).
    pub fn set_step_dir(&mut self, dir: StepDirection) {
        self.step_dir = dir;
    }

    #[inline]
    pub fn stalled(&self) -> bool {
        self.stalled
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

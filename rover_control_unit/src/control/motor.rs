//! PWM output stage: signed command to duty pair.
//!
//! Per tick the stage slews the applied command toward the target, remaps
//! it through the deadband/minimum-output curve, quantizes to the
//! configured resolution and writes both channels through the HAL.
//!
//! Pipeline: invert → clamp → slew → deadband/min-output → duty →
//! drive-mode mapping → neutral policy.

use rover_common::config::MotorConfig;
use rover_common::state::{DriveMode, NeutralMode};
use rover_hal::pwm::PwmPair;
use tracing::debug;

/// Output stage for one wheel's H-bridge.
pub struct MotorPwm {
    pwm: Box<dyn PwmPair>,
    drive_mode: DriveMode,
    neutral_mode: NeutralMode,
    invert: bool,
    deadband: f32,
    min_output: f32,
    slew_rate: f32,
    max_duty: u32,
    /// Most recent setpoint (post-invert).
    target: f32,
    /// Command after slew limiting; the hysteresis input downstream.
    applied: f32,
    enabled: bool,
    last_duty: (u32, u32),
}

impl MotorPwm {
    pub fn new(cfg: &MotorConfig, pwm: Box<dyn PwmPair>) -> Self {
        Self {
            pwm,
            drive_mode: cfg.drive_mode,
            neutral_mode: cfg.neutral_mode,
            invert: cfg.invert,
            deadband: cfg.deadband,
            min_output: cfg.min_output,
            slew_rate: cfg.slew_rate_per_sec,
            max_duty: (1u32 << cfg.resolution_bits) - 1,
            target: 0.0,
            applied: 0.0,
            enabled: true,
            last_duty: (0, 0),
        }
    }

    /// Set the signed command u ∈ [−1, 1]. Inversion applies here, before
    /// clamping; the slewed path picks it up on the next tick.
    pub fn set_command(&mut self, u: f32) {
        let u = if self.invert { -u } else { u };
        self.target = u.clamp(-1.0, 1.0);
    }

    /// Set the target directly in applied (post-invert) space. Routines
    /// that reason about the physical rotation direction use this.
    pub fn set_target_applied(&mut self, u: f32) {
        self.target = u.clamp(-1.0, 1.0);
    }

    /// Advance slew and drive the channels.
    pub fn tick(&mut self, dt_s: f32) {
        if !self.enabled {
            self.applied = 0.0;
            self.write(0, 0);
            return;
        }

        if self.slew_rate > 0.0 && dt_s > 0.0 {
            let max_step = self.slew_rate * dt_s;
            let delta = (self.target - self.applied).clamp(-max_step, max_step);
            self.applied += delta;
        } else {
            self.applied = self.target;
        }

        let (in1, in2) = self.map_output(self.applied);
        self.write(in1, in2);
    }

    /// Hard override: drop to neutral immediately, bypassing slew.
    pub fn stop(&mut self) {
        self.target = 0.0;
        self.applied = 0.0;
        let (in1, in2) = self.map_output(0.0);
        self.write(in1, in2);
        debug!("motor stopped");
    }

    /// Disabling forces both channels low and freezes the applied command
    /// at zero; the target survives for re-enable.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.applied = 0.0;
            self.write(0, 0);
        }
    }

    /// Deadband/minimum-output remap and drive-mode duty mapping.
    fn map_output(&self, applied: f32) -> (u32, u32) {
        let a = applied.abs();
        let inside_deadband = a < self.deadband || a == 0.0;

        match self.drive_mode {
            DriveMode::SignMagnitude => {
                if inside_deadband {
                    return self.neutral_duties();
                }
                let duty = self.duty_for(self.remap_magnitude(a));
                if applied >= 0.0 {
                    (duty, 0)
                } else {
                    (0, duty)
                }
            }
            DriveMode::LockedAntiphase => {
                let u = if inside_deadband {
                    0.0
                } else {
                    self.remap_magnitude(a).copysign(applied)
                };
                let in1 = ((0.5 + 0.5 * u) * self.max_duty as f32).round() as u32;
                let in2 = ((0.5 - 0.5 * u) * self.max_duty as f32).round() as u32;
                (in1, in2)
            }
        }
    }

    /// Map |u| ∈ (deadband, 1] onto [min_output, 1].
    fn remap_magnitude(&self, a: f32) -> f32 {
        let span = 1.0 - self.deadband;
        let s = if span > 0.0 {
            ((a - self.deadband) / span).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.min_output + (1.0 - self.min_output) * s
    }

    #[inline]
    fn duty_for(&self, magnitude: f32) -> u32 {
        (magnitude * self.max_duty as f32).round() as u32
    }

    fn neutral_duties(&self) -> (u32, u32) {
        match self.drive_mode {
            DriveMode::SignMagnitude => match self.neutral_mode {
                NeutralMode::Coast => (0, 0),
                NeutralMode::Brake => (self.max_duty, self.max_duty),
            },
            // Locked-antiphase is inherently neutral at the 50 % point.
            DriveMode::LockedAntiphase => {
                let half = ((self.max_duty as f32) * 0.5).round() as u32;
                (half, half)
            }
        }
    }

    fn write(&mut self, in1: u32, in2: u32) {
        self.last_duty = (in1, in2);
        self.pwm.set_duty(in1, in2);
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Command after slew limiting (post-invert space).
    #[inline]
    pub fn applied(&self) -> f32 {
        self.applied
    }

    /// Current setpoint (post-invert space).
    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn last_duty(&self) -> (u32, u32) {
        self.last_duty
    }

    #[inline]
    pub fn max_duty(&self) -> u32 {
        self.max_duty
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

//! Direction, drive-mode and wheel status types.
//!
//! Small enums shared between the control unit, the HAL and the
//! configuration layer. TOML-facing enums serialize as lowercase strings.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ─── Step direction ─────────────────────────────────────────────────

/// Rotation sense of a wheel, as inferred from the applied motor command.
///
/// Selects which correction LUT applies and which way the sector index
/// advances on each pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepDirection {
    /// Positive wheel rotation; sector index advances +1 per pulse.
    #[default]
    Forward,
    /// Negative wheel rotation; sector index advances −1 per pulse.
    Reverse,
}

impl StepDirection {
    /// Signed unit step for sector-index arithmetic.
    #[inline]
    pub const fn step(self) -> i32 {
        match self {
            Self::Forward => 1,
            Self::Reverse => -1,
        }
    }

    /// Direction implied by the sign of a command or reference.
    /// Zero maps to forward; callers that need stickiness at zero must
    /// keep their own last-nonzero state.
    #[inline]
    pub fn from_sign(value: f32) -> Self {
        if value < 0.0 { Self::Reverse } else { Self::Forward }
    }

    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }

    /// Index into the per-direction table pairs (forward = 0, reverse = 1).
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::Reverse => 1,
        }
    }
}

// ─── Wheel identity ─────────────────────────────────────────────────

/// Which side of the chassis a wheel sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WheelSide {
    Left,
    Right,
}

impl WheelSide {
    /// Persistence namespace for this wheel's calibration records.
    #[inline]
    pub const fn namespace(self) -> &'static str {
        match self {
            Self::Left => "wheel_l",
            Self::Right => "wheel_r",
        }
    }
}

// ─── Motor output modes ─────────────────────────────────────────────

/// How the signed command maps onto the two PWM channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriveMode {
    /// One channel carries the duty, the other is held low; sign selects
    /// the channel.
    #[default]
    SignMagnitude,
    /// Both channels are driven around the 50 % point: IN1 = 0.5 + u/2,
    /// IN2 = 0.5 − u/2.
    LockedAntiphase,
}

/// Behavior of the H-bridge when the command is zero (sign-magnitude only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeutralMode {
    /// Both channels low; the motor freewheels.
    #[default]
    Coast,
    /// Both channels high; the windings are shorted.
    Brake,
}

// ─── PID discretization ─────────────────────────────────────────────

/// Controller discretization, selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PidMode {
    /// Velocity-form update: u[n] = u[n−1] + c0·e[n] + c1·e[n−1] + c2·e[n−2].
    #[default]
    Incremental,
    /// Parallel PIDF: derivative on measurement with first-order filter,
    /// trapezoidal integrator with clamping anti-windup.
    ParallelPidf,
}

// ─── Wheel status flags ─────────────────────────────────────────────

bitflags! {
    /// Diagnostic status word published by each wheel once per cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WheelStatus: u8 {
        /// No pulse within the stall timeout; reported ω forced to 0.
        const STALLED        = 0b0000_0001;
        /// A calibration run is collecting samples.
        const CALIBRATING    = 0b0000_0010;
        /// An alignment run is collecting samples.
        const ALIGNING       = 0b0000_0100;
        /// The open-loop assist command currently overrides the PID.
        const ASSIST_ACTIVE  = 0b0000_1000;
        /// Forward-direction correction is enabled.
        const LUT_FWD        = 0b0001_0000;
        /// Reverse-direction correction is enabled.
        const LUT_REV        = 0b0010_0000;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

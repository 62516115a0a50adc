//! Parameter bounds and defaults shared across the workspace.
//!
//! Every configurable field in [`crate::config`] has its default and its
//! admissible range defined here, so the loader, the validators and the
//! tests agree on a single source of truth.

use static_assertions::const_assert;

// ─── Encoder geometry ───────────────────────────────────────────────

/// Hard upper bound on sectors (magnets) per revolution. Calibration
/// arenas are sized against this at compile time.
pub const PPR_LIMIT: usize = 32;
/// Hard upper bound on acquisition laps per calibration/alignment run.
pub const MAX_LAPS_LIMIT: usize = 12;

const_assert!(PPR_LIMIT >= 4);
const_assert!(MAX_LAPS_LIMIT >= 1 && MAX_LAPS_LIMIT <= 16);

/// Default sectors per revolution for the reference hardware (6-magnet ring).
pub const PPR_DEFAULT: u16 = 6;

/// A pattern is usable for alignment once its range (max − min) exceeds
/// this threshold; below it the LUT carries no exploitable structure.
pub const PATTERN_MIN_RANGE: f32 = 1e-3;

// ─── Pulse capture ──────────────────────────────────────────────────

/// Default software debounce gap [µs]. 0 disables the check.
pub const MIN_GAP_US_DEFAULT: u32 = 300;
/// Default hardware glitch filter width [APB cycles], forwarded to bringup.
pub const GLITCH_CYCLES_DEFAULT: u16 = 1023;

// ─── Velocity estimation ────────────────────────────────────────────

/// Default EMA mixing factor for the corrected period.
pub const ALPHA_PERIOD_DEFAULT: f32 = 0.25;
/// Default stall timeout [ms]: no pulse for this long forces ω = 0.
pub const TIMEOUT_STOP_MS_DEFAULT: u32 = 2000;

// ─── Motor output stage ─────────────────────────────────────────────

/// Default PWM carrier frequency [Hz].
pub const PWM_FREQ_HZ_DEFAULT: u32 = 20_000;
/// Admissible PWM resolution range [bits].
pub const PWM_BITS_MIN: u8 = 8;
pub const PWM_BITS_MAX: u8 = 16;
/// Default PWM resolution [bits].
pub const PWM_BITS_DEFAULT: u8 = 10;
/// Default command deadband (normalized).
pub const DEADBAND_DEFAULT: f32 = 0.03;
/// Default minimum output magnitude once outside the deadband.
pub const MIN_OUTPUT_DEFAULT: f32 = 0.08;
/// Default slew rate [full-scale units/s]. ≤ 0 disables slewing.
pub const SLEW_RATE_DEFAULT: f32 = 4.0;

// ─── PID ────────────────────────────────────────────────────────────

/// Default controller period [s] (100 Hz control task).
pub const TS_DEFAULT: f32 = 0.01;
pub const TS_MIN: f32 = 1e-4;
pub const TS_MAX: f32 = 1.0;

// ─── Wheel supervision ──────────────────────────────────────────────

/// Default open-loop assist magnitude during routines.
pub const ASSIST_U_DEFAULT: f32 = 0.45;
/// Applied-command magnitude above which direction hysteresis latches.
pub const DIR_EPS_U_DEFAULT: f32 = 0.05;
/// Direction hold time after the command magnitude drops below the
/// hysteresis threshold [ms].
pub const DIR_HOLD_MS_DEFAULT: u32 = 400;
/// Default lap count for boot-time auto alignment.
pub const ALIGN_LAPS_BOOT_DEFAULT: u8 = 2;

// ─── Differential drive ─────────────────────────────────────────────

/// Default wheel radius [m].
pub const WHEEL_RADIUS_DEFAULT: f32 = 0.05;
/// Default track width (wheel separation) [m].
pub const TRACK_WIDTH_DEFAULT: f32 = 0.20;
/// Default in-place spin rate for coordinated alignment [rad/s].
pub const ALIGN_ASSIST_W_DEFAULT: f32 = 2.0;
/// Default in-place spin rate for coordinated calibration [rad/s].
pub const CALIB_ASSIST_W_DEFAULT: f32 = 2.5;

// ─── Cycle task ─────────────────────────────────────────────────────

/// Default control cycle period [µs] (100 Hz).
pub const CYCLE_TIME_US_DEFAULT: u32 = 10_000;
pub const CYCLE_TIME_US_MIN: u32 = 1_000;
pub const CYCLE_TIME_US_MAX: u32 = 100_000;
/// Default RT priority for the control task (SCHED_FIFO).
pub const RT_PRIORITY_DEFAULT: i32 = 80;

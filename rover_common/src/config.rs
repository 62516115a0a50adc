//! Configuration structures for the rover control unit.
//!
//! All config types use `serde::Deserialize` for TOML loading. Optional
//! fields carry `#[serde(default)]` so older config files keep loading
//! after new options appear. Numeric parameters are bounds-checked by the
//! per-struct `validate()` methods against the constants in
//! [`crate::consts`].

use serde::{Deserialize, Serialize};

use crate::consts::{
    ALIGN_ASSIST_W_DEFAULT, ALIGN_LAPS_BOOT_DEFAULT, ALPHA_PERIOD_DEFAULT, ASSIST_U_DEFAULT,
    CALIB_ASSIST_W_DEFAULT, CYCLE_TIME_US_DEFAULT, CYCLE_TIME_US_MAX, CYCLE_TIME_US_MIN,
    DEADBAND_DEFAULT, DIR_EPS_U_DEFAULT, DIR_HOLD_MS_DEFAULT, GLITCH_CYCLES_DEFAULT,
    MAX_LAPS_LIMIT, MIN_GAP_US_DEFAULT, MIN_OUTPUT_DEFAULT, PPR_DEFAULT, PPR_LIMIT,
    PWM_BITS_DEFAULT, PWM_BITS_MAX, PWM_BITS_MIN, PWM_FREQ_HZ_DEFAULT, RT_PRIORITY_DEFAULT,
    SLEW_RATE_DEFAULT, TIMEOUT_STOP_MS_DEFAULT, TRACK_WIDTH_DEFAULT, TS_DEFAULT, TS_MAX, TS_MIN,
    WHEEL_RADIUS_DEFAULT,
};
use crate::state::{DriveMode, NeutralMode, PidMode};

// ─── Encoder ────────────────────────────────────────────────────────

/// Hall encoder channel configuration for one wheel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Sectors (magnets) per revolution.
    #[serde(default = "default_ppr")]
    pub ppr: u16,
    /// Count on the rising edge instead of the falling edge.
    #[serde(default)]
    pub count_rising: bool,
    /// Negate the signed velocity report (wiring-dependent).
    #[serde(default)]
    pub invert: bool,
    /// Hardware glitch filter width [APB cycles]; forwarded to bringup.
    #[serde(default = "default_glitch_cycles")]
    pub glitch_cycles: u16,
    /// Software debounce: discard pulses closer than this [µs]. 0 disables.
    #[serde(default = "default_min_gap_us")]
    pub min_gap_us: u32,
    /// EMA mixing factor for the corrected period, in [0, 1].
    #[serde(default = "default_alpha_period")]
    pub alpha_period: f32,
    /// Stall timeout [ms]: with no pulse for this long, ω collapses to 0.
    #[serde(default = "default_timeout_stop_ms")]
    pub timeout_stop_ms: u32,
}

fn default_ppr() -> u16 {
    PPR_DEFAULT
}
fn default_glitch_cycles() -> u16 {
    GLITCH_CYCLES_DEFAULT
}
fn default_min_gap_us() -> u32 {
    MIN_GAP_US_DEFAULT
}
fn default_alpha_period() -> f32 {
    ALPHA_PERIOD_DEFAULT
}
fn default_timeout_stop_ms() -> u32 {
    TIMEOUT_STOP_MS_DEFAULT
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ppr: default_ppr(),
            count_rising: false,
            invert: false,
            glitch_cycles: default_glitch_cycles(),
            min_gap_us: default_min_gap_us(),
            alpha_period: default_alpha_period(),
            timeout_stop_ms: default_timeout_stop_ms(),
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.ppr == 0 || self.ppr as usize > PPR_LIMIT {
            return Err(format!("ppr {} out of range [1, {}]", self.ppr, PPR_LIMIT));
        }
        if !(0.0..=1.0).contains(&self.alpha_period) {
            return Err(format!(
                "alpha_period {} out of range [0, 1]",
                self.alpha_period
            ));
        }
        if self.timeout_stop_ms == 0 {
            return Err("timeout_stop_ms must be nonzero".into());
        }
        Ok(())
    }
}

// ─── Motor ──────────────────────────────────────────────────────────

/// PWM output stage configuration for one wheel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorConfig {
    /// PWM carrier frequency [Hz]; forwarded to bringup.
    #[serde(default = "default_pwm_freq")]
    pub freq_hz: u32,
    /// PWM resolution [bits]; max duty is 2^bits − 1.
    #[serde(default = "default_pwm_bits")]
    pub resolution_bits: u8,
    /// Command deadband (normalized): |u| below this outputs zero.
    #[serde(default = "default_deadband")]
    pub deadband: f32,
    /// Minimum output magnitude once outside the deadband.
    #[serde(default = "default_min_output")]
    pub min_output: f32,
    /// Slew rate limit [full-scale/s]; ≤ 0 applies setpoints instantly.
    #[serde(default = "default_slew_rate")]
    pub slew_rate_per_sec: f32,
    /// Channel behavior at zero command (sign-magnitude mode).
    #[serde(default)]
    pub neutral_mode: NeutralMode,
    /// Signed-command to channel mapping.
    #[serde(default)]
    pub drive_mode: DriveMode,
    /// Negate the command before mapping (wiring-dependent).
    #[serde(default)]
    pub invert: bool,
}

fn default_pwm_freq() -> u32 {
    PWM_FREQ_HZ_DEFAULT
}
fn default_pwm_bits() -> u8 {
    PWM_BITS_DEFAULT
}
fn default_deadband() -> f32 {
    DEADBAND_DEFAULT
}
fn default_min_output() -> f32 {
    MIN_OUTPUT_DEFAULT
}
fn default_slew_rate() -> f32 {
    SLEW_RATE_DEFAULT
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            freq_hz: default_pwm_freq(),
            resolution_bits: default_pwm_bits(),
            deadband: default_deadband(),
            min_output: default_min_output(),
            slew_rate_per_sec: default_slew_rate(),
            neutral_mode: NeutralMode::default(),
            drive_mode: DriveMode::default(),
            invert: false,
        }
    }
}

impl MotorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(PWM_BITS_MIN..=PWM_BITS_MAX).contains(&self.resolution_bits) {
            return Err(format!(
                "resolution_bits {} out of range [{}, {}]",
                self.resolution_bits, PWM_BITS_MIN, PWM_BITS_MAX
            ));
        }
        if !(0.0..1.0).contains(&self.deadband) {
            return Err(format!("deadband {} out of range [0, 1)", self.deadband));
        }
        if !(0.0..=1.0).contains(&self.min_output) {
            return Err(format!(
                "min_output {} out of range [0, 1]",
                self.min_output
            ));
        }
        Ok(())
    }
}

// ─── PID ────────────────────────────────────────────────────────────

/// Velocity controller configuration for one wheel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidConfig {
    #[serde(default)]
    pub kp: f32,
    #[serde(default)]
    pub ki: f32,
    #[serde(default)]
    pub kd: f32,
    /// Derivative filter time constant [s] (PIDF mode; 0 = unfiltered).
    #[serde(default)]
    pub tf: f32,
    /// Controller period [s].
    #[serde(default = "default_ts")]
    pub ts: f32,
    /// Output clamp lower bound (magnitude domain).
    #[serde(default)]
    pub u_min: f32,
    /// Output clamp upper bound (magnitude domain).
    #[serde(default = "default_u_max")]
    pub u_max: f32,
    /// Enable the output clamp.
    #[serde(default = "default_true")]
    pub clamp: bool,
    /// Discretization selector.
    #[serde(default)]
    pub mode: PidMode,
    /// Enable the integrator clamp (PIDF mode only).
    #[serde(default = "default_true")]
    pub anti_windup: bool,
}

fn default_ts() -> f32 {
    TS_DEFAULT
}
fn default_u_max() -> f32 {
    1.0
}
fn default_true() -> bool {
    true
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            tf: 0.0,
            ts: default_ts(),
            u_min: 0.0,
            u_max: default_u_max(),
            clamp: true,
            mode: PidMode::default(),
            anti_windup: true,
        }
    }
}

impl PidConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(TS_MIN..=TS_MAX).contains(&self.ts) {
            return Err(format!("ts {} out of range [{}, {}]", self.ts, TS_MIN, TS_MAX));
        }
        if self.u_min >= self.u_max {
            return Err(format!(
                "u_min {} must be below u_max {}",
                self.u_min, self.u_max
            ));
        }
        if self.tf < 0.0 {
            return Err(format!("tf {} must be nonnegative", self.tf));
        }
        Ok(())
    }
}

// ─── Calibrator ─────────────────────────────────────────────────────

/// Sector calibrator configuration for one wheel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibConfig {
    /// Upper bound on acquisition laps accepted by `start_*` operations.
    #[serde(default = "default_max_laps")]
    pub max_laps: u8,
    /// Enable correction for both directions when no persisted flags exist.
    #[serde(default)]
    pub use_lut_by_default: bool,
}

fn default_max_laps() -> u8 {
    MAX_LAPS_LIMIT as u8
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self {
            max_laps: default_max_laps(),
            use_lut_by_default: false,
        }
    }
}

impl CalibConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_laps == 0 || self.max_laps as usize > MAX_LAPS_LIMIT {
            return Err(format!(
                "max_laps {} out of range [1, {}]",
                self.max_laps, MAX_LAPS_LIMIT
            ));
        }
        Ok(())
    }
}

// ─── Wheel ──────────────────────────────────────────────────────────

/// Complete per-wheel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WheelConfig {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub motor: MotorConfig,
    #[serde(default)]
    pub pid: PidConfig,
    #[serde(default)]
    pub calib: CalibConfig,
    /// Open-loop command magnitude applied while a routine runs assisted.
    #[serde(default = "default_assist_u")]
    pub assist_u: f32,
    /// Applied-command magnitude that latches direction hysteresis.
    #[serde(default = "default_dir_eps_u")]
    pub dir_eps_u: f32,
    /// Hold time for the inferred direction after the command weakens [ms].
    #[serde(default = "default_dir_hold_ms")]
    pub dir_hold_ms: u32,
    /// Start an alignment at boot when the current direction's pattern is
    /// ready (standalone wheels only; the coordinator has its own hook).
    #[serde(default)]
    pub auto_align_on_boot: bool,
    /// Lap count used by the boot-time alignment.
    #[serde(default = "default_align_laps_boot")]
    pub align_laps_boot: u8,
}

fn default_assist_u() -> f32 {
    ASSIST_U_DEFAULT
}
fn default_dir_eps_u() -> f32 {
    DIR_EPS_U_DEFAULT
}
fn default_dir_hold_ms() -> u32 {
    DIR_HOLD_MS_DEFAULT
}
fn default_align_laps_boot() -> u8 {
    ALIGN_LAPS_BOOT_DEFAULT
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            motor: MotorConfig::default(),
            pid: PidConfig::default(),
            calib: CalibConfig::default(),
            assist_u: default_assist_u(),
            dir_eps_u: default_dir_eps_u(),
            dir_hold_ms: default_dir_hold_ms(),
            auto_align_on_boot: false,
            align_laps_boot: default_align_laps_boot(),
        }
    }
}

impl WheelConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.encoder.validate()?;
        self.motor.validate()?;
        self.pid.validate()?;
        self.calib.validate()?;
        if !(0.0..=1.0).contains(&self.assist_u) {
            return Err(format!("assist_u {} out of range [0, 1]", self.assist_u));
        }
        if !(0.0..=1.0).contains(&self.dir_eps_u) {
            return Err(format!("dir_eps_u {} out of range [0, 1]", self.dir_eps_u));
        }
        if self.align_laps_boot == 0 || self.align_laps_boot > self.calib.max_laps {
            return Err(format!(
                "align_laps_boot {} out of range [1, {}]",
                self.align_laps_boot, self.calib.max_laps
            ));
        }
        Ok(())
    }
}

// ─── Drive ──────────────────────────────────────────────────────────

/// Chassis-level configuration: kinematics, limits and coordinated
/// routine behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    /// Wheel radius [m].
    #[serde(default = "default_wheel_radius")]
    pub wheel_radius: f32,
    /// Track width (distance between wheel contact points) [m].
    #[serde(default = "default_track_width")]
    pub track_width: f32,
    /// Linear velocity clamp [m/s]; ≤ 0 disables.
    #[serde(default)]
    pub v_max: f32,
    /// Angular velocity clamp [rad/s]; ≤ 0 disables.
    #[serde(default)]
    pub w_max: f32,
    /// Linear acceleration ramp [m/s²]; ≤ 0 applies setpoints instantly.
    #[serde(default)]
    pub v_acc_max: f32,
    /// Angular acceleration ramp [rad/s²]; ≤ 0 applies setpoints instantly.
    #[serde(default)]
    pub w_acc_max: f32,
    /// Per-wheel angular velocity limit [rad/s]; ≤ 0 disables the rescale.
    #[serde(default)]
    pub omega_wheel_max: f32,
    /// Rescale (v, w) jointly to honor the wheel limit while preserving
    /// the trajectory shape.
    #[serde(default = "default_true")]
    pub rescale_twist_to_wheel_limit: bool,
    /// Kick off a coordinated alignment at boot when both wheels hold
    /// usable patterns.
    #[serde(default)]
    pub auto_coordinated_align_on_boot: bool,
    /// Lap count for the boot-time coordinated alignment.
    #[serde(default = "default_align_laps_boot")]
    pub align_laps_boot: u8,
    /// In-place spin rate while a side aligns [rad/s].
    #[serde(default = "default_align_assist_w")]
    pub align_assist_w: f32,
    /// In-place spin rate while a side calibrates [rad/s].
    #[serde(default = "default_calib_assist_w")]
    pub calib_assist_w: f32,
    #[serde(default)]
    pub left: WheelConfig,
    #[serde(default)]
    pub right: WheelConfig,
}

fn default_wheel_radius() -> f32 {
    WHEEL_RADIUS_DEFAULT
}
fn default_track_width() -> f32 {
    TRACK_WIDTH_DEFAULT
}
fn default_align_assist_w() -> f32 {
    ALIGN_ASSIST_W_DEFAULT
}
fn default_calib_assist_w() -> f32 {
    CALIB_ASSIST_W_DEFAULT
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            wheel_radius: default_wheel_radius(),
            track_width: default_track_width(),
            v_max: 0.0,
            w_max: 0.0,
            v_acc_max: 0.0,
            w_acc_max: 0.0,
            omega_wheel_max: 0.0,
            rescale_twist_to_wheel_limit: true,
            auto_coordinated_align_on_boot: false,
            align_laps_boot: default_align_laps_boot(),
            align_assist_w: default_align_assist_w(),
            calib_assist_w: default_calib_assist_w(),
            left: WheelConfig::default(),
            right: WheelConfig::default(),
        }
    }
}

impl DriveConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.wheel_radius <= 0.0 {
            return Err(format!("wheel_radius {} must be positive", self.wheel_radius));
        }
        if self.track_width <= 0.0 {
            return Err(format!("track_width {} must be positive", self.track_width));
        }
        self.left.validate().map_err(|e| format!("left wheel: {e}"))?;
        self.right
            .validate()
            .map_err(|e| format!("right wheel: {e}"))?;
        Ok(())
    }
}

// ─── Control unit ───────────────────────────────────────────────────

/// Top-level control unit configuration, loaded from TOML at startup and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlUnitConfig {
    /// Target cycle period [µs] (default 10000 = 100 Hz).
    #[serde(default = "default_cycle_time_us")]
    pub cycle_time_us: u32,
    /// Directory backing the key-value calibration store.
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// CPU core the control task pins to (rt feature).
    #[serde(default)]
    pub rt_cpu_core: usize,
    /// SCHED_FIFO priority of the control task (rt feature).
    #[serde(default = "default_rt_priority")]
    pub rt_priority: i32,
    #[serde(default)]
    pub drive: DriveConfig,
}

fn default_cycle_time_us() -> u32 {
    CYCLE_TIME_US_DEFAULT
}
fn default_store_path() -> String {
    "store".into()
}
fn default_rt_priority() -> i32 {
    RT_PRIORITY_DEFAULT
}

impl Default for ControlUnitConfig {
    fn default() -> Self {
        Self {
            cycle_time_us: default_cycle_time_us(),
            store_path: default_store_path(),
            rt_cpu_core: 0,
            rt_priority: default_rt_priority(),
            drive: DriveConfig::default(),
        }
    }
}

impl ControlUnitConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.cycle_time_us < CYCLE_TIME_US_MIN || self.cycle_time_us > CYCLE_TIME_US_MAX {
            return Err(format!(
                "cycle_time_us {} out of range [{}, {}]",
                self.cycle_time_us, CYCLE_TIME_US_MIN, CYCLE_TIME_US_MAX
            ));
        }
        self.drive.validate()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

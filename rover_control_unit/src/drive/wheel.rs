//! Per-wheel supervision: sign routing, direction hysteresis and routine
//! orchestration.
//!
//! The wheel composes pulse capture, estimator, calibrator, PID and the
//! PWM output stage. The PID operates on velocity magnitudes; the sign of
//! the reference is reapplied to its output, and a sign flip resets the
//! controller for bumpless transfer.
//!
//! The inferred step direction — the canonical source of truth for LUT
//! selection and sector stepping — follows the *applied* motor command
//! with hysteresis: a strong command latches its sign, a weak one keeps
//! the previous direction for a hold interval (the wheel is still
//! coasting the old way), after which the direction follows the
//! commanded reference sign.

use std::sync::Arc;

use rover_common::config::WheelConfig;
use rover_common::state::{StepDirection, WheelSide, WheelStatus};
use rover_hal::pwm::PwmPair;
use rover_hal::store::KvStore;
use tracing::{info, warn};

use crate::calib::{RoutineStartError, SectorCalibrator};
use crate::control::{MotorPwm, PidVel};
use crate::encoder::{PulseCapture, VelocityEstimator};

/// Which routine a wheel is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineKind {
    Calibration,
    Alignment,
}

/// Context of an in-flight routine.
#[derive(Debug, Clone, Copy)]
struct ActiveRoutine {
    kind: RoutineKind,
    /// Step direction frozen for the whole run.
    dir: StepDirection,
    /// Motor target saved before assist took over (applied space).
    saved_target: f32,
    /// Whether this wheel drives itself open-loop during the run.
    assist: bool,
}

/// One wheel of the differential pair.
pub struct Wheel {
    side: WheelSide,
    capture: Arc<PulseCapture>,
    estimator: VelocityEstimator,
    calibrator: SectorCalibrator,
    pid: PidVel,
    motor: MotorPwm,

    // Supervision parameters.
    assist_u: f32,
    dir_eps_u: f32,
    dir_hold_ms: u64,
    auto_align_on_boot: bool,
    align_laps_boot: u8,

    // Runtime state.
    omega_ref: f32,
    /// Last nonzero reference sign; preserved across zero crossings.
    ref_sign: f32,
    dir: StepDirection,
    /// Timestamp of the last strong applied command [ms].
    dir_latched_ms: u64,
    routine: Option<ActiveRoutine>,
}

impl Wheel {
    pub fn new(
        side: WheelSide,
        cfg: &WheelConfig,
        capture: Arc<PulseCapture>,
        pwm: Box<dyn PwmPair>,
        store: Box<dyn KvStore>,
    ) -> Self {
        let estimator = VelocityEstimator::new(
            cfg.encoder.ppr,
            cfg.encoder.alpha_period,
            cfg.encoder.invert,
            cfg.encoder.timeout_stop_ms,
        );
        let calibrator = SectorCalibrator::new(
            cfg.encoder.ppr as usize,
            cfg.calib.max_laps,
            cfg.calib.use_lut_by_default,
            side.namespace(),
            store,
        );
        Self {
            side,
            capture,
            estimator,
            calibrator,
            pid: PidVel::from_config(&cfg.pid),
            motor: MotorPwm::new(&cfg.motor, pwm),
            assist_u: cfg.assist_u,
            dir_eps_u: cfg.dir_eps_u,
            dir_hold_ms: u64::from(cfg.dir_hold_ms),
            auto_align_on_boot: cfg.auto_align_on_boot,
            align_laps_boot: cfg.align_laps_boot,
            omega_ref: 0.0,
            ref_sign: 1.0,
            dir: StepDirection::Forward,
            dir_latched_ms: 0,
            routine: None,
        }
    }

    /// Load persisted calibration. Boot path; never fails.
    pub fn load(&mut self) {
        self.calibrator.load();
    }

    /// Boot hook for a standalone wheel: load records and, when enabled
    /// and the current direction's pattern is usable, start an assisted
    /// auto-alignment.
    pub fn begin(&mut self) {
        self.load();
        if self.auto_align_on_boot
            && self.calibrator.lut_enabled(self.dir)
            && self.calibrator.pattern_ready(self.dir)
        {
            match self.start_alignment(self.align_laps_boot, true) {
                Ok(()) => info!(side = ?self.side, "boot auto-alignment started"),
                Err(e) => warn!(side = ?self.side, error = %e, "boot auto-alignment rejected"),
            }
        }
    }

    /// Signed velocity reference [rad/s].
    pub fn set_omega_ref(&mut self, omega: f32) {
        self.omega_ref = omega;
    }

    /// One control tick.
    pub fn update(&mut self, now_us: u64, dt_s: f32) {
        let now_ms = now_us / 1000;

        // 1. Consume pulses and advance the output slew.
        let snap = self.capture.snapshot();
        self.estimator.update(snap, now_us, &mut self.calibrator);
        self.motor.tick(dt_s);

        // 2. Step direction: frozen during routines, hysteresis otherwise.
        if let Some(r) = &self.routine {
            self.estimator.set_step_dir(r.dir);
        } else {
            self.update_direction(now_ms);
            self.estimator.set_step_dir(self.dir);
        }

        // 3. Reference sign bookkeeping (last nonzero sign wins) and
        //    bumpless reset on flips.
        let new_sign = if self.omega_ref > 0.0 {
            1.0
        } else if self.omega_ref < 0.0 {
            -1.0
        } else {
            self.ref_sign
        };
        if new_sign != self.ref_sign {
            self.ref_sign = new_sign;
            self.pid.reset(0.0);
        }

        // 4. Magnitude PID with the sign rerouted onto the output. While
        //    assist overrides the command the PID runs held.
        let u_mag = self.pid.update(self.omega_ref.abs(), self.estimator.omega());
        let assisting = self.routine.as_ref().is_some_and(|r| r.assist);
        if !assisting {
            self.motor.set_command(self.ref_sign * u_mag);
        }

        // 5. Routine completion: the calibrator returns to idle inside the
        //    estimator's pulse loop; restore the saved command here.
        self.poll_routine_completion();
    }

    fn update_direction(&mut self, now_ms: u64) {
        let u = self.motor.applied();
        if u.abs() > self.dir_eps_u {
            self.dir = StepDirection::from_sign(u);
            self.dir_latched_ms = now_ms;
        } else if now_ms.saturating_sub(self.dir_latched_ms) >= self.dir_hold_ms {
            // Coast hold expired: adopt the commanded sign so the next
            // motion starts on the right LUT.
            self.dir = StepDirection::from_sign(self.ref_sign);
        }
    }

    fn poll_routine_completion(&mut self) {
        let Some(r) = self.routine else { return };
        let still_running = match r.kind {
            RoutineKind::Calibration => self.calibrator.is_calibrating(),
            RoutineKind::Alignment => self.calibrator.is_aligning(),
        };
        if still_running {
            return;
        }
        if r.assist {
            self.motor.set_target_applied(r.saved_target);
            self.pid.set_hold(false);
            self.pid.reset(r.saved_target.abs());
        }
        info!(side = ?self.side, kind = ?r.kind, "routine finished, command restored");
        self.routine = None;
    }

    // ── Routine control ─────────────────────────────────────────────

    /// Start a calibration run in the current inferred direction.
    /// `assist` drives the wheel open-loop for the duration.
    pub fn start_calibration(&mut self, laps: u8, assist: bool) -> Result<(), RoutineStartError> {
        self.start_routine(RoutineKind::Calibration, self.dir, laps, assist)
    }

    /// Start an alignment run in the current inferred direction.
    pub fn start_alignment(&mut self, laps: u8, assist: bool) -> Result<(), RoutineStartError> {
        self.start_routine(RoutineKind::Alignment, self.dir, laps, assist)
    }

    /// Start a routine with an explicit direction (used by coordinated
    /// spins, where the direction is imposed by the chassis motion).
    pub fn start_routine(
        &mut self,
        kind: RoutineKind,
        dir: StepDirection,
        laps: u8,
        assist: bool,
    ) -> Result<(), RoutineStartError> {
        if self.routine.is_some() {
            return Err(RoutineStartError::AlreadyRunning);
        }
        match kind {
            RoutineKind::Calibration => self.calibrator.start_calibration(laps, dir)?,
            RoutineKind::Alignment => self.calibrator.start_alignment(laps, dir)?,
        }

        let saved_target = self.motor.target();
        if assist {
            self.motor
                .set_target_applied(dir.step() as f32 * self.assist_u);
            self.pid.set_hold(true);
        }
        self.estimator.set_step_dir(dir);
        self.routine = Some(ActiveRoutine {
            kind,
            dir,
            saved_target,
            assist,
        });
        Ok(())
    }

    /// Abandon an in-flight routine: the calibrator's runs are cancelled
    /// without touching LUT or offset, and the saved command returns.
    pub fn abort_routine(&mut self) {
        let Some(r) = self.routine.take() else { return };
        self.calibrator.cancel();
        if r.assist {
            self.motor.set_target_applied(r.saved_target);
            self.pid.set_hold(false);
            self.pid.reset(r.saved_target.abs());
        }
        warn!(side = ?self.side, kind = ?r.kind, "routine aborted");
    }

    /// Zero the reference and drop the output to neutral immediately.
    pub fn neutral(&mut self) {
        self.omega_ref = 0.0;
        self.pid.reset(0.0);
        self.motor.stop();
    }

    /// Reinitialize the PID around `u0` (bumpless transfer hook).
    pub fn reset_pid(&mut self, u0: f32) {
        self.pid.reset(u0);
    }

    // ── Predicates and accessors ────────────────────────────────────

    pub fn routine_active(&self) -> bool {
        self.routine.is_some()
    }

    pub fn pattern_ready(&self, dir: StepDirection) -> bool {
        self.calibrator.pattern_ready(dir)
    }

    pub fn status(&self) -> WheelStatus {
        let mut s = WheelStatus::empty();
        s.set(WheelStatus::STALLED, self.estimator.stalled());
        s.set(WheelStatus::CALIBRATING, self.calibrator.is_calibrating());
        s.set(WheelStatus::ALIGNING, self.calibrator.is_aligning());
        s.set(
            WheelStatus::ASSIST_ACTIVE,
            self.routine.as_ref().is_some_and(|r| r.assist),
        );
        s.set(
            WheelStatus::LUT_FWD,
            self.calibrator.lut_enabled(StepDirection::Forward),
        );
        s.set(
            WheelStatus::LUT_REV,
            self.calibrator.lut_enabled(StepDirection::Reverse),
        );
        s
    }

    #[inline]
    pub fn side(&self) -> WheelSide {
        self.side
    }

    /// Measured angular velocity magnitude [rad/s].
    #[inline]
    pub fn omega_meas(&self) -> f32 {
        self.estimator.omega()
    }

    #[inline]
    pub fn omega_ref(&self) -> f32 {
        self.omega_ref
    }

    #[inline]
    pub fn dir(&self) -> StepDirection {
        self.dir
    }

    pub fn calibrator(&self) -> &SectorCalibrator {
        &self.calibrator
    }

    pub fn calibrator_mut(&mut self) -> &mut SectorCalibrator {
        &mut self.calibrator
    }

    pub fn motor(&self) -> &MotorPwm {
        &self.motor
    }

    pub fn estimator(&self) -> &VelocityEstimator {
        &self.estimator
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rover_common::config::WheelConfig;
    use rover_hal::pwm::RecordingPwm;
    use rover_hal::store::MemStore;

    fn test_config() -> WheelConfig {
        let mut cfg = WheelConfig::default();
        cfg.encoder.ppr = 4;
        cfg.encoder.min_gap_us = 0;
        cfg.pid.kp = 0.5;
        cfg.pid.ki = 1.0;
        cfg.pid.ts = 0.01;
        cfg.motor.slew_rate_per_sec = 0.0;
        cfg.motor.deadband = 0.0;
        cfg.motor.min_output = 0.0;
        cfg.dir_eps_u = 0.05;
        cfg.dir_hold_ms = 100;
        cfg
    }

    fn wheel_with(cfg: &WheelConfig) -> (Wheel, Arc<PulseCapture>) {
        let capture = Arc::new(PulseCapture::new(cfg.encoder.min_gap_us));
        let wheel = Wheel::new(
            WheelSide::Left,
            cfg,
            Arc::clone(&capture),
            Box::new(RecordingPwm::new()),
            Box::new(MemStore::new()),
        );
        (wheel, capture)
    }

    fn wheel() -> (Wheel, Arc<PulseCapture>) {
        wheel_with(&test_config())
    }

    /// Drive `n` ticks of 10 ms with no pulses.
    fn run_quiet_ticks(w: &mut Wheel, start_us: u64, n: usize) -> u64 {
        let mut t = start_us;
        for _ in 0..n {
            t += 10_000;
            w.update(t, 0.01);
        }
        t
    }

    #[test]
    fn positive_reference_produces_positive_command() {
        let (mut w, _cap) = wheel();
        w.set_omega_ref(5.0);
        run_quiet_ticks(&mut w, 0, 5);
        assert!(w.motor().target() > 0.0);
    }

    #[test]
    fn sign_flip_resets_pid_and_routes_sign() {
        let (mut w, _cap) = wheel();
        w.set_omega_ref(1.0);
        // Stall keeps ω at 0, so constant error saturates the PID high.
        run_quiet_ticks(&mut w, 0, 200);
        assert!((w.motor().target() - 1.0).abs() < 1e-5);

        w.set_omega_ref(-1.0);
        w.update(3_000_000, 0.01);
        // Fresh magnitude is c0·|e| = 0.5, signed negative.
        let target = w.motor().target();
        assert!(target <= 0.0, "target={target}");
        assert!((target + 0.5).abs() < 1e-5, "target={target}");
    }

    #[test]
    fn zero_reference_preserves_last_sign() {
        let (mut w, _cap) = wheel();
        w.set_omega_ref(-2.0);
        run_quiet_ticks(&mut w, 0, 3);
        w.set_omega_ref(0.0);
        run_quiet_ticks(&mut w, 100_000, 3);
        // The sign stays negative; with zero reference and zero measured
        // velocity the PID output decays instead of jumping positive.
        assert!(w.motor().target() <= 0.0);
    }

    #[test]
    fn direction_hysteresis_latches_strong_commands() {
        let (mut w, _cap) = wheel();
        w.set_omega_ref(5.0);
        run_quiet_ticks(&mut w, 0, 10);
        assert_eq!(w.dir(), StepDirection::Forward);

        // A reversed reference drives a strong negative command; once the
        // applied command crosses the threshold the direction flips.
        w.set_omega_ref(-5.0);
        run_quiet_ticks(&mut w, 200_000, 10);
        assert_eq!(w.dir(), StepDirection::Reverse);
    }

    #[test]
    fn weak_command_holds_direction_until_timeout() {
        let mut cfg = test_config();
        cfg.pid.kp = 0.5;
        cfg.pid.ki = 0.0;
        let (mut w, _cap) = wheel_with(&cfg);

        // Latch reverse with a strong command.
        w.set_omega_ref(-5.0);
        let t = run_quiet_ticks(&mut w, 0, 10);
        assert_eq!(w.dir(), StepDirection::Reverse);

        // Drop to zero: command decays below the threshold, but the
        // direction holds within dir_hold_ms even though the reference
        // sign stays negative-then-zero.
        w.set_omega_ref(0.0);
        w.reset_pid(0.0);
        w.update(t + 10_000, 0.01);
        assert_eq!(w.dir(), StepDirection::Reverse);

        // After the hold expires the direction follows the reference
        // sign, which is still the preserved negative.
        run_quiet_ticks(&mut w, t + 10_000, 20);
        assert_eq!(w.dir(), StepDirection::Reverse);

        // A new positive reference is adopted once the hold lapses.
        w.set_omega_ref(3.0);
        run_quiet_ticks(&mut w, t + 500_000, 15);
        assert_eq!(w.dir(), StepDirection::Forward);
    }

    #[test]
    fn assisted_calibration_overrides_and_restores_command() {
        let (mut w, cap) = wheel();
        w.set_omega_ref(2.0);
        run_quiet_ticks(&mut w, 0, 5);
        let before = w.motor().target();
        assert!(before > 0.0);

        w.start_calibration(1, true).unwrap();
        assert!(w.routine_active());
        assert!(w.status().contains(WheelStatus::ASSIST_ACTIVE));
        let assist_target = w.motor().target();
        assert!((assist_target - w.assist_u).abs() < 1e-6);

        // The PID keeps running but cannot move the motor target.
        run_quiet_ticks(&mut w, 100_000, 5);
        assert_eq!(w.motor().target(), assist_target);

        // Feed one lap of pulses: a base pulse, then three periods that
        // walk the sector index onto the lap-closing last sector. The run
        // completes inside that update and the saved command returns on
        // the same tick.
        let mut t = 200_000u64;
        cap.on_pulse(t);
        for _ in 0..3 {
            t += 10_000;
            cap.on_pulse(t);
            w.update(t + 100, 0.01);
        }
        assert!(!w.routine_active());
        assert_eq!(w.motor().target(), before);
        assert!(!w.status().contains(WheelStatus::ASSIST_ACTIVE));
    }

    #[test]
    fn unassisted_routine_leaves_pid_in_control() {
        let (mut w, _cap) = wheel();
        w.set_omega_ref(2.0);
        run_quiet_ticks(&mut w, 0, 3);
        w.start_routine(RoutineKind::Calibration, StepDirection::Forward, 1, false)
            .unwrap();
        let before = w.motor().target();
        run_quiet_ticks(&mut w, 100_000, 5);
        // PID still drives the command during an externally-driven run.
        assert!(w.motor().target() >= before);
        assert!(!w.status().contains(WheelStatus::ASSIST_ACTIVE));
    }

    #[test]
    fn alignment_requires_pattern() {
        let (mut w, _cap) = wheel();
        assert!(matches!(
            w.start_alignment(2, true),
            Err(RoutineStartError::PatternNotReady { .. })
        ));
        assert!(!w.routine_active());
    }

    #[test]
    fn concurrent_routines_rejected_at_wheel_level() {
        let (mut w, _cap) = wheel();
        w.start_calibration(2, true).unwrap();
        assert!(matches!(
            w.start_calibration(2, true),
            Err(RoutineStartError::AlreadyRunning)
        ));
    }

    #[test]
    fn abort_restores_command_without_lut_changes() {
        let (mut w, cap) = wheel();
        w.set_omega_ref(1.0);
        run_quiet_ticks(&mut w, 0, 3);
        let before = w.motor().target();

        w.start_calibration(2, true).unwrap();
        // Partial data only.
        cap.on_pulse(50_000);
        cap.on_pulse(60_000);
        w.update(61_000, 0.01);

        w.abort_routine();
        assert!(!w.routine_active());
        assert_eq!(w.motor().target(), before);
        assert!(w
            .calibrator()
            .table()
            .lut(StepDirection::Forward)
            .iter()
            .all(|s| *s == 1.0));
    }

    #[test]
    fn neutral_zeroes_everything() {
        let (mut w, _cap) = wheel();
        w.set_omega_ref(3.0);
        run_quiet_ticks(&mut w, 0, 5);
        w.neutral();
        assert_eq!(w.omega_ref(), 0.0);
        assert_eq!(w.motor().applied(), 0.0);
        assert_eq!(w.motor().last_duty(), (0, 0));
    }

    #[test]
    fn routine_freezes_estimator_direction() {
        let (mut w, cap) = wheel();
        // Latch forward, then start a reverse-directed routine.
        w.set_omega_ref(5.0);
        run_quiet_ticks(&mut w, 0, 10);
        w.start_routine(RoutineKind::Calibration, StepDirection::Reverse, 1, true)
            .unwrap();
        cap.on_pulse(200_000);
        cap.on_pulse(210_000);
        w.update(211_000, 0.01);
        assert_eq!(w.estimator().step_dir(), StepDirection::Reverse);
    }
}

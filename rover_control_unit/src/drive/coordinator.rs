//! Twist-level coordination of the two wheels.
//!
//! Converts body twists into wheel references through ramps, limits and
//! the direction-preserving rescale, and sequences coordinated
//! calibration/alignment spins: the chassis turns in place so the side
//! being served rotates forward at a near-constant rate while its wheel
//! runs the acquisition.

use rover_common::config::DriveConfig;
use rover_common::state::StepDirection;
use tracing::{debug, info, warn};

use crate::calib::RoutineStartError;

use super::kinematics::{clamp_symmetric, ramp_toward, rescale_to_wheel_limit};
use super::wheel::{RoutineKind, Wheel};

/// One step of a coordinated routine: which side is served and what it
/// runs. The spin sign follows the served side — right forward means a
/// positive body w, left forward a negative one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordPhase {
    AlignRight,
    AlignLeft,
    CalibRight,
    CalibLeft,
}

impl CoordPhase {
    fn kind(self) -> RoutineKind {
        match self {
            Self::AlignRight | Self::AlignLeft => RoutineKind::Alignment,
            Self::CalibRight | Self::CalibLeft => RoutineKind::Calibration,
        }
    }

    fn serves_right(self) -> bool {
        matches!(self, Self::AlignRight | Self::CalibRight)
    }
}

/// In-flight coordinated routine.
#[derive(Debug)]
struct CoordRoutine {
    phases: heapless::Vec<CoordPhase, 4>,
    idx: usize,
    laps: u8,
    /// Whether the current phase's wheel routine has been armed.
    started: bool,
}

/// The differential-drive chassis controller.
pub struct DifferentialDrive {
    left: Wheel,
    right: Wheel,

    // Kinematics and limits.
    wheel_radius: f32,
    track_width: f32,
    v_max: f32,
    w_max: f32,
    v_acc_max: f32,
    w_acc_max: f32,
    omega_wheel_max: f32,
    rescale_enabled: bool,

    // Coordinated routine parameters.
    auto_coordinated_align_on_boot: bool,
    align_laps_boot: u8,
    align_assist_w: f32,
    calib_assist_w: f32,

    // Twist state.
    v_cmd: f32,
    w_cmd: f32,
    v_ref: f32,
    w_ref: f32,

    coord: Option<CoordRoutine>,
}

impl DifferentialDrive {
    pub fn new(cfg: &DriveConfig, left: Wheel, right: Wheel) -> Self {
        Self {
            left,
            right,
            wheel_radius: cfg.wheel_radius,
            track_width: cfg.track_width,
            v_max: cfg.v_max,
            w_max: cfg.w_max,
            v_acc_max: cfg.v_acc_max,
            w_acc_max: cfg.w_acc_max,
            omega_wheel_max: cfg.omega_wheel_max,
            rescale_enabled: cfg.rescale_twist_to_wheel_limit,
            auto_coordinated_align_on_boot: cfg.auto_coordinated_align_on_boot,
            align_laps_boot: cfg.align_laps_boot,
            align_assist_w: cfg.align_assist_w,
            calib_assist_w: cfg.calib_assist_w,
            v_cmd: 0.0,
            w_cmd: 0.0,
            v_ref: 0.0,
            w_ref: 0.0,
            coord: None,
        }
    }

    /// Boot: load both wheels' calibration and, when both hold usable
    /// patterns, kick off a coordinated alignment.
    pub fn begin(&mut self) {
        self.left.load();
        self.right.load();
        if self.auto_coordinated_align_on_boot
            && self.left.pattern_ready(StepDirection::Forward)
            && self.right.pattern_ready(StepDirection::Forward)
        {
            match self.start_coordinated_alignment(self.align_laps_boot) {
                Ok(()) => info!("boot coordinated alignment started"),
                Err(e) => warn!(error = %e, "boot coordinated alignment rejected"),
            }
        }
    }

    /// Body twist command. Ignored while a coordinated routine runs.
    pub fn set_twist(&mut self, v: f32, w: f32) {
        if self.coord.is_some() {
            debug!("twist ignored during coordinated routine");
            return;
        }
        self.v_cmd = v;
        self.w_cmd = w;
    }

    /// Zero everything and drop both wheels to neutral.
    pub fn stop(&mut self) {
        self.v_cmd = 0.0;
        self.w_cmd = 0.0;
        self.v_ref = 0.0;
        self.w_ref = 0.0;
        self.left.neutral();
        self.right.neutral();
    }

    /// One control tick.
    pub fn update(&mut self, now_us: u64, dt_s: f32) {
        if self.coord.is_some() {
            self.drive_coordinated_spin();
        }

        // Ramp toward the (clamped) commands.
        let v_target = clamp_symmetric(self.v_cmd, self.v_max);
        let w_target = clamp_symmetric(self.w_cmd, self.w_max);
        self.v_ref = ramp_toward(self.v_ref, v_target, self.v_acc_max, dt_s);
        self.w_ref = ramp_toward(self.w_ref, w_target, self.w_acc_max, dt_s);

        // Wheel speeds, with the shape-preserving saturation rescale.
        let limit = if self.rescale_enabled {
            self.omega_wheel_max
        } else {
            0.0
        };
        let (v, w, omega_r, omega_l) = rescale_to_wheel_limit(
            self.v_ref,
            self.w_ref,
            self.wheel_radius,
            self.track_width,
            limit,
        );
        self.v_ref = v;
        self.w_ref = w;

        self.right.set_omega_ref(omega_r);
        self.left.set_omega_ref(omega_l);
        self.right.update(now_us, dt_s);
        self.left.update(now_us, dt_s);

        self.advance_coordinated_phases();
    }

    // ── Coordinated routines ────────────────────────────────────────

    /// Align both sides by spinning in place, right first.
    pub fn start_coordinated_alignment(&mut self, laps: u8) -> Result<(), RoutineStartError> {
        self.start_coordinated(&[CoordPhase::AlignRight, CoordPhase::AlignLeft], laps)
    }

    /// Calibrate both sides by spinning in place, right first.
    pub fn start_coordinated_calibration(&mut self, laps: u8) -> Result<(), RoutineStartError> {
        self.start_coordinated(&[CoordPhase::CalibRight, CoordPhase::CalibLeft], laps)
    }

    /// Full service pass: align both sides, then recalibrate both.
    /// Sides without a usable pattern skip their alignment phase.
    pub fn start_coordinated_service(&mut self, laps: u8) -> Result<(), RoutineStartError> {
        self.start_coordinated(
            &[
                CoordPhase::AlignRight,
                CoordPhase::AlignLeft,
                CoordPhase::CalibRight,
                CoordPhase::CalibLeft,
            ],
            laps,
        )
    }

    fn start_coordinated(
        &mut self,
        phases: &[CoordPhase],
        laps: u8,
    ) -> Result<(), RoutineStartError> {
        if self.coord.is_some() {
            return Err(RoutineStartError::AlreadyRunning);
        }
        let mut list = heapless::Vec::new();
        for p in phases {
            // Phase count is bounded by the vector capacity.
            let _ = list.push(*p);
        }
        self.coord = Some(CoordRoutine {
            phases: list,
            idx: 0,
            laps,
            started: false,
        });
        info!(?phases, laps, "coordinated routine started");
        Ok(())
    }

    /// Abort any coordinated routine: wheel runs are abandoned and all
    /// references are zeroed.
    pub fn abort(&mut self) {
        if self.coord.take().is_some() {
            warn!("coordinated routine aborted");
        }
        self.left.abort_routine();
        self.right.abort_routine();
        self.v_cmd = 0.0;
        self.w_cmd = 0.0;
        self.v_ref = 0.0;
        self.w_ref = 0.0;
        self.left.set_omega_ref(0.0);
        self.right.set_omega_ref(0.0);
    }

    /// While coordinated: arm the current phase's wheel routine if needed
    /// and hold the in-place spin twist.
    fn drive_coordinated_spin(&mut self) {
        let Some(coord) = &mut self.coord else { return };

        // Arm the current phase, skipping phases whose start is refused
        // (e.g. alignment without a usable pattern).
        while coord.idx < coord.phases.len() && !coord.started {
            let phase = coord.phases[coord.idx];
            let wheel = if phase.serves_right() {
                &mut self.right
            } else {
                &mut self.left
            };
            match wheel.start_routine(phase.kind(), StepDirection::Forward, coord.laps, false) {
                Ok(()) => {
                    info!(?phase, "coordinated phase armed");
                    coord.started = true;
                }
                Err(e) => {
                    warn!(?phase, error = %e, "coordinated phase skipped");
                    coord.idx += 1;
                }
            }
        }
        if coord.idx >= coord.phases.len() {
            self.finish_coordinated();
            return;
        }

        let phase = coord.phases[coord.idx];
        let magnitude = match phase.kind() {
            RoutineKind::Alignment => self.align_assist_w,
            RoutineKind::Calibration => self.calib_assist_w,
        };
        // Right side forward ⇒ +w; left side forward ⇒ −w.
        let w = if phase.serves_right() {
            magnitude
        } else {
            -magnitude
        };
        self.v_cmd = 0.0;
        self.w_cmd = w;
    }

    /// After wheel updates: step to the next phase once the served
    /// wheel's routine has gone idle.
    fn advance_coordinated_phases(&mut self) {
        let Some(coord) = &mut self.coord else { return };
        if !coord.started || coord.idx >= coord.phases.len() {
            return;
        }
        let phase = coord.phases[coord.idx];
        let wheel = if phase.serves_right() {
            &self.right
        } else {
            &self.left
        };
        if !wheel.routine_active() {
            info!(?phase, "coordinated phase finished");
            coord.idx += 1;
            coord.started = false;
            if coord.idx >= coord.phases.len() {
                self.finish_coordinated();
            }
        }
    }

    fn finish_coordinated(&mut self) {
        self.coord = None;
        self.v_cmd = 0.0;
        self.w_cmd = 0.0;
        self.v_ref = 0.0;
        self.w_ref = 0.0;
        self.left.set_omega_ref(0.0);
        self.right.set_omega_ref(0.0);
        info!("coordinated routine finished");
    }

    // ── Predicates and accessors ────────────────────────────────────

    pub fn is_coordinated_routine_running(&self) -> bool {
        self.coord.is_some()
    }

    /// Current ramped twist (after limits and rescale).
    pub fn twist_ref(&self) -> (f32, f32) {
        (self.v_ref, self.w_ref)
    }

    pub fn left(&self) -> &Wheel {
        &self.left
    }

    pub fn right(&self) -> &Wheel {
        &self.right
    }

    pub fn left_mut(&mut self) -> &mut Wheel {
        &mut self.left
    }

    pub fn right_mut(&mut self) -> &mut Wheel {
        &mut self.right
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::PulseCapture;
    use rover_common::config::{DriveConfig, WheelConfig};
    use rover_common::state::WheelSide;
    use rover_hal::pwm::RecordingPwm;
    use rover_hal::store::MemStore;
    use std::sync::Arc;

    fn wheel_config() -> WheelConfig {
        let mut cfg = WheelConfig::default();
        cfg.encoder.ppr = 4;
        cfg.encoder.min_gap_us = 0;
        cfg.pid.kp = 0.2;
        cfg.pid.ki = 0.5;
        cfg.motor.slew_rate_per_sec = 0.0;
        cfg.motor.deadband = 0.0;
        cfg.motor.min_output = 0.0;
        cfg
    }

    fn drive_config() -> DriveConfig {
        let mut cfg = DriveConfig::default();
        cfg.wheel_radius = 0.05;
        cfg.track_width = 0.2;
        cfg.left = wheel_config();
        cfg.right = wheel_config();
        cfg
    }

    struct Rig {
        drive: DifferentialDrive,
        left_cap: Arc<PulseCapture>,
        right_cap: Arc<PulseCapture>,
    }

    fn rig(cfg: DriveConfig) -> Rig {
        let left_cap = Arc::new(PulseCapture::new(0));
        let right_cap = Arc::new(PulseCapture::new(0));
        let left = Wheel::new(
            WheelSide::Left,
            &cfg.left,
            Arc::clone(&left_cap),
            Box::new(RecordingPwm::new()),
            Box::new(MemStore::new()),
        );
        let right = Wheel::new(
            WheelSide::Right,
            &cfg.right,
            Arc::clone(&right_cap),
            Box::new(RecordingPwm::new()),
            Box::new(MemStore::new()),
        );
        Rig {
            drive: DifferentialDrive::new(&cfg, left, right),
            left_cap,
            right_cap,
        }
    }

    /// Learn a structured LUT on one wheel directly through its
    /// calibrator, so patterns are ready without driving pulses.
    fn prime_pattern(wheel: &mut Wheel) {
        let c = wheel.calibrator_mut();
        c.start_calibration(1, StepDirection::Forward).unwrap();
        for (k, p) in [100.0f32, 200.0, 100.0, 100.0].iter().enumerate() {
            c.feed_period(k as u16, *p);
        }
        c.finish_calibration_if_ready();
        assert!(c.pattern_ready(StepDirection::Forward));
    }

    /// Walk one wheel through laps of pulses at a fixed period.
    fn feed_laps(cap: &Arc<PulseCapture>, drive: &mut DifferentialDrive, start_us: u64, pulses: u32) {
        let mut t = start_us;
        cap.on_pulse(t);
        drive.update(t + 100, 0.01);
        for _ in 0..pulses {
            t += 10_000;
            cap.on_pulse(t);
            drive.update(t + 100, 0.01);
        }
    }

    #[test]
    fn twist_publishes_wheel_references() {
        let mut r = rig(drive_config());
        r.drive.set_twist(1.0, 0.0);
        r.drive.update(10_000, 0.01);
        // v = 1 m/s, r = 0.05 → both wheels at 20 rad/s.
        assert!((r.drive.right().omega_ref() - 20.0).abs() < 1e-4);
        assert!((r.drive.left().omega_ref() - 20.0).abs() < 1e-4);
    }

    #[test]
    fn ramps_limit_reference_growth() {
        let mut cfg = drive_config();
        cfg.v_acc_max = 1.0; // 1 m/s²
        let mut r = rig(cfg);
        r.drive.set_twist(1.0, 0.0);
        r.drive.update(10_000, 0.01);
        let (v, _) = r.drive.twist_ref();
        assert!((v - 0.01).abs() < 1e-6);
        r.drive.update(20_000, 0.01);
        let (v, _) = r.drive.twist_ref();
        assert!((v - 0.02).abs() < 1e-6);
    }

    #[test]
    fn twist_clamps_apply() {
        let mut cfg = drive_config();
        cfg.v_max = 0.5;
        cfg.w_max = 1.0;
        let mut r = rig(cfg);
        r.drive.set_twist(2.0, -3.0);
        r.drive.update(10_000, 0.01);
        let (v, w) = r.drive.twist_ref();
        assert!((v - 0.5).abs() < 1e-6);
        assert!((w + 1.0).abs() < 1e-6);
    }

    #[test]
    fn wheel_limit_rescale_reference_scenario() {
        let mut cfg = drive_config();
        cfg.omega_wheel_max = 20.0;
        let mut r = rig(cfg);
        r.drive.set_twist(1.0, 1.0);
        r.drive.update(10_000, 0.01);
        // Raw (22, 18) rescaled by 20/22; the ratio v:w stays 1.
        assert!((r.drive.right().omega_ref() - 20.0).abs() < 1e-3);
        let (v, w) = r.drive.twist_ref();
        assert!((v / w - 1.0).abs() < 1e-5);
        assert!(r.drive.right().omega_ref().abs() <= 20.0 + 1e-3);
        assert!(r.drive.left().omega_ref().abs() <= 20.0 + 1e-3);
    }

    #[test]
    fn rescale_can_be_disabled() {
        let mut cfg = drive_config();
        cfg.omega_wheel_max = 20.0;
        cfg.rescale_twist_to_wheel_limit = false;
        let mut r = rig(cfg);
        r.drive.set_twist(1.0, 1.0);
        r.drive.update(10_000, 0.01);
        assert!((r.drive.right().omega_ref() - 22.0).abs() < 1e-3);
    }

    #[test]
    fn coordinated_alignment_spins_right_then_left() {
        let mut r = rig(drive_config());
        prime_pattern(r.drive.right_mut());
        prime_pattern(r.drive.left_mut());

        r.drive.start_coordinated_alignment(1).unwrap();
        assert!(r.drive.is_coordinated_routine_running());

        // First phase serves the right side: positive spin, right wheel
        // routine active, external twists ignored.
        r.drive.update(10_000, 0.01);
        assert!(r.drive.right().routine_active());
        assert!(!r.drive.left().routine_active());
        assert!(r.drive.right().omega_ref() > 0.0);
        r.drive.set_twist(5.0, 0.0);
        r.drive.update(20_000, 0.01);
        assert!((r.drive.twist_ref().0).abs() < 1e-6, "twist must be ignored");

        // Complete the right wheel's lap → phase advances to the left.
        feed_laps(&r.right_cap, &mut r.drive, 100_000, 3);
        assert!(!r.drive.right().routine_active());
        r.drive.update(200_000, 0.01);
        assert!(r.drive.left().routine_active());
        // Left side forward ⇒ negative body spin.
        assert!(r.drive.left().omega_ref() > 0.0);
        assert!(r.drive.right().omega_ref() < 0.0);

        // Complete the left lap → routine ends, references zeroed.
        feed_laps(&r.left_cap, &mut r.drive, 300_000, 3);
        assert!(!r.drive.is_coordinated_routine_running());
        assert_eq!(r.drive.twist_ref(), (0.0, 0.0));
        assert_eq!(r.drive.left().omega_ref(), 0.0);
        assert_eq!(r.drive.right().omega_ref(), 0.0);
    }

    #[test]
    fn coordinated_alignment_skips_sides_without_patterns() {
        let mut r = rig(drive_config());
        prime_pattern(r.drive.left_mut());
        // Right has no pattern: its phase is skipped, the left still runs.
        r.drive.start_coordinated_alignment(1).unwrap();
        r.drive.update(10_000, 0.01);
        assert!(!r.drive.right().routine_active());
        assert!(r.drive.left().routine_active());
    }

    #[test]
    fn coordinated_routine_with_nothing_to_do_finishes() {
        let mut r = rig(drive_config());
        r.drive.start_coordinated_alignment(1).unwrap();
        r.drive.update(10_000, 0.01);
        assert!(!r.drive.is_coordinated_routine_running());
    }

    #[test]
    fn double_coordinated_start_rejected() {
        let mut r = rig(drive_config());
        prime_pattern(r.drive.left_mut());
        r.drive.start_coordinated_alignment(1).unwrap();
        assert!(matches!(
            r.drive.start_coordinated_calibration(1),
            Err(RoutineStartError::AlreadyRunning)
        ));
    }

    #[test]
    fn abort_zeroes_references_and_abandons_runs() {
        let mut r = rig(drive_config());
        prime_pattern(r.drive.right_mut());
        r.drive.start_coordinated_alignment(1).unwrap();
        r.drive.update(10_000, 0.01);
        assert!(r.drive.right().routine_active());

        r.drive.abort();
        assert!(!r.drive.is_coordinated_routine_running());
        assert!(!r.drive.right().routine_active());
        assert_eq!(r.drive.twist_ref(), (0.0, 0.0));
        assert_eq!(r.drive.right().omega_ref(), 0.0);
        // Twists are accepted again after the abort.
        r.drive.set_twist(0.3, 0.0);
        r.drive.update(20_000, 0.01);
        assert!(r.drive.right().omega_ref() > 0.0);
    }

    #[test]
    fn coordinated_calibration_runs_both_sides() {
        let mut r = rig(drive_config());
        r.drive.start_coordinated_calibration(1).unwrap();
        r.drive.update(10_000, 0.01);
        assert!(r.drive.right().routine_active());
        feed_laps(&r.right_cap, &mut r.drive, 100_000, 3);
        r.drive.update(200_000, 0.01);
        assert!(r.drive.left().routine_active());
        feed_laps(&r.left_cap, &mut r.drive, 300_000, 3);
        assert!(!r.drive.is_coordinated_routine_running());
        // Both sides learned something and saved it.
        assert!(r.drive.right().calibrator().lut_enabled(StepDirection::Forward));
        assert!(r.drive.left().calibrator().lut_enabled(StepDirection::Forward));
    }

    #[test]
    fn service_routine_aligns_then_recalibrates() {
        let mut r = rig(drive_config());
        prime_pattern(r.drive.right_mut());
        prime_pattern(r.drive.left_mut());
        r.drive.start_coordinated_service(1).unwrap();

        // Align right, align left, calibrate right, calibrate left.
        r.drive.update(10_000, 0.01);
        assert!(r.drive.right().calibrator().is_aligning());
        feed_laps(&r.right_cap, &mut r.drive, 100_000, 3);

        r.drive.update(200_000, 0.01);
        assert!(r.drive.left().calibrator().is_aligning());
        feed_laps(&r.left_cap, &mut r.drive, 300_000, 3);

        r.drive.update(400_000, 0.01);
        assert!(r.drive.right().calibrator().is_calibrating());
        feed_laps(&r.right_cap, &mut r.drive, 500_000, 3);

        r.drive.update(600_000, 0.01);
        assert!(r.drive.left().calibrator().is_calibrating());
        feed_laps(&r.left_cap, &mut r.drive, 700_000, 3);

        assert!(!r.drive.is_coordinated_routine_running());
    }

    #[test]
    fn boot_auto_alignment_when_patterns_persisted() {
        let mut cfg = drive_config();
        cfg.auto_coordinated_align_on_boot = true;
        let mut r = rig(cfg);
        // Learn + persist on both wheels, as a previous power cycle would.
        prime_pattern(r.drive.left_mut());
        prime_pattern(r.drive.right_mut());

        r.drive.begin();
        assert!(r.drive.is_coordinated_routine_running());
    }

    #[test]
    fn boot_without_patterns_stays_idle() {
        let mut cfg = drive_config();
        cfg.auto_coordinated_align_on_boot = true;
        let mut r = rig(cfg);
        r.drive.begin();
        assert!(!r.drive.is_coordinated_routine_running());
    }

    #[test]
    fn stop_neutralizes_both_wheels() {
        let mut r = rig(drive_config());
        r.drive.set_twist(1.0, 0.5);
        r.drive.update(10_000, 0.01);
        r.drive.stop();
        assert_eq!(r.drive.twist_ref(), (0.0, 0.0));
        assert_eq!(r.drive.left().motor().last_duty(), (0, 0));
        assert_eq!(r.drive.right().motor().last_duty(), (0, 0));
    }
}

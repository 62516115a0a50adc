//! Rotate-then-advance maneuvers from symmetric trapezoidal profiles.
//!
//! The runner is the drive's reference consumer: each tick it produces a
//! body twist for `DifferentialDrive::set_twist` and reports completion
//! through `is_finished`. Profiles are symmetric trapezoids with
//! `t1 = tf/3`, `t2 = 2·tf/3` and `tf = 1.5·|Δq|/peak`, which makes the
//! traveled distance integrate exactly to `Δq`.

/// Symmetric trapezoidal velocity profile covering a signed displacement.
#[derive(Debug, Clone, Copy)]
pub struct TrapezoidProfile {
    peak: f32,
    sign: f32,
    t1: f32,
    t2: f32,
    tf: f32,
}

impl TrapezoidProfile {
    /// Profile for displacement `delta` at peak rate `peak` (> 0).
    pub fn new(delta: f32, peak: f32) -> Self {
        assert!(peak > 0.0, "peak rate must be positive");
        let tf = 1.5 * delta.abs() / peak;
        Self {
            peak,
            sign: if delta < 0.0 { -1.0 } else { 1.0 },
            t1: tf / 3.0,
            t2: 2.0 * tf / 3.0,
            tf,
        }
    }

    /// Signed rate at time `t` since profile start.
    pub fn velocity(&self, t: f32) -> f32 {
        if self.tf <= 0.0 || t < 0.0 || t >= self.tf {
            return 0.0;
        }
        let mag = if t < self.t1 {
            self.peak * t / self.t1
        } else if t < self.t2 {
            self.peak
        } else {
            self.peak * (self.tf - t) / (self.tf - self.t2)
        };
        self.sign * mag
    }

    /// Total duration [s]. Zero for a zero displacement.
    #[inline]
    pub fn duration(&self) -> f32 {
        self.tf
    }
}

/// Maneuver phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Rotate,
    Advance,
    Done,
}

/// Two-phase maneuver: rotate in place over `Δθ`, then advance `Δd`.
#[derive(Debug, Clone, Copy)]
pub struct ManeuverRunner {
    rotate: TrapezoidProfile,
    advance: TrapezoidProfile,
    phase: Phase,
    t: f32,
}

impl ManeuverRunner {
    /// Plan a maneuver: `dtheta` [rad] at peak `w_peak` [rad/s], then
    /// `distance` [m] at peak `v_peak` [m/s].
    pub fn new(dtheta: f32, distance: f32, w_peak: f32, v_peak: f32) -> Self {
        let rotate = TrapezoidProfile::new(dtheta, w_peak);
        let advance = TrapezoidProfile::new(distance, v_peak);
        let phase = if rotate.duration() > 0.0 {
            Phase::Rotate
        } else if advance.duration() > 0.0 {
            Phase::Advance
        } else {
            Phase::Done
        };
        Self {
            rotate,
            advance,
            phase,
            t: 0.0,
        }
    }

    /// Produce the twist for the next tick and advance internal time.
    pub fn tick(&mut self, dt_s: f32) -> (f32, f32) {
        let out = match self.phase {
            Phase::Rotate => (0.0, self.rotate.velocity(self.t)),
            Phase::Advance => (self.advance.velocity(self.t), 0.0),
            Phase::Done => (0.0, 0.0),
        };
        self.t += dt_s;
        match self.phase {
            Phase::Rotate if self.t >= self.rotate.duration() => {
                self.t = 0.0;
                self.phase = if self.advance.duration() > 0.0 {
                    Phase::Advance
                } else {
                    Phase::Done
                };
            }
            Phase::Advance if self.t >= self.advance.duration() => {
                self.phase = Phase::Done;
            }
            _ => {}
        }
        out
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Done
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

//! Velocity PID over scalar magnitudes.
//!
//! Two discretizations behind a construction-time selector:
//!
//! - **Incremental** (velocity form): the whole controller collapses to
//!   one update `u[n] = u[n−1] + c0·e[n] + c1·e[n−1] + c2·e[n−2]` with
//!   coefficients precomputed from (Kp, Ki, Kd, Ts). Clamping the stored
//!   output doubles as anti-windup.
//! - **Parallel PIDF**: derivative on measurement through a first-order
//!   filter (Tf), trapezoidal integrator with a clamping anti-windup that
//!   skips integration while the unsaturated output already sits past a
//!   limit and the error pushes further.
//!
//! The caller passes magnitudes; the default output range is [0, 1] and
//! sign is reapplied outside. `reset` gives bumpless transfer on
//! reference sign flips.

use rover_common::config::PidConfig;
use rover_common::state::PidMode;

/// Discrete velocity-form / parallel PIDF controller.
#[derive(Debug, Clone)]
pub struct PidVel {
    kp: f32,
    ki: f32,
    kd: f32,
    tf: f32,
    ts: f32,
    mode: PidMode,
    clamp: bool,
    u_min: f32,
    u_max: f32,
    anti_windup: bool,
    // Incremental coefficients, recomputed only when gains or Ts change.
    c0: f32,
    c1: f32,
    c2: f32,
    // Shared state.
    u_prev: f32,
    e1: f32,
    e2: f32,
    // PIDF state.
    integral: f32,
    dy_filt: f32,
    y_prev: f32,
    has_y_prev: bool,
    /// While held, updates return the previous output without mutating
    /// any state (open-loop assist overrides the command downstream).
    hold: bool,
}

impl PidVel {
    pub fn from_config(cfg: &PidConfig) -> Self {
        let mut pid = Self {
            kp: cfg.kp,
            ki: cfg.ki,
            kd: cfg.kd,
            tf: cfg.tf,
            ts: cfg.ts,
            mode: cfg.mode,
            clamp: cfg.clamp,
            u_min: cfg.u_min,
            u_max: cfg.u_max,
            anti_windup: cfg.anti_windup,
            c0: 0.0,
            c1: 0.0,
            c2: 0.0,
            u_prev: 0.0,
            e1: 0.0,
            e2: 0.0,
            integral: 0.0,
            dy_filt: 0.0,
            y_prev: 0.0,
            has_y_prev: false,
            hold: false,
        };
        pid.recompute_coefficients();
        pid
    }

    /// Change gains (and optionally Ts); coefficients are recomputed here
    /// and nowhere else.
    pub fn set_gains(&mut self, kp: f32, ki: f32, kd: f32, ts: f32) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        if ts > 0.0 {
            self.ts = ts;
        }
        self.recompute_coefficients();
    }

    fn recompute_coefficients(&mut self) {
        let kd_ts = self.kd / self.ts;
        self.c0 = self.kp + kd_ts;
        self.c1 = -self.kp + self.ki * self.ts - 2.0 * kd_ts;
        self.c2 = kd_ts;
    }

    /// One controller step: reference and measurement magnitudes in,
    /// command magnitude out.
    pub fn update(&mut self, reference: f32, measured: f32) -> f32 {
        if self.hold {
            return self.saturate(self.u_prev);
        }
        match self.mode {
            PidMode::Incremental => self.update_incremental(reference, measured),
            PidMode::ParallelPidf => self.update_pidf(reference, measured),
        }
    }

    fn update_incremental(&mut self, reference: f32, measured: f32) -> f32 {
        let e = reference - measured;
        let mut u = self.u_prev + self.c0 * e + self.c1 * self.e1 + self.c2 * self.e2;
        u = self.saturate(u);
        self.u_prev = u;
        self.e2 = self.e1;
        self.e1 = e;
        u
    }

    fn update_pidf(&mut self, reference: f32, measured: f32) -> f32 {
        let e = reference - measured;

        // Derivative on measurement, first-order filtered.
        let alpha = self.ts / (self.tf + self.ts);
        let dy = if self.has_y_prev {
            measured - self.y_prev
        } else {
            0.0
        };
        self.dy_filt = (1.0 - alpha) * self.dy_filt + alpha * dy;
        self.y_prev = measured;
        self.has_y_prev = true;
        let d = -self.kd * self.dy_filt / self.ts;

        // Trapezoidal integration with clamping anti-windup: hold the
        // integrator while the unsaturated output is already past a limit
        // and the error would push it further out.
        let u_unsat = self.kp * e + self.integral + d;
        let pushing_high = u_unsat >= self.u_max && e > 0.0;
        let pushing_low = u_unsat <= self.u_min && e < 0.0;
        let windup_blocked = self.anti_windup && self.clamp && (pushing_high || pushing_low);
        if !windup_blocked {
            self.integral += self.ki * (self.ts / 2.0) * (e + self.e1);
        }

        let u = self.saturate(self.kp * e + self.integral + d);
        self.u_prev = u;
        self.e2 = self.e1;
        self.e1 = e;
        u
    }

    #[inline]
    fn saturate(&self, u: f32) -> f32 {
        if self.clamp {
            u.clamp(self.u_min, self.u_max)
        } else {
            u
        }
    }

    /// Bumpless reinitialization: the next update continues from `u0`
    /// with a clean error history.
    pub fn reset(&mut self, u0: f32) {
        self.u_prev = u0;
        self.e1 = 0.0;
        self.e2 = 0.0;
        self.integral = u0;
        self.dy_filt = 0.0;
        self.has_y_prev = false;
    }

    /// Freeze/unfreeze the controller state while an external command
    /// overrides its output.
    pub fn set_hold(&mut self, hold: bool) {
        self.hold = hold;
    }

    #[inline]
    pub fn held(&self) -> bool {
        self.hold
    }

    /// Last computed output.
    #[inline]
    pub fn output(&self) -> f32 {
        self.u_prev
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

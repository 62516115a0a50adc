//! Differential-drive kinematics, ramps and the direction-preserving
//! wheel-limit rescale.
//!
//! Pure functions; all chassis state lives in the coordinator.

/// Wheel angular velocities (right, left) [rad/s] for a body twist
/// (v [m/s], w [rad/s]) with wheel radius `r` and track width `track`.
#[inline]
pub fn wheel_speeds(v: f32, w: f32, r: f32, track: f32) -> (f32, f32) {
    let half_track = track / 2.0;
    let omega_r = (v + half_track * w) / r;
    let omega_l = (v - half_track * w) / r;
    (omega_r, omega_l)
}

/// Body twist (v, w) realized by wheel angular velocities (right, left).
#[inline]
pub fn twist_from_wheels(omega_r: f32, omega_l: f32, r: f32, track: f32) -> (f32, f32) {
    let v = r * (omega_r + omega_l) / 2.0;
    let w = r * (omega_r - omega_l) / track;
    (v, w)
}

/// First-order ramp: move `current` toward `target` by at most
/// `rate · dt`. A non-positive rate applies the target instantly.
#[inline]
pub fn ramp_toward(current: f32, target: f32, rate: f32, dt: f32) -> f32 {
    if rate <= 0.0 || dt <= 0.0 {
        return target;
    }
    let max_step = rate * dt;
    current + (target - current).clamp(-max_step, max_step)
}

/// Symmetric clamp. A non-positive limit disables it.
#[inline]
pub fn clamp_symmetric(value: f32, limit: f32) -> f32 {
    if limit > 0.0 {
        value.clamp(-limit, limit)
    } else {
        value
    }
}

/// Scale the twist down so neither wheel exceeds `limit` [rad/s].
///
/// Both components shrink by the same factor, so the v:w ratio — the
/// shape of the commanded trajectory — is preserved exactly under
/// saturation. Returns the adjusted twist and the wheel speeds derived
/// from it.
pub fn rescale_to_wheel_limit(
    v: f32,
    w: f32,
    r: f32,
    track: f32,
    limit: f32,
) -> (f32, f32, f32, f32) {
    let (omega_r, omega_l) = wheel_speeds(v, w, r, track);
    let peak = omega_r.abs().max(omega_l.abs());
    if limit <= 0.0 || peak <= limit {
        return (v, w, omega_r, omega_l);
    }
    let k = limit / peak;
    let (v, w) = (v * k, w * k);
    let (omega_r, omega_l) = wheel_speeds(v, w, r, track);
    (v, w, omega_r, omega_l)
}

// ─── Tests ──────────────────────────────────────────────────────────

//! Physics-based wheel plant for off-target testing.
//!
//! Models one driven wheel as a first-order angular-velocity response to
//! the applied command, plus a Hall magnet ring with configurable
//! per-sector spacing. Each boundary crossing emits a timestamped pulse,
//! which tests feed into the control unit's pulse capture. Irregular
//! spacing reproduces the systematic per-sector period bias the
//! calibration pipeline exists to remove.

use tracing::debug;

/// Plant parameters.
#[derive(Debug, Clone)]
pub struct WheelPlantConfig {
    /// Magnets per revolution.
    pub ppr: usize,
    /// First-order time constant of the velocity response [s].
    pub tau_s: f64,
    /// Steady-state angular velocity at |u| = 1 [rad/s].
    pub omega_at_full: f64,
    /// Relative sector widths, one per magnet; normalized internally.
    /// An empty vector means uniform spacing.
    pub gaps: Vec<f64>,
}

impl Default for WheelPlantConfig {
    fn default() -> Self {
        Self {
            ppr: 6,
            tau_s: 0.15,
            omega_at_full: 20.0,
            gaps: Vec::new(),
        }
    }
}

/// One simulated wheel: drive command in, timestamped pulses out.
#[derive(Debug)]
pub struct WheelPlant {
    cfg: WheelPlantConfig,
    /// Boundary positions as cumulative revolution fractions, ascending,
    /// last element exactly 1.0.
    boundaries: Vec<f64>,
    /// Signed angular velocity [rad/s].
    omega: f64,
    /// Unwrapped position [revolutions].
    angle_rev: f64,
}

impl WheelPlant {
    pub fn new(cfg: WheelPlantConfig) -> Self {
        assert!(cfg.ppr >= 1, "plant needs at least one magnet");
        let gaps: Vec<f64> = if cfg.gaps.is_empty() {
            vec![1.0; cfg.ppr]
        } else {
            assert_eq!(cfg.gaps.len(), cfg.ppr, "one gap per magnet");
            cfg.gaps.clone()
        };
        let total: f64 = gaps.iter().sum();
        assert!(total > 0.0, "gap widths must sum to a positive value");

        let mut boundaries = Vec::with_capacity(cfg.ppr);
        let mut acc = 0.0;
        for g in &gaps {
            acc += g / total;
            boundaries.push(acc);
        }
        // Guard against accumulated rounding on the last boundary.
        *boundaries.last_mut().unwrap() = 1.0;

        debug!(ppr = cfg.ppr, "wheel plant created");
        Self {
            cfg,
            boundaries,
            omega: 0.0,
            angle_rev: 0.0,
        }
    }

    /// Current signed angular velocity [rad/s].
    pub fn omega(&self) -> f64 {
        self.omega
    }

    /// Advance the plant by `dt_us` under command `u ∈ [−1, 1]`, emitting
    /// one `on_pulse(timestamp_us)` call per magnet boundary crossed.
    ///
    /// `now_us` is the timestamp at the *start* of the step; pulse
    /// timestamps are interpolated inside it assuming constant velocity
    /// over the step (valid for sub-millisecond steps).
    pub fn advance<F: FnMut(u64)>(&mut self, u: f64, now_us: u64, dt_us: u64, mut on_pulse: F) {
        let dt = dt_us as f64 * 1e-6;
        let target = u.clamp(-1.0, 1.0) * self.cfg.omega_at_full;
        // Exact first-order response over the step.
        let k = (-dt / self.cfg.tau_s).exp();
        self.omega = target + (self.omega - target) * k;

        let start = self.angle_rev;
        let end = start + self.omega * dt / core::f64::consts::TAU;
        if (end - start).abs() < f64::EPSILON {
            self.angle_rev = end;
            return;
        }

        let span = end - start;
        let mut emit = |pos: f64| {
            let frac = ((pos - start) / span).clamp(0.0, 1.0);
            on_pulse(now_us + (frac * dt_us as f64) as u64);
        };

        if span > 0.0 {
            let mut x = self.next_boundary_above(start);
            while x <= end {
                emit(x);
                x = self.next_boundary_above(x);
            }
        } else {
            let mut x = self.next_boundary_below(start);
            while x >= end {
                emit(x);
                x = self.next_boundary_below(x);
            }
        }
        self.angle_rev = end;
    }

    /// Smallest boundary position strictly above `pos` [revolutions].
    fn next_boundary_above(&self, pos: f64) -> f64 {
        let base = pos.floor();
        for rev in [0.0, 1.0] {
            for b in &self.boundaries {
                let cand = base + rev + b;
                if cand > pos + 1e-12 {
                    return cand;
                }
            }
        }
        base + 1.0
    }

    /// Largest boundary position strictly below `pos` [revolutions].
    fn next_boundary_below(&self, pos: f64) -> f64 {
        let base = pos.floor();
        for rev in [0.0, -1.0] {
            for b in self.boundaries.iter().rev() {
                let cand = base + rev + b;
                if cand < pos - 1e-12 {
                    return cand;
                }
            }
        }
        base - 1.0
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pulses_over(plant: &mut WheelPlant, u: f64, steps: usize, dt_us: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut now = 0u64;
        for _ in 0..steps {
            plant.advance(u, now, dt_us, |t| out.push(t));
            now += dt_us;
        }
        out
    }

    #[test]
    fn idle_plant_emits_nothing() {
        let mut plant = WheelPlant::new(WheelPlantConfig::default());
        let pulses = pulses_over(&mut plant, 0.0, 100, 1000);
        assert!(pulses.is_empty());
        assert_eq!(plant.omega(), 0.0);
    }

    #[test]
    fn velocity_converges_to_commanded() {
        let mut plant = WheelPlant::new(WheelPlantConfig::default());
        pulses_over(&mut plant, 0.5, 5000, 1000); // 5 s >> tau
        assert!((plant.omega() - 10.0).abs() < 0.05, "omega={}", plant.omega());
    }

    #[test]
    fn uniform_ring_pulse_rate_matches_omega() {
        let cfg = WheelPlantConfig {
            ppr: 6,
            tau_s: 0.05,
            omega_at_full: 20.0,
            gaps: Vec::new(),
        };
        let mut plant = WheelPlant::new(cfg);
        // Settle, then count pulses over 1 s at ω = 20 rad/s:
        // 20/2π rev/s × 6 pulses/rev ≈ 19.1 pulses/s.
        pulses_over(&mut plant, 1.0, 1000, 1000);
        let pulses = pulses_over(&mut plant, 1.0, 1000, 1000);
        assert!((18..=21).contains(&pulses.len()), "n={}", pulses.len());
    }

    #[test]
    fn irregular_ring_periods_track_gaps() {
        // One wide sector: its inter-pulse interval must be ~2× the rest.
        let cfg = WheelPlantConfig {
            ppr: 4,
            tau_s: 0.02,
            omega_at_full: 10.0,
            gaps: vec![2.0, 1.0, 1.0, 1.0],
        };
        let mut plant = WheelPlant::new(cfg);
        pulses_over(&mut plant, 1.0, 2000, 500);
        let ts = pulses_over(&mut plant, 1.0, 4000, 500);
        assert!(ts.len() > 8);
        let periods: Vec<u64> = ts.windows(2).map(|w| w[1] - w[0]).collect();
        let max = *periods.iter().max().unwrap() as f64;
        let min = *periods.iter().min().unwrap() as f64;
        assert!((max / min - 2.0).abs() < 0.25, "max={max} min={min}");
    }

    #[test]
    fn reverse_motion_emits_pulses() {
        let mut plant = WheelPlant::new(WheelPlantConfig::default());
        let pulses = pulses_over(&mut plant, -1.0, 2000, 1000);
        assert!(!pulses.is_empty());
        assert!(plant.omega() < 0.0);
    }

    #[test]
    fn pulse_timestamps_are_monotonic() {
        let mut plant = WheelPlant::new(WheelPlantConfig::default());
        let ts = pulses_over(&mut plant, 0.8, 3000, 1000);
        for w in ts.windows(2) {
            assert!(w[1] >= w[0]);
        }
    }
}

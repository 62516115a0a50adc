//! Deterministic control cycle: snapshot → estimate → control → output.
//!
//! The control task runs at a fixed cadence (default 100 Hz) and owns all
//! control-plane state. With the `rt` feature the task locks memory,
//! prefaults its stack, pins to a core, takes SCHED_FIFO and paces itself
//! with `clock_nanosleep(TIMER_ABSTIME)` for drift-free timing; without
//! it a plain sleep loop approximates the cadence for development and
//! tests.
//!
//! Every cycle body is timed against the budget implied by the
//! configured `cycle_time_us`; the drive math must leave most of that
//! period free for pacing jitter, so a single overrun is worth a warning
//! and a counter, not an abort — velocity estimation degrades gracefully
//! across a late tick because pulses are replayed from the snapshot
//! counter.

use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::drive::DifferentialDrive;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// Budget-aware timing statistics for the control cycle.
///
/// Owned by the [`CycleRunner`] and updated on every [`CycleRunner::step`]
/// with no allocation. The budget is the configured cycle period; a body
/// that runs past it counts as an overrun.
#[derive(Debug, Clone)]
pub struct CycleStats {
    budget_ns: i64,
    /// Cycles executed so far.
    pub cycle_count: u64,
    /// Duration of the most recent cycle body [ns].
    pub last_cycle_ns: i64,
    /// Shortest cycle body seen [ns].
    pub min_cycle_ns: i64,
    /// Longest cycle body seen [ns].
    pub max_cycle_ns: i64,
    /// Bodies that ran past the budget.
    pub overruns: u64,
    sum_cycle_ns: i64,
}

impl CycleStats {
    /// Fresh statistics for a cycle budget of `budget_ns`.
    pub const fn new(budget_ns: i64) -> Self {
        Self {
            budget_ns,
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            overruns: 0,
            sum_cycle_ns: 0,
        }
    }

    /// Record one cycle body duration. Returns `true` when it overran
    /// the budget. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64) -> bool {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        if duration_ns < self.min_cycle_ns {
            self.min_cycle_ns = duration_ns;
        }
        if duration_ns > self.max_cycle_ns {
            self.max_cycle_ns = duration_ns;
        }
        self.sum_cycle_ns += duration_ns;
        let overran = duration_ns > self.budget_ns;
        if overran {
            self.overruns += 1;
        }
        overran
    }

    /// Average cycle body duration [ns] (0 before the first cycle).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }

    /// The configured cycle budget [ns].
    #[inline]
    pub fn budget_ns(&self) -> i64 {
        self.budget_ns
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Errors while promoting the control task to real-time scheduling.
#[derive(Debug, Clone, Error)]
pub enum CycleError {
    /// An RT system call was refused (missing privileges, bad core id).
    #[error("RT setup: {0}")]
    RtSetup(String),
}

/// Stack bytes touched before entering the loop so the high-rate path
/// never page-faults. The deepest cycle frames are the calibration
/// finishers: two wheels × two acquisition grids of PPR_LIMIT ×
/// MAX_LAPS_LIMIT samples plus their fill flags is under 16 KiB, so
/// 64 KiB prefaults the worst case with ample margin.
#[cfg(feature = "rt")]
const PREFAULT_STACK_BYTES: usize = 64 * 1024;

#[cfg(feature = "rt")]
fn prefault_stack() {
    let mut buf = [0u8; PREFAULT_STACK_BYTES];
    for byte in buf.iter_mut() {
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

/// Promote the calling thread for the control cycle: lock memory,
/// prefault the stack, pin to the configured core and take SCHED_FIFO at
/// the configured priority.
///
/// Without the `rt` feature this is a no-op so development builds and
/// tests run under the normal scheduler.
#[cfg(feature = "rt")]
pub fn rt_setup(cfg: &rover_common::config::ControlUnitConfig) -> Result<(), CycleError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::sys::mman::{mlockall, MlockallFlags};
    use nix::unistd::Pid;

    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))?;

    prefault_stack();

    let mut cpuset = CpuSet::new();
    cpuset.set(cfg.rt_cpu_core).map_err(|e| {
        CycleError::RtSetup(format!("cpu core {} rejected: {e}", cfg.rt_cpu_core))
    })?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))?;

    let param = libc::sched_param {
        sched_priority: cfg.rt_priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {}) failed: {err}",
            cfg.rt_priority
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
pub fn rt_setup(_cfg: &rover_common::config::ControlUnitConfig) -> Result<(), CycleError> {
    Ok(())
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// Owns the drive, paces its updates and times every cycle body.
pub struct CycleRunner {
    drive: DifferentialDrive,
    cycle_time_us: u32,
    stats: CycleStats,
    epoch: Instant,
}

impl CycleRunner {
    pub fn new(drive: DifferentialDrive, cycle_time_us: u32) -> Self {
        Self {
            drive,
            cycle_time_us,
            stats: CycleStats::new(i64::from(cycle_time_us) * 1000),
            epoch: Instant::now(),
        }
    }

    /// Microseconds since the runner was created.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Execute and time one cycle body at the given timestamp.
    pub fn step(&mut self, now_us: u64) {
        let start = Instant::now();
        let dt_s = self.cycle_time_us as f32 * 1e-6;
        self.drive.update(now_us, dt_s);

        let duration_ns = start.elapsed().as_nanos() as i64;
        if self.stats.record(duration_ns) {
            warn!(
                actual_ns = duration_ns,
                budget_ns = self.stats.budget_ns(),
                "cycle overran its budget"
            );
        }
    }

    /// Enter the paced loop. Runs until the process is terminated.
    pub fn run(&mut self) {
        info!(cycle_time_us = self.cycle_time_us, "control cycle starting");
        self.drive.begin();

        #[cfg(feature = "rt")]
        {
            self.run_rt_loop();
        }

        #[cfg(not(feature = "rt"))]
        {
            self.run_sim_loop();
        }
    }

    /// Drift-free pacing on `clock_nanosleep(TIMER_ABSTIME)`.
    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self) {
        use nix::sys::time::TimeSpec;
        use nix::time::{clock_gettime, clock_nanosleep, ClockId, ClockNanosleepFlags};

        fn add_ns(ts: TimeSpec, ns: i64) -> TimeSpec {
            let mut secs = ts.tv_sec();
            let mut nanos = ts.tv_nsec() + ns;
            while nanos >= 1_000_000_000 {
                secs += 1;
                nanos -= 1_000_000_000;
            }
            TimeSpec::new(secs, nanos)
        }

        let clock = ClockId::CLOCK_MONOTONIC;
        let period_ns = self.stats.budget_ns();
        let mut next_wake = match clock_gettime(clock) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "clock_gettime failed, falling back to sleep pacing");
                return self.run_sim_loop();
            }
        };

        loop {
            next_wake = add_ns(next_wake, period_ns);
            let now_us = self.now_us();
            self.step(now_us);
            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        }
    }

    /// Plain sleep pacing for development and tests.
    fn run_sim_loop(&mut self) {
        let cycle = std::time::Duration::from_micros(u64::from(self.cycle_time_us));
        loop {
            let start = Instant::now();
            let now_us = self.now_us();
            self.step(now_us);
            if let Some(remaining) = cycle.checked_sub(start.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn drive(&self) -> &DifferentialDrive {
        &self.drive
    }

    pub fn drive_mut(&mut self) -> &mut DifferentialDrive {
        &mut self.drive
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

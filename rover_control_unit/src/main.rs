//! Rover control unit entry point.
//!
//! Hardware peripheral bringup lives outside this crate, so the binary
//! runs the control brain software-in-the-loop: two simulated wheel
//! plants stand in for the motors and Hall rings, wired through the same
//! HAL seams the firmware integration uses. This is the development and
//! tuning harness — boot alignment, coordinated routines and the full
//! capture → calibrate → estimate → PID → PWM path all run for real.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rover_common::state::WheelSide;
use rover_hal::pwm::RecordingPwm;
use rover_hal::sim::{WheelPlant, WheelPlantConfig};
use rover_hal::store::{FileStore, KvStore, MemStore};

use rover_control_unit::config::load_config;
use rover_control_unit::cycle::{rt_setup, CycleRunner};
use rover_control_unit::drive::{DifferentialDrive, ManeuverRunner, Wheel};
use rover_control_unit::encoder::PulseCapture;

#[derive(Debug, Parser)]
#[command(name = "rover_control_unit", about = "Differential-drive control unit (software-in-the-loop)")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/rover.toml")]
    config: PathBuf,

    /// Stop after this many seconds (runs until terminated otherwise).
    #[arg(long)]
    duration_s: Option<u64>,

    /// Drive a demo maneuver once boot routines settle: rotate by PI,
    /// then advance 0.5 m.
    #[arg(long)]
    maneuver: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let cfg = match load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, path = %args.config.display(), "falling back to default configuration");
            rover_common::config::ControlUnitConfig::default()
        }
    };

    if let Err(e) = rt_setup(&cfg) {
        warn!(error = %e, "RT setup failed, continuing without RT scheduling");
    }

    // ── Wire the wheels through the HAL seams ───────────────────────
    let left_cap = Arc::new(PulseCapture::new(cfg.drive.left.encoder.min_gap_us));
    let right_cap = Arc::new(PulseCapture::new(cfg.drive.right.encoder.min_gap_us));

    let open_store = |label: &str| -> Box<dyn KvStore> {
        match FileStore::open(&cfg.store_path) {
            Ok(s) => Box::new(s),
            Err(e) => {
                // An unwritable store directory still boots, just without
                // persistence across power cycles.
                warn!(error = %e, label, "store unavailable, using volatile records");
                Box::new(MemStore::new())
            }
        }
    };

    let left = Wheel::new(
        WheelSide::Left,
        &cfg.drive.left,
        Arc::clone(&left_cap),
        Box::new(RecordingPwm::new()),
        open_store("left wheel"),
    );
    let right = Wheel::new(
        WheelSide::Right,
        &cfg.drive.right,
        Arc::clone(&right_cap),
        Box::new(RecordingPwm::new()),
        open_store("right wheel"),
    );
    let drive = DifferentialDrive::new(&cfg.drive, left, right);

    // ── Simulated plants with a deliberately irregular magnet ring ──
    let plant_cfg = |ppr: u16| WheelPlantConfig {
        ppr: ppr as usize,
        tau_s: 0.15,
        omega_at_full: 22.0,
        gaps: (0..ppr)
            .map(|k| if k == 1 { 1.6 } else { 1.0 })
            .collect(),
    };
    let mut left_plant = WheelPlant::new(plant_cfg(cfg.drive.left.encoder.ppr));
    let mut right_plant = WheelPlant::new(plant_cfg(cfg.drive.right.encoder.ppr));

    let mut runner = CycleRunner::new(drive, cfg.cycle_time_us);
    runner.drive_mut().begin();

    let mut maneuver = args
        .maneuver
        .then(|| ManeuverRunner::new(core::f32::consts::PI, 0.5, 2.0, 0.4));

    // ── Software-in-the-loop cycle ──────────────────────────────────
    let dt_us = u64::from(cfg.cycle_time_us);
    let dt_s = cfg.cycle_time_us as f32 * 1e-6;
    let cycle = std::time::Duration::from_micros(dt_us);
    let started = std::time::Instant::now();
    let mut last_report = started;

    info!("control unit running (software-in-the-loop)");
    loop {
        let tick_start = std::time::Instant::now();
        let now_us = runner.now_us();

        // Plants respond to the previous tick's applied commands.
        let u_l = f64::from(runner.drive().left().motor().applied());
        let u_r = f64::from(runner.drive().right().motor().applied());
        left_plant.advance(u_l, now_us, dt_us, |t| left_cap.on_pulse(t));
        right_plant.advance(u_r, now_us, dt_us, |t| right_cap.on_pulse(t));

        let mut maneuver_done = false;
        if let Some(m) = &mut maneuver {
            if !runner.drive().is_coordinated_routine_running() {
                let (v, w) = m.tick(dt_s);
                runner.drive_mut().set_twist(v, w);
                maneuver_done = m.is_finished();
            }
        }
        if maneuver_done {
            info!("demo maneuver finished");
            maneuver = None;
        }

        runner.step(now_us);

        if last_report.elapsed().as_secs() >= 1 {
            last_report = std::time::Instant::now();
            let d = runner.drive();
            let (v, w) = d.twist_ref();
            info!(
                v_ref = v,
                w_ref = w,
                left_rpm = d.left().estimator().rpm(),
                right_rpm = d.right().estimator().rpm(),
                left_status = ?d.left().status(),
                right_status = ?d.right().status(),
                cycle_avg_ns = runner.stats().avg_cycle_ns(),
                cycle_max_ns = runner.stats().max_cycle_ns,
                cycle_overruns = runner.stats().overruns,
                "telemetry"
            );
        }

        if let Some(limit) = args.duration_s {
            if started.elapsed().as_secs() >= limit {
                break;
            }
        }
        if let Some(remaining) = cycle.checked_sub(tick_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    runner.drive_mut().stop();
    info!("control unit stopped");
}

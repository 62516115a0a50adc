//! Full cycle-body benchmark: one drive update with live pulse traffic.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use rover_common::config::{DriveConfig, WheelConfig};
use rover_common::state::WheelSide;
use rover_control_unit::drive::{DifferentialDrive, Wheel};
use rover_control_unit::encoder::PulseCapture;
use rover_hal::pwm::RecordingPwm;
use rover_hal::store::MemStore;

fn rig() -> (DifferentialDrive, Arc<PulseCapture>, Arc<PulseCapture>) {
    let mut wheel_cfg = WheelConfig::default();
    wheel_cfg.encoder.ppr = 6;
    wheel_cfg.encoder.min_gap_us = 0;
    wheel_cfg.pid.kp = 0.005;
    wheel_cfg.pid.ki = 0.05;

    let mut cfg = DriveConfig::default();
    cfg.omega_wheel_max = 20.0;
    cfg.left = wheel_cfg.clone();
    cfg.right = wheel_cfg;

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
    (DifferentialDrive::new(&cfg, left, right), left_cap, right_cap)
}

fn bench_cycle_body(c: &mut Criterion) {
    let (mut drive, left_cap, right_cap) = rig();
    drive.set_twist(0.5, 0.2);

    c.bench_function("drive_update_with_pulses", |b| {
        let mut now_us = 0u64;
        b.iter(|| {
            now_us += 10_000;
            // One pulse per wheel per tick keeps the estimator hot path busy.
            left_cap.on_pulse(now_us - 500);
            right_cap.on_pulse(now_us - 400);
            drive.update(black_box(now_us), black_box(0.01));
        })
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let cap = PulseCapture::new(0);
    cap.on_pulse(1_000);
    cap.on_pulse(2_000);
    c.bench_function("pulse_snapshot", |b| b.iter(|| black_box(cap.snapshot())));
}

criterion_group!(benches, bench_cycle_body, bench_snapshot);
criterion_main!(benches);

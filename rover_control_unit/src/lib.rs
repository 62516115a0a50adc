//! # Rover Control Unit Library
//!
//! Closed-loop controller for a two-wheeled differential-drive base with
//! low-resolution Hall wheel encoders. Runs a deterministic 100 Hz cycle
//! that snapshots interrupt-driven pulse captures, routes per-sector
//! periods through a learned correction pipeline, estimates wheel
//! velocity, and closes the loop with per-wheel PID onto a two-channel
//! PWM output stage.
//!
//! ## Subsystems
//!
//! 1. **encoder** — pulse capture snapshots and velocity estimation
//! 2. **calib** — per-magnet correction LUTs, acquisition runs, alignment
//! 3. **control** — PID discretizations and the PWM output stage
//! 4. **drive** — per-wheel supervision and twist-level coordination
//! 5. **cycle** — fixed-cadence task with optional PREEMPT_RT setup
//!
//! ## Zero-Allocation Control Path
//!
//! All calibration arenas and runtime state are fixed-size and allocated
//! at construction. The cycle body performs no heap allocation;
//! persistence happens only at boot and on routine completion.

pub mod calib;
pub mod config;
pub mod control;
pub mod cycle;
pub mod drive;
pub mod encoder;

//! Sector-indexed calibration: correction LUTs, acquisition runs,
//! alignment and persistence.
//!
//! Low-resolution Hall rings have mechanically imperfect magnet spacing,
//! so raw per-sector periods carry a systematic bias. This subsystem
//! learns a multiplicative correction per magnet and direction, persists
//! it across power cycles, and re-phases the running sector index against
//! the learned pattern after boot.

pub mod alignment;
pub mod calibrator;
pub mod run;
pub mod store;
pub mod table;

pub use calibrator::{AlignmentOutcome, AlignmentPoll, CalibrationPoll, SectorCalibrator};
pub use table::CorrectionTable;

use rover_common::state::StepDirection;
use thiserror::Error;

/// Reasons a calibration or alignment run refuses to start.
///
/// Start failures are local and leave no state behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoutineStartError {
    #[error("lap count {laps} out of range [1, {max}]")]
    InvalidLaps { laps: u8, max: u8 },
    #[error("no usable pattern for {dir:?}; calibrate first")]
    PatternNotReady { dir: StepDirection },
    #[error("a run of this kind is already active")]
    AlreadyRunning,
}

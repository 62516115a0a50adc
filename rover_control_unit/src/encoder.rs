//! Encoder subsystem: pulse capture and velocity estimation.

pub mod estimator;
pub mod pulse;

pub use estimator::VelocityEstimator;
pub use pulse::{PulseCapture, PulseSnapshot};

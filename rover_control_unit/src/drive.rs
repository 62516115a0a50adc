//! Drive layer: per-wheel supervision, chassis kinematics and the
//! twist-level coordinator.

pub mod coordinator;
pub mod kinematics;
pub mod trajectory;
pub mod wheel;

pub use coordinator::DifferentialDrive;
pub use trajectory::ManeuverRunner;
pub use wheel::Wheel;

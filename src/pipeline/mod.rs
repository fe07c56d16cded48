//! The three processing stages between ingress and egress:
//! normalization, planning, and control.

pub mod controller;
pub mod normalizer;
pub mod pid;
pub mod planner;

pub use controller::VehicleController;
pub use normalizer::SensorNormalizer;
pub use pid::{Pid, PidGains, PidState};
pub use planner::RoutePlanner;

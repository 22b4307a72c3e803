//! # wheelly-sim
//!
//! Deterministic 2-D simulation of the Wheelly robot. Produces the same
//! message stream as the real device through the shared `Robot` contract, so
//! the controller and the world modeller run unchanged headless — ground
//! truth for tests and training.
//!
//! Determinism: all noise draws come from a single seeded `StdRng`; the same
//! seed and command script reproduce the same trajectory and messages.

pub mod physics;
pub mod robot;

pub use physics::{
    ObstacleMap, RobotBody, MAX_ANGULAR_PPS, MAX_DISTANCE, MAX_PPS, OBSTACLE_SIZE, ROBOT_MASS,
    ROBOT_RADIUS, SAFE_DISTANCE,
};
pub use robot::{SimConfig, SimMarker, SimulatedRobot};

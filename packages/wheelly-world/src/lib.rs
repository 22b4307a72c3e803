//! # wheelly-world
//!
//! World model of the Wheelly robot control plane.
//!
//! These types are used by:
//! - `wheelly-ctrl`: the robot controller, real-robot driver and record dumper
//! - `wheelly-sim`: the simulated robot, which implements the same [`Robot`]
//!   contract as the real device driver
//!
//! ## Coordinate conventions
//!
//! - **World frame**: 2-D Cartesian, meters; X = east, Y = north
//! - **Directions**: unit vectors `(sin θ, cos θ)` where θ is measured from
//!   north, clockwise positive — 0° = north (+Y), 90° = east (+X)
//! - **Grid frame**: fixed-origin regular square cells; cell `(i, j)` centre is
//!   `center + ((i − (w−1)/2)·g, (j − (h−1)/2)·g)`
//!
//! ## Invariants
//! - Cell echo weight stays in [−1, +1] under every update
//! - Radar maps and world models are immutable values; every update returns a
//!   new instance sharing unchanged cells with the previous one
//! - Statuses for the same robot are non-decreasing in simulation time

pub mod areas;
pub mod codec;
pub mod geometry;
pub mod grid;
pub mod markers;
pub mod messages;
pub mod modeller;
pub mod radar;
pub mod robot;
pub mod status;
pub mod world;

pub use geometry::{clip, linear, Complex, Point};
pub use grid::GridTopology;
pub use markers::{LabelMarker, MarkerLocator, MARKER_WEIGHT_CEILING, UNKNOWN_QR_CODE};
pub use messages::{
    CameraEvent, ContactsMessage, MotionMessage, MoveCommand, ProxyMessage, RobotCommands,
    SupplyMessage, DISTANCE_SCALE,
};
pub use modeller::{RadarModeller, RadarParams, SensorSignal};
pub use radar::{MapCell, RadarMap};
pub use robot::{Robot, RobotError, RobotMessage};
pub use status::{RobotSpec, RobotStatus, SupplyDecoder};
pub use world::{GridMap, PolarMap, SectorStatus, WorldModel, WorldModelSpec, WorldModeller};

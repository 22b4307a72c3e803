//! robot.rs — the Robot contract shared by the real driver and the simulator

use std::future::Future;

use crate::geometry::Complex;
use crate::messages::{CameraEvent, ContactsMessage, MotionMessage, ProxyMessage, SupplyMessage};
use crate::status::RobotSpec;

/// One timed message produced by a robot.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotMessage {
    Motion(MotionMessage),
    Proxy(ProxyMessage),
    Contacts(ContactsMessage),
    Camera(CameraEvent),
    Supply(SupplyMessage),
}

impl RobotMessage {
    pub fn sim_time(&self) -> u64 {
        match self {
            RobotMessage::Motion(m) => m.sim_time,
            RobotMessage::Proxy(m) => m.sim_time,
            RobotMessage::Contacts(m) => m.sim_time,
            RobotMessage::Camera(m) => m.sim_time,
            RobotMessage::Supply(m) => m.sim_time,
        }
    }
}

/// Faults raised by a robot implementation.
#[derive(Debug, thiserror::Error)]
pub enum RobotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("robot not connected")]
    NotConnected,

    #[error("robot not configured")]
    NotConfigured,

    #[error("clock sync timed out")]
    SyncTimeout,

    #[error("configuration command not acknowledged: {0}")]
    ConfigTimeout(String),

    #[error("watchdog: no inbound traffic for {0} ms")]
    WatchdogUnsafe(u64),

    #[error("connection closed")]
    Closed,
}

/// The robot contract: the real TCP driver and the simulator both implement
/// it, so the controller runs unchanged against either.
///
/// `tick` advances the robot by `dt` milliseconds of simulation time (the
/// simulator steps its physics; the driver drains its sockets) and queues any
/// produced messages for [`Robot::poll_messages`]. Only a configured robot
/// dispatches messages.
///
/// The async operations are declared as `impl Future + Send` so the generic
/// controller can drive any implementation from spawned tasks;
/// implementations just write `async fn`.
pub trait Robot: Send {
    fn connect(&mut self) -> impl Future<Output = Result<(), RobotError>> + Send;

    /// Clock sync plus configuration handshake; emits an initial status.
    fn configure(&mut self) -> impl Future<Output = Result<(), RobotError>> + Send;

    fn tick(&mut self, dt: u64) -> impl Future<Output = Result<(), RobotError>> + Send;

    /// Drain the messages produced since the last call, in production order.
    fn poll_messages(&mut self) -> Vec<RobotMessage>;

    fn halt_command(&mut self) -> impl Future<Output = Result<(), RobotError>> + Send;

    fn move_command(
        &mut self,
        direction: Complex,
        speed: i32,
    ) -> impl Future<Output = Result<(), RobotError>> + Send;

    fn scan_command(
        &mut self,
        direction: Complex,
    ) -> impl Future<Output = Result<(), RobotError>> + Send;

    fn is_halt(&self) -> bool;

    fn simulation_time(&self) -> u64;

    fn spec(&self) -> &RobotSpec;

    fn close(&mut self) -> impl Future<Output = Result<(), RobotError>> + Send;
}

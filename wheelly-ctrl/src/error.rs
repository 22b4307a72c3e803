//! # error
//!
//! Controller error surface. Errors are recovered locally whenever possible;
//! surfacing means publishing on the error stream, so every kind is cloneable
//! and carries text rather than live I/O handles. The only path to
//! termination is an explicit shutdown.

use wheelly_world::robot::RobotError;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ControllerError {
    /// Socket read/write failure; triggers `Closing`.
    #[error("I/O error: {0}")]
    Io(String),

    /// Malformed inbound line; logged and dropped, never fatal.
    #[error("unparseable message: {0}")]
    ParseMessage(String),

    /// Configuration command echo not seen in time; triggers `Closing`.
    #[error("configuration timed out: {0}")]
    ConfigTimeout(String),

    /// No matching clock reply; configuration retries.
    #[error("clock sync timed out")]
    SyncTimeout,

    /// Inactivity beyond the watchdog timeout; triggers reconnect.
    #[error("watchdog: robot unsafe after {0} ms of silence")]
    WatchdogUnsafe(u64),

    /// `execute` called with an out-of-range argument; command rejected.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The user inference callback failed; the controller continues.
    #[error("inference callback failed: {0}")]
    UserCallback(String),
}

impl From<RobotError> for ControllerError {
    fn from(e: RobotError) -> Self {
        match e {
            RobotError::SyncTimeout => ControllerError::SyncTimeout,
            RobotError::ConfigTimeout(cmd) => ControllerError::ConfigTimeout(cmd),
            RobotError::WatchdogUnsafe(ms) => ControllerError::WatchdogUnsafe(ms),
            other => ControllerError::Io(other.to_string()),
        }
    }
}

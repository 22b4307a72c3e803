//! messages.rs — timed messages exchanged with the robot
//!
//! Every message is a value type with no back-references; timestamps are
//! milliseconds of simulation time. The wire representation (ASCII lines) and
//! the record codec are defined elsewhere; these structs are the in-core form.

use serde::{Deserialize, Serialize};

use crate::geometry::{Complex, Point};

/// Echo delay to distance: round-trip speed of sound, meters per microsecond.
pub const DISTANCE_SCALE: f64 = 170e-6;

// ── Motion ────────────────────────────────────────────────────────────────────

/// Odometry and drive state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionMessage {
    pub sim_time: u64,
    /// Robot position, encoder pulses.
    pub x_pulses: f64,
    pub y_pulses: f64,
    /// Yaw.
    pub direction: Complex,
    pub left_pps: f64,
    pub right_pps: f64,
    pub imu_failure: i32,
    pub halt: bool,
    /// Commanded motion currently tracked by the firmware.
    pub move_direction: Complex,
    pub move_speed: i32,
    pub left_target: i32,
    pub right_target: i32,
    pub left_power: i32,
    pub right_power: i32,
}

impl MotionMessage {
    /// Robot location in meters.
    pub fn location(&self, distance_per_pulse: f64) -> Point {
        Point::new(
            self.x_pulses * distance_per_pulse,
            self.y_pulses * distance_per_pulse,
        )
    }
}

// ── Proxy (range ping) ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyMessage {
    pub sim_time: u64,
    /// Sensor direction relative to the robot.
    pub sensor_direction: Complex,
    /// Echo delay in microseconds; 0 = no echo.
    pub echo_delay: u64,
    pub x_pulses: f64,
    pub y_pulses: f64,
    /// Robot yaw at ping time.
    pub direction: Complex,
}

impl ProxyMessage {
    /// Measured distance in meters; 0 = no echo.
    pub fn echo_distance(&self) -> f64 {
        self.echo_delay as f64 * DISTANCE_SCALE
    }

    pub fn location(&self, distance_per_pulse: f64) -> Point {
        Point::new(
            self.x_pulses * distance_per_pulse,
            self.y_pulses * distance_per_pulse,
        )
    }

    /// Absolute beam direction (robot yaw + sensor direction).
    pub fn absolute_direction(&self) -> Complex {
        self.direction.add(&self.sensor_direction)
    }

    /// World point of the echo, clamped to `max_distance`; the far clamp is
    /// also used when there is no echo.
    pub fn echo_point(&self, distance_per_pulse: f64, max_distance: f64) -> Point {
        let d = self.echo_distance();
        let d = if d > 0.0 { d.min(max_distance) } else { max_distance };
        self.location(distance_per_pulse)
            .add(&self.absolute_direction().unit().scale(d))
    }
}

// ── Contacts ──────────────────────────────────────────────────────────────────

/// Bumper and movement-permission state. Sensor flags are *clear* when true.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactsMessage {
    pub sim_time: u64,
    pub front_sensor: bool,
    pub rear_sensor: bool,
    pub can_move_forward: bool,
    pub can_move_backward: bool,
}

impl ContactsMessage {
    /// Front bumper pressed (front signal decodes from the front sensor only).
    pub fn front_contact(&self) -> bool {
        !self.front_sensor
    }

    /// Rear bumper pressed (rear signal decodes from the rear sensor only).
    pub fn rear_contact(&self) -> bool {
        !self.rear_sensor
    }
}

// ── Camera ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEvent {
    pub sim_time: u64,
    /// Recognised QR label; `"?"` when nothing was recognised.
    pub qr_code: String,
    pub width: i32,
    pub height: i32,
    /// Corner points of the recognised code, when the channel provides them.
    pub points: Option<Vec<Point>>,
}

// ── Supply ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupplyMessage {
    pub sim_time: u64,
    /// Raw battery ADC sample.
    pub supply_adc: i32,
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Drive command: stop, or track a direction at a wheel speed (pps).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MoveCommand {
    Halt,
    Move { direction: Complex, speed: i32 },
}

/// Commands returned by the inference callback. `None` fields leave the
/// corresponding pending slot untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RobotCommands {
    pub move_command: Option<MoveCommand>,
    pub scan_direction: Option<Complex>,
}

impl RobotCommands {
    pub fn halt() -> Self {
        Self {
            move_command: Some(MoveCommand::Halt),
            scan_direction: None,
        }
    }

    pub fn move_to(direction: Complex, speed: i32) -> Self {
        Self {
            move_command: Some(MoveCommand::Move { direction, speed }),
            scan_direction: None,
        }
    }

    pub fn scan(direction: Complex) -> Self {
        Self {
            move_command: None,
            scan_direction: Some(direction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_distance_scale() {
        let proxy = ProxyMessage {
            sim_time: 100,
            sensor_direction: Complex::zero(),
            echo_delay: 1700,
            x_pulses: 0.0,
            y_pulses: 0.0,
            direction: Complex::zero(),
        };
        assert!((proxy.echo_distance() - 0.289).abs() < 1e-9);
        let p = proxy.echo_point(1.0, 3.0);
        assert!(p.x.abs() < 1e-9);
        assert!((p.y - 0.289).abs() < 1e-9);
    }

    #[test]
    fn proxy_no_echo_clamps_to_max() {
        let proxy = ProxyMessage {
            sim_time: 0,
            sensor_direction: Complex::from_deg(90.0),
            echo_delay: 0,
            x_pulses: 0.0,
            y_pulses: 0.0,
            direction: Complex::zero(),
        };
        let p = proxy.echo_point(1.0, 3.0);
        assert!((p.x - 3.0).abs() < 1e-9);
    }

    #[test]
    fn contacts_use_own_sensor() {
        let c = ContactsMessage {
            sim_time: 0,
            front_sensor: true,
            rear_sensor: false,
            can_move_forward: true,
            can_move_backward: false,
        };
        assert!(!c.front_contact());
        assert!(c.rear_contact());
    }
}

//! status.rs — robot specification and synchronised robot status

use serde::{Deserialize, Serialize};

use crate::geometry::{linear, Complex, Point};
use crate::messages::{CameraEvent, ContactsMessage, MotionMessage, ProxyMessage};
use crate::robot::RobotMessage;

// ── Robot specification ───────────────────────────────────────────────────────

/// Physical description of the robot sensing head and drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotSpec {
    /// Maximum usable lidar range (m).
    pub max_radar_distance: f64,
    /// Radius of the bumper imprint disc (m).
    pub contact_radius: f64,
    /// Half-angle of the lidar acceptance cone (radians).
    pub receptive_angle: f64,
    /// Sensing head offset from the robot centre, robot frame (m).
    pub head_location: Point,
    /// Camera mount offset from the head axis.
    pub camera_azimuth: Complex,
    /// Lidar mount offset from the head axis.
    pub lidar_azimuth: Complex,
    /// Wheel speed bound (encoder pulses per second).
    pub max_pps: i32,
    /// Meters per encoder pulse.
    pub distance_per_pulse: f64,
}

impl RobotSpec {
    /// World position of the sensing head for a robot at `location` heading
    /// `direction`.
    pub fn head_at(&self, location: &Point, direction: &Complex) -> Point {
        // Rotate the head offset by the robot yaw (clockwise from north).
        let rotated = Point::new(
            self.head_location.x * direction.y() + self.head_location.y * direction.x(),
            self.head_location.y * direction.y() - self.head_location.x * direction.x(),
        );
        location.add(&rotated)
    }
}

// ── Supply decoder ────────────────────────────────────────────────────────────

/// Two-point linear decoder mapping battery ADC samples to volts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupplyDecoder {
    pub supply_values: [f64; 2],
    pub voltages: [f64; 2],
}

impl SupplyDecoder {
    pub fn decode(&self, adc: i32) -> f64 {
        linear(
            adc as f64,
            self.supply_values[0],
            self.supply_values[1],
            self.voltages[0],
            self.voltages[1],
        )
    }
}

// ── Robot status ──────────────────────────────────────────────────────────────

/// Latest view of the robot, updated monotonically in simulation time.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotStatus {
    pub spec: RobotSpec,
    pub simulation_time: u64,
    pub motion: Option<MotionMessage>,
    pub proxy: Option<ProxyMessage>,
    pub contacts: Option<ContactsMessage>,
    pub camera: Option<CameraEvent>,
    /// Proxy correlated with the current camera event, when one exists.
    pub camera_proxy: Option<ProxyMessage>,
    pub supply_decoder: SupplyDecoder,
    pub supply_voltage: Option<f64>,
}

impl RobotStatus {
    pub fn new(spec: RobotSpec, supply_decoder: SupplyDecoder) -> Self {
        Self {
            spec,
            simulation_time: 0,
            motion: None,
            proxy: None,
            contacts: None,
            camera: None,
            camera_proxy: None,
            supply_decoder,
            supply_voltage: None,
        }
    }

    /// Robot location in meters, from the freshest pose-carrying message.
    pub fn location(&self) -> Point {
        let dpp = self.spec.distance_per_pulse;
        match (&self.motion, &self.proxy) {
            (Some(m), Some(p)) if p.sim_time > m.sim_time => p.location(dpp),
            (Some(m), _) => m.location(dpp),
            (None, Some(p)) => p.location(dpp),
            (None, None) => Point::zero(),
        }
    }

    /// Robot yaw, from the freshest pose-carrying message.
    pub fn direction(&self) -> Complex {
        match (&self.motion, &self.proxy) {
            (Some(m), Some(p)) if p.sim_time > m.sim_time => p.direction,
            (Some(m), _) => m.direction,
            (None, Some(p)) => p.direction,
            (None, None) => Complex::zero(),
        }
    }

    pub fn is_halt(&self) -> bool {
        self.motion.as_ref().map(|m| m.halt).unwrap_or(true)
    }

    pub fn can_move_forward(&self) -> bool {
        self.contacts.map(|c| c.can_move_forward).unwrap_or(true)
    }

    pub fn can_move_backward(&self) -> bool {
        self.contacts.map(|c| c.can_move_backward).unwrap_or(true)
    }

    /// Integrate one message; simulation time never decreases.
    pub fn update(mut self, message: &RobotMessage) -> Self {
        self.simulation_time = self.simulation_time.max(message.sim_time());
        match message {
            RobotMessage::Motion(m) => self.motion = Some(m.clone()),
            RobotMessage::Proxy(p) => self.proxy = Some(p.clone()),
            RobotMessage::Contacts(c) => self.contacts = Some(*c),
            RobotMessage::Camera(c) => self.camera = Some(c.clone()),
            RobotMessage::Supply(s) => {
                self.supply_voltage = Some(self.supply_decoder.decode(s.supply_adc))
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> RobotSpec {
        RobotSpec {
            max_radar_distance: 3.0,
            contact_radius: 0.2,
            receptive_angle: 15f64.to_radians(),
            head_location: Point::new(0.0, 0.05),
            camera_azimuth: Complex::zero(),
            lidar_azimuth: Complex::zero(),
            max_pps: 60,
            distance_per_pulse: 0.005,
        }
    }

    fn decoder() -> SupplyDecoder {
        SupplyDecoder {
            supply_values: [0.0, 1023.0],
            voltages: [0.0, 12.6],
        }
    }

    #[test]
    fn supply_decoder_is_linear() {
        let d = decoder();
        assert!((d.decode(0) - 0.0).abs() < 1e-9);
        assert!((d.decode(1023) - 12.6).abs() < 1e-9);
        assert!((d.decode(511) - 12.6 * 511.0 / 1023.0).abs() < 1e-9);
    }

    #[test]
    fn head_offset_rotates_with_yaw() {
        let s = spec();
        // Heading east: the head (5 cm forward) points east.
        let head = s.head_at(&Point::zero(), &Complex::from_deg(90.0));
        assert!((head.x - 0.05).abs() < 1e-9);
        assert!(head.y.abs() < 1e-9);
    }

    #[test]
    fn status_time_is_monotonic() {
        let status = RobotStatus::new(spec(), decoder());
        let status = status.update(&RobotMessage::Contacts(ContactsMessage {
            sim_time: 500,
            front_sensor: true,
            rear_sensor: true,
            can_move_forward: true,
            can_move_backward: true,
        }));
        assert_eq!(status.simulation_time, 500);
        // An older message never rolls the clock back.
        let status = status.update(&RobotMessage::Supply(crate::messages::SupplyMessage {
            sim_time: 200,
            supply_adc: 511,
        }));
        assert_eq!(status.simulation_time, 500);
        assert!(status.supply_voltage.is_some());
    }
}

//! # config
//!
//! TOML configuration of the control plane. Every section rejects unknown
//! keys, so a file written for a different robot specification variant fails
//! to load instead of being silently reinterpreted.
//!
//! Angles are degrees and times are milliseconds in the file; both convert to
//! the core types here, at the boundary.

use serde::Deserialize;

use wheelly_sim::SimConfig;
use wheelly_world::{
    Complex, GridTopology, Point, RadarParams, RobotSpec, SupplyDecoder, WorldModelSpec,
};

use crate::controller::ControllerConfig;
use crate::driver::DriverConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WheellyConfig {
    pub robot: RobotSection,
    pub connection: ConnectionSection,
    pub controller: ControllerSection,
    pub supply: SupplySection,
    pub radar: RadarSection,
    #[serde(default)]
    pub simulation: SimConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotMode {
    Sim,
    Real,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RobotSection {
    pub mode: RobotMode,
    pub max_radar_distance: f64,
    pub contact_radius: f64,
    /// Half-angle of the lidar acceptance cone, degrees.
    pub sensor_receptive_angle: f64,
    pub head_x: f64,
    pub head_y: f64,
    /// Camera mount offset from the head axis, degrees.
    pub camera_azimuth: f64,
    /// Lidar mount offset from the head axis, degrees.
    pub lidar_azimuth: f64,
    pub max_pps: i32,
    pub distance_per_pulse: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSection {
    pub host: String,
    pub port: u16,
    pub camera_host: Option<String>,
    pub camera_port: Option<u16>,
    pub connection_retry_interval: u64,
    pub read_timeout: u64,
    pub configure_timeout: u64,
    pub watchdog_interval: u64,
    pub watchdog_timeout: u64,
    #[serde(default)]
    pub config_commands: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerSection {
    pub interval: u64,
    pub reaction_interval: u64,
    pub command_interval: u64,
    pub simulation_speed: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupplySection {
    pub supply_values: [f64; 2],
    pub voltages: [f64; 2],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RadarSection {
    pub radar_width: u32,
    pub radar_height: u32,
    pub radar_grid: f64,
    pub radar_clean_interval: u64,
    pub echo_persistence: u64,
    pub contact_persistence: u64,
    pub decay: f64,
    pub marker_persistence: u64,
    #[serde(default = "default_polar_sectors")]
    pub polar_sectors: usize,
    #[serde(default = "default_grid_map_size")]
    pub grid_map_size: u32,
}

fn default_polar_sectors() -> usize {
    wheelly_world::world::DEFAULT_POLAR_SECTORS
}

fn default_grid_map_size() -> u32 {
    11
}

impl WheellyConfig {
    pub fn robot_spec(&self) -> RobotSpec {
        RobotSpec {
            max_radar_distance: self.robot.max_radar_distance,
            contact_radius: self.robot.contact_radius,
            receptive_angle: self.robot.sensor_receptive_angle.to_radians(),
            head_location: Point::new(self.robot.head_x, self.robot.head_y),
            camera_azimuth: Complex::from_deg(self.robot.camera_azimuth),
            lidar_azimuth: Complex::from_deg(self.robot.lidar_azimuth),
            max_pps: self.robot.max_pps,
            distance_per_pulse: self.robot.distance_per_pulse,
        }
    }

    pub fn supply_decoder(&self) -> SupplyDecoder {
        SupplyDecoder {
            supply_values: self.supply.supply_values,
            voltages: self.supply.voltages,
        }
    }

    pub fn world_model_spec(&self) -> WorldModelSpec {
        WorldModelSpec {
            robot_spec: self.robot_spec(),
            topology: GridTopology::new(
                Point::zero(),
                self.radar.radar_width,
                self.radar.radar_height,
                self.radar.radar_grid,
            ),
            radar: RadarParams {
                clean_interval: self.radar.radar_clean_interval,
                echo_persistence: self.radar.echo_persistence,
                contact_persistence: self.radar.contact_persistence,
                decay: self.radar.decay,
            },
            marker_persistence: self.radar.marker_persistence,
            polar_sectors: self.radar.polar_sectors,
            grid_map_size: self.radar.grid_map_size,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            interval: self.controller.interval,
            reaction_interval: self.controller.reaction_interval,
            command_interval: self.controller.command_interval,
            connection_retry_interval: self.connection.connection_retry_interval,
            watchdog_interval: self.connection.watchdog_interval,
            sim_speed: self.controller.simulation_speed,
            max_pps: self.robot.max_pps,
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        let camera_addr = match (&self.connection.camera_host, self.connection.camera_port) {
            (Some(host), Some(port)) => Some(format!("{host}:{port}")),
            _ => None,
        };
        DriverConfig {
            robot_addr: format!("{}:{}", self.connection.host, self.connection.port),
            camera_addr,
            read_timeout: self.connection.read_timeout,
            configure_timeout: self.connection.configure_timeout,
            watchdog_interval: self.connection.watchdog_interval,
            watchdog_timeout: self.connection.watchdog_timeout,
            config_commands: self.connection.config_commands.clone(),
        }
    }
}

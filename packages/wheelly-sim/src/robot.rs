//! robot.rs — the simulated robot behind the shared Robot contract
//!
//! Drives the rigid body from the commanded `(direction, speed)` with the
//! PD-like wheel shaping, guards unsafe moves, resolves stalemates by
//! teleport, and emits the same timed message stream as the real device:
//! motion/proxy/camera/supply on their own intervals, contacts on every flag
//! edge.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use wheelly_world::robot::{Robot, RobotError, RobotMessage};
use wheelly_world::{
    clip, linear, CameraEvent, Complex, ContactsMessage, MotionMessage, Point, ProxyMessage,
    RobotSpec, SupplyMessage, DISTANCE_SCALE, UNKNOWN_QR_CODE,
};

use crate::physics::{
    ObstacleMap, RobotBody, MAX_ANGULAR_PPS, MAX_DISTANCE, MAX_PPS, OBSTACLE_SIZE,
    PHYSICS_STEP_MS, SAFE_DISTANCE,
};

// ── Configuration ─────────────────────────────────────────────────────────────

/// A labelled QR landmark placed in the simulated world.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimMarker {
    pub label: String,
    pub x: f64,
    pub y: f64,
}

/// Simulated world and emission cadence. Every field falls back to its
/// default, so a config file only names what it changes.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub seed: u64,
    /// Torque disturbance sigma.
    pub err_sigma: f64,
    /// Force disturbance sigma.
    pub err_sensor: f64,
    /// Range measurement noise sigma (m).
    pub err_distance: f64,
    /// Both bumpers held this long triggers a teleport (ms).
    pub stalemate_interval: u64,
    pub motion_interval: u64,
    pub proxy_interval: u64,
    pub camera_interval: u64,
    pub supply_interval: u64,
    /// Obstacle square centres `[x, y]` (m).
    pub obstacles: Vec<[f64; 2]>,
    /// Labelled QR landmarks.
    pub markers: Vec<SimMarker>,
    /// Half-size of the square world (m).
    pub world_radius: f64,
    /// Camera acceptance half-angle (radians).
    pub camera_view_angle: f64,
    /// Camera recognition range (m).
    pub camera_range: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 1234,
            err_sigma: 0.05,
            err_sensor: 0.05,
            err_distance: 0.005,
            stalemate_interval: 60_000,
            motion_interval: 500,
            proxy_interval: 500,
            camera_interval: 1000,
            supply_interval: 60_000,
            obstacles: Vec::new(),
            markers: Vec::new(),
            world_radius: 5.0,
            camera_view_angle: 15f64.to_radians(),
            camera_range: 3.0,
        }
    }
}

// ── Simulated robot ───────────────────────────────────────────────────────────

pub struct SimulatedRobot {
    spec: RobotSpec,
    cfg: SimConfig,
    obstacles: ObstacleMap,
    markers: Vec<(String, Point)>,
    body: RobotBody,
    rng: StdRng,

    sim_time: u64,
    connected: bool,
    configured: bool,

    /// Commanded motion; `None` = halted.
    move_target: Option<(Complex, i32)>,
    sensor_direction: Complex,
    halt: bool,

    motion_timeout: u64,
    proxy_timeout: u64,
    camera_timeout: u64,
    supply_timeout: u64,
    stalemate_since: Option<u64>,
    supply_adc: f64,

    /// Last emitted contact/alarm flags, for edge-triggered emission.
    prev_front: bool,
    prev_rear: bool,
    prev_echo_alarm: bool,

    queue: Vec<RobotMessage>,
}

impl SimulatedRobot {
    pub fn new(spec: RobotSpec, cfg: SimConfig) -> Self {
        let obstacles = ObstacleMap::new(
            cfg.obstacles.iter().map(|o| Point::new(o[0], o[1])).collect(),
            cfg.world_radius,
        );
        let markers = cfg
            .markers
            .iter()
            .map(|m| (m.label.clone(), Point::new(m.x, m.y)))
            .collect();
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            spec,
            obstacles,
            markers,
            body: RobotBody::at(Point::zero(), Complex::zero()),
            rng,
            sim_time: 0,
            connected: false,
            configured: false,
            move_target: None,
            sensor_direction: Complex::zero(),
            halt: true,
            motion_timeout: 0,
            proxy_timeout: 0,
            camera_timeout: 0,
            supply_timeout: 0,
            stalemate_since: None,
            supply_adc: 1023.0,
            prev_front: false,
            prev_rear: false,
            prev_echo_alarm: false,
            queue: Vec::new(),
            cfg,
        }
    }

    pub fn body(&self) -> &RobotBody {
        &self.body
    }

    pub fn obstacles(&self) -> &ObstacleMap {
        &self.obstacles
    }

    /// Wheel speed targets from the commanded `(direction, speed)`.
    fn wheel_targets(&self) -> (f64, f64) {
        let (direction, speed) = match (&self.move_target, self.halt) {
            (Some(t), false) => *t,
            _ => return (0.0, 0.0),
        };
        let d_theta = direction.sub(&self.body.direction).to_rad().to_degrees();
        let angular = clip(
            linear(d_theta, -10.0, 10.0, -MAX_ANGULAR_PPS, MAX_ANGULAR_PPS),
            -MAX_ANGULAR_PPS,
            MAX_ANGULAR_PPS,
        );
        let linear_cmd = speed as f64 * clip(linear(d_theta.abs(), 0.0, 30.0, 1.0, 0.0), 0.0, 1.0);
        let max = MAX_PPS as f64;
        (
            clip(linear_cmd - angular, -max, max),
            clip(linear_cmd + angular, -max, max),
        )
    }

    /// A commanded direction is blocked when the matching bumper is pressed or
    /// a front obstacle sits within the safety clearance.
    fn move_blocked(&self) -> bool {
        let Some((direction, speed)) = self.move_target else {
            return false;
        };
        let forward = speed >= 0 && direction.sub(&self.body.direction).is_front(90f64.to_radians());
        if forward {
            self.body.front_contact
                || self.obstacles.forward_clearance(
                    &self.body.location,
                    &self.body.direction,
                    self.spec.receptive_angle,
                ) < SAFE_DISTANCE
        } else {
            self.body.rear_contact
        }
    }

    fn substep(&mut self) {
        if self.move_blocked() {
            if !self.halt {
                debug!("sim: move blocked, forcing halt at {:?}", self.body.location);
            }
            self.halt = true;
        }
        let (left, right) = self.wheel_targets();
        self.body.step(
            &self.obstacles,
            left,
            right,
            self.spec.distance_per_pulse,
            self.cfg.err_sigma,
            self.cfg.err_sensor,
            &mut self.rng,
        );
    }

    fn check_stalemate(&mut self) {
        if self.body.front_contact && self.body.rear_contact {
            let since = *self.stalemate_since.get_or_insert(self.sim_time);
            if self.sim_time >= since + self.cfg.stalemate_interval {
                let clearance = SAFE_DISTANCE + OBSTACLE_SIZE;
                let p = self.obstacles.random_free_point(&mut self.rng, clearance);
                debug!("sim: stalemate resolved, teleporting to {p:?}");
                self.body = RobotBody::at(p, self.body.direction);
                self.stalemate_since = None;
            }
        } else {
            self.stalemate_since = None;
        }
    }

    /// Simulated lidar: nearest obstacle in the receptive cone, with noise.
    fn measure_echo(&mut self) -> f64 {
        let beam = self.body.direction.add(&self.sensor_direction);
        let head = self
            .spec
            .head_at(&self.body.location, &self.body.direction);
        match self.obstacles.nearest_in_cone(
            &head,
            &beam,
            self.spec.receptive_angle,
            MAX_DISTANCE + OBSTACLE_SIZE,
        ) {
            Some((_, d)) => {
                let noise = Normal::new(0.0, self.cfg.err_distance)
                    .map(|n| n.sample(&mut self.rng))
                    .unwrap_or(0.0);
                let measured = d - self.obstacles_half() + noise;
                if measured > 0.0 && measured < MAX_DISTANCE {
                    measured
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn obstacles_half(&self) -> f64 {
        OBSTACLE_SIZE / 2.0
    }

    fn pulses(&self) -> (f64, f64) {
        let dpp = self.spec.distance_per_pulse;
        (self.body.location.x / dpp, self.body.location.y / dpp)
    }

    fn motion_message(&self) -> MotionMessage {
        let (x_pulses, y_pulses) = self.pulses();
        let (left, right) = self.wheel_targets();
        let (move_direction, move_speed) = self
            .move_target
            .unwrap_or((self.body.direction, 0));
        MotionMessage {
            sim_time: self.sim_time,
            x_pulses,
            y_pulses,
            direction: self.body.direction,
            left_pps: left,
            right_pps: right,
            imu_failure: 0,
            halt: self.halt,
            move_direction,
            move_speed,
            left_target: left as i32,
            right_target: right as i32,
            left_power: (left / MAX_PPS as f64 * 255.0) as i32,
            right_power: (right / MAX_PPS as f64 * 255.0) as i32,
        }
    }

    fn proxy_message(&mut self) -> ProxyMessage {
        let distance = self.measure_echo();
        let (x_pulses, y_pulses) = self.pulses();
        ProxyMessage {
            sim_time: self.sim_time,
            sensor_direction: self.sensor_direction,
            echo_delay: (distance / DISTANCE_SCALE) as u64,
            x_pulses,
            y_pulses,
            direction: self.body.direction,
        }
    }

    fn contacts_message(&self) -> ContactsMessage {
        let front_clear = !self.body.front_contact;
        let rear_clear = !self.body.rear_contact;
        ContactsMessage {
            sim_time: self.sim_time,
            front_sensor: front_clear,
            rear_sensor: rear_clear,
            can_move_forward: front_clear && !self.echo_alarm(),
            can_move_backward: rear_clear,
        }
    }

    fn camera_message(&mut self) -> CameraEvent {
        let camera_dir = self
            .body
            .direction
            .add(&self.sensor_direction)
            .add(&self.spec.camera_azimuth);
        let head = self
            .spec
            .head_at(&self.body.location, &self.body.direction);
        let seen = self
            .markers
            .iter()
            .filter(|(_, p)| {
                let d = p.distance(&head);
                d > 1e-9
                    && d <= self.cfg.camera_range
                    && head.direction_to(p).sub(&camera_dir).abs_rad() <= self.cfg.camera_view_angle
            })
            .min_by(|(_, a), (_, b)| {
                a.distance(&head)
                    .partial_cmp(&b.distance(&head))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        CameraEvent {
            sim_time: self.sim_time,
            qr_code: seen
                .map(|(label, _)| label.clone())
                .unwrap_or_else(|| UNKNOWN_QR_CODE.to_string()),
            width: 240,
            height: 240,
            points: None,
        }
    }

    fn echo_alarm(&self) -> bool {
        self.obstacles.forward_clearance(
            &self.body.location,
            &self.body.direction,
            self.spec.receptive_angle,
        ) < SAFE_DISTANCE
    }

    fn emit_timed_messages(&mut self) {
        if self.sim_time >= self.motion_timeout {
            let m = self.motion_message();
            self.queue.push(RobotMessage::Motion(m));
            self.motion_timeout = self.sim_time + self.cfg.motion_interval;
        }
        if self.sim_time >= self.proxy_timeout {
            let p = self.proxy_message();
            self.queue.push(RobotMessage::Proxy(p));
            self.proxy_timeout = self.sim_time + self.cfg.proxy_interval;
        }
        if self.sim_time >= self.camera_timeout {
            let c = self.camera_message();
            self.queue.push(RobotMessage::Camera(c));
            self.camera_timeout = self.sim_time + self.cfg.camera_interval;
        }
        if self.sim_time >= self.supply_timeout {
            // Slow synthetic discharge.
            self.supply_adc = (self.supply_adc - 0.1).max(0.0);
            self.queue.push(RobotMessage::Supply(SupplyMessage {
                sim_time: self.sim_time,
                supply_adc: self.supply_adc as i32,
            }));
            self.supply_timeout = self.sim_time + self.cfg.supply_interval;
        }

        let alarm = self.echo_alarm();
        if self.body.front_contact != self.prev_front
            || self.body.rear_contact != self.prev_rear
            || alarm != self.prev_echo_alarm
        {
            self.prev_front = self.body.front_contact;
            self.prev_rear = self.body.rear_contact;
            self.prev_echo_alarm = alarm;
            let c = self.contacts_message();
            self.queue.push(RobotMessage::Contacts(c));
        }
    }
}

impl Robot for SimulatedRobot {
    async fn connect(&mut self) -> Result<(), RobotError> {
        self.connected = true;
        Ok(())
    }

    async fn configure(&mut self) -> Result<(), RobotError> {
        if !self.connected {
            return Err(RobotError::NotConnected);
        }
        self.configured = true;
        // Synthetic initial status.
        let m = self.motion_message();
        self.queue.push(RobotMessage::Motion(m));
        let p = self.proxy_message();
        self.queue.push(RobotMessage::Proxy(p));
        let c = self.contacts_message();
        self.queue.push(RobotMessage::Contacts(c));
        self.motion_timeout = self.sim_time + self.cfg.motion_interval;
        self.proxy_timeout = self.sim_time + self.cfg.proxy_interval;
        self.camera_timeout = self.sim_time + self.cfg.camera_interval;
        self.supply_timeout = self.sim_time + self.cfg.supply_interval;
        Ok(())
    }

    async fn tick(&mut self, dt: u64) -> Result<(), RobotError> {
        if !self.configured {
            return Err(RobotError::NotConfigured);
        }
        let steps = dt / PHYSICS_STEP_MS;
        for _ in 0..steps {
            self.sim_time += PHYSICS_STEP_MS;
            self.substep();
            self.check_stalemate();
            self.emit_timed_messages();
        }
        Ok(())
    }

    fn poll_messages(&mut self) -> Vec<RobotMessage> {
        std::mem::take(&mut self.queue)
    }

    async fn halt_command(&mut self) -> Result<(), RobotError> {
        self.halt = true;
        self.move_target = None;
        Ok(())
    }

    async fn move_command(&mut self, direction: Complex, speed: i32) -> Result<(), RobotError> {
        self.move_target = Some((direction, speed));
        self.halt = false;
        Ok(())
    }

    async fn scan_command(&mut self, direction: Complex) -> Result<(), RobotError> {
        self.sensor_direction = direction;
        Ok(())
    }

    fn is_halt(&self) -> bool {
        self.halt
    }

    fn simulation_time(&self) -> u64 {
        self.sim_time
    }

    fn spec(&self) -> &RobotSpec {
        &self.spec
    }

    async fn close(&mut self) -> Result<(), RobotError> {
        self.connected = false;
        self.configured = false;
        Ok(())
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
            head_location: Point::zero(),
            camera_azimuth: Complex::zero(),
            lidar_azimuth: Complex::zero(),
            max_pps: MAX_PPS,
            distance_per_pulse: 0.006,
        }
    }

    fn quiet(cfg: &mut SimConfig) {
        cfg.err_sigma = 0.0;
        cfg.err_sensor = 0.0;
        cfg.err_distance = 0.0;
    }

    async fn started(cfg: SimConfig) -> SimulatedRobot {
        let mut robot = SimulatedRobot::new(spec(), cfg);
        robot.connect().await.unwrap();
        robot.configure().await.unwrap();
        robot.poll_messages();
        robot
    }

    #[tokio::test]
    async fn configure_emits_initial_status() {
        let mut robot = SimulatedRobot::new(spec(), SimConfig::default());
        robot.connect().await.unwrap();
        robot.configure().await.unwrap();
        let messages = robot.poll_messages();
        assert!(messages
            .iter()
            .any(|m| matches!(m, RobotMessage::Motion(_))));
        assert!(messages.iter().any(|m| matches!(m, RobotMessage::Proxy(_))));
        assert!(messages
            .iter()
            .any(|m| matches!(m, RobotMessage::Contacts(_))));
    }

    #[tokio::test]
    async fn tick_before_configure_fails() {
        let mut robot = SimulatedRobot::new(spec(), SimConfig::default());
        robot.connect().await.unwrap();
        assert!(matches!(
            robot.tick(100).await,
            Err(RobotError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn messages_follow_intervals() {
        let mut cfg = SimConfig::default();
        quiet(&mut cfg);
        cfg.motion_interval = 100;
        cfg.proxy_interval = 200;
        let mut robot = started(cfg).await;

        robot.tick(1000).await.unwrap();
        let messages = robot.poll_messages();
        let motions = messages
            .iter()
            .filter(|m| matches!(m, RobotMessage::Motion(_)))
            .count();
        let proxies = messages
            .iter()
            .filter(|m| matches!(m, RobotMessage::Proxy(_)))
            .count();
        assert_eq!(motions, 10);
        assert_eq!(proxies, 5);
        assert_eq!(robot.simulation_time(), 1000);
    }

    #[tokio::test]
    async fn move_command_drives_forward() {
        let mut cfg = SimConfig::default();
        quiet(&mut cfg);
        let mut robot = started(cfg).await;
        robot.move_command(Complex::zero(), 40).await.unwrap();
        robot.tick(3000).await.unwrap();
        assert!(!robot.is_halt());
        assert!(robot.body().location.y > 0.3, "y = {}", robot.body().location.y);
    }

    #[tokio::test]
    async fn blocked_move_forces_halt() {
        let mut cfg = SimConfig::default();
        quiet(&mut cfg);
        cfg.obstacles = vec![[0.0, 0.5]];
        let mut robot = started(cfg).await;
        robot.move_command(Complex::zero(), 40).await.unwrap();
        robot.tick(5000).await.unwrap();
        // The obstacle front face is at y = 0.4; safety stops the robot short.
        assert!(robot.is_halt());
        assert!(robot.body().location.y < 0.4 - SAFE_DISTANCE + 0.05);
    }

    #[tokio::test]
    async fn proxy_measures_the_obstacle() {
        let mut cfg = SimConfig::default();
        quiet(&mut cfg);
        cfg.obstacles = vec![[0.0, 1.0]];
        cfg.proxy_interval = 100;
        let mut robot = started(cfg).await;
        robot.tick(100).await.unwrap();
        let proxy = robot
            .poll_messages()
            .into_iter()
            .find_map(|m| match m {
                RobotMessage::Proxy(p) => Some(p),
                _ => None,
            })
            .expect("proxy emitted");
        // Centre distance 1.0 minus half the obstacle side.
        assert!((proxy.echo_distance() - 0.9).abs() < 0.02);
    }

    #[tokio::test]
    async fn scan_steers_the_sensor() {
        let mut cfg = SimConfig::default();
        quiet(&mut cfg);
        cfg.obstacles = vec![[1.0, 0.0]];
        cfg.proxy_interval = 100;
        let mut robot = started(cfg).await;
        // Looking north: nothing.
        robot.tick(100).await.unwrap();
        let first = robot
            .poll_messages()
            .into_iter()
            .find_map(|m| match m {
                RobotMessage::Proxy(p) => Some(p),
                _ => None,
            })
            .unwrap();
        assert_eq!(first.echo_delay, 0);
        // Looking east: obstacle at 1 m.
        robot.scan_command(Complex::from_deg(90.0)).await.unwrap();
        robot.tick(100).await.unwrap();
        let second = robot
            .poll_messages()
            .into_iter()
            .find_map(|m| match m {
                RobotMessage::Proxy(p) => Some(p),
                _ => None,
            })
            .unwrap();
        assert!((second.echo_distance() - 0.9).abs() < 0.02);
        assert_eq!(second.sensor_direction.to_int_deg(), 90);
    }

    #[tokio::test]
    async fn camera_sees_the_marker() {
        let mut cfg = SimConfig::default();
        quiet(&mut cfg);
        cfg.markers = vec![SimMarker {
            label: "A".to_string(),
            x: 0.0,
            y: 1.0,
        }];
        cfg.camera_interval = 100;
        let mut robot = started(cfg).await;
        robot.tick(100).await.unwrap();
        let camera = robot
            .poll_messages()
            .into_iter()
            .find_map(|m| match m {
                RobotMessage::Camera(c) => Some(c),
                _ => None,
            })
            .expect("camera emitted");
        assert_eq!(camera.qr_code, "A");
    }

    #[tokio::test]
    async fn camera_reports_unknown_without_marker() {
        let mut cfg = SimConfig::default();
        quiet(&mut cfg);
        cfg.camera_interval = 100;
        let mut robot = started(cfg).await;
        robot.tick(100).await.unwrap();
        let camera = robot
            .poll_messages()
            .into_iter()
            .find_map(|m| match m {
                RobotMessage::Camera(c) => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(camera.qr_code, UNKNOWN_QR_CODE);
    }

    #[tokio::test]
    async fn same_seed_same_trajectory() {
        let mut cfg = SimConfig::default();
        cfg.seed = 99;
        let run = |cfg: SimConfig| async move {
            let mut robot = started(cfg).await;
            robot.move_command(Complex::from_deg(30.0), 30).await.unwrap();
            robot.tick(2000).await.unwrap();
            (robot.body().location, robot.simulation_time())
        };
        let a = run(cfg.clone()).await;
        let b = run(cfg).await;
        assert_eq!(a, b);
    }
}

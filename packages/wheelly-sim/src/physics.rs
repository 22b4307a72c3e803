//! physics.rs — rigid-body dynamics of the simulated robot
//!
//! The robot is a disc, obstacles are axis-aligned squares on a fixed pitch.
//! Integration runs at 1000 Hz: wheel speed targets become clamped impulses,
//! collisions push the disc out along the contact normal and raise the bumper
//! flag of the matching half.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use wheelly_world::{Complex, Point};

/// Robot disc radius (m).
pub const ROBOT_RADIUS: f64 = 0.15;
/// Robot mass (kg).
pub const ROBOT_MASS: f64 = 0.785;
/// Obstacle square side (m).
pub const OBSTACLE_SIZE: f64 = 0.2;
/// Forward clearance below which a commanded move is unsafe (m).
pub const SAFE_DISTANCE: f64 = 0.3;
/// Wheel speed bound (encoder pulses per second).
pub const MAX_PPS: i32 = 60;
/// Bound of the angular shaping term (pps).
pub const MAX_ANGULAR_PPS: f64 = 20.0;
/// Echo ceiling of the simulated lidar (m).
pub const MAX_DISTANCE: f64 = 3.0;
/// Physics substep (ms).
pub const PHYSICS_STEP_MS: u64 = 1;

/// Distance between the wheel contact points (m).
const TRACK_WIDTH: f64 = 0.136;
/// Drive force bound (N).
const MAX_FORCE: f64 = 2.0;
/// Drive torque bound (N·m).
const MAX_TORQUE: f64 = 0.1;

// ── Obstacle map ──────────────────────────────────────────────────────────────

/// Axis-aligned square obstacles plus the world bounds used for teleports.
#[derive(Debug, Clone)]
pub struct ObstacleMap {
    obstacles: Vec<Point>,
    /// Half-size of the square world (m).
    world_radius: f64,
}

impl ObstacleMap {
    pub fn new(obstacles: Vec<Point>, world_radius: f64) -> Self {
        Self {
            obstacles,
            world_radius,
        }
    }

    pub fn obstacles(&self) -> &[Point] {
        &self.obstacles
    }

    pub fn world_radius(&self) -> f64 {
        self.world_radius
    }

    /// Nearest obstacle whose centre lies inside the acceptance cone from
    /// `from` around `direction`, with its centre distance.
    pub fn nearest_in_cone(
        &self,
        from: &Point,
        direction: &Complex,
        half_angle: f64,
        max_distance: f64,
    ) -> Option<(Point, f64)> {
        let mut best: Option<(Point, f64)> = None;
        for o in &self.obstacles {
            let d = o.distance(from);
            if d < 1e-9 || d > max_distance {
                continue;
            }
            if from.direction_to(o).sub(direction).abs_rad() > half_angle {
                continue;
            }
            if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                best = Some((*o, d));
            }
        }
        best
    }

    /// Deepest overlap between the disc at `center` and any obstacle square:
    /// `(obstacle, push_direction, penetration)`.
    pub fn disc_collision(&self, center: &Point, radius: f64) -> Option<(Point, Point, f64)> {
        let h = OBSTACLE_SIZE / 2.0;
        let mut worst: Option<(Point, Point, f64)> = None;
        for o in &self.obstacles {
            // Closest point of the square to the disc centre.
            let closest = Point::new(
                center.x.clamp(o.x - h, o.x + h),
                center.y.clamp(o.y - h, o.y + h),
            );
            let delta = center.sub(&closest);
            let dist = delta.norm();
            if dist >= radius {
                continue;
            }
            let normal = if dist > 1e-9 {
                delta.scale(1.0 / dist)
            } else {
                // Centre inside the square: push away from the obstacle centre.
                let away = center.sub(o);
                let n = away.norm();
                if n > 1e-9 {
                    away.scale(1.0 / n)
                } else {
                    Point::new(0.0, 1.0)
                }
            };
            let penetration = radius - dist;
            if worst.map(|(_, _, p)| penetration > p).unwrap_or(true) {
                worst = Some((*o, normal, penetration));
            }
        }
        worst
    }

    /// Minimum clearance from `from` to any obstacle ahead within `half_angle`
    /// of `direction` (surface distance, not centre distance).
    pub fn forward_clearance(&self, from: &Point, direction: &Complex, half_angle: f64) -> f64 {
        self.nearest_in_cone(from, direction, half_angle, f64::MAX)
            .map(|(_, d)| (d - OBSTACLE_SIZE / 2.0 - ROBOT_RADIUS).max(0.0))
            .unwrap_or(f64::MAX)
    }

    /// Uniformly random point at least `clearance` away from every obstacle.
    pub fn random_free_point(&self, rng: &mut StdRng, clearance: f64) -> Point {
        for _ in 0..1000 {
            let p = Point::new(
                rng.gen_range(-self.world_radius..self.world_radius),
                rng.gen_range(-self.world_radius..self.world_radius),
            );
            let clear = self
                .obstacles
                .iter()
                .all(|o| o.distance(&p) >= clearance);
            if clear {
                return p;
            }
        }
        Point::zero()
    }
}

// ── Robot body ────────────────────────────────────────────────────────────────

/// Simulated rigid body: pose plus linear/angular velocity.
#[derive(Debug, Clone)]
pub struct RobotBody {
    pub location: Point,
    pub direction: Complex,
    /// Signed speed along the heading (m/s).
    pub speed: f64,
    /// Yaw rate, clockwise positive (rad/s).
    pub angular: f64,
    pub front_contact: bool,
    pub rear_contact: bool,
}

impl RobotBody {
    pub fn at(location: Point, direction: Complex) -> Self {
        Self {
            location,
            direction,
            speed: 0.0,
            angular: 0.0,
            front_contact: false,
            rear_contact: false,
        }
    }

    /// One physics substep: track the wheel targets with clamped impulses plus
    /// Gaussian disturbance, integrate, resolve collisions.
    ///
    /// `left_pps`/`right_pps` are wheel speed targets; `distance_per_pulse`
    /// converts them to m/s. `err_sigma` disturbs torque, `err_sensor` force.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        obstacles: &ObstacleMap,
        left_pps: f64,
        right_pps: f64,
        distance_per_pulse: f64,
        err_sigma: f64,
        err_sensor: f64,
        rng: &mut StdRng,
    ) {
        let dt = PHYSICS_STEP_MS as f64 / 1000.0;
        let vl = left_pps * distance_per_pulse;
        let vr = right_pps * distance_per_pulse;
        let target_speed = (vl + vr) / 2.0;
        // Positive = clockwise, matching the `left = lin − ang, right = lin + ang`
        // wheel shaping.
        let target_angular = (vr - vl) / TRACK_WIDTH;

        let inertia = 0.5 * ROBOT_MASS * ROBOT_RADIUS * ROBOT_RADIUS;

        let force_noise = gauss(rng, err_sensor);
        let force = ((target_speed - self.speed) * ROBOT_MASS / dt).clamp(-MAX_FORCE, MAX_FORCE)
            + force_noise;
        self.speed += force / ROBOT_MASS * dt;

        let torque_noise = gauss(rng, err_sigma);
        let torque = ((target_angular - self.angular) * inertia / dt)
            .clamp(-MAX_TORQUE, MAX_TORQUE)
            + torque_noise;
        self.angular += torque / inertia * dt;

        self.direction = self
            .direction
            .add(&Complex::from_rad(self.angular * dt));
        self.location = self
            .location
            .add(&self.direction.unit().scale(self.speed * dt));

        self.front_contact = false;
        self.rear_contact = false;
        if let Some((obstacle, normal, penetration)) = obstacles.disc_collision(&self.location, ROBOT_RADIUS) {
            self.location = self.location.add(&normal.scale(penetration));
            // Kill the inward velocity component.
            let inward = self.direction.unit().dot(&normal.scale(-1.0));
            if inward * self.speed > 0.0 {
                self.speed = 0.0;
            }
            // Bumper side from the obstacle bearing.
            let bearing = self.location.direction_to(&obstacle).sub(&self.direction);
            if bearing.y() >= 0.0 {
                self.front_contact = true;
            } else {
                self.rear_contact = true;
            }
        }
    }
}

fn gauss(rng: &mut StdRng, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    Normal::new(0.0, sigma)
        .map(|n| n.sample(rng))
        .unwrap_or(0.0)
}

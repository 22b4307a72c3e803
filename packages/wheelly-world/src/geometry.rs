//! geometry.rs — 2-D angle and point primitives
//!
//! Angles are unit vectors `(x = sin θ, y = cos θ)` so that sums and
//! differences are two multiplies each and direction comparison never has to
//! reason about wrap-around. Degrees only appear at the wire and display
//! boundaries.
//!
//! The square/arc machinery here serves the radar modeller: for one sensor
//! ping the per-cell decision needs the distance interval under which a cell
//! square is seen inside the acceptance cone.

use serde::{Deserialize, Serialize};

/// Tolerance collapsing near-parallel line/edge intersections (meters).
pub const HALF_MM: f64 = 5e-4;

/// Tolerance deciding whether an arc is tangent to a square edge (radians).
pub const HALF_DEG: f64 = std::f64::consts::PI / 360.0;

// ── Point ─────────────────────────────────────────────────────────────────────

/// 2-D point in the world frame (meters). X = east, Y = north.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn add(&self, other: &Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(&self, other: &Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(&self, s: f64) -> Point {
        Point::new(self.x * s, self.y * s)
    }

    pub fn dot(&self, other: &Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the cross product (signed parallelogram area).
    pub fn cross(&self, other: &Point) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Direction of `other` as seen from `self` (north-referenced).
    pub fn direction_to(&self, other: &Point) -> Complex {
        Complex::from_rad((other.x - self.x).atan2(other.y - self.y))
    }
}

// ── Complex angle ─────────────────────────────────────────────────────────────

/// An angle as a unit vector: `x = sin θ`, `y = cos θ`, θ from north clockwise.
///
/// Invariant: magnitude is 1 ± ε. All constructors normalise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Complex {
    x: f64,
    y: f64,
}

impl Default for Complex {
    fn default() -> Self {
        Self { x: 0.0, y: 1.0 }
    }
}

impl Complex {
    /// The zero angle (north).
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_rad(rad: f64) -> Self {
        Self {
            x: rad.sin(),
            y: rad.cos(),
        }
    }

    pub fn from_deg(deg: f64) -> Self {
        Self::from_rad(deg.to_radians())
    }

    /// Rebuild from components previously produced by [`Complex::x`] and
    /// [`Complex::y`]. The caller guarantees the pair is unit length; no
    /// renormalisation happens, so round trips are bit-exact.
    pub fn from_unit(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Radians in (−π, π].
    pub fn to_rad(&self) -> f64 {
        let rad = self.x.atan2(self.y);
        if rad <= -std::f64::consts::PI {
            std::f64::consts::PI
        } else {
            rad
        }
    }

    pub fn to_deg(&self) -> f64 {
        self.to_rad().to_degrees()
    }

    /// Rounded to the nearest degree, normalised to (−180, 180].
    pub fn to_int_deg(&self) -> i32 {
        let deg = self.to_deg().round() as i32;
        if deg <= -180 {
            deg + 360
        } else {
            deg
        }
    }

    /// Degrees normalised to [0, 360).
    pub fn positive_deg(&self) -> i32 {
        let deg = self.to_int_deg();
        if deg < 0 {
            deg + 360
        } else {
            deg
        }
    }

    /// sin θ
    pub fn x(&self) -> f64 {
        self.x
    }

    /// cos θ
    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn tan(&self) -> f64 {
        self.x / self.y
    }

    /// Unit vector of this direction in the world frame.
    pub fn unit(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Angle sum, renormalised.
    pub fn add(&self, other: &Complex) -> Complex {
        Self::normalised(
            self.x * other.y + self.y * other.x,
            self.y * other.y - self.x * other.x,
        )
    }

    /// Angle difference, renormalised.
    pub fn sub(&self, other: &Complex) -> Complex {
        Self::normalised(
            self.x * other.y - self.y * other.x,
            self.y * other.y + self.x * other.x,
        )
    }

    /// −θ (mirror across north).
    pub fn neg(&self) -> Complex {
        Self {
            x: -self.x,
            y: self.y,
        }
    }

    /// θ + 180°.
    pub fn opposite(&self) -> Complex {
        Self {
            x: -self.x,
            y: -self.y,
        }
    }

    /// |θ|.
    pub fn abs(&self) -> Complex {
        Self {
            x: self.x.abs(),
            y: self.y,
        }
    }

    /// |θ| in radians, in [0, π].
    pub fn abs_rad(&self) -> f64 {
        self.x.abs().atan2(self.y)
    }

    /// True when the angle is within `eps` radians of the front (0°).
    pub fn is_front(&self, eps: f64) -> bool {
        self.abs_rad() <= eps
    }

    /// True when the angle is within `eps` radians of the rear (180°).
    pub fn is_rear(&self, eps: f64) -> bool {
        self.abs_rad() >= std::f64::consts::PI - eps
    }

    /// True when the angle points right of the robot, at least `eps` away
    /// from both front and rear.
    pub fn is_right(&self, eps: f64) -> bool {
        let a = self.abs_rad();
        self.x > 0.0 && a > eps && a < std::f64::consts::PI - eps
    }

    /// True when the angle points left of the robot, at least `eps` away
    /// from both front and rear.
    pub fn is_left(&self, eps: f64) -> bool {
        let a = self.abs_rad();
        self.x < 0.0 && a > eps && a < std::f64::consts::PI - eps
    }

    fn normalised(x: f64, y: f64) -> Self {
        let n = (x * x + y * y).sqrt();
        if n > 0.0 {
            Self { x: x / n, y: y / n }
        } else {
            Self::default()
        }
    }
}

// ── Shaping helpers ───────────────────────────────────────────────────────────

/// Linear interpolation mapping `[x0, x1] → [y0, y1]`, unclamped.
pub fn linear(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

/// Clamp `x` to `[min, max]`.
pub fn clip(x: f64, min: f64, max: f64) -> f64 {
    x.clamp(min, max)
}

// ── Square / arc interval ─────────────────────────────────────────────────────

/// Distance interval `(near, far)` under which the axis-aligned square centred
/// at `centre` with side `size` is seen from `q` inside the arc `alpha ± dalpha`.
///
/// Policy:
/// - `q` inside (or on) the square: the nearest point is `q` itself (near = 0)
/// - otherwise near/far are min/max over the square points reached by the arc:
///   edge intersections of the two boundary rays, corners inside the arc, and
///   the closest boundary point when its direction lies inside the arc
/// - an arc tangent to an edge through `q` (within [`HALF_DEG`]) collapses to
///   the degenerate interval `(0, 0)` — never `None`
///
/// Returns `None` when the arc misses the square entirely.
pub fn square_arc_interval(
    centre: Point,
    size: f64,
    q: Point,
    alpha: &Complex,
    dalpha: f64,
) -> Option<(f64, f64)> {
    let h = size / 2.0;
    let xmin = centre.x - h;
    let xmax = centre.x + h;
    let ymin = centre.y - h;
    let ymax = centre.y + h;

    let inside = q.x >= xmin - HALF_MM
        && q.x <= xmax + HALF_MM
        && q.y >= ymin - HALF_MM
        && q.y <= ymax + HALF_MM;
    let on_edge = inside
        && ((q.x - xmin).abs() <= HALF_MM
            || (xmax - q.x).abs() <= HALF_MM
            || (q.y - ymin).abs() <= HALF_MM
            || (ymax - q.y).abs() <= HALF_MM);

    // Tangent degenerate case: q on an edge with the arc centre line running
    // along that edge.
    if on_edge {
        let tangent_x = ((q.y - ymin).abs() <= HALF_MM || (ymax - q.y).abs() <= HALF_MM)
            && alpha.y().abs() <= HALF_DEG.sin() + HALF_DEG;
        let tangent_y = ((q.x - xmin).abs() <= HALF_MM || (xmax - q.x).abs() <= HALF_MM)
            && alpha.x().abs() <= HALF_DEG.sin() + HALF_DEG;
        if tangent_x || tangent_y {
            return Some((0.0, 0.0));
        }
    }

    let corners = [
        Point::new(xmin, ymin),
        Point::new(xmax, ymin),
        Point::new(xmin, ymax),
        Point::new(xmax, ymax),
    ];
    let edges = [
        (corners[0], corners[1]),
        (corners[1], corners[3]),
        (corners[3], corners[2]),
        (corners[2], corners[0]),
    ];

    let within_arc = |p: &Point| -> bool {
        let v = p.sub(&q);
        if v.norm() <= HALF_MM {
            return true;
        }
        q.direction_to(p).sub(alpha).abs_rad() <= dalpha + HALF_DEG
    };

    let mut candidates: Vec<f64> = Vec::new();

    // Boundary rays of the arc against every edge.
    for da in [-dalpha, dalpha] {
        let dir = alpha.add(&Complex::from_rad(da)).unit();
        for (a, b) in &edges {
            if let Some(t) = ray_segment_intersection(&q, &dir, a, b) {
                candidates.push(t);
            }
        }
    }

    // Corners seen inside the arc.
    for c in &corners {
        if within_arc(c) {
            candidates.push(c.distance(&q));
        }
    }

    // Closest boundary point, when the arc reaches it.
    let closest = Point::new(q.x.clamp(xmin, xmax), q.y.clamp(ymin, ymax));
    if within_arc(&closest) {
        candidates.push(closest.distance(&q));
    }

    if inside {
        let far = candidates.iter().cloned().fold(0.0, f64::max);
        return Some((0.0, far));
    }
    if candidates.is_empty() {
        return None;
    }
    let near = candidates.iter().cloned().fold(f64::INFINITY, f64::min);
    let far = candidates.iter().cloned().fold(0.0, f64::max);
    Some((near, far))
}

/// Intersection distance of the ray `q + t·dir` with segment `a → b`.
/// Near-parallel pairs are skipped so tangent grazes collapse.
fn ray_segment_intersection(q: &Point, dir: &Point, a: &Point, b: &Point) -> Option<f64> {
    let e = b.sub(a);
    let denom = dir.cross(&e);
    if denom.abs() < 1e-10 {
        return None;
    }
    let aq = a.sub(q);
    let t = aq.cross(&e) / denom;
    let s = aq.cross(dir) / denom;
    let s_tol = HALF_MM / e.norm();
    if t >= -HALF_MM && s >= -s_tol && s <= 1.0 + s_tol {
        Some(t.max(0.0))
    } else {
        None
    }
}

// ── Line / square projections ─────────────────────────────────────────────────

/// Projections of the square centred at `centre` with side `size` into the
/// trajectory frame of `from` heading `direction`: x = right-of-direction,
/// y = forward-of-direction.
///
/// Returns the four projected vertices plus the intersections of the square
/// edges with the centre line `x = 0`; testing these points against a lateral
/// band decides whether a straight run passes within clearance of the square.
pub fn line_square_projections(
    from: &Point,
    direction: &Complex,
    centre: &Point,
    size: f64,
) -> Vec<Point> {
    let right = Point::new(direction.y(), -direction.x());
    let forward = direction.unit();
    let h = size / 2.0;
    let corners = [
        Point::new(centre.x - h, centre.y - h),
        Point::new(centre.x + h, centre.y - h),
        Point::new(centre.x + h, centre.y + h),
        Point::new(centre.x - h, centre.y + h),
    ];

    let mut projected: Vec<Point> = corners
        .iter()
        .map(|c| {
            let v = c.sub(from);
            Point::new(v.dot(&right), v.dot(&forward))
        })
        .collect();

    for i in 0..4 {
        let p1 = projected[i];
        let p2 = projected[(i + 1) % 4];
        if (p1.x < 0.0) != (p2.x < 0.0) && (p2.x - p1.x).abs() > 1e-12 {
            let y = p1.y + (p2.y - p1.y) * (0.0 - p1.x) / (p2.x - p1.x);
            projected.push(Point::new(0.0, y));
        }
    }
    projected
}

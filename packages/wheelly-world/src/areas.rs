//! areas.rs — quadratic-inequality area predicates over the radar grid
//!
//! A `QVect` is the 5-component vector `(1, x, y, x², y²)`. A quadratic
//! inequality is a coefficient vector `a`; the point satisfies it iff
//! `a · qvect(p) ≥ 0`. Circles, half-planes, angular cones and rectangles all
//! reduce to (conjunctions of) such inequalities, and boolean trees of them
//! describe sensor footprints and contact discs.
//!
//! Two evaluation paths:
//! - `cells_by_centre`: exact test of every cell centre — used where the
//!   affected set is defined on cell positions (contact imprint, half-plane
//!   restriction of target searches)
//! - `cells_touching`: leaves evaluated once on the `(w+1)·(h+1)` vertex
//!   lattice, a cell passes a leaf when any of its four corners does — a
//!   conservative superset used to pre-filter candidates before the exact
//!   per-cell arc test of the radar modeller

use crate::geometry::{Complex, Point};
use crate::grid::GridTopology;

// ── QVect ─────────────────────────────────────────────────────────────────────

/// `(1, x, y, x², y²)` evaluation vector, doubling as a coefficient vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QVect(pub [f64; 5]);

impl QVect {
    pub fn from_point(p: &Point) -> Self {
        Self([1.0, p.x, p.y, p.x * p.x, p.y * p.y])
    }

    pub fn dot(&self, other: &QVect) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

/// A single quadratic inequality: satisfied at `p` iff `coeffs · qvect(p) ≥ 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QIneq(QVect);

impl QIneq {
    /// Disc of radius `r` around `c`: `r² − (x−cx)² − (y−cy)² ≥ 0`.
    pub fn circle(c: &Point, r: f64) -> Self {
        Self(QVect([
            r * r - c.x * c.x - c.y * c.y,
            2.0 * c.x,
            2.0 * c.y,
            -1.0,
            -1.0,
        ]))
    }

    /// Half-plane right of the line through `p` with direction `d`.
    /// The right normal of direction θ is `(cos θ, −sin θ)`.
    pub fn right_half_plane(p: &Point, d: &Complex) -> Self {
        let nx = d.y();
        let ny = -d.x();
        Self(QVect([-(nx * p.x + ny * p.y), nx, ny, 0.0, 0.0]))
    }

    pub fn satisfied(&self, p: &Point) -> bool {
        self.satisfied_q(&QVect::from_point(p))
    }

    pub fn satisfied_q(&self, q: &QVect) -> bool {
        self.0.dot(q) >= 0.0
    }
}

// ── Boolean area tree ─────────────────────────────────────────────────────────

/// Boolean combination of quadratic inequalities describing an area.
#[derive(Debug, Clone, PartialEq)]
pub enum AreaExpr {
    Leaf(QIneq),
    And(Vec<AreaExpr>),
    Or(Vec<AreaExpr>),
    Not(Box<AreaExpr>),
}

impl AreaExpr {
    pub fn circle(c: &Point, r: f64) -> Self {
        AreaExpr::Leaf(QIneq::circle(c, r))
    }

    pub fn right_half_plane(p: &Point, d: &Complex) -> Self {
        AreaExpr::Leaf(QIneq::right_half_plane(p, d))
    }

    /// Angular cone at `p` around direction `d` with half-width `width`
    /// radians. Width at most 90° is the conjunction of the two boundary
    /// half-planes; wider cones are their union.
    pub fn angle(p: &Point, d: &Complex, width: f64) -> Self {
        let left_edge = d.sub(&Complex::from_rad(width));
        let right_edge = d.add(&Complex::from_rad(width));
        let h1 = AreaExpr::right_half_plane(p, &left_edge);
        // Left of the right edge = right of its opposite.
        let h2 = AreaExpr::right_half_plane(p, &right_edge.opposite());
        if width <= std::f64::consts::FRAC_PI_2 {
            AreaExpr::And(vec![h1, h2])
        } else {
            AreaExpr::Or(vec![h1, h2])
        }
    }

    /// Axis-along-segment rectangle spanning `a → b` with lateral half-width
    /// `width`.
    pub fn rectangle(a: &Point, b: &Point, width: f64) -> Self {
        let dir = a.direction_to(b);
        AreaExpr::And(vec![
            // ahead of a, behind b
            AreaExpr::right_half_plane(a, &dir.sub(&Complex::from_deg(90.0))),
            AreaExpr::right_half_plane(b, &dir.add(&Complex::from_deg(90.0))),
            // within the lateral band
            AreaExpr::right_half_plane(
                &a.add(&dir.add(&Complex::from_deg(90.0)).unit().scale(width)),
                &dir.opposite(),
            ),
            AreaExpr::right_half_plane(
                &a.add(&dir.sub(&Complex::from_deg(90.0)).unit().scale(width)),
                &dir,
            ),
        ])
    }

    pub fn and(exprs: Vec<AreaExpr>) -> Self {
        AreaExpr::And(exprs)
    }

    pub fn or(exprs: Vec<AreaExpr>) -> Self {
        AreaExpr::Or(exprs)
    }

    pub fn not(expr: AreaExpr) -> Self {
        AreaExpr::Not(Box::new(expr))
    }

    pub fn contains(&self, p: &Point) -> bool {
        let q = QVect::from_point(p);
        self.eval_q(&q)
    }

    fn eval_q(&self, q: &QVect) -> bool {
        match self {
            AreaExpr::Leaf(ineq) => ineq.satisfied_q(q),
            AreaExpr::And(es) => es.iter().all(|e| e.eval_q(q)),
            AreaExpr::Or(es) => es.iter().any(|e| e.eval_q(q)),
            AreaExpr::Not(e) => !e.eval_q(q),
        }
    }

    /// Indices of cells whose centre satisfies the predicate (exact).
    pub fn cells_by_centre(&self, topology: &GridTopology) -> Vec<usize> {
        topology
            .indices()
            .filter(|&i| self.contains(&topology.location(i)))
            .collect()
    }

    /// Indices of cells touching the area: each leaf is evaluated once per
    /// lattice vertex, a cell passes a leaf when any of its four corners does,
    /// and the boolean tree combines the per-cell leaf evidence.
    pub fn cells_touching(&self, topology: &GridTopology) -> Vec<usize> {
        let evidence = self.cell_evidence(topology);
        topology.indices().filter(|&i| evidence[i]).collect()
    }

    fn cell_evidence(&self, topology: &GridTopology) -> Vec<bool> {
        match self {
            AreaExpr::Leaf(ineq) => leaf_cell_evidence(ineq, topology),
            AreaExpr::And(es) => fold_evidence(es, topology, |a, b| a && b, true),
            AreaExpr::Or(es) => fold_evidence(es, topology, |a, b| a || b, false),
            AreaExpr::Not(e) => e.cell_evidence(topology).iter().map(|v| !v).collect(),
        }
    }
}

fn fold_evidence(
    exprs: &[AreaExpr],
    topology: &GridTopology,
    op: fn(bool, bool) -> bool,
    unit: bool,
) -> Vec<bool> {
    let mut acc = vec![unit; topology.num_cells()];
    for e in exprs {
        for (a, b) in acc.iter_mut().zip(e.cell_evidence(topology)) {
            *a = op(*a, b);
        }
    }
    acc
}

fn leaf_cell_evidence(ineq: &QIneq, topology: &GridTopology) -> Vec<bool> {
    let w = topology.width() as usize;
    let h = topology.height() as usize;
    // Leaf truth on the (w+1)·(h+1) vertex lattice.
    let mut lattice = vec![false; (w + 1) * (h + 1)];
    for j in 0..=h {
        for i in 0..=w {
            let v = topology.vertex(i as u32, j as u32);
            lattice[j * (w + 1) + i] = ineq.satisfied(&v);
        }
    }
    // A cell passes when any of its four corners does.
    let mut cells = vec![false; w * h];
    for j in 0..h {
        for i in 0..w {
            cells[j * w + i] = lattice[j * (w + 1) + i]
                || lattice[j * (w + 1) + i + 1]
                || lattice[(j + 1) * (w + 1) + i]
                || lattice[(j + 1) * (w + 1) + i + 1];
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo() -> GridTopology {
        GridTopology::new(Point::zero(), 5, 5, 0.2)
    }

    #[test]
    fn circle_by_centre() {
        let t = topo();
        let cells = AreaExpr::circle(&Point::zero(), 0.21).cells_by_centre(&t);
        // Centre cell plus the four axis neighbours.
        assert_eq!(cells.len(), 5);
        assert!(cells.contains(&12));
        assert!(cells.contains(&7) && cells.contains(&17));
        assert!(cells.contains(&11) && cells.contains(&13));
    }

    #[test]
    fn circle_touching_is_superset_of_centres() {
        let t = topo();
        let area = AreaExpr::circle(&Point::zero(), 0.21);
        let by_centre = area.cells_by_centre(&t);
        let touching = area.cells_touching(&t);
        for i in &by_centre {
            assert!(touching.contains(i));
        }
        assert!(touching.len() >= by_centre.len());
    }

    #[test]
    fn half_plane_splits_grid() {
        let t = topo();
        // Right of the east direction = the southern half-plane.
        let cells =
            AreaExpr::right_half_plane(&Point::zero(), &Complex::from_deg(90.0)).cells_by_centre(&t);
        for i in cells {
            assert!(t.location(i).y <= 1e-9);
        }
    }

    #[test]
    fn cone_contains_axis_not_flanks() {
        let cone = AreaExpr::angle(&Point::zero(), &Complex::zero(), 30f64.to_radians());
        assert!(cone.contains(&Point::new(0.0, 1.0)));
        assert!(cone.contains(&Point::new(0.4, 1.0)));
        assert!(!cone.contains(&Point::new(1.0, 0.2)));
        assert!(!cone.contains(&Point::new(0.0, -1.0)));
    }

    #[test]
    fn wide_cone_is_union() {
        let cone = AreaExpr::angle(&Point::zero(), &Complex::zero(), 120f64.to_radians());
        assert!(cone.contains(&Point::new(0.0, 1.0)));
        assert!(cone.contains(&Point::new(1.0, -0.3)));
        assert!(!cone.contains(&Point::new(0.0, -1.0)));
    }

    #[test]
    fn rectangle_band() {
        let r = AreaExpr::rectangle(&Point::zero(), &Point::new(0.0, 1.0), 0.2);
        assert!(r.contains(&Point::new(0.0, 0.5)));
        assert!(r.contains(&Point::new(0.15, 0.9)));
        assert!(!r.contains(&Point::new(0.3, 0.5)));
        assert!(!r.contains(&Point::new(0.0, 1.2)));
        assert!(!r.contains(&Point::new(0.0, -0.2)));
    }

    #[test]
    fn not_inverts() {
        let t = topo();
        let inside = AreaExpr::circle(&Point::zero(), 0.21);
        let outside = AreaExpr::not(inside.clone());
        let a = inside.cells_by_centre(&t);
        let b = outside.cells_by_centre(&t);
        assert_eq!(a.len() + b.len(), t.num_cells());
    }
}

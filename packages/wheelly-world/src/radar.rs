//! radar.rs — occupancy radar map with echo/contact evidence
//!
//! A cell carries a continuous echo weight in [−1, +1] (positive = obstacle
//! evidence, negative = emptiness evidence, zero = unknown) plus the timestamp
//! of the last bumper contact imprinted on it. The map is an immutable value:
//! every update returns a new map sharing the unchanged cells with the
//! previous one.

use std::sync::Arc;

use crate::areas::AreaExpr;
use crate::geometry::{line_square_projections, Complex, Point};
use crate::grid::GridTopology;

/// Smoothing constant of the evidence recurrence; keeps every update inside
/// [−1, +1].
pub const EVIDENCE_SMOOTHING: f64 = 0.5;

// ── Map cell ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapCell {
    pub location: Point,
    /// Simulation timestamp (ms) of the last echo evidence update.
    pub echo_time: u64,
    /// Accumulated echo evidence in [−1, +1]; zero means unknown.
    pub echo_weight: f64,
    /// Simulation timestamp (ms) of the last bumper contact, 0 = none.
    pub contact_time: u64,
}

impl MapCell {
    pub fn unknown_at(location: Point) -> Self {
        Self {
            location,
            echo_time: 0,
            echo_weight: 0.0,
            contact_time: 0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.echo_weight == 0.0 && self.contact_time == 0
    }

    pub fn is_hindered(&self) -> bool {
        self.echo_weight > 0.0 || self.contact_time > 0
    }

    pub fn is_empty_cell(&self) -> bool {
        self.echo_weight < 0.0 && self.contact_time == 0
    }

    /// Prior weight decayed to time `t`.
    fn decayed_weight(&self, t: u64, decay: f64) -> f64 {
        let dt = t.saturating_sub(self.echo_time) as f64;
        self.echo_weight * (-dt / decay).exp()
    }

    /// More obstacle evidence at time `t`.
    pub fn echogenic(self, t: u64, decay: f64) -> Self {
        let w = EVIDENCE_SMOOTHING * self.decayed_weight(t, decay) + (1.0 - EVIDENCE_SMOOTHING);
        Self {
            echo_time: t,
            echo_weight: w.clamp(-1.0, 1.0),
            ..self
        }
    }

    /// More emptiness evidence at time `t`.
    pub fn anechoic(self, t: u64, decay: f64) -> Self {
        let w = EVIDENCE_SMOOTHING * self.decayed_weight(t, decay) - (1.0 - EVIDENCE_SMOOTHING);
        Self {
            echo_time: t,
            echo_weight: w.clamp(-1.0, 1.0),
            ..self
        }
    }

    pub fn with_contact(self, t: u64) -> Self {
        Self {
            contact_time: t,
            ..self
        }
    }

    pub fn without_echo(self) -> Self {
        Self {
            echo_time: 0,
            echo_weight: 0.0,
            ..self
        }
    }

    pub fn without_contact(self) -> Self {
        Self {
            contact_time: 0,
            ..self
        }
    }
}

// ── Radar map ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RadarMap {
    topology: GridTopology,
    cells: Arc<[MapCell]>,
    clean_timestamp: u64,
}

impl RadarMap {
    /// All cells unknown, clean timestamp zero.
    pub fn empty(topology: GridTopology) -> Self {
        let cells: Vec<MapCell> = topology
            .indices()
            .map(|i| MapCell::unknown_at(topology.location(i)))
            .collect();
        Self {
            topology,
            cells: cells.into(),
            clean_timestamp: 0,
        }
    }

    /// Rebuild a map from explicit cells, e.g. when decoding a record file.
    /// `cells` must have one entry per topology cell, in index order.
    pub fn from_cells(topology: GridTopology, cells: Vec<MapCell>, clean_timestamp: u64) -> Self {
        debug_assert_eq!(cells.len(), topology.num_cells());
        Self {
            topology,
            cells: cells.into(),
            clean_timestamp,
        }
    }

    pub fn topology(&self) -> &GridTopology {
        &self.topology
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, index: usize) -> &MapCell {
        &self.cells[index]
    }

    pub fn cells(&self) -> &[MapCell] {
        &self.cells
    }

    /// Cell containing `(x, y)`, when inside the grid.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<&MapCell> {
        self.topology
            .index_of(&Point::new(x, y))
            .map(|i| &self.cells[i])
    }

    pub fn clean_timestamp(&self) -> u64 {
        self.clean_timestamp
    }

    pub fn with_clean_timestamp(&self, t: u64) -> Self {
        Self {
            clean_timestamp: t,
            ..self.clone()
        }
    }

    /// Fresh map with every cell replaced by `mapper(old)`.
    pub fn map<F: Fn(MapCell) -> MapCell>(&self, mapper: F) -> Self {
        let cells: Vec<MapCell> = self.cells.iter().map(|c| mapper(*c)).collect();
        Self {
            topology: self.topology.clone(),
            cells: cells.into(),
            clean_timestamp: self.clean_timestamp,
        }
    }

    /// Fresh map with the cells at `indices` replaced by `mapper(old)`;
    /// all other cells are shared untouched.
    pub fn map_selected<F: Fn(MapCell) -> MapCell>(&self, indices: &[usize], mapper: F) -> Self {
        let mut cells: Vec<MapCell> = self.cells.to_vec();
        for &i in indices {
            cells[i] = mapper(cells[i]);
        }
        Self {
            topology: self.topology.clone(),
            cells: cells.into(),
            clean_timestamp: self.clean_timestamp,
        }
    }

    /// Every cell back to unknown.
    pub fn clean(&self) -> Self {
        Self::empty(self.topology.clone())
    }

    /// Imprint a bumper contact at `location` heading `direction`: all cells
    /// within `contact_radius` that lie in the forward half-plane (front-only
    /// contact), the rear half-plane (rear-only), or the full disc (both).
    pub fn set_contacts_at(
        &self,
        location: &Point,
        direction: &Complex,
        front: bool,
        rear: bool,
        contact_radius: f64,
        timestamp: u64,
    ) -> Self {
        if !front && !rear {
            return self.clone();
        }
        let disc = AreaExpr::circle(location, contact_radius);
        let area = if front && rear {
            disc
        } else if front {
            // Forward half-plane: right of the direction rotated −90°.
            AreaExpr::and(vec![
                disc,
                AreaExpr::right_half_plane(location, &direction.sub(&Complex::from_deg(90.0))),
            ])
        } else {
            AreaExpr::and(vec![
                disc,
                AreaExpr::right_half_plane(location, &direction.add(&Complex::from_deg(90.0))),
            ])
        };
        let indices = area.cells_by_centre(&self.topology);
        self.map_selected(&indices, |c| c.with_contact(timestamp))
    }

    /// True iff the straight run `from → to` is clear: no hindered cell square
    /// projects a point `(x, y)` into the trajectory frame with
    /// `|x| ≤ safe_distance` and `safe_distance ≤ y ≤ ‖to−from‖ + safe_distance`.
    pub fn free_trajectory(&self, from: &Point, to: &Point, safe_distance: f64) -> bool {
        let dist = from.distance(to);
        if dist < 1e-9 {
            return true;
        }
        let direction = from.direction_to(to);
        let g = self.topology.grid_size();
        for cell in self.cells.iter().filter(|c| c.is_hindered()) {
            let projections = line_square_projections(from, &direction, &cell.location, g);
            let blocked = projections.iter().any(|p| {
                p.x.abs() <= safe_distance && p.y >= safe_distance && p.y <= dist + safe_distance
            });
            if blocked {
                return false;
            }
        }
        true
    }

    /// Farthest unknown cell (empty as fallback) within
    /// `(safe_distance, max_distance]` of `location` reachable through a clear
    /// tube of half-width `safe_distance + g·√2`.
    pub fn find_target(
        &self,
        location: &Point,
        max_distance: f64,
        safe_distance: f64,
    ) -> Option<Point> {
        let tube = safe_distance + self.topology.grid_size() * std::f64::consts::SQRT_2;
        let mut eligible = self.eligible_cells(location, safe_distance, max_distance, None);
        // farthest first
        eligible.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        self.pick_target(location, &eligible, tube)
    }

    /// Nearest unknown cell (empty as fallback) in the half-plane of
    /// `escape_dir`, same eligibility and clearance rules as
    /// [`RadarMap::find_target`].
    pub fn find_safe_target(
        &self,
        location: &Point,
        escape_dir: &Complex,
        safe_distance: f64,
        max_distance: f64,
    ) -> Option<Point> {
        let tube = safe_distance + self.topology.grid_size() * std::f64::consts::SQRT_2;
        let mut eligible =
            self.eligible_cells(location, safe_distance, max_distance, Some(escape_dir));
        // nearest first
        eligible.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        self.pick_target(location, &eligible, tube)
    }

    /// `(index, distance, unknown)` of every cell eligible as a target.
    fn eligible_cells(
        &self,
        location: &Point,
        safe_distance: f64,
        max_distance: f64,
        escape_dir: Option<&Complex>,
    ) -> Vec<(usize, f64, bool)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                if !c.is_unknown() && !c.is_empty_cell() {
                    return None;
                }
                let d = c.location.distance(location);
                if d <= safe_distance || d > max_distance {
                    return None;
                }
                if let Some(dir) = escape_dir {
                    // Right half-plane of escape_dir − 90° = the escape side.
                    if c.location.sub(location).dot(&dir.unit()) < 0.0 {
                        return None;
                    }
                }
                Some((i, d, c.is_unknown()))
            })
            .collect()
    }

    fn pick_target(
        &self,
        location: &Point,
        ordered: &[(usize, f64, bool)],
        tube: f64,
    ) -> Option<Point> {
        for unknown_pass in [true, false] {
            for (i, _, _) in ordered.iter().filter(|(_, _, u)| *u == unknown_pass) {
                let target = self.cells[*i].location;
                if self.free_trajectory(location, &target, tube) {
                    return Some(target);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECAY: f64 = 100_000.0;

    fn topo() -> GridTopology {
        GridTopology::new(Point::zero(), 5, 5, 0.2)
    }

    #[test]
    fn empty_map_is_unknown() {
        let map = RadarMap::empty(topo());
        assert_eq!(map.num_cells(), 25);
        assert!(map.cells().iter().all(|c| c.is_unknown()));
        assert_eq!(map.clean_timestamp(), 0);
    }

    #[test]
    fn weight_stays_bounded() {
        let mut cell = MapCell::unknown_at(Point::zero());
        for t in 1..200u64 {
            cell = cell.echogenic(t * 10, DECAY);
            assert!(cell.echo_weight <= 1.0 && cell.echo_weight >= -1.0);
        }
        for t in 200..400u64 {
            cell = cell.anechoic(t * 10, DECAY);
            assert!(cell.echo_weight <= 1.0 && cell.echo_weight >= -1.0);
        }
    }

    #[test]
    fn echo_monotone_convergence() {
        // Only echoes: weight non-decreasing, converging toward +1.
        let mut cell = MapCell::unknown_at(Point::zero());
        let mut prev = 0.0;
        for t in 1..50u64 {
            cell = cell.echogenic(t, DECAY);
            assert!(cell.echo_weight >= prev);
            prev = cell.echo_weight;
        }
        assert!(cell.echo_weight > 0.99);

        // Only anechoics: non-increasing toward −1.
        let mut cell = MapCell::unknown_at(Point::zero());
        let mut prev = 0.0;
        for t in 1..50u64 {
            cell = cell.anechoic(t, DECAY);
            assert!(cell.echo_weight <= prev);
            prev = cell.echo_weight;
        }
        assert!(cell.echo_weight < -0.99);
    }

    #[test]
    fn mixed_evidence_follows_majority() {
        let mut cell = MapCell::unknown_at(Point::zero());
        for t in 1..60u64 {
            cell = if t % 3 == 0 {
                cell.anechoic(t, DECAY)
            } else {
                cell.echogenic(t, DECAY)
            };
        }
        assert!(cell.echo_weight > 0.0);
    }

    #[test]
    fn stale_weight_decays() {
        let cell = MapCell::unknown_at(Point::zero()).echogenic(0, 1000.0);
        let later = cell.echogenic(10_000, 1000.0);
        // Prior weight fully decayed: only the fresh (1 − s) contribution left.
        assert!((later.echo_weight - (1.0 - EVIDENCE_SMOOTHING)).abs() < 1e-3);
    }

    #[test]
    fn map_selected_shares_unchanged() {
        let map = RadarMap::empty(topo());
        let updated = map.map_selected(&[12], |c| c.echogenic(100, DECAY));
        assert!(updated.cell(12).echo_weight > 0.0);
        assert_eq!(map.cell(12).echo_weight, 0.0);
        for i in (0..25).filter(|&i| i != 12) {
            assert_eq!(updated.cell(i), map.cell(i));
        }
    }

    #[test]
    fn contacts_front_half_disc() {
        // Robot at (1.0, 0.0) heading north would put most of the disc outside
        // this grid; use the origin instead and check the half-plane split.
        let map = RadarMap::empty(topo());
        let updated = map.set_contacts_at(
            &Point::zero(),
            &Complex::zero(),
            false,
            true,
            0.2,
            1000,
        );
        for (i, cell) in updated.cells().iter().enumerate() {
            let p = map.topology().location(i);
            let expected = p.distance(&Point::zero()) <= 0.2 && p.y <= 1e-9;
            assert_eq!(cell.contact_time == 1000, expected, "cell {i} at {p:?}");
            if !expected {
                assert_eq!(cell, map.cell(i));
            }
        }
    }

    #[test]
    fn contacts_both_full_disc() {
        let map = RadarMap::empty(topo());
        let updated =
            map.set_contacts_at(&Point::zero(), &Complex::zero(), true, true, 0.21, 500);
        let marked = updated
            .cells()
            .iter()
            .filter(|c| c.contact_time == 500)
            .count();
        assert_eq!(marked, 5);
    }

    fn map_with_hindered(indices: &[usize]) -> RadarMap {
        RadarMap::empty(topo()).map_selected(indices, |c| c.echogenic(100, DECAY))
    }

    #[test]
    fn free_trajectory_clear_map() {
        let map = RadarMap::empty(topo());
        assert!(map.free_trajectory(&Point::zero(), &Point::new(0.0, 0.4), 0.1));
    }

    #[test]
    fn free_trajectory_blocked_by_hindered() {
        // Hindered cell at (0, 0.2) sits on the path from origin to (0, 0.4).
        let map = map_with_hindered(&[17]);
        assert_eq!(map.topology().location(17), Point::new(0.0, 0.2));
        assert!(!map.free_trajectory(&Point::zero(), &Point::new(0.0, 0.4), 0.1));
        // A lateral obstacle far from the tube does not block.
        let map = map_with_hindered(&[14]); // (0.4, 0.0)
        assert!(map.free_trajectory(&Point::zero(), &Point::new(0.0, 0.4), 0.1));
    }

    #[test]
    fn free_trajectory_monotone_in_clearance() {
        // Hindered cell at (0.2, 0.2), run from origin to (0, 0.4): blocked at
        // wide clearances, and once free at a clearance it stays free at every
        // smaller one.
        let map = map_with_hindered(&[18]);
        assert_eq!(map.topology().location(18), Point::new(0.2, 0.2));
        for s in [0.2, 0.15, 0.1] {
            assert!(!map.free_trajectory(&Point::zero(), &Point::new(0.0, 0.4), s));
        }
        assert!(map.free_trajectory(&Point::zero(), &Point::new(0.0, 0.4), 0.05));
        // Clear map: free at a wide clearance implies free at all smaller.
        let clear = RadarMap::empty(topo());
        assert!(clear.free_trajectory(&Point::zero(), &Point::new(0.0, 0.4), 0.3));
        for s in [0.2, 0.1, 0.05, 0.0] {
            assert!(clear.free_trajectory(&Point::zero(), &Point::new(0.0, 0.4), s));
        }
    }

    #[test]
    fn find_target_prefers_farthest_unknown() {
        // All cells unknown: the farthest in-range cell wins.
        let map = RadarMap::empty(GridTopology::new(Point::zero(), 9, 9, 0.2));
        let target = map
            .find_target(&Point::zero(), 0.85, 0.1)
            .expect("target exists");
        let d = target.distance(&Point::zero());
        // Farthest eligible distance within 0.85 on this grid is 0.8 (axis)
        // vs diagonal 0.8·√2 > max; (0.8, 0.2) → 0.8246.
        assert!(d > 0.82, "picked {target:?} at {d}");
    }

    #[test]
    fn find_target_falls_back_to_empty() {
        // No unknown cells: all empty except one hindered; empty farthest wins.
        let map = RadarMap::empty(topo()).map(|c| c.anechoic(100, DECAY));
        let target = map
            .find_target(&Point::zero(), 0.6, 0.1)
            .expect("empty fallback");
        assert!(target.distance(&Point::zero()) > 0.55);
    }

    #[test]
    fn find_target_exhaustive_on_small_map() {
        // Exhaustive check of the "farthest eligible unknown" contract.
        let map = map_with_hindered(&[7]); // (0, -0.2) hindered
        let safe = 0.05;
        let max = 0.9;
        let tube = safe + map.topology().grid_size() * std::f64::consts::SQRT_2;
        let found = map.find_target(&Point::zero(), max, safe);
        let mut best: Option<(Point, f64)> = None;
        for i in map.topology().indices() {
            let c = map.cell(i);
            if !c.is_unknown() {
                continue;
            }
            let d = c.location.distance(&Point::zero());
            if d <= safe || d > max {
                continue;
            }
            if !map.free_trajectory(&Point::zero(), &c.location, tube) {
                continue;
            }
            if best.map(|(_, bd)| d > bd).unwrap_or(true) {
                best = Some((c.location, d));
            }
        }
        match (found, best) {
            (Some(f), Some((b, bd))) => {
                let fd = f.distance(&Point::zero());
                assert!((fd - bd).abs() < 1e-9, "found {f:?} ({fd}), best {b:?} ({bd})");
            }
            (None, None) => {}
            other => panic!("finder disagrees with enumeration: {other:?}"),
        }
    }

    #[test]
    fn find_safe_target_restricted_to_escape_side() {
        let map = RadarMap::empty(topo());
        let target = map
            .find_safe_target(&Point::zero(), &Complex::zero(), 0.1, 0.9)
            .expect("safe target");
        // Escape north: target must not be south of the robot.
        assert!(target.y >= 0.0);
        // Nearest eligible: distance just above safe.
        assert!(target.distance(&Point::zero()) <= 0.21);
    }
}

//! grid.rs — fixed-origin regular square-cell grid topology

use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// Immutable descriptor of a radar grid.
///
/// Cell `(i, j)` centre is `center + ((i − (w−1)/2)·g, (j − (h−1)/2)·g)`.
/// `width · height` equals the number of map cells throughout a map's life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTopology {
    center: Point,
    width: u32,
    height: u32,
    grid_size: f64,
}

impl GridTopology {
    pub fn new(center: Point, width: u32, height: u32, grid_size: f64) -> Self {
        Self {
            center,
            width,
            height,
            grid_size,
        }
    }

    pub fn center(&self) -> Point {
        self.center
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn grid_size(&self) -> f64 {
        self.grid_size
    }

    pub fn num_cells(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        0..self.num_cells()
    }

    /// Centre of the cell at `index`.
    pub fn location(&self, index: usize) -> Point {
        let i = (index % self.width as usize) as f64;
        let j = (index / self.width as usize) as f64;
        Point::new(
            self.center.x + (i - (self.width as f64 - 1.0) / 2.0) * self.grid_size,
            self.center.y + (j - (self.height as f64 - 1.0) / 2.0) * self.grid_size,
        )
    }

    /// Index of the cell containing `p`, or `None` when outside the grid.
    pub fn index_of(&self, p: &Point) -> Option<usize> {
        let i = ((p.x - self.center.x) / self.grid_size + (self.width as f64 - 1.0) / 2.0).round();
        let j = ((p.y - self.center.y) / self.grid_size + (self.height as f64 - 1.0) / 2.0).round();
        if i >= 0.0 && i < self.width as f64 && j >= 0.0 && j < self.height as f64 {
            Some(j as usize * self.width as usize + i as usize)
        } else {
            None
        }
    }

    /// Vertex `(i, j)` of the `(w+1)·(h+1)` lattice of cell corners,
    /// `i ∈ 0..=w`, `j ∈ 0..=h`.
    pub fn vertex(&self, i: u32, j: u32) -> Point {
        Point::new(
            self.center.x + (i as f64 - self.width as f64 / 2.0) * self.grid_size,
            self.center.y + (j as f64 - self.height as f64 / 2.0) * self.grid_size,
        )
    }

    pub fn contains(&self, p: &Point) -> bool {
        self.index_of(p).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo() -> GridTopology {
        GridTopology::new(Point::zero(), 5, 5, 0.2)
    }

    #[test]
    fn locations_are_centred() {
        let t = topo();
        assert_eq!(t.location(12), Point::new(0.0, 0.0));
        assert_eq!(t.location(0), Point::new(-0.4, -0.4));
        assert_eq!(t.location(24), Point::new(0.4, 0.4));
    }

    #[test]
    fn index_round_trip() {
        let t = topo();
        for index in t.indices() {
            assert_eq!(t.index_of(&t.location(index)), Some(index));
        }
    }

    #[test]
    fn index_of_outside_is_none() {
        let t = topo();
        assert_eq!(t.index_of(&Point::new(0.0, 0.51)), None);
        assert_eq!(t.index_of(&Point::new(-3.0, 0.0)), None);
    }

    #[test]
    fn vertices_bound_cells() {
        let t = topo();
        assert_eq!(t.vertex(0, 0), Point::new(-0.5, -0.5));
        assert_eq!(t.vertex(5, 5), Point::new(0.5, 0.5));
        // Cell 0 corners
        assert_eq!(t.vertex(1, 1), Point::new(-0.3, -0.3));
    }
}

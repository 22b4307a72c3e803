//! world.rs — composed world model and its update pipeline
//!
//! The world modeller owns the radar map and the marker locator, folds every
//! robot message into a fresh immutable [`WorldModel`], and derives the polar
//! and local-grid views lazily when an inference snapshot is requested.
//!
//! Camera/proxy reconciliation: a QR detection is only consumed once a
//! correlated range reading exists. The camera event is parked
//! (`waiting_for_proxy`) until the next proxy arrives; a proxy with no parked
//! camera event just refreshes the pose.

use std::collections::HashMap;

use crate::geometry::{Complex, Point};
use crate::grid::GridTopology;
use crate::markers::{LabelMarker, MarkerLocator};
use crate::messages::{CameraEvent, ProxyMessage};
use crate::modeller::{RadarModeller, RadarParams};
use crate::radar::{MapCell, RadarMap};
use crate::robot::RobotMessage;
use crate::status::{RobotSpec, RobotStatus, SupplyDecoder};

/// Sectors of the polar view.
pub const DEFAULT_POLAR_SECTORS: usize = 24;

// ── World model spec ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct WorldModelSpec {
    pub robot_spec: RobotSpec,
    pub topology: GridTopology,
    pub radar: RadarParams,
    /// Marker eviction age (ms).
    pub marker_persistence: u64,
    pub polar_sectors: usize,
    /// Side of the robot-centred local grid view, cells.
    pub grid_map_size: u32,
}

// ── Derived views ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SectorStatus {
    Unknown,
    Empty,
    /// Nearest hindered cell distance (m).
    Hindered(f64),
}

/// Obstacle distances by direction sector, relative to the robot heading.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarMap {
    pub center: Point,
    pub direction: Complex,
    pub sectors: Vec<SectorStatus>,
}

impl PolarMap {
    pub fn from_radar(
        map: &RadarMap,
        center: &Point,
        direction: &Complex,
        sectors: usize,
        max_distance: f64,
    ) -> Self {
        let mut out = vec![SectorStatus::Unknown; sectors];
        let sector_width = std::f64::consts::TAU / sectors as f64;
        for cell in map.cells() {
            let d = cell.location.distance(center);
            if d > max_distance || d < 1e-9 || cell.is_unknown() {
                continue;
            }
            let rel = center.direction_to(&cell.location).sub(direction);
            // Sector 0 spans the heading; indices grow clockwise.
            let idx = ((rel.to_rad() + std::f64::consts::PI + sector_width / 2.0) / sector_width)
                .floor() as usize
                % sectors;
            let idx = (idx + sectors / 2) % sectors;
            out[idx] = match (out[idx], cell.is_hindered()) {
                (SectorStatus::Hindered(prev), true) => SectorStatus::Hindered(prev.min(d)),
                (_, true) => SectorStatus::Hindered(d),
                (SectorStatus::Hindered(prev), false) => SectorStatus::Hindered(prev),
                (_, false) => SectorStatus::Empty,
            };
        }
        Self {
            center: *center,
            direction: *direction,
            sectors: out,
        }
    }
}

/// Robot-centred square crop of the radar map.
#[derive(Debug, Clone, PartialEq)]
pub struct GridMap {
    pub topology: GridTopology,
    pub cells: Vec<MapCell>,
}

impl GridMap {
    pub fn from_radar(map: &RadarMap, center: &Point, size: u32) -> Self {
        let g = map.topology().grid_size();
        // Snap the centre onto the source grid so cells align.
        let snapped = map
            .topology()
            .index_of(center)
            .map(|i| map.topology().location(i))
            .unwrap_or(*center);
        let topology = GridTopology::new(snapped, size, size, g);
        let cells = topology
            .indices()
            .map(|i| {
                let p = topology.location(i);
                map.topology()
                    .index_of(&p)
                    .map(|src| *map.cell(src))
                    .unwrap_or_else(|| MapCell::unknown_at(p))
            })
            .collect();
        Self { topology, cells }
    }
}

// ── World model ───────────────────────────────────────────────────────────────

/// Immutable snapshot of everything the robot knows about the world.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldModel {
    pub spec: WorldModelSpec,
    pub status: RobotStatus,
    pub radar_map: RadarMap,
    pub markers: HashMap<String, LabelMarker>,
    /// Derived views, populated at inference time only.
    pub polar_map: Option<PolarMap>,
    pub grid_map: Option<GridMap>,
}

impl WorldModel {
    pub fn robot_location(&self) -> Point {
        self.status.location()
    }

    pub fn robot_direction(&self) -> Complex {
        self.status.direction()
    }

    pub fn simulation_time(&self) -> u64 {
        self.status.simulation_time
    }
}

// ── World modeller ────────────────────────────────────────────────────────────

pub struct WorldModeller {
    spec: WorldModelSpec,
    radar_modeller: RadarModeller,
    marker_locator: MarkerLocator,
    status: RobotStatus,
    radar_map: RadarMap,
    prev_camera: Option<CameraEvent>,
    prev_proxy: Option<ProxyMessage>,
    waiting_for_proxy: bool,
}

impl WorldModeller {
    pub fn new(spec: WorldModelSpec, supply_decoder: SupplyDecoder) -> Self {
        let status = RobotStatus::new(spec.robot_spec.clone(), supply_decoder);
        let radar_map = RadarMap::empty(spec.topology.clone());
        let radar_modeller = RadarModeller::new(spec.radar);
        let marker_locator = MarkerLocator::new(spec.marker_persistence);
        Self {
            spec,
            radar_modeller,
            marker_locator,
            status,
            radar_map,
            prev_camera: None,
            prev_proxy: None,
            waiting_for_proxy: false,
        }
    }

    pub fn status(&self) -> &RobotStatus {
        &self.status
    }

    pub fn radar_map(&self) -> &RadarMap {
        &self.radar_map
    }

    pub fn markers(&self) -> &HashMap<String, LabelMarker> {
        self.marker_locator.markers()
    }

    pub fn waiting_for_proxy(&self) -> bool {
        self.waiting_for_proxy
    }

    /// Integrate one message into the working model.
    pub fn latch(&mut self, message: &RobotMessage) {
        self.status = self.status.clone().update(message);

        match message {
            RobotMessage::Proxy(_) | RobotMessage::Contacts(_) => {
                self.radar_map = self
                    .radar_modeller
                    .update_from_status(self.radar_map.clone(), &self.status);
            }
            _ => {}
        }

        self.reconcile();
    }

    /// Camera/proxy reconciliation table.
    fn reconcile(&mut self) {
        let camera_changed = self.status.camera != self.prev_camera;
        let proxy_changed = self.status.proxy != self.prev_proxy;

        match (camera_changed, proxy_changed) {
            (true, true) => {
                self.prev_camera = self.status.camera.clone();
                self.prev_proxy = self.status.proxy.clone();
                self.fuse_marker();
                self.waiting_for_proxy = false;
            }
            (true, false) => {
                self.prev_camera = self.status.camera.clone();
                self.waiting_for_proxy = true;
            }
            (false, true) => {
                self.prev_proxy = self.status.proxy.clone();
                if self.waiting_for_proxy {
                    self.fuse_marker();
                    self.waiting_for_proxy = false;
                }
            }
            (false, false) => {}
        }
    }

    fn fuse_marker(&mut self) {
        if let (Some(camera), Some(proxy)) = (&self.status.camera, &self.status.proxy) {
            self.marker_locator
                .update(camera, proxy, &self.spec.robot_spec);
            self.status.camera_proxy = Some(proxy.clone());
        }
    }

    /// Snapshot with the derived views recomputed.
    pub fn infer(&mut self) -> WorldModel {
        let center = self.status.location();
        let direction = self.status.direction();
        let polar = PolarMap::from_radar(
            &self.radar_map,
            &center,
            &direction,
            self.spec.polar_sectors,
            self.spec.robot_spec.max_radar_distance,
        );
        let grid = GridMap::from_radar(&self.radar_map, &center, self.spec.grid_map_size);
        WorldModel {
            spec: self.spec.clone(),
            status: self.status.clone(),
            radar_map: self.radar_map.clone(),
            markers: self.marker_locator.markers().clone(),
            polar_map: Some(polar),
            grid_map: Some(grid),
        }
    }

    /// Snapshot without recomputing the derived views.
    pub fn snapshot(&self) -> WorldModel {
        WorldModel {
            spec: self.spec.clone(),
            status: self.status.clone(),
            radar_map: self.radar_map.clone(),
            markers: self.marker_locator.markers().clone(),
            polar_map: None,
            grid_map: None,
        }
    }
}

//! markers.rs — persistent labelled landmarks fused from camera and proxy

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geometry::Point;
use crate::messages::{CameraEvent, ProxyMessage};
use crate::status::RobotSpec;

/// Camera label meaning "nothing recognised".
pub const UNKNOWN_QR_CODE: &str = "?";

/// Observation count ceiling: keeps a long-lived marker from freezing — a new
/// sighting always moves the averaged location by at least 1/(ceiling+1).
pub const MARKER_WEIGHT_CEILING: f64 = 32.0;

// ── Label marker ──────────────────────────────────────────────────────────────

/// A persistent named landmark with an aggregated location estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMarker {
    pub label: String,
    pub location: Point,
    /// Accumulated observation weight, capped at [`MARKER_WEIGHT_CEILING`].
    pub weight: f64,
    /// Timestamp of the last fused observation (ms).
    pub marker_time: u64,
    /// Timestamp of the last eviction pass that kept this marker (ms).
    pub clean_time: u64,
}

// ── Marker locator ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MarkerLocator {
    /// Markers older than this are evicted at every camera event (ms).
    marker_persistence: u64,
    markers: HashMap<String, LabelMarker>,
}

impl MarkerLocator {
    pub fn new(marker_persistence: u64) -> Self {
        Self {
            marker_persistence,
            markers: HashMap::new(),
        }
    }

    pub fn markers(&self) -> &HashMap<String, LabelMarker> {
        &self.markers
    }

    /// Fuse a camera event with its correlated proxy ping. Unrecognised
    /// events (`"?"`) only drive eviction.
    pub fn update(&mut self, camera: &CameraEvent, proxy: &ProxyMessage, spec: &RobotSpec) {
        let t = proxy.sim_time.max(camera.sim_time);
        self.evict(t);

        if camera.qr_code == UNKNOWN_QR_CODE {
            return;
        }

        let observed = proxy.echo_point(spec.distance_per_pulse, spec.max_radar_distance);
        let entry = self
            .markers
            .entry(camera.qr_code.clone())
            .or_insert_with(|| LabelMarker {
                label: camera.qr_code.clone(),
                location: observed,
                weight: 0.0,
                marker_time: proxy.sim_time,
                clean_time: 0,
            });

        // Weighted average of the running estimate and the new observation.
        let w = entry.weight;
        entry.location = Point::new(
            (entry.location.x * w + observed.x) / (w + 1.0),
            (entry.location.y * w + observed.y) / (w + 1.0),
        );
        entry.weight = (w + 1.0).min(MARKER_WEIGHT_CEILING);
        entry.marker_time = proxy.sim_time;
    }

    fn evict(&mut self, t: u64) {
        let deadline = t.saturating_sub(self.marker_persistence);
        self.markers.retain(|_, m| m.marker_time >= deadline);
        for m in self.markers.values_mut() {
            m.clean_time = t;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Complex;

    fn spec() -> RobotSpec {
        RobotSpec {
            max_radar_distance: 3.0,
            contact_radius: 0.2,
            receptive_angle: 15f64.to_radians(),
            head_location: Point::zero(),
            camera_azimuth: Complex::zero(),
            lidar_azimuth: Complex::zero(),
            max_pps: 60,
            distance_per_pulse: 1.0,
        }
    }

    fn camera(t: u64, qr: &str) -> CameraEvent {
        CameraEvent {
            sim_time: t,
            qr_code: qr.to_string(),
            width: 240,
            height: 240,
            points: None,
        }
    }

    fn proxy(t: u64, echo_delay: u64) -> ProxyMessage {
        ProxyMessage {
            sim_time: t,
            sensor_direction: Complex::zero(),
            echo_delay,
            x_pulses: 0.0,
            y_pulses: 0.0,
            direction: Complex::zero(),
        }
    }

    #[test]
    fn first_sighting_creates_marker() {
        let mut locator = MarkerLocator::new(60_000);
        locator.update(&camera(100, "A"), &proxy(120, 1700), &spec());
        let m = &locator.markers()["A"];
        assert_eq!(m.weight, 1.0);
        assert_eq!(m.marker_time, 120);
        assert!(m.location.x.abs() < 1e-9);
        assert!((m.location.y - 0.289).abs() < 1e-9);
    }

    #[test]
    fn repeated_sightings_average_and_cap() {
        let mut locator = MarkerLocator::new(60_000);
        locator.update(&camera(0, "A"), &proxy(0, 1000), &spec());
        locator.update(&camera(10, "A"), &proxy(10, 2000), &spec());
        let m = &locator.markers()["A"];
        assert_eq!(m.weight, 2.0);
        // Average of 0.17 and 0.34.
        assert!((m.location.y - 0.255).abs() < 1e-9);

        for t in 0..100u64 {
            locator.update(&camera(20 + t, "A"), &proxy(20 + t, 1000), &spec());
        }
        assert_eq!(locator.markers()["A"].weight, MARKER_WEIGHT_CEILING);
    }

    #[test]
    fn unknown_code_is_discarded() {
        let mut locator = MarkerLocator::new(60_000);
        locator.update(&camera(100, UNKNOWN_QR_CODE), &proxy(100, 1700), &spec());
        assert!(locator.markers().is_empty());
    }

    #[test]
    fn stale_markers_evicted_on_camera_event() {
        let mut locator = MarkerLocator::new(1_000);
        locator.update(&camera(100, "A"), &proxy(100, 1700), &spec());
        assert_eq!(locator.markers().len(), 1);
        // Unrecognised event long after: "A" is gone.
        locator.update(&camera(5_000, UNKNOWN_QR_CODE), &proxy(5_000, 0), &spec());
        assert!(locator.markers().is_empty());
    }

    #[test]
    fn no_echo_places_marker_at_max_range() {
        let mut locator = MarkerLocator::new(60_000);
        locator.update(&camera(10, "B"), &proxy(10, 0), &spec());
        let m = &locator.markers()["B"];
        assert!((m.location.y - 3.0).abs() < 1e-9);
    }
}

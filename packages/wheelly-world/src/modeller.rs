//! modeller.rs — radar map update pipeline
//!
//! Consumes sensor signals derived from the robot status and folds them into
//! the radar map: per-cell echo/anechoic evidence inside the acceptance cone,
//! bumper contact imprints, and the periodic cleaning that expires stale
//! evidence.

use crate::areas::AreaExpr;
use crate::geometry::{square_arc_interval, Complex, Point};
use crate::radar::RadarMap;
use crate::status::RobotStatus;

// ── Parameters ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RadarParams {
    /// Minimum gap between cleaning passes (ms).
    pub clean_interval: u64,
    /// Echo evidence older than this is zeroed at cleaning (ms).
    pub echo_persistence: u64,
    /// Contact evidence older than this is zeroed at cleaning (ms).
    pub contact_persistence: u64,
    /// Evidence decay constant (ms).
    pub decay: f64,
}

// ── Sensor signal ─────────────────────────────────────────────────────────────

/// One range ping in world coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSignal {
    /// Sensor origin.
    pub location: Point,
    /// Absolute beam direction.
    pub direction: Complex,
    /// Measured echo distance (m); meaningful only when `echo`.
    pub distance: f64,
    /// Simulation timestamp (ms).
    pub timestamp: u64,
    pub echo: bool,
}

// ── Modeller ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RadarModeller {
    params: RadarParams,
}

impl RadarModeller {
    pub fn new(params: RadarParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RadarParams {
        &self.params
    }

    /// Fold one sensor signal into the map, then clean.
    pub fn update(
        &self,
        map: RadarMap,
        signal: &SensorSignal,
        receptive_angle: f64,
        max_distance: f64,
    ) -> RadarMap {
        let map = self.apply_signal(map, signal, receptive_angle, max_distance);
        self.clean(map, signal.timestamp)
    }

    fn apply_signal(
        &self,
        map: RadarMap,
        signal: &SensorSignal,
        receptive_angle: f64,
        max_distance: f64,
    ) -> RadarMap {
        let topology = map.topology().clone();
        let g = topology.grid_size();
        // Conservative pre-filter: cells touching the sensor footprint.
        let footprint = AreaExpr::and(vec![
            AreaExpr::circle(&signal.location, max_distance + g),
            AreaExpr::angle(&signal.location, &signal.direction, receptive_angle),
        ]);
        let candidates = footprint.cells_touching(&topology);

        let decay = self.params.decay;
        let t = signal.timestamp;
        map.map_selected(&candidates, |cell| {
            match square_arc_interval(
                cell.location,
                g,
                signal.location,
                &signal.direction,
                receptive_angle,
            ) {
                None => cell,
                Some((near, _)) if near <= 0.0 || near > max_distance => cell,
                Some((near, far)) => {
                    if signal.echo && near <= signal.distance && signal.distance <= far {
                        cell.echogenic(t, decay)
                    } else if !signal.echo || signal.distance > far {
                        cell.anechoic(t, decay)
                    } else {
                        // Echo nearer than the cell: the beam never got there.
                        cell
                    }
                }
            }
        })
    }

    /// Expire stale evidence once per `clean_interval`.
    pub fn clean(&self, map: RadarMap, t: u64) -> RadarMap {
        if t < map.clean_timestamp() + self.params.clean_interval {
            return map;
        }
        let echo_deadline = t.saturating_sub(self.params.echo_persistence);
        let contact_deadline = t.saturating_sub(self.params.contact_persistence);
        map.map(|cell| {
            let cell = if cell.echo_time <= echo_deadline {
                cell.without_echo()
            } else {
                cell
            };
            if cell.contact_time != 0 && cell.contact_time <= contact_deadline {
                cell.without_contact()
            } else {
                cell
            }
        })
        .with_clean_timestamp(t)
    }

    /// Fold a full robot status into the map: proxy ping, bumper imprints,
    /// then cleaning.
    pub fn update_from_status(&self, map: RadarMap, status: &RobotStatus) -> RadarMap {
        let spec = &status.spec;
        let location = status.location();
        let direction = status.direction();
        let t = status.simulation_time;

        let mut map = map;
        if let Some(proxy) = &status.proxy {
            let distance = proxy.echo_distance();
            let signal = SensorSignal {
                location: spec.head_at(&proxy.location(spec.distance_per_pulse), &proxy.direction),
                direction: proxy.absolute_direction().add(&spec.lidar_azimuth),
                distance,
                timestamp: proxy.sim_time,
                echo: distance > 0.0 && distance < spec.max_radar_distance,
            };
            map = self.apply_signal(map, &signal, spec.receptive_angle, spec.max_radar_distance);
        }

        if let Some(contacts) = &status.contacts {
            let front = contacts.front_contact();
            let rear = contacts.rear_contact();
            if front || rear {
                map = map.set_contacts_at(
                    &location,
                    &direction,
                    front,
                    rear,
                    spec.contact_radius,
                    contacts.sim_time,
                );
            }
        }

        self.clean(map, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridTopology;
    use crate::messages::{ContactsMessage, ProxyMessage};
    use crate::robot::RobotMessage;
    use crate::status::{RobotSpec, RobotStatus, SupplyDecoder};

    fn params() -> RadarParams {
        RadarParams {
            clean_interval: 1000,
            echo_persistence: 5000,
            contact_persistence: 5000,
            decay: 100_000.0,
        }
    }

    fn spec() -> RobotSpec {
        RobotSpec {
            max_radar_distance: 3.0,
            contact_radius: 0.2,
            receptive_angle: 30f64.to_radians(),
            head_location: Point::zero(),
            camera_azimuth: Complex::zero(),
            lidar_azimuth: Complex::zero(),
            max_pps: 60,
            distance_per_pulse: 1.0,
        }
    }

    fn map5() -> RadarMap {
        RadarMap::empty(GridTopology::new(Point::zero(), 5, 5, 0.2))
    }

    fn status_with_proxy(echo_delay: u64) -> RobotStatus {
        RobotStatus::new(
            spec(),
            SupplyDecoder {
                supply_values: [0.0, 1.0],
                voltages: [0.0, 1.0],
            },
        )
        .update(&RobotMessage::Proxy(ProxyMessage {
            sim_time: 100,
            sensor_direction: Complex::zero(),
            echo_delay,
            x_pulses: 0.0,
            y_pulses: 0.0,
            direction: Complex::zero(),
        }))
    }

    #[test]
    fn single_ping_marks_the_echo_cell() {
        // Echo at ≈0.289 m dead ahead: the cell spanning it turns echogenic.
        let modeller = RadarModeller::new(params());
        let map = modeller.update_from_status(map5(), &status_with_proxy(1700));

        let echo_cell = map.cell_at(0.0, 0.2).unwrap();
        assert!(echo_cell.echo_weight > 0.0, "echo cell {echo_cell:?}");

        // Cells outside the cone are untouched.
        for x in [-0.4, 0.4] {
            for y in [-0.4, -0.2, 0.0] {
                let c = map.cell_at(x, y).unwrap();
                assert_eq!(c.echo_weight, 0.0, "cell at ({x},{y})");
            }
        }
        // A shadowed cell beyond the echo keeps no evidence either way.
        let beyond = map.cell_at(0.0, 0.4).unwrap();
        assert!(beyond.echo_weight >= 0.0);
    }

    #[test]
    fn no_echo_sweeps_the_cone_anechoic() {
        let modeller = RadarModeller::new(params());
        let map = modeller.update_from_status(map5(), &status_with_proxy(0));
        let ahead = map.cell_at(0.0, 0.2).unwrap();
        assert!(ahead.echo_weight < 0.0, "ahead {ahead:?}");
        let far = map.cell_at(0.0, 0.4).unwrap();
        assert!(far.echo_weight < 0.0);
        // Behind the robot: untouched.
        assert_eq!(map.cell_at(0.0, -0.4).unwrap().echo_weight, 0.0);
    }

    #[test]
    fn contact_imprints_rear_half_disc() {
        let modeller = RadarModeller::new(params());
        let status = RobotStatus::new(
            spec(),
            SupplyDecoder {
                supply_values: [0.0, 1.0],
                voltages: [0.0, 1.0],
            },
        )
        .update(&RobotMessage::Contacts(ContactsMessage {
            sim_time: 1000,
            front_sensor: true,
            rear_sensor: false,
            can_move_forward: true,
            can_move_backward: false,
        }));
        let map = modeller.update_from_status(map5(), &status);
        for (i, cell) in map.cells().iter().enumerate() {
            let p = map.topology().location(i);
            let expected = p.distance(&Point::zero()) <= 0.2 && p.y <= 1e-9;
            assert_eq!(cell.contact_time == 1000, expected, "cell {i}");
        }
    }

    #[test]
    fn cleaning_expires_stale_evidence() {
        let modeller = RadarModeller::new(params());
        let map = map5().map_selected(&[12], |c| c.echogenic(100, 100_000.0).with_contact(100));
        // Before the persistence window: evidence survives.
        let kept = modeller.clean(map.clone(), 2000);
        assert!(kept.cell(12).echo_weight > 0.0);
        assert_eq!(kept.cell(12).contact_time, 100);
        assert_eq!(kept.clean_timestamp(), 2000);
        // Past the window: both evidences zeroed.
        let cleaned = modeller.clean(map, 10_000);
        assert_eq!(cleaned.cell(12).echo_weight, 0.0);
        assert_eq!(cleaned.cell(12).echo_time, 0);
        assert_eq!(cleaned.cell(12).contact_time, 0);
        assert!(cleaned.cell(12).is_unknown());
    }

    #[test]
    fn cleaning_rate_limited_by_interval() {
        let modeller = RadarModeller::new(params());
        let map = map5().with_clean_timestamp(9_500);
        // 10_000 < 9_500 + clean_interval: no pass.
        let map2 = modeller.clean(map.clone(), 10_000);
        assert_eq!(map2.clean_timestamp(), 9_500);
        let map3 = modeller.clean(map, 10_600);
        assert_eq!(map3.clean_timestamp(), 10_600);
    }
}

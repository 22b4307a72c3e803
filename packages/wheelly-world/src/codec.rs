//! codec.rs — deterministic binary record format for world models
//!
//! Little-endian, length-prefixed, purely positional: no tags, no padding,
//! byte-for-byte reproducible. Primitives:
//!
//! - `bool` → 1 byte `0`/`1`
//! - `i32` → 4 bytes LE
//! - `i64` → 8 bytes LE
//! - `f64` → `i64` of the IEEE-754 bit pattern
//! - `string` → `i32` byte length + UTF-8 payload
//!
//! File layout:
//!
//! 1. header — robot spec (max_radar_distance, contact_radius,
//!    receptive_angle, head x, head y, camera azimuth, lidar azimuth,
//!    max_pps, distance_per_pulse), supply decoder (2+2 f64), radar params
//!    (clean_interval, echo_persistence, contact_persistence, decay),
//!    marker_persistence, polar_sectors, grid_map_size, then the grid
//!    topology (center x, center y, width, height, grid_size)
//! 2. records — each a world model (simulation time; optional motion, proxy,
//!    contacts, camera, supply voltage; radar clean timestamp and per-cell
//!    `echo_time, echo_weight, contact_time`; markers sorted by label)
//!    followed by `bool` + optional robot commands
//!
//! Angles are stored as their two unit components (`sin`, `cos`) so decode →
//! re-encode reproduces the stream bit for bit; optional values are a `bool`
//! presence flag followed by the payload.

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};

use crate::geometry::{Complex, Point};
use crate::grid::GridTopology;
use crate::markers::LabelMarker;
use crate::messages::{
    CameraEvent, ContactsMessage, MotionMessage, MoveCommand, ProxyMessage, RobotCommands,
};
use crate::modeller::RadarParams;
use crate::radar::{MapCell, RadarMap};
use crate::status::{RobotSpec, RobotStatus, SupplyDecoder};
use crate::world::{WorldModel, WorldModelSpec};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Malformed(String),
}

// ── Writer ────────────────────────────────────────────────────────────────────

pub struct RecordWriter<W: Write> {
    writer: W,
    spec: WorldModelSpec,
}

impl<W: Write> RecordWriter<W> {
    /// Write the header and return the writer.
    pub fn create(
        mut writer: W,
        spec: &WorldModelSpec,
        decoder: &SupplyDecoder,
    ) -> Result<Self, CodecError> {
        let mut buf = BytesMut::new();
        put_robot_spec(&mut buf, &spec.robot_spec);
        put_f64(&mut buf, decoder.supply_values[0]);
        put_f64(&mut buf, decoder.supply_values[1]);
        put_f64(&mut buf, decoder.voltages[0]);
        put_f64(&mut buf, decoder.voltages[1]);
        buf.put_i64_le(spec.radar.clean_interval as i64);
        buf.put_i64_le(spec.radar.echo_persistence as i64);
        buf.put_i64_le(spec.radar.contact_persistence as i64);
        put_f64(&mut buf, spec.radar.decay);
        buf.put_i64_le(spec.marker_persistence as i64);
        buf.put_i32_le(spec.polar_sectors as i32);
        buf.put_i32_le(spec.grid_map_size as i32);
        put_topology(&mut buf, &spec.topology);
        writer.write_all(&buf)?;
        Ok(Self {
            writer,
            spec: spec.clone(),
        })
    }

    /// Append one record: a world model, optionally followed by the commands
    /// the inference returned for it.
    pub fn write_record(
        &mut self,
        model: &WorldModel,
        commands: Option<&RobotCommands>,
    ) -> Result<(), CodecError> {
        let mut buf = BytesMut::new();
        buf.put_i64_le(model.status.simulation_time as i64);

        put_option(&mut buf, &model.status.motion, put_motion);
        put_option(&mut buf, &model.status.proxy, put_proxy);
        put_option(&mut buf, &model.status.contacts, |b, c| put_contacts(b, c));
        put_option(&mut buf, &model.status.camera, put_camera);
        put_option(&mut buf, &model.status.supply_voltage, |b, v| {
            put_f64(b, *v)
        });

        buf.put_i64_le(model.radar_map.clean_timestamp() as i64);
        for cell in model.radar_map.cells() {
            buf.put_i64_le(cell.echo_time as i64);
            put_f64(&mut buf, cell.echo_weight);
            buf.put_i64_le(cell.contact_time as i64);
        }

        let mut labels: Vec<&String> = model.markers.keys().collect();
        labels.sort();
        buf.put_i32_le(labels.len() as i32);
        for label in labels {
            let m = &model.markers[label];
            put_string(&mut buf, &m.label);
            put_f64(&mut buf, m.location.x);
            put_f64(&mut buf, m.location.y);
            put_f64(&mut buf, m.weight);
            buf.put_i64_le(m.marker_time as i64);
            buf.put_i64_le(m.clean_time as i64);
        }

        match commands {
            Some(c) => {
                put_bool(&mut buf, true);
                put_commands(&mut buf, c);
            }
            None => put_bool(&mut buf, false),
        }

        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn spec(&self) -> &WorldModelSpec {
        &self.spec
    }

    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.writer.flush()?;
        Ok(())
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

pub struct RecordReader<R: Read> {
    reader: R,
    spec: WorldModelSpec,
    decoder: SupplyDecoder,
}

impl<R: Read> RecordReader<R> {
    /// Read the header and return the reader.
    pub fn open(mut reader: R) -> Result<Self, CodecError> {
        let robot_spec = read_robot_spec(&mut reader)?;
        let decoder = SupplyDecoder {
            supply_values: [read_f64(&mut reader)?, read_f64(&mut reader)?],
            voltages: [read_f64(&mut reader)?, read_f64(&mut reader)?],
        };
        let radar = RadarParams {
            clean_interval: read_i64(&mut reader)? as u64,
            echo_persistence: read_i64(&mut reader)? as u64,
            contact_persistence: read_i64(&mut reader)? as u64,
            decay: read_f64(&mut reader)?,
        };
        let marker_persistence = read_i64(&mut reader)? as u64;
        let polar_sectors = read_i32(&mut reader)? as usize;
        let grid_map_size = read_i32(&mut reader)? as u32;
        let topology = read_topology(&mut reader)?;
        Ok(Self {
            reader,
            spec: WorldModelSpec {
                robot_spec,
                topology,
                radar,
                marker_persistence,
                polar_sectors,
                grid_map_size,
            },
            decoder,
        })
    }

    pub fn spec(&self) -> &WorldModelSpec {
        &self.spec
    }

    pub fn supply_decoder(&self) -> &SupplyDecoder {
        &self.decoder
    }

    /// Next record, or `None` at a clean end of stream.
    pub fn read_record(
        &mut self,
    ) -> Result<Option<(WorldModel, Option<RobotCommands>)>, CodecError> {
        let simulation_time = match try_read_i64(&mut self.reader)? {
            Some(t) => t as u64,
            None => return Ok(None),
        };

        let motion = read_option(&mut self.reader, read_motion)?;
        let proxy = read_option(&mut self.reader, read_proxy)?;
        let contacts = read_option(&mut self.reader, read_contacts)?;
        let camera = read_option(&mut self.reader, read_camera)?;
        let supply_voltage = read_option(&mut self.reader, read_f64)?;

        let clean_timestamp = read_i64(&mut self.reader)? as u64;
        let mut cells: Vec<MapCell> = Vec::with_capacity(self.spec.topology.num_cells());
        for i in self.spec.topology.indices() {
            let mut cell = MapCell::unknown_at(self.spec.topology.location(i));
            cell.echo_time = read_i64(&mut self.reader)? as u64;
            cell.echo_weight = read_f64(&mut self.reader)?;
            cell.contact_time = read_i64(&mut self.reader)? as u64;
            cells.push(cell);
        }
        let map = RadarMap::from_cells(self.spec.topology.clone(), cells, clean_timestamp);

        let n_markers = read_i32(&mut self.reader)?;
        let mut markers = std::collections::HashMap::new();
        for _ in 0..n_markers {
            let label = read_string(&mut self.reader)?;
            let marker = LabelMarker {
                label: label.clone(),
                location: Point::new(read_f64(&mut self.reader)?, read_f64(&mut self.reader)?),
                weight: read_f64(&mut self.reader)?,
                marker_time: read_i64(&mut self.reader)? as u64,
                clean_time: read_i64(&mut self.reader)? as u64,
            };
            markers.insert(label, marker);
        }

        let commands = if read_bool(&mut self.reader)? {
            Some(read_commands(&mut self.reader)?)
        } else {
            None
        };

        let mut status = RobotStatus::new(self.spec.robot_spec.clone(), self.decoder);
        status.simulation_time = simulation_time;
        status.motion = motion;
        status.proxy = proxy;
        status.contacts = contacts;
        status.camera = camera;
        status.supply_voltage = supply_voltage;

        Ok(Some((
            WorldModel {
                spec: self.spec.clone(),
                status,
                radar_map: map,
                markers,
                polar_map: None,
                grid_map: None,
            },
            commands,
        )))
    }
}

// ── Field writers ─────────────────────────────────────────────────────────────

fn put_bool(buf: &mut BytesMut, v: bool) {
    buf.put_u8(v as u8);
}

fn put_f64(buf: &mut BytesMut, v: f64) {
    buf.put_i64_le(v.to_bits() as i64);
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32_le(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Angles go out as their raw unit components so round trips are bit-exact.
fn put_angle(buf: &mut BytesMut, a: &Complex) {
    put_f64(buf, a.x());
    put_f64(buf, a.y());
}

fn put_option<T, F: Fn(&mut BytesMut, &T)>(buf: &mut BytesMut, v: &Option<T>, put: F) {
    match v {
        Some(inner) => {
            put_bool(buf, true);
            put(buf, inner);
        }
        None => put_bool(buf, false),
    }
}

fn put_robot_spec(buf: &mut BytesMut, spec: &RobotSpec) {
    put_f64(buf, spec.max_radar_distance);
    put_f64(buf, spec.contact_radius);
    put_f64(buf, spec.receptive_angle);
    put_f64(buf, spec.head_location.x);
    put_f64(buf, spec.head_location.y);
    put_angle(buf, &spec.camera_azimuth);
    put_angle(buf, &spec.lidar_azimuth);
    buf.put_i32_le(spec.max_pps);
    put_f64(buf, spec.distance_per_pulse);
}

fn put_topology(buf: &mut BytesMut, t: &GridTopology) {
    put_f64(buf, t.center().x);
    put_f64(buf, t.center().y);
    buf.put_i32_le(t.width() as i32);
    buf.put_i32_le(t.height() as i32);
    put_f64(buf, t.grid_size());
}

fn put_motion(buf: &mut BytesMut, m: &MotionMessage) {
    buf.put_i64_le(m.sim_time as i64);
    put_f64(buf, m.x_pulses);
    put_f64(buf, m.y_pulses);
    put_angle(buf, &m.direction);
    put_f64(buf, m.left_pps);
    put_f64(buf, m.right_pps);
    buf.put_i32_le(m.imu_failure);
    put_bool(buf, m.halt);
    put_angle(buf, &m.move_direction);
    buf.put_i32_le(m.move_speed);
    buf.put_i32_le(m.left_target);
    buf.put_i32_le(m.right_target);
    buf.put_i32_le(m.left_power);
    buf.put_i32_le(m.right_power);
}

fn put_proxy(buf: &mut BytesMut, p: &ProxyMessage) {
    buf.put_i64_le(p.sim_time as i64);
    put_angle(buf, &p.sensor_direction);
    buf.put_i64_le(p.echo_delay as i64);
    put_f64(buf, p.x_pulses);
    put_f64(buf, p.y_pulses);
    put_angle(buf, &p.direction);
}

fn put_contacts(buf: &mut BytesMut, c: &ContactsMessage) {
    buf.put_i64_le(c.sim_time as i64);
    put_bool(buf, c.front_sensor);
    put_bool(buf, c.rear_sensor);
    put_bool(buf, c.can_move_forward);
    put_bool(buf, c.can_move_backward);
}

fn put_camera(buf: &mut BytesMut, c: &CameraEvent) {
    buf.put_i64_le(c.sim_time as i64);
    put_string(buf, &c.qr_code);
    buf.put_i32_le(c.width);
    buf.put_i32_le(c.height);
    let points = c.points.as_deref().unwrap_or(&[]);
    buf.put_i32_le(points.len() as i32);
    for p in points {
        put_f64(buf, p.x);
        put_f64(buf, p.y);
    }
}

fn put_commands(buf: &mut BytesMut, c: &RobotCommands) {
    match &c.move_command {
        Some(MoveCommand::Halt) => {
            put_bool(buf, true);
            put_bool(buf, true);
            put_angle(buf, &Complex::zero());
            buf.put_i32_le(0);
        }
        Some(MoveCommand::Move { direction, speed }) => {
            put_bool(buf, true);
            put_bool(buf, false);
            put_angle(buf, direction);
            buf.put_i32_le(*speed);
        }
        None => put_bool(buf, false),
    }
    match &c.scan_direction {
        Some(d) => {
            put_bool(buf, true);
            put_angle(buf, d);
        }
        None => put_bool(buf, false),
    }
}

// ── Field readers ─────────────────────────────────────────────────────────────

fn read_exact<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N], CodecError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_bool<R: Read>(r: &mut R) -> Result<bool, CodecError> {
    let [b] = read_exact::<R, 1>(r)?;
    match b {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CodecError::Malformed(format!("bad bool byte {other}"))),
    }
}

fn read_i32<R: Read>(r: &mut R) -> Result<i32, CodecError> {
    Ok(i32::from_le_bytes(read_exact::<R, 4>(r)?))
}

fn read_i64<R: Read>(r: &mut R) -> Result<i64, CodecError> {
    Ok(i64::from_le_bytes(read_exact::<R, 8>(r)?))
}

/// Like [`read_i64`], but a clean EOF before the first byte yields `None`.
fn try_read_i64<R: Read>(r: &mut R) -> Result<Option<i64>, CodecError> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < 8 {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(CodecError::Malformed("truncated record".into()));
        }
        filled += n;
    }
    Ok(Some(i64::from_le_bytes(buf)))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64, CodecError> {
    Ok(f64::from_bits(read_i64(r)? as u64))
}

fn read_string<R: Read>(r: &mut R) -> Result<String, CodecError> {
    let len = read_i32(r)?;
    if len < 0 {
        return Err(CodecError::Malformed(format!("negative string length {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| CodecError::Malformed(format!("bad utf-8: {e}")))
}

fn read_angle<R: Read>(r: &mut R) -> Result<Complex, CodecError> {
    let x = read_f64(r)?;
    let y = read_f64(r)?;
    Ok(Complex::from_unit(x, y))
}

fn read_option<R: Read, T, F: Fn(&mut R) -> Result<T, CodecError>>(
    r: &mut R,
    read: F,
) -> Result<Option<T>, CodecError> {
    if read_bool(r)? {
        Ok(Some(read(r)?))
    } else {
        Ok(None)
    }
}

fn read_robot_spec<R: Read>(r: &mut R) -> Result<RobotSpec, CodecError> {
    Ok(RobotSpec {
        max_radar_distance: read_f64(r)?,
        contact_radius: read_f64(r)?,
        receptive_angle: read_f64(r)?,
        head_location: Point::new(read_f64(r)?, read_f64(r)?),
        camera_azimuth: read_angle(r)?,
        lidar_azimuth: read_angle(r)?,
        max_pps: read_i32(r)?,
        distance_per_pulse: read_f64(r)?,
    })
}

fn read_topology<R: Read>(r: &mut R) -> Result<GridTopology, CodecError> {
    let center = Point::new(read_f64(r)?, read_f64(r)?);
    let width = read_i32(r)?;
    let height = read_i32(r)?;
    let grid_size = read_f64(r)?;
    if width <= 0 || height <= 0 || grid_size <= 0.0 {
        return Err(CodecError::Malformed(format!(
            "bad topology {width}x{height} g={grid_size}"
        )));
    }
    Ok(GridTopology::new(center, width as u32, height as u32, grid_size))
}

fn read_motion<R: Read>(r: &mut R) -> Result<MotionMessage, CodecError> {
    Ok(MotionMessage {
        sim_time: read_i64(r)? as u64,
        x_pulses: read_f64(r)?,
        y_pulses: read_f64(r)?,
        direction: read_angle(r)?,
        left_pps: read_f64(r)?,
        right_pps: read_f64(r)?,
        imu_failure: read_i32(r)?,
        halt: read_bool(r)?,
        move_direction: read_angle(r)?,
        move_speed: read_i32(r)?,
        left_target: read_i32(r)?,
        right_target: read_i32(r)?,
        left_power: read_i32(r)?,
        right_power: read_i32(r)?,
    })
}

fn read_proxy<R: Read>(r: &mut R) -> Result<ProxyMessage, CodecError> {
    Ok(ProxyMessage {
        sim_time: read_i64(r)? as u64,
        sensor_direction: read_angle(r)?,
        echo_delay: read_i64(r)? as u64,
        x_pulses: read_f64(r)?,
        y_pulses: read_f64(r)?,
        direction: read_angle(r)?,
    })
}

fn read_contacts<R: Read>(r: &mut R) -> Result<ContactsMessage, CodecError> {
    Ok(ContactsMessage {
        sim_time: read_i64(r)? as u64,
        front_sensor: read_bool(r)?,
        rear_sensor: read_bool(r)?,
        can_move_forward: read_bool(r)?,
        can_move_backward: read_bool(r)?,
    })
}

fn read_camera<R: Read>(r: &mut R) -> Result<CameraEvent, CodecError> {
    let sim_time = read_i64(r)? as u64;
    let qr_code = read_string(r)?;
    let width = read_i32(r)?;
    let height = read_i32(r)?;
    let n = read_i32(r)?;
    let points = if n > 0 {
        let mut pts = Vec::with_capacity(n as usize);
        for _ in 0..n {
            pts.push(Point::new(read_f64(r)?, read_f64(r)?));
        }
        Some(pts)
    } else {
        None
    };
    Ok(CameraEvent {
        sim_time,
        qr_code,
        width,
        height,
        points,
    })
}

fn read_commands<R: Read>(r: &mut R) -> Result<RobotCommands, CodecError> {
    let move_command = if read_bool(r)? {
        let is_halt = read_bool(r)?;
        let direction = read_angle(r)?;
        let speed = read_i32(r)?;
        Some(if is_halt {
            MoveCommand::Halt
        } else {
            MoveCommand::Move { direction, speed }
        })
    } else {
        None
    };
    let scan_direction = if read_bool(r)? {
        Some(read_angle(r)?)
    } else {
        None
    };
    Ok(RobotCommands {
        move_command,
        scan_direction,
    })
}

//! # wire
//!
//! Line-oriented ASCII codec to the microcontroller. One message per
//! `\n`-terminated line, fields space-separated; a parser rejects any line
//! whose field count does not match its schema exactly:
//!
//! ```text
//! mt <sim_ms> <x_pulses> <y_pulses> <yaw_deg> <left_pps> <right_pps>
//!    <imu_failure> <halt> <move_dir> <move_speed> <l_target> <r_target>
//!    <l_power> <r_power>
//! px <sim_ms> <sensor_dir_deg> <echo_delay_us> <x_pulses> <y_pulses> <yaw_deg>
//! ct <sim_ms> <front_sensor> <rear_sensor> <can_fwd> <can_back>
//! ca <sim_ms> <qr_code> <width_px> <height_px>
//! sv <sim_ms> <adc_value>
//! ck <t0> <t_recv> <t_send>
//! // <echoed command string>
//! ```
//!
//! Host → robot: `ha`, `mv <dir> <speed>`, `sc <dir>`, `ck <t0>` plus the
//! configured setup commands.

use wheelly_world::{
    CameraEvent, Complex, ContactsMessage, MotionMessage, ProxyMessage, SupplyMessage,
};

// ── Parse results ─────────────────────────────────────────────────────────────

/// Clock reply fields as they appear on the wire (remote clock domain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReply {
    pub originate: u64,
    pub receive: u64,
    pub transmit: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Motion(MotionMessage),
    Proxy(ProxyMessage),
    Contacts(ContactsMessage),
    Camera(CameraEvent),
    Supply(SupplyMessage),
    ClockReply(ClockReply),
    ConfigEcho(String),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("unknown message prefix: {0:?}")]
    UnknownPrefix(String),

    #[error("{prefix}: expected {expected} fields, got {actual}")]
    FieldCount {
        prefix: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{prefix}: bad field {field:?}")]
    BadField { prefix: &'static str, field: String },
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse one inbound line. Timestamps stay in the remote clock domain; the
/// driver converts them after clock sync.
pub fn parse_line(line: &str) -> Result<WireMessage, ParseError> {
    let line = line.trim_end();
    if let Some(echo) = line.strip_prefix("// ") {
        return Ok(WireMessage::ConfigEcho(echo.to_string()));
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.first().copied() {
        Some("mt") => parse_motion(&fields),
        Some("px") => parse_proxy(&fields),
        Some("ct") => parse_contacts(&fields),
        Some("ca") => parse_camera(&fields),
        Some("sv") => parse_supply(&fields),
        Some("ck") => parse_clock(&fields),
        _ => Err(ParseError::UnknownPrefix(
            fields.first().unwrap_or(&"").to_string(),
        )),
    }
}

fn expect_fields(
    prefix: &'static str,
    fields: &[&str],
    expected: usize,
) -> Result<(), ParseError> {
    if fields.len() != expected {
        Err(ParseError::FieldCount {
            prefix,
            expected,
            actual: fields.len(),
        })
    } else {
        Ok(())
    }
}

fn num<T: std::str::FromStr>(prefix: &'static str, field: &str) -> Result<T, ParseError> {
    field.parse().map_err(|_| ParseError::BadField {
        prefix,
        field: field.to_string(),
    })
}

fn flag(prefix: &'static str, field: &str) -> Result<bool, ParseError> {
    match field {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(ParseError::BadField {
            prefix,
            field: field.to_string(),
        }),
    }
}

fn parse_motion(f: &[&str]) -> Result<WireMessage, ParseError> {
    expect_fields("mt", f, 15)?;
    Ok(WireMessage::Motion(MotionMessage {
        sim_time: num("mt", f[1])?,
        x_pulses: num("mt", f[2])?,
        y_pulses: num("mt", f[3])?,
        direction: Complex::from_deg(num::<f64>("mt", f[4])?),
        left_pps: num("mt", f[5])?,
        right_pps: num("mt", f[6])?,
        imu_failure: num("mt", f[7])?,
        halt: flag("mt", f[8])?,
        move_direction: Complex::from_deg(num::<f64>("mt", f[9])?),
        move_speed: num("mt", f[10])?,
        left_target: num("mt", f[11])?,
        right_target: num("mt", f[12])?,
        left_power: num("mt", f[13])?,
        right_power: num("mt", f[14])?,
    }))
}

fn parse_proxy(f: &[&str]) -> Result<WireMessage, ParseError> {
    expect_fields("px", f, 7)?;
    Ok(WireMessage::Proxy(ProxyMessage {
        sim_time: num("px", f[1])?,
        sensor_direction: Complex::from_deg(num::<f64>("px", f[2])?),
        echo_delay: num("px", f[3])?,
        x_pulses: num("px", f[4])?,
        y_pulses: num("px", f[5])?,
        direction: Complex::from_deg(num::<f64>("px", f[6])?),
    }))
}

fn parse_contacts(f: &[&str]) -> Result<WireMessage, ParseError> {
    expect_fields("ct", f, 6)?;
    Ok(WireMessage::Contacts(ContactsMessage {
        sim_time: num("ct", f[1])?,
        front_sensor: flag("ct", f[2])?,
        rear_sensor: flag("ct", f[3])?,
        can_move_forward: flag("ct", f[4])?,
        can_move_backward: flag("ct", f[5])?,
    }))
}

fn parse_camera(f: &[&str]) -> Result<WireMessage, ParseError> {
    expect_fields("ca", f, 5)?;
    Ok(WireMessage::Camera(CameraEvent {
        sim_time: num("ca", f[1])?,
        qr_code: f[2].to_string(),
        width: num("ca", f[3])?,
        height: num("ca", f[4])?,
        points: None,
    }))
}

fn parse_supply(f: &[&str]) -> Result<WireMessage, ParseError> {
    expect_fields("sv", f, 3)?;
    Ok(WireMessage::Supply(SupplyMessage {
        sim_time: num("sv", f[1])?,
        supply_adc: num("sv", f[2])?,
    }))
}

fn parse_clock(f: &[&str]) -> Result<WireMessage, ParseError> {
    expect_fields("ck", f, 4)?;
    Ok(WireMessage::ClockReply(ClockReply {
        originate: num("ck", f[1])?,
        receive: num("ck", f[2])?,
        transmit: num("ck", f[3])?,
    }))
}

// ── Formatting ────────────────────────────────────────────────────────────────

pub fn format_halt() -> String {
    "ha".to_string()
}

pub fn format_move(direction: &Complex, speed: i32) -> String {
    format!("mv {} {}", direction.to_int_deg(), speed)
}

pub fn format_scan(direction: &Complex) -> String {
    format!("sc {}", direction.to_int_deg())
}

pub fn format_clock_sync(t0: u64) -> String {
    format!("ck {t0}")
}

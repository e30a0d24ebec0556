use crate::{
    error::{Pm5Error, Result},
    transport::Packet,
    types::{IntervalType, Pm5Characteristic, RowingState, StrokeState, WorkoutState, WorkoutType},
};
use bytes::Buf;
use serde::{Deserialize, Serialize};

/// Width of the general status record (0x0031)
pub const GENERAL_STATUS_SIZE: usize = 19;

/// Width of the additional status record (0x0032)
pub const ADDITIONAL_STATUS_SIZE: usize = 17;

/// Width of the additional status record inside a multiplexed envelope
pub const MULTIPLEXED_ADDITIONAL_STATUS_SIZE: usize = 18;

/// Width of the GAP preferred connection parameters record (0x2A04)
pub const CONNECTION_PARAMETERS_SIZE: usize = 8;

/// Width of the stroke data record (0x0035)
pub const STROKE_DATA_SIZE: usize = 20;

/// Width of the stroke data record inside a multiplexed envelope
///
/// The multiplexed form drops the trailing work-per-stroke field so that it
/// fits the 19 data bytes of an envelope.
pub const MULTIPLEXED_STROKE_DATA_SIZE: usize = 18;

/// Maximum number of data bytes carried by a multiplexed envelope
pub const MULTIPLEXED_MAX_DATA: usize = 19;

/// Heart rate value the PM5 reports when no belt is paired
pub const HEART_RATE_INVALID: u8 = 0xFF;

/// CSAFE command codes accepted by this crate
///
/// Codes from the Concept2 PM5 CSAFE command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CsafeCommand {
    /// Request the current workout type
    GetWorkoutType = 0x89,
    /// Request the current rowing state
    GetRowingState = 0x8D,
    /// Program a workout
    SetWorkout = 0x23,
}

impl CsafeCommand {
    /// Raw command code
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CsafeCommand {
    type Error = Pm5Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x89 => Ok(Self::GetWorkoutType),
            0x8D => Ok(Self::GetRowingState),
            0x23 => Ok(Self::SetWorkout),
            other => Err(Pm5Error::InvalidCommand(other)),
        }
    }
}

/// Check whether a byte is a supported CSAFE command code
#[must_use]
pub fn is_valid_csafe_command(code: u8) -> bool {
    CsafeCommand::try_from(code).is_ok()
}

fn ensure_len(record: &'static str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(Pm5Error::PayloadTooShort {
            record,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn get_u24_le(buf: &mut &[u8]) -> u32 {
    // get_uint_le(3) never exceeds 24 bits
    u32::try_from(buf.get_uint_le(3)).unwrap_or(u32::MAX)
}

/// Rowing general status (characteristic 0x0031, multiplex id 0x31)
///
/// Layout, little-endian:
/// - Bytes 0-2: Elapsed time (0.01 s)
/// - Bytes 3-5: Distance (0.1 m)
/// - Byte 6: Workout type
/// - Byte 7: Interval type
/// - Byte 8: Workout state
/// - Byte 9: Rowing state
/// - Byte 10: Stroke state
/// - Bytes 11-13: Total work distance (1 m)
/// - Bytes 14-16: Workout duration (0.01 s for time workouts, 1 m otherwise)
/// - Byte 17: Workout duration type
/// - Byte 18: Drag factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralStatus {
    /// Elapsed time in 0.01 s
    pub elapsed_time: u32,
    /// Distance in 0.1 m
    pub distance: u32,
    /// Workout type
    pub workout_type: WorkoutType,
    /// Interval type
    pub interval_type: IntervalType,
    /// Workout state
    pub workout_state: WorkoutState,
    /// Rowing state
    pub rowing_state: RowingState,
    /// Stroke state
    pub stroke_state: StrokeState,
    /// Total work distance in meters
    pub total_work_distance: u32,
    /// Workout duration, unit depends on `workout_duration_type`
    pub workout_duration: u32,
    /// Raw workout duration type
    pub workout_duration_type: u8,
    /// Drag factor
    pub drag_factor: u8,
}

impl GeneralStatus {
    /// Elapsed time in seconds
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        f64::from(self.elapsed_time) * 0.01
    }

    /// Distance in meters
    #[must_use]
    pub fn distance_meters(&self) -> f64 {
        f64::from(self.distance) * 0.1
    }
}

/// Decode a general status record
///
/// # Errors
///
/// Returns [`Pm5Error::PayloadTooShort`] if fewer than
/// [`GENERAL_STATUS_SIZE`] bytes are available.
pub fn decode_general_status(data: &[u8]) -> Result<GeneralStatus> {
    ensure_len("general status", data, GENERAL_STATUS_SIZE)?;

    let mut buf = data;
    Ok(GeneralStatus {
        elapsed_time: get_u24_le(&mut buf),
        distance: get_u24_le(&mut buf),
        workout_type: WorkoutType::from(buf.get_u8()),
        interval_type: IntervalType::from(buf.get_u8()),
        workout_state: WorkoutState::from(buf.get_u8()),
        rowing_state: RowingState::from(buf.get_u8()),
        stroke_state: StrokeState::from(buf.get_u8()),
        total_work_distance: get_u24_le(&mut buf),
        workout_duration: get_u24_le(&mut buf),
        workout_duration_type: buf.get_u8(),
        drag_factor: buf.get_u8(),
    })
}

/// Rowing additional status (characteristic 0x0032, multiplex id 0x32)
///
/// Layout, little-endian:
/// - Bytes 0-2: Elapsed time (0.01 s)
/// - Bytes 3-4: Speed (0.001 m/s)
/// - Byte 5: Stroke rate (spm)
/// - Byte 6: Heart rate (bpm, 255 invalid)
/// - Bytes 7-8: Current pace (0.01 s/500 m)
/// - Bytes 9-10: Average pace (0.01 s/500 m)
/// - Bytes 11-12: Rest distance (1 m)
/// - Bytes 13-15: Rest time (0.01 s)
/// - Byte 16: Erg machine type, characteristic form only
/// - Bytes 16-17: Average power (W), multiplexed form only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalStatus {
    /// Elapsed time in 0.01 s
    pub elapsed_time: u32,
    /// Speed in 0.001 m/s
    pub speed: u16,
    /// Stroke rate in strokes per minute
    pub stroke_rate: u8,
    /// Heart rate in bpm, [`HEART_RATE_INVALID`] when unavailable
    pub heart_rate: u8,
    /// Current pace in 0.01 s per 500 m
    pub current_pace: u16,
    /// Average pace in 0.01 s per 500 m
    pub average_pace: u16,
    /// Rest distance in meters
    pub rest_distance: u16,
    /// Rest time in 0.01 s
    pub rest_time: u32,
    /// Erg machine type, absent in the multiplexed form
    pub erg_machine_type: Option<u8>,
    /// Average power in watts, only present in the multiplexed form
    pub average_power: Option<u16>,
}

impl AdditionalStatus {
    /// Speed in meters per second
    #[must_use]
    pub fn speed_mps(&self) -> f64 {
        f64::from(self.speed) * 0.001
    }

    /// Heart rate, if a belt is reporting
    #[must_use]
    pub const fn heart_rate_bpm(&self) -> Option<u8> {
        if self.heart_rate == HEART_RATE_INVALID {
            None
        } else {
            Some(self.heart_rate)
        }
    }

    /// Current pace in seconds per 500 m
    #[must_use]
    pub fn current_pace_secs(&self) -> f64 {
        f64::from(self.current_pace) * 0.01
    }
}

/// Decode an additional status record
///
/// # Errors
///
/// Returns [`Pm5Error::PayloadTooShort`] if fewer than
/// [`ADDITIONAL_STATUS_SIZE`] bytes are available.
pub fn decode_additional_status(data: &[u8]) -> Result<AdditionalStatus> {
    ensure_len("additional status", data, ADDITIONAL_STATUS_SIZE)?;
    Ok(read_additional_status(data, false))
}

/// Decode the multiplexed form of an additional status record
///
/// # Errors
///
/// Returns [`Pm5Error::PayloadTooShort`] if fewer than
/// [`MULTIPLEXED_ADDITIONAL_STATUS_SIZE`] bytes are available.
pub fn decode_multiplexed_additional_status(data: &[u8]) -> Result<AdditionalStatus> {
    ensure_len(
        "multiplexed additional status",
        data,
        MULTIPLEXED_ADDITIONAL_STATUS_SIZE,
    )?;
    Ok(read_additional_status(data, true))
}

fn read_additional_status(data: &[u8], multiplexed: bool) -> AdditionalStatus {
    let mut buf = data;
    AdditionalStatus {
        elapsed_time: get_u24_le(&mut buf),
        speed: buf.get_u16_le(),
        stroke_rate: buf.get_u8(),
        heart_rate: buf.get_u8(),
        current_pace: buf.get_u16_le(),
        average_pace: buf.get_u16_le(),
        rest_distance: buf.get_u16_le(),
        rest_time: get_u24_le(&mut buf),
        erg_machine_type: (!multiplexed).then(|| buf.get_u8()),
        average_power: multiplexed.then(|| buf.get_u16_le()),
    }
}

/// Stroke data (characteristic 0x0035, multiplex id 0x35)
///
/// Layout, little-endian:
/// - Bytes 0-2: Elapsed time (0.01 s)
/// - Bytes 3-5: Distance (0.1 m)
/// - Byte 6: Drive length (0.01 m)
/// - Byte 7: Drive time (0.01 s)
/// - Bytes 8-9: Stroke recovery time (0.01 s)
/// - Bytes 10-11: Stroke distance (0.01 m)
/// - Bytes 12-13: Peak drive force (0.1 lbs)
/// - Bytes 14-15: Average drive force (0.1 lbs)
/// - Bytes 16-17: Work per stroke (0.1 J), absent in the multiplexed form
/// - Bytes 18-19: Stroke count (16 and 17 in the multiplexed form)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrokeData {
    /// Elapsed time in 0.01 s
    pub elapsed_time: u32,
    /// Distance in 0.1 m
    pub distance: u32,
    /// Drive length in 0.01 m
    pub drive_length: u8,
    /// Drive time in 0.01 s
    pub drive_time: u8,
    /// Recovery time in 0.01 s
    pub stroke_recovery_time: u16,
    /// Stroke distance in 0.01 m
    pub stroke_distance: u16,
    /// Peak drive force in 0.1 lbs
    pub peak_drive_force: u16,
    /// Average drive force in 0.1 lbs
    pub average_drive_force: u16,
    /// Work per stroke in 0.1 J
    pub work_per_stroke: Option<u16>,
    /// Total stroke count
    pub stroke_count: u16,
}

impl StrokeData {
    /// Elapsed time in seconds
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        f64::from(self.elapsed_time) * 0.01
    }

    /// Distance in meters
    #[must_use]
    pub fn distance_meters(&self) -> f64 {
        f64::from(self.distance) * 0.1
    }

    /// Drive length in meters
    #[must_use]
    pub fn drive_length_meters(&self) -> f64 {
        f64::from(self.drive_length) * 0.01
    }

    /// Drive time in seconds
    #[must_use]
    pub fn drive_time_secs(&self) -> f64 {
        f64::from(self.drive_time) * 0.01
    }

    /// Recovery time in seconds
    #[must_use]
    pub fn recovery_time_secs(&self) -> f64 {
        f64::from(self.stroke_recovery_time) * 0.01
    }

    /// Stroke distance in meters
    #[must_use]
    pub fn stroke_distance_meters(&self) -> f64 {
        f64::from(self.stroke_distance) * 0.01
    }

    /// Peak drive force in pounds
    #[must_use]
    pub fn peak_drive_force_lbs(&self) -> f64 {
        f64::from(self.peak_drive_force) * 0.1
    }

    /// Average drive force in pounds
    #[must_use]
    pub fn average_drive_force_lbs(&self) -> f64 {
        f64::from(self.average_drive_force) * 0.1
    }

    /// Work per stroke in joules
    #[must_use]
    pub fn work_per_stroke_joules(&self) -> Option<f64> {
        self.work_per_stroke.map(|work| f64::from(work) * 0.1)
    }
}

fn read_stroke_data(data: &[u8], with_work: bool) -> StrokeData {
    let mut buf = data;
    StrokeData {
        elapsed_time: get_u24_le(&mut buf),
        distance: get_u24_le(&mut buf),
        drive_length: buf.get_u8(),
        drive_time: buf.get_u8(),
        stroke_recovery_time: buf.get_u16_le(),
        stroke_distance: buf.get_u16_le(),
        peak_drive_force: buf.get_u16_le(),
        average_drive_force: buf.get_u16_le(),
        work_per_stroke: with_work.then(|| buf.get_u16_le()),
        stroke_count: buf.get_u16_le(),
    }
}

/// Decode a stroke data record
///
/// # Errors
///
/// Returns [`Pm5Error::PayloadTooShort`] if fewer than
/// [`STROKE_DATA_SIZE`] bytes are available.
pub fn decode_stroke_data(data: &[u8]) -> Result<StrokeData> {
    ensure_len("stroke data", data, STROKE_DATA_SIZE)?;
    Ok(read_stroke_data(data, true))
}

/// Decode the multiplexed form of a stroke data record
///
/// # Errors
///
/// Returns [`Pm5Error::PayloadTooShort`] if fewer than
/// [`MULTIPLEXED_STROKE_DATA_SIZE`] bytes are available.
pub fn decode_multiplexed_stroke_data(data: &[u8]) -> Result<StrokeData> {
    ensure_len("multiplexed stroke data", data, MULTIPLEXED_STROKE_DATA_SIZE)?;
    Ok(read_stroke_data(data, false))
}

/// Text value of a device information characteristic or the GAP device name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Characteristic the value was read from
    pub characteristic: Pm5Characteristic,
    /// Value with trailing NUL padding removed
    pub value: String,
}

/// Decode a text characteristic
///
/// # Errors
///
/// Returns [`Pm5Error::InvalidText`] if the value is not UTF-8.
pub fn decode_device_info(characteristic: Pm5Characteristic, data: &[u8]) -> Result<DeviceInfo> {
    let value = std::str::from_utf8(data).map_err(|source| Pm5Error::InvalidText {
        record: "device info",
        source,
    })?;

    Ok(DeviceInfo {
        characteristic,
        value: value.trim_end_matches('\0').to_string(),
    })
}

/// Peripheral preferred connection parameters (GAP characteristic 0x2A04)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    /// Minimum connection interval in 1.25 ms units
    pub min_interval: u16,
    /// Maximum connection interval in 1.25 ms units
    pub max_interval: u16,
    /// Slave latency in connection events
    pub slave_latency: u16,
    /// Supervision timeout in 10 ms units
    pub supervision_timeout: u16,
}

impl ConnectionParameters {
    /// Minimum connection interval in milliseconds
    #[must_use]
    pub fn min_interval_ms(&self) -> f64 {
        f64::from(self.min_interval) * 1.25
    }

    /// Maximum connection interval in milliseconds
    #[must_use]
    pub fn max_interval_ms(&self) -> f64 {
        f64::from(self.max_interval) * 1.25
    }

    /// Supervision timeout in milliseconds
    #[must_use]
    pub fn supervision_timeout_ms(&self) -> u32 {
        u32::from(self.supervision_timeout) * 10
    }
}

/// Decode the preferred connection parameters
///
/// # Errors
///
/// Returns [`Pm5Error::PayloadTooShort`] if fewer than
/// [`CONNECTION_PARAMETERS_SIZE`] bytes are available.
pub fn decode_connection_parameters(data: &[u8]) -> Result<ConnectionParameters> {
    ensure_len("connection parameters", data, CONNECTION_PARAMETERS_SIZE)?;

    let mut buf = data;
    Ok(ConnectionParameters {
        min_interval: buf.get_u16_le(),
        max_interval: buf.get_u16_le(),
        slave_latency: buf.get_u16_le(),
        supervision_timeout: buf.get_u16_le(),
    })
}

/// Which way a control frame travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlDirection {
    /// Written to the PM (characteristic 0x0021)
    Command,
    /// Sent by the PM (characteristic 0x0022)
    Response,
}

/// CSAFE frame contents carried by the PM control service
///
/// A command frame is the command byte followed by its data. A response
/// frame starts with the PM status byte, then the echoed command and its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    /// Direction of the frame
    pub direction: ControlDirection,
    /// PM status byte, responses only
    pub status: Option<u8>,
    /// CSAFE command
    pub command: CsafeCommand,
    /// Command data
    pub data: Vec<u8>,
}

/// Decode a control frame
///
/// # Errors
///
/// Returns [`Pm5Error::PayloadTooShort`] if the command byte is missing and
/// [`Pm5Error::InvalidCommand`] if it is not a supported CSAFE command.
pub fn decode_control_frame(direction: ControlDirection, data: &[u8]) -> Result<ControlFrame> {
    let (status, rest) = match direction {
        ControlDirection::Command => (None, data),
        ControlDirection::Response => {
            ensure_len("control response", data, 2)?;
            (Some(data[0]), &data[1..])
        }
    };

    let (&code, payload) = rest.split_first().ok_or(Pm5Error::PayloadTooShort {
        record: "control command",
        expected: 1,
        actual: 0,
    })?;

    Ok(ControlFrame {
        direction,
        status,
        command: CsafeCommand::try_from(code)?,
        data: payload.to_vec(),
    })
}

/// One notification from the multiplexed information characteristic (0x0080)
///
/// The data borrows from the notification buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexedData<'a> {
    /// Identifier selecting the record schema
    pub identifier: u8,
    /// Packed record bytes, at most [`MULTIPLEXED_MAX_DATA`]
    pub data: &'a [u8],
}

impl<'a> MultiplexedData<'a> {
    /// Split a notification into identifier and data
    ///
    /// # Errors
    ///
    /// Returns [`Pm5Error::MissingIdentifier`] for an empty notification and
    /// [`Pm5Error::EnvelopeTooLong`] if more than 19 data bytes follow.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let (&identifier, data) = bytes.split_first().ok_or(Pm5Error::MissingIdentifier)?;

        if data.len() > MULTIPLEXED_MAX_DATA {
            return Err(Pm5Error::EnvelopeTooLong { length: data.len() });
        }

        Ok(Self { identifier, data })
    }

    /// Decode the enclosed record according to the identifier
    ///
    /// # Errors
    ///
    /// Returns [`Pm5Error::PayloadTooShort`] if the data is narrower than
    /// the record the identifier selects.
    pub fn decode(&self) -> Result<Telemetry> {
        match self.identifier {
            0x31 => decode_general_status(self.data).map(Telemetry::GeneralStatus),
            0x32 => {
                decode_multiplexed_additional_status(self.data).map(Telemetry::AdditionalStatus)
            }
            0x35 => decode_multiplexed_stroke_data(self.data).map(Telemetry::StrokeData),
            identifier => Ok(Telemetry::Unrecognized {
                identifier,
                data: self.data.to_vec(),
            }),
        }
    }
}

/// A typed telemetry record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Telemetry {
    /// General status record
    GeneralStatus(GeneralStatus),
    /// Additional status record
    AdditionalStatus(AdditionalStatus),
    /// Stroke data record
    StrokeData(StrokeData),
    /// Device information or GAP device name text
    DeviceInfo(DeviceInfo),
    /// GAP preferred connection parameters
    ConnectionParameters(ConnectionParameters),
    /// CSAFE control frame
    ControlFrame(ControlFrame),
    /// Multiplexed record with an identifier this crate has no schema for
    Unrecognized {
        /// Multiplex identifier
        identifier: u8,
        /// Raw record bytes
        data: Vec<u8>,
    },
}

impl Telemetry {
    /// Decode a packet by its characteristic
    ///
    /// Returns `Ok(None)` for characteristics without a typed schema.
    ///
    /// # Errors
    ///
    /// Propagates the record decoder's error for malformed payloads.
    pub fn from_packet(packet: &Packet) -> Result<Option<Self>> {
        let telemetry = match Pm5Characteristic::parse(&packet.characteristic) {
            Pm5Characteristic::GeneralStatus => {
                Self::GeneralStatus(decode_general_status(&packet.data)?)
            }
            Pm5Characteristic::AdditionalStatus => {
                Self::AdditionalStatus(decode_additional_status(&packet.data)?)
            }
            Pm5Characteristic::StrokeData => Self::StrokeData(decode_stroke_data(&packet.data)?),
            Pm5Characteristic::Multiplexed => MultiplexedData::parse(&packet.data)?.decode()?,
            characteristic @ (Pm5Characteristic::DeviceName
            | Pm5Characteristic::ModelNumber
            | Pm5Characteristic::SerialNumber
            | Pm5Characteristic::HardwareRevision
            | Pm5Characteristic::FirmwareRevision
            | Pm5Characteristic::ManufacturerName) => {
                Self::DeviceInfo(decode_device_info(characteristic, &packet.data)?)
            }
            Pm5Characteristic::PreferredConnectionParameters => {
                Self::ConnectionParameters(decode_connection_parameters(&packet.data)?)
            }
            Pm5Characteristic::ControlReceive => Self::ControlFrame(decode_control_frame(
                ControlDirection::Command,
                &packet.data,
            )?),
            Pm5Characteristic::ControlTransmit => Self::ControlFrame(decode_control_frame(
                ControlDirection::Response,
                &packet.data,
            )?),
            _ => return Ok(None),
        };
        Ok(Some(telemetry))
    }
}

/// Decode a hex string into bytes
///
/// # Errors
///
/// Returns [`Pm5Error::InvalidHex`] for odd-length input or a non-hex digit,
/// naming the character offset.
pub fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    let digits = hex.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(Pm5Error::InvalidHex {
            offset: digits.len(),
            reason: format!("odd number of digits ({})", digits.len()),
        });
    }

    let nibble = |offset: usize| -> Result<u8> {
        let digit = char::from(digits[offset]);
        digit
            .to_digit(16)
            .and_then(|value| u8::try_from(value).ok())
            .ok_or_else(|| Pm5Error::InvalidHex {
                offset,
                reason: format!("invalid digit {digit:?}"),
            })
    };

    (0..digits.len())
        .step_by(2)
        .map(|offset| -> Result<u8> { Ok((nibble(offset)? << 4) | nibble(offset + 1)?) })
        .collect()
}

/// Render bytes as lowercase hex
#[must_use]
pub fn encode_hex(data: &[u8]) -> String {
    use std::fmt::Write as _;

    data.iter().fold(String::with_capacity(data.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

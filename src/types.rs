use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use uuid::Uuid;

use crate::{PM5_BASE_UUID, SIG_BASE_UUID};

/// Mask covering the 16-bit short identifier inside a 128-bit base UUID
const SHORT_ID_MASK: u128 = 0xFFFF << 96;

fn with_short_id(base: u128, short: u16) -> Uuid {
    Uuid::from_u128((base & !SHORT_ID_MASK) | (u128::from(short) << 96))
}

fn short_id_in(base: u128, uuid: Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & !SHORT_ID_MASK == base & !SHORT_ID_MASK {
        u16::try_from((value & SHORT_ID_MASK) >> 96).ok()
    } else {
        None
    }
}

/// GATT services exposed by the PM5
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pm5Service {
    /// Generic Access Profile service
    Gap = 0,
    /// Generic Attribute service
    Gatt = 1,
    /// Device information service
    DeviceInformation = 2,
    /// PM control service (CSAFE frames)
    Control = 3,
    /// Rowing telemetry service
    Rowing = 4,
    /// Tag outside the known set
    Unknown = 255,
}

impl Pm5Service {
    /// All known services, in tag order
    pub const ALL: [Self; 5] = [
        Self::Gap,
        Self::Gatt,
        Self::DeviceInformation,
        Self::Control,
        Self::Rowing,
    ];

    /// 16-bit UUID of the service, `None` for [`Pm5Service::Unknown`]
    #[must_use]
    pub const fn short_uuid(self) -> Option<u16> {
        match self {
            Self::Gap => Some(0x1800),
            Self::Gatt => Some(0x1801),
            Self::DeviceInformation => Some(0x0010),
            Self::Control => Some(0x0020),
            Self::Rowing => Some(0x0030),
            Self::Unknown => None,
        }
    }

    /// Full 128-bit UUID of the service
    ///
    /// GAP and GATT live on the Bluetooth SIG base UUID, everything else on the
    /// Concept2 base UUID.
    #[must_use]
    pub fn uuid(self) -> Option<Uuid> {
        let short = self.short_uuid()?;
        let base = match self {
            Self::Gap | Self::Gatt => SIG_BASE_UUID,
            _ => PM5_BASE_UUID,
        };
        Some(with_short_id(base, short))
    }
}

impl From<u8> for Pm5Service {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Gap,
            1 => Self::Gatt,
            2 => Self::DeviceInformation,
            3 => Self::Control,
            4 => Self::Rowing,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Pm5Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gap => write!(f, "GAP Service"),
            Self::Gatt => write!(f, "GATT Service"),
            Self::DeviceInformation => write!(f, "Device Information Service"),
            Self::Control => write!(f, "Control Service"),
            Self::Rowing => write!(f, "Rowing Service"),
            Self::Unknown => write!(f, "Unknown Service"),
        }
    }
}

/// GATT characteristics exposed by the PM5
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pm5Characteristic {
    /// GAP device name string (0x2A00)
    DeviceName,
    /// GAP peripheral preferred connection parameters (0x2A04)
    PreferredConnectionParameters,
    /// Model number string (0x0011)
    ModelNumber,
    /// Serial number string (0x0012)
    SerialNumber,
    /// Hardware revision string (0x0013)
    HardwareRevision,
    /// Firmware revision string (0x0014)
    FirmwareRevision,
    /// Manufacturer name string (0x0015)
    ManufacturerName,
    /// Erg machine type (0x0016)
    MachineType,
    /// CSAFE command frame written to the PM (0x0021)
    ControlReceive,
    /// CSAFE response frame from the PM (0x0022)
    ControlTransmit,
    /// Rowing general status (0x0031)
    GeneralStatus,
    /// Rowing additional status 1 (0x0032)
    AdditionalStatus,
    /// Rowing additional status 2 (0x0033)
    AdditionalStatus2,
    /// General status and additional status sample rate (0x0034)
    SampleRate,
    /// Stroke data (0x0035)
    StrokeData,
    /// Additional stroke data (0x0036)
    AdditionalStrokeData,
    /// Split/interval data (0x0037)
    SplitIntervalData,
    /// Additional split/interval data (0x0038)
    AdditionalSplitIntervalData,
    /// End of workout summary (0x0039)
    WorkoutSummary,
    /// Additional end of workout summary (0x003A)
    AdditionalWorkoutSummary,
    /// Heart rate belt information (0x003B)
    HeartRateBeltInfo,
    /// Force curve data (0x003D)
    ForceCurve,
    /// Multiplexed information (0x0080)
    Multiplexed,
    /// A well-formed identifier outside the known set
    Unknown(u16),
    /// An identifier string that could not be parsed at all
    Unparsed,
}

impl Pm5Characteristic {
    /// Map a 16-bit PM5 characteristic identifier
    #[must_use]
    pub const fn from_short_id(id: u16) -> Self {
        match id {
            0x2A00 => Self::DeviceName,
            0x2A04 => Self::PreferredConnectionParameters,
            0x0011 => Self::ModelNumber,
            0x0012 => Self::SerialNumber,
            0x0013 => Self::HardwareRevision,
            0x0014 => Self::FirmwareRevision,
            0x0015 => Self::ManufacturerName,
            0x0016 => Self::MachineType,
            0x0021 => Self::ControlReceive,
            0x0022 => Self::ControlTransmit,
            0x0031 => Self::GeneralStatus,
            0x0032 => Self::AdditionalStatus,
            0x0033 => Self::AdditionalStatus2,
            0x0034 => Self::SampleRate,
            0x0035 => Self::StrokeData,
            0x0036 => Self::AdditionalStrokeData,
            0x0037 => Self::SplitIntervalData,
            0x0038 => Self::AdditionalSplitIntervalData,
            0x0039 => Self::WorkoutSummary,
            0x003A => Self::AdditionalWorkoutSummary,
            0x003B => Self::HeartRateBeltInfo,
            0x003D => Self::ForceCurve,
            0x0080 => Self::Multiplexed,
            other => Self::Unknown(other),
        }
    }

    /// 16-bit identifier, `None` for [`Pm5Characteristic::Unparsed`]
    #[must_use]
    pub const fn short_id(self) -> Option<u16> {
        let id = match self {
            Self::DeviceName => 0x2A00,
            Self::PreferredConnectionParameters => 0x2A04,
            Self::ModelNumber => 0x0011,
            Self::SerialNumber => 0x0012,
            Self::HardwareRevision => 0x0013,
            Self::FirmwareRevision => 0x0014,
            Self::ManufacturerName => 0x0015,
            Self::MachineType => 0x0016,
            Self::ControlReceive => 0x0021,
            Self::ControlTransmit => 0x0022,
            Self::GeneralStatus => 0x0031,
            Self::AdditionalStatus => 0x0032,
            Self::AdditionalStatus2 => 0x0033,
            Self::SampleRate => 0x0034,
            Self::StrokeData => 0x0035,
            Self::AdditionalStrokeData => 0x0036,
            Self::SplitIntervalData => 0x0037,
            Self::AdditionalSplitIntervalData => 0x0038,
            Self::WorkoutSummary => 0x0039,
            Self::AdditionalWorkoutSummary => 0x003A,
            Self::HeartRateBeltInfo => 0x003B,
            Self::ForceCurve => 0x003D,
            Self::Multiplexed => 0x0080,
            Self::Unknown(id) => id,
            Self::Unparsed => return None,
        };
        Some(id)
    }

    /// Whether the characteristic belongs to the GAP service
    #[must_use]
    pub const fn is_gap(self) -> bool {
        matches!(self, Self::DeviceName | Self::PreferredConnectionParameters)
    }

    /// Full 128-bit UUID
    ///
    /// GAP characteristics live on the Bluetooth SIG base UUID, everything
    /// else on the Concept2 base UUID.
    #[must_use]
    pub fn uuid(self) -> Option<Uuid> {
        let base = if self.is_gap() {
            SIG_BASE_UUID
        } else {
            PM5_BASE_UUID
        };
        self.short_id().map(|id| with_short_id(base, id))
    }

    /// Resolve a full UUID
    ///
    /// `None` unless it is on the Concept2 base or names a GAP
    /// characteristic on the SIG base.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        if let Some(id) = short_id_in(PM5_BASE_UUID, uuid) {
            return Some(Self::from_short_id(id));
        }
        short_id_in(SIG_BASE_UUID, uuid)
            .map(Self::from_short_id)
            .filter(|characteristic| characteristic.is_gap())
    }

    /// Parse a packet identifier
    ///
    /// Accepts `"0x0031"`, `"0031"` and full UUID strings such as
    /// `"ce060031-43e5-11e4-916c-0800200c9a66"`. Anything else yields
    /// [`Pm5Characteristic::Unparsed`].
    #[must_use]
    pub fn parse(identifier: &str) -> Self {
        let trimmed = identifier.trim();
        let short = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if short.len() <= 4 {
            return u16::from_str_radix(short, 16).map_or(Self::Unparsed, Self::from_short_id);
        }

        match Uuid::parse_str(trimmed) {
            Ok(uuid) => Self::from_uuid(uuid).unwrap_or(Self::Unparsed),
            Err(_) => Self::Unparsed,
        }
    }
}

impl fmt::Display for Pm5Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.short_id() {
            Some(id) => write!(f, "{id:#06x}"),
            None => write!(f, "unparsed"),
        }
    }
}

/// Workout type reported in the general status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkoutType {
    /// Just row, no target
    JustRow = 0,
    /// Fixed distance piece
    FixedDistance = 1,
    /// Fixed time piece
    FixedTime = 2,
    /// Interval workout
    Interval = 3,
    /// Value outside the known set
    Unknown = 255,
}

impl From<u8> for WorkoutType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::JustRow,
            1 => Self::FixedDistance,
            2 => Self::FixedTime,
            3 => Self::Interval,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for WorkoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JustRow => write!(f, "Just Row"),
            Self::FixedDistance => write!(f, "Fixed Distance"),
            Self::FixedTime => write!(f, "Fixed Time"),
            Self::Interval => write!(f, "Interval"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Interval type reported in the general status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalType {
    /// Time interval
    Time = 0,
    /// Distance interval
    Distance = 1,
    /// Rest interval
    Rest = 2,
    /// Time interval with undefined rest
    TimeRestUndefined = 3,
    /// Distance interval with undefined rest
    DistanceRestUndefined = 4,
    /// Undefined rest
    RestUndefined = 5,
    /// Calorie interval
    Calorie = 6,
    /// Calorie interval with undefined rest
    CalorieRestUndefined = 7,
    /// Watt-minute interval
    WattMinute = 8,
    /// Watt-minute interval with undefined rest
    WattMinuteRestUndefined = 9,
    /// No interval
    None = 255,
    /// Value outside the known set
    Unknown = 254,
}

impl From<u8> for IntervalType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Time,
            1 => Self::Distance,
            2 => Self::Rest,
            3 => Self::TimeRestUndefined,
            4 => Self::DistanceRestUndefined,
            5 => Self::RestUndefined,
            6 => Self::Calorie,
            7 => Self::CalorieRestUndefined,
            8 => Self::WattMinute,
            9 => Self::WattMinuteRestUndefined,
            255 => Self::None,
            _ => Self::Unknown,
        }
    }
}

/// Workout state reported in the general status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkoutState {
    /// Waiting for the first stroke
    WaitToBegin = 0,
    /// Rowing a workout
    WorkoutRow = 1,
    /// Countdown pause
    CountdownPause = 2,
    /// Rest between intervals
    IntervalRest = 3,
    /// Timed work interval
    IntervalWorkTime = 4,
    /// Distance work interval
    IntervalWorkDistance = 5,
    /// Rest ending, time interval next
    IntervalRestEndToWorkTime = 6,
    /// Rest ending, distance interval next
    IntervalRestEndToWorkDistance = 7,
    /// Time interval ending, rest next
    IntervalWorkTimeToRest = 8,
    /// Distance interval ending, rest next
    IntervalWorkDistanceToRest = 9,
    /// Workout finished
    WorkoutEnd = 10,
    /// Workout terminated
    Terminate = 11,
    /// Workout logged
    WorkoutLogged = 12,
    /// Rearmed for a new workout
    Rearm = 13,
    /// Value outside the known set
    Unknown = 255,
}

impl From<u8> for WorkoutState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::WaitToBegin,
            1 => Self::WorkoutRow,
            2 => Self::CountdownPause,
            3 => Self::IntervalRest,
            4 => Self::IntervalWorkTime,
            5 => Self::IntervalWorkDistance,
            6 => Self::IntervalRestEndToWorkTime,
            7 => Self::IntervalRestEndToWorkDistance,
            8 => Self::IntervalWorkTimeToRest,
            9 => Self::IntervalWorkDistanceToRest,
            10 => Self::WorkoutEnd,
            11 => Self::Terminate,
            12 => Self::WorkoutLogged,
            13 => Self::Rearm,
            _ => Self::Unknown,
        }
    }
}

/// Rowing activity state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowingState {
    /// Not rowing
    Inactive = 0,
    /// Rowing
    Active = 1,
    /// Value outside the known set
    Unknown = 255,
}

impl From<u8> for RowingState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Inactive,
            1 => Self::Active,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for RowingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "Inactive"),
            Self::Active => write!(f, "Active"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Phase of the current stroke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrokeState {
    /// Waiting for the flywheel
    Waiting = 0,
    /// Drive phase
    Driving = 1,
    /// Recovery phase
    Recovery = 2,
    /// Value outside the known set
    Unknown = 255,
}

impl From<u8> for StrokeState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Waiting,
            1 => Self::Driving,
            2 => Self::Recovery,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for StrokeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting"),
            Self::Driving => write!(f, "Driving"),
            Self::Recovery => write!(f, "Recovery"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Connection parameters for the live transport
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Scan timeout in milliseconds
    pub scan_timeout_ms: u64,
    /// Advertised local name prefix identifying a PM5
    pub name_prefix: String,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            scan_timeout_ms: 10_000,
            name_prefix: "PM5".to_string(),
        }
    }
}

/// Streaming configuration shared by the pipeline and the transports
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Capacity of the bounded packet queue
    pub queue_capacity: usize,
    /// Pause between recorded packets in milliseconds
    ///
    /// Applied when [`crate::Source::from_config`] builds a recorded source.
    /// A [`crate::RecordedTransport`] built directly keeps its own interval,
    /// see [`crate::RecordedTransport::with_interval`]. Values below 1 ms are
    /// raised to 1 ms.
    pub replay_interval_ms: u64,
    /// Fail the run when a packet cannot be decoded into a typed record
    pub strict_decoding: bool,
}

impl StreamConfig {
    /// Replay cadence as a [`Duration`]
    #[must_use]
    pub const fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            replay_interval_ms: 1_000,
            strict_decoding: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuids() {
        assert_eq!(Pm5Service::from(0).short_uuid(), Some(0x1800));
        assert_eq!(Pm5Service::from(1).short_uuid(), Some(0x1801));
        assert_eq!(Pm5Service::from(2).short_uuid(), Some(0x0010));
        assert_eq!(Pm5Service::from(3).short_uuid(), Some(0x0020));
        assert_eq!(Pm5Service::from(4).short_uuid(), Some(0x0030));

        assert_eq!(
            Pm5Service::Rowing.uuid().map(|u| u.to_string()),
            Some("ce060030-43e5-11e4-916c-0800200c9a66".to_string())
        );
        assert_eq!(
            Pm5Service::Gap.uuid().map(|u| u.to_string()),
            Some("00001800-0000-1000-8000-00805f9b34fb".to_string())
        );
    }

    #[test]
    fn test_unknown_service_tag() {
        for tag in 5..=u8::MAX {
            let service = Pm5Service::from(tag);
            assert_eq!(service, Pm5Service::Unknown);
            assert_eq!(service.short_uuid(), None);
            assert_eq!(service.uuid(), None);
        }
        assert_eq!(Pm5Service::Unknown.to_string(), "Unknown Service");
        assert!(Pm5Service::ALL.iter().all(|s| s.uuid().is_some()));
    }

    #[test]
    fn test_characteristic_parsing() {
        assert_eq!(
            Pm5Characteristic::parse("0x0031"),
            Pm5Characteristic::GeneralStatus
        );
        assert_eq!(
            Pm5Characteristic::parse("0035"),
            Pm5Characteristic::StrokeData
        );
        assert_eq!(
            Pm5Characteristic::parse("ce060080-43e5-11e4-916c-0800200c9a66"),
            Pm5Characteristic::Multiplexed
        );
        assert_eq!(
            Pm5Characteristic::parse("CE060032-43E5-11E4-916C-0800200C9A66"),
            Pm5Characteristic::AdditionalStatus
        );
        assert_eq!(
            Pm5Characteristic::parse("0x00ff"),
            Pm5Characteristic::Unknown(0x00ff)
        );
        assert_eq!(
            Pm5Characteristic::parse("6e400003-b5a3-f393-e0a9-e50e24dcca9e"),
            Pm5Characteristic::Unparsed
        );
        assert_eq!(Pm5Characteristic::parse("rowing"), Pm5Characteristic::Unparsed);
        assert_eq!(Pm5Characteristic::parse(""), Pm5Characteristic::Unparsed);
    }

    #[test]
    fn test_characteristic_uuid_round_trip() {
        let uuid = Pm5Characteristic::StrokeData.uuid();
        assert_eq!(
            uuid.map(|u| u.to_string()),
            Some("ce060035-43e5-11e4-916c-0800200c9a66".to_string())
        );
        assert_eq!(
            uuid.and_then(Pm5Characteristic::from_uuid),
            Some(Pm5Characteristic::StrokeData)
        );
        assert_eq!(Pm5Characteristic::GeneralStatus.to_string(), "0x0031");
    }

    #[test]
    fn test_gap_characteristics_use_sig_base() {
        let uuid = Pm5Characteristic::PreferredConnectionParameters.uuid();
        assert_eq!(
            uuid.map(|u| u.to_string()),
            Some("00002a04-0000-1000-8000-00805f9b34fb".to_string())
        );
        assert_eq!(
            Pm5Characteristic::parse("00002a04-0000-1000-8000-00805f9b34fb"),
            Pm5Characteristic::PreferredConnectionParameters
        );
        assert_eq!(
            Pm5Characteristic::parse("0x2A00"),
            Pm5Characteristic::DeviceName
        );
        // Heart rate measurement is a SIG characteristic the PM5 does not expose
        assert_eq!(
            Pm5Characteristic::parse("00002a37-0000-1000-8000-00805f9b34fb"),
            Pm5Characteristic::Unparsed
        );
        assert!(Pm5Characteristic::DeviceName.is_gap());
        assert!(!Pm5Characteristic::ModelNumber.is_gap());
    }

    #[test]
    fn test_enum_from_u8() {
        assert_eq!(WorkoutType::from(2), WorkoutType::FixedTime);
        assert_eq!(WorkoutType::from(99), WorkoutType::Unknown);
        assert_eq!(IntervalType::from(255), IntervalType::None);
        assert_eq!(IntervalType::from(42), IntervalType::Unknown);
        assert_eq!(WorkoutState::from(13), WorkoutState::Rearm);
        assert_eq!(WorkoutState::from(14), WorkoutState::Unknown);
        assert_eq!(RowingState::from(1), RowingState::Active);
        assert_eq!(RowingState::from(7), RowingState::Unknown);
        assert_eq!(StrokeState::from(2), StrokeState::Recovery);
        assert_eq!(StrokeState::from(3), StrokeState::Unknown);
    }

    #[test]
    fn test_config_defaults() {
        let params = ConnectionParams::default();
        assert_eq!(params.timeout_ms, 30_000);
        assert_eq!(params.scan_timeout_ms, 10_000);
        assert_eq!(params.name_prefix, "PM5");

        let config = StreamConfig::default();
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.replay_interval(), Duration::from_secs(1));
        assert!(!config.strict_decoding);
    }
}

use thiserror::Error;

/// Errors that can occur while discovering, streaming or decoding PM5 telemetry
#[derive(Error, Debug)]
pub enum Pm5Error {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No PM5 was found during scanning
    #[error("PM5 device not found")]
    DeviceNotFound,

    /// Discovery or connection handshake failed
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Connection or scan timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The peripheral stopped delivering notifications mid-stream
    #[error("Device disconnected")]
    Disconnected,

    /// A transport was asked to stream before it discovered a device
    #[error("Transport not ready: {reason}")]
    NotReady {
        /// Reason why the transport is not ready
        reason: String,
    },

    /// A record was shorter than its fixed width
    #[error("{record} payload too short: {actual} bytes, expected {expected}")]
    PayloadTooShort {
        /// Name of the record being decoded
        record: &'static str,
        /// Required width in bytes
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// The multiplexed envelope had no identifier byte
    #[error("Multiplexed envelope is missing its identifier byte")]
    MissingIdentifier,

    /// The multiplexed envelope carried more than 19 data bytes
    #[error("Multiplexed envelope carries {length} data bytes, at most 19 allowed")]
    EnvelopeTooLong {
        /// Number of data bytes after the identifier
        length: usize,
    },

    /// A text characteristic was not valid UTF-8
    #[error("{record} is not valid UTF-8: {source}")]
    InvalidText {
        /// Name of the record being decoded
        record: &'static str,
        /// Underlying UTF-8 error
        #[source]
        source: std::str::Utf8Error,
    },

    /// A hex string could not be decoded
    #[error("Invalid hex at offset {offset}: {reason}")]
    InvalidHex {
        /// Character offset of the offending digit
        offset: usize,
        /// What was wrong
        reason: String,
    },

    /// A fixture entry could not be replayed
    #[error("Fixture entry {index} ({characteristic}): {source}")]
    Fixture {
        /// Position of the entry in the recording
        index: usize,
        /// Characteristic identifier of the entry
        characteristic: String,
        /// Underlying decode error
        #[source]
        source: Box<Pm5Error>,
    },

    /// A packet failed typed decoding in strict mode
    #[error("Failed to decode {characteristic} payload: {source}")]
    Packet {
        /// Characteristic identifier of the packet
        characteristic: String,
        /// Underlying decode error
        #[source]
        source: Box<Pm5Error>,
    },

    /// Byte is not a supported CSAFE command
    #[error("Invalid CSAFE command: {0:#04X}")]
    InvalidCommand(u8),

    /// The packet sink was closed by the consumer
    #[error("Packet sink closed")]
    SinkClosed,

    /// The streaming task panicked or was aborted
    #[error("Streaming task failed: {0}")]
    Task(String),

    /// Fixture JSON could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for PM5 operations
pub type Result<T> = std::result::Result<T, Pm5Error>;

impl Pm5Error {
    /// Check if this error happened while locating or talking to the device
    #[must_use]
    pub const fn is_discovery_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::DeviceNotFound
                | Self::DiscoveryFailed(_)
                | Self::Timeout { .. }
                | Self::Disconnected
        )
    }

    /// Check if this error indicates a structurally invalid payload or fixture
    #[must_use]
    pub const fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::PayloadTooShort { .. }
                | Self::MissingIdentifier
                | Self::EnvelopeTooLong { .. }
                | Self::InvalidText { .. }
                | Self::InvalidHex { .. }
                | Self::Fixture { .. }
                | Self::Packet { .. }
                | Self::Json(_)
        )
    }

    /// Check if the caller may reasonably retry by re-running discovery
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Disconnected | Self::DeviceNotFound
        )
    }
}

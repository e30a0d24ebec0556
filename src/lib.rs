#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # PM5 Telemetry
//!
//! Stream and decode telemetry from a Concept2 PM5 rowing monitor over
//! Bluetooth Low Energy.
//!
//! The crate is built around one contract, [`Transport`], with two
//! implementations:
//!
//! - [`LiveTransport`] connects to a PM5 through the host's Bluetooth adapter
//!   and forwards rowing notifications as they arrive
//! - [`RecordedTransport`] replays a captured session at a fixed cadence, for
//!   tests and demos without hardware
//!
//! A [`Pipeline`] runs exactly one transport, drains its packet queue in order
//! and turns each packet into a timestamped [`TelemetryEvent`], decoding the
//! PM5 rowing records ([`GeneralStatus`], [`AdditionalStatus`],
//! [`StrokeData`] and the multiplexed envelope) along the way. Device
//! information strings, the GAP preferred connection parameters and CSAFE
//! control frames are decoded as well.
//!
//! ## Protocol
//!
//! All PM5 services except GAP and GATT live on the Concept2 base UUID
//! `CE06xxxx-43E5-11E4-916C-0800200C9A66`. Rowing records are little-endian
//! with fixed widths and unit scales:
//!
//! | Field | Width | Unit |
//! |---|---|---|
//! | Elapsed time | 3 bytes | 0.01 s |
//! | Distance | 3 bytes | 0.1 m |
//! | Drive length | 1 byte | 0.01 m |
//! | Drive time | 1 byte | 0.01 s |
//! | Stroke recovery time | 2 bytes | 0.01 s |
//! | Peak/avg drive force | 2 bytes | 0.1 lbs |
//! | Stroke distance | 2 bytes | 0.01 m |
//! | Work per stroke | 2 bytes | 0.1 J |
//!
//! ## Quick Start
//!
//! ```no_run
//! use pm5_telemetry::{Pipeline, Source, SourceConfig, StreamConfig, ConnectionParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StreamConfig::default();
//!     let source = Source::from_config(SourceConfig::Live(ConnectionParams::default()), &config).await?;
//!     let pipeline = Pipeline::new(source, config);
//!
//!     pipeline
//!         .run(|event| println!("{:.3} {} {}", event.timestamp, event.characteristic, event.data))
//!         .await?;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy radio access
pub mod ble;
/// Error types and handling
pub mod error;
/// Streaming from a physical PM5
pub mod live;
/// Packet queue orchestration
pub mod pipeline;
/// PM5 record decoders and CSAFE command codes
pub mod protocol;
/// Replay of captured sessions
pub mod recorded;
/// Transport contract and cancellation
pub mod transport;
/// Identifiers, enumerations and configuration
pub mod types;

// Re-export the main types for convenient usage
pub use error::{Pm5Error, Result};
pub use live::LiveTransport;
pub use pipeline::{Pipeline, RunSummary, TelemetryEvent};
pub use protocol::{
    decode_general_status, decode_stroke_data, is_valid_csafe_command, AdditionalStatus,
    ControlDirection, ControlFrame, CsafeCommand, DeviceInfo, GeneralStatus, MultiplexedData,
    StrokeData, Telemetry,
};
pub use recorded::{parse_fixture, FixtureRecord, RecordedTransport};
pub use transport::{Packet, Source, SourceConfig, StopHandle, StopSignal, Transport};
pub use types::{
    ConnectionParams, IntervalType, Pm5Characteristic, Pm5Service, RowingState, StreamConfig,
    StrokeState, WorkoutState, WorkoutType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Concept2 PM5 base UUID, `CE06xxxx-43E5-11E4-916C-0800200C9A66`
///
/// The 16-bit service and characteristic identifiers are placed in bits
/// 96..112.
pub const PM5_BASE_UUID: u128 = 0xCE06_0000_43E5_11E4_916C_0800_200C_9A66;

/// Bluetooth SIG base UUID, used by the GAP and GATT services
pub const SIG_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

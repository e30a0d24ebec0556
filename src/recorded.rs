use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    error::{Pm5Error, Result},
    protocol::decode_hex,
    transport::{Packet, PacketSink, StopSignal, Transport},
};

/// Address reported by [`RecordedTransport::discover`]
pub const RECORDED_ADDRESS: &str = "MOCK-ADDRESS-01";

/// Default pause between replayed packets
pub const DEFAULT_REPLAY_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest pause between replayed packets, shorter intervals are raised to it
pub const MIN_REPLAY_INTERVAL: Duration = Duration::from_millis(1);

/// One captured characteristic value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureRecord {
    /// Characteristic identifier
    pub characteristic: String,
    /// Payload as a hex string
    pub data: String,
}

impl FixtureRecord {
    /// Create a new record
    pub fn new(characteristic: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            characteristic: characteristic.into(),
            data: data.into(),
        }
    }
}

/// Parse a JSON recording, an array of `{"characteristic", "data"}` objects
///
/// # Errors
///
/// Returns [`Pm5Error::Json`] if the document is not such an array.
pub fn parse_fixture(json: &str) -> Result<Vec<FixtureRecord>> {
    Ok(serde_json::from_str(json)?)
}

/// Transport replaying a fixed recording at a fixed cadence
#[derive(Debug, Clone)]
pub struct RecordedTransport {
    records: Vec<FixtureRecord>,
    interval: Duration,
}

impl RecordedTransport {
    /// Create a transport over an owned recording
    #[must_use]
    pub const fn new(records: Vec<FixtureRecord>) -> Self {
        Self {
            records,
            interval: DEFAULT_REPLAY_INTERVAL,
        }
    }

    /// Create a transport from a JSON recording
    ///
    /// # Errors
    ///
    /// Returns [`Pm5Error::Json`] for malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        parse_fixture(json).map(Self::new)
    }

    /// Create a transport from a JSON recording on disk
    ///
    /// # Errors
    ///
    /// Returns [`Pm5Error::Io`] if the file cannot be read, or
    /// [`Pm5Error::Json`] for malformed JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the pause between packets, at least [`MIN_REPLAY_INTERVAL`]
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_REPLAY_INTERVAL);
        self
    }
}

#[async_trait]
impl Transport for RecordedTransport {
    async fn discover(&mut self) -> Result<String> {
        info!("Using recorded PM5 session ({} records)", self.records.len());
        Ok(RECORDED_ADDRESS.to_string())
    }

    async fn stream(&mut self, sink: PacketSink, mut stop: StopSignal) -> Result<()> {
        info!("Replaying recorded session every {:?}", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for (index, record) in self.records.iter().enumerate() {
            tokio::select! {
                biased;
                () = stop.cancelled() => {
                    info!("Replay stopped after {index} packets");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let data = decode_hex(&record.data).map_err(|e| {
                warn!("Corrupt fixture entry {index} ({})", record.characteristic);
                Pm5Error::Fixture {
                    index,
                    characteristic: record.characteristic.clone(),
                    source: Box::new(e),
                }
            })?;

            let permit = tokio::select! {
                biased;
                () = stop.cancelled() => {
                    info!("Replay stopped after {index} packets");
                    return Ok(());
                }
                permit = sink.reserve() => permit.map_err(|_| Pm5Error::SinkClosed)?,
            };

            debug!("Replaying {} ({} bytes)", record.characteristic, data.len());
            permit.send(Packet::new(record.characteristic.clone(), data));
            // A full interval after each send, however long the sink stalled
            ticker.reset();
        }

        info!("Recorded session exhausted");
        Ok(())
    }
}

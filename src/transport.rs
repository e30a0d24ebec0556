use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::{
    ble::BtleplugLink,
    error::Result,
    live::LiveTransport,
    recorded::{FixtureRecord, RecordedTransport},
    types::{ConnectionParams, StreamConfig},
};

/// One characteristic value as produced by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Characteristic identifier, short form (`"0x0031"`) or full UUID
    pub characteristic: String,
    /// Raw payload
    pub data: Vec<u8>,
}

impl Packet {
    /// Create a new packet
    pub fn new(characteristic: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            characteristic: characteristic.into(),
            data,
        }
    }
}

/// Sending half of the packet queue, owned by exactly one transport
///
/// Dropping it closes the queue.
pub type PacketSink = mpsc::Sender<Packet>;

/// Create a stop handle and its first signal
#[must_use]
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Requests cancellation of a streaming run
///
/// Stopping latches: once set, every [`StopSignal`] observes it forever.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request a stop
    ///
    /// Returns `true` only for the call that actually set the flag.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|stopped| !std::mem::replace(stopped, true))
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// A new signal observing this handle
    #[must_use]
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes a [`StopHandle`]
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Non-blocking poll
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop is requested
    ///
    /// Never resolves if every handle is dropped without stopping.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A source of PM5 telemetry packets
///
/// A run calls [`Transport::discover`] once, then [`Transport::stream`] once.
#[async_trait]
pub trait Transport: Send {
    /// Locate and connect to the source, returning its address
    ///
    /// # Errors
    ///
    /// Returns a discovery error if the source is absent or unreachable.
    async fn discover(&mut self) -> Result<String>;

    /// Produce packets into `sink` until exhausted or stopped
    ///
    /// The sink is consumed, so it is closed on every return path. No packet
    /// is enqueued once `stop` has been observed.
    ///
    /// # Errors
    ///
    /// Returns decode or connection errors that end the run.
    async fn stream(&mut self, sink: PacketSink, stop: StopSignal) -> Result<()>;
}

/// Which transport a pipeline should run
#[derive(Debug, Clone)]
pub enum SourceConfig {
    /// Replay recorded characteristic values
    Recorded(Vec<FixtureRecord>),
    /// Connect to a PM5 over the host's Bluetooth adapter
    Live(ConnectionParams),
}

/// The transports this crate ships, selected by [`SourceConfig`]
pub enum Source {
    /// Recorded replay
    Recorded(RecordedTransport),
    /// Real device
    Live(LiveTransport<BtleplugLink>),
}

impl Source {
    /// Build the transport a configuration names
    ///
    /// # Errors
    ///
    /// Returns [`crate::Pm5Error::Ble`] if the Bluetooth manager cannot be
    /// created for a live source.
    pub async fn from_config(source: SourceConfig, stream: &StreamConfig) -> Result<Self> {
        match source {
            SourceConfig::Recorded(records) => Ok(Self::Recorded(
                RecordedTransport::new(records).with_interval(stream.replay_interval()),
            )),
            SourceConfig::Live(params) => {
                let link = BtleplugLink::new(params).await?;
                Ok(Self::Live(LiveTransport::new(link)))
            }
        }
    }
}

#[async_trait]
impl Transport for Source {
    async fn discover(&mut self) -> Result<String> {
        match self {
            Self::Recorded(transport) => transport.discover().await,
            Self::Live(transport) => transport.discover().await,
        }
    }

    async fn stream(&mut self, sink: PacketSink, stop: StopSignal) -> Result<()> {
        match self {
            Self::Recorded(transport) => transport.stream(sink, stop).await,
            Self::Live(transport) => transport.stream(sink, stop).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stop_is_idempotent() {
        let (handle, signal) = stop_channel();
        assert!(!signal.is_stopped());

        assert!(handle.stop());
        assert!(!handle.stop());

        assert!(handle.is_stopped());
        assert!(signal.is_stopped());
        assert!(handle.signal().is_stopped());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_stop() {
        let (handle, mut signal) = stop_channel();
        let waiter = tokio::spawn(async move { signal.cancelled().await });

        handle.clone().stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        let mut late = handle.signal();
        late.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_pends_when_handle_dropped() {
        let (handle, mut signal) = stop_channel();
        drop(handle);

        let result = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_recorded_source_from_config() {
        let records = vec![FixtureRecord::new("0x0031", "10203000")];
        let config = StreamConfig {
            replay_interval_ms: 1,
            ..StreamConfig::default()
        };
        let mut source = Source::from_config(SourceConfig::Recorded(records), &config)
            .await
            .unwrap();

        assert_eq!(source.discover().await.unwrap(), "MOCK-ADDRESS-01");

        let (tx, mut rx) = mpsc::channel(4);
        let (_handle, signal) = stop_channel();
        source.stream(tx, signal).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Packet::new("0x0031", vec![0x10, 0x20, 0x30, 0x00]))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_replay_interval_from_config() {
        let records = vec![
            FixtureRecord::new("0x0031", "10203000"),
            FixtureRecord::new("0x0031", "10203001"),
        ];
        let config = StreamConfig {
            replay_interval_ms: 0,
            ..StreamConfig::default()
        };
        let mut source = Source::from_config(SourceConfig::Recorded(records), &config)
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let (_handle, signal) = stop_channel();
        let task = tokio::spawn(async move { source.stream(tx, signal).await });

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_interval_from_config() {
        let records = vec![
            FixtureRecord::new("0x0031", "10203000"),
            FixtureRecord::new("0x0031", "10203001"),
        ];
        let config = StreamConfig {
            replay_interval_ms: 250,
            ..StreamConfig::default()
        };
        let mut source = Source::from_config(SourceConfig::Recorded(records), &config)
            .await
            .unwrap();
        let start = tokio::time::Instant::now();

        let (tx, mut rx) = mpsc::channel(4);
        let (_handle, signal) = stop_channel();
        let task = tokio::spawn(async move { source.stream(tx, signal).await });

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert_eq!(start.elapsed(), Duration::from_millis(250));
        task.await.unwrap().unwrap();
    }
}

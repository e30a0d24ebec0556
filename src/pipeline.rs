use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Pm5Error, Result},
    protocol::{encode_hex, Telemetry},
    transport::{stop_channel, Packet, StopHandle, StopSignal, Transport},
    types::StreamConfig,
};

/// A packet as observed by the consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Seconds since the Unix epoch at the moment the consumer saw the packet
    pub timestamp: f64,
    /// Characteristic identifier as produced by the transport
    pub characteristic: String,
    /// Payload as lowercase hex
    pub data: String,
    /// Typed record, when the characteristic has a schema and the payload fits it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Telemetry>,
}

impl TelemetryEvent {
    fn observe(packet: &Packet, telemetry: Option<Telemetry>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |elapsed| elapsed.as_secs_f64());

        Self {
            timestamp,
            characteristic: packet.characteristic.clone(),
            data: encode_hex(&packet.data),
            telemetry,
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Address returned by discovery
    pub device_address: String,
    /// Packets delivered to the consumer
    pub packets: usize,
    /// Packets that decoded into a typed record
    pub decoded: usize,
}

/// Runs one transport and feeds its packets to a consumer
///
/// # Examples
///
/// ```no_run
/// use pm5_telemetry::{Pipeline, RecordedTransport, StreamConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = RecordedTransport::from_path("session.json")?;
///     let pipeline = Pipeline::new(transport, StreamConfig::default());
///
///     let stop = pipeline.stop_handle();
///     tokio::spawn(async move {
///         let _ = tokio::signal::ctrl_c().await;
///         stop.stop();
///     });
///
///     let summary = pipeline
///         .run(|event| println!("{} {}", event.characteristic, event.data))
///         .await?;
///     println!("{} packets from {}", summary.packets, summary.device_address);
///     Ok(())
/// }
/// ```
pub struct Pipeline<T> {
    transport: T,
    config: StreamConfig,
    stop: StopHandle,
    signal: StopSignal,
}

impl<T: Transport + 'static> Pipeline<T> {
    /// Create a pipeline around a transport
    pub fn new(transport: T, config: StreamConfig) -> Self {
        let (stop, signal) = stop_channel();
        Self {
            transport,
            config,
            stop,
            signal,
        }
    }

    /// Handle through which the caller can stop the run
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Discover, stream and consume until the transport finishes
    ///
    /// Every packet the transport enqueued is handed to `on_event`, in order,
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns the discovery error if no source was found, the transport's
    /// error if the stream ended abnormally, or [`Pm5Error::Packet`] for a
    /// decode failure when [`StreamConfig::strict_decoding`] is set.
    pub async fn run<F>(self, mut on_event: F) -> Result<RunSummary>
    where
        F: FnMut(TelemetryEvent),
    {
        let Self {
            mut transport,
            config,
            stop,
            signal,
        } = self;

        let device_address = transport.discover().await?;
        info!("Streaming from {device_address}");

        let (tx, mut rx) = mpsc::channel(config.queue_capacity.max(1));
        let producer = tokio::spawn(async move { transport.stream(tx, signal).await });

        let mut packets = 0;
        let mut decoded = 0;
        let mut decode_failure = None;

        while let Some(packet) = rx.recv().await {
            let telemetry = match Telemetry::from_packet(&packet) {
                Ok(telemetry) => telemetry,
                Err(e) if config.strict_decoding => {
                    error!("Undecodable {} payload: {e}", packet.characteristic);
                    stop.stop();
                    if decode_failure.is_none() {
                        decode_failure = Some(Pm5Error::Packet {
                            characteristic: packet.characteristic.clone(),
                            source: Box::new(e),
                        });
                    }
                    None
                }
                Err(e) => {
                    warn!("Undecodable {} payload: {e}", packet.characteristic);
                    None
                }
            };

            packets += 1;
            if telemetry.is_some() {
                decoded += 1;
            }
            debug!("Delivering packet {packets} from {}", packet.characteristic);
            on_event(TelemetryEvent::observe(&packet, telemetry));
        }

        producer
            .await
            .map_err(|e| Pm5Error::Task(e.to_string()))?
            .inspect_err(|e| error!("Transport failed: {e}"))?;

        if let Some(e) = decode_failure {
            return Err(e);
        }

        info!("Stream complete: {packets} packets, {decoded} decoded");
        Ok(RunSummary {
            device_address,
            packets,
            decoded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorded::{parse_fixture, FixtureRecord, RecordedTransport};
    use crate::transport::PacketSink;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const FIXTURE: &str = include_str!("../fixtures/recorded_rowing_data.json");

    fn fast(records: Vec<FixtureRecord>) -> RecordedTransport {
        RecordedTransport::new(records).with_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_end_to_end_recorded_session() {
        let transport = fast(vec![
            FixtureRecord::new("0x0031", "10203000"),
            FixtureRecord::new("0x0031", "10203001"),
        ]);
        let pipeline = Pipeline::new(transport, StreamConfig::default());

        let mut events = Vec::new();
        let summary = assert_ok!(pipeline.run(|event| events.push(event)).await);

        assert_eq!(summary.device_address, "MOCK-ADDRESS-01");
        assert_eq!(summary.packets, 2);
        assert_eq!(summary.decoded, 0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].characteristic, "0x0031");
        assert_eq!(events[0].data, "10203000");
        assert_eq!(events[1].data, "10203001");
        assert!(events[0].telemetry.is_none());
        assert!(events[0].timestamp > 0.0);
        assert!(events[0].timestamp <= events[1].timestamp);
    }

    #[tokio::test]
    async fn test_fixture_decodes_typed_records() {
        let records = assert_ok!(parse_fixture(FIXTURE));
        let total = records.len();
        let pipeline = Pipeline::new(fast(records), StreamConfig::default());

        let mut events = Vec::new();
        let summary = assert_ok!(pipeline.run(|event| events.push(event)).await);

        assert_eq!(summary.packets, total);
        assert_eq!(summary.decoded, total);
        assert!(events
            .iter()
            .any(|e| matches!(e.telemetry, Some(Telemetry::StrokeData(_)))));
        assert!(events
            .iter()
            .any(|e| matches!(e.telemetry, Some(Telemetry::GeneralStatus(_)))));
        assert!(events.iter().any(|e| matches!(
            &e.telemetry,
            Some(Telemetry::DeviceInfo(info)) if info.value == "PM5"
        )));
    }

    #[tokio::test]
    async fn test_strict_decoding_fails_run() {
        let transport = fast(vec![FixtureRecord::new("0x0031", "10203000")]);
        let config = StreamConfig {
            strict_decoding: true,
            ..StreamConfig::default()
        };
        let pipeline = Pipeline::new(transport, config);

        let mut delivered = 0;
        let err = assert_err!(pipeline.run(|_| delivered += 1).await);

        assert_eq!(delivered, 1);
        assert!(err.is_decode_error());
        assert!(err.to_string().contains("0x0031"));
    }

    #[tokio::test]
    async fn test_transport_error_surfaces_after_drain() {
        let transport = fast(vec![
            FixtureRecord::new("0x0031", "10203000"),
            FixtureRecord::new("0x0031", "not-hex"),
        ]);
        let pipeline = Pipeline::new(transport, StreamConfig::default());

        let mut events = Vec::new();
        let err = assert_err!(pipeline.run(|event| events.push(event)).await);

        assert_eq!(events.len(), 1);
        assert!(matches!(err, Pm5Error::Fixture { index: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_handle_ends_run() {
        let records: Vec<_> = (0..100)
            .map(|_| FixtureRecord::new("0x0031", "10203000"))
            .collect();
        let pipeline = Pipeline::new(RecordedTransport::new(records), StreamConfig::default());
        let stop = pipeline.stop_handle();

        let mut delivered = 0;
        let summary = assert_ok!(
            pipeline
                .run(|_| {
                    delivered += 1;
                    if delivered == 3 {
                        stop.stop();
                    }
                })
                .await
        );

        assert_eq!(summary.packets, 3);
        assert_eq!(delivered, 3);
    }

    struct Absent;

    #[async_trait]
    impl Transport for Absent {
        async fn discover(&mut self) -> Result<String> {
            Err(Pm5Error::DeviceNotFound)
        }

        async fn stream(&mut self, _sink: PacketSink, _stop: StopSignal) -> Result<()> {
            panic!("stream must not run after failed discovery");
        }
    }

    #[tokio::test]
    async fn test_discovery_failure_skips_stream() {
        let pipeline = Pipeline::new(Absent, StreamConfig::default());
        let err = assert_err!(pipeline.run(|_| panic!("no events expected")).await);
        assert!(matches!(err, Pm5Error::DeviceNotFound));
    }

    #[test]
    fn test_event_serialization() {
        let packet = Packet::new("0x0031", vec![0x10, 0x20, 0x30, 0x01]);
        let event = TelemetryEvent::observe(&packet, None);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["characteristic"], "0x0031");
        assert_eq!(json["data"], "10203001");
        assert!(json.get("telemetry").is_none());
        assert!(json["timestamp"].is_f64());
    }
}

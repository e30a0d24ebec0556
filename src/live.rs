use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    ble::{BleLink, BtleplugLink},
    error::{Pm5Error, Result},
    transport::{Packet, PacketSink, StopSignal, Transport},
    types::Pm5Characteristic,
};

/// Characteristics subscribed to unless configured otherwise
pub const DEFAULT_CHARACTERISTICS: [Pm5Characteristic; 2] = [
    Pm5Characteristic::GeneralStatus,
    Pm5Characteristic::StrokeData,
];

/// Transport forwarding notifications from a connected PM5
pub struct LiveTransport<L = BtleplugLink> {
    link: L,
    characteristics: Vec<Pm5Characteristic>,
    address: Option<String>,
}

impl<L: BleLink> LiveTransport<L> {
    /// Create a transport over a radio link
    pub fn new(link: L) -> Self {
        Self {
            link,
            characteristics: DEFAULT_CHARACTERISTICS.to_vec(),
            address: None,
        }
    }

    /// Subscribe to these characteristics instead of the defaults
    #[must_use]
    pub fn with_characteristics(mut self, characteristics: Vec<Pm5Characteristic>) -> Self {
        self.characteristics = characteristics;
        self
    }

    /// Address returned by the last successful discovery
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    async fn forward(&mut self, sink: &PacketSink, stop: &mut StopSignal) -> Result<()> {
        let uuids: Vec<Uuid> = self
            .characteristics
            .iter()
            .filter_map(|c| c.uuid())
            .collect();
        let mut notifications = self.link.subscribe(&uuids).await?;
        info!("Streaming {} characteristic(s) from PM5", uuids.len());

        loop {
            let notification = tokio::select! {
                biased;
                () = stop.cancelled() => {
                    info!("Live stream stopped");
                    return Ok(());
                }
                next = notifications.next() => next.ok_or(Pm5Error::Disconnected)?,
            };

            let permit = tokio::select! {
                biased;
                () = stop.cancelled() => {
                    info!("Live stream stopped");
                    return Ok(());
                }
                permit = sink.reserve() => permit.map_err(|_| Pm5Error::SinkClosed)?,
            };

            debug!(
                "Notification from {} ({} bytes)",
                notification.uuid,
                notification.value.len()
            );
            permit.send(Packet::new(notification.uuid.to_string(), notification.value));
        }
    }
}

#[async_trait]
impl<L: BleLink> Transport for LiveTransport<L> {
    async fn discover(&mut self) -> Result<String> {
        let address = self.link.connect().await.inspect_err(|e| {
            error!("PM5 discovery failed: {e}");
        })?;
        self.address = Some(address.clone());
        Ok(address)
    }

    async fn stream(&mut self, sink: PacketSink, mut stop: StopSignal) -> Result<()> {
        if self.address.is_none() {
            return Err(Pm5Error::NotReady {
                reason: "stream requested before discovery".to_string(),
            });
        }

        let result = self.forward(&sink, &mut stop).await;
        drop(sink);

        if let Err(e) = &result {
            warn!("Live stream ended: {e}");
        }
        if let Err(e) = self.link.disconnect().await {
            warn!("Disconnect after stream failed: {e}");
        }
        self.address = None;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ble::Notification, transport::stop_channel};
    use futures::stream;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    /// Link that serves a scripted notification sequence
    struct ScriptedLink {
        present: bool,
        notifications: Vec<Notification>,
        end_after_script: bool,
        subscribed: Vec<Uuid>,
        disconnected: Arc<AtomicBool>,
    }

    impl ScriptedLink {
        fn new(notifications: Vec<Notification>) -> Self {
            Self {
                present: true,
                notifications,
                end_after_script: true,
                subscribed: Vec::new(),
                disconnected: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl BleLink for ScriptedLink {
        async fn connect(&mut self) -> Result<String> {
            if self.present {
                Ok("C4:12:AB:00:00:01".to_string())
            } else {
                Err(Pm5Error::DeviceNotFound)
            }
        }

        async fn subscribe(
            &mut self,
            characteristics: &[Uuid],
        ) -> Result<crate::ble::NotificationStream> {
            self.subscribed = characteristics.to_vec();
            let scripted = stream::iter(std::mem::take(&mut self.notifications));
            if self.end_after_script {
                Ok(scripted.boxed())
            } else {
                Ok(scripted.chain(stream::pending::<Notification>()).boxed())
            }
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.disconnected.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn general_status(value: Vec<u8>) -> Notification {
        Notification {
            uuid: Pm5Characteristic::GeneralStatus.uuid().unwrap(),
            value,
        }
    }

    #[tokio::test]
    async fn test_discover_reports_address() {
        let mut transport = LiveTransport::new(ScriptedLink::new(Vec::new()));
        assert_eq!(assert_ok!(transport.discover().await), "C4:12:AB:00:00:01");
        assert_eq!(transport.address(), Some("C4:12:AB:00:00:01"));
    }

    #[tokio::test]
    async fn test_discover_failure_propagates() {
        let mut link = ScriptedLink::new(Vec::new());
        link.present = false;
        let mut transport = LiveTransport::new(link);

        let err = assert_err!(transport.discover().await);
        assert!(err.is_discovery_error());
        assert_eq!(transport.address(), None);
    }

    #[tokio::test]
    async fn test_stream_requires_discovery() {
        let mut transport = LiveTransport::new(ScriptedLink::new(Vec::new()));
        let (tx, mut rx) = mpsc::channel(4);
        let (_handle, signal) = stop_channel();

        let err = assert_err!(transport.stream(tx, signal).await);
        assert!(matches!(err, Pm5Error::NotReady { .. }));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connection_loss_is_fatal() {
        let link = ScriptedLink::new(vec![
            general_status(vec![0x10, 0x20, 0x30, 0x00]),
            general_status(vec![0x10, 0x20, 0x30, 0x01]),
        ]);
        let disconnected = Arc::clone(&link.disconnected);
        let mut transport = LiveTransport::new(link);
        assert_ok!(transport.discover().await);

        let (tx, mut rx) = mpsc::channel(4);
        let (_handle, signal) = stop_channel();
        let err = assert_err!(transport.stream(tx, signal).await);
        assert!(matches!(err, Pm5Error::Disconnected));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.characteristic, "ce060031-43e5-11e4-916c-0800200c9a66");
        assert_eq!(first.data, vec![0x10, 0x20, 0x30, 0x00]);
        assert_eq!(rx.recv().await.unwrap().data, vec![0x10, 0x20, 0x30, 0x01]);
        assert!(rx.recv().await.is_none());
        assert!(disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_ends_stream_cleanly() {
        let mut link = ScriptedLink::new(vec![general_status(vec![0x01])]);
        link.end_after_script = false;
        let disconnected = Arc::clone(&link.disconnected);
        let mut transport = LiveTransport::new(link);
        assert_ok!(transport.discover().await);

        let (tx, mut rx) = mpsc::channel(4);
        let (handle, signal) = stop_channel();
        let task = tokio::spawn(async move { transport.stream(tx, signal).await });

        assert_eq!(rx.recv().await.map(|p| p.data), Some(vec![0x01]));
        handle.stop();
        handle.stop();

        assert!(rx.recv().await.is_none());
        assert_ok!(assert_ok!(task.await));
        assert!(disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_subscribes_to_configured_characteristics() {
        let mut transport = LiveTransport::new(ScriptedLink::new(Vec::new()))
            .with_characteristics(vec![Pm5Characteristic::Multiplexed]);
        assert_ok!(transport.discover().await);

        let (tx, _rx) = mpsc::channel(4);
        let (_handle, signal) = stop_channel();
        assert_err!(transport.stream(tx, signal).await);

        assert_eq!(
            transport.link.subscribed,
            vec![Pm5Characteristic::Multiplexed.uuid().unwrap()]
        );
    }
}

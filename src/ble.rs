use async_trait::async_trait;
use btleplug::{
    api::{Central, Manager as _, Peripheral as _, ScanFilter},
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::{BoxStream, StreamExt};
use std::{future::Future, time::Duration};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{Pm5Error, Result},
    types::{ConnectionParams, Pm5Service},
};

/// A characteristic value notified by the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Characteristic UUID
    pub uuid: Uuid,
    /// Notified value
    pub value: Vec<u8>,
}

/// Stream of notifications from a connected peripheral
///
/// The stream ending means the connection was lost.
pub type NotificationStream = BoxStream<'static, Notification>;

/// Radio-level primitives the live transport needs
#[async_trait]
pub trait BleLink: Send {
    /// Find and connect to a PM5, returning its address
    ///
    /// # Errors
    ///
    /// Returns a discovery error if no device is reachable.
    async fn connect(&mut self) -> Result<String>;

    /// Subscribe to the given characteristics
    ///
    /// # Errors
    ///
    /// Returns [`Pm5Error::NotReady`] before [`BleLink::connect`], or a BLE
    /// error if a characteristic is missing or cannot be subscribed.
    async fn subscribe(&mut self, characteristics: &[Uuid]) -> Result<NotificationStream>;

    /// Disconnect from the peripheral
    ///
    /// # Errors
    ///
    /// Returns [`Pm5Error::Ble`] if disconnection fails.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Run `release` if `result` failed, then hand `result` back
///
/// A failed release is logged and does not replace the original error.
async fn release_on_error<T, F>(result: Result<T>, release: F) -> Result<T>
where
    F: Future<Output = std::result::Result<(), btleplug::Error>>,
{
    if result.is_err() {
        debug!("Releasing peripheral after failed connect");
        if let Err(e) = release.await {
            warn!("Failed to release peripheral: {e}");
        }
    }
    result
}

/// [`BleLink`] backed by btleplug and the host's first Bluetooth adapter
pub struct BtleplugLink {
    manager: Manager,
    params: ConnectionParams,
    peripheral: Option<Peripheral>,
}

impl BtleplugLink {
    /// Create a link
    ///
    /// # Errors
    ///
    /// Returns [`Pm5Error::Ble`] if the Bluetooth manager cannot be initialized.
    pub async fn new(params: ConnectionParams) -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            params,
            peripheral: None,
        })
    }

    async fn first_adapter(&self) -> Result<Adapter> {
        self.manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Pm5Error::DiscoveryFailed("no Bluetooth adapter available".to_string()))
    }

    /// Scan for a peripheral advertising the configured name prefix
    async fn scan(&self, central: &Adapter) -> Result<Peripheral> {
        info!("Starting scan for PM5 devices...");

        let rowing_service = Pm5Service::Rowing
            .uuid()
            .ok_or_else(|| Pm5Error::DiscoveryFailed("rowing service has no UUID".to_string()))?;

        // Matched on local name or advertised service below
        central.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_millis(self.params.scan_timeout_ms)).await;
        central.stop_scan().await?;

        for peripheral in central.peripherals().await? {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };

            let name_matches = properties
                .local_name
                .as_deref()
                .is_some_and(|name| name.starts_with(&self.params.name_prefix));

            if name_matches || properties.services.contains(&rowing_service) {
                info!(
                    "Found PM5: {} ({})",
                    properties.local_name.as_deref().unwrap_or("unnamed"),
                    properties.address
                );
                return Ok(peripheral);
            }
        }

        Err(Pm5Error::DeviceNotFound)
    }
}

#[async_trait]
impl BleLink for BtleplugLink {
    async fn connect(&mut self) -> Result<String> {
        let central = self.first_adapter().await?;
        let peripheral = self.scan(&central).await?;

        let connected =
            match timeout(Duration::from_millis(self.params.timeout_ms), peripheral.connect()).await {
                Ok(result) => result.map_err(|e| Pm5Error::DiscoveryFailed(e.to_string())),
                Err(_) => Err(Pm5Error::Timeout {
                    timeout_ms: self.params.timeout_ms,
                }),
            };
        release_on_error(connected, peripheral.disconnect()).await?;

        let discovered = peripheral.discover_services().await.map_err(Pm5Error::from);
        release_on_error(discovered, peripheral.disconnect()).await?;

        let address = peripheral.address().to_string();
        info!("Connected to PM5 at {address}");
        self.peripheral = Some(peripheral);
        Ok(address)
    }

    async fn subscribe(&mut self, characteristics: &[Uuid]) -> Result<NotificationStream> {
        let peripheral = self.peripheral.as_ref().ok_or_else(|| Pm5Error::NotReady {
            reason: "not connected".to_string(),
        })?;

        let available = peripheral.characteristics();
        for uuid in characteristics {
            let characteristic = available
                .iter()
                .find(|c| c.uuid == *uuid)
                .ok_or_else(|| Pm5Error::DiscoveryFailed(format!("characteristic {uuid} not found")))?;

            peripheral.subscribe(characteristic).await?;
            debug!("Subscribed to characteristic: {uuid}");
        }

        let stream = peripheral.notifications().await?;
        Ok(stream
            .map(|data| Notification {
                uuid: data.uuid,
                value: data.value,
            })
            .boxed())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Failed to disconnect cleanly: {e}");
                return Err(e.into());
            }
            info!("Disconnected from PM5");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_failed_connect_releases_peripheral() {
        let released = AtomicBool::new(false);
        let release = async {
            released.store(true, Ordering::SeqCst);
            Ok::<(), btleplug::Error>(())
        };

        let err = assert_err!(
            release_on_error::<(), _>(Err(Pm5Error::Timeout { timeout_ms: 10 }), release).await
        );
        assert!(matches!(err, Pm5Error::Timeout { timeout_ms: 10 }));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_release_failure_keeps_original_error() {
        let release = async { Err::<(), _>(btleplug::Error::NotConnected) };

        let err = assert_err!(
            release_on_error::<(), _>(Err(Pm5Error::DiscoveryFailed("gatt".into())), release)
                .await
        );
        assert!(matches!(err, Pm5Error::DiscoveryFailed(_)));
    }

    #[tokio::test]
    async fn test_connected_peripheral_is_kept() {
        let released = AtomicBool::new(false);
        let release = async {
            released.store(true, Ordering::SeqCst);
            Ok::<(), btleplug::Error>(())
        };

        assert_eq!(assert_ok!(release_on_error(Ok(7), release).await), 7);
        assert!(!released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_rowing_uuids() {
        let rowing = Pm5Service::Rowing.uuid();
        assert!(rowing.is_some());
        assert_eq!(
            Uuid::parse_str("ce060030-43e5-11e4-916c-0800200c9a66").ok(),
            rowing
        );
    }
}

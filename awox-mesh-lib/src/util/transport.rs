//! GATT transport to a single light, and the btleplug backed implementation.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::error::{AwoxError, AwoxResult};

/// How long to look for a light before giving up on a connection attempt.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A value pushed by the light on a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// A connected GATT peripheral.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// MAC address of the peripheral, `AA:BB:CC:DD:EE:FF`.
    fn address(&self) -> String;

    async fn write(&self, characteristic: Uuid, data: &[u8], write_type: WriteType) -> AwoxResult<()>;

    async fn read(&self, characteristic: Uuid) -> AwoxResult<Vec<u8>>;

    async fn subscribe(&self, characteristic: Uuid) -> AwoxResult<()>;

    async fn notifications(&self) -> AwoxResult<NotificationStream>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> AwoxResult<()>;
}

/// Opens transports by MAC address.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, mac: &str) -> anyhow::Result<Arc<dyn MeshTransport>>;
}

/// Returns the first Bluetooth adapter of the host.
pub async fn first_adapter() -> AwoxResult<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    let adapter = adapters.into_iter().next().ok_or(AwoxError::NoAdapter)?;
    debug!("Using Bluetooth adapter: {:?}", adapter.adapter_info().await);
    Ok(adapter)
}

fn map_ble_error(err: btleplug::Error, address: &str) -> AwoxError {
    match err {
        btleplug::Error::NotConnected => AwoxError::Disconnected(address.to_string()),
        btleplug::Error::DeviceNotFound => AwoxError::DeviceNotFound(address.to_string()),
        other => AwoxError::Ble(other),
    }
}

#[derive(Debug, Clone)]
pub struct BtleplugTransport {
    address: String,
    peripheral: Peripheral,
}

impl BtleplugTransport {
    /// Scans until a peripheral with the given address shows up, then connects to it.
    pub async fn connect(mac: &str, scan_timeout: Duration) -> AwoxResult<Self> {
        let adapter = first_adapter().await?;
        let peripheral = Self::find_peripheral(&adapter, mac, scan_timeout).await?;

        info!("[{}] Connecting", mac);
        peripheral
            .connect()
            .await
            .map_err(|e| map_ble_error(e, mac))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| map_ble_error(e, mac))?;
        debug!(
            "[{}] Discovered {} characteristics",
            mac,
            peripheral.characteristics().len()
        );

        Ok(BtleplugTransport {
            address: mac.to_uppercase(),
            peripheral,
        })
    }

    async fn find_peripheral(
        adapter: &Adapter,
        mac: &str,
        scan_timeout: Duration,
    ) -> AwoxResult<Peripheral> {
        adapter.start_scan(ScanFilter::default()).await?;
        let deadline = Instant::now() + scan_timeout;

        let found = loop {
            let peripherals = adapter.peripherals().await?;
            if let Some(peripheral) = peripherals
                .into_iter()
                .find(|p| p.address().to_string().eq_ignore_ascii_case(mac))
            {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        found.ok_or_else(|| AwoxError::DeviceNotFound(mac.to_string()))
    }

    fn characteristic(&self, uuid: Uuid) -> AwoxResult<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(AwoxError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl MeshTransport for BtleplugTransport {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], write_type: WriteType) -> AwoxResult<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .write(&characteristic, data, write_type)
            .await
            .map_err(|e| map_ble_error(e, &self.address))
    }

    async fn read(&self, characteristic: Uuid) -> AwoxResult<Vec<u8>> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .read(&characteristic)
            .await
            .map_err(|e| map_ble_error(e, &self.address))
    }

    async fn subscribe(&self, characteristic: Uuid) -> AwoxResult<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| map_ble_error(e, &self.address))
    }

    async fn notifications(&self) -> AwoxResult<NotificationStream> {
        let stream = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| map_ble_error(e, &self.address))?;
        Ok(Box::pin(stream.map(|n| Notification {
            uuid: n.uuid,
            value: n.value,
        })))
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> AwoxResult<()> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| map_ble_error(e, &self.address))
    }
}

/// Opens [`BtleplugTransport`]s with a fixed scan timeout.
#[derive(Debug, Clone)]
pub struct BtleplugTransportFactory {
    pub scan_timeout: Duration,
}

impl Default for BtleplugTransportFactory {
    fn default() -> Self {
        BtleplugTransportFactory {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

#[async_trait]
impl TransportFactory for BtleplugTransportFactory {
    async fn open(&self, mac: &str) -> anyhow::Result<Arc<dyn MeshTransport>> {
        let transport = BtleplugTransport::connect(mac, self.scan_timeout).await?;
        Ok(Arc::new(transport))
    }
}

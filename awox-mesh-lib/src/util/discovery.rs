use std::cmp::max;
use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use btleplug::api::{Central, Peripheral as _, ScanFilter};
use derivative::Derivative;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::control_interface::MeshLight;
use crate::error::AwoxError;
use crate::util::transport::{first_adapter, TransportFactory};

/// Every AwoX mesh light seen so far carries this OUI.
pub const AWOX_MAC_PREFIX: &str = "A4:C1";
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Derivative)]
#[derivative(Hash, PartialEq, Eq, PartialOrd)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    pub mac: String,
    pub name: Option<String>,

    /// Signal strength at scan time. Not part of the identity.
    #[derivative(Hash = "ignore", PartialEq = "ignore", PartialOrd = "ignore")]
    pub rssi: Option<i16>,
}

impl DeviceIdentifier {
    pub fn new(mac: String, name: Option<String>, rssi: Option<i16>) -> Self {
        DeviceIdentifier { mac, name, rssi }
    }
}

/// A scanned light that accepted the mesh credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableDevice {
    pub mac: String,
    pub model: String,
}

pub fn is_awox_address(mac: &str) -> bool {
    mac.get(..AWOX_MAC_PREFIX.len())
        .map(|prefix| prefix.eq_ignore_ascii_case(AWOX_MAC_PREFIX))
        .unwrap_or(false)
}

pub struct Discovery;

impl Discovery {
    /// Scans for AwoX lights for `given_timeout`.
    pub async fn find_devices(given_timeout: Duration) -> Result<HashSet<DeviceIdentifier>> {
        let adapter = first_adapter().await?;
        info!(
            "Scanning {} seconds for AwoX bluetooth mesh devices",
            given_timeout.as_secs()
        );
        adapter.start_scan(ScanFilter::default()).await?;
        sleep(given_timeout).await;

        let mut devices = HashSet::new();
        for peripheral in adapter.peripherals().await? {
            let mac = peripheral.address().to_string();
            if !is_awox_address(&mac) {
                continue;
            }
            let properties = match peripheral.properties().await {
                Ok(properties) => properties,
                Err(e) => {
                    warn!("[{}] Failed to read advertisement: {}", mac, e);
                    None
                }
            };
            let (name, rssi) = properties
                .map(|p| (p.local_name, p.rssi))
                .unwrap_or((None, None));
            debug!("Found device {} {:?} rssi {:?}", mac, name, rssi);
            devices.insert(DeviceIdentifier::new(mac, name, rssi));
        }

        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        info!("Discovery complete, found {} devices", devices.len());
        Ok(devices)
    }

    /// Scans and reports the lights that accept the given credentials.
    pub async fn find_available_devices(
        mesh_name: &str,
        mesh_password: &str,
        given_timeout: Duration,
        factory: &dyn TransportFactory,
    ) -> Result<Vec<AvailableDevice>> {
        let devices = Self::find_devices(given_timeout).await?;
        Ok(Self::probe_devices(&devices, mesh_name, mesh_password, factory).await)
    }

    /// Connects to each device in turn and reads its model number.
    pub async fn probe_devices(
        devices: &HashSet<DeviceIdentifier>,
        mesh_name: &str,
        mesh_password: &str,
        factory: &dyn TransportFactory,
    ) -> Vec<AvailableDevice> {
        let mut available = Vec::new();

        for device in devices {
            debug!("Probing {} [{:?}]", device.mac, device.name);
            let mut light = match MeshLight::new(&device.mac, mesh_name, mesh_password, 0) {
                Ok(light) => light,
                Err(e) => {
                    warn!("Skipping {}: {:#}", device.mac, e);
                    continue;
                }
            };
            if let Err(e) = light.connect_with_retry(1, factory).await {
                debug!("Failed to connect [{}]: {:#}", device.mac, e);
                continue;
            }
            match light.model_number().await {
                Ok(model) => available.push(AvailableDevice {
                    mac: device.mac.clone(),
                    model,
                }),
                Err(e) => debug!("[{}] Failed to read model number: {:#}", device.mac, e),
            }
            light.disconnect().await;
        }

        available
    }

    /// Adds a light to our mesh, or checks it is already part of it.
    ///
    /// A light still on factory defaults gets the mesh settings when `mesh_key` is given.
    /// Returns false when the light refuses both the factory defaults and our credentials.
    pub async fn connect_device(
        mac: &str,
        mesh_name: &str,
        mesh_password: &str,
        mesh_key: Option<&str>,
        factory: &dyn TransportFactory,
    ) -> Result<bool> {
        let mut light = match Self::open_light(mac, mesh_name, mesh_password, mesh_key, factory).await {
            Ok(light) => light,
            Err(e) => match e.downcast_ref::<AwoxError>() {
                Some(AwoxError::AuthFailed) | Some(AwoxError::UnexpectedPairReply(_)) => {
                    info!("[{}] Refused our mesh credentials", mac);
                    return Ok(false);
                }
                _ => return Err(e),
            },
        };

        light.set_color(0, 254, 0, None).await?;
        light.disconnect().await;
        Ok(true)
    }

    async fn open_light(
        mac: &str,
        mesh_name: &str,
        mesh_password: &str,
        mesh_key: Option<&str>,
        factory: &dyn TransportFactory,
    ) -> Result<MeshLight> {
        let mut light = MeshLight::unpaired(mac)?;
        match light.connect_with_retry(1, factory).await {
            Ok(()) => {
                if let Some(key) = mesh_key {
                    info!("Add {} to our mesh", mac);
                    if !light.set_mesh(mesh_name, mesh_password, key).await? {
                        warn!("[{}] Did not accept the new mesh settings", mac);
                    }
                }
                return Ok(light);
            }
            Err(e) => debug!("[{}] Factory defaults refused: {:#}", mac, e),
        }

        let mut light = MeshLight::new(mac, mesh_name, mesh_password, 0)?;
        light.connect_with_retry(1, factory).await?;
        Ok(light)
    }

    pub fn pretty_print_devices(devices: &HashSet<DeviceIdentifier>) {
        let mut devices: Vec<&DeviceIdentifier> = devices.iter().collect();
        devices.sort_by(|a, b| a.mac.cmp(&b.mac));

        let name_of = |d: &DeviceIdentifier| d.name.clone().unwrap_or_else(|| "-".to_string());
        let rssi_of = |d: &DeviceIdentifier| d.rssi.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string());

        let max_mac_width = devices.iter().map(|d| d.mac.len()).max().unwrap_or(0);
        let max_name_width = devices
            .iter()
            .map(|d| max(name_of(d).len(), 20))
            .max()
            .unwrap_or(0);
        let max_rssi_width = devices
            .iter()
            .map(|d| max(rssi_of(d).len(), 4))
            .max()
            .unwrap_or(0);

        println!(
            "{:<mac_width$} {:<name_width$} {:<rssi_width$}",
            "MAC Address",
            "Device Name",
            "RSSI",
            mac_width = max_mac_width + 2,
            name_width = max_name_width + 2,
            rssi_width = max_rssi_width + 2,
        );
        println!(
            "{:<mac_width$} {:<name_width$} {:<rssi_width$}",
            "-".repeat(max_mac_width),
            "-".repeat(max_name_width),
            "-".repeat(max_rssi_width),
            mac_width = max_mac_width + 2,
            name_width = max_name_width + 2,
            rssi_width = max_rssi_width + 2,
        );
        for device in devices {
            println!(
                "{:<mac_width$} {:<name_width$} {:<rssi_width$}",
                device.mac,
                name_of(device),
                rssi_of(device),
                mac_width = max_mac_width + 2,
                name_width = max_name_width + 2,
                rssi_width = max_rssi_width + 2,
            );
        }
    }
}

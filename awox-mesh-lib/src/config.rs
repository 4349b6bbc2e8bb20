//! Stored mesh setup: credentials plus the devices known to the account.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::cloud::{mesh_devices, AwoxConnect};
use crate::error::{ensure_max_16, AwoxResult};
use crate::mesh::MeshCredentials;
use crate::util::device_type::DeviceType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub mesh_id: u16,
    pub name: String,
    pub mac: String,
    pub model: String,
    pub manufacturer: String,
    pub firmware: String,
    #[serde(default)]
    pub hardware: Option<String>,
    #[serde(rename = "type")]
    pub device_type: String,
}

impl DeviceConfig {
    pub fn parsed_type(&self) -> DeviceType {
        DeviceType::parse(&self.device_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshConfig {
    pub mesh_name: String,
    pub mesh_password: String,
    pub mesh_key: String,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Credentials are encrypted as single blocks, so 16 bytes is the hard limit.
pub fn max_length_16(field: &'static str, value: &str) -> AwoxResult<()> {
    ensure_max_16(field, value.as_bytes())
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

impl MeshConfig {
    pub fn validate(&self) -> AwoxResult<()> {
        max_length_16("mesh_name", &self.mesh_name)?;
        max_length_16("mesh_password", &self.mesh_password)?;
        max_length_16("mesh_key", &self.mesh_key)?;
        Ok(())
    }

    pub fn credentials(&self) -> MeshCredentials {
        MeshCredentials {
            name: self.mesh_name.clone(),
            password: self.mesh_password.clone(),
            long_term_key: self.mesh_key.clone(),
        }
    }

    /// Reads a config file. `.json` files are JSON, anything else is YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: MeshConfig = if is_json(path) {
            serde_json::from_str(&contents).context("Failed to parse JSON config")?
        } else {
            serde_yaml::from_str(&contents).context("Failed to parse YAML config")?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let contents = if is_json(path) {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        } else {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        };
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        info!("Wrote mesh config to {}", path.display());
        Ok(())
    }

    /// Builds a config from the devices and mesh credentials of a logged in account.
    pub async fn from_cloud(connect: &AwoxConnect) -> Result<Self> {
        let devices = mesh_devices(&connect.devices().await?);
        if devices.is_empty() {
            return Err(anyhow!("no devices found"));
        }
        info!("Found {} devices in the cloud", devices.len());

        let credentials = connect
            .credentials()
            .await?
            .ok_or_else(|| anyhow!("no mesh credentials found for this account"))?;

        let config = MeshConfig {
            mesh_name: credentials.name,
            mesh_password: credentials.password,
            mesh_key: credentials.long_term_key,
            devices,
        };
        config.validate()?;
        Ok(config)
    }

    /// Devices that can be driven over the mesh. Others are logged and left out.
    pub fn supported_devices(&self) -> Vec<&DeviceConfig> {
        self.devices
            .iter()
            .filter(|device| {
                let supported = device.parsed_type().is_supported();
                if !supported {
                    warn!(
                        "Skipped {} ({}), type {} is not supported",
                        device.name, device.mac, device.device_type
                    );
                }
                supported
            })
            .collect()
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Radio a device talks over, as announced in its cloud type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTransport {
    Tlmesh,
    Zigbee,
    Wifi,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    Light,
    Plug,
    Other,
}

/// A parsed cloud type string like `awox.ble.tlmesh.light.color.temperature.dimming`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceType {
    pub raw: String,
    pub transport: DeviceTransport,
    pub category: DeviceCategory,
    pub color: bool,
    pub temperature: bool,
    pub dimming: bool,
}

impl DeviceType {
    pub fn parse(type_string: &str) -> Self {
        let lower = type_string.to_lowercase();

        let transport = if lower.contains("tlmesh") {
            DeviceTransport::Tlmesh
        } else if lower.contains("zigbee") {
            DeviceTransport::Zigbee
        } else if lower.contains("wifi") {
            DeviceTransport::Wifi
        } else {
            DeviceTransport::Unknown
        };

        let category = if lower.contains("plug") {
            DeviceCategory::Plug
        } else if lower.contains("light") {
            DeviceCategory::Light
        } else {
            DeviceCategory::Other
        };

        DeviceType {
            raw: type_string.to_string(),
            transport,
            category,
            color: lower.contains("color"),
            temperature: lower.contains("temperature"),
            dimming: lower.contains("dimming"),
        }
    }

    /// Only tlmesh devices can be reached through a BLE mesh proxy.
    pub fn is_supported(&self) -> bool {
        self.transport == DeviceTransport::Tlmesh
    }

    pub fn is_light(&self) -> bool {
        self.category == DeviceCategory::Light
    }

    pub fn is_plug(&self) -> bool {
        self.category == DeviceCategory::Plug
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tlmesh_light() {
        let t = DeviceType::parse("DEVICE.LIGHT.BLE.TLMESH.LIGHT.COLOR.TEMPERATURE.DIMMING");
        assert_eq!(t.transport, DeviceTransport::Tlmesh);
        assert!(t.is_light());
        assert!(t.color && t.temperature && t.dimming);
        assert!(t.is_supported());
    }

    #[test]
    fn test_unsupported_transports() {
        let zigbee = DeviceType::parse("awox.ble.zigbee.light.color");
        assert_eq!(zigbee.transport, DeviceTransport::Zigbee);
        assert!(!zigbee.is_supported());

        let wifi = DeviceType::parse("awox.wifi.light.dimming");
        assert_eq!(wifi.transport, DeviceTransport::Wifi);
        assert!(!wifi.is_supported());
    }

    #[test]
    fn test_plug() {
        let t = DeviceType::parse("awox.ble.tlmesh.plug");
        assert!(t.is_plug());
        assert!(!t.is_light());
        assert!(!t.color);
    }
}

//! Error types for mesh sessions and the AwoX cloud.

use thiserror::Error;

/// Result type for protocol level operations
pub type AwoxResult<T> = Result<T, AwoxError>;

/// Errors raised by the mesh protocol, the light session and the cloud client.
///
/// High level operations return `anyhow::Result`; these variants travel inside
/// it and can be recovered with `downcast_ref::<AwoxError>()`.
#[derive(Error, Debug)]
pub enum AwoxError {
    #[error("Auth error: check mesh name and password")]
    AuthFailed,

    #[error("Unexpected pair reply: {0}")]
    UnexpectedPairReply(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("{field} can hold max {max} bytes (got {len})")]
    TooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(uuid::Uuid),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No Bluetooth adapter found")]
    NoAdapter,

    #[error("Login failed - {0}")]
    LoginFailed(String),

    #[error("Loading data failed - {0}")]
    CloudRequest(String),

    #[error(transparent)]
    Ble(#[from] btleplug::Error),
}

impl AwoxError {
    /// Whether the link to the proxy node is gone and the session must be rebuilt.
    pub fn is_link_loss(&self) -> bool {
        matches!(
            self,
            AwoxError::Disconnected(_) | AwoxError::NotConnected | AwoxError::Ble(_)
        )
    }
}

/// Checks that a credential fits in a single 16 byte block.
pub fn ensure_max_16(field: &'static str, value: &[u8]) -> AwoxResult<()> {
    if value.len() > 16 {
        return Err(AwoxError::TooLong {
            field,
            max: 16,
            len: value.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_max_16() {
        assert!(ensure_max_16("mesh_name", b"0123456789abcdef").is_ok());
        let err = ensure_max_16("mesh_name", b"0123456789abcdefg").unwrap_err();
        assert_eq!(err.to_string(), "mesh_name can hold max 16 bytes (got 17)");
    }

    #[test]
    fn test_link_loss_classification() {
        assert!(AwoxError::NotConnected.is_link_loss());
        assert!(AwoxError::Disconnected("gone".into()).is_link_loss());
        assert!(!AwoxError::AuthFailed.is_link_loss());
        assert!(!AwoxError::InvalidPacket("short".into()).is_link_loss());
    }
}

pub mod auth;
pub mod crypto;
pub mod device_type;
pub mod discovery;
pub mod firmware;
pub mod packet;
pub mod traits;
pub mod transport;

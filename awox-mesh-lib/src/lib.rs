//! # AwoX Mesh Library
//!
//! `awox-mesh-lib` controls AwoX and Eglo lights and plugs that speak the
//! Telink based Bluetooth LE mesh protocol. One light is connected as a proxy
//! and relays commands to every other node of the mesh.
//!
//! ## Features
//!
//! - Pairing handshake, session encryption and command packets
//! - A direct session to a single light, including mesh setup and firmware upload
//! - A mesh coordinator that keeps a proxy connected and tracks every node's state
//! - Light and plug entities with colour, white temperature and brightness handling
//! - Retrieval of mesh credentials and device lists from the AwoX cloud
//! - BLE discovery of lights in range
//!
//! ## Example
//!
//! Turning a single light on through a proxy:
//!
//! ```no_run
//! use std::sync::Arc;
//! use awox_mesh_lib::mesh::{AwoxMesh, MeshCredentials};
//! use awox_mesh_lib::util::transport::BtleplugTransportFactory;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let credentials = MeshCredentials {
//!         name: "meshname".to_string(),
//!         password: "meshpass".to_string(),
//!         long_term_key: "0123456789abcdef".to_string(),
//!     };
//!     let mesh = AwoxMesh::new(credentials, Arc::new(BtleplugTransportFactory::default()));
//!     mesh.register_device(12, Some("A4:C1:38:00:00:0C".to_string()), "Kitchen").await;
//!     mesh.connect_device().await;
//!     mesh.on(12).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Disclaimer
//!
//! This project is not affiliated with, authorized by, endorsed by, or in any way officially connected
//! with AwoX, Eglo or their affiliates.
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License, Version 2.0.
//! You may choose to use either license, depending on your project needs.

// Access to the AwoX Smart Connect cloud: login, mesh credentials and device lists.
pub mod cloud;

// Mesh credentials and device list as stored on disk.
pub mod config;

// A direct, encrypted session to one light.
//
// ```no_run
// use std::sync::Arc;
// use awox_mesh_lib::control_interface::MeshLight;
// use awox_mesh_lib::util::transport::BtleplugTransportFactory;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let mut light = MeshLight::new("A4:C1:38:00:00:0C", "meshname", "meshpass", 12)?;
//     light.connect_with_retry(3, &BtleplugTransportFactory::default()).await?;
//     light.set_color(255, 0, 0, None).await?;
//     Ok(())
// }
// ```
pub mod control_interface;

pub mod error;

// Light and plug entities on top of the mesh coordinator, plus colour helpers.
pub mod led;

// The coordinator that keeps one proxy connected and routes commands through it.
pub mod mesh;

// Crypto, packets, transports, discovery and other helpers.
pub mod util;

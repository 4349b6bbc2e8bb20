//! Drives the public API against a scripted proxy light: config, coordinator and entities.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::WriteType;
use futures::channel::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use awox_mesh_lib::config::{DeviceConfig, MeshConfig};
use awox_mesh_lib::error::{AwoxError, AwoxResult};
use awox_mesh_lib::led::light::{ColorMode, MeshLightEntity, TurnOnParams};
use awox_mesh_lib::led::led_color::RGB;
use awox_mesh_lib::mesh::{AwoxMesh, MeshEvent};
use awox_mesh_lib::util::auth::Auth;
use awox_mesh_lib::util::crypto::{crypt_payload, make_checksum};
use awox_mesh_lib::util::packet::{make_session_key, PACKET_LEN};
use awox_mesh_lib::util::traits::*;
use awox_mesh_lib::util::transport::{MeshTransport, Notification, NotificationStream, TransportFactory};

const PROXY_MAC: &str = "A4:C1:38:00:00:01";

#[derive(Default)]
struct ScriptState {
    session_key: Option<[u8; 16]>,
    pair_reply: Vec<u8>,
    commands: Vec<Vec<u8>>,
    notify_tx: Option<mpsc::UnboundedSender<Notification>>,
}

/// Accepts any pair request made with the expected credentials and decrypts what it is sent.
struct ScriptedLight {
    mac_bytes: [u8; 6],
    mesh_name: String,
    mesh_password: String,
    state: Mutex<ScriptState>,
}

impl ScriptedLight {
    fn new(mesh_name: &str, mesh_password: &str) -> Arc<Self> {
        Arc::new(ScriptedLight {
            mac_bytes: Auth::mac_to_bytes(PROXY_MAC).unwrap(),
            mesh_name: mesh_name.to_string(),
            mesh_password: mesh_password.to_string(),
            state: Mutex::new(ScriptState::default()),
        })
    }

    fn commands(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().commands.clone()
    }

    fn decrypt_command(&self, key: &[u8; 16], packet: &[u8]) -> Vec<u8> {
        let mut nonce = [0u8; 8];
        for (i, byte) in self.mac_bytes.iter().rev().take(4).enumerate() {
            nonce[i] = *byte;
        }
        nonce[4] = 0x01;
        nonce[5..].copy_from_slice(&packet[..3]);
        let payload = crypt_payload(key, &nonce, &packet[5..]).unwrap();
        let check = make_checksum(key, &nonce, &payload).unwrap();
        assert_eq!(&check[..2], &packet[3..5], "command checksum");
        payload
    }

    /// Pushes an encrypted 0xdc notification for `mesh_id`.
    fn notify(&self, mesh_id: u16, mode: u8, color: [u8; 4]) {
        let mut plain = [0u8; PACKET_LEN];
        plain[..3].copy_from_slice(&[0x10, 0x20, 0x30]);
        plain[7] = C_NOTIFICATION_RECEIVED;
        plain[10] = (mesh_id & 0xff) as u8;
        plain[12] = mode;
        plain[15..19].copy_from_slice(&color);
        plain[19] = (mesh_id >> 8) as u8;

        let state = self.state.lock().unwrap();
        let key = state.session_key.unwrap();
        let mut nonce = [0u8; 8];
        for (i, byte) in self.mac_bytes.iter().rev().take(3).enumerate() {
            nonce[i] = *byte;
        }
        nonce[3..].copy_from_slice(&plain[..5]);
        let check = make_checksum(&key, &nonce, &plain[7..]).unwrap();
        let encrypted = crypt_payload(&key, &nonce, &plain[7..]).unwrap();

        let mut packet = plain[..5].to_vec();
        packet.extend_from_slice(&check[..2]);
        packet.extend_from_slice(&encrypted);
        state
            .notify_tx
            .as_ref()
            .unwrap()
            .unbounded_send(Notification {
                uuid: STATUS_CHAR_UUID,
                value: packet,
            })
            .unwrap();
    }
}

#[async_trait]
impl MeshTransport for ScriptedLight {
    fn address(&self) -> String {
        PROXY_MAC.to_string()
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], _write_type: WriteType) -> AwoxResult<()> {
        let mut state = self.state.lock().unwrap();
        match characteristic {
            PAIR_CHAR_UUID => {
                let mut session_random = [0u8; 8];
                session_random.copy_from_slice(&data[1..9]);
                let response_random = [8, 7, 6, 5, 4, 3, 2, 1];
                state.session_key = Some(
                    make_session_key(
                        self.mesh_name.as_bytes(),
                        self.mesh_password.as_bytes(),
                        &session_random,
                        &response_random,
                    )
                    .unwrap(),
                );
                let mut reply = vec![SESSION_ACCEPTED.code];
                reply.extend_from_slice(&response_random);
                state.pair_reply = reply;
            }
            COMMAND_CHAR_UUID => {
                let key = state.session_key.ok_or(AwoxError::NotConnected)?;
                let payload = self.decrypt_command(&key, data);
                state.commands.push(payload);
            }
            STATUS_CHAR_UUID => {}
            other => return Err(AwoxError::CharacteristicNotFound(other)),
        }
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> AwoxResult<Vec<u8>> {
        match characteristic {
            PAIR_CHAR_UUID => Ok(self.state.lock().unwrap().pair_reply.clone()),
            STATUS_CHAR_UUID => Ok(vec![0u8; PACKET_LEN]),
            other => Err(AwoxError::CharacteristicNotFound(other)),
        }
    }

    async fn subscribe(&self, _characteristic: Uuid) -> AwoxResult<()> {
        Ok(())
    }

    async fn notifications(&self) -> AwoxResult<NotificationStream> {
        let (tx, rx) = mpsc::unbounded();
        self.state.lock().unwrap().notify_tx = Some(tx);
        Ok(Box::pin(rx))
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn disconnect(&self) -> AwoxResult<()> {
        self.state.lock().unwrap().session_key = None;
        Ok(())
    }
}

struct ScriptedFactory(Arc<ScriptedLight>);

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn open(&self, mac: &str) -> anyhow::Result<Arc<dyn MeshTransport>> {
        if mac.eq_ignore_ascii_case(PROXY_MAC) {
            Ok(self.0.clone())
        } else {
            Err(AwoxError::DeviceNotFound(mac.to_string()).into())
        }
    }
}

fn device(mesh_id: u16, mac: &str, name: &str, device_type: &str) -> DeviceConfig {
    DeviceConfig {
        mesh_id,
        name: name.to_string(),
        mac: mac.to_string(),
        model: "unknown".to_string(),
        manufacturer: "AwoX".to_string(),
        firmware: "unknown".to_string(),
        hardware: None,
        device_type: device_type.to_string(),
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn test_config_to_entity_through_proxy() {
    init_logger();

    let config = MeshConfig {
        mesh_name: "mesh".to_string(),
        mesh_password: "secret".to_string(),
        mesh_key: "0123456789abcdef".to_string(),
        devices: vec![
            device(1, PROXY_MAC, "Hall", "awox.ble.tlmesh.light.white"),
            device(2, "A4:C1:38:00:00:02", "Kitchen", "awox.ble.tlmesh.light.color"),
            device(3, "00:17:88:00:00:03", "Garden", "awox.zigbee.light.color"),
        ],
    };
    config.validate().unwrap();

    let proxy = ScriptedLight::new("mesh", "secret");
    let mesh = AwoxMesh::new(config.credentials(), Arc::new(ScriptedFactory(proxy.clone())));
    let supported = config.supported_devices();
    assert_eq!(supported.len(), 2);

    let kitchen = supported.iter().find(|d| d.mesh_id == 2).unwrap();
    let mut entity = MeshLightEntity::new(
        mesh.clone(),
        kitchen.mesh_id,
        Some(kitchen.mac.clone()),
        &kitchen.name,
        &kitchen.parsed_type(),
    );
    for device in &supported {
        mesh.register_device(device.mesh_id, Some(device.mac.clone()), &device.name)
            .await;
    }
    let mut events = mesh.subscribe();

    entity
        .turn_on(TurnOnParams {
            rgb_color: Some(RGB {
                red: 255,
                green: 64,
                blue: 0,
            }),
            ..Default::default()
        })
        .await
        .unwrap();

    let state = mesh.state().await;
    assert_eq!(state.connected_device.as_deref(), Some(PROXY_MAC));
    assert_eq!(
        &proxy.commands()[0][..9],
        &[2, 0, C_COLOR, 0x60, 0x01, 0x04, 255, 64, 0]
    );
    assert!(entity.is_on());

    match timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap() {
        MeshEvent::Connected { mac, mesh_id } => {
            assert_eq!(mac, PROXY_MAC);
            assert_eq!(mesh_id, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    proxy.notify(2, 0b11, [0x64, 0, 0, 255]);
    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    entity.handle_event(&event);

    assert_eq!(entity.color_mode(), Some(ColorMode::Rgb));
    assert_eq!(
        entity.rgb_color(),
        Some(RGB {
            red: 0,
            green: 0,
            blue: 255
        })
    );
    assert_eq!(entity.brightness(), Some(255));

    entity.turn_off().await.unwrap();
    assert_eq!(&proxy.commands()[1][..6], &[2, 0, C_POWER, 0x60, 0x01, 0x00]);
    assert!(!entity.is_on());

    mesh.disconnect().await;
    assert!(!mesh.is_connected().await);
}

#[tokio::test]
async fn test_command_without_reachable_proxy_fails() {
    init_logger();

    let proxy = ScriptedLight::new("mesh", "secret");
    let mesh = AwoxMesh::new(
        MeshConfig {
            mesh_name: "mesh".to_string(),
            mesh_password: "secret".to_string(),
            mesh_key: "key".to_string(),
            devices: vec![],
        }
        .credentials(),
        Arc::new(ScriptedFactory(proxy)),
    );
    mesh.register_device(5, Some("A4:C1:38:00:00:05".to_string()), "Porch")
        .await;

    let err = mesh.on(5).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<AwoxError>(), Some(AwoxError::NotConnected)));
}

//! In-memory light speaking the pairing and command crypto, for tests without a radio.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::WriteType;
use futures::channel::mpsc;
use uuid::Uuid;

use crate::error::{AwoxError, AwoxResult};
use crate::util::auth::Auth;
use crate::util::packet::test_support::{decrypt_command_packet, encrypt_status_packet};
use crate::util::packet::{make_pair_packet, make_session_key, PACKET_LEN, PAIR_REQUEST};
use crate::util::traits::*;
use crate::util::transport::{MeshTransport, Notification, NotificationStream, TransportFactory};

#[derive(Default)]
struct FakeState {
    connected: bool,
    reachable: bool,
    failing_opens: usize,
    pair_reply: Vec<u8>,
    pair_reply_override: Option<Vec<u8>>,
    refuse_mesh_settings: bool,
    session_key: Option<[u8; 16]>,
    commands: Vec<Vec<u8>>,
    status_writes: Vec<Vec<u8>>,
    mesh_settings: Vec<u8>,
    ota_packets: Vec<Vec<u8>>,
    status_reply: Option<Vec<u8>>,
    notify_tx: Option<mpsc::UnboundedSender<Notification>>,
}

pub(crate) struct FakeLight {
    mac: String,
    mac_bytes: [u8; 6],
    mesh_name: Vec<u8>,
    mesh_password: Vec<u8>,
    state: Mutex<FakeState>,
}

impl FakeLight {
    pub fn new(mac: &str, mesh_name: &str, mesh_password: &str) -> Arc<Self> {
        Arc::new(FakeLight {
            mac: mac.to_string(),
            mac_bytes: Auth::mac_to_bytes(mac).unwrap(),
            mesh_name: mesh_name.as_bytes().to_vec(),
            mesh_password: mesh_password.as_bytes().to_vec(),
            state: Mutex::new(FakeState {
                connected: true,
                reachable: true,
                ..Default::default()
            }),
        })
    }

    pub fn session_key(&self) -> Option<[u8; 16]> {
        self.state.lock().unwrap().session_key
    }

    pub fn is_connected_now(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn status_writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().status_writes.clone()
    }

    pub fn ota_packets(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().ota_packets.clone()
    }

    pub fn mesh_setting_opcodes(&self) -> Vec<u8> {
        self.state.lock().unwrap().mesh_settings.clone()
    }

    pub fn override_pair_reply(&self, reply: Vec<u8>) {
        self.state.lock().unwrap().pair_reply_override = Some(reply);
    }

    pub fn refuse_mesh_settings(&self) {
        self.state.lock().unwrap().refuse_mesh_settings = true;
    }

    /// The link goes down: every further write or read fails.
    pub fn drop_link(&self) {
        self.state.lock().unwrap().connected = false;
    }

    /// The factory can no longer open this light.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    /// The next `count` opens through the factory fail as if the device was out of range.
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().unwrap().failing_opens = count;
    }

    fn reopen(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return false;
        }
        if state.reachable {
            state.connected = true;
        }
        state.reachable
    }

    /// Encrypts a plain status packet with the current session and pushes it as notification.
    pub fn notify(&self, plain: &[u8; PACKET_LEN]) {
        let key = self.session_key().expect("no session");
        self.notify_raw(encrypt_status_packet(&key, &self.mac_bytes, plain).to_vec());
    }

    pub fn notify_raw(&self, value: Vec<u8>) {
        let state = self.state.lock().unwrap();
        let tx = state.notify_tx.as_ref().expect("nobody listens");
        tx.unbounded_send(Notification {
            uuid: STATUS_CHAR_UUID,
            value,
        })
        .unwrap();
    }

    pub fn set_status_reply(&self, plain: &[u8; PACKET_LEN]) {
        let key = self.session_key().expect("no session");
        let packet = encrypt_status_packet(&key, &self.mac_bytes, plain);
        self.state.lock().unwrap().status_reply = Some(packet.to_vec());
    }

    pub fn corrupt_status_reply(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(reply) = state.status_reply.as_mut() {
            reply[10] ^= 0xff;
        }
    }

    fn handle_pair_write(&self, state: &mut FakeState, data: &[u8]) {
        match data.first() {
            Some(&PAIR_REQUEST) if data.len() == 17 => {
                let mut session_random = [0u8; 8];
                session_random.copy_from_slice(&data[1..9]);
                let expected =
                    make_pair_packet(&self.mesh_name, &self.mesh_password, &session_random).unwrap();
                if expected[..] == data[..] {
                    let response_random = Auth::generate_session_random();
                    state.session_key = Some(
                        make_session_key(
                            &self.mesh_name,
                            &self.mesh_password,
                            &session_random,
                            &response_random,
                        )
                        .unwrap(),
                    );
                    let mut reply = vec![SESSION_ACCEPTED.code];
                    reply.extend_from_slice(&response_random);
                    state.pair_reply = reply;
                } else {
                    state.session_key = None;
                    state.pair_reply = vec![AUTH_ERROR.code];
                }
            }
            Some(&opcode) if [P_MESH_NAME, P_MESH_PASSWORD, P_MESH_LONG_TERM_KEY].contains(&opcode) => {
                state.mesh_settings.push(opcode);
                state.pair_reply = if state.refuse_mesh_settings {
                    vec![AUTH_ERROR.code]
                } else {
                    vec![MESH_SETTINGS_ACCEPTED.code]
                };
            }
            _ => state.pair_reply = vec![UNEXPECTED.code],
        }
    }
}

#[async_trait]
impl MeshTransport for FakeLight {
    fn address(&self) -> String {
        self.mac.clone()
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], _write_type: WriteType) -> AwoxResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(AwoxError::Disconnected(self.mac.clone()));
        }

        match characteristic {
            PAIR_CHAR_UUID => self.handle_pair_write(&mut state, data),
            STATUS_CHAR_UUID => state.status_writes.push(data.to_vec()),
            COMMAND_CHAR_UUID => {
                let key = state.session_key.ok_or(AwoxError::NotConnected)?;
                let payload = decrypt_command_packet(&key, &self.mac_bytes, data)
                    .ok_or_else(|| AwoxError::InvalidPacket("command checksum".to_string()))?;
                state.commands.push(payload);
            }
            OTA_CHAR_UUID => state.ota_packets.push(data.to_vec()),
            other => return Err(AwoxError::CharacteristicNotFound(other)),
        }
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> AwoxResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        if !state.connected {
            return Err(AwoxError::Disconnected(self.mac.clone()));
        }

        match characteristic {
            PAIR_CHAR_UUID => Ok(state
                .pair_reply_override
                .clone()
                .unwrap_or_else(|| state.pair_reply.clone())),
            STATUS_CHAR_UUID => Ok(state.status_reply.clone().unwrap_or_else(|| vec![0u8; PACKET_LEN])),
            MODEL_NUMBER_CHAR_UUID => Ok(b"SMLm_C9\0".to_vec()),
            FIRMWARE_REVISION_CHAR_UUID => Ok(b"2.2.4\0".to_vec()),
            HARDWARE_REVISION_CHAR_UUID => Ok(b"1.0\0".to_vec()),
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
        self.is_connected_now()
    }

    async fn disconnect(&self) -> AwoxResult<()> {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.session_key = None;
        Ok(())
    }
}

/// Hands out registered fake lights by MAC and counts open attempts.
pub(crate) struct FakeFactory {
    lights: HashMap<String, Arc<FakeLight>>,
    opens: Mutex<HashMap<String, usize>>,
}

impl FakeFactory {
    pub fn new(lights: Vec<Arc<FakeLight>>) -> Self {
        FakeFactory {
            lights: lights
                .into_iter()
                .map(|light| (light.mac.to_uppercase(), light))
                .collect(),
            opens: Mutex::new(HashMap::new()),
        }
    }

    pub fn open_count(&self, mac: &str) -> usize {
        self.opens
            .lock()
            .unwrap()
            .get(&mac.to_uppercase())
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn open(&self, mac: &str) -> anyhow::Result<Arc<dyn MeshTransport>> {
        let mac = mac.to_uppercase();
        *self.opens.lock().unwrap().entry(mac.clone()).or_default() += 1;

        match self.lights.get(&mac) {
            Some(light) if light.reopen() => Ok(light.clone()),
            _ => Err(AwoxError::DeviceNotFound(mac).into()),
        }
    }
}

/// Plain 0xdc notification packet for `mesh_id`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn notification_packet(
    mesh_id: u16,
    mode: u8,
    white_brightness: u8,
    white_temperature: u8,
    color_brightness: u8,
    red: u8,
    green: u8,
    blue: u8,
) -> [u8; PACKET_LEN] {
    let mut plain = [0u8; PACKET_LEN];
    plain[..3].copy_from_slice(&[0x01, 0x02, 0x03]);
    plain[7] = C_NOTIFICATION_RECEIVED;
    plain[10] = (mesh_id & 0xff) as u8;
    plain[12] = mode;
    plain[13] = white_brightness;
    plain[14] = white_temperature;
    plain[15..19].copy_from_slice(&[color_brightness, red, green, blue]);
    plain[19] = (mesh_id >> 8) as u8;
    plain
}

/// Plain 0xdb status reply packet for `mesh_id`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn status_reply_packet(
    mesh_id: u16,
    mode: u8,
    white_brightness: u8,
    white_temperature: u8,
    color_brightness: u8,
    red: u8,
    green: u8,
    blue: u8,
) -> [u8; PACKET_LEN] {
    let mut plain = [0u8; PACKET_LEN];
    plain[3..5].copy_from_slice(&mesh_id.to_le_bytes());
    plain[7] = C_GET_STATUS_RECEIVED;
    plain[10] = mode;
    plain[11] = white_brightness;
    plain[12] = white_temperature;
    plain[13..17].copy_from_slice(&[color_brightness, red, green, blue]);
    plain
}

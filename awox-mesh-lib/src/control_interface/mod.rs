use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use btleplug::api::WriteType;
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::{ensure_max_16, AwoxError};
use crate::util::auth::{Auth, DEFAULT_MESH_NAME, DEFAULT_MESH_PASSWORD};
use crate::util::firmware::FirmwareImage;
use crate::util::packet::{decrypt_packet, make_command_packet};
use crate::util::traits::*;
use crate::util::transport::{MeshTransport, NotificationStream, TransportFactory};

pub use status::LightStatus;

pub mod status;

#[cfg(test)]
pub(crate) mod fake;

const STATUS_CHANNEL_CAPACITY: usize = 64;
const MESH_SETTINGS_DELAY: Duration = Duration::from_secs(1);
const OTA_PACKET_DELAY: Duration = Duration::from_millis(10);

/// Session state shared with the notification task.
#[derive(Default)]
struct SessionState {
    session_key: RwLock<Option<[u8; 16]>>,
    mesh_id: AtomicU16,
    status: RwLock<Option<LightStatus>>,
}

impl SessionState {
    async fn handle_notification(
        &self,
        mac: &str,
        mac_bytes: &[u8; 6],
        value: &[u8],
        status_tx: &broadcast::Sender<LightStatus>,
    ) {
        let key = match *self.session_key.read().await {
            Some(key) => key,
            None => {
                info!(
                    "[{}] Device is disconnected, ignoring received notification [unable to decrypt without active session]",
                    mac
                );
                return;
            }
        };

        let message = match decrypt_packet(&key, mac_bytes, value) {
            Some(message) => message,
            None => {
                warn!("[{}] Failed to decrypt notification {}", mac, hex::encode(value));
                return;
            }
        };
        debug!("[{}] Received notification {}", mac, hex::encode(&message));

        self.apply_status(mac, &message, status_tx).await;
    }

    async fn apply_status(
        &self,
        mac: &str,
        message: &[u8],
        status_tx: &broadcast::Sender<LightStatus>,
    ) -> Option<LightStatus> {
        let status = LightStatus::parse(message)?;
        debug!("[{}] Parsed status {:?}", mac, status);

        if status.mesh_id == self.mesh_id.load(Ordering::SeqCst) {
            info!("[{}][{}] Update light status", mac, status.mesh_id);
            *self.status.write().await = Some(status);
        }

        // Nobody listening is fine.
        let _ = status_tx.send(status);
        Some(status)
    }
}

/// An encrypted session with one light of the mesh.
///
/// Commands written through this light are relayed by it to the whole mesh, so
/// any mesh id can be addressed once a session is up.
pub struct MeshLight {
    mac: String,
    mac_bytes: [u8; 6],
    mesh_name: Vec<u8>,
    mesh_password: Vec<u8>,
    transport: Option<Arc<dyn MeshTransport>>,
    session: Arc<SessionState>,
    status_tx: broadcast::Sender<LightStatus>,
    notification_task: Option<JoinHandle<()>>,
}

impl MeshLight {
    /// # Arguments
    /// - `mac`: The light's MAC address, `AA:BB:CC:DD:EE:FF`.
    /// - `mesh_name`, `mesh_password`: Credentials of the mesh the light belongs to.
    /// - `mesh_id`: The mesh id (address) of the light.
    pub fn new(mac: &str, mesh_name: &str, mesh_password: &str, mesh_id: u16) -> Result<Self> {
        let mac_bytes = Auth::mac_to_bytes(mac)?;
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let session = SessionState::default();
        session.mesh_id.store(mesh_id, Ordering::SeqCst);

        Ok(MeshLight {
            mac: mac.to_uppercase(),
            mac_bytes,
            mesh_name: mesh_name.as_bytes().to_vec(),
            mesh_password: mesh_password.as_bytes().to_vec(),
            transport: None,
            session: Arc::new(session),
            status_tx,
            notification_task: None,
        })
    }

    /// A light that still has its factory credentials.
    pub fn unpaired(mac: &str) -> Result<Self> {
        Self::new(mac, DEFAULT_MESH_NAME, DEFAULT_MESH_PASSWORD, 0)
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn mesh_id(&self) -> u16 {
        self.session.mesh_id.load(Ordering::SeqCst)
    }

    pub fn mesh_name(&self) -> String {
        String::from_utf8_lossy(&self.mesh_name).to_string()
    }

    pub fn mesh_password(&self) -> String {
        String::from_utf8_lossy(&self.mesh_password).to_string()
    }

    pub async fn has_session(&self) -> bool {
        self.session.session_key.read().await.is_some()
    }

    /// Last status this light reported about itself.
    pub async fn status(&self) -> Option<LightStatus> {
        *self.session.status.read().await
    }

    /// Every status seen on this session, for any mesh id.
    pub fn subscribe_status(&self) -> broadcast::Receiver<LightStatus> {
        self.status_tx.subscribe()
    }

    /// Runs the pair handshake over an already connected transport.
    ///
    /// Fails with [`AwoxError::AuthFailed`] when the mesh credentials are rejected;
    /// the transport is disconnected on every failure.
    pub async fn connect(&mut self, transport: Arc<dyn MeshTransport>) -> Result<()> {
        ensure_max_16("mesh_name", &self.mesh_name)?;
        ensure_max_16("mesh_password", &self.mesh_password)?;

        self.transport = Some(transport.clone());
        *self.session.session_key.write().await = None;

        match self.handshake(transport.as_ref()).await {
            Ok(()) => {
                info!("[{}][{}] Connected", self.mac, self.mesh_id());
                Ok(())
            }
            Err(e) => {
                match e.downcast_ref::<AwoxError>() {
                    Some(AwoxError::AuthFailed) => {
                        info!("[{}] Auth error: check name and password", self.mac)
                    }
                    Some(AwoxError::UnexpectedPairReply(reply)) => {
                        info!("[{}] Unexpected pair value: {}", self.mac, reply)
                    }
                    _ => warn!("[{}] Handshake failed: {:#}", self.mac, e),
                }
                self.disconnect().await;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, transport: &dyn MeshTransport) -> Result<()> {
        let (session_random, pair_packet) =
            Auth::make_pair_request(&self.mesh_name, &self.mesh_password)?;

        let notifications = transport
            .notifications()
            .await
            .context("Failed to open notification stream")?;
        self.spawn_notification_task(notifications);

        transport
            .write(PAIR_CHAR_UUID, &pair_packet, WriteType::WithResponse)
            .await
            .context("Failed to write pair request")?;

        transport
            .subscribe(STATUS_CHAR_UUID)
            .await
            .context("Failed to subscribe to status")?;
        transport
            .write(STATUS_CHAR_UUID, &[0x01], WriteType::WithResponse)
            .await
            .context("Failed to enable status notifications")?;

        let reply = transport
            .read(PAIR_CHAR_UUID)
            .await
            .context("Failed to read pair reply")?;
        let session_key = Auth::session_key_from_reply(
            &self.mesh_name,
            &self.mesh_password,
            &session_random,
            &reply,
        )?;

        *self.session.session_key.write().await = Some(session_key);
        Ok(())
    }

    fn spawn_notification_task(&mut self, mut notifications: NotificationStream) {
        let session = self.session.clone();
        let status_tx = self.status_tx.clone();
        let mac = self.mac.clone();
        let mac_bytes = self.mac_bytes;

        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != STATUS_CHAR_UUID {
                    continue;
                }
                session
                    .handle_notification(&mac, &mac_bytes, &notification.value, &status_tx)
                    .await;
            }
            debug!("[{}] Notification stream closed", mac);
        });

        if let Some(previous) = self.notification_task.replace(handle) {
            previous.abort();
        }
    }

    /// Opens a transport through `factory` and connects, up to `num_tries` times.
    ///
    /// Only a lost link is retried; rejected credentials fail right away.
    pub async fn connect_with_retry(
        &mut self,
        num_tries: usize,
        factory: &dyn TransportFactory,
    ) -> Result<()> {
        let mut last_error = anyhow::anyhow!("No connection attempt made");

        for attempt in 0..num_tries.max(1) {
            let opened = factory.open(&self.mac).await;
            let result = match opened {
                Ok(transport) => self.connect(transport).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let retryable = match e.downcast_ref::<AwoxError>() {
                        Some(err) => err.is_link_loss() || matches!(err, AwoxError::DeviceNotFound(_)),
                        None => true,
                    };
                    if !retryable {
                        return Err(e);
                    }
                    info!("[{}] Connection error, retrying ({} attempts so far): {:#}", self.mac, attempt + 1, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Drops the current session and runs the handshake again on a new transport.
    pub async fn reconnect(&mut self, factory: &dyn TransportFactory) -> Result<()> {
        debug!("[{}] Reconnecting", self.mac);
        self.disconnect().await;
        let transport = factory
            .open(&self.mac)
            .await
            .with_context(|| format!("Failed to open transport to {}", self.mac))?;
        self.connect(transport).await
    }

    /// Disconnects and clears the session. Errors are only logged.
    pub async fn disconnect(&mut self) {
        debug!("[{}] Disconnecting", self.mac);
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.disconnect().await {
                warn!("[{}] Disconnect failed: {}", self.mac, e);
            }
        }
        if let Some(task) = self.notification_task.take() {
            task.abort();
        }
        *self.session.session_key.write().await = None;
    }

    pub async fn is_connected(&self) -> bool {
        match &self.transport {
            Some(transport) => self.has_session().await && transport.is_connected().await,
            None => false,
        }
    }

    fn transport(&self) -> Result<&Arc<dyn MeshTransport>, AwoxError> {
        self.transport.as_ref().ok_or(AwoxError::NotConnected)
    }

    /// Changes the mesh name, password and long term key of the light.
    ///
    /// Returns true if the light accepted the new settings.
    pub async fn set_mesh(
        &mut self,
        new_mesh_name: &str,
        new_mesh_password: &str,
        new_mesh_long_term_key: &str,
    ) -> Result<bool> {
        let session_key = self
            .session
            .session_key
            .read()
            .await
            .ok_or(AwoxError::NotConnected)?;
        let transport = self.transport()?.clone();

        let packets = Auth::make_mesh_update_packets(
            &session_key,
            new_mesh_name.as_bytes(),
            new_mesh_password.as_bytes(),
            new_mesh_long_term_key.as_bytes(),
        )?;
        for packet in packets.iter() {
            transport
                .write(PAIR_CHAR_UUID, packet, WriteType::WithResponse)
                .await
                .context("Failed to write mesh settings")?;
        }

        sleep(MESH_SETTINGS_DELAY).await;
        let reply = transport
            .read(PAIR_CHAR_UUID)
            .await
            .context("Failed to read mesh settings reply")?;

        if reply.reply_code() == MESH_SETTINGS_ACCEPTED {
            self.mesh_name = new_mesh_name.as_bytes().to_vec();
            self.mesh_password = new_mesh_password.as_bytes().to_vec();
            info!("[{}] Mesh network settings accepted", self.mac);
            Ok(true)
        } else {
            info!(
                "[{}] Mesh network settings change failed: {}",
                self.mac,
                hex::encode(&reply)
            );
            Ok(false)
        }
    }

    /// Sets the mesh id. The light keeps answering to mesh id 0 as well.
    pub async fn set_mesh_id(&self, mesh_id: u16) -> Result<()> {
        self.write_command(C_MESH_ADDRESS, &mesh_id.to_le_bytes(), None)
            .await?;
        self.session.mesh_id.store(mesh_id, Ordering::SeqCst);
        Ok(())
    }

    /// Encrypts and writes a command to the command characteristic.
    ///
    /// # Arguments
    /// - `command`: The command opcode.
    /// - `data`: The command parameters.
    /// - `dest`: Destination mesh id. Defaults to this light's own mesh id.
    pub async fn write_command(&self, command: u8, data: &[u8], dest: Option<u16>) -> Result<()> {
        let session_key = self
            .session
            .session_key
            .read()
            .await
            .ok_or(AwoxError::NotConnected)?;
        let transport = self.transport()?;
        let dest = dest.unwrap_or_else(|| self.mesh_id());

        let packet = make_command_packet(
            &session_key,
            &self.mac_bytes,
            dest,
            command,
            data,
            &Auth::generate_sequence(),
        )?;

        info!(
            "[{}][{}] Writing command {:#04x} data {}",
            self.mac,
            dest,
            command,
            hex::encode(data)
        );
        if let Err(e) = transport
            .write(COMMAND_CHAR_UUID, &packet, WriteType::WithResponse)
            .await
        {
            if e.is_link_loss() {
                error!("[{}] Command failed, device is disconnected: {}", self.mac, e);
                *self.session.session_key.write().await = None;
                return Err(AwoxError::Disconnected(self.mac.clone()).into());
            }
            return Err(e).context("Failed to write command");
        }
        Ok(())
    }

    pub async fn on(&self, dest: Option<u16>) -> Result<()> {
        self.write_command(C_POWER, &[0x01], dest).await
    }

    pub async fn off(&self, dest: Option<u16>) -> Result<()> {
        self.write_command(C_POWER, &[0x00], dest).await
    }

    /// Sets the color, each component between 0 and 0xff.
    pub async fn set_color(&self, red: u8, green: u8, blue: u8, dest: Option<u16>) -> Result<()> {
        self.write_command(C_COLOR, &[0x04, red, green, blue], dest)
            .await
    }

    /// Brightness between 0x0a and 0x64.
    pub async fn set_color_brightness(&self, brightness: u8, dest: Option<u16>) -> Result<()> {
        self.write_command(C_COLOR_BRIGHTNESS, &[brightness], dest)
            .await
    }

    /// Brightness between 1 and 0x7f.
    pub async fn set_white_brightness(&self, brightness: u8, dest: Option<u16>) -> Result<()> {
        self.write_command(C_WHITE_BRIGHTNESS, &[brightness], dest)
            .await
    }

    /// Temperature between 0 and 0x7f.
    pub async fn set_white_temperature(&self, temperature: u8, dest: Option<u16>) -> Result<()> {
        self.write_command(C_WHITE_TEMPERATURE, &[temperature], dest)
            .await
    }

    pub async fn set_white(&self, temperature: u8, brightness: u8, dest: Option<u16>) -> Result<()> {
        self.set_white_temperature(temperature, dest).await?;
        self.set_white_brightness(brightness, dest).await
    }

    /// Starts one of the built-in color sequences, 0 to 6.
    pub async fn set_preset(&self, preset: u8, dest: Option<u16>) -> Result<()> {
        self.write_command(C_PRESET, &[preset], dest).await
    }

    /// How long each color of a sequence is shown, in milliseconds.
    pub async fn set_sequence_color_duration(&self, duration: u32, dest: Option<u16>) -> Result<()> {
        self.write_command(C_SEQUENCE_COLOR_DURATION, &duration.to_le_bytes(), dest)
            .await
    }

    /// Fade time between the colors of a sequence, in milliseconds.
    pub async fn set_sequence_fade_duration(&self, duration: u32, dest: Option<u16>) -> Result<()> {
        self.write_command(C_SEQUENCE_FADE_DURATION, &duration.to_le_bytes(), dest)
            .await
    }

    /// Asks the addressed node to report its status as a notification.
    pub async fn request_status(&self, dest: Option<u16>) -> Result<()> {
        self.write_command(C_GET_STATUS_SENT, &[0x10], dest).await
    }

    /// Restores the factory name and password. The light disconnects afterwards.
    pub async fn reset_mesh(&self) -> Result<()> {
        self.write_command(C_MESH_RESET, &[0x00], None).await
    }

    /// Reads and decrypts the status characteristic.
    ///
    /// Returns `None` when the checksum didn't match. A decoded status is also
    /// handled like a notification.
    pub async fn read_status(&self) -> Result<Option<Vec<u8>>> {
        let session_key = self
            .session
            .session_key
            .read()
            .await
            .ok_or(AwoxError::NotConnected)?;
        let packet = self
            .transport()?
            .read(STATUS_CHAR_UUID)
            .await
            .context("Failed to read status")?;

        let message = decrypt_packet(&session_key, &self.mac_bytes, &packet);
        match &message {
            Some(message) => {
                self.session
                    .apply_status(&self.mac, message, &self.status_tx)
                    .await;
            }
            None => debug!("[{}] Status read did not decrypt: {}", self.mac, hex::encode(&packet)),
        }
        Ok(message)
    }

    /// Requests this light's status and returns the first report that comes back.
    ///
    /// Uses the status read when it decodes, otherwise waits up to `wait` for a
    /// notification from this light. With mesh id 0 any report is taken.
    pub async fn query_status(&self, wait: Duration) -> Result<Option<LightStatus>> {
        let mut statuses = self.subscribe_status();
        self.request_status(None).await?;

        if let Some(status) = self
            .read_status()
            .await?
            .and_then(|message| LightStatus::parse(&message))
        {
            return Ok(Some(status));
        }

        let mesh_id = self.mesh_id();
        let reply = tokio::time::timeout(wait, async {
            loop {
                match statuses.recv().await {
                    Ok(status) if mesh_id == 0 || status.mesh_id == mesh_id => return Some(status),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await;

        match reply {
            Ok(status) => Ok(status),
            Err(_) => {
                debug!("[{}] No status report within {:?}", self.mac, wait);
                Ok(None)
            }
        }
    }

    async fn read_string(&self, characteristic: Uuid) -> Result<String> {
        let value = self
            .transport()?
            .read(characteristic)
            .await
            .with_context(|| format!("Failed to read characteristic {}", characteristic))?;
        let end = value
            .iter()
            .rposition(|b| *b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        Ok(String::from_utf8_lossy(&value[..end]).to_string())
    }

    pub async fn firmware_revision(&self) -> Result<String> {
        self.read_string(FIRMWARE_REVISION_CHAR_UUID).await
    }

    pub async fn hardware_revision(&self) -> Result<String> {
        self.read_string(HARDWARE_REVISION_CHAR_UUID).await
    }

    pub async fn model_number(&self) -> Result<String> {
        self.read_string(MODEL_NUMBER_CHAR_UUID).await
    }

    /// Uploads a new firmware. The light blinks green once it received the image.
    ///
    /// Returns the number of packets written, 0 for an empty file.
    pub async fn send_firmware<P: AsRef<Path>>(&self, firmware_path: P) -> Result<usize> {
        if !self.has_session().await {
            return Err(AwoxError::NotConnected.into());
        }
        let transport = self.transport()?;

        let image = FirmwareImage::load(firmware_path)?;
        let packets = image.packets();
        let total = packets.len();

        for (index, packet) in packets.iter().enumerate() {
            debug!(
                "[{}] Writing firmware packet {} of {}: {}",
                self.mac,
                index + 1,
                total,
                hex::encode(packet)
            );
            transport
                .write(OTA_CHAR_UUID, packet, WriteType::WithoutResponse)
                .await
                .with_context(|| format!("Failed to write firmware packet {}", index + 1))?;
            // The loader drops packets that arrive back to back.
            if index + 1 < total {
                sleep(OTA_PACKET_DELAY).await;
            }
        }

        info!("[{}] Firmware sent in {} packets", self.mac, total);
        Ok(total)
    }
}

impl Drop for MeshLight {
    fn drop(&mut self) {
        if let Some(task) = self.notification_task.take() {
            task.abort();
        }
    }
}

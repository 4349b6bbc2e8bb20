//! Keeps one light of the mesh connected as proxy and routes commands and
//! status reports for every registered device through it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::control_interface::{LightStatus, MeshLight};
use crate::error::AwoxError;
use crate::util::transport::TransportFactory;

/// Default period of the update loop.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);
/// Shortest period `run` accepts.
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

const EVENT_CHANNEL_CAPACITY: usize = 128;

fn stale_after() -> chrono::Duration {
    chrono::Duration::minutes(30)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshCredentials {
    pub name: String,
    pub password: String,
    pub long_term_key: String,
}

/// A node of the mesh, as known to the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct MeshDevice {
    pub mesh_id: u16,
    pub mac: Option<String>,
    pub name: String,
    pub last_update: Option<DateTime<Local>>,
    pub state: Option<LightStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// A registered device reported its state.
    Status(LightStatus),
    /// A device was silent for too long and its state is unknown again.
    Unavailable(u16),
    /// A proxy connection was established.
    Connected { mac: String, mesh_id: u16 },
    /// The proxy connection was dropped.
    Disconnected,
}

/// Diagnostics of the proxy connection.
#[derive(Debug, Clone, Serialize)]
pub struct MeshState {
    pub connected_device: Option<String>,
    pub connected_mesh_id: Option<u16>,
    pub last_connection: Option<DateTime<Local>>,
}

/// Commands the coordinator can relay to a mesh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshCommand {
    On,
    Off,
    Color(u8, u8, u8),
    ColorBrightness(u8),
    WhiteTemperature(u8),
    WhiteBrightness(u8),
}

impl MeshCommand {
    async fn apply(&self, light: &MeshLight, mesh_id: u16) -> Result<()> {
        let dest = Some(mesh_id);
        match *self {
            MeshCommand::On => light.on(dest).await,
            MeshCommand::Off => light.off(dest).await,
            MeshCommand::Color(r, g, b) => light.set_color(r, g, b, dest).await,
            MeshCommand::ColorBrightness(b) => light.set_color_brightness(b, dest).await,
            MeshCommand::WhiteTemperature(t) => light.set_white_temperature(t, dest).await,
            MeshCommand::WhiteBrightness(b) => light.set_white_brightness(b, dest).await,
        }
    }
}

impl fmt::Display for MeshCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeshCommand::On => "turn on",
            MeshCommand::Off => "turn off",
            MeshCommand::Color(..) => "set color",
            MeshCommand::ColorBrightness(_) => "set color brightness",
            MeshCommand::WhiteTemperature(_) => "set white temperature",
            MeshCommand::WhiteBrightness(_) => "set white brightness",
        };
        write!(f, "{}", name)
    }
}

/// Holds the connect-in-progress flag until dropped, so a cancelled connect releases it too.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl<'a> ConnectingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ConnectingGuard(flag))
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct MeshInner {
    credentials: MeshCredentials,
    factory: Arc<dyn TransportFactory>,
    devices: Mutex<BTreeMap<u16, MeshDevice>>,
    proxy: Mutex<Option<MeshLight>>,
    connecting: AtomicBool,
    last_connection: Mutex<Option<DateTime<Local>>>,
    status_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<MeshEvent>,
}

impl MeshInner {
    fn emit(&self, event: MeshEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    async fn handle_status(&self, status: LightStatus) {
        debug!("Mesh status callback {:?}", status);
        {
            let mut devices = self.devices.lock().await;
            match devices.get_mut(&status.mesh_id) {
                Some(device) => {
                    device.state = Some(status);
                    device.last_update = Some(Local::now());
                }
                None => {
                    info!("Status feedback of unknown device - [{}]", status.mesh_id);
                    return;
                }
            }
        }
        self.emit(MeshEvent::Status(status));
    }
}

/// Coordinator of one mesh network.
///
/// Cheap to clone; clones share the proxy connection and the device registry.
#[derive(Clone)]
pub struct AwoxMesh {
    inner: Arc<MeshInner>,
}

impl AwoxMesh {
    pub fn new(credentials: MeshCredentials, factory: Arc<dyn TransportFactory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        AwoxMesh {
            inner: Arc::new(MeshInner {
                credentials,
                factory,
                devices: Mutex::new(BTreeMap::new()),
                proxy: Mutex::new(None),
                connecting: AtomicBool::new(false),
                last_connection: Mutex::new(None),
                status_task: Mutex::new(None),
                events,
            }),
        }
    }

    pub fn credentials(&self) -> &MeshCredentials {
        &self.inner.credentials
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.inner.events.subscribe()
    }

    /// Adds a device. Devices without a MAC are reachable through the mesh but
    /// never picked as proxy.
    pub async fn register_device(&self, mesh_id: u16, mac: Option<String>, name: &str) {
        info!("Registered [{:?}] {} {}", mac, mesh_id, name);
        self.inner.devices.lock().await.insert(
            mesh_id,
            MeshDevice {
                mesh_id,
                mac,
                name: name.to_string(),
                last_update: None,
                state: None,
            },
        );
    }

    pub async fn devices(&self) -> Vec<MeshDevice> {
        self.inner.devices.lock().await.values().cloned().collect()
    }

    pub async fn device_state(&self, mesh_id: u16) -> Option<LightStatus> {
        self.inner
            .devices
            .lock()
            .await
            .get(&mesh_id)
            .and_then(|device| device.state)
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.load(Ordering::SeqCst)
    }

    pub async fn is_connected(&self) -> bool {
        match self.inner.proxy.lock().await.as_ref() {
            Some(light) => light.has_session().await,
            None => false,
        }
    }

    pub async fn state(&self) -> MeshState {
        let proxy = self.inner.proxy.lock().await;
        MeshState {
            connected_device: proxy.as_ref().map(|light| light.mac().to_string()),
            connected_mesh_id: proxy.as_ref().map(|light| light.mesh_id()),
            last_connection: *self.inner.last_connection.lock().await,
        }
    }

    /// Connects to the first registered device that accepts the mesh credentials.
    ///
    /// Returns at once if a proxy is connected or another caller is connecting.
    pub async fn connect_device(&self) {
        if self.is_connected().await {
            return;
        }
        let _connecting = match ConnectingGuard::acquire(&self.inner.connecting) {
            Some(guard) => guard,
            None => return,
        };

        let candidates: Vec<(u16, String)> = self
            .inner
            .devices
            .lock()
            .await
            .values()
            .filter_map(|device| device.mac.clone().map(|mac| (device.mesh_id, mac)))
            .collect();

        for (mesh_id, mac) in candidates {
            let mut light = match MeshLight::new(
                &mac,
                &self.inner.credentials.name,
                &self.inner.credentials.password,
                mesh_id,
            ) {
                Ok(light) => light,
                Err(e) => {
                    warn!("[{}] Skipping device [{:#}]", mac, e);
                    continue;
                }
            };

            info!("[{}] Trying to connect", mac);
            let opened = self.inner.factory.open(&mac).await;
            let result = match opened {
                Ok(transport) => light.connect(transport).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    info!("[{}] Connected", mac);
                    self.attach_proxy(light).await;
                    break;
                }
                Err(e) => warn!("[{}] Failed to connect, trying next device [{:#}]", mac, e),
            }
        }
    }

    async fn attach_proxy(&self, light: MeshLight) {
        let mut statuses = light.subscribe_status();
        let weak: Weak<MeshInner> = Arc::downgrade(&self.inner);
        let mac = light.mac().to_string();
        let mesh_id = light.mesh_id();

        let task = tokio::spawn(async move {
            loop {
                match statuses.recv().await {
                    Ok(status) => match weak.upgrade() {
                        Some(inner) => inner.handle_status(status).await,
                        None => break,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Status handling lagged, {} reports skipped", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self.inner.status_task.lock().await.replace(task) {
            previous.abort();
        }
        *self.inner.proxy.lock().await = Some(light);
        *self.inner.last_connection.lock().await = Some(Local::now());
        self.inner.emit(MeshEvent::Connected { mac, mesh_id });
    }

    /// Drops the proxy connection. The next update or command connects again.
    pub async fn disconnect(&self) {
        let light = self.inner.proxy.lock().await.take();
        if let Some(mut light) = light {
            light.disconnect().await;
            if let Some(task) = self.inner.status_task.lock().await.take() {
                task.abort();
            }
            self.inner.emit(MeshEvent::Disconnected);
        }
    }

    /// One round of the update loop: connect, expire silent devices, poll the proxy.
    pub async fn update(&self) {
        self.connect_device().await;

        let proxy_mesh_id = {
            let proxy = self.inner.proxy.lock().await;
            let connected = match proxy.as_ref() {
                Some(light) => light.has_session().await,
                None => false,
            };
            match proxy.as_ref() {
                Some(light) if connected => light.mesh_id(),
                _ => {
                    debug!(
                        "update: No connected device - Connection in progress [{}]",
                        self.is_connecting()
                    );
                    return;
                }
            }
        };

        let threshold = Local::now() - stale_after();
        let mut unavailable = Vec::new();
        {
            let mut devices = self.inner.devices.lock().await;
            for (mesh_id, device) in devices.iter_mut() {
                let stale = device
                    .last_update
                    .map_or(false, |last_update| last_update < threshold);
                if *mesh_id != proxy_mesh_id && stale {
                    device.state = None;
                    device.last_update = None;
                    unavailable.push(*mesh_id);
                }
            }
        }
        for mesh_id in unavailable {
            info!("[{}] No status for 30 minutes, marking unavailable", mesh_id);
            self.inner.emit(MeshEvent::Unavailable(mesh_id));
        }

        let result = {
            let proxy = self.inner.proxy.lock().await;
            match proxy.as_ref() {
                Some(light) => {
                    debug!("[{}] update: Read status", light.mac());
                    light.read_status().await.map(|_| ())
                }
                None => return,
            }
        };

        if let Err(e) = result {
            warn!("read_status failed [{:#}] disconnect and retry next run", e);
            self.disconnect().await;
        }
    }

    /// Spawns the periodic update loop.
    ///
    /// A `period` below [`MIN_UPDATE_INTERVAL`] is raised to it.
    pub fn run(&self, period: Duration) -> JoinHandle<()> {
        let period = if period < MIN_UPDATE_INTERVAL {
            warn!(
                "Update period {:?} is too short, using {:?}",
                period, MIN_UPDATE_INTERVAL
            );
            MIN_UPDATE_INTERVAL
        } else {
            period
        };
        let mesh = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                mesh.update().await;
            }
        })
    }

    /// Relays `command` to `mesh_id` through the proxy, connecting first if needed.
    pub async fn send(&self, mesh_id: u16, command: MeshCommand) -> Result<()> {
        self.connect_device().await;

        let result = {
            let proxy = self.inner.proxy.lock().await;
            let connected = match proxy.as_ref() {
                Some(light) => light.has_session().await,
                None => false,
            };
            match proxy.as_ref() {
                Some(light) if connected => command.apply(light, mesh_id).await,
                _ => {
                    error!(
                        "{}: No connected device - Connection in progress [{}]",
                        command,
                        self.is_connecting()
                    );
                    return Err(AwoxError::NotConnected.into());
                }
            }
        };

        if let Err(e) = result {
            self.disconnect().await;
            error!("Failed to {} [{}] - {:#}", command, mesh_id, e);
            return Err(e);
        }
        Ok(())
    }

    pub async fn on(&self, mesh_id: u16) -> Result<()> {
        self.send(mesh_id, MeshCommand::On).await
    }

    pub async fn off(&self, mesh_id: u16) -> Result<()> {
        self.send(mesh_id, MeshCommand::Off).await
    }

    pub async fn set_color(&self, mesh_id: u16, red: u8, green: u8, blue: u8) -> Result<()> {
        self.send(mesh_id, MeshCommand::Color(red, green, blue))
            .await
    }

    pub async fn set_color_brightness(&self, mesh_id: u16, brightness: u8) -> Result<()> {
        self.send(mesh_id, MeshCommand::ColorBrightness(brightness))
            .await
    }

    pub async fn set_white_temperature(&self, mesh_id: u16, temperature: u8) -> Result<()> {
        self.send(mesh_id, MeshCommand::WhiteTemperature(temperature))
            .await
    }

    pub async fn set_white_brightness(&self, mesh_id: u16, brightness: u8) -> Result<()> {
        self.send(mesh_id, MeshCommand::WhiteBrightness(brightness))
            .await
    }
}

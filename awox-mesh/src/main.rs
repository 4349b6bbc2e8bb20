use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use awox_mesh_lib::cloud::AwoxConnect;
use awox_mesh_lib::config::{DeviceConfig, MeshConfig};
use awox_mesh_lib::control_interface::MeshLight;
use awox_mesh_lib::led::led_color::{hs_to_rgb, CliColors, MAX_MIREDS, MIN_MIREDS, RGB};
use awox_mesh_lib::led::light::{MeshLightEntity, TurnOnParams};
use awox_mesh_lib::led::plug::MeshPlugEntity;
use awox_mesh_lib::mesh::{AwoxMesh, MeshEvent, DEFAULT_UPDATE_INTERVAL};
use awox_mesh_lib::util::auth::{DEFAULT_MESH_NAME, DEFAULT_MESH_PASSWORD};
use awox_mesh_lib::util::discovery::Discovery;
use awox_mesh_lib::util::traits::{
    COLOR_BRIGHTNESS_MAX, COLOR_BRIGHTNESS_MIN, PRESET_MAX, WHITE_BRIGHTNESS_MAX,
    WHITE_BRIGHTNESS_MIN, WHITE_TEMPERATURE_MAX, WHITE_TEMPERATURE_MIN,
};
use awox_mesh_lib::util::transport::{BtleplugTransportFactory, TransportFactory};

/// How long `device-call status` waits for the light to report.
const STATUS_WAIT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "awox_mesh",
    about = "Controls AwoX and Eglo Bluetooth mesh lights",
    version = "0.1.0"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Logs in to the AwoX cloud and writes the mesh config file
    #[clap(name = "login")]
    Login {
        #[clap(long)]
        username: String,

        #[clap(long)]
        password: String,

        /// Where to write the config, `.json` or YAML
        #[clap(long, default_value = "awox-mesh.yaml")]
        config: PathBuf,
    },
    /// Scans for AwoX lights in range
    #[clap(name = "discover")]
    Discover {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Search timeout in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 30000)]
        timeout: u64,

        /// Only report lights accepting the credentials of this config
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Adds a light to the mesh of a config file
    #[clap(name = "pair")]
    Pair {
        #[clap(long)]
        mac: String,

        #[clap(long)]
        config: PathBuf,
    },
    /// Subcommand for operations on a single light over a direct connection
    #[clap(name = "device-call")]
    DeviceCall {
        /// Sets the MAC address of the light
        #[clap(long)]
        mac: String,

        #[clap(long, default_value = DEFAULT_MESH_NAME)]
        mesh_name: String,

        #[clap(long, default_value = DEFAULT_MESH_PASSWORD)]
        mesh_password: String,

        #[clap(long, default_value_t = 0)]
        mesh_id: u16,

        /// Connection attempts before giving up
        #[clap(long, default_value_t = 3)]
        tries: usize,

        #[clap(subcommand)]
        action: DeviceAction,
    },
    /// Subcommand for operations routed through a proxy light of the mesh
    #[clap(name = "mesh")]
    Mesh {
        #[clap(long)]
        config: PathBuf,

        #[clap(subcommand)]
        action: MeshAction,
    },
}

/// Actions available under the `device-call` subcommand
#[derive(Subcommand)]
pub enum DeviceAction {
    #[clap(name = "on")]
    On,
    #[clap(name = "off")]
    Off,
    /// Sets the color by name, RGB components or hue and saturation
    #[clap(name = "set-color")]
    SetColor {
        #[clap(flatten)]
        color: ColorArgs,
    },
    #[clap(name = "color-brightness")]
    ColorBrightness {
        #[clap(value_parser = clap::value_parser!(u8).range(COLOR_BRIGHTNESS_MIN as i64..=COLOR_BRIGHTNESS_MAX as i64))]
        brightness: u8,
    },
    #[clap(name = "white-brightness")]
    WhiteBrightness {
        #[clap(value_parser = clap::value_parser!(u8).range(WHITE_BRIGHTNESS_MIN as i64..=WHITE_BRIGHTNESS_MAX as i64))]
        brightness: u8,
    },
    #[clap(name = "white-temperature")]
    WhiteTemperature {
        #[clap(value_parser = clap::value_parser!(u8).range(WHITE_TEMPERATURE_MIN as i64..=WHITE_TEMPERATURE_MAX as i64))]
        temperature: u8,
    },
    #[clap(name = "set-white")]
    SetWhite {
        #[clap(value_parser = clap::value_parser!(u8).range(WHITE_TEMPERATURE_MIN as i64..=WHITE_TEMPERATURE_MAX as i64))]
        temperature: u8,
        #[clap(value_parser = clap::value_parser!(u8).range(WHITE_BRIGHTNESS_MIN as i64..=WHITE_BRIGHTNESS_MAX as i64))]
        brightness: u8,
    },
    /// Starts one of the built-in color sequences
    #[clap(name = "preset")]
    Preset {
        #[clap(value_parser = clap::value_parser!(u8).range(0..=PRESET_MAX as i64))]
        preset: u8,
    },
    /// Time each color of a sequence is shown, in milliseconds
    #[clap(name = "sequence-color-duration")]
    SequenceColorDuration { duration: u32 },
    /// Fade time between the colors of a sequence, in milliseconds
    #[clap(name = "sequence-fade-duration")]
    SequenceFadeDuration { duration: u32 },
    /// Reads the current state of the light
    #[clap(name = "status")]
    Status {
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,
    },
    /// Prints model, firmware and hardware revision
    #[clap(name = "info")]
    Info {
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,
    },
    /// Moves the light to another mesh
    #[clap(name = "set-mesh")]
    SetMesh {
        #[clap(long)]
        name: String,
        #[clap(long)]
        password: String,
        #[clap(long)]
        key: String,
    },
    #[clap(name = "set-mesh-id")]
    SetMeshId { mesh_id: u16 },
    /// Returns the light to factory mesh settings
    #[clap(name = "reset-mesh")]
    ResetMesh,
    /// Uploads a firmware image over the air
    #[clap(name = "send-firmware")]
    SendFirmware { path: PathBuf },
}

/// Actions available under the `mesh` subcommand
#[derive(Subcommand)]
pub enum MeshAction {
    /// Keeps a proxy connected and prints every state change until Ctrl-C
    #[clap(name = "monitor")]
    Monitor {
        /// Seconds between update rounds
        #[clap(
            long,
            default_value_t = DEFAULT_UPDATE_INTERVAL.as_secs(),
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval: u64,
    },
    #[clap(name = "on")]
    On {
        #[clap(long)]
        mesh_id: u16,
    },
    #[clap(name = "off")]
    Off {
        #[clap(long)]
        mesh_id: u16,
    },
    #[clap(name = "color")]
    Color {
        #[clap(long)]
        mesh_id: u16,
        #[clap(flatten)]
        color: ColorArgs,
    },
    /// Brightness, 0..255
    #[clap(name = "brightness")]
    Brightness {
        #[clap(long)]
        mesh_id: u16,
        brightness: u8,
    },
    /// White temperature in mireds
    #[clap(name = "temperature")]
    Temperature {
        #[clap(long)]
        mesh_id: u16,
        #[clap(value_parser = clap::value_parser!(u16).range(MIN_MIREDS as i64..=MAX_MIREDS as i64))]
        mireds: u16,
    },
    /// Lists the devices of the config and whether they are supported
    #[clap(name = "list")]
    List {
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,
    },
}

#[derive(clap::Args)]
pub struct ColorArgs {
    /// The color by name
    #[clap(value_enum)]
    color: Option<CliColors>,

    /// Red component of the color (0-255)
    #[clap(short = 'r', long = "red")]
    red: Option<u8>,

    /// Green component of the color (0-255)
    #[clap(short = 'g', long = "green")]
    green: Option<u8>,

    /// Blue component of the color (0-255)
    #[clap(short = 'b', long = "blue")]
    blue: Option<u8>,

    /// Hue (0-360)
    #[clap(long)]
    hue: Option<f32>,

    /// Saturation (0-100)
    #[clap(long)]
    saturation: Option<f32>,
}

impl ColorArgs {
    fn to_rgb(&self) -> Result<RGB> {
        match (self.color, self.red, self.green, self.blue, self.hue, self.saturation) {
            (Some(color), None, None, None, None, None) => Ok(color.into()),
            (None, Some(red), Some(green), Some(blue), None, None) => Ok(RGB { red, green, blue }),
            (None, None, None, None, Some(hue), Some(saturation)) => Ok(hs_to_rgb(hue, saturation)),
            _ => Err(anyhow!("Invalid color specification")),
        }
    }
}

fn print_output<T: Serialize + std::fmt::Debug>(value: &T, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Plaintext => println!("{:#?}", value),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct DeviceInfo {
    model: String,
    firmware: String,
    hardware: String,
}

#[derive(Debug, Serialize)]
struct DeviceListEntry<'a> {
    #[serde(flatten)]
    device: &'a DeviceConfig,
    supported: bool,
}

/// Registers every supported device of the config with a new coordinator.
async fn build_mesh(config: &MeshConfig, factory: Arc<dyn TransportFactory>) -> AwoxMesh {
    let mesh = AwoxMesh::new(config.credentials(), factory);
    for device in config.supported_devices() {
        mesh.register_device(device.mesh_id, Some(device.mac.clone()), &device.name)
            .await;
    }
    mesh
}

fn find_device(config: &MeshConfig, mesh_id: u16) -> Result<&DeviceConfig> {
    config
        .supported_devices()
        .into_iter()
        .find(|device| device.mesh_id == mesh_id)
        .ok_or_else(|| anyhow!("No supported device with mesh id {} in config", mesh_id))
}

fn light_entity(mesh: &AwoxMesh, device: &DeviceConfig) -> Result<MeshLightEntity> {
    let device_type = device.parsed_type();
    if !device_type.is_light() {
        return Err(anyhow!("{} is not a light", device.name));
    }
    Ok(MeshLightEntity::new(
        mesh.clone(),
        device.mesh_id,
        Some(device.mac.clone()),
        &device.name,
        &device_type,
    ))
}

/// Turns a light or plug on or off through the mesh.
async fn switch(mesh: &AwoxMesh, device: &DeviceConfig, turn_on: bool) -> Result<()> {
    if device.parsed_type().is_plug() {
        let mut plug = MeshPlugEntity::new(
            mesh.clone(),
            device.mesh_id,
            Some(device.mac.clone()),
            &device.name,
        );
        if turn_on {
            plug.turn_on().await
        } else {
            plug.turn_off().await
        }
    } else {
        let mut light = light_entity(mesh, device)?;
        if turn_on {
            light.turn_on(TurnOnParams::default()).await
        } else {
            light.turn_off().await
        }
    }
}

async fn handle_device_call(mut light: MeshLight, action: DeviceAction) -> Result<()> {
    match action {
        DeviceAction::On => light.on(None).await?,
        DeviceAction::Off => light.off(None).await?,
        DeviceAction::SetColor { color } => {
            let rgb = color.to_rgb()?;
            light.set_color(rgb.red, rgb.green, rgb.blue, None).await?;
            println!("Color set to {:?}", rgb);
        }
        DeviceAction::ColorBrightness { brightness } => {
            light.set_color_brightness(brightness, None).await?
        }
        DeviceAction::WhiteBrightness { brightness } => {
            light.set_white_brightness(brightness, None).await?
        }
        DeviceAction::WhiteTemperature { temperature } => {
            light.set_white_temperature(temperature, None).await?
        }
        DeviceAction::SetWhite {
            temperature,
            brightness,
        } => light.set_white(temperature, brightness, None).await?,
        DeviceAction::Preset { preset } => light.set_preset(preset, None).await?,
        DeviceAction::SequenceColorDuration { duration } => {
            light.set_sequence_color_duration(duration, None).await?
        }
        DeviceAction::SequenceFadeDuration { duration } => {
            light.set_sequence_fade_duration(duration, None).await?
        }
        DeviceAction::Status { output } => {
            match light.query_status(STATUS_WAIT).await? {
                Some(status) => print_output(&status, output)?,
                None => println!("The light did not report its state"),
            }
        }
        DeviceAction::Info { output } => {
            let info = DeviceInfo {
                model: light.model_number().await?,
                firmware: light.firmware_revision().await?,
                hardware: light.hardware_revision().await?,
            };
            print_output(&info, output)?;
        }
        DeviceAction::SetMesh {
            name,
            password,
            key,
        } => {
            if light.set_mesh(&name, &password, &key).await? {
                println!("Mesh settings accepted");
            } else {
                return Err(anyhow!("The light refused the mesh settings"));
            }
        }
        DeviceAction::SetMeshId { mesh_id } => {
            light.set_mesh_id(mesh_id).await?;
            println!("Mesh id set to {}", mesh_id);
        }
        DeviceAction::ResetMesh => {
            light.reset_mesh().await?;
            println!("Mesh settings reset to factory defaults");
        }
        DeviceAction::SendFirmware { path } => {
            let packets = light.send_firmware(&path).await?;
            println!("Sent {} firmware packets", packets);
        }
    }

    light.disconnect().await;
    Ok(())
}

async fn monitor(mesh: AwoxMesh, interval: Duration) -> Result<()> {
    let mut events = mesh.subscribe();
    let update_loop = mesh.run(interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(MeshEvent::Status(status)) => println!(
                    "[{}] on: {} color mode: {} rgb: ({}, {}, {}) white: {}/{} color brightness: {}",
                    status.mesh_id,
                    status.state,
                    status.color_mode,
                    status.red,
                    status.green,
                    status.blue,
                    status.white_temperature,
                    status.white_brightness,
                    status.color_brightness
                ),
                Ok(MeshEvent::Unavailable(mesh_id)) => println!("[{}] unavailable", mesh_id),
                Ok(MeshEvent::Connected { mac, mesh_id }) => {
                    println!("Connected to proxy {} [{}]", mac, mesh_id)
                }
                Ok(MeshEvent::Disconnected) => println!("Proxy disconnected"),
                Err(RecvError::Lagged(skipped)) => info!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    update_loop.abort();
    mesh.disconnect().await;
    Ok(())
}

async fn handle_mesh(config_path: &Path, action: MeshAction) -> Result<()> {
    let config = MeshConfig::load(config_path)?;

    if let MeshAction::List { output } = action {
        let entries: Vec<DeviceListEntry> = config
            .devices
            .iter()
            .map(|device| DeviceListEntry {
                device,
                supported: device.parsed_type().is_supported(),
            })
            .collect();
        match output {
            OutputFormat::Plaintext => {
                for entry in entries {
                    println!(
                        "{:>5}  {:<17}  {:<24}  {:<36}  {}",
                        entry.device.mesh_id,
                        entry.device.mac,
                        entry.device.name,
                        entry.device.device_type,
                        if entry.supported { "supported" } else { "unsupported" }
                    );
                }
            }
            other => print_output(&entries, other)?,
        }
        return Ok(());
    }

    let mesh = build_mesh(&config, Arc::new(BtleplugTransportFactory::default())).await;

    match action {
        MeshAction::Monitor { interval } => monitor(mesh.clone(), Duration::from_secs(interval)).await?,
        MeshAction::On { mesh_id } => switch(&mesh, find_device(&config, mesh_id)?, true).await?,
        MeshAction::Off { mesh_id } => switch(&mesh, find_device(&config, mesh_id)?, false).await?,
        MeshAction::Color { mesh_id, color } => {
            let mut light = light_entity(&mesh, find_device(&config, mesh_id)?)?;
            light
                .turn_on(TurnOnParams {
                    rgb_color: Some(color.to_rgb()?),
                    ..Default::default()
                })
                .await?;
        }
        MeshAction::Brightness {
            mesh_id,
            brightness,
        } => {
            let mut light = light_entity(&mesh, find_device(&config, mesh_id)?)?;
            light
                .turn_on(TurnOnParams {
                    brightness: Some(brightness),
                    ..Default::default()
                })
                .await?;
        }
        MeshAction::Temperature { mesh_id, mireds } => {
            let mut light = light_entity(&mesh, find_device(&config, mesh_id)?)?;
            light
                .turn_on(TurnOnParams {
                    color_temp: Some(mireds),
                    ..Default::default()
                })
                .await?;
        }
        MeshAction::List { .. } => {}
    }

    mesh.disconnect().await;
    Ok(())
}

async fn handle_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Login {
            username,
            password,
            config,
        } => {
            let connect = AwoxConnect::connect(&username, &password).await?;
            let mesh_config = MeshConfig::from_cloud(&connect).await?;
            mesh_config.save(&config)?;
            println!(
                "Found {} devices, {} supported. Config written to {}",
                mesh_config.devices.len(),
                mesh_config.supported_devices().len(),
                config.display()
            );
        }
        Commands::Discover {
            output,
            timeout,
            config,
        } => {
            let timeout = Duration::from_millis(timeout);
            match config {
                Some(path) => {
                    let config = MeshConfig::load(&path)?;
                    let devices = Discovery::find_available_devices(
                        &config.mesh_name,
                        &config.mesh_password,
                        timeout,
                        &BtleplugTransportFactory::default(),
                    )
                    .await?;
                    match output {
                        OutputFormat::Plaintext => {
                            for device in devices {
                                println!("{}  {}", device.mac, device.model);
                            }
                        }
                        other => print_output(&devices, other)?,
                    }
                }
                None => {
                    let devices = Discovery::find_devices(timeout).await?;
                    match output {
                        OutputFormat::Plaintext => {
                            Discovery::pretty_print_devices(&devices);
                        }
                        OutputFormat::Json => {
                            let json = serde_json::to_string(&devices)?;
                            println!("{}", json);
                        }
                        OutputFormat::Yaml => {
                            let yaml = serde_yaml::to_string(&devices)?;
                            println!("{}", yaml);
                        }
                    }
                }
            }
        }
        Commands::Pair { mac, config } => {
            let config = MeshConfig::load(&config)?;
            let added = Discovery::connect_device(
                &mac,
                &config.mesh_name,
                &config.mesh_password,
                Some(&config.mesh_key),
                &BtleplugTransportFactory::default(),
            )
            .await?;
            if added {
                println!("{} is part of mesh {}", mac, config.mesh_name);
            } else {
                return Err(anyhow!("{} refused the mesh credentials", mac));
            }
        }
        Commands::DeviceCall {
            mac,
            mesh_name,
            mesh_password,
            mesh_id,
            tries,
            action,
        } => {
            let mut light = MeshLight::new(&mac, &mesh_name, &mesh_password, mesh_id)?;
            light
                .connect_with_retry(tries, &BtleplugTransportFactory::default())
                .await?;
            handle_device_call(light, action).await?;
        }
        Commands::Mesh { config, action } => handle_mesh(&config, action).await?,
    }

    Ok(())
}

use std::collections::BTreeSet;

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::control_interface::LightStatus;
use crate::led::led_color::{
    convert_to_u8, convert_value_to_available_range, MAX_MIREDS, MIN_MIREDS, RGB,
};
use crate::mesh::{AwoxMesh, MeshEvent};
use crate::util::device_type::DeviceType;
use crate::util::traits::{
    COLOR_BRIGHTNESS_MAX, COLOR_BRIGHTNESS_MIN, WHITE_BRIGHTNESS_MAX, WHITE_BRIGHTNESS_MIN,
    WHITE_TEMPERATURE_MAX, WHITE_TEMPERATURE_MIN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColorMode {
    OnOff,
    Brightness,
    ColorTemp,
    Rgb,
}

/// Partial state change, from a light report or applied optimistically after a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub state: Option<bool>,
    pub color_mode: Option<bool>,
    pub red: Option<u8>,
    pub green: Option<u8>,
    pub blue: Option<u8>,
    pub white_temperature: Option<u8>,
    pub white_brightness: Option<u8>,
    pub color_brightness: Option<u8>,
}

impl From<LightStatus> for StatusUpdate {
    fn from(status: LightStatus) -> Self {
        StatusUpdate {
            state: Some(status.state),
            color_mode: Some(status.color_mode),
            red: Some(status.red),
            green: Some(status.green),
            blue: Some(status.blue),
            white_temperature: Some(status.white_temperature),
            white_brightness: Some(status.white_brightness),
            color_brightness: Some(status.color_brightness),
        }
    }
}

/// Attributes of a turn on request, in host units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnOnParams {
    pub rgb_color: Option<RGB>,
    /// 0..255
    pub brightness: Option<u8>,
    /// Mireds, 153..370
    pub color_temp: Option<u16>,
}

/// Supported color modes announced by a cloud type string.
pub fn supported_color_modes(device_type: &DeviceType) -> BTreeSet<ColorMode> {
    let mut modes = BTreeSet::new();
    if device_type.color {
        modes.insert(ColorMode::Rgb);
    }
    if device_type.temperature {
        modes.insert(ColorMode::ColorTemp);
    }
    if device_type.dimming {
        modes.insert(ColorMode::Brightness);
    }
    if modes.is_empty() {
        modes.insert(ColorMode::OnOff);
    }
    modes
}

/// A light of the mesh, in the shape a home automation host expects.
pub struct MeshLightEntity {
    mesh: AwoxMesh,
    mesh_id: u16,
    mac: Option<String>,
    name: String,
    supported_color_modes: BTreeSet<ColorMode>,
    color_mode: Option<ColorMode>,

    state: Option<bool>,
    red: Option<u8>,
    green: Option<u8>,
    blue: Option<u8>,
    white_temperature: Option<u8>,
    white_brightness: Option<u8>,
    color_brightness: Option<u8>,
}

impl MeshLightEntity {
    pub fn new(
        mesh: AwoxMesh,
        mesh_id: u16,
        mac: Option<String>,
        name: &str,
        device_type: &DeviceType,
    ) -> Self {
        MeshLightEntity {
            mesh,
            mesh_id,
            mac,
            name: name.to_string(),
            supported_color_modes: supported_color_modes(device_type),
            color_mode: None,
            state: None,
            red: None,
            green: None,
            blue: None,
            white_temperature: None,
            white_brightness: None,
            color_brightness: None,
        }
    }

    /// Registers the light with the mesh coordinator.
    pub async fn register(&self) {
        self.mesh
            .register_device(self.mesh_id, self.mac.clone(), &self.name)
            .await;
    }

    pub fn unique_id(&self) -> String {
        format!("awoxmesh-{}", self.mesh_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh_id(&self) -> u16 {
        self.mesh_id
    }

    pub fn supported_color_modes(&self) -> &BTreeSet<ColorMode> {
        &self.supported_color_modes
    }

    pub fn color_mode(&self) -> Option<ColorMode> {
        self.color_mode
    }

    pub fn available(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_on(&self) -> bool {
        self.state.unwrap_or(false)
    }

    pub fn min_mireds(&self) -> u16 {
        MIN_MIREDS
    }

    pub fn max_mireds(&self) -> u16 {
        MAX_MIREDS
    }

    pub fn rgb_color(&self) -> Option<RGB> {
        match (self.red, self.green, self.blue) {
            (Some(red), Some(green), Some(blue)) => Some(RGB { red, green, blue }),
            _ => None,
        }
    }

    /// Color temperature in mireds.
    pub fn color_temp(&self) -> Option<u16> {
        self.white_temperature.map(|t| {
            convert_value_to_available_range(
                t as f64,
                WHITE_TEMPERATURE_MIN as f64,
                WHITE_TEMPERATURE_MAX as f64,
                MIN_MIREDS as f64,
                MAX_MIREDS as f64,
            ) as u16
        })
    }

    /// Brightness 0..255, from the color brightness in RGB mode and the white brightness otherwise.
    pub fn brightness(&self) -> Option<u8> {
        if self.color_mode != Some(ColorMode::Rgb) {
            return self.white_brightness.map(|b| {
                convert_to_u8(
                    b as f64,
                    WHITE_BRIGHTNESS_MIN as f64,
                    WHITE_BRIGHTNESS_MAX as f64,
                    0,
                    255,
                )
            });
        }
        self.color_brightness.map(|b| {
            convert_to_u8(
                b as f64,
                COLOR_BRIGHTNESS_MIN as f64,
                COLOR_BRIGHTNESS_MAX as f64,
                0,
                255,
            )
        })
    }

    pub async fn turn_on(&mut self, params: TurnOnParams) -> Result<()> {
        debug!("[{}] Turn on {:?}", self.unique_id(), params);
        let mut update = StatusUpdate::default();

        if let Some(rgb) = params.rgb_color {
            self.mesh
                .set_color(self.mesh_id, rgb.red, rgb.green, rgb.blue)
                .await?;
            update.red = Some(rgb.red);
            update.green = Some(rgb.green);
            update.blue = Some(rgb.blue);
            update.state = Some(true);
        }

        if let Some(brightness) = params.brightness {
            update.state = Some(true);
            if self.color_mode != Some(ColorMode::Rgb) {
                let device_brightness = convert_to_u8(
                    brightness as f64,
                    0.0,
                    255.0,
                    WHITE_BRIGHTNESS_MIN,
                    WHITE_BRIGHTNESS_MAX,
                );
                self.mesh
                    .set_white_brightness(self.mesh_id, device_brightness)
                    .await?;
                update.white_brightness = Some(device_brightness);
            } else {
                let device_brightness = convert_to_u8(
                    brightness as f64,
                    0.0,
                    255.0,
                    COLOR_BRIGHTNESS_MIN,
                    COLOR_BRIGHTNESS_MAX,
                );
                self.mesh
                    .set_color_brightness(self.mesh_id, device_brightness)
                    .await?;
                update.color_brightness = Some(device_brightness);
            }
        }

        if let Some(mireds) = params.color_temp {
            let device_white_temp = convert_to_u8(
                mireds as f64,
                MIN_MIREDS as f64,
                MAX_MIREDS as f64,
                WHITE_TEMPERATURE_MIN,
                WHITE_TEMPERATURE_MAX,
            );
            self.mesh
                .set_white_temperature(self.mesh_id, device_white_temp)
                .await?;
            update.state = Some(true);
            update.white_temperature = Some(device_white_temp);
        }

        if update.state.is_none() {
            self.mesh.on(self.mesh_id).await?;
            update.state = Some(true);
        }

        self.apply_update(update);
        Ok(())
    }

    pub async fn turn_off(&mut self) -> Result<()> {
        debug!("[{}] Turn off", self.unique_id());
        self.mesh.off(self.mesh_id).await?;
        self.apply_update(StatusUpdate {
            state: Some(false),
            ..Default::default()
        });
        Ok(())
    }

    pub fn apply_status(&mut self, status: LightStatus) {
        self.apply_update(status.into());
    }

    /// Applies the fields present in `update` and resolves the color mode.
    pub fn apply_update(&mut self, update: StatusUpdate) {
        if update.state.is_some() {
            self.state = update.state;
        }
        if update.white_brightness.is_some() {
            self.white_brightness = update.white_brightness;
        }
        if update.white_temperature.is_some() {
            self.white_temperature = update.white_temperature;
        }
        if update.color_brightness.is_some() {
            self.color_brightness = update.color_brightness;
        }
        if update.red.is_some() {
            self.red = update.red;
        }
        if update.green.is_some() {
            self.green = update.green;
        }
        if update.blue.is_some() {
            self.blue = update.blue;
        }

        if let Some(color_mode) = update.color_mode {
            self.color_mode = Some(if color_mode {
                ColorMode::Rgb
            } else if self.supported_color_modes.contains(&ColorMode::ColorTemp) {
                ColorMode::ColorTemp
            } else if self.supported_color_modes.contains(&ColorMode::Brightness) {
                ColorMode::Brightness
            } else {
                ColorMode::OnOff
            });
        }

        debug!(
            "[{}][{}] mode[{:?}] Status update: {:?}",
            self.unique_id(),
            self.name,
            self.color_mode,
            update
        );
    }

    /// The state is unknown again, the light shows as unavailable.
    pub fn mark_unavailable(&mut self) {
        self.state = None;
    }

    /// Feeds a coordinator event to the light. Events for other mesh ids are ignored.
    pub fn handle_event(&mut self, event: &MeshEvent) {
        match event {
            MeshEvent::Status(status) if status.mesh_id == self.mesh_id => self.apply_status(*status),
            MeshEvent::Unavailable(mesh_id) if *mesh_id == self.mesh_id => self.mark_unavailable(),
            _ => {}
        }
    }
}

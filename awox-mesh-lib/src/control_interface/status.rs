use serde::{Deserialize, Serialize};

use crate::util::traits::{C_GET_STATUS_RECEIVED, C_NOTIFICATION_RECEIVED};

/// State of one mesh node, as reported by a status reply or notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightStatus {
    pub mesh_id: u16,
    pub state: bool,
    pub color_mode: bool,
    pub transition_mode: bool,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub white_temperature: u8,
    pub white_brightness: u8,
    pub color_brightness: u8,
}

impl LightStatus {
    /// Parses a decrypted status packet.
    ///
    /// Returns `None` for anything that isn't a status reply or notification.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let command = *data.get(7)?;
        match command {
            C_GET_STATUS_RECEIVED => {
                if data.len() < 17 {
                    return None;
                }
                let mesh_id = u16::from(data[4]) * 256 + u16::from(data[3]);
                Some(Self::from_fields(mesh_id, data[10], &data[11..13], &data[13..17]))
            }
            C_NOTIFICATION_RECEIVED => {
                if data.len() < 20 {
                    return None;
                }
                let mesh_id = u16::from(data[19]) * 256 + u16::from(data[10]);
                Some(Self::from_fields(mesh_id, data[12], &data[13..15], &data[15..19]))
            }
            _ => None,
        }
    }

    fn from_fields(mesh_id: u16, mode: u8, white: &[u8], color: &[u8]) -> Self {
        LightStatus {
            mesh_id,
            state: mode & 1 == 1,
            color_mode: (mode >> 1) & 1 == 1,
            transition_mode: (mode >> 2) & 1 == 1,
            white_brightness: white[0],
            white_temperature: white[1],
            color_brightness: color[0],
            red: color[1],
            green: color[2],
            blue: color[3],
        }
    }
}

use uuid::Uuid;

/// The reply code read back from the pair characteristic.
///
/// Only the first byte of the reply carries the code; a session reply is
/// followed by the 8 byte response random.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairReplyCode {
    pub code: u8,
    pub message: &'static str,
}

impl PairReplyCode {
    /// The pair request was accepted and the reply carries the light's random.
    pub fn is_ok(&self) -> bool {
        self.code == SESSION_ACCEPTED.code
    }

    pub fn is_error(&self) -> bool {
        !self.is_ok()
    }
}

/// Pair request accepted, session random follows.
pub const SESSION_ACCEPTED: PairReplyCode = PairReplyCode {
    code: 0x0d,
    message: "Session accepted",
};
/// Mesh name or password rejected.
pub const AUTH_ERROR: PairReplyCode = PairReplyCode {
    code: 0x0e,
    message: "Auth error",
};
/// New mesh name, password and long term key accepted.
pub const MESH_SETTINGS_ACCEPTED: PairReplyCode = PairReplyCode {
    code: 0x07,
    message: "Mesh settings accepted",
};
/// Anything else the light answers with.
pub const UNEXPECTED: PairReplyCode = PairReplyCode {
    code: 0xff,
    message: "Unexpected pair value",
};

pub trait PairReplyCodeTrait {
    fn reply_code(&self) -> PairReplyCode;

    fn map_reply_code(code: u8) -> PairReplyCode {
        match code {
            0x0d => SESSION_ACCEPTED,
            0x0e => AUTH_ERROR,
            0x07 => MESH_SETTINGS_ACCEPTED,
            _ => UNEXPECTED,
        }
    }
}

impl PairReplyCodeTrait for [u8] {
    fn reply_code(&self) -> PairReplyCode {
        match self.first() {
            Some(code) => Self::map_reply_code(*code),
            None => UNEXPECTED,
        }
    }
}

// Mesh name, password and long term key opcodes on the pair characteristic.
pub const P_MESH_NAME: u8 = 0x04;
pub const P_MESH_PASSWORD: u8 = 0x05;
pub const P_MESH_LONG_TERM_KEY: u8 = 0x06;

/// Set mesh groups. Data: 3 bytes.
pub const C_MESH_GROUP: u8 = 0xd7;
/// Set the mesh id. The light still answers to mesh id 0.
/// Data: the new mesh id, 2 bytes little endian.
pub const C_MESH_ADDRESS: u8 = 0xe0;
/// Restore factory name and password.
pub const C_MESH_RESET: u8 = 0xe3;
/// On/Off. Data: one byte 0 or 1.
pub const C_POWER: u8 = 0xd0;
/// Data: one byte.
pub const C_LIGHT_MODE: u8 = 0x33;
/// Data: one byte 0 to 6.
pub const C_PRESET: u8 = 0xc8;
/// White temperature. One byte 0 to 0x7f.
pub const C_WHITE_TEMPERATURE: u8 = 0xf0;
/// One byte 1 to 0x7f.
pub const C_WHITE_BRIGHTNESS: u8 = 0xf1;
/// 4 bytes: 0x04 red green blue.
pub const C_COLOR: u8 = 0xe2;
/// One byte 0x0a to 0x64.
pub const C_COLOR_BRIGHTNESS: u8 = 0xf2;
/// How long a color is displayed in a sequence, milliseconds as u32 little endian.
pub const C_SEQUENCE_COLOR_DURATION: u8 = 0xf5;
/// Fade duration between colors in a sequence, milliseconds as u32 little endian.
pub const C_SEQUENCE_FADE_DURATION: u8 = 0xf6;
/// 7 bytes.
pub const C_TIME: u8 = 0xe4;
/// 10 bytes.
pub const C_ALARMS: u8 = 0xe5;
/// Request the current light status.
pub const C_GET_STATUS_SENT: u8 = 0xda;
/// Reply to a status request.
pub const C_GET_STATUS_RECEIVED: u8 = 0xdb;
/// Unsolicited state notification.
pub const C_NOTIFICATION_RECEIVED: u8 = 0xdc;

pub const WHITE_BRIGHTNESS_MIN: u8 = 0x01;
pub const WHITE_BRIGHTNESS_MAX: u8 = 0x7f;
pub const WHITE_TEMPERATURE_MIN: u8 = 0x00;
pub const WHITE_TEMPERATURE_MAX: u8 = 0x7f;
pub const COLOR_BRIGHTNESS_MIN: u8 = 0x0a;
pub const COLOR_BRIGHTNESS_MAX: u8 = 0x64;
pub const PRESET_MAX: u8 = 6;

pub const PAIR_CHAR_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1914);
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1912);
pub const STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1911);
pub const OTA_CHAR_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1913);

// Device information service strings.
pub const MODEL_NUMBER_CHAR_UUID: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
pub const FIRMWARE_REVISION_CHAR_UUID: Uuid =
    Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);
pub const HARDWARE_REVISION_CHAR_UUID: Uuid =
    Uuid::from_u128(0x00002a27_0000_1000_8000_00805f9b34fb);

use rand::RngCore;

use crate::error::{ensure_max_16, AwoxError, AwoxResult};
use crate::util::packet::{make_mesh_setting_packet, make_pair_packet, make_session_key};
use crate::util::traits::{
    PairReplyCodeTrait, AUTH_ERROR, P_MESH_LONG_TERM_KEY, P_MESH_NAME, P_MESH_PASSWORD,
};

/// Factory mesh name of a light that was never added to a mesh.
pub const DEFAULT_MESH_NAME: &str = "unpaired";
/// Factory mesh password of a light that was never added to a mesh.
pub const DEFAULT_MESH_PASSWORD: &str = "1234";

pub struct Auth;

impl Auth {
    // Helper function to convert a MAC address string to bytes
    pub fn mac_to_bytes(mac: &str) -> AwoxResult<[u8; 6]> {
        let parts: Vec<&str> = mac.split(':').collect();
        if parts.len() != 6 {
            return Err(AwoxError::InvalidMac(mac.to_string()));
        }
        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            // from_str_radix alone takes "+f" and "00a"
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(AwoxError::InvalidMac(mac.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AwoxError::InvalidMac(mac.to_string()))?;
        }
        Ok(bytes)
    }

    pub fn generate_session_random() -> [u8; 8] {
        let mut random = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut random);
        random
    }

    pub fn generate_sequence() -> [u8; 3] {
        let mut seq = [0u8; 3];
        rand::thread_rng().fill_bytes(&mut seq);
        seq
    }

    /// Creates the pair request for the given mesh credentials.
    ///
    /// Returns the session random, which is needed again to derive the session key,
    /// together with the packet for the pair characteristic.
    pub fn make_pair_request(
        mesh_name: &[u8],
        mesh_password: &[u8],
    ) -> AwoxResult<([u8; 8], [u8; 17])> {
        ensure_max_16("mesh_name", mesh_name)?;
        ensure_max_16("mesh_password", mesh_password)?;
        let session_random = Self::generate_session_random();
        let packet = make_pair_packet(mesh_name, mesh_password, &session_random)?;
        Ok((session_random, packet))
    }

    /// Checks the reply read from the pair characteristic and derives the session key.
    pub fn session_key_from_reply(
        mesh_name: &[u8],
        mesh_password: &[u8],
        session_random: &[u8; 8],
        reply: &[u8],
    ) -> AwoxResult<[u8; 16]> {
        let code = reply.reply_code();
        if code.is_ok() {
            if reply.len() < 9 {
                return Err(AwoxError::UnexpectedPairReply(hex::encode(reply)));
            }
            return make_session_key(mesh_name, mesh_password, session_random, &reply[1..9]);
        }

        if code == AUTH_ERROR {
            Err(AwoxError::AuthFailed)
        } else {
            Err(AwoxError::UnexpectedPairReply(hex::encode(reply)))
        }
    }

    /// The three pair characteristic writes that move a light to a new mesh.
    pub fn make_mesh_update_packets(
        session_key: &[u8; 16],
        new_mesh_name: &[u8],
        new_mesh_password: &[u8],
        new_mesh_long_term_key: &[u8],
    ) -> AwoxResult<[Vec<u8>; 3]> {
        ensure_max_16("new_mesh_name", new_mesh_name)?;
        ensure_max_16("new_mesh_password", new_mesh_password)?;
        ensure_max_16("new_mesh_long_term_key", new_mesh_long_term_key)?;

        Ok([
            make_mesh_setting_packet(P_MESH_NAME, session_key, new_mesh_name)?,
            make_mesh_setting_packet(P_MESH_PASSWORD, session_key, new_mesh_password)?,
            make_mesh_setting_packet(P_MESH_LONG_TERM_KEY, session_key, new_mesh_long_term_key)?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_to_bytes() {
        assert_eq!(
            Auth::mac_to_bytes("A4:C1:38:0a:0B:ff").unwrap(),
            [0xa4, 0xc1, 0x38, 0x0a, 0x0b, 0xff]
        );
        assert!(Auth::mac_to_bytes("A4:C1:38").is_err());
        assert!(Auth::mac_to_bytes("A4:C1:38:0a:0B:zz").is_err());
    }

    #[test]
    fn test_mac_to_bytes_needs_two_hex_digits_per_octet() {
        for mac in [
            "+f:C1:38:00:00:01",
            "A4:C1:38:00:00:00a",
            "A4:C1:38:00:00:a",
            "A4:C1:38:00::01",
            "A4:C1:38:00:00:-1",
        ] {
            assert!(
                matches!(Auth::mac_to_bytes(mac), Err(AwoxError::InvalidMac(_))),
                "{} should be rejected",
                mac
            );
        }
    }

    #[test]
    fn test_generate_session_random() {
        assert_ne!(Auth::generate_session_random(), Auth::generate_session_random());
    }

    #[test]
    fn test_session_key_from_reply() {
        let random = [1u8; 8];
        let mut reply = vec![0x0d];
        reply.extend_from_slice(&[2u8; 8]);
        let key = Auth::session_key_from_reply(b"mesh", b"pass", &random, &reply).unwrap();
        assert_eq!(key, make_session_key(b"mesh", b"pass", &random, &[2u8; 8]).unwrap());

        assert!(matches!(
            Auth::session_key_from_reply(b"mesh", b"pass", &random, &[0x0e]),
            Err(AwoxError::AuthFailed)
        ));
        assert!(matches!(
            Auth::session_key_from_reply(b"mesh", b"pass", &random, &[0x0d, 1, 2]),
            Err(AwoxError::UnexpectedPairReply(_))
        ));
        assert!(matches!(
            Auth::session_key_from_reply(b"mesh", b"pass", &random, &[0x42]),
            Err(AwoxError::UnexpectedPairReply(_))
        ));
    }

    #[test]
    fn test_mesh_update_packets_opcodes() {
        let packets = Auth::make_mesh_update_packets(&[9u8; 16], b"name", b"pass", b"key").unwrap();
        assert_eq!(packets[0][0], P_MESH_NAME);
        assert_eq!(packets[1][0], P_MESH_PASSWORD);
        assert_eq!(packets[2][0], P_MESH_LONG_TERM_KEY);
        assert!(Auth::make_mesh_update_packets(&[9u8; 16], b"name", b"pass", &[0u8; 17]).is_err());
    }
}

use bytes::{BufMut, BytesMut};

use crate::error::{ensure_max_16, AwoxError, AwoxResult};
use crate::util::crypto::{crypt_payload, encrypt, make_checksum, pad16};

/// Length of every packet exchanged on the command and status characteristics.
pub const PACKET_LEN: usize = 20;
/// Plain payload length of a command packet (destination, opcode, vendor id, data).
pub const COMMAND_PAYLOAD_LEN: usize = 15;
/// Maximum number of parameter bytes a single command can carry.
pub const MAX_COMMAND_DATA: usize = COMMAND_PAYLOAD_LEN - 5;

/// Opcode of the pair request written to the pair characteristic.
pub const PAIR_REQUEST: u8 = 0x0c;

fn name_pass(mesh_name: &[u8], mesh_password: &[u8]) -> AwoxResult<[u8; 16]> {
    ensure_max_16("mesh_name", mesh_name)?;
    ensure_max_16("mesh_password", mesh_password)?;
    let name = pad16(mesh_name);
    let pass = pad16(mesh_password);
    let mut out = [0u8; 16];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = name[i] ^ pass[i];
    }
    Ok(out)
}

/// Builds the pair request: opcode, our session random, and proof of the mesh credentials.
pub fn make_pair_packet(
    mesh_name: &[u8],
    mesh_password: &[u8],
    session_random: &[u8; 8],
) -> AwoxResult<[u8; 17]> {
    let np = name_pass(mesh_name, mesh_password)?;
    let enc = encrypt(&pad16(session_random), &np)?;

    let mut packet = [0u8; 17];
    packet[0] = PAIR_REQUEST;
    packet[1..9].copy_from_slice(session_random);
    packet[9..17].copy_from_slice(&enc[..8]);
    Ok(packet)
}

/// Derives the session key from both randoms and the mesh credentials.
pub fn make_session_key(
    mesh_name: &[u8],
    mesh_password: &[u8],
    session_random: &[u8; 8],
    response_random: &[u8],
) -> AwoxResult<[u8; 16]> {
    if response_random.len() != 8 {
        return Err(AwoxError::InvalidPacket(format!(
            "response random must be 8 bytes, got {}",
            response_random.len()
        )));
    }
    let np = name_pass(mesh_name, mesh_password)?;
    let mut random = [0u8; 16];
    random[..8].copy_from_slice(session_random);
    random[8..].copy_from_slice(response_random);
    encrypt(&np, &random)
}

/// Builds an encrypted command packet.
///
/// # Arguments
/// - `key`: The session key.
/// - `mac`: The MAC address of the light we are connected to, in display order.
/// - `dest_id`: The mesh id the command is addressed to. 0 addresses every node.
/// - `command`: The command opcode.
/// - `data`: The command parameters, at most 10 bytes.
/// - `seq`: Sequence number. Only needs to differ between packets.
pub fn make_command_packet(
    key: &[u8; 16],
    mac: &[u8; 6],
    dest_id: u16,
    command: u8,
    data: &[u8],
    seq: &[u8; 3],
) -> AwoxResult<[u8; PACKET_LEN]> {
    if data.len() > MAX_COMMAND_DATA {
        return Err(AwoxError::TooLong {
            field: "command data",
            max: MAX_COMMAND_DATA,
            len: data.len(),
        });
    }

    // Build nonce
    let mut nonce = [0u8; 8];
    for (i, byte) in mac.iter().rev().take(4).enumerate() {
        nonce[i] = *byte;
    }
    nonce[4] = 0x01;
    nonce[5..].copy_from_slice(seq);

    // Build payload
    let mut payload = BytesMut::with_capacity(COMMAND_PAYLOAD_LEN);
    payload.put_u16_le(dest_id);
    payload.put_u8(command);
    payload.put_u8(0x60);
    payload.put_u8(0x01);
    payload.extend_from_slice(data);
    payload.resize(COMMAND_PAYLOAD_LEN, 0);

    let check = make_checksum(key, &nonce, &payload)?;
    let encrypted = crypt_payload(key, &nonce, &payload)?;

    let mut packet = [0u8; PACKET_LEN];
    packet[..3].copy_from_slice(seq);
    packet[3..5].copy_from_slice(&check[..2]);
    packet[5..].copy_from_slice(&encrypted);
    Ok(packet)
}

/// Decrypts a packet read from the status characteristic or received as notification.
///
/// Returns the packet with its payload decrypted, or `None` if the checksum didn't match.
pub fn decrypt_packet(key: &[u8; 16], mac: &[u8; 6], packet: &[u8]) -> Option<Vec<u8>> {
    if packet.len() < 7 {
        return None;
    }

    // Build nonce
    let mut nonce = [0u8; 8];
    for (i, byte) in mac.iter().rev().take(3).enumerate() {
        nonce[i] = *byte;
    }
    nonce[3..].copy_from_slice(&packet[..5]);

    let payload = crypt_payload(key, &nonce, &packet[7..]).ok()?;
    let check = make_checksum(key, &nonce, &payload).ok()?;

    if check[..2] != packet[5..7] {
        return None;
    }

    let mut decrypted = Vec::with_capacity(packet.len());
    decrypted.extend_from_slice(&packet[..7]);
    decrypted.extend_from_slice(&payload);
    Some(decrypted)
}

/// Encrypts one mesh setting (name, password or long term key) for the pair characteristic.
pub fn make_mesh_setting_packet(opcode: u8, key: &[u8; 16], value: &[u8]) -> AwoxResult<Vec<u8>> {
    let encrypted = encrypt(key, value)?;
    let mut packet = Vec::with_capacity(17);
    packet.push(opcode);
    packet.extend_from_slice(&encrypted);
    Ok(packet)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Encrypts a packet the way a light does before it hits the status characteristic.
    pub fn encrypt_status_packet(key: &[u8; 16], mac: &[u8; 6], plain: &[u8; PACKET_LEN]) -> [u8; PACKET_LEN] {
        let mut nonce = [0u8; 8];
        for (i, byte) in mac.iter().rev().take(3).enumerate() {
            nonce[i] = *byte;
        }
        nonce[3..].copy_from_slice(&plain[..5]);
        let payload = &plain[7..];
        let check = make_checksum(key, &nonce, payload).unwrap();
        let encrypted = crypt_payload(key, &nonce, payload).unwrap();

        let mut packet = [0u8; PACKET_LEN];
        packet[..5].copy_from_slice(&plain[..5]);
        packet[5..7].copy_from_slice(&check[..2]);
        packet[7..].copy_from_slice(&encrypted);
        packet
    }

    /// Decrypts a command packet the way a light does on the command characteristic.
    pub fn decrypt_command_packet(key: &[u8; 16], mac: &[u8; 6], packet: &[u8]) -> Option<Vec<u8>> {
        let mut nonce = [0u8; 8];
        for (i, byte) in mac.iter().rev().take(4).enumerate() {
            nonce[i] = *byte;
        }
        nonce[4] = 0x01;
        nonce[5..].copy_from_slice(&packet[..3]);
        let payload = crypt_payload(key, &nonce, &packet[5..]).ok()?;
        let check = make_checksum(key, &nonce, &payload).ok()?;
        if check[..2] != packet[3..5] {
            return None;
        }
        Some(payload)
    }
}

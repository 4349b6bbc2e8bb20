use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::error::{ensure_max_16, AwoxError, AwoxResult};

pub const BLOCK_SIZE: usize = 16;

/// Right-pads `value` with zeros to a full block.
pub fn pad16(value: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    let len = value.len().min(BLOCK_SIZE);
    block[..len].copy_from_slice(&value[..len]);
    block
}

/// AES-128 on a single block, with key, input and output in reversed byte order.
///
/// The lights do their AES on little endian blocks, so every block crossing the
/// cipher gets flipped on the way in and on the way out.
pub fn encrypt(key: &[u8], value: &[u8]) -> AwoxResult<[u8; BLOCK_SIZE]> {
    if key.len() != BLOCK_SIZE {
        return Err(AwoxError::InvalidPacket(format!(
            "encryption key must be {} bytes, got {}",
            BLOCK_SIZE,
            key.len()
        )));
    }
    ensure_max_16("value", value)?;

    let mut k = pad16(key);
    let mut val = pad16(value);
    k.reverse();
    val.reverse();

    let cipher = Aes128::new(GenericArray::from_slice(&k));
    let mut block = GenericArray::clone_from_slice(&val);
    cipher.encrypt_block(&mut block);

    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&block);
    out.reverse();
    Ok(out)
}

/// CBC-MAC style checksum over the plain payload.
pub fn make_checksum(key: &[u8], nonce: &[u8], payload: &[u8]) -> AwoxResult<[u8; BLOCK_SIZE]> {
    let mut base = Vec::with_capacity(BLOCK_SIZE);
    base.extend_from_slice(nonce);
    base.push(payload.len() as u8);
    let mut check = encrypt(key, &base)?;

    for chunk in payload.chunks(BLOCK_SIZE) {
        let chunk = pad16(chunk);
        for (c, p) in check.iter_mut().zip(chunk.iter()) {
            *c ^= p;
        }
        check = encrypt(key, &check)?;
    }

    Ok(check)
}

/// Counter mode keystream. Used for both encrypting and decrypting.
pub fn crypt_payload(key: &[u8], nonce: &[u8], payload: &[u8]) -> AwoxResult<Vec<u8>> {
    let mut base = [0u8; BLOCK_SIZE];
    let len = nonce.len().min(BLOCK_SIZE - 1);
    base[1..1 + len].copy_from_slice(&nonce[..len]);

    let mut result = Vec::with_capacity(payload.len());
    for chunk in payload.chunks(BLOCK_SIZE) {
        let enc_base = encrypt(key, &base)?;
        result.extend(chunk.iter().zip(enc_base.iter()).map(|(a, b)| a ^ b));
        base[0] = base[0].wrapping_add(1);
    }

    Ok(result)
}

/// CRC-16 with the reflected 0xA001 polynomial, as expected by the OTA loader.
pub fn crc16(data: &[u8]) -> u16 {
    const POLY: [u16; 2] = [0x0000, 0xa001];
    let mut crc: u16 = 0xffff;
    for &byte in data {
        let mut val = byte;
        for _ in 0..8 {
            let ind = ((crc ^ val as u16) & 0x1) as usize;
            crc = (crc >> 1) ^ POLY[ind];
            val >>= 1;
        }
    }
    crc
}

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};

use crate::error::{AwoxError, AwoxResult};
use crate::util::crypto::crc16;

/// Firmware bytes carried by a single OTA packet.
pub const OTA_CHUNK_SIZE: usize = 16;
/// Packet indexes are u16, so this is the largest image that can be sent.
pub const MAX_FIRMWARE_SIZE: usize = u16::MAX as usize * OTA_CHUNK_SIZE;

/// A firmware file, split up the way the OTA loader of the lights expects it.
pub struct FirmwareImage {
    pub data: Vec<u8>,
}

impl FirmwareImage {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open firmware file {}", path.display()))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .with_context(|| format!("Failed to read firmware file {}", path.display()))?;
        Ok(Self::from_bytes(data)?)
    }

    pub fn from_bytes(data: Vec<u8>) -> AwoxResult<Self> {
        if data.len() > MAX_FIRMWARE_SIZE {
            return Err(AwoxError::TooLong {
                field: "firmware image",
                max: MAX_FIRMWARE_SIZE,
                len: data.len(),
            });
        }
        Ok(FirmwareImage { data })
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of data packets, not counting the terminator.
    pub fn chunk_count(&self) -> usize {
        self.data.len().div_ceil(OTA_CHUNK_SIZE)
    }

    /// All OTA packets in write order.
    ///
    /// Every data packet is `index LE ++ chunk ++ crc16 LE`, with the last chunk
    /// padded with 0xff. The final packet only carries the chunk count and its crc.
    /// An empty image has no packets at all.
    pub fn packets(&self) -> Vec<Vec<u8>> {
        if self.is_empty() {
            return Vec::new();
        }

        let mut packets = Vec::with_capacity(self.chunk_count() + 1);
        for (index, chunk) in self.data.chunks(OTA_CHUNK_SIZE).enumerate() {
            let mut packet = BytesMut::with_capacity(2 + OTA_CHUNK_SIZE + 2);
            packet.put_u16_le(index as u16);
            packet.extend_from_slice(chunk);
            packet.resize(2 + OTA_CHUNK_SIZE, 0xff);
            let crc = crc16(&packet);
            packet.put_u16_le(crc);
            packets.push(packet.to_vec());
        }

        let mut last = BytesMut::with_capacity(4);
        last.put_u16_le(self.chunk_count() as u16);
        let crc = crc16(&last);
        last.put_u16_le(crc);
        packets.push(last.to_vec());

        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_packets_layout() {
        let image = FirmwareImage::from_bytes((0u8..20).collect()).unwrap();
        let packets = image.packets();
        assert_eq!(packets.len(), 3);

        assert_eq!(&packets[0][..2], &[0, 0]);
        assert_eq!(&packets[0][2..18], &(0u8..16).collect::<Vec<_>>()[..]);
        let crc = crc16(&packets[0][..18]);
        assert_eq!(&packets[0][18..], &crc.to_le_bytes());

        assert_eq!(&packets[1][..2], &[1, 0]);
        assert_eq!(&packets[1][2..6], &[16, 17, 18, 19]);
        assert!(packets[1][6..18].iter().all(|b| *b == 0xff));

        assert_eq!(&packets[2][..2], &[2, 0]);
        assert_eq!(&packets[2][2..], &crc16(&[2, 0]).to_le_bytes());
    }

    #[test]
    fn test_empty_image_has_no_packets() {
        assert!(FirmwareImage::from_bytes(Vec::new()).unwrap().packets().is_empty());
    }

    #[test]
    fn test_image_size_limit() {
        let largest = FirmwareImage::from_bytes(vec![0x55; MAX_FIRMWARE_SIZE]).unwrap();
        let packets = largest.packets();
        assert_eq!(packets.len(), u16::MAX as usize + 1);
        assert_eq!(&packets[u16::MAX as usize - 1][..2], &[0xfe, 0xff]);
        assert_eq!(&packets[u16::MAX as usize][..2], &[0xff, 0xff]);

        assert!(matches!(
            FirmwareImage::from_bytes(vec![0x55; MAX_FIRMWARE_SIZE + 1]),
            Err(AwoxError::TooLong { field: "firmware image", .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("awox-fw-{}.bin", uuid::Uuid::new_v4()));
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0xaa; 32]).unwrap();
        drop(file);

        let image = FirmwareImage::load(&path).unwrap();
        assert_eq!(image.chunk_count(), 2);
        assert_eq!(image.packets().len(), 3);
        std::fs::remove_file(path).unwrap();
    }
}

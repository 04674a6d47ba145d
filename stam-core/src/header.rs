//! Fixed 12-byte frame header.
//!
//! ```text
//! offset  size  field
//!  0      4     sync marker  ("StOr", read as little-endian u32)
//!  4      4     opcode       (u32 LE)
//!  8      2     payload len  (u16 LE)
//! 10      2     reserved     (written as 0, ignored on read)
//! ```

use crate::error::StamError;

/// Size of the encoded header in bytes.
pub const HEADER_SIZE: usize = 12;

/// Sync marker bytes as they appear on the wire.
pub const MAGIC_BYTES: [u8; 4] = *b"StOr";

/// Sync marker as a little-endian `u32`.
pub const MAGIC: u32 = u32::from_le_bytes(MAGIC_BYTES);

pub type FrameHeaderBytes = [u8; HEADER_SIZE];

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    opcode: u32,
    payload_length: u16,
    reserved: u16,
}

impl FrameHeader {
    pub fn new(opcode: u32, payload_length: u16) -> Self {
        Self {
            opcode,
            payload_length,
            reserved: 0,
        }
    }

    pub fn to_bytes(&self) -> FrameHeaderBytes {
        let mut header: FrameHeaderBytes = [0; HEADER_SIZE];
        header[0..4].copy_from_slice(&MAGIC_BYTES);
        header[4..8].copy_from_slice(&self.opcode.to_le_bytes());
        header[8..10].copy_from_slice(&self.payload_length.to_le_bytes());
        header[10..12].copy_from_slice(&self.reserved.to_le_bytes());
        header
    }

    /// Parse a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StamError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StamError::InvalidHeader("fewer than 12 header bytes"));
        }
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != MAGIC {
            return Err(StamError::InvalidMagic(magic));
        }
        Ok(Self {
            opcode: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            payload_length: u16::from_le_bytes([bytes[8], bytes[9]]),
            reserved: u16::from_le_bytes([bytes[10], bytes[11]]),
        })
    }

    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    pub fn payload_length(&self) -> u16 {
        self.payload_length
    }

    /// Header plus payload.
    pub fn frame_length(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("opcode", &format_args!("{:#010x}", self.opcode))
            .field("payload_length", &self.payload_length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_little_endian() {
        let bytes = FrameHeader::new(0x0003_0002, 0x0102).to_bytes();
        assert_eq!(&bytes[0..4], b"StOr");
        assert_eq!(&bytes[4..8], &[0x02, 0x00, 0x03, 0x00]);
        assert_eq!(&bytes[8..10], &[0x02, 0x01]);
        assert_eq!(&bytes[10..12], &[0, 0]);
    }

    #[test]
    fn parse_back() {
        let hdr = FrameHeader::new(0x1003_0002, 17);
        let parsed = FrameHeader::from_bytes(&hdr.to_bytes()).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(parsed.frame_length(), 29);
    }

    #[test]
    fn reserved_bytes_are_ignored() {
        let mut bytes = FrameHeader::new(1, 0).to_bytes();
        bytes[10] = 0xAA;
        bytes[11] = 0x55;
        let parsed = FrameHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.opcode(), 1);
    }

    #[test]
    fn wrong_magic_rejected() {
        let mut bytes = FrameHeader::new(1, 0).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(StamError::InvalidMagic(_))
        ));
    }

    #[test]
    fn short_input_rejected() {
        assert!(FrameHeader::from_bytes(&[0u8; 11]).is_err());
    }
}

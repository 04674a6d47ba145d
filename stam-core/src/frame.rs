//! A complete protocol frame: header + opaque payload.
//!
//! The payload is interpreted by [`crate::protocol`] according to the
//! opcode; this layer only knows about lengths and the sync marker.

use std::fmt::Debug;

use bytes::Bytes;

use crate::error::StamError;
use crate::header::{FrameHeader, HEADER_SIZE, MAGIC_BYTES};
use crate::message::OpCode;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Largest encoded frame.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    opcode: u32,
    payload: Bytes,
}

impl Message {
    pub fn new(opcode: u32, payload: impl Into<Bytes>) -> Result<Self, StamError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(StamError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { opcode, payload })
    }

    /// A frame with no payload.
    pub fn empty(opcode: u32) -> Self {
        Self {
            opcode,
            payload: Bytes::new(),
        }
    }

    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    /// The opcode, classified. Fails for values outside the closed set.
    pub fn kind(&self) -> Result<OpCode, StamError> {
        OpCode::try_from(self.opcode)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_length(&self) -> u16 {
        // Bounded by `new`.
        self.payload.len() as u16
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader::new(self.opcode, self.payload_length())
    }

    /// Encoded size on the wire.
    pub fn frame_length(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.frame_length());
        frame.extend_from_slice(&self.header().to_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    /// Build a frame from exactly one encoded message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StamError> {
        match try_decode(bytes) {
            Decoded::Complete { message, consumed } if consumed == bytes.len() => Ok(message),
            Decoded::Complete { .. } => Err(StamError::InvalidHeader(
                "trailing bytes after frame payload",
            )),
            Decoded::NeedMoreData => Err(StamError::InvalidHeader("truncated frame")),
            Decoded::Invalid(e) => Err(e),
        }
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Message");
        match OpCode::try_from(self.opcode) {
            Ok(op) => s.field("opcode", &op),
            Err(_) => s.field("opcode", &format_args!("{:#010x}", self.opcode)),
        };
        s.field("payload_length", &self.payload.len()).finish()
    }
}

/// Encode `opcode` + `payload` into a complete frame.
pub fn encode(opcode: u32, payload: &[u8]) -> Result<Vec<u8>, StamError> {
    Ok(Message::new(opcode, Bytes::copy_from_slice(payload))?.to_bytes())
}

// ── Decoding ─────────────────────────────────────────────────────

/// Outcome of [`try_decode`].
#[derive(Debug)]
pub enum Decoded {
    /// A full frame was found at the start of the input.
    Complete { message: Message, consumed: usize },
    /// The input is a valid prefix of a frame; more bytes are needed.
    NeedMoreData,
    /// The input does not start with a frame.
    Invalid(StamError),
}

/// Try to decode one frame from the start of `bytes`.
///
/// Pure: nothing is consumed unless the caller acts on `consumed`.
pub fn try_decode(bytes: &[u8]) -> Decoded {
    // A wrong marker is detectable before the header is complete.
    let marker_len = bytes.len().min(MAGIC_BYTES.len());
    if bytes[..marker_len] != MAGIC_BYTES[..marker_len] {
        let mut magic = [0u8; 4];
        magic[..marker_len].copy_from_slice(&bytes[..marker_len]);
        return Decoded::Invalid(StamError::InvalidMagic(u32::from_le_bytes(magic)));
    }
    if bytes.len() < HEADER_SIZE {
        return Decoded::NeedMoreData;
    }

    let header = match FrameHeader::from_bytes(bytes) {
        Ok(h) => h,
        Err(e) => return Decoded::Invalid(e),
    };
    let consumed = header.frame_length();
    if bytes.len() < consumed {
        return Decoded::NeedMoreData;
    }

    let payload = Bytes::copy_from_slice(&bytes[HEADER_SIZE..consumed]);
    Decoded::Complete {
        message: Message {
            opcode: header.opcode(),
            payload,
        },
        consumed,
    }
}

/// Offset of the first sync marker in `bytes` at or after `from`.
pub fn find_magic(bytes: &[u8], from: usize) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(MAGIC_BYTES.len())
        .position(|w| w == MAGIC_BYTES)
        .map(|p| p + from)
}

/// Number of trailing bytes of `bytes` that could be the start of a marker.
pub fn magic_prefix_suffix(bytes: &[u8]) -> usize {
    (1..MAGIC_BYTES.len())
        .rev()
        .find(|&n| n <= bytes.len() && bytes[bytes.len() - n..] == MAGIC_BYTES[..n])
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;

    fn decode_complete(bytes: &[u8]) -> (Message, usize) {
        match try_decode(bytes) {
            Decoded::Complete { message, consumed } => (message, consumed),
            other => panic!("expected complete frame, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_law() {
        let payloads: [&[u8]; 3] = [b"", b"1.2.3", &[0xAB; 300]];
        for payload in payloads {
            let op = Command::GetVersion.request_opcode();
            let bytes = encode(op, payload).unwrap();
            let (msg, consumed) = decode_complete(&bytes);
            assert_eq!(msg.opcode(), op);
            assert_eq!(msg.payload(), payload);
            assert_eq!(consumed, HEADER_SIZE + payload.len());
        }
    }

    #[test]
    fn max_payload_fits() {
        let msg = Message::new(7, vec![1u8; MAX_PAYLOAD_SIZE]).unwrap();
        assert_eq!(msg.payload_length(), u16::MAX);
        let (back, consumed) = decode_complete(&msg.to_bytes());
        assert_eq!(consumed, MAX_FRAME_SIZE);
        assert_eq!(back, msg);
    }

    #[test]
    fn oversized_payload_rejected() {
        let err = Message::new(7, vec![0u8; MAX_PAYLOAD_SIZE + 1]).unwrap_err();
        assert!(matches!(err, StamError::PayloadTooLarge { .. }));
    }

    #[test]
    fn short_header_needs_more() {
        let bytes = encode(1, b"abc").unwrap();
        for cut in 0..HEADER_SIZE {
            assert!(matches!(try_decode(&bytes[..cut]), Decoded::NeedMoreData));
        }
    }

    #[test]
    fn short_payload_needs_more() {
        let bytes = encode(1, b"abcdef").unwrap();
        assert!(matches!(
            try_decode(&bytes[..bytes.len() - 1]),
            Decoded::NeedMoreData
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(try_decode(b"XXXXXXXXXXXXXXXX"), Decoded::Invalid(_)));
        // Detected from the very first byte.
        assert!(matches!(try_decode(b"x"), Decoded::Invalid(_)));
    }

    #[test]
    fn only_first_frame_consumed() {
        let mut bytes = encode(1, b"one").unwrap();
        bytes.extend(encode(2, b"two").unwrap());
        let (msg, consumed) = decode_complete(&bytes);
        assert_eq!(msg.opcode(), 1);
        assert_eq!(consumed, HEADER_SIZE + 3);
    }

    #[test]
    fn from_bytes_rejects_trailing_data() {
        let mut bytes = encode(1, b"one").unwrap();
        assert!(Message::from_bytes(&bytes).is_ok());
        bytes.push(0);
        assert!(Message::from_bytes(&bytes).is_err());
    }

    #[test]
    fn find_magic_offsets() {
        let mut bytes = b"zz".to_vec();
        bytes.extend(encode(1, b"").unwrap());
        assert_eq!(find_magic(&bytes, 0), Some(2));
        assert_eq!(find_magic(&bytes, 3), None);
        assert_eq!(find_magic(b"", 0), None);
    }

    #[test]
    fn marker_prefix_at_end() {
        assert_eq!(magic_prefix_suffix(b"garbageStO"), 3);
        assert_eq!(magic_prefix_suffix(b"garbageS"), 1);
        assert_eq!(magic_prefix_suffix(b"garbage"), 0);
        assert_eq!(magic_prefix_suffix(b""), 0);
    }
}

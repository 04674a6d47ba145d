//! `tokio_util` codec for carrying frames over a byte stream.
//!
//! Uses the same resync rule as [`ReassemblyBuffer`]: bytes that do not
//! start with the sync marker are skipped up to the next marker instead of
//! failing the stream.
//!
//! [`ReassemblyBuffer`]: crate::buffer::ReassemblyBuffer

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::StamError;
use crate::frame::{Decoded, Message, find_magic, magic_prefix_suffix, try_decode};

#[derive(Debug, Default)]
pub struct StamCodec {
    discarded: u64,
}

impl StamCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Garbage bytes skipped so far.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }
}

impl Decoder for StamCodec {
    type Item = Message;
    type Error = StamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.is_empty() {
                return Ok(None);
            }
            match try_decode(src) {
                Decoded::Complete { message, consumed } => {
                    src.advance(consumed);
                    return Ok(Some(message));
                }
                Decoded::NeedMoreData => return Ok(None),
                Decoded::Invalid(reason) => {
                    let skip = match find_magic(src, 1) {
                        Some(offset) => offset,
                        None => src.len() - magic_prefix_suffix(src),
                    }
                    .max(1);
                    warn!(skipped = skip, %reason, "codec resync");
                    src.advance(skip);
                    self.discarded += skip as u64;
                }
            }
        }
    }
}

impl Encoder<Message> for StamCodec {
    type Error = StamError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.frame_length());
        dst.put_slice(&item.header().to_bytes());
        dst.put_slice(item.payload());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[tokio::test]
    async fn reads_frames_split_over_reads() {
        let a = encode(1, b"first").unwrap();
        let b = encode(2, b"second").unwrap();
        let mock = tokio_test::io::Builder::new()
            .read(&a[..5])
            .read(&a[5..])
            .read(b"garbage")
            .read(&b)
            .build();

        let mut framed = FramedRead::new(mock, StamCodec::new());
        let first = framed.next().await.unwrap().unwrap();
        assert_eq!(first.opcode(), 1);
        assert_eq!(first.payload(), b"first");
        let second = framed.next().await.unwrap().unwrap();
        assert_eq!(second.payload(), b"second");
        assert!(framed.next().await.is_none());
        assert_eq!(framed.decoder().discarded_bytes(), 7);
    }

    #[tokio::test]
    async fn writes_encoded_frames() {
        let msg = Message::new(0x0003_0002, b"1.2.3".to_vec()).unwrap();
        let expected = msg.to_bytes();
        let mock = tokio_test::io::Builder::new().write(&expected).build();

        let mut framed = FramedWrite::new(mock, StamCodec::new());
        framed.send(msg).await.unwrap();
    }

    #[test]
    fn partial_frame_waits() {
        let mut codec = StamCodec::new();
        let bytes = encode(4, b"abcd").unwrap();
        let mut src = BytesMut::from(&bytes[..10]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert_eq!(src.len(), 10);
        src.extend_from_slice(&bytes[10..]);
        assert_eq!(codec.decode(&mut src).unwrap().unwrap().opcode(), 4);
        assert!(src.is_empty());
    }
}

//! Reassembly of frames from an unreliable stream of byte chunks.
//!
//! UDP delivers whole datagrams, but a datagram may hold several frames,
//! a frame may be split over datagrams, and stray bytes can show up in
//! between. [`ReassemblyBuffer`] accepts the chunks in arrival order and
//! hands back complete [`Message`]s in the same order.
//!
//! # Resync
//!
//! When the bytes at the cursor do not start with the sync marker the
//! buffer scans forward one byte at a time (no alignment assumed) for the
//! next occurrence of the 4-byte marker and moves the cursor there. If the
//! rest of the buffer holds no marker, everything is dropped except up to
//! three trailing bytes that could be the beginning of a marker split over
//! two chunks. Skipped bytes are counted ([`discarded_bytes`]) and logged;
//! they never reach the caller.
//!
//! A marker that appears inside garbage and is followed by a length larger
//! than the data that will ever arrive keeps the buffer waiting. The
//! connection clears its buffer on teardown, so such a stall lasts at most
//! until the request timeout fires.
//!
//! [`discarded_bytes`]: ReassemblyBuffer::discarded_bytes

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::frame::{Decoded, Message, find_magic, magic_prefix_suffix, try_decode};

/// Consumed prefix size after which compaction is considered.
pub const COMPACT_THRESHOLD: usize = 4 * 1024;

/// Default cap on buffered, not yet decoded bytes (1 MiB).
pub const DEFAULT_MAX_BUFFERED: usize = 1024 * 1024;

#[derive(Debug)]
pub struct ReassemblyBuffer {
    /// Bytes received so far; `pending[..cursor]` is already consumed.
    pending: BytesMut,
    /// Read offset into `pending`.
    cursor: usize,
    /// Upper bound on `pending.len() - cursor`.
    max_buffered: usize,
    /// Garbage bytes skipped by resync since construction.
    discarded: u64,
    /// Frames handed out since construction.
    decoded: u64,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::with_max_buffered(DEFAULT_MAX_BUFFERED)
    }

    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(8 * 1024),
            cursor: 0,
            max_buffered,
            discarded: 0,
            decoded: 0,
        }
    }

    /// Append a received chunk. No parsing happens here.
    ///
    /// If the chunk would push the undecoded backlog past the configured
    /// cap, the backlog is dropped first.
    pub fn append(&mut self, chunk: &[u8]) {
        if self.len() + chunk.len() > self.max_buffered {
            warn!(
                backlog = self.len(),
                chunk = chunk.len(),
                max = self.max_buffered,
                "reassembly backlog over limit, dropping buffered bytes"
            );
            self.discarded += self.len() as u64;
            self.clear();
        }
        self.pending.extend_from_slice(chunk);
    }

    /// Return the next complete frame, or `None` if more data is needed.
    ///
    /// `None` leaves the cursor where it was (apart from skipped garbage),
    /// so the call can simply be repeated after the next [`append`].
    ///
    /// [`append`]: Self::append
    pub fn next_message(&mut self) -> Option<Message> {
        loop {
            let window = &self.pending[self.cursor..];
            if window.is_empty() {
                self.compact();
                return None;
            }
            match try_decode(window) {
                Decoded::Complete { message, consumed } => {
                    self.cursor += consumed;
                    self.decoded += 1;
                    trace!(?message, consumed, "frame reassembled");
                    self.compact();
                    return Some(message);
                }
                Decoded::NeedMoreData => return None,
                Decoded::Invalid(reason) => self.resync(&reason.to_string()),
            }
        }
    }

    /// Drain every frame currently available.
    pub fn drain_messages(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.next_message()).collect()
    }

    /// Skip forward to the next candidate sync marker.
    fn resync(&mut self, reason: &str) {
        let window = &self.pending[self.cursor..];
        let skip = match find_magic(window, 1) {
            Some(offset) => offset,
            None => window.len() - magic_prefix_suffix(window),
        };
        // An invalid window never is a marker prefix, so skip >= 1.
        let skip = skip.max(1);
        warn!(skipped = skip, reason, "discarding bytes while resyncing");
        self.cursor += skip;
        self.discarded += skip as u64;
    }

    /// Release the consumed prefix once it is large enough to matter.
    fn compact(&mut self) {
        if self.cursor == self.pending.len() {
            self.pending.clear();
            self.cursor = 0;
        } else if self.cursor >= COMPACT_THRESHOLD && self.cursor * 2 >= self.pending.len() {
            self.pending.advance(self.cursor);
            self.cursor = 0;
        }
    }

    /// Bytes received but not yet consumed.
    pub fn len(&self) -> usize {
        self.pending.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current read offset into the internal buffer.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Total bytes held, consumed prefix included.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    pub fn decoded_frames(&self) -> u64 {
        self.decoded
    }

    /// Forget everything buffered. Counters are kept.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.cursor = 0;
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

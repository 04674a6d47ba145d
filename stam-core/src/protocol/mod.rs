//! Command payloads: typed requests, decoded responses and list bodies.
//!
//! Payloads are packed by hand. Integers are little-endian and fixed
//! width. Strings come in two styles and the style is part of each
//! command's layout:
//!
//! - **prefixed**: `u16` byte length followed by UTF-8 bytes
//! - **terminated**: UTF-8 bytes followed by a `0x00`
//!
//! [`PayloadWriter`] and [`PayloadReader`] provide both.

pub mod lists;
pub mod request;
pub mod response;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::StamError;

pub use lists::{
    AvailableTicket, GameEntry, GameInfoEntry, ListItem, MeetingAccept, MeetingInfo, TicketEntry,
    decode_list, encode_list,
};
pub use request::{AcceptState, GameChange, Request, TicketState};
pub use response::{Response, ResponseBody};

// ── PayloadWriter ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn put_i64(&mut self, v: i64) -> &mut Self {
        self.buf.put_i64_le(v);
        self
    }

    pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_slice(v);
        self
    }

    /// `u16` length + UTF-8 bytes.
    pub fn put_str_prefixed(&mut self, s: &str) -> Result<&mut Self, StamError> {
        let len = u16::try_from(s.len()).map_err(|_| {
            StamError::InvalidArgument(format!("string of {} bytes exceeds u16 length", s.len()))
        })?;
        self.buf.put_u16_le(len);
        self.buf.put_slice(s.as_bytes());
        Ok(self)
    }

    /// UTF-8 bytes + `0x00`.
    pub fn put_str_terminated(&mut self, s: &str) -> Result<&mut Self, StamError> {
        if s.as_bytes().contains(&0) {
            return Err(StamError::InvalidArgument(
                "NUL inside a terminated string".into(),
            ));
        }
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

// ── PayloadReader ────────────────────────────────────────────────

#[derive(Debug)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StamError> {
        if self.remaining() < n {
            return Err(StamError::PayloadTooShort {
                offset: self.offset,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], StamError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, StamError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, StamError> {
        self.take_array().map(u16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, StamError> {
        self.take_array().map(u32::from_le_bytes)
    }

    pub fn i32(&mut self) -> Result<i32, StamError> {
        self.take_array().map(i32::from_le_bytes)
    }

    pub fn i64(&mut self) -> Result<i64, StamError> {
        self.take_array().map(i64::from_le_bytes)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], StamError> {
        self.take(n)
    }

    /// `u16` length + UTF-8 bytes.
    pub fn str_prefixed(&mut self) -> Result<String, StamError> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        Ok(String::from_utf8(raw.to_vec())?)
    }

    /// UTF-8 bytes up to a `0x00`. A missing terminator takes the rest.
    pub fn str_terminated(&mut self) -> Result<String, StamError> {
        let rest = &self.data[self.offset..];
        let (raw, advance) = match rest.iter().position(|&b| b == 0) {
            Some(nul) => (&rest[..nul], nul + 1),
            None => (rest, rest.len()),
        };
        self.offset += advance;
        Ok(String::from_utf8(raw.to_vec())?)
    }

    /// Everything not read yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.offset..];
        self.offset = self.data.len();
        rest
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

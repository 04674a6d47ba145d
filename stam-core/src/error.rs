//! Domain-specific error types for the StamOrga protocol.
//!
//! All fallible operations return `Result<T, StamError>`.
//! A request that reaches the server and comes back with a failure code is
//! *not* an error at this level: it is a [`ResultCode`] carried inside a
//! [`Response`]. `StamError` covers the things that stop a frame or a
//! connection from working at all.
//!
//! [`ResultCode`]: crate::message::ResultCode
//! [`Response`]: crate::protocol::Response

use thiserror::Error;

/// The canonical error type for the StamOrga protocol.
#[derive(Debug, Error)]
pub enum StamError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the sync marker.
    #[error("invalid sync marker: {0:#010x}")]
    InvalidMagic(u32),

    /// A field in the frame header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    // ── Frame Errors ─────────────────────────────────────────────
    /// The payload does not fit the 16-bit length field.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A payload was shorter than the fields it must contain.
    #[error("payload too short: need {needed} bytes at offset {offset}, have {available}")]
    PayloadTooShort {
        offset: usize,
        needed: usize,
        available: usize,
    },

    // ── Connection Errors ────────────────────────────────────────
    /// The UDP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An address could not be resolved.
    #[error("cannot resolve address {0}")]
    AddressResolution(String),

    /// An mpsc or oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// UTF-8 conversion failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    // ── Application Errors ───────────────────────────────────────
    /// A request argument was rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for StamError {
    fn from(s: String) -> Self {
        StamError::Other(s)
    }
}

impl From<&str> for StamError {
    fn from(s: &str) -> Self {
        StamError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for StamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        StamError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for StamError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        StamError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = StamError::InvalidMagic(0xdead_beef);
        assert!(e.to_string().contains("sync marker"));
        assert!(e.to_string().contains("0xdeadbeef"));

        let e = StamError::PayloadTooLarge {
            size: 70000,
            max: 65535,
        };
        assert!(e.to_string().contains("70000"));
        assert!(e.to_string().contains("65535"));
    }

    #[test]
    fn from_string() {
        let e: StamError = "something broke".into();
        assert!(matches!(e, StamError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let e: StamError = io_err.into();
        assert!(matches!(e, StamError::Connection(_)));
    }

    #[tokio::test]
    async fn from_closed_oneshot() {
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        drop(tx);
        let e: StamError = rx.await.unwrap_err().into();
        assert!(matches!(e, StamError::ChannelClosed));
    }
}

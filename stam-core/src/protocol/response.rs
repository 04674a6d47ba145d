//! Decoded acks.
//!
//! Decoding never fails: a body too short for its fixed part becomes
//! [`ResultCode::WrongSize`], so the caller always gets a [`Response`].

use bytes::Bytes;
use tracing::debug;

use crate::error::StamError;
use crate::flags::UserProperties;
use crate::frame::Message;
use crate::message::{Command, ResultCode};
use crate::protocol::{PayloadReader, PayloadWriter};

/// Mask applied to version numbers before comparing them.
///
/// Versions are packed as `0xMMmmpppp`; the low byte of the patch level
/// does not count as a newer version.
pub const VERSION_COMPARE_MASK: u32 = 0xFFFF_FF00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Nothing beyond the result code.
    None,
    /// Discovery answer.
    Connect {
        port: u16,
        salt: String,
        random: String,
    },
    Version {
        version: u32,
        text: String,
    },
    UserProps {
        properties: UserProperties,
        index: u32,
        readable_name: String,
    },
    /// Command specific bytes after the result code.
    Data(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub command: Command,
    pub code: ResultCode,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(command: Command, code: ResultCode, body: ResponseBody) -> Self {
        Self {
            command,
            code,
            body,
        }
    }

    /// A response produced without a matching ack (timeouts, teardown,
    /// rejected arguments, ...).
    pub fn local(command: Command, code: ResultCode) -> Self {
        Self::new(command, code, ResponseBody::None)
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Bytes after the result code, for list-style answers.
    pub fn data(&self) -> &[u8] {
        match &self.body {
            ResponseBody::Data(bytes) => bytes,
            _ => &[],
        }
    }

    /// Decode the ack for `command`.
    pub fn decode(command: Command, message: &Message) -> Self {
        let payload = message.payload();
        let decoded = match command {
            Command::ConnectUser => decode_connect(payload),
            Command::GetVersion => decode_version(payload),
            Command::GetUserProps => decode_user_props(payload),
            _ => decode_generic(payload),
        };
        match decoded {
            Ok((code, body)) => Self::new(command, code, body),
            Err(e) => {
                debug!(%command, error = %e, "ack body too short");
                Self::local(command, ResultCode::WrongSize)
            }
        }
    }

    /// Turn a successful version answer into `NewVersion` when the remote
    /// side is newer than `local_version`.
    pub fn with_version_check(mut self, local_version: u32) -> Self {
        if let ResponseBody::Version { version, .. } = &self.body {
            if self.code.is_success()
                && version & VERSION_COMPARE_MASK > local_version & VERSION_COMPARE_MASK
            {
                self.code = ResultCode::NewVersion;
            }
        }
        self
    }

    /// Build the ack frame (server side).
    pub fn encode(&self) -> Result<Message, StamError> {
        let mut w = PayloadWriter::new();
        match &self.body {
            ResponseBody::Connect { port, salt, random } => {
                if self.code.is_success() {
                    w.put_i32(i32::from(*port));
                } else {
                    w.put_i32(self.code as i32);
                }
                if !salt.is_empty() || !random.is_empty() {
                    w.put_str_prefixed(salt)?.put_str_prefixed(random)?;
                }
            }
            ResponseBody::None => {
                w.put_i32(self.code as i32);
            }
            ResponseBody::Version { version, text } => {
                w.put_i32(self.code as i32)
                    .put_u32(*version)
                    .put_str_prefixed(text)?;
            }
            ResponseBody::UserProps {
                properties,
                index,
                readable_name,
            } => {
                w.put_i32(self.code as i32)
                    .put_u32(properties.bits())
                    .put_u32(*index)
                    .put_str_terminated(readable_name)?;
            }
            ResponseBody::Data(bytes) => {
                w.put_i32(self.code as i32).put_bytes(bytes);
            }
        }
        Message::new(self.command.ack_opcode(), w.finish())
    }
}

// ── Per-command decoding ─────────────────────────────────────────

type Decoded = Result<(ResultCode, ResponseBody), StamError>;

/// `i32` port or error, then optional salt and random challenge.
fn decode_connect(payload: &[u8]) -> Decoded {
    let mut r = PayloadReader::new(payload);
    let value = r.i32()?;
    if value <= 0 {
        return Ok((ResultCode::from_wire(value), ResponseBody::None));
    }
    let port = u16::try_from(value).map_err(|_| {
        StamError::Encoding(format!("session port {value} out of range"))
    })?;
    let (salt, random) = if r.remaining() > 0 {
        (r.str_prefixed()?, r.str_prefixed()?)
    } else {
        (String::new(), String::new())
    };
    Ok((ResultCode::Success, ResponseBody::Connect { port, salt, random }))
}

fn decode_version(payload: &[u8]) -> Decoded {
    let mut r = PayloadReader::new(payload);
    let code = ResultCode::from_wire(r.i32()?);
    if !code.is_success() {
        return Ok((code, ResponseBody::None));
    }
    let version = r.u32()?;
    let text = r.str_prefixed()?;
    Ok((code, ResponseBody::Version { version, text }))
}

fn decode_user_props(payload: &[u8]) -> Decoded {
    let mut r = PayloadReader::new(payload);
    let code = ResultCode::from_wire(r.i32()?);
    if !code.is_success() {
        return Ok((code, ResponseBody::None));
    }
    let properties = UserProperties::from_bits_truncate(r.u32()?);
    let index = r.u32()?;
    let readable_name = r.str_terminated()?;
    Ok((
        code,
        ResponseBody::UserProps {
            properties,
            index,
            readable_name,
        },
    ))
}

fn decode_generic(payload: &[u8]) -> Decoded {
    let mut r = PayloadReader::new(payload);
    let code = ResultCode::from_wire(r.i32()?);
    Ok((code, ResponseBody::Data(Bytes::copy_from_slice(r.rest()))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(command: Command, payload: Vec<u8>) -> Message {
        Message::new(command.ack_opcode(), payload).unwrap()
    }

    #[test]
    fn version_ack_decodes() {
        let mut payload = 1i32.to_le_bytes().to_vec();
        payload.extend_from_slice(&0x0102_0300u32.to_le_bytes());
        payload.extend_from_slice(&5u16.to_le_bytes());
        payload.extend_from_slice(b"1.2.3");

        let resp = Response::decode(Command::GetVersion, &ack(Command::GetVersion, payload));
        assert_eq!(resp.code, ResultCode::Success);
        assert_eq!(
            resp.body,
            ResponseBody::Version {
                version: 0x0102_0300,
                text: "1.2.3".into()
            }
        );
    }

    #[test]
    fn newer_remote_version_flagged() {
        let resp = Response::new(
            Command::GetVersion,
            ResultCode::Success,
            ResponseBody::Version {
                version: 0x0103_0000,
                text: "V1.3.0".into(),
            },
        );
        assert_eq!(
            resp.clone().with_version_check(0x0102_0000).code,
            ResultCode::NewVersion
        );
        assert_eq!(resp.clone().with_version_check(0x0103_0000).code, ResultCode::Success);
        // Low patch byte does not count.
        let patch = Response::new(
            Command::GetVersion,
            ResultCode::Success,
            ResponseBody::Version {
                version: 0x0103_0001,
                text: String::new(),
            },
        );
        assert_eq!(patch.with_version_check(0x0103_0000).code, ResultCode::Success);
    }

    #[test]
    fn short_bodies_are_wrong_size() {
        let resp = Response::decode(
            Command::GetVersion,
            &ack(Command::GetVersion, 1i32.to_le_bytes().to_vec()),
        );
        assert_eq!(resp.code, ResultCode::WrongSize);

        let resp = Response::decode(Command::AddTicket, &ack(Command::AddTicket, vec![1, 0]));
        assert_eq!(resp.code, ResultCode::WrongSize);
    }

    #[test]
    fn connect_ack_port_or_error() {
        let ok = Response::new(
            Command::ConnectUser,
            ResultCode::Success,
            ResponseBody::Connect {
                port: 55001,
                salt: "s4lt".into(),
                random: "r4nd".into(),
            },
        );
        let msg = ok.encode().unwrap();
        assert_eq!(&msg.payload()[..4], &55001i32.to_le_bytes());
        assert_eq!(Response::decode(Command::ConnectUser, &msg), ok);

        let bare = Response::decode(
            Command::ConnectUser,
            &ack(Command::ConnectUser, 4000i32.to_le_bytes().to_vec()),
        );
        assert_eq!(
            bare.body,
            ResponseBody::Connect {
                port: 4000,
                salt: String::new(),
                random: String::new()
            }
        );

        let no_user = Response::decode(
            Command::ConnectUser,
            &ack(Command::ConnectUser, (ResultCode::NoUser as i32).to_le_bytes().to_vec()),
        );
        assert_eq!(no_user.code, ResultCode::NoUser);
    }

    #[test]
    fn user_props_roundtrip() {
        let resp = Response::new(
            Command::GetUserProps,
            ResultCode::Success,
            ResponseBody::UserProps {
                properties: UserProperties::ENABLE_ADD_TICKET | UserProperties::ENABLE_MEETING,
                index: 7,
                readable_name: "Alice".into(),
            },
        );
        let back = Response::decode(Command::GetUserProps, &resp.encode().unwrap());
        assert_eq!(back, resp);
    }

    #[test]
    fn generic_keeps_trailing_bytes() {
        let mut payload = (ResultCode::UpdateList as i32).to_le_bytes().to_vec();
        payload.extend_from_slice(b"rest");
        let resp = Response::decode(
            Command::GetGamesInfoList,
            &ack(Command::GetGamesInfoList, payload),
        );
        assert!(resp.code.is_stale_list());
        assert_eq!(resp.data(), b"rest");
    }
}

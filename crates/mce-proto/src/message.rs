//! Typed messages layered on top of `Frame` (spec §4.2).

use crate::codec::{Frame, ProtoError};
use crate::state::{translate, SystemState};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use mce_runtime::codec::SinkEncode;
use tracing::warn;

mod tag {
    // Outgoing
    pub const PROCESSWD_PONG: u32 = 1;
    pub const PROCESSWD_CREATE: u32 = 2;
    pub const PROCESSWD_DELETE: u32 = 3;
    pub const STATE_QUERY: u32 = 4;
    pub const POWERUP_REQ: u32 = 5;
    pub const SHUTDOWN_REQ: u32 = 6;
    pub const REBOOT_REQ: u32 = 7;

    // Incoming
    pub const CLOSE: u32 = 100;
    pub const PROCESSWD_PING: u32 = 101;
    pub const STATE_CHANGE_IND: u32 = 102;
}

/// Messages the lifecycle socket client sends to the device-state manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    ProcesswdPong { pid: u32 },
    ProcesswdCreate { pid: u32 },
    ProcesswdDelete,
    StateQuery,
    PowerupReq,
    ShutdownReq,
    RebootReq,
}

impl OutgoingMessage {
    pub fn to_frame(&self) -> Frame {
        let mut payload = BytesMut::new();
        let ty = match *self {
            Self::ProcesswdPong { pid } => {
                payload.put_u32(pid);
                tag::PROCESSWD_PONG
            }
            Self::ProcesswdCreate { pid } => {
                payload.put_u32(pid);
                tag::PROCESSWD_CREATE
            }
            Self::ProcesswdDelete => tag::PROCESSWD_DELETE,
            Self::StateQuery => tag::STATE_QUERY,
            Self::PowerupReq => tag::POWERUP_REQ,
            Self::ShutdownReq => tag::SHUTDOWN_REQ,
            Self::RebootReq => tag::REBOOT_REQ,
        };
        Frame::new(ty, payload.freeze())
    }

    /// Encode directly into a send buffer, ready for `UnixDatagram::send`.
    pub fn encode(&self) -> Result<Bytes, ProtoError> {
        let frame = self.to_frame();
        let mut dst = BytesMut::new();
        frame.sink_encode(&mut dst)?;
        Ok(dst.freeze())
    }
}

/// Messages received from the device-state manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    Close,
    ProcesswdPing,
    StateChangeInd(SystemState),
}

impl IncomingMessage {
    /// Parse a frame into a known incoming message. Unknown type tags (or a
    /// `StateChangeInd` carrying an unrecognised state code) are logged and
    /// treated as "nothing to do" rather than an error, per spec §4.2.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        match frame.ty {
            tag::CLOSE => Some(Self::Close),
            tag::PROCESSWD_PING => Some(Self::ProcesswdPing),
            tag::STATE_CHANGE_IND => {
                let mut payload = frame.payload.clone();
                if payload.len() < 4 {
                    warn!(len = payload.len(), "STATE_CHANGE_IND payload too short");
                    return None;
                }
                let code = payload.get_u32();
                match translate(code) {
                    Some(state) => Some(Self::StateChangeInd(state)),
                    None => {
                        warn!(code, "unrecognised system state code, ignoring");
                        None
                    }
                }
            }
            other => {
                warn!(ty = other, "unrecognised DSME message type, ignoring");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mce_runtime::codec::Decode;

    #[test]
    fn pong_carries_pid() {
        let msg = OutgoingMessage::ProcesswdPong { pid: 4242 };
        let frame = msg.to_frame();
        assert_eq!(frame.ty, tag::PROCESSWD_PONG);
        assert_eq!(frame.payload.len(), 4);
    }

    #[test]
    fn state_change_ind_round_trips_through_wire() {
        let mut payload = BytesMut::new();
        payload.put_u32(1); // USER
        let frame = Frame::new(tag::STATE_CHANGE_IND, payload.freeze());
        let parsed = IncomingMessage::from_frame(&frame).unwrap();
        assert_eq!(parsed, IncomingMessage::StateChangeInd(SystemState::User));
    }

    #[test]
    fn unknown_type_is_ignored() {
        let frame = Frame::new(9999, Bytes::new());
        assert!(IncomingMessage::from_frame(&frame).is_none());
    }

    #[test]
    fn encode_decode_round_trip_through_codec() {
        let msg = OutgoingMessage::ShutdownReq;
        let bytes = msg.encode().unwrap();
        let mut buf = BytesMut::from(&bytes[..]);
        let mut codec = crate::codec::DsmeCodec::default();
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.ty, tag::SHUTDOWN_REQ);
    }
}

// src/core/protocol/reply.rs

//! Converts a decoded reply frame into the payload handed to the host.

use super::resp_frame::{RespFrame, format_double};
use crate::core::BridgeError;
use bytes::Bytes;

/// The result of converting one reply frame.
pub type ReplyPayload = Result<Option<Bytes>, BridgeError>;

/// Converts a reply into the success payload delivered to the host.
///
/// Nil replies become `None`. Scalars become their textual form. Error replies
/// are classified through [`BridgeError::from_server_reply`]. Aggregates have no
/// single-string representation and are reported as request failures.
pub fn into_payload(frame: RespFrame) -> ReplyPayload {
    match frame {
        RespFrame::Null | RespFrame::NullArray => Ok(None),
        RespFrame::SimpleString(s) => Ok(Some(Bytes::from(s))),
        RespFrame::BulkString(b) => Ok(Some(b)),
        RespFrame::Integer(i) => {
            let mut buf = itoa::Buffer::new();
            Ok(Some(Bytes::copy_from_slice(buf.format(i).as_bytes())))
        }
        RespFrame::Double(d) => Ok(Some(Bytes::from(format_double(d)))),
        RespFrame::Boolean(b) => Ok(Some(Bytes::from_static(if b {
            b"true"
        } else {
            b"false"
        }))),
        RespFrame::BigNumber(n) => Ok(Some(Bytes::from(n))),
        RespFrame::Error(message) => Err(BridgeError::from_server_reply(message)),
        other => Err(BridgeError::InvalidRequest(format!(
            "Failed to process response of type {}",
            other.type_name()
        ))),
    }
}

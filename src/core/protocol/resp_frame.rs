// src/core/protocol/resp_frame.rs

//! Implements the RESP frame structure and the `Encoder`/`Decoder` pair used
//! by the client transport.
//!
//! The decoder understands both RESP2 and the RESP3 reply types a server may
//! send after `HELLO 3`. Verbatim strings are surfaced as plain bulk strings and
//! bulk errors as simple errors, so the rest of the bridge only deals with the
//! RESP2-shaped variants plus the handful of RESP3 scalars.

use crate::core::BridgeError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits so a misbehaving server cannot exhaust client memory.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;
const MAX_RECURSION_DEPTH: usize = 256;

/// A single frame in the RESP protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
    // RESP3 reply types.
    Boolean(bool),
    Double(f64),
    BigNumber(String),
    Map(Vec<(RespFrame, RespFrame)>),
    Set(Vec<RespFrame>),
    Push(Vec<RespFrame>),
}

impl RespFrame {
    /// Encodes a frame into a `Vec<u8>`.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, BridgeError> {
        let mut buf = BytesMut::new();
        RespFrameCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Builds the array-of-bulk-strings frame a client sends for a command.
    pub fn command<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespFrame::Array(
            parts
                .into_iter()
                .map(|p| RespFrame::BulkString(p.into()))
                .collect(),
        )
    }

    /// A short name for the frame type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            RespFrame::SimpleString(_) => "simple-string",
            RespFrame::Error(_) => "error",
            RespFrame::Integer(_) => "integer",
            RespFrame::BulkString(_) => "bulk-string",
            RespFrame::Null => "null",
            RespFrame::NullArray => "null-array",
            RespFrame::Array(_) => "array",
            RespFrame::Boolean(_) => "boolean",
            RespFrame::Double(_) => "double",
            RespFrame::BigNumber(_) => "big-number",
            RespFrame::Map(_) => "map",
            RespFrame::Set(_) => "set",
            RespFrame::Push(_) => "push",
        }
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

fn write_len_line(prefix: &[u8], len: usize, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.extend_from_slice(prefix);
    dst.extend_from_slice(buf.format(len).as_bytes());
    dst.extend_from_slice(CRLF);
}

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = BridgeError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                let mut buf = itoa::Buffer::new();
                dst.extend_from_slice(b":");
                dst.extend_from_slice(buf.format(i).as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.reserve(b.len() + 16);
                write_len_line(b"$", b.len(), dst);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => {
                dst.extend_from_slice(b"$-1\r\n");
            }
            RespFrame::NullArray => {
                dst.extend_from_slice(b"*-1\r\n");
            }
            RespFrame::Array(arr) => {
                write_len_line(b"*", arr.len(), dst);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
            RespFrame::Boolean(b) => {
                dst.extend_from_slice(if b { b"#t\r\n" } else { b"#f\r\n" });
            }
            RespFrame::Double(d) => {
                dst.extend_from_slice(b",");
                dst.extend_from_slice(format_double(d).as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BigNumber(n) => {
                dst.extend_from_slice(b"(");
                dst.extend_from_slice(n.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Map(pairs) => {
                write_len_line(b"%", pairs.len(), dst);
                for (k, v) in pairs {
                    self.encode(k, dst)?;
                    self.encode(v, dst)?;
                }
            }
            RespFrame::Set(items) => {
                write_len_line(b"~", items.len(), dst);
                for frame in items {
                    self.encode(frame, dst)?;
                }
            }
            RespFrame::Push(items) => {
                write_len_line(b">", items.len(), dst);
                for frame in items {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut bytes = &src[..];
        match self.decode_recursive(&mut bytes, 0) {
            Ok(frame) => {
                let len = src.len() - bytes.len();
                src.advance(len);
                Ok(Some(frame))
            }
            // `IncompleteData` means the frame is not fully buffered yet.
            Err(BridgeError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl RespFrameCodec {
    fn decode_recursive(&self, bytes: &mut &[u8], depth: usize) -> Result<RespFrame, BridgeError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(BridgeError::Protocol(
                "RESP recursion depth limit exceeded".to_string(),
            ));
        }

        if bytes.is_empty() {
            return Err(BridgeError::IncompleteData);
        }

        let prefix = bytes[0];
        *bytes = &bytes[1..];
        match prefix {
            b'+' => Ok(RespFrame::SimpleString(self.parse_text_line(bytes)?)),
            b'-' => Ok(RespFrame::Error(self.parse_text_line(bytes)?)),
            b':' => Ok(RespFrame::Integer(self.parse_number(bytes)?)),
            b'$' => Ok(self
                .parse_blob(bytes)?
                .map_or(RespFrame::Null, RespFrame::BulkString)),
            b'*' => match self.parse_length(bytes)? {
                None => Ok(RespFrame::NullArray),
                Some(len) => Ok(RespFrame::Array(self.parse_items(bytes, len, depth)?)),
            },
            b'_' => {
                self.parse_line(bytes)?;
                Ok(RespFrame::Null)
            }
            b'#' => match self.parse_line(bytes)? {
                b"t" => Ok(RespFrame::Boolean(true)),
                b"f" => Ok(RespFrame::Boolean(false)),
                other => Err(BridgeError::Protocol(format!(
                    "invalid boolean '{}'",
                    String::from_utf8_lossy(other)
                ))),
            },
            b',' => {
                let line = self.parse_text_line(bytes)?;
                parse_double(&line).map(RespFrame::Double)
            }
            b'(' => Ok(RespFrame::BigNumber(self.parse_text_line(bytes)?)),
            b'!' => {
                let blob = self.parse_blob(bytes)?.unwrap_or_default();
                Ok(RespFrame::Error(String::from_utf8_lossy(&blob).into_owned()))
            }
            b'=' => {
                // Verbatim strings carry a three-byte format tag and a colon.
                let blob = self.parse_blob(bytes)?.unwrap_or_default();
                if blob.len() < 4 || blob[3] != b':' {
                    return Err(BridgeError::Protocol(
                        "malformed verbatim string".to_string(),
                    ));
                }
                Ok(RespFrame::BulkString(blob.slice(4..)))
            }
            b'%' => {
                let len = self.parse_length(bytes)?.unwrap_or(0);
                let mut pairs = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    let key = self.decode_recursive(bytes, depth + 1)?;
                    let value = self.decode_recursive(bytes, depth + 1)?;
                    pairs.push((key, value));
                }
                Ok(RespFrame::Map(pairs))
            }
            b'~' => {
                let len = self.parse_length(bytes)?.unwrap_or(0);
                Ok(RespFrame::Set(self.parse_items(bytes, len, depth)?))
            }
            b'>' => {
                let len = self.parse_length(bytes)?.unwrap_or(0);
                Ok(RespFrame::Push(self.parse_items(bytes, len, depth)?))
            }
            other => Err(BridgeError::Protocol(format!(
                "unexpected frame prefix byte 0x{other:02x}"
            ))),
        }
    }

    /// Returns the next line without its CRLF and advances past it.
    fn parse_line<'a>(&self, bytes: &mut &'a [u8]) -> Result<&'a [u8], BridgeError> {
        if let Some(pos) = find_crlf(bytes) {
            let line = &bytes[..pos];
            *bytes = &bytes[pos + CRLF_LEN..];
            Ok(line)
        } else {
            Err(BridgeError::IncompleteData)
        }
    }

    fn parse_text_line(&self, bytes: &mut &[u8]) -> Result<String, BridgeError> {
        let line = self.parse_line(bytes)?;
        Ok(String::from_utf8_lossy(line).into_owned())
    }

    fn parse_number(&self, bytes: &mut &[u8]) -> Result<i64, BridgeError> {
        let line = self.parse_line(bytes)?;
        std::str::from_utf8(line)?
            .parse::<i64>()
            .map_err(|_| BridgeError::Protocol("invalid integer in frame".to_string()))
    }

    /// Parses an aggregate length; `-1` means a null aggregate.
    fn parse_length(&self, bytes: &mut &[u8]) -> Result<Option<usize>, BridgeError> {
        let len = self.parse_number(bytes)?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| BridgeError::Protocol(format!("negative length {len}")))?;
        if len > MAX_FRAME_ELEMENTS {
            return Err(BridgeError::Protocol(format!(
                "aggregate of {len} elements exceeds limit"
            )));
        }
        Ok(Some(len))
    }

    /// Parses a length-prefixed blob; `None` for the `-1` null form.
    fn parse_blob(&self, bytes: &mut &[u8]) -> Result<Option<Bytes>, BridgeError> {
        let len = self.parse_number(bytes)?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| BridgeError::Protocol(format!("negative length {len}")))?;
        if len > MAX_BULK_STRING_SIZE {
            return Err(BridgeError::Protocol(format!(
                "bulk string of {len} bytes exceeds limit"
            )));
        }

        if bytes.len() < len + CRLF_LEN {
            return Err(BridgeError::IncompleteData);
        }
        if &bytes[len..len + CRLF_LEN] != CRLF {
            return Err(BridgeError::Protocol(
                "bulk string is not CRLF terminated".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&bytes[..len]);
        *bytes = &bytes[len + CRLF_LEN..];
        Ok(Some(data))
    }

    fn parse_items(
        &self,
        bytes: &mut &[u8],
        len: usize,
        depth: usize,
    ) -> Result<Vec<RespFrame>, BridgeError> {
        let mut frames = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            frames.push(self.decode_recursive(bytes, depth + 1)?);
        }
        Ok(frames)
    }
}

fn parse_double(line: &str) -> Result<f64, BridgeError> {
    match line {
        "inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        "nan" => Ok(f64::NAN),
        _ => line
            .parse::<f64>()
            .map_err(|_| BridgeError::Protocol(format!("invalid double '{line}'"))),
    }
}

/// Renders a double the way servers write them on the wire.
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        "nan".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        d.to_string()
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}

// src/core/errors.rs

//! Defines the primary error type for the bridge and the closed set of error
//! kinds reported to the host.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum_macros::{Display, EnumIter, FromRepr, IntoStaticStr};
use thiserror::Error;

/// The prefix a server uses when a queued transaction is discarded at `EXEC` time.
const EXEC_ABORT_PREFIX: &str = "EXECABORT";

/// The category of failure reported to the host with every failure notification.
///
/// The discriminants are part of the C ABI and never change.
#[repr(u32)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    FromRepr,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The server rejected the command, or the request was malformed.
    Request = 0,
    /// A transaction was aborted by the server.
    ExecAbort = 1,
    /// No reply arrived before the request deadline, or connect timed out.
    Timeout = 2,
    /// The connection failed or was lost.
    Connection = 3,
    /// The handle is closing or closed.
    Closing = 4,
}

impl ErrorKind {
    /// A stable, lowercase label used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// The main error enum, representing every failure inside the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out while connecting")]
    ConnectTimeout,

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Client is closing")]
    Closing,

    #[error("Correlation token {0} is already in flight")]
    DuplicateToken(u64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Wrong number of arguments for '{command}': expected {expected}, got {got}")]
    WrongArgumentCount {
        command: String,
        expected: String,
        got: usize,
    },

    #[error("Unknown request type {0}")]
    UnknownRequestType(u32),

    #[error("{0}")]
    Server(String),

    #[error("{0}")]
    ExecAbort(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Builds the error for an error reply received from the server.
    ///
    /// `EXECABORT` replies get their own kind; every other error reply is a
    /// request failure.
    pub fn from_server_reply(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.starts_with(EXEC_ABORT_PREFIX) {
            BridgeError::ExecAbort(message)
        } else {
            BridgeError::Server(message)
        }
    }

    /// Shorthand for `classify(self)`.
    pub fn kind(&self) -> ErrorKind {
        classify(self)
    }
}

/// Maps every internal error to exactly one host-visible kind.
pub fn classify(err: &BridgeError) -> ErrorKind {
    match err {
        BridgeError::Closing => ErrorKind::Closing,
        BridgeError::ConnectTimeout | BridgeError::RequestTimeout => ErrorKind::Timeout,
        BridgeError::ExecAbort(_) => ErrorKind::ExecAbort,
        BridgeError::Io(_)
        | BridgeError::IncompleteData
        | BridgeError::Protocol(_)
        | BridgeError::ConnectionLost(_)
        | BridgeError::Tls(_) => ErrorKind::Connection,
        BridgeError::DuplicateToken(_)
        | BridgeError::InvalidRequest(_)
        | BridgeError::WrongArgumentCount { .. }
        | BridgeError::UnknownRequestType(_)
        | BridgeError::Server(_)
        | BridgeError::InvalidConfig(_)
        | BridgeError::Internal(_) => ErrorKind::Request,
    }
}

// `std::io::Error` is not cloneable, so it is shared through an `Arc`.
impl Clone for BridgeError {
    fn clone(&self) -> Self {
        match self {
            BridgeError::Io(e) => BridgeError::Io(Arc::clone(e)),
            BridgeError::IncompleteData => BridgeError::IncompleteData,
            BridgeError::Protocol(s) => BridgeError::Protocol(s.clone()),
            BridgeError::ConnectTimeout => BridgeError::ConnectTimeout,
            BridgeError::RequestTimeout => BridgeError::RequestTimeout,
            BridgeError::Closing => BridgeError::Closing,
            BridgeError::DuplicateToken(t) => BridgeError::DuplicateToken(*t),
            BridgeError::InvalidRequest(s) => BridgeError::InvalidRequest(s.clone()),
            BridgeError::WrongArgumentCount {
                command,
                expected,
                got,
            } => BridgeError::WrongArgumentCount {
                command: command.clone(),
                expected: expected.clone(),
                got: *got,
            },
            BridgeError::UnknownRequestType(t) => BridgeError::UnknownRequestType(*t),
            BridgeError::Server(s) => BridgeError::Server(s.clone()),
            BridgeError::ExecAbort(s) => BridgeError::ExecAbort(s.clone()),
            BridgeError::ConnectionLost(s) => BridgeError::ConnectionLost(s.clone()),
            BridgeError::Tls(s) => BridgeError::Tls(s.clone()),
            BridgeError::InvalidConfig(s) => BridgeError::InvalidConfig(s.clone()),
            BridgeError::Internal(s) => BridgeError::Internal(s.clone()),
        }
    }
}

impl PartialEq for BridgeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BridgeError::Io(e1), BridgeError::Io(e2)) => e1.kind() == e2.kind(),
            (BridgeError::Protocol(s1), BridgeError::Protocol(s2)) => s1 == s2,
            (BridgeError::DuplicateToken(t1), BridgeError::DuplicateToken(t2)) => t1 == t2,
            (BridgeError::InvalidRequest(s1), BridgeError::InvalidRequest(s2)) => s1 == s2,
            (
                BridgeError::WrongArgumentCount {
                    command: c1,
                    got: g1,
                    ..
                },
                BridgeError::WrongArgumentCount {
                    command: c2,
                    got: g2,
                    ..
                },
            ) => c1 == c2 && g1 == g2,
            (BridgeError::UnknownRequestType(t1), BridgeError::UnknownRequestType(t2)) => t1 == t2,
            (BridgeError::Server(s1), BridgeError::Server(s2)) => s1 == s2,
            (BridgeError::ExecAbort(s1), BridgeError::ExecAbort(s2)) => s1 == s2,
            (BridgeError::ConnectionLost(s1), BridgeError::ConnectionLost(s2)) => s1 == s2,
            (BridgeError::Tls(s1), BridgeError::Tls(s2)) => s1 == s2,
            (BridgeError::InvalidConfig(s1), BridgeError::InvalidConfig(s2)) => s1 == s2,
            (BridgeError::Internal(s1), BridgeError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for BridgeError {
    fn from(e: std::str::Utf8Error) -> Self {
        BridgeError::Protocol(format!("invalid UTF-8 in frame: {e}"))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::InvalidConfig(format!("malformed connection descriptor: {e}"))
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(e: toml::de::Error) -> Self {
        BridgeError::InvalidConfig(format!("malformed TOML: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for BridgeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        BridgeError::ConnectTimeout
    }
}

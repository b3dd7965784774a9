// src/core/transport/mod.rs

//! The seam between the engine and the wire.
//!
//! A `Connector` establishes a connection and returns a `Transport`. The
//! transport is then driven by one task on the client's I/O runtime: it writes
//! requests in the order they were enqueued and reports every reply through
//! `Completions`. Nothing else touches the socket.

pub mod resp;
pub mod stream;

use crate::config::ConnectionSpec;
use crate::core::BridgeError;
use crate::core::delivery::Completions;
use crate::core::protocol::RespFrame;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

pub use resp::RespConnector;

/// One encoded request handed from the dispatcher to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub token: u64,
    pub request_id: u64,
    pub frame: RespFrame,
}

/// A connected transport, consumed by its driver task.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Runs until `shutdown` fires or the request channel closes (`Ok`), or
    /// until the connection fails (`Err`). On `Err` the caller fails every
    /// pending request with a connection error.
    async fn run(
        self: Box<Self>,
        requests: mpsc::UnboundedReceiver<Request>,
        completions: Arc<Completions>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), BridgeError>;
}

/// Establishes transports for a connection spec.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Transport>, BridgeError>;
}

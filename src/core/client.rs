// src/core/client.rs

//! The client facade hosts talk to: create, submit, close.

use crate::config::ConnectionSpec;
use crate::core::BridgeError;
use crate::core::commands::RequestType;
use crate::core::connection::{ConnectionHandle, ConnectionState, HandleId};
use crate::core::delivery::CompletionCallbacks;
use crate::core::transport::{Connector, RespConnector};
use bytes::Bytes;
use std::sync::Arc;

/// A connected client. Cheap to share behind an `Arc`; every method may be
/// called from any thread.
#[derive(Debug)]
pub struct Client {
    handle: ConnectionHandle,
}

impl Client {
    /// Connects with the RESP transport.
    pub fn create(
        spec: &ConnectionSpec,
        callbacks: Arc<dyn CompletionCallbacks>,
    ) -> Result<Self, BridgeError> {
        Self::create_with_connector(spec, callbacks, Arc::new(RespConnector))
    }

    /// Connects through a caller-supplied connector.
    pub fn create_with_connector(
        spec: &ConnectionSpec,
        callbacks: Arc<dyn CompletionCallbacks>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, BridgeError> {
        let handle = ConnectionHandle::open(spec, callbacks, connector)?;
        Ok(Self { handle })
    }

    pub fn id(&self) -> HandleId {
        self.handle.id()
    }

    /// Submits a command. See [`Dispatcher::submit`](crate::core::dispatcher::Dispatcher::submit).
    pub fn submit(
        &self,
        token: u64,
        kind: RequestType,
        args: Vec<Bytes>,
    ) -> Result<(), BridgeError> {
        self.handle.dispatcher().submit(token, kind, args)
    }

    pub fn close(&self) {
        self.handle.close();
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn pending_requests(&self) -> usize {
        self.handle.pending_requests()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.handle.close();
    }
}

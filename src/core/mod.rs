// src/core/mod.rs

//! The engine: connection lifecycle, request submission, reply correlation,
//! and completion delivery.

pub mod client;
pub mod commands;
pub mod connection;
pub mod delivery;
pub mod dispatcher;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod tasks;
pub mod transport;

pub use client::Client;
pub use commands::RequestType;
pub use delivery::{CompletionCallbacks, Outcome};
pub use errors::{BridgeError, ErrorKind, classify};

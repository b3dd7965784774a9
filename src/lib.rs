// src/lib.rs

pub mod config;
pub mod core;
pub mod ffi;

// Re-export
pub use crate::config::ConnectionSpec;
pub use crate::core::{BridgeError, Client, CompletionCallbacks, ErrorKind, Outcome, RequestType, classify};

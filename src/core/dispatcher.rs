// src/core/dispatcher.rs

//! Accepts submissions from host threads and hands them to the transport.
//!
//! `submit` never touches the network. It validates, registers, and enqueues,
//! then returns; the reply arrives later through the completion callbacks.

use crate::core::BridgeError;
use crate::core::commands::{RequestType, encode_command};
use crate::core::connection::Lifecycle;
use crate::core::delivery::Completions;
use crate::core::metrics::{PENDING_REQUESTS, REQUESTS_REJECTED_TOTAL, REQUESTS_SUBMITTED_TOTAL};
use crate::core::pending::PendingEntry;
use crate::core::transport::Request;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct Dispatcher {
    requests: mpsc::UnboundedSender<Request>,
    lifecycle: Arc<Lifecycle>,
    completions: Arc<Completions>,
    request_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        requests: mpsc::UnboundedSender<Request>,
        lifecycle: Arc<Lifecycle>,
        completions: Arc<Completions>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            requests,
            lifecycle,
            completions,
            request_timeout,
        }
    }

    /// Submits one request.
    ///
    /// An `Err` means nothing was registered and no callback will fire for
    /// this submission. `Ok` means exactly one callback will fire for `token`.
    pub fn submit(
        &self,
        token: u64,
        kind: RequestType,
        args: Vec<Bytes>,
    ) -> Result<(), BridgeError> {
        let result = self.try_submit(token, kind, args);
        if let Err(e) = &result {
            REQUESTS_REJECTED_TOTAL
                .with_label_values(&[e.kind().as_str()])
                .inc();
            debug!("Rejected token {token} ({kind:?}): {e}");
        }
        result
    }

    fn try_submit(
        &self,
        token: u64,
        kind: RequestType,
        args: Vec<Bytes>,
    ) -> Result<(), BridgeError> {
        // Held until the request is enqueued so a concurrent close cannot
        // drain the table between registration and transmission.
        let _admitted = self.lifecycle.admit()?;

        let table = self.completions.table();
        if table.contains(token) {
            return Err(BridgeError::DuplicateToken(token));
        }

        let frame = encode_command(kind, args)?;

        let request_id = table.next_request_id();
        let submitted_at = Instant::now();
        table.register(
            token,
            PendingEntry {
                request_id,
                kind,
                submitted_at,
                deadline: self.request_timeout.map(|t| submitted_at + t),
            },
        )?;
        PENDING_REQUESTS.inc();
        REQUESTS_SUBMITTED_TOTAL.inc();

        let request = Request {
            token,
            request_id,
            frame,
        };
        if self.requests.send(request).is_err() {
            warn!("Transport driver is gone; failing token {token}.");
            self.completions.complete_error(
                token,
                request_id,
                &BridgeError::ConnectionLost("transport is not running".to_string()),
            );
        }
        Ok(())
    }
}

// src/core/delivery.rs

//! Completion delivery: resolves pending entries and runs the host's callbacks
//! on a fixed pool of delivery threads.
//!
//! The I/O runtime never calls into the host. It resolves the entry and posts
//! the outcome onto an unbounded queue; delivery workers pop outcomes and
//! invoke the callbacks. A slow callback therefore stalls other deliveries but
//! never the sockets.

use crate::core::connection::Lifecycle;
use crate::core::errors::{BridgeError, ErrorKind};
use crate::core::metrics::{
    CALLBACK_PANICS_TOTAL, COMPLETIONS_TOTAL, PENDING_REQUESTS, REQUEST_LATENCY_SECONDS,
};
use crate::core::pending::PendingTable;
use crate::core::protocol::{RespFrame, into_payload};
use bytes::Bytes;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// The final result of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A nil reply is `None`.
    Success(Option<Bytes>),
    Failure { kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn from_error(err: &BridgeError) -> Self {
        Outcome::Failure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// The metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Failure { kind, .. } => kind.as_str(),
        }
    }
}

impl From<Result<Option<Bytes>, BridgeError>> for Outcome {
    fn from(result: Result<Option<Bytes>, BridgeError>) -> Self {
        match result {
            Ok(payload) => Outcome::Success(payload),
            Err(e) => Outcome::from_error(&e),
        }
    }
}

/// The host's notification entry points.
///
/// Both methods are called on delivery threads, once per accepted token. A
/// success payload is only valid for the duration of the call.
pub trait CompletionCallbacks: Send + Sync + 'static {
    fn on_success(&self, token: u64, payload: Option<&[u8]>);
    fn on_failure(&self, token: u64, message: &str, kind: ErrorKind);
}

struct Delivery {
    token: u64,
    outcome: Outcome,
}

/// A fixed set of named threads draining the delivery queue.
pub struct DeliveryPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    callbacks: Arc<dyn CompletionCallbacks>,
}

impl DeliveryPool {
    /// Spawns `workers` delivery threads.
    pub fn start(
        workers: usize,
        callbacks: Arc<dyn CompletionCallbacks>,
    ) -> Result<Self, BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel::<Delivery>();
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let callbacks = Arc::clone(&callbacks);
            let handle = thread::Builder::new()
                .name(format!("spinel-bridge-delivery-{index}"))
                .spawn(move || {
                    loop {
                        // Only one idle worker waits on the queue at a time.
                        let next = rx.lock().blocking_recv();
                        match next {
                            Some(delivery) => dispatch(callbacks.as_ref(), delivery),
                            None => break,
                        }
                    }
                    debug!("Delivery worker {index} exiting.");
                })?;
            handles.push(handle);
        }

        let worker_ids = handles.iter().map(|h| h.thread().id()).collect();
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            worker_ids,
            callbacks,
        })
    }

    /// Queues an outcome for delivery.
    ///
    /// After shutdown the callback runs inline on the calling thread so no
    /// outcome is ever dropped.
    pub fn post(&self, token: u64, outcome: Outcome) {
        let delivery = Delivery { token, outcome };
        let rejected = match self.sender.lock().as_ref() {
            Some(tx) => tx.send(delivery).err().map(|e| e.0),
            None => Some(delivery),
        };
        if let Some(delivery) = rejected {
            warn!(
                "Delivery pool is stopped; delivering token {} inline.",
                delivery.token
            );
            dispatch(self.callbacks.as_ref(), delivery);
        }
    }

    /// Closes the queue and waits for the workers to deliver what is left.
    ///
    /// When called from one of this pool's own workers, that worker is not
    /// joined; it finishes the remaining queue after its callback returns.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());

        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("A delivery worker terminated abnormally.");
            }
        }
    }

    /// Whether the calling thread is one of this pool's workers.
    pub fn is_worker_thread(&self) -> bool {
        self.worker_ids.contains(&thread::current().id())
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }
}

fn dispatch(callbacks: &dyn CompletionCallbacks, delivery: Delivery) {
    let Delivery { token, outcome } = delivery;
    let result = catch_unwind(AssertUnwindSafe(|| match &outcome {
        Outcome::Success(payload) => callbacks.on_success(token, payload.as_deref()),
        Outcome::Failure { kind, message } => callbacks.on_failure(token, message, *kind),
    }));
    if result.is_err() {
        CALLBACK_PANICS_TOTAL.inc();
        error!("Completion callback for token {token} panicked.");
    }
}

/// Resolves pending entries and hands their outcomes to the delivery pool.
///
/// Shared by the transport driver, the timeout watchdog, the dispatcher, and
/// the close path; all of them complete requests through here.
pub struct Completions {
    table: Arc<PendingTable>,
    pool: Arc<DeliveryPool>,
    lifecycle: Arc<Lifecycle>,
}

impl Completions {
    pub fn new(table: Arc<PendingTable>, pool: Arc<DeliveryPool>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            table,
            pool,
            lifecycle,
        }
    }

    /// Completes `token` if it is still pending under `request_id`.
    ///
    /// Returns `false` for an unknown or stale token, which is otherwise a no-op.
    pub fn complete(&self, token: u64, request_id: u64, outcome: Outcome) -> bool {
        let Some(entry) = self.table.resolve(token, request_id) else {
            debug!("Dropping completion for stale token {token} (request {request_id}).");
            return false;
        };
        PENDING_REQUESTS.dec();
        COMPLETIONS_TOTAL.with_label_values(&[outcome.label()]).inc();
        REQUEST_LATENCY_SECONDS.observe(entry.submitted_at.elapsed().as_secs_f64());
        self.pool.post(token, outcome);
        true
    }

    /// Completes `token` from a decoded reply frame.
    pub fn complete_reply(&self, token: u64, request_id: u64, frame: RespFrame) -> bool {
        self.complete(token, request_id, into_payload(frame).into())
    }

    pub fn complete_error(&self, token: u64, request_id: u64, err: &BridgeError) -> bool {
        self.complete(token, request_id, Outcome::from_error(err))
    }

    /// Fails every pending request with `err`. Returns how many were failed.
    pub fn fail_all(&self, err: &BridgeError) -> usize {
        let drained = self.table.drain_all();
        let count = drained.len();
        for (token, entry) in drained {
            PENDING_REQUESTS.dec();
            let outcome = Outcome::from_error(err);
            COMPLETIONS_TOTAL.with_label_values(&[outcome.label()]).inc();
            REQUEST_LATENCY_SECONDS.observe(entry.submitted_at.elapsed().as_secs_f64());
            self.pool.post(token, outcome);
        }
        count
    }

    /// Handles loss of the connection: stops admission, then fails everything
    /// in flight with a connection error.
    pub fn connection_lost(&self, err: &BridgeError) {
        if self.lifecycle.mark_lost() {
            warn!("Connection lost: {err}. Failing all pending requests.");
        }
        let err = match err {
            BridgeError::ConnectionLost(_) => err.clone(),
            other => BridgeError::ConnectionLost(other.to_string()),
        };
        let failed = self.fail_all(&err);
        if failed > 0 {
            debug!("Failed {failed} pending requests after connection loss.");
        }
    }

    pub fn table(&self) -> &Arc<PendingTable> {
        &self.table
    }
}

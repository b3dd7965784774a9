// src/core/connection.rs

//! The connection handle: owns the I/O runtime, the transport driver, the
//! pending table, and the delivery pool of one client, and orders their
//! shutdown.

use crate::config::ConnectionSpec;
use crate::core::BridgeError;
use crate::core::delivery::{CompletionCallbacks, Completions, DeliveryPool};
use crate::core::dispatcher::Dispatcher;
use crate::core::metrics::OPEN_CLIENTS;
use crate::core::pending::PendingTable;
use crate::core::tasks::timeout_watchdog::TimeoutWatchdog;
use crate::core::transport::Connector;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// How long `close` waits for runtime tasks to wind down.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// The opaque identity of a connection handle. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl HandleId {
    pub fn next() -> Self {
        HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// The admission gate of a handle.
///
/// Submissions hold the read side from the state check until the request is
/// registered and enqueued. Leaving `Open` takes the write side, so once it
/// returns no further request can be registered.
#[derive(Debug)]
pub struct Lifecycle {
    state: RwLock<ConnectionState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Open),
        }
    }

    /// Admits a submission. The guard must be held until it is enqueued.
    pub fn admit(&self) -> Result<RwLockReadGuard<'_, ConnectionState>, BridgeError> {
        let guard = self.state.read();
        if *guard == ConnectionState::Open {
            Ok(guard)
        } else {
            Err(BridgeError::Closing)
        }
    }

    /// Moves an open handle to `Closing`. Returns the previous state.
    pub fn begin_close(&self) -> ConnectionState {
        let mut state = self.state.write();
        let previous = *state;
        if previous == ConnectionState::Open {
            *state = ConnectionState::Closing;
        }
        previous
    }

    /// Marks an open handle as closed after its connection failed.
    /// Returns `true` if this call made the transition.
    pub fn mark_lost(&self) -> bool {
        let mut state = self.state.write();
        if *state == ConnectionState::Open {
            *state = ConnectionState::Closed;
            true
        } else {
            false
        }
    }

    pub fn mark_closed(&self) {
        *self.state.write() = ConnectionState::Closed;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }
}

/// One live connection and everything that serves it.
pub struct ConnectionHandle {
    id: HandleId,
    runtime: Mutex<Option<Runtime>>,
    /// Set once the closing call has finished.
    closed: Mutex<bool>,
    closed_signal: Condvar,
    lifecycle: Arc<Lifecycle>,
    completions: Arc<Completions>,
    pool: Arc<DeliveryPool>,
    dispatcher: Dispatcher,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionHandle {
    /// Connects and returns a handle that is immediately usable.
    ///
    /// Blocks the calling thread until the connection and handshake finish or
    /// `connection_timeout` elapses. Must not be called from inside an async
    /// runtime.
    pub fn open(
        spec: &ConnectionSpec,
        callbacks: Arc<dyn CompletionCallbacks>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, BridgeError> {
        spec.validate()?;
        let id = HandleId::next();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(spec.io_threads)
            .thread_name(format!("spinel-bridge-io-{}", id.0))
            .enable_all()
            .build()?;

        let transport = runtime.block_on(async {
            tokio::time::timeout(spec.connection_timeout, connector.connect(spec)).await
        })??;

        let pool = Arc::new(DeliveryPool::start(spec.delivery_workers, callbacks)?);
        let lifecycle = Arc::new(Lifecycle::new());
        let table = Arc::new(PendingTable::new());
        let completions = Arc::new(Completions::new(
            table,
            Arc::clone(&pool),
            Arc::clone(&lifecycle),
        ));

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let driver_completions = Arc::clone(&completions);
        let driver_shutdown = shutdown_tx.subscribe();
        runtime.spawn(async move {
            match transport
                .run(requests_rx, Arc::clone(&driver_completions), driver_shutdown)
                .await
            {
                Ok(()) => debug!("Transport driver for client {id} stopped."),
                Err(e) => driver_completions.connection_lost(&e),
            }
        });

        if let Some(timeout) = spec.request_deadline() {
            let watchdog = TimeoutWatchdog::new(Arc::clone(&completions), timeout);
            runtime.spawn(watchdog.run(shutdown_tx.subscribe()));
        }

        let dispatcher = Dispatcher::new(
            requests_tx,
            Arc::clone(&lifecycle),
            Arc::clone(&completions),
            spec.request_deadline(),
        );

        OPEN_CLIENTS.inc();
        info!("Client {id} opened.");

        Ok(Self {
            id,
            runtime: Mutex::new(Some(runtime)),
            closed: Mutex::new(false),
            closed_signal: Condvar::new(),
            lifecycle,
            completions,
            pool,
            dispatcher,
            shutdown_tx,
        })
    }

    /// Closes the handle. Idempotent.
    ///
    /// When this returns, every request accepted before the close began has
    /// been completed and handed to the delivery pool, and the pool has been
    /// drained (unless called from one of its own threads).
    ///
    /// Only the first caller performs the shutdown. Later callers wait for it
    /// to finish, except on delivery threads: the first caller may be joining
    /// them, so they return at once.
    pub fn close(&self) {
        let taken = self.runtime.lock().take();
        let Some(runtime) = taken else {
            if !self.pool.is_worker_thread() {
                let mut closed = self.closed.lock();
                while !*closed {
                    self.closed_signal.wait(&mut closed);
                }
            }
            return;
        };

        self.lifecycle.begin_close();
        // No receivers left is fine; the tasks may already be gone.
        let _ = self.shutdown_tx.send(());

        let failed = self.completions.fail_all(&BridgeError::Closing);
        debug!("Client {} failed {failed} pending requests while closing.", self.id);

        if tokio::runtime::Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
        }

        self.pool.shutdown();
        self.lifecycle.mark_closed();
        OPEN_CLIENTS.dec();
        info!("Client {} closed.", self.id);

        *self.closed.lock() = true;
        self.closed_signal.notify_all();
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn pending_requests(&self) -> usize {
        self.completions.table().len()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

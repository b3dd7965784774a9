// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests: recording callbacks, a
//! scripted in-memory transport, and a loopback RESP server.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::{Condvar, Mutex};
use spinel_bridge::config::{ConnectionSpec, NodeAddress};
use spinel_bridge::core::delivery::Completions;
use spinel_bridge::core::protocol::{RespFrame, RespFrameCodec};
use spinel_bridge::core::transport::{Connector, Request, Transport};
use spinel_bridge::{BridgeError, Client, CompletionCallbacks, ErrorKind, Outcome};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// The password the loopback server accepts.
pub const LOOPBACK_PASSWORD: &str = "secret";

pub fn init_test_logging() {
    // Ignore the error if another test already installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

pub fn bulk(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

pub fn args(parts: &[&str]) -> Vec<Bytes> {
    parts.iter().map(|p| bulk(p)).collect()
}

pub fn success(payload: &str) -> Outcome {
    Outcome::Success(Some(bulk(payload)))
}

pub fn failure_kind(outcome: &Outcome) -> Option<ErrorKind> {
    match outcome {
        Outcome::Failure { kind, .. } => Some(*kind),
        Outcome::Success(_) => None,
    }
}

// ===== Recording callbacks =====

/// One completion as the host saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub token: u64,
    pub outcome: Outcome,
    /// Name of the thread the callback ran on.
    pub thread: String,
}

/// Callbacks that record every completion and let tests wait for them.
#[derive(Default)]
pub struct RecordingCallbacks {
    deliveries: Mutex<Vec<Delivered>>,
    cond: Condvar,
}

impl RecordingCallbacks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, token: u64, outcome: Outcome) {
        let thread = std::thread::current()
            .name()
            .unwrap_or_default()
            .to_string();
        let mut deliveries = self.deliveries.lock();
        deliveries.push(Delivered {
            token,
            outcome,
            thread,
        });
        self.cond.notify_all();
    }

    pub fn deliveries(&self) -> Vec<Delivered> {
        self.deliveries.lock().clone()
    }

    /// Waits until at least `count` completions arrived, or `WAIT` elapsed.
    pub fn wait_for(&self, count: usize) -> Vec<Delivered> {
        let deadline = Instant::now() + WAIT;
        let mut deliveries = self.deliveries.lock();
        while deliveries.len() < count {
            if self.cond.wait_until(&mut deliveries, deadline).timed_out() {
                break;
            }
        }
        deliveries.clone()
    }

    pub fn outcome_for(&self, token: u64) -> Option<Outcome> {
        self.deliveries
            .lock()
            .iter()
            .find(|d| d.token == token)
            .map(|d| d.outcome.clone())
    }

    pub fn count_for(&self, token: u64) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.token == token)
            .count()
    }
}

impl CompletionCallbacks for RecordingCallbacks {
    fn on_success(&self, token: u64, payload: Option<&[u8]>) {
        self.record(token, Outcome::Success(payload.map(Bytes::copy_from_slice)));
    }

    fn on_failure(&self, token: u64, message: &str, kind: ErrorKind) {
        self.record(
            token,
            Outcome::Failure {
                kind,
                message: message.to_string(),
            },
        );
    }
}

// ===== Scripted transport =====

enum LinkEvent {
    Reply {
        token: u64,
        request_id: Option<u64>,
        frame: RespFrame,
    },
    Disconnect,
}

/// The test's side of a scripted transport: observes written requests and
/// injects replies or a disconnect.
#[derive(Default)]
pub struct TransportLink {
    requests: Mutex<Vec<Request>>,
    cond: Condvar,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
}

impl TransportLink {
    fn record(&self, request: Request) {
        let mut requests = self.requests.lock();
        requests.push(request);
        self.cond.notify_all();
    }

    fn latest_request_id(&self, token: u64) -> Option<u64> {
        self.requests
            .lock()
            .iter()
            .rev()
            .find(|r| r.token == token)
            .map(|r| r.request_id)
    }

    /// Requests the transport has "written", in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn wait_for_requests(&self, count: usize) -> Vec<Request> {
        let deadline = Instant::now() + WAIT;
        let mut requests = self.requests.lock();
        while requests.len() < count {
            if self.cond.wait_until(&mut requests, deadline).timed_out() {
                break;
            }
        }
        requests.clone()
    }

    /// Replies to the most recent request written for `token`.
    pub fn reply(&self, token: u64, frame: RespFrame) {
        self.send(LinkEvent::Reply {
            token,
            request_id: None,
            frame,
        });
    }

    /// Replies to one specific request, even if its token was reused since.
    pub fn reply_to(&self, request: &Request, frame: RespFrame) {
        self.send(LinkEvent::Reply {
            token: request.token,
            request_id: Some(request.request_id),
            frame,
        });
    }

    /// Makes the transport fail as if the connection dropped.
    pub fn disconnect(&self) {
        self.send(LinkEvent::Disconnect);
    }

    fn send(&self, event: LinkEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

enum ConnectBehavior {
    Succeed,
    Fail(BridgeError),
    Hang,
}

/// A connector whose transport is driven by a `TransportLink`.
pub struct ScriptedConnector {
    link: Arc<TransportLink>,
    behavior: ConnectBehavior,
    write_delay: Option<Duration>,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, Arc<TransportLink>) {
        Self::build(ConnectBehavior::Succeed, None)
    }

    /// Every request takes `delay` to "write".
    pub fn with_write_delay(delay: Duration) -> (Arc<Self>, Arc<TransportLink>) {
        Self::build(ConnectBehavior::Succeed, Some(delay))
    }

    pub fn failing(err: BridgeError) -> Arc<Self> {
        Self::build(ConnectBehavior::Fail(err), None).0
    }

    /// Never finishes connecting.
    pub fn hanging() -> Arc<Self> {
        Self::build(ConnectBehavior::Hang, None).0
    }

    fn build(
        behavior: ConnectBehavior,
        write_delay: Option<Duration>,
    ) -> (Arc<Self>, Arc<TransportLink>) {
        let link = Arc::new(TransportLink::default());
        let connector = Arc::new(Self {
            link: Arc::clone(&link),
            behavior,
            write_delay,
        });
        (connector, link)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _spec: &ConnectionSpec) -> Result<Box<dyn Transport>, BridgeError> {
        match &self.behavior {
            ConnectBehavior::Succeed => {
                let (tx, rx) = mpsc::unbounded_channel();
                *self.link.events.lock() = Some(tx);
                Ok(Box::new(ScriptedTransport {
                    link: Arc::clone(&self.link),
                    events: rx,
                    write_delay: self.write_delay,
                }))
            }
            ConnectBehavior::Fail(e) => Err(e.clone()),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }
}

struct ScriptedTransport {
    link: Arc<TransportLink>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    write_delay: Option<Duration>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn run(
        self: Box<Self>,
        mut requests: mpsc::UnboundedReceiver<Request>,
        completions: Arc<Completions>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), BridgeError> {
        let ScriptedTransport {
            link,
            mut events,
            write_delay,
        } = *self;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => return Ok(()),
                event = events.recv() => match event {
                    Some(LinkEvent::Reply { token, request_id, frame }) => {
                        if let Some(id) = request_id.or_else(|| link.latest_request_id(token)) {
                            completions.complete_reply(token, id, frame);
                        }
                    }
                    Some(LinkEvent::Disconnect) => {
                        return Err(BridgeError::ConnectionLost("scripted disconnect".to_string()));
                    }
                    None => return Ok(()),
                },
                request = requests.recv() => {
                    let Some(request) = request else {
                        return Ok(());
                    };
                    if let Some(delay) = write_delay {
                        tokio::time::sleep(delay).await;
                    }
                    link.record(request);
                }
            }
        }
    }
}

/// A spec for scripted clients: no request deadline, small runtime.
pub fn test_spec() -> ConnectionSpec {
    ConnectionSpec {
        request_timeout: Duration::ZERO,
        io_threads: 1,
        ..ConnectionSpec::default()
    }
}

/// A client wired to a scripted transport.
pub struct ScriptedClient {
    pub client: Arc<Client>,
    pub link: Arc<TransportLink>,
    pub callbacks: Arc<RecordingCallbacks>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::with_spec(test_spec())
    }

    pub fn with_spec(spec: ConnectionSpec) -> Self {
        init_test_logging();
        let (connector, link) = ScriptedConnector::new();
        let callbacks = RecordingCallbacks::new();
        let client = Client::create_with_connector(&spec, callbacks.clone(), connector)
            .expect("scripted client should connect");
        Self {
            client: Arc::new(client),
            link,
            callbacks,
        }
    }
}

// ===== Loopback RESP server =====

type Store = Arc<Mutex<HashMap<Bytes, Bytes>>>;

enum Action {
    Reply(RespFrame),
    SleepThenOk(u64),
    Hangup,
    /// `CLIENT REPLY OFF|SKIP`: no reply for this command, then none at all
    /// (`OFF`) or none for the next command (`SKIP`).
    Silence { until_on: bool },
    /// `CLIENT REPLY ON`.
    Unmute,
}

/// A tiny RESP server on 127.0.0.1, running on its own thread.
///
/// Understands PING, ECHO, SET, GET, INCR, LRANGE (fixed array), EXEC (always
/// aborts), SLEEP ms (delays its reply), DROP (closes the socket), and the
/// handshake commands AUTH, HELLO, SELECT, CLIENT. `CLIENT REPLY OFF|SKIP`
/// suppress replies the way a real server does.
pub struct LoopbackServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Vec<String>>>>,
}

impl LoopbackServer {
    pub fn start() -> Self {
        Self::spawn(None)
    }

    /// Like `start`, but every connection must complete a TLS handshake with a
    /// self-signed certificate for `127.0.0.1` and `localhost`.
    pub fn start_tls() -> Self {
        Self::spawn(Some(loopback_tls_acceptor()))
    }

    fn spawn(tls: Option<TlsAcceptor>) -> Self {
        init_test_logging();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        listener
            .set_nonblocking(true)
            .expect("set listener non-blocking");
        let addr = listener.local_addr().expect("listener address");

        let received = Arc::new(Mutex::new(Vec::new()));
        let server_received = Arc::clone(&received);
        let store: Store = Arc::new(Mutex::new(HashMap::new()));

        std::thread::Builder::new()
            .name("loopback-server".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("loopback runtime");
                rt.block_on(async move {
                    let listener =
                        tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                    loop {
                        let Ok((socket, _)) = listener.accept().await else {
                            continue;
                        };
                        let received = Arc::clone(&server_received);
                        let store = Arc::clone(&store);
                        match tls.clone() {
                            None => {
                                tokio::spawn(serve_connection(socket, received, store));
                            }
                            Some(acceptor) => {
                                tokio::spawn(async move {
                                    // A client that rejects the certificate aborts here.
                                    if let Ok(stream) = acceptor.accept(socket).await {
                                        serve_connection(stream, received, store).await;
                                    }
                                });
                            }
                        }
                    }
                });
            })
            .expect("spawn loopback server");

        Self { addr, received }
    }

    /// A spec pointing at this server with a generous request deadline.
    pub fn spec(&self) -> ConnectionSpec {
        ConnectionSpec {
            addresses: vec![NodeAddress {
                host: "127.0.0.1".to_string(),
                port: self.addr.port(),
            }],
            request_timeout: Duration::from_secs(5),
            io_threads: 1,
            ..ConnectionSpec::default()
        }
    }

    /// Every command received so far, as text.
    pub fn received(&self) -> Vec<Vec<String>> {
        self.received.lock().clone()
    }
}

fn loopback_tls_acceptor() -> TlsAcceptor {
    let fixtures = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let cert_pem = std::fs::read(fixtures.join("loopback-cert.pem")).expect("read test certificate");
    let key_pem = std::fs::read(fixtures.join("loopback-key.pem")).expect("read test key");

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .expect("parse test certificate");
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .expect("parse test key")
        .expect("test key present");

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("build TLS server config");
    TlsAcceptor::from(Arc::new(config))
}

async fn serve_connection<S>(socket: S, received: Arc<Mutex<Vec<Vec<String>>>>, store: Store)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, RespFrameCodec);
    let mut muted = false;
    let mut skip_next = false;
    while let Some(Ok(frame)) = framed.next().await {
        let reply = match respond(frame, &received, &store) {
            Action::Unmute => {
                muted = false;
                RespFrame::SimpleString("OK".to_string())
            }
            Action::Reply(reply) => reply,
            Action::SleepThenOk(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                RespFrame::SimpleString("OK".to_string())
            }
            Action::Hangup => return,
            Action::Silence { until_on } => {
                muted |= until_on;
                skip_next = !until_on;
                continue;
            }
        };
        if muted {
            continue;
        }
        if skip_next {
            skip_next = false;
            continue;
        }
        if framed.send(reply).await.is_err() {
            return;
        }
    }
}

fn respond(frame: RespFrame, received: &Mutex<Vec<Vec<String>>>, store: &Store) -> Action {
    let RespFrame::Array(items) = frame else {
        return Action::Reply(RespFrame::Error("ERR expected an array".to_string()));
    };
    let parts: Vec<Bytes> = items
        .into_iter()
        .filter_map(|f| match f {
            RespFrame::BulkString(b) => Some(b),
            _ => None,
        })
        .collect();
    let words: Vec<String> = parts
        .iter()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect();
    received.lock().push(words.clone());

    let ok = || Action::Reply(RespFrame::SimpleString("OK".to_string()));
    let wrong_pass =
        || Action::Reply(RespFrame::Error("WRONGPASS invalid username-password pair".to_string()));
    let name = words
        .first()
        .map(|w| w.to_ascii_uppercase())
        .unwrap_or_default();

    match name.as_str() {
        "PING" => Action::Reply(RespFrame::SimpleString("PONG".to_string())),
        "ECHO" if parts.len() == 2 => Action::Reply(RespFrame::BulkString(parts[1].clone())),
        "SET" if parts.len() >= 3 => {
            store.lock().insert(parts[1].clone(), parts[2].clone());
            ok()
        }
        "GET" if parts.len() == 2 => Action::Reply(
            store
                .lock()
                .get(&parts[1])
                .cloned()
                .map_or(RespFrame::Null, RespFrame::BulkString),
        ),
        "INCR" => Action::Reply(RespFrame::Integer(1)),
        "LRANGE" => Action::Reply(RespFrame::Array(vec![
            RespFrame::BulkString(bulk("a")),
            RespFrame::BulkString(bulk("b")),
        ])),
        "EXEC" => Action::Reply(RespFrame::Error(
            "EXECABORT Transaction discarded because of previous errors.".to_string(),
        )),
        "SLEEP" => Action::SleepThenOk(words.get(1).and_then(|w| w.parse().ok()).unwrap_or(0)),
        "DROP" => Action::Hangup,
        "AUTH" => {
            if words.last().map(String::as_str) == Some(LOOPBACK_PASSWORD) {
                ok()
            } else {
                wrong_pass()
            }
        }
        "HELLO" => {
            let has_auth = words.iter().any(|w| w.eq_ignore_ascii_case("AUTH"));
            if has_auth && words.last().map(String::as_str) != Some(LOOPBACK_PASSWORD) {
                return wrong_pass();
            }
            Action::Reply(RespFrame::Map(vec![
                (
                    RespFrame::BulkString(bulk("server")),
                    RespFrame::BulkString(bulk("loopback")),
                ),
                (RespFrame::BulkString(bulk("proto")), RespFrame::Integer(3)),
            ]))
        }
        "CLIENT" if words.get(1).is_some_and(|w| w.eq_ignore_ascii_case("REPLY")) => {
            match words.get(2).map(|w| w.to_ascii_uppercase()).as_deref() {
                Some("OFF") => Action::Silence { until_on: true },
                Some("SKIP") => Action::Silence { until_on: false },
                _ => Action::Unmute,
            }
        }
        "SELECT" | "CLIENT" => ok(),
        _ => Action::Reply(RespFrame::Error(format!("ERR unknown command '{name}'"))),
    }
}

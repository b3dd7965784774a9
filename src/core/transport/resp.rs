// src/core/transport/resp.rs

//! The RESP transport: one framed connection, requests written in order,
//! replies matched to requests first-in first-out.

use super::stream::ClientStream;
use super::{Connector, Request, Transport};
use crate::config::{ConnectionSpec, NodeAddress, ProtocolVersion};
use crate::core::BridgeError;
use crate::core::delivery::Completions;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

/// How many queued requests are written before a flush.
const MAX_WRITE_BATCH: usize = 256;

/// Connects to the first reachable address of a spec and runs the handshake.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespConnector;

#[async_trait]
impl Connector for RespConnector {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Transport>, BridgeError> {
        let mut last_err = None;
        for address in &spec.addresses {
            info!("Attempting to connect to {address}.");
            match ClientStream::connect(address, spec.tls_mode).await {
                Ok(stream) => {
                    let tls = stream.is_tls();
                    let mut framed = Framed::new(stream, RespFrameCodec);
                    handshake(&mut framed, spec).await?;
                    info!("Connected to {address} (tls: {tls}).");
                    return Ok(Box::new(RespTransport {
                        framed,
                        address: address.clone(),
                    }));
                }
                Err(e) => {
                    warn!("Failed to connect to {address}: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| BridgeError::InvalidConfig("no addresses configured".to_string())))
    }
}

/// Sends the setup commands the connection settings ask for.
async fn handshake(
    framed: &mut Framed<ClientStream, RespFrameCodec>,
    spec: &ConnectionSpec,
) -> Result<(), BridgeError> {
    let auth = spec.authentication.as_ref();

    if spec.protocol == ProtocolVersion::Resp3 {
        let mut hello = vec![Bytes::from_static(b"HELLO"), Bytes::from_static(b"3")];
        if let Some(auth) = auth {
            hello.push(Bytes::from_static(b"AUTH"));
            hello.push(Bytes::from(
                auth.username.clone().unwrap_or_else(|| "default".to_string()),
            ));
            hello.push(Bytes::from(auth.password.clone()));
        }
        roundtrip(framed, RespFrame::command(hello)).await?;
    } else if let Some(auth) = auth {
        let mut cmd = vec![Bytes::from_static(b"AUTH")];
        if let Some(username) = &auth.username {
            cmd.push(Bytes::from(username.clone()));
        }
        cmd.push(Bytes::from(auth.password.clone()));
        roundtrip(framed, RespFrame::command(cmd)).await?;
    }

    if spec.database_id != 0 {
        let mut buf = itoa::Buffer::new();
        let db = Bytes::copy_from_slice(buf.format(spec.database_id).as_bytes());
        roundtrip(framed, RespFrame::command([Bytes::from_static(b"SELECT"), db])).await?;
    }

    if let Some(name) = &spec.client_name {
        roundtrip(
            framed,
            RespFrame::command([
                Bytes::from_static(b"CLIENT"),
                Bytes::from_static(b"SETNAME"),
                Bytes::from(name.clone()),
            ]),
        )
        .await?;
    }

    debug!("Handshake completed.");
    Ok(())
}

/// Writes one command and waits for its reply, turning error replies into errors.
async fn roundtrip(
    framed: &mut Framed<ClientStream, RespFrameCodec>,
    command: RespFrame,
) -> Result<RespFrame, BridgeError> {
    framed.send(command).await?;
    loop {
        match framed.next().await {
            Some(Ok(RespFrame::Push(_))) => continue,
            Some(Ok(RespFrame::Error(message))) => {
                return Err(BridgeError::from_server_reply(message));
            }
            Some(Ok(frame)) => return Ok(frame),
            Some(Err(e)) => return Err(e),
            None => {
                return Err(BridgeError::ConnectionLost(
                    "server closed the connection during handshake".to_string(),
                ));
            }
        }
    }
}

/// A connected RESP transport.
pub struct RespTransport {
    framed: Framed<ClientStream, RespFrameCodec>,
    address: NodeAddress,
}

#[async_trait]
impl Transport for RespTransport {
    async fn run(
        self: Box<Self>,
        mut requests: mpsc::UnboundedReceiver<Request>,
        completions: Arc<Completions>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), BridgeError> {
        let RespTransport {
            mut framed,
            address,
        } = *self;
        // (token, request_id) of written requests, oldest first.
        let mut in_flight: VecDeque<(u64, u64)> = VecDeque::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    debug!("Transport to {address} shutting down with {} replies outstanding.", in_flight.len());
                    return Ok(());
                }

                request = requests.recv() => {
                    let Some(first) = request else {
                        return Ok(());
                    };
                    let mut next = Some(first);
                    let mut written = 0;
                    while let Some(req) = next {
                        in_flight.push_back((req.token, req.request_id));
                        framed.feed(req.frame).await?;
                        written += 1;
                        next = if written < MAX_WRITE_BATCH {
                            requests.try_recv().ok()
                        } else {
                            None
                        };
                    }
                    framed.flush().await?;
                    trace!("Wrote {written} requests to {address}.");
                }

                frame = framed.next() => match frame {
                    Some(Ok(RespFrame::Push(_))) => {
                        trace!("Ignoring push message from {address}.");
                    }
                    Some(Ok(frame)) => {
                        let Some((token, request_id)) = in_flight.pop_front() else {
                            return Err(BridgeError::Protocol(
                                "received a reply with no request in flight".to_string(),
                            ));
                        };
                        completions.complete_reply(token, request_id, frame);
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(BridgeError::ConnectionLost(format!(
                            "{address} closed the connection"
                        )));
                    }
                },
            }
        }
    }
}

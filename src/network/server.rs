//! WebSocket listener the phones dial into.
//!
//! Each phone is configured with a "Control Server URL" of
//! `ws://<host>:<port>/` and keeps one connection open. This module owns the
//! sockets and turns their lifecycle into `SessionRegistry` callbacks; all
//! correlation happens in the registry.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::session_registry::SessionRegistry;
use super::transport::{ConnectionIdAllocator, PeerId, WsTransport};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Accept phone connections until `shutdown` fires.
pub async fn start_ws_server(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    transport: Arc<WsTransport>,
    heartbeat: Duration,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    let ids = Arc::new(ConnectionIdAllocator::new());

    tracing::info!(
        "✅ Remote SDK server listening on {}",
        listener.local_addr()?
    );

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        tracing::debug!("📡 WebSocket connection from {}", addr);
                        let registry = registry.clone();
                        let transport = transport.clone();
                        let ids = ids.clone();
                        let conn_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(
                                stream, addr, registry, transport, &ids, heartbeat, conn_shutdown,
                            )
                            .await
                            {
                                tracing::debug!("WebSocket connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("WebSocket accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("🛑 Remote SDK server shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    transport: Arc<WsTransport>,
    ids: &ConnectionIdAllocator,
    heartbeat: Duration,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let identity = PeerId::from_socket_addr(&addr);
    let connection = ids.allocate();
    let mut outbound = transport.register(connection);
    registry.on_connect(identity, connection);

    let mut heartbeat = tokio::time::interval(heartbeat);
    heartbeat.tick().await;

    let result: Result<(), BoxError> = loop {
        tokio::select! {
            // Incoming frame from the phone
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        registry.on_message(identity, connection, text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => registry.on_message(identity, connection, text),
                        Err(_) => tracing::warn!(
                            peer = %identity, %connection,
                            "Dropping non UTF-8 binary frame ({} bytes)", data.len()
                        ),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                            break Err(e.into());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket receive error from {}: {}", addr, e);
                        break Ok(());
                    }
                    _ => {}
                }
            }

            // Outgoing request queued by a PeerSession
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        let closing = matches!(frame, Message::Close(_));
                        if let Err(e) = ws_sender.send(frame).await {
                            break Err(e.into());
                        }
                        if closing {
                            break Ok(());
                        }
                    }
                    // Unregistered by a reconnect from the same peer
                    None => break Ok(()),
                }
            }

            _ = heartbeat.tick() => {
                if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break Ok(());
                }
            }

            _ = shutdown.cancelled() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break Ok(());
            }
        }
    };

    transport.unregister(connection);
    registry.on_disconnect(identity, connection);
    result
}

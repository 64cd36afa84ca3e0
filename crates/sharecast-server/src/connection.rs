//! WebSocket signaling endpoint: accept loop and per-connection task.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use sharecast_common::{ConnectionId, ServerMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::coordinator::SessionCoordinator;

/// Accept signaling connections forever, one task each.
pub async fn serve(listener: TcpListener, coordinator: Arc<SessionCoordinator>, capacity: usize) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, coordinator, capacity).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}

/// Handle a single WebSocket connection until it closes.
pub async fn handle_connection<S>(
    ws: WebSocketStream<S>,
    addr: SocketAddr,
    coordinator: Arc<SessionCoordinator>,
    capacity: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let conn = ConnectionId::new();

    // 1. Register before greeting so no broadcast can slip past us.
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(capacity.max(1));
    coordinator.connections().register(conn.clone(), tx).await;
    tracing::info!(peer = %addr, connection = %conn, "Client connected");

    // 2. Welcome is always the first frame.
    let welcome = ServerMessage::Welcome {
        connection_id: conn.clone(),
    };
    if send_message(&mut sink, &welcome).await.is_err() {
        coordinator.disconnect(&conn).await;
        return;
    }

    // 3. Forwarding loop.
    loop {
        tokio::select! {
            Some(msg) = rx.recv() => {
                if send_message(&mut sink, &msg).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        coordinator.handle_frame(&conn, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        coordinator
                            .connections()
                            .send(&conn, ServerMessage::error("binary frames are not supported"))
                            .await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 4. Cleanup: leave every room this connection joined.
    tracing::info!(peer = %addr, connection = %conn, "Client disconnected");
    coordinator.disconnect(&conn).await;
}

async fn send_message<K>(sink: &mut K, msg: &ServerMessage) -> Result<(), K::Error>
where
    K: Sink<Message> + Unpin,
{
    sink.send(Message::Text(msg.encode().into())).await
}

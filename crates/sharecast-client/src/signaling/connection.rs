//! Background WebSocket connection loop with auto-reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sharecast_common::ServerMessage;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::types::{SignalingCommand, SignalingConfig, SignalingEvent};

/// How a live connection ended.
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    /// The socket dropped; reconnect.
    Lost,
    /// The application asked us to stop.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the WebSocket connection with auto-reconnect.
pub(crate) async fn connection_loop(
    config: SignalingConfig,
    connected: Arc<RwLock<bool>>,
    event_tx: mpsc::Sender<SignalingEvent>,
    mut command_rx: mpsc::Receiver<SignalingCommand>,
) {
    let mut reconnect_delay = config.reconnect_delay_secs;

    loop {
        info!(url = %config.url, "Connecting to signaling server");

        match tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            tokio_tungstenite::connect_async(config.url.as_str()),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                *connected.write().await = true;
                let _ = event_tx.send(SignalingEvent::Connected).await;

                let exit = run_connection(ws_stream, &event_tx, &mut command_rx).await;

                *connected.write().await = false;
                let _ = event_tx.send(SignalingEvent::Disconnected).await;
                if exit == Exit::Shutdown {
                    info!("Signaling connection closed");
                    return;
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to signaling server");
                let _ = event_tx
                    .send(SignalingEvent::Error(format!("Connection failed: {e}")))
                    .await;
            }
            Err(_elapsed) => {
                error!(
                    timeout = config.connect_timeout_secs,
                    "Signaling connection timed out"
                );
                let _ = event_tx
                    .send(SignalingEvent::Error(format!(
                        "Connection timed out after {}s",
                        config.connect_timeout_secs
                    )))
                    .await;
            }
        }

        info!(delay = reconnect_delay, "Reconnecting in {} seconds", reconnect_delay);
        if wait_or_shutdown(Duration::from_secs(reconnect_delay), &mut command_rx).await {
            return;
        }
        reconnect_delay = config.next_delay(reconnect_delay);
    }
}

/// Pump one live socket until it drops or a disconnect is requested.
async fn run_connection(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    event_tx: &mpsc::Sender<SignalingEvent>,
    command_rx: &mut mpsc::Receiver<SignalingCommand>,
) -> Exit {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(SignalingCommand::Send(msg)) => {
                    debug!(event = msg.event_name(), "Sending signaling message");
                    if ws_write.send(WsMessage::Text(msg.encode().into())).await.is_err() {
                        return Exit::Lost;
                    }
                }
                Some(SignalingCommand::Disconnect) | None => {
                    let _ = ws_write.send(WsMessage::Close(None)).await;
                    return Exit::Shutdown;
                }
            },

            frame = ws_read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match ServerMessage::decode(text.as_str()) {
                    Ok(msg) => {
                        let _ = event_tx.send(SignalingEvent::Message(msg)).await;
                    }
                    Err(e) => {
                        debug!(error = %e, "Unrecognized message from signaling server");
                    }
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = ws_write.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("Signaling server closed connection");
                    return Exit::Lost;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    return Exit::Lost;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Sleep for the backoff delay. Returns true if a disconnect arrived first.
/// Messages queued while offline are dropped.
async fn wait_or_shutdown(
    delay: Duration,
    command_rx: &mut mpsc::Receiver<SignalingCommand>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            cmd = command_rx.recv() => match cmd {
                Some(SignalingCommand::Send(msg)) => {
                    debug!(event = msg.event_name(), "Offline, dropping message");
                }
                Some(SignalingCommand::Disconnect) | None => return true,
            },
        }
    }
}

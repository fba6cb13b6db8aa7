//! WebSocket upgrade handlers (SPEC_FULL.md §4.8): the live polling-data
//! feed and the derived equipment-status feed share one connection-driving
//! shape — accept, spawn a send-loop off the broadcaster's per-client
//! channel, read incoming frames only to detect disconnect and reset the
//! idle timer, and ping after `HEARTBEAT_IDLE` with nothing received.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::AppState;

const HEARTBEAT_IDLE: Duration = Duration::from_secs(120);

pub async fn monitor_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (id, rx) = state.monitor_broadcaster.register().await;
        drive_connection(socket, rx).await;
        state.monitor_broadcaster.unregister(id).await;
    })
}

pub async fn status_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (id, rx) = state.status_broadcaster.register().await;
        drive_connection(socket, rx).await;
        state.status_broadcaster.unregister(id).await;
    })
}

/// Runs until the client disconnects: forwards every message the
/// broadcaster queues for this client, answers pings, and sends its own
/// heartbeat ping if nothing has arrived from the client in
/// `HEARTBEAT_IDLE`.
async fn drive_connection(mut socket: WebSocket, mut rx: tokio::sync::mpsc::UnboundedReceiver<Message>) {
    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        if socket.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive error");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(HEARTBEAT_IDLE) => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    info!("websocket connection closed");
}

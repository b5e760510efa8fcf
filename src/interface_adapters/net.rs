// WebSocket transport adapter for the sync endpoint.
//
// One task per connection. The task owns the socket and alternates between
// the inbound stream and the session's outbound queue; sync logic itself
// never touches the socket. Frames are processed in arrival order for a
// given connection, so per-connection handling needs no extra locking.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn};

use crate::frameworks::config;
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::sync::SyncService;
use crate::interface_adapters::utils::ids::next_conn_id;
use crate::use_cases::Session;

enum LoopControl {
    Continue,
    Disconnect(Option<CloseFrame>),
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_frame_size(config::MAX_FRAME_BYTES)
        .max_message_size(config::MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let conn_id = next_conn_id();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Utf8Bytes>(config::OUTBOUND_QUEUE_CAPACITY);
    let session = state.sessions.create(conn_id, outbound_tx);

    let span = info_span!("conn", conn_id, session_id = %session.session_id());
    let _enter = span.enter();
    info!("client connected");

    let close_frame = run_connection(&mut socket, &mut outbound_rx, &session, &state.sync).await;

    // Leave the room first so the remaining residents hear PLAYER_LEFT,
    // then drop the registry entry. Runs exactly once per connection.
    state.sync.handle_disconnect(&session);
    state.sessions.remove(conn_id);

    if let Some(frame) = close_frame {
        let _ = socket.send(Message::Close(Some(frame))).await;
    }
    let _ = socket.close().await;
}

async fn run_connection(
    socket: &mut WebSocket,
    outbound_rx: &mut mpsc::Receiver<Utf8Bytes>,
    session: &Arc<Session>,
    sync: &SyncService,
) -> Option<CloseFrame> {
    loop {
        tokio::select! {
            // Inbound frame, bounded by the read-idle window. Write idle is
            // fine; only a silent reader gets disconnected.
            incoming = timeout(config::READ_IDLE_TIMEOUT, socket.recv()) => {
                match incoming {
                    Ok(frame) => match handle_incoming(frame, session, sync) {
                        LoopControl::Continue => {}
                        LoopControl::Disconnect(close_frame) => return close_frame,
                    },
                    Err(_) => {
                        warn!("read idle timeout; closing connection");
                        return Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: "idle timeout".into(),
                        });
                    }
                }
            }

            // Outbound frame queued by the sync service.
            queued = outbound_rx.recv() => {
                match queued {
                    Some(frame) => {
                        if let Err(e) = socket.send(Message::Text(frame)).await {
                            debug!(error = %e, "failed to write frame; disconnecting");
                            return None;
                        }
                    }
                    // Sender side gone; the registry entry was dropped.
                    None => return None,
                }
            }
        }
    }
}

fn handle_incoming(
    incoming: Option<Result<Message, axum::Error>>,
    session: &Arc<Session>,
    sync: &SyncService,
) -> LoopControl {
    match incoming {
        Some(Ok(Message::Text(text))) => {
            sync.handle_frame(session, text.as_str());
            LoopControl::Continue
        }
        Some(Ok(Message::Binary(_))) => LoopControl::Disconnect(Some(CloseFrame {
            code: close_code::UNSUPPORTED,
            reason: "binary frames not supported".into(),
        })),
        // The transport answers pings on its own; neither direction carries
        // sync traffic.
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => LoopControl::Continue,
        Some(Ok(Message::Close(_))) => LoopControl::Disconnect(None),
        Some(Err(e)) => {
            warn!(error = %e, "websocket recv error");
            LoopControl::Disconnect(None)
        }
        None => {
            info!("websocket closed");
            LoopControl::Disconnect(None)
        }
    }
}

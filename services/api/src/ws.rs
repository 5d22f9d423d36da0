//! WebSocket connection handling.
//!
//! The handler is the sole producer into its session's event queue and the
//! sole owner of the socket. All session mutation happens in the worker; the
//! handler only parses inbound messages and forwards outbound ones.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use viva_core::extract::KeywordExtractor;
use viva_core::fusion::ContextFusion;
use viva_core::protocol::{ClientMessage, ServerMessage};
use viva_core::registry::SessionHandle;
use viva_core::worker::{InboundEvent, SessionWorker};

use crate::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    let handle = state.registry.create(session_id).await;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    handle.session.lock().await.transport = Some(out_tx);

    let (event_tx, event_rx) = mpsc::unbounded_channel::<InboundEvent>();
    let fusion = ContextFusion::new(
        state.ocr.clone(),
        state.transcriber.clone(),
        Box::new(KeywordExtractor),
    );
    let worker = SessionWorker::new(
        handle.session.clone(),
        event_rx,
        fusion,
        state.generator.clone(),
    );
    tokio::spawn(worker.run(handle.cancel.clone()));

    info!(%session_id, "interview session connected");

    if send_json(&mut socket, &ServerMessage::SessionId { session_id })
        .await
        .is_err()
    {
        teardown(&state, session_id, &handle).await;
        return;
    }

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if send_json(&mut socket, &msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(ClientMessage::Frame { data }) => {
                                let _ = event_tx.send(InboundEvent::Frame(data));
                            }
                            Ok(ClientMessage::Audio { data }) => {
                                let _ = event_tx.send(InboundEvent::Audio(data));
                            }
                            Err(e) => {
                                warn!(%session_id, error = %e, "unparseable client message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%session_id, "client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        info!(%session_id, error = %e, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    teardown(&state, session_id, &handle).await;
}

async fn send_json(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize outbound message");
            Ok(())
        }
    }
}

/// Detaches the transport and stops the worker right away, but keeps the
/// registry entry around for the linger window so `/report/{id}` still works
/// after the call ends.
async fn teardown(state: &AppState, session_id: Uuid, handle: &SessionHandle) {
    handle.session.lock().await.transport = None;
    handle.cancel.cancel();

    let registry = state.registry.clone();
    let linger = state.session_linger;
    tokio::spawn(async move {
        tokio::time::sleep(linger).await;
        registry.remove(session_id).await;
        info!(%session_id, "lingered session removed");
    });
}

//! The WebSocket endpoint: frames in, events out.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{user_of, AppState};
use crate::protocol::{ClientFrame, ServerFrame};

#[derive(Deserialize)]
pub struct WsQuery {
    pub conversation_id: String,
}

/// GET /ws?conversation_id=...
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user = match user_of(&headers) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user, query.conversation_id))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, user: String, conversation: String) {
    let orchestrator = Arc::clone(&state.orchestrator);
    let (session, mut outbound) = orchestrator.sessions.connect(&user, &conversation).await;
    let key = session.key();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            // events to the client, FIFO
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let body = match serde_json::to_string(&frame) {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode frame");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(body)).await.is_err() {
                    tracing::info!(user = %user, "socket send failed");
                    break;
                }
            }

            // frames from the client
            incoming = stream.next() => {
                let Some(Ok(message)) = incoming else { break };
                let WsMessage::Text(body) = message else { continue };
                let frame = match serde_json::from_str::<ClientFrame>(&body) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "ignoring malformed frame");
                        continue;
                    }
                };
                session.touch();
                match frame {
                    ClientFrame::Request { request_id, text, doc_ids, provider } => {
                        let orchestrator = Arc::clone(&orchestrator);
                        let session = Arc::clone(&session);
                        tokio::spawn(async move {
                            orchestrator
                                .handle_request(session, request_id, text, doc_ids, provider)
                                .await;
                        });
                    }
                    ClientFrame::InterruptReply { request_id, text } => {
                        let orchestrator = Arc::clone(&orchestrator);
                        let session = Arc::clone(&session);
                        tokio::spawn(async move {
                            orchestrator
                                .handle_interrupt_reply(session, request_id, text)
                                .await;
                        });
                    }
                    ClientFrame::Cancel { request_id } => {
                        let orchestrator = Arc::clone(&orchestrator);
                        let session = Arc::clone(&session);
                        tokio::spawn(async move {
                            orchestrator.handle_cancel(session, request_id).await;
                        });
                    }
                    ClientFrame::Ping => {
                        session.emit(ServerFrame::Pong, Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    orchestrator.sessions.disconnect(&key);
    tracing::info!(user = %user, conversation = %conversation, "socket closed");
}

//! WebSocket endpoints for live meeting/room/session streams.
//!
//! Flow:
//! 1. Observer connects to `/api/stream/meeting/{code}` (agents append
//!    `?token=<bearer>`; an invalid token closes the socket with 4001).
//! 2. The connection subscribes to the topic on the event bus — kicked
//!    agent names are refused with close code 4003.
//! 3. A writer task drains the bus sink onto the socket; the reader loop
//!    accepts `identify`, `directive`, `human_message`, and
//!    `external_agent_response` client messages.

use std::borrow::Cow;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use quorum_protocol::{
    meeting_topic, room_topic, session_topic, ClientMessage, ServerEvent, CLOSE_KICKED,
    CLOSE_UNAUTHORIZED,
};
use quorum_store::Credential;

use crate::events::{ObserverConn, ObserverMessage};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Bearer token for agent connections; humans may omit it.
    pub token: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn meeting_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let topic = meeting_topic(&code);
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic, Some(code), query.token))
}

pub async fn room_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let topic = room_topic(&code);
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic, None, query.token))
}

pub async fn session_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let topic = session_topic(&session_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic, None, query.token))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })))
        .await;
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    topic: String,
    meeting_code: Option<String>,
    token: Option<String>,
) {
    // A presented token must verify; a missing token is a read-only
    // human observer.
    let credential: Option<Credential> = match token {
        Some(raw) => match state.credentials.verify(&raw) {
            Some(cred) => Some(cred),
            None => {
                tracing::warn!(topic = %topic, "stream auth failed");
                close_with(&mut socket, CLOSE_UNAUTHORIZED, "invalid token").await;
                return;
            }
        },
        None => None,
    };

    let conn_id = uuid::Uuid::new_v4().to_string();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ObserverMessage>(64);
    let conn = ObserverConn {
        id: conn_id.clone(),
        name: credential
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "observer".into()),
        participant_kind: if credential.is_some() { "agent" } else { "human" }.into(),
        agent_name: credential.as_ref().map(|c| c.name.clone()),
        sink: outbound_tx.clone(),
    };

    if state.services.bus.subscribe(&topic, conn).is_err() {
        close_with(&mut socket, CLOSE_KICKED, "kicked").await;
        return;
    }

    tracing::debug!(
        topic = %topic,
        agent = credential.as_ref().map(|c| c.name.as_str()).unwrap_or("-"),
        "observer connected"
    );

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer task: forwards bus messages to the socket.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            match msg {
                ObserverMessage::Event(json) => {
                    if ws_sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                ObserverMessage::Kick => {
                    let _ = ws_sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_KICKED,
                            reason: Cow::Borrowed("kicked"),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Reader loop: client messages from this observer.
    let mut identified_name: Option<String> = None;
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                    tracing::debug!(topic = %topic, "ignoring unparseable client message");
                    continue;
                };
                if handle_client_message(
                    &state,
                    &topic,
                    meeting_code.as_deref(),
                    client_msg,
                    &credential,
                    &mut identified_name,
                    &outbound_tx,
                )
                .is_break()
                {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Cleanup: leave the topic, stop the writer, announce the exit.
    state.services.bus.unsubscribe(&topic, &conn_id);
    writer.abort();
    if let Some(name) = identified_name {
        state
            .services
            .bus
            .broadcast(&topic, &ServerEvent::ParticipantLeft { name });
    }
    tracing::debug!(topic = %topic, "observer disconnected");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn handle_client_message(
    state: &AppState,
    topic: &str,
    meeting_code: Option<&str>,
    msg: ClientMessage,
    credential: &Option<Credential>,
    identified_name: &mut Option<String>,
    outbound: &mpsc::Sender<ObserverMessage>,
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    match msg {
        ClientMessage::Identify {
            name,
            participant_type,
            agent_name,
        } => {
            if let Some(agent) = &agent_name {
                if state.services.bus.is_kicked(topic, agent) {
                    let _ = outbound.try_send(ObserverMessage::Kick);
                    return ControlFlow::Break(());
                }
            }
            *identified_name = Some(name.clone());
            state.services.bus.broadcast(
                topic,
                &ServerEvent::ParticipantJoined {
                    name,
                    participant_type,
                },
            );
        }

        ClientMessage::Directive { text, from_name } => {
            let Some(orchestrator) =
                meeting_code.and_then(|code| state.services.registry.lookup(code))
            else {
                return ControlFlow::Continue(());
            };
            if let Err(e) = orchestrator.add_directive(&text, &from_name) {
                tracing::warn!(topic = %topic, error = %e, "directive via stream failed");
            }
        }

        ClientMessage::HumanMessage { text, from_name } => {
            if let Some(orchestrator) =
                meeting_code.and_then(|code| state.services.registry.lookup(code))
            {
                orchestrator.add_human_message(&text, &from_name);
            }
        }

        ClientMessage::ExternalAgentResponse {
            agent_name,
            response,
        } => {
            // Authenticated connections answer only as themselves.
            let effective_name = credential
                .as_ref()
                .map(|c| c.name.clone())
                .unwrap_or(agent_name);
            if let Some(orchestrator) =
                meeting_code.and_then(|code| state.services.registry.lookup(code))
            {
                if let Err(e) =
                    orchestrator.submit_external_response(&effective_name, &response)
                {
                    tracing::debug!(
                        topic = %topic,
                        agent = %effective_name,
                        error = %e,
                        "stream response had no pending turn"
                    );
                }
            }
        }
    }
    ControlFlow::Continue(())
}

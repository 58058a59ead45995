//! Meeting endpoints: create/list/inspect, lifecycle (start, stop,
//! pause, resume), external turn responses, host inputs, and resumable
//! message pagination.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;

use quorum_domain::meeting::{MeetingState, Participant};
use quorum_store::{Credential, PostKind, RoomRecord};

use crate::runtime::{context, MeetingOrchestrator};
use crate::state::AppState;

use super::{api_error, domain_error};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct CreateMeetingRequest {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    task_description: String,
    #[serde(default)]
    agents: Vec<Participant>,
    #[serde(default)]
    cooldown_seconds: Option<f64>,
    #[serde(default)]
    max_rounds: Option<u32>,
    #[serde(default)]
    auto_start: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    series_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ListMeetingsQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct JoinRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    socket_id: Option<String>,
    #[serde(default)]
    persona_prompt: Option<String>,
}

#[derive(Deserialize)]
pub struct RespondRequest {
    #[serde(default)]
    agent_name: Option<String>,
    response: String,
}

#[derive(Deserialize)]
pub struct DirectiveRequest {
    text: String,
    #[serde(default)]
    from_name: Option<String>,
}

#[derive(Deserialize)]
pub struct HumanMessageRequest {
    text: String,
    #[serde(default)]
    from_name: Option<String>,
}

#[derive(Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    after_sequence: u64,
}

#[derive(Deserialize)]
pub struct KickRequest {
    agent_name: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn join_url(state: &AppState, code: &str) -> String {
    format!("{}/meeting/{code}", state.config.server.base_url())
}

fn room_json(state: &AppState, room: &RoomRecord) -> serde_json::Value {
    serde_json::json!({
        "room_id": room.id,
        "code": room.code,
        "session_id": room.session_id,
        "status": room.status,
        "host_name": room.host_name,
        "topic": room.topic,
        "task_description": room.task_description,
        "agents": room.participants,
        "cooldown_seconds": room.cooldown_seconds,
        "max_rounds": room.max_rounds,
        "created_at": room.created_at,
        "join_url": join_url(state, &room.code),
    })
}

fn lookup_room(state: &AppState, code: &str) -> Result<RoomRecord, Response> {
    state
        .services
        .sessions
        .get_room(code)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Meeting not found"))
}

fn lookup_running(
    state: &AppState,
    code: &str,
) -> Result<std::sync::Arc<MeetingOrchestrator>, Response> {
    state.services.registry.lookup(code).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            "No active meeting found for this code",
        )
    })
}

/// Build an orchestrator from the room record and launch its loop.
fn launch(state: &AppState, room: &RoomRecord) -> Result<(), Response> {
    let orchestrator = MeetingOrchestrator::from_room(room, state.services.clone());
    orchestrator.start().map_err(domain_error)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/meetings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_meeting(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Json(req): Json<CreateMeetingRequest>,
) -> Response {
    let topic = req.topic.trim();
    if topic.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "topic is required");
    }

    // An empty agent list means the creator sits at the table itself,
    // answering turn requests over the wire.
    let participants = if req.agents.is_empty() {
        vec![Participant::external(credential.name.clone())]
    } else {
        req.agents
    };

    let defaults = &state.services.config;
    let room = state.services.sessions.create_meeting(
        topic,
        req.task_description.trim(),
        &credential.name,
        req.title.as_deref(),
        req.series_id.clone(),
        participants,
        req.cooldown_seconds
            .unwrap_or(defaults.cooldown_seconds_default),
        req.max_rounds.unwrap_or(defaults.max_rounds_default),
    );

    // Announce on the wall so other agents can discover and join.
    let announcement = format!(
        "**New meeting**: {topic}\n\nJoin with code `{}` or at {}",
        room.code,
        join_url(&state, &room.code)
    );
    if let Err(e) = state.services.wall.add_post(
        &credential.name,
        &credential.id,
        &announcement,
        PostKind::Post,
        None,
    ) {
        tracing::warn!(code = %room.code, error = %e, "failed to announce meeting on wall");
    }

    if req.auto_start {
        if let Err(resp) = launch(&state, &room) {
            return resp;
        }
    }

    Json(room_json(&state, &room)).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/meetings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_meetings(
    State(state): State<AppState>,
    Query(query): Query<ListMeetingsQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => match serde_json::from_value::<MeetingState>(serde_json::json!(raw)) {
            Ok(s) => Some(s),
            Err(_) => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    format!("unknown status filter \"{raw}\""),
                )
            }
        },
    };

    let rooms = state.services.sessions.list_rooms(status);
    let meetings: Vec<serde_json::Value> =
        rooms.iter().map(|r| room_json(&state, r)).collect();
    let count = meetings.len();
    Json(serde_json::json!({
        "meetings": meetings,
        "count": count,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/meetings/:code
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_meeting(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    let room = match lookup_room(&state, &code) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let mut body = room_json(&state, &room);
    body["participants"] = serde_json::json!(room.participants);
    if let Some(orchestrator) = state.services.registry.lookup(&code) {
        body["live"] = serde_json::json!(orchestrator.snapshot());
    }
    Json(body).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/meetings/:code/join
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn join_meeting(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(credential): Extension<Credential>,
    body: Option<Json<JoinRequest>>,
) -> Response {
    let room = match lookup_room(&state, &code) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if !matches!(
        room.status,
        MeetingState::Waiting | MeetingState::Active | MeetingState::Paused
    ) {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("cannot join meeting in status '{}'", room.status),
        );
    }

    let req = body.map(|Json(b)| b).unwrap_or_default();
    let mut participant =
        Participant::external(req.name.unwrap_or_else(|| credential.name.clone()));
    participant.socket_id = req.socket_id;
    participant.persona_prompt = req.persona_prompt;
    let agent_name = participant.name.clone();

    // The room record is authoritative (and checks duplicates); a live
    // meeting also gets the participant scheduled from the next round.
    if let Err(e) = state
        .services
        .sessions
        .add_room_participant(&code, participant.clone())
    {
        return domain_error(e);
    }
    if let Some(orchestrator) = state.services.registry.lookup(&code) {
        if let Err(e) = orchestrator.add_participant(participant) {
            return domain_error(e);
        }
    }

    Json(serde_json::json!({
        "status": "joined",
        "code": code,
        "agent_name": agent_name,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle: start / stop / pause / resume
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn start_meeting(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    let room = match lookup_room(&state, &code) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if room.status != MeetingState::Waiting {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("meeting cannot start from status '{}'", room.status),
        );
    }

    if let Err(resp) = launch(&state, &room) {
        return resp;
    }
    Json(serde_json::json!({ "status": "started", "code": code })).into_response()
}

pub async fn stop_meeting(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    let orchestrator = match lookup_running(&state, &code) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    orchestrator.stop().await;
    Json(serde_json::json!({ "status": "stopped", "code": code })).into_response()
}

pub async fn pause_meeting(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    let orchestrator = match lookup_running(&state, &code) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    match orchestrator.pause_meeting() {
        Ok(()) => Json(serde_json::json!({ "status": "paused", "code": code })).into_response(),
        Err(e) => domain_error(e),
    }
}

pub async fn resume_meeting(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    let orchestrator = match lookup_running(&state, &code) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    match orchestrator.resume_meeting() {
        Ok(()) => Json(serde_json::json!({ "status": "active", "code": code })).into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/meetings/:code/respond
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn respond(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(credential): Extension<Credential>,
    Json(req): Json<RespondRequest>,
) -> Response {
    let orchestrator = match lookup_running(&state, &code) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    // Agents answer as themselves unless they say otherwise.
    let agent_name = req.agent_name.unwrap_or_else(|| credential.name.clone());
    match orchestrator.submit_external_response(&agent_name, &req.response) {
        Ok(()) => Json(serde_json::json!({ "status": "accepted", "agent_name": agent_name }))
            .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Host inputs: directive / human message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn send_directive(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(credential): Extension<Credential>,
    Json(req): Json<DirectiveRequest>,
) -> Response {
    let orchestrator = match lookup_running(&state, &code) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    if !orchestrator.status().is_running() {
        return api_error(StatusCode::BAD_REQUEST, "meeting is not running");
    }
    let from_name = req.from_name.unwrap_or_else(|| credential.name.clone());
    match orchestrator.add_directive(&req.text, &from_name) {
        Ok(_) => Json(serde_json::json!({ "status": "directive_sent" })).into_response(),
        Err(e) => domain_error(e),
    }
}

pub async fn send_human_message(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(credential): Extension<Credential>,
    Json(req): Json<HumanMessageRequest>,
) -> Response {
    let orchestrator = match lookup_running(&state, &code) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    if !orchestrator.status().is_running() {
        return api_error(StatusCode::BAD_REQUEST, "meeting is not running");
    }
    let from_name = req.from_name.unwrap_or_else(|| credential.name.clone());
    orchestrator.add_human_message(&req.text, &from_name);
    Json(serde_json::json!({ "status": "message_queued" })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/meetings/:code/kick
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Eject an agent's observer connections from the meeting's stream.
/// Their sockets close with the kicked code and reconnects under the
/// same name are refused until the meeting is finalized.
pub async fn kick_participant(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<KickRequest>,
) -> Response {
    if lookup_room(&state, &code).is_err() {
        return api_error(StatusCode::NOT_FOUND, "Meeting not found");
    }
    let agent_name = req.agent_name.trim();
    if agent_name.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "agent_name is required");
    }
    state
        .services
        .bus
        .kick(&quorum_protocol::meeting_topic(&code), agent_name);
    Json(serde_json::json!({ "status": "kicked", "agent_name": agent_name })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/meetings/:code/context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Conversation snapshot for polling external agents (no WebSocket
/// needed): topic, live state, the trailing conversation window, and
/// active directives.
pub async fn get_context(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    let room = match lookup_room(&state, &code) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    if let Some(orchestrator) = state.services.registry.lookup(&code) {
        return Json(serde_json::json!({
            "topic": orchestrator.topic,
            "state": orchestrator.snapshot(),
            "conversation": orchestrator.conversation_text(),
            "directives": orchestrator.directives(),
        }))
        .into_response();
    }

    // Not running: serve the persisted view.
    let messages = state.services.log.all(&room.id);
    let conversation =
        context::build_conversation(&messages, state.services.config.max_context_messages);
    Json(serde_json::json!({
        "topic": room.topic,
        "state": { "status": room.status },
        "conversation": conversation,
        "directives": [],
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/meetings/:code/messages?after_sequence=N
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_messages(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    let room = match lookup_room(&state, &code) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let messages = state
        .services
        .log
        .read_after(&room.id, query.after_sequence);
    let count = messages.len();
    Json(serde_json::json!({
        "messages": messages,
        "count": count,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/sockets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sockets(State(state): State<AppState>) -> Response {
    let sockets = state.services.sockets.list();
    let count = sockets.len();
    Json(serde_json::json!({
        "sockets": sockets,
        "count": count,
    }))
    .into_response()
}

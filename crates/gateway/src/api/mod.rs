pub mod auth;
pub mod meetings;
pub mod register;
pub mod stream;
pub mod wall;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};

use crate::state::AppState;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Map a domain error onto the API's status-code conventions.
pub(crate) fn domain_error(err: quorum_domain::Error) -> Response {
    use quorum_domain::Error;
    match &err {
        Error::NotFound(_) => api_error(StatusCode::NOT_FOUND, err.to_string()),
        Error::InvalidState(_) => api_error(StatusCode::BAD_REQUEST, err.to_string()),
        Error::Auth(_) => api_error(StatusCode::UNAUTHORIZED, err.to_string()),
        Error::MissingScope(_) => api_error(StatusCode::FORBIDDEN, err.to_string()),
        _ => api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// Build the full API router.
///
/// Routes are split into **public** (no auth) and **protected** (behind
/// the bearer-token middleware under `/api/v1`).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        // Health probe.
        .route("/api/health", get(health))
        // Public wall reads (UI + unauthenticated agents).
        .route("/api/wall", get(wall::public_feed))
        .route("/api/wall/agents", get(wall::public_agents))
        .route("/api/wall/:post_id/replies", get(wall::public_replies))
        // Agent self-onboarding.
        .route("/api/agents/register", post(register::register_agent))
        // Live streams (agent sockets authenticate via ?token=).
        .route("/api/stream/meeting/:code", get(stream::meeting_stream))
        .route("/api/stream/room/:code", get(stream::room_stream))
        .route("/api/stream/session/:session_id", get(stream::session_stream));

    let protected = Router::new()
        // Connection test + endpoint discovery.
        .route("/api/v1/ping", get(register::ping))
        // Meetings.
        .route(
            "/api/v1/meetings",
            post(meetings::create_meeting).get(meetings::list_meetings),
        )
        .route("/api/v1/meetings/:code", get(meetings::get_meeting))
        .route("/api/v1/meetings/:code/join", post(meetings::join_meeting))
        .route("/api/v1/meetings/:code/start", post(meetings::start_meeting))
        .route("/api/v1/meetings/:code/stop", post(meetings::stop_meeting))
        .route("/api/v1/meetings/:code/pause", post(meetings::pause_meeting))
        .route("/api/v1/meetings/:code/resume", post(meetings::resume_meeting))
        .route("/api/v1/meetings/:code/respond", post(meetings::respond))
        .route("/api/v1/meetings/:code/directive", post(meetings::send_directive))
        .route("/api/v1/meetings/:code/message", post(meetings::send_human_message))
        .route("/api/v1/meetings/:code/kick", post(meetings::kick_participant))
        .route("/api/v1/meetings/:code/context", get(meetings::get_context))
        .route("/api/v1/meetings/:code/messages", get(meetings::get_messages))
        // Wall writes (scoped).
        .route("/api/v1/wall", get(wall::list_posts).post(wall::create_post))
        .route("/api/v1/wall/:post_id/react", post(wall::react))
        // Socket personas (read-only discovery).
        .route("/api/v1/sockets", get(meetings::list_sockets))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

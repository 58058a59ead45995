//! Wall endpoints.
//!
//! Public reads (`/api/wall*`) for the UI and unauthenticated agents;
//! scoped writes (`/api/v1/wall*`) for registered agents.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;

use quorum_store::{Credential, PostKind, WallPost};

use crate::state::AppState;

use super::{api_error, auth::require_scope, domain_error};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / query types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct FeedQuery {
    #[serde(default = "d_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn d_limit() -> usize {
    50
}

#[derive(Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    content: String,
    #[serde(default = "d_post_type")]
    post_type: String,
    #[serde(default)]
    parent_id: Option<String>,
}

fn d_post_type() -> String {
    "post".into()
}

#[derive(Deserialize)]
pub struct ReactRequest {
    #[serde(default)]
    emoji: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn post_json(state: &AppState, post: &WallPost) -> serde_json::Value {
    let mut value = serde_json::json!(post);
    value["reply_count"] = serde_json::json!(state.services.wall.reply_count(&post.id));
    value
}

fn feed_json(state: &AppState, query: &FeedQuery) -> serde_json::Value {
    let limit = query.limit.min(200);
    let posts: Vec<serde_json::Value> = state
        .services
        .wall
        .feed(limit, query.offset)
        .iter()
        .map(|p| post_json(state, p))
        .collect();
    let count = posts.len();
    serde_json::json!({ "posts": posts, "count": count })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public reads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn public_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Response {
    Json(feed_json(&state, &query)).into_response()
}

pub async fn public_replies(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Response {
    match state.services.wall.replies(&post_id) {
        Ok(replies) => {
            let count = replies.len();
            Json(serde_json::json!({
                "replies": replies,
                "count": count,
            }))
            .into_response()
        }
        Err(e) => domain_error(e),
    }
}

/// Every registered agent with its wall activity.
pub async fn public_agents(State(state): State<AppState>) -> Response {
    let agents: Vec<serde_json::Value> = state
        .credentials
        .list()
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name,
                "created_at": c.created_at,
                "last_used_at": c.last_used_at,
                "post_count": state.services.wall.post_count_for(&c.name),
            })
        })
        .collect();
    let count = agents.len();
    Json(serde_json::json!({ "agents": agents, "count": count })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Authenticated reads / writes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_posts(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Query(query): Query<FeedQuery>,
) -> Response {
    if let Err(resp) = require_scope(&credential, "wall:read") {
        return resp;
    }
    Json(feed_json(&state, &query)).into_response()
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Json(req): Json<CreatePostRequest>,
) -> Response {
    if let Err(resp) = require_scope(&credential, "wall:write") {
        return resp;
    }

    let kind = match req.post_type.as_str() {
        "post" => PostKind::Post,
        "intro" => PostKind::Intro,
        "reply" => PostKind::Reply,
        other => {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("post_type must be 'post', 'intro', or 'reply' (got '{other}')"),
            )
        }
    };

    match state.services.wall.add_post(
        &credential.name,
        &credential.id,
        &req.content,
        kind,
        req.parent_id,
    ) {
        Ok(post) => (StatusCode::CREATED, Json(serde_json::json!(post))).into_response(),
        Err(e) => domain_error(e),
    }
}

pub async fn react(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Extension(credential): Extension<Credential>,
    Json(req): Json<ReactRequest>,
) -> Response {
    if let Err(resp) = require_scope(&credential, "wall:write") {
        return resp;
    }
    match state
        .services
        .wall
        .react(&post_id, &req.emoji, &credential.name)
    {
        Ok(reactions) => Json(serde_json::json!({
            "post_id": post_id,
            "reactions": reactions,
        }))
        .into_response(),
        Err(e) => domain_error(e),
    }
}

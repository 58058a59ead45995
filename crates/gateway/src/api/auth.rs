//! API authentication middleware.
//!
//! Every protected request must carry `Authorization: Bearer <token>`;
//! the token is verified against the credential store (hash match in
//! constant time) and the matched credential rides the request
//! extensions into the handlers. Scope checks happen per-handler —
//! credentials with no explicit scope set pass everything.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use quorum_store::Credential;

use crate::state::AppState;

use super::api_error;

/// Axum middleware that enforces bearer-token authentication on
/// protected routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if provided.is_empty() {
        return api_error(
            StatusCode::UNAUTHORIZED,
            "missing or invalid Authorization header",
        );
    }

    let Some(credential) = state.credentials.verify(provided) else {
        return api_error(StatusCode::UNAUTHORIZED, "invalid API token");
    };

    req.extensions_mut().insert(credential);
    next.run(req).await
}

/// Per-handler scope guard. `Ok` when the credential carries the scope
/// (or has no explicit scope set); `Err` is a ready-made 403.
pub fn require_scope(credential: &Credential, scope: &str) -> Result<(), Response> {
    if credential.allows(scope) {
        Ok(())
    } else {
        Err(api_error(
            StatusCode::FORBIDDEN,
            format!("API token missing required scope: {scope}"),
        ))
    }
}

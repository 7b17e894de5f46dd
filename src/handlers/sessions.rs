use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    error::Result,
    middleware_layer::auth::require_api_token,
    models::{server::Destination, session::SessionSummary},
    state::AppState,
};

/// The request payload for authorizing an operator.
#[derive(Deserialize)]
pub struct AuthorizeRequest {
    pub owner_id: i64,
    pub host: String,
    pub port: u16,
    pub credential: String,
}

/// The request payload for running a command.
#[derive(Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// The answer to a session status query.
#[derive(Serialize)]
pub struct SessionStatus {
    pub authorized: bool,
    #[serde(flatten)]
    pub session: Option<SessionSummary>,
}

#[derive(Serialize)]
pub struct EndSessionResponse {
    pub ended: bool,
}

/// Builds the HTTP surface. `/health` is always open; `/api` requires the
/// bearer token when one is configured.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/sessions", post(authorize))
        .route("/api/sessions/{owner_id}", get(status).delete(end_session))
        .route("/api/sessions/{owner_id}/commands", post(execute_command))
        .route_layer(from_fn_with_state(state.clone(), require_api_token))
        .with_state(state);

    Router::new().route("/health", get(health)).merge(api)
}

async fn health() -> &'static str {
    "ok"
}

/// Verifies the credential against the server and opens a session.
#[axum::debug_handler]
pub async fn authorize(
    State(state): State<AppState>,
    Json(mut req): Json<AuthorizeRequest>,
) -> Result<Response> {
    let destination = Destination::new(std::mem::take(&mut req.host), req.port);
    let result = state
        .authority
        .authorize(req.owner_id, destination, &req.credential)
        .await;
    req.credential.zeroize();

    Ok((StatusCode::CREATED, Json(result?)).into_response())
}

/// Reports whether the operator holds an active session.
#[axum::debug_handler]
pub async fn status(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> Result<Response> {
    let session = state.authority.session_summary(owner_id).await?;
    let response = SessionStatus {
        authorized: session.is_some(),
        session,
    };
    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Ends the operator's session. Ending a missing session is not an error.
#[axum::debug_handler]
pub async fn end_session(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> Result<Response> {
    let ended = state.authority.end_session(owner_id).await?;
    Ok((StatusCode::OK, Json(EndSessionResponse { ended })).into_response())
}

/// Runs a command on the operator's active server.
#[axum::debug_handler]
pub async fn execute_command(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
    Json(req): Json<CommandRequest>,
) -> Result<Response> {
    let result = state.authority.execute(owner_id, &req.command).await?;
    Ok((StatusCode::OK, Json(result)).into_response())
}

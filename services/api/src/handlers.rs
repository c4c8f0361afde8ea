//! Axum Handlers for the REST API
//!
//! Token issuance, session bookkeeping, agent control and per-room file
//! uploads. Each handler carries a `utoipa` path for the OpenAPI document.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use livekit_admin::{AccessToken, VideoGrants};
use std::{collections::HashSet, sync::Arc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    models::{
        CreatedSession, ErrorResponse, MessagePayload, Session, StatusResponse, TokenQuery,
        TokenResponse, UploadForm, UploadedFile,
    },
    state::AppState,
    store::StoredFile,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// LiveKit credentials are not configured.
    Misconfigured,
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Misconfigured => {
                let message = "Server misconfigured".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Session with id '{}' not found", id))
}

/// `len` lowercase hex characters from a fresh v4 UUID.
fn short_hex(len: usize) -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(len);
    hex
}

fn random_room_name() -> String {
    format!("room-{}", short_hex(8))
}

/// A room name the LiveKit server does not know yet. Falls back to an
/// unchecked random name when the room list is unavailable.
async fn fresh_room_name(state: &AppState) -> String {
    let Some(server) = &state.room_server else {
        return random_room_name();
    };
    let existing: HashSet<String> = match server.list_room_names().await {
        Ok(names) => names.into_iter().collect(),
        Err(e) => {
            warn!(error = %e, "Could not list rooms; using an unchecked room name");
            return random_room_name();
        }
    };
    loop {
        let name = random_room_name();
        if !existing.contains(&name) {
            return name;
        }
    }
}

fn mint_token(config: &Config, identity: &str, room: &str) -> Result<String, ApiError> {
    let Some(credentials) = config.credentials() else {
        error!("Missing LiveKit credentials");
        return Err(ApiError::Misconfigured);
    };
    let token = AccessToken::new(credentials.api_key, credentials.api_secret)
        .with_identity(identity)
        .with_name(identity)
        .with_grants(VideoGrants::join(room))
        .with_ttl(config.token_ttl)
        .to_jwt()?;
    Ok(token)
}

async fn issue_token(
    state: &AppState,
    query: TokenQuery,
    default_room: Option<String>,
) -> Result<Json<TokenResponse>, ApiError> {
    let identity = query
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("anon-{}", short_hex(4)));
    let room = match query.room.filter(|r| !r.trim().is_empty()).or(default_room) {
        Some(room) => room,
        None => fresh_room_name(state).await,
    };

    let token = mint_token(&state.config, &identity, &room)?;
    info!(%identity, %room, "Issued room token");
    Ok(Json(TokenResponse {
        token,
        identity,
        room,
        url: state.config.livekit_url.clone(),
    }))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/api/health/",
    responses((status = 200, description = "Service is up", body = StatusResponse))
)]
pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse::new("ok"))
}

/// Issue a room token for a participant.
#[utoipa::path(
    get,
    path = "/api/get_token/",
    params(TokenQuery),
    responses(
        (status = 200, description = "Room credential", body = TokenResponse),
        (status = 500, description = "Server misconfigured", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_token(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<TokenResponse>, ApiError> {
    issue_token(&state, query, None).await
}

/// Issue a token for a session's room.
#[utoipa::path(
    get,
    path = "/api/sessions/{id}/token/",
    params(("id" = Uuid, Path, description = "Session ID"), TokenQuery),
    responses(
        (status = 200, description = "Room credential", body = TokenResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Server misconfigured", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn session_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<TokenResponse>, ApiError> {
    let session = state.store.get_session(id).await.ok_or_else(|| not_found(id))?;
    issue_token(&state, query, Some(session.room_name)).await
}

/// List all sessions.
#[utoipa::path(
    get,
    path = "/api/sessions/",
    responses((status = 200, description = "List of sessions", body = [Session]))
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<Session>> {
    Json(state.store.list_sessions().await)
}

/// Create a session with a fresh room and a token for its first participant.
#[utoipa::path(
    post,
    path = "/api/sessions/",
    responses(
        (status = 201, description = "Session created successfully", body = CreatedSession),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let room_name = random_room_name();
    let session = state.store.create_session(&room_name).await?;
    let participant_id = format!("user-{}", short_hex(8));

    match mint_token(&state.config, &participant_id, &room_name) {
        Ok(token) => {
            info!(session_id = %session.id, room = %room_name, "Session created");
            Ok((
                StatusCode::CREATED,
                Json(CreatedSession {
                    session,
                    token,
                    participant_id,
                }),
            ))
        }
        Err(err) => {
            error!(room = %room_name, "Failed to create session token");
            state.store.delete_session(session.id).await;
            Err(err)
        }
    }
}

/// Get a specific session by its ID.
#[utoipa::path(
    get,
    path = "/api/sessions/{id}/",
    responses(
        (status = 200, description = "Session details", body = Session),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, ApiError> {
    let session = state.store.get_session(id).await.ok_or_else(|| not_found(id))?;
    Ok(Json(session))
}

/// Delete a session, ending its agent first.
#[utoipa::path(
    delete,
    path = "/api/sessions/{id}/",
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let session = state.store.get_session(id).await.ok_or_else(|| not_found(id))?;

    if session.is_active {
        if let Some(agents) = &state.agents {
            if let Err(e) = agents.end(&session.room_name, "session deleted").await {
                error!(error = ?e, room = %session.room_name, "Error ending agent session");
            }
        }
    }

    state.store.delete_session(id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Mark a session active and dispatch the voice agent into its room.
#[utoipa::path(
    post,
    path = "/api/sessions/{id}/start/",
    responses(
        (status = 200, description = "Agent started", body = StatusResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Agent could not be started", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
#[instrument(skip(state))]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let session = state
        .store
        .set_active(id, true)
        .await
        .ok_or_else(|| not_found(id))?;
    let agents = state.agents.as_ref().ok_or(ApiError::Misconfigured)?;

    info!(room = %session.room_name, "Starting agent session");
    agents.start(&session.room_name).await?;
    Ok(Json(StatusResponse::new("started")))
}

/// End the session's agent and mark it inactive.
#[utoipa::path(
    post,
    path = "/api/sessions/{id}/end/",
    responses(
        (status = 200, description = "Session ended", body = StatusResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Agent could not be stopped", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
#[instrument(skip(state))]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let session = state.store.get_session(id).await.ok_or_else(|| not_found(id))?;

    if let Some(agents) = &state.agents {
        let ended = agents.end(&session.room_name, "session ended").await?;
        if !ended {
            info!(room = %session.room_name, "No agent was running");
        }
    }
    state.store.set_active(id, false).await;
    Ok(Json(StatusResponse::new("ended")))
}

/// Record a typed message and forward it to the session's agent.
#[utoipa::path(
    post,
    path = "/api/sessions/{id}/message/",
    request_body = MessagePayload,
    responses(
        (status = 200, description = "Message delivered", body = StatusResponse),
        (status = 400, description = "Empty message or inactive session", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Message could not be delivered", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
#[instrument(skip(state, payload))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MessagePayload>,
) -> Result<Json<StatusResponse>, ApiError> {
    let session = state.store.get_session(id).await.ok_or_else(|| not_found(id))?;

    let message = payload
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("No message provided".to_string()))?;

    state.store.add_transcript(id, &message).await;

    if !session.is_active {
        return Err(ApiError::BadRequest("Session not active".to_string()));
    }
    let agents = state.agents.as_ref().ok_or(ApiError::Misconfigured)?;
    agents.send_message(&session.room_name, &message).await?;
    Ok(Json(StatusResponse::new("sent")))
}

/// Upload files into a room's context.
#[utoipa::path(
    post,
    path = "/api/rooms/{room}/files/",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Files stored", body = [UploadedFile]),
        (status = 400, description = "No files in the request", body = ErrorResponse)
    ),
    params(("room" = String, Path, description = "Room name"))
)]
#[instrument(skip(state, multipart))]
pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut stored = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let id = Uuid::new_v4();
        stored.push(StoredFile {
            meta: UploadedFile {
                id,
                name,
                mime_type,
                size: bytes.len() as u64,
                uploaded_at: Utc::now(),
                file: format!("/api/rooms/{}/files/{}/", room, id),
            },
            bytes,
        });
    }

    if stored.is_empty() {
        return Err(ApiError::BadRequest("No files provided".to_string()));
    }
    let uploaded: Vec<UploadedFile> = stored.iter().map(|f| f.meta.clone()).collect();
    state.store.add_files(&room, stored).await;
    info!(count = uploaded.len(), "Files uploaded");
    Ok((StatusCode::CREATED, Json(uploaded)))
}

/// List the files uploaded into a room.
#[utoipa::path(
    get,
    path = "/api/rooms/{room}/files/",
    responses((status = 200, description = "Uploaded files", body = [UploadedFile])),
    params(("room" = String, Path, description = "Room name"))
)]
pub async fn list_room_files(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Json<Vec<UploadedFile>> {
    Json(state.store.room_files(&room).await)
}

/// Download one uploaded file.
#[utoipa::path(
    get,
    path = "/api/rooms/{room}/files/{file_id}/",
    responses(
        (status = 200, description = "File contents"),
        (status = 404, description = "File not found", body = ErrorResponse)
    ),
    params(
        ("room" = String, Path, description = "Room name"),
        ("file_id" = Uuid, Path, description = "File ID")
    )
)]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path((room, file_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let file = state
        .store
        .file(&room, file_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("File '{}' not found", file_id)))?;
    let disposition = format!("attachment; filename=\"{}\"", file.meta.name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, file.meta.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    ))
}

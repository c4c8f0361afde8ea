//! Axum Router Configuration
//!
//! All REST routes live under `/api` with trailing slashes. Swagger UI and
//! the OpenAPI document are served beside them.

use crate::{
    handlers,
    models::{
        CreatedSession, ErrorResponse, MessagePayload, Session, StatusResponse, TokenResponse,
        Transcript, UploadForm, UploadedFile,
    },
    state::AppState,
};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Largest accepted request body, sized for file uploads.
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::get_token,
        handlers::session_token,
        handlers::list_sessions,
        handlers::create_session,
        handlers::get_session,
        handlers::delete_session,
        handlers::start_session,
        handlers::end_session,
        handlers::send_message,
        handlers::upload_files,
        handlers::list_room_files,
        handlers::download_file,
    ),
    components(
        schemas(Session, CreatedSession, Transcript, UploadedFile, UploadForm, TokenResponse, MessagePayload, StatusResponse, ErrorResponse)
    ),
    tags(
        (name = "Kali-E API", description = "Room tokens, sessions and file uploads for the Kali-E voice assistant")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/health/", get(handlers::health))
        .route("/get_token/", get(handlers::get_token))
        .route(
            "/sessions/",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}/",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{id}/token/", get(handlers::session_token))
        .route("/sessions/{id}/start/", post(handlers::start_session))
        .route("/sessions/{id}/end/", post(handlers::end_session))
        .route("/sessions/{id}/message/", post(handlers::send_message))
        .route(
            "/rooms/{room}/files/",
            get(handlers::list_room_files).post(handlers::upload_files),
        )
        .route(
            "/rooms/{room}/files/{file_id}/",
            get(handlers::download_file),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_router)
}

//! API Models
//!
//! Request and response bodies, documented for OpenAPI with `utoipa`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// One exchange recorded against a session.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct Transcript {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub user_message: Option<String>,
    pub assistant_message: Option<String>,
}

/// Metadata for a file uploaded into a room.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct UploadedFile {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    /// Path the file can be downloaded from.
    pub file: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct Session {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(example = "room-1a2b3c4d")]
    pub room_name: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub transcripts: Vec<Transcript>,
    pub files: Vec<UploadedFile>,
}

/// A freshly created session plus the credential for its first participant.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct CreatedSession {
    #[serde(flatten)]
    pub session: Session,
    pub token: String,
    #[schema(example = "user-5e6f7a8b")]
    pub participant_id: String,
}

/// Room credential handed to a client.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct TokenResponse {
    pub token: String,
    #[schema(example = "anon-1f2e")]
    pub identity: String,
    #[schema(example = "room-1a2b3c4d")]
    pub room: String,
    /// Signalling URL; empty when the server has none configured.
    #[schema(example = "wss://kalie.livekit.cloud")]
    pub url: String,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct TokenQuery {
    /// Participant identity. Defaults to `anon-xxxx`.
    pub name: Option<String>,
    /// Room to join. Defaults to a fresh `room-xxxxxxxx`.
    pub room: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct MessagePayload {
    #[serde(default)]
    #[schema(example = "What's on my calendar today?")]
    pub message: Option<String>,
}

/// Multipart form accepted by the upload endpoint.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct UploadForm {
    #[schema(value_type = Vec<String>, format = Binary)]
    pub files: Vec<Vec<u8>>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct StatusResponse {
    #[schema(example = "ok")]
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

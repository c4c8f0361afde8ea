//! Error taxonomy for the voice session.

use serde::{Deserialize, Serialize};

/// Failures reported by the media collaborators (microphone, room transport).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors surfaced by the session controller.
///
/// The first group are real failures and each maps to an [`ErrorKind`]. The
/// second group are rejected intents: they never change the session state.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("failed to fetch connection token: {0}")]
    TokenFetch(String),
    #[error("invalid room configuration: {0}")]
    Configuration(String),
    #[error("failed to connect to room: {0}")]
    Connection(String),
    #[error("failed to publish microphone: {0}")]
    MicPublish(String),
    #[error("microphone unavailable: {0}")]
    MicAccess(String),
    #[error("file upload failed: {0}")]
    Upload(String),

    #[error("another operation is already in flight")]
    Busy,
    #[error("a session is already active")]
    AlreadyActive,
    #[error("voice service is not ready")]
    NotReady,
    #[error("session start was cancelled by teardown")]
    Cancelled,
}

impl SessionError {
    /// The state-machine tag for this error, if it is a failure rather than
    /// a rejected intent.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SessionError::PermissionDenied(_) => Some(ErrorKind::PermissionDenied),
            SessionError::TokenFetch(_) => Some(ErrorKind::TokenFetch),
            SessionError::Configuration(_) => Some(ErrorKind::Configuration),
            SessionError::Connection(_) => Some(ErrorKind::Connection),
            SessionError::MicPublish(_) => Some(ErrorKind::MicPublish),
            SessionError::MicAccess(_) => Some(ErrorKind::MicAccess),
            SessionError::Upload(_) => Some(ErrorKind::Upload),
            SessionError::Busy
            | SessionError::AlreadyActive
            | SessionError::NotReady
            | SessionError::Cancelled => None,
        }
    }
}

/// The reason carried by `ConnectionState::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    TokenFetch,
    Configuration,
    Connection,
    MicPublish,
    MicAccess,
    Upload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_have_no_kind() {
        assert_eq!(SessionError::Busy.kind(), None);
        assert_eq!(SessionError::AlreadyActive.kind(), None);
        assert_eq!(SessionError::NotReady.kind(), None);
        assert_eq!(SessionError::Cancelled.kind(), None);
    }

    #[test]
    fn test_failures_map_to_kind() {
        assert_eq!(
            SessionError::Configuration("no url".into()).kind(),
            Some(ErrorKind::Configuration)
        );
        assert_eq!(
            SessionError::MicAccess("revoked".into()).kind(),
            Some(ErrorKind::MicAccess)
        );
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::TokenFetch("status 502".into());
        assert_eq!(
            err.to_string(),
            "failed to fetch connection token: status 502"
        );
        let kind = serde_json::to_string(&ErrorKind::PermissionDenied).unwrap();
        assert_eq!(kind, "\"permission_denied\"");
    }
}

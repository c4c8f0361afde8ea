//! The observable state machine and the snapshot contract consumed by the
//! presentation layer.

use crate::error::ErrorKind;
use crate::session::SessionInfo;
use serde::Serialize;
use std::time::Duration;

pub const ASSISTANT_NAME: &str = "Kali-E";

/// The single state value reported to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    RequestingPermission,
    FetchingToken,
    Connecting,
    PublishingMic,
    Ready,
    Listening,
    Speaking,
    UsingTools,
    Error(ErrorKind),
}

impl ConnectionState {
    /// True once a session is fully established.
    pub fn is_established(&self) -> bool {
        matches!(
            self,
            ConnectionState::Ready
                | ConnectionState::Listening
                | ConnectionState::Speaking
                | ConnectionState::UsingTools
        )
    }
}

/// The controller's lifecycle position, without the orthogonal activity flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    RequestingPermission,
    FetchingToken,
    Connecting { room: String },
    PublishingMic,
    Ready,
    Error(ErrorKind),
}

/// The local mic and agent activity flags layered over `Phase::Ready`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Activity {
    pub listening: bool,
    pub speaking: bool,
    pub using_tools: bool,
}

/// Folds phase and flags into the one reported state. Agent activity takes
/// precedence over the local mic so only one narrative is shown.
pub(crate) fn derive_state(phase: &Phase, activity: Activity) -> ConnectionState {
    match phase {
        Phase::Idle => ConnectionState::Idle,
        Phase::RequestingPermission => ConnectionState::RequestingPermission,
        Phase::FetchingToken => ConnectionState::FetchingToken,
        Phase::Connecting { .. } => ConnectionState::Connecting,
        Phase::PublishingMic => ConnectionState::PublishingMic,
        Phase::Error(kind) => ConnectionState::Error(*kind),
        Phase::Ready if activity.speaking => ConnectionState::Speaking,
        Phase::Ready if activity.using_tools => ConnectionState::UsingTools,
        Phase::Ready if activity.listening => ConnectionState::Listening,
        Phase::Ready => ConnectionState::Ready,
    }
}

/// Status line for states whose text does not depend on what happened last.
pub(crate) fn phase_message(phase: &Phase) -> String {
    match phase {
        Phase::Idle => format!("Start a new chat with {}", ASSISTANT_NAME),
        Phase::RequestingPermission => "Requesting microphone access…".to_string(),
        Phase::FetchingToken => "Fetching LiveKit token…".to_string(),
        Phase::Connecting { room } => format!("Joining {}…", room),
        Phase::PublishingMic => "Publishing microphone…".to_string(),
        Phase::Ready => "Session ready! Tap the mic to talk.".to_string(),
        Phase::Error(kind) => error_message(*kind).to_string(),
    }
}

pub(crate) fn error_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::PermissionDenied => "Microphone access required. Please allow and reload.",
        ErrorKind::TokenFetch
        | ErrorKind::Configuration
        | ErrorKind::Connection
        | ErrorKind::MicPublish => "Failed to start session. Try reloading.",
        ErrorKind::MicAccess => "Microphone access error. Check permissions.",
        ErrorKind::Upload => "File upload failed. Try again.",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Destructive,
}

/// A transient notification (toast).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    /// Distinguishes repeated notices with the same text.
    pub id: u64,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl Notice {
    pub(crate) fn for_error(id: u64, kind: ErrorKind) -> Self {
        let (title, description, duration) = match kind {
            ErrorKind::PermissionDenied => (
                "Microphone Access Denied",
                format!("{} needs microphone access to work properly", ASSISTANT_NAME),
                Duration::from_secs(5),
            ),
            ErrorKind::TokenFetch
            | ErrorKind::Configuration
            | ErrorKind::Connection
            | ErrorKind::MicPublish => (
                "Connection Error",
                "Could not connect to voice service".to_string(),
                Duration::from_secs(5),
            ),
            ErrorKind::MicAccess => (
                "Microphone Error",
                "Could not access your microphone".to_string(),
                Duration::from_secs(3),
            ),
            ErrorKind::Upload => (
                "Upload Error",
                "Could not upload your files".to_string(),
                Duration::from_secs(3),
            ),
        };
        Self {
            id,
            title: title.to_string(),
            description,
            severity: Severity::Destructive,
            duration,
        }
    }

    pub(crate) fn not_ready(id: u64) -> Self {
        Self {
            id,
            title: "Not ready".to_string(),
            description: "Voice service is not ready yet".to_string(),
            severity: Severity::Info,
            duration: Duration::from_secs(3),
        }
    }

    pub(crate) fn info(id: u64, title: &str, description: String) -> Self {
        Self {
            id,
            title: title.to_string(),
            description,
            severity: Severity::Info,
            duration: Duration::from_secs(3),
        }
    }
}

/// Which controls the presentation layer should enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlFlags {
    pub mic: bool,
    pub upload: bool,
    pub reset: bool,
}

impl ControlFlags {
    pub(crate) fn for_busy(busy: bool) -> Self {
        Self {
            mic: !busy,
            upload: !busy,
            reset: !busy,
        }
    }
}

/// Everything a renderer needs to draw the assistant view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Strictly increasing per controller; lets observers detect reordering.
    pub revision: u64,
    pub state: ConnectionState,
    pub message: String,
    pub listening: bool,
    pub speaking: bool,
    pub using_tools: bool,
    /// An operation is in flight.
    pub busy: bool,
    pub controls: ControlFlags,
    pub notice: Option<Notice>,
    pub session: Option<SessionInfo>,
    pub last_error: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            revision: 0,
            state: ConnectionState::Idle,
            message: phase_message(&Phase::Idle),
            listening: false,
            speaking: false,
            using_tools: false,
            busy: false,
            controls: ControlFlags::for_busy(false),
            notice: None,
            session: None,
            last_error: None,
        }
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_state_precedence() {
        let all = Activity {
            listening: true,
            speaking: true,
            using_tools: true,
        };
        assert_eq!(derive_state(&Phase::Ready, all), ConnectionState::Speaking);

        let tools_and_mic = Activity {
            listening: true,
            speaking: false,
            using_tools: true,
        };
        assert_eq!(
            derive_state(&Phase::Ready, tools_and_mic),
            ConnectionState::UsingTools
        );

        let mic = Activity {
            listening: true,
            ..Default::default()
        };
        assert_eq!(derive_state(&Phase::Ready, mic), ConnectionState::Listening);
        assert_eq!(
            derive_state(&Phase::Ready, Activity::default()),
            ConnectionState::Ready
        );
    }

    #[test]
    fn test_flags_do_not_leak_into_setup_phases() {
        let all = Activity {
            listening: true,
            speaking: true,
            using_tools: true,
        };
        assert_eq!(
            derive_state(&Phase::FetchingToken, all),
            ConnectionState::FetchingToken
        );
        assert_eq!(
            derive_state(&Phase::Error(ErrorKind::Connection), all),
            ConnectionState::Error(ErrorKind::Connection)
        );
    }

    #[test]
    fn test_phase_messages() {
        assert_eq!(phase_message(&Phase::Idle), "Start a new chat with Kali-E");
        assert_eq!(
            phase_message(&Phase::Connecting {
                room: "room-1".into()
            }),
            "Joining room-1…"
        );
        assert_eq!(
            phase_message(&Phase::Error(ErrorKind::PermissionDenied)),
            "Microphone access required. Please allow and reload."
        );
    }

    #[test]
    fn test_connection_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Error(ErrorKind::Configuration)).unwrap();
        assert_eq!(json, r#"{"state":"error","reason":"configuration"}"#);
        let json = serde_json::to_string(&ConnectionState::Listening).unwrap();
        assert_eq!(json, r#"{"state":"listening"}"#);
    }

    #[test]
    fn test_notice_for_permission_denied() {
        let notice = Notice::for_error(7, ErrorKind::PermissionDenied);
        assert_eq!(notice.title, "Microphone Access Denied");
        assert_eq!(notice.duration, Duration::from_secs(5));
        assert_eq!(notice.severity, Severity::Destructive);
    }

    #[test]
    fn test_default_snapshot_is_idle_and_enabled() {
        let snapshot = StatusSnapshot::default();
        assert_eq!(snapshot.state, ConnectionState::Idle);
        assert!(snapshot.controls.mic && snapshot.controls.upload && snapshot.controls.reset);
        assert!(!snapshot.busy);
    }
}

//! Session data: the token grant returned by the backend and the live
//! session record built from it.

use crate::error::SessionError;
use rand::Rng;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DISPLAY_NAME_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Response body of `GET /get_token/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub identity: String,
    pub room: String,
    #[serde(default)]
    pub url: String,
}

/// One established voice session. Created once per successful `start()`.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub room_name: String,
    pub token: SecretString,
    pub local_participant_id: String,
    pub agent_identity: Option<String>,
}

impl Session {
    pub fn from_grant(grant: TokenGrant) -> Self {
        let agent_identity = Some(agent_identity_for(&grant.room));
        Self {
            id: Uuid::new_v4(),
            room_name: grant.room,
            token: SecretString::from(grant.token),
            local_participant_id: grant.identity,
            agent_identity,
        }
    }

    /// Whether `participant` is the remote agent of this session.
    pub fn is_agent(&self, participant: &str) -> bool {
        self.agent_identity.as_deref() == Some(participant)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            room_name: self.room_name.clone(),
            local_participant_id: self.local_participant_id.clone(),
            agent_identity: self.agent_identity.clone(),
        }
    }
}

/// The token-free view of a session handed to the presentation layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub room_name: String,
    pub local_participant_id: String,
    pub agent_identity: Option<String>,
}

/// The identity under which the voice agent joins `room`.
pub fn agent_identity_for(room: &str) -> String {
    format!("agent-{}", room)
}

/// A throwaway display name such as `user-k3f9`.
pub fn random_display_name() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..4)
        .map(|_| {
            let idx = rng.random_range(0..DISPLAY_NAME_ALPHABET.len());
            DISPLAY_NAME_ALPHABET[idx] as char
        })
        .collect();
    format!("user-{}", suffix)
}

/// Picks the room URL for a grant and checks it is a real-time transport URL.
///
/// The grant's own `url` wins; an empty one falls back to the configured URL.
pub fn resolve_room_url(grant_url: &str, fallback: Option<&str>) -> Result<String, SessionError> {
    let candidate = if grant_url.trim().is_empty() {
        fallback.map(str::trim).unwrap_or_default()
    } else {
        grant_url.trim()
    };
    if candidate.is_empty() {
        return Err(SessionError::Configuration(
            "missing room URL (must be ws:// or wss://)".to_string(),
        ));
    }

    let rest = candidate
        .strip_prefix("wss://")
        .or_else(|| candidate.strip_prefix("ws://"))
        .ok_or_else(|| {
            SessionError::Configuration(format!(
                "invalid room URL '{}' (must be ws:// or wss://)",
                candidate
            ))
        })?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(SessionError::Configuration(format!(
            "room URL '{}' has no host",
            candidate
        )));
    }
    Ok(candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn grant(url: &str) -> TokenGrant {
        TokenGrant {
            token: "jwt".into(),
            identity: "user-ab12".into(),
            room: "room-1234abcd".into(),
            url: url.into(),
        }
    }

    #[test]
    fn test_session_from_grant() {
        let session = Session::from_grant(grant("wss://rtc.example.com"));
        assert_eq!(session.room_name, "room-1234abcd");
        assert_eq!(session.local_participant_id, "user-ab12");
        assert_eq!(session.agent_identity.as_deref(), Some("agent-room-1234abcd"));
        assert_eq!(session.token.expose_secret(), "jwt");
        assert!(session.is_agent("agent-room-1234abcd"));
        assert!(!session.is_agent("user-ab12"));
    }

    #[test]
    fn test_session_debug_hides_token() {
        let session = Session::from_grant(grant("wss://rtc.example.com"));
        assert!(!format!("{:?}", session).contains("jwt"));
    }

    #[test]
    fn test_random_display_name_shape() {
        for _ in 0..32 {
            let name = random_display_name();
            let suffix = name.strip_prefix("user-").expect("prefix");
            assert_eq!(suffix.len(), 4);
            assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_resolve_room_url_accepts_ws_schemes() {
        assert_eq!(
            resolve_room_url("wss://rtc.example.com", None).unwrap(),
            "wss://rtc.example.com"
        );
        assert_eq!(
            resolve_room_url("ws://localhost:7880", None).unwrap(),
            "ws://localhost:7880"
        );
    }

    #[test]
    fn test_resolve_room_url_falls_back_when_grant_is_empty() {
        assert_eq!(
            resolve_room_url("", Some("wss://fallback.example.com")).unwrap(),
            "wss://fallback.example.com"
        );
    }

    #[test]
    fn test_resolve_room_url_rejects_bad_input() {
        for bad in ["http://bad-scheme", "https://rtc.example.com", "wss://", "rtc.example.com"] {
            let err = resolve_room_url(bad, None).unwrap_err();
            assert!(matches!(err, SessionError::Configuration(_)), "{bad}");
        }
        assert!(matches!(
            resolve_room_url("", None).unwrap_err(),
            SessionError::Configuration(_)
        ));
    }

    #[test]
    fn test_token_grant_deserializes_without_url() {
        let grant: TokenGrant =
            serde_json::from_str(r#"{"token":"t","identity":"i","room":"r"}"#).unwrap();
        assert_eq!(grant.url, "");
    }
}

//! Access tokens: HS256 JWTs carrying LiveKit video grants.

use crate::error::{LiveKitError, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Tokens are valid for six hours unless told otherwise.
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Clock skew tolerated when checking `nbf` and `exp`.
const LEEWAY_SECS: i64 = 60;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Room permissions embedded in the `video` claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrants {
    #[serde(default, skip_serializing_if = "is_false")]
    pub room_create: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub room_list: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub room_join: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub room_admin: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_publish: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_subscribe: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_publish_data: Option<bool>,
}

impl VideoGrants {
    /// Permission for a participant to join `room`.
    pub fn join(room: impl Into<String>) -> Self {
        Self {
            room_join: true,
            room: room.into(),
            ..Default::default()
        }
    }

    /// Server-side permission to administer `room`.
    pub fn admin(room: impl Into<String>) -> Self {
        Self {
            room_admin: true,
            room: room.into(),
            ..Default::default()
        }
    }

    pub fn list() -> Self {
        Self {
            room_list: true,
            ..Default::default()
        }
    }
}

/// The JWT payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default)]
    pub video: VideoGrants,
}

/// Builder for a signed access token.
pub struct AccessToken {
    api_key: String,
    api_secret: SecretString,
    identity: String,
    name: String,
    grants: VideoGrants,
    ttl: Duration,
}

impl AccessToken {
    pub fn new(api_key: impl Into<String>, api_secret: SecretString) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret,
            identity: String::new(),
            name: String::new(),
            grants: VideoGrants::default(),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_grants(mut self, grants: VideoGrants) -> Self {
        self.grants = grants;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Signs the token. A join grant needs an identity.
    pub fn to_jwt(&self) -> Result<String> {
        if self.api_key.is_empty() || self.api_secret.expose_secret().is_empty() {
            return Err(LiveKitError::Token(
                "API key and secret must not be empty".to_string(),
            ));
        }
        if self.grants.room_join && self.identity.is_empty() {
            return Err(LiveKitError::Token(
                "identity is required for room join".to_string(),
            ));
        }

        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: self.api_key.clone(),
            sub: self.identity.clone(),
            name: self.name.clone(),
            nbf: now,
            exp: now + self.ttl.as_secs() as i64,
            video: self.grants.clone(),
        };
        let payload =
            serde_json::to_vec(&claims).map_err(|e| LiveKitError::Token(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(JWT_HEADER),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = sign(self.api_secret.expose_secret(), signing_input.as_bytes())?;
        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }
}

fn mac_for(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| LiveKitError::Token(e.to_string()))
}

fn sign(secret: &str, input: &[u8]) -> Result<Vec<u8>> {
    let mut mac = mac_for(secret)?;
    mac.update(input);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Checks tokens signed with a shared secret.
pub struct TokenVerifier {
    api_secret: SecretString,
}

impl TokenVerifier {
    pub fn new(api_secret: SecretString) -> Self {
        Self { api_secret }
    }

    /// Verifies the signature and validity window and returns the claims.
    pub fn verify(&self, jwt: &str) -> Result<Claims> {
        let mut parts = jwt.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(LiveKitError::Token("malformed JWT".to_string()));
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| LiveKitError::Token(format!("bad signature encoding: {}", e)))?;
        let mut mac = mac_for(self.api_secret.expose_secret())?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| LiveKitError::Token("signature mismatch".to_string()))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| LiveKitError::Token(format!("bad payload encoding: {}", e)))?;
        let claims: Claims = serde_json::from_slice(&payload)
            .map_err(|e| LiveKitError::Token(format!("bad claims: {}", e)))?;

        let now = Utc::now().timestamp();
        if claims.exp + LEEWAY_SECS < now {
            return Err(LiveKitError::Token("token has expired".to_string()));
        }
        if claims.nbf - LEEWAY_SECS > now {
            return Err(LiveKitError::Token("token is not yet valid".to_string()));
        }
        Ok(claims)
    }
}

//! Twirp JSON clients for the LiveKit server APIs.

use crate::{
    error::{LiveKitError, Result},
    token::{AccessToken, VideoGrants},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, header};
use secrecy::SecretString;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{debug, error};

const ROOM_SERVICE: &str = "livekit.RoomService";
const AGENT_DISPATCH_SERVICE: &str = "livekit.AgentDispatchService";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Admin tokens only need to outlive one request.
const ADMIN_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

/// Maps a signalling URL to the HTTP base URL of the same server.
pub fn http_url(url: &str) -> Result<String> {
    let url = url.trim().trim_end_matches('/');
    let mapped = if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if url.starts_with("https://") || url.starts_with("http://") {
        url.to_string()
    } else {
        return Err(LiveKitError::InvalidUrl(url.to_string()));
    };
    if mapped.ends_with("://") {
        return Err(LiveKitError::InvalidUrl(url.to_string()));
    }
    Ok(mapped)
}

/// API key and secret used to sign admin tokens.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: SecretString,
}

#[derive(Clone)]
struct TwirpClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

#[derive(Deserialize)]
struct TwirpError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
}

impl TwirpClient {
    fn new(server_url: &str, credentials: Credentials) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: http_url(server_url)?,
            credentials,
        })
    }

    async fn call<Req, Resp>(
        &self,
        service: &str,
        method: &str,
        body: &Req,
        grants: VideoGrants,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let token = AccessToken::new(
            self.credentials.api_key.clone(),
            self.credentials.api_secret.clone(),
        )
        .with_grants(grants)
        .with_ttl(ADMIN_TOKEN_TTL)
        .to_jwt()?;

        let url = format!("{}/twirp/{}/{}", self.base_url, service, method);
        debug!(%url, "LiveKit request");
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let message = match serde_json::from_slice::<TwirpError>(&bytes) {
                Ok(err) if !err.msg.is_empty() => format!("{} ({})", err.msg, err.code),
                _ => String::from_utf8_lossy(&bytes).into_owned(),
            };
            error!(%url, %status, %message, "LiveKit request failed");
            return Err(LiveKitError::Status {
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_slice(&bytes).map_err(|e| LiveKitError::Decode(e.to_string()))
    }
}

/// A room as reported by `ListRooms`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Room {
    #[serde(default)]
    pub sid: String,
    pub name: String,
    #[serde(default, alias = "numParticipants")]
    pub num_participants: u32,
    #[serde(default)]
    pub metadata: String,
}

#[derive(Deserialize)]
struct ListRoomsResponse {
    #[serde(default)]
    rooms: Vec<Room>,
}

#[derive(Serialize)]
struct SendDataRequest<'a> {
    room: &'a str,
    data: String,
    kind: &'static str,
    topic: &'a str,
}

#[derive(Deserialize)]
struct Empty {}

/// Client for `livekit.RoomService`.
#[derive(Clone)]
pub struct RoomServiceClient {
    inner: TwirpClient,
}

impl RoomServiceClient {
    pub fn new(server_url: &str, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            inner: TwirpClient::new(server_url, credentials)?,
        })
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        let response: ListRoomsResponse = self
            .inner
            .call(
                ROOM_SERVICE,
                "ListRooms",
                &serde_json::json!({}),
                VideoGrants::list(),
            )
            .await?;
        Ok(response.rooms)
    }

    /// Sends a reliable data packet to every participant in `room`.
    pub async fn send_data(&self, room: &str, data: &[u8], topic: &str) -> Result<()> {
        let request = SendDataRequest {
            room,
            data: STANDARD.encode(data),
            kind: "RELIABLE",
            topic,
        };
        let _: Empty = self
            .inner
            .call(ROOM_SERVICE, "SendData", &request, VideoGrants::admin(room))
            .await?;
        Ok(())
    }
}

/// An explicit agent dispatch into a room.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentDispatch {
    pub id: String,
    #[serde(alias = "agentName")]
    pub agent_name: String,
    pub room: String,
    #[serde(default)]
    pub metadata: String,
}

#[derive(Serialize)]
struct CreateDispatchRequest<'a> {
    agent_name: &'a str,
    room: &'a str,
    metadata: &'a str,
}

#[derive(Serialize)]
struct DeleteDispatchRequest<'a> {
    dispatch_id: &'a str,
    room: &'a str,
}

/// Client for `livekit.AgentDispatchService`.
#[derive(Clone)]
pub struct AgentDispatchClient {
    inner: TwirpClient,
}

impl AgentDispatchClient {
    pub fn new(server_url: &str, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            inner: TwirpClient::new(server_url, credentials)?,
        })
    }

    pub async fn create_dispatch(
        &self,
        room: &str,
        agent_name: &str,
        metadata: &str,
    ) -> Result<AgentDispatch> {
        let request = CreateDispatchRequest {
            agent_name,
            room,
            metadata,
        };
        self.inner
            .call(
                AGENT_DISPATCH_SERVICE,
                "CreateDispatch",
                &request,
                VideoGrants::admin(room),
            )
            .await
    }

    pub async fn delete_dispatch(&self, dispatch_id: &str, room: &str) -> Result<AgentDispatch> {
        let request = DeleteDispatchRequest { dispatch_id, room };
        self.inner
            .call(
                AGENT_DISPATCH_SERVICE,
                "DeleteDispatch",
                &request,
                VideoGrants::admin(room),
            )
            .await
    }
}

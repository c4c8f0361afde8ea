//! Voice agent lifecycle.
//!
//! The backend never runs the agent itself. It asks the LiveKit server to
//! dispatch a named agent worker into a room and remembers the dispatch so
//! it can be cancelled later. Text messages reach the agent as reliable data
//! packets on the chat topic.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kalie_core::session::agent_identity_for;
use livekit_admin::{AgentDispatchClient, Credentials, RoomServiceClient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Topic agents listen on for typed chat input.
pub const CHAT_TOPIC: &str = "lk.chat";

/// The subset of the LiveKit server API the backend depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomServer: Send + Sync {
    /// Names of the rooms that currently exist on the server.
    async fn list_room_names(&self) -> Result<Vec<String>>;

    /// Dispatches `agent_name` into `room` and returns the dispatch id.
    async fn create_dispatch(&self, room: &str, agent_name: &str, metadata: &str)
    -> Result<String>;

    async fn delete_dispatch(&self, dispatch_id: &str, room: &str) -> Result<()>;

    async fn send_data(&self, room: &str, data: &[u8], topic: &str) -> Result<()>;
}

/// [`RoomServer`] backed by the LiveKit Twirp API.
pub struct LiveKitServer {
    rooms: RoomServiceClient,
    dispatch: AgentDispatchClient,
}

impl LiveKitServer {
    pub fn new(url: &str, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            rooms: RoomServiceClient::new(url, credentials.clone())
                .context("Failed to build LiveKit room client")?,
            dispatch: AgentDispatchClient::new(url, credentials)
                .context("Failed to build LiveKit dispatch client")?,
        })
    }
}

#[async_trait]
impl RoomServer for LiveKitServer {
    async fn list_room_names(&self) -> Result<Vec<String>> {
        let rooms = self.rooms.list_rooms().await?;
        Ok(rooms.into_iter().map(|r| r.name).collect())
    }

    async fn create_dispatch(
        &self,
        room: &str,
        agent_name: &str,
        metadata: &str,
    ) -> Result<String> {
        let dispatch = self
            .dispatch
            .create_dispatch(room, agent_name, metadata)
            .await?;
        Ok(dispatch.id)
    }

    async fn delete_dispatch(&self, dispatch_id: &str, room: &str) -> Result<()> {
        self.dispatch.delete_dispatch(dispatch_id, room).await?;
        Ok(())
    }

    async fn send_data(&self, room: &str, data: &[u8], topic: &str) -> Result<()> {
        self.rooms.send_data(room, data, topic).await?;
        Ok(())
    }
}

/// Tracks which rooms have an agent dispatched, one per room.
pub struct AgentRegistry {
    server: Arc<dyn RoomServer>,
    agent_name: String,
    /// Room name to dispatch id.
    active: Mutex<HashMap<String, String>>,
}

impl AgentRegistry {
    pub fn new(server: Arc<dyn RoomServer>, agent_name: impl Into<String>) -> Self {
        Self {
            server,
            agent_name: agent_name.into(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_running(&self, room: &str) -> bool {
        self.active.lock().await.contains_key(room)
    }

    /// Dispatches the agent into `room` unless one is already there.
    #[instrument(skip(self))]
    pub async fn start(&self, room: &str) -> Result<String> {
        let mut active = self.active.lock().await;
        if let Some(id) = active.get(room) {
            info!(dispatch_id = %id, "Agent already dispatched");
            return Ok(id.clone());
        }
        let metadata = serde_json::json!({ "identity": agent_identity_for(room) }).to_string();
        let id = self
            .server
            .create_dispatch(room, &self.agent_name, &metadata)
            .await
            .with_context(|| format!("Failed to dispatch agent into '{}'", room))?;
        info!(dispatch_id = %id, agent = %self.agent_name, "Agent dispatched");
        active.insert(room.to_string(), id.clone());
        Ok(id)
    }

    /// Cancels the room's dispatch. Returns `false` when none was running.
    #[instrument(skip(self))]
    pub async fn end(&self, room: &str, reason: &str) -> Result<bool> {
        let Some(id) = self.active.lock().await.remove(room) else {
            return Ok(false);
        };
        self.server
            .delete_dispatch(&id, room)
            .await
            .with_context(|| format!("Failed to end agent dispatch '{}'", id))?;
        info!(dispatch_id = %id, reason, "Agent dispatch ended");
        Ok(true)
    }

    /// Forwards a typed message to the room's agent, dispatching one first
    /// if the room has none.
    #[instrument(skip(self, message))]
    pub async fn send_message(&self, room: &str, message: &str) -> Result<()> {
        if !self.is_running(room).await {
            warn!("No agent in room; dispatching before sending");
            self.start(room).await?;
        }
        self.server
            .send_data(room, message.as_bytes(), CHAT_TOPIC)
            .await
            .with_context(|| format!("Failed to send message to '{}'", room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_is_idempotent_per_room() {
        let mut server = MockRoomServer::new();
        server
            .expect_create_dispatch()
            .withf(|room: &str, agent: &str, metadata: &str| {
                room == "room-1" && agent == "kalie" && metadata.contains("agent-room-1")
            })
            .times(1)
            .returning(|_, _, _| Ok("AD_1".to_string()));
        let registry = AgentRegistry::new(Arc::new(server), "kalie");

        assert_eq!(registry.start("room-1").await.unwrap(), "AD_1");
        assert_eq!(registry.start("room-1").await.unwrap(), "AD_1");
        assert!(registry.is_running("room-1").await);
    }

    #[tokio::test]
    async fn test_end_without_dispatch_is_false() {
        let registry = AgentRegistry::new(Arc::new(MockRoomServer::new()), "kalie");
        assert!(!registry.end("room-1", "session ended").await.unwrap());
    }

    #[tokio::test]
    async fn test_end_deletes_dispatch() {
        let mut server = MockRoomServer::new();
        server
            .expect_create_dispatch()
            .returning(|_, _, _| Ok("AD_9".to_string()));
        server
            .expect_delete_dispatch()
            .withf(|id: &str, room: &str| id == "AD_9" && room == "room-1")
            .times(1)
            .returning(|_, _| Ok(()));
        let registry = AgentRegistry::new(Arc::new(server), "kalie");
        registry.start("room-1").await.unwrap();

        assert!(registry.end("room-1", "session ended").await.unwrap());
        assert!(!registry.is_running("room-1").await);
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_not_recorded() {
        let mut server = MockRoomServer::new();
        server
            .expect_create_dispatch()
            .returning(|_, _, _| Err(anyhow::anyhow!("server unavailable")));
        let registry = AgentRegistry::new(Arc::new(server), "kalie");

        assert!(registry.start("room-1").await.is_err());
        assert!(!registry.is_running("room-1").await);
    }

    #[tokio::test]
    async fn test_send_message_dispatches_first() {
        let mut server = MockRoomServer::new();
        server
            .expect_create_dispatch()
            .times(1)
            .returning(|_, _, _| Ok("AD_1".to_string()));
        server
            .expect_send_data()
            .withf(|room: &str, data: &[u8], topic: &str| {
                room == "room-1" && data == b"hello" && topic == CHAT_TOPIC
            })
            .times(2)
            .returning(|_, _, _| Ok(()));
        let registry = AgentRegistry::new(Arc::new(server), "kalie");

        registry.send_message("room-1", "hello").await.unwrap();
        registry.send_message("room-1", "hello").await.unwrap();
    }
}

//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the in-memory store,
//! the LiveKit server client and the agent registry.

use crate::{
    agent::{AgentRegistry, RoomServer},
    config::Config,
    store::Store,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub store: Store,
    /// Absent when LiveKit credentials are not configured.
    pub room_server: Option<Arc<dyn RoomServer>>,
    pub agents: Option<AgentRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, room_server: Option<Arc<dyn RoomServer>>) -> Self {
        let agents = room_server
            .clone()
            .map(|server| AgentRegistry::new(server, config.agent_name.clone()));
        Self {
            store: Store::new(),
            room_server,
            agents,
            config: Arc::new(config),
        }
    }
}

//! Seams to the real-time media stack.
//!
//! The controller never talks to a WebRTC library directly. It drives these
//! traits, which a platform binding (browser, native SDK) implements. Room
//! notifications arrive as [`RoomEvent`] values on a channel returned by
//! [`RoomConnector::connect`], so the controller can fold them into its own
//! state in arrival order.

use crate::error::MediaError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The kind of a published or subscribed track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Microphone hardware.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Asks the user (or OS) for microphone access.
    async fn request_permission(&self) -> Result<(), MediaError>;

    /// Opens a fresh capture track.
    async fn create_track(&self) -> Result<Box<dyn LocalAudioTrack>, MediaError>;
}

/// A live microphone capture owned by the controller.
pub trait LocalAudioTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Stops capture and releases the device. Must be idempotent.
    fn stop(&mut self);
}

/// Opens room connections.
#[async_trait]
pub trait RoomConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        token: &str,
    ) -> Result<(Arc<dyn MediaRoom>, mpsc::UnboundedReceiver<RoomEvent>), MediaError>;
}

/// A connected media room.
#[async_trait]
pub trait MediaRoom: Send + Sync {
    fn name(&self) -> &str;

    async fn publish_track(&self, track: &dyn LocalAudioTrack) -> Result<(), MediaError>;

    /// Leaves the room. Safe to call more than once.
    async fn disconnect(&self);
}

/// An inbound track from a remote participant that can be played back.
pub trait RemoteTrack: Send {
    fn sid(&self) -> &str;

    /// Starts playback and returns the handle that keeps it alive.
    fn attach(&mut self) -> Box<dyn AudioAttachment>;
}

/// A playback sink bound to a remote track. Dropping it must stop playback.
pub trait AudioAttachment: Send {
    fn detach(&mut self);
}

/// What the agent is doing, as advertised by the agent participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentActivity {
    Idle,
    Thinking,
    UsingTools,
}

/// Notifications emitted by a connected room.
pub enum RoomEvent {
    TrackSubscribed {
        participant: String,
        kind: TrackKind,
        track: Box<dyn RemoteTrack>,
    },
    TrackMuted {
        participant: String,
        kind: TrackKind,
    },
    TrackUnmuted {
        participant: String,
        kind: TrackKind,
    },
    AgentActivityChanged {
        participant: String,
        activity: AgentActivity,
    },
    Disconnected {
        reason: String,
    },
}

impl RoomEvent {
    pub fn participant(&self) -> Option<&str> {
        match self {
            RoomEvent::TrackSubscribed { participant, .. }
            | RoomEvent::TrackMuted { participant, .. }
            | RoomEvent::TrackUnmuted { participant, .. }
            | RoomEvent::AgentActivityChanged { participant, .. } => Some(participant),
            RoomEvent::Disconnected { .. } => None,
        }
    }
}

impl fmt::Debug for RoomEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomEvent::TrackSubscribed {
                participant,
                kind,
                track,
            } => f
                .debug_struct("TrackSubscribed")
                .field("participant", participant)
                .field("kind", kind)
                .field("sid", &track.sid())
                .finish(),
            RoomEvent::TrackMuted { participant, kind } => f
                .debug_struct("TrackMuted")
                .field("participant", participant)
                .field("kind", kind)
                .finish(),
            RoomEvent::TrackUnmuted { participant, kind } => f
                .debug_struct("TrackUnmuted")
                .field("participant", participant)
                .field("kind", kind)
                .finish(),
            RoomEvent::AgentActivityChanged {
                participant,
                activity,
            } => f
                .debug_struct("AgentActivityChanged")
                .field("participant", participant)
                .field("activity", activity)
                .finish(),
            RoomEvent::Disconnected { reason } => f
                .debug_struct("Disconnected")
                .field("reason", reason)
                .finish(),
        }
    }
}

//! Boundary between the session state and the decorative assistant animation.
//!
//! The controller has no dependency on drawing code. A frontend implements
//! [`Renderer`] and calls it once per frame with the latest state.

use crate::status::ConnectionState;
use std::time::Duration;

/// Which animation the assistant blob should play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationMode {
    Idle,
    Speaking,
    UsingTools,
}

impl From<&ConnectionState> for AnimationMode {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Speaking => AnimationMode::Speaking,
            ConnectionState::UsingTools => AnimationMode::UsingTools,
            _ => AnimationMode::Idle,
        }
    }
}

pub trait Renderer {
    /// Draws one frame. `timestamp` is the time since the animation loop began.
    fn render(&mut self, state: &ConnectionState, timestamp: Duration);
}

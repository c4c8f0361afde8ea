//! Client-side core of the Kali-E voice assistant.
//!
//! [`controller::SessionController`] drives one voice session against a
//! LiveKit room: it fetches a token from the backend, joins the room,
//! publishes the microphone and folds room events into a single observable
//! [`status::StatusSnapshot`]. Media access goes through the traits in
//! [`media`], so any platform binding can plug in.

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod media;
pub mod render;
pub mod session;
pub mod status;

#[cfg(test)]
mod testing;

pub use controller::{Collaborators, SessionController};
pub use error::{ErrorKind, MediaError, SessionError};
pub use status::{ConnectionState, StatusSnapshot};

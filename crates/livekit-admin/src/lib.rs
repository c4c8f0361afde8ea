//! Server-side helpers for a LiveKit deployment: access-token minting and
//! the handful of Twirp calls the Kali-E backend makes.

pub mod error;
pub mod token;
pub mod twirp;

pub use error::{LiveKitError, Result};
pub use token::{AccessToken, Claims, DEFAULT_TTL, TokenVerifier, VideoGrants};
pub use twirp::{AgentDispatch, AgentDispatchClient, Credentials, Room, RoomServiceClient, http_url};

/// Errors returned by the LiveKit admin client.
#[derive(Debug, thiserror::Error)]
pub enum LiveKitError {
    #[error("access token error: {0}")]
    Token(String),
    #[error("invalid server URL '{0}' (expected ws://, wss://, http:// or https://)")]
    InvalidUrl(String),
    #[error("request to LiveKit failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LiveKit returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed LiveKit response: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, LiveKitError>;

use std::time::Duration;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Client-side settings for the session controller.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the Kali-E backend, e.g. `http://localhost:8000/api`.
    pub api_base_url: String,
    /// Room URL used when the token endpoint returns an empty `url`.
    pub fallback_room_url: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            fallback_room_url: None,
            connect_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = Self::default();

        let api_base_url = std::env::var("KALIE_API_URL").unwrap_or(defaults.api_base_url);
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "KALIE_API_URL".to_string(),
                format!("'{}' is not an http(s) URL", api_base_url),
            ));
        }

        let fallback_room_url = std::env::var("LIVEKIT_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let connect_timeout = seconds_var("ROOM_CONNECT_TIMEOUT", defaults.connect_timeout)?;
        let request_timeout = seconds_var("TOKEN_REQUEST_TIMEOUT", defaults.request_timeout)?;

        Ok(Self {
            api_base_url,
            fallback_room_url,
            connect_timeout,
            request_timeout,
        })
    }
}

fn seconds_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => {
            let secs = raw.trim().parse::<f64>().map_err(|_| {
                ConfigError::InvalidValue(name.to_string(), format!("'{}' is not a number", raw))
            })?;
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    format!("'{}' must be a positive number of seconds", raw),
                ));
            }
            Ok(Duration::from_secs_f64(secs))
        }
        Err(_) => Ok(default),
    }
}

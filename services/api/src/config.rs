use livekit_admin::Credentials;
use secrecy::{ExposeSecret, SecretString};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Signalling URL handed to clients. Empty when unset.
    pub livekit_url: String,
    pub livekit_api_key: Option<String>,
    pub livekit_api_secret: Option<SecretString>,
    pub agent_name: String,
    pub token_ttl: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let livekit_url = std::env::var("LIVEKIT_URL").unwrap_or_default();
        let livekit_api_key = non_empty_var("LIVEKIT_API_KEY");
        let livekit_api_secret = non_empty_var("LIVEKIT_API_SECRET").map(SecretString::from);

        let agent_name = non_empty_var("AGENT_NAME").unwrap_or_else(|| "kalie".to_string());

        let token_ttl = match std::env::var("TOKEN_TTL_SECS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "TOKEN_TTL_SECS".to_string(),
                        format!("'{}' is not a positive number of seconds", raw),
                    ));
                }
            },
            Err(_) => livekit_admin::DEFAULT_TTL,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            livekit_url,
            livekit_api_key,
            livekit_api_secret,
            agent_name,
            token_ttl,
            log_level,
        })
    }

    /// The API key pair, if both halves are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.livekit_api_key, &self.livekit_api_secret) {
            (Some(api_key), Some(api_secret)) => Some(Credentials {
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
            }),
            _ => None,
        }
    }

    /// Like [`Config::credentials`], for callers that cannot run without them.
    pub fn require_credentials(&self) -> Result<Credentials, ConfigError> {
        if self.livekit_api_key.is_none() {
            return Err(ConfigError::MissingVar("LIVEKIT_API_KEY".to_string()));
        }
        if self
            .livekit_api_secret
            .as_ref()
            .is_none_or(|s| s.expose_secret().is_empty())
        {
            return Err(ConfigError::MissingVar("LIVEKIT_API_SECRET".to_string()));
        }
        self.credentials()
            .ok_or_else(|| ConfigError::MissingVar("LIVEKIT_API_KEY".to_string()))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("LIVEKIT_URL");
            env::remove_var("LIVEKIT_API_KEY");
            env::remove_var("LIVEKIT_API_SECRET");
            env::remove_var("AGENT_NAME");
            env::remove_var("TOKEN_TTL_SECS");
            env::remove_var("RUST_LOG");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env_vars();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:8000");
        assert_eq!(config.livekit_url, "");
        assert!(config.livekit_api_key.is_none());
        assert!(config.livekit_api_secret.is_none());
        assert!(config.credentials().is_none());
        assert_eq!(config.agent_name, "kalie");
        assert_eq!(config.token_ttl, Duration::from_secs(21600));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:9000");
            env::set_var("LIVEKIT_URL", "wss://rtc.example.com");
            env::set_var("LIVEKIT_API_KEY", "APIkey");
            env::set_var("LIVEKIT_API_SECRET", "secret-value");
            env::set_var("AGENT_NAME", "kalie-dev");
            env::set_var("TOKEN_TTL_SECS", "600");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:9000");
        assert_eq!(config.livekit_url, "wss://rtc.example.com");
        let credentials = config.credentials().expect("credentials");
        assert_eq!(credentials.api_key, "APIkey");
        assert_eq!(credentials.api_secret.expose_secret(), "secret-value");
        assert_eq!(config.agent_name, "kalie-dev");
        assert_eq!(config.token_ttl, Duration::from_secs(600));
        assert_eq!(config.log_level, Level::DEBUG);
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_debug_hides_secret() {
        clear_env_vars();
        unsafe {
            env::set_var("LIVEKIT_API_KEY", "APIkey");
            env::set_var("LIVEKIT_API_SECRET", "super-secret-value");
        }
        let config = Config::from_env().unwrap();
        assert!(!format!("{:?}", config).contains("super-secret-value"));
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_half_credentials() {
        clear_env_vars();
        unsafe {
            env::set_var("LIVEKIT_API_KEY", "APIkey");
            env::set_var("LIVEKIT_API_SECRET", "   ");
        }

        let config = Config::from_env().unwrap();

        assert!(config.credentials().is_none());
        match config.require_credentials() {
            Err(ConfigError::MissingVar(var)) => assert_eq!(var, "LIVEKIT_API_SECRET"),
            other => panic!("Expected MissingVar, got {:?}", other.map(|c| c.api_key)),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_invalid_token_ttl() {
        clear_env_vars();
        unsafe {
            env::set_var("TOKEN_TTL_SECS", "0");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "TOKEN_TTL_SECS"),
            _ => panic!("Expected InvalidValue for TOKEN_TTL_SECS"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
        clear_env_vars();
    }
}

//! Engine configuration, loadable from the environment.

use std::time::Duration;

/// A custom error type for configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Controls whether and how a dropped connection is retried.
#[derive(Clone, Debug)]
pub struct ReconnectionConfig {
    /// Master switch. When false, `start` on the controller rejects
    /// immediately and a dropped connection stays dropped.
    pub enabled: bool,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor applied per failed attempt.
    pub backoff_multiplier: f64,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Randomization band applied to each delay, as a fraction (0.0–1.0).
    pub jitter_factor: f64,
    /// Attempts before giving up terminally. 0 means unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(30_000),
            jitter_factor: 0.25,
            max_attempts: 0,
        }
    }
}

impl ReconnectionConfig {
    /// Checks the numeric invariants the backoff math relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() {
            return Err(ConfigError::Invalid(
                "initial_delay must be greater than zero".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::Invalid(
                "max_delay must not be below initial_delay".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Invalid(
                "jitter_factor must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the session needs to reach and drive the service.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `wss://realtime.confab.dev/v1/session`.
    pub url: String,
    /// Heartbeat ping cadence. `None` disables the heartbeat entirely.
    pub ping_interval: Option<Duration>,
    /// How long a connection attempt may take before it fails.
    pub connect_timeout: Duration,
    /// When true, audio transmission is gated on the user holding the turn.
    pub respect_turn_state: bool,
    /// Whether the connection's negotiated mode accepts binary audio frames.
    pub binary_audio: bool,
    pub reconnection: ReconnectionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            ping_interval: Some(Duration::from_secs(15)),
            connect_timeout: Duration::from_secs(10),
            respect_turn_state: true,
            binary_audio: true,
            reconnection: ReconnectionConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Creates a config for the given endpoint with defaults everywhere else.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// `CONFAB_WS_URL` is required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let url = std::env::var("CONFAB_WS_URL")
            .map_err(|_| ConfigError::MissingVar("CONFAB_WS_URL".to_string()))?;

        let ping_interval = match env_ms("CONFAB_PING_INTERVAL_MS")? {
            Some(ms) if ms == 0 => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => Some(Duration::from_secs(15)),
        };

        let connect_timeout = env_ms("CONFAB_CONNECT_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_secs(10));

        let respect_turn_state = env_bool("CONFAB_RESPECT_TURNS")?.unwrap_or(true);

        let mut reconnection = ReconnectionConfig::default();
        if let Some(enabled) = env_bool("CONFAB_RECONNECT")? {
            reconnection.enabled = enabled;
        }
        if let Some(ms) = env_ms("CONFAB_RECONNECT_INITIAL_DELAY_MS")? {
            reconnection.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_ms("CONFAB_RECONNECT_MAX_DELAY_MS")? {
            reconnection.max_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_ms("CONFAB_RECONNECT_MAX_ATTEMPTS")? {
            reconnection.max_attempts = attempts as u32;
        }

        let config = Self {
            url,
            ping_interval,
            connect_timeout,
            respect_turn_state,
            binary_audio: true,
            reconnection,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the whole configuration, including the reconnection block.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Invalid("url must not be empty".to_string()));
        }
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(ConfigError::Invalid(format!(
                "url must be a ws:// or wss:// endpoint, got '{}'",
                self.url
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }
        self.reconnection.validate()
    }
}

fn env_ms(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(None),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            other => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{other}' is not a boolean"),
            )),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("CONFAB_WS_URL");
            env::remove_var("CONFAB_PING_INTERVAL_MS");
            env::remove_var("CONFAB_CONNECT_TIMEOUT_MS");
            env::remove_var("CONFAB_RESPECT_TURNS");
            env::remove_var("CONFAB_RECONNECT");
            env::remove_var("CONFAB_RECONNECT_INITIAL_DELAY_MS");
            env::remove_var("CONFAB_RECONNECT_MAX_DELAY_MS");
            env::remove_var("CONFAB_RECONNECT_MAX_ATTEMPTS");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_minimal() {
        clear_env_vars();
        unsafe {
            env::set_var("CONFAB_WS_URL", "wss://realtime.confab.dev/v1/session");
        }

        let config = SessionConfig::from_env().expect("config should load");
        assert_eq!(config.url, "wss://realtime.confab.dev/v1/session");
        assert_eq!(config.ping_interval, Some(Duration::from_secs(15)));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.respect_turn_state);
        assert!(config.reconnection.enabled);
        assert_eq!(config.reconnection.max_attempts, 0);
    }

    #[test]
    #[serial]
    fn test_from_env_missing_url() {
        clear_env_vars();
        let err = SessionConfig::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "CONFAB_WS_URL"),
            _ => panic!("Expected MissingVar for CONFAB_WS_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("CONFAB_WS_URL", "ws://localhost:9090/session");
            env::set_var("CONFAB_PING_INTERVAL_MS", "5000");
            env::set_var("CONFAB_CONNECT_TIMEOUT_MS", "2500");
            env::set_var("CONFAB_RESPECT_TURNS", "false");
            env::set_var("CONFAB_RECONNECT_MAX_ATTEMPTS", "7");
        }

        let config = SessionConfig::from_env().expect("config should load");
        assert_eq!(config.ping_interval, Some(Duration::from_millis(5000)));
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert!(!config.respect_turn_state);
        assert_eq!(config.reconnection.max_attempts, 7);
    }

    #[test]
    #[serial]
    fn test_zero_ping_interval_disables_heartbeat() {
        clear_env_vars();
        unsafe {
            env::set_var("CONFAB_WS_URL", "ws://localhost:9090/session");
            env::set_var("CONFAB_PING_INTERVAL_MS", "0");
        }

        let config = SessionConfig::from_env().expect("config should load");
        assert!(config.ping_interval.is_none());
    }

    #[test]
    #[serial]
    fn test_invalid_numeric_value() {
        clear_env_vars();
        unsafe {
            env::set_var("CONFAB_WS_URL", "ws://localhost:9090/session");
            env::set_var("CONFAB_PING_INTERVAL_MS", "soon");
        }

        let err = SessionConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CONFAB_PING_INTERVAL_MS"),
            _ => panic!("Expected InvalidValue for CONFAB_PING_INTERVAL_MS"),
        }
    }

    #[test]
    fn test_validate_rejects_non_ws_url() {
        let config = SessionConfig::new("https://confab.dev");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_multiplier() {
        let config = SessionConfig {
            reconnection: ReconnectionConfig {
                backoff_multiplier: 0.5,
                ..ReconnectionConfig::default()
            },
            ..SessionConfig::new("wss://realtime.confab.dev")
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range_jitter() {
        let reconnection = ReconnectionConfig {
            jitter_factor: 1.5,
            ..ReconnectionConfig::default()
        };
        assert!(matches!(reconnection.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_max_below_initial() {
        let reconnection = ReconnectionConfig {
            initial_delay: Duration::from_secs(60),
            ..ReconnectionConfig::default()
        };
        assert!(matches!(reconnection.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_default_config_is_valid_once_url_is_set() {
        let config = SessionConfig::new("wss://realtime.confab.dev/v1/session");
        assert!(config.validate().is_ok());
    }
}

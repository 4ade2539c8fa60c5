//! Configuration for [`Requester`](crate::Requester) instances.

use crate::error::ConfigError;
use requester_core::http::ResponseType;
use serde::{Deserialize, Serialize};

/// Environment variable capping restart cycles per logical send.
pub const MAX_RESTARTS_VAR: &str = "REQUESTER_MAX_RESTARTS";

/// Environment variable sizing the per-send event history.
pub const EVENT_BUFFER_VAR: &str = "REQUESTER_EVENT_BUFFER";

/// Runtime settings shared by every descriptor derived from one requester.
///
/// # Example
///
/// ```
/// use requester_runtime::RequesterConfig;
///
/// let config = RequesterConfig::default()
///     .with_max_restarts(5)
///     .with_event_buffer(32);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequesterConfig {
    /// Capacity reserved up front for the replay history of one send
    pub event_buffer: usize,
    /// Restart cycles allowed per logical send; `None` is unbounded
    pub max_restarts: Option<u32>,
    /// Response encoding used when no descriptor sets one
    pub default_response_type: ResponseType,
}

impl RequesterConfig {
    /// Create a configuration with custom values
    #[must_use]
    pub const fn new(
        event_buffer: usize,
        max_restarts: Option<u32>,
        default_response_type: ResponseType,
    ) -> Self {
        Self {
            event_buffer,
            max_restarts,
            default_response_type,
        }
    }

    /// Set the replay history capacity
    #[must_use]
    pub const fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Cap restart cycles per logical send
    #[must_use]
    pub const fn with_max_restarts(mut self, restarts: u32) -> Self {
        self.max_restarts = Some(restarts);
        self
    }

    /// Allow unbounded restart cycles
    #[must_use]
    pub const fn with_unbounded_restarts(mut self) -> Self {
        self.max_restarts = None;
        self
    }

    /// Set the fallback response encoding
    #[must_use]
    pub const fn with_default_response_type(mut self, response_type: ResponseType) -> Self {
        self.default_response_type = response_type;
        self
    }

    /// Check the configuration for values the runtime cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the event buffer is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "event_buffer",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Build a configuration from the process environment.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when a variable is set but unparsable,
    /// or any error from [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(MAX_RESTARTS_VAR) {
            let restarts = raw.trim().parse().map_err(|_| ConfigError::Parse {
                variable: MAX_RESTARTS_VAR,
                value: raw.clone(),
            })?;
            config = config.with_max_restarts(restarts);
        }

        if let Some(raw) = lookup(EVENT_BUFFER_VAR) {
            let capacity = raw.trim().parse().map_err(|_| ConfigError::Parse {
                variable: EVENT_BUFFER_VAR,
                value: raw.clone(),
            })?;
            config = config.with_event_buffer(capacity);
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            event_buffer: 16,
            max_restarts: None,
            default_response_type: ResponseType::Json,
        }
    }
}

//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

// Validation constants
const MIN_TIMEOUT_MS: u64 = 1;
const MAX_TIMEOUT_MS: u64 = 3_600_000; // 1 hour

/// Environment variable that overrides the engine executable.
pub const EXECUTABLE_ENV: &str = "SWIPL";

/// Configuration for a Prolog session.
///
/// # Examples
///
/// ```rust
/// use horn_session::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .executable("/usr/local/bin/swipl")
///     .query_timeout_ms(10_000)
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Path to the SWI-Prolog executable (default: `swipl`)
    pub executable: PathBuf,

    /// Command line arguments (default: `-q +tty`)
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// How long to wait for the first prompt after spawning (default: 3s)
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// How long to wait for each asserted clause to be accepted (default: 3s)
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,

    /// How long to wait for each query response (default: 5s)
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Whether the engine echoes every line it receives (default: `false`)
    ///
    /// Piped engines do not echo. Set this for a pty wrapper that does, so
    /// one echoed line is consumed after each send and never reaches the
    /// response recognizers.
    #[serde(default = "default_echo")]
    pub echo: bool,
}

fn default_args() -> Vec<String> {
    vec!["-q".to_string(), "+tty".to_string()]
}

fn default_startup_timeout_ms() -> u64 {
    3_000
}

fn default_load_timeout_ms() -> u64 {
    3_000
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_echo() -> bool {
    false
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("swipl"),
            args: default_args(),
            startup_timeout_ms: default_startup_timeout_ms(),
            load_timeout_ms: default_load_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            echo: default_echo(),
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Default configuration, with the executable taken from `$SWIPL` if set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(EXECUTABLE_ENV)
            && !path.trim().is_empty()
        {
            config.executable = PathBuf::from(path);
        }
        config
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidConfig` if the executable path is empty
    /// or any timeout is outside 1ms..=1h.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.executable.as_os_str().is_empty() {
            return Err(SessionError::InvalidConfig(
                "executable path cannot be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("startup_timeout_ms", self.startup_timeout_ms),
            ("load_timeout_ms", self.load_timeout_ms),
            ("query_timeout_ms", self.query_timeout_ms),
        ] {
            if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&value) {
                return Err(SessionError::InvalidConfig(format!(
                    "{name} must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS} (got {value})"
                )));
            }
        }

        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.executable = path.into();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn startup_timeout_ms(mut self, ms: u64) -> Self {
        self.config.startup_timeout_ms = ms;
        self
    }

    pub fn load_timeout_ms(mut self, ms: u64) -> Self {
        self.config.load_timeout_ms = ms;
        self
    }

    pub fn query_timeout_ms(mut self, ms: u64) -> Self {
        self.config.query_timeout_ms = ms;
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.config.echo = echo;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

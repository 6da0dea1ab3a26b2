use std::env;
use std::fmt;
use std::time::Duration;

const DEFAULT_EVENT_BUFFER_SIZE: usize = 200;
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1000;
const DEFAULT_LONG_RUNNING_SECS: u64 = 300;
const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 60;

/// Configuration error naming the offending environment variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub variable: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(variable: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError {
            variable: variable.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.variable, self.message)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Number of recent events kept for replay to late subscribers
    pub event_buffer_size: usize,
    /// Per-subscriber channel capacity before events are dropped
    pub subscriber_capacity: usize,
    /// Age after which an entry is reported as long-running
    pub long_running_secs: u64,
    /// How often the leak watchdog scans the registry
    pub watchdog_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            long_running_secs: DEFAULT_LONG_RUNNING_SECS,
            watchdog_interval_secs: DEFAULT_WATCHDOG_INTERVAL_SECS,
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Parse the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            event_buffer_size: parse_positive(
                &lookup,
                "TRACKER_EVENT_BUFFER_SIZE",
                DEFAULT_EVENT_BUFFER_SIZE,
            )?,
            subscriber_capacity: parse_positive(
                &lookup,
                "TRACKER_SUBSCRIBER_CAPACITY",
                DEFAULT_SUBSCRIBER_CAPACITY,
            )?,
            long_running_secs: parse_positive(
                &lookup,
                "TRACKER_LONG_RUNNING_SECS",
                DEFAULT_LONG_RUNNING_SECS,
            )?,
            watchdog_interval_secs: parse_positive(
                &lookup,
                "TRACKER_WATCHDOG_INTERVAL_SECS",
                DEFAULT_WATCHDOG_INTERVAL_SECS,
            )?,
        })
    }

    pub fn long_running_threshold(&self) -> Duration {
        Duration::from_secs(self.long_running_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
}

fn parse_positive<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialEq + From<u8>,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };

    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::new(name, format!("'{}' is not a valid number", raw)))?;

    if value == T::from(0u8) {
        return Err(ConfigError::new(name, "must be greater than zero"));
    }

    Ok(value)
}

//! Supervisor configuration.
//!
//! The serial line settings are fixed ([`PortConfig::SCALE`](crate::transport::PortConfig::SCALE));
//! only buffering and the reconnect settle delay are tunable.
//!
//! # Example
//!
//! ```
//! use scale_link::SupervisorConfig;
//! use std::time::Duration;
//!
//! let config = SupervisorConfig::from_json(r#"{ "settle_delay_ms": 250 }"#).unwrap();
//! assert_eq!(config.settle_delay, Duration::from_millis(250));
//! assert_eq!(config.read_buffer_size, 1024);
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{Result, ScaleError};

/// Default delay between revoking authorizations and re-acquiring.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Default size of a single device read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Default capacity of the session → supervisor event queue.
pub const DEFAULT_READING_CHANNEL_CAPACITY: usize = 64;

/// Default capacity of the subscriber broadcast buffer.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 16;

/// Configuration for the connection supervisor and its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Wait after revoking authorizations during a manual reconnect.
    #[serde(rename = "settle_delay_ms", deserialize_with = "duration_from_millis")]
    pub settle_delay: Duration,
    /// Bytes requested per device read.
    pub read_buffer_size: usize,
    /// Events buffered between a session and the supervisor.
    pub reading_channel_capacity: usize,
    /// Readings buffered per subscriber before it lags.
    pub broadcast_capacity: usize,
}

impl SupervisorConfig {
    /// Load from a JSON object. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SupervisorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the reconnect settle delay.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the device read size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the session event queue capacity.
    pub fn reading_channel_capacity(mut self, capacity: usize) -> Self {
        self.reading_channel_capacity = capacity;
        self
    }

    /// Set the subscriber broadcast capacity.
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Reject values the channels and read loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(ScaleError::Config("read_buffer_size must be non-zero".into()));
        }
        if self.reading_channel_capacity == 0 {
            return Err(ScaleError::Config(
                "reading_channel_capacity must be non-zero".into(),
            ));
        }
        if self.broadcast_capacity == 0 {
            return Err(ScaleError::Config("broadcast_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            reading_channel_capacity: DEFAULT_READING_CHANNEL_CAPACITY,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

fn duration_from_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

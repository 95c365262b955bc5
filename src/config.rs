//! Configuration for wirepack
//!
//! Centralized, process-wide tunables with sensible defaults.

use std::time::Duration;

use crate::error::{Result, WireError};

/// Main configuration for a scheduler instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Worker Pool Configuration
    // -------------------------------------------------------------------------
    /// Sleep between worker passes (milliseconds)
    pub tick_ms: u64,

    /// Max connections polled by a single worker thread
    pub bucket_capacity: usize,

    /// Max bytes inspected per connection per worker pass
    pub read_window: usize,

    // -------------------------------------------------------------------------
    // Sender Loop Configuration
    // -------------------------------------------------------------------------
    /// Sleep between sender passes (milliseconds)
    pub send_tick_ms: u64,

    /// Max messages drained per connection per sender pass.
    /// Workers decode at most twice this many per connection per pass.
    pub max_packets_per_tick: usize,

    // -------------------------------------------------------------------------
    // Request Configuration
    // -------------------------------------------------------------------------
    /// Expiry for pending requests. `None` keeps them until fulfilled.
    pub request_timeout_ms: Option<u64>,

    // -------------------------------------------------------------------------
    // Codec Configuration
    // -------------------------------------------------------------------------
    /// Compare all six null-sentinel bytes on decode instead of the
    /// three-byte prefix.
    pub strict_null_check: bool,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            bucket_capacity: 64,
            read_window: 64 * 1024, // 64 KB
            send_tick_ms: 10,
            max_packets_per_tick: 32,
            request_timeout_ms: None,
            strict_null_check: false,
            listen_addr: "127.0.0.1:7878".to_string(),
            max_connections: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn send_tick(&self) -> Duration {
        Duration::from_millis(self.send_tick_ms)
    }

    /// Per-connection cap on messages decoded in one worker pass
    pub fn decode_cap(&self) -> usize {
        self.max_packets_per_tick * 2
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 || self.send_tick_ms == 0 {
            return Err(WireError::Config("tick intervals must be non-zero".to_string()));
        }
        if self.bucket_capacity == 0 {
            return Err(WireError::Config("bucket capacity must be non-zero".to_string()));
        }
        if self.max_packets_per_tick == 0 {
            return Err(WireError::Config(
                "max packets per tick must be non-zero".to_string(),
            ));
        }
        if self.read_window == 0 {
            return Err(WireError::Config("read window must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the worker tick interval (in milliseconds)
    pub fn tick_ms(mut self, ms: u64) -> Self {
        self.config.tick_ms = ms;
        self
    }

    /// Set how many connections one worker polls
    pub fn bucket_capacity(mut self, count: usize) -> Self {
        self.config.bucket_capacity = count;
        self
    }

    /// Set the per-connection read window (in bytes)
    pub fn read_window(mut self, bytes: usize) -> Self {
        self.config.read_window = bytes;
        self
    }

    /// Set the sender tick interval (in milliseconds)
    pub fn send_tick_ms(mut self, ms: u64) -> Self {
        self.config.send_tick_ms = ms;
        self
    }

    /// Set the max messages drained per connection per sender tick
    pub fn max_packets_per_tick(mut self, count: usize) -> Self {
        self.config.max_packets_per_tick = count;
        self
    }

    /// Expire pending requests after the given number of milliseconds
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = Some(ms);
        self
    }

    /// Compare the full null sentinel on decode
    pub fn strict_null_check(mut self, strict: bool) -> Self {
        self.config.strict_null_check = strict;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//! Session tunables.
//!
//! Every timeout, limit and interval the session uses lives in
//! [`SessionOptions`]. Defaults match the device's documented behavior.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use madvr_client::SessionOptions;
//!
//! let options = SessionOptions::new()
//!     .with_idle_window(Duration::from_secs(5))
//!     .with_session_ceiling(3)
//!     .with_background_reserve(0);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_MAX_FRAME_LEN;
use crate::transport::{PoolConfig, TransportConfig};

// ============================================================================
// Constants
// ============================================================================

/// Default control port.
pub const DEFAULT_PORT: u16 = 44077;

/// The device closes sessions idle for longer than this.
pub const DEVICE_IDLE_CEILING: Duration = Duration::from_secs(60);

/// Smallest accepted frame limit.
const MIN_FRAME_LEN: usize = 64;

// ============================================================================
// SessionOptions
// ============================================================================

/// Tunables for one device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Control port.
    pub port: u16,

    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Time allowed for the `WELCOME` greeting.
    pub handshake_timeout: Duration,
    /// Time allowed for a complete command reply.
    pub reply_timeout: Duration,
    /// Time allowed for one frame write.
    pub write_timeout: Duration,

    /// Pooled connections close after this long unused.
    pub idle_window: Duration,
    /// Maximum simultaneous sessions the device accepts.
    pub session_ceiling: usize,
    /// Sessions kept free for background probes and polls.
    pub background_reserve: usize,
    /// Optional hard cap on pooled connections.
    pub max_pooled: Option<usize>,
    /// How long a command may wait for a pooled connection.
    pub acquire_wait: Duration,

    /// Silence on the notification connection counted as one missed read.
    pub read_timeout: Duration,
    /// Consecutive missed reads before the link is declared dead.
    pub max_silent_reads: u32,
    /// Keep-alive interval on the notification connection.
    pub heartbeat_interval: Option<Duration>,

    /// Run the background poller while open.
    pub background_tasks: bool,
    /// Interval between status refreshes while the device is on.
    pub poll_interval: Duration,
    /// Interval between reachability probes.
    pub probe_interval: Duration,
    /// How long power-on waits for the device to answer.
    pub power_on_window: Duration,
    /// Fetch device information right after opening.
    pub fetch_info_on_open: bool,

    /// Maximum accepted line length.
    pub max_frame_len: usize,
    /// Destination of Wake-on-LAN packets.
    pub wake_target: SocketAddr,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(2),
            reply_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            idle_window: Duration::from_secs(10),
            session_ceiling: 4,
            background_reserve: 1,
            max_pooled: None,
            acquire_wait: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            max_silent_reads: 6,
            heartbeat_interval: Some(Duration::from_secs(30)),
            background_tasks: true,
            poll_interval: Duration::from_secs(20),
            probe_interval: Duration::from_secs(10),
            power_on_window: Duration::from_secs(60),
            fetch_info_on_open: true,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            wake_target: SocketAddr::from(([255, 255, 255, 255], 9)),
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl SessionOptions {
    /// Creates options with default values.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SessionOptions {
    /// Sets the control port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the TCP connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the greeting timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the command reply timeout.
    #[inline]
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sets the frame write timeout.
    #[inline]
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the pool idle window.
    #[inline]
    #[must_use]
    pub fn with_idle_window(mut self, window: Duration) -> Self {
        self.idle_window = window;
        self
    }

    /// Sets the device session ceiling.
    #[inline]
    #[must_use]
    pub fn with_session_ceiling(mut self, ceiling: usize) -> Self {
        self.session_ceiling = ceiling;
        self
    }

    /// Sets the number of sessions kept for background work.
    #[inline]
    #[must_use]
    pub fn with_background_reserve(mut self, reserve: usize) -> Self {
        self.background_reserve = reserve;
        self
    }

    /// Sets a hard cap on pooled connections.
    #[inline]
    #[must_use]
    pub fn with_max_pooled(mut self, max: usize) -> Self {
        self.max_pooled = Some(max);
        self
    }

    /// Sets how long a command may wait for a pooled connection.
    #[inline]
    #[must_use]
    pub fn with_acquire_wait(mut self, wait: Duration) -> Self {
        self.acquire_wait = wait;
        self
    }

    /// Sets the notification read timeout.
    #[inline]
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets how many consecutive read timeouts end the notification link.
    #[inline]
    #[must_use]
    pub fn with_max_silent_reads(mut self, reads: u32) -> Self {
        self.max_silent_reads = reads;
        self
    }

    /// Sets or disables the heartbeat.
    #[inline]
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Enables or disables the background poller.
    #[inline]
    #[must_use]
    pub fn with_background_tasks(mut self, enabled: bool) -> Self {
        self.background_tasks = enabled;
        self
    }

    /// Sets the status refresh interval.
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the reachability probe interval.
    #[inline]
    #[must_use]
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Sets how long power-on waits for the device.
    #[inline]
    #[must_use]
    pub fn with_power_on_window(mut self, window: Duration) -> Self {
        self.power_on_window = window;
        self
    }

    /// Enables or disables the information fetch after opening.
    #[inline]
    #[must_use]
    pub fn with_fetch_info_on_open(mut self, enabled: bool) -> Self {
        self.fetch_info_on_open = enabled;
        self
    }

    /// Sets the maximum line length.
    #[inline]
    #[must_use]
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Sets the Wake-on-LAN destination.
    #[inline]
    #[must_use]
    pub fn with_wake_target(mut self, target: SocketAddr) -> Self {
        self.wake_target = target;
        self
    }
}

// ============================================================================
// Derived Settings
// ============================================================================

impl SessionOptions {
    /// Sessions available to the command pool: the ceiling minus the
    /// notification connection and the background reserve.
    #[inline]
    #[must_use]
    pub fn pool_share(&self) -> usize {
        self.session_ceiling
            .saturating_sub(1)
            .saturating_sub(self.background_reserve)
    }

    /// Returns the per-connection settings.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
            write_timeout: self.write_timeout,
            max_frame_len: self.max_frame_len,
        }
    }

    /// Returns the pool settings for the device at `addr`.
    #[must_use]
    pub fn pool_config(&self, addr: &str) -> PoolConfig {
        PoolConfig {
            addr: addr.to_string(),
            transport: self.transport_config(),
            idle_window: self.idle_window,
            max_open: self.pool_share(),
            max_pooled: self.max_pooled,
            acquire_wait: self.acquire_wait,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SessionOptions {
    /// Checks the options for consistency.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::config("port must not be 0"));
        }

        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("handshake_timeout", self.handshake_timeout),
            ("reply_timeout", self.reply_timeout),
            ("write_timeout", self.write_timeout),
            ("idle_window", self.idle_window),
            ("acquire_wait", self.acquire_wait),
            ("read_timeout", self.read_timeout),
            ("poll_interval", self.poll_interval),
            ("probe_interval", self.probe_interval),
            ("power_on_window", self.power_on_window),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }

        if self.idle_window >= DEVICE_IDLE_CEILING {
            return Err(Error::config(format!(
                "idle_window ({:?}) must stay below the device idle ceiling ({:?})",
                self.idle_window, DEVICE_IDLE_CEILING
            )));
        }

        if self.read_timeout >= DEVICE_IDLE_CEILING {
            return Err(Error::config(format!(
                "read_timeout ({:?}) must stay below the device idle ceiling ({:?})",
                self.read_timeout, DEVICE_IDLE_CEILING
            )));
        }

        if let Some(interval) = self.heartbeat_interval
            && (interval.is_zero() || interval >= DEVICE_IDLE_CEILING)
        {
            return Err(Error::config(format!(
                "heartbeat_interval ({interval:?}) must be between zero and {DEVICE_IDLE_CEILING:?}"
            )));
        }

        if self.max_silent_reads == 0 {
            return Err(Error::config("max_silent_reads must be at least 1"));
        }

        if self.pool_share() == 0 {
            return Err(Error::config(format!(
                "session_ceiling {} leaves no room for pooled connections \
                 (1 notification + {} background reserved)",
                self.session_ceiling, self.background_reserve
            )));
        }

        if self.max_pooled == Some(0) {
            return Err(Error::config("max_pooled must be at least 1"));
        }

        if self.max_frame_len < MIN_FRAME_LEN {
            return Err(Error::config(format!(
                "max_frame_len must be at least {MIN_FRAME_LEN}"
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

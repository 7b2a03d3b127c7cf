//! Configuration structures for endpoint behavior.

use std::time::Duration;

/// Default interval between outgoing keepalive packets.
///
/// Deliberately not a round number so that many connections opened at the
/// same moment do not keep probing in lockstep.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(10_730);

/// Default silence allowed from the peer before the connection is dropped.
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a message waits for its response.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for an [`RpcEndpoint`](crate::RpcEndpoint).
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Interval between keepalive packets sent to the peer.
    ///
    /// Also the cadence at which the receive watchdog is checked.
    pub keepalive_interval: Duration,

    /// Maximum time without a keepalive (or the handshake) from the peer
    /// before the endpoint closes itself.
    pub keepalive_timeout: Duration,

    /// Response timeout used when a send does not specify one.
    pub default_message_timeout: Duration,

    /// Outgoing queue depth that triggers a one-time build-up warning.
    ///
    /// The queue is never bounded; this only reports.
    pub queue_warning_threshold: usize,

    /// Upper bound on shutting down the write half in `wait_closed`.
    pub close_timeout: Duration,

    /// Never emit keepalive packets (test mode, used to provoke peer timeouts).
    pub suppress_keepalives: bool,

    /// Log lifecycle events at `info` instead of `debug`.
    pub debug_print: bool,

    /// Log every packet read or written at `info` instead of `trace`.
    pub debug_print_io: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            default_message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            queue_warning_threshold: 200,
            close_timeout: Duration::from_secs(30),
            suppress_keepalives: false,
            debug_print: false,
            debug_print_io: false,
        }
    }
}

impl EndpointConfig {
    /// Set keepalive interval and timeout.
    pub fn with_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_timeout = timeout;
        self
    }

    /// Set the response timeout used by sends without an explicit one.
    pub fn with_default_message_timeout(mut self, timeout: Duration) -> Self {
        self.default_message_timeout = timeout;
        self
    }

    /// Stop emitting keepalive packets.
    pub fn with_suppressed_keepalives(mut self) -> Self {
        self.suppress_keepalives = true;
        self
    }

    /// Enable verbose lifecycle and I/O logging.
    pub fn with_debug_print(mut self, io: bool) -> Self {
        self.debug_print = true;
        self.debug_print_io = io;
        self
    }
}

/// Per-call options for [`RpcEndpoint::send_message_with`](crate::RpcEndpoint::send_message_with).
#[derive(Clone, Copy, Debug)]
pub struct SendOptions {
    /// Response timeout; `None` uses [`EndpointConfig::default_message_timeout`].
    pub timeout: Option<Duration>,

    /// Close the whole endpoint if this message fails.
    ///
    /// A failed message is treated as evidence the channel is unhealthy
    /// unless the caller opts out.
    pub close_on_error: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            close_on_error: true,
        }
    }
}

impl SendOptions {
    /// Override the response timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keep the endpoint open if this message fails.
    pub fn keep_open_on_error(mut self) -> Self {
        self.close_on_error = false;
        self
    }
}

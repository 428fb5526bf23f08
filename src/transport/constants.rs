//! Constants for the transport layer (timeouts, retry defaults).

/// Default TCP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-attempt request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 5.0;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff factor in seconds: waits are `factor * 2^n`.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 0.3;

/// Status codes retried by default.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [403, 408, 500, 502, 504];

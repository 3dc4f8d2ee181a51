//! Constants for the download module (timeouts, worker sizing, read increments).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default upper bound on concurrent range workers per transfer.
pub const DEFAULT_MAX_WORKERS: usize = 30;

/// Default minimum number of bytes assigned to one worker (1 MiB).
pub const DEFAULT_MIN_BYTES_PER_WORKER: u64 = 1024 * 1024;

/// Default size of one delivered chunk (1 MiB).
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024 * 1024;

/// Capacity of the fan-in channel between workers and the consumer.
pub const FAN_IN_CAPACITY: usize = 64;

/// How long `close()` waits for in-flight tasks before dropping them.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

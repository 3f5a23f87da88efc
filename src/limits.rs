//! Compile-time bounds shared by the connection registry, the request
//! parser and the step actions.

/// Maximum number of simultaneously tracked peer connections per worker.
pub const MAXFDS: usize = 128;

/// A handful of extra slots above `MAXFDS` for the listening socket and the
/// low file descriptors (stdin/stdout/stderr) a process always carries, so
/// the dense fd→connection table can be indexed directly by raw fd.
pub const RESERVED_FDS: usize = 8;

/// Maximum accumulated size of a request (request line + headers).
pub const MAX_REQ_SIZE: usize = 4096;

/// Maximum size of a decoded request target.
pub const MAX_TARGET_SIZE: usize = 4096;

/// Seconds a connection may sit idle before the sweep tears it down.
pub const KEEP_ALIVE_TIMEOUT_SECS: u64 = 5;

/// Payload size at or above which GET responses switch from an inlined body
/// to a SENDFILE step.
pub const SENDFILE_MIN_SIZE: u64 = 8 * 1024;

/// Maximum bytes transferred by a single `sendfile(2)` call.
pub const SENDFILE_CHUNK_SIZE: usize = 512 * 1024;

/// Maximum worker threads accepted via `--threads`.
pub const MAX_THREADS: usize = 32;

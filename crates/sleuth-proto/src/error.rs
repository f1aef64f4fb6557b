//! Error types shared across sleuth crates.

/// Top-level error for the supervisor.
///
/// Component crates define narrower error enums and convert into this one
/// at their public boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The durable job store failed or returned malformed data.
    #[error("store error: {0}")]
    Store(String),

    /// A value could not be converted to the store's representation.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The generation backend could not produce a reply.
    #[error("backend error: {0}")]
    Backend(String),

    /// A webhook notification could not be delivered.
    #[error("notification error: {0}")]
    Notify(String),

    /// Configuration was missing or invalid.
    #[error("config error: {0}")]
    Config(String),

    /// The runtime host is not running.
    #[error("supervisor is not running")]
    NotRunning,

    /// A bounded wait expired.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// Work submitted to the runtime host was dropped before completing.
    #[error("task dropped: {0}")]
    Join(String),
}

/// Result alias using the shared [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

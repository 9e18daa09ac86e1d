//! Error types for the key-lifecycle engine.

use thiserror::Error;

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, SrtpError>;

/// Failures reported by the engine.
///
/// The first five variants are the classic taxonomy every configuration and
/// key-management call maps onto. The remaining ones are only produced by
/// lifecycle checks and packet processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SrtpError {
    /// A required session, stream or context handle is missing.
    #[error("missing {0}")]
    NullPtr(&'static str),

    /// Invalid size, length, enum value or index.
    #[error("bad parameter: {0}")]
    BadParam(String),

    /// Unknown MKI, remote source or remote party.
    #[error("not found: {0}")]
    NotFound(String),

    /// A fixed-size pool or lookup table is exhausted.
    #[error("out of resources: {0} exhausted")]
    OutOfResources(&'static str),

    /// Unclassified failure, e.g. an address that does not parse.
    #[error("{0}")]
    Unknown(String),

    /// Configuration attempted after `init`, or use after `close`.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The stream has no active master key at the requested index.
    #[error("no active key for {stream} at index {index}")]
    NoKey { stream: String, index: u64 },

    /// The index was already seen or is older than the replay window.
    #[error("replayed packet (index {0})")]
    Replay(u64),

    /// Authentication tag mismatch.
    #[error("authentication failed")]
    AuthFailed,
}

impl SrtpError {
    pub(crate) fn bad_param(msg: impl Into<String>) -> Self {
        SrtpError::BadParam(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        SrtpError::NotFound(msg.into())
    }
}

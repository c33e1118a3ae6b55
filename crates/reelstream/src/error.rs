//! Crate error types.
//!
//! Two layers live here:
//! - [`FetchError`] is the classified outcome of a single resource fetch. The
//!   classification decides what the session does next (fail, skip, retry).
//! - [`EngineError`] is the unified error type surfaced by the public API.
//!
//! Implementation note: transport details stay string-based so the public API
//! does not expose a specific HTTP client error type.

use std::io;

use crate::model::SessionId;

/// Result type used by this crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure classes that terminate a session.
///
/// These map one-to-one onto the `Failed` session state and are the only
/// failures reported to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum FatalKind {
    /// The origin rejected our credentials (HTTP 401/403).
    #[error("authorization expired")]
    AuthExpired,
    /// The stream is gone upstream (HTTP 410).
    #[error("stream ended upstream")]
    StreamEnded,
    /// The manifest could not be fetched at all.
    #[error("manifest unavailable")]
    ManifestUnavailable,
    /// The manifest was fetched but is not a playlist we understand.
    #[error("manifest malformed")]
    ManifestMalformed,
    /// The consumer sink went away mid-stream.
    #[error("sink closed")]
    SinkClosed,
}

/// Classified outcome of a fetch through the pipeline.
///
/// | class       | session reaction                              |
/// |-------------|-----------------------------------------------|
/// | `Fatal`     | stop the session, surface once to the owner   |
/// | `Skip`      | advance past the resource (rotated segment)   |
/// | `Transient` | wait and re-attempt the same resource         |
/// | `Cancelled` | drop the result; a seek or teardown raced     |
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Non-recoverable: 401/403 or 410. Never retried.
    #[error("{kind}: HTTP {status} for {url}")]
    Fatal {
        /// What made this fatal.
        kind: FatalKind,
        /// HTTP status that triggered the classification.
        status: u16,
        /// URL that failed.
        url: String,
    },

    /// The resource rotated away (HTTP 404). Never retried.
    #[error("resource gone: HTTP 404 for {url}")]
    Skip {
        /// URL that failed.
        url: String,
    },

    /// Network failure, timeout or 5xx after all attempts were exhausted.
    #[error("transient failure after {attempts} attempts for {url}: {reason}")]
    Transient {
        /// How many attempts were made.
        attempts: u32,
        /// URL that failed.
        url: String,
        /// Human-readable cause of the last attempt.
        reason: String,
    },

    /// The request was aborted via its token.
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// The fatal class carried by this error, if any.
    pub fn fatal_kind(&self) -> Option<FatalKind> {
        match self {
            FetchError::Fatal { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True when the session should advance past the resource.
    pub fn is_skip(&self) -> bool {
        matches!(self, FetchError::Skip { .. })
    }
}

/// Unified error type for the `reelstream` crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The text is not a playlist at all.
    #[error("invalid playlist: {0}")]
    Parse(String),

    /// A classified fetch failure.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// No session registered under this id.
    #[error("unknown session: {0}")]
    SessionNotFound(SessionId),

    /// The session exists but its command channel is gone (task exited).
    #[error("session {0} is no longer running")]
    SessionStopped(SessionId),

    /// No persisted record exists for this session id.
    #[error("no persisted state for session {0}")]
    NoPersistedState(SessionId),

    /// Persistence is disabled (no state directory configured).
    #[error("session persistence is not configured")]
    PersistenceDisabled,

    /// The given URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// I/O error, mostly from the persisted-state store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Persisted state could not be decoded.
    #[error("corrupt persisted state: {0}")]
    CorruptState(#[from] serde_json::Error),
}

impl EngineError {
    /// Convenience helper for parse errors.
    pub fn parse(msg: impl Into<String>) -> Self {
        EngineError::Parse(msg.into())
    }

    /// URL parse error helper, keeping the offending input in the message.
    pub fn invalid_url(input: &str, e: url::ParseError) -> Self {
        EngineError::InvalidUrl(format!("{input}: {e}"))
    }
}

//! Error types for llmtap.
//!
//! Everything the library can fail with surfaces through [`TrackError`].
//! Fire-and-forget reporting never returns these to the caller; they are
//! reduced to a `tracing` warning at the call site instead.

/// Unified error type for the tracking library.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    // -- Configuration -------------------------------------------------------
    /// No API key in the config file nor in the configured environment variable.
    #[error("missing api key: set `api_key` in the config file or export {env_var}")]
    MissingApiKey { env_var: String },

    /// The config file could not be located, read, parsed or written.
    #[error("config error: {reason}")]
    Config { reason: String },

    // -- Transport -----------------------------------------------------------
    /// The request never produced an HTTP response.
    #[error("request to {path} failed: {reason}")]
    Network { path: String, reason: String },

    /// The backend answered with a non-success status.
    #[error("{context}: {message}")]
    Backend {
        context: String,
        status: u16,
        message: String,
    },

    // -- Caller input --------------------------------------------------------
    /// An argument was rejected before any I/O happened.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -- Decoding ------------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A chunk source produced unreadable data.
    #[error("stream error: {0}")]
    Stream(String),

    // -- Dispatch ------------------------------------------------------------
    /// The worker running an offloaded call panicked, was cancelled, or
    /// could not be started.
    #[error("background dispatch failed: {0}")]
    Dispatch(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrackError>;

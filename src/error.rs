//! Error types for the retro-shell library.

use thiserror::Error;

/// Errors that can occur inside the storage, network and configuration layers.
///
/// The worker and the install gate absorb these at their boundaries; callers of
/// `on_fetch` or `request_install` never see them.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error while reading or writing cache files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A cache entry or control message could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration parsed but holds a value that cannot be used.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A request URL could not be parsed or resolved.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Cache storage operation failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// The network could not be reached (offline, DNS, refused connection).
    #[error("Network unavailable: {0}")]
    Network(String),

    /// A platform API (install prompt, display-mode query) failed.
    #[error("Platform error: {0}")]
    Platform(String),
}

/// A specialized `Result` type for retro-shell operations.
pub type Result<T> = std::result::Result<T, Error>;

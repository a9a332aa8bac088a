//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing a page
///
/// The outer fallback timeout is deliberately absent here: a request that
/// never reports readiness degrades to a best-effort capture instead of
/// failing.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to create or operate the off-screen surface
    #[error("Surface error: {0}")]
    Surface(String),

    /// The surface failed to load the URL
    #[error("Page load failed: [{code}] {description}")]
    LoadFailure { code: i32, description: String },

    /// The rendering process terminated unexpectedly
    #[error("Render process crashed")]
    RenderCrash,

    /// Invalid capture request
    #[error("Invalid capture request: {0}")]
    Config(String),

    /// Failed to inject a script into the page
    #[error("Script injection failed: {0}")]
    Script(String),

    /// Pixel capture or encoding failed inside the engine
    #[error("Capture failed: {0}")]
    Capture(String),

    /// The surface event stream ended before the request finished
    #[error("Surface event stream closed unexpectedly")]
    SurfaceClosed,

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Cdp(err.to_string())
    }
}

//! The renderable-surface seam
//!
//! A [`Surface`] is the hidden window-like object an external rendering
//! engine uses to load and paint a page off-screen. The orchestrator never
//! talks to an engine directly; it drives whatever implements these traits.
//! Backends deliver lifecycle events and page signals over an unbounded
//! channel so the orchestrator can multiplex them with its timers.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::{script, CropRect};

/// Configuration for creating a hidden surface.
///
/// The defaults describe an off-screen window: frameless, pinned to the
/// top-left corner, allowed to grow past physical screen bounds, absent
/// from any task or window list, and invisible unless the debug toggle
/// forces it on.
#[derive(Debug, Clone)]
pub struct SurfaceOptions {
    /// Initial width in pixels
    pub width: u32,
    /// Initial height in pixels
    pub height: u32,
    /// Whether the surface is visible (debug aid)
    pub show: bool,
    /// No default UI chrome
    pub frameless: bool,
    /// Fixed window position
    pub position: (i32, i32),
    /// Dimensions may exceed physical screen bounds
    pub allow_oversized: bool,
    /// Keep the surface out of task/window lists
    pub skip_taskbar: bool,
    /// Web security sandboxing (on unless the request disables it)
    pub web_security: bool,
    /// Preload script establishing the page-to-host signal primitive
    pub preload: String,
}

impl SurfaceOptions {
    /// Options for a hidden capture surface of the given size.
    pub fn hidden(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            show: false,
            frameless: true,
            position: (0, 0),
            allow_oversized: true,
            skip_taskbar: true,
            web_security: true,
            preload: script::PRELOAD_SOURCE.to_string(),
        }
    }
}

/// Lifecycle events and page signals emitted by a surface.
#[derive(Debug, Clone)]
pub enum SurfaceEvent {
    /// The page settled (may fire repeatedly while subresources load)
    StopLoading,
    /// The DOM is ready for CSS injection
    DomReady,
    /// The load failed with an engine-specific code
    FailLoad { code: i32, description: String },
    /// The rendering process died
    Crashed,
    /// The document was redirected; `main_frame` is false for sub-frames
    Redirect { url: String, main_frame: bool },
    /// A message from the page-side signal script
    Signal { channel: String, payload: Value },
}

/// Requested output encoding, resolved from the capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Lossless raster with palette
    Png,
    /// Lossy-compressed, quality 1-100
    Jpeg { quality: u8 },
}

/// A captured frame: encoded bytes plus pixel dimensions.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Stream of events from a single surface, delivered in emission order.
pub type SurfaceEvents = mpsc::UnboundedReceiver<SurfaceEvent>;

/// A hidden rendering window owned by exactly one capture attempt.
#[async_trait]
pub trait Surface: Send {
    /// Unique identifier, used to namespace this surface's signal channels
    fn id(&self) -> u64;

    /// Begin loading a URL
    async fn load_url(&mut self, url: &str) -> Result<()>;

    /// Evaluate script source in the rendered page
    async fn inject_script(&mut self, source: &str) -> Result<()>;

    /// Insert a stylesheet into the rendered page
    async fn insert_css(&mut self, css: &str) -> Result<()>;

    /// Resize the surface
    async fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Capture the page as encoded image bytes, optionally restricted to a
    /// crop rectangle
    async fn capture_page(
        &mut self,
        crop: Option<CropRect>,
        encoding: Encoding,
    ) -> Result<CapturedFrame>;

    /// Tear the surface down; further calls are undefined
    fn destroy(&mut self);
}

/// Factory for surfaces, supplied by the rendering-engine backend.
///
/// Creation is async because backends may need to start an engine process
/// first; the orchestrator must not stall its executor thread on that.
#[async_trait]
pub trait SurfaceHost: Sync {
    /// Create a hidden surface and its event stream.
    async fn create_surface(
        &self,
        options: &SurfaceOptions,
    ) -> Result<(Box<dyn Surface>, SurfaceEvents)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_options_default_to_off_screen() {
        let options = SurfaceOptions::hidden(1024, 768);
        assert!(!options.show);
        assert!(options.frameless);
        assert!(options.allow_oversized);
        assert!(options.skip_taskbar);
        assert!(options.web_security);
        assert_eq!(options.position, (0, 0));
        assert!(!options.preload.is_empty());
    }
}

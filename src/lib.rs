//! pagesnap
//!
//! Render a URL in an off-screen browser surface and capture a screenshot
//! once loading has settled.
//!
//! The crate owns the load-completion detection and capture-timing logic:
//! deciding when a page is "done enough" to screenshot, debouncing rapid
//! load events, negotiating resize-to-content, and restarting on main-frame
//! redirects. Pixel capture and encoding are delegated to an external
//! rendering engine behind the [`surface::Surface`] traits; a
//! `headless_chrome` backend ships behind the `cdp` feature (default).
//!
//! # Example
//!
//! ```no_run
//! use pagesnap::{CaptureRequest, ImageFormat};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut request = CaptureRequest::new("https://example.com");
//! request.format = ImageFormat::Jpeg;
//! request.quality = Some(90);
//!
//! let (result, mut release) = pagesnap::capture(request).await?;
//! std::fs::write("example.jpg", &result.data)?;
//! release.release();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod surface;

pub mod signals;

pub mod script;

pub mod orchestrator;
pub use orchestrator::{Orchestrator, ReleaseHandle};

// CDP backend (feature-gated)
#[cfg(feature = "cdp")]
pub mod cdp;

use crate::surface::Encoding;

/// Outer fallback timeout: ceiling for the whole request (not configurable).
pub const OUTER_TIMEOUT_MS: u64 = 25_000;

/// Default quiet-period debounce between stop-loading and capture.
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 2_000;

/// Default JPEG quality when the request does not specify one.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Grace delay before a released surface is actually destroyed.
pub const DESTROY_GRACE_MS: u64 = 100;

/// Engine code for a user/navigation-initiated abort; expected during
/// redirect-driven reloads and never reported to the caller.
pub const BENIGN_ABORT_CODE: i32 = -3;

/// Environment variable forcing the normally-hidden surface visible.
pub const SHOW_ENV_VAR: &str = "PAGESNAP_SHOW";

/// Whether the debug toggle forces surfaces visible. Read once per request.
pub fn debug_visibility() -> bool {
    std::env::var(SHOW_ENV_VAR).map(|v| v == "1").unwrap_or(false)
}

/// Requested output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    /// Lossless raster with palette
    #[default]
    Png,
    /// Lossy-compressed with a quality level
    Jpeg,
}

/// Rectangle restricting the capture region, in page pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Immutable input for one capture. Supplied once, read-only for the
/// request's lifetime.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Page to load
    pub url: String,
    /// Minimum output width in pixels
    pub width: u32,
    /// Minimum output height in pixels
    pub height: u32,
    /// CSS injected when the DOM is ready
    pub css: Option<String>,
    /// Restrict capture to this rectangle
    pub crop: Option<CropRect>,
    /// Output encoding
    pub format: ImageFormat,
    /// JPEG quality 1-100 (default 80); ignored for PNG
    pub quality: Option<u8>,
    /// Negotiate surface size to page content before capturing
    pub page: bool,
    /// Custom DOM event marking readiness, overriding paint-based readiness
    pub load_event: Option<String>,
    /// Milliseconds to wait after readiness before capturing
    pub delay_ms: u64,
    /// Quiet-period debounce length in milliseconds
    pub timeout_ms: u64,
    /// Vertical scroll offset applied before paint
    pub page_offset: Option<i64>,
    /// Web security sandboxing in the surface
    pub security: bool,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            url: String::new(),
            width: 1280,
            height: 720,
            css: None,
            crop: None,
            format: ImageFormat::Png,
            quality: None,
            page: false,
            load_event: None,
            delay_ms: 0,
            timeout_ms: DEFAULT_QUIET_PERIOD_MS,
            page_offset: None,
            security: true,
        }
    }
}

impl CaptureRequest {
    /// Request for the given URL with default options.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// The effective output encoding, applying the JPEG quality default.
    pub fn encoding(&self) -> Encoding {
        match self.format {
            ImageFormat::Png => Encoding::Png,
            ImageFormat::Jpeg => Encoding::Jpeg {
                quality: self.quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
        }
    }

    /// Validate the request before starting a capture.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Config("url must not be empty".into()));
        }
        if let Some(quality) = self.quality {
            if !(1..=100).contains(&quality) {
                return Err(Error::Config(format!(
                    "quality must be within 1-100, got {quality}"
                )));
            }
        }
        Ok(())
    }
}

/// Pixel dimensions of a capture plus the page-reported device pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
    pub device_pixel_ratio: f64,
}

/// Output of a successful capture: raw image bytes in the requested
/// encoding plus dimensions. Produced exactly once per request.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub data: Vec<u8>,
    pub size: Size,
}

/// Capture a screenshot with the default CDP backend.
#[cfg(feature = "cdp")]
pub async fn capture(request: CaptureRequest) -> Result<(CaptureResult, ReleaseHandle)> {
    Orchestrator::new(cdp::CdpHost::new()).capture(request).await
}

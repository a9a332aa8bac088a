//! Capture orchestrator
//!
//! Drives a request from URL load to image bytes, exactly once. The per
//! attempt state machine multiplexes surface events with two timers: an
//! absolute outer timeout and a renewable quiet-period debounce restarted
//! on every stop-loading event. A single boolean guard keeps the three
//! trigger paths (debounce, zero-iframe shortcut, outer timeout) from
//! firing capture more than once.
//!
//! A main-frame redirect restarts the whole request: the current surface is
//! torn down and the loop continues with the redirect target, so a chain of
//! N redirects creates N sequential surfaces with bounded stack depth.

use std::fmt;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};

use crate::error::{Error, Result};
use crate::signals::{ChannelNames, SignalRegistry};
use crate::surface::{Surface, SurfaceEvent, SurfaceEvents, SurfaceHost, SurfaceOptions};
use crate::{
    debug_visibility, script, CaptureRequest, CaptureResult, Size, BENIGN_ABORT_CODE,
    DESTROY_GRACE_MS, OUTER_TIMEOUT_MS,
};

/// Orchestrates captures over surfaces created by `H`.
pub struct Orchestrator<H: SurfaceHost> {
    host: H,
}

impl<H: SurfaceHost> Orchestrator<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }

    /// Capture a screenshot of the request's URL.
    ///
    /// Resolves once with either image bytes plus a [`ReleaseHandle`], or an
    /// error (non-benign load failure or a render crash). The absence of a
    /// ready signal is not an error: after the outer timeout the capture
    /// proceeds best-effort.
    pub async fn capture(&self, request: CaptureRequest) -> Result<(CaptureResult, ReleaseHandle)> {
        request.validate()?;

        let mut url = request.url.clone();
        loop {
            let attempt = Attempt::start(&self.host, &request, &url).await?;
            match attempt.run().await? {
                Verdict::Captured(result, release) => return Ok((result, release)),
                Verdict::Redirected(next) => {
                    debug!("{url} ] restarting at redirect target {next}");
                    url = next;
                }
            }
        }
    }
}

/// Cleanup token for a successful capture.
///
/// Releasing destroys the surface after a short grace delay so in-flight
/// engine callbacks can settle first. Releasing twice is a no-op; dropping
/// an unreleased handle releases.
pub struct ReleaseHandle {
    surface: Option<Box<dyn Surface>>,
}

impl ReleaseHandle {
    fn new(surface: Box<dyn Surface>) -> Self {
        Self {
            surface: Some(surface),
        }
    }

    pub fn release(&mut self) {
        if let Some(surface) = self.surface.take() {
            destroy_later(surface);
        }
    }
}

impl Drop for ReleaseHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("released", &self.surface.is_none())
            .finish()
    }
}

fn destroy_later(mut surface: Box<dyn Surface>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                time::sleep(Duration::from_millis(DESTROY_GRACE_MS)).await;
                surface.destroy();
            });
        }
        // No runtime left to defer on; tear down inline.
        Err(_) => surface.destroy(),
    }
}

enum Verdict {
    Captured(CaptureResult, ReleaseHandle),
    Redirected(String),
}

enum Flow {
    Captured(CaptureResult),
    Redirected(String),
}

/// One surface lifecycle: load, settle, trigger, capture.
struct Attempt<'a> {
    request: &'a CaptureRequest,
    url: String,
    surface: Box<dyn Surface>,
    events: SurfaceEvents,
    signals: SignalRegistry,
    channels: ChannelNames,
    triggered: bool,
    asked_frames: bool,
    ready_rx: Option<oneshot::Receiver<Value>>,
    size_rx: Option<oneshot::Receiver<Value>>,
    frames_rx: Option<oneshot::Receiver<Value>>,
}

impl<'a> Attempt<'a> {
    async fn start<H: SurfaceHost>(
        host: &H,
        request: &'a CaptureRequest,
        url: &str,
    ) -> Result<Self> {
        let mut options = SurfaceOptions::hidden(request.width, request.height);
        options.web_security = request.security;
        if debug_visibility() {
            options.show = true;
        }

        let (surface, events) = host.create_surface(&options).await?;
        let channels = ChannelNames::for_surface(surface.id());

        Ok(Self {
            request,
            url: url.to_string(),
            surface,
            events,
            signals: SignalRegistry::new(),
            channels,
            triggered: false,
            asked_frames: false,
            ready_rx: None,
            size_rx: None,
            frames_rx: None,
        })
    }

    async fn run(mut self) -> Result<Verdict> {
        match self.drive().await {
            Ok(Flow::Captured(result)) => {
                self.signals.clear();
                Ok(Verdict::Captured(result, ReleaseHandle::new(self.surface)))
            }
            Ok(Flow::Redirected(next)) => {
                // Tear down synchronously: the next attempt must be the only
                // live surface before it starts loading.
                self.signals.clear();
                self.surface.destroy();
                Ok(Verdict::Redirected(next))
            }
            Err(err) => {
                self.signals.clear();
                destroy_later(self.surface);
                Err(err)
            }
        }
    }

    async fn drive(&mut self) -> Result<Flow> {
        match self.surface.load_url(&self.url).await {
            Ok(()) => {}
            // Engines may report a navigation abort as a load error rather
            // than an event; the same suppression rule applies, and the
            // outer timeout resolves the request if nothing else follows.
            Err(Error::LoadFailure { code, .. }) if code == BENIGN_ABORT_CODE => {
                debug!("{} ] ignoring aborted load", self.url);
            }
            Err(err) => return Err(err),
        }

        let outer = time::sleep(Duration::from_millis(OUTER_TIMEOUT_MS));
        tokio::pin!(outer);

        let quiet = time::sleep(Duration::ZERO);
        tokio::pin!(quiet);
        let mut quiet_armed = false;

        loop {
            tokio::select! {
                _ = &mut outer => {
                    if !self.triggered {
                        // The page never settled; trigger now and give the
                        // ready signal one quiet period to arrive.
                        debug!("{} ] timeout finished, triggering capture", self.url);
                        self.trigger_capture().await?;
                        quiet_armed = false;
                        outer.as_mut().reset(
                            Instant::now() + Duration::from_millis(self.request.timeout_ms),
                        );
                    } else {
                        // Readiness never arrived; degrade to a best-effort
                        // capture instead of hanging.
                        debug!("{} ] no ready signal, capturing best-effort", self.url);
                        return self.finish(&Value::Null).await;
                    }
                }

                _ = &mut quiet, if quiet_armed => {
                    quiet_armed = false;
                    if !self.triggered {
                        debug!("{} ] quiet period elapsed", self.url);
                        self.trigger_capture().await?;
                    }
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        return Err(Error::SurfaceClosed);
                    };
                    match event {
                        SurfaceEvent::StopLoading => {
                            debug!("{} ] stop-loading", self.url);
                            quiet.as_mut().reset(
                                Instant::now() + Duration::from_millis(self.request.timeout_ms),
                            );
                            quiet_armed = true;

                            // A single-frame page has nothing further to
                            // settle; ask once and skip the debounce.
                            if !self.asked_frames {
                                self.asked_frames = true;
                                self.frames_rx = Some(self.signals.subscribe(&self.channels.frames));
                                self.surface
                                    .inject_script(&script::frame_count_probe(&self.channels.frames))
                                    .await?;
                            }
                        }
                        SurfaceEvent::DomReady => {
                            if let Some(css) = &self.request.css {
                                self.surface.insert_css(css).await?;
                            }
                        }
                        SurfaceEvent::FailLoad { code, description } => {
                            if code == BENIGN_ABORT_CODE {
                                // Expected during redirect-driven reloads.
                                debug!("{} ] ignoring aborted load", self.url);
                            } else {
                                return Err(Error::LoadFailure { code, description });
                            }
                        }
                        SurfaceEvent::Crashed => {
                            return Err(Error::RenderCrash);
                        }
                        SurfaceEvent::Redirect { url, main_frame } => {
                            if main_frame {
                                debug!("{} ] main-frame redirect to {url}", self.url);
                                let target = self.resolve_redirect(&url);
                                return Ok(Flow::Redirected(target));
                            }
                        }
                        SurfaceEvent::Signal { channel, payload } => {
                            if !self.signals.dispatch(&channel, payload) {
                                debug!("{} ] unclaimed signal on {channel}", self.url);
                            }
                        }
                    }
                }

                count = next_signal(&mut self.frames_rx) => {
                    self.frames_rx = None;
                    if let Some(count) = count {
                        let frames = count.as_u64().unwrap_or(u64::MAX);
                        debug!("{} ] frame count {frames}", self.url);
                        if frames == 0 && !self.triggered {
                            self.trigger_capture().await?;
                            quiet_armed = false;
                        }
                    }
                }

                report = next_signal(&mut self.size_rx) => {
                    self.size_rx = None;
                    if let Some(report) = report {
                        self.apply_size_report(&report).await?;
                    }
                }

                meta = next_signal(&mut self.ready_rx) => {
                    self.ready_rx = None;
                    let meta = meta.unwrap_or(Value::Null);
                    debug!("{} ] ready signal", self.url);
                    return self.finish(&meta).await;
                }
            }
        }
    }

    /// Inject the signal script and arm the ready subscription. Guarded so
    /// concurrent trigger paths execute this at most once.
    async fn trigger_capture(&mut self) -> Result<()> {
        if self.triggered {
            return Ok(());
        }
        self.triggered = true;
        debug!("{} ] making screenshot", self.url);

        let source = script::signal_script(
            &self.channels,
            self.request.page_offset.unwrap_or(0),
            self.request.load_event.as_deref(),
        );
        self.surface.inject_script(&source).await?;

        let ready_channel = if self.request.load_event.is_some() {
            &self.channels.custom_loaded
        } else {
            &self.channels.loaded
        };
        self.ready_rx = Some(self.signals.subscribe(ready_channel));

        if self.request.page {
            // Size negotiation must complete before paint timing begins.
            self.size_rx = Some(self.signals.subscribe(&self.channels.size));
            self.surface.inject_script(script::INVOKE_SIZE).await
        } else {
            self.surface.inject_script(script::INVOKE_LOADED).await
        }
    }

    async fn apply_size_report(&mut self, report: &Value) -> Result<()> {
        let reported_width = report.get("width").and_then(Value::as_u64).unwrap_or(0) as u32;
        let reported_height = report.get("height").and_then(Value::as_u64).unwrap_or(0) as u32;
        let width = self.request.width.max(reported_width);
        let height = self.request.height.max(reported_height);
        debug!(
            "{} ] size report {reported_width}x{reported_height}, resizing to {width}x{height}",
            self.url
        );
        self.surface.resize(width, height).await?;
        self.surface.inject_script(script::INVOKE_LOADED).await
    }

    async fn finish(&mut self, meta: &Value) -> Result<Flow> {
        if self.request.delay_ms > 0 {
            time::sleep(Duration::from_millis(self.request.delay_ms)).await;
        }

        let frame = self
            .surface
            .capture_page(self.request.crop, self.request.encoding())
            .await?;
        debug!("{} ] captured {} bytes", self.url, frame.data.len());

        let device_pixel_ratio = meta
            .get("devicePixelRatio")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);

        Ok(Flow::Captured(CaptureResult {
            data: frame.data,
            size: Size {
                width: frame.width,
                height: frame.height,
                device_pixel_ratio,
            },
        }))
    }

    fn resolve_redirect(&self, target: &str) -> String {
        match url::Url::parse(&self.url).and_then(|base| base.join(target)) {
            Ok(resolved) => resolved.to_string(),
            Err(err) => {
                warn!("{} ] could not resolve redirect target {target}: {err}", self.url);
                target.to_string()
            }
        }
    }
}

async fn next_signal(slot: &mut Option<oneshot::Receiver<Value>>) -> Option<Value> {
    match slot.as_mut() {
        Some(rx) => rx.await.ok(),
        None => std::future::pending().await,
    }
}

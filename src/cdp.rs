//! Chrome DevTools Protocol surface backend
//!
//! A dedicated worker thread owns the synchronous browser handle and
//! executes commands sent from async tasks, so the orchestrator gets an
//! async interface without the engine being `Send` across threads. Page
//! signals reach the host through an exposed binding (`__pagesnap_post`)
//! and are forwarded into the surface event stream.
//!
//! Lifecycle mapping is best-effort: navigation completion is reported as
//! `StopLoading` (preceded by `DomReady`), navigation errors as `FailLoad`.
//! Chrome follows redirects internally, so this backend never emits
//! `Redirect` events.

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions, Tab};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::surface::{
    CapturedFrame, Encoding, Surface, SurfaceEvent, SurfaceEvents, SurfaceHost, SurfaceOptions,
};
use crate::CropRect;

enum Command {
    Load(String, oneshot::Sender<Result<()>>),
    Inject(String, oneshot::Sender<Result<()>>),
    InsertCss(String, oneshot::Sender<Result<()>>),
    Resize(u32, u32, oneshot::Sender<Result<()>>),
    Capture(
        Option<CropRect>,
        Encoding,
        oneshot::Sender<Result<CapturedFrame>>,
    ),
    Destroy,
}

/// Payload shape posted by the page through `__pagesnap_post`.
#[derive(Deserialize)]
struct PostedSignal {
    channel: String,
    payload: Value,
}

/// Surface host launching one headless Chrome per surface.
#[derive(Default)]
pub struct CdpHost {
    counter: AtomicU64,
}

impl CdpHost {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SurfaceHost for CdpHost {
    async fn create_surface(
        &self,
        options: &SurfaceOptions,
    ) -> Result<(Box<dyn Surface>, SurfaceEvents)> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (init_tx, init_rx) = oneshot::channel();

        let opts = options.clone();
        thread::spawn(move || worker(opts, cmd_rx, init_tx, event_tx));

        // Browser launch takes a while; await the handshake instead of
        // blocking the executor thread on it.
        init_rx
            .await
            .map_err(|_| Error::Cdp("surface worker exited during startup".into()))??;

        Ok((Box::new(CdpSurface { id, cmd_tx }), event_rx))
    }
}

struct CdpSurface {
    id: u64,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl CdpSurface {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| Error::Cdp("surface worker is gone".into()))?;
        rx.await
            .map_err(|_| Error::Cdp("surface worker dropped the reply".into()))?
    }
}

#[async_trait]
impl Surface for CdpSurface {
    fn id(&self) -> u64 {
        self.id
    }

    async fn load_url(&mut self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.request(|tx| Command::Load(url, tx)).await
    }

    async fn inject_script(&mut self, source: &str) -> Result<()> {
        let source = source.to_string();
        self.request(|tx| Command::Inject(source, tx)).await
    }

    async fn insert_css(&mut self, css: &str) -> Result<()> {
        let css = css.to_string();
        self.request(|tx| Command::InsertCss(css, tx)).await
    }

    async fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.request(|tx| Command::Resize(width, height, tx)).await
    }

    async fn capture_page(
        &mut self,
        crop: Option<CropRect>,
        encoding: Encoding,
    ) -> Result<CapturedFrame> {
        self.request(|tx| Command::Capture(crop, encoding, tx)).await
    }

    fn destroy(&mut self) {
        let _ = self.cmd_tx.send(Command::Destroy);
    }
}

fn worker(
    options: SurfaceOptions,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    init_tx: oneshot::Sender<Result<()>>,
    event_tx: mpsc::UnboundedSender<SurfaceEvent>,
) {
    let (browser, tab) = match launch(&options, event_tx.clone()) {
        Ok(pair) => pair,
        Err(err) => {
            let _ = init_tx.send(Err(err));
            return;
        }
    };
    let _ = init_tx.send(Ok(()));

    while let Some(cmd) = cmd_rx.blocking_recv() {
        match cmd {
            Command::Load(url, resp) => {
                let res = navigate(&tab, &url, &event_tx);
                let _ = resp.send(res);
            }
            Command::Inject(source, resp) => {
                let res = tab
                    .evaluate(&source, false)
                    .map(|_| ())
                    .map_err(|e| Error::Script(e.to_string()));
                let _ = resp.send(res);
            }
            Command::InsertCss(css, resp) => {
                let res = insert_css(&tab, &css);
                let _ = resp.send(res);
            }
            Command::Resize(width, height, resp) => {
                let res = tab
                    .set_bounds(Bounds::Normal {
                        left: None,
                        top: None,
                        width: Some(f64::from(width)),
                        height: Some(f64::from(height)),
                    })
                    .map(|_| ())
                    .map_err(|e| Error::Cdp(format!("resize failed: {e}")));
                let _ = resp.send(res);
            }
            Command::Capture(crop, encoding, resp) => {
                let res = capture(&tab, crop, encoding);
                let _ = resp.send(res);
            }
            Command::Destroy => break,
        }
    }

    debug!("cdp worker shutting down");
    drop(tab);
    drop(browser);
}

fn launch(
    options: &SurfaceOptions,
    event_tx: mpsc::UnboundedSender<SurfaceEvent>,
) -> Result<(Browser, std::sync::Arc<Tab>)> {
    let mut args: Vec<&OsStr> = vec![OsStr::new("--hide-scrollbars")];
    if !options.web_security {
        args.push(OsStr::new("--disable-web-security"));
    }

    let launch_options = LaunchOptions::default_builder()
        .headless(!options.show)
        .window_size(Some((options.width, options.height)))
        .args(args)
        .build()
        .map_err(|e| Error::Surface(format!("failed to build launch options: {e}")))?;

    let browser = Browser::new(launch_options)
        .map_err(|e| Error::Surface(format!("failed to launch browser: {e}")))?;

    let tab = browser
        .new_tab()
        .map_err(|e| Error::Surface(format!("failed to create tab: {e}")))?;

    // Page-to-host signal path: the page script calls the exposed binding
    // with a JSON string, forwarded here as a Signal event.
    let signal_tx = event_tx.clone();
    tab.expose_function(
        "__pagesnap_post",
        std::sync::Arc::new(move |payload: Value| {
            let raw = match payload.as_str() {
                Some(s) => s.to_string(),
                None => payload.to_string(),
            };
            match serde_json::from_str::<PostedSignal>(&raw) {
                Ok(signal) => {
                    let _ = signal_tx.send(SurfaceEvent::Signal {
                        channel: signal.channel,
                        payload: signal.payload,
                    });
                }
                Err(err) => warn!("dropping malformed page signal: {err}"),
            }
        }),
    )
    .map_err(|e| Error::Cdp(format!("failed to expose signal binding: {e}")))?;

    tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
        source: options.preload.clone(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })
    .map_err(|e| Error::Cdp(format!("failed to register preload: {e}")))?;

    Ok((browser, tab))
}

fn navigate(
    tab: &Tab,
    url: &str,
    event_tx: &mpsc::UnboundedSender<SurfaceEvent>,
) -> Result<()> {
    let navigated = tab
        .navigate_to(url)
        .and_then(|tab| tab.wait_until_navigated());

    match navigated {
        Ok(_) => {
            let _ = event_tx.send(SurfaceEvent::DomReady);
            let _ = event_tx.send(SurfaceEvent::StopLoading);
            Ok(())
        }
        Err(err) => {
            let description = err.to_string();
            let code = if description.contains("ERR_ABORTED") {
                crate::BENIGN_ABORT_CODE
            } else {
                -2
            };
            Err(Error::LoadFailure { code, description })
        }
    }
}

fn insert_css(tab: &Tab, css: &str) -> Result<()> {
    // Embed the stylesheet as a JSON string literal so it cannot break out
    // of the injected snippet.
    let literal =
        serde_json::to_string(css).map_err(|e| Error::Script(format!("bad css payload: {e}")))?;
    let source = format!(
        "(function () {{ var s = document.createElement('style'); s.textContent = {literal}; \
         document.head.appendChild(s); }})()"
    );
    tab.evaluate(&source, false)
        .map(|_| ())
        .map_err(|e| Error::Script(format!("css injection failed: {e}")))
}

fn capture(tab: &Tab, crop: Option<CropRect>, encoding: Encoding) -> Result<CapturedFrame> {
    let clip = crop.map(|c| Page::Viewport {
        x: f64::from(c.x),
        y: f64::from(c.y),
        width: f64::from(c.width),
        height: f64::from(c.height),
        scale: 1.0,
    });

    let (format, quality) = match encoding {
        Encoding::Png => (Page::CaptureScreenshotFormatOption::Png, None),
        Encoding::Jpeg { quality } => (
            Page::CaptureScreenshotFormatOption::Jpeg,
            Some(u32::from(quality)),
        ),
    };

    let data = tab
        .capture_screenshot(format, quality, clip, true)
        .map_err(|e| Error::Capture(e.to_string()))?;

    let (width, height) = match crop {
        Some(c) => (c.width, c.height),
        None => (
            eval_u32(tab, "window.innerWidth")?,
            eval_u32(tab, "window.innerHeight")?,
        ),
    };

    Ok(CapturedFrame {
        data,
        width,
        height,
    })
}

fn eval_u32(tab: &Tab, expr: &str) -> Result<u32> {
    let value = tab
        .evaluate(expr, false)
        .map_err(|e| Error::Cdp(format!("evaluation failed: {e}")))?
        .value
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    Ok(value as u32)
}

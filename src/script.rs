//! Page-side signal script
//!
//! The script runs inside the rendered page and reports two facts back to
//! the orchestrator: content size and "paint has occurred, content is
//! ready". It is injected as source text after the capture trigger fires,
//! so the boundary stays a serialized-text interface regardless of engine.
//!
//! # Message-channel contract (version 1)
//!
//! The preload establishes `$$pagesnapIpc.send(channel, payload)`, which
//! forwards `{"channel": <name>, "payload": <value>}` as a JSON string to
//! the engine-provided host binding `__pagesnap_post`. Channels and
//! payloads:
//!
//! | Channel             | Payload                         |
//! |---------------------|---------------------------------|
//! | `Loaded-<id>`       | `{ devicePixelRatio: number }`  |
//! | `CustomLoaded-<id>` | `{ devicePixelRatio: number }`  |
//! | `Size-<id>`         | `{ width, height }` in px       |
//! | `Frames-<id>`       | iframe count (number)           |
//!
//! Readiness is deferred through `requestAnimationFrame` twice: once to let
//! the scroll offset take effect and once more so at least one frame has
//! painted before the orchestrator captures pixels. Signaling immediately
//! would risk capturing an unpainted (blank) frame.

use crate::signals::ChannelNames;

/// Version of the injected script and its channel contract.
pub const SCRIPT_VERSION: u32 = 1;

/// Preload source establishing the page-to-host signal primitive.
///
/// Runs before any page script. Engines must expose `__pagesnap_post` as a
/// host binding accepting a single JSON string argument.
pub const PRELOAD_SOURCE: &str = r#"(function () {
    if (window.$$pagesnapIpc) { return; }
    window.$$pagesnapIpc = {
        send: function (channel, payload) {
            window.__pagesnap_post(JSON.stringify({ channel: channel, payload: payload }));
        }
    };
})();"#;

/// Snippet asking the page to report its content size.
pub const INVOKE_SIZE: &str = "window[\"$$pagesnap__size\"]()";

/// Snippet telling the page it is fully loaded and may signal readiness.
pub const INVOKE_LOADED: &str = "window[\"$$pagesnap__loaded\"]()";

const SIGNAL_TEMPLATE: &str = r#"var $$pagesnap__raf = window.requestAnimationFrame;
function $$pagesnap__load() {
    $$pagesnapIpc.send("{{LOADED}}", { devicePixelRatio: window.devicePixelRatio });
}
function $$pagesnap__size() {
    var w = window, d = document, e = d.documentElement, g = d.body;
    var width = Math.max(w.innerWidth, e.clientWidth, g.clientWidth);
    var height = Math.max(w.innerHeight, e.clientHeight, g.clientHeight, e.scrollHeight);
    $$pagesnapIpc.send("{{SIZE}}", { width: width, height: height });
}
function $$pagesnap__loaded() {
    $$pagesnap__raf(function () {
        document.body.scrollTop = {{OFFSET}};
        $$pagesnap__raf($$pagesnap__load);
    });
}"#;

const CUSTOM_EVENT_TEMPLATE: &str = r#"
document.addEventListener("{{EVENT}}", function () {
    document.body.scrollTop = {{OFFSET}};
    $$pagesnap__raf(function () {
        $$pagesnapIpc.send("{{CUSTOM}}", { devicePixelRatio: window.devicePixelRatio });
    });
});"#;

/// Build the signal script for one surface.
///
/// The custom-event listener block is only emitted when the request names a
/// ready event; the event name is escaped before embedding so a malformed
/// name cannot break out of the script (it then simply never fires and the
/// outer timeout resolves the request).
pub fn signal_script(channels: &ChannelNames, page_offset: i64, load_event: Option<&str>) -> String {
    let offset = page_offset.to_string();
    let mut source = SIGNAL_TEMPLATE
        .replace("{{LOADED}}", &channels.loaded)
        .replace("{{SIZE}}", &channels.size)
        .replace("{{OFFSET}}", &offset);

    if let Some(event) = load_event {
        source.push_str(
            &CUSTOM_EVENT_TEMPLATE
                .replace("{{EVENT}}", &escape_js_string(event))
                .replace("{{CUSTOM}}", &channels.custom_loaded)
                .replace("{{OFFSET}}", &offset),
        );
    }

    source
}

/// Probe reporting the page's iframe count on the given channel.
pub fn frame_count_probe(channel: &str) -> String {
    format!("$$pagesnapIpc.send(\"{channel}\", window.frames.length)")
}

fn escape_js_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

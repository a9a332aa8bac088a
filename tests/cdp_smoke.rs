//! Smoke tests for the CDP backend against a local HTTP server.

#![cfg(feature = "cdp")]

use std::sync::Once;

use tiny_http::{Response, Server};

use pagesnap::{CaptureRequest, ImageFormat};

static INIT: Once = Once::new();

/// Start a simple test HTTP server
fn start_test_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http("127.0.0.1:18091").unwrap();
            for request in server.incoming_requests() {
                let path = request.url().to_string();
                let response = match path.as_str() {
                    "/" => Response::from_string(
                        r#"<!DOCTYPE html>
<html>
<head><title>Capture Target</title></head>
<body>
<h1>Hello from the capture test server</h1>
</body>
</html>"#,
                    )
                    .with_header(
                        "Content-Type: text/html; charset=utf-8"
                            .parse::<tiny_http::Header>()
                            .unwrap(),
                    ),
                    _ => Response::from_string("Not Found").with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });
        // Give the server time to start
        std::thread::sleep(std::time::Duration::from_millis(100));
    });

    "http://127.0.0.1:18091".to_string()
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn captures_png_from_live_page() {
    let base_url = start_test_server();

    let request = CaptureRequest::new(&base_url);
    let (result, mut release) = pagesnap::capture(request).await.expect("capture failed");

    assert!(result.data.len() > 100, "PNG data seems too small");
    // PNG files start with these magic bytes
    assert_eq!(&result.data[0..8], b"\x89PNG\r\n\x1a\n");
    assert!(result.size.width > 0);
    assert!(result.size.height > 0);

    release.release();
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn captures_jpeg_from_live_page() {
    let base_url = start_test_server();

    let mut request = CaptureRequest::new(&base_url);
    request.format = ImageFormat::Jpeg;
    request.quality = Some(60);

    let (result, mut release) = pagesnap::capture(request).await.expect("capture failed");

    // JPEG files start with the SOI marker
    assert_eq!(&result.data[0..2], b"\xff\xd8");

    release.release();
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn load_failure_for_unresolvable_host() {
    let request = CaptureRequest::new("http://does-not-resolve.invalid/");
    let err = pagesnap::capture(request).await.unwrap_err();
    match err {
        pagesnap::Error::LoadFailure { .. } => {}
        other => panic!("expected LoadFailure, got {other:?}"),
    }
}

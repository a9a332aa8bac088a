use std::path::PathBuf;

use clap::Parser;
use pagesnap::{CaptureRequest, CropRect, ImageFormat};

/// Render a URL off-screen and save a screenshot once the page has settled.
#[derive(Parser)]
#[command(name = "pagesnap", version, about)]
struct Args {
    /// Page to load
    url: String,

    /// Output file
    #[arg(short, long, default_value = "screenshot.png")]
    output: PathBuf,

    /// Minimum output width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Minimum output height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Encode as JPEG instead of PNG
    #[arg(long)]
    jpeg: bool,

    /// JPEG quality 1-100 (default 80)
    #[arg(long)]
    quality: Option<u8>,

    /// Crop rectangle as x,y,width,height
    #[arg(long, value_parser = parse_crop)]
    crop: Option<CropRect>,

    /// Resize the surface to the page content before capturing
    #[arg(long)]
    page: bool,

    /// Custom DOM event that marks the page ready
    #[arg(long)]
    load_event: Option<String>,

    /// Milliseconds to wait after readiness before capturing
    #[arg(long, default_value_t = 0)]
    delay: u64,

    /// Quiet-period debounce in milliseconds
    #[arg(long, default_value_t = pagesnap::DEFAULT_QUIET_PERIOD_MS)]
    timeout: u64,

    /// CSS injected once the DOM is ready
    #[arg(long)]
    css: Option<String>,

    /// Vertical scroll offset applied before the capture
    #[arg(long)]
    page_offset: Option<i64>,

    /// Disable web security in the surface
    #[arg(long)]
    no_security: bool,
}

fn parse_crop(raw: &str) -> Result<CropRect, String> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 4 {
        return Err("expected x,y,width,height".to_string());
    }
    let mut values = [0u32; 4];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|e| format!("bad crop component {part:?}: {e}"))?;
    }
    Ok(CropRect {
        x: values[0],
        y: values[1],
        width: values[2],
        height: values[3],
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut request = CaptureRequest::new(&args.url);
    request.width = args.width;
    request.height = args.height;
    request.format = if args.jpeg {
        ImageFormat::Jpeg
    } else {
        ImageFormat::Png
    };
    request.quality = args.quality;
    request.crop = args.crop;
    request.page = args.page;
    request.load_event = args.load_event;
    request.delay_ms = args.delay;
    request.timeout_ms = args.timeout;
    request.css = args.css;
    request.page_offset = args.page_offset;
    request.security = !args.no_security;

    let (result, mut release) = pagesnap::capture(request).await?;
    std::fs::write(&args.output, &result.data)?;
    println!(
        "{} ] {} bytes, {}x{} @ {}dppx -> {}",
        args.url,
        result.data.len(),
        result.size.width,
        result.size.height,
        result.size.device_pixel_ratio,
        args.output.display()
    );
    release.release();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_parsing() {
        let crop = parse_crop("10, 20, 300, 400").unwrap();
        assert_eq!(
            crop,
            CropRect {
                x: 10,
                y: 20,
                width: 300,
                height: 400
            }
        );
        assert!(parse_crop("10,20,300").is_err());
        assert!(parse_crop("a,b,c,d").is_err());
    }
}

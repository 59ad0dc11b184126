//! Page rendering
//!
//! Turns a `.rm` page into a raster image: `rmc` converts the page to SVG,
//! `resvg` rasterises it onto a white canvas of the requested size.

use std::ffi::OsStr;
use std::io::Cursor;
use std::process::{Output, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use image::{DynamicImage, GrayImage};
use resvg::{tiny_skia, usvg};
use tokio::process::Command;

use super::types::OcrError;

/// reMarkable screen size in pixels
pub const DEVICE_WIDTH: u32 = 1404;
pub const DEVICE_HEIGHT: u32 = 1872;

/// Timeout for each external program call
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// PIL-style 3x3 sharpen kernel (normalised by its sum)
const SHARPEN_KERNEL: [f32; 9] = [-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0];

/// Run an external program with a timeout.
///
/// A missing program maps to [`OcrError::ToolNotFound`]; the child is killed
/// when the timeout expires.
pub async fn run_tool<I, S>(program: &str, args: I, timeout: Duration) -> Result<Output, OcrError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OcrError::ToolNotFound(program.to_string()),
            _ => OcrError::Io(e),
        })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(OcrError::Timeout {
            tool: program.to_string(),
            secs: timeout.as_secs(),
        }),
    }
}

/// Renders `.rm` pages to images
#[derive(Debug, Clone)]
pub struct PageRenderer {
    rmc_path: String,
    timeout: Duration,
}

impl Default for PageRenderer {
    fn default() -> Self {
        Self::new("rmc")
    }
}

impl PageRenderer {
    pub fn new(rmc_path: &str) -> Self {
        Self {
            rmc_path: rmc_path.to_string(),
            timeout: TOOL_TIMEOUT,
        }
    }

    /// Convert a page to SVG with `rmc`
    pub async fn rm_to_svg(&self, page: &[u8]) -> Result<Vec<u8>, OcrError> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("page.rm");
        let output = dir.path().join("page.svg");
        tokio::fs::write(&input, page).await?;

        let result = run_tool(
            &self.rmc_path,
            [
                OsStr::new("-t"),
                OsStr::new("svg"),
                OsStr::new("-o"),
                output.as_os_str(),
                input.as_os_str(),
            ],
            self.timeout,
        )
        .await?;

        if !result.status.success() {
            return Err(OcrError::RenderError(format!(
                "rmc failed: {}",
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        Ok(tokio::fs::read(&output).await?)
    }

    /// Render a page to an image of exactly `width` x `height`
    pub async fn render_page(&self, page: &[u8], width: u32, height: u32) -> Result<DynamicImage, OcrError> {
        let svg = self.rm_to_svg(page).await?;
        tokio::task::spawn_blocking(move || rasterize_svg(&svg, width, height))
            .await
            .map_err(|e| OcrError::RenderError(format!("Rasterisation task failed: {}", e)))?
    }

    /// Render a page to PNG bytes
    pub async fn render_png(&self, page: &[u8], width: u32, height: u32) -> Result<Vec<u8>, OcrError> {
        let image = self.render_page(page, width, height).await?;
        encode_png(&image)
    }
}

fn font_database() -> Arc<usvg::fontdb::Database> {
    static FONTS: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut fontdb = usvg::fontdb::Database::new();
            fontdb.load_system_fonts();
            Arc::new(fontdb)
        })
        .clone()
}

/// Rasterise an SVG, stretched to fill the canvas
pub fn rasterize_svg(svg: &[u8], width: u32, height: u32) -> Result<DynamicImage, OcrError> {
    let options = usvg::Options {
        fontdb: font_database(),
        ..Default::default()
    };
    let tree = usvg::Tree::from_data(svg, &options)
        .map_err(|e| OcrError::RenderError(format!("Invalid SVG: {}", e)))?;

    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| OcrError::RenderError(format!("Invalid canvas {}x{}", width, height)))?;
    pixmap.fill(tiny_skia::Color::WHITE);

    let size = tree.size();
    let transform = tiny_skia::Transform::from_scale(
        width as f32 / size.width(),
        height as f32 / size.height(),
    );
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    image::RgbaImage::from_raw(width, height, pixmap.data().to_vec())
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| OcrError::RenderError("Pixel buffer size mismatch".to_string()))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, OcrError> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)?;
    Ok(buffer)
}

fn mean_brightness(image: &GrayImage) -> f64 {
    let count = image.width() as usize * image.height() as usize;
    if count == 0 {
        return 255.0;
    }
    let sum: u64 = image.pixels().map(|p| p.0[0] as u64).sum();
    sum as f64 / count as f64
}

/// Stretch the histogram so that `cutoff_percent` of pixels clip at each end
pub fn autocontrast(image: &mut GrayImage, cutoff_percent: f64) {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return;
    }
    let cut = (total as f64 * cutoff_percent / 100.0) as u64;

    let mut seen = 0;
    let low = (0..256)
        .find(|&i| {
            seen += histogram[i];
            seen > cut
        })
        .unwrap_or(0);
    let mut seen = 0;
    let high = (0..256)
        .rev()
        .find(|&i| {
            seen += histogram[i];
            seen > cut
        })
        .unwrap_or(255);

    if high <= low {
        return;
    }

    let scale = 255.0 / (high - low) as f64;
    for pixel in image.pixels_mut() {
        let value = (pixel.0[0] as f64 - low as f64) * scale;
        pixel.0[0] = value.round().clamp(0.0, 255.0) as u8;
    }
}

/// Grayscale, invert dark pages, autocontrast, sharpen
pub fn preprocess_for_ocr(image: &DynamicImage) -> GrayImage {
    let mut gray = image.to_luma8();

    if mean_brightness(&gray) < 128.0 {
        image::imageops::invert(&mut gray);
    }
    autocontrast(&mut gray, 2.0);

    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return gray;
    }

    // filter3x3 leaves the border untouched, so carry it over
    let mut sharpened = image::imageops::filter3x3(&gray, &SHARPEN_KERNEL);
    for (x, y, pixel) in gray.enumerate_pixels() {
        if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
            sharpened.put_pixel(x, y, *pixel);
        }
    }
    sharpened
}

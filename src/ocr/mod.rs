//! OCR Module
//!
//! Handwriting recognition for notebook pages.
//!
//! Supports multiple backends:
//! - Sampling (the connected MCP client's own model)
//! - Google Cloud Vision (requires `GOOGLE_VISION_API_KEY`)
//! - Tesseract (local, requires installation)
//!
//! Every backend renders pages through `rmc`, so it must be installed too.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use remarkable_mcp_server::ocr::{OcrContext, OcrDispatcher};
//!
//! let dispatcher = OcrDispatcher::from_config(&config.ocr);
//! let ctx = OcrContext::default();
//!
//! // One entry per page, "" where a page failed, plus the backend used
//! if let Some(output) = dispatcher.ocr_pages(&archive.pages, &ctx).await? {
//!     println!("{}: {:?}", output.backend, output.pages);
//! }
//! ```

mod provider;
mod render;
mod sampling;
mod service;
mod types;

pub use provider::{
    parse_annotate_response, OcrContext, OcrEngine, SamplingEngine, TesseractEngine, VisionApiEngine,
};
pub use render::{preprocess_for_ocr, rasterize_svg, PageRenderer, DEVICE_HEIGHT, DEVICE_WIDTH};
pub use sampling::{SamplingClient, SamplingContent, SamplingMessage, SamplingRequest, SamplingResponse};
pub use service::{ocr_pages_with, OcrDispatcher, OcrOutput, AUTO_PRIORITY};
pub use types::{OcrBackend, OcrBackendSetting, OcrError};

#[cfg(test)]
pub(crate) use provider::testing;

//! OCR Types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// OCR backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackend {
    /// The MCP client's own model, via sampling
    Sampling,
    /// Google Cloud Vision document text detection
    VisionApi,
    /// Local Tesseract
    LocalOcr,
}

impl fmt::Display for OcrBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OcrBackend::Sampling => "sampling",
            OcrBackend::VisionApi => "google",
            OcrBackend::LocalOcr => "tesseract",
        })
    }
}

/// Configured backend choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OcrBackendSetting {
    /// Vision API when configured, Tesseract otherwise
    #[default]
    Auto,
    Explicit(OcrBackend),
}

impl FromStr for OcrBackendSetting {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "sampling" => Ok(Self::Explicit(OcrBackend::Sampling)),
            "google" | "vision" | "vision-api" => Ok(Self::Explicit(OcrBackend::VisionApi)),
            "tesseract" | "local" | "local-ocr" => Ok(Self::Explicit(OcrBackend::LocalOcr)),
            other => Err(OcrError::ProviderNotAvailable(format!(
                "unknown OCR backend '{}'",
                other
            ))),
        }
    }
}

/// OCR error types
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR provider not available: {0}")]
    ProviderNotAvailable(String),

    /// A required external program is not installed; fatal for the batch
    #[error("Required tool not found: {0}")]
    ToolNotFound(String),

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Failed to render page: {0}")]
    RenderError(String),

    #[error("OCR processing failed: {0}")]
    ProcessingError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    /// Whether the error should stop the whole batch rather than one page
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ToolNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_setting() {
        assert_eq!("AUTO".parse::<OcrBackendSetting>().unwrap(), OcrBackendSetting::Auto);
        assert_eq!(
            "google".parse::<OcrBackendSetting>().unwrap(),
            OcrBackendSetting::Explicit(OcrBackend::VisionApi)
        );
        assert_eq!(
            "tesseract".parse::<OcrBackendSetting>().unwrap(),
            OcrBackendSetting::Explicit(OcrBackend::LocalOcr)
        );
        assert!("paddle".parse::<OcrBackendSetting>().is_err());
    }
}

//! OCR through MCP sampling
//!
//! The client's own model reads the page: one `sampling/createMessage`
//! request per page, image attached as base64 PNG.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::types::OcrError;

pub const NO_TEXT_SENTINEL: &str = "[NO TEXT DETECTED]";

pub const SYSTEM_PROMPT: &str = "You are an OCR system. Your only task is to transcribe handwritten or \
printed text from the image exactly as written. Preserve line breaks. Do not describe the image, do not \
add commentary, do not summarize. If the image contains no readable text, respond with exactly: \
[NO TEXT DETECTED]";

pub const USER_PROMPT: &str =
    "Extract all text from this image. Output only the text content, nothing else.";

pub const MAX_TOKENS: u32 = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SamplingContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingMessage {
    pub role: String,
    pub content: SamplingContent,
}

/// Parameters of a `sampling/createMessage` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingRequest {
    pub messages: Vec<SamplingMessage>,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl SamplingRequest {
    /// OCR request for one PNG page
    pub fn ocr(png: &[u8]) -> Self {
        let data = base64::engine::general_purpose::STANDARD.encode(png);
        Self {
            messages: vec![
                SamplingMessage {
                    role: "user".to_string(),
                    content: SamplingContent::Image {
                        data,
                        mime_type: "image/png".to_string(),
                    },
                },
                SamplingMessage {
                    role: "user".to_string(),
                    content: SamplingContent::Text {
                        text: USER_PROMPT.to_string(),
                    },
                },
            ],
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
        }
    }
}

/// Result of a `sampling/createMessage` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingResponse {
    #[serde(default)]
    pub role: Option<String>,
    pub content: SamplingContent,
    #[serde(default)]
    pub model: Option<String>,
}

impl SamplingResponse {
    /// Recognised text, if the model found any
    pub fn into_text(self) -> Option<String> {
        let SamplingContent::Text { text } = self.content else {
            return None;
        };
        let text = text.trim();
        if text.is_empty() || text.contains(NO_TEXT_SENTINEL) {
            return None;
        }
        Some(text.to_string())
    }
}

/// A client able to answer sampling requests
#[async_trait]
pub trait SamplingClient: Send + Sync {
    async fn create_message(&self, request: SamplingRequest) -> Result<SamplingResponse, OcrError>;
}

//! OCR Engines
//!
//! Defines the engine trait and the three backends: client sampling, the
//! Google Vision REST API and local Tesseract.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;

use super::render::{
    encode_png, preprocess_for_ocr, run_tool, PageRenderer, DEVICE_HEIGHT, DEVICE_WIDTH, TOOL_TIMEOUT,
};
use super::sampling::{SamplingClient, SamplingRequest};
use super::types::{OcrBackend, OcrError};

pub const VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Per-request facts the engines need from the current session
#[derive(Clone, Default)]
pub struct OcrContext {
    /// Set when the connected client declared sampling support
    pub sampling: Option<Arc<dyn SamplingClient>>,
}

impl OcrContext {
    pub fn with_sampling(client: Arc<dyn SamplingClient>) -> Self {
        Self {
            sampling: Some(client),
        }
    }

    pub fn supports_sampling(&self) -> bool {
        self.sampling.is_some()
    }
}

/// OCR engine trait
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Which backend this engine implements
    fn backend(&self) -> OcrBackend;

    /// Check if the engine can run right now
    async fn is_available(&self, ctx: &OcrContext) -> bool;

    /// Recognise one `.rm` page; `Ok(None)` when no text was found
    async fn ocr_page(&self, page: &[u8], ctx: &OcrContext) -> Result<Option<String>, OcrError>;
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Sampling engine: asks the client's model
pub struct SamplingEngine {
    renderer: PageRenderer,
}

impl SamplingEngine {
    pub fn new(renderer: PageRenderer) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl OcrEngine for SamplingEngine {
    fn backend(&self) -> OcrBackend {
        OcrBackend::Sampling
    }

    async fn is_available(&self, ctx: &OcrContext) -> bool {
        ctx.supports_sampling()
    }

    async fn ocr_page(&self, page: &[u8], ctx: &OcrContext) -> Result<Option<String>, OcrError> {
        let Some(client) = &ctx.sampling else {
            return Err(OcrError::ProviderNotAvailable(
                "client does not support sampling".to_string(),
            ));
        };

        let png = self.renderer.render_png(page, DEVICE_WIDTH, DEVICE_HEIGHT).await?;

        match client.create_message(SamplingRequest::ocr(&png)).await {
            Ok(reply) => Ok(reply.into_text()),
            Err(e) => {
                tracing::warn!("Sampling OCR request failed: {}", e);
                Ok(None)
            }
        }
    }
}

/// Google Cloud Vision engine
pub struct VisionApiEngine {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    renderer: PageRenderer,
}

impl VisionApiEngine {
    pub fn new(api_key: Option<String>, renderer: PageRenderer) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: VISION_ENDPOINT.to_string(),
            renderer,
        }
    }
}

/// Text from an `images:annotate` response, `None` on an error object or
/// empty annotation
pub fn parse_annotate_response(body: &Value) -> Option<String> {
    let response = body.get("responses")?.get(0)?;
    if let Some(error) = response.get("error") {
        let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown");
        tracing::warn!("Vision API error: {}", message);
        return None;
    }
    response
        .pointer("/fullTextAnnotation/text")
        .and_then(Value::as_str)
        .and_then(non_empty)
}

#[async_trait]
impl OcrEngine for VisionApiEngine {
    fn backend(&self) -> OcrBackend {
        OcrBackend::VisionApi
    }

    async fn is_available(&self, _ctx: &OcrContext) -> bool {
        self.api_key.is_some()
    }

    async fn ocr_page(&self, page: &[u8], _ctx: &OcrContext) -> Result<Option<String>, OcrError> {
        let Some(api_key) = &self.api_key else {
            return Err(OcrError::ProviderNotAvailable(
                "GOOGLE_VISION_API_KEY is not set".to_string(),
            ));
        };

        let png = self.renderer.render_png(page, DEVICE_WIDTH, DEVICE_HEIGHT).await?;
        let content = base64::engine::general_purpose::STANDARD.encode(&png);

        let request = serde_json::json!({
            "requests": [{
                "image": {"content": content},
                "features": [{"type": "DOCUMENT_TEXT_DETECTION"}]
            }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| OcrError::ApiError(format!("Failed to call Vision API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::ApiError(format!(
                "Vision API returned {}: {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| OcrError::ApiError(format!("Failed to parse response: {}", e)))?;

        Ok(parse_annotate_response(&body))
    }
}

/// Local Tesseract engine
pub struct TesseractEngine {
    tesseract_path: String,
    renderer: PageRenderer,
}

impl TesseractEngine {
    /// Tesseract reads better at twice the device resolution
    pub const SCALE: u32 = 2;

    pub fn new(tesseract_path: &str, renderer: PageRenderer) -> Self {
        Self {
            tesseract_path: tesseract_path.to_string(),
            renderer,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn backend(&self) -> OcrBackend {
        OcrBackend::LocalOcr
    }

    async fn is_available(&self, _ctx: &OcrContext) -> bool {
        match run_tool(&self.tesseract_path, ["--version"], Duration::from_secs(5)).await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn ocr_page(&self, page: &[u8], _ctx: &OcrContext) -> Result<Option<String>, OcrError> {
        let image = self
            .renderer
            .render_page(page, DEVICE_WIDTH * Self::SCALE, DEVICE_HEIGHT * Self::SCALE)
            .await?;

        let png = tokio::task::spawn_blocking(move || {
            let processed = preprocess_for_ocr(&image);
            encode_png(&image::DynamicImage::ImageLuma8(processed))
        })
        .await
        .map_err(|e| OcrError::ProcessingError(format!("Preprocessing task failed: {}", e)))??;

        let dir = tempfile::tempdir()?;
        let input = dir.path().join("page.png");
        tokio::fs::write(&input, &png).await?;

        let output = run_tool(
            &self.tesseract_path,
            [
                input.as_os_str(),
                OsStr::new("stdout"),
                OsStr::new("--psm"),
                OsStr::new("11"),
                OsStr::new("--oem"),
                OsStr::new("3"),
            ],
            TOOL_TIMEOUT,
        )
        .await
        .map_err(|e| match e {
            OcrError::ToolNotFound(_) => OcrError::ToolNotFound("tesseract".to_string()),
            other => other,
        })?;

        if !output.status.success() {
            return Err(OcrError::ProcessingError(format!(
                "Tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(non_empty(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Scripted engine: page `n` yields `script[n]`, repeating the last entry
    pub(crate) struct ScriptedEngine {
        pub backend: OcrBackend,
        pub available: bool,
        pub script: Vec<Result<Option<String>, fn() -> OcrError>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedEngine {
        pub fn new(backend: OcrBackend, available: bool) -> Self {
            Self {
                backend,
                available,
                script: vec![Ok(Some("text".to_string()))],
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_script(mut self, script: Vec<Result<Option<String>, fn() -> OcrError>>) -> Self {
            self.script = script;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OcrEngine for ScriptedEngine {
        fn backend(&self) -> OcrBackend {
            self.backend
        }

        async fn is_available(&self, _ctx: &OcrContext) -> bool {
            self.available
        }

        async fn ocr_page(&self, _page: &[u8], _ctx: &OcrContext) -> Result<Option<String>, OcrError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.get(n).or(self.script.last());
            match step {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(make)) => Err(make()),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annotate_response() {
        let body = serde_json::json!({
            "responses": [{"fullTextAnnotation": {"text": "  Hello\nworld \n"}}]
        });
        assert_eq!(parse_annotate_response(&body), Some("Hello\nworld".to_string()));

        let error = serde_json::json!({
            "responses": [{"error": {"code": 3, "message": "Bad image data."}}]
        });
        assert_eq!(parse_annotate_response(&error), None);

        assert_eq!(parse_annotate_response(&serde_json::json!({"responses": [{}]})), None);
    }

    #[tokio::test]
    async fn test_vision_requires_key() {
        let engine = VisionApiEngine::new(Some("  ".to_string()), PageRenderer::default());
        assert!(!engine.is_available(&OcrContext::default()).await);

        let engine = VisionApiEngine::new(Some("key".to_string()), PageRenderer::default());
        assert!(engine.is_available(&OcrContext::default()).await);
    }

    #[tokio::test]
    async fn test_sampling_follows_context() {
        let engine = SamplingEngine::new(PageRenderer::default());
        assert!(!engine.is_available(&OcrContext::default()).await);
        assert!(engine.ocr_page(b"", &OcrContext::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_tesseract_unavailable() {
        let engine = TesseractEngine::new("no-such-tesseract-binary", PageRenderer::default());
        assert!(!engine.is_available(&OcrContext::default()).await);
    }

    #[cfg(unix)]
    mod sampling_engine {
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        use super::*;
        use crate::ocr::sampling::{SamplingContent, SamplingResponse, NO_TEXT_SENTINEL};

        /// Stand-in for `rmc`: writes a blank SVG to the `-o` path
        fn fake_rmc(dir: &Path) -> PageRenderer {
            let script = dir.join("rmc");
            std::fs::write(
                &script,
                "#!/bin/sh\nprintf '<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"10\" height=\"10\"/>' > \"$4\"\n",
            )
            .unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
            PageRenderer::new(script.to_str().unwrap())
        }

        struct FakeSampling(Result<&'static str, ()>);

        #[async_trait]
        impl SamplingClient for FakeSampling {
            async fn create_message(
                &self,
                request: SamplingRequest,
            ) -> Result<SamplingResponse, OcrError> {
                assert!(matches!(
                    request.messages[0].content,
                    SamplingContent::Image { .. }
                ));
                match self.0 {
                    Ok(text) => Ok(SamplingResponse {
                        role: Some("assistant".to_string()),
                        content: SamplingContent::Text {
                            text: text.to_string(),
                        },
                        model: None,
                    }),
                    Err(()) => Err(OcrError::ApiError("client disconnected".to_string())),
                }
            }
        }

        fn ctx(reply: Result<&'static str, ()>) -> OcrContext {
            OcrContext::with_sampling(Arc::new(FakeSampling(reply)))
        }

        #[tokio::test]
        async fn test_reply_text_is_trimmed() {
            let dir = tempfile::tempdir().unwrap();
            let engine = SamplingEngine::new(fake_rmc(dir.path()));

            let text = engine.ocr_page(b"page", &ctx(Ok("  buy milk\n"))).await.unwrap();
            assert_eq!(text, Some("buy milk".to_string()));
        }

        #[tokio::test]
        async fn test_sentinel_reply_is_no_text() {
            let dir = tempfile::tempdir().unwrap();
            let engine = SamplingEngine::new(fake_rmc(dir.path()));

            let text = engine.ocr_page(b"page", &ctx(Ok(NO_TEXT_SENTINEL))).await.unwrap();
            assert_eq!(text, None);
        }

        #[tokio::test]
        async fn test_transport_error_is_no_text() {
            let dir = tempfile::tempdir().unwrap();
            let engine = SamplingEngine::new(fake_rmc(dir.path()));

            let text = engine.ocr_page(b"page", &ctx(Err(()))).await.unwrap();
            assert_eq!(text, None);
        }
    }
}

//! OCR Dispatcher
//!
//! Picks a backend for the session and runs it over a document's pages,
//! falling back to the next available backend when one produces nothing.

use std::sync::Arc;

use crate::config::OcrConfig;

use super::{
    provider::{OcrContext, OcrEngine, SamplingEngine, TesseractEngine, VisionApiEngine},
    render::PageRenderer,
    types::{OcrBackend, OcrBackendSetting, OcrError},
};

/// Auto-detection order
pub const AUTO_PRIORITY: [OcrBackend; 2] = [OcrBackend::VisionApi, OcrBackend::LocalOcr];

/// Pages recognised by one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrOutput {
    /// The backend that produced the text, after any fallback
    pub backend: OcrBackend,
    /// One entry per page, `""` where a page failed
    pub pages: Vec<String>,
}

/// Routes OCR work to the configured engines
pub struct OcrDispatcher {
    setting: OcrBackendSetting,
    engines: Vec<Arc<dyn OcrEngine>>,
}

impl OcrDispatcher {
    pub fn new(setting: OcrBackendSetting, engines: Vec<Arc<dyn OcrEngine>>) -> Self {
        Self { setting, engines }
    }

    /// Dispatcher with all three engines wired from configuration
    pub fn from_config(config: &OcrConfig) -> Self {
        let renderer = PageRenderer::new(&config.rmc_path);
        let engines: Vec<Arc<dyn OcrEngine>> = vec![
            Arc::new(SamplingEngine::new(renderer.clone())),
            Arc::new(VisionApiEngine::new(
                config.google_api_key.clone(),
                renderer.clone(),
            )),
            Arc::new(TesseractEngine::new(&config.tesseract_path, renderer)),
        ];
        Self::new(config.backend, engines)
    }

    fn engine(&self, backend: OcrBackend) -> Option<&Arc<dyn OcrEngine>> {
        self.engines.iter().find(|e| e.backend() == backend)
    }

    /// Backend for this session.
    ///
    /// An explicit choice is taken as-is, except sampling which still needs
    /// the client to support it. `Auto` takes the first available backend in
    /// [`AUTO_PRIORITY`].
    pub async fn resolve_backend(&self, ctx: &OcrContext) -> Option<OcrBackend> {
        match self.setting {
            OcrBackendSetting::Explicit(OcrBackend::Sampling) => {
                let engine = self.engine(OcrBackend::Sampling)?;
                engine
                    .is_available(ctx)
                    .await
                    .then_some(OcrBackend::Sampling)
            }
            OcrBackendSetting::Explicit(backend) => self.engine(backend).map(|_| backend),
            OcrBackendSetting::Auto => {
                for backend in AUTO_PRIORITY {
                    if let Some(engine) = self.engine(backend) {
                        if engine.is_available(ctx).await {
                            return Some(backend);
                        }
                    }
                }
                None
            }
        }
    }

    /// Engines to try in order: the resolved backend, then the auto-priority
    /// backends ranked below it that are available
    async fn fallback_chain(&self, ctx: &OcrContext) -> Vec<Arc<dyn OcrEngine>> {
        let resolved = self.resolve_backend(ctx).await;
        let mut chain: Vec<Arc<dyn OcrEngine>> = Vec::new();

        if let Some(engine) = resolved.and_then(|b| self.engine(b)) {
            chain.push(engine.clone());
        }

        let start = resolved
            .and_then(|b| AUTO_PRIORITY.iter().position(|p| *p == b))
            .map_or(0, |i| i + 1);
        for backend in &AUTO_PRIORITY[start..] {
            if let Some(engine) = self.engine(*backend) {
                if engine.is_available(ctx).await {
                    chain.push(engine.clone());
                }
            }
        }

        chain
    }

    /// OCR every page with the first backend that recognises anything.
    ///
    /// `Ok(None)` means every backend came back empty.
    pub async fn ocr_pages(
        &self,
        pages: &[Vec<u8>],
        ctx: &OcrContext,
    ) -> Result<Option<OcrOutput>, OcrError> {
        let chain = self.fallback_chain(ctx).await;
        if chain.is_empty() {
            return Err(OcrError::ProviderNotAvailable(
                "No OCR backend available".to_string(),
            ));
        }

        let mut last_error = None;
        for engine in chain {
            match ocr_pages_with(engine.as_ref(), pages, ctx).await {
                Ok(Some(texts)) => {
                    return Ok(Some(OcrOutput {
                        backend: engine.backend(),
                        pages: texts,
                    }))
                }
                Ok(None) => {
                    tracing::info!(backend = %engine.backend(), "OCR found no text, trying next backend");
                }
                Err(e) => {
                    tracing::warn!(backend = %engine.backend(), "OCR backend failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// Run one engine over all pages, one at a time.
///
/// A fatal error (missing tool) aborts the batch; any other page failure
/// leaves an empty slot.
pub async fn ocr_pages_with(
    engine: &dyn OcrEngine,
    pages: &[Vec<u8>],
    ctx: &OcrContext,
) -> Result<Option<Vec<String>>, OcrError> {
    let mut texts = Vec::with_capacity(pages.len());
    let mut recognised = false;

    for (i, page) in pages.iter().enumerate() {
        match engine.ocr_page(page, ctx).await {
            Ok(Some(text)) => {
                recognised = true;
                texts.push(text);
            }
            Ok(None) => texts.push(String::new()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(page = i + 1, "OCR failed for page: {}", e);
                texts.push(String::new());
            }
        }
    }

    Ok(recognised.then_some(texts))
}

//! Application state management

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Config, LoadMode, Transport};
use crate::error::StoreError;
use crate::library::{
    load_all_documents_sync, spawn_background_loader, stop_background_loader, DocumentRegistry,
    LoaderConfig, LoaderHandle,
};
use crate::ocr::OcrDispatcher;
use crate::storage::{DocumentStore, UsbWebClient, XochitlStore};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to initialize document store: {0}")]
    StoreInit(#[from] StoreError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: Arc<dyn DocumentStore>,
    registry: DocumentRegistry,
    ocr: Arc<OcrDispatcher>,
    loader: Mutex<Option<LoaderHandle>>,
}

impl AppState {
    /// Create the state with the store selected by the configured transport
    pub fn new(config: Config) -> Result<Self, StateError> {
        let store: Arc<dyn DocumentStore> = match config.store.transport {
            Transport::Usb => Arc::new(UsbWebClient::new(&config.store)?),
            Transport::Local => Arc::new(XochitlStore::new(config.store.data_dir.clone())),
        };
        let ocr = Arc::new(OcrDispatcher::from_config(&config.ocr));
        Ok(Self::with_parts(config, store, ocr))
    }

    pub fn with_parts(config: Config, store: Arc<dyn DocumentStore>, ocr: Arc<OcrDispatcher>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                registry: DocumentRegistry::new(),
                ocr,
                loader: Mutex::new(None),
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the document store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// Get the document registry
    pub fn registry(&self) -> &DocumentRegistry {
        &self.inner.registry
    }

    /// Get the OCR dispatcher
    pub fn ocr(&self) -> &OcrDispatcher {
        &self.inner.ocr
    }

    /// Fill the registry, eagerly or in the background depending on the
    /// load mode. An eager load failure is logged; the server still starts.
    pub async fn populate_registry(&self) {
        match self.config().load_mode() {
            LoadMode::Eager => {
                if let Err(e) = load_all_documents_sync(self.store().as_ref(), self.registry()).await {
                    tracing::warn!("Initial document load failed: {}", e);
                }
            }
            LoadMode::Background => {
                let config = LoaderConfig {
                    batch_size: self.config().registry.batch_size,
                    ..Default::default()
                };
                let handle =
                    spawn_background_loader(self.store().clone(), self.registry().clone(), config);
                let previous = self.inner.loader.lock().replace(handle);
                stop_background_loader(previous).await;
                tracing::info!("Background document loader started");
            }
        }
    }

    /// Whether a background loader is still running
    pub fn is_loading(&self) -> bool {
        self.inner
            .loader
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop background work
    pub async fn shutdown(&self) {
        let handle = self.inner.loader.lock().take();
        stop_background_loader(handle).await;
    }
}

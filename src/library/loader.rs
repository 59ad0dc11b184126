//! Registry population
//!
//! Two strategies, one per process:
//!
//! - [`load_all_documents_sync`]: one full listing, registered before the
//!   server starts answering. Used when listing is cheap (USB).
//! - [`spawn_background_loader`]: batched population in a background task
//!   with bounded retries and cooperative cancellation. Used when listing is
//!   slow (data directory over SSH).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StoreResult;
use crate::storage::DocumentStore;

use super::path::build_path_index;
use super::registry::DocumentRegistry;

/// How long [`stop_background_loader`] waits before aborting the task
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Background loader states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Fetching,
    Registering,
    Backoff,
    Done,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Consecutive fetch failures after which the loader gives up
    pub max_consecutive_errors: u32,
    /// Backoff sleeps `2^errors` of these
    pub backoff_unit: Duration,
    /// Pause between batches
    pub batch_pause: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_consecutive_errors: 3,
            backoff_unit: Duration::from_secs(1),
            batch_pause: Duration::from_millis(100),
        }
    }
}

/// Fetch the complete listing once and register every document.
///
/// Returns the number of newly registered documents.
pub async fn load_all_documents_sync(
    store: &dyn DocumentStore,
    registry: &DocumentRegistry,
) -> StoreResult<usize> {
    let start = std::time::Instant::now();
    let items = store.list_items(None).await?;
    let index = build_path_index(&items);

    let mut registered = 0;
    let mut skipped = 0;
    for item in items.iter().filter(|item| !item.is_folder) {
        if registry.register_document(item, &index) {
            registered += 1;
        } else {
            skipped += 1;
        }
    }

    tracing::info!(
        store = store.name(),
        registered,
        skipped,
        elapsed = ?start.elapsed(),
        "Registered documents"
    );
    Ok(registered)
}

/// Handle to a running background loader
pub struct LoaderHandle {
    cancel: CancellationToken,
    state: watch::Receiver<LoaderState>,
    task: JoinHandle<LoaderState>,
}

impl LoaderHandle {
    pub fn state(&self) -> LoaderState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loader to finish on its own
    pub async fn join(self) -> LoaderState {
        self.task.await.unwrap_or(LoaderState::Cancelled)
    }
}

/// Start populating `registry` in a background task
pub fn spawn_background_loader(
    store: Arc<dyn DocumentStore>,
    registry: DocumentRegistry,
    config: LoaderConfig,
) -> LoaderHandle {
    let cancel = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(LoaderState::Fetching);

    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        run_background_loader(store.as_ref(), &registry, &config, &task_cancel, &state_tx).await
    });

    LoaderHandle {
        cancel,
        state: state_rx,
        task,
    }
}

/// Loader body: fetch, register, back off, repeat.
///
/// Cancellation is checked at the top of every round, before every item and
/// during every sleep. The final state is returned and published.
pub async fn run_background_loader(
    store: &dyn DocumentStore,
    registry: &DocumentRegistry,
    config: &LoaderConfig,
    cancel: &CancellationToken,
    state: &watch::Sender<LoaderState>,
) -> LoaderState {
    let batch_size = config.batch_size.max(1);
    let mut offset = 0;
    let mut errors = 0;
    let mut registered = 0;

    let finish = |final_state: LoaderState, registered: usize| {
        state.send_replace(final_state);
        match final_state {
            LoaderState::Cancelled => tracing::info!(registered, "Background loader cancelled"),
            _ => tracing::info!(registered, "Background loader finished"),
        }
        final_state
    };

    loop {
        if cancel.is_cancelled() {
            return finish(LoaderState::Cancelled, registered);
        }

        state.send_replace(LoaderState::Fetching);
        // The store's limit re-lists from the start, so each round sees the
        // whole prefix up to the end of this batch
        let items = match store.list_items(Some(offset + batch_size)).await {
            Ok(items) => {
                errors = 0;
                items
            }
            Err(e) => {
                errors += 1;
                if errors >= config.max_consecutive_errors {
                    tracing::error!(
                        errors,
                        offset,
                        "Giving up on background document loading: {}",
                        e
                    );
                    return finish(LoaderState::Done, registered);
                }

                let delay = config.backoff_unit * 2u32.pow(errors);
                tracing::warn!(errors, ?delay, "Document fetch failed: {}, retrying", e);
                state.send_replace(LoaderState::Backoff);
                if !pause(delay, cancel).await {
                    return finish(LoaderState::Cancelled, registered);
                }
                continue;
            }
        };

        if items.len() <= offset {
            return finish(LoaderState::Done, registered);
        }

        let index = build_path_index(&items);
        state.send_replace(LoaderState::Registering);
        for item in items.iter().skip(offset).take(batch_size) {
            if cancel.is_cancelled() {
                return finish(LoaderState::Cancelled, registered);
            }
            if !item.is_folder && registry.register_document(item, &index) {
                registered += 1;
            }
        }

        tracing::debug!(offset, registered, "Registered batch");
        offset += batch_size;

        if !pause(config.batch_pause, cancel).await {
            return finish(LoaderState::Cancelled, registered);
        }
    }
}

/// Sleep unless cancelled first; `false` means cancelled
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Signal the loader to stop and wait for it, aborting after a bounded wait.
pub async fn stop_background_loader(handle: Option<LoaderHandle>) {
    let Some(handle) = handle else {
        return;
    };

    handle.cancel.cancel();
    let abort = handle.task.abort_handle();

    match tokio::time::timeout(STOP_TIMEOUT, handle.task).await {
        Ok(Ok(state)) => tracing::info!(?state, "Background loader stopped"),
        Ok(Err(e)) if e.is_cancelled() => tracing::debug!("Background loader task was cancelled"),
        Ok(Err(e)) => tracing::warn!("Background loader task failed: {}", e),
        Err(_) => {
            tracing::warn!("Background loader did not stop within {:?}, aborting", STOP_TIMEOUT);
            abort.abort();
        }
    }
}

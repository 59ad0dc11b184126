//! Storage module for reMarkable document stores
//!
//! Supports the USB web interface and a xochitl data directory (a local copy
//! or an SSH mount of the tablet's `~/.local/share/remarkable/xochitl`).

mod types;
mod usb_web;
mod xochitl;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::library::{build_path_index, resolve_path};

pub use types::*;
pub use usb_web::UsbWebClient;
pub use xochitl::XochitlStore;

/// Document store trait
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// List folders and documents, at most `limit` when given.
    ///
    /// A limited listing always starts from the beginning of the store's
    /// listing order.
    async fn list_items(&self, limit: Option<usize>) -> StoreResult<Vec<Item>>;

    /// Download a document as a zip archive
    async fn download(&self, item: &Item) -> StoreResult<Vec<u8>>;

    /// Full path of an item, e.g. `/Work/Meeting Notes`
    async fn path_of(&self, item: &Item) -> StoreResult<String> {
        let items = self.list_items(None).await?;
        Ok(resolve_path(item, &build_path_index(&items)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory store shared by the unit tests

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::error::StoreError;

    #[derive(Default)]
    pub struct MemoryStore {
        pub items: Vec<Item>,
        pub archives: HashMap<String, Vec<u8>>,
        /// Results for successive `list_items` calls; `false` entries fail
        pub script: Mutex<Vec<bool>>,
        pub list_calls: AtomicUsize,
        /// Runs on every `list_items` call with the 1-based call number
        pub on_list: Option<Box<dyn Fn(usize) + Send + Sync>>,
    }

    impl MemoryStore {
        pub fn new(items: Vec<Item>) -> Self {
            Self {
                items,
                ..Default::default()
            }
        }

        /// Fail the next `failures` listings, then succeed
        pub fn failing_first(items: Vec<Item>, failures: usize) -> Self {
            let store = Self::new(items);
            *store.script.lock() = vec![false; failures];
            store
        }

        pub fn calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn list_items(&self, limit: Option<usize>) -> StoreResult<Vec<Item>> {
            let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(hook) = &self.on_list {
                hook(call);
            }

            let succeed = {
                let mut script = self.script.lock();
                if script.is_empty() {
                    true
                } else {
                    script.remove(0)
                }
            };
            if !succeed {
                return Err(StoreError::ConnectionFailed("simulated outage".to_string()));
            }

            let limit = limit.unwrap_or(self.items.len());
            Ok(self.items.iter().take(limit).cloned().collect())
        }

        async fn download(&self, item: &Item) -> StoreResult<Vec<u8>> {
            self.archives
                .get(&item.id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(item.id.clone()))
        }
    }

    #[tokio::test]
    async fn test_path_of_walks_store_listing() {
        let store = MemoryStore::new(vec![
            Item::folder("f1", "Work"),
            Item::document("d1", "Notes").with_parent("f1"),
        ]);

        let path = store.path_of(&store.items[1]).await.unwrap();
        assert_eq!(path, "/Work/Notes");
    }
}

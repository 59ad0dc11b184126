//! xochitl data directory store
//!
//! Reads the tablet's raw document directory, either copied locally or
//! mounted over SSH (`/home/root/.local/share/remarkable/xochitl`).
//!
//! Layout:
//! - `{id}.metadata`: JSON with `visibleName`, `type`, `parent`, `lastModified`
//! - `{id}.content`, `{id}.pdf`, `{id}.epub`, ...: per-document files
//! - `{id}/`: page files (`{page}.rm`, `{page}-metadata.json`)

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{StoreError, StoreResult};

use super::types::{item_type, Item};
use super::DocumentStore;

/// Parent value of items moved to the trash
const TRASH_PARENT: &str = "trash";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct XochitlMetadata {
    visible_name: String,
    #[serde(rename = "type")]
    doc_type: String,
    #[serde(default)]
    parent: String,
    /// Milliseconds since the epoch, encoded as a string
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default)]
    deleted: bool,
}

impl XochitlMetadata {
    fn into_item(self, id: String) -> Item {
        let modified_at = self
            .last_modified
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Item {
            id,
            display_name: self.visible_name,
            is_folder: self.doc_type == item_type::COLLECTION,
            parent_id: (!self.parent.is_empty()).then_some(self.parent),
            modified_at,
        }
    }
}

/// Document store backed by a xochitl directory
pub struct XochitlStore {
    root: PathBuf,
}

impl XochitlStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_items(root: &Path) -> StoreResult<Vec<Item>> {
        let mut items = Vec::new();

        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("metadata") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let metadata: XochitlMetadata = match std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_slice(&raw).map_err(|e| e.to_string()))
            {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!("Skipping unreadable metadata {}: {}", path.display(), e);
                    continue;
                }
            };

            if metadata.deleted || metadata.parent == TRASH_PARENT {
                continue;
            }
            items.push(metadata.into_item(id));
        }

        // Directory order is arbitrary; keep listings stable between calls
        items.sort_by(|a, b| {
            b.is_folder
                .cmp(&a.is_folder)
                .then_with(|| a.display_name.cmp(&b.display_name))
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(items)
    }

    fn pack_document(root: &Path, id: &str) -> StoreResult<Vec<u8>> {
        let mut files: Vec<(String, PathBuf)> = Vec::new();

        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if path.is_file() && name.starts_with(&format!("{}.", id)) {
                files.push((name.to_string(), path.clone()));
            }
        }

        let page_dir = root.join(id);
        if page_dir.is_dir() {
            collect_files(&page_dir, id, &mut files)?;
        }

        if files.is_empty() {
            return Err(StoreError::NotFound(format!("No files for document {}", id)));
        }
        files.sort();

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, path) in files {
            writer
                .start_file(name, SimpleFileOptions::default())
                .map_err(|e| StoreError::InvalidResponse(format!("Failed to pack {}: {}", id, e)))?;
            writer.write_all(&std::fs::read(&path)?)?;
        }
        let cursor = writer
            .finish()
            .map_err(|e| StoreError::InvalidResponse(format!("Failed to pack {}: {}", id, e)))?;

        Ok(cursor.into_inner())
    }
}

fn collect_files(dir: &Path, prefix: &str, out: &mut Vec<(String, PathBuf)>) -> StoreResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let archive_name = format!("{}/{}", prefix, name);
        if path.is_dir() {
            collect_files(&path, &archive_name, out)?;
        } else {
            out.push((archive_name, path));
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for XochitlStore {
    fn name(&self) -> &'static str {
        "xochitl"
    }

    async fn list_items(&self, limit: Option<usize>) -> StoreResult<Vec<Item>> {
        let root = self.root.clone();
        let mut items = tokio::task::spawn_blocking(move || Self::read_items(&root))
            .await
            .map_err(|e| StoreError::RequestFailed(format!("Listing task failed: {}", e)))??;

        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn download(&self, item: &Item) -> StoreResult<Vec<u8>> {
        let root = self.root.clone();
        let id = item.id.clone();
        tokio::task::spawn_blocking(move || Self::pack_document(&root, &id))
            .await
            .map_err(|e| StoreError::RequestFailed(format!("Download task failed: {}", e)))?
    }
}

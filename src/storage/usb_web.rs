//! USB web interface client
//!
//! Talks to the HTTP interface the tablet exposes over USB once
//! "USB web interface" is enabled (Settings → Storage). No developer mode
//! is required.
//!
//! - `/documents/` lists the root, `/documents/{id}` a folder
//! - `/download/{id}/rmdoc` returns the raw document archive (firmware 3.9+)
//! - `/download/{id}/pdf` returns a PDF export

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

use super::types::{item_type, Item};
use super::DocumentStore;

const DOCUMENTS_URL: &str = "/documents/";

/// A listing entry as returned by the USB web interface
#[derive(Debug, Deserialize)]
struct UsbEntry {
    #[serde(rename = "ID")]
    id: String,
    // The misspelling is the device's
    #[serde(rename = "VissibleName")]
    visible_name: Option<String>,
    #[serde(rename = "Type")]
    doc_type: Option<String>,
    #[serde(rename = "ModifiedClient")]
    modified_client: Option<String>,
}

impl UsbEntry {
    fn into_item(self, parent_id: &str) -> Item {
        let modified_at = self.modified_client.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });

        Item {
            display_name: self.visible_name.unwrap_or_else(|| self.id.clone()),
            is_folder: self.doc_type.as_deref() == Some(item_type::COLLECTION),
            parent_id: (!parent_id.is_empty()).then(|| parent_id.to_string()),
            modified_at,
            id: self.id,
        }
    }
}

/// USB web interface client
pub struct UsbWebClient {
    client: reqwest::Client,
    host: String,
    /// Complete listing from the last full walk
    cache: Mutex<Option<Vec<Item>>>,
}

impl UsbWebClient {
    /// Create a new client from configuration
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.usb_timeout_secs))
            .build()
            .map_err(|e| StoreError::ConnectionFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host: config.usb_host.trim_end_matches('/').to_string(),
            cache: Mutex::new(None),
        })
    }

    /// Get the base URL
    pub fn host(&self) -> &str {
        &self.host
    }

    async fn request(&self, endpoint: &str) -> StoreResult<reqwest::Response> {
        let url = format!("{}{}", self.host, endpoint);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(
                    "USB web interface request timed out. Make sure USB web interface is \
                     enabled on your reMarkable (Settings → Storage → USB web interface)"
                        .to_string(),
                )
            } else if e.is_connect() {
                StoreError::ConnectionFailed(format!(
                    "Cannot connect to USB web interface at {}. Make sure the tablet is \
                     connected via USB, the USB web interface is enabled, and the device \
                     is on and unlocked",
                    self.host
                ))
            } else {
                StoreError::RequestFailed(format!("USB web interface request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(endpoint.to_string()));
        }
        if !status.is_success() {
            return Err(StoreError::RequestFailed(format!(
                "USB web interface returned {} for {}",
                status, endpoint
            )));
        }

        Ok(response)
    }

    async fn list_folder(&self, url: &str) -> StoreResult<Vec<UsbEntry>> {
        self.request(url)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(format!("Failed to parse listing {}: {}", url, e)))
    }
}

#[async_trait]
impl DocumentStore for UsbWebClient {
    fn name(&self) -> &'static str {
        "usb"
    }

    async fn list_items(&self, limit: Option<usize>) -> StoreResult<Vec<Item>> {
        if let Some(cached) = self.cache.lock().as_ref() {
            let take = limit.unwrap_or(cached.len()).min(cached.len());
            return Ok(cached[..take].to_vec());
        }

        let mut items = Vec::new();
        let mut queue: VecDeque<(String, String)> =
            VecDeque::from([(String::new(), DOCUMENTS_URL.to_string())]);
        let mut visited = HashSet::new();
        let mut truncated = false;

        // Breadth-first walk, so a folder is always listed before its children
        'walk: while let Some((parent_id, url)) = queue.pop_front() {
            if !visited.insert(url.clone()) {
                continue;
            }

            let entries = match self.list_folder(&url).await {
                Ok(entries) => entries,
                // The root listing failing means the device is unreachable
                Err(e) if parent_id.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!("Failed to fetch documents from {}: {}", url, e);
                    continue;
                }
            };

            for entry in entries {
                let item = entry.into_item(&parent_id);
                if item.is_folder {
                    queue.push_back((item.id.clone(), format!("/documents/{}", item.id)));
                }
                items.push(item);

                if limit.is_some_and(|limit| items.len() >= limit) {
                    truncated = true;
                    break 'walk;
                }
            }
        }

        if !truncated {
            tracing::info!("Loaded {} items via USB web interface", items.len());
            *self.cache.lock() = Some(items.clone());
        }

        Ok(items)
    }

    async fn download(&self, item: &Item) -> StoreResult<Vec<u8>> {
        let endpoint = format!("/download/{}/rmdoc", item.id);

        let response = match self.request(&endpoint).await {
            Ok(response) => response,
            Err(StoreError::NotFound(_)) => {
                tracing::debug!("rmdoc format not available for {}, trying PDF", item.id);
                self.request(&format!("/download/{}/pdf", item.id))
                    .await
                    .map_err(|e| {
                        StoreError::RequestFailed(format!(
                            "Failed to download document {}: {}",
                            item.id, e
                        ))
                    })?
            }
            Err(e) => return Err(e),
        };

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StoreError::RequestFailed(format!("Failed to read download body: {}", e)))?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry() {
        let json = r#"[
            {"ID": "f1", "VissibleName": "Work", "Type": "CollectionType"},
            {"ID": "d1", "VissibleName": "Notes", "Type": "DocumentType",
             "ModifiedClient": "2024-03-01T10:00:00Z"},
            {"ID": "d2"}
        ]"#;
        let entries: Vec<UsbEntry> = serde_json::from_str(json).unwrap();
        let items: Vec<Item> = entries.into_iter().map(|e| e.into_item("f1")).collect();

        assert!(items[0].is_folder);
        assert_eq!(items[1].parent_id.as_deref(), Some("f1"));
        assert_eq!(
            items[1].modified_at.unwrap().to_rfc3339(),
            "2024-03-01T10:00:00+00:00"
        );
        assert_eq!(items[2].display_name, "d2");
        assert!(!items[2].is_folder);
    }

    #[test]
    fn test_root_entries_have_no_parent() {
        let entry: UsbEntry = serde_json::from_str(r#"{"ID": "d1", "VissibleName": "Notes"}"#).unwrap();
        assert_eq!(entry.into_item("").parent_id, None);
    }

    #[test]
    fn test_host_trailing_slash_trimmed() {
        let config = StoreConfig {
            transport: crate::config::Transport::Usb,
            usb_host: "http://10.11.99.1/".to_string(),
            usb_timeout_secs: 5,
            data_dir: Default::default(),
        };
        let client = UsbWebClient::new(&config).unwrap();
        assert_eq!(client.host(), "http://10.11.99.1");
    }
}

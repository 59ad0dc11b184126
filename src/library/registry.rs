//! Document resource registry
//!
//! Maps every registered document to one `remarkable://` resource URI. The
//! registry lives for the whole process and is rebuilt on each start.
//!
//! # Invariants
//!
//! - an item id is registered at most once
//! - a URI is handed out at most once
//!
//! Both membership sets are checked and updated inside a single write
//! section, so a reader never sees an id without its URI or the reverse.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::storage::Item;

use super::path::{resolve_path, PathIndex};

pub const URI_SCHEME: &str = "remarkable://";
pub const DOCUMENT_SUFFIX: &str = ".txt";

/// A document exposed as a resource
#[derive(Debug, Clone, Serialize)]
pub struct RegistryEntry {
    pub item_id: String,
    pub uri: String,
    pub label: String,
    pub description: String,
    pub path: String,
    /// Snapshot used to fetch content when the resource is read
    #[serde(skip)]
    pub item: Item,
}

#[derive(Default)]
struct RegistryInner {
    ids: HashSet<String>,
    /// URI set, mapping to the slot in `entries`
    uris: HashMap<String, usize>,
    /// Registration order
    entries: Vec<RegistryEntry>,
}

/// In-memory document registry, cheap to clone
#[derive(Clone, Default)]
pub struct DocumentRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

/// Percent-encode each path segment, keeping the separators
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Candidate resource URI for a document path
pub fn document_uri(path: &str) -> String {
    format!("{}{}{}", URI_SCHEME, encode_path(path), DOCUMENT_SUFFIX)
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document under a collision-free URI.
    ///
    /// Returns `false` when the item is a folder or already registered; an
    /// existing registration is never altered.
    pub fn register_document(&self, item: &Item, index: &PathIndex) -> bool {
        if item.is_folder {
            tracing::debug!(item_id = %item.id, "Not registering folder");
            return false;
        }
        if item.id.is_empty() {
            tracing::warn!(name = %item.display_name, "Skipping document without id");
            return false;
        }

        let path = resolve_path(item, index);
        let stem = format!("{}{}", URI_SCHEME, encode_path(&path));

        let mut inner = self.inner.write();
        if inner.ids.contains(&item.id) {
            return false;
        }

        let mut uri = format!("{}{}", stem, DOCUMENT_SUFFIX);
        let mut label = item.display_name.clone();
        let mut n = 0;
        while inner.uris.contains_key(&uri) {
            n += 1;
            uri = format!("{}_{}{}", stem, n, DOCUMENT_SUFFIX);
            label = format!("{}_{}", item.display_name, n);
        }

        let mut description = format!("Path: {}", path);
        if let Some(modified) = item.modified_at {
            description.push_str(&format!(" | Modified: {}", modified.to_rfc3339()));
        }

        let slot = inner.entries.len();
        inner.ids.insert(item.id.clone());
        inner.uris.insert(uri.clone(), slot);
        inner.entries.push(RegistryEntry {
            item_id: item.id.clone(),
            uri: uri.clone(),
            label,
            description,
            path,
            item: item.clone(),
        });

        tracing::debug!(item_id = %item.id, %uri, "Registered document");
        true
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_item(&self, item_id: &str) -> bool {
        self.inner.read().ids.contains(item_id)
    }

    /// All entries in registration order
    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.inner.read().entries.clone()
    }

    pub fn get_by_uri(&self, uri: &str) -> Option<RegistryEntry> {
        let inner = self.inner.read();
        inner.uris.get(uri).map(|&slot| inner.entries[slot].clone())
    }

    pub fn uri_for(&self, item_id: &str) -> Option<String> {
        self.inner
            .read()
            .entries
            .iter()
            .find(|entry| entry.item_id == item_id)
            .map(|entry| entry.uri.clone())
    }

    /// Sizes of the id set and the URI set
    pub fn set_sizes(&self) -> (usize, usize) {
        let inner = self.inner.read();
        (inner.ids.len(), inner.uris.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::path::build_path_index;

    #[test]
    fn test_uri_encodes_segments_and_keeps_separators() {
        assert_eq!(
            document_uri("/Work/Q1 Notes"),
            "remarkable:///Work/Q1%20Notes.txt"
        );
    }

    #[test]
    fn test_register_twice_is_noop() {
        let registry = DocumentRegistry::new();
        let item = Item::document("d1", "Notes");
        let index = PathIndex::new();

        assert!(registry.register_document(&item, &index));
        let uri = registry.uri_for("d1").unwrap();

        // Same id, different name: still a no-op
        let renamed = Item::document("d1", "Renamed");
        assert!(!registry.register_document(&renamed, &index));
        assert!(!registry.register_document(&item, &index));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.uri_for("d1").unwrap(), uri);
    }

    #[test]
    fn test_collisions_get_numbered_in_call_order() {
        let registry = DocumentRegistry::new();
        let items = vec![
            Item::folder("f1", "Work"),
            Item::folder("f2", "Work"),
            Item::document("a", "Notes").with_parent("f1"),
            Item::document("b", "Notes").with_parent("f2"),
            Item::document("c", "Notes").with_parent("f1"),
        ];
        let index = build_path_index(&items);

        for item in &items {
            registry.register_document(item, &index);
        }

        let entries = registry.entries();
        let uris: Vec<&str> = entries.iter().map(|e| e.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "remarkable:///Work/Notes.txt",
                "remarkable:///Work/Notes_1.txt",
                "remarkable:///Work/Notes_2.txt",
            ]
        );
        assert_eq!(entries[1].label, "Notes_1");
        assert_eq!(entries[2].label, "Notes_2");
    }

    #[test]
    fn test_uris_unique_under_repeated_registration() {
        let registry = DocumentRegistry::new();
        let items: Vec<Item> = (0..20)
            .map(|i| Item::document(format!("d{}", i), format!("Doc {}", i % 3)))
            .collect();
        let index = build_path_index(&items);

        for _ in 0..3 {
            for item in &items {
                registry.register_document(item, &index);
            }
        }

        let entries = registry.entries();
        let uris: HashSet<&str> = entries.iter().map(|e| e.uri.as_str()).collect();
        assert_eq!(entries.len(), 20);
        assert_eq!(uris.len(), 20);
        assert_eq!(registry.set_sizes(), (20, 20));
    }

    #[test]
    fn test_folders_not_registered() {
        let registry = DocumentRegistry::new();
        assert!(!registry.register_document(&Item::folder("f1", "Work"), &PathIndex::new()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_description_and_lookup() {
        let registry = DocumentRegistry::new();
        let modified = chrono::DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let item = Item::document("d1", "Notes").with_modified(modified);

        registry.register_document(&item, &PathIndex::new());

        let entry = registry.get_by_uri("remarkable:///Notes.txt").unwrap();
        assert_eq!(entry.item_id, "d1");
        assert_eq!(
            entry.description,
            "Path: /Notes | Modified: 2024-03-01T10:00:00+00:00"
        );
        assert!(registry.get_by_uri("remarkable:///Other.txt").is_none());
    }
}

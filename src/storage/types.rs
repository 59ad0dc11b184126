//! Storage types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A folder or document on the tablet
///
/// Every store adapter translates its native listing into this shape once,
/// at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub display_name: String,
    pub is_folder: bool,
    /// Containing folder; `None` for items at the root
    pub parent_id: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn document(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_folder: false,
            parent_id: None,
            modified_at: None,
        }
    }

    pub fn folder(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            is_folder: true,
            ..Self::document(id, display_name)
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        let parent_id = parent_id.into();
        self.parent_id = (!parent_id.is_empty()).then_some(parent_id);
        self
    }

    pub fn with_modified(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }
}

/// reMarkable item type tags shared by the USB interface and xochitl metadata
pub mod item_type {
    pub const DOCUMENT: &str = "DocumentType";
    pub const COLLECTION: &str = "CollectionType";
}

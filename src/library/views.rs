//! Aggregate views over the item listing
//!
//! JSON payloads for `remarkable://folders` and `remarkable://recent`, name
//! completion, and "did you mean" suggestions.

use serde::Serialize;

use crate::storage::Item;

use super::path::{build_path_index, resolve_path};

pub const RECENT_LIMIT: usize = 10;
pub const COMPLETION_LIMIT: usize = 50;
pub const SUGGESTION_LIMIT: usize = 5;

/// Minimum score for a suggestion
const SIMILARITY_THRESHOLD: f64 = 0.3;
/// Added when the query is a substring of the name
const SUBSTRING_BOOST: f64 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct FolderSummary {
    pub name: String,
    pub path: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderList {
    pub folders: Vec<FolderSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentDocument {
    pub name: String,
    pub path: String,
    pub id: String,
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentList {
    pub documents: Vec<RecentDocument>,
}

/// All folders, sorted by path
pub fn folders_view(items: &[Item]) -> FolderList {
    let index = build_path_index(items);
    let mut folders: Vec<FolderSummary> = items
        .iter()
        .filter(|item| item.is_folder)
        .map(|item| FolderSummary {
            name: item.display_name.clone(),
            path: resolve_path(item, &index),
            id: item.id.clone(),
        })
        .collect();
    folders.sort_by(|a, b| a.path.cmp(&b.path));

    FolderList { folders }
}

/// Most recently modified documents, newest first; undated documents sort
/// as oldest.
pub fn recent_view(items: &[Item], limit: usize) -> RecentList {
    let index = build_path_index(items);
    let mut documents: Vec<&Item> = items.iter().filter(|item| !item.is_folder).collect();
    documents.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));

    RecentList {
        documents: documents
            .into_iter()
            .take(limit)
            .map(|item| RecentDocument {
                name: item.display_name.clone(),
                path: resolve_path(item, &index),
                id: item.id.clone(),
                modified: item.modified_at.map(|dt| dt.to_rfc3339()),
            })
            .collect(),
    }
}

/// Completion values for a partial document name
pub fn complete_document_names(items: &[Item], partial: &str) -> Vec<String> {
    let partial = partial.to_lowercase();
    let mut names: Vec<String> = items
        .iter()
        .filter(|item| !item.is_folder)
        .filter(|item| partial.is_empty() || item.display_name.to_lowercase().contains(&partial))
        .map(|item| item.display_name.clone())
        .collect();
    names.sort();
    names.truncate(COMPLETION_LIMIT);
    names
}

/// Names similar to `query`, best first
pub fn find_similar_documents<'a, I>(query: &str, names: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let query = query.to_lowercase();
    let mut scored: Vec<(&str, f64)> = names
        .into_iter()
        .map(|name| {
            let lower = name.to_lowercase();
            let mut score = strsim::normalized_levenshtein(&query, &lower);
            if lower.contains(&query) {
                score += SUBSTRING_BOOST;
            }
            (name, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
        .into_iter()
        .filter(|(_, score)| *score > SIMILARITY_THRESHOLD)
        .take(limit)
        .map(|(name, _)| name.to_string())
        .collect()
}

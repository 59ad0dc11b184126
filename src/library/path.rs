//! Path resolution over the item tree

use std::collections::{HashMap, HashSet};

use crate::storage::Item;

/// Items keyed by id, used to walk parent links
pub type PathIndex = HashMap<String, Item>;

pub fn build_path_index(items: &[Item]) -> PathIndex {
    items
        .iter()
        .map(|item| (item.id.clone(), item.clone()))
        .collect()
}

/// Resolve the full path of an item, e.g. `/Work/Meetings/Standup`.
///
/// A parent missing from the index is treated as the root. A parent cycle
/// stops the walk at the first repeated id.
pub fn resolve_path(item: &Item, index: &PathIndex) -> String {
    let mut segments = vec![item.display_name.as_str()];
    let mut seen = HashSet::from([item.id.as_str()]);
    let mut parent = item.parent_id.as_deref();

    while let Some(parent_id) = parent.filter(|id| !id.is_empty()) {
        if !seen.insert(parent_id) {
            tracing::warn!(item_id = %item.id, parent_id, "Cycle in folder hierarchy");
            break;
        }
        let Some(folder) = index.get(parent_id) else {
            break;
        };
        segments.push(folder.display_name.as_str());
        parent = folder.parent_id.as_deref();
    }

    segments.reverse();
    format!("/{}", segments.join("/"))
}

/// Find an item by full path; `/` alone never matches.
pub fn find_by_path<'a>(items: &'a [Item], index: &PathIndex, path: &str) -> Option<&'a Item> {
    let wanted = format!("/{}", path.trim().trim_matches('/'));
    items.iter().find(|item| resolve_path(item, index) == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_path() {
        let items = vec![
            Item::folder("f1", "Work"),
            Item::folder("f2", "Meetings").with_parent("f1"),
            Item::document("d1", "Standup").with_parent("f2"),
        ];
        let index = build_path_index(&items);

        assert_eq!(resolve_path(&items[2], &index), "/Work/Meetings/Standup");
        assert_eq!(resolve_path(&items[0], &index), "/Work");
    }

    #[test]
    fn test_unknown_parent_is_root_anchored() {
        let item = Item::document("d1", "Orphan").with_parent("missing");
        let index = PathIndex::new();

        assert_eq!(resolve_path(&item, &index), "/Orphan");
    }

    #[test]
    fn test_cycle_terminates() {
        let items = vec![
            Item::folder("a", "A").with_parent("b"),
            Item::folder("b", "B").with_parent("a"),
            Item::document("d", "Doc").with_parent("a"),
        ];
        let index = build_path_index(&items);

        assert_eq!(resolve_path(&items[2], &index), "/B/A/Doc");
    }

    #[test]
    fn test_find_by_path() {
        let items = vec![
            Item::folder("f1", "Work"),
            Item::document("d1", "Notes").with_parent("f1"),
        ];
        let index = build_path_index(&items);

        assert_eq!(find_by_path(&items, &index, "Work/Notes/").map(|i| i.id.as_str()), Some("d1"));
        assert!(find_by_path(&items, &index, "/").is_none());
    }
}

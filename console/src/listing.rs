//! Paging and multi-selection over list rows.

use std::collections::BTreeSet;

use shared_types::{Context, SpamEmail};

/// Rows `page * per_page .. page * per_page + per_page`, clamped to the input.
pub fn paginate<T>(rows: &[T], page: usize, per_page: usize) -> &[T] {
    let start = page.saturating_mul(per_page).min(rows.len());
    let end = start.saturating_add(per_page).min(rows.len());
    &rows[start..end]
}

/// Number of pages needed for `total` rows; at least one.
pub fn page_count(total: usize, per_page: usize) -> usize {
    if per_page == 0 {
        return 1;
    }
    total.div_ceil(per_page).max(1)
}

/// Oldest first; rows without a timestamp sort before dated ones.
pub fn sort_contexts(contexts: &mut [Context]) {
    contexts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
}

/// Newest first; undated rows go last.
pub fn sort_spams(spams: &mut [SpamEmail]) {
    spams.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Keep rows whose subject contains `query`, ignoring case. A blank query
/// keeps everything.
pub fn search_spams(spams: Vec<SpamEmail>, query: &str) -> Vec<SpamEmail> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return spams;
    }
    spams
        .into_iter()
        .filter(|s| {
            s.subject
                .as_deref()
                .is_some_and(|subject| subject.to_lowercase().contains(&needle))
        })
        .collect()
}

/// Set of selected row keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection<K: Ord> {
    selected: BTreeSet<K>,
}

impl<K: Ord + Clone> Selection<K> {
    pub fn new() -> Self {
        Self {
            selected: BTreeSet::new(),
        }
    }

    pub fn select_one(&mut self, key: K) {
        self.selected.insert(key);
    }

    pub fn deselect_one(&mut self, key: &K) {
        self.selected.remove(key);
    }

    pub fn select_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a K>)
    where
        K: 'a,
    {
        self.selected.extend(keys.into_iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.selected.iter()
    }
}

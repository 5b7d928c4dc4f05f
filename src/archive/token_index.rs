use std::collections::{HashMap, HashSet};

use unicode_segmentation::UnicodeSegmentation;

use super::models::ArchivedNotification;

/// Lowercased words of `text`, per Unicode word boundaries.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

fn searchable_tokens(entry: &ArchivedNotification) -> HashSet<String> {
    let n = &entry.notification;
    let mut tokens: HashSet<String> = tokenize(&n.title).into_iter().collect();
    tokens.extend(tokenize(&n.message));
    tokens.extend(tokenize(n.notification_type.as_str()));
    tokens.insert(n.notification_type.as_str().to_lowercase());
    if let Some(group) = &n.group {
        tokens.extend(tokenize(group));
    }
    tokens
}

/// Inverted index token -> archive ids.
#[derive(Debug, Default)]
pub struct TokenIndex {
    postings: HashMap<String, HashSet<String>>,
}

impl TokenIndex {
    pub fn insert(&mut self, entry: &ArchivedNotification) {
        for token in searchable_tokens(entry) {
            self.postings
                .entry(token)
                .or_default()
                .insert(entry.archive_id.clone());
        }
    }

    pub fn remove(&mut self, entry: &ArchivedNotification) {
        for token in searchable_tokens(entry) {
            if let Some(ids) = self.postings.get_mut(&token) {
                ids.remove(&entry.archive_id);
                if ids.is_empty() {
                    self.postings.remove(&token);
                }
            }
        }
    }

    /// Ids containing every token of `text`. `None` when `text` has no tokens.
    pub fn search(&self, text: &str) -> Option<HashSet<String>> {
        let tokens = tokenize(text);
        let mut tokens = tokens.iter();
        let first = tokens.next()?;
        let mut ids = self.postings.get(first).cloned().unwrap_or_default();
        for token in tokens {
            match self.postings.get(token) {
                Some(postings) => ids.retain(|id| postings.contains(id)),
                None => return Some(HashSet::new()),
            }
        }
        Some(ids)
    }

    pub fn token_count(&self) -> usize {
        self.postings.len()
    }
}

//! Keyword search over a framework's cached documents.

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::cache::{CacheKey, TieredCache};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Excerpt {
    pub key: CacheKey,
    /// Byte offset of the match within the cached content.
    pub position: usize,
    pub text: String,
    pub source_url: String,
}

/// Finds `query` (case-insensitive) in every live cached entry of
/// `framework`. Entries are visited in section order and matches in
/// position order; at most `limit` excerpts of `radius` characters of
/// context on each side are returned. Nothing cached means no excerpts.
pub async fn search_cached(
    store: &TieredCache,
    framework: &str,
    query: &str,
    limit: usize,
    radius: usize,
) -> Vec<Excerpt> {
    let query = query.trim();
    if query.is_empty() || limit == 0 {
        return Vec::new();
    }
    let pattern = match RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
    {
        Ok(pattern) => pattern,
        Err(e) => {
            tracing::warn!("Cannot search for {:?}: {}", query, e);
            return Vec::new();
        }
    };

    let mut keys = store.known_keys(framework);
    keys.sort_by(|a, b| {
        let a = (a.selector.as_deref().unwrap_or(""), a.kind);
        let b = (b.selector.as_deref().unwrap_or(""), b.kind);
        a.cmp(&b)
    });

    let mut excerpts = Vec::new();
    for key in keys {
        let Some(entry) = store.get(&key).await else {
            continue;
        };
        for (position, text) in excerpts_in(&entry.content, &pattern, radius) {
            excerpts.push(Excerpt {
                key: key.clone(),
                position,
                text,
                source_url: entry.origin.source_url.clone(),
            });
            if excerpts.len() == limit {
                return excerpts;
            }
        }
    }
    excerpts
}

/// One window per match; matches already inside the previous window are skipped.
fn excerpts_in(content: &str, pattern: &Regex, radius: usize) -> Vec<(usize, String)> {
    let mut windows = Vec::new();
    let mut covered_until = 0;

    for found in pattern.find_iter(content) {
        if !windows.is_empty() && found.start() < covered_until {
            continue;
        }
        let start = back_chars(content, found.start(), radius);
        let end = forward_chars(content, found.end(), radius);

        let mut text = content[start..end].trim().to_string();
        if start > 0 {
            text.insert_str(0, "...");
        }
        if end < content.len() {
            text.push_str("...");
        }
        windows.push((found.start(), text));
        covered_until = end;
    }
    windows
}

fn back_chars(content: &str, from: usize, count: usize) -> usize {
    if count == 0 {
        return from;
    }
    content[..from]
        .char_indices()
        .rev()
        .nth(count - 1)
        .map_or(0, |(index, _)| index)
}

fn forward_chars(content: &str, from: usize, count: usize) -> usize {
    content[from..]
        .char_indices()
        .nth(count)
        .map_or(content.len(), |(offset, _)| from + offset)
}

//! URL frontier: pending and visited URL tracking for one crawl run
//!
//! The frontier performs no I/O. All URL comparisons go through the same
//! normalization used for insertion, so logically-equal URLs (trailing
//! slash, fragment, scheme/host casing) occupy a single slot.

use super::normalize_url;
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use url::Url;

/// A URL queued for crawling, with the depth it was discovered at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: u32,
}

/// FIFO frontier with visited-set deduplication
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<FrontierEntry>,
    queued: HashSet<String>,
    visited: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a URL unless it is invalid, already queued, or already
    /// visited. Returns true if the URL was inserted.
    pub fn add(&mut self, url: &str, depth: u32) -> bool {
        let Some(normalized) = valid_normalized(url) else {
            return false;
        };
        if self.visited.contains(&normalized) || self.queued.contains(&normalized) {
            return false;
        }
        self.queued.insert(normalized);
        self.queue.push_back(FrontierEntry {
            url: url.to_string(),
            depth,
        });
        true
    }

    /// Batched [`Frontier::add`]; returns how many entries were inserted.
    pub fn add_bulk<I, S>(&mut self, urls: I, depth: u32) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .filter(|u| self.add(u.as_ref(), depth))
            .count()
    }

    /// Remove and return the earliest-inserted unvisited entry
    pub fn get_next(&mut self) -> Option<FrontierEntry> {
        let entry = self.queue.pop_front()?;
        self.queued.remove(&normalize_url(&entry.url));
        Some(entry)
    }

    /// Move a URL to the visited set; subsequent `add` calls for it are no-ops
    pub fn mark_visited(&mut self, url: &str) {
        let normalized = normalize_url(url);
        if self.queued.remove(&normalized) {
            self.queue.retain(|e| normalize_url(&e.url) != normalized);
        }
        self.visited.insert(normalized);
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(&normalize_url(url))
    }

    /// Re-order pending entries by ascending discovery depth (stable, so
    /// siblings keep their FIFO order)
    pub fn prioritize(&mut self) {
        self.prioritize_by(|a, b| a.depth.cmp(&b.depth));
    }

    /// Re-order pending entries with a caller-supplied comparator
    pub fn prioritize_by<F>(&mut self, cmp: F)
    where
        F: FnMut(&FrontierEntry, &FrontierEntry) -> Ordering,
    {
        self.queue.make_contiguous().sort_by(cmp);
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop all pending and visited state
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued.clear();
        self.visited.clear();
    }
}

/// Normalize a URL, rejecting anything that is not an absolute http(s) URL
fn valid_normalized(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.scheme() {
        "http" | "https" => Some(normalize_url(url)),
        _ => None,
    }
}

//! Per-session dedup state: the BFS frontier and the content-hash set.
//!
//! The frontier is owned by the traversal task alone. The content set is
//! shared with download workers and relies on an atomic insert-if-absent,
//! so at most one worker ever stores a given hash.

use std::collections::{HashSet, VecDeque};

use dashmap::DashSet;
use sha2::{Digest, Sha256};
use url::Url;

/// Normalize a page URL for revisit suppression.
///
/// The fragment is always dropped. The query string is dropped when
/// `strip_query` is set, which can merge paginated pages into one.
pub fn normalize_page_url(url: &Url, strip_query: bool) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    if strip_query {
        normalized.set_query(None);
    }
    normalized
}

/// SHA-256 of raw bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Breadth-first worklist of page URLs.
///
/// A URL is enqueued at most once per session; pushing a URL that is queued
/// or already visited is a no-op.
#[derive(Debug)]
pub struct Frontier {
    queue: VecDeque<Url>,
    seen: HashSet<String>,
    strip_query: bool,
    visited: usize,
}

impl Frontier {
    pub fn new(strip_query: bool) -> Self {
        Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
            strip_query,
            visited: 0,
        }
    }

    /// Normalize and enqueue. Returns `false` if the URL was already known.
    pub fn push(&mut self, url: &Url) -> bool {
        let normalized = normalize_page_url(url, self.strip_query);
        if !self.seen.insert(normalized.as_str().to_string()) {
            return false;
        }
        self.queue.push_back(normalized);
        true
    }

    /// Take the next page to visit, counting it as visited.
    pub fn pop(&mut self) -> Option<Url> {
        let next = self.queue.pop_front()?;
        self.visited += 1;
        Some(next)
    }

    /// Record a URL as known without queueing it, such as the page a
    /// redirect actually served.
    pub fn mark_seen(&mut self, url: &Url) {
        let normalized = normalize_page_url(url, self.strip_query);
        self.seen.insert(normalized.as_str().to_string());
    }

    pub fn is_known(&self, url: &Url) -> bool {
        let normalized = normalize_page_url(url, self.strip_query);
        self.seen.contains(normalized.as_str())
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn visited(&self) -> usize {
        self.visited
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Content hashes and image URLs already handled in this session.
#[derive(Debug, Default)]
pub struct ContentDedup {
    hashes: DashSet<String>,
    image_urls: DashSet<String>,
}

impl ContentDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim a hash. Returns `false` if another download holds it.
    pub fn claim_hash(&self, hash: &str) -> bool {
        self.hashes.insert(hash.to_string())
    }

    /// Give a claim back after a failed write so a later copy can be stored.
    pub fn release_hash(&self, hash: &str) {
        self.hashes.remove(hash);
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    pub fn has_url(&self, url: &Url) -> bool {
        self.image_urls.contains(url.as_str())
    }

    pub fn mark_url(&self, url: &Url) {
        self.image_urls.insert(url.as_str().to_string());
    }

    pub fn hash_count(&self) -> usize {
        self.hashes.len()
    }
}

//! Request bookkeeping and byte cache for solid sources.
//!
//! Probing (`request`) only records keys. Bytes arrive when a preload pass
//! walks the stream and `store`s what was asked for. The cache is
//! append-only and lives as long as the source.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct PreloadState {
    pending: HashSet<String>,
    cache: HashMap<String, Arc<[u8]>>,
    /// Keys a completed pass never met in the stream.
    missing: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Cached(Arc<[u8]>),
    /// Requested, waiting for a pass.
    Pending,
    Missing,
}

impl PreloadState {
    pub fn lookup(&self, key: &str) -> Option<Lookup> {
        if let Some(bytes) = self.cache.get(key) {
            return Some(Lookup::Cached(bytes.clone()));
        }
        if self.missing.contains(key) {
            return Some(Lookup::Missing);
        }
        self.pending.contains(key).then_some(Lookup::Pending)
    }

    /// Record interest in `key`. No-op when already cached.
    pub fn request(&mut self, key: &str) {
        if !self.cache.contains_key(key) && !self.missing.contains(key) {
            self.pending.insert(key.to_string());
        }
    }

    pub fn pending_keys(&self) -> HashSet<String> {
        self.pending.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// First store wins; later passes never replace cached bytes.
    pub fn store(&mut self, key: &str, bytes: Vec<u8>) {
        self.pending.remove(key);
        self.cache
            .entry(key.to_string())
            .or_insert_with(|| Arc::from(bytes));
    }

    pub fn mark_missing<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = String>,
    {
        for key in keys {
            self.pending.remove(&key);
            self.missing.insert(key);
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn cached_bytes(&self) -> u64 {
        self.cache.values().map(|b| b.len() as u64).sum()
    }
}

#[cfg(test)]
#[path = "tests/preload_tests.rs"]
mod tests;

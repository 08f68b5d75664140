//! Fingerprint caching module for mediadupe.
//!
//! This module provides persistent storage for signatures, perceptual hashes
//! and similarity clusters so that repeat scans only fingerprint files that
//! actually changed.
//!
//! # Architecture
//!
//! The caching system is split into two main components:
//!
//! * [`database`]: SQLite persistence, schema management and the
//!   [`CacheTable`] contract (bulk read, bulk upsert, bulk delete by key).
//! * [`entry`]: The data models stored in the cache and their staleness checks.
//!
//! # Cache Invalidation
//!
//! Fingerprint entries are keyed by file path and validated against:
//! * File size
//! * Modification time, at whole-second granularity
//!
//! If either attribute changes, or the stored value is malformed, the entry
//! is a miss and the file is fingerprinted again.
//!
//! Similarity clusters are never patched: when a member is stale or gone,
//! [`SimilarityGroupStore::delete_clusters_containing`] drops the whole
//! cluster and its members are re-evaluated.

pub mod database;
pub mod entry;

pub use database::{
    CacheDb, CacheError, CacheResult, CacheTable, PerceptualHashStore, SignatureStore,
    SimilarityGroupStore,
};
pub use entry::{PerceptualHashCacheEntry, SignatureCacheEntry, SimilarityGroupCacheEntry};

//! Cache entry definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::media::MediaItem;
use crate::scanner::{PerceptualHash, Signer};

/// Last known exact-content signature of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureCacheEntry {
    /// File identity (primary key)
    pub path: PathBuf,
    /// Modification time the signature was computed against, in seconds
    pub modified_secs: i64,
    /// File size the signature was computed against
    pub size: u64,
    /// The signature itself
    pub signature: String,
}

impl SignatureCacheEntry {
    /// Record a freshly computed signature for `item`.
    #[must_use]
    pub fn new(item: &MediaItem, signature: impl Into<String>) -> Self {
        Self {
            path: item.path.clone(),
            modified_secs: item.modified_secs(),
            size: item.size,
            signature: signature.into(),
        }
    }

    /// Whether the entry may be reused for the live `item`.
    ///
    /// Requires an exact `(modified, size)` match and a well-formed value.
    #[must_use]
    pub fn is_valid_for(&self, item: &MediaItem) -> bool {
        stamp_matches(self.modified_secs, self.size, item) && Signer::is_well_formed(&self.signature)
    }
}

/// Last known perceptual hash of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptualHashCacheEntry {
    /// File identity (primary key)
    pub path: PathBuf,
    /// Modification time the hash was computed against, in seconds
    pub modified_secs: i64,
    /// File size the hash was computed against
    pub size: u64,
    /// Canonical hex dHash
    pub phash: String,
    /// Colour histogram, images only
    pub histogram: Option<Vec<f32>>,
}

impl PerceptualHashCacheEntry {
    /// Record a freshly computed hash for `item`.
    #[must_use]
    pub fn new(item: &MediaItem, hash: PerceptualHash, histogram: Option<Vec<f32>>) -> Self {
        Self {
            path: item.path.clone(),
            modified_secs: item.modified_secs(),
            size: item.size,
            phash: hash.to_hex(),
            histogram,
        }
    }

    /// The stored hash if the entry is fresh for `item` and well-formed.
    #[must_use]
    pub fn hash_for(&self, item: &MediaItem) -> Option<PerceptualHash> {
        if !stamp_matches(self.modified_secs, self.size, item) {
            return None;
        }
        PerceptualHash::from_hex(&self.phash)
    }
}

/// Membership of one file in one similarity cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimilarityGroupCacheEntry {
    /// Hex perceptual hash of the cluster representative
    pub cluster_key: String,
    /// Member file identity
    pub member: PathBuf,
}

fn stamp_matches(modified_secs: i64, size: u64, item: &MediaItem) -> bool {
    modified_secs == item.modified_secs() && size == item.size
}

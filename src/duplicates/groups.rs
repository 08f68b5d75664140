//! Size partitioning and scan result groups.
//!
//! # Overview
//!
//! Size grouping is the first step of exact duplicate detection: files with
//! different sizes cannot be byte-identical, so only files that share their
//! size with at least one other file are ever hashed.
//!
//! [`ScanResultGroup`] is the unit of output of both engines. Exact groups
//! carry a content signature, similar groups carry the perceptual hash of
//! their representative.
//!
//! # Example
//!
//! ```
//! use mediadupe::media::MediaItem;
//! use mediadupe::duplicates::group_by_size;
//! use std::path::PathBuf;
//! use std::time::SystemTime;
//!
//! let files = vec![
//!     MediaItem::new(PathBuf::from("/a.png"), 1024, SystemTime::now(), false),
//!     MediaItem::new(PathBuf::from("/b.png"), 1024, SystemTime::now(), false),
//!     MediaItem::new(PathBuf::from("/c.png"), 2048, SystemTime::now(), false),
//! ];
//!
//! let (groups, stats) = group_by_size(files);
//!
//! assert_eq!(stats.total_files, 3);
//! assert_eq!(stats.potential_duplicates, 2);
//! assert_eq!(groups.len(), 1);
//! ```

use growable_bloom_filter::GrowableBloom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::media::MediaItem;

/// Statistics from the size grouping step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupingStats {
    /// Total number of files processed
    pub total_files: usize,
    /// Total size of all files in bytes
    pub total_size: u64,
    /// Number of distinct non-zero sizes
    pub unique_sizes: usize,
    /// Number of files that could be duplicates (in groups of 2+)
    pub potential_duplicates: usize,
    /// Number of files eliminated because their size is unique
    pub eliminated_unique: usize,
    /// Number of empty files skipped
    pub empty_files: usize,
    /// Number of size groups with 2+ files
    pub duplicate_groups: usize,
}

impl GroupingStats {
    /// Percentage of files eliminated by size grouping.
    #[must_use]
    pub fn elimination_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.eliminated_unique as f64 / self.total_files as f64) * 100.0
        }
    }
}

/// Group files by size.
///
/// Empty files are skipped. Only sizes shared by two or more files are
/// returned.
#[must_use]
pub fn group_by_size(
    files: impl IntoIterator<Item = MediaItem>,
) -> (HashMap<u64, Vec<MediaItem>>, GroupingStats) {
    let mut all_groups: HashMap<u64, Vec<MediaItem>> = HashMap::new();
    let mut stats = GroupingStats::default();

    for file in files {
        stats.total_files += 1;
        stats.total_size += file.size;

        if file.size == 0 {
            stats.empty_files += 1;
            log::trace!("Skipping empty file: {}", file.path.display());
            continue;
        }

        all_groups.entry(file.size).or_default().push(file);
    }

    stats.unique_sizes = all_groups.len();

    let filtered: HashMap<u64, Vec<MediaItem>> = all_groups
        .into_iter()
        .filter(|(size, files)| {
            if files.len() == 1 {
                stats.eliminated_unique += 1;
                log::trace!(
                    "Eliminated unique size {}: {}",
                    size,
                    files[0].path.display()
                );
                false
            } else {
                stats.potential_duplicates += files.len();
                stats.duplicate_groups += 1;
                true
            }
        })
        .collect();

    log::debug!(
        "Size grouping: {} files -> {} potential duplicates ({:.1}% eliminated)",
        stats.total_files,
        stats.potential_duplicates,
        stats.elimination_rate()
    );

    (filtered, stats)
}

/// Single streaming pass that sets aside files whose size has not been seen
/// twice, using a Bloom filter of seen sizes.
///
/// Returns `(candidates, singles)`. Bloom false positives only move a unique
/// file into `candidates`, where [`group_by_size`] eliminates it exactly;
/// no duplicate is ever placed in `singles`.
#[must_use]
pub fn prefilter_sizes(
    files: impl IntoIterator<Item = MediaItem>,
    fp_rate: f64,
    expected: usize,
) -> (Vec<MediaItem>, Vec<MediaItem>) {
    let mut seen_sizes = GrowableBloom::new(fp_rate, expected.max(16));
    let mut first_occurrences: HashMap<u64, MediaItem> = HashMap::new();
    let mut candidates = Vec::new();

    for file in files {
        if seen_sizes.contains(file.size) {
            if let Some(first) = first_occurrences.remove(&file.size) {
                candidates.push(first);
            }
            candidates.push(file);
        } else {
            seen_sizes.insert(file.size);
            first_occurrences.insert(file.size, file);
        }
    }

    let singles = first_occurrences.into_values().collect();
    (candidates, singles)
}

/// Byte-identical files sharing one content signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactGroup {
    /// Namespaced content signature
    pub signature: String,
    /// Members, oldest first
    pub files: Vec<MediaItem>,
    /// Size of each member in bytes
    pub size_per_file: u64,
}

/// Perceptually similar files clustered around one representative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarGroup {
    /// Hex perceptual hash of the representative (the cluster key)
    pub phash: String,
    /// Members, oldest first
    pub files: Vec<MediaItem>,
}

/// One group of a scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanResultGroup {
    /// Byte-identical content
    Exact(ExactGroup),
    /// Visually similar content
    Similar(SimilarGroup),
}

impl ScanResultGroup {
    /// Identity of the group, stable across scans of the same content.
    #[must_use]
    pub fn unique_id(&self) -> String {
        match self {
            Self::Exact(g) => format!("exact:{}", g.signature),
            Self::Similar(g) => format!("similar:{}", g.phash),
        }
    }

    /// Signature or perceptual hash the group is keyed by.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Exact(g) => &g.signature,
            Self::Similar(g) => &g.phash,
        }
    }

    /// Member list.
    #[must_use]
    pub fn files(&self) -> &[MediaItem] {
        match self {
            Self::Exact(g) => &g.files,
            Self::Similar(g) => &g.files,
        }
    }

    /// Same group with a different member list.
    #[must_use]
    pub fn with_files(&self, files: Vec<MediaItem>) -> Self {
        match self {
            Self::Exact(g) => Self::Exact(ExactGroup {
                signature: g.signature.clone(),
                files,
                size_per_file: g.size_per_file,
            }),
            Self::Similar(g) => Self::Similar(SimilarGroup {
                phash: g.phash.clone(),
                files,
            }),
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files().len()
    }

    /// Check if this group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files().is_empty()
    }

    /// Whether this is a similarity group.
    #[must_use]
    pub fn is_similar(&self) -> bool {
        matches!(self, Self::Similar(_))
    }

    /// Just the paths of the members.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files().iter().map(|f| f.path.clone()).collect()
    }

    /// Total size of all members.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        match self {
            Self::Exact(g) => g.size_per_file * g.files.len() as u64,
            Self::Similar(g) => g.files.iter().map(|f| f.size).sum(),
        }
    }

    /// Space reclaimed by keeping a single member.
    ///
    /// For similar groups the largest member is assumed to be kept.
    #[must_use]
    pub fn wasted_space(&self) -> u64 {
        if self.len() < 2 {
            return 0;
        }
        match self {
            Self::Exact(g) => g.size_per_file * (g.files.len() as u64 - 1),
            Self::Similar(g) => {
                let largest = g.files.iter().map(|f| f.size).max().unwrap_or(0);
                self.total_size().saturating_sub(largest)
            }
        }
    }
}

/// Sort members oldest first, ties broken by path.
pub(crate) fn sort_oldest_first(files: &mut [MediaItem]) {
    files.sort_by(|a, b| a.age_key().cmp(&b.age_key()));
}

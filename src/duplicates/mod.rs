//! Duplicate and similarity detection.
//!
//! This module provides:
//! - Size-based partitioning and the scan result group types
//! - The exact-duplicate engine (content signatures)
//! - The similarity engine (perceptual hashes and clusters)

pub mod exact;
pub mod groups;
pub mod similar;

pub use exact::{ExactConfig, ExactDuplicateEngine, ExactOutcome, ExactStats};
pub use groups::{
    group_by_size, prefilter_sizes, ExactGroup, GroupingStats, ScanResultGroup, SimilarGroup,
};
pub use similar::{SimilarityConfig, SimilarityEngine, SimilarityOutcome, SimilarityStats};

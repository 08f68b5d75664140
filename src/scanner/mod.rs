//! Fingerprinting of individual media files.
//!
//! This module provides functionality for:
//! - Exact-content signatures (bounded video prefix, downscaled image pixels)
//! - Perceptual difference hashes and colour histograms
//! - Hamming-distance indexing of perceptual hashes
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`signature`]: BLAKE3 exact-content signatures
//! - [`perceptual`]: dHash, Hamming distance, histogram and BK-tree index
//!
//! Everything here works on a single file at a time. Grouping, caching and
//! parallelism live in [`crate::duplicates`].

pub mod perceptual;
pub mod signature;

use std::path::{Path, PathBuf};

// Re-export main types
pub use perceptual::{
    color_histogram, dhash, hamming_distance, histogram_intersection, HashIndex, PerceptualHash,
    DEFAULT_SIMILARITY_THRESHOLD, HASH_BITS, HASH_HEX_LEN,
};
pub use signature::{Signer, IMAGE_SIGNATURE_PREFIX, VIDEO_SIGNATURE_PREFIX};

/// Errors that can occur while reading or decoding a single file.
///
/// These are always local to one file: the engines record the file as
/// unscannable and keep going.
#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file could not be decoded as an image.
    #[error("Failed to decode {path}: {source}")]
    Decode {
        /// Path of the undecodable file
        path: PathBuf,
        /// The underlying decoder error
        #[source]
        source: image::ImageError,
    },
}

impl MediaError {
    /// Classify an I/O error for `path`.
    #[must_use]
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

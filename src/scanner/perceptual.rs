//! Perceptual hashing for similarity detection.
//!
//! This module provides the difference hash (dHash) used to cluster visually
//! similar media, the Hamming distance between two hashes, an optional
//! colour histogram descriptor and a BK-tree index for radius queries.
//!
//! # dHash
//!
//! The decoded image is downscaled to a 9×8 grid and converted to luminance
//! (`0.299 R + 0.587 G + 0.114 B`). For each row, every pixel is compared to
//! its right neighbour and emits `1` when the neighbour is strictly brighter.
//! The 64 bits are packed row by row, most significant bit first, and
//! rendered as 16 lowercase hex digits.
//!
//! The hash tolerates small resizes and brightness shifts. It is not
//! rotation or mirror invariant.

use bk_tree::{BKTree, Metric};
use image::imageops::FilterType;
use image::DynamicImage;
use std::collections::HashMap;
use std::fmt;

/// Width of the dHash sampling grid (one more than the comparisons per row).
pub const DHASH_WIDTH: u32 = 9;
/// Height of the dHash sampling grid.
pub const DHASH_HEIGHT: u32 = 8;
/// Number of bits in a perceptual hash.
pub const HASH_BITS: u32 = DHASH_HEIGHT * (DHASH_WIDTH - 1);
/// Canonical hex length of a perceptual hash.
pub const HASH_HEX_LEN: usize = (HASH_BITS / 4) as usize;
/// Default maximum Hamming distance for two items to count as similar.
pub const DEFAULT_SIMILARITY_THRESHOLD: u32 = 5;

/// Histogram bins per colour channel.
const HISTOGRAM_BINS_PER_CHANNEL: usize = 4;
/// Total histogram length (RGB cube).
pub const HISTOGRAM_LEN: usize =
    HISTOGRAM_BINS_PER_CHANNEL * HISTOGRAM_BINS_PER_CHANNEL * HISTOGRAM_BINS_PER_CHANNEL;
/// Images are shrunk to at most this side before building the histogram.
const HISTOGRAM_SAMPLE_SIZE: u32 = 64;

/// A 64-bit difference hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PerceptualHash(u64);

impl PerceptualHash {
    /// Wrap raw hash bits.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw hash bits.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Canonical fixed-width hex form.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:0width$x}", self.0, width = HASH_HEX_LEN)
    }

    /// Parse the canonical hex form.
    ///
    /// Returns `None` unless the input is exactly [`HASH_HEX_LEN`] hex digits.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != HASH_HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u64::from_str_radix(hex, 16).ok().map(Self)
    }

    /// Number of differing bits.
    #[must_use]
    pub fn distance(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$x}", self.0, width = HASH_HEX_LEN)
    }
}

/// Hamming distance between two hex-encoded hashes.
///
/// Returns `None` when either side is not a canonical hash.
#[must_use]
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    Some(PerceptualHash::from_hex(a)?.distance(PerceptualHash::from_hex(b)?))
}

/// Compute the difference hash of a decoded image.
#[must_use]
pub fn dhash(img: &DynamicImage) -> PerceptualHash {
    let grid = image::imageops::resize(
        &img.to_rgb8(),
        DHASH_WIDTH,
        DHASH_HEIGHT,
        FilterType::Triangle,
    );

    let mut bits = 0u64;
    for y in 0..DHASH_HEIGHT {
        for x in 0..DHASH_WIDTH - 1 {
            let left = luminance(grid.get_pixel(x, y));
            let right = luminance(grid.get_pixel(x + 1, y));
            bits <<= 1;
            if right > left {
                bits |= 1;
            }
        }
    }
    PerceptualHash(bits)
}

fn luminance(pixel: &image::Rgb<u8>) -> f32 {
    let [r, g, b] = pixel.0;
    0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)
}

/// Normalised RGB histogram with [`HISTOGRAM_LEN`] bins summing to 1.
#[must_use]
pub fn color_histogram(img: &DynamicImage) -> Vec<f32> {
    let sample = img
        .thumbnail(HISTOGRAM_SAMPLE_SIZE, HISTOGRAM_SAMPLE_SIZE)
        .to_rgb8();
    let mut bins = vec![0f32; HISTOGRAM_LEN];
    let shift = 8 - HISTOGRAM_BINS_PER_CHANNEL.trailing_zeros();

    for pixel in sample.pixels() {
        let [r, g, b] = pixel.0;
        let idx = ((r >> shift) as usize * HISTOGRAM_BINS_PER_CHANNEL + (g >> shift) as usize)
            * HISTOGRAM_BINS_PER_CHANNEL
            + (b >> shift) as usize;
        bins[idx] += 1.0;
    }

    let total: f32 = bins.iter().sum();
    if total > 0.0 {
        for bin in &mut bins {
            *bin /= total;
        }
    }
    bins
}

/// Histogram intersection in `[0, 1]`; 0 when the shapes differ.
#[must_use]
pub fn histogram_intersection(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x.min(*y)).sum()
}

/// Hamming metric over perceptual hashes.
#[derive(Default, Clone, Copy, Debug)]
pub struct HammingMetric;

impl Metric<PerceptualHash> for HammingMetric {
    fn distance(&self, a: &PerceptualHash, b: &PerceptualHash) -> u32 {
        a.distance(*b)
    }

    fn threshold_distance(
        &self,
        a: &PerceptualHash,
        b: &PerceptualHash,
        threshold: u32,
    ) -> Option<u32> {
        let d = a.distance(*b);
        (d <= threshold).then_some(d)
    }
}

/// Radius index from perceptual hash to caller-defined slots.
///
/// Several slots may share one hash; the BK-tree stores each distinct hash
/// once and the slots hang off a side table.
pub struct HashIndex {
    tree: BKTree<PerceptualHash, HammingMetric>,
    slots: HashMap<PerceptualHash, Vec<usize>>,
}

impl HashIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: BKTree::new(HammingMetric),
            slots: HashMap::new(),
        }
    }

    /// Register `slot` under `hash`.
    pub fn insert(&mut self, hash: PerceptualHash, slot: usize) {
        let entry = self.slots.entry(hash).or_default();
        if entry.is_empty() {
            self.tree.add(hash);
        }
        entry.push(slot);
    }

    /// All slots whose hash is within `max_distance` of `hash`, in insertion
    /// order per hash.
    #[must_use]
    pub fn within(&self, hash: &PerceptualHash, max_distance: u32) -> Vec<usize> {
        let mut found: Vec<(u32, PerceptualHash)> = self
            .tree
            .find(hash, max_distance)
            .map(|(d, h)| (d, *h))
            .collect();
        found.sort_unstable();
        found
            .into_iter()
            .flat_map(|(_, h)| self.slots.get(&h).into_iter().flatten().copied())
            .collect()
    }

    /// Number of distinct hashes in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for HashIndex {
    fn default() -> Self {
        Self::new()
    }
}

//! Exact-content signatures.
//!
//! # Overview
//!
//! A signature identifies byte-identical content. How it is computed
//! depends on the media type:
//!
//! - **Video**: BLAKE3 over the first `video_prefix_bytes` of the file, read
//!   in fixed-size chunks. Large videos are never read in full.
//! - **Image**: the image is decoded, downscaled to a fixed square RGBA
//!   buffer and BLAKE3 runs over the raw pixel bytes.
//!
//! Both kinds are namespaced (`video:` / `image:`) so a video prefix can
//! never collide with an image pixel buffer.

use std::io::Read;

use image::imageops::FilterType;

use super::MediaError;
use crate::media::{MediaItem, MediaSource};

/// Namespace of video signatures.
pub const VIDEO_SIGNATURE_PREFIX: &str = "video:";
/// Namespace of image signatures.
pub const IMAGE_SIGNATURE_PREFIX: &str = "image:";

/// Default number of leading bytes hashed for a video.
pub const DEFAULT_VIDEO_PREFIX_BYTES: u64 = 4 * 1024 * 1024;
/// Default side length of the pixel buffer hashed for an image.
pub const DEFAULT_IMAGE_SIGNATURE_SIZE: u32 = 64;

/// Read buffer size for video prefixes.
const READ_CHUNK_SIZE: usize = 64 * 1024;
/// Hex length of a BLAKE3 digest.
const DIGEST_HEX_LEN: usize = 64;

/// Computes exact-content signatures.
#[derive(Debug, Clone, Copy)]
pub struct Signer {
    video_prefix_bytes: u64,
    image_size: u32,
}

impl Default for Signer {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer {
    /// Create a signer with the default prefix and buffer sizes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            video_prefix_bytes: DEFAULT_VIDEO_PREFIX_BYTES,
            image_size: DEFAULT_IMAGE_SIGNATURE_SIZE,
        }
    }

    /// Set how many leading bytes of a video are hashed.
    #[must_use]
    pub fn with_video_prefix_bytes(mut self, bytes: u64) -> Self {
        self.video_prefix_bytes = bytes.max(1);
        self
    }

    /// Set the side length of the downscaled image buffer.
    #[must_use]
    pub fn with_image_size(mut self, size: u32) -> Self {
        self.image_size = size.max(1);
        self
    }

    /// Compute the signature of `item`.
    ///
    /// # Errors
    ///
    /// Any read or decode failure is returned as a [`MediaError`]; callers
    /// treat it as a per-file failure.
    pub fn sign(&self, source: &dyn MediaSource, item: &MediaItem) -> Result<String, MediaError> {
        if item.is_video {
            self.sign_video(source, item)
        } else {
            self.sign_image(source, item)
        }
    }

    fn sign_video(&self, source: &dyn MediaSource, item: &MediaItem) -> Result<String, MediaError> {
        let mut reader = source.open(&item.path)?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        let mut remaining = self.video_prefix_bytes;

        while remaining > 0 {
            let want = remaining.min(READ_CHUNK_SIZE as u64) as usize;
            let read = match reader.read(&mut buffer[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(MediaError::from_io(&item.path, e)),
            };
            hasher.update(&buffer[..read]);
            remaining -= read as u64;
        }

        Ok(format!(
            "{}{}",
            VIDEO_SIGNATURE_PREFIX,
            hasher.finalize().to_hex()
        ))
    }

    fn sign_image(&self, source: &dyn MediaSource, item: &MediaItem) -> Result<String, MediaError> {
        let img = source.decode_image(&item.path)?;
        let pixels = image::imageops::resize(
            &img.to_rgba8(),
            self.image_size,
            self.image_size,
            FilterType::Triangle,
        );
        let digest = blake3::hash(pixels.as_raw());
        Ok(format!("{}{}", IMAGE_SIGNATURE_PREFIX, digest.to_hex()))
    }

    /// Whether a stored signature has the shape this signer produces.
    ///
    /// Malformed cached values are treated as cache misses.
    #[must_use]
    pub fn is_well_formed(signature: &str) -> bool {
        let digest = signature
            .strip_prefix(VIDEO_SIGNATURE_PREFIX)
            .or_else(|| signature.strip_prefix(IMAGE_SIGNATURE_PREFIX));
        digest.is_some_and(|d| {
            d.len() == DIGEST_HEX_LEN && d.bytes().all(|b| b.is_ascii_hexdigit())
        })
    }
}

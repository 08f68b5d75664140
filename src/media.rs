//! Media descriptors and the storage abstraction the engines read through.
//!
//! The engines never touch the filesystem directly. Everything they need
//! (metadata for staleness checks, raw bytes for signatures, decoded pixels
//! for perceptual hashes) goes through a [`MediaSource`]. [`FsMediaSource`]
//! is the local-filesystem implementation used by the CLI and the tests.
//!
//! # Modification times
//!
//! All comparisons of modification times happen at whole-second granularity
//! (see [`unix_secs`]). Two timestamps inside the same second are equal for
//! cache staleness, snapshot validation and member ordering.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::scanner::MediaError;

/// File extensions treated as still images. Only formats the enabled
/// `image` decoders can open are listed.
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff",
];

/// File extensions treated as videos.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "mkv", "avi", "webm", "3gp", "wmv", "mpg", "mpeg",
];

/// Broad media category of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// A still image.
    Image,
    /// A video.
    Video,
}

impl MediaKind {
    /// Classify a path by its extension (case-insensitive).
    ///
    /// Returns `None` for files that are neither images nor videos.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }
}

/// Snapshot of one candidate file, as supplied by the media index.
///
/// The path is the file identity used as the key of every cache table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable file identity
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
    /// Whether the file is a video (otherwise an image)
    pub is_video: bool,
    /// Name shown to users
    pub display_name: String,
}

impl MediaItem {
    /// Create a new item, deriving the display name from the file name.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, modified: SystemTime, is_video: bool) -> Self {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            path,
            size,
            modified,
            is_video,
            display_name,
        }
    }

    /// Build an item from the live filesystem.
    ///
    /// The video flag comes from the extension; anything that is not a
    /// known video extension is treated as an image.
    pub fn from_path(path: &Path) -> Result<Self, MediaError> {
        let metadata = std::fs::metadata(path).map_err(|e| MediaError::from_io(path, e))?;
        let modified = metadata
            .modified()
            .map_err(|e| MediaError::from_io(path, e))?;
        let is_video = MediaKind::from_path(path) == Some(MediaKind::Video);
        Ok(Self::new(
            path.to_path_buf(),
            metadata.len(),
            modified,
            is_video,
        ))
    }

    /// Modification time truncated to whole seconds since the Unix epoch.
    #[must_use]
    pub fn modified_secs(&self) -> i64 {
        unix_secs(self.modified)
    }

    /// Ordering key for "oldest first" member lists.
    ///
    /// Ties within the same second are broken by path so the order is
    /// deterministic across scans.
    pub(crate) fn age_key(&self) -> (i64, &Path) {
        (self.modified_secs(), self.path.as_path())
    }
}

/// Live metadata of a file, used for staleness checks and revalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Current size in bytes
    pub size: u64,
    /// Current modification time
    pub modified: SystemTime,
}

impl FileStat {
    /// Whether this live state still matches a recorded snapshot.
    #[must_use]
    pub fn matches(&self, item: &MediaItem) -> bool {
        self.size == item.size && unix_secs(self.modified) == item.modified_secs()
    }
}

/// Convert a timestamp to whole seconds since the Unix epoch.
///
/// Pre-epoch times floor towards negative infinity.
#[must_use]
pub fn unix_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => {
            let d = e.duration();
            let whole = d.as_secs() as i64;
            if d.subsec_nanos() > 0 {
                -whole - 1
            } else {
                -whole
            }
        }
    }
}

/// Inverse of [`unix_secs`].
#[must_use]
pub fn from_unix_secs(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Storage abstraction the engines read files through.
///
/// Implementations must be shareable across the hashing worker pool.
pub trait MediaSource: Send + Sync {
    /// Live metadata for `path`, or `None` if the file no longer exists.
    fn stat(&self, path: &Path) -> Option<FileStat>;

    /// Open the file for sequential reading.
    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>, MediaError>;

    /// Decode the file as an image.
    fn decode_image(&self, path: &Path) -> Result<DynamicImage, MediaError>;

    /// Decode a representative frame of a video.
    ///
    /// Returns `Ok(None)` when the source cannot extract frames, in which
    /// case videos take part in exact matching only.
    fn decode_video_frame(&self, _path: &Path) -> Result<Option<DynamicImage>, MediaError> {
        Ok(None)
    }
}

/// [`MediaSource`] backed by the local filesystem.
///
/// Images are decoded with the `image` crate; video frame extraction is not
/// available.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsMediaSource;

impl MediaSource for FsMediaSource {
    fn stat(&self, path: &Path) -> Option<FileStat> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(FileStat {
            size: metadata.len(),
            modified: metadata.modified().ok()?,
        })
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>, MediaError> {
        let file = File::open(path).map_err(|e| MediaError::from_io(path, e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn decode_image(&self, path: &Path) -> Result<DynamicImage, MediaError> {
        image::open(path).map_err(|e| match e {
            image::ImageError::IoError(io) => MediaError::from_io(path, io),
            other => MediaError::Decode {
                path: path.to_path_buf(),
                source: other,
            },
        })
    }
}

//! Layered configuration.
//!
//! Settings are merged in increasing priority:
//!
//! 1. Built-in defaults ([`ScanConfig::default`])
//! 2. A TOML file (`--config`, or `config.toml` in the platform config dir)
//! 3. Environment variables prefixed with `MEDIADUPE_`
//! 4. Command-line flags, applied by the caller after loading

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::scanner::signature::{DEFAULT_IMAGE_SIGNATURE_SIZE, DEFAULT_VIDEO_PREFIX_BYTES};
use crate::scanner::{DEFAULT_SIMILARITY_THRESHOLD, HASH_BITS};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MEDIADUPE_";

/// Tunables of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum Hamming distance for two items to count as similar.
    pub similarity_threshold: u32,
    /// Files per progress and cancellation chunk.
    pub chunk_size: usize,
    /// Size of the hashing worker pool.
    pub io_threads: usize,
    /// Leading bytes hashed for a video signature.
    pub video_prefix_bytes: u64,
    /// Side of the pixel buffer hashed for an image signature.
    pub image_signature_size: u32,
    /// Minimum histogram intersection on top of the dHash threshold.
    pub histogram_min_similarity: Option<f32>,
    /// Location of the cache database.
    pub cache_path: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            chunk_size: 32,
            io_threads: 4,
            video_prefix_bytes: DEFAULT_VIDEO_PREFIX_BYTES,
            image_signature_size: DEFAULT_IMAGE_SIGNATURE_SIZE,
            histogram_min_similarity: None,
            cache_path: None,
        }
    }
}

impl ScanConfig {
    /// Load defaults, then the config file, then the environment.
    ///
    /// An explicitly given file must exist; the default location is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if the explicit file is missing or any layer fails to
    /// parse.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => {
                if !path.is_file() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => default_config_path(),
        };
        Self::figment(file.as_deref())
            .extract::<Self>()
            .context("Failed to load configuration")
            .map(Self::sanitized)
    }

    /// The merged provider chain.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            log::debug!("Reading configuration from {}", path.display());
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Clamp out-of-range values into their valid ranges.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        self.io_threads = self.io_threads.max(1);
        self.similarity_threshold = self.similarity_threshold.min(HASH_BITS);
        self.video_prefix_bytes = self.video_prefix_bytes.max(1);
        self.image_signature_size = self.image_signature_size.max(1);
        self.histogram_min_similarity = self
            .histogram_min_similarity
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0));
        self
    }

    /// Cache database location: the configured path or the platform default.
    #[must_use]
    pub fn resolved_cache_path(&self) -> Option<PathBuf> {
        self.cache_path.clone().or_else(default_cache_path)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Fails only if a value cannot be represented in TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "mediadupe", "mediadupe")
}

/// Default configuration file, `None` if there is no home directory.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Default cache database, `None` if there is no home directory.
#[must_use]
pub fn default_cache_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().join("cache.db"))
}

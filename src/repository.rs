//! Scan orchestration.
//!
//! [`ScanRepository`] owns the cache database handle and the media source
//! and is the single writer of every cache table during a scan. It runs the
//! engines, persists completed results and revalidates the stored snapshot
//! against the live filesystem whenever it is read back.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{CacheDb, CacheResult, CacheTable};
use crate::config::ScanConfig;
use crate::duplicates::{
    ExactConfig, ExactDuplicateEngine, ExactStats, ScanResultGroup, SimilarityConfig,
    SimilarityEngine, SimilarityStats,
};
use crate::error::ScanError;
use crate::media::{MediaItem, MediaSource};
use crate::progress::ProgressCallback;
use crate::results::ScanResults;
use crate::signal::CancellationToken;

/// Which engines a scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Byte-identical groups only
    Exact,
    /// Perceptually similar groups only
    Similar,
    /// Both
    #[default]
    All,
}

impl ScanMode {
    fn runs_exact(self) -> bool {
        matches!(self, Self::Exact | Self::All)
    }

    fn runs_similar(self) -> bool {
        matches!(self, Self::Similar | Self::All)
    }
}

/// Combined statistics of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Exact engine statistics, if it ran
    pub exact: Option<ExactStats>,
    /// Similarity engine statistics, if it ran
    pub similarity: Option<SimilarityStats>,
    /// Wall-clock duration
    pub duration: Duration,
}

impl ScanStats {
    /// Fingerprints reused from the caches.
    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.exact.as_ref().map_or(0, |s| s.cache_hits)
            + self.similarity.as_ref().map_or(0, |s| s.cache_hits)
    }

    /// Fingerprints computed.
    #[must_use]
    pub fn cache_misses(&self) -> usize {
        self.exact.as_ref().map_or(0, |s| s.cache_misses)
            + self.similarity.as_ref().map_or(0, |s| s.cache_misses)
    }

    /// Whether any engine stopped early on cancellation.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.exact.as_ref().is_some_and(|s| s.interrupted)
            || self.similarity.as_ref().is_some_and(|s| s.interrupted)
    }
}

/// Raw output of the engines, before persistence.
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    /// Exact groups followed by similar groups
    pub groups: Vec<ScanResultGroup>,
    /// Files either engine could not fingerprint, sorted and unique
    pub unscannable: Vec<PathBuf>,
    /// Statistics
    pub stats: ScanStats,
}

/// Terminal outcome of [`ScanRepository::run_scan`].
#[derive(Debug, Clone)]
pub enum ScanReport {
    /// The scan finished and its snapshot was saved.
    Complete {
        /// The saved snapshot
        results: ScanResults,
        /// Statistics
        stats: ScanStats,
    },
    /// The scan stopped on cancellation. Nothing was saved.
    Cancelled {
        /// Groups among the files processed before cancellation
        groups: Vec<ScanResultGroup>,
        /// Unscannable files among those processed
        unscannable: Vec<PathBuf>,
        /// Statistics
        stats: ScanStats,
    },
    /// The scan failed.
    Failed {
        /// What went wrong
        message: String,
        /// Last valid persisted snapshot, if any
        fallback: Option<ScanResults>,
    },
}

impl ScanReport {
    /// Groups to show for this outcome.
    #[must_use]
    pub fn groups(&self) -> &[ScanResultGroup] {
        match self {
            Self::Complete { results, .. } => &results.groups,
            Self::Cancelled { groups, .. } => groups,
            Self::Failed { fallback, .. } => fallback.as_ref().map_or(&[], |r| &r.groups),
        }
    }

    /// Unscannable files to show for this outcome.
    #[must_use]
    pub fn unscannable(&self) -> &[PathBuf] {
        match self {
            Self::Complete { results, .. } => &results.unscannable,
            Self::Cancelled { unscannable, .. } => unscannable,
            Self::Failed { fallback, .. } => fallback.as_ref().map_or(&[], |r| &r.unscannable),
        }
    }
}

/// Coordinates engines, caches and the persisted snapshot.
pub struct ScanRepository {
    db: Arc<CacheDb>,
    source: Arc<dyn MediaSource>,
    config: ScanConfig,
}

impl ScanRepository {
    /// Create a repository over explicit store and source handles.
    #[must_use]
    pub fn new(db: Arc<CacheDb>, source: Arc<dyn MediaSource>, config: ScanConfig) -> Self {
        Self {
            db,
            source,
            config: config.sanitized(),
        }
    }

    /// The cache database.
    #[must_use]
    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Read the stored snapshot and revalidate it against the filesystem.
    ///
    /// A member survives only if it still exists with the same size and the
    /// same modification second. Groups left with fewer than two members are
    /// dropped. Returns `None` when no group survives.
    pub fn load_validated(&self) -> CacheResult<Option<ScanResults>> {
        let Some(stored) = self.db.scan_results().load()? else {
            return Ok(None);
        };

        let groups: Vec<ScanResultGroup> = stored
            .groups
            .iter()
            .filter_map(|group| {
                let live: Vec<MediaItem> = group
                    .files()
                    .iter()
                    .filter(|f| self.is_live(f))
                    .cloned()
                    .collect();
                if live.len() < group.len() {
                    log::debug!(
                        "Group {} lost {} member(s) on revalidation",
                        group.unique_id(),
                        group.len() - live.len()
                    );
                }
                (live.len() >= 2).then(|| group.with_files(live))
            })
            .collect();

        if groups.is_empty() {
            return Ok(None);
        }
        Ok(Some(ScanResults {
            groups,
            unscannable: stored.unscannable,
            timestamp: stored.timestamp,
        }))
    }

    /// Whether at least one stored group still has two live members.
    pub fn has_valid_cached_results(&self) -> CacheResult<bool> {
        let Some(stored) = self.db.scan_results().load()? else {
            return Ok(false);
        };
        Ok(stored
            .groups
            .iter()
            .any(|group| group.files().iter().filter(|f| self.is_live(f)).nth(1).is_some()))
    }

    fn is_live(&self, item: &MediaItem) -> bool {
        self.source
            .stat(&item.path)
            .is_some_and(|stat| stat.matches(item))
    }

    /// Replace the stored snapshot.
    ///
    /// Without an override the current time is used. Returns the stored
    /// timestamp, truncated to milliseconds.
    pub fn save(
        &self,
        groups: &[ScanResultGroup],
        unscannable: &[PathBuf],
        timestamp: Option<DateTime<Utc>>,
    ) -> CacheResult<DateTime<Utc>> {
        let requested = timestamp.unwrap_or_else(Utc::now);
        let timestamp = Utc
            .timestamp_millis_opt(requested.timestamp_millis())
            .single()
            .unwrap_or(requested);
        self.db.scan_results().save(groups, unscannable, timestamp)?;
        Ok(timestamp)
    }

    /// Run the engines selected by `mode` over `items`.
    ///
    /// Cache progress is written chunk by chunk; no snapshot is saved.
    ///
    /// # Errors
    ///
    /// Fails on cache errors or if the worker pool cannot be built.
    pub fn scan(
        &self,
        items: &[MediaItem],
        mode: ScanMode,
        progress: Option<Arc<dyn ProgressCallback>>,
        cancellation: &CancellationToken,
    ) -> Result<ScanOutput, ScanError> {
        let started = Instant::now();
        let mut output = ScanOutput::default();

        if mode.runs_exact() {
            let mut config = ExactConfig::from_scan_config(&self.config)
                .with_cancellation(cancellation.clone());
            if let Some(cb) = progress.clone() {
                config = config.with_progress_callback(cb);
            }
            let outcome = ExactDuplicateEngine::new(&self.db, self.source.as_ref(), config)
                .run(items)?;
            output.groups.extend(outcome.groups);
            output.unscannable.extend(outcome.unscannable);
            output.stats.exact = Some(outcome.stats);
        }

        if mode.runs_similar() && !output.stats.interrupted() {
            let mut config = SimilarityConfig::from_scan_config(&self.config)
                .with_cancellation(cancellation.clone());
            if let Some(cb) = progress {
                config = config.with_progress_callback(cb);
            }
            let outcome =
                SimilarityEngine::new(&self.db, self.source.as_ref(), config).run(items)?;
            output.groups.extend(outcome.groups);
            output.unscannable.extend(outcome.unscannable);
            output.stats.similarity = Some(outcome.stats);
        }

        output.unscannable.sort();
        output.unscannable.dedup();
        output.stats.duration = started.elapsed();
        Ok(output)
    }

    /// Scan, persist on completion and report the terminal outcome.
    ///
    /// A failed scan falls back to the last valid persisted snapshot.
    pub fn run_scan(
        &self,
        items: &[MediaItem],
        mode: ScanMode,
        progress: Option<Arc<dyn ProgressCallback>>,
        cancellation: &CancellationToken,
    ) -> ScanReport {
        let output = match self.scan(items, mode, progress, cancellation) {
            Ok(output) => output,
            Err(e) => return self.failed(e.to_string()),
        };

        if output.stats.interrupted() {
            log::info!(
                "Scan cancelled: {} partial groups, snapshot not saved",
                output.groups.len()
            );
            return ScanReport::Cancelled {
                groups: output.groups,
                unscannable: output.unscannable,
                stats: output.stats,
            };
        }

        match self.save(&output.groups, &output.unscannable, None) {
            Ok(timestamp) => ScanReport::Complete {
                results: ScanResults {
                    groups: output.groups,
                    unscannable: output.unscannable,
                    timestamp,
                },
                stats: output.stats,
            },
            Err(e) => self.failed(e.to_string()),
        }
    }

    fn failed(&self, message: String) -> ScanReport {
        log::error!("Scan failed: {}", message);
        let fallback = match self.load_validated() {
            Ok(fallback) => fallback,
            Err(e) => {
                log::warn!("No fallback snapshot available: {}", e);
                None
            }
        };
        ScanReport::Failed { message, fallback }
    }

    /// Propagate deleted files into the snapshot and every cache.
    ///
    /// The snapshot keeps its original timestamp; groups that fall below two
    /// members are dropped. Fingerprints of the files are deleted and every
    /// similarity cluster that contained them is invalidated.
    pub fn on_files_deleted(&self, paths: &[PathBuf]) -> CacheResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let deleted: HashSet<&PathBuf> = paths.iter().collect();

        if let Some(stored) = self.db.scan_results().load()? {
            let groups: Vec<ScanResultGroup> = stored
                .groups
                .iter()
                .filter_map(|group| {
                    let kept: Vec<MediaItem> = group
                        .files()
                        .iter()
                        .filter(|f| !deleted.contains(&f.path))
                        .cloned()
                        .collect();
                    (kept.len() >= 2).then(|| group.with_files(kept))
                })
                .collect();
            let unscannable: Vec<PathBuf> = stored
                .unscannable
                .into_iter()
                .filter(|p| !deleted.contains(p))
                .collect();
            self.save(&groups, &unscannable, Some(stored.timestamp))?;
        }

        self.db.signatures().delete(paths)?;
        self.db.perceptual_hashes().delete(paths)?;
        let dropped = self.db.similarity_groups().delete_clusters_containing(paths)?;
        log::info!(
            "Removed {} deleted file(s) from caches, {} cluster(s) invalidated",
            paths.len(),
            dropped.len()
        );
        Ok(())
    }

    /// Empty every cache table and the snapshot.
    pub fn clear_all(&self) -> CacheResult<()> {
        self.db.clear()
    }
}

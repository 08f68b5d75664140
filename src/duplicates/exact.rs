//! Exact-duplicate detection with a persistent signature cache.
//!
//! # Overview
//!
//! 1. **Size partition**: empty files are skipped and files whose size is
//!    unique are reported as processed without being read.
//! 2. **Signatures**: the remaining files are processed in fixed-size
//!    chunks. A cached signature is reused only when its recorded
//!    `(modified, size)` matches the live file; everything else is hashed in
//!    the bounded worker pool.
//! 3. **Cache write-back**: each chunk's new signatures are upserted before
//!    the next chunk starts, so a cancelled scan keeps exactly the completed
//!    chunks.
//! 4. **Grouping**: files sharing a size and signature form a group. Members
//!    are sorted oldest first and groups by reclaimable impact.
//! 5. **Pruning**: once a scan completes, cache entries for files outside the
//!    scanned set (or that failed to hash) are deleted.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;

use super::groups::{group_by_size, prefilter_sizes, sort_oldest_first, ExactGroup, ScanResultGroup};
use crate::cache::{CacheDb, CacheTable, SignatureCacheEntry};
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::media::{MediaItem, MediaSource};
use crate::progress::{ProgressCallback, PHASE_SIGNATURES};
use crate::scanner::{MediaError, Signer};
use crate::signal::CancellationToken;

/// Configuration for the exact-duplicate engine.
#[derive(Clone)]
pub struct ExactConfig {
    /// Number of worker threads for parallel hashing.
    pub io_threads: usize,
    /// Files per progress and cancellation chunk.
    pub chunk_size: usize,
    /// Signature parameters.
    pub signer: Signer,
    /// False positive rate of the size prefilter.
    pub bloom_fp_rate: f64,
    /// Optional cancellation token, polled between chunks.
    pub cancellation: Option<CancellationToken>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for ExactConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExactConfig")
            .field("io_threads", &self.io_threads)
            .field("chunk_size", &self.chunk_size)
            .field("signer", &self.signer)
            .field("bloom_fp_rate", &self.bloom_fp_rate)
            .field("cancellation", &self.cancellation)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for ExactConfig {
    fn default() -> Self {
        Self::from_scan_config(&ScanConfig::default())
    }
}

impl ExactConfig {
    /// Derive the engine configuration from the scan configuration.
    #[must_use]
    pub fn from_scan_config(config: &ScanConfig) -> Self {
        Self {
            io_threads: config.io_threads.max(1),
            chunk_size: config.chunk_size.max(1),
            signer: Signer::new()
                .with_video_prefix_bytes(config.video_prefix_bytes)
                .with_image_size(config.image_signature_size),
            bloom_fp_rate: 0.01,
            cancellation: None,
            progress_callback: None,
        }
    }

    /// Set the number of hashing threads.
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Set the chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Set the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Statistics from an exact-duplicate run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExactStats {
    /// Files handed to the engine
    pub input_files: usize,
    /// Empty files skipped
    pub empty_files: usize,
    /// Files skipped because their size is unique
    pub eliminated_by_size: usize,
    /// Files that needed a signature
    pub candidates: usize,
    /// Signatures reused from the cache
    pub cache_hits: usize,
    /// Signatures computed
    pub cache_misses: usize,
    /// Files that could not be read or decoded
    pub failed_files: usize,
    /// Stale cache entries removed
    pub pruned_entries: usize,
    /// Number of groups found
    pub duplicate_groups: usize,
    /// Space reclaimable by keeping one copy per group
    pub wasted_space: u64,
    /// Whether the run stopped at a chunk boundary on cancellation
    pub interrupted: bool,
}

/// Result of an exact-duplicate run.
#[derive(Debug, Clone, Default)]
pub struct ExactOutcome {
    /// Exact groups, highest impact first
    pub groups: Vec<ScanResultGroup>,
    /// Files whose signature could not be computed, sorted
    pub unscannable: Vec<PathBuf>,
    /// Run statistics
    pub stats: ExactStats,
}

enum SignatureResult {
    Cached(String),
    Computed(String),
    Failed(MediaError),
}

/// Groups byte-identical media using the signature cache.
pub struct ExactDuplicateEngine<'a> {
    db: &'a CacheDb,
    source: &'a dyn MediaSource,
    config: ExactConfig,
}

impl<'a> ExactDuplicateEngine<'a> {
    /// Create an engine over a cache database and a media source.
    #[must_use]
    pub fn new(db: &'a CacheDb, source: &'a dyn MediaSource, config: ExactConfig) -> Self {
        Self { db, source, config }
    }

    /// Find all groups of byte-identical files among `items`.
    ///
    /// # Errors
    ///
    /// Cache failures and worker pool creation failures are fatal. Per-file
    /// failures only add to the unscannable list.
    pub fn run(&self, items: &[MediaItem]) -> Result<ExactOutcome, ScanError> {
        let mut stats = ExactStats {
            input_files: items.len(),
            ..Default::default()
        };
        let progress = self.config.progress_callback.as_deref();
        if let Some(cb) = progress {
            cb.on_phase_start(PHASE_SIGNATURES, items.len());
        }

        let (non_empty, empty): (Vec<MediaItem>, Vec<MediaItem>) =
            items.iter().cloned().partition(|f| f.size > 0);
        stats.empty_files = empty.len();

        let (maybe_shared, singles) =
            prefilter_sizes(non_empty, self.config.bloom_fp_rate, items.len());
        let (size_groups, grouping) = group_by_size(maybe_shared);
        stats.eliminated_by_size = singles.len() + grouping.eliminated_unique;

        let mut candidates: Vec<MediaItem> = size_groups.into_values().flatten().collect();
        candidates.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.path.cmp(&b.path)));
        stats.candidates = candidates.len();

        let mut processed = stats.empty_files + stats.eliminated_by_size;
        if let Some(cb) = progress {
            cb.on_progress(processed);
        }

        log::info!(
            "Exact scan: {} files, {} need signatures ({} eliminated by size)",
            items.len(),
            candidates.len(),
            stats.eliminated_by_size
        );

        let cached: HashMap<PathBuf, SignatureCacheEntry> = self
            .db
            .signatures()
            .read_all()?
            .into_iter()
            .map(|e| (e.path.clone(), e))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.io_threads)
            .build()?;

        let mut signed: Vec<(MediaItem, String)> = Vec::with_capacity(candidates.len());
        let mut unscannable = Vec::new();

        for chunk in candidates.chunks(self.config.chunk_size) {
            if self.config.is_cancelled() {
                stats.interrupted = true;
                log::info!("Exact scan: cancelled after {} files", processed);
                break;
            }

            let results: Vec<SignatureResult> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|item| self.signature_for(item, cached.get(&item.path)))
                    .collect()
            });

            let mut fresh = Vec::new();
            for (item, result) in chunk.iter().zip(results) {
                match result {
                    SignatureResult::Cached(sig) => {
                        stats.cache_hits += 1;
                        signed.push((item.clone(), sig));
                    }
                    SignatureResult::Computed(sig) => {
                        stats.cache_misses += 1;
                        fresh.push(SignatureCacheEntry::new(item, sig.clone()));
                        signed.push((item.clone(), sig));
                    }
                    SignatureResult::Failed(e) => {
                        stats.failed_files += 1;
                        log::warn!("Unscannable: {}", e);
                        unscannable.push(item.path.clone());
                    }
                }
            }

            if !fresh.is_empty() {
                self.db.signatures().upsert(&fresh)?;
            }

            processed += chunk.len();
            if let Some(cb) = progress {
                cb.on_progress(processed);
            }
        }

        if !stats.interrupted {
            stats.pruned_entries = self.prune(items, &cached, &unscannable)?;
        }

        let groups = build_groups(signed);
        stats.duplicate_groups = groups.len();
        stats.wasted_space = groups.iter().map(ScanResultGroup::wasted_space).sum();
        unscannable.sort();

        if let Some(cb) = progress {
            cb.on_phase_end(PHASE_SIGNATURES);
        }

        log::info!(
            "Exact scan complete: {} groups, {} cache hits, {} computed, {} unscannable",
            stats.duplicate_groups,
            stats.cache_hits,
            stats.cache_misses,
            stats.failed_files
        );

        Ok(ExactOutcome {
            groups,
            unscannable,
            stats,
        })
    }

    fn signature_for(
        &self,
        item: &MediaItem,
        cached: Option<&SignatureCacheEntry>,
    ) -> SignatureResult {
        if let Some(entry) = cached {
            if entry.is_valid_for(item) {
                log::trace!("Signature cache hit: {}", item.path.display());
                return SignatureResult::Cached(entry.signature.clone());
            }
            log::trace!("Signature cache stale: {}", item.path.display());
        }

        match self.config.signer.sign(self.source, item) {
            Ok(sig) => SignatureResult::Computed(sig),
            Err(e) => SignatureResult::Failed(e),
        }
    }

    /// Delete entries for identities outside `items` and for failed files.
    fn prune(
        &self,
        items: &[MediaItem],
        cached: &HashMap<PathBuf, SignatureCacheEntry>,
        failed: &[PathBuf],
    ) -> Result<usize, ScanError> {
        let present: HashSet<&PathBuf> = items.iter().map(|i| &i.path).collect();
        let mut stale: Vec<PathBuf> = cached
            .keys()
            .filter(|path| !present.contains(path))
            .cloned()
            .collect();
        stale.extend(failed.iter().filter(|p| cached.contains_key(*p)).cloned());

        if stale.is_empty() {
            return Ok(0);
        }
        log::debug!("Pruning {} signature cache entries", stale.len());
        Ok(self.db.signatures().delete(&stale)?)
    }
}

/// Group signed files by `(size, signature)`, keeping groups of two or more.
fn build_groups(signed: Vec<(MediaItem, String)>) -> Vec<ScanResultGroup> {
    let mut by_signature: HashMap<(u64, String), Vec<MediaItem>> = HashMap::new();
    for (item, sig) in signed {
        by_signature.entry((item.size, sig)).or_default().push(item);
    }

    let mut groups: Vec<ExactGroup> = by_signature
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|((size, signature), mut files)| {
            sort_oldest_first(&mut files);
            log::debug!(
                "Exact group {}: {} files, {} bytes each",
                signature,
                files.len(),
                size
            );
            ExactGroup {
                signature,
                files,
                size_per_file: size,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        let impact_a = a.size_per_file.saturating_mul(a.files.len() as u64);
        let impact_b = b.size_per_file.saturating_mul(b.files.len() as u64);
        impact_b
            .cmp(&impact_a)
            .then_with(|| a.signature.cmp(&b.signature))
            .then_with(|| a.size_per_file.cmp(&b.size_per_file))
    });

    groups.into_iter().map(ScanResultGroup::Exact).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{from_unix_secs, FsMediaSource};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, usize)>>,
    }

    impl ProgressCallback for Recorder {
        fn on_phase_start(&self, phase: &str, total: usize) {
            self.events.lock().unwrap().push((format!("start:{phase}"), total));
        }
        fn on_progress(&self, processed: usize) {
            self.events.lock().unwrap().push(("progress".to_string(), processed));
        }
        fn on_phase_end(&self, phase: &str) {
            self.events.lock().unwrap().push((format!("end:{phase}"), 0));
        }
    }

    fn video(dir: &TempDir, name: &str, content: &[u8], secs: i64) -> MediaItem {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        MediaItem::new(path, content.len() as u64, from_unix_secs(secs), true)
    }

    fn engine_run(db: &CacheDb, items: &[MediaItem], config: ExactConfig) -> ExactOutcome {
        ExactDuplicateEngine::new(db, &FsMediaSource, config)
            .run(items)
            .unwrap()
    }

    #[test]
    fn test_groups_identical_files_oldest_first() {
        let dir = TempDir::new().unwrap();
        let items = vec![
            video(&dir, "c.mp4", b"same content", 300),
            video(&dir, "a.mp4", b"same content", 100),
            video(&dir, "b.mp4", b"same content", 200),
            video(&dir, "d.mp4", b"other conten", 50),
        ];
        let db = CacheDb::open_in_memory().unwrap();

        let outcome = engine_run(&db, &items, ExactConfig::default());

        assert_eq!(outcome.groups.len(), 1);
        let names: Vec<_> = outcome.groups[0]
            .files()
            .iter()
            .map(|f| f.display_name.clone())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4", "c.mp4"]);
        match &outcome.groups[0] {
            ScanResultGroup::Exact(g) => assert_eq!(g.size_per_file, 12),
            other => panic!("unexpected group {other:?}"),
        }
        assert_eq!(outcome.stats.cache_misses, 4);
    }

    #[test]
    fn test_unique_sizes_are_never_hashed() {
        let dir = TempDir::new().unwrap();
        let items = vec![
            video(&dir, "a.mp4", b"1", 1),
            video(&dir, "b.mp4", b"22", 1),
            video(&dir, "empty.mp4", b"", 1),
        ];
        let db = CacheDb::open_in_memory().unwrap();
        let recorder = Arc::new(Recorder::default());

        let outcome = engine_run(
            &db,
            &items,
            ExactConfig::default().with_progress_callback(recorder.clone()),
        );

        assert!(outcome.groups.is_empty());
        assert_eq!(outcome.stats.eliminated_by_size, 2);
        assert_eq!(outcome.stats.empty_files, 1);
        assert_eq!(outcome.stats.candidates, 0);
        assert!(db.signatures().read_all().unwrap().is_empty());

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.first(), Some(&("start:signatures".to_string(), 3)));
        assert!(events.contains(&("progress".to_string(), 3)));
    }

    #[test]
    fn test_second_run_uses_cache() {
        let dir = TempDir::new().unwrap();
        let items = vec![
            video(&dir, "a.mp4", b"xx", 1),
            video(&dir, "b.mp4", b"xx", 2),
        ];
        let db = CacheDb::open_in_memory().unwrap();

        let first = engine_run(&db, &items, ExactConfig::default());
        let second = engine_run(&db, &items, ExactConfig::default());

        assert_eq!(first.groups, second.groups);
        assert_eq!(second.stats.cache_hits, 2);
        assert_eq!(second.stats.cache_misses, 0);
    }

    #[test]
    fn test_unreadable_file_is_unscannable() {
        let dir = TempDir::new().unwrap();
        let good_a = video(&dir, "a.mp4", b"abc", 1);
        let good_b = video(&dir, "b.mp4", b"abc", 1);
        let missing = MediaItem::new(dir.path().join("gone.mp4"), 3, from_unix_secs(1), true);
        let db = CacheDb::open_in_memory().unwrap();

        let outcome = engine_run(&db, &[good_a, good_b, missing.clone()], ExactConfig::default());

        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.unscannable, vec![missing.path]);
        assert_eq!(outcome.stats.failed_files, 1);
    }

    #[test]
    fn test_prunes_entries_for_absent_files() {
        let dir = TempDir::new().unwrap();
        let a = video(&dir, "a.mp4", b"zz", 1);
        let b = video(&dir, "b.mp4", b"zz", 1);
        let db = CacheDb::open_in_memory().unwrap();

        engine_run(&db, &[a.clone(), b.clone()], ExactConfig::default());
        assert_eq!(db.signatures().read_all().unwrap().len(), 2);

        let outcome = engine_run(&db, &[a.clone()], ExactConfig::default());
        assert_eq!(outcome.stats.pruned_entries, 1);
        let remaining = db.signatures().read_all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].path, a.path);
    }

    #[test]
    fn test_cancelled_before_first_chunk_keeps_cache_untouched() {
        let dir = TempDir::new().unwrap();
        let items = vec![
            video(&dir, "a.mp4", b"qq", 1),
            video(&dir, "b.mp4", b"qq", 1),
        ];
        let db = CacheDb::open_in_memory().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = engine_run(
            &db,
            &items,
            ExactConfig::default().with_cancellation(token),
        );

        assert!(outcome.stats.interrupted);
        assert!(outcome.groups.is_empty());
        assert!(db.signatures().read_all().unwrap().is_empty());
    }

    #[test]
    fn test_groups_sorted_by_impact() {
        let dir = TempDir::new().unwrap();
        let items = vec![
            video(&dir, "s1.mp4", b"ab", 1),
            video(&dir, "s2.mp4", b"ab", 1),
            video(&dir, "l1.mp4", b"abcdef", 1),
            video(&dir, "l2.mp4", b"abcdef", 1),
        ];
        let db = CacheDb::open_in_memory().unwrap();

        let outcome = engine_run(&db, &items, ExactConfig::default().with_chunk_size(1));

        assert_eq!(outcome.groups.len(), 2);
        assert_eq!(outcome.groups[0].total_size(), 12);
        assert_eq!(outcome.groups[1].total_size(), 4);
    }
}

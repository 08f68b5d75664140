//! Similarity clustering with persistent perceptual hashes and clusters.
//!
//! # Overview
//!
//! 1. **Hashes**: every item gets a dHash, taken from the perceptual hash
//!    cache when the recorded `(modified, size)` still matches, otherwise
//!    computed in the bounded worker pool. Images also carry a colour
//!    histogram. Videos are hashed from a representative frame when the
//!    [`MediaSource`] can provide one and are skipped otherwise.
//! 2. **Invalidation**: a stored cluster survives only if none of its members
//!    was rehashed or disappeared. Clusters of rehashed items are dropped in
//!    the same chunk that stores the new hashes; clusters with vanished
//!    members are dropped before clustering. A stored cluster is reused only
//!    while the key still matches a member and every member still joins it.
//!    Dropped clusters send their members back into the pool.
//! 3. **Fold**: a surviving cluster with any member that a pool item would
//!    join is dropped as well, until nothing changes. This keeps an
//!    incremental scan equal to a from-scratch scan of the same pool.
//! 4. **Greedy clustering** of the pool: items are visited oldest first; each
//!    unassigned item becomes a representative and takes every unassigned
//!    item within the threshold. Clusters with two or more members are kept
//!    and keyed by the representative's hash.
//!
//! Similarity is not transitive: members are within the threshold of the
//! representative, not necessarily of each other.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;

use super::groups::{sort_oldest_first, ScanResultGroup, SimilarGroup};
use crate::cache::{
    CacheDb, CacheTable, PerceptualHashCacheEntry, SimilarityGroupCacheEntry,
};
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::media::{MediaItem, MediaSource};
use crate::progress::{ProgressCallback, PHASE_PERCEPTUAL};
use crate::scanner::{
    color_histogram, dhash, histogram_intersection, HashIndex, MediaError, PerceptualHash,
};
use crate::signal::CancellationToken;

/// Configuration for the similarity engine.
#[derive(Clone)]
pub struct SimilarityConfig {
    /// Maximum Hamming distance to a representative.
    pub threshold: u32,
    /// Optional minimum histogram intersection with the representative.
    pub histogram_min_similarity: Option<f32>,
    /// Number of worker threads for parallel hashing.
    pub io_threads: usize,
    /// Files per progress and cancellation chunk.
    pub chunk_size: usize,
    /// Optional cancellation token, polled between chunks.
    pub cancellation: Option<CancellationToken>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for SimilarityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityConfig")
            .field("threshold", &self.threshold)
            .field("histogram_min_similarity", &self.histogram_min_similarity)
            .field("io_threads", &self.io_threads)
            .field("chunk_size", &self.chunk_size)
            .field("cancellation", &self.cancellation)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self::from_scan_config(&ScanConfig::default())
    }
}

impl SimilarityConfig {
    /// Derive the engine configuration from the scan configuration.
    #[must_use]
    pub fn from_scan_config(config: &ScanConfig) -> Self {
        Self {
            threshold: config.similarity_threshold,
            histogram_min_similarity: config.histogram_min_similarity,
            io_threads: config.io_threads.max(1),
            chunk_size: config.chunk_size.max(1),
            cancellation: None,
            progress_callback: None,
        }
    }

    /// Set the distance threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Require a minimum histogram intersection with the representative.
    #[must_use]
    pub fn with_histogram_min_similarity(mut self, min: f32) -> Self {
        self.histogram_min_similarity = Some(min);
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

/// Statistics from a similarity run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimilarityStats {
    /// Files handed to the engine
    pub input_files: usize,
    /// Hashes reused from the cache
    pub cache_hits: usize,
    /// Hashes computed
    pub cache_misses: usize,
    /// Files that could not be read or decoded
    pub failed_files: usize,
    /// Videos skipped because no frame could be extracted
    pub unsupported_files: usize,
    /// Stored clusters reused without recomputation
    pub reused_clusters: usize,
    /// Stored clusters dropped for re-evaluation
    pub invalidated_clusters: usize,
    /// Stale hash cache entries removed
    pub pruned_entries: usize,
    /// Number of similar groups reported
    pub similar_groups: usize,
    /// Whether the run stopped at a chunk boundary on cancellation
    pub interrupted: bool,
}

/// Result of a similarity run.
#[derive(Debug, Clone, Default)]
pub struct SimilarityOutcome {
    /// Similar groups, largest first
    pub groups: Vec<ScanResultGroup>,
    /// Files whose hash could not be computed, sorted
    pub unscannable: Vec<PathBuf>,
    /// Run statistics
    pub stats: SimilarityStats,
}

/// An item with its perceptual fingerprint.
#[derive(Debug, Clone)]
struct Hashed {
    item: MediaItem,
    hash: PerceptualHash,
    histogram: Option<Vec<f32>>,
}

enum HashResult {
    Cached(PerceptualHash, Option<Vec<f32>>),
    Computed(PerceptualHash, Option<Vec<f32>>),
    Unsupported,
    Failed(MediaError),
}

/// A stored cluster that passed invalidation, as indices into the hashed set.
struct Survivor {
    key: String,
    representative: usize,
    members: Vec<usize>,
}

/// Clusters perceptually similar media using the persistent caches.
pub struct SimilarityEngine<'a> {
    db: &'a CacheDb,
    source: &'a dyn MediaSource,
    config: SimilarityConfig,
}

impl<'a> SimilarityEngine<'a> {
    /// Create an engine over a cache database and a media source.
    #[must_use]
    pub fn new(db: &'a CacheDb, source: &'a dyn MediaSource, config: SimilarityConfig) -> Self {
        Self { db, source, config }
    }

    /// Cluster `items` into groups of similar media.
    ///
    /// On cancellation, only the items hashed so far are clustered, in
    /// memory. Stored clusters are only touched by the per-chunk
    /// invalidation of rehashed items.
    ///
    /// # Errors
    ///
    /// Cache failures and worker pool creation failures are fatal. Per-file
    /// failures only add to the unscannable list.
    pub fn run(&self, items: &[MediaItem]) -> Result<SimilarityOutcome, ScanError> {
        let mut stats = SimilarityStats {
            input_files: items.len(),
            ..Default::default()
        };
        let progress = self.config.progress_callback.as_deref();
        if let Some(cb) = progress {
            cb.on_phase_start(PHASE_PERCEPTUAL, items.len());
        }

        let mut ordered: Vec<&MediaItem> = items.iter().collect();
        ordered.sort_by(|a, b| a.path.cmp(&b.path));
        ordered.dedup_by(|a, b| a.path == b.path);

        let cached: HashMap<PathBuf, PerceptualHashCacheEntry> = self
            .db
            .perceptual_hashes()
            .read_all()?
            .into_iter()
            .map(|e| (e.path.clone(), e))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.io_threads)
            .build()?;

        let mut hashed: Vec<Hashed> = Vec::with_capacity(ordered.len());
        let mut unscannable = Vec::new();
        let mut processed = 0;

        for chunk in ordered.chunks(self.config.chunk_size) {
            if self.config.is_cancelled() {
                stats.interrupted = true;
                log::info!("Similarity scan: cancelled after {} files", processed);
                break;
            }

            let results: Vec<HashResult> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|item| self.hash_for(item, cached.get(&item.path)))
                    .collect()
            });

            let mut fresh = Vec::new();
            for (item, result) in chunk.iter().zip(results) {
                match result {
                    HashResult::Cached(hash, histogram) => {
                        stats.cache_hits += 1;
                        hashed.push(Hashed {
                            item: (*item).clone(),
                            hash,
                            histogram,
                        });
                    }
                    HashResult::Computed(hash, histogram) => {
                        stats.cache_misses += 1;
                        fresh.push(PerceptualHashCacheEntry::new(item, hash, histogram.clone()));
                        hashed.push(Hashed {
                            item: (*item).clone(),
                            hash,
                            histogram,
                        });
                    }
                    HashResult::Unsupported => {
                        stats.unsupported_files += 1;
                        log::trace!("No frame available: {}", item.path.display());
                    }
                    HashResult::Failed(e) => {
                        stats.failed_files += 1;
                        log::warn!("Unscannable: {}", e);
                        unscannable.push(item.path.clone());
                    }
                }
            }

            if !fresh.is_empty() {
                self.db.perceptual_hashes().upsert(&fresh)?;
                // A new hash voids every cluster its file belonged to.
                let rehashed: Vec<PathBuf> = fresh.into_iter().map(|e| e.path).collect();
                let dropped = self
                    .db
                    .similarity_groups()
                    .delete_clusters_containing(&rehashed)?;
                if !dropped.is_empty() {
                    log::debug!(
                        "Invalidated {} similarity clusters of {} rehashed files",
                        dropped.len(),
                        rehashed.len()
                    );
                    stats.invalidated_clusters += dropped.len();
                }
            }

            processed += chunk.len();
            if let Some(cb) = progress {
                cb.on_progress(processed);
            }
        }

        let clusters = if stats.interrupted {
            let pool_indices: Vec<usize> = (0..hashed.len()).collect();
            self.cluster_pool(&hashed, &pool_indices)
        } else {
            let clusters = self.cluster_incremental(&hashed, &mut stats)?;
            stats.pruned_entries = self.prune(items, &cached, &unscannable)?;
            clusters
        };

        let mut groups: Vec<SimilarGroup> = clusters
            .into_iter()
            .map(|(phash, members)| {
                let mut files: Vec<MediaItem> =
                    members.into_iter().map(|i| hashed[i].item.clone()).collect();
                sort_oldest_first(&mut files);
                SimilarGroup { phash, files }
            })
            .collect();
        groups.sort_by(|a, b| {
            b.files
                .len()
                .cmp(&a.files.len())
                .then_with(|| a.phash.cmp(&b.phash))
        });

        stats.similar_groups = groups.len();
        unscannable.sort();

        if let Some(cb) = progress {
            cb.on_phase_end(PHASE_PERCEPTUAL);
        }

        log::info!(
            "Similarity scan complete: {} groups, {} cache hits, {} computed, {} clusters reused",
            stats.similar_groups,
            stats.cache_hits,
            stats.cache_misses,
            stats.reused_clusters
        );

        Ok(SimilarityOutcome {
            groups: groups.into_iter().map(ScanResultGroup::Similar).collect(),
            unscannable,
            stats,
        })
    }

    fn hash_for(&self, item: &MediaItem, cached: Option<&PerceptualHashCacheEntry>) -> HashResult {
        if let Some(entry) = cached {
            if let Some(hash) = entry.hash_for(item) {
                log::trace!("Perceptual hash cache hit: {}", item.path.display());
                return HashResult::Cached(hash, entry.histogram.clone());
            }
            log::trace!("Perceptual hash cache stale: {}", item.path.display());
        }

        if item.is_video {
            match self.source.decode_video_frame(&item.path) {
                Ok(Some(frame)) => HashResult::Computed(dhash(&frame), None),
                Ok(None) => HashResult::Unsupported,
                Err(e) => HashResult::Failed(e),
            }
        } else {
            match self.source.decode_image(&item.path) {
                Ok(img) => HashResult::Computed(dhash(&img), Some(color_histogram(&img))),
                Err(e) => HashResult::Failed(e),
            }
        }
    }

    /// Whether `candidate` may join the cluster represented by `rep`.
    fn joins(&self, candidate: &Hashed, rep: &Hashed) -> bool {
        let distance = candidate.hash.distance(rep.hash);
        if distance == 0 {
            return true;
        }
        if distance > self.config.threshold {
            return false;
        }
        match (
            self.config.histogram_min_similarity,
            &candidate.histogram,
            &rep.histogram,
        ) {
            (Some(min), Some(a), Some(b)) => histogram_intersection(a, b) >= min,
            _ => true,
        }
    }

    /// Reuse valid stored clusters and recluster everything else.
    fn cluster_incremental(
        &self,
        hashed: &[Hashed],
        stats: &mut SimilarityStats,
    ) -> Result<Vec<(String, Vec<usize>)>, ScanError> {
        let store = self.db.similarity_groups();
        let index_of: HashMap<&PathBuf, usize> = hashed
            .iter()
            .enumerate()
            .map(|(i, h)| (&h.item.path, i))
            .collect();

        let stored = store.clusters()?;
        let mut vanished: Vec<PathBuf> = stored
            .values()
            .flatten()
            .filter(|member| !index_of.contains_key(member))
            .cloned()
            .collect();
        vanished.sort();
        vanished.dedup();

        let dropped: HashSet<String> = store
            .delete_clusters_containing(&vanished)?
            .into_iter()
            .collect();
        stats.invalidated_clusters += dropped.len();
        if !dropped.is_empty() {
            log::debug!(
                "Invalidated {} similarity clusters touching {} missing files",
                dropped.len(),
                vanished.len()
            );
        }

        let mut rejected = Vec::new();
        let mut survivors = Vec::new();
        let mut assigned: HashSet<usize> = HashSet::new();
        for (key, members) in stored {
            if dropped.contains(&key) {
                continue;
            }
            match self.revive(&key, &members, hashed, &index_of, &assigned) {
                Some(survivor) => {
                    assigned.extend(survivor.members.iter().copied());
                    survivors.push(Some(survivor));
                }
                None => rejected.push(key),
            }
        }

        // Fold: drop survivors with any member a pool item would join.
        let mut member_index = HashIndex::new();
        for (slot, survivor) in survivors.iter().enumerate() {
            if let Some(s) = survivor {
                for &member in &s.members {
                    member_index.insert(hashed[member].hash, slot);
                }
            }
        }
        let mut pool: Vec<usize> = (0..hashed.len()).filter(|i| !assigned.contains(i)).collect();
        let mut queue: VecDeque<usize> = pool.iter().copied().collect();
        while let Some(candidate) = queue.pop_front() {
            for slot in member_index.within(&hashed[candidate].hash, self.config.threshold) {
                let Some(survivor) = survivors[slot].as_ref() else {
                    continue;
                };
                if !survivor
                    .members
                    .iter()
                    .any(|&m| self.joins(&hashed[candidate], &hashed[m]))
                {
                    continue;
                }
                if let Some(survivor) = survivors[slot].take() {
                    log::debug!("Similarity cluster {} absorbs new items, reclustering", survivor.key);
                    rejected.push(survivor.key);
                    pool.extend(survivor.members.iter().copied());
                    queue.extend(survivor.members);
                }
            }
        }

        if !rejected.is_empty() {
            stats.invalidated_clusters += rejected.len();
            store.delete(&rejected)?;
        }

        let survivors: Vec<Survivor> = survivors.into_iter().flatten().collect();
        stats.reused_clusters = survivors.len();

        let fresh = self.cluster_pool(hashed, &pool);
        let memberships: Vec<SimilarityGroupCacheEntry> = fresh
            .iter()
            .flat_map(|(key, members)| {
                members.iter().map(move |&i| SimilarityGroupCacheEntry {
                    cluster_key: key.clone(),
                    member: hashed[i].item.path.clone(),
                })
            })
            .collect();
        if !memberships.is_empty() {
            store.upsert(&memberships)?;
        }

        let mut clusters: Vec<(String, Vec<usize>)> = survivors
            .into_iter()
            .map(|s| (s.key, s.members))
            .collect();
        clusters.extend(fresh);
        Ok(clusters)
    }

    /// Turn a stored cluster back into indices, or `None` if it is unusable.
    ///
    /// The key must be the current hash of one member, and every other
    /// member must still join that representative.
    fn revive(
        &self,
        key: &str,
        members: &[PathBuf],
        hashed: &[Hashed],
        index_of: &HashMap<&PathBuf, usize>,
        assigned: &HashSet<usize>,
    ) -> Option<Survivor> {
        let Some(key_hash) = PerceptualHash::from_hex(key) else {
            log::debug!("Dropping similarity cluster with malformed key {:?}", key);
            return None;
        };
        let indices: Vec<usize> = members
            .iter()
            .map(|m| index_of.get(m).copied())
            .collect::<Option<Vec<_>>>()?;
        if indices.len() < 2 || indices.iter().any(|i| assigned.contains(i)) {
            return None;
        }
        let Some(representative) = indices.iter().copied().find(|&i| hashed[i].hash == key_hash)
        else {
            log::debug!("Dropping similarity cluster {}: no member has its hash", key);
            return None;
        };
        if !indices
            .iter()
            .all(|&i| self.joins(&hashed[i], &hashed[representative]))
        {
            log::debug!("Dropping similarity cluster {}: members drifted apart", key);
            return None;
        }
        Some(Survivor {
            key: key.to_string(),
            representative,
            members: indices,
        })
    }

    /// Greedy clustering of `pool`, representatives visited oldest first.
    fn cluster_pool(&self, hashed: &[Hashed], pool: &[usize]) -> Vec<(String, Vec<usize>)> {
        let mut order: Vec<usize> = pool.to_vec();
        order.sort_by(|&a, &b| hashed[a].item.age_key().cmp(&hashed[b].item.age_key()));
        order.dedup();

        let mut index = HashIndex::new();
        for &i in &order {
            index.insert(hashed[i].hash, i);
        }

        let mut assigned: HashSet<usize> = HashSet::new();
        let mut clusters: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for &rep in &order {
            if !assigned.insert(rep) {
                continue;
            }
            let mut members = vec![rep];
            for candidate in index.within(&hashed[rep].hash, self.config.threshold) {
                if assigned.contains(&candidate) {
                    continue;
                }
                if self.joins(&hashed[candidate], &hashed[rep]) {
                    assigned.insert(candidate);
                    members.push(candidate);
                }
            }
            if members.len() > 1 {
                clusters.insert(hashed[rep].hash.to_hex(), members);
            }
        }
        clusters.into_iter().collect()
    }

    /// Delete hash entries for identities outside `items` and failed files.
    fn prune(
        &self,
        items: &[MediaItem],
        cached: &HashMap<PathBuf, PerceptualHashCacheEntry>,
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
        log::debug!("Pruning {} perceptual hash cache entries", stale.len());
        Ok(self.db.perceptual_hashes().delete(&stale)?)
    }
}

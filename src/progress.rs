//! Progress reporting utilities using indicatif.
//!
//! Engines report through the [`ProgressCallback`] trait; [`Progress`] is the
//! terminal implementation used by the command-line interface.
//!
//! Progress counts are cumulative per phase and never decrease. Engines
//! report once per processed chunk rather than once per file.

use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Phase name of exact signature computation.
pub const PHASE_SIGNATURES: &str = "signatures";
/// Phase name of perceptual hash computation and clustering.
pub const PHASE_PERCEPTUAL: &str = "perceptual";

/// Progress callback for scan phases.
///
/// Implement this trait to receive progress updates during a scan.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase (e.g., [`PHASE_SIGNATURES`])
    /// * `total` - Total number of items the phase will account for
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called after each chunk with the number of items processed so far.
    fn on_progress(&self, processed: usize);

    /// Called when a phase completes, including when it was cancelled.
    fn on_phase_end(&self, phase: &str);

    /// Called to update the progress message.
    fn on_message(&self, _message: &str) {}
}

/// Progress reporter using indicatif.
pub struct Progress {
    multi: MultiProgress,
    active: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `quiet` - If true, no progress bars will be displayed.
    ///
    /// # Examples
    ///
    /// ```
    /// use mediadupe::progress::Progress;
    ///
    /// let progress = Progress::new(false);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            active: Mutex::new(None),
            quiet,
        }
    }

    fn bar_style(phase: &str) -> ProgressStyle {
        let template = if phase == PHASE_SIGNATURES {
            "[{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} ({percent}%) {msg} {per_sec} (ETA: {eta})"
        } else {
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})"
        };
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█>-")
    }

    fn with_active(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.active.lock() {
            if let Some(ref pb) = *guard {
                f(pb);
            }
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }

        let pb = self.multi.add(ProgressBar::new(total as u64));
        pb.set_style(Self::bar_style(phase));
        pb.set_message(match phase {
            PHASE_SIGNATURES => "Computing signatures".to_string(),
            PHASE_PERCEPTUAL => "Computing perceptual hashes".to_string(),
            other => other.to_string(),
        });

        if let Ok(mut active) = self.active.lock() {
            if let Some(previous) = active.replace(pb) {
                previous.finish_and_clear();
            }
        }
    }

    fn on_progress(&self, processed: usize) {
        if self.quiet {
            return;
        }
        self.with_active(|pb| pb.set_position(processed as u64));
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }

        let finished = self.active.lock().ok().and_then(|mut active| active.take());
        if let Some(pb) = finished {
            let message = match phase {
                PHASE_SIGNATURES => "Signatures complete",
                PHASE_PERCEPTUAL => "Perceptual hashing complete",
                _ => "Done",
            };
            pb.finish_with_message(message);
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.with_active(|pb| pb.set_message(message.to_string()));
    }
}

//! The album shuffle engine.
//!
//! Drives a [`ShuffleManifest`] through its lifecycle:
//!
//! 1. [`enable`](ShuffleEngine::enable) lists the source and creates the
//!    manifest, binding it to a photo spec.
//! 2. [`prepare_next_batch`](ShuffleEngine::prepare_next_batch) prepares up
//!    to `n` eligible entries. Each entry is its own error boundary: a
//!    failure marks that entry `failed` and the batch moves on.
//! 3. [`advance_to_next_prepared`](ShuffleEngine::advance_to_next_prepared)
//!    and scheduled rotation move the current entry.
//! 4. [`disable`] unbinds the manifest. Files are left in place.
//!
//! The slow part of a batch (fetch, prepare, score) runs without holding the
//! manifest lock. Results are merged back by entry id in one short update,
//! so rotation or crop edits made meanwhile are not lost.
//!
//! Only one batch per manifest runs at a time; a second caller gets
//! [`BatchOutcome::skipped`] straight away.

use crate::config::DriverPacing;
use crate::detect::{DetectorEnsemble, SidecarFile};
use crate::manifest::{Advance, FAILED_FLAG, ManifestError, ManifestStore, ShuffleManifest};
use crate::pipeline::{Pipeline, PipelineError, verify_renders};
use crate::scorer::{QualityScore, QualityScorer};
use crate::source::{PhotoSource, SourceError};
use crate::store::RefreshSignal;
use crate::types::SmartPhotoSpec;
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ShuffleError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("photo source: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Result of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    pub prepared: usize,
    pub failed: usize,
    /// Whether the manifest was written.
    pub updated: bool,
}

impl BatchOutcome {
    /// Another batch for the same manifest was already running.
    pub fn skipped() -> Self {
        Self::default()
    }
}

/// Cooperative cancellation shared between a driver and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock() = true;
        wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `duration` or until cancelled. Returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let mut cancelled = flag.lock();
        if !*cancelled && !duration.is_zero() {
            let _ = wake.wait_while_for(&mut cancelled, |c| !*c, duration);
        }
        *cancelled
    }
}

/// What the driver asks of its host between batches.
pub trait DriveHost: Send + Sync {
    /// The host is in the foreground; batches may run.
    fn is_active(&self) -> bool {
        true
    }

    /// Manifest currently bound to the photo being driven. The driver stops
    /// as soon as this no longer names the manifest it started with.
    fn bound_manifest(&self) -> Option<String>;
}

/// A host that is always active and bound to one manifest.
#[derive(Debug, Clone)]
pub struct BoundTo(pub String);

impl DriveHost for BoundTo {
    fn bound_manifest(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Totals over one [`drive`](ShuffleEngine::drive) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveSummary {
    pub batches: usize,
    pub prepared: usize,
    pub failed: usize,
}

/// Clear the shuffle binding of `spec`, returning the manifest name it had.
pub fn disable(spec: &mut SmartPhotoSpec) -> Option<String> {
    let previous = spec.shuffle_manifest.take();
    if let Some(name) = &previous {
        info!(manifest = %name, "album shuffle disabled");
    }
    previous
}

/// Catch up, then step to the next prepared entry.
///
/// These manifest-only operations need no photo source, so they are free
/// functions over the [`ManifestStore`]; [`ShuffleEngine`] forwards to them.
pub fn advance(
    manifests: &ManifestStore,
    name: &str,
    refresh: &dyn RefreshSignal,
) -> Result<Advance, ShuffleError> {
    let advance = manifests.update(name, |m| {
        let now = Utc::now();
        m.catch_up_rotation(now);
        m.advance_to_next_prepared(now)
    })?;
    if let Advance::Advanced { .. } = advance {
        refresh.refresh("shuffle advanced");
    }
    Ok(advance)
}

/// Catch up, then change the rotation interval. Zero turns rotation off.
pub fn change_interval(
    manifests: &ManifestStore,
    name: &str,
    minutes: i64,
    refresh: &dyn RefreshSignal,
) -> Result<(), ShuffleError> {
    manifests.update(name, |m| {
        let now = Utc::now();
        m.catch_up_rotation(now);
        m.set_rotation_interval(minutes, now);
    })?;
    refresh.refresh("shuffle interval changed");
    Ok(())
}

/// Apply any overdue rotation. Returns whether the manifest changed.
pub fn catch_up(
    manifests: &ManifestStore,
    name: &str,
    refresh: &dyn RefreshSignal,
) -> Result<bool, ShuffleError> {
    let changed = manifests.update(name, |m| m.catch_up_rotation(Utc::now()))?;
    if changed {
        refresh.refresh("shuffle rotation caught up");
    }
    Ok(changed)
}

/// Make failed entries eligible again. Returns how many were reset.
pub fn reset_failed(manifests: &ManifestStore, name: &str) -> Result<usize, ShuffleError> {
    let count = manifests.update(name, ShuffleManifest::reset_failed)?;
    if count > 0 {
        info!(manifest = %name, count, "reset failed entries");
    }
    Ok(count)
}

struct PreparedEntry {
    spec: SmartPhotoSpec,
    score: QualityScore,
}

/// Removes a manifest from the in-flight set on drop.
struct FlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.name);
    }
}

pub struct ShuffleEngine {
    pipeline: Pipeline,
    manifests: ManifestStore,
    source: Arc<dyn PhotoSource>,
    scorer: Arc<dyn QualityScorer>,
    refresh: Arc<dyn RefreshSignal>,
    in_flight: Mutex<HashSet<String>>,
}

impl ShuffleEngine {
    pub fn new(
        pipeline: Pipeline,
        manifests: ManifestStore,
        source: Arc<dyn PhotoSource>,
        scorer: Arc<dyn QualityScorer>,
        refresh: Arc<dyn RefreshSignal>,
    ) -> Self {
        Self {
            pipeline,
            manifests,
            source,
            scorer,
            refresh,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    fn begin_flight(&self, name: &str) -> Option<FlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock();
        in_flight.insert(name.to_string()).then(|| FlightGuard {
            in_flight: &self.in_flight,
            name: name.to_string(),
        })
    }

    fn is_in_flight(&self, name: &str) -> bool {
        self.in_flight.lock().contains(name)
    }

    /// Create a manifest over the source's current candidates and bind it to
    /// `spec`. Returns the manifest name.
    pub fn enable(
        &self,
        spec: &mut SmartPhotoSpec,
        rotation_interval_minutes: i64,
    ) -> Result<String, ShuffleError> {
        let ids = self.source.list()?;
        if ids.is_empty() {
            warn!(source = %self.source.source_id(), "album has no eligible photos");
        }
        let manifest = ShuffleManifest::new(
            self.source.source_id(),
            ids,
            rotation_interval_minutes,
            Utc::now(),
        );
        let name = self.manifests.create(&manifest)?;
        spec.shuffle_manifest = Some(name.clone());
        self.refresh.refresh("album shuffle enabled");
        Ok(name)
    }

    /// Prepare up to `limit` eligible entries of `name`.
    ///
    /// Catches up scheduled rotation first. Cancellation is checked between
    /// entries; an entry in progress always completes.
    pub fn prepare_next_batch(
        &self,
        name: &str,
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome, ShuffleError> {
        let Some(_flight) = self.begin_flight(name) else {
            debug!(manifest = %name, "batch already running, skipping");
            return Ok(BatchOutcome::skipped());
        };

        let ids = self.manifests.update(name, |m| {
            m.catch_up_rotation(Utc::now());
            m.eligible_ids(limit)
        })?;
        info!(manifest = %name, entries = ids.len(), "preparing batch");

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if cancel.is_cancelled() {
                info!(manifest = %name, "batch cancelled");
                break;
            }
            let result = self.prepare_entry(&id);
            if let Err(e) = &result {
                warn!(manifest = %name, entry = %id, error = %e, "entry failed");
            }
            results.push((id, result));
        }

        let produced: Vec<String> = results
            .iter()
            .filter_map(|(_, result)| result.as_ref().ok())
            .flat_map(|p| p.spec.referenced_files())
            .map(str::to_string)
            .collect();
        let (outcome, orphaned) = match self.manifests.update(name, |m| merge_batch(m, results)) {
            Ok(merged) => merged,
            Err(e) => {
                warn!(
                    manifest = %name,
                    files = produced.len(),
                    error = %e,
                    "batch merge failed, discarding its files"
                );
                self.discard(&produced);
                return Err(e.into());
            }
        };
        // Entries that vanished while we worked.
        self.discard(&orphaned);

        info!(
            manifest = %name,
            prepared = outcome.prepared,
            failed = outcome.failed,
            "batch finished"
        );
        if outcome.prepared > 0 {
            self.refresh.refresh("shuffle batch prepared photos");
        }
        Ok(outcome)
    }

    fn detectors_for(&self, id: &str) -> DetectorEnsemble {
        let base = self.pipeline.detectors();
        let Some(path) = self.source.sidecar(id) else {
            return base.clone();
        };
        match SidecarFile::load(&path) {
            Ok(file) => base.extended(file.detectors()),
            Err(e) => {
                warn!(entry = %id, sidecar = %path.display(), error = %e, "ignoring unreadable sidecar");
                base.clone()
            }
        }
    }

    fn prepare_entry(&self, id: &str) -> Result<PreparedEntry, ShuffleError> {
        let bytes = self.source.fetch(id)?;
        let detectors = self.detectors_for(id);
        let spec = self.pipeline.prepare_with(&bytes, &detectors)?;
        if let Err(e) = verify_renders(&spec, self.pipeline.store()) {
            let files: Vec<String> =
                spec.referenced_files().into_iter().map(str::to_string).collect();
            self.discard(&files);
            return Err(e.into());
        }
        let score = self.scorer.score(id, &bytes, &spec, &detectors);
        Ok(PreparedEntry { spec, score })
    }

    fn discard(&self, files: &[String]) {
        for file in files {
            if let Err(e) = self.pipeline.store().delete(file) {
                warn!(%file, error = %e, "could not delete batch output");
            }
        }
    }

    /// See [`advance`].
    pub fn advance_to_next_prepared(&self, name: &str) -> Result<Advance, ShuffleError> {
        advance(&self.manifests, name, self.refresh.as_ref())
    }

    /// See [`change_interval`].
    pub fn set_rotation_interval(&self, name: &str, minutes: i64) -> Result<(), ShuffleError> {
        change_interval(&self.manifests, name, minutes, self.refresh.as_ref())
    }

    /// See [`catch_up`].
    pub fn catch_up(&self, name: &str) -> Result<bool, ShuffleError> {
        catch_up(&self.manifests, name, self.refresh.as_ref())
    }

    /// See [`reset_failed`].
    pub fn reset_failed(&self, name: &str) -> Result<usize, ShuffleError> {
        reset_failed(&self.manifests, name)
    }

    /// Prepare batches until nothing is eligible, the host unbinds the
    /// manifest, or `cancel` fires.
    pub fn drive(
        &self,
        name: &str,
        host: &dyn DriveHost,
        cancel: &CancelToken,
        pacing: DriverPacing,
        batch_size: usize,
    ) -> Result<DriveSummary, ShuffleError> {
        let mut summary = DriveSummary::default();
        if cancel.sleep(pacing.settle) {
            return Ok(summary);
        }
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if host.bound_manifest().as_deref() != Some(name) {
                info!(manifest = %name, "manifest unbound, stopping driver");
                break;
            }
            if !host.is_active() {
                if cancel.sleep(pacing.idle_poll) {
                    break;
                }
                continue;
            }
            if self.is_in_flight(name) {
                if cancel.sleep(pacing.busy_poll) {
                    break;
                }
                continue;
            }
            if !self.manifests.load(name)?.has_eligible() {
                debug!(manifest = %name, "nothing left to prepare");
                break;
            }

            let outcome = self.prepare_next_batch(name, batch_size.max(1), cancel)?;
            if !outcome.updated {
                // Lost the race to another batch.
                if cancel.sleep(pacing.busy_poll) {
                    break;
                }
                continue;
            }
            summary.batches += 1;
            summary.prepared += outcome.prepared;
            summary.failed += outcome.failed;
            if outcome.prepared + outcome.failed == 0 || cancel.sleep(pacing.batch_pause) {
                break;
            }
        }
        info!(
            manifest = %name,
            batches = summary.batches,
            prepared = summary.prepared,
            failed = summary.failed,
            "driver stopped"
        );
        Ok(summary)
    }
}

/// Fold batch results into `m` by entry id and re-sort. Returns the outcome
/// and the files of prepared entries no longer in the manifest.
fn merge_batch(
    m: &mut ShuffleManifest,
    results: Vec<(String, Result<PreparedEntry, ShuffleError>)>,
) -> (BatchOutcome, Vec<String>) {
    let mut outcome = BatchOutcome {
        updated: true,
        ..BatchOutcome::default()
    };
    let mut orphaned = Vec::new();
    for (id, result) in results {
        let Some(entry) = m.entry_mut(&id) else {
            if let Ok(prepared) = result {
                orphaned.extend(prepared.spec.referenced_files().into_iter().map(str::to_string));
            }
            continue;
        };
        match result {
            Ok(PreparedEntry { spec, score }) => {
                entry.source_file = Some(spec.master_file.clone());
                for (size, variant) in spec.variants.iter() {
                    let slot = entry.variants.get_mut(size);
                    slot.file = Some(variant.render_file.clone());
                    slot.auto_crop = Some(variant.crop);
                }
                entry.prepared_at = Some(spec.prepared_at);
                entry.score = Some(score.score);
                entry.merge_flags(score.flags);
                entry.flags.remove(FAILED_FLAG);
                outcome.prepared += 1;
            }
            Err(_) => {
                entry.flags.insert(FAILED_FLAG.to_string());
                outcome.failed += 1;
            }
        }
    }
    m.resort_prepared_by_score();
    (outcome, orphaned)
}

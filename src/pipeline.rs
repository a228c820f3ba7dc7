//! The prepare pipeline: one photo in, a master and three widget renders out.
//!
//! ```text
//! bytes ─► decode + orient ─┬─► analysis image ─► detectors ─► plan_crop ×3
//!                           └─► master image ─────────────────► render ×3 ─► encode ─► store
//! ```
//!
//! The three renders of one photo are produced in parallel with
//! [rayon](https://docs.rs/rayon). Whole runs are bounded by a
//! [`PipelineGate`], a counting semaphore shared by every caller that
//! decodes or renders (prepare, regenerate, manual crops), so a batch of
//! imports cannot exhaust memory.

use crate::config::{Config, effective_permits};
use crate::detect::{DetectorEnsemble, SubjectDetection};
use crate::geometry::{NormalizedRect, PixelSize};
use crate::imaging::{
    DecodeError, EncodeError, EncodeSettings, EncodedJpeg, decode::fit_within, decode_oriented,
    encode_jpeg, render,
};
use crate::naming::{MASTER_PREFIX, SPEC_PREFIX, generate_file_name, render_prefix};
use crate::planner::plan_crop;
use crate::store::{FileStore, StoreError};
use crate::types::{RenderTargets, SizeMap, SmartPhotoSpec, VariantSpec, WidgetSize};
use chrono::Utc;
use image::RgbImage;
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Version of the crop planning written into every spec.
pub const ALGORITHM_VERSION: u32 = 1;

/// What [`Pipeline::preview`] found for one photo.
#[derive(Debug, Clone)]
pub struct PlanPreview {
    pub detection: SubjectDetection,
    pub analysis: PixelSize,
    pub crops: SizeMap<NormalizedRect>,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("no {0} render was produced")]
    MissingVariant(WidgetSize),
    #[error("source file missing: {0}")]
    SourceMissing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Gate
// ============================================================================

/// Counting semaphore limiting concurrent pipeline runs.
#[derive(Debug)]
pub struct PipelineGate {
    capacity: usize,
    available: Mutex<usize>,
    released: Condvar,
}

impl PipelineGate {
    /// A gate with `permits` slots (at least one).
    pub fn new(permits: usize) -> Self {
        let capacity = permits.max(1);
        Self {
            capacity,
            available: Mutex::new(capacity),
            released: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until a permit is free. The permit is returned on drop.
    pub fn acquire(&self) -> GatePermit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        GatePermit { gate: self }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit<'_>> {
        let mut available = self.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(GatePermit { gate: self })
    }
}

/// Held for the duration of one pipeline run.
#[must_use]
#[derive(Debug)]
pub struct GatePermit<'a> {
    gate: &'a PipelineGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        *self.gate.available.lock() += 1;
        self.gate.released.notify_one();
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Everything a pipeline run needs to know besides the photo.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub analysis_max_edge: u32,
    pub master_max_edge: u32,
    pub targets: RenderTargets,
    pub master_encode: EncodeSettings,
    pub render_encode: SizeMap<EncodeSettings>,
    pub manual_encode: EncodeSettings,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            analysis_max_edge: config.pipeline.analysis_max_edge,
            master_max_edge: config.pipeline.master_max_edge,
            targets: config.render_targets(),
            master_encode: config.encoding.master(),
            render_encode: SizeMap::from_fn(|size| config.encoding.render(size)),
            manual_encode: config.encoding.manual(),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Prepares photos into [`SmartPhotoSpec`]s.
///
/// Cheap to clone; clones share the store, detectors and gate.
#[derive(Debug, Clone)]
pub struct Pipeline {
    settings: PipelineSettings,
    store: FileStore,
    detectors: DetectorEnsemble,
    gate: Arc<PipelineGate>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        store: FileStore,
        detectors: DetectorEnsemble,
        gate: Arc<PipelineGate>,
    ) -> Self {
        Self {
            settings,
            store,
            detectors,
            gate,
        }
    }

    /// Pipeline with built-in detectors and a gate sized from config.
    pub fn from_config(config: &Config, store: FileStore) -> Self {
        let permits = effective_permits(&config.pipeline);
        debug!(permits, "pipeline gate");
        Self::new(
            PipelineSettings::from_config(config),
            store,
            DetectorEnsemble::builtin(),
            Arc::new(PipelineGate::new(permits)),
        )
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn detectors(&self) -> &DetectorEnsemble {
        &self.detectors
    }

    pub fn gate(&self) -> &PipelineGate {
        &self.gate
    }

    /// Prepare one photo with the pipeline's own detectors.
    pub fn prepare(&self, bytes: &[u8]) -> Result<SmartPhotoSpec, PipelineError> {
        self.prepare_with(bytes, &self.detectors)
    }

    /// Prepare one photo with an explicit detector set.
    ///
    /// Writes the master and three renders to the store. Nothing is left
    /// behind when a step fails.
    pub fn prepare_with(
        &self,
        bytes: &[u8],
        detectors: &DetectorEnsemble,
    ) -> Result<SmartPhotoSpec, PipelineError> {
        let _permit = self.gate.acquire();

        let oriented = decode_oriented(bytes)?;
        let analysis = fit_within(oriented.clone(), self.settings.analysis_max_edge);
        let master = fit_within(oriented, self.settings.master_max_edge);
        debug!(
            analysis = %PixelSize::new(analysis.width(), analysis.height()),
            master = %PixelSize::new(master.width(), master.height()),
            "decoded photo"
        );

        let crops = self.plan(&analysis, detectors);
        let master_jpeg = encode_jpeg(&master, &self.settings.master_encode)?;
        let renders = self.render_all(&master, &crops)?;

        let mut written = Vec::new();
        let result = self.write_outputs(&master_jpeg, renders, &mut written);
        if result.is_err() {
            self.discard(&written);
        }
        let (master_file, variants) = result?;

        let spec = SmartPhotoSpec {
            master_file,
            default_file: variants.medium.render_file.clone(),
            variants,
            algorithm_version: ALGORITHM_VERSION,
            prepared_at: Utc::now(),
            shuffle_manifest: None,
        };
        info!(master = %spec.master_file, "prepared photo");
        Ok(spec)
    }

    /// Re-plan and re-render every variant from the stored master.
    ///
    /// The result replaces the spec entirely: manual overrides are dropped,
    /// since their crops were chosen against the old renders. The previous
    /// automatic and manual renders are deleted once the new ones are written.
    pub fn regenerate(&self, spec: &SmartPhotoSpec) -> Result<SmartPhotoSpec, PipelineError> {
        if !self.store.exists(&spec.master_file) {
            return Err(PipelineError::SourceMissing(spec.master_file.clone()));
        }
        let _permit = self.gate.acquire();

        let master = decode_oriented(&self.store.read(&spec.master_file)?)?;
        let analysis = fit_within(master.clone(), self.settings.analysis_max_edge);
        let crops = self.plan(&analysis, &self.detectors);
        let renders = self.render_all(&master, &crops)?;

        let mut written = Vec::new();
        let variants = match self.write_renders(renders, &mut written) {
            Ok(v) => v,
            Err(e) => {
                self.discard(&written);
                return Err(e);
            }
        };

        let mut updated = spec.clone();
        for size in WidgetSize::ALL {
            let old = std::mem::replace(updated.variant_mut(size), variants.get(size).clone());
            let replaced = std::iter::once(old.render_file).chain(old.manual.map(|m| m.file));
            for file in replaced {
                if let Err(e) = self.store.delete(&file) {
                    warn!(%file, error = %e, "could not delete replaced render");
                }
            }
        }
        updated.default_file = updated.variant(WidgetSize::Medium).render_file.clone();
        updated.algorithm_version = ALGORITHM_VERSION;
        updated.prepared_at = Utc::now();
        info!(master = %updated.master_file, "regenerated renders");
        Ok(updated)
    }

    /// Detect and plan without rendering or writing anything.
    pub fn preview(
        &self,
        bytes: &[u8],
        detectors: &DetectorEnsemble,
    ) -> Result<PlanPreview, PipelineError> {
        let _permit = self.gate.acquire();
        let analysis = fit_within(decode_oriented(bytes)?, self.settings.analysis_max_edge);
        let analysis_size = PixelSize::new(analysis.width(), analysis.height());
        let detection = detectors.detect(&analysis);
        let crops = self.crops_for(&detection, analysis_size);
        Ok(PlanPreview {
            detection,
            analysis: analysis_size,
            crops,
        })
    }

    fn plan(&self, analysis: &RgbImage, detectors: &DetectorEnsemble) -> SizeMap<NormalizedRect> {
        let detection = detectors.detect(analysis);
        self.crops_for(&detection, PixelSize::new(analysis.width(), analysis.height()))
    }

    fn crops_for(
        &self,
        detection: &SubjectDetection,
        analysis: PixelSize,
    ) -> SizeMap<NormalizedRect> {
        SizeMap::from_fn(|size| plan_crop(size, *self.settings.targets.get(size), detection, analysis))
    }

    fn render_all(
        &self,
        master: &RgbImage,
        crops: &SizeMap<NormalizedRect>,
    ) -> Result<Vec<(WidgetSize, NormalizedRect, EncodedJpeg)>, PipelineError> {
        let renders = WidgetSize::ALL
            .par_iter()
            .map(|&size| {
                let crop = *crops.get(size);
                let target = *self.settings.targets.get(size);
                let image = render(master, &crop, target);
                let jpeg = encode_jpeg(&image, self.settings.render_encode.get(size))?;
                debug!(
                    %size,
                    bytes = jpeg.bytes.len(),
                    quality = jpeg.quality.percent(),
                    "rendered variant"
                );
                Ok((size, crop, jpeg))
            })
            .collect::<Result<Vec<_>, EncodeError>>()?;
        Ok(renders)
    }

    fn write_outputs(
        &self,
        master: &EncodedJpeg,
        renders: Vec<(WidgetSize, NormalizedRect, EncodedJpeg)>,
        written: &mut Vec<String>,
    ) -> Result<(String, SizeMap<VariantSpec>), PipelineError> {
        let master_file = self.store.write_new(MASTER_PREFIX, "jpg", &master.bytes)?;
        written.push(master_file.clone());
        let variants = self.write_renders(renders, written)?;
        Ok((master_file, variants))
    }

    fn write_renders(
        &self,
        renders: Vec<(WidgetSize, NormalizedRect, EncodedJpeg)>,
        written: &mut Vec<String>,
    ) -> Result<SizeMap<VariantSpec>, PipelineError> {
        let mut slots: SizeMap<Option<VariantSpec>> = SizeMap::default();
        for (size, crop, jpeg) in renders {
            let file = self.store.write_new(render_prefix(size), "jpg", &jpeg.bytes)?;
            written.push(file.clone());
            *slots.get_mut(size) = Some(VariantSpec {
                render_file: file,
                crop,
                pixel_size: *self.settings.targets.get(size),
                manual: None,
            });
        }
        let take = |slot: Option<VariantSpec>, size| slot.ok_or(PipelineError::MissingVariant(size));
        Ok(SizeMap {
            small: take(slots.small, WidgetSize::Small)?,
            medium: take(slots.medium, WidgetSize::Medium)?,
            large: take(slots.large, WidgetSize::Large)?,
        })
    }

    fn discard(&self, files: &[String]) {
        for file in files {
            if let Err(e) = self.store.delete(file) {
                warn!(%file, error = %e, "could not clean up partial output");
            }
        }
    }

    /// Persist a spec document under a fresh name.
    pub fn save_spec(&self, spec: &SmartPhotoSpec) -> Result<String, PipelineError> {
        let name = generate_file_name(SPEC_PREFIX, "json");
        self.store.save_json(&name, spec)?;
        Ok(name)
    }

    pub fn load_spec(&self, name: &str) -> Result<SmartPhotoSpec, PipelineError> {
        self.store
            .load_json(name)?
            .ok_or_else(|| PipelineError::SourceMissing(name.to_string()))
    }
}

/// Check that every automatic render of `spec` exists in `store`.
pub fn verify_renders(spec: &SmartPhotoSpec, store: &FileStore) -> Result<(), PipelineError> {
    for (size, variant) in spec.variants.iter() {
        if variant.render_file.trim().is_empty() || !store.exists(&variant.render_file) {
            return Err(PipelineError::MissingVariant(size));
        }
    }
    Ok(())
}

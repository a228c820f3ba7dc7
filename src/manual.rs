//! Manual crop overrides.
//!
//! A user-chosen rectangle, straighten angle and quarter-turn count replace
//! the automatic render for one widget size. The automatic render file and
//! crop stay where they are, so resetting brings back the exact automatic
//! framing.
//!
//! Applying is ordered so that a failure never loses the current state:
//! render and write the new file, persist the reference, and only then
//! delete the previous manual render.

use crate::geometry::NormalizedRect;
use crate::imaging::{DecodeError, EncodeError, ManualTransform, decode_oriented, encode_jpeg, render_manual};
use crate::manifest::{ManifestError, ManifestStore};
use crate::naming::MANUAL_PREFIX;
use crate::pipeline::{Pipeline, PipelineError};
use crate::store::{FileStore, RefreshSignal, StoreError};
use crate::types::{ManualOverride, SmartPhotoSpec, WidgetSize};
use thiserror::Error;
use tracing::{info, warn};

/// Largest straighten angle in either direction.
pub const MAX_STRAIGHTEN_DEGREES: f64 = 45.0;

#[derive(Error, Debug)]
pub enum ManualError {
    #[error("entry {0} not found in shuffle manifest")]
    EntryNotFound(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
}

/// A manual framing request for one widget size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualCrop {
    pub size: WidgetSize,
    pub rect: NormalizedRect,
    pub straighten_degrees: f64,
    pub quarter_turns: i32,
}

/// Clamp to ±45°; non-finite or effectively zero angles become `None`.
pub fn normalised_straighten_degrees(degrees: f64) -> Option<f64> {
    if !degrees.is_finite() {
        return None;
    }
    let clamped = degrees.clamp(-MAX_STRAIGHTEN_DEGREES, MAX_STRAIGHTEN_DEGREES);
    (clamped.abs() >= 0.0001).then_some(clamped)
}

/// Reduce to 1–3 clockwise quarter turns; no turn becomes `None`.
pub fn normalised_quarter_turns(turns: i32) -> Option<i32> {
    let t = turns.rem_euclid(4);
    (t != 0).then_some(t)
}

impl ManualCrop {
    fn override_for(&self, file: String) -> ManualOverride {
        ManualOverride {
            file,
            crop: self.rect.normalised(),
            straighten_degrees: normalised_straighten_degrees(self.straighten_degrees),
            rotation_quarter_turns: normalised_quarter_turns(self.quarter_turns),
        }
    }

    fn transform(&self) -> ManualTransform {
        ManualTransform {
            quarter_turns: normalised_quarter_turns(self.quarter_turns).unwrap_or(0),
            straighten_degrees: normalised_straighten_degrees(self.straighten_degrees).unwrap_or(0.0),
        }
    }
}

/// Render the manual variant from `master_file` and write it under a new
/// name. Returns that name.
fn render_to_store(
    pipeline: &Pipeline,
    master_file: &str,
    crop: &ManualCrop,
) -> Result<String, ManualError> {
    let store = pipeline.store();
    if master_file.trim().is_empty() || !store.exists(master_file) {
        return Err(PipelineError::SourceMissing(master_file.to_string()).into());
    }
    let _permit = pipeline.gate().acquire();
    let master = decode_oriented(&store.read(master_file)?)?;
    let target = *pipeline.settings().targets.get(crop.size);
    let image = render_manual(&master, &crop.rect.normalised(), &crop.transform(), target);
    let jpeg = encode_jpeg(&image, &pipeline.settings().manual_encode)?;
    Ok(store.write_new(MANUAL_PREFIX, "jpg", &jpeg.bytes)?)
}

fn delete_replaced(store: &FileStore, old: Option<String>, new: &str) {
    if let Some(old) = old.filter(|o| o != new)
        && let Err(e) = store.delete(&old)
    {
        warn!(file = %old, error = %e, "could not delete replaced manual render");
    }
}

/// Apply a manual crop to a single-photo spec.
///
/// `spec` is changed only when the new render has been written. Editing the
/// medium size also moves the legacy `default_file` to the new render.
/// The caller persists the spec document.
pub fn apply_to_spec(
    pipeline: &Pipeline,
    spec: &mut SmartPhotoSpec,
    crop: &ManualCrop,
    refresh: &dyn RefreshSignal,
) -> Result<(), ManualError> {
    let file = render_to_store(pipeline, &spec.master_file, crop)?;
    let variant = spec.variant_mut(crop.size);
    let old = variant.manual.replace(crop.override_for(file.clone())).map(|m| m.file);
    if crop.size == WidgetSize::Medium {
        spec.default_file = file.clone();
    }
    delete_replaced(pipeline.store(), old, &file);
    info!(size = %crop.size, file = %file, "applied manual crop");
    refresh.refresh("manual crop applied");
    Ok(())
}

/// Apply a manual crop to one entry of a shuffle manifest and save it.
pub fn apply_to_entry(
    pipeline: &Pipeline,
    manifests: &ManifestStore,
    manifest_name: &str,
    entry_id: &str,
    crop: &ManualCrop,
    refresh: &dyn RefreshSignal,
) -> Result<(), ManualError> {
    let master_file = manifests
        .load(manifest_name)?
        .entry(entry_id)
        .ok_or_else(|| ManualError::EntryNotFound(entry_id.to_string()))?
        .source_file
        .clone()
        .unwrap_or_default();
    let file = render_to_store(pipeline, &master_file, crop)?;

    let persisted = manifests.update(manifest_name, |m| {
        m.entry_mut(entry_id).map(|entry| {
            let variant = entry.variants.get_mut(crop.size);
            variant
                .manual
                .replace(crop.override_for(file.clone()))
                .map(|old| old.file)
        })
    });
    let old = match persisted {
        Ok(Some(old)) => old,
        Ok(None) => {
            discard_unpersisted(pipeline.store(), &file);
            return Err(ManualError::EntryNotFound(entry_id.to_string()));
        }
        Err(e) => {
            discard_unpersisted(pipeline.store(), &file);
            return Err(e.into());
        }
    };
    delete_replaced(pipeline.store(), old, &file);
    info!(manifest = %manifest_name, entry = %entry_id, size = %crop.size, "applied manual crop");
    refresh.refresh("manual crop applied");
    Ok(())
}

/// Drop the manual override for `size` and delete its render.
pub fn reset_spec(
    store: &FileStore,
    spec: &mut SmartPhotoSpec,
    size: WidgetSize,
    refresh: &dyn RefreshSignal,
) -> Result<(), ManualError> {
    let Some(old) = spec.variant_mut(size).manual.take() else {
        return Ok(());
    };
    if size == WidgetSize::Medium {
        spec.default_file = spec.variant(size).render_file.clone();
    }
    store.delete(&old.file)?;
    refresh.refresh("manual crop reset");
    Ok(())
}

fn discard_unpersisted(store: &FileStore, file: &str) {
    if let Err(e) = store.delete(file) {
        warn!(%file, error = %e, "could not delete unused manual render");
    }
}

/// Drop an entry's manual override for `size`, save, and delete its render.
pub fn reset_entry(
    manifests: &ManifestStore,
    manifest_name: &str,
    entry_id: &str,
    size: WidgetSize,
    refresh: &dyn RefreshSignal,
) -> Result<(), ManualError> {
    let old = manifests
        .update(manifest_name, |m| {
            m.entry_mut(entry_id)
                .map(|e| e.variants.get_mut(size).manual.take())
        })?
        .ok_or_else(|| ManualError::EntryNotFound(entry_id.to_string()))?;
    if let Some(old) = old {
        manifests.files().delete(&old.file)?;
        refresh.refresh("manual crop reset");
    }
    Ok(())
}

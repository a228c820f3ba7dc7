//! The shuffle manifest: a persisted list of album photos with their
//! preparation, scoring and rotation state.
//!
//! A manifest is a JSON document (`smart-shuffle-<uuid>.json`) in the
//! [`FileStore`]. Entries move from unprepared to either prepared (all three
//! automatic renders exist) or failed (flag `"failed"`). Rotation only ever
//! lands on prepared entries.
//!
//! All mutation from the engine goes through [`ManifestStore::update`], which
//! holds a per-document lock for the whole load, modify, save cycle.

use crate::geometry::NormalizedRect;
use crate::naming::{MANIFEST_PREFIX, generate_file_name};
use crate::store::{FileStore, StoreError};
use crate::types::{ManualOverride, SizeMap, WidgetSize};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Document version written by [`ShuffleManifest::new`].
pub const MANIFEST_VERSION: u32 = 4;

/// Flag marking an entry whose preparation failed.
pub const FAILED_FLAG: &str = "failed";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("shuffle manifest not found: {0}")]
    NotFound(String),
    #[error("shuffle manifest {name} is corrupt: {source}")]
    Corrupt {
        name: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One size's renders for a manifest entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryVariant {
    /// Automatic render.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_crop: Option<NormalizedRect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<ManualOverride>,
}

impl EntryVariant {
    fn has_auto_file(&self) -> bool {
        non_blank(self.file.as_deref()).is_some()
    }
}

fn non_blank(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|n| !n.is_empty())
}

/// One photo in the album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShuffleEntry {
    /// Source-specific photo identifier.
    pub id: String,
    /// Master JPEG written during preparation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default)]
    pub variants: SizeMap<EntryVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl ShuffleEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_file: None,
            variants: SizeMap::default(),
            prepared_at: None,
            flags: BTreeSet::new(),
            score: None,
        }
    }

    /// All three automatic renders are present.
    pub fn is_prepared(&self) -> bool {
        self.variants.iter().all(|(_, v)| v.has_auto_file())
    }

    pub fn is_failed(&self) -> bool {
        self.flags.contains(FAILED_FLAG)
    }

    /// Add `flags`, trimmed. Blank flags are ignored.
    pub fn merge_flags(&mut self, flags: impl IntoIterator<Item = String>) {
        for flag in flags {
            let flag = flag.trim();
            if !flag.is_empty() {
                self.flags.insert(flag.to_string());
            }
        }
    }

    /// Neither prepared nor failed: the next batch may pick it up.
    pub fn is_eligible(&self) -> bool {
        !self.is_prepared() && !self.is_failed()
    }

    /// The file to display for `size`: the manual render when it exists in
    /// the store, otherwise the automatic render.
    pub fn file_for(&self, size: WidgetSize, store: &FileStore) -> Option<String> {
        let variant = self.variants.get(size);
        let manual = non_blank(variant.manual.as_ref().map(|m| m.file.as_str()));
        if let Some(manual) = manual
            && store.exists(manual)
        {
            return Some(manual.to_string());
        }
        non_blank(variant.file.as_deref()).map(str::to_string)
    }

    /// The crop in effect for `size`, manual first.
    pub fn effective_crop(&self, size: WidgetSize) -> Option<NormalizedRect> {
        let variant = self.variants.get(size);
        variant
            .manual
            .as_ref()
            .map(|m| m.crop)
            .or(variant.auto_crop)
    }

    /// Every file this entry references.
    pub fn referenced_files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = self.source_file.as_deref().into_iter().collect();
        for (_, v) in self.variants.iter() {
            files.extend(v.file.as_deref());
            files.extend(v.manual.as_ref().map(|m| m.file.as_str()));
        }
        files
    }
}

/// Outcome of stepping to the next prepared entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Advanced { index: usize, id: String },
    NoPreparedEntries,
}

impl fmt::Display for Advance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advance::Advanced { index, id } => write!(f, "Now showing #{} ({id}).", index + 1),
            Advance::NoPreparedEntries => f.write_str("No prepared photos yet."),
        }
    }
}

/// Counts shown by `shuffle status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub prepared: usize,
    pub failed: usize,
    pub current_index: usize,
    pub current_is_prepared: bool,
}

/// Short human label for a rotation interval.
pub fn rotation_label(minutes: i64) -> String {
    match minutes {
        m if m <= 0 => "Off".to_string(),
        m if m < 60 => format!("{m}m"),
        60 => "1h".to_string(),
        180 => "3h".to_string(),
        360 => "6h".to_string(),
        720 => "12h".to_string(),
        1440 => "1d".to_string(),
        m => format!("{}h", m / 60),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShuffleManifest {
    pub version: u32,
    pub source_id: String,
    pub entries: Vec<ShuffleEntry>,
    #[serde(default)]
    pub current_index: usize,
    /// Minutes between automatic rotations; zero or less means manual only.
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_change_at: Option<DateTime<Utc>>,
}

fn default_rotation_interval() -> i64 {
    60
}

impl ShuffleManifest {
    /// Build a manifest over `ids`. Duplicate ids are dropped (first wins).
    pub fn new(
        source_id: impl Into<String>,
        ids: impl IntoIterator<Item = String>,
        rotation_interval_minutes: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut seen = HashSet::new();
        let entries = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .map(ShuffleEntry::new)
            .collect();
        let mut manifest = Self {
            version: MANIFEST_VERSION,
            source_id: source_id.into(),
            entries,
            current_index: 0,
            rotation_interval_minutes,
            next_change_at: None,
        };
        manifest.reschedule(now);
        manifest
    }

    fn rotation_enabled(&self) -> bool {
        self.rotation_interval_minutes > 0
    }

    fn reschedule(&mut self, now: DateTime<Utc>) {
        self.next_change_at = self
            .rotation_enabled()
            .then(|| now + Duration::minutes(self.rotation_interval_minutes));
    }

    /// Pull `current_index` back into range.
    pub fn clamp_index(&mut self) {
        self.current_index = self
            .current_index
            .min(self.entries.len().saturating_sub(1));
    }

    pub fn current_entry(&self) -> Option<&ShuffleEntry> {
        self.entries.get(self.current_index)
    }

    pub fn entry(&self, id: &str) -> Option<&ShuffleEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: &str) -> Option<&mut ShuffleEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    fn prepared_positions(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_prepared())
            .map(|(i, _)| i)
            .collect()
    }

    /// Reorder prepared entries by score (highest first, unscored last,
    /// newer `prepared_at` on ties, then prior order) within the slots
    /// prepared entries already occupy. Unprepared entries do not move and
    /// `current_index` keeps pointing at the same entry.
    pub fn resort_prepared_by_score(&mut self) {
        let slots = self.prepared_positions();
        if slots.len() < 2 {
            return;
        }
        let current_id = self.current_entry().map(|e| e.id.clone());

        let mut prepared: Vec<ShuffleEntry> =
            slots.iter().map(|&i| self.entries[i].clone()).collect();
        // Stable sort keeps prior order as the final tie-break.
        prepared.sort_by(|a, b| {
            let sa = a.score.unwrap_or(f64::NEG_INFINITY);
            let sb = b.score.unwrap_or(f64::NEG_INFINITY);
            sb.total_cmp(&sa).then_with(|| b.prepared_at.cmp(&a.prepared_at))
        });
        for (slot, entry) in slots.into_iter().zip(prepared) {
            self.entries[slot] = entry;
        }

        if let Some(id) = current_id
            && let Some(pos) = self.entries.iter().position(|e| e.id == id)
        {
            self.current_index = pos;
        }
    }

    /// Position in the prepared list to rotate from: the current entry when
    /// it is prepared, else the first prepared entry.
    fn prepared_base(&self, prepared: &[usize]) -> usize {
        prepared
            .iter()
            .position(|&i| i == self.current_index)
            .unwrap_or(0)
    }

    fn rotation_due(&self, now: DateTime<Utc>) -> bool {
        self.rotation_enabled() && self.next_change_at.is_some_and(|at| now >= at)
    }

    /// Apply an overdue scheduled rotation.
    ///
    /// Moves exactly one step to the next prepared entry however many
    /// intervals were missed, and schedules the next change from `now`.
    /// Returns whether the manifest changed.
    pub fn catch_up_rotation(&mut self, now: DateTime<Utc>) -> bool {
        if !self.rotation_due(now) {
            return false;
        }
        let prepared = self.prepared_positions();
        if !prepared.is_empty() {
            let base = self.prepared_base(&prepared);
            self.current_index = prepared[(base + 1) % prepared.len()];
        }
        self.reschedule(now);
        debug!(index = self.current_index, "caught up rotation");
        true
    }

    /// Step forward (wrapping) to the next prepared entry.
    pub fn advance_to_next_prepared(&mut self, now: DateTime<Utc>) -> Advance {
        let total = self.entries.len();
        let found = (1..=total)
            .map(|step| (self.current_index + step) % total)
            .find(|&i| self.entries[i].is_prepared());
        match found {
            Some(index) => {
                self.current_index = index;
                if self.rotation_enabled() {
                    self.reschedule(now);
                }
                Advance::Advanced {
                    index,
                    id: self.entries[index].id.clone(),
                }
            }
            None => Advance::NoPreparedEntries,
        }
    }

    /// Change the rotation interval. Zero or less turns rotation off.
    pub fn set_rotation_interval(&mut self, minutes: i64, now: DateTime<Utc>) {
        self.rotation_interval_minutes = minutes.max(0);
        self.reschedule(now);
    }

    pub fn progress(&self) -> ProgressSummary {
        ProgressSummary {
            total: self.entries.len(),
            prepared: self.entries.iter().filter(|e| e.is_prepared()).count(),
            failed: self.entries.iter().filter(|e| e.is_failed()).count(),
            current_index: self.current_index,
            current_is_prepared: self.current_entry().is_some_and(ShuffleEntry::is_prepared),
        }
    }

    /// Ids of up to `limit` entries a batch should prepare, in list order.
    pub fn eligible_ids(&self, limit: usize) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_eligible())
            .take(limit)
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn has_eligible(&self) -> bool {
        self.entries.iter().any(ShuffleEntry::is_eligible)
    }

    /// Clear the failed flag everywhere. Returns how many entries changed.
    pub fn reset_failed(&mut self) -> usize {
        self.entries
            .iter_mut()
            .map(|e| e.flags.remove(FAILED_FLAG))
            .filter(|&removed| removed)
            .count()
    }

    /// The entry a widget should show at `now`, without mutating the
    /// manifest: one step ahead when a rotation is due, else the current
    /// entry if prepared, else the first prepared entry.
    pub fn entry_for_render(&self, now: DateTime<Utc>) -> Option<&ShuffleEntry> {
        let prepared = self.prepared_positions();
        if prepared.is_empty() {
            return None;
        }
        let base = self.prepared_base(&prepared);
        let step = usize::from(self.rotation_due(now));
        Some(&self.entries[prepared[(base + step) % prepared.len()]])
    }
}

/// Loads and saves manifests, serialising access per document.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    files: FileStore,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ManifestStore {
    pub fn new(files: FileStore) -> Self {
        Self {
            files,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Persist a new manifest under a generated name and return that name.
    pub fn create(&self, manifest: &ShuffleManifest) -> Result<String, ManifestError> {
        let name = generate_file_name(MANIFEST_PREFIX, "json");
        self.save(&name, manifest)?;
        info!(
            manifest = %name,
            entries = manifest.entries.len(),
            "created shuffle manifest"
        );
        Ok(name)
    }

    pub fn load(&self, name: &str) -> Result<ShuffleManifest, ManifestError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock();
        self.load_unlocked(name)
    }

    fn load_unlocked(&self, name: &str) -> Result<ShuffleManifest, ManifestError> {
        let mut manifest: ShuffleManifest = match self.files.load_json(name) {
            Ok(Some(m)) => m,
            Ok(None) => return Err(ManifestError::NotFound(name.to_string())),
            Err(StoreError::Json(source)) => {
                warn!(manifest = %name, error = %source, "manifest failed to parse");
                return Err(ManifestError::Corrupt {
                    name: name.to_string(),
                    source,
                });
            }
            Err(e) => return Err(e.into()),
        };
        manifest.clamp_index();
        Ok(manifest)
    }

    pub fn save(&self, name: &str, manifest: &ShuffleManifest) -> Result<(), ManifestError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock();
        self.save_unlocked(name, manifest)
    }

    fn save_unlocked(&self, name: &str, manifest: &ShuffleManifest) -> Result<(), ManifestError> {
        let mut manifest = manifest.clone();
        manifest.clamp_index();
        self.files.save_json(name, &manifest)?;
        Ok(())
    }

    /// Load, modify and save `name` while holding its lock.
    ///
    /// `f` should be quick; long work belongs outside and is merged back in
    /// a second `update`.
    pub fn update<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ShuffleManifest) -> R,
    ) -> Result<R, ManifestError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock();
        let mut manifest = self.load_unlocked(name)?;
        let result = f(&mut manifest);
        self.save_unlocked(name, &manifest)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(minutes)
    }

    fn prepare(entry: &mut ShuffleEntry, score: Option<f64>) {
        for size in WidgetSize::ALL {
            entry.variants.get_mut(size).file = Some(format!("{}-{size}.jpg", entry.id));
        }
        entry.score = score;
        entry.prepared_at = Some(at(0));
    }

    fn manifest(ids: &[&str], interval: i64) -> ShuffleManifest {
        ShuffleManifest::new("src", ids.iter().map(|s| s.to_string()), interval, at(0))
    }

    /// Manifest with the listed positions prepared.
    fn with_prepared(n: usize, prepared: &[usize], interval: i64) -> ShuffleManifest {
        let ids: Vec<String> = (0..n).map(|i| format!("p{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut m = manifest(&refs, interval);
        for &i in prepared {
            prepare(&mut m.entries[i], Some(0.0));
        }
        m
    }

    // =========================================================================
    // Entries
    // =========================================================================

    #[test]
    fn new_drops_duplicate_ids_keeping_first() {
        let m = manifest(&["a", "b", "a", "c", "b"], 60);
        let ids: Vec<_> = m.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(m.version, MANIFEST_VERSION);
        assert_eq!(m.next_change_at, Some(at(60)));
    }

    #[test]
    fn manual_only_manifest_has_no_schedule() {
        assert_eq!(manifest(&["a"], 0).next_change_at, None);
    }

    #[test]
    fn prepared_requires_all_three_files() {
        let mut e = ShuffleEntry::new("a");
        assert!(!e.is_prepared());
        e.variants.small.file = Some("s.jpg".into());
        e.variants.medium.file = Some("m.jpg".into());
        e.variants.large.file = Some("   ".into());
        assert!(!e.is_prepared());
        e.variants.large.file = Some("l.jpg".into());
        assert!(e.is_prepared());
    }

    #[test]
    fn merged_flags_are_trimmed_and_blanks_dropped() {
        let mut e = ShuffleEntry::new("a");
        e.merge_flags(["  blurry ", "", " \t", "faces 2", "blurry"].map(String::from));
        let flags: Vec<_> = e.flags.iter().map(String::as_str).collect();
        assert_eq!(flags, vec!["blurry", "faces 2"]);
    }

    #[test]
    fn file_for_prefers_existing_manual_render() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        let mut e = ShuffleEntry::new("a");
        prepare(&mut e, None);
        e.variants.small.manual = Some(ManualOverride {
            file: "manual.jpg".into(),
            crop: NormalizedRect::full(),
            straighten_degrees: None,
            rotation_quarter_turns: None,
        });

        // Manual file referenced but missing on disk: auto wins.
        assert_eq!(e.file_for(WidgetSize::Small, &store).as_deref(), Some("a-small.jpg"));

        store.write("manual.jpg", b"x").unwrap();
        assert_eq!(e.file_for(WidgetSize::Small, &store).as_deref(), Some("manual.jpg"));
        assert_eq!(e.file_for(WidgetSize::Large, &store).as_deref(), Some("a-large.jpg"));
        assert_eq!(e.effective_crop(WidgetSize::Small), Some(NormalizedRect::full()));
    }

    #[test]
    fn eligible_skips_prepared_and_failed() {
        let mut m = with_prepared(5, &[1], 60);
        m.entries[3].flags.insert(FAILED_FLAG.into());
        assert_eq!(m.eligible_ids(10), vec!["p0", "p2", "p4"]);
        assert_eq!(m.eligible_ids(2), vec!["p0", "p2"]);

        assert_eq!(m.reset_failed(), 1);
        assert_eq!(m.eligible_ids(10), vec!["p0", "p2", "p3", "p4"]);
    }

    #[test]
    fn progress_counts() {
        let mut m = with_prepared(4, &[0, 2], 60);
        m.entries[1].flags.insert(FAILED_FLAG.into());
        m.current_index = 2;
        assert_eq!(
            m.progress(),
            ProgressSummary {
                total: 4,
                prepared: 2,
                failed: 1,
                current_index: 2,
                current_is_prepared: true,
            }
        );
    }

    // =========================================================================
    // Resort
    // =========================================================================

    #[test]
    fn resort_orders_prepared_slots_by_score() {
        let mut m = with_prepared(5, &[0, 2, 4], 60);
        m.entries[0].score = Some(1.0);
        m.entries[2].score = None;
        m.entries[4].score = Some(3.0);
        m.current_index = 0;

        m.resort_prepared_by_score();

        let ids: Vec<_> = m.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["p4", "p1", "p0", "p3", "p2"]);
        // Current entry identity survives the reorder.
        assert_eq!(m.current_entry().unwrap().id, "p0");
    }

    #[test]
    fn resort_breaks_ties_by_newer_preparation() {
        let mut m = with_prepared(2, &[0, 1], 60);
        m.entries[1].prepared_at = Some(at(5));
        m.resort_prepared_by_score();
        assert_eq!(m.entries[0].id, "p1");
    }

    // =========================================================================
    // Rotation
    // =========================================================================

    #[test]
    fn catch_up_moves_exactly_one_step() {
        let mut m = with_prepared(4, &[0, 1, 3], 60);
        // Five intervals overdue still advance a single step.
        assert!(m.catch_up_rotation(at(300)));
        assert_eq!(m.current_index, 1);
        assert_eq!(m.next_change_at, Some(at(360)));
    }

    #[test]
    fn catch_up_not_due_is_noop() {
        let mut m = with_prepared(3, &[0, 1], 60);
        assert!(!m.catch_up_rotation(at(59)));
        assert_eq!(m.current_index, 0);
    }

    #[test]
    fn catch_up_skips_unprepared_and_wraps() {
        let mut m = with_prepared(4, &[0, 3], 60);
        m.current_index = 3;
        assert!(m.catch_up_rotation(at(60)));
        assert_eq!(m.current_index, 0);
    }

    #[test]
    fn catch_up_without_prepared_only_reschedules() {
        let mut m = with_prepared(3, &[], 60);
        assert!(m.catch_up_rotation(at(90)));
        assert_eq!(m.current_index, 0);
        assert_eq!(m.next_change_at, Some(at(150)));
    }

    #[test]
    fn catch_up_disabled_rotation() {
        let mut m = with_prepared(3, &[0, 1], 0);
        assert!(!m.catch_up_rotation(at(10_000)));
    }

    #[test]
    fn advance_wraps_to_next_prepared() {
        let mut m = with_prepared(5, &[1, 3], 60);
        m.current_index = 3;
        assert_eq!(
            m.advance_to_next_prepared(at(10)),
            Advance::Advanced {
                index: 1,
                id: "p1".into()
            }
        );
        assert_eq!(m.next_change_at, Some(at(70)));
    }

    #[test]
    fn advance_with_single_prepared_returns_to_it() {
        let mut m = with_prepared(3, &[1], 60);
        m.current_index = 1;
        assert!(matches!(
            m.advance_to_next_prepared(at(0)),
            Advance::Advanced { index: 1, .. }
        ));
    }

    #[test]
    fn advance_without_prepared_entries() {
        let mut m = with_prepared(3, &[], 60);
        let outcome = m.advance_to_next_prepared(at(0));
        assert_eq!(outcome, Advance::NoPreparedEntries);
        assert_eq!(outcome.to_string(), "No prepared photos yet.");
        assert_eq!(with_prepared(0, &[], 60).advance_to_next_prepared(at(0)), Advance::NoPreparedEntries);
    }

    #[test]
    fn set_interval_zero_disables_schedule() {
        let mut m = with_prepared(2, &[0], 60);
        m.set_rotation_interval(0, at(5));
        assert_eq!(m.rotation_interval_minutes, 0);
        assert_eq!(m.next_change_at, None);
        m.set_rotation_interval(180, at(5));
        assert_eq!(m.next_change_at, Some(at(185)));
        m.set_rotation_interval(-3, at(5));
        assert_eq!(m.rotation_interval_minutes, 0);
    }

    #[test]
    fn entry_for_render_projects_due_rotation() {
        let mut m = with_prepared(4, &[1, 2], 60);
        assert_eq!(m.entry_for_render(at(0)).unwrap().id, "p1");
        m.current_index = 1;
        assert_eq!(m.entry_for_render(at(30)).unwrap().id, "p1");
        assert_eq!(m.entry_for_render(at(61)).unwrap().id, "p2");
        assert!(with_prepared(2, &[], 60).entry_for_render(at(0)).is_none());
    }

    #[test]
    fn rotation_labels() {
        assert_eq!(rotation_label(0), "Off");
        assert_eq!(rotation_label(-5), "Off");
        assert_eq!(rotation_label(15), "15m");
        assert_eq!(rotation_label(60), "1h");
        assert_eq!(rotation_label(720), "12h");
        assert_eq!(rotation_label(1440), "1d");
        assert_eq!(rotation_label(120), "2h");
    }

    // =========================================================================
    // Store
    // =========================================================================

    fn manifest_store() -> (TempDir, ManifestStore) {
        let tmp = TempDir::new().unwrap();
        let files = FileStore::open(tmp.path()).unwrap();
        (tmp, ManifestStore::new(files))
    }

    #[test]
    fn create_load_round_trip() {
        let (_tmp, store) = manifest_store();
        let m = with_prepared(3, &[1], 60);
        let name = store.create(&m).unwrap();
        assert!(name.starts_with(MANIFEST_PREFIX));
        assert_eq!(store.load(&name).unwrap(), m);
    }

    #[test]
    fn load_clamps_index() {
        let (_tmp, store) = manifest_store();
        let mut m = with_prepared(3, &[], 60);
        m.current_index = 2;
        store.save("m.json", &m).unwrap();
        store
            .files()
            .save_json("m.json", &ShuffleManifest { current_index: 9, ..m })
            .unwrap();
        assert_eq!(store.load("m.json").unwrap().current_index, 2);
    }

    #[test]
    fn load_missing_and_corrupt() {
        let (_tmp, store) = manifest_store();
        assert!(matches!(store.load("nope.json"), Err(ManifestError::NotFound(_))));
        store.files().write("bad.json", b"[1,2").unwrap();
        assert!(matches!(store.load("bad.json"), Err(ManifestError::Corrupt { .. })));
    }

    #[test]
    fn update_persists_changes() {
        let (_tmp, store) = manifest_store();
        let name = store.create(&with_prepared(2, &[], 60)).unwrap();
        let changed = store
            .update(&name, |m| {
                m.entries[1].flags.insert(FAILED_FLAG.into());
                m.entries[1].id.clone()
            })
            .unwrap();
        assert_eq!(changed, "p1");
        assert!(store.load(&name).unwrap().entries[1].is_failed());
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() {
        let (_tmp, store) = manifest_store();
        let name = store.create(&with_prepared(1, &[], 60)).unwrap();
        std::thread::scope(|s| {
            for t in 0..4 {
                let store = &store;
                let name = &name;
                s.spawn(move || {
                    for i in 0..10 {
                        store
                            .update(name, |m| {
                                m.entries[0].flags.insert(format!("t{t}-{i}"));
                            })
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(store.load(&name).unwrap().entries[0].flags.len(), 40);
    }
}

//! Photo sources for album shuffle.
//!
//! A [`PhotoSource`] lists candidate photo ids and fetches their bytes. The
//! built-in [`DirectorySource`] walks a directory tree; ids are paths
//! relative to its root with `/` separators.
//!
//! Candidate rules (from `[shuffle]` config):
//! - Screenshots (file name contains `screenshot`) are skipped unless
//!   `include_screenshots` is set.
//! - Photos whose shorter side is below `minimum_pixel_dimension` are
//!   skipped. Only the header is read for this.
//! - Order is newest or oldest modification time first, or random.
//!
//! A photo may carry a detection sidecar next to it
//! (`<stem>.detections.json`, see [`SidecarFile`](crate::detect::SidecarFile)).

use crate::config::ShuffleConfig;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions the decoder handles.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "webp"];

const SIDECAR_SUFFIX: &str = "detections.json";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("photo not found: {0}")]
    NotFound(String),
    #[error("no data for photo {0}")]
    NoData(String),
}

/// Candidate ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    Random,
}

/// Where album photos come from.
pub trait PhotoSource: Send + Sync {
    /// Stable identifier of the album, stored in the manifest.
    fn source_id(&self) -> String;

    /// Candidate photo ids in presentation order.
    fn list(&self) -> Result<Vec<String>, SourceError>;

    /// Original bytes of one photo.
    fn fetch(&self, id: &str) -> Result<Vec<u8>, SourceError>;

    /// Detection sidecar for one photo, if the source has one.
    fn sidecar(&self, _id: &str) -> Option<PathBuf> {
        None
    }
}

/// `<stem>.detections.json` beside `photo`, if it exists.
pub fn sidecar_path(photo: &Path) -> Option<PathBuf> {
    let stem = photo.file_stem()?.to_string_lossy().into_owned();
    let sidecar = photo.with_file_name(format!("{stem}.{SIDECAR_SUFFIX}"));
    sidecar.is_file().then_some(sidecar)
}

/// Filters and ordering applied when listing candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRules {
    pub include_screenshots: bool,
    pub minimum_pixel_dimension: u32,
    pub sort_order: SortOrder,
}

impl SourceRules {
    pub fn from_config(config: &ShuffleConfig) -> Self {
        Self {
            include_screenshots: config.include_screenshots,
            minimum_pixel_dimension: config.effective_minimum_pixel_dimension(),
            sort_order: config.sort_order,
        }
    }
}

impl Default for SourceRules {
    fn default() -> Self {
        Self::from_config(&ShuffleConfig::default())
    }
}

/// Photos under a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    rules: SourceRules,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, rules: SourceRules) -> Self {
        Self {
            root: root.into(),
            rules,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an id to a path under the root. Ids that climb out of the
    /// root or are absolute resolve to nothing.
    fn resolve(&self, id: &str) -> Option<PathBuf> {
        let rel = Path::new(id);
        let safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        (safe && !id.is_empty()).then(|| self.root.join(rel))
    }

    fn accepts(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.starts_with('.') || name.ends_with(SIDECAR_SUFFIX) {
            return false;
        }
        if !is_image(path) {
            return false;
        }
        if !self.rules.include_screenshots && name.contains("screenshot") {
            debug!(file = %path.display(), "skipping screenshot");
            return false;
        }
        match image::ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(image::ImageError::IoError)
            .and_then(|r| r.into_dimensions())
        {
            Ok((w, h)) if w.min(h) >= self.rules.minimum_pixel_dimension => true,
            Ok((w, h)) => {
                debug!(file = %path.display(), width = w, height = h, "skipping small photo");
                false
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable photo");
                false
            }
        }
    }
}

fn is_image(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    IMAGE_EXTENSIONS.contains(&ext.as_str())
}

fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

impl PhotoSource for DirectorySource {
    /// SHA-256 of the canonical root path, truncated to 16 hex digits.
    fn source_id(&self) -> String {
        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        let digest = Sha256::digest(root.to_string_lossy().as_bytes());
        let hex = format!("{:x}", digest);
        format!("dir-{}", &hex[..16])
    }

    fn list(&self) -> Result<Vec<String>, SourceError> {
        let mut found: Vec<(String, SystemTime)> = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry?;
            if !entry.file_type().is_file() || !self.accepts(entry.path()) {
                continue;
            }
            let Some(id) = relative_id(&self.root, entry.path()) else {
                continue;
            };
            let modified = entry
                .metadata()?
                .modified()
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((id, modified));
        }

        // Id order first so equal timestamps stay deterministic.
        found.sort_by(|a, b| a.0.cmp(&b.0));
        match self.rules.sort_order {
            SortOrder::Newest => found.sort_by(|a, b| b.1.cmp(&a.1)),
            SortOrder::Oldest => found.sort_by(|a, b| a.1.cmp(&b.1)),
            SortOrder::Random => found.shuffle(&mut rand::rng()),
        }
        debug!(root = %self.root.display(), count = found.len(), "listed photos");
        Ok(found.into_iter().map(|(id, _)| id).collect())
    }

    fn fetch(&self, id: &str) -> Result<Vec<u8>, SourceError> {
        let path = self
            .resolve(id)
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;
        match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Err(SourceError::NoData(id.to_string())),
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn sidecar(&self, id: &str) -> Option<PathBuf> {
        sidecar_path(&self.resolve(id)?)
    }
}

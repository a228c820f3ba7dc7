//! Shared types persisted between the pipeline, the manual-crop path, and the
//! shuffle engine.
//!
//! Everything here is serialized to JSON documents by [`store`](crate::store),
//! so field names are part of the on-disk format.

use crate::geometry::{NormalizedRect, PixelSize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three widget size families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetSize {
    Small,
    Medium,
    Large,
}

impl WidgetSize {
    pub const ALL: [WidgetSize; 3] = [WidgetSize::Small, WidgetSize::Medium, WidgetSize::Large];

    pub fn name(self) -> &'static str {
        match self {
            WidgetSize::Small => "small",
            WidgetSize::Medium => "medium",
            WidgetSize::Large => "large",
        }
    }

    /// Single-letter label used in score flags ("zoom S").
    pub fn letter(self) -> &'static str {
        match self {
            WidgetSize::Small => "S",
            WidgetSize::Medium => "M",
            WidgetSize::Large => "L",
        }
    }
}

impl fmt::Display for WidgetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WidgetSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" | "s" => Ok(WidgetSize::Small),
            "medium" | "m" => Ok(WidgetSize::Medium),
            "large" | "l" => Ok(WidgetSize::Large),
            other => Err(format!("unknown widget size '{other}' (small|medium|large)")),
        }
    }
}

/// One value per widget size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeMap<T> {
    pub small: T,
    pub medium: T,
    pub large: T,
}

impl<T> SizeMap<T> {
    pub fn from_fn(mut f: impl FnMut(WidgetSize) -> T) -> Self {
        Self {
            small: f(WidgetSize::Small),
            medium: f(WidgetSize::Medium),
            large: f(WidgetSize::Large),
        }
    }

    pub fn get(&self, size: WidgetSize) -> &T {
        match size {
            WidgetSize::Small => &self.small,
            WidgetSize::Medium => &self.medium,
            WidgetSize::Large => &self.large,
        }
    }

    pub fn get_mut(&mut self, size: WidgetSize) -> &mut T {
        match size {
            WidgetSize::Small => &mut self.small,
            WidgetSize::Medium => &mut self.medium,
            WidgetSize::Large => &mut self.large,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (WidgetSize, &T)> {
        WidgetSize::ALL.into_iter().map(move |s| (s, self.get(s)))
    }
}

/// Per-size target pixel dimensions, usually derived from the device.
pub type RenderTargets = SizeMap<PixelSize>;

/// A user-chosen framing that replaces the automatic render for one size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub file: String,
    pub crop: NormalizedRect,
    /// Straighten angle in degrees; `None` means exactly zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub straighten_degrees: Option<f64>,
    /// Quarter turns (0–3); `None` means no turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_quarter_turns: Option<i32>,
}

/// One size's prepared render: file, crop, and pixel size.
///
/// `render_file` and `crop` always hold the automatic result; a manual
/// override lives beside them so that resetting restores the automatic
/// framing exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub render_file: String,
    pub crop: NormalizedRect,
    pub pixel_size: PixelSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<ManualOverride>,
}

impl VariantSpec {
    /// The file a widget should display for this size.
    pub fn effective_file(&self) -> &str {
        self.manual
            .as_ref()
            .map(|m| m.file.as_str())
            .unwrap_or(&self.render_file)
    }

    /// The crop currently in effect (manual if present, else automatic).
    pub fn effective_crop(&self) -> NormalizedRect {
        self.manual.as_ref().map(|m| m.crop).unwrap_or(self.crop)
    }

    pub fn straighten_degrees(&self) -> Option<f64> {
        self.manual.as_ref().and_then(|m| m.straighten_degrees)
    }
}

/// The prepared result for one imported photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartPhotoSpec {
    pub master_file: String,
    pub variants: SizeMap<VariantSpec>,
    pub algorithm_version: u32,
    pub prepared_at: DateTime<Utc>,
    /// Legacy single-image reference; tracks the medium render.
    pub default_file: String,
    /// Shuffle manifest bound to this photo, if album shuffle is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_manifest: Option<String>,
}

impl SmartPhotoSpec {
    pub fn variant(&self, size: WidgetSize) -> &VariantSpec {
        self.variants.get(size)
    }

    pub fn variant_mut(&mut self, size: WidgetSize) -> &mut VariantSpec {
        self.variants.get_mut(size)
    }

    /// Every file this spec references (master, renders, manual renders).
    pub fn referenced_files(&self) -> Vec<&str> {
        let mut files = vec![self.master_file.as_str()];
        for (_, v) in self.variants.iter() {
            files.push(&v.render_file);
            if let Some(m) = &v.manual {
                files.push(&m.file);
            }
        }
        files
    }
}

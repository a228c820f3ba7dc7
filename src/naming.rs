//! File naming for generated renders and documents.
//!
//! Every file the crate writes is named `<prefix>-<id>.<ext>` where `id` is a
//! random UUID. Names never collide across imports, and whether a reference is
//! still live can be decided by checking the store for the file.
//!
//! | Prefix | Contents |
//! |---|---|
//! | `smart-master` | Master JPEG, the re-render source for one photo |
//! | `smart-small` / `smart-medium` / `smart-large` | Automatic renders |
//! | `smart-manual` | Manual-override renders |
//! | `smart-photo` | `SmartPhotoSpec` JSON documents |
//! | `smart-shuffle` | `ShuffleManifest` JSON documents |

use crate::types::WidgetSize;
use uuid::Uuid;

pub const MASTER_PREFIX: &str = "smart-master";
pub const MANUAL_PREFIX: &str = "smart-manual";
pub const SPEC_PREFIX: &str = "smart-photo";
pub const MANIFEST_PREFIX: &str = "smart-shuffle";

const MAX_PREFIX_LEN: usize = 32;
const MAX_FILE_NAME_LEN: usize = 256;

/// Prefix for an automatic render of the given size.
pub fn render_prefix(size: WidgetSize) -> &'static str {
    match size {
        WidgetSize::Small => "smart-small",
        WidgetSize::Medium => "smart-medium",
        WidgetSize::Large => "smart-large",
    }
}

/// Create a fresh `<prefix>-<uuid>.<ext>` name.
///
/// Blank prefixes fall back to `smart`, blank extensions to `jpg`. Prefixes
/// are truncated to 32 characters.
pub fn generate_file_name(prefix: &str, ext: &str) -> String {
    let prefix = prefix.trim();
    let prefix: String = if prefix.is_empty() {
        "smart".to_string()
    } else {
        prefix.chars().take(MAX_PREFIX_LEN).collect()
    };
    let ext = ext.trim().trim_start_matches('.');
    let ext = if ext.is_empty() { "jpg" } else { ext };
    format!("{prefix}-{}.{ext}", Uuid::new_v4())
}

/// Reduce a caller-supplied name to a safe single path component.
///
/// Keeps only the last path component and at most 256 characters. Returns
/// `None` for names that are empty or refer to a directory (`.`/`..`).
pub fn sanitise_file_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let last = trimmed.rsplit(['/', '\\']).next().unwrap_or("").trim();
    let safe: String = last.chars().take(MAX_FILE_NAME_LEN).collect();
    match safe.as_str() {
        "" | "." | ".." => None,
        _ => Some(safe),
    }
}

/// Parts of a generated name like `smart-small-<uuid>.jpg`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedName {
    pub prefix: String,
    pub id: Uuid,
    pub ext: String,
}

/// Split a generated name back into prefix, id, and extension.
///
/// Returns `None` for names that were not produced by
/// [`generate_file_name`].
pub fn parse_generated_name(name: &str) -> Option<GeneratedName> {
    let (stem, ext) = name.rsplit_once('.')?;
    // A hyphenated UUID is 36 characters, preceded by the separator dash.
    if stem.len() < 38 || !stem.is_char_boundary(stem.len() - 37) {
        return None;
    }
    let (prefix, rest) = stem.split_at(stem.len() - 37);
    let id = rest.strip_prefix('-')?;
    let id = Uuid::parse_str(id).ok()?;
    if prefix.is_empty() {
        return None;
    }
    Some(GeneratedName {
        prefix: prefix.to_string(),
        id,
        ext: ext.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_follow_scheme() {
        let name = generate_file_name("smart-master", "jpg");
        assert!(name.starts_with("smart-master-"));
        assert!(name.ends_with(".jpg"));
        let parsed = parse_generated_name(&name).unwrap();
        assert_eq!(parsed.prefix, "smart-master");
        assert_eq!(parsed.ext, "jpg");
    }

    #[test]
    fn generated_names_are_unique() {
        assert_ne!(
            generate_file_name(MANUAL_PREFIX, "jpg"),
            generate_file_name(MANUAL_PREFIX, "jpg")
        );
    }

    #[test]
    fn blank_prefix_and_ext_fall_back() {
        let name = generate_file_name("  ", "");
        assert!(name.starts_with("smart-"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn long_prefix_is_truncated() {
        let name = generate_file_name(&"x".repeat(50), "json");
        let parsed = parse_generated_name(&name).unwrap();
        assert_eq!(parsed.prefix.len(), 32);
    }

    #[test]
    fn render_prefix_per_size() {
        assert_eq!(render_prefix(WidgetSize::Small), "smart-small");
        assert_eq!(render_prefix(WidgetSize::Large), "smart-large");
    }

    #[test]
    fn sanitise_keeps_last_component() {
        assert_eq!(
            sanitise_file_name(" ../../etc/passwd ").as_deref(),
            Some("passwd")
        );
        assert_eq!(sanitise_file_name("a\\b.json").as_deref(), Some("b.json"));
    }

    #[test]
    fn sanitise_rejects_empty_and_dots() {
        assert_eq!(sanitise_file_name(""), None);
        assert_eq!(sanitise_file_name("dir/"), None);
        assert_eq!(sanitise_file_name(".."), None);
    }

    #[test]
    fn sanitise_truncates() {
        let long = "a".repeat(300);
        assert_eq!(sanitise_file_name(&long).unwrap().len(), 256);
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert_eq!(parse_generated_name("IMG_0001.jpg"), None);
        assert_eq!(parse_generated_name("no-extension"), None);
    }
}

//! # smartframe
//!
//! Subject-aware photo renders for home-screen widgets, plus scheduled album
//! shuffles. One imported photo becomes a master JPEG and three pre-cropped
//! renders (small, medium, large) framed around faces, people, animals, or
//! whatever stands out. An album becomes a shuffle manifest that is prepared
//! a few photos at a time and rotates on a schedule.
//!
//! # Data Flow
//!
//! ```text
//! photo bytes ─► decode + orient ─► detect ─► plan ×3 ─► render + encode ─► SmartPhotoSpec
//!
//! album dir ─► PhotoSource::list ─► ShuffleManifest ─► prepare_next_batch ×N ─► scored, sorted entries
//!                                                    └─► catch_up / advance ─► current photo
//! ```
//!
//! Every artefact lives in one flat data directory ([`store::FileStore`]):
//! JPEGs under generated `smart-*` names and JSON documents for specs and
//! manifests. Documents only reference files by name.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Decode with EXIF orientation, downsample, crop, straighten, budgeted JPEG encode |
//! | [`detect`] | Subject detector trait, built-in saliency, sidecar detections, ensemble ranking |
//! | [`planner`] | Per-size crop planning, including the two-subject pairing for small |
//! | [`pipeline`] | Prepare and regenerate: one photo to a master and three renders, behind a gate |
//! | [`manual`] | User crop overrides (crop, straighten, quarter turns) and their reset |
//! | [`manifest`] | Shuffle manifest document, rotation scheduling, and the locked manifest store |
//! | [`shuffle`] | Batch preparation, scoring, and the background driver |
//! | [`scorer`] | Heuristic quality score for prepared photos |
//! | [`source`] | Photo sources: album directories with filtering and ordering |
//! | [`store`] | Flat file store with atomic writes, refresh signalling |
//! | [`config`] | `config.toml` loading, validation, and merging over stock defaults |
//! | [`types`] | Persisted shared types (`SmartPhotoSpec`, `WidgetSize`, `SizeMap`) |
//! | [`geometry`] | Pixel and normalised rectangles |
//! | [`naming`] | Generated file names and name sanitising |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Renders Are Prepared Ahead of Time
//!
//! Widgets display finished JPEGs at their exact pixel size. All decoding,
//! detection and encoding happens once at import (or in a shuffle batch), never
//! at display time, so a widget refresh only reads one file.
//!
//! ## Manual Overrides Sit Beside Automatic Results
//!
//! A manual crop never overwrites the automatic crop or render. Resetting is a
//! matter of dropping the override, which restores the automatic framing
//! bit-for-bit.
//!
//! ## Catch-Up Without a Burst
//!
//! When the app has been away for several rotation intervals, catching up
//! advances exactly one photo and reschedules from now. Replaying every missed
//! step would only flash through photos nobody sees.
//!
//! ## Failed Entries Stay Failed
//!
//! A photo that cannot be decoded or rendered is flagged `failed` and skipped
//! by later batches. Retrying is explicit (`shuffle reset-failed`), which keeps
//! a broken file from being re-decoded on every batch.

pub mod config;
pub mod detect;
pub mod geometry;
pub mod imaging;
pub mod manifest;
pub mod manual;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod planner;
pub mod scorer;
pub mod shuffle;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

use clap::{Parser, Subcommand};
use smartframe::config::{self, Config};
use smartframe::detect::{DetectorEnsemble, SidecarFile};
use smartframe::geometry::NormalizedRect;
use smartframe::manifest::{Advance, ManifestStore};
use smartframe::manual::{self, ManualCrop};
use smartframe::output;
use smartframe::pipeline::Pipeline;
use smartframe::scorer::DefaultScorer;
use smartframe::shuffle::{self, BoundTo, CancelToken, ShuffleEngine};
use smartframe::source::{DirectorySource, PhotoSource, SourceRules, sidecar_path};
use smartframe::store::{FileStore, LogRefresh};
use smartframe::types::{SmartPhotoSpec, WidgetSize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "smartframe")]
#[command(about = "Subject-aware widget photo renders and album shuffles")]
#[command(long_about = "\
Subject-aware widget photo renders and album shuffles

A photo is prepared once into a master JPEG and three widget renders
(small, medium, large), each cropped around the detected subject. An album
directory becomes a shuffle manifest whose photos are prepared in batches
and rotated on a schedule.

Data directory layout (flat):

  smartframe-data/
  ├── config.toml                  # Optional, overrides stock defaults
  ├── smart-photo-<uuid>.json      # Photo spec (prepare prints its name)
  ├── smart-shuffle-<uuid>.json    # Shuffle manifest bound to a spec
  ├── smart-master-<uuid>.jpg      # Re-render source
  ├── smart-small-<uuid>.jpg       # Automatic renders
  └── smart-manual-<uuid>.jpg      # Manual crop renders

Detections from an external model can be supplied as a sidecar next to the
photo: IMG_0001.jpg → IMG_0001.detections.json.

Run 'smartframe gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Data directory for renders, documents and config.toml
    #[arg(long, default_value = "smartframe-data", global = true)]
    data: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prepare a photo: master plus three widget renders
    Prepare {
        /// Photo file
        photo: PathBuf,
    },
    /// Show detections and planned crops without writing anything
    Plan {
        /// Photo file
        photo: PathBuf,
    },
    /// Re-plan and re-render a prepared photo from its master
    Regenerate {
        /// Photo spec name
        spec: String,
    },
    /// Album shuffle for a prepared photo
    #[command(subcommand)]
    Shuffle(ShuffleCommand),
    /// Manual crop overrides
    #[command(subcommand)]
    Crop(CropCommand),
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(Subcommand)]
enum ShuffleCommand {
    /// Create a shuffle manifest from an album directory and bind it
    Create {
        spec: String,
        album: PathBuf,
        /// Rotation interval in minutes (0 = manual only)
        #[arg(long)]
        interval: Option<i64>,
    },
    /// Prepare one batch of eligible photos
    Prepare {
        spec: String,
        /// Album directory the manifest was created from
        #[arg(long)]
        album: PathBuf,
        /// Photos per batch
        #[arg(long)]
        batch: Option<usize>,
    },
    /// Prepare batches until the whole album is done
    Drive {
        spec: String,
        /// Album directory the manifest was created from
        #[arg(long)]
        album: PathBuf,
    },
    /// Show the next prepared photo
    Next { spec: String },
    /// Change the rotation interval
    Interval { spec: String, minutes: i64 },
    /// Show progress and entries
    Status { spec: String },
    /// Make failed photos eligible again
    ResetFailed { spec: String },
    /// Unbind the shuffle manifest from the photo
    Disable { spec: String },
}

/// Which render a crop command edits.
#[derive(clap::Args)]
struct CropTarget {
    /// Photo spec name
    spec: String,
    /// Widget size: small, medium or large
    #[arg(long)]
    size: WidgetSize,
    /// Shuffle entry id; edits the bound manifest instead of the photo
    #[arg(long)]
    entry: Option<String>,
}

#[derive(Subcommand)]
enum CropCommand {
    /// Render a manual crop
    Apply {
        #[command(flatten)]
        target: CropTarget,
        /// Crop as fractions: x,y,width,height
        #[arg(long, value_parser = parse_rect, allow_hyphen_values = true)]
        rect: NormalizedRect,
        /// Straighten angle in degrees (±45)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        straighten: f64,
        /// Clockwise quarter turns
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        turns: i32,
    },
    /// Drop the manual crop and restore the automatic render
    Reset {
        #[command(flatten)]
        target: CropTarget,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if matches!(cli.command, Command::GenConfig) {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let store = FileStore::open(&cli.data)?;
    let config = config::load_config(&cli.data)?;
    init_thread_pool(&config.pipeline);
    let pipeline = Pipeline::from_config(&config, store.clone());
    let manifests = ManifestStore::new(store.clone());
    let refresh = LogRefresh;

    match cli.command {
        Command::GenConfig => {}
        Command::Prepare { photo } => {
            let bytes = std::fs::read(&photo)?;
            let spec = pipeline.prepare_with(&bytes, &detectors_for_photo(&pipeline, &photo))?;
            let name = pipeline.save_spec(&spec)?;
            output::print_spec_output(&spec, &name);
        }
        Command::Plan { photo } => {
            let bytes = std::fs::read(&photo)?;
            let preview = pipeline.preview(&bytes, &detectors_for_photo(&pipeline, &photo))?;
            output::print_plan_output(&preview.detection, &preview.crops, preview.analysis);
        }
        Command::Regenerate { spec: name } => {
            let spec = pipeline.regenerate(&pipeline.load_spec(&name)?)?;
            store.save_json(&name, &spec)?;
            output::print_spec_output(&spec, &name);
        }
        Command::Shuffle(command) => {
            run_shuffle(command, &config, &pipeline, &manifests, &store)?;
        }
        Command::Crop(CropCommand::Apply {
            target,
            rect,
            straighten,
            turns,
        }) => {
            let crop = ManualCrop {
                size: target.size,
                rect,
                straighten_degrees: straighten,
                quarter_turns: turns,
            };
            let mut spec = pipeline.load_spec(&target.spec)?;
            match &target.entry {
                Some(entry) => {
                    let manifest = bound_manifest(&spec)?;
                    manual::apply_to_entry(&pipeline, &manifests, &manifest, entry, &crop, &refresh)?;
                    println!("Applied {} crop to {}", target.size, entry);
                }
                None => {
                    manual::apply_to_spec(&pipeline, &mut spec, &crop, &refresh)?;
                    store.save_json(&target.spec, &spec)?;
                    output::print_spec_output(&spec, &target.spec);
                }
            }
        }
        Command::Crop(CropCommand::Reset { target }) => {
            let mut spec = pipeline.load_spec(&target.spec)?;
            match &target.entry {
                Some(entry) => {
                    let manifest = bound_manifest(&spec)?;
                    manual::reset_entry(&manifests, &manifest, entry, target.size, &refresh)?;
                    println!("Reset {} crop of {}", target.size, entry);
                }
                None => {
                    manual::reset_spec(&store, &mut spec, target.size, &refresh)?;
                    store.save_json(&target.spec, &spec)?;
                    output::print_spec_output(&spec, &target.spec);
                }
            }
        }
    }

    Ok(())
}

fn run_shuffle(
    command: ShuffleCommand,
    config: &Config,
    pipeline: &Pipeline,
    manifests: &ManifestStore,
    store: &FileStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let refresh = LogRefresh;
    match command {
        ShuffleCommand::Create {
            spec: name,
            album,
            interval,
        } => {
            let mut spec = pipeline.load_spec(&name)?;
            let engine = engine_for(config, pipeline, manifests, &album);
            let interval = interval.unwrap_or(config.shuffle.rotation_interval_minutes);
            let manifest = engine.enable(&mut spec, interval)?;
            store.save_json(&name, &spec)?;
            output::print_shuffle_status(&manifests.load(&manifest)?, &manifest);
        }
        ShuffleCommand::Prepare {
            spec: name,
            album,
            batch,
        } => {
            let manifest = bound_manifest(&pipeline.load_spec(&name)?)?;
            let engine = engine_for(config, pipeline, manifests, &album);
            check_album(&engine_source(config, &album), manifests, &manifest)?;
            let limit = batch.unwrap_or(config.shuffle.batch_size);
            let outcome = engine.prepare_next_batch(&manifest, limit, &CancelToken::new())?;
            println!("{}", output::format_batch_outcome(&outcome));
        }
        ShuffleCommand::Drive { spec: name, album } => {
            let manifest = bound_manifest(&pipeline.load_spec(&name)?)?;
            let engine = engine_for(config, pipeline, manifests, &album);
            check_album(&engine_source(config, &album), manifests, &manifest)?;
            let summary = engine.drive(
                &manifest,
                &BoundTo(manifest.clone()),
                &CancelToken::new(),
                config.shuffle.pacing(),
                config.shuffle.batch_size,
            )?;
            println!("{}", output::format_drive_summary(&summary));
            output::print_shuffle_status(&manifests.load(&manifest)?, &manifest);
        }
        ShuffleCommand::Next { spec: name } => {
            let manifest = bound_manifest(&pipeline.load_spec(&name)?)?;
            match shuffle::advance(manifests, &manifest, &refresh)? {
                advance @ Advance::NoPreparedEntries => println!("{advance}"),
                Advance::Advanced { id, .. } => {
                    let m = manifests.load(&manifest)?;
                    let file = m
                        .entry(&id)
                        .and_then(|e| e.file_for(WidgetSize::Medium, store))
                        .unwrap_or_default();
                    println!("Now showing {id} ({file})");
                }
            }
        }
        ShuffleCommand::Interval {
            spec: name,
            minutes,
        } => {
            let manifest = bound_manifest(&pipeline.load_spec(&name)?)?;
            shuffle::change_interval(manifests, &manifest, minutes, &refresh)?;
            output::print_shuffle_status(&manifests.load(&manifest)?, &manifest);
        }
        ShuffleCommand::Status { spec: name } => {
            let manifest = bound_manifest(&pipeline.load_spec(&name)?)?;
            shuffle::catch_up(manifests, &manifest, &refresh)?;
            output::print_shuffle_status(&manifests.load(&manifest)?, &manifest);
        }
        ShuffleCommand::ResetFailed { spec: name } => {
            let manifest = bound_manifest(&pipeline.load_spec(&name)?)?;
            let count = shuffle::reset_failed(manifests, &manifest)?;
            println!("Reset {count} failed photo(s).");
        }
        ShuffleCommand::Disable { spec: name } => {
            let mut spec = pipeline.load_spec(&name)?;
            match shuffle::disable(&mut spec) {
                Some(manifest) => {
                    store.save_json(&name, &spec)?;
                    println!("Album shuffle disabled ({manifest} kept).");
                }
                None => println!("Album shuffle was not enabled."),
            }
        }
    }
    Ok(())
}

fn engine_source(config: &Config, album: &Path) -> DirectorySource {
    DirectorySource::new(album, SourceRules::from_config(&config.shuffle))
}

fn engine_for(
    config: &Config,
    pipeline: &Pipeline,
    manifests: &ManifestStore,
    album: &Path,
) -> ShuffleEngine {
    ShuffleEngine::new(
        pipeline.clone(),
        manifests.clone(),
        Arc::new(engine_source(config, album)),
        Arc::new(DefaultScorer {
            max_edge: config.scoring.max_edge,
        }),
        Arc::new(LogRefresh),
    )
}

/// Refuse to prepare a manifest from a different album than it was built on.
fn check_album(
    source: &DirectorySource,
    manifests: &ManifestStore,
    manifest: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let expected = manifests.load(manifest)?.source_id;
    if source.source_id() != expected {
        return Err(format!(
            "{} is not the album this shuffle was created from",
            source.root().display()
        )
        .into());
    }
    Ok(())
}

fn bound_manifest(spec: &SmartPhotoSpec) -> Result<String, Box<dyn std::error::Error>> {
    spec.shuffle_manifest
        .clone()
        .ok_or_else(|| "album shuffle is not enabled for this photo".into())
}

/// The pipeline's detectors, extended by a sidecar next to `photo`.
fn detectors_for_photo(pipeline: &Pipeline, photo: &Path) -> DetectorEnsemble {
    let base = pipeline.detectors().clone();
    let Some(path) = sidecar_path(photo) else {
        return base;
    };
    match SidecarFile::load(&path) {
        Ok(file) => base.extended(file.detectors()),
        Err(e) => {
            tracing::warn!(sidecar = %path.display(), error = %e, "ignoring unreadable sidecar");
            base
        }
    }
}

fn parse_rect(raw: &str) -> Result<NormalizedRect, String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid number in '{raw}': {e}"))?;
    let [x, y, width, height] = parts[..] else {
        return Err(format!("expected x,y,width,height, got '{raw}'"));
    };
    let rect = NormalizedRect::new(x, y, width, height);
    if !rect.is_valid(1e-6) {
        return Err(format!("crop '{raw}' is outside the photo"));
    }
    Ok(rect)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on pipeline config.
///
/// Caps at the number of available CPU cores; user can constrain down, not up.
fn init_thread_pool(pipeline: &config::PipelineConfig) {
    let threads = config::effective_permits(pipeline);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

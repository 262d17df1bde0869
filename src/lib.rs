//! Boxset: an object-detection dataset editing engine.
//!
//! Boxset loads YOLO-style dataset archives (images plus per-image label
//! files grouped into train/valid/test splits), keeps an editable in-memory
//! model with a class taxonomy, and writes the result back out as a YOLO
//! archive or a COCO JSON document.
//!
//! # Modules
//!
//! - [`archive`]: Zip, directory and in-memory archive sources and sinks
//! - [`cache`]: Bounded LRU caches for decoded images and thumbnails
//! - [`loader`]: Chunked, cancellable archive ingestion
//! - [`model`]: Dataset, image, annotation and class table types
//! - [`store`]: Annotation edits and taxonomy operations
//! - [`geometry`]: Coordinate conversion, hit testing and gestures
//! - [`export`]: YOLO and COCO writers
//! - [`error`]: Error types for boxset operations

pub mod archive;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod geometry;
pub mod loader;
pub mod merge;
pub mod model;
pub mod platform;
pub mod stats;
pub mod store;
pub mod thumbnail;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

pub use error::BoxsetError;

use archive::{create_sink, open_archive, ArchiveSource};
use cache::ResourcePool;
use config::EngineConfig;
use diagnostics::Diagnostics;
use export::ExportFormat;
use loader::{LoadOptions, LoadOutcome, Loader};
use model::io_session::read_session;
use model::Dataset;
use platform::{HeaderDecoder, SysinfoProbe, ThreadScheduler};
use store::AnnotationStore;
use thumbnail::ThumbnailService;

/// The boxset CLI application.
#[derive(Parser)]
#[command(name = "boxset")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Engine configuration file (YAML).
    #[arg(long, global = true, env = "BOXSET_CONFIG")]
    config: Option<PathBuf>,

    /// More output (-v info, -vv debug). RUST_LOG overrides this.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Load a dataset and print statistics and load diagnostics.
    Info(InfoArgs),
    /// Write a dataset out as YOLO or COCO.
    Export(ExportArgs),
    /// Apply class operations, then export the result.
    Edit(EditArgs),
    /// Merge several datasets into one YOLO archive.
    Merge(MergeArgs),
    /// Save thumbnail crops of every box of one class.
    Crops(CropsArgs),
}

/// Output format. Mirrors [`ExportFormat`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ExportTarget {
    Yolo,
    Coco,
}

impl From<ExportTarget> for ExportFormat {
    fn from(target: ExportTarget) -> Self {
        match target {
            ExportTarget::Yolo => ExportFormat::Yolo,
            ExportTarget::Coco => ExportFormat::Coco,
        }
    }
}

/// Where to load a dataset from.
#[derive(clap::Args)]
struct SourceArgs {
    /// Dataset archive: a .zip file or an extracted directory.
    archive: PathBuf,

    /// Session file with saved edits to apply on load.
    #[arg(long)]
    session: Option<PathBuf>,

    /// Accept archives without a dataset.yaml/data.yaml manifest.
    #[arg(long)]
    allow_missing_manifest: bool,
}

#[derive(clap::Args)]
struct InfoArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
struct ExportArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Output path. A .zip path writes a zip file, anything else a directory.
    #[arg(short, long)]
    output: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value = "yolo")]
    to: ExportTarget,
}

#[derive(clap::Args)]
struct EditArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, value_enum, default_value = "yolo")]
    to: ExportTarget,

    /// Add a class.
    #[arg(long = "add", value_name = "NAME")]
    add: Vec<String>,

    /// Rename a class.
    #[arg(long = "rename", value_name = "OLD=NEW", value_parser = parse_pair)]
    rename: Vec<(String, String)>,

    /// Merge class SRC into class TGT.
    #[arg(long = "merge", value_name = "SRC=TGT", value_parser = parse_pair)]
    merge: Vec<(String, String)>,

    /// Delete a class and all of its boxes.
    #[arg(long = "delete", value_name = "NAME")]
    delete: Vec<String>,

    /// Collapse every class into one.
    #[arg(long = "merge-all", value_name = "NAME")]
    merge_all: Option<String>,

    /// Grow (or shrink) every box of a class by normalized deltas.
    #[arg(long = "pad", value_name = "CLASS:DW:DH", value_parser = parse_padding, allow_hyphen_values = true)]
    pad: Vec<(String, f64, f64)>,

    /// Also save the resulting edits as a session file.
    #[arg(long)]
    save_session: Option<PathBuf>,
}

#[derive(clap::Args)]
struct MergeArgs {
    /// Archives to merge, in order.
    #[arg(required = true, num_args = 2..)]
    archives: Vec<PathBuf>,

    #[arg(short, long)]
    output: PathBuf,
}

#[derive(clap::Args)]
struct CropsArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Class to crop.
    #[arg(long = "class", value_name = "NAME")]
    class: String,

    /// Directory the PNG crops are written to.
    #[arg(short, long)]
    output: PathBuf,

    /// Zero-based page.
    #[arg(long, default_value_t = 0)]
    page: usize,

    #[arg(long, default_value_t = 50)]
    per_page: usize,
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((left, right)) if !left.trim().is_empty() && !right.trim().is_empty() => {
            Ok((left.trim().to_string(), right.trim().to_string()))
        }
        _ => Err(format!("expected A=B, got '{}'", s)),
    }
}

fn parse_padding(s: &str) -> Result<(String, f64, f64), String> {
    let mut parts = s.rsplitn(3, ':');
    let (dh, dw, class) = match (parts.next(), parts.next(), parts.next()) {
        (Some(dh), Some(dw), Some(class)) if !class.trim().is_empty() => (dh, dw, class),
        _ => return Err(format!("expected CLASS:DW:DH, got '{}'", s)),
    };
    let number = |v: &str| {
        v.trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| format!("'{}' is not a number", v))
    };
    Ok((class.trim().to_string(), number(dw)?, number(dh)?))
}

/// Run the boxset CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), BoxsetError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Some(Commands::Info(args)) => run_info(args, &config),
        Some(Commands::Export(args)) => run_export(args, &config),
        Some(Commands::Edit(args)) => run_edit(args, &config),
        Some(Commands::Merge(args)) => run_merge(args, &config),
        Some(Commands::Crops(args)) => run_crops(args, &config),
        None => {
            println!("boxset {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Load, edit and re-export object-detection datasets.");
            println!();
            println!("Run 'boxset --help' for usage information.");
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // A logger may already be installed when embedded; keep that one.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}

/// An opened archive and the dataset loaded from it.
struct Loaded {
    source: Box<dyn ArchiveSource>,
    dataset: Dataset,
    outcome: LoadOutcome,
}

fn load_dataset(
    args: &SourceArgs,
    config: &EngineConfig,
    pool: &mut ResourcePool,
) -> Result<Loaded, BoxsetError> {
    let mut probe = SysinfoProbe::new();
    let mut source = open_archive(&args.archive, config, &mut probe)?;

    let mut dataset = match &args.session {
        Some(path) => {
            info!("Restoring session {}", path.display());
            read_session(path)?.into_dataset()
        }
        None => Dataset::default(),
    };
    let options = LoadOptions {
        splits: None,
        allow_missing_manifest: args.allow_missing_manifest,
    };
    let outcome =
        Loader::new(config, pool, &mut probe).load_into(source.as_mut(), &mut dataset, &options)?;
    for e in &outcome.split_errors {
        warn!("{}", e);
    }

    Ok(Loaded {
        source,
        dataset,
        outcome,
    })
}

/// Measuring only; nothing here needs pixels.
fn header_pool(config: &EngineConfig) -> ResourcePool {
    ResourcePool::new(config, Box::new(HeaderDecoder), Box::new(ThreadScheduler))
}

fn run_info(args: InfoArgs, config: &EngineConfig) -> Result<(), BoxsetError> {
    let mut pool = header_pool(config);
    let loaded = load_dataset(&args.source, config, &mut pool)?;
    let report = stats::summarize_with(&loaded.dataset, &stats::StatsOptions::default())
        .with_cache("images", pool.full_stats());

    if args.json {
        let json = serde_json::to_string_pretty(&report).map_err(|source| {
            BoxsetError::CocoJsonWrite {
                path: "<stdout>".to_string(),
                source,
            }
        })?;
        println!("{}", json);
    } else {
        println!("Dataset: {}", loaded.source.label());
        println!();
        print!("{}", report);
        if !loaded.outcome.diagnostics.is_empty() {
            println!();
            print!("{}", loaded.outcome.diagnostics);
        }
    }
    Ok(())
}

fn write_output(
    loaded: &mut Loaded,
    dataset: &Dataset,
    pool: &mut ResourcePool,
    target: ExportTarget,
    output: &Path,
) -> Result<(), BoxsetError> {
    let format = ExportFormat::from(target);
    let mut sink = create_sink(output)?;
    let summary = export::export(dataset, loaded.source.as_mut(), pool, format, sink.as_mut())?;
    println!(
        "Exported {} image(s) and {} annotation(s) as {} to {}",
        summary.images,
        summary.annotations,
        format.name(),
        output.display()
    );
    Ok(())
}

fn run_export(args: ExportArgs, config: &EngineConfig) -> Result<(), BoxsetError> {
    let mut pool = header_pool(config);
    let mut loaded = load_dataset(&args.source, config, &mut pool)?;
    let dataset = std::mem::take(&mut loaded.dataset);
    write_output(&mut loaded, &dataset, &mut pool, args.to, &args.output)
}

fn run_edit(args: EditArgs, config: &EngineConfig) -> Result<(), BoxsetError> {
    let mut pool = header_pool(config);
    let mut loaded = load_dataset(&args.source, config, &mut pool)?;
    let mut store = AnnotationStore::new(std::mem::take(&mut loaded.dataset));

    for name in &args.add {
        let id = store.add_class(name)?;
        info!("Added class '{}' as {}", name.trim(), id);
    }
    for (old, new) in &args.rename {
        let id = store.class_id(old)?;
        store.rename_class(id, new)?;
    }
    for (source, target) in &args.merge {
        let (source, target) = (store.class_id(source)?, store.class_id(target)?);
        store.merge_classes(source, target)?;
    }
    for name in &args.delete {
        let id = store.class_id(name)?;
        let removed = store.delete_class(id)?;
        info!("Deleted class '{}' and {} box(es)", name, removed);
    }
    if let Some(name) = &args.merge_all {
        store.merge_all_classes(name)?;
    }
    for (class, d_width, d_height) in &args.pad {
        let id = store.class_id(class)?;
        store.apply_global_padding(id, *d_width, *d_height)?;
    }

    if let Some(path) = &args.save_session {
        store.save_session(path)?;
        println!("Saved session to {}", path.display());
    }
    let dataset = store.into_dataset();
    write_output(&mut loaded, &dataset, &mut pool, args.to, &args.output)
}

fn run_merge(args: MergeArgs, config: &EngineConfig) -> Result<(), BoxsetError> {
    let mut probe = SysinfoProbe::new();
    let mut inputs = args
        .archives
        .iter()
        .map(|path| open_archive(path, config, &mut probe))
        .collect::<Result<Vec<_>, _>>()?;
    let mut sink = create_sink(&args.output)?;
    let summary = merge::merge_archives(&mut inputs, config, sink.as_mut())?;
    println!(
        "Merged {} dataset(s): {} image(s), {} annotation(s), {} class(es) into {}",
        summary.inputs,
        summary.images,
        summary.annotations,
        summary.classes.len(),
        args.output.display()
    );
    Ok(())
}

fn run_crops(args: CropsArgs, config: &EngineConfig) -> Result<(), BoxsetError> {
    let mut pool = ResourcePool::with_defaults(config);
    let mut loaded = load_dataset(&args.source, config, &mut pool)?;
    let store = AnnotationStore::new(std::mem::take(&mut loaded.dataset));
    let class_id = store.class_id(&args.class)?;
    let dataset = store.into_dataset();

    let mut diagnostics = Diagnostics::new();
    let page = ThumbnailService::new(&mut pool, config).class_crops(
        &dataset,
        loaded.source.as_mut(),
        class_id,
        args.page,
        args.per_page,
        &mut diagnostics,
    )?;

    fs::create_dir_all(&args.output)?;
    let mut written = 0usize;
    for crop in &page.crops {
        let Some(pixels) = crop.handle.pixels() else {
            continue;
        };
        let path = args.output.join(crop_file_name(&crop.info.thumbnail_key()));
        pixels
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|source| BoxsetError::ImageEncode {
                path: path.clone(),
                source,
            })?;
        written += 1;
    }

    println!(
        "Wrote {} crop(s) of '{}' (page {} of {}, {} box(es) total) to {}",
        written,
        args.class,
        page.page.saturating_add(1),
        page.page_count().max(1),
        page.total,
        args.output.display()
    );
    if !diagnostics.is_empty() {
        eprint!("{}", diagnostics);
    }
    Ok(())
}

/// `train/img1.jpg#3` becomes `train_img1_3.png`.
fn crop_file_name(thumbnail_key: &str) -> String {
    let (image, annotation) = thumbnail_key.rsplit_once('#').unwrap_or((thumbnail_key, "0"));
    let stem = image.rsplit_once('.').map(|(s, _)| s).unwrap_or(image);
    format!("{}_{}.png", stem.replace('/', "_"), annotation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("cat = feline"), Ok(("cat".into(), "feline".into())));
        assert!(parse_pair("cat").is_err());
        assert!(parse_pair("=dog").is_err());
    }

    #[test]
    fn test_parse_padding_allows_colons_in_class() {
        assert_eq!(parse_padding("a:b:0.1:-0.05"), Ok(("a:b".into(), 0.1, -0.05)));
        assert!(parse_padding("cat:0.1").is_err());
        assert!(parse_padding("cat:x:0.1").is_err());
    }

    #[test]
    fn test_crop_file_name() {
        assert_eq!(crop_file_name("train/img1.jpg#3"), "train_img1_3.png");
        assert_eq!(crop_file_name("valid/a.b.png#0"), "valid_a.b_0.png");
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

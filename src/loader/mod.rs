//! Dataset loading.
//!
//! The loader resolves where each split lives inside an archive, then
//! ingests its images in fixed-size chunks. Between chunks it reports
//! progress, checks for cancellation, backs off under memory pressure and
//! yields to the host scheduler. Images ingested before a cancellation stay
//! in the dataset.

mod label;
mod resolve;

pub use label::{format_label_line, parse_label_bytes, parse_label_line, parse_label_text, LabelRow};
pub use resolve::{fallback_label_entries, images_under, FolderIndex, SplitLayout, SplitResolver};

#[cfg(feature = "fuzzing")]
pub use label::{fuzz_parse_label_bytes, fuzz_parse_label_line};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::archive::{file_name, join_entry, label_file_name, ArchiveSource, Manifest, MANIFEST_ENTRIES};
use crate::cache::ResourcePool;
use crate::config::EngineConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticContext, Diagnostics};
use crate::error::BoxsetError;
use crate::model::{
    image_key, unique_name, Annotation, ClassId, ClassTable, Dataset, Image, ImageId, SourceHandle,
    Split, MAX_CLASS_COUNT,
};
use crate::platform::MemoryProbe;

// ============================================================================
// Options, progress and outcome
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Splits to load. `None` loads what the manifest declares.
    pub splits: Option<Vec<Split>>,
    /// Load archives without a manifest instead of rejecting them.
    pub allow_missing_manifest: bool,
}

impl LoadOptions {
    pub fn lenient() -> Self {
        Self {
            splits: None,
            allow_missing_manifest: true,
        }
    }
}

/// Reported after every chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadProgress {
    pub images_loaded: usize,
    pub total_known: usize,
    pub stage: String,
}

/// Shared cancellation request, polled between chunks.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    Completed,
    /// Stopped at a chunk boundary. Everything ingested so far is kept.
    Cancelled,
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub status: LoadStatus,
    /// Splits that could not be located. Other splits loaded normally.
    pub split_errors: Vec<BoxsetError>,
    pub diagnostics: Diagnostics,
}

impl LoadOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.status == LoadStatus::Cancelled
    }
}

// ============================================================================
// Loader
// ============================================================================

type ProgressFn<'a> = Box<dyn FnMut(&LoadProgress) + 'a>;

pub struct Loader<'a> {
    config: &'a EngineConfig,
    pool: &'a mut ResourcePool,
    probe: &'a mut dyn MemoryProbe,
    cancel: CancelFlag,
    progress: Option<ProgressFn<'a>>,
}

/// Per-load bookkeeping.
struct Ingest<'s> {
    source: &'s mut dyn ArchiveSource,
    entries: HashSet<String>,
    next_id: u64,
    loaded: usize,
    total: usize,
    pressure_reported: bool,
    diagnostics: Diagnostics,
}

impl<'a> Loader<'a> {
    pub fn new(
        config: &'a EngineConfig,
        pool: &'a mut ResourcePool,
        probe: &'a mut dyn MemoryProbe,
    ) -> Self {
        Self {
            config,
            pool,
            probe,
            cancel: CancelFlag::new(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: FnMut(&LoadProgress) + 'a,
    {
        self.progress = Some(Box::new(f));
        self
    }

    /// Loads an archive into a fresh dataset.
    pub fn load(
        &mut self,
        source: &mut dyn ArchiveSource,
        options: &LoadOptions,
    ) -> Result<(Dataset, LoadOutcome), BoxsetError> {
        let mut dataset = Dataset::default();
        let outcome = self.load_into(source, &mut dataset, options)?;
        Ok((dataset, outcome))
    }

    /// Loads an archive into `dataset`, honoring overrides it already has.
    ///
    /// Archive-level failures are returned before `dataset` is touched. A
    /// non-empty class table on `dataset` (e.g. from a restored session)
    /// takes precedence over the manifest's.
    pub fn load_into(
        &mut self,
        source: &mut dyn ArchiveSource,
        dataset: &mut Dataset,
        options: &LoadOptions,
    ) -> Result<LoadOutcome, BoxsetError> {
        if source.entry_names().is_empty() {
            return Err(BoxsetError::ArchiveFormat {
                archive: source.label(),
                message: "archive has no entries".to_string(),
            });
        }
        let manifest = read_manifest(source, options.allow_missing_manifest)?;

        let index = FolderIndex::build(source.entry_names());
        let resolver = SplitResolver::new(&index, manifest.as_ref(), &self.config.resolution_order);
        let splits = requested_splits(options, manifest.as_ref(), &index);

        let mut diagnostics = Diagnostics::new();
        let mut split_errors = Vec::new();
        let mut plan: Vec<(Split, SplitLayout, Vec<String>)> = Vec::new();
        for split in splits {
            match resolver.resolve(split) {
                Ok(layout) => {
                    let images = images_under(source.entry_names(), &layout.image_root)
                        .into_iter()
                        .cloned()
                        .collect();
                    plan.push((split, layout, images));
                }
                Err(e) => {
                    diagnostics.add(Diagnostic::warning(
                        DiagnosticCode::SplitUnresolved,
                        e.to_string(),
                        DiagnosticContext::Split { split },
                    ));
                    split_errors.push(e);
                }
            }
        }

        if dataset.classes.is_empty() {
            if let Some(manifest) = &manifest {
                dataset.classes = manifest.class_table();
                report_renamed_classes(manifest, &dataset.classes, &mut diagnostics);
            }
        }
        dataset.manifest = manifest;

        let total = plan.iter().map(|(_, _, images)| images.len()).sum();
        info!(
            "Loading {} image(s) from {} across {} split(s)",
            total,
            source.label(),
            plan.len()
        );

        let mut ingest = Ingest {
            entries: source.entry_names().iter().cloned().collect(),
            source,
            next_id: dataset.next_image_id().as_u64(),
            loaded: 0,
            total,
            pressure_reported: false,
            diagnostics,
        };

        let mut status = LoadStatus::Completed;
        'splits: for (split, layout, images) in &plan {
            let mut seen: HashSet<String> = dataset
                .split(*split)
                .map(|s| s.images.iter().map(|img| img.name.clone()).collect())
                .unwrap_or_default();

            for (chunk_no, chunk) in images.chunks(self.config.chunk_size.max(1)).enumerate() {
                for entry in chunk {
                    if let Some(image) = self.ingest_image(&mut ingest, dataset, layout, entry, &mut seen) {
                        dataset.split_mut(*split).images.push(image);
                    }
                }
                ingest.loaded += chunk.len();

                let stage = format!(
                    "Loading {} (chunk {} of {})",
                    split,
                    chunk_no + 1,
                    images.len().div_ceil(self.config.chunk_size.max(1))
                );
                debug!("{}: {}/{} images", stage, ingest.loaded, ingest.total);
                if let Some(report) = self.progress.as_mut() {
                    report(&LoadProgress {
                        images_loaded: ingest.loaded,
                        total_known: ingest.total,
                        stage,
                    });
                }

                self.check_memory(&mut ingest);
                self.pool.scheduler().yield_now();

                if self.cancel.is_cancelled() {
                    info!("Load cancelled after {} image(s)", ingest.loaded);
                    status = LoadStatus::Cancelled;
                    break 'splits;
                }
            }
        }

        Ok(LoadOutcome {
            status,
            split_errors,
            diagnostics: ingest.diagnostics,
        })
    }

    fn ingest_image(
        &mut self,
        ingest: &mut Ingest<'_>,
        dataset: &mut Dataset,
        layout: &SplitLayout,
        entry: &str,
        seen: &mut HashSet<String>,
    ) -> Option<Image> {
        let split = layout.split;
        let name = file_name(entry).to_string();
        if !seen.insert(name.clone()) {
            ingest.diagnostics.add(Diagnostic::warning(
                DiagnosticCode::DuplicateImageName,
                format!("another image named '{}' is already in {}", name, split),
                DiagnosticContext::entry(entry),
            ));
            return None;
        }

        let key = image_key(split, &name);
        let label_entry = find_label_entry(&ingest.entries, layout, entry, &name);

        let mut annotations = match dataset.overrides.get(split, &key) {
            Some(list) => list.to_vec(),
            None => match &label_entry {
                Some(label) => read_label(ingest.source, label, &mut ingest.diagnostics),
                None => Vec::new(),
            },
        };
        repair_class_table(&mut dataset.classes, &mut annotations, entry, &mut ingest.diagnostics);

        let decoded = ingest
            .source
            .read(entry)
            .and_then(|bytes| self.pool.register_full(entry, &bytes));
        if let Err(e) = decoded {
            debug!("Could not decode {}: {}", entry, e);
            ingest.diagnostics.add(Diagnostic::warning(
                DiagnosticCode::ImageUndecodable,
                e.to_string(),
                DiagnosticContext::entry(entry),
            ));
        }

        let id = ImageId::new(ingest.next_id);
        ingest.next_id += 1;
        let mut image = Image::new(id, name, split, SourceHandle::new(entry)).with_annotations(annotations);
        image.label_entry = label_entry;
        Some(image)
    }

    fn check_memory(&mut self, ingest: &mut Ingest<'_>) {
        let Some(percent) = self.probe.stats().and_then(|s| s.used_percent()) else {
            return;
        };
        if percent <= self.config.memory_warning_percent {
            return;
        }
        warn!(
            "Memory use at {:.1}%, backing off for {} ms",
            percent, self.config.memory_backoff_ms
        );
        if !ingest.pressure_reported {
            ingest.pressure_reported = true;
            ingest.diagnostics.add(Diagnostic::warning(
                DiagnosticCode::MemoryPressure,
                format!("system memory use reached {:.1}%", percent),
                DiagnosticContext::Dataset,
            ));
        }
        self.pool
            .scheduler()
            .back_off(Duration::from_millis(self.config.memory_backoff_ms));
    }
}

// ============================================================================
// Helpers shared with the exporter
// ============================================================================

/// Reads the first manifest entry present at the archive root.
pub fn read_manifest(
    source: &mut dyn ArchiveSource,
    allow_missing: bool,
) -> Result<Option<Manifest>, BoxsetError> {
    let Some(entry) = MANIFEST_ENTRIES.iter().find(|e| source.contains(e)) else {
        if allow_missing {
            info!("No manifest in {}, using default splits", source.label());
            return Ok(None);
        }
        return Err(BoxsetError::ArchiveFormat {
            archive: source.label(),
            message: format!("no manifest found (looked for {})", MANIFEST_ENTRIES.join(", ")),
        });
    };
    let text = source.read_to_string(entry)?;
    Manifest::parse(entry, &text).map(Some)
}

fn requested_splits(options: &LoadOptions, manifest: Option<&Manifest>, index: &FolderIndex) -> Vec<Split> {
    if let Some(splits) = &options.splits {
        return splits.clone();
    }
    let declared = manifest.map(Manifest::declared_splits).unwrap_or_default();
    if !declared.is_empty() {
        return declared;
    }
    Split::ALL
        .into_iter()
        .filter(|split| {
            *split == Split::Train
                || split.folder_aliases().iter().any(|alias| index.has_folder(alias))
        })
        .collect()
}

fn find_label_entry(
    entries: &HashSet<String>,
    layout: &SplitLayout,
    image_entry: &str,
    image_name: &str,
) -> Option<String> {
    let label_name = label_file_name(image_name);
    let primary = layout
        .label_root
        .as_deref()
        .map(|root| join_entry(root, &label_name));
    primary
        .into_iter()
        .chain(fallback_label_entries(image_entry, &label_name))
        .find(|candidate| entries.contains(candidate))
}

fn read_label(source: &mut dyn ArchiveSource, entry: &str, diagnostics: &mut Diagnostics) -> Vec<Annotation> {
    match source.read(entry) {
        Ok(bytes) => parse_label_bytes(&bytes, entry, diagnostics),
        Err(e) => {
            diagnostics.add(Diagnostic::warning(
                DiagnosticCode::UnreadableLabelFile,
                e.to_string(),
                DiagnosticContext::entry(entry),
            ));
            Vec::new()
        }
    }
}

fn report_renamed_classes(manifest: &Manifest, classes: &ClassTable, diagnostics: &mut Diagnostics) {
    for ((id, name), declared) in classes.iter().zip(&manifest.names) {
        if name != declared {
            diagnostics.add(Diagnostic::warning(
                DiagnosticCode::DuplicateClassName,
                format!("class '{}' is listed more than once; renamed to '{}'", declared, name),
                DiagnosticContext::Class { id },
            ));
        }
    }
}

/// Extends `classes` with `class_<n>` placeholders so every id in
/// `annotations` is valid.
///
/// Ids at or past [`MAX_CLASS_COUNT`] (reachable through overrides, which
/// skip the label parser) are reset to 0 instead.
pub fn repair_class_table(
    classes: &mut ClassTable,
    annotations: &mut [Annotation],
    entry: &str,
    diagnostics: &mut Diagnostics,
) {
    for ann in annotations.iter_mut() {
        if ann.class_id.index() >= MAX_CLASS_COUNT {
            diagnostics.add(Diagnostic::info(
                DiagnosticCode::MalformedLabelField,
                format!("class {} is past the class limit; set to 0", ann.class_id),
                DiagnosticContext::entry(entry),
            ));
            ann.class_id = ClassId::new(0);
        }
    }

    let Some(max) = annotations.iter().map(|a| a.class_id).max() else {
        return;
    };
    if classes.is_valid(max) {
        return;
    }

    let mut taken: HashSet<String> = classes.names().iter().cloned().collect();
    while !classes.is_valid(max) {
        let name = unique_name(format!("class_{}", classes.len()), &taken);
        taken.insert(name.clone());
        let id = classes.push(name.clone());
        diagnostics.add(Diagnostic::info(
            DiagnosticCode::ClassTableExtended,
            format!("added placeholder class '{}' referenced by {}", name, entry),
            DiagnosticContext::Class { id },
        ));
    }
}

/// The annotation list an export writes for `image`.
///
/// An override wins; otherwise the label file found at load time is read
/// again; images without either keep their in-memory list.
pub fn effective_annotations(
    dataset: &Dataset,
    image: &Image,
    source: &mut dyn ArchiveSource,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<Annotation>, BoxsetError> {
    if let Some(list) = dataset.overrides.get(image.split, &image.key()) {
        return Ok(list.to_vec());
    }
    match &image.label_entry {
        Some(entry) => {
            let bytes = source.read(entry)?;
            Ok(parse_label_bytes(&bytes, entry, diagnostics))
        }
        None => Ok(image.annotations.clone()),
    }
}

/// Highest class id referenced anywhere, for sanity checks.
pub fn max_class_id(dataset: &Dataset) -> Option<ClassId> {
    dataset
        .images()
        .flat_map(|img| img.annotations.iter().map(|a| a.class_id))
        .max()
}

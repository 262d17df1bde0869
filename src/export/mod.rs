//! Dataset export.
//!
//! Both formats take each image's annotations from the same place the
//! loader would: its override if there is one, otherwise its label file.
//! Any failure aborts the export and discards everything written so far.

mod coco;
mod yolo;

use log::{info, warn};

use crate::archive::{ArchiveSink, ArchiveSource};
use crate::cache::ResourcePool;
use crate::diagnostics::Diagnostics;
use crate::error::BoxsetError;
use crate::model::{Dataset, Split};

pub use coco::COCO_ANNOTATIONS_ENTRY;
pub use yolo::{exported_manifest, label_file_content};

/// Output layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    /// Per-image label text files next to an `images` folder, plus a
    /// `dataset.yaml` manifest.
    Yolo,
    /// One `annotations.json` document covering every split.
    Coco,
}

impl ExportFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Yolo => "yolo",
            ExportFormat::Coco => "coco",
        }
    }
}

/// What an export wrote.
#[derive(Debug, Default)]
pub struct ExportSummary {
    pub splits: Vec<Split>,
    pub images: usize,
    pub annotations: usize,
    pub diagnostics: Diagnostics,
}

/// Writes `dataset` to `sink` in the given format.
///
/// `source` is the archive the dataset was loaded from; image bytes and
/// label files of unedited images are read from it. The sink is finished on
/// success and discarded on any error.
pub fn export(
    dataset: &Dataset,
    source: &mut dyn ArchiveSource,
    pool: &mut ResourcePool,
    format: ExportFormat,
    sink: &mut dyn ArchiveSink,
) -> Result<ExportSummary, BoxsetError> {
    info!(
        "Exporting {} image(s) as {}",
        dataset.image_count(),
        format.name()
    );
    let mut summary = ExportSummary {
        splits: dataset.loaded_splits(),
        ..Default::default()
    };

    let written = match format {
        ExportFormat::Yolo => yolo::write_yolo(dataset, source, sink, &mut summary),
        ExportFormat::Coco => coco::write_coco(dataset, source, pool, sink, &mut summary),
    };

    match written.and_then(|()| sink.finish()) {
        Ok(()) => {
            info!(
                "Exported {} image(s) and {} annotation(s)",
                summary.images, summary.annotations
            );
            Ok(summary)
        }
        Err(e) => {
            warn!("Export failed, discarding output: {}", e);
            sink.discard();
            Err(e)
        }
    }
}

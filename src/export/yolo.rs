use log::debug;

use super::ExportSummary;
use crate::archive::{label_file_name, normalize_manifest_path, ArchiveSink, ArchiveSource, Manifest};
use crate::error::BoxsetError;
use crate::loader::{effective_annotations, format_label_line};
use crate::model::{Annotation, Dataset, Split};

const MANIFEST_ENTRY: &str = "dataset.yaml";

pub(super) fn write_yolo(
    dataset: &Dataset,
    source: &mut dyn ArchiveSource,
    sink: &mut dyn ArchiveSink,
    summary: &mut ExportSummary,
) -> Result<(), BoxsetError> {
    for split in &dataset.splits {
        for image in &split.images {
            let bytes = source.read(&image.source.entry)?;
            sink.write_entry(&format!("{}/images/{}", split.split, image.name), &bytes)?;

            let annotations = effective_annotations(dataset, image, source, &mut summary.diagnostics)?;
            sink.write_entry(
                &format!("{}/labels/{}", split.split, label_file_name(&image.name)),
                label_file_content(&annotations).as_bytes(),
            )?;

            summary.images += 1;
            summary.annotations += annotations.len();
        }
        debug!("Wrote {} image(s) for {}", split.images.len(), split.split);
    }

    let manifest = exported_manifest(dataset);
    let yaml = manifest
        .to_yaml_string()
        .map_err(|source| BoxsetError::ManifestParse {
            entry: MANIFEST_ENTRY.to_string(),
            source,
        })?;
    sink.write_entry(MANIFEST_ENTRY, yaml.as_bytes())?;
    Ok(())
}

/// One line per annotation, each terminated by a newline.
pub fn label_file_content(annotations: &[Annotation]) -> String {
    annotations
        .iter()
        .map(|ann| format_label_line(ann) + "\n")
        .collect()
}

/// The source manifest with the current class table, and split paths that
/// point at the folders this export writes.
pub fn exported_manifest(dataset: &Dataset) -> Manifest {
    let mut manifest = dataset
        .manifest
        .as_ref()
        .unwrap_or(&Manifest::default_layout())
        .with_classes(&dataset.classes);

    for split in Split::ALL {
        let expected = format!("{}/images", split);
        let slot = match split {
            Split::Train => &mut manifest.train,
            Split::Valid => &mut manifest.val,
            Split::Test => &mut manifest.test,
        };
        let keeps_layout = slot
            .as_deref()
            .map(|p| normalize_manifest_path(p) == expected)
            .unwrap_or(false);
        if dataset.split(split).is_some() && !keeps_layout {
            *slot = Some(expected);
        }
    }
    manifest
}

//! Merging several datasets into one YOLO archive.
//!
//! Class tables are unioned by name in first-seen order and every label is
//! remapped onto the merged table. Image `name.jpg` of input `i` is written
//! as `dataset<i>_name.jpg` so inputs never collide.

use log::{debug, info, warn};

use crate::archive::{label_file_name, ArchiveSink, ArchiveSource, Manifest};
use crate::cache::ResourcePool;
use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::error::BoxsetError;
use crate::export::label_file_content;
use crate::loader::{LoadOptions, Loader};
use crate::model::{Annotation, ClassId, ClassTable, Dataset, Split};
use crate::platform::{HeaderDecoder, NoMemoryProbe, NoopScheduler};

const MANIFEST_ENTRY: &str = "dataset.yaml";

/// What a merge wrote.
#[derive(Debug, Default)]
pub struct MergeSummary {
    pub inputs: usize,
    pub classes: ClassTable,
    pub splits: Vec<Split>,
    pub images: usize,
    pub annotations: usize,
    pub diagnostics: Diagnostics,
}

/// Loads every input and writes their union to `sink`.
///
/// Inputs without a manifest are accepted. The sink is finished on success
/// and discarded on any error.
pub fn merge_archives(
    inputs: &mut [Box<dyn ArchiveSource>],
    config: &EngineConfig,
    sink: &mut dyn ArchiveSink,
) -> Result<MergeSummary, BoxsetError> {
    if inputs.is_empty() {
        return Err(BoxsetError::ArchiveFormat {
            archive: "<merge>".to_string(),
            message: "no input archives given".to_string(),
        });
    }

    match write_merged(inputs, config, sink).and_then(|summary| sink.finish().map(|()| summary)) {
        Ok(summary) => {
            info!(
                "Merged {} dataset(s): {} image(s), {} annotation(s), {} class(es)",
                summary.inputs,
                summary.images,
                summary.annotations,
                summary.classes.len()
            );
            Ok(summary)
        }
        Err(e) => {
            warn!("Merge failed, discarding output: {}", e);
            sink.discard();
            Err(e)
        }
    }
}

fn write_merged(
    inputs: &mut [Box<dyn ArchiveSource>],
    config: &EngineConfig,
    sink: &mut dyn ArchiveSink,
) -> Result<MergeSummary, BoxsetError> {
    let mut pool = ResourcePool::new(config, Box::new(HeaderDecoder), Box::new(NoopScheduler));
    let mut probe = NoMemoryProbe;
    let mut summary = MergeSummary {
        inputs: inputs.len(),
        ..Default::default()
    };

    for (index, source) in inputs.iter_mut().enumerate() {
        let source = source.as_mut();
        let (dataset, outcome) =
            Loader::new(config, &mut pool, &mut probe).load(source, &LoadOptions::lenient())?;
        summary.diagnostics.extend(outcome.diagnostics);
        for e in &outcome.split_errors {
            debug!("{}: {}", source.label(), e);
        }

        let remap = class_remap(&dataset.classes, &mut summary.classes);
        write_input(index, &dataset, source, &remap, sink, &mut summary)?;
        // Decoded sizes are only needed while one input is being read.
        pool.clear();
    }

    let mut manifest = Manifest::default_layout().with_classes(&summary.classes);
    for split in Split::ALL {
        if !summary.splits.contains(&split) {
            let slot = match split {
                Split::Train => &mut manifest.train,
                Split::Valid => &mut manifest.val,
                Split::Test => &mut manifest.test,
            };
            *slot = None;
        }
    }
    let yaml = manifest
        .to_yaml_string()
        .map_err(|source| BoxsetError::ManifestParse {
            entry: MANIFEST_ENTRY.to_string(),
            source,
        })?;
    sink.write_entry(MANIFEST_ENTRY, yaml.as_bytes())?;
    summary.splits.sort();
    Ok(summary)
}

/// Maps each class of `classes` onto `merged`, appending unseen names.
pub fn class_remap(classes: &ClassTable, merged: &mut ClassTable) -> Vec<ClassId> {
    classes
        .iter()
        .map(|(_, name)| match merged.position(name) {
            Some(id) => id,
            None => merged.push(name.to_string()),
        })
        .collect()
}

fn write_input(
    index: usize,
    dataset: &Dataset,
    source: &mut dyn ArchiveSource,
    remap: &[ClassId],
    sink: &mut dyn ArchiveSink,
    summary: &mut MergeSummary,
) -> Result<(), BoxsetError> {
    for split in &dataset.splits {
        if !split.images.is_empty() && !summary.splits.contains(&split.split) {
            summary.splits.push(split.split);
        }
        for image in &split.images {
            let name = format!("dataset{}_{}", index, image.name);
            let bytes = source.read(&image.source.entry)?;
            sink.write_entry(&format!("{}/images/{}", split.split, name), &bytes)?;

            let annotations: Vec<Annotation> = image
                .annotations
                .iter()
                .filter_map(|ann| {
                    remap
                        .get(ann.class_id.index())
                        .map(|class| ann.clone().with_class(*class))
                })
                .collect();
            sink.write_entry(
                &format!("{}/labels/{}", split.split, label_file_name(&name)),
                label_file_content(&annotations).as_bytes(),
            )?;

            summary.images += 1;
            summary.annotations += annotations.len();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use image::DynamicImage;
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(4, 4)
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    fn first() -> Box<dyn ArchiveSource> {
        Box::new(
            MemoryArchive::new("first")
                .with_entry("dataset.yaml", "train: train/images\nnames: [cat, dog]\n")
                .with_entry("train/images/a.png", png_bytes())
                .with_entry("train/labels/a.txt", "0 0.5 0.5 0.2 0.2\n1 0.4 0.4 0.1 0.1\n"),
        )
    }

    fn second() -> Box<dyn ArchiveSource> {
        Box::new(
            MemoryArchive::new("second")
                .with_entry(
                    "dataset.yaml",
                    "train: train/images\nval: valid/images\nnames: [dog, bird]\n",
                )
                .with_entry("train/images/a.png", png_bytes())
                .with_entry("train/labels/a.txt", "0 0.5 0.5 0.2 0.2\n")
                .with_entry("valid/images/v.png", png_bytes())
                .with_entry("valid/labels/v.txt", "1 0.5 0.5 0.2 0.2\n"),
        )
    }

    #[test]
    fn test_class_remap_unions_by_name() {
        let mut merged = ClassTable::from_names(["cat", "dog"]);
        let remap = class_remap(&ClassTable::from_names(["dog", "bird"]), &mut merged);
        assert_eq!(remap, vec![ClassId(1), ClassId(2)]);
        assert_eq!(merged.names(), ["cat", "dog", "bird"]);
    }

    #[test]
    fn test_merge_renames_images_and_remaps_labels() {
        let mut inputs = vec![first(), second()];
        let mut sink = MemoryArchive::new("out");
        let summary =
            merge_archives(&mut inputs, &EngineConfig::default(), &mut sink).expect("merge");

        assert_eq!(summary.images, 3);
        assert_eq!(summary.annotations, 4);
        assert_eq!(summary.classes.names(), ["cat", "dog", "bird"]);
        assert_eq!(summary.splits, vec![Split::Train, Split::Valid]);

        assert!(sink.get("train/images/dataset0_a.png").is_some());
        assert!(sink.get("train/images/dataset1_a.png").is_some());
        assert_eq!(
            sink.get_str("train/labels/dataset0_a.txt"),
            Some("0 0.5 0.5 0.2 0.2\n1 0.4 0.4 0.1 0.1\n")
        );
        assert_eq!(sink.get_str("train/labels/dataset1_a.txt"), Some("1 0.5 0.5 0.2 0.2\n"));
        assert_eq!(sink.get_str("valid/labels/dataset1_v.txt"), Some("2 0.5 0.5 0.2 0.2\n"));

        let manifest = Manifest::parse("dataset.yaml", sink.get_str("dataset.yaml").expect("yaml"))
            .expect("parse");
        assert_eq!(manifest.names, vec!["cat", "dog", "bird"]);
        assert_eq!(manifest.nc, Some(3));
        assert_eq!(manifest.val.as_deref(), Some("valid/images"));
        assert_eq!(manifest.test, None);
    }

    #[test]
    fn test_no_inputs_is_rejected() {
        let mut sink = MemoryArchive::new("out");
        let err = merge_archives(&mut [], &EngineConfig::default(), &mut sink).unwrap_err();
        assert!(matches!(err, BoxsetError::ArchiveFormat { .. }));
    }

    #[test]
    fn test_failed_input_discards_output() {
        let broken: Box<dyn ArchiveSource> = Box::new(MemoryArchive::new("empty"));
        let mut inputs = vec![first(), broken];
        let mut sink = MemoryArchive::new("out");
        assert!(merge_archives(&mut inputs, &EngineConfig::default(), &mut sink).is_err());
        assert!(sink.is_empty());
    }
}

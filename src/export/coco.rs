//! COCO JSON export.
//!
//! COCO bounding boxes use `[x, y, width, height]` with `(x, y)` the
//! top-left corner in pixels, so every image has to be measured. Category
//! ids are class ids unchanged; image and annotation ids count from 1.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use super::ExportSummary;
use crate::archive::{ArchiveSink, ArchiveSource};
use crate::cache::ResourcePool;
use crate::error::BoxsetError;
use crate::loader::effective_annotations;
use crate::model::{ClassTable, Dataset};

pub const COCO_ANNOTATIONS_ENTRY: &str = "annotations.json";

// ============================================================================
// COCO Schema Types (internal to this module)
// ============================================================================

#[derive(Debug, Serialize)]
struct CocoDataset {
    info: CocoInfo,
    licenses: Vec<CocoLicense>,
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Serialize)]
struct CocoInfo {
    year: i32,
    version: String,
    description: String,
    contributor: String,
    url: String,
    date_created: String,
}

#[derive(Debug, Serialize)]
struct CocoLicense {
    id: u64,
    name: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct CocoImage {
    id: u64,
    width: u32,
    height: u32,
    file_name: String,
    license: u64,
    date_captured: String,
}

#[derive(Debug, Serialize)]
struct CocoCategory {
    id: usize,
    name: String,
    supercategory: String,
}

#[derive(Debug, Serialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    category_id: usize,
    /// `[x, y, width, height]`, top-left corner in pixels.
    bbox: [f64; 4],
    area: f64,
    segmentation: Vec<Vec<f64>>,
    iscrowd: u8,
}

const LICENSE_ID: u64 = 1;

fn header(now: DateTime<Utc>, classes: &ClassTable) -> CocoDataset {
    CocoDataset {
        info: CocoInfo {
            year: now.year(),
            version: "1.0".to_string(),
            description: format!("Exported by boxset {}", env!("CARGO_PKG_VERSION")),
            contributor: "boxset".to_string(),
            url: String::new(),
            date_created: now.to_rfc3339(),
        },
        licenses: vec![CocoLicense {
            id: LICENSE_ID,
            name: "Unknown".to_string(),
            url: String::new(),
        }],
        images: Vec::new(),
        annotations: Vec::new(),
        categories: classes
            .iter()
            .map(|(id, name)| CocoCategory {
                id: id.index(),
                name: name.to_string(),
                supercategory: "object".to_string(),
            })
            .collect(),
    }
}

pub(super) fn write_coco(
    dataset: &Dataset,
    source: &mut dyn ArchiveSource,
    pool: &mut ResourcePool,
    sink: &mut dyn ArchiveSink,
    summary: &mut ExportSummary,
) -> Result<(), BoxsetError> {
    let now = Utc::now();
    let mut coco = header(now, &dataset.classes);
    let mut next_annotation_id = 1u64;

    for split in &dataset.splits {
        for image in &split.images {
            let entry = image.source.entry.as_str();
            let bytes = source.read(entry)?;
            let handle = pool
                .register_full(image.source.cache_key(), &bytes)
                .map_err(|e| match e {
                    BoxsetError::ImageDecode { message, .. } => BoxsetError::ExportDecode {
                        split: split.split,
                        image: image.name.clone(),
                        message,
                    },
                    other => other,
                })?;
            sink.write_entry(&format!("{}/images/{}", split.split, image.name), &bytes)?;

            let image_id = coco.images.len() as u64 + 1;
            let (w, h) = (f64::from(handle.width), f64::from(handle.height));
            coco.images.push(CocoImage {
                id: image_id,
                width: handle.width,
                height: handle.height,
                file_name: image.name.clone(),
                license: LICENSE_ID,
                date_captured: now.to_rfc3339(),
            });

            let annotations = effective_annotations(dataset, image, source, &mut summary.diagnostics)?;
            for ann in &annotations {
                let (bw, bh) = (ann.width * w, ann.height * h);
                coco.annotations.push(CocoAnnotation {
                    id: next_annotation_id,
                    image_id,
                    category_id: ann.class_id.index(),
                    bbox: [ann.center_x * w - bw / 2.0, ann.center_y * h - bh / 2.0, bw, bh],
                    area: bw * bh,
                    segmentation: Vec::new(),
                    iscrowd: 0,
                });
                next_annotation_id += 1;
            }

            summary.images += 1;
            summary.annotations += annotations.len();
        }
    }

    let json = serde_json::to_vec_pretty(&coco).map_err(|source| BoxsetError::CocoJsonWrite {
        path: COCO_ANNOTATIONS_ENTRY.to_string(),
        source,
    })?;
    sink.write_entry(COCO_ANNOTATIONS_ENTRY, &json)
}

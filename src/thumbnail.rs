//! Class crop thumbnails.
//!
//! Lists every box of one class and produces a small crop for each, one
//! page at a time. Crops are cached in the pool's thumbnail cache; source
//! images come through its full-image cache.

use image::DynamicImage;
use log::warn;

use crate::archive::ArchiveSource;
use crate::cache::ResourcePool;
use crate::config::EngineConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticContext, Diagnostics};
use crate::error::{BoxsetError, ClassOperationError};
use crate::geometry::pixel_bounds;
use crate::model::{Annotation, AnnotationId, ClassId, Dataset, ImageId};
use crate::platform::ImageHandle;

/// Where one crop comes from.
#[derive(Clone, Debug, PartialEq)]
pub struct CropInfo {
    pub image: ImageId,
    pub image_key: String,
    pub entry: String,
    pub annotation: Annotation,
}

impl CropInfo {
    /// Thumbnail cache key, `split/name#annotation`.
    pub fn thumbnail_key(&self) -> String {
        format!("{}#{}", self.image_key, self.annotation.id)
    }

    pub fn annotation_id(&self) -> AnnotationId {
        self.annotation.id
    }
}

#[derive(Clone, Debug)]
pub struct ClassCrop {
    pub info: CropInfo,
    pub handle: ImageHandle,
}

/// One page of crops. `total` counts every box of the class.
#[derive(Clone, Debug)]
pub struct CropPage {
    pub class: ClassId,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub crops: Vec<ClassCrop>,
}

impl CropPage {
    pub fn page_count(&self) -> usize {
        self.total.div_ceil(self.per_page.max(1))
    }
}

pub struct ThumbnailService<'a> {
    pool: &'a mut ResourcePool,
    max_side: u32,
}

impl<'a> ThumbnailService<'a> {
    pub fn new(pool: &'a mut ResourcePool, config: &EngineConfig) -> Self {
        Self {
            pool,
            max_side: config.thumbnail_max_side.max(1),
        }
    }

    /// Every box of `class`, in dataset order.
    pub fn list_class_annotations(dataset: &Dataset, class: ClassId) -> Vec<CropInfo> {
        dataset
            .images()
            .flat_map(|img| {
                img.annotations
                    .iter()
                    .filter(move |a| a.class_id == class)
                    .map(move |a| CropInfo {
                        image: img.id,
                        image_key: img.key(),
                        entry: img.source.entry.clone(),
                        annotation: a.clone(),
                    })
            })
            .collect()
    }

    /// Crops for page `page` (zero-based) of `class`.
    ///
    /// Boxes whose source image is missing or cannot be decoded are left
    /// out and reported in `diagnostics`.
    pub fn class_crops(
        &mut self,
        dataset: &Dataset,
        source: &mut dyn ArchiveSource,
        class: ClassId,
        page: usize,
        per_page: usize,
        diagnostics: &mut Diagnostics,
    ) -> Result<CropPage, BoxsetError> {
        if !dataset.classes.is_valid(class) {
            return Err(ClassOperationError::InvalidClassId {
                id: class,
                class_count: dataset.classes.len(),
            }
            .into());
        }

        let all = Self::list_class_annotations(dataset, class);
        let per_page = per_page.max(1);
        let mut crops = Vec::new();

        for info in all.iter().skip(page.saturating_mul(per_page)).take(per_page) {
            match self.crop(info, source) {
                Ok(handle) => crops.push(ClassCrop {
                    info: info.clone(),
                    handle,
                }),
                Err(e) => {
                    warn!("Skipping crop {}: {}", info.thumbnail_key(), e);
                    diagnostics.add(Diagnostic::warning(
                        DiagnosticCode::ThumbnailSkipped,
                        e.to_string(),
                        DiagnosticContext::entry(info.entry.clone()),
                    ));
                }
            }
        }

        Ok(CropPage {
            class,
            page,
            per_page,
            total: all.len(),
            crops,
        })
    }

    fn crop(&mut self, info: &CropInfo, source: &mut dyn ArchiveSource) -> Result<ImageHandle, BoxsetError> {
        let max_side = self.max_side;
        let annotation = &info.annotation;
        self.pool.thumbnail(
            &info.thumbnail_key(),
            &info.entry,
            || source.read(&info.entry),
            |img| crop_box(img, annotation, max_side),
        )
    }
}

/// Cuts the annotation's box out of `img` and scales it to fit `max_side`.
///
/// The box is clamped to the image and is at least one pixel on each side.
pub fn crop_box(img: &DynamicImage, annotation: &Annotation, max_side: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let bounds = pixel_bounds(annotation, f64::from(w), f64::from(h));

    let x0 = bounds.x.floor().clamp(0.0, f64::from(w.saturating_sub(1))) as u32;
    let y0 = bounds.y.floor().clamp(0.0, f64::from(h.saturating_sub(1))) as u32;
    let x1 = (bounds.x + bounds.width).ceil().clamp(0.0, f64::from(w)) as u32;
    let y1 = (bounds.y + bounds.height).ceil().clamp(0.0, f64::from(h)) as u32;

    let crop = img.crop_imm(x0, y0, x1.saturating_sub(x0).max(1), y1.saturating_sub(y0).max(1));
    if crop.width() > max_side || crop.height() > max_side {
        crop.thumbnail(max_side, max_side)
    } else {
        crop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::model::{ClassTable, Image, SourceHandle, Split};
    use crate::platform::{NoopScheduler, RasterDecoder};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    fn fixture() -> (Dataset, MemoryArchive) {
        let source = MemoryArchive::new("src")
            .with_entry("train/images/a.png", png_bytes(100, 50))
            .with_entry("train/images/broken.png", "nope");
        let mut dataset = Dataset::new(ClassTable::from_names(["cat", "dog"]));
        let train = dataset.split_mut(Split::Train);
        train.images.push(
            Image::new(1u64, "a.png", Split::Train, SourceHandle::new("train/images/a.png"))
                .with_annotations(vec![
                    Annotation::rectangle(0u64, 0usize, 0.5, 0.5, 0.2, 0.4),
                    Annotation::rectangle(1u64, 1usize, 0.5, 0.5, 0.2, 0.2),
                    Annotation::rectangle(2u64, 0usize, 0.1, 0.1, 0.5, 0.5),
                ]),
        );
        train.images.push(
            Image::new(2u64, "broken.png", Split::Train, SourceHandle::new("train/images/broken.png"))
                .with_annotations(vec![Annotation::rectangle(0u64, 0usize, 0.5, 0.5, 0.2, 0.2)]),
        );
        (dataset, source)
    }

    fn pool() -> ResourcePool {
        ResourcePool::new(
            &EngineConfig::default(),
            Box::new(RasterDecoder),
            Box::new(NoopScheduler),
        )
    }

    #[test]
    fn test_lists_only_requested_class() {
        let (dataset, _) = fixture();
        let listed = ThumbnailService::list_class_annotations(&dataset, ClassId(0));
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].thumbnail_key(), "train/a.png#0");
        assert_eq!(listed[2].image, ImageId(2));
    }

    #[test]
    fn test_crops_are_paged_and_sized() {
        let (dataset, mut source) = fixture();
        let mut pool = pool();
        let mut service = ThumbnailService::new(&mut pool, &EngineConfig::default());
        let mut diagnostics = Diagnostics::new();

        let page = service
            .class_crops(&dataset, &mut source, ClassId(0), 0, 2, &mut diagnostics)
            .expect("crops");

        assert_eq!(page.total, 3);
        assert_eq!(page.page_count(), 2);
        assert_eq!(page.crops.len(), 2);
        assert_eq!((page.crops[0].handle.width, page.crops[0].handle.height), (20, 20));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_undecodable_source_is_skipped() {
        let (dataset, mut source) = fixture();
        let mut pool = pool();
        let mut service = ThumbnailService::new(&mut pool, &EngineConfig::default());
        let mut diagnostics = Diagnostics::new();

        let page = service
            .class_crops(&dataset, &mut source, ClassId(0), 1, 2, &mut diagnostics)
            .expect("crops");

        assert!(page.crops.is_empty());
        assert_eq!(diagnostics.count(DiagnosticCode::ThumbnailSkipped), 1);
    }

    #[test]
    fn test_page_past_the_end_is_empty() {
        let (dataset, mut source) = fixture();
        let mut pool = pool();
        let mut service = ThumbnailService::new(&mut pool, &EngineConfig::default());
        let mut diagnostics = Diagnostics::new();

        let page = service
            .class_crops(&dataset, &mut source, ClassId(0), usize::MAX, 50, &mut diagnostics)
            .expect("crops");

        assert!(page.crops.is_empty());
        assert_eq!(page.total, 3);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let (dataset, mut source) = fixture();
        let mut pool = pool();
        let mut service = ThumbnailService::new(&mut pool, &EngineConfig::default());
        let err = service
            .class_crops(&dataset, &mut source, ClassId(5), 0, 10, &mut Diagnostics::new())
            .unwrap_err();
        assert!(matches!(err, BoxsetError::ClassOperation(_)));
    }

    #[test]
    fn test_crop_box_clamps_and_scales() {
        let img = DynamicImage::new_rgb8(400, 400);
        let edge = Annotation::rectangle(0u64, 0usize, 0.0, 0.0, 0.5, 0.5);
        let crop = crop_box(&img, &edge, 128);
        assert_eq!((crop.width(), crop.height()), (100, 100));

        let big = Annotation::rectangle(0u64, 0usize, 0.5, 0.5, 1.0, 0.5);
        let crop = crop_box(&img, &big, 128);
        assert_eq!((crop.width(), crop.height()), (128, 64));
    }
}

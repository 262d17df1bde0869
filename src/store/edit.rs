//! Per-image annotation edits.
//!
//! Each edit builds the image's new list, then commits it wholesale to both
//! the live image and the override cache.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use log::info;

use super::AnnotationStore;
use crate::error::BoxsetError;
use crate::model::{Annotation, AnnotationId, ClassId, ImageId};
use crate::platform::{delete_file_best_effort, FileRemover};

/// Points at one annotation on one image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnotationRef {
    pub image: ImageId,
    pub annotation: AnnotationId,
}

impl AnnotationRef {
    pub fn new(image: ImageId, annotation: AnnotationId) -> Self {
        Self { image, annotation }
    }
}

fn group_by_image(refs: &[AnnotationRef]) -> BTreeMap<ImageId, HashSet<AnnotationId>> {
    let mut grouped: BTreeMap<ImageId, HashSet<AnnotationId>> = BTreeMap::new();
    for r in refs {
        grouped.entry(r.image).or_default().insert(r.annotation);
    }
    grouped
}

impl AnnotationStore {
    fn annotations_of(&self, image: ImageId) -> Result<&[Annotation], BoxsetError> {
        self.dataset
            .image(image)
            .map(|img| img.annotations.as_slice())
            .ok_or(BoxsetError::ImageNotFound(image))
    }

    fn check_classes(&self, annotations: &[Annotation]) -> Result<(), BoxsetError> {
        for ann in annotations {
            self.check_class(ann.class_id)?;
        }
        Ok(())
    }

    /// Replaces an image's whole annotation list.
    pub fn set_annotations(
        &mut self,
        image: ImageId,
        annotations: Vec<Annotation>,
    ) -> Result<(), BoxsetError> {
        self.annotations_of(image)?;
        self.check_classes(&annotations)?;
        self.commit(image, annotations)
    }

    /// Appends an annotation, assigning it the next free id on the image.
    pub fn add_annotation(
        &mut self,
        image: ImageId,
        mut annotation: Annotation,
    ) -> Result<AnnotationId, BoxsetError> {
        self.check_class(annotation.class_id)?;
        let img = self
            .dataset
            .image(image)
            .ok_or(BoxsetError::ImageNotFound(image))?;
        annotation.id = img.next_annotation_id();
        let id = annotation.id;

        let mut list = img.annotations.clone();
        list.push(annotation);
        self.commit(image, list)?;
        Ok(id)
    }

    /// Removes the given annotations from one image. Unknown ids are ignored.
    ///
    /// Returns how many were removed.
    pub fn delete_annotations(
        &mut self,
        image: ImageId,
        ids: &[AnnotationId],
    ) -> Result<usize, BoxsetError> {
        let current = self.annotations_of(image)?;
        let list: Vec<Annotation> = current
            .iter()
            .filter(|a| !ids.contains(&a.id))
            .cloned()
            .collect();
        let removed = current.len() - list.len();
        if removed > 0 {
            self.commit(image, list)?;
        }
        Ok(removed)
    }

    fn update_annotation<F>(
        &mut self,
        image: ImageId,
        annotation: AnnotationId,
        f: F,
    ) -> Result<(), BoxsetError>
    where
        F: FnOnce(&mut Annotation),
    {
        let mut list = self.annotations_of(image)?.to_vec();
        let target = list
            .iter_mut()
            .find(|a| a.id == annotation)
            .ok_or(BoxsetError::AnnotationNotFound { image, annotation })?;
        f(target);
        self.commit(image, list)
    }

    pub fn set_annotation_class(
        &mut self,
        image: ImageId,
        annotation: AnnotationId,
        class: ClassId,
    ) -> Result<(), BoxsetError> {
        self.check_class(class)?;
        self.update_annotation(image, annotation, |a| a.class_id = class)
    }

    /// Sets the normalized size of a box, keeping its center.
    pub fn set_annotation_size(
        &mut self,
        image: ImageId,
        annotation: AnnotationId,
        width: f64,
        height: f64,
    ) -> Result<(), BoxsetError> {
        self.update_annotation(image, annotation, |a| {
            a.width = width;
            a.height = height;
        })
    }

    /// Replaces one annotation, e.g. with the result of a drag or resize.
    pub fn replace_annotation(
        &mut self,
        image: ImageId,
        annotation: Annotation,
    ) -> Result<(), BoxsetError> {
        self.check_class(annotation.class_id)?;
        let id = annotation.id;
        self.update_annotation(image, id, |a| *a = annotation)
    }

    /// Reassigns many annotations, possibly across images.
    ///
    /// Every referenced image and annotation is checked before anything
    /// changes. Returns how many annotations were reassigned.
    pub fn bulk_set_class(&mut self, refs: &[AnnotationRef], class: ClassId) -> Result<usize, BoxsetError> {
        self.check_class(class)?;
        let grouped = group_by_image(refs);

        let mut updates = Vec::with_capacity(grouped.len());
        let mut count = 0;
        for (image, ids) in &grouped {
            let current = self.annotations_of(*image)?;
            if let Some(missing) = ids.iter().find(|id| !current.iter().any(|a| a.id == **id)) {
                return Err(BoxsetError::AnnotationNotFound {
                    image: *image,
                    annotation: *missing,
                });
            }
            let list: Vec<Annotation> = current
                .iter()
                .map(|a| {
                    if ids.contains(&a.id) {
                        count += 1;
                        a.clone().with_class(class)
                    } else {
                        a.clone()
                    }
                })
                .collect();
            updates.push((*image, list));
        }

        for (image, list) in updates {
            self.commit(image, list)?;
        }
        Ok(count)
    }

    /// Deletes many annotations, possibly across images. Unknown annotation
    /// ids are ignored; unknown images are an error.
    pub fn bulk_delete(&mut self, refs: &[AnnotationRef]) -> Result<usize, BoxsetError> {
        let grouped = group_by_image(refs);
        for image in grouped.keys() {
            self.annotations_of(*image)?;
        }

        let mut removed = 0;
        for (image, ids) in grouped {
            let ids: Vec<AnnotationId> = ids.into_iter().collect();
            removed += self.delete_annotations(image, &ids)?;
        }
        Ok(removed)
    }

    /// Drops an image from the dataset and deletes its file under `root`.
    ///
    /// The record and its override are removed even when the file cannot be
    /// deleted; the failure is only logged. Returns whether the file went
    /// away.
    pub fn remove_image_file(
        &mut self,
        image: ImageId,
        remover: &mut dyn FileRemover,
        root: &Path,
    ) -> Result<bool, BoxsetError> {
        let removed = self
            .dataset
            .splits
            .iter_mut()
            .find_map(|s| {
                s.images
                    .iter()
                    .position(|img| img.id == image)
                    .map(|pos| s.images.remove(pos))
            })
            .ok_or(BoxsetError::ImageNotFound(image))?;

        self.dataset.overrides.remove(removed.split, &removed.key());
        info!("Removed image {} from {}", removed.name, removed.split);

        let deleted = delete_file_best_effort(remover, &root.join(&removed.source.entry));
        if let Some(label) = &removed.label_entry {
            delete_file_best_effort(remover, &root.join(label));
        }
        Ok(deleted)
    }
}

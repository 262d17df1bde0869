//! The annotation store.
//!
//! [`AnnotationStore`] owns one open [`Dataset`] and is the only place that
//! mutates it. Every operation validates its inputs before touching
//! anything, so a rejected call leaves the dataset as it was. Whenever an
//! image's annotation list changes, the new list is also written to the
//! override cache as a whole, which keeps exports and reloads consistent
//! with what the user sees.

mod edit;
mod taxonomy;

pub use edit::AnnotationRef;
pub use taxonomy::Padding;

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{BoxsetError, ClassOperationError};
use crate::model::io_session::write_session;
use crate::model::{Annotation, ClassId, ClassTable, Dataset, Image, ImageId, OverrideCache, Split};

#[derive(Clone, Debug, Default)]
pub struct AnnotationStore {
    dataset: Dataset,
    padding: BTreeMap<ClassId, Padding>,
}

impl AnnotationStore {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            padding: BTreeMap::new(),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }

    pub fn classes(&self) -> &ClassTable {
        &self.dataset.classes
    }

    pub fn overrides(&self) -> &OverrideCache {
        &self.dataset.overrides
    }

    pub fn image(&self, id: ImageId) -> Option<&Image> {
        self.dataset.image(id)
    }

    pub fn images_in(&self, split: Split) -> &[Image] {
        self.dataset
            .split(split)
            .map(|s| s.images.as_slice())
            .unwrap_or(&[])
    }

    /// Writes the override cache and class table to a session file.
    pub fn save_session(&self, path: &Path) -> Result<(), BoxsetError> {
        write_session(path, self.dataset.classes.names(), &self.dataset.overrides)
    }

    /// Looks a class up by name.
    pub fn class_id(&self, name: &str) -> Result<ClassId, BoxsetError> {
        self.dataset
            .classes
            .position(name.trim())
            .ok_or_else(|| ClassOperationError::UnknownName(name.to_string()).into())
    }

    fn check_class(&self, id: ClassId) -> Result<(), ClassOperationError> {
        if self.dataset.classes.is_valid(id) {
            Ok(())
        } else {
            Err(ClassOperationError::InvalidClassId {
                id,
                class_count: self.dataset.classes.len(),
            })
        }
    }

    fn image_mut(&mut self, id: ImageId) -> Result<&mut Image, BoxsetError> {
        self.dataset
            .image_mut(id)
            .ok_or(BoxsetError::ImageNotFound(id))
    }

    /// Replaces one image's list and its override entry.
    fn commit(&mut self, id: ImageId, annotations: Vec<Annotation>) -> Result<(), BoxsetError> {
        let image = self.image_mut(id)?;
        image.annotations = annotations;
        let (split, key, list) = (image.split, image.key(), image.annotations.clone());
        self.dataset.overrides.replace(split, key, list);
        Ok(())
    }

    /// Maps every annotation in the dataset through `f`, dropping those it
    /// returns `None` for.
    ///
    /// Override entries are rewritten first, including those of images that
    /// are not loaded. Live images whose list changed then get their new
    /// list written back as an override. Returns the number of live images
    /// that changed.
    fn rewrite_everywhere<F>(&mut self, f: F) -> usize
    where
        F: Fn(&Annotation) -> Option<Annotation>,
    {
        self.dataset
            .overrides
            .rewrite_all(|list| list.iter().filter_map(&f).collect());

        let mut changed = Vec::new();
        for image in self.dataset.images_mut() {
            let rewritten: Vec<Annotation> = image.annotations.iter().filter_map(&f).collect();
            if rewritten != image.annotations {
                image.annotations = rewritten;
                changed.push((image.split, image.key(), image.annotations.clone()));
            }
        }

        let count = changed.len();
        for (split, key, list) in changed {
            self.dataset.overrides.replace(split, key, list);
        }
        count
    }
}

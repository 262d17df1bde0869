//! Class table mutations.
//!
//! Positions in the class table are class ids, so removing an entry shifts
//! every later id down by one. Merge and delete reindex every annotation in
//! the dataset, overrides included, before returning.

use log::info;
use serde::{Deserialize, Serialize};

use super::AnnotationStore;
use crate::error::{BoxsetError, ClassOperationError};
use crate::model::{Annotation, ClassId, ClassTable};

/// Size change last applied to a class with [`AnnotationStore::apply_global_padding`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Padding {
    pub d_width: f64,
    pub d_height: f64,
}

fn clean_name(name: &str) -> Result<String, ClassOperationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ClassOperationError::EmptyName);
    }
    Ok(name.to_string())
}

/// Id a class ends up with after the class at `removed` is taken out.
fn shift_down(id: ClassId, removed: ClassId) -> ClassId {
    if id > removed {
        ClassId::new(id.index() - 1)
    } else {
        id
    }
}

impl AnnotationStore {
    /// Folds class `source` into class `target`.
    ///
    /// The merged class ends up at `target`, or one below it when
    /// `target > source`.
    pub fn merge_classes(&mut self, source: ClassId, target: ClassId) -> Result<(), BoxsetError> {
        self.check_class(source)?;
        self.check_class(target)?;
        if source == target {
            return Err(ClassOperationError::SameClass(source).into());
        }

        let changed = self.rewrite_everywhere(|ann| {
            let class = if ann.class_id == source {
                target
            } else {
                ann.class_id
            };
            Some(ann.clone().with_class(shift_down(class, source)))
        });
        let removed = self.dataset.classes.remove(source);
        self.shift_padding(source);

        info!(
            "Merged class '{}' into '{}' ({} image(s) changed)",
            removed,
            self.dataset
                .classes
                .get(shift_down(target, source))
                .unwrap_or_default(),
            changed
        );
        Ok(())
    }

    /// Collapses every class into a single one named `new_name`.
    pub fn merge_all_classes(&mut self, new_name: &str) -> Result<(), BoxsetError> {
        let name = clean_name(new_name)?;
        let changed = self.rewrite_everywhere(|ann| Some(ann.clone().with_class(ClassId::new(0))));
        self.dataset.classes = ClassTable::from_names([name.clone()]);
        self.padding.clear();
        info!("Merged all classes into '{}' ({} image(s) changed)", name, changed);
        Ok(())
    }

    /// Renames a class. Annotations keep their ids.
    pub fn rename_class(&mut self, id: ClassId, new_name: &str) -> Result<(), BoxsetError> {
        self.check_class(id)?;
        let name = clean_name(new_name)?;
        if self.dataset.classes.contains(&name) {
            return Err(ClassOperationError::DuplicateName(name).into());
        }
        info!(
            "Renamed class {} '{}' to '{}'",
            id,
            self.dataset.classes.get(id).unwrap_or_default(),
            name
        );
        self.dataset.classes.set_name(id, name);
        Ok(())
    }

    /// Removes a class and every annotation that uses it.
    ///
    /// Returns the number of annotations removed from loaded images.
    pub fn delete_class(&mut self, id: ClassId) -> Result<usize, BoxsetError> {
        self.check_class(id)?;
        let before = self.dataset.annotation_count();
        let changed = self.rewrite_everywhere(|ann| {
            (ann.class_id != id).then(|| ann.clone().with_class(shift_down(ann.class_id, id)))
        });
        let removed_annotations = before - self.dataset.annotation_count();
        let name = self.dataset.classes.remove(id);
        self.shift_padding(id);

        info!(
            "Deleted class '{}': {} annotation(s) removed, {} image(s) changed",
            name, removed_annotations, changed
        );
        Ok(removed_annotations)
    }

    /// Appends a class and returns its id.
    pub fn add_class(&mut self, name: &str) -> Result<ClassId, BoxsetError> {
        let name = clean_name(name)?;
        if self.dataset.classes.contains(&name) {
            return Err(ClassOperationError::DuplicateName(name).into());
        }
        Ok(self.dataset.classes.push(name))
    }

    /// Grows or shrinks every box of a class, keeping centers fixed.
    ///
    /// Width and height are clamped to `[0, 1]`. The padding is remembered
    /// per class; returns the number of images that changed.
    pub fn apply_global_padding(
        &mut self,
        class: ClassId,
        d_width: f64,
        d_height: f64,
    ) -> Result<usize, BoxsetError> {
        self.check_class(class)?;
        let changed = self.rewrite_everywhere(|ann| {
            if ann.class_id != class {
                return Some(ann.clone());
            }
            Some(Annotation {
                width: (ann.width + d_width).clamp(0.0, 1.0),
                height: (ann.height + d_height).clamp(0.0, 1.0),
                ..ann.clone()
            })
        });
        self.padding.insert(class, Padding { d_width, d_height });
        Ok(changed)
    }

    /// Forgets the remembered padding. Boxes stay as they are.
    pub fn reset_class_padding(&mut self, class: ClassId) -> Option<Padding> {
        self.padding.remove(&class)
    }

    pub fn class_padding(&self, class: ClassId) -> Option<Padding> {
        self.padding.get(&class).copied()
    }

    fn shift_padding(&mut self, removed: ClassId) {
        let padding = std::mem::take(&mut self.padding);
        self.padding = padding
            .into_iter()
            .filter(|(id, _)| *id != removed)
            .map(|(id, p)| (shift_down(id, removed), p))
            .collect();
    }
}

//! Core in-memory dataset model.
//!
//! A [`Dataset`] is created empty, populated by the loader, mutated by the
//! [`AnnotationStore`](crate::store::AnnotationStore) and finally read by the
//! exporters. Coordinates are kept exactly as label files store them:
//! normalized center/size fractions of the image dimensions.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::ids::{AnnotationId, ClassId, ImageId};
use super::overrides::OverrideCache;
use crate::archive::Manifest;

/// One of the fixed partitions a dataset is divided into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    /// All splits in canonical order.
    pub const ALL: [Split; 3] = [Split::Train, Split::Valid, Split::Test];

    /// Folder name used for this split inside an archive.
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }

    /// Key under which a manifest declares this split's image path.
    pub fn manifest_key(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "val",
            Split::Test => "test",
        }
    }

    /// Folder names that conventionally hold this split.
    pub fn folder_aliases(&self) -> &'static [&'static str] {
        match self {
            Split::Train => &["train"],
            Split::Valid => &["valid", "val"],
            Split::Test => &["test"],
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "valid" | "val" => Ok(Split::Valid),
            "test" => Ok(Split::Test),
            other => Err(format!("unknown split '{other}' (expected train, valid or test)")),
        }
    }
}

/// Builds the key that identifies an image across overrides and caches.
pub fn image_key(split: Split, image_name: &str) -> String {
    format!("{}/{}", split, image_name)
}

/// Shape of an annotation. Only rectangles exist today.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ShapeKind {
    #[default]
    Rectangle,
}

/// A normalized bounding box with a class reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub class_id: ClassId,
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub kind: ShapeKind,
}

impl Annotation {
    /// Creates a rectangle annotation from normalized center/size values.
    pub fn rectangle(
        id: impl Into<AnnotationId>,
        class_id: impl Into<ClassId>,
        center_x: f64,
        center_y: f64,
        width: f64,
        height: f64,
    ) -> Self {
        Self {
            id: id.into(),
            class_id: class_id.into(),
            center_x,
            center_y,
            width,
            height,
            kind: ShapeKind::Rectangle,
        }
    }

    /// Returns a copy with a different class.
    pub fn with_class(mut self, class_id: ClassId) -> Self {
        self.class_id = class_id;
        self
    }
}

/// Opaque reference to an image's bytes.
///
/// The model never holds decoded pixels; the handle names the archive entry
/// and doubles as the key into the resource caches.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceHandle {
    pub entry: String,
}

impl SourceHandle {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
        }
    }

    /// Cache key for the decoded full image.
    pub fn cache_key(&self) -> &str {
        &self.entry
    }
}

/// An image record and its live annotation list.
#[derive(Clone, Debug)]
pub struct Image {
    pub id: ImageId,
    /// File name without folders, e.g. `img1.jpg`.
    pub name: String,
    pub split: Split,
    pub source: SourceHandle,
    /// Archive entry of the label file found at load time, if any.
    pub label_entry: Option<String>,
    pub annotations: Vec<Annotation>,
}

impl Image {
    pub fn new(
        id: impl Into<ImageId>,
        name: impl Into<String>,
        split: Split,
        source: SourceHandle,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            split,
            source,
            label_entry: None,
            annotations: Vec::new(),
        }
    }

    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_label_entry(mut self, entry: impl Into<String>) -> Self {
        self.label_entry = Some(entry.into());
        self
    }

    /// Key used by the override cache: `split/name`.
    pub fn key(&self) -> String {
        image_key(self.split, &self.name)
    }

    /// Next annotation id that is free on this image.
    pub fn next_annotation_id(&self) -> AnnotationId {
        let next = self
            .annotations
            .iter()
            .map(|ann| ann.id.as_u64() + 1)
            .max()
            .unwrap_or(0);
        AnnotationId::new(next)
    }
}

/// Largest class table built from archive content.
///
/// Label class ids and manifest `nc`/`names` at or above this bound are
/// treated as malformed instead of growing the table.
pub const MAX_CLASS_COUNT: usize = 10_000;

/// Ordered, unique list of class names. A name's position is its [`ClassId`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassTable {
    names: Vec<String>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table, keeping every name at its position.
    ///
    /// A repeated name is renamed `<name>_<k>` with the smallest free `k`.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new();
        let mut seen = HashSet::new();
        for name in names {
            let name = unique_name(name.into(), &seen);
            seen.insert(name.clone());
            table.names.push(name);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, id: ClassId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    pub fn position(&self, name: &str) -> Option<ClassId> {
        self.names.iter().position(|n| n == name).map(ClassId::new)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn is_valid(&self, id: ClassId) -> bool {
        id.index() < self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (ClassId::new(i), n.as_str()))
    }

    pub(crate) fn push(&mut self, name: String) -> ClassId {
        self.names.push(name);
        ClassId::new(self.names.len() - 1)
    }

    pub(crate) fn remove(&mut self, id: ClassId) -> String {
        self.names.remove(id.index())
    }

    pub(crate) fn set_name(&mut self, id: ClassId, name: String) {
        self.names[id.index()] = name;
    }
}

/// `name`, or `name_<k>` for the smallest `k` not in `taken`.
pub(crate) fn unique_name(name: String, taken: &HashSet<String>) -> String {
    if !taken.contains(&name) {
        return name;
    }
    let mut k = 1usize;
    loop {
        let candidate = format!("{}_{}", name, k);
        if !taken.contains(&candidate) {
            return candidate;
        }
        k += 1;
    }
}

/// The images of one split, in archive enumeration order.
#[derive(Clone, Debug)]
pub struct SplitImages {
    pub split: Split,
    pub images: Vec<Image>,
}

/// A complete dataset session: splits, class table and edit overrides.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub splits: Vec<SplitImages>,
    pub classes: ClassTable,
    pub overrides: OverrideCache,
    /// Manifest the dataset was loaded from, kept so exports preserve it.
    pub manifest: Option<Manifest>,
}

impl Dataset {
    pub fn new(classes: ClassTable) -> Self {
        Self {
            classes,
            ..Default::default()
        }
    }

    pub fn split(&self, split: Split) -> Option<&SplitImages> {
        self.splits.iter().find(|s| s.split == split)
    }

    /// Returns the image list for `split`, creating an empty one if needed.
    pub fn split_mut(&mut self, split: Split) -> &mut SplitImages {
        if let Some(pos) = self.splits.iter().position(|s| s.split == split) {
            return &mut self.splits[pos];
        }
        self.splits.push(SplitImages {
            split,
            images: Vec::new(),
        });
        self.splits.sort_by_key(|s| s.split);
        let pos = self
            .splits
            .iter()
            .position(|s| s.split == split)
            .unwrap_or(self.splits.len() - 1);
        &mut self.splits[pos]
    }

    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.splits.iter().flat_map(|s| s.images.iter())
    }

    pub fn images_mut(&mut self) -> impl Iterator<Item = &mut Image> {
        self.splits.iter_mut().flat_map(|s| s.images.iter_mut())
    }

    pub fn image(&self, id: ImageId) -> Option<&Image> {
        self.images().find(|img| img.id == id)
    }

    pub fn image_mut(&mut self, id: ImageId) -> Option<&mut Image> {
        self.images_mut().find(|img| img.id == id)
    }

    pub fn image_count(&self) -> usize {
        self.splits.iter().map(|s| s.images.len()).sum()
    }

    pub fn annotation_count(&self) -> usize {
        self.images().map(|img| img.annotations.len()).sum()
    }

    pub fn loaded_splits(&self) -> Vec<Split> {
        self.splits.iter().map(|s| s.split).collect()
    }

    /// Next image id that is free in this dataset.
    pub fn next_image_id(&self) -> ImageId {
        let next = self
            .images()
            .map(|img| img.id.as_u64() + 1)
            .max()
            .unwrap_or(1);
        ImageId::new(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_parsing_accepts_val_alias() {
        assert_eq!("val".parse::<Split>(), Ok(Split::Valid));
        assert_eq!("TRAIN".parse::<Split>(), Ok(Split::Train));
        assert!("holdout".parse::<Split>().is_err());
    }

    #[test]
    fn test_image_key_joins_split_and_name() {
        assert_eq!(image_key(Split::Valid, "a.jpg"), "valid/a.jpg");
    }

    #[test]
    fn test_class_table_renames_repeats_in_place() {
        let table = ClassTable::from_names(["cat", "cat", "dog", "cat", "cat_1"]);
        assert_eq!(table.names(), &["cat", "cat_1", "dog", "cat_2", "cat_1_1"]);
        assert_eq!(table.position("dog"), Some(ClassId(2)));
    }

    #[test]
    fn test_next_annotation_id_skips_used_ids() {
        let image = Image::new(1u64, "a.jpg", Split::Train, SourceHandle::new("train/a.jpg"))
            .with_annotations(vec![
                Annotation::rectangle(0u64, 0usize, 0.5, 0.5, 0.1, 0.1),
                Annotation::rectangle(4u64, 0usize, 0.5, 0.5, 0.1, 0.1),
            ]);
        assert_eq!(image.next_annotation_id(), AnnotationId(5));
    }

    #[test]
    fn test_split_mut_keeps_canonical_order() {
        let mut dataset = Dataset::default();
        dataset.split_mut(Split::Test);
        dataset.split_mut(Split::Train);
        assert_eq!(dataset.loaded_splits(), vec![Split::Train, Split::Test]);
    }
}

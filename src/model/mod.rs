//! In-memory dataset model.
//!
//! The model mirrors what a YOLO-style archive contains: images grouped into
//! train/valid/test splits, each carrying normalized center/size boxes that
//! reference a position in an ordered [`ClassTable`].
//!
//! Edits are tracked in an [`OverrideCache`] keyed by `split/name`. An
//! override always wins over the archive's label file, both when the loader
//! re-ingests a split and when an exporter serializes the dataset.
//!
//! # Example
//!
//! ```
//! use boxset::model::{Annotation, ClassTable, Dataset, Image, SourceHandle, Split};
//!
//! let mut dataset = Dataset::new(ClassTable::from_names(["person", "car"]));
//! dataset.split_mut(Split::Train).images.push(
//!     Image::new(1u64, "img1.jpg", Split::Train, SourceHandle::new("train/images/img1.jpg"))
//!         .with_annotations(vec![Annotation::rectangle(0u64, 1usize, 0.5, 0.5, 0.3, 0.4)]),
//! );
//! assert_eq!(dataset.annotation_count(), 1);
//! ```

mod dataset;
mod ids;
pub mod io_session;
mod overrides;

pub use dataset::{
    image_key, Annotation, ClassTable, Dataset, Image, ShapeKind, SourceHandle, Split, SplitImages,
    MAX_CLASS_COUNT,
};
pub(crate) use dataset::unique_name;
pub use ids::{AnnotationId, ClassId, ImageId};
pub use overrides::OverrideCache;

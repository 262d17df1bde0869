use std::path::PathBuf;
use thiserror::Error;

use crate::model::{AnnotationId, ClassId, ImageId, Split};

/// The main error type for boxset operations.
#[derive(Debug, Error)]
pub enum BoxsetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid dataset archive {archive}: {message}")]
    ArchiveFormat { archive: String, message: String },

    #[error("Failed to parse manifest '{entry}': {source}")]
    ManifestParse {
        entry: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to read zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Archive is {size} bytes, above the {limit} byte budget for this machine")]
    ArchiveTooLarge { size: u64, limit: u64 },

    #[error("Archive entry '{entry}' not found")]
    MissingEntry { entry: String },

    #[error("Could not find an image folder for split '{split}'")]
    SplitResolution { split: Split },

    #[error("Class operation rejected: {0}")]
    ClassOperation(#[from] ClassOperationError),

    #[error("Image {0} is not part of the dataset")]
    ImageNotFound(ImageId),

    #[error("Annotation {annotation} not found on image {image}")]
    AnnotationNotFound {
        image: ImageId,
        annotation: AnnotationId,
    },

    #[error("Failed to decode image '{name}': {message}")]
    ImageDecode { name: String, message: String },

    #[error("Export aborted: could not measure '{split}/{image}': {message}")]
    ExportDecode {
        split: Split,
        image: String,
        message: String,
    },

    #[error("Failed to write image {path}: {source}")]
    ImageEncode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to write COCO JSON to {path}: {source}")]
    CocoJsonWrite {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse session JSON from {path}: {source}")]
    SessionJsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write session JSON to {path}: {source}")]
    SessionJsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Reasons a class-table mutation is rejected.
///
/// Every check runs before any annotation is touched, so a rejected
/// operation leaves the dataset unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassOperationError {
    #[error("class '{0}' already exists")]
    DuplicateName(String),

    #[error("class id {id} is out of range for {class_count} class(es)")]
    InvalidClassId { id: ClassId, class_count: usize },

    #[error("cannot merge class {0} into itself")]
    SameClass(ClassId),

    #[error("class name must not be empty")]
    EmptyName,

    #[error("no class named '{0}'")]
    UnknownName(String),
}

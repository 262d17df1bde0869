//! Dataset archives: reading, writing and the manifest they carry.
//!
//! An archive is anything that exposes named entries: a zip file, an
//! extracted directory, or an in-memory map used by tests and by the
//! merge tool. Exports go to an [`ArchiveSink`], which stages output and
//! only publishes it once the whole export succeeded.

mod manifest;
mod sink;
mod source;

pub use manifest::{normalize_manifest_path, Manifest, MANIFEST_ENTRIES};
pub use sink::{ArchiveSink, DirectorySink, ZipSink};
pub use source::{ArchiveSource, DirectorySource, MemoryArchive, ZipSource};

use log::debug;
use std::path::Path;

use crate::config::EngineConfig;
use crate::error::BoxsetError;
use crate::platform::MemoryProbe;

/// Image extensions accepted inside an archive.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Checks if a path has the given extension (case-insensitive).
pub fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

pub fn is_image_entry(name: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|ext| has_extension(name, ext))
}

/// Folder part of an entry name, without the trailing slash.
pub fn parent_folder(entry: &str) -> &str {
    entry.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// File part of an entry name.
pub fn file_name(entry: &str) -> &str {
    entry.rsplit_once('/').map(|(_, name)| name).unwrap_or(entry)
}

/// Replaces the extension of a file name with `.txt`.
pub fn label_file_name(image_name: &str) -> String {
    match image_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{}.txt", stem),
        _ => format!("{}.txt", image_name),
    }
}

/// Joins a folder and a file name, treating `""` as the archive root.
pub fn join_entry(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder.trim_end_matches('/'), name)
    }
}

/// Largest archive this machine accepts, or `None` when memory is unknown.
pub fn archive_budget(probe: &mut dyn MemoryProbe, config: &EngineConfig) -> Option<u64> {
    probe
        .stats()
        .map(|stats| (stats.total as f64 * config.max_archive_memory_fraction) as u64)
}

/// Opens a zip file or an extracted directory.
pub fn open_archive(
    path: &Path,
    config: &EngineConfig,
    probe: &mut dyn MemoryProbe,
) -> Result<Box<dyn ArchiveSource>, BoxsetError> {
    if path.is_dir() {
        debug!("Opening {} as a directory archive", path.display());
        return Ok(Box::new(DirectorySource::open(path)?));
    }
    if has_extension(&path.to_string_lossy(), "zip") {
        let budget = archive_budget(probe, config);
        return Ok(Box::new(ZipSource::open(path, budget)?));
    }
    Err(BoxsetError::UnsupportedFormat(format!(
        "{} is neither a .zip file nor a directory",
        path.display()
    )))
}

/// Creates a zip sink for `*.zip` paths and a directory sink otherwise.
pub fn create_sink(path: &Path) -> Result<Box<dyn ArchiveSink>, BoxsetError> {
    if has_extension(&path.to_string_lossy(), "zip") {
        Ok(Box::new(ZipSink::create(path)?))
    } else {
        Ok(Box::new(DirectorySink::create(path)?))
    }
}

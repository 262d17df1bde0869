use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use crate::error::BoxsetError;

/// A container of named entries, read on demand.
///
/// Entry names use `/` separators and are relative to the archive root.
pub trait ArchiveSource {
    /// Human-readable name for messages.
    fn label(&self) -> String;

    /// File entries in enumeration order. Directories are not listed.
    fn entry_names(&self) -> &[String];

    fn read(&mut self, entry: &str) -> Result<Vec<u8>, BoxsetError>;

    fn contains(&self, entry: &str) -> bool {
        self.entry_names().iter().any(|e| e == entry)
    }

    fn read_to_string(&mut self, entry: &str) -> Result<String, BoxsetError> {
        let bytes = self.read(entry)?;
        String::from_utf8(bytes).map_err(|e| BoxsetError::ArchiveFormat {
            archive: self.label(),
            message: format!("entry '{}' is not valid UTF-8: {}", entry, e),
        })
    }
}

// ============================================================================
// Zip files
// ============================================================================

/// Most bytes reserved up front for one entry; the declared size is untrusted.
const READ_RESERVE_LIMIT: u64 = 16 * 1024 * 1024;

pub struct ZipSource {
    path: PathBuf,
    archive: zip::ZipArchive<BufReader<File>>,
    entries: Vec<String>,
    size_limit: Option<u64>,
}

impl ZipSource {
    /// Opens a zip file, refusing it when it exceeds `size_limit` bytes.
    ///
    /// The same limit applies to the uncompressed size of each entry read.
    pub fn open(path: &Path, size_limit: Option<u64>) -> Result<Self, BoxsetError> {
        let size = std::fs::metadata(path)?.len();
        if let Some(limit) = size_limit {
            if size > limit {
                return Err(BoxsetError::ArchiveTooLarge { size, limit });
            }
        }

        let file = BufReader::new(File::open(path)?);
        let mut archive = zip::ZipArchive::new(file).map_err(|source| BoxsetError::Zip {
            path: path.to_path_buf(),
            source,
        })?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive.by_index(i).map_err(|source| BoxsetError::Zip {
                path: path.to_path_buf(),
                source,
            })?;
            if file.is_file() {
                entries.push(file.name().to_string());
            }
        }
        debug!("Opened zip {} with {} file entries", path.display(), entries.len());

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            entries,
            size_limit,
        })
    }
}

impl ArchiveSource for ZipSource {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn entry_names(&self) -> &[String] {
        &self.entries
    }

    fn read(&mut self, entry: &str) -> Result<Vec<u8>, BoxsetError> {
        let mut file = self.archive.by_name(entry).map_err(|source| match source {
            zip::result::ZipError::FileNotFound => BoxsetError::MissingEntry {
                entry: entry.to_string(),
            },
            source => BoxsetError::Zip {
                path: self.path.clone(),
                source,
            },
        })?;
        let declared = file.size();
        if let Some(limit) = self.size_limit {
            if declared > limit {
                return Err(BoxsetError::ArchiveTooLarge {
                    size: declared,
                    limit,
                });
            }
        }
        let mut buffer = Vec::with_capacity(declared.min(READ_RESERVE_LIMIT) as usize);
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

// ============================================================================
// Extracted directories
// ============================================================================

pub struct DirectorySource {
    root: PathBuf,
    entries: Vec<String>,
}

impl DirectorySource {
    pub fn open(root: &Path) -> Result<Self, BoxsetError> {
        if !root.is_dir() {
            return Err(BoxsetError::ArchiveFormat {
                archive: root.display().to_string(),
                message: "not a directory".to_string(),
            });
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            entries.push(rel_string(rel));
        }

        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }
}

fn rel_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl ArchiveSource for DirectorySource {
    fn label(&self) -> String {
        self.root.display().to_string()
    }

    fn entry_names(&self) -> &[String] {
        &self.entries
    }

    fn read(&mut self, entry: &str) -> Result<Vec<u8>, BoxsetError> {
        let path = self.root.join(entry);
        if entry.split('/').any(|part| part == "..") || !path.is_file() {
            return Err(BoxsetError::MissingEntry {
                entry: entry.to_string(),
            });
        }
        Ok(std::fs::read(path)?)
    }
}

// ============================================================================
// In-memory archives
// ============================================================================

/// An archive held entirely in memory. Also usable as an export sink.
#[derive(Clone, Debug, Default)]
pub struct MemoryArchive {
    name: String,
    order: Vec<String>,
    data: HashMap<String, Vec<u8>>,
}

impl MemoryArchive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds or replaces an entry. Replacing keeps the original position.
    pub fn insert(&mut self, entry: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let entry = entry.into();
        if !self.data.contains_key(&entry) {
            self.order.push(entry.clone());
        }
        self.data.insert(entry, bytes.into());
    }

    pub fn with_entry(mut self, entry: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(entry, bytes);
        self
    }

    pub fn get(&self, entry: &str) -> Option<&[u8]> {
        self.data.get(entry).map(Vec::as_slice)
    }

    pub fn get_str(&self, entry: &str) -> Option<&str> {
        self.get(entry).and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.data.clear();
    }
}

impl ArchiveSource for MemoryArchive {
    fn label(&self) -> String {
        if self.name.is_empty() {
            "<memory>".to_string()
        } else {
            self.name.clone()
        }
    }

    fn entry_names(&self) -> &[String] {
        &self.order
    }

    fn read(&mut self, entry: &str) -> Result<Vec<u8>, BoxsetError> {
        self.data
            .get(entry)
            .cloned()
            .ok_or_else(|| BoxsetError::MissingEntry {
                entry: entry.to_string(),
            })
    }

    fn contains(&self, entry: &str) -> bool {
        self.data.contains_key(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_archive_keeps_insertion_order() {
        let mut archive = MemoryArchive::new("mem")
            .with_entry("b.txt", "1")
            .with_entry("a.txt", "2");
        archive.insert("b.txt", "3");

        assert_eq!(archive.entry_names(), &["b.txt".to_string(), "a.txt".to_string()]);
        assert_eq!(archive.read_to_string("b.txt").expect("read"), "3");
        assert!(matches!(
            archive.read("missing"),
            Err(BoxsetError::MissingEntry { .. })
        ));
    }

    #[test]
    fn test_directory_source_lists_relative_files() {
        let temp = tempfile::tempdir().expect("create temp dir");
        std::fs::create_dir_all(temp.path().join("train/images")).expect("mkdir");
        std::fs::write(temp.path().join("train/images/a.jpg"), b"x").expect("write");
        std::fs::write(temp.path().join("dataset.yaml"), b"names: []").expect("write");

        let mut source = DirectorySource::open(temp.path()).expect("open");
        assert_eq!(
            source.entry_names(),
            &["dataset.yaml".to_string(), "train/images/a.jpg".to_string()]
        );
        assert_eq!(source.read("train/images/a.jpg").expect("read"), b"x");
    }

    #[test]
    fn test_zip_source_reads_entries() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("data.zip");
        {
            let file = File::create(&path).expect("create zip");
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            writer.add_directory("train/", options).expect("dir");
            writer.start_file("train/a.txt", options).expect("start");
            writer.write_all(b"hello").expect("write");
            writer.finish().expect("finish");
        }

        let mut source = ZipSource::open(&path, None).expect("open");
        assert_eq!(source.entry_names(), &["train/a.txt".to_string()]);
        assert_eq!(source.read("train/a.txt").expect("read"), b"hello");
        assert!(matches!(
            source.read("nope.txt"),
            Err(BoxsetError::MissingEntry { .. })
        ));
    }

    #[test]
    fn test_zip_entry_larger_than_limit_is_refused() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("bomb.zip");
        {
            let file = File::create(&path).expect("create zip");
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            writer.start_file("a.txt", options).expect("start");
            writer.write_all(&vec![0u8; 200_000]).expect("write");
            writer.finish().expect("finish");
        }
        assert!(std::fs::metadata(&path).expect("stat").len() < 20_000);

        let mut source = ZipSource::open(&path, Some(20_000)).expect("open");
        let err = source.read("a.txt").err().expect("too large");
        assert!(matches!(
            err,
            BoxsetError::ArchiveTooLarge {
                size: 200_000,
                limit: 20_000
            }
        ));

        let mut unlimited = ZipSource::open(&path, None).expect("open");
        assert_eq!(unlimited.read("a.txt").expect("read").len(), 200_000);
    }

    #[test]
    fn test_zip_source_enforces_size_limit() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("big.zip");
        std::fs::write(&path, vec![0u8; 64]).expect("write");

        let err = ZipSource::open(&path, Some(10)).err().expect("too large");
        assert!(matches!(err, BoxsetError::ArchiveTooLarge { size: 64, limit: 10 }));
    }
}

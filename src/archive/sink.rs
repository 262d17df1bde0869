use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::source::MemoryArchive;
use crate::error::BoxsetError;

/// Destination for an export.
///
/// Nothing written becomes visible under the final name until `finish`
/// succeeds. `discard` throws away everything written so far.
pub trait ArchiveSink {
    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), BoxsetError>;

    fn finish(&mut self) -> Result<(), BoxsetError>;

    fn discard(&mut self);
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn check_entry_name(name: &str) -> Result<(), BoxsetError> {
    if name.is_empty() || name.starts_with('/') || name.split('/').any(|part| part == "..") {
        return Err(BoxsetError::ArchiveFormat {
            archive: "<output>".to_string(),
            message: format!("refusing to write entry '{}'", name),
        });
    }
    Ok(())
}

fn remove_staging(staging: &Path, remove: fn(&Path) -> std::io::Result<()>) {
    if let Err(e) = remove(staging) {
        warn!("Could not remove {}: {}", staging.display(), e);
    }
}

fn sink_closed() -> BoxsetError {
    BoxsetError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "output already finished or discarded",
    ))
}

// ============================================================================
// Zip output
// ============================================================================

pub struct ZipSink {
    path: PathBuf,
    staging: PathBuf,
    writer: Option<ZipWriter<BufWriter<File>>>,
}

impl ZipSink {
    pub fn create(path: &Path) -> Result<Self, BoxsetError> {
        let staging = staging_path(path);
        let file = File::create(&staging)?;
        Ok(Self {
            path: path.to_path_buf(),
            staging,
            writer: Some(ZipWriter::new(BufWriter::new(file))),
        })
    }

    fn zip_error(&self, source: zip::result::ZipError) -> BoxsetError {
        BoxsetError::Zip {
            path: self.path.clone(),
            source,
        }
    }

    fn publish(&self, writer: ZipWriter<BufWriter<File>>) -> Result<(), BoxsetError> {
        let mut inner = writer.finish().map_err(|source| self.zip_error(source))?;
        inner.flush()?;
        drop(inner);
        fs::rename(&self.staging, &self.path)?;
        debug!("Wrote {}", self.path.display());
        Ok(())
    }
}

impl ArchiveSink for ZipSink {
    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), BoxsetError> {
        check_entry_name(name)?;
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        let writer = self.writer.as_mut().ok_or_else(sink_closed)?;
        writer
            .start_file(name, options)
            .map_err(|source| BoxsetError::Zip {
                path: self.path.clone(),
                source,
            })?;
        writer.write_all(bytes)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BoxsetError> {
        let writer = self.writer.take().ok_or_else(sink_closed)?;
        let result = self.publish(writer);
        if result.is_err() {
            remove_staging(&self.staging, |p| fs::remove_file(p));
        }
        result
    }

    fn discard(&mut self) {
        if self.writer.take().is_some() {
            remove_staging(&self.staging, |p| fs::remove_file(p));
        }
    }
}

impl Drop for ZipSink {
    fn drop(&mut self) {
        self.discard();
    }
}

// ============================================================================
// Directory output
// ============================================================================

pub struct DirectorySink {
    path: PathBuf,
    staging: PathBuf,
    open: bool,
}

impl DirectorySink {
    /// Creates a sink for `path`, which must not exist or be an empty directory.
    pub fn create(path: &Path) -> Result<Self, BoxsetError> {
        if path.exists() && fs::read_dir(path)?.next().is_some() {
            return Err(BoxsetError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("output directory {} is not empty", path.display()),
            )));
        }
        let staging = staging_path(path);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        Ok(Self {
            path: path.to_path_buf(),
            staging,
            open: true,
        })
    }
}

impl DirectorySink {
    fn publish(&self) -> Result<(), BoxsetError> {
        if self.path.exists() {
            fs::remove_dir(&self.path)?;
        }
        fs::rename(&self.staging, &self.path)?;
        debug!("Wrote {}", self.path.display());
        Ok(())
    }
}

impl ArchiveSink for DirectorySink {
    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), BoxsetError> {
        if !self.open {
            return Err(sink_closed());
        }
        check_entry_name(name)?;
        let target = self.staging.join(name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, bytes)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BoxsetError> {
        if !self.open {
            return Err(sink_closed());
        }
        self.open = false;
        let result = self.publish();
        if result.is_err() {
            remove_staging(&self.staging, |p| fs::remove_dir_all(p));
        }
        result
    }

    fn discard(&mut self) {
        if self.open {
            self.open = false;
            remove_staging(&self.staging, |p| fs::remove_dir_all(p));
        }
    }
}

impl Drop for DirectorySink {
    fn drop(&mut self) {
        self.discard();
    }
}

// ============================================================================
// In-memory output
// ============================================================================

impl ArchiveSink for MemoryArchive {
    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), BoxsetError> {
        check_entry_name(name)?;
        self.insert(name, bytes.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BoxsetError> {
        Ok(())
    }

    fn discard(&mut self) {
        self.clear();
    }
}

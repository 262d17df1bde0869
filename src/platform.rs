//! Host services the engine consumes but does not own.
//!
//! Each service sits behind a small trait so tests can swap in fakes:
//! image decoding, memory statistics, best-effort file deletion and the
//! cooperative scheduler the loader yields to between chunks.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use log::{debug, warn};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::BoxsetError;

// ============================================================================
// Image decoding
// ============================================================================

/// A decoded, measurable image.
///
/// Cloning is cheap; pixels are shared.
#[derive(Clone)]
pub struct ImageHandle {
    pub width: u32,
    pub height: u32,
    pixels: Option<Arc<DynamicImage>>,
}

impl ImageHandle {
    /// A handle that only knows its dimensions.
    pub fn dimensions_only(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: None,
        }
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            pixels: Some(Arc::new(image)),
        }
    }

    pub fn pixels(&self) -> Option<&DynamicImage> {
        self.pixels.as_deref()
    }

    /// Approximate decoded size, used for logging.
    pub fn byte_size(&self) -> usize {
        self.pixels
            .as_ref()
            .map(|img| img.as_bytes().len())
            .unwrap_or(0)
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("has_pixels", &self.pixels.is_some())
            .finish()
    }
}

/// Turns raw image bytes into a handle.
pub trait ImageDecoder {
    fn decode(&self, name: &str, bytes: &[u8]) -> Result<ImageHandle, BoxsetError>;
}

/// Full raster decode through the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct RasterDecoder;

impl ImageDecoder for RasterDecoder {
    fn decode(&self, name: &str, bytes: &[u8]) -> Result<ImageHandle, BoxsetError> {
        let image = image::load_from_memory(bytes).map_err(|e| BoxsetError::ImageDecode {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(ImageHandle::from_image(image))
    }
}

/// Reads only the header to get dimensions. Much cheaper than a full decode.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderDecoder;

impl ImageDecoder for HeaderDecoder {
    fn decode(&self, name: &str, bytes: &[u8]) -> Result<ImageHandle, BoxsetError> {
        let size = imagesize::blob_size(bytes).map_err(|e| BoxsetError::ImageDecode {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(ImageHandle::dimensions_only(
            size.width as u32,
            size.height as u32,
        ))
    }
}

// ============================================================================
// Memory statistics
// ============================================================================

/// Memory figures in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub process: u64,
}

impl MemoryStats {
    /// System-wide usage in percent, or `None` when the total is unknown.
    pub fn used_percent(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some(self.used as f64 / self.total as f64 * 100.0)
    }
}

pub trait MemoryProbe {
    fn stats(&mut self) -> Option<MemoryStats>;
}

/// Reads memory figures through `sysinfo`.
pub struct SysinfoProbe {
    system: System,
    pid: Pid,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn stats(&mut self) -> Option<MemoryStats> {
        self.system.refresh_memory();
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        let process = self
            .system
            .process(self.pid)
            .map(|p| p.memory())
            .unwrap_or(0);
        Some(MemoryStats {
            total,
            used: self.system.used_memory(),
            process,
        })
    }
}

/// A probe that never reports anything. Disables memory backoff.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMemoryProbe;

impl MemoryProbe for NoMemoryProbe {
    fn stats(&mut self) -> Option<MemoryStats> {
        None
    }
}

// ============================================================================
// File removal
// ============================================================================

pub trait FileRemover {
    fn remove(&mut self, path: &Path) -> std::io::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FsRemover;

impl FileRemover for FsRemover {
    fn remove(&mut self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Deletes a file, logging instead of failing. Returns whether it worked.
pub fn delete_file_best_effort(remover: &mut dyn FileRemover, path: &Path) -> bool {
    match remover.remove(path) {
        Ok(()) => {
            debug!("Deleted {}", path.display());
            true
        }
        Err(e) => {
            warn!("Could not delete {}: {}", path.display(), e);
            false
        }
    }
}

// ============================================================================
// Cooperative scheduling
// ============================================================================

/// Where long operations hand control back to the host.
pub trait Scheduler {
    /// Called between chunks and after cache-miss decodes.
    fn yield_now(&mut self);

    /// Called when memory use crosses the warning threshold.
    fn back_off(&mut self, duration: Duration);
}

/// Yields the OS thread and sleeps on backoff.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn yield_now(&mut self) {
        std::thread::yield_now();
    }

    fn back_off(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Never yields. For tests and batch tools.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopScheduler;

impl Scheduler for NoopScheduler {
    fn yield_now(&mut self) {}

    fn back_off(&mut self, _duration: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::new_rgb8(width, height);
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn test_raster_decoder_measures_png() {
        let handle = RasterDecoder.decode("a.png", &png_bytes(7, 3)).expect("decode");
        assert_eq!((handle.width, handle.height), (7, 3));
        assert!(handle.pixels().is_some());
    }

    #[test]
    fn test_header_decoder_skips_pixels() {
        let handle = HeaderDecoder.decode("a.png", &png_bytes(7, 3)).expect("decode");
        assert_eq!((handle.width, handle.height), (7, 3));
        assert!(handle.pixels().is_none());
    }

    #[test]
    fn test_decoders_report_garbage() {
        let err = RasterDecoder.decode("bad.jpg", b"not an image").unwrap_err();
        assert!(matches!(err, BoxsetError::ImageDecode { ref name, .. } if name == "bad.jpg"));
        assert!(HeaderDecoder.decode("bad.jpg", b"xx").is_err());
    }

    #[test]
    fn test_used_percent() {
        let stats = MemoryStats {
            total: 200,
            used: 50,
            process: 10,
        };
        assert_eq!(stats.used_percent(), Some(25.0));
        assert_eq!(MemoryStats::default().used_percent(), None);
    }

    struct FailingRemover;

    impl FileRemover for FailingRemover {
        fn remove(&mut self, _path: &Path) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"))
        }
    }

    #[test]
    fn test_best_effort_delete_swallows_errors() {
        assert!(!delete_file_best_effort(&mut FailingRemover, Path::new("x.jpg")));
    }
}

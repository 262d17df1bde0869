use image::DynamicImage;
use log::debug;

use super::{CacheStats, LruCache};
use crate::config::EngineConfig;
use crate::error::BoxsetError;
use crate::platform::{ImageDecoder, ImageHandle, RasterDecoder, Scheduler, ThreadScheduler};

/// Owner of the full-image and thumbnail caches.
///
/// All decoded-image access goes through `&mut self` methods, so a lookup,
/// the decode on a miss and the insert that follows form one uninterrupted
/// step per key. Loader, exporter and thumbnail generation share one pool.
pub struct ResourcePool {
    full: LruCache<String, ImageHandle>,
    thumbnails: LruCache<String, ImageHandle>,
    decoder: Box<dyn ImageDecoder>,
    scheduler: Box<dyn Scheduler>,
}

fn log_release(kind: &'static str) -> impl FnMut(&String, ImageHandle) {
    move |key: &String, handle: ImageHandle| {
        debug!(
            "Released {} '{}' ({}x{}, {} bytes)",
            kind,
            key,
            handle.width,
            handle.height,
            handle.byte_size()
        );
    }
}

impl ResourcePool {
    pub fn new(
        config: &EngineConfig,
        decoder: Box<dyn ImageDecoder>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        Self {
            full: LruCache::new(config.full_image_cache_capacity)
                .with_release_hook(log_release("image")),
            thumbnails: LruCache::new(config.thumbnail_cache_capacity)
                .with_release_hook(log_release("thumbnail")),
            decoder,
            scheduler,
        }
    }

    /// Full raster decoding with thread yields between decodes.
    pub fn with_defaults(config: &EngineConfig) -> Self {
        Self::new(config, Box::new(RasterDecoder), Box::new(ThreadScheduler))
    }

    /// Returns the decoded image cached under `key`, decoding on a miss.
    ///
    /// `read` is only called on a miss.
    pub fn full_image<F>(&mut self, key: &str, read: F) -> Result<ImageHandle, BoxsetError>
    where
        F: FnOnce() -> Result<Vec<u8>, BoxsetError>,
    {
        let key = key.to_string();
        if let Some(handle) = self.full.get(&key) {
            return Ok(handle.clone());
        }
        let bytes = read()?;
        self.decode_and_store(key, &bytes)
    }

    /// Decodes bytes that are already in hand and caches the result.
    pub fn register_full(&mut self, key: &str, bytes: &[u8]) -> Result<ImageHandle, BoxsetError> {
        let key = key.to_string();
        if let Some(handle) = self.full.get(&key) {
            return Ok(handle.clone());
        }
        self.decode_and_store(key, bytes)
    }

    fn decode_and_store(&mut self, key: String, bytes: &[u8]) -> Result<ImageHandle, BoxsetError> {
        let handle = self.decoder.decode(&key, bytes)?;
        self.scheduler.yield_now();
        self.full.set(key, handle.clone());
        Ok(handle)
    }

    /// Returns the thumbnail cached under `thumb_key`, building it on a miss.
    ///
    /// On a miss the source image is fetched through the full-image cache
    /// and `crop` turns its pixels into the thumbnail.
    pub fn thumbnail<R, C>(
        &mut self,
        thumb_key: &str,
        source_key: &str,
        read: R,
        crop: C,
    ) -> Result<ImageHandle, BoxsetError>
    where
        R: FnOnce() -> Result<Vec<u8>, BoxsetError>,
        C: FnOnce(&DynamicImage) -> DynamicImage,
    {
        let thumb_key = thumb_key.to_string();
        if let Some(handle) = self.thumbnails.get(&thumb_key) {
            return Ok(handle.clone());
        }

        let source = self.full_image(source_key, read)?;
        let pixels = source.pixels().ok_or_else(|| BoxsetError::ImageDecode {
            name: source_key.to_string(),
            message: "decoder produced no pixel data".to_string(),
        })?;
        let handle = ImageHandle::from_image(crop(pixels));
        self.scheduler.yield_now();
        self.thumbnails.set(thumb_key, handle.clone());
        Ok(handle)
    }

    /// The scheduler shared with the loader.
    pub fn scheduler(&mut self) -> &mut dyn Scheduler {
        self.scheduler.as_mut()
    }

    pub fn full_stats(&self) -> CacheStats {
        self.full.stats()
    }

    pub fn thumbnail_stats(&self) -> CacheStats {
        self.thumbnails.stats()
    }

    /// Drops every cached image, e.g. when a new archive is opened.
    pub fn clear(&mut self) {
        self.full.clear();
        self.thumbnails.clear();
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("full", &self.full)
            .field("thumbnails", &self.thumbnails)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{HeaderDecoder, NoopScheduler};
    use std::cell::Cell;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    fn pool() -> ResourcePool {
        ResourcePool::new(
            &EngineConfig::default(),
            Box::new(RasterDecoder),
            Box::new(NoopScheduler),
        )
    }

    #[test]
    fn test_full_image_reads_only_on_miss() {
        let mut pool = pool();
        let reads = Cell::new(0);
        let bytes = png_bytes(4, 2);

        for _ in 0..3 {
            let handle = pool
                .full_image("train/images/a.png", || {
                    reads.set(reads.get() + 1);
                    Ok(bytes.clone())
                })
                .expect("decode");
            assert_eq!((handle.width, handle.height), (4, 2));
        }

        assert_eq!(reads.get(), 1);
        assert_eq!(pool.full_stats().hits, 2);
        assert_eq!(pool.full_stats().misses, 1);
    }

    #[test]
    fn test_thumbnail_is_cropped_and_cached() {
        let mut pool = pool();
        let bytes = png_bytes(10, 10);

        let thumb = pool
            .thumbnail("a.png#0", "a.png", || Ok(bytes.clone()), |img| img.crop_imm(0, 0, 3, 2))
            .expect("thumbnail");
        assert_eq!((thumb.width, thumb.height), (3, 2));

        let again = pool
            .thumbnail(
                "a.png#0",
                "a.png",
                || panic!("source must not be re-read"),
                |_| panic!("crop must not rerun"),
            )
            .expect("cached");
        assert_eq!(again.width, 3);
        assert_eq!(pool.thumbnail_stats().hits, 1);
    }

    #[test]
    fn test_thumbnail_needs_pixels() {
        let mut pool = ResourcePool::new(
            &EngineConfig::default(),
            Box::new(HeaderDecoder),
            Box::new(NoopScheduler),
        );
        let bytes = png_bytes(10, 10);
        let err = pool
            .thumbnail("a#0", "a.png", || Ok(bytes.clone()), |img| img.clone())
            .unwrap_err();
        assert!(matches!(err, BoxsetError::ImageDecode { .. }));
    }
}

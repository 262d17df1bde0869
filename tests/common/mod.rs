#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::Path;

use boxset::archive::MemoryArchive;
use boxset::cache::ResourcePool;
use boxset::config::EngineConfig;
use boxset::platform::{HeaderDecoder, NoopScheduler};
use image::DynamicImage;

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

pub fn write_file(path: &Path, bytes: impl AsRef<[u8]>) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, bytes).expect("write file");
}

/// Measures images from their headers and never sleeps.
pub fn test_pool(config: &EngineConfig) -> ResourcePool {
    ResourcePool::new(config, Box::new(HeaderDecoder), Box::new(NoopScheduler))
}

/// A label-file archive: `(split, image name, label text)` per image.
pub struct ArchiveBuilder {
    names: Option<Vec<String>>,
    images: Vec<(String, String, Option<String>)>,
    width: u32,
    height: u32,
}

impl ArchiveBuilder {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: Some(names.iter().map(|n| n.to_string()).collect()),
            images: Vec::new(),
            width: 200,
            height: 100,
        }
    }

    pub fn without_manifest(mut self) -> Self {
        self.names = None;
        self
    }

    pub fn image(mut self, split: &str, name: &str, label: Option<&str>) -> Self {
        self.images
            .push((split.to_string(), name.to_string(), label.map(str::to_string)));
        self
    }

    /// Declares `train`, plus `val`/`test` when the builder has such images.
    fn manifest(&self) -> Option<String> {
        let names = self.names.as_ref()?;
        let mut text = String::from("train: train/images\n");
        for (split, key) in [("valid", "val"), ("test", "test")] {
            if self.images.iter().any(|(s, _, _)| s == split) {
                text.push_str(&format!("{}: {}/images\n", key, split));
            }
        }
        let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
        text.push_str(&format!("nc: {}\nnames: [{}]\n", names.len(), quoted.join(", ")));
        Some(text)
    }

    fn entries(&self) -> Vec<(String, Vec<u8>)> {
        let png = png_bytes(self.width, self.height);
        let mut entries = Vec::new();
        if let Some(manifest) = self.manifest() {
            entries.push(("dataset.yaml".to_string(), manifest.into_bytes()));
        }
        for (split, name, label) in &self.images {
            entries.push((format!("{}/images/{}", split, name), png.clone()));
            if let Some(label) = label {
                let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
                entries.push((format!("{}/labels/{}.txt", split, stem), label.clone().into_bytes()));
            }
        }
        entries
    }

    pub fn build(&self) -> MemoryArchive {
        let mut archive = MemoryArchive::new("test");
        for (entry, bytes) in self.entries() {
            archive.insert(entry, bytes);
        }
        archive
    }

    /// Writes the archive out as an extracted directory under `root`.
    pub fn write_dir(&self, root: &Path) {
        for (entry, bytes) in self.entries() {
            write_file(&root.join(entry), bytes);
        }
    }

    /// Writes the archive as a zip file at `path`.
    pub fn write_zip(&self, path: &Path) {
        let file = fs::File::create(path).expect("create zip");
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (entry, bytes) in self.entries() {
            zip.start_file(entry, options).expect("start entry");
            std::io::Write::write_all(&mut zip, &bytes).expect("write entry");
        }
        zip.finish().expect("finish zip");
    }
}

//! Split folder resolution.
//!
//! Each split is located by trying an ordered list of strategies, the
//! first match wins. The order comes from
//! [`EngineConfig::resolution_order`](crate::config::EngineConfig).

use std::collections::HashSet;

use log::{info, warn};

use crate::archive::{is_image_entry, join_entry, normalize_manifest_path, parent_folder, Manifest};
use crate::config::ResolutionStrategy;
use crate::error::BoxsetError;
use crate::model::Split;

/// Where a split's images and labels live inside an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitLayout {
    pub split: Split,
    /// Every image entry below this folder belongs to the split.
    pub image_root: String,
    /// Folder searched first for label files.
    pub label_root: Option<String>,
    pub strategy: ResolutionStrategy,
}

/// Folders present in an archive, derived from its entry names.
#[derive(Clone, Debug, Default)]
pub struct FolderIndex {
    folders: HashSet<String>,
    image_folders: HashSet<String>,
    top_level: Vec<String>,
}

fn ancestors(entry: &str) -> impl Iterator<Item = &str> {
    entry
        .match_indices('/')
        .map(move |(i, _)| &entry[..i])
}

impl FolderIndex {
    pub fn build(entries: &[String]) -> Self {
        let mut index = FolderIndex::default();
        for entry in entries {
            let is_image = is_image_entry(entry);
            for folder in ancestors(entry) {
                if index.folders.insert(folder.to_string()) && !folder.contains('/') {
                    index.top_level.push(folder.to_string());
                }
                if is_image {
                    index.image_folders.insert(folder.to_string());
                }
            }
        }
        index.top_level.sort();
        index
    }

    pub fn has_folder(&self, folder: &str) -> bool {
        self.folders.contains(folder)
    }

    /// True when some image entry sits anywhere below `folder`.
    pub fn contains_images(&self, folder: &str) -> bool {
        self.image_folders.contains(folder)
    }

    pub fn top_level(&self) -> &[String] {
        &self.top_level
    }
}

/// Image entries below `root`, in archive order.
pub fn images_under<'a>(entries: &'a [String], root: &str) -> Vec<&'a String> {
    let prefix = if root.is_empty() {
        String::new()
    } else {
        format!("{}/", root)
    };
    entries
        .iter()
        .filter(|e| e.starts_with(&prefix) && is_image_entry(e))
        .collect()
}

/// Label entry candidates for an image that was not found in the split's
/// label folder: a `labels` sibling of its `images` folder, then the
/// image's own folder.
pub fn fallback_label_entries(image_entry: &str, label_name: &str) -> Vec<String> {
    let folder = parent_folder(image_entry);
    let mut candidates = Vec::with_capacity(2);
    if folder.contains("images") {
        let swapped = if folder == "images" {
            "labels".to_string()
        } else if let Some(rest) = folder.strip_prefix("images/") {
            format!("labels/{}", rest)
        } else {
            folder.replacen("/images", "/labels", 1)
        };
        if swapped != folder {
            candidates.push(join_entry(&swapped, label_name));
        }
    }
    candidates.push(join_entry(folder, label_name));
    candidates
}

pub struct SplitResolver<'a> {
    index: &'a FolderIndex,
    manifest: Option<&'a Manifest>,
    order: &'a [ResolutionStrategy],
}

impl<'a> SplitResolver<'a> {
    pub fn new(
        index: &'a FolderIndex,
        manifest: Option<&'a Manifest>,
        order: &'a [ResolutionStrategy],
    ) -> Self {
        Self {
            index,
            manifest,
            order,
        }
    }

    /// Runs the strategies in order and returns the first match.
    pub fn resolve(&self, split: Split) -> Result<SplitLayout, BoxsetError> {
        for strategy in self.order {
            if let Some(layout) = self.try_strategy(*strategy, split) {
                info!(
                    "Split {} resolved by {:?}: images under '{}', labels under {:?}",
                    split, strategy, layout.image_root, layout.label_root
                );
                return Ok(layout);
            }
        }
        warn!("No folder found for split {}", split);
        Err(BoxsetError::SplitResolution { split })
    }

    pub fn try_strategy(&self, strategy: ResolutionStrategy, split: Split) -> Option<SplitLayout> {
        let (image_root, first_label) = match strategy {
            ResolutionStrategy::Manifest => {
                let declared = self.manifest?.split_path(split)?;
                let base = normalize_manifest_path(declared).replacen("/images", "", 1);
                if base.is_empty() || !self.index.has_folder(&base) {
                    return None;
                }
                let labels = format!("{}/labels", base);
                (base, Some(labels))
            }
            ResolutionStrategy::Conventional => {
                let folder = split
                    .folder_aliases()
                    .iter()
                    .find(|alias| self.index.has_folder(alias))?;
                (folder.to_string(), None)
            }
            ResolutionStrategy::Shared => {
                if !self.index.has_folder("images") {
                    return None;
                }
                ("images".to_string(), None)
            }
            ResolutionStrategy::Scan => {
                let folder = self
                    .index
                    .top_level()
                    .iter()
                    .find(|f| self.index.contains_images(f))?;
                (folder.clone(), None)
            }
        };

        let label_root = self.label_root(split, first_label);
        Some(SplitLayout {
            split,
            image_root,
            label_root,
            strategy,
        })
    }

    fn label_root(&self, split: Split, first: Option<String>) -> Option<String> {
        let mut candidates: Vec<String> = first.into_iter().collect();
        candidates.extend(split.folder_aliases().iter().map(|a| format!("{}/labels", a)));
        candidates.push("labels".to_string());
        candidates.into_iter().find(|c| self.index.has_folder(c))
    }
}

//! Per-split override cache.
//!
//! An override is an edited annotation list for one image. When present it
//! is authoritative over the archive's label file, which lets edits survive
//! split switches and reloads without re-serializing anything. Entries are
//! only ever replaced wholesale.

use std::collections::BTreeMap;

use super::dataset::{Annotation, Split};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverrideCache {
    splits: BTreeMap<Split, BTreeMap<String, Vec<Annotation>>>,
}

impl OverrideCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, split: Split, image_key: &str) -> Option<&[Annotation]> {
        self.splits
            .get(&split)
            .and_then(|entries| entries.get(image_key))
            .map(Vec::as_slice)
    }

    pub fn contains(&self, split: Split, image_key: &str) -> bool {
        self.get(split, image_key).is_some()
    }

    /// Replaces the whole annotation list stored for `image_key`.
    pub fn replace(&mut self, split: Split, image_key: impl Into<String>, list: Vec<Annotation>) {
        self.splits
            .entry(split)
            .or_default()
            .insert(image_key.into(), list);
    }

    pub fn remove(&mut self, split: Split, image_key: &str) -> Option<Vec<Annotation>> {
        self.splits
            .get_mut(&split)
            .and_then(|entries| entries.remove(image_key))
    }

    pub fn len(&self) -> usize {
        self.splits.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.splits.clear();
    }

    /// Iterates `(split, image_key, annotations)` in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (Split, &str, &[Annotation])> {
        self.splits.iter().flat_map(|(split, entries)| {
            entries
                .iter()
                .map(move |(key, list)| (*split, key.as_str(), list.as_slice()))
        })
    }

    /// Rebuilds every entry through `f`, replacing each list wholesale.
    pub(crate) fn rewrite_all<F>(&mut self, mut f: F)
    where
        F: FnMut(&[Annotation]) -> Vec<Annotation>,
    {
        for entries in self.splits.values_mut() {
            for list in entries.values_mut() {
                *list = f(list);
            }
        }
    }
}

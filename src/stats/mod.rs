//! Dataset statistics.
//!
//! Counts are taken from the live images in the store, so they reflect
//! every edit made so far.

mod report;

pub use report::{ClassCount, SplitCount, StatsReport};

use crate::cache::CacheStats;
use crate::model::Dataset;
use crate::store::AnnotationStore;

/// Options for the text rendering of a report.
#[derive(Clone, Debug)]
pub struct StatsOptions {
    /// Width of histogram bars (in characters).
    pub bar_width: usize,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self { bar_width: 20 }
    }
}

/// Computes per-split and per-class counts for the store's dataset.
pub fn summarize(store: &AnnotationStore) -> StatsReport {
    summarize_with(store.dataset(), &StatsOptions::default())
}

pub fn summarize_with(dataset: &Dataset, opts: &StatsOptions) -> StatsReport {
    let splits = dataset
        .splits
        .iter()
        .map(|s| SplitCount {
            split: s.split,
            images: s.images.len(),
            annotations: s.images.iter().map(|img| img.annotations.len()).sum(),
            unlabeled: s.images.iter().filter(|img| img.annotations.is_empty()).count(),
        })
        .collect::<Vec<_>>();

    let mut per_class = vec![0usize; dataset.classes.len()];
    for ann in dataset.images().flat_map(|img| img.annotations.iter()) {
        if let Some(count) = per_class.get_mut(ann.class_id.index()) {
            *count += 1;
        }
    }
    let classes = dataset
        .classes
        .iter()
        .zip(per_class)
        .map(|((id, name), annotations)| ClassCount {
            id,
            name: name.to_string(),
            annotations,
        })
        .collect();

    StatsReport {
        images: splits.iter().map(|s| s.images).sum(),
        annotations: splits.iter().map(|s| s.annotations).sum(),
        unlabeled_images: splits.iter().map(|s| s.unlabeled).sum(),
        overrides: dataset.overrides.len(),
        splits,
        classes,
        caches: Vec::new(),
        bar_width: opts.bar_width,
    }
}

impl StatsReport {
    /// Adds a cache line to the rendered report.
    pub fn with_cache(mut self, name: &str, stats: CacheStats) -> Self {
        self.caches.push((name.to_string(), stats));
        self
    }
}

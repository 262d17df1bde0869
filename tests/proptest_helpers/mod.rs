#![allow(dead_code)]

use boxset::model::{Annotation, ClassTable, Dataset, Image, SourceHandle, Split};
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

pub fn arb_split() -> BoxedStrategy<Split> {
    prop_oneof![Just(Split::Train), Just(Split::Valid), Just(Split::Test)].boxed()
}

/// Normalized box values with `(0, 1]` extents.
pub fn arb_box() -> BoxedStrategy<(f64, f64, f64, f64)> {
    (0.0f64..=1.0, 0.0f64..=1.0, 0.001f64..=1.0, 0.001f64..=1.0).boxed()
}

/// A dataset over `class_count` classes whose annotations all reference
/// valid classes.
pub fn arb_dataset(class_count: usize) -> BoxedStrategy<Dataset> {
    let image = (
        arb_split(),
        prop::collection::vec((0..class_count, arb_box()), 0..6),
    );
    prop::collection::vec(image, 1..8)
        .prop_map(move |images| {
            let names = (0..class_count).map(|i| format!("class{}", i));
            let mut dataset = Dataset::new(ClassTable::from_names(names));
            for (index, (split, boxes)) in images.into_iter().enumerate() {
                let name = format!("img{}.png", index);
                let entry = format!("{}/images/{}", split, name);
                let annotations = boxes
                    .into_iter()
                    .enumerate()
                    .map(|(id, (class, (cx, cy, w, h)))| {
                        Annotation::rectangle(id as u64, class, cx, cy, w, h)
                    })
                    .collect();
                dataset.split_mut(split).images.push(
                    Image::new(index as u64 + 1, name, split, SourceHandle::new(entry))
                        .with_annotations(annotations),
                );
            }
            dataset
        })
        .boxed()
}

/// Every annotation's class index, in dataset order.
pub fn class_indices(dataset: &Dataset) -> Vec<usize> {
    dataset
        .images()
        .flat_map(|img| img.annotations.iter().map(|a| a.class_id.index()))
        .collect()
}

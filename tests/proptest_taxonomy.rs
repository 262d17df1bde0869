//! Property tests for class-table operations.

mod proptest_helpers;

use boxset::model::{ClassId, Dataset};
use boxset::store::AnnotationStore;
use proptest::prelude::*;
use proptest_helpers::{arb_dataset, class_indices, proptest_config};

/// A dataset plus two distinct class ids valid for it.
fn dataset_and_pair() -> impl Strategy<Value = (Dataset, usize, usize)> {
    (2usize..6).prop_flat_map(|n| {
        (arb_dataset(n), 0..n, 0..n).prop_filter("distinct classes", |(_, s, t)| s != t)
    })
}

fn dataset_and_class() -> impl Strategy<Value = (Dataset, usize)> {
    (1usize..6).prop_flat_map(|n| (arb_dataset(n), 0..n))
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn merge_reindexes_every_annotation((dataset, source, target) in dataset_and_pair()) {
        let class_count = dataset.classes.len();
        let before = class_indices(&dataset);
        let mut store = AnnotationStore::new(dataset);

        store.merge_classes(ClassId(source), ClassId(target)).expect("merge");

        let merged = target - usize::from(target > source);
        let expected: Vec<usize> = before
            .iter()
            .map(|&c| {
                if c == source || c == target {
                    merged
                } else if c > source {
                    c - 1
                } else {
                    c
                }
            })
            .collect();
        prop_assert_eq!(class_indices(store.dataset()), expected);
        prop_assert_eq!(store.classes().len(), class_count - 1);
        let target_name = format!("class{}", target);
        prop_assert_eq!(store.classes().get(ClassId(merged)), Some(target_name.as_str()));
    }

    #[test]
    fn delete_removes_only_that_class((dataset, class) in dataset_and_class()) {
        let before = class_indices(&dataset);
        let mut store = AnnotationStore::new(dataset);

        let removed = store.delete_class(ClassId(class)).expect("delete");

        prop_assert_eq!(removed, before.iter().filter(|&&c| c == class).count());
        let expected: Vec<usize> = before
            .iter()
            .filter(|&&c| c != class)
            .map(|&c| if c > class { c - 1 } else { c })
            .collect();
        prop_assert_eq!(class_indices(store.dataset()), expected);
        let table_len = store.classes().len();
        prop_assert!(class_indices(store.dataset()).iter().all(|&c| c < table_len));
    }

    #[test]
    fn merge_all_leaves_single_class(dataset in (1usize..6).prop_flat_map(arb_dataset)) {
        let count = class_indices(&dataset).len();
        let mut store = AnnotationStore::new(dataset);

        store.merge_all_classes("object").expect("merge all");

        prop_assert_eq!(store.classes().names().to_vec(), vec!["object".to_string()]);
        prop_assert_eq!(class_indices(store.dataset()), vec![0; count]);
    }

    #[test]
    fn padding_stays_normalized(
        (dataset, class) in dataset_and_class(),
        d_width in -1.5f64..1.5,
        d_height in -1.5f64..1.5,
    ) {
        let before: Vec<(usize, f64, f64)> = dataset
            .images()
            .flat_map(|img| img.annotations.iter().map(|a| (a.class_id.index(), a.width, a.height)))
            .collect();
        let mut store = AnnotationStore::new(dataset);

        store
            .apply_global_padding(ClassId(class), d_width, d_height)
            .expect("pad");

        let after: Vec<(f64, f64)> = store
            .dataset()
            .images()
            .flat_map(|img| img.annotations.iter().map(|a| (a.width, a.height)))
            .collect();
        prop_assert_eq!(after.len(), before.len());
        for ((c, w, h), (nw, nh)) in before.into_iter().zip(after) {
            prop_assert!((0.0..=1.0).contains(&nw) && (0.0..=1.0).contains(&nh));
            if c == class {
                prop_assert_eq!(nw, (w + d_width).clamp(0.0, 1.0));
                prop_assert_eq!(nh, (h + d_height).clamp(0.0, 1.0));
            } else {
                prop_assert_eq!((nw, nh), (w, h));
            }
        }
    }
}

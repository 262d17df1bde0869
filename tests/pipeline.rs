//! End-to-end load, edit and export flows over in-memory and on-disk archives.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use boxset::archive::{create_sink, open_archive, ArchiveSource, MemoryArchive};
use boxset::config::EngineConfig;
use boxset::export::{export, ExportFormat, COCO_ANNOTATIONS_ENTRY};
use boxset::loader::{CancelFlag, LoadOptions, LoadStatus, Loader};
use boxset::model::io_session::read_session;
use boxset::model::{Annotation, ClassId, Dataset, Split};
use boxset::platform::NoMemoryProbe;
use boxset::store::AnnotationStore;
use common::{png_bytes, test_pool, ArchiveBuilder};

fn load(archive: &mut dyn ArchiveSource, config: &EngineConfig) -> Dataset {
    let mut pool = test_pool(config);
    let mut probe = NoMemoryProbe;
    let (dataset, outcome) = Loader::new(config, &mut pool, &mut probe)
        .load(archive, &LoadOptions::default())
        .expect("load");
    assert_eq!(outcome.status, LoadStatus::Completed);
    dataset
}

#[test]
fn cancel_after_first_chunk_keeps_exactly_that_chunk() {
    let png = png_bytes(8, 8);
    let mut archive = MemoryArchive::new("big").with_entry("dataset.yaml", "train: train/images\nnames: [obj]\n");
    for i in 0..1200 {
        archive.insert(format!("train/images/img{:04}.png", i), png.clone());
    }

    let config = EngineConfig::default();
    let mut pool = test_pool(&config);
    let mut probe = NoMemoryProbe;
    let cancel = CancelFlag::new();
    let trigger = cancel.clone();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let reports = Rc::clone(&seen);

    let (dataset, outcome) = Loader::new(&config, &mut pool, &mut probe)
        .with_cancel(cancel)
        .on_progress(move |p| {
            reports.borrow_mut().push(p.images_loaded);
            trigger.cancel();
        })
        .load(&mut archive, &LoadOptions::default())
        .expect("load");

    assert!(outcome.is_cancelled());
    assert_eq!(dataset.image_count(), 500);
    assert_eq!(*seen.borrow(), vec![500]);
}

#[test]
fn label_line_survives_load_and_yolo_export() {
    let mut archive = ArchiveBuilder::new(&["person", "car"])
        .image("train", "img1.png", Some("0 0.5 0.5 0.3 0.4"))
        .build();
    let config = EngineConfig::default();
    let dataset = load(&mut archive, &config);

    let mut sink = MemoryArchive::new("out");
    export(&dataset, &mut archive, &mut test_pool(&config), ExportFormat::Yolo, &mut sink)
        .expect("export");

    assert_eq!(
        sink.get_str("train/labels/img1.txt"),
        Some("0 0.5 0.5 0.3 0.4\n")
    );
}

#[test]
fn coco_export_uses_measured_sizes() {
    let mut archive = ArchiveBuilder::new(&["person", "car"])
        .image("train", "img1.png", Some("1 0.5 0.5 0.3 0.4"))
        .image("valid", "img2.png", None)
        .build();
    let config = EngineConfig::default();
    let dataset = load(&mut archive, &config);

    let mut sink = MemoryArchive::new("out");
    let summary = export(&dataset, &mut archive, &mut test_pool(&config), ExportFormat::Coco, &mut sink)
        .expect("export");
    assert_eq!(summary.images, 2);

    let json: serde_json::Value =
        serde_json::from_str(sink.get_str(COCO_ANNOTATIONS_ENTRY).expect("json")).expect("parse");
    assert_eq!(json["images"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["annotations"][0]["category_id"], 1);
    assert_eq!(json["annotations"][0]["bbox"][0].as_f64(), Some(70.0));
    assert!(sink.get("valid/images/img2.png").is_some());
}

#[test]
fn taxonomy_merge_reindexes_every_annotation() {
    let mut archive = ArchiveBuilder::new(&["a", "b", "c"])
        .image("train", "one.png", Some("0 0.5 0.5 0.1 0.1\n1 0.5 0.5 0.1 0.1\n2 0.5 0.5 0.1 0.1"))
        .image("valid", "two.png", Some("2 0.5 0.5 0.1 0.1\n0 0.5 0.5 0.1 0.1"))
        .build();
    let config = EngineConfig::default();
    let mut store = AnnotationStore::new(load(&mut archive, &config));

    store.merge_classes(ClassId(0), ClassId(2)).expect("merge");

    assert_eq!(store.classes().names(), ["b", "c"]);
    let classes: Vec<usize> = store
        .dataset()
        .images()
        .flat_map(|img| img.annotations.iter().map(|a| a.class_id.index()))
        .collect();
    assert_eq!(classes, vec![1, 0, 1, 1, 1]);

    let mut sink = MemoryArchive::new("out");
    export(store.dataset(), &mut archive, &mut test_pool(&config), ExportFormat::Yolo, &mut sink)
        .expect("export");
    assert_eq!(
        sink.get_str("valid/labels/two.txt"),
        Some("1 0.5 0.5 0.1 0.1\n1 0.5 0.5 0.1 0.1\n")
    );
}

#[test]
fn saved_session_is_applied_on_reload() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let session_path = temp.path().join("edits.json");
    let builder = ArchiveBuilder::new(&["cat", "dog"])
        .image("train", "a.png", Some("0 0.5 0.5 0.2 0.2"))
        .image("train", "b.png", Some("1 0.5 0.5 0.2 0.2"));
    let config = EngineConfig::default();

    let mut archive = builder.build();
    let mut store = AnnotationStore::new(load(&mut archive, &config));
    let first = store.images_in(Split::Train)[0].id;
    store
        .set_annotations(first, vec![Annotation::rectangle(0u64, 1usize, 0.25, 0.25, 0.1, 0.1)])
        .expect("edit");
    store.save_session(&session_path).expect("save");

    let mut archive = builder.build();
    let mut dataset = read_session(&session_path).expect("read").into_dataset();
    let mut pool = test_pool(&config);
    let mut probe = NoMemoryProbe;
    Loader::new(&config, &mut pool, &mut probe)
        .load_into(&mut archive, &mut dataset, &LoadOptions::default())
        .expect("reload");

    let a = dataset
        .images()
        .find(|img| img.name == "a.png")
        .expect("a.png");
    assert_eq!(a.annotations.len(), 1);
    assert_eq!(a.annotations[0].class_id, ClassId(1));
    assert_eq!(a.annotations[0].center_x, 0.25);
}

#[test]
fn directory_archive_exports_to_zip() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let root = temp.path().join("dataset");
    ArchiveBuilder::new(&["person"])
        .image("train", "img1.png", Some("0 0.5 0.5 0.3 0.4"))
        .write_dir(&root);

    let config = EngineConfig::default();
    let mut probe = NoMemoryProbe;
    let mut source = open_archive(&root, &config, &mut probe).expect("open");
    let dataset = load(source.as_mut(), &config);

    let out = temp.path().join("out.zip");
    let mut sink = create_sink(&out).expect("sink");
    export(&dataset, source.as_mut(), &mut test_pool(&config), ExportFormat::Yolo, sink.as_mut())
        .expect("export");
    drop(sink);

    assert!(out.exists());
    assert!(!temp.path().join("out.zip.partial").exists());
    let mut exported = open_archive(&out, &config, &mut probe).expect("reopen");
    let text = exported.read_to_string("train/labels/img1.txt").expect("label");
    assert_eq!(text, "0 0.5 0.5 0.3 0.4\n");
}

#[test]
fn failed_export_leaves_no_output_directory() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut archive = ArchiveBuilder::new(&["person"])
        .image("train", "img1.png", None)
        .build();
    let config = EngineConfig::default();
    let mut dataset = load(&mut archive, &config);
    dataset.split_mut(Split::Train).images[0].source.entry = "train/images/gone.png".to_string();

    let out = temp.path().join("out");
    let mut sink = create_sink(&out).expect("sink");
    let result = export(&dataset, &mut archive, &mut test_pool(&config), ExportFormat::Yolo, sink.as_mut());
    drop(sink);

    assert!(result.is_err());
    assert!(!out.exists());
    assert!(!temp.path().join("out.partial").exists());
}

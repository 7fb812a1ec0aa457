use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use dataset_acquire::{
    build_manifest, scan, AcquireError, LabelStrategy, LabeledImageEntry, WalkDirWalker,
};

fn touch(path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, b"img")?;
    Ok(())
}

#[test]
fn labels_come_from_parent_directory() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let root = temp_dir.path();
    touch(&root.join("cat").join("a.jpg"))?;
    touch(&root.join("dog").join("b.jpg"))?;

    let manifest =
        build_manifest(&WalkDirWalker::new(), root, LabelStrategy::ByParentDirectory)?.sorted();

    assert_eq!(
        manifest.entries,
        vec![
            LabeledImageEntry {
                path: root.join("cat").join("a.jpg"),
                label: "cat".to_string(),
            },
            LabeledImageEntry {
                path: root.join("dog").join("b.jpg"),
                label: "dog".to_string(),
            },
        ]
    );

    Ok(())
}

#[test]
fn file_directly_under_root_takes_root_name() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let root = temp_dir.path().join("train");
    touch(&root.join("loose.jpg"))?;

    let manifest = build_manifest(
        &WalkDirWalker::new(),
        &root,
        LabelStrategy::ByParentDirectory,
    )?;

    assert_eq!(manifest.entries.len(), 1);
    assert_eq!(manifest.entries[0].label, "train");

    Ok(())
}

#[test]
fn labels_come_from_filename_prefix() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let root = temp_dir.path();
    touch(&root.join("pneumonia003.jpg"))?;
    touch(&root.join("007.jpg"))?;
    touch(&root.join("nested").join("cat_001.jpg"))?;

    let manifest = build_manifest(
        &WalkDirWalker::new(),
        root,
        LabelStrategy::ByFilenamePrefix,
    )?;
    let label_of = |name: &str| {
        manifest
            .entries
            .iter()
            .find(|entry| entry.path.file_name().is_some_and(|file| file == name))
            .map(|entry| entry.label.clone())
    };

    assert_eq!(label_of("pneumonia003.jpg").as_deref(), Some("pneumonia"));
    assert_eq!(label_of("007.jpg").as_deref(), Some(""));
    assert_eq!(label_of("cat_001.jpg").as_deref(), Some("cat"));
    assert_eq!(manifest.unlabeled_count(), 1);

    Ok(())
}

#[test]
fn manifest_lists_every_file_at_every_depth() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let root = temp_dir.path();
    let expected: BTreeSet<PathBuf> = [
        root.join("NORMAL").join("1.jpeg"),
        root.join("NORMAL").join("2.jpeg"),
        root.join("PNEUMONIA").join("3.jpeg"),
        root.join("PNEUMONIA").join("bacteria").join("4.jpeg"),
        root.join("top.jpeg"),
    ]
    .into_iter()
    .collect();
    for path in &expected {
        touch(path)?;
    }
    fs::create_dir_all(root.join("empty"))?;

    let manifest = build_manifest(
        &WalkDirWalker::new(),
        root,
        LabelStrategy::ByParentDirectory,
    )?;
    let found: BTreeSet<PathBuf> = manifest
        .entries
        .iter()
        .map(|entry| entry.path.clone())
        .collect();

    assert_eq!(manifest.len(), expected.len());
    assert_eq!(found, expected);

    Ok(())
}

#[test]
fn scan_walks_again_on_every_call() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let root = temp_dir.path();
    touch(&root.join("cat").join("a.jpg"))?;

    let walker = WalkDirWalker::new();
    let first = scan(&walker, root, LabelStrategy::ByParentDirectory, &mut |_| {})?;
    touch(&root.join("cat").join("b.jpg"))?;
    let mut labels = Vec::new();
    let second = scan(&walker, root, LabelStrategy::ByParentDirectory, &mut |entry| {
        labels.push(entry.label)
    })?;

    assert_eq!(first, 1);
    assert_eq!(second, 2);
    assert_eq!(labels, vec!["cat", "cat"]);

    Ok(())
}

#[test]
fn missing_root_is_scan_failed() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let root = temp_dir.path().join("absent");

    let result = build_manifest(&WalkDirWalker::new(), &root, LabelStrategy::ByParentDirectory);

    match result {
        Err(AcquireError::ScanFailed {
            root: failed_root, ..
        }) => assert_eq!(failed_root, root),
        other => panic!("expected ScanFailed, got {other:?}"),
    }

    Ok(())
}

#[test]
fn root_ending_in_parent_dir_still_labels_files() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let train = temp_dir.path().join("train");
    touch(&train.join("loose.jpg"))?;
    fs::create_dir_all(train.join("sub"))?;

    let root = train.join("sub").join("..");
    let manifest = build_manifest(
        &WalkDirWalker::new(),
        &root,
        LabelStrategy::ByParentDirectory,
    )?;

    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.entries[0].label, "train");
    assert_eq!(manifest.unlabeled_count(), 0);

    Ok(())
}

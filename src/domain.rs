use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

pub const MARKER_SUFFIX: &str = ".bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Extract,
    Scan,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Scan => "scan",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Split {
    Train,
    Test,
    Validation,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Test, Split::Validation];

    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
            Split::Validation => "val",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "test" => Ok(Split::Test),
            "val" | "validation" => Ok(Split::Validation),
            other => Err(format!("unknown split: {other} (expected train, test or val)")),
        }
    }
}

/// Archive layout supplied by the caller. Content is never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Gzip,
    TarGzip,
}

impl ArchiveFormat {
    /// Guesses the format from the file extension only.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGzip)
        } else if lower.ends_with(".gz") {
            Some(ArchiveFormat::Gzip)
        } else {
            None
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Gzip => "gzip",
            ArchiveFormat::TarGzip => "tar-gzip",
        };
        f.write_str(name)
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "gzip" | "gz" => Ok(ArchiveFormat::Gzip),
            "tar-gzip" | "tar.gz" | "tgz" => Ok(ArchiveFormat::TarGzip),
            other => Err(format!(
                "unknown archive format: {other} (expected zip, gzip or tar-gzip)"
            )),
        }
    }
}

/// How a class label is read off a file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelStrategy {
    /// Directory-per-class layout: `root/cat/a.jpg` is a `cat`.
    #[default]
    ByParentDirectory,
    /// Flat layout with the class in the file name: `cat_001.jpg` is a `cat`.
    ByFilenamePrefix,
}

impl LabelStrategy {
    pub fn label_for(self, path: &Path) -> String {
        match self {
            LabelStrategy::ByParentDirectory => path
                .parent()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            LabelStrategy::ByFilenamePrefix => path
                .file_name()
                .map(|name| leading_letters(&name.to_string_lossy()).to_string())
                .unwrap_or_default(),
        }
    }
}

impl FromStr for LabelStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "parent-dir" | "parent-directory" => Ok(LabelStrategy::ByParentDirectory),
            "filename-prefix" | "prefix" => Ok(LabelStrategy::ByFilenamePrefix),
            other => Err(format!(
                "unknown label strategy: {other} (expected parent-dir or filename-prefix)"
            )),
        }
    }
}

fn leading_letters(name: &str) -> &str {
    let end = name
        .char_indices()
        .find(|(_, ch)| !ch.is_alphabetic())
        .map(|(index, _)| index)
        .unwrap_or(name.len());
    &name[..end]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResource {
    pub url: String,
    pub dest_dir: PathBuf,
    pub file_name: String,
}

impl RemoteResource {
    pub fn new(
        url: impl Into<String>,
        dest_dir: impl Into<PathBuf>,
        file_name: Option<String>,
    ) -> Self {
        let url = url.into();
        let file_name = file_name.unwrap_or_else(|| file_name_from_url(&url));
        Self {
            url,
            dest_dir: dest_dir.into(),
            file_name,
        }
    }

    pub fn target_path(&self) -> PathBuf {
        self.dest_dir.join(&self.file_name)
    }
}

/// Final path segment of a URL, without query string or fragment.
/// Empty when the URL has no path or ends in `/`.
pub fn file_name_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or_default(),
        None => without_query,
    };
    path.rsplit('/').next().unwrap_or_default().to_string()
}

/// `chest-xray.v2.zip` is tracked by `chest-xray.bin`.
pub fn marker_file_name(archive: &Path) -> String {
    let file_name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name.split('.').next().unwrap_or_default();
    format!("{stem}{MARKER_SUFFIX}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledImageEntry {
    pub path: PathBuf,
    pub label: String,
}

impl LabeledImageEntry {
    pub fn is_unlabeled(&self) -> bool {
        self.label.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetManifest {
    pub root: PathBuf,
    pub entries: Vec<LabeledImageEntry>,
}

impl DatasetManifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn label_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.label.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn unlabeled_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_unlabeled()).count()
    }

    /// Copy ordered by path, for callers that need a stable order.
    pub fn sorted(&self) -> Self {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            root: self.root.clone(),
            entries,
        }
    }
}

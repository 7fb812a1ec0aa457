use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{ArchiveFormat, LabelStrategy, Split};

pub const DATASET_DIR_NAME: &str = "dataset";
pub const WORKSPACE_DIR_NAME: &str = "workspace";
pub const DEFAULT_FETCH_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_EXTRACT_TICK: Duration = Duration::from_millis(200);

/// Where things live under the project root.
///
/// ```text
/// <root>/dataset/<archive file>
/// <root>/dataset/<marker>.bin
/// <root>/dataset/[<extracted dir>/]{train,test,val}/...
/// <root>/workspace/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
    extracted_dir: Option<PathBuf>,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extracted_dir: None,
        }
    }

    /// Subdirectory of `dataset/` that the archive unpacks into.
    pub fn with_extracted_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.extracted_dir = if dir.as_os_str().is_empty() { None } else { Some(dir) };
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.root.join(DATASET_DIR_NAME)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join(WORKSPACE_DIR_NAME)
    }

    pub fn split_dir(&self, split: Split) -> PathBuf {
        let mut dir = self.dataset_dir();
        if let Some(extracted) = &self.extracted_dir {
            dir.push(extracted);
        }
        dir.push(split.dir_name());
        dir
    }
}

#[derive(Debug, Clone)]
pub struct AcquireConfig {
    pub url: String,
    /// Defaults to the last segment of `url`.
    pub archive_name: Option<String>,
    /// Defaults to a guess from the archive file extension.
    pub format: Option<ArchiveFormat>,
    pub layout: DatasetLayout,
    pub label_strategy: LabelStrategy,
    pub splits: Vec<Split>,
    pub fetch_timeout: Option<Duration>,
    pub fetch_tick: Duration,
    pub extract_tick: Duration,
}

impl AcquireConfig {
    pub fn new(url: impl Into<String>, layout: DatasetLayout) -> Self {
        Self {
            url: url.into(),
            archive_name: None,
            format: None,
            layout,
            label_strategy: LabelStrategy::default(),
            splits: Split::ALL.to_vec(),
            fetch_timeout: None,
            fetch_tick: DEFAULT_FETCH_TICK,
            extract_tick: DEFAULT_EXTRACT_TICK,
        }
    }
}

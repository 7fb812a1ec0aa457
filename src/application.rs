use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::AcquireConfig;
use crate::domain::{
    ArchiveFormat, DatasetManifest, LabelStrategy, LabeledImageEntry, RemoteResource, Split,
    Stage,
};

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("fetch failed: {url} -> {}: {reason}", path.display())]
    FetchFailed {
        url: String,
        path: PathBuf,
        reason: String,
    },
    #[error("extract failed: {} into {}: {reason}", archive.display(), dest.display())]
    ExtractFailed {
        archive: PathBuf,
        dest: PathBuf,
        reason: String,
    },
    #[error("scan failed: {}: {reason}", root.display())]
    ScanFailed { root: PathBuf, reason: String },
    #[error("cannot prepare {}: {source}", path.display())]
    Layout {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl AcquireError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AcquireError::FetchFailed { .. } => Some(Stage::Fetch),
            AcquireError::ExtractFailed { .. } => Some(Stage::Extract),
            AcquireError::ScanFailed { .. } => Some(Stage::Scan),
            AcquireError::Layout { .. } => None,
        }
    }
}

/// Blocking transfer of `url` into `target`. Returns the byte count.
pub trait Fetcher: Send + Sync {
    fn download(&self, url: &str, target: &Path) -> Result<u64, AcquireError>;
}

/// Unpacks every entry of `archive` under `dest`. Returns the number of files written.
pub trait ArchiveExtractor: Send + Sync {
    fn unpack(&self, archive: &Path, dest: &Path, format: ArchiveFormat)
    -> Result<u64, AcquireError>;
}

pub trait IdempotencyTracker: Send + Sync {
    fn has_completed(&self, dest: &Path, archive: &Path) -> bool;
    fn mark_completed(&self, dest: &Path, archive: &Path) -> Result<(), AcquireError>;
}

pub trait DirectoryWalker: Send + Sync {
    fn for_each_file(
        &self,
        root: &Path,
        on_file: &mut dyn FnMut(PathBuf) -> Result<(), AcquireError>,
    ) -> Result<(), AcquireError>;
}

pub trait ProgressReporter: Send + Sync {
    fn on_stage_start(&self, stage: Stage, target: &Path);
    fn on_tick(&self, stage: Stage);
    fn on_stage_skipped(&self, stage: Stage, target: &Path);
    fn on_stage_finish(&self, stage: Stage, target: &Path);
    fn on_stage_failed(&self, stage: Stage, target: &Path, reason: &str);
    fn on_manifest(&self, split: Split, manifest: &DatasetManifest);
}

pub struct Ports<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub extractor: &'a dyn ArchiveExtractor,
    pub tracker: &'a dyn IdempotencyTracker,
    pub walker: &'a dyn DirectoryWalker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub path: PathBuf,
    pub downloaded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    AlreadyExtracted,
    Extracted { files: u64 },
}

#[derive(Debug, Clone)]
pub struct AcquiredDataset {
    pub archive: PathBuf,
    pub downloaded: bool,
    pub extraction: ExtractOutcome,
    pub splits: Vec<(Split, DatasetManifest)>,
}

impl AcquiredDataset {
    pub fn manifest(&self, split: Split) -> Option<&DatasetManifest> {
        self.splits
            .iter()
            .find(|(candidate, _)| *candidate == split)
            .map(|(_, manifest)| manifest)
    }
}

/// Runs `op` on the calling thread while a scoped thread calls
/// `progress.on_tick` every `interval`. The ticker is stopped and joined
/// before this returns, whether `op` succeeds, fails or panics.
pub fn with_heartbeat<T>(
    progress: &dyn ProgressReporter,
    stage: Stage,
    interval: Duration,
    op: impl FnOnce() -> T,
) -> T {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        scope.spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                progress.on_tick(stage);
            }
        });

        let result = op();
        drop(stop_tx);
        result
    })
}

pub fn fetch(
    fetcher: &dyn Fetcher,
    progress: &dyn ProgressReporter,
    resource: &RemoteResource,
    tick: Duration,
) -> Result<FetchOutcome, AcquireError> {
    let target = resource.target_path();
    let failed = |reason: String| AcquireError::FetchFailed {
        url: resource.url.clone(),
        path: target.clone(),
        reason,
    };

    if resource.file_name.is_empty() {
        return Err(failed("cannot derive a file name from the url".to_string()));
    }

    fs::create_dir_all(&resource.dest_dir).map_err(|err| {
        failed(format!("cannot create {}: {err}", resource.dest_dir.display()))
    })?;

    if target.exists() {
        info!(path = %target.display(), "archive already present, skipping download");
        progress.on_stage_skipped(Stage::Fetch, &target);
        return Ok(FetchOutcome {
            path: target,
            downloaded: false,
        });
    }

    info!(url = %resource.url, path = %target.display(), "downloading");
    progress.on_stage_start(Stage::Fetch, &target);

    let bytes = with_heartbeat(progress, Stage::Fetch, tick, || {
        fetcher.download(&resource.url, &target)
    })
    .inspect_err(|err| progress.on_stage_failed(Stage::Fetch, &target, &err.to_string()))?;

    info!(path = %target.display(), bytes, "download finished");
    progress.on_stage_finish(Stage::Fetch, &target);

    Ok(FetchOutcome {
        path: target,
        downloaded: true,
    })
}

pub fn extract(
    extractor: &dyn ArchiveExtractor,
    tracker: &dyn IdempotencyTracker,
    progress: &dyn ProgressReporter,
    archive: &Path,
    dest: &Path,
    format: ArchiveFormat,
    tick: Duration,
) -> Result<ExtractOutcome, AcquireError> {
    if tracker.has_completed(dest, archive) {
        info!(archive = %archive.display(), dest = %dest.display(), "already extracted");
        progress.on_stage_skipped(Stage::Extract, archive);
        return Ok(ExtractOutcome::AlreadyExtracted);
    }

    info!(archive = %archive.display(), dest = %dest.display(), %format, "extracting");
    progress.on_stage_start(Stage::Extract, archive);

    let files = with_heartbeat(progress, Stage::Extract, tick, || {
        extractor.unpack(archive, dest, format)
    })
    .and_then(|files| tracker.mark_completed(dest, archive).map(|()| files))
    .inspect_err(|err| progress.on_stage_failed(Stage::Extract, archive, &err.to_string()))?;

    info!(archive = %archive.display(), files, "extraction finished");
    progress.on_stage_finish(Stage::Extract, archive);

    Ok(ExtractOutcome::Extracted { files })
}

/// Streams every file under `root` with its inferred label. Each call walks
/// the filesystem again.
pub fn scan(
    walker: &dyn DirectoryWalker,
    root: &Path,
    strategy: LabelStrategy,
    on_entry: &mut dyn FnMut(LabeledImageEntry),
) -> Result<usize, AcquireError> {
    let root = resolve_root(root)?;
    let mut count = 0;
    walker.for_each_file(&root, &mut |path| {
        let label = strategy.label_for(&path);
        on_entry(LabeledImageEntry { path, label });
        count += 1;
        Ok(())
    })?;

    Ok(count)
}

/// A root ending in `.` or `..` has no name of its own, so files directly
/// under it would get an empty parent-directory label. Such roots are
/// canonicalised first; every other root is walked as given.
fn resolve_root(root: &Path) -> Result<Cow<'_, Path>, AcquireError> {
    if root.file_name().is_some() {
        return Ok(Cow::Borrowed(root));
    }

    fs::canonicalize(root)
        .map(Cow::Owned)
        .map_err(|err| AcquireError::ScanFailed {
            root: root.to_path_buf(),
            reason: err.to_string(),
        })
}

pub fn build_manifest(
    walker: &dyn DirectoryWalker,
    root: &Path,
    strategy: LabelStrategy,
) -> Result<DatasetManifest, AcquireError> {
    let mut entries = Vec::new();
    scan(walker, root, strategy, &mut |entry| entries.push(entry))?;
    debug!(root = %root.display(), entries = entries.len(), "manifest built");

    Ok(DatasetManifest {
        root: root.to_path_buf(),
        entries,
    })
}

/// Fetch, extract once, then build one manifest per configured split.
pub fn acquire_dataset(
    ports: &Ports<'_>,
    progress: &dyn ProgressReporter,
    config: &AcquireConfig,
) -> Result<AcquiredDataset, AcquireError> {
    let layout = &config.layout;
    let dataset_dir = layout.dataset_dir();
    let workspace_dir = layout.workspace_dir();
    fs::create_dir_all(&workspace_dir).map_err(|source| AcquireError::Layout {
        path: workspace_dir.clone(),
        source,
    })?;

    let resource = RemoteResource::new(&config.url, &dataset_dir, config.archive_name.clone());
    let fetched = fetch(ports.fetcher, progress, &resource, config.fetch_tick)?;

    let format = config
        .format
        .or_else(|| ArchiveFormat::from_file_name(&resource.file_name))
        .ok_or_else(|| AcquireError::ExtractFailed {
            archive: fetched.path.clone(),
            dest: dataset_dir.clone(),
            reason: "archive format not given and not recognised from the file name"
                .to_string(),
        })?;

    let extraction = extract(
        ports.extractor,
        ports.tracker,
        progress,
        &fetched.path,
        &dataset_dir,
        format,
        config.extract_tick,
    )?;

    let splits = config
        .splits
        .par_iter()
        .map(|&split| {
            let root = layout.split_dir(split);
            progress.on_stage_start(Stage::Scan, &root);

            let manifest = build_manifest(ports.walker, &root, config.label_strategy)
                .inspect_err(|err| {
                    progress.on_stage_failed(Stage::Scan, &root, &err.to_string())
                })?;

            let unlabeled = manifest.unlabeled_count();
            if unlabeled > 0 {
                warn!(
                    %split,
                    unlabeled,
                    "files without a label prefix were given an empty label"
                );
            }
            info!(%split, entries = manifest.len(), "split scanned");
            progress.on_manifest(split, &manifest);

            Ok::<_, AcquireError>((split, manifest))
        })
        .collect::<Result<Vec<_>, AcquireError>>()?;

    Ok(AcquiredDataset {
        archive: fetched.path,
        downloaded: fetched.downloaded,
        extraction,
        splits,
    })
}

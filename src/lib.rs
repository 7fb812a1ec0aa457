pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use crate::application::{
    acquire_dataset, build_manifest, extract, fetch, scan, with_heartbeat, AcquireError,
    AcquiredDataset, ArchiveExtractor, DirectoryWalker, ExtractOutcome, FetchOutcome, Fetcher,
    IdempotencyTracker, Ports, ProgressReporter,
};
pub use crate::config::{AcquireConfig, DatasetLayout};
pub use crate::domain::{
    file_name_from_url, marker_file_name, ArchiveFormat, DatasetManifest, LabelStrategy,
    LabeledImageEntry, RemoteResource, Split, Stage, MARKER_SUFFIX,
};
pub use crate::infrastructure::{
    FsArchiveExtractor, IndicatifProgressReporter, LineProgressReporter, MarkerFileTracker,
    NoProgressReporter, UreqFetcher, WalkDirWalker,
};

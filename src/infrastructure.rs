use std::fs;
use std::io::{self, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::application::{
    AcquireError, ArchiveExtractor, DirectoryWalker, Fetcher, IdempotencyTracker,
    ProgressReporter,
};
use crate::domain::{marker_file_name, ArchiveFormat, DatasetManifest, Split, Stage};

pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(timeout)
            .build();

        Self::from_agent(config.into())
    }

    pub fn from_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

impl Fetcher for UreqFetcher {
    fn download(&self, url: &str, target: &Path) -> Result<u64, AcquireError> {
        let failed = |reason: String| AcquireError::FetchFailed {
            url: url.to_string(),
            path: target.to_path_buf(),
            reason,
        };

        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|err| failed(err.to_string()))?;
        let mut body = response.into_body().into_reader();

        let mut file = fs::File::create(target).map_err(|err| failed(err.to_string()))?;
        let copied = io::copy(&mut body, &mut file).and_then(|bytes| {
            file.flush()?;
            Ok(bytes)
        });
        drop(file);

        copied.map_err(|err| {
            // a half-written archive would be taken as complete on the next run
            if let Err(cleanup) = fs::remove_file(target) {
                warn!(
                    path = %target.display(),
                    error = %cleanup,
                    "could not remove partial download"
                );
            }
            failed(err.to_string())
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum UnpackError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("entry escapes destination: {0}")]
    UnsafePath(String),
    #[error("cannot name output for {}", .0.display())]
    NoOutputName(PathBuf),
    #[error("entry {0} would take the place of the completion marker")]
    MarkerCollision(String),
}

pub struct FsArchiveExtractor;

impl FsArchiveExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExtractor for FsArchiveExtractor {
    fn unpack(
        &self,
        archive: &Path,
        dest: &Path,
        format: ArchiveFormat,
    ) -> Result<u64, AcquireError> {
        let unpacked = fs::create_dir_all(dest)
            .and_then(|()| fs::File::open(archive))
            .map_err(UnpackError::from)
            .and_then(|file| {
                let marker = marker_file_name(archive);
                match format {
                    ArchiveFormat::Zip => unpack_zip(file, dest, &marker),
                    ArchiveFormat::Gzip => unpack_gzip(file, archive, dest, &marker),
                    ArchiveFormat::TarGzip => unpack_tar_gzip(file, dest, &marker),
                }
            });

        unpacked.map_err(|err| AcquireError::ExtractFailed {
            archive: archive.to_path_buf(),
            dest: dest.to_path_buf(),
            reason: err.to_string(),
        })
    }
}

/// True when `relative` names the marker file directly under the destination.
fn is_marker_entry(relative: &Path, marker: &str) -> bool {
    let mut components = relative
        .components()
        .filter(|component| !matches!(component, Component::CurDir));

    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if *name == *marker
    )
}

fn unpack_zip(file: fs::File, dest: &Path, marker: &str) -> Result<u64, UnpackError> {
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    let mut written = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| UnpackError::UnsafePath(entry.name().to_string()))?;
        if is_marker_entry(&relative, marker) {
            return Err(UnpackError::MarkerCollision(entry.name().to_string()));
        }
        let output_path = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&output_path)?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output_file = fs::File::create(&output_path)?;
        io::copy(&mut entry, &mut output_file)?;
        debug!(path = %output_path.display(), "unpacked");
        written += 1;
    }

    Ok(written)
}

/// A bare gzip holds one file, named after the archive minus its last extension.
fn unpack_gzip(
    file: fs::File,
    archive: &Path,
    dest: &Path,
    marker: &str,
) -> Result<u64, UnpackError> {
    let name = archive
        .file_stem()
        .ok_or_else(|| UnpackError::NoOutputName(archive.to_path_buf()))?;
    if is_marker_entry(Path::new(name), marker) {
        return Err(UnpackError::MarkerCollision(name.to_string_lossy().into_owned()));
    }
    let output_path = dest.join(name);

    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut output_file = fs::File::create(&output_path)?;
    if let Err(err) = io::copy(&mut decoder, &mut output_file) {
        drop(output_file);
        if let Err(cleanup) = fs::remove_file(&output_path) {
            warn!(
                path = %output_path.display(),
                error = %cleanup,
                "could not remove partial output"
            );
        }
        return Err(err.into());
    }
    debug!(path = %output_path.display(), "unpacked");

    Ok(1)
}

/// The gzip stream feeds the tar reader directly; nothing is staged on disk.
fn unpack_tar_gzip(file: fs::File, dest: &Path, marker: &str) -> Result<u64, UnpackError> {
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut written = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        if is_marker_entry(&entry_path, marker) {
            return Err(UnpackError::MarkerCollision(entry_path.display().to_string()));
        }

        if !entry.unpack_in(dest)? {
            return Err(UnpackError::UnsafePath(entry_path.display().to_string()));
        }
        if entry.header().entry_type().is_file() {
            debug!(path = %dest.join(&entry_path).display(), "unpacked");
            written += 1;
        }
    }

    Ok(written)
}

/// Zero-byte `<archive stem>.bin` next to the extracted tree.
pub struct MarkerFileTracker;

impl MarkerFileTracker {
    pub fn new() -> Self {
        Self
    }

    pub fn marker_path(dest: &Path, archive: &Path) -> PathBuf {
        dest.join(marker_file_name(archive))
    }
}

impl IdempotencyTracker for MarkerFileTracker {
    fn has_completed(&self, dest: &Path, archive: &Path) -> bool {
        Self::marker_path(dest, archive).is_file()
    }

    /// Never truncates: an existing file at the marker path is an error.
    fn mark_completed(&self, dest: &Path, archive: &Path) -> Result<(), AcquireError> {
        let marker = Self::marker_path(dest, archive);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .map(|_| ())
            .map_err(|err| AcquireError::ExtractFailed {
                archive: archive.to_path_buf(),
                dest: dest.to_path_buf(),
                reason: format!("cannot write marker {}: {err}", marker.display()),
            })
    }
}

pub struct WalkDirWalker;

impl WalkDirWalker {
    pub fn new() -> Self {
        Self
    }
}

impl DirectoryWalker for WalkDirWalker {
    fn for_each_file(
        &self,
        root: &Path,
        on_file: &mut dyn FnMut(PathBuf) -> Result<(), AcquireError>,
    ) -> Result<(), AcquireError> {
        let failed = |reason: String| AcquireError::ScanFailed {
            root: root.to_path_buf(),
            reason,
        };

        if !root.is_dir() {
            return Err(failed("not a readable directory".to_string()));
        }

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|err| failed(err.to_string()))?;

            if entry.file_type().is_file() {
                on_file(entry.into_path())?;
            }
        }

        Ok(())
    }
}

pub struct NoProgressReporter;

impl NoProgressReporter {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for NoProgressReporter {
    fn on_stage_start(&self, _stage: Stage, _target: &Path) {}

    fn on_tick(&self, _stage: Stage) {}

    fn on_stage_skipped(&self, _stage: Stage, _target: &Path) {}

    fn on_stage_finish(&self, _stage: Stage, _target: &Path) {}

    fn on_stage_failed(&self, _stage: Stage, _target: &Path, _reason: &str) {}

    fn on_manifest(&self, _split: Split, _manifest: &DatasetManifest) {}
}

/// Spinner driven by the pipeline heartbeat rather than its own ticker.
pub struct IndicatifProgressReporter {
    bar: ProgressBar,
}

impl IndicatifProgressReporter {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(draw_target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(None, draw_target);
        let style = ProgressStyle::with_template("{spinner:.yellow} {msg:.blue} {elapsed:.dim}")
            .expect("invalid progress style template")
            .tick_chars("⣾⣽⣻⢿⡿⣟⣯⣷");
        bar.set_style(style);

        Self { bar }
    }
}

impl ProgressReporter for IndicatifProgressReporter {
    fn on_stage_start(&self, stage: Stage, target: &Path) {
        self.bar.reset_elapsed();
        self.bar
            .set_message(format!("{}: {}", stage_verb(stage), target.display()));
    }

    fn on_tick(&self, _stage: Stage) {
        self.bar.tick();
    }

    fn on_stage_skipped(&self, stage: Stage, target: &Path) {
        let message = format!("{stage} skipped, already done: {}", target.display());
        let _ = self.bar.println(style(message).dim().to_string());
    }

    fn on_stage_finish(&self, stage: Stage, target: &Path) {
        let message = format!("{stage} done: {}", target.display());
        let _ = self.bar.println(style(message).green().to_string());
        self.bar.set_message("");
    }

    fn on_stage_failed(&self, stage: Stage, target: &Path, reason: &str) {
        let message = format!("{stage} failed: {} ({})", target.display(), reason);
        let _ = self.bar.println(style(message).red().to_string());
    }

    fn on_manifest(&self, split: Split, manifest: &DatasetManifest) {
        let message = format!("{split}: {} entries", manifest.len());
        let _ = self.bar.println(style(message).green().to_string());
    }
}

impl Drop for IndicatifProgressReporter {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

struct LineProgressState<W: Write> {
    writer: W,
    dots_pending: bool,
}

impl<W: Write> LineProgressState<W> {
    fn end_dots(&mut self) {
        if self.dots_pending {
            let _ = writeln!(self.writer);
            self.dots_pending = false;
        }
    }
}

/// Plain-text reporter: one line per stage event, a dot per heartbeat.
pub struct LineProgressReporter<W: Write + Send> {
    state: Mutex<LineProgressState<W>>,
}

impl LineProgressReporter<std::io::Stderr> {
    pub fn new() -> Self {
        Self::with_writer(std::io::stderr())
    }
}

impl<W: Write + Send> LineProgressReporter<W> {
    pub fn with_writer(writer: W) -> Self {
        Self {
            state: Mutex::new(LineProgressState {
                writer,
                dots_pending: false,
            }),
        }
    }

    pub fn into_inner(self) -> W {
        let state = match self.state.into_inner() {
            Ok(state) => state,
            Err(err) => err.into_inner(),
        };
        state.writer
    }

    fn with_state(&self, f: impl FnOnce(&mut LineProgressState<W>)) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(err) => err.into_inner(),
        };
        f(&mut state);
        let _ = state.writer.flush();
    }
}

impl<W: Write + Send> ProgressReporter for LineProgressReporter<W> {
    fn on_stage_start(&self, stage: Stage, target: &Path) {
        self.with_state(|state| {
            state.end_dots();
            let _ = writeln!(state.writer, "{}: {}", stage_verb(stage), target.display());
        });
    }

    fn on_tick(&self, _stage: Stage) {
        self.with_state(|state| {
            let _ = write!(state.writer, ".");
            state.dots_pending = true;
        });
    }

    fn on_stage_skipped(&self, stage: Stage, target: &Path) {
        self.with_state(|state| {
            state.end_dots();
            let _ = writeln!(state.writer, "{stage} skipped, already done: {}", target.display());
        });
    }

    fn on_stage_finish(&self, stage: Stage, target: &Path) {
        self.with_state(|state| {
            state.end_dots();
            let _ = writeln!(state.writer, "{stage} done: {}", target.display());
        });
    }

    fn on_stage_failed(&self, stage: Stage, target: &Path, reason: &str) {
        self.with_state(|state| {
            state.end_dots();
            let _ = writeln!(
                state.writer,
                "{stage} failed: {} ({})",
                target.display(),
                reason
            );
        });
    }

    fn on_manifest(&self, split: Split, manifest: &DatasetManifest) {
        self.with_state(|state| {
            state.end_dots();
            let _ = writeln!(state.writer, "{split}: {} entries", manifest.len());
        });
    }
}

fn stage_verb(stage: Stage) -> &'static str {
    match stage {
        Stage::Fetch => "downloading",
        Stage::Extract => "extracting",
        Stage::Scan => "scanning",
    }
}

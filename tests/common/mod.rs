#![allow(dead_code)]

use std::error::Error;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use dataset_acquire::{
    AcquireError, ArchiveExtractor, ArchiveFormat, DatasetManifest, Fetcher, FsArchiveExtractor,
    ProgressReporter, Split, Stage,
};
use flate2::Compression;
use flate2::write::GzEncoder;

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();

    for &(name, contents) in entries {
        zip.start_file(name, options)?;
        zip.write_all(contents)?;
    }

    Ok(zip.finish()?.into_inner())
}

pub fn create_zip(path: &Path, entries: &[(&str, &[u8])]) -> Result<(), Box<dyn Error>> {
    fs::write(path, zip_bytes(entries)?)?;
    Ok(())
}

pub fn create_tar_gz(path: &Path, entries: &[(&str, &[u8])]) -> Result<(), Box<dyn Error>> {
    let file = fs::File::create(path)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for &(name, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents)?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

pub fn create_gzip(path: &Path, contents: &[u8]) -> Result<(), Box<dyn Error>> {
    let file = fs::File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(contents)?;
    encoder.finish()?;
    Ok(())
}

/// Writes a canned payload instead of touching the network.
pub struct SpyFetcher {
    payload: Option<Vec<u8>>,
    calls: AtomicUsize,
}

impl SpyFetcher {
    pub fn serving(payload: Vec<u8>) -> Self {
        Self {
            payload: Some(payload),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            payload: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for SpyFetcher {
    fn download(&self, url: &str, target: &Path) -> Result<u64, AcquireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = |reason: String| AcquireError::FetchFailed {
            url: url.to_string(),
            path: target.to_path_buf(),
            reason,
        };

        match &self.payload {
            Some(bytes) => {
                fs::write(target, bytes).map_err(|err| failed(err.to_string()))?;
                Ok(bytes.len() as u64)
            }
            None => Err(failed("network unreachable".to_string())),
        }
    }
}

/// Real extractor that counts how often it is asked to do work.
pub struct CountingExtractor {
    inner: FsArchiveExtractor,
    calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn new() -> Self {
        Self {
            inner: FsArchiveExtractor::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArchiveExtractor for CountingExtractor {
    fn unpack(
        &self,
        archive: &Path,
        dest: &Path,
        format: ArchiveFormat,
    ) -> Result<u64, AcquireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.unpack(archive, dest, format)
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
    ticks: AtomicUsize,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<String> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(err) => err.into_inner().clone(),
        }
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ProgressReporter for RecordingReporter {
    fn on_stage_start(&self, stage: Stage, _target: &Path) {
        self.push(format!("start {stage}"));
    }

    fn on_tick(&self, _stage: Stage) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    fn on_stage_skipped(&self, stage: Stage, _target: &Path) {
        self.push(format!("skip {stage}"));
    }

    fn on_stage_finish(&self, stage: Stage, _target: &Path) {
        self.push(format!("finish {stage}"));
    }

    fn on_stage_failed(&self, stage: Stage, _target: &Path, _reason: &str) {
        self.push(format!("fail {stage}"));
    }

    fn on_manifest(&self, split: Split, manifest: &DatasetManifest) {
        self.push(format!("manifest {split} {}", manifest.len()));
    }
}

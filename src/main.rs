use std::collections::BTreeMap;
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use dataset_acquire::{
    acquire_dataset, AcquireConfig, AcquiredDataset, ArchiveFormat, DatasetLayout,
    ExtractOutcome, FsArchiveExtractor, IndicatifProgressReporter, LabelStrategy,
    LabeledImageEntry, MarkerFileTracker, NoProgressReporter, Ports, Split, UreqFetcher,
    WalkDirWalker,
};
use tracing_subscriber::EnvFilter;

/// Download a labeled image dataset, unpack it once and list (path, label) pairs per split.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Archive URL.
    #[arg(long, env = "DATASET_URL")]
    url: String,

    /// Project root holding `dataset/` and `workspace/`.
    #[arg(long, env = "DATASET_ROOT", value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// Local archive file name; defaults to the last URL segment.
    #[arg(long)]
    archive_name: Option<String>,

    /// zip, gzip or tar-gzip; guessed from the archive name when omitted.
    #[arg(long)]
    format: Option<ArchiveFormat>,

    /// Directory inside `dataset/` that holds the split folders.
    #[arg(long, value_name = "DIR")]
    extracted_dir: Option<PathBuf>,

    /// parent-dir or filename-prefix.
    #[arg(long, default_value = "parent-dir")]
    labels: LabelStrategy,

    /// Split to scan (train, test, val). Repeat for several; all by default.
    #[arg(long = "split", value_name = "SPLIT")]
    splits: Vec<Split>,

    /// Give up on the download after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print the manifests as JSON instead of a summary.
    #[arg(long)]
    json: bool,

    /// No spinner, and log warnings only instead of every stage transition.
    #[arg(long, short)]
    quiet: bool,
}

impl Cli {
    fn to_config(&self) -> AcquireConfig {
        let mut layout = DatasetLayout::new(&self.root);
        if let Some(dir) = &self.extracted_dir {
            layout = layout.with_extracted_dir(dir);
        }

        let mut config = AcquireConfig::new(&self.url, layout);
        config.archive_name = self.archive_name.clone();
        config.format = self.format;
        config.label_strategy = self.labels;
        if !self.splits.is_empty() {
            config.splits = self.splits.clone();
        }
        config.fetch_timeout = self.timeout_secs.map(Duration::from_secs);
        config
    }
}

fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let config = cli.to_config();
    let fetcher = UreqFetcher::with_timeout(config.fetch_timeout);
    let extractor = FsArchiveExtractor::new();
    let tracker = MarkerFileTracker::new();
    let walker = WalkDirWalker::new();
    let ports = Ports {
        fetcher: &fetcher,
        extractor: &extractor,
        tracker: &tracker,
        walker: &walker,
    };

    let dataset = if cli.quiet {
        acquire_dataset(&ports, &NoProgressReporter::new(), &config)
    } else {
        acquire_dataset(&ports, &IndicatifProgressReporter::new(), &config)
    };
    let dataset = dataset.map_err(|err| match err.stage() {
        Some(stage) => format!("{stage} stage: {err}"),
        None => err.to_string(),
    })?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cli.json {
        write_json(&mut out, &dataset)?;
    } else {
        write_summary(&mut out, &dataset)?;
    }

    Ok(())
}

fn write_json(out: &mut impl Write, dataset: &AcquiredDataset) -> Result<(), Box<dyn Error>> {
    let by_split: BTreeMap<String, &Vec<LabeledImageEntry>> = dataset
        .splits
        .iter()
        .map(|(split, manifest)| (split.to_string(), &manifest.entries))
        .collect();

    serde_json::to_writer_pretty(&mut *out, &by_split)?;
    writeln!(out)?;
    Ok(())
}

fn write_summary(out: &mut impl Write, dataset: &AcquiredDataset) -> io::Result<()> {
    let fetched = if dataset.downloaded { "downloaded" } else { "cached" };
    writeln!(out, "archive: {} ({fetched})", dataset.archive.display())?;

    match dataset.extraction {
        ExtractOutcome::AlreadyExtracted => {
            writeln!(out, "extraction: skipped (marker present)")?
        }
        ExtractOutcome::Extracted { files } => writeln!(out, "extraction: {files} files")?,
    }

    for (split, manifest) in &dataset.splits {
        writeln!(out, "{split}: {} entries", manifest.len())?;
        for (label, count) in manifest.label_counts() {
            let label = if label.is_empty() { "<unlabeled>".to_string() } else { label };
            writeln!(out, "  {label}: {count}")?;
        }
    }

    Ok(())
}

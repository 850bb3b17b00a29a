use clap::{Args, Parser, Subcommand};
use curator_core::{CuratorConfig, ThreadingMode};
use std::path::PathBuf;

/// Command-line arguments for the curator
#[derive(Parser, Debug)]
#[command(name = "curator")]
#[command(about = "Builds a class-labelled image dataset from a remote image source")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to curator.toml, then .vendor/curator.toml)
    #[arg(short, long, global = true, env = "CURATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Fetch, deduplicate, classify and store a batch run of images
    Run(RunArgs),
    /// Report duplicate content already stored in the dataset
    Audit(AuditArgs),
}

#[derive(Args, Debug, Default, PartialEq)]
pub struct RunArgs {
    /// Total number of images to request
    #[arg(long)]
    pub count: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Minimum winning confidence
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Attempts per fetch or download
    #[arg(long)]
    pub retries: Option<u32>,

    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Run ensemble members one after another
    #[arg(long)]
    pub no_thread: bool,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug, Default, PartialEq)]
pub struct AuditArgs {
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Move redundant pending copies into this directory
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Hash files on the current thread only
    #[arg(long)]
    pub no_thread: bool,

    /// Write a JSON audit report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl RunArgs {
    /// Overrides file values with the flags that were given.
    pub fn apply(&self, config: &mut CuratorConfig) {
        if let Some(count) = self.count {
            config.total_count = count;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(dataset) = &self.dataset {
            config.dataset_root = dataset.clone();
        }
        if self.no_thread {
            config.classifier.threading = ThreadingMode::Sequential;
        }
        if let Some(report) = &self.report {
            config.report_path = Some(report.clone());
        }
    }
}

impl AuditArgs {
    pub fn apply(&self, config: &mut CuratorConfig) {
        if let Some(dataset) = &self.dataset {
            config.dataset_root = dataset.clone();
        }
    }

    pub fn threading(&self) -> ThreadingMode {
        if self.no_thread {
            ThreadingMode::Sequential
        } else {
            ThreadingMode::Parallel
        }
    }
}

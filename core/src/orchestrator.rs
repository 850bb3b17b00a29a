//! Batch driver: fetch references, then download, gate, dedup and store
//! each image in order.
//!
//! Images are processed one at a time; the only concurrency is the ensemble
//! fan-out inside [`ClassificationGate::classify`]. Transient network failures
//! are retried and then counted, per-image problems are counted, and only
//! configuration or index-rebuild failures end the run early.

use crate::classifier::{ClassificationGate, ClassifierError, DecisionOutcome, RejectReason};
use crate::config::{ConfigError, CuratorConfig};
use crate::dedup::{DuplicateIndex, DuplicateKind};
use crate::progress;
use crate::retry::RetryPolicy;
use crate::source::{ImageAsset, ImageDownloader, ImageReference, ImageSource};
use crate::stats::{format_hms, BatchEstimate, ProcessingStats};
use crate::storage::{DatasetStorage, StorageError};
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// What happened to one image reference.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageOutcome {
    Saved {
        label: String,
        confidence: f32,
        path: PathBuf,
    },
    DownloadFailed,
    InvalidFormat,
    Duplicate(DuplicateKind),
    Rejected(RejectReason),
    Failed,
}

#[derive(Debug, Error)]
enum ImageError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct BatchOrchestrator<'a> {
    config: CuratorConfig,
    extensions: Vec<String>,
    source: &'a dyn ImageSource,
    downloader: &'a dyn ImageDownloader,
    gate: &'a ClassificationGate,
    storage: &'a dyn DatasetStorage,
    index: DuplicateIndex,
    progress_bar: ProgressBar,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        config: CuratorConfig,
        source: &'a dyn ImageSource,
        downloader: &'a dyn ImageDownloader,
        gate: &'a ClassificationGate,
        storage: &'a dyn DatasetStorage,
    ) -> Self {
        let extensions = config.normalized_extensions();
        Self {
            config,
            extensions,
            source,
            downloader,
            gate,
            storage,
            index: DuplicateIndex::new(),
            progress_bar: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress_bar: ProgressBar) -> Self {
        self.progress_bar = progress_bar;
        self
    }

    pub fn index(&self) -> &DuplicateIndex {
        &self.index
    }

    /// Runs every batch and returns the final counters.
    pub fn run(&mut self) -> Result<ProcessingStats, PipelineError> {
        self.config.validate()?;
        let started = Instant::now();
        self.index.initialize(self.storage)?;

        let total_count = self.config.total_count;
        let batch_size = self.config.batch_size;
        let total_batches = self.config.batch_count();
        let retry = RetryPolicy::new(self.config.max_retries, self.config.retry_delay());
        let mut stats = ProcessingStats::default();
        let mut batches_elapsed = Duration::ZERO;

        info!(total_count, batch_size, total_batches, "starting run");
        self.progress_bar.set_length(total_count as u64);
        self.progress_bar.set_style(progress::default_style());

        for batch_index in 0..total_batches {
            let batch_started = Instant::now();
            let first = batch_index * batch_size;
            let last = (first + batch_size).min(total_count);
            let quota = last - first;
            info!(
                batch = batch_index + 1,
                total_batches,
                first = first + 1,
                last,
                "starting batch"
            );

            self.run_batch(quota, &retry, &mut stats);

            let batch_duration = batch_started.elapsed();
            batches_elapsed += batch_duration;
            let estimate = BatchEstimate::new(
                batch_duration,
                batches_elapsed,
                batch_index + 1,
                total_batches - (batch_index + 1),
                OffsetDateTime::now_utc(),
            );
            info!(
                batch = batch_index + 1,
                total_batches,
                batch_secs = estimate.batch_duration.as_secs_f64(),
                remaining = %format_hms(estimate.remaining),
                finish_at = %estimate.finish_at_rfc3339(),
                "batch complete"
            );
        }

        stats.elapsed_secs = started.elapsed().as_secs_f64();
        self.progress_bar.finish_with_message("Run complete");
        Ok(stats)
    }

    fn run_batch(&mut self, quota: usize, retry: &RetryPolicy, stats: &mut ProcessingStats) {
        let source = self.source;
        let page_size = self.config.page_size;
        let references = match retry.run("fetch image references", || {
            source.fetch_references(quota, page_size)
        }) {
            Ok(references) => references,
            Err(error) => {
                warn!(%error, skipped = quota, "reference fetch exhausted retries, skipping batch");
                stats.failed_url_fetches += quota;
                self.progress_bar.inc(quota as u64);
                return;
            }
        };

        stats.fetched_urls += references.len();
        if references.is_empty() {
            info!("source returned no references, skipping batch");
        }
        // Unfilled quota still advances the bar.
        self.progress_bar
            .inc(quota.saturating_sub(references.len()) as u64);

        for reference in &references {
            stats.processed_images += 1;
            self.progress_bar
                .set_message(format!("Processing: {}", reference.url));
            let outcome = self.process_image(reference, retry);
            tally(stats, &outcome);
            self.progress_bar.inc(1);
        }
    }

    /// Runs the per-image pipeline. Never fails; problems become outcomes.
    pub fn process_image(
        &mut self,
        reference: &ImageReference,
        retry: &RetryPolicy,
    ) -> ImageOutcome {
        let downloader = self.downloader;
        let bytes = match retry.run("download image", || downloader.download(reference)) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(url = %reference.url, %error, "download exhausted retries, skipping image");
                return ImageOutcome::DownloadFailed;
            }
        };

        let asset = match ImageAsset::new(reference, bytes) {
            Ok(asset) => asset,
            Err(error) => {
                info!(url = %reference.url, %error, "skipping image without usable file name");
                return ImageOutcome::InvalidFormat;
            }
        };
        if !asset.has_supported_format(&self.extensions) {
            info!(file = %asset.file_name, format = %asset.format, "skipping unsupported format");
            return ImageOutcome::InvalidFormat;
        }

        match self.gate_and_store(&asset) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(file = %asset.file_name, %error, "failed to process image");
                ImageOutcome::Failed
            }
        }
    }

    fn gate_and_store(&mut self, asset: &ImageAsset) -> Result<ImageOutcome, ImageError> {
        let (label, confidence) = match self.gate.classify(&asset.bytes, self.config.threshold)? {
            DecisionOutcome::Accepted { label, confidence } => (label, confidence),
            DecisionOutcome::Rejected(reason) => {
                info!(file = %asset.file_name, %reason, "image rejected");
                return Ok(ImageOutcome::Rejected(reason));
            }
        };

        if let Some(kind) = self
            .index
            .check(self.storage, &asset.bytes, &asset.file_name, &label)?
        {
            info!(file = %asset.file_name, %label, ?kind, "duplicate image");
            return Ok(ImageOutcome::Duplicate(kind));
        }

        let path = self.storage.save(&asset.bytes, &asset.file_name, &label)?;
        self.index.record_accepted(&asset.bytes);
        debug!(path = %path.display(), %label, confidence, "image saved");
        Ok(ImageOutcome::Saved {
            label,
            confidence,
            path,
        })
    }
}

fn tally(stats: &mut ProcessingStats, outcome: &ImageOutcome) {
    match outcome {
        ImageOutcome::Saved { label, .. } => stats.record_saved(label),
        ImageOutcome::DownloadFailed => stats.failed_downloads += 1,
        ImageOutcome::InvalidFormat => stats.invalid_formats += 1,
        ImageOutcome::Duplicate(DuplicateKind::Name) => stats.duplicate_names += 1,
        ImageOutcome::Duplicate(DuplicateKind::Content) => stats.duplicate_contents += 1,
        ImageOutcome::Rejected(RejectReason::MultipleWinners) => stats.multiple_winners += 1,
        ImageOutcome::Rejected(RejectReason::NoWinner) => stats.no_winner += 1,
        ImageOutcome::Failed => stats.failed_images += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{BinaryClassifier, ClassificationVote};
    use crate::config::ThreadingMode;
    use crate::source::SourceError;
    use crate::storage::{LocalStorage, Partition};
    use reqwest::StatusCode;
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn unavailable() -> SourceError {
        SourceError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            url: String::from("https://x.test"),
        }
    }

    /// Serves queued pages; an empty queue repeats the last answer.
    struct FakeSource {
        pages: RefCell<VecDeque<Vec<ImageReference>>>,
        fail: bool,
        requests: RefCell<Vec<usize>>,
    }

    impl FakeSource {
        fn with_pages(pages: Vec<Vec<ImageReference>>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                fail: false,
                requests: RefCell::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::with_pages(Vec::new())
            }
        }
    }

    impl ImageSource for FakeSource {
        fn fetch_references(
            &self,
            count: usize,
            _page_size: usize,
        ) -> Result<Vec<ImageReference>, SourceError> {
            self.requests.borrow_mut().push(count);
            if self.fail {
                return Err(unavailable());
            }
            Ok(self.pages.borrow_mut().pop_front().unwrap_or_default())
        }
    }

    struct FakeDownloader {
        bodies: HashMap<String, Vec<u8>>,
        attempts: Cell<usize>,
    }

    impl FakeDownloader {
        fn new(bodies: &[(&str, &str)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.as_bytes().to_vec()))
                    .collect(),
                attempts: Cell::new(0),
            }
        }
    }

    impl ImageDownloader for FakeDownloader {
        fn download(&self, reference: &ImageReference) -> Result<Vec<u8>, SourceError> {
            self.attempts.set(self.attempts.get() + 1);
            self.bodies.get(&reference.url).cloned().ok_or_else(unavailable)
        }
    }

    /// Scores images by their content: `b"A..."` votes for A, `b"AB..."` for
    /// both, `b"!..."` fails, anything else votes for nothing.
    struct ContentClassifier {
        label: &'static str,
    }

    impl BinaryClassifier for ContentClassifier {
        fn name(&self) -> &str {
            self.label
        }

        fn classify(&self, image: &[u8]) -> Result<Vec<ClassificationVote>, ClassifierError> {
            if image.starts_with(b"!") {
                return Err(ClassifierError::InvalidImage(String::from("undecodable")));
            }
            let marker = self.label.as_bytes()[0];
            let hit = image.iter().take(2).any(|byte| *byte == marker);
            let confidence = if hit { 0.95 } else { 0.05 };
            Ok(vec![
                ClassificationVote::new(self.label, confidence),
                ClassificationVote::new("rest", 1.0 - confidence),
            ])
        }
    }

    fn gate() -> ClassificationGate {
        ClassificationGate::new(
            vec![
                Box::new(ContentClassifier { label: "A" }),
                Box::new(ContentClassifier { label: "B" }),
            ],
            Vec::new(),
            "rest",
            ThreadingMode::Parallel,
        )
        .unwrap()
    }

    fn reference(url: &str) -> ImageReference {
        ImageReference {
            id: url.to_string(),
            url: url.to_string(),
            width: 1,
            height: 1,
        }
    }

    fn config(root: &Path, total_count: usize) -> CuratorConfig {
        CuratorConfig {
            dataset_root: root.to_path_buf(),
            total_count,
            retry_delay_secs: 0,
            ..CuratorConfig::default()
        }
    }

    /// Fails the first `failing_saves` writes, then delegates.
    struct RefusingStorage {
        inner: LocalStorage,
        failing_saves: Cell<usize>,
    }

    impl DatasetStorage for RefusingStorage {
        fn exists(
            &self,
            file_name: &str,
            label: &str,
            partition: Partition,
        ) -> Result<bool, StorageError> {
            self.inner.exists(file_name, label, partition)
        }

        fn save(
            &self,
            bytes: &[u8],
            file_name: &str,
            label: &str,
        ) -> Result<PathBuf, StorageError> {
            let remaining = self.failing_saves.get();
            if remaining > 0 {
                self.failing_saves.set(remaining - 1);
                return Err(StorageError::Io {
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                    path: PathBuf::from(file_name),
                });
            }
            self.inner.save(bytes, file_name, label)
        }

        fn list_image_files(&self, partition: Partition) -> Result<Vec<PathBuf>, StorageError> {
            self.inner.list_image_files(partition)
        }

        fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
            self.inner.read(path)
        }
    }

    fn storage(root: &Path) -> LocalStorage {
        LocalStorage::new(
            root,
            "Unverified",
            "Verified",
            vec![String::from("jpg"), String::from("jpeg"), String::from("png")],
        )
    }

    #[test]
    fn accepted_images_are_saved_and_duplicates_counted() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path());
        let source = FakeSource::with_pages(vec![vec![
            reference("https://x.test/one.jpg"),
            reference("https://x.test/two.jpg"),
            reference("https://x.test/three.png"),
        ]]);
        let downloader = FakeDownloader::new(&[
            ("https://x.test/one.jpg", "A1"),
            ("https://x.test/two.jpg", "A1"),
            ("https://x.test/three.png", "B3"),
        ]);
        let gate = gate();

        let mut orchestrator =
            BatchOrchestrator::new(config(dir.path(), 3), &source, &downloader, &gate, &storage);
        let stats = orchestrator.run().unwrap();

        assert_eq!(stats.fetched_urls, 3);
        assert_eq!(stats.processed_images, 3);
        assert_eq!(stats.label_counts.get("A"), Some(&1));
        assert_eq!(stats.label_counts.get("B"), Some(&1));
        assert_eq!(stats.duplicate_contents, 1);
        assert_eq!(orchestrator.index().len(), 2);
        assert_eq!(
            fs::read(dir.path().join("Unverified/A/one.jpg")).unwrap(),
            b"A1"
        );
        assert!(!dir.path().join("Unverified/A/two.jpg").exists());
    }

    #[test]
    fn existing_file_name_is_a_name_duplicate() {
        let dir = tempdir().unwrap();
        let confirmed = dir.path().join("Verified/A");
        fs::create_dir_all(&confirmed).unwrap();
        fs::write(confirmed.join("one.jpg"), b"older picture").unwrap();
        let storage = storage(dir.path());
        let source = FakeSource::with_pages(vec![vec![reference("https://x.test/one.jpg")]]);
        let downloader = FakeDownloader::new(&[("https://x.test/one.jpg", "A-new")]);
        let gate = gate();

        let stats = BatchOrchestrator::new(
            config(dir.path(), 1),
            &source,
            &downloader,
            &gate,
            &storage,
        )
        .run()
        .unwrap();
        assert_eq!(stats.duplicate_names, 1);
        assert_eq!(stats.saved_images(), 0);
    }

    #[test]
    fn rejections_and_failures_are_counted_not_fatal() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path());
        let source = FakeSource::with_pages(vec![vec![
            reference("https://x.test/both.jpg"),
            reference("https://x.test/none.jpg"),
            reference("https://x.test/anim.gif"),
            reference("https://x.test/broken.jpg"),
            reference("https://x.test/missing.jpg"),
            reference("https://x.test/fine.jpg"),
        ]]);
        let downloader = FakeDownloader::new(&[
            ("https://x.test/both.jpg", "AB"),
            ("https://x.test/none.jpg", "zz"),
            ("https://x.test/anim.gif", "A?"),
            ("https://x.test/broken.jpg", "!!"),
            ("https://x.test/fine.jpg", "B!"),
        ]);
        let gate = gate();

        let stats = BatchOrchestrator::new(
            config(dir.path(), 6),
            &source,
            &downloader,
            &gate,
            &storage,
        )
        .run()
        .unwrap();
        assert_eq!(stats.multiple_winners, 1);
        assert_eq!(stats.no_winner, 1);
        assert_eq!(stats.invalid_formats, 1);
        assert_eq!(stats.failed_images, 1);
        assert_eq!(stats.failed_downloads, 1);
        assert_eq!(stats.label_counts.get("B"), Some(&1));
        assert_eq!(stats.processed_images, 6);
    }

    #[test]
    fn failing_download_is_tried_exactly_max_retries_times() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path());
        let source = FakeSource::with_pages(vec![vec![reference("https://x.test/gone.jpg")]]);
        let downloader = FakeDownloader::new(&[]);
        let gate = gate();

        let stats = BatchOrchestrator::new(
            config(dir.path(), 1),
            &source,
            &downloader,
            &gate,
            &storage,
        )
        .run()
        .unwrap();
        assert_eq!(downloader.attempts.get(), 3);
        assert_eq!(stats.failed_downloads, 1);
    }

    #[test]
    fn exhausted_fetch_skips_batch_and_counts_quota() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path());
        let source = FakeSource::failing();
        let downloader = FakeDownloader::new(&[]);
        let gate = gate();

        let stats = BatchOrchestrator::new(
            config(dir.path(), 15),
            &source,
            &downloader,
            &gate,
            &storage,
        )
        .run()
        .unwrap();
        assert_eq!(stats.failed_url_fetches, 15);
        assert_eq!(*source.requests.borrow(), vec![10, 10, 10, 5, 5, 5]);
        assert_eq!(downloader.attempts.get(), 0);
    }

    #[test]
    fn batches_request_remaining_quota() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path());
        let source = FakeSource::with_pages(Vec::new());
        let downloader = FakeDownloader::new(&[]);
        let gate = gate();

        let stats = BatchOrchestrator::new(
            config(dir.path(), 25),
            &source,
            &downloader,
            &gate,
            &storage,
        )
        .run()
        .unwrap();
        assert_eq!(*source.requests.borrow(), vec![10, 10, 5]);
        assert_eq!(stats.fetched_urls, 0);
        assert_eq!(stats.failed_url_fetches, 0);
    }

    #[test]
    fn small_batch_size_fails_before_any_fetch() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path());
        let source = FakeSource::with_pages(Vec::new());
        let downloader = FakeDownloader::new(&[]);
        let gate = gate();
        let config = CuratorConfig {
            batch_size: 5,
            ..config(dir.path(), 10)
        };

        let result = BatchOrchestrator::new(config, &source, &downloader, &gate, &storage).run();
        assert!(matches!(
            result,
            Err(PipelineError::Config(ConfigError::BatchSizeTooSmall { .. }))
        ));
        assert!(source.requests.borrow().is_empty());
    }

    #[test]
    fn unreadable_partition_aborts_before_any_fetch() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Unverified"), b"not a directory").unwrap();
        let storage = storage(dir.path());
        let source = FakeSource::with_pages(Vec::new());
        let downloader = FakeDownloader::new(&[]);
        let gate = gate();

        let result = BatchOrchestrator::new(
            config(dir.path(), 10),
            &source,
            &downloader,
            &gate,
            &storage,
        )
        .run();
        assert!(matches!(result, Err(PipelineError::Storage(_))));
        assert!(source.requests.borrow().is_empty());
    }

    #[test]
    fn stored_images_from_earlier_runs_are_content_duplicates() {
        let dir = tempdir().unwrap();
        let pending = dir.path().join("Unverified/A");
        fs::create_dir_all(&pending).unwrap();
        fs::write(pending.join("earlier.jpg"), b"A7").unwrap();
        let storage = storage(dir.path());
        let source = FakeSource::with_pages(vec![vec![reference("https://x.test/later.jpg")]]);
        let downloader = FakeDownloader::new(&[("https://x.test/later.jpg", "A7")]);
        let gate = gate();

        let stats = BatchOrchestrator::new(
            config(dir.path(), 1),
            &source,
            &downloader,
            &gate,
            &storage,
        )
        .run()
        .unwrap();
        assert_eq!(stats.duplicate_contents, 1);
    }

    #[test]
    fn failed_save_leaves_the_index_untouched() {
        let dir = tempdir().unwrap();
        let storage = RefusingStorage {
            inner: storage(dir.path()),
            failing_saves: Cell::new(1),
        };
        let image = reference("https://x.test/one.jpg");
        let source = FakeSource::with_pages(Vec::new());
        let downloader = FakeDownloader::new(&[("https://x.test/one.jpg", "A1")]);
        let gate = gate();
        let retry = RetryPolicy::new(1, Duration::ZERO);

        let mut orchestrator =
            BatchOrchestrator::new(config(dir.path(), 1), &source, &downloader, &gate, &storage);
        assert_eq!(orchestrator.process_image(&image, &retry), ImageOutcome::Failed);
        assert_eq!(orchestrator.index().len(), 0);

        let outcome = orchestrator.process_image(&image, &retry);
        assert!(matches!(outcome, ImageOutcome::Saved { ref label, .. } if label == "A"));
        assert_eq!(orchestrator.index().len(), 1);
    }

    #[test]
    fn failed_save_is_counted_and_same_content_can_be_saved_later() {
        let dir = tempdir().unwrap();
        let storage = RefusingStorage {
            inner: storage(dir.path()),
            failing_saves: Cell::new(1),
        };
        let source = FakeSource::with_pages(vec![vec![
            reference("https://x.test/one.jpg"),
            reference("https://x.test/two.jpg"),
        ]]);
        let downloader = FakeDownloader::new(&[
            ("https://x.test/one.jpg", "A1"),
            ("https://x.test/two.jpg", "A1"),
        ]);
        let gate = gate();

        let mut orchestrator =
            BatchOrchestrator::new(config(dir.path(), 2), &source, &downloader, &gate, &storage);
        let stats = orchestrator.run().unwrap();

        assert_eq!(stats.failed_images, 1);
        assert_eq!(stats.duplicate_contents, 0);
        assert_eq!(stats.label_counts.get("A"), Some(&1));
        assert_eq!(orchestrator.index().len(), 1);
        assert!(dir.path().join("Unverified/A/two.jpg").exists());
    }
}

//! Run counters and batch time projection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Counters for one pipeline run. Only the orchestrator mutates them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub fetched_urls: usize,
    /// Images that entered the per-image pipeline.
    pub processed_images: usize,
    /// Quota of batches whose reference fetch never succeeded.
    pub failed_url_fetches: usize,
    pub failed_downloads: usize,
    pub invalid_formats: usize,
    pub duplicate_names: usize,
    pub duplicate_contents: usize,
    pub multiple_winners: usize,
    pub no_winner: usize,
    /// Classification or storage failures for a single image.
    pub failed_images: usize,
    pub label_counts: BTreeMap<String, usize>,
    pub elapsed_secs: f64,
}

impl ProcessingStats {
    pub fn record_saved(&mut self, label: &str) {
        *self.label_counts.entry(label.to_string()).or_default() += 1;
    }

    pub fn saved_images(&self) -> usize {
        self.label_counts.values().sum()
    }

    /// Every skip category with a non-zero count, in a fixed order.
    pub fn skipped(&self) -> Vec<(&'static str, usize)> {
        [
            ("failed url fetches", self.failed_url_fetches),
            ("failed downloads", self.failed_downloads),
            ("invalid formats", self.invalid_formats),
            ("duplicate names", self.duplicate_names),
            ("duplicate contents", self.duplicate_contents),
            ("multiple winners", self.multiple_winners),
            ("no winner", self.no_winner),
            ("failed images", self.failed_images),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .collect()
    }
}

/// Time projection published after each batch.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchEstimate {
    pub batch_duration: Duration,
    pub remaining: Duration,
    pub finish_at: OffsetDateTime,
}

impl BatchEstimate {
    pub fn new(
        batch_duration: Duration,
        total_elapsed: Duration,
        batches_completed: usize,
        batches_remaining: usize,
        now: OffsetDateTime,
    ) -> Self {
        let remaining = estimate_remaining(total_elapsed, batches_completed, batches_remaining);
        Self {
            batch_duration,
            remaining,
            finish_at: now + remaining,
        }
    }

    pub fn finish_at_rfc3339(&self) -> String {
        self.finish_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("unknown"))
    }
}

/// `(total_elapsed / batches_completed) * batches_remaining`.
pub fn estimate_remaining(
    total_elapsed: Duration,
    batches_completed: usize,
    batches_remaining: usize,
) -> Duration {
    if batches_completed == 0 {
        return Duration::ZERO;
    }
    let average = total_elapsed.as_secs_f64() / batches_completed as f64;
    Duration::from_secs_f64(average * batches_remaining as f64)
}

/// Formats a duration as `1h 2m 3s`.
pub fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
}

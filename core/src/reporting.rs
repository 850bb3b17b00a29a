use crate::audit::AuditSummary;
use crate::stats::{format_hms, ProcessingStats};
use std::time::Duration;

pub fn print_run_summary(stats: &ProcessingStats) {
    println!(
        "Elapsed: {}",
        format_hms(Duration::from_secs_f64(stats.elapsed_secs.max(0.0)))
    );
    println!("Fetched URLs: {}", stats.fetched_urls);
    println!("Processed images: {}", stats.processed_images);
    println!("Saved images: {}", stats.saved_images());
    for (label, count) in &stats.label_counts {
        println!("  {}: {}", label, count);
    }

    let skipped = stats.skipped();
    if !skipped.is_empty() {
        println!("Skipped:");
        for (category, count) in skipped {
            println!("  {}: {}", category, count);
        }
    }
}

pub fn print_audit(summary: &AuditSummary) {
    for group in &summary.groups {
        println!("Identical files ({}):", group.hash);
        for (index, entry) in group.files.iter().enumerate() {
            let marker = if index == 0 { "keep" } else { "    " };
            println!("  [{}] {} {}", marker, entry.partition, entry.path.display());
        }
        println!();
    }
    println!(
        "Scanned {} images, {} duplicate groups, {} redundant pending copies",
        summary.scanned,
        summary.groups.len(),
        summary.redundant_files()
    );
    if summary.unreadable > 0 {
        println!("Unreadable images: {}", summary.unreadable);
    }
}

// UI layer: human-readable console output for a transfer run. Listing
// lines and created ids go to stdout with `println!`; download progress is
// an `indicatif` bar; the "keep going?" question uses `dialoguer`.

use crate::api::RemoteFile;
use crate::error::TransferError;
use crate::transfer::{TransferJob, TransferObserver, TransferReport};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};

/// Bar resolution: progress is reported as a whole percentage.
const BAR_LENGTH: u64 = 100;

#[derive(Default)]
pub struct ConsoleReporter {
    bar: Option<ProgressBar>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        ConsoleReporter::default()
    }

    fn start_bar(&mut self, name: &str) {
        let bar = ProgressBar::new(BAR_LENGTH);
        if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}%") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(format!("Download {name}"));
        self.bar = Some(bar);
    }

    fn finish_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl TransferObserver for ConsoleReporter {
    fn listed(&mut self, files: &[RemoteFile]) {
        println!("Files:");
        for file in files {
            println!("{} ({})", file.name, file.id);
        }
    }

    fn no_files(&mut self) {
        println!("No files found in the source folder.");
    }

    fn job_started(&mut self, job: &TransferJob) {
        self.start_bar(&job.file.name);
    }

    fn download_progress(&mut self, _job: &TransferJob, fraction: f64) {
        let percent = percent(fraction);
        match &self.bar {
            Some(bar) => bar.set_position(percent),
            None => println!("Download {percent}%."),
        }
    }

    fn downloaded(&mut self, job: &TransferJob, bytes: u64) {
        self.finish_bar();
        println!("Downloaded {} ({bytes} bytes).", job.file.name);
    }

    fn uploaded(&mut self, _job: &TransferJob, created_id: &str) {
        println!("File ID: {created_id}");
    }

    fn job_failed(&mut self, _job: &TransferJob, error: &TransferError) {
        self.finish_bar();
        println!("An error occurred: {error}");
    }

    fn continue_after_failure(&mut self, job: &TransferJob, _error: &TransferError) -> bool {
        Confirm::new()
            .with_prompt(format!(
                "{} failed. Continue with the remaining files?",
                job.file.name
            ))
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

/// One-line summary printed after a run that finished.
pub fn print_summary(report: &TransferReport) {
    if report.is_empty() {
        return;
    }
    println!(
        "Copied {} file(s), {} failed.",
        report.completed.len(),
        report.failed.len()
    );
    for failed in &report.failed {
        println!("  {}: {}", failed.job.file.name, failed.error);
    }
}

fn percent(fraction: f64) -> u64 {
    (fraction.clamp(0.0, 1.0) * 100.0) as u64
}

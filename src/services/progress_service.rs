use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::progress::{CompletionEvent, ProgressSnapshot};
use crate::path_util::truncate_path;
use crate::state::IndexingProgressState;

/// Capacity of the completion channel; beyond it events are dropped.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 1024;
const STATUS_PATH_CHARS: usize = 60;

/// Tracks the furthest completed task index. Completions arrive out of
/// order, so the peak only ever moves forward.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    total_groups: usize,
    peak_index: usize,
    group: usize,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize, total_groups: usize) -> Self {
        Self {
            total,
            total_groups,
            peak_index: 0,
            group: 0,
            started: Instant::now(),
        }
    }

    pub fn observe(&mut self, event: &CompletionEvent) -> ProgressSnapshot {
        let elapsed = self.started.elapsed();
        self.observe_at(event, elapsed)
    }

    pub fn observe_at(&mut self, event: &CompletionEvent, elapsed: Duration) -> ProgressSnapshot {
        let index = event.index.min(self.total.max(1));
        self.peak_index = self.peak_index.max(index);
        self.group = self.group.max(event.group);
        self.snapshot_at(elapsed)
    }

    pub fn snapshot_at(&self, elapsed: Duration) -> ProgressSnapshot {
        let secs = elapsed.as_secs_f64();
        let files_per_sec = if secs > 0.0 {
            self.peak_index as f64 / secs
        } else {
            0.0
        };
        // elapsed / peak * remaining
        let eta = (self.peak_index > 0).then(|| {
            let remaining = self.total.saturating_sub(self.peak_index);
            elapsed.mul_f64(remaining as f64 / self.peak_index as f64)
        });
        ProgressSnapshot {
            peak_index: self.peak_index,
            total: self.total,
            group: self.group,
            total_groups: self.total_groups,
            elapsed,
            files_per_sec,
            eta,
        }
    }
}

fn format_eta(eta: Option<Duration>) -> String {
    eta.map(|d| HumanDuration(d).to_string())
        .unwrap_or_else(|| "estimating".to_string())
}

pub fn status_line(snapshot: &ProgressSnapshot, path: &str) -> String {
    format!(
        "group {}/{} | {:.2} files/s | ETA {} | {}",
        snapshot.group,
        snapshot.total_groups,
        snapshot.files_per_sec,
        format_eta(snapshot.eta),
        truncate_path(path, STATUS_PATH_CHARS)
    )
}

fn publish(status: &Arc<Mutex<IndexingProgressState>>, snapshot: &ProgressSnapshot, label: &str) {
    if let Ok(mut guard) = status.lock() {
        *guard = IndexingProgressState::from_snapshot(snapshot, label);
    }
}

fn new_bar(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}",
    )
    .map(|s| s.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Consumes completion events until every sender is gone and returns the
/// final snapshot. Never blocks the producers.
pub fn spawn_reporter(
    mut events: mpsc::Receiver<CompletionEvent>,
    total: usize,
    total_groups: usize,
    status: Arc<Mutex<IndexingProgressState>>,
    show_bar: bool,
) -> JoinHandle<ProgressSnapshot> {
    tokio::spawn(async move {
        let bar = new_bar(total, show_bar);
        let mut tracker = ProgressTracker::new(total, total_groups);
        let mut last = tracker.snapshot_at(Duration::ZERO);
        publish(&status, &last, if total == 0 { "done" } else { "active" });

        while let Some(event) = events.recv().await {
            last = tracker.observe(&event);
            bar.set_position(last.peak_index as u64);
            bar.set_message(status_line(&last, &event.path));
            publish(&status, &last, "active");
        }

        bar.finish_and_clear();
        publish(&status, &last, "done");
        last
    })
}

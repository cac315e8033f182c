use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Emitted once per finished task, in whatever order tasks finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    /// 1-based position of the task in the shuffled work list.
    pub index: usize,
    /// 1-based fault-tolerance group number.
    pub group: usize,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub peak_index: usize,
    pub total: usize,
    pub group: usize,
    pub total_groups: usize,
    pub elapsed: Duration,
    pub files_per_sec: f64,
    pub eta: Option<Duration>,
}

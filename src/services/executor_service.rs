use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::data::chunk_store;
use crate::error::AppError;
use crate::models::progress::CompletionEvent;
use crate::models::text_index::TextIndex;
use crate::services::worker_service::{TaskOutcome, TaskRunner};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunPlan {
    pub groups: Vec<Vec<String>>,
}

impl RunPlan {
    pub fn total_tasks(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn total_groups(&self) -> usize {
        self.groups.len()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    #[serde(skip)]
    pub index: TextIndex,
    pub groups_completed: usize,
    pub tasks_recorded: usize,
    pub texts: usize,
    pub nulls: usize,
    pub chunks: Vec<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GroupResult {
    pub mask: TextIndex,
    pub cancelled: bool,
}

/// Candidates that still need OCR, de-duplicated, in input order.
pub fn build_work_list(candidates: &[String], index: &TextIndex, retry_failed: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut work = Vec::new();
    for path in candidates {
        if index.needs_ocr(path, retry_failed) && seen.insert(path.as_str()) {
            work.push(path.clone());
        }
    }
    work
}

pub fn partition(tasks: Vec<String>, group_size: usize) -> Vec<Vec<String>> {
    let group_size = group_size.max(1);
    tasks.chunks(group_size).map(<[String]>::to_vec).collect()
}

pub fn plan<R: Rng + ?Sized>(
    candidates: &[String],
    index: &TextIndex,
    group_size: usize,
    retry_failed: bool,
    rng: &mut R,
) -> RunPlan {
    let mut tasks = build_work_list(candidates, index, retry_failed);
    // spread slow files across groups so per-group runtime stays even
    tasks.shuffle(rng);
    RunPlan {
        groups: partition(tasks, group_size),
    }
}

pub struct Executor<R: TaskRunner> {
    runner: Arc<R>,
    storage_dir: PathBuf,
    workers: usize,
    cancel_flag: Arc<AtomicBool>,
    progress: Option<mpsc::Sender<CompletionEvent>>,
}

impl<R: TaskRunner> Executor<R> {
    pub fn new(runner: R, storage_dir: impl AsRef<Path>, workers: usize) -> Self {
        Self {
            runner: Arc::new(runner),
            storage_dir: storage_dir.as_ref().to_path_buf(),
            workers: workers.max(1),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn with_cancel_flag(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = cancel_flag;
        self
    }

    /// Completion events are sent with `try_send`; a full channel drops them.
    pub fn with_progress(mut self, progress: mpsc::Sender<CompletionEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// `first_index` counts the tasks of earlier groups; `group_no` is 1-based.
    pub async fn run_group(&self, group_no: usize, first_index: usize, paths: &[String]) -> GroupResult {
        let mut mask = TextIndex::result_mask(paths.iter().cloned());
        let mut cancelled = false;
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<(String, TaskOutcome)> = JoinSet::new();
        let mut dispatched = 0usize;

        for (offset, path) in paths.iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if self.is_cancelled() {
                cancelled = true;
                break;
            }
            dispatched += 1;

            let runner = self.runner.clone();
            let cancel_flag = self.cancel_flag.clone();
            let progress = self.progress.clone();
            let path = path.clone();
            let index = first_index + offset + 1;

            join_set.spawn(async move {
                let _permit = permit;
                let mut outcome = runner.run(&path, &cancel_flag).await;
                // a failure racing a user abort is treated as the abort
                if !matches!(outcome, TaskOutcome::Text(_)) && cancel_flag.load(Ordering::Relaxed) {
                    outcome = TaskOutcome::Cancelled;
                }
                if outcome != TaskOutcome::Cancelled {
                    if let Some(tx) = progress {
                        let _ = tx.try_send(CompletionEvent {
                            index,
                            group: group_no,
                            path: path.clone(),
                        });
                    }
                }
                (path, outcome)
            });
        }

        // never dispatched: leave undecided for the next run
        for path in &paths[dispatched..] {
            mask.remove(path);
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((path, outcome)) => {
                    if let TaskOutcome::Crashed(reason) = &outcome {
                        tracing::debug!(path = %path, reason = %reason, "task crashed");
                    }
                    match outcome.into_record() {
                        Some(text) => mask.set(path, text),
                        None => {
                            cancelled = true;
                            mask.remove(&path);
                        }
                    }
                }
                Err(err) => {
                    // a panicking task keeps its null entry
                    tracing::warn!(group = group_no, error = %err, "task aborted");
                }
            }
        }

        GroupResult { mask, cancelled }
    }

    async fn persist(&self, mask: &TextIndex) -> Result<String, AppError> {
        let storage_dir = self.storage_dir.clone();
        let chunk = mask.clone();
        tokio::task::spawn_blocking(move || chunk_store::persist_chunk(&storage_dir, &chunk))
            .await
            .map_err(|e| AppError::Storage(format!("persist task failed: {e}")))?
    }

    /// A storage failure stops the run; chunks written before it stay valid.
    pub async fn execute(&self, plan: RunPlan, mut index: TextIndex) -> Result<RunReport, AppError> {
        let total_groups = plan.total_groups();
        let mut report = RunReport::default();
        let mut first_index = 0usize;

        for (i, group) in plan.groups.into_iter().enumerate() {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let group_no = i + 1;
            let result = self.run_group(group_no, first_index, &group).await;
            first_index += group.len();

            if !result.mask.is_empty() {
                let chunk = self.persist(&result.mask).await?;
                let nulls = result.mask.null_count();
                tracing::info!(
                    group = group_no,
                    total_groups,
                    recorded = result.mask.len(),
                    nulls,
                    chunk = %chunk,
                    "group checkpointed"
                );
                report.chunks.push(chunk);
                report.tasks_recorded += result.mask.len();
                report.nulls += nulls;
                report.texts += result.mask.len() - nulls;
                index.merge(&result.mask);
            }

            if result.cancelled {
                report.cancelled = true;
                break;
            }
            report.groups_completed += 1;
        }

        report.index = index;
        Ok(report)
    }

    pub async fn run(
        &self,
        candidates: &[String],
        index: TextIndex,
        group_size: usize,
        retry_failed: bool,
    ) -> Result<RunReport, AppError> {
        let plan = plan(candidates, &index, group_size, retry_failed, &mut rand::thread_rng());
        self.execute(plan, index).await
    }
}

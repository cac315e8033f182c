use std::path::Path;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::IndexConfig;
use crate::data::chunk_store::{self, StoreStats};
use crate::error::AppError;
use crate::services::discovery_service::{self, DiscoveryOptions};
use crate::services::executor_service::{self, Executor};
use crate::services::progress_service::{self, PROGRESS_CHANNEL_CAPACITY};
use crate::services::worker_service::{ProcessRunner, TaskRunner};
use crate::state::AppContext;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub root: String,
    pub discovered: usize,
    pub already_indexed: usize,
    pub scheduled: usize,
    pub groups: usize,
    pub groups_completed: usize,
    pub texts: usize,
    pub nulls: usize,
    pub chunks_written: usize,
    pub corpus_size: usize,
    pub cancelled: bool,
}

/// Indexes `root` with one worker process per image.
pub async fn run_index(
    root: &Path,
    config: &IndexConfig,
    ctx: &mut AppContext,
) -> Result<IndexSummary, AppError> {
    let runner = ProcessRunner::for_current_exe(&config.ocr, config.task_timeout)?;
    run_index_with(root, config, ctx, runner).await
}

pub async fn run_index_with<R: TaskRunner>(
    root: &Path,
    config: &IndexConfig,
    ctx: &mut AppContext,
    runner: R,
) -> Result<IndexSummary, AppError> {
    config.validate()?;

    let walk_root = root.to_path_buf();
    let options = DiscoveryOptions {
        min_file_size: config.min_file_size,
        excluded_segments: config.excluded_segments.clone(),
        ..DiscoveryOptions::default()
    };
    let files = tokio::task::spawn_blocking(move || discovery_service::discover(&walk_root, &options))
        .await
        .map_err(|e| AppError::Discovery(format!("discovery task failed: {e}")))??;
    let candidates: Vec<String> = files.into_iter().map(|f| f.path).collect();

    let storage_dir = config.storage_dir.clone();
    let index = tokio::task::spawn_blocking(move || chunk_store::load_all(&storage_dir))
        .await
        .map_err(|e| AppError::Storage(format!("index load task failed: {e}")))??;

    let already_indexed = candidates
        .iter()
        .filter(|path| !index.needs_ocr(path, config.retry_failed))
        .count();
    let plan = executor_service::plan(
        &candidates,
        &index,
        config.group_size,
        config.retry_failed,
        &mut rand::thread_rng(),
    );
    tracing::info!(
        root = %root.display(),
        discovered = candidates.len(),
        already_indexed,
        scheduled = plan.total_tasks(),
        groups = plan.total_groups(),
        workers = config.workers,
        "indexing started"
    );

    let mut summary = IndexSummary {
        root: root.display().to_string(),
        discovered: candidates.len(),
        already_indexed,
        scheduled: plan.total_tasks(),
        groups: plan.total_groups(),
        ..IndexSummary::default()
    };

    let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let reporter = progress_service::spawn_reporter(
        rx,
        plan.total_tasks(),
        plan.total_groups(),
        ctx.indexing_status.clone(),
        config.show_progress,
    );

    let executor = Executor::new(runner, &config.storage_dir, config.workers)
        .with_cancel_flag(ctx.cancel_flag.clone())
        .with_progress(tx);
    let outcome = executor.execute(plan, index).await;
    // closes the progress channel so the reporter can finish
    drop(executor);
    if let Err(e) = reporter.await {
        tracing::warn!(error = %e, "progress reporter failed");
    }
    let report = outcome?;

    summary.groups_completed = report.groups_completed;
    summary.texts = report.texts;
    summary.nulls = report.nulls;
    summary.chunks_written = report.chunks.len();
    summary.cancelled = report.cancelled;

    ctx.set_corpus(report.index.corpus());
    summary.corpus_size = ctx.corpus().len();

    if summary.cancelled {
        tracing::warn!(
            groups_completed = summary.groups_completed,
            groups = summary.groups,
            "indexing cancelled; undecided files will be retried next run"
        );
    } else {
        tracing::info!(
            texts = summary.texts,
            nulls = summary.nulls,
            chunks = summary.chunks_written,
            corpus = summary.corpus_size,
            "indexing finished"
        );
    }
    Ok(summary)
}

pub fn stats(storage_dir: &Path) -> Result<StoreStats, AppError> {
    chunk_store::stats(storage_dir)
}

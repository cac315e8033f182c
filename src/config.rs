use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;
use crate::services::ocr_service::OcrOptions;

pub const DEFAULT_GROUP_SIZE: usize = 64;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 30;
/// Files at or below this size are assumed to hold no OCRable text.
pub const DEFAULT_MIN_FILE_SIZE: u64 = 700;
pub const DEFAULT_EXCLUDED_SEGMENT: &str = "temp";
pub const STORAGE_DIR_NAME: &str = "image_text";

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub storage_dir: PathBuf,
    pub group_size: usize,
    pub workers: usize,
    pub task_timeout: Duration,
    pub min_file_size: u64,
    pub excluded_segments: Vec<String>,
    pub retry_failed: bool,
    pub show_progress: bool,
    pub ocr: OcrOptions,
}

impl IndexConfig {
    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            group_size: DEFAULT_GROUP_SIZE,
            workers: default_workers(),
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            min_file_size: DEFAULT_MIN_FILE_SIZE,
            excluded_segments: vec![DEFAULT_EXCLUDED_SEGMENT.to_string()],
            retry_failed: false,
            show_progress: true,
            ocr: OcrOptions::default(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.group_size == 0 {
            return Err(AppError::General("group size must be at least 1".to_string()));
        }
        if self.workers == 0 {
            return Err(AppError::General("worker count must be at least 1".to_string()));
        }
        if self.task_timeout.is_zero() {
            return Err(AppError::General("task timeout must be positive".to_string()));
        }
        Ok(())
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// `<platform data dir>/ocrindex/image_text`.
pub fn default_storage_dir() -> Result<PathBuf, AppError> {
    directories::ProjectDirs::from("", "", "ocrindex")
        .map(|dirs| dirs.data_dir().join(STORAGE_DIR_NAME))
        .ok_or_else(|| AppError::General("could not resolve a data directory".to_string()))
}

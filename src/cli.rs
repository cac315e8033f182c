use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    self, IndexConfig, DEFAULT_EXCLUDED_SEGMENT, DEFAULT_GROUP_SIZE, DEFAULT_MIN_FILE_SIZE,
    DEFAULT_TASK_TIMEOUT_SECS,
};
use crate::error::AppError;
use crate::models::search::SearchMode;
use crate::services::ocr_service::{OcrOptions, DEFAULT_ENGINE_MODE, DEFAULT_LANGUAGE, DEFAULT_PAGE_SEG_MODE};
use crate::services::search_service::DEFAULT_LIMIT;

/// Incremental OCR indexer and full-text search for local images.
#[derive(Parser, Debug)]
#[command(name = "ocrindex", version, about)]
pub struct Cli {
    /// Directory holding the index chunks
    #[arg(long, global = true, env = "OCRINDEX_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk a directory and OCR every image not yet indexed
    Index(IndexArgs),
    /// Search the extracted text
    Search(SearchArgs),
    /// Summarize what is stored in the index
    Stats,
    /// OCR a single file and print the result as JSON
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Directory to scan
    pub root: PathBuf,

    /// Tasks per checkpointed group
    #[arg(long, env = "OCRINDEX_GROUP_SIZE", default_value_t = DEFAULT_GROUP_SIZE)]
    pub group_size: usize,

    /// Concurrent worker processes (defaults to the number of CPUs)
    #[arg(long, env = "OCRINDEX_WORKERS")]
    pub workers: Option<usize>,

    /// Seconds before a worker is killed
    #[arg(long, env = "OCRINDEX_TASK_TIMEOUT", default_value_t = DEFAULT_TASK_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Files at or below this many bytes are skipped
    #[arg(long, default_value_t = DEFAULT_MIN_FILE_SIZE)]
    pub min_file_size: u64,

    /// Directory names to skip (case-insensitive)
    #[arg(long = "exclude", default_values_t = [DEFAULT_EXCLUDED_SEGMENT.to_string()])]
    pub excluded_segments: Vec<String>,

    /// OCR files again whose previous attempt produced nothing
    #[arg(long, env = "OCRINDEX_RETRY_FAILED")]
    pub retry_failed: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    #[command(flatten)]
    pub ocr: OcrArgs,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    pub query: String,

    #[arg(long, short = 'n', default_value_t = DEFAULT_LIMIT)]
    pub limit: usize,

    /// fuzzy or tfidf
    #[arg(long, default_value_t = SearchMode::Fuzzy)]
    pub mode: SearchMode,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    pub path: PathBuf,

    #[command(flatten)]
    pub ocr: OcrArgs,
}

/// Tesseract settings. Passed through to worker processes unchanged.
#[derive(Args, Debug, Clone)]
pub struct OcrArgs {
    #[arg(long, env = "OCRINDEX_LANG", default_value = DEFAULT_LANGUAGE)]
    pub lang: String,

    #[arg(long, default_value_t = DEFAULT_PAGE_SEG_MODE)]
    pub psm: u8,

    #[arg(long, default_value_t = DEFAULT_ENGINE_MODE)]
    pub oem: u8,

    #[arg(long)]
    pub no_preserve_spaces: bool,
}

impl From<OcrArgs> for OcrOptions {
    fn from(args: OcrArgs) -> Self {
        OcrOptions {
            language: args.lang,
            page_seg_mode: args.psm,
            engine_mode: args.oem,
            preserve_interword_spaces: !args.no_preserve_spaces,
        }
    }
}

impl Cli {
    pub fn storage_dir(&self) -> Result<PathBuf, AppError> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => config::default_storage_dir(),
        }
    }
}

impl IndexArgs {
    pub fn into_config(self, storage_dir: PathBuf) -> IndexConfig {
        let mut config = IndexConfig::with_storage_dir(storage_dir);
        config.group_size = self.group_size;
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.task_timeout = Duration::from_secs(self.timeout_secs);
        config.min_file_size = self.min_file_size;
        config.excluded_segments = self.excluded_segments;
        config.retry_failed = self.retry_failed;
        config.show_progress = !self.no_progress;
        config.ocr = self.ocr.into();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::worker_service::worker_args;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_worker_args_parse_back() {
        let options = OcrOptions {
            language: "deu".into(),
            page_seg_mode: 6,
            engine_mode: 1,
            preserve_interword_spaces: false,
        };
        let mut argv = vec!["ocrindex".to_string()];
        argv.extend(worker_args(&options));
        argv.push("/pics/scan.png".to_string());

        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::Worker(args) = cli.command else {
            panic!("expected worker command");
        };
        assert_eq!(args.path, PathBuf::from("/pics/scan.png"));
        assert_eq!(OcrOptions::from(args.ocr), options);
    }

    #[test]
    fn test_index_defaults() {
        let cli = Cli::try_parse_from(["ocrindex", "--storage-dir", "/data", "index", "/photos"]).unwrap();
        assert_eq!(cli.storage_dir().unwrap(), PathBuf::from("/data"));
        let Command::Index(args) = cli.command else {
            panic!("expected index command");
        };
        let config = args.into_config(PathBuf::from("/data"));
        assert_eq!(config.group_size, DEFAULT_GROUP_SIZE);
        assert_eq!(config.task_timeout, Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS));
        assert_eq!(config.excluded_segments, vec!["temp".to_string()]);
        assert!(!config.retry_failed);
        assert!(config.show_progress);
        assert_eq!(config.ocr, OcrOptions::default());
    }

    #[test]
    fn test_search_mode_flag() {
        let cli = Cli::try_parse_from(["ocrindex", "search", "total", "--mode", "tfidf", "-n", "5"]).unwrap();
        let Command::Search(args) = cli.command else {
            panic!("expected search command");
        };
        assert_eq!(args.mode, SearchMode::TfIdf);
        assert_eq!(args.limit, 5);
        assert!(Cli::try_parse_from(["ocrindex", "search", "x", "--mode", "bm25"]).is_err());
    }
}

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;

use ignore::{WalkBuilder, WalkState};

use crate::error::AppError;
use crate::models::image_file::ImageFile;
use crate::services::image_service;

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Files must be strictly larger than this.
    pub min_file_size: u64,
    /// Directory names (any case) below the root whose subtrees are skipped.
    pub excluded_segments: Vec<String>,
    pub threads: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            min_file_size: crate::config::DEFAULT_MIN_FILE_SIZE,
            excluded_segments: vec![crate::config::DEFAULT_EXCLUDED_SEGMENT.to_string()],
            threads: 0,
        }
    }
}

fn is_excluded_dir(entry: &ignore::DirEntry, excluded: &[String]) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
    if !is_dir {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    excluded.iter().any(|s| name.eq_ignore_ascii_case(s))
}

/// Applies the cheap pre-filters to a single entry.
fn image_file_from_entry(entry: &ignore::DirEntry, options: &DiscoveryOptions) -> Option<ImageFile> {
    if !entry.file_type()?.is_file() {
        return None;
    }
    let path = entry.path();
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    if !image_service::is_image_extension(&extension) {
        return None;
    }
    let size_bytes = entry.metadata().ok()?.len();
    if size_bytes <= options.min_file_size {
        return None;
    }
    Some(ImageFile {
        path: path.to_string_lossy().to_string(),
        size_bytes,
        extension,
    })
}

/// Walks `root` in parallel and returns every OCR candidate under it.
///
/// Unreadable subtrees are skipped; an unreadable root is an error. Symlinks
/// are not followed and ignore files are not honoured. Order is unspecified.
pub fn discover(root: &Path, options: &DiscoveryOptions) -> Result<Vec<ImageFile>, AppError> {
    let meta = std::fs::metadata(root)
        .map_err(|e| AppError::Discovery(format!("cannot read {}: {e}", root.display())))?;
    if !meta.is_dir() {
        return Err(AppError::Discovery(format!(
            "not a directory: {}",
            root.display()
        )));
    }
    std::fs::read_dir(root)
        .map_err(|e| AppError::Discovery(format!("cannot list {}: {e}", root.display())))?;

    let excluded = Arc::new(options.excluded_segments.clone());
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .threads(options.threads)
        .filter_entry(move |entry| !is_excluded_dir(entry, &excluded))
        .build_parallel();

    let (tx, rx) = mpsc::channel::<ImageFile>();
    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |result| {
            match result {
                Ok(entry) => {
                    if let Some(file) = image_file_from_entry(&entry, options) {
                        if tx.send(file).is_err() {
                            return WalkState::Quit;
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry");
                }
            }
            WalkState::Continue
        })
    });
    drop(tx);

    let files: Vec<ImageFile> = rx.into_iter().collect();
    tracing::info!(root = %root.display(), candidates = files.len(), "discovery finished");
    Ok(files)
}

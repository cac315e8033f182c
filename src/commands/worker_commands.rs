use std::io::Write;
use std::path::Path;

use crate::error::AppError;
use crate::services::ocr_service::{self, OcrEngine, OcrOptions};
use crate::services::worker_service::WorkerReply;

/// Writes exactly one JSON [`WorkerReply`] to `out`.
pub fn write_reply<W: Write>(
    out: &mut W,
    path: &Path,
    engine: &dyn OcrEngine,
    options: &OcrOptions,
) -> Result<(), AppError> {
    let reply = WorkerReply {
        text: ocr_service::extract_text(path, engine, options),
    };
    serde_json::to_writer(&mut *out, &reply)?;
    out.flush()?;
    Ok(())
}

pub fn run_worker(path: &Path, options: &OcrOptions) -> Result<(), AppError> {
    let engine = ocr_service::default_engine();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_reply(&mut out, path, engine.as_ref(), options)
}

use std::io::Cursor;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::image_service::{self, Bitmap};

/// Fully automatic sparse-text segmentation: no layout assumption.
pub const DEFAULT_PAGE_SEG_MODE: u8 = 11;
/// Default engine (legacy + LSTM, whichever is available).
pub const DEFAULT_ENGINE_MODE: u8 = 3;
pub const DEFAULT_LANGUAGE: &str = "eng";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrOptions {
    pub language: String,
    pub page_seg_mode: u8,
    pub engine_mode: u8,
    pub preserve_interword_spaces: bool,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            page_seg_mode: DEFAULT_PAGE_SEG_MODE,
            engine_mode: DEFAULT_ENGINE_MODE,
            preserve_interword_spaces: true,
        }
    }
}

impl OcrOptions {
    /// Arguments for the `tesseract` CLI after `<input> stdout`.
    pub fn tesseract_args(&self) -> Vec<String> {
        let mut args = vec![
            "--psm".to_string(),
            self.page_seg_mode.to_string(),
            "--oem".to_string(),
            self.engine_mode.to_string(),
            "-l".to_string(),
            self.language.clone(),
        ];
        if self.preserve_interword_spaces {
            args.push("-c".to_string());
            args.push("preserve_interword_spaces=1".to_string());
        }
        args
    }
}

pub trait OcrEngine {
    fn recognize(&self, bitmap: &Bitmap, options: &OcrOptions) -> Result<String, AppError>;
}

/// Shells out to the `tesseract` binary on `PATH` (or a given location).
#[derive(Debug, Clone)]
pub struct TesseractCli {
    program: String,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
        }
    }
}

fn encode_png(bitmap: &Bitmap) -> Result<Vec<u8>, AppError> {
    let mut buf = Cursor::new(Vec::new());
    bitmap
        .write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| AppError::Image(format!("png encode failed: {e}")))?;
    Ok(buf.into_inner())
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, bitmap: &Bitmap, options: &OcrOptions) -> Result<String, AppError> {
        let png = encode_png(bitmap)?;
        let mut input = tempfile::Builder::new()
            .prefix("ocrindex_")
            .suffix(".png")
            .tempfile()?;
        std::io::Write::write_all(&mut input, &png)?;

        let output = Command::new(&self.program)
            .arg(input.path())
            .arg("stdout")
            .args(options.tesseract_args())
            .output()
            .map_err(|e| AppError::Ocr(format!("failed to launch {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Ocr(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(feature = "leptess")]
pub struct LeptessEngine;

#[cfg(feature = "leptess")]
impl OcrEngine for LeptessEngine {
    fn recognize(&self, bitmap: &Bitmap, options: &OcrOptions) -> Result<String, AppError> {
        use leptess::Variable;

        let mut lt = leptess::LepTess::new(None, &options.language)
            .map_err(|e| AppError::Ocr(format!("init failed: {e}")))?;
        lt.set_variable(
            Variable::TesseditPagesegMode,
            &options.page_seg_mode.to_string(),
        )
        .map_err(|e| AppError::Ocr(format!("set psm failed: {e}")))?;
        if options.preserve_interword_spaces {
            lt.set_variable(Variable::PreserveInterwordSpaces, "1")
                .map_err(|e| AppError::Ocr(format!("set spacing failed: {e}")))?;
        }
        let png = encode_png(bitmap)?;
        lt.set_image_from_mem(&png)
            .map_err(|e| AppError::Ocr(format!("set_image failed: {e}")))?;
        lt.get_utf8_text()
            .map_err(|e| AppError::Ocr(format!("get_utf8_text failed: {e}")))
    }
}

/// The engine the worker process uses for this build.
pub fn default_engine() -> Box<dyn OcrEngine> {
    #[cfg(feature = "leptess")]
    {
        Box::new(LeptessEngine)
    }
    #[cfg(not(feature = "leptess"))]
    {
        Box::new(TesseractCli::default())
    }
}

/// Load, then OCR. `None` means the image could not be read or OCR failed;
/// an empty string is a successful run that found nothing.
pub fn extract_text(path: &Path, engine: &dyn OcrEngine, options: &OcrOptions) -> Option<String> {
    let bitmap = image_service::load_image(path)?;
    match engine.recognize(&bitmap, options) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "ocr failed");
            None
        }
    }
}

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl AppError {
    /// Storage failures end the run; everything else per-file is absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Storage(_) | AppError::Discovery(_) | AppError::Io(_)
        )
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

use serde::{Deserialize, Serialize};

/// A discovered candidate for OCR. Derived fresh on every discovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFile {
    pub path: String,
    pub size_bytes: u64,
    pub extension: String,
}

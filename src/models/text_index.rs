use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A searchable document: a path with non-empty extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub path: String,
    pub text: String,
}

/// Mapping from file path to extracted text (or a null marker).
///
/// Serialized as a plain JSON object, which is also the on-disk chunk format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextIndex {
    records: BTreeMap<String, Option<String>>,
}

impl TextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every path pre-set to null, so each dispatched task ends with a value.
    pub fn result_mask<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: paths.into_iter().map(|p| (p.into(), None)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `None` if the path was never recorded, `Some(None)` for a null record.
    pub fn get(&self, path: &str) -> Option<Option<&str>> {
        self.records.get(path).map(|t| t.as_deref())
    }

    pub fn null_count(&self) -> usize {
        self.records.values().filter(|t| t.is_none()).count()
    }

    /// Overwrites unconditionally. Only used on a group's own result mask.
    pub fn set(&mut self, path: impl Into<String>, text: Option<String>) {
        self.records.insert(path.into(), text);
    }

    pub fn remove(&mut self, path: &str) -> Option<Option<String>> {
        self.records.remove(path)
    }

    /// Reports whether anything changed. A null record is upgraded by a later
    /// text; an existing text is never replaced.
    pub fn merge_record(&mut self, path: &str, text: Option<String>) -> bool {
        match self.records.get_mut(path) {
            None => {
                self.records.insert(path.to_string(), text);
                true
            }
            Some(existing @ None) if text.is_some() => {
                *existing = text;
                true
            }
            Some(_) => false,
        }
    }

    pub fn merge(&mut self, other: &TextIndex) -> usize {
        let mut changed = 0;
        for (path, text) in &other.records {
            if self.merge_record(path, text.clone()) {
                changed += 1;
            }
        }
        changed
    }

    /// Whether a path still needs OCR. With `retry_failed`, null records are
    /// treated as undecided.
    pub fn needs_ocr(&self, path: &str, retry_failed: bool) -> bool {
        match self.records.get(path) {
            None => true,
            Some(None) => retry_failed,
            Some(Some(_)) => false,
        }
    }

    /// Paths with non-empty text, in path order.
    pub fn corpus(&self) -> Vec<CorpusEntry> {
        self.records
            .iter()
            .filter_map(|(path, text)| match text {
                Some(text) if !text.is_empty() => Some(CorpusEntry {
                    path: path.clone(),
                    text: text.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

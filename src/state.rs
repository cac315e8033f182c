use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use crate::models::progress::ProgressSnapshot;
use crate::models::search::{SearchMode, SearchResult};
use crate::models::text_index::{CorpusEntry, TextIndex};
use crate::services::search_service;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IndexingProgressState {
    pub processed: usize,
    pub total: usize,
    pub group: usize,
    pub total_groups: usize,
    pub eta_secs: Option<u64>,
    pub status: String,
}

impl IndexingProgressState {
    pub fn from_snapshot(snapshot: &ProgressSnapshot, status: &str) -> Self {
        Self {
            processed: snapshot.peak_index,
            total: snapshot.total,
            group: snapshot.group,
            total_groups: snapshot.total_groups,
            eta_secs: snapshot.eta.map(|d| d.as_secs()),
            status: status.to_string(),
        }
    }
}

/// Everything the search and presentation side needs, passed explicitly.
pub struct AppContext {
    corpus: Vec<CorpusEntry>,
    last_results: Vec<SearchResult>,
    pub cancel_flag: Arc<AtomicBool>,
    pub indexing_status: Arc<Mutex<IndexingProgressState>>,
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl AppContext {
    pub fn new(corpus: Vec<CorpusEntry>) -> Self {
        Self {
            corpus,
            last_results: Vec::new(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            indexing_status: Arc::new(Mutex::new(IndexingProgressState {
                status: "done".to_string(),
                ..IndexingProgressState::default()
            })),
        }
    }

    pub fn from_index(index: &TextIndex) -> Self {
        Self::new(index.corpus())
    }

    pub fn corpus(&self) -> &[CorpusEntry] {
        &self.corpus
    }

    /// Replaces the corpus; previous results no longer apply.
    pub fn set_corpus(&mut self, corpus: Vec<CorpusEntry>) {
        self.corpus = corpus;
        self.last_results.clear();
    }

    pub fn search(&mut self, query: &str, limit: usize, mode: SearchMode) -> &[SearchResult] {
        self.last_results = search_service::search(query, &self.corpus, limit, mode);
        &self.last_results
    }
}

use std::cmp::Ordering;
use std::collections::HashMap;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use rayon::prelude::*;

use crate::models::search::{SearchMode, SearchResult};
use crate::models::text_index::CorpusEntry;

pub const DEFAULT_LIMIT: usize = 128;
/// Minimum normalised fuzzy score (0..100) for a document to count as a hit.
pub const FUZZY_THRESHOLD: f64 = 70.0;
const MIN_TOKEN_CHARS: usize = 2;

pub fn search(
    query: &str,
    corpus: &[CorpusEntry],
    limit: usize,
    mode: SearchMode,
) -> Vec<SearchResult> {
    let trimmed = query.trim();
    if trimmed.is_empty() || limit == 0 || corpus.is_empty() {
        return Vec::new();
    }

    let mut results = match mode {
        SearchMode::Fuzzy => fuzzy_search(trimmed, corpus),
        SearchMode::TfIdf => tfidf_search(trimmed, corpus),
    };
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    results.truncate(limit);
    tracing::debug!(query = trimmed, %mode, hits = results.len(), "search finished");
    results
}

fn hit(entry: &CorpusEntry, score: f64, mode: SearchMode) -> SearchResult {
    SearchResult {
        file_path: entry.path.clone(),
        text: entry.text.clone(),
        score,
        match_source: mode,
    }
}

fn fuzzy_search(query: &str, corpus: &[CorpusEntry]) -> Vec<SearchResult> {
    let perfect = match SkimMatcherV2::default().ignore_case().fuzzy_match(query, query) {
        Some(score) if score > 0 => score as f64,
        _ => return Vec::new(),
    };

    corpus
        .par_iter()
        .map_init(
            || SkimMatcherV2::default().ignore_case(),
            |matcher, entry| {
                let raw = matcher.fuzzy_match(&entry.text, query)?;
                let score = (raw as f64 * 100.0 / perfect).min(100.0);
                (score > FUZZY_THRESHOLD).then(|| hit(entry, score, SearchMode::Fuzzy))
            },
        )
        .flatten()
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
        .collect()
}

type TermVector = HashMap<String, f64>;

fn term_counts(tokens: &[String]) -> HashMap<&str, f64> {
    let mut counts = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0.0) += 1.0;
    }
    counts
}

fn weigh(counts: &HashMap<&str, f64>, idf: &HashMap<&str, f64>) -> TermVector {
    let mut vector: TermVector = counts
        .iter()
        .map(|(term, tf)| (term.to_string(), tf * idf.get(term).copied().unwrap_or(0.0)))
        .collect();
    let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        vector.values_mut().for_each(|w| *w /= norm);
    }
    vector
}

fn cosine(query: &TermVector, doc: &TermVector) -> f64 {
    query
        .iter()
        .filter_map(|(term, w)| doc.get(term).map(|d| w * d))
        .sum()
}

fn tfidf_search(query: &str, corpus: &[CorpusEntry]) -> Vec<SearchResult> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }
    let doc_tokens: Vec<Vec<String>> = corpus.par_iter().map(|e| tokenize(&e.text)).collect();

    // the query is counted as one more document
    let query_counts = term_counts(&query_tokens);
    let doc_counts: Vec<HashMap<&str, f64>> = doc_tokens.iter().map(|t| term_counts(t)).collect();
    let n = (corpus.len() + 1) as f64;

    let mut df: HashMap<&str, f64> = HashMap::new();
    for counts in doc_counts.iter().chain(std::iter::once(&query_counts)) {
        for term in counts.keys() {
            *df.entry(*term).or_insert(0.0) += 1.0;
        }
    }
    let idf: HashMap<&str, f64> = df
        .iter()
        .map(|(term, freq)| (*term, ((1.0 + n) / (1.0 + freq)).ln() + 1.0))
        .collect();

    let query_vec = weigh(&query_counts, &idf);
    corpus
        .par_iter()
        .zip(doc_counts.par_iter())
        .filter_map(|(entry, counts)| {
            let score = cosine(&query_vec, &weigh(counts, &idf));
            (score > 0.0).then(|| hit(entry, score, SearchMode::TfIdf))
        })
        .collect()
}

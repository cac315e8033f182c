use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchMode {
    #[default]
    Fuzzy,
    TfIdf,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fuzzy => write!(f, "fuzzy"),
            Self::TfIdf => write!(f, "tfidf"),
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fuzzy" => Ok(Self::Fuzzy),
            "tfidf" | "tf-idf" => Ok(Self::TfIdf),
            _ => Err(format!("unknown search mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_path: String,
    pub text: String,
    pub score: f64,
    pub match_source: SearchMode,
}

impl SearchResult {
    /// First line of the text, at most `max_chars` characters.
    pub fn snippet(&self, max_chars: usize) -> String {
        let line = self
            .text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("");
        line.chars().take(max_chars).collect()
    }
}

use std::io::Write;
use std::path::Path;

use crate::data::chunk_store;
use crate::error::AppError;
use crate::models::search::{SearchMode, SearchResult};
use crate::state::AppContext;

const SNIPPET_CHARS: usize = 80;

/// Builds a search context from everything persisted under `storage_dir`.
pub fn load_context(storage_dir: &Path) -> Result<AppContext, AppError> {
    let index = chunk_store::load_all(storage_dir)?;
    Ok(AppContext::from_index(&index))
}

pub fn search(
    ctx: &mut AppContext,
    query: &str,
    limit: usize,
    mode: SearchMode,
) -> Vec<SearchResult> {
    ctx.search(query, limit, mode).to_vec()
}

pub fn render_results<W: Write>(out: &mut W, results: &[SearchResult]) -> std::io::Result<()> {
    if results.is_empty() {
        writeln!(out, "no matches")?;
        return Ok(());
    }
    for result in results {
        writeln!(out, "{:>7.2}  {}", result.score, result.file_path)?;
        let snippet = result.snippet(SNIPPET_CHARS);
        if !snippet.is_empty() {
            writeln!(out, "         {snippet}")?;
        }
    }
    Ok(())
}

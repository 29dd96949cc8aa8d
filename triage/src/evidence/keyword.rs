//! Keyword fallback: deterministic token-overlap ranking, no I/O

use crate::evidence::{rank, Chunk, EvidenceSelected};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Alphanumeric runs, matched after case folding
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+").unwrap());

const MIN_TOKEN_LEN: usize = 2;

/// Case-folded, deduplicated token set (tokens of length ≥ 2)
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let folded = text.to_lowercase();
    TOKEN_RE
        .find_iter(&folded)
        .map(|m| m.as_str())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

/// Score each chunk by how many task tokens it contains; keep
/// `score >= min_score`, best `top_k` by score desc / start asc.
pub fn select(task: &str, chunks: &[Chunk], top_k: usize, min_score: f64) -> Vec<EvidenceSelected> {
    let query = tokenize(task);
    let scored = chunks
        .iter()
        .filter_map(|chunk| {
            let tokens = tokenize(&chunk.text);
            let overlap = query.iter().filter(|t| tokens.contains(*t)).count() as f64;
            (overlap >= min_score).then(|| EvidenceSelected::from_chunk(chunk, overlap))
        })
        .collect();
    rank(scored, top_k)
}

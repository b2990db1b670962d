//! Query-keyword extraction and chunk relevance scoring.

use crate::context::types::{ChunkerConfig, ContextChunk};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Boost for chunks carrying structural signal.
const HEADING_BOOST: f64 = 1.2;
const CODE_BOOST: f64 = 1.15;
const LINK_BOOST: f64 = 1.1;
/// Chunks sized inside this fraction band of `max_chunk_size` score higher.
const SWEET_SPOT_MIN: f64 = 0.25;
const SWEET_SPOT_MAX: f64 = 0.75;
const SWEET_SPOT_BOOST: f64 = 1.1;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9][a-z0-9_-]+").expect("valid word regex"));

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "of", "in", "on", "at", "to",
    "for", "with", "by", "from", "as", "is", "are", "was", "were", "be", "been", "being", "it",
    "its", "this", "that", "these", "those", "i", "you", "he", "she", "we", "they", "what",
    "which", "who", "how", "when", "where", "why", "do", "does", "did", "not", "no", "so",
    "can", "could", "should", "would", "will", "my", "your", "our", "their", "about", "into",
];

/// Lower-cased, stop-word-filtered, deduplicated query terms, capped at `max`.
pub fn extract_keywords(query: &str, max: usize) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for found in WORD_RE.find_iter(&lower) {
        let term = found.as_str();
        if STOP_WORDS.contains(&term) {
            continue;
        }
        if seen.insert(term.to_string()) {
            keywords.push(term.to_string());
            if keywords.len() >= max {
                break;
            }
        }
    }
    keywords
}

/// Score every chunk against the keyword terms with a TF-IDF-like measure,
/// then apply structural and size boosts.
pub fn score_chunks(chunks: &mut [ContextChunk], keywords: &[String], config: &ChunkerConfig) {
    if chunks.is_empty() || keywords.is_empty() {
        return;
    }

    let chunk_words: Vec<Vec<String>> = chunks
        .iter()
        .map(|chunk| {
            let lower = chunk.content.to_lowercase();
            WORD_RE
                .find_iter(&lower)
                .map(|m| m.as_str().to_string())
                .collect()
        })
        .collect();

    let total = chunks.len() as f64;
    let document_frequency: Vec<usize> = keywords
        .iter()
        .map(|term| {
            chunk_words
                .iter()
                .filter(|words| words.iter().any(|w| w == term))
                .count()
        })
        .collect();

    for (chunk, words) in chunks.iter_mut().zip(&chunk_words) {
        let mut score = 0.0;
        if !words.is_empty() {
            for (term, &df) in keywords.iter().zip(&document_frequency) {
                let occurrences = words.iter().filter(|w| *w == term).count();
                if occurrences == 0 {
                    continue;
                }
                let tf = occurrences as f64 / words.len() as f64;
                let idf = (total / (1.0 + df as f64)).ln() + 1.0;
                score += tf * idf;
            }
        }

        if chunk.has_headings {
            score *= HEADING_BOOST;
        }
        if chunk.has_code {
            score *= CODE_BOOST;
        }
        if chunk.has_links {
            score *= LINK_BOOST;
        }
        let size_ratio = chunk.content.len() as f64 / config.max_chunk_size.max(1) as f64;
        if (SWEET_SPOT_MIN..=SWEET_SPOT_MAX).contains(&size_ratio) {
            score *= SWEET_SPOT_BOOST;
        }

        chunk.relevance = score;
    }
}

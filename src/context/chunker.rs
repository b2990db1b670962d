use crate::context::relevance;
use crate::context::types::{ChunkStats, ChunkedDocument, ChunkerConfig, ContextChunk};
use crate::metrics::{Metric, MetricUnit, MetricsRecorder};
use std::sync::Arc;
use tracing::debug;

/// Fraction of a tentative chunk in which a semantic breakpoint is searched
/// for, counted back from its end.
const BREAKPOINT_WINDOW: f64 = 0.3;

/// Splits oversized documents into relevance-scored, budget-fitting chunks.
///
/// Stateless apart from configuration; one instance serves any number of
/// concurrent callers.
pub struct ContextChunker {
    config: ChunkerConfig,
    metrics: Arc<dyn MetricsRecorder>,
}

impl ContextChunker {
    pub fn new(config: ChunkerConfig, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self { config, metrics }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `document`, score against `query` when present, and select the
    /// best chunks fitting `max_context_size`, returned in document order.
    pub fn process(&self, document: &str, query: Option<&str>) -> ChunkedDocument {
        let mut chunks = self.split(document);
        let keywords = query
            .map(|q| relevance::extract_keywords(q, self.config.max_keywords))
            .unwrap_or_default();
        let scored = !keywords.is_empty();
        if scored {
            relevance::score_chunks(&mut chunks, &keywords, &self.config);
        }

        let order: Vec<usize> = if scored {
            let mut indices: Vec<usize> = (0..chunks.len()).collect();
            indices.sort_by(|&a, &b| {
                chunks[b]
                    .relevance
                    .partial_cmp(&chunks[a].relevance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cmp(&b))
            });
            indices
        } else {
            (0..chunks.len()).collect()
        };

        let mut selected_indices = Vec::new();
        let mut total_size = 0usize;
        for index in order {
            let size = chunks[index].content.len();
            if total_size + size > self.config.max_context_size {
                break;
            }
            selected_indices.push(index);
            total_size += size;
        }
        selected_indices.sort_unstable();

        let all_size: usize = chunks.iter().map(|chunk| chunk.content.len()).sum();
        let keep: std::collections::HashSet<usize> = selected_indices.iter().copied().collect();
        let selected: Vec<ContextChunk> = chunks
            .into_iter()
            .enumerate()
            .filter(|(index, _)| keep.contains(index))
            .map(|(_, chunk)| chunk)
            .collect();

        let stats = ChunkStats {
            chunk_count: selected.len(),
            avg_relevance: if scored && !selected.is_empty() {
                selected.iter().map(|c| c.relevance).sum::<f64>() / selected.len() as f64
            } else {
                0.0
            },
            code_chunks: selected.iter().filter(|c| c.has_code).count(),
            heading_chunks: selected.iter().filter(|c| c.has_headings).count(),
        };

        debug!(
            document_size = document.len(),
            selected = selected.len(),
            total_size,
            dropped = all_size - total_size,
            "chunked document"
        );
        self.metrics.record_metric(
            Metric::new("chunker.selected_bytes", total_size as f64, MetricUnit::Bytes)
                .with_tag("chunks", selected.len().to_string()),
        );

        ChunkedDocument {
            chunks: selected,
            total_size,
            dropped_size: all_size - total_size,
            stats,
        }
    }

    /// Cut the document into chunks of at most `max_chunk_size` bytes
    /// (except where a fenced code block stretches one), with
    /// `chunk_overlap` bytes repeated across consecutive boundaries.
    fn split(&self, document: &str) -> Vec<ContextChunk> {
        let len = document.len();
        if len == 0 {
            return Vec::new();
        }

        let fences = if self.config.preserve_code_blocks {
            fence_ranges(document)
        } else {
            Vec::new()
        };

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut id = 0usize;

        while start < len {
            let tentative = (start + self.config.max_chunk_size).min(len);
            let mut end = tentative;
            if end < len {
                if self.config.semantic_boundaries {
                    end = semantic_breakpoint(document.as_bytes(), start, tentative);
                }
                // A cut inside a fence is pushed out to the fence's end.
                if let Some(&(_, fence_end)) =
                    fences.iter().find(|&&(fs, fe)| end > fs && end < fe)
                {
                    end = fence_end.min(len);
                }
                end = ceil_char_boundary(document, end.max(start + 1));
            }

            let content = &document[start..end];
            let (word_count, has_code, has_headings, has_links) = chunk_metadata(content);
            chunks.push(ContextChunk {
                id,
                content: content.to_string(),
                start,
                end,
                relevance: 0.0,
                word_count,
                has_code,
                has_headings,
                has_links,
            });
            id += 1;

            if end >= len {
                break;
            }
            let mut next = end.saturating_sub(self.config.chunk_overlap).max(start + 1);
            // Overlap must not begin mid-fence; snap forward to its end.
            if let Some(&(_, fence_end)) = fences.iter().find(|&&(fs, fe)| next > fs && next < fe)
            {
                next = fence_end.min(end);
            }
            start = ceil_char_boundary(document, next);
        }

        chunks
    }
}

/// Byte ranges of fenced code blocks, including their fence lines. An
/// unterminated fence runs to the end of the document.
fn fence_ranges(document: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut fence_start: Option<usize> = None;
    let mut offset = 0usize;
    for line in document.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            match fence_start.take() {
                None => fence_start = Some(offset),
                Some(start) => ranges.push((start, offset + line.len())),
            }
        }
        offset += line.len();
    }
    if let Some(start) = fence_start {
        ranges.push((start, document.len()));
    }
    ranges
}

/// Best split position in the tail window of a tentative chunk: after a
/// blank line, else before a heading, else after any line break, else the
/// tentative offset itself.
fn semantic_breakpoint(bytes: &[u8], start: usize, tentative_end: usize) -> usize {
    let span = tentative_end - start;
    let window_start = tentative_end - ((span as f64 * BREAKPOINT_WINDOW) as usize).max(1);

    let mut i = tentative_end;
    while i > window_start + 1 {
        i -= 1;
        if bytes[i] == b'\n' && bytes[i - 1] == b'\n' {
            return i + 1;
        }
    }

    let mut i = tentative_end;
    while i > window_start {
        i -= 1;
        if bytes[i] == b'#' && i > 0 && bytes[i - 1] == b'\n' {
            return i;
        }
    }

    let mut i = tentative_end;
    while i > window_start {
        i -= 1;
        if bytes[i] == b'\n' {
            return i + 1;
        }
    }

    tentative_end
}

fn ceil_char_boundary(document: &str, mut index: usize) -> usize {
    while index < document.len() && !document.is_char_boundary(index) {
        index += 1;
    }
    index.min(document.len())
}

fn chunk_metadata(content: &str) -> (usize, bool, bool, bool) {
    let word_count = content.split_whitespace().count();
    let has_code = content.contains("```") || content.contains('`');
    let has_headings = content
        .lines()
        .any(|line| line.trim_start().starts_with('#'));
    let has_links = content.contains("](")
        || content.contains("[[")
        || content.contains("http://")
        || content.contains("https://");
    (word_count, has_code, has_headings, has_links)
}

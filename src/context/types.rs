use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target upper bound on chunk size, in bytes. A fenced code block that
    /// straddles a boundary may stretch a chunk past this.
    pub max_chunk_size: usize,
    /// Bytes of trailing context repeated at the start of the next chunk.
    pub chunk_overlap: usize,
    /// Combined size budget for the selected chunks.
    pub max_context_size: usize,
    /// Prefer blank lines and headings over fixed offsets when splitting.
    pub semantic_boundaries: bool,
    /// Never split inside a fenced code block.
    pub preserve_code_blocks: bool,
    /// Keyword terms extracted from the query, at most.
    pub max_keywords: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            chunk_overlap: 200,
            max_context_size: 8000,
            semantic_boundaries: true,
            preserve_code_blocks: true,
            max_keywords: 10,
        }
    }
}

/// One scored slice of the source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChunk {
    pub id: usize,
    pub content: String,
    /// Byte offset range into the source document.
    pub start: usize,
    pub end: usize,
    pub relevance: f64,
    pub word_count: usize,
    pub has_code: bool,
    pub has_headings: bool,
    pub has_links: bool,
}

/// Aggregate statistics over the selected chunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkStats {
    pub chunk_count: usize,
    pub avg_relevance: f64,
    pub code_chunks: usize,
    pub heading_chunks: usize,
}

/// Result of chunking and selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkedDocument {
    /// Selected chunks, in original document order.
    pub chunks: Vec<ContextChunk>,
    /// Combined size of the selected chunks.
    pub total_size: usize,
    /// Combined size of the chunks left out.
    pub dropped_size: usize,
    pub stats: ChunkStats,
}

impl ChunkedDocument {
    /// Selected chunk contents joined back into one context string.
    pub fn joined_content(&self) -> String {
        self.chunks
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

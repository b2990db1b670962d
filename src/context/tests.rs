use super::*;
use crate::metrics::NoopRecorder;
use std::sync::Arc;

fn chunker(config: ChunkerConfig) -> ContextChunker {
    ContextChunker::new(config, Arc::new(NoopRecorder))
}

fn small_config() -> ChunkerConfig {
    ChunkerConfig {
        max_chunk_size: 200,
        chunk_overlap: 20,
        max_context_size: 1000,
        semantic_boundaries: true,
        preserve_code_blocks: true,
        max_keywords: 10,
    }
}

fn paragraphs(count: usize) -> String {
    (0..count)
        .map(|i| format!("Paragraph {i} talks about ordinary note taking and daily journaling."))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[test]
fn test_chunk_ranges_cover_the_document() {
    let document = paragraphs(20);
    let chunker = chunker(ChunkerConfig {
        max_context_size: usize::MAX,
        ..small_config()
    });
    let result = chunker.process(&document, None);

    assert!(!result.chunks.is_empty());
    assert_eq!(result.chunks[0].start, 0);
    assert_eq!(result.chunks.last().unwrap().end, document.len());
    for pair in result.chunks.windows(2) {
        // Overlap allowed, gaps are not.
        assert!(pair[1].start <= pair[0].end);
        assert!(pair[1].start > pair[0].start);
    }
}

#[test]
fn test_selected_size_never_exceeds_budget() {
    let document = paragraphs(60);
    let config = ChunkerConfig {
        max_context_size: 500,
        ..small_config()
    };
    let chunker = chunker(config);

    for query in [None, Some("journaling daily notes")] {
        let result = chunker.process(&document, query);
        let actual: usize = result.chunks.iter().map(|c| c.content.len()).sum();
        assert_eq!(actual, result.total_size);
        assert!(result.total_size <= 500);
        assert!(result.dropped_size > 0);
    }
}

#[test]
fn test_unique_keyword_chunk_ranks_highest() {
    let mut document = paragraphs(12);
    document.push_str("\n\nOnly this closing section mentions the xylophone tuning procedure.");
    let chunker = chunker(ChunkerConfig {
        max_context_size: usize::MAX,
        ..small_config()
    });

    let result = chunker.process(&document, Some("xylophone"));
    let best = result
        .chunks
        .iter()
        .max_by(|a, b| a.relevance.partial_cmp(&b.relevance).unwrap())
        .unwrap();
    assert!(best.content.contains("xylophone"));
    assert!(best.relevance > 0.0);
    let others_zero = result
        .chunks
        .iter()
        .filter(|c| !c.content.contains("xylophone"))
        .all(|c| c.relevance == 0.0);
    assert!(others_zero);
}

#[test]
fn test_selection_returns_document_order() {
    let mut document = String::new();
    for i in 0..10 {
        document.push_str(&format!("Section {i} covers plugin settings.\n\n"));
        if i == 7 {
            document.push_str("The relevant keyword sandpiper appears here.\n\n");
        }
        if i == 2 {
            document.push_str("Another sandpiper sighting in an early section.\n\n");
        }
    }
    let chunker = chunker(ChunkerConfig {
        max_chunk_size: 80,
        chunk_overlap: 0,
        max_context_size: 400,
        ..small_config()
    });

    let result = chunker.process(&document, Some("sandpiper"));
    for pair in result.chunks.windows(2) {
        assert!(pair[0].id < pair[1].id, "selected chunks must be in document order");
        assert!(pair[0].start < pair[1].start);
    }
}

#[test]
fn test_fenced_code_block_is_never_split() {
    let code = format!("```rust\n{}\n```", "let x = 1;\n".repeat(40));
    let document = format!("{}\n\n{}\n\n{}", paragraphs(2), code, paragraphs(2));
    let chunker = chunker(ChunkerConfig {
        max_chunk_size: 150,
        chunk_overlap: 0,
        max_context_size: usize::MAX,
        ..small_config()
    });

    let result = chunker.process(&document, None);
    let with_fence: Vec<_> = result
        .chunks
        .iter()
        .filter(|c| c.content.contains("```"))
        .collect();
    for chunk in with_fence {
        let fences = chunk.content.matches("```").count();
        assert_eq!(fences % 2, 0, "a chunk must contain whole fences only");
    }
}

#[test]
fn test_semantic_boundaries_prefer_blank_lines() {
    let document = paragraphs(10);
    let chunker = chunker(ChunkerConfig {
        max_chunk_size: 220,
        chunk_overlap: 0,
        max_context_size: usize::MAX,
        ..small_config()
    });

    let result = chunker.process(&document, None);
    // Every non-final chunk should end right after a paragraph break.
    for chunk in &result.chunks[..result.chunks.len() - 1] {
        assert!(
            chunk.content.ends_with("\n\n") || chunk.content.ends_with('\n'),
            "chunk ended mid-line: {:?}",
            &chunk.content[chunk.content.len().saturating_sub(20)..]
        );
    }
}

#[test]
fn test_empty_document_yields_no_chunks() {
    let chunker = chunker(small_config());
    let result = chunker.process("", Some("anything"));
    assert!(result.chunks.is_empty());
    assert_eq!(result.total_size, 0);
    assert_eq!(result.dropped_size, 0);
}

#[test]
fn test_keyword_extraction_filters_and_caps() {
    let keywords = relevance::extract_keywords(
        "How do I configure the Mermaid diagram renderer and the renderer cache?",
        3,
    );
    assert_eq!(keywords.len(), 3);
    assert!(!keywords.contains(&"the".to_string()));
    assert!(!keywords.contains(&"how".to_string()));
    assert!(keywords.contains(&"configure".to_string()));
    // Deduplicated: "renderer" appears twice in the query.
    assert!(keywords.iter().filter(|k| k.as_str() == "renderer").count() <= 1);
}

#[test]
fn test_chunk_metadata_flags() {
    let document = "# Heading\n\nSome text with a [link](https://example.com).\n\n```rust\nfn main() {}\n```\n";
    let chunker = chunker(ChunkerConfig {
        max_chunk_size: 4000,
        ..small_config()
    });
    let result = chunker.process(document, None);
    assert_eq!(result.chunks.len(), 1);
    let chunk = &result.chunks[0];
    assert!(chunk.has_headings);
    assert!(chunk.has_code);
    assert!(chunk.has_links);
    assert!(chunk.word_count > 0);
}

pub mod chunker;
pub mod relevance;
pub mod types;

#[cfg(test)]
pub mod tests;

pub use chunker::ContextChunker;
pub use types::*;

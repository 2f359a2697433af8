use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the ingestion stage reads PDFs from when no folder is given.
pub const DEFAULT_DATA_PATH: &str = "data/";
/// Where the vector index is written and read.
pub const DEFAULT_INDEX_PATH: &str = "vectorstore/db_faiss";
pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_TOP_K: usize = 3;

/// Text of one PDF page together with where it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentPage {
    pub source_path: String,
    pub file_name: String,
    pub checksum: String,
    pub page: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextChunk {
    pub chunk_id: String,
    pub source_path: String,
    pub file_name: String,
    pub page: u32,
    pub chunk_index: u64,
    pub text: String,
}

impl fmt::Display for TextChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (page {}): {}",
            self.source_path,
            self.page,
            self.text.replace('\n', " ")
        )
    }
}

/// A chunk returned by nearest-neighbour search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: TextChunk,
    pub score: f32,
}

/// Generated answer plus the chunks it was conditioned on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Descend into subdirectories when discovering PDFs.
    pub recursive: bool,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            recursive: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub top_k: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { top_k: DEFAULT_TOP_K }
    }
}

use crate::models::TextChunk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const INDEX_FORMAT_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const RECORDS_FILE: &str = "records.json";

/// Describes how a persisted index was built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub dimensions: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub chunk: TextChunk,
    pub vector: Vec<f32>,
}

pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{clean_page_text, split_pages, ChunkingConfig, RecursiveCharacterSplitter};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HuggingFaceEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_MODEL_DIMENSIONS, DEFAULT_INFERENCE_URL,
};
pub use error::{EmbeddingError, GenerationError, IndexError, IngestError, QueryError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use generation::{
    GenerationOptions, HuggingFaceEndpoint, DEFAULT_LLM_REPO_ID, DEFAULT_MAX_NEW_TOKENS,
    DEFAULT_TEMPERATURE,
};
pub use ingest::{
    discover_pdf_files, ingest_folder, ingest_folder_chunks, load_pdf_documents, IngestionReport,
    LoadedDocuments, SkippedPdf,
};
pub use models::{
    Answer, DocumentPage, IngestionOptions, QueryOptions, RetrievedChunk, TextChunk,
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_DATA_PATH, DEFAULT_INDEX_PATH,
    DEFAULT_TOP_K,
};
pub use orchestrator::RetrievalQa;
pub use prompt::{PromptTemplate, DEFAULT_PROMPT_TEMPLATE};
pub use session::{format_numbered_list, ChatMessage, ChatReply, ChatSession, Role};
pub use store::IndexManifest;
pub use stores::LocalVectorStore;
pub use traits::{TextGenerator, VectorIndex};

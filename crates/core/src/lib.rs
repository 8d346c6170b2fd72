pub mod chunking;
pub mod classifier;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod response;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, ChunkingConfig, TextSplitter};
pub use classifier::is_file_specific;
pub use embeddings::{CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, SearchError};
pub use extractor::{
    DocumentFormat, DocumentParser, HttpOcr, ImagePayload, LopdfExtractor, NoOcr, OcrEngine,
    PageText, PdfExtractor, TesseractOcr,
};
pub use index::RetrievalIndex;
pub use ingest::{
    discover_uploads, ingest_folder, uploaded_file_names, IngestedFile, IngestionReport,
    SkippedFile,
};
pub use models::{
    Answer, Chunk, Citation, ImageLine, IndexEntry, IngestionOptions, LineRef, Locator,
    ManifestRecord, QueryHit, QueryResult, TextLine, AI_GENERATED_SOURCE,
};
pub use orchestrator::RagService;
pub use response::{assemble, NOT_FOUND_MESSAGE};
pub use stores::{LocalVectorStore, QdrantStore};
pub use traits::VectorIndex;

use crate::chunking::{ChunkingConfig, TextSplitter};
use crate::classifier::is_file_specific;
use crate::embeddings::Embedder;
use crate::extractor::{DocumentParser, OcrEngine};
use crate::index::RetrievalIndex;
use crate::ingest::{ingest_folder, IngestionReport};
use crate::response::assemble;
use crate::traits::VectorIndex;
use crate::{Answer, IngestError, IngestionOptions, QueryResult, SearchError};
use std::path::Path;
use tracing::{debug, info};

/// Wires parsing, chunking, indexing and answering together.
pub struct RagService<V, E> {
    parser: DocumentParser,
    splitter: TextSplitter,
    index: RetrievalIndex<V, E>,
    options: IngestionOptions,
}

impl<V, E> RagService<V, E>
where
    V: VectorIndex + Send + Sync,
    E: Embedder,
{
    pub fn new(
        index: RetrievalIndex<V, E>,
        parser: DocumentParser,
        options: IngestionOptions,
    ) -> Result<Self, IngestError> {
        if options.top_k == 0 {
            return Err(IngestError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }
        let splitter = TextSplitter::new(ChunkingConfig::from(&options))?;
        Ok(Self {
            parser,
            splitter,
            index,
            options,
        })
    }

    pub fn with_ocr(
        index: RetrievalIndex<V, E>,
        ocr: Box<dyn OcrEngine>,
        options: IngestionOptions,
    ) -> Result<Self, IngestError> {
        Self::new(index, DocumentParser::new(ocr), options)
    }

    pub fn index(&self) -> &RetrievalIndex<V, E> {
        &self.index
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    pub async fn ingest_uploads(
        &mut self,
        upload_dir: &Path,
        manifest_dir: &Path,
    ) -> Result<IngestionReport, IngestError> {
        let report = ingest_folder(
            &self.parser,
            &self.splitter,
            &mut self.index,
            upload_dir,
            manifest_dir,
        )
        .await?;

        info!(
            ingested = report.ingested.len(),
            skipped = report.skipped_files.len(),
            chunks = report.total_chunks(),
            "ingestion finished"
        );
        Ok(report)
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<QueryResult, SearchError> {
        self.index.query(query, k).await
    }

    /// Classifies the query, retrieves `top_k` hits and assembles a cited answer.
    pub async fn answer<I, S>(&self, query: &str, uploaded_file_names: I) -> Result<Answer, SearchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if query.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }

        let file_specific = is_file_specific(query, uploaded_file_names);
        let hits = self.retrieve(query, self.options.top_k).await?;
        debug!(file_specific, hits = hits.len(), "retrieved context");

        Ok(assemble(query, &hits, file_specific))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::test_pdf::write_pdf;
    use crate::extractor::{ImagePayload, NoOcr};
    use crate::ingest::read_manifest;
    use crate::response::NOT_FOUND_MESSAGE;
    use crate::stores::LocalVectorStore;
    use crate::{Citation, LineRef, Locator, AI_GENERATED_SOURCE};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct FixedOcr(&'static str);

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _image: &ImagePayload, _source: &Path, _page: u32) -> Result<String, IngestError> {
            Ok(self.0.to_string())
        }
    }

    struct Workspace {
        root: TempDir,
    }

    impl Workspace {
        fn new() -> Result<Self, Box<dyn std::error::Error>> {
            let root = tempdir()?;
            fs::create_dir(root.path().join("upload"))?;
            Ok(Self { root })
        }

        fn upload(&self) -> std::path::PathBuf {
            self.root.path().join("upload")
        }

        fn chunks(&self) -> std::path::PathBuf {
            self.root.path().join("chunks")
        }

        async fn service(
            &self,
            ocr: Box<dyn OcrEngine>,
        ) -> Result<RagService<LocalVectorStore, CharacterNgramEmbedder>, Box<dyn std::error::Error>> {
            let embedder = CharacterNgramEmbedder::default();
            let store = LocalVectorStore::open(
                self.root.path().join("index"),
                "rag_collection",
                embedder.dimensions(),
            )
            .await?;
            let index = RetrievalIndex::new(store, embedder)?;
            Ok(RagService::with_ocr(index, ocr, IngestionOptions::default())?)
        }
    }

    #[tokio::test]
    async fn text_upload_is_answered_with_line_citations() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = Workspace::new()?;
        fs::write(
            workspace.upload().join("notes.txt"),
            "Hello world\nThis is a RAG test\n",
        )?;

        let mut service = workspace.service(Box::new(NoOcr)).await?;
        let report = service
            .ingest_uploads(&workspace.upload(), &workspace.chunks())
            .await?;
        assert_eq!(report.ingested.len(), 1);
        assert_eq!(report.total_chunks(), 2);

        let manifest = read_manifest(&workspace.chunks().join("notes.json"))?;
        let located = manifest
            .iter()
            .map(|record| (record.text.as_str(), record.metadata.page, record.metadata.line))
            .collect::<Vec<_>>();
        assert_eq!(
            located,
            vec![
                ("Hello world", 1, LineRef::Text(1)),
                ("This is a RAG test", 1, LineRef::Text(2)),
            ]
        );

        let answer = service.answer("Hello", ["notes.txt"]).await?;
        assert!(answer.text.starts_with("- Hello world"));
        assert_eq!(
            answer.citations[0],
            Citation::from(&Locator {
                file: "notes.txt".to_string(),
                page: 1,
                line: LineRef::Text(1),
            })
        );
        assert_eq!(answer.citations.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn scanned_pdf_page_is_cited_by_image_line() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = Workspace::new()?;
        write_pdf(
            &workspace.upload().join("scan.pdf"),
            &[(vec!["Cover page"], 0), (vec![], 1)],
        )?;

        let mut service = workspace.service(Box::new(FixedOcr("Invoice #42"))).await?;
        service
            .ingest_uploads(&workspace.upload(), &workspace.chunks())
            .await?;

        let manifest = read_manifest(&workspace.chunks().join("scan.json"))?;
        let invoice = manifest
            .iter()
            .find(|record| record.text == "Invoice #42")
            .ok_or("OCR text missing from manifest")?;
        assert_eq!(invoice.metadata.page, 2);
        assert_eq!(invoice.metadata.line, LineRef::image(1));

        let hits = service.retrieve("Invoice #42", 1).await?;
        assert_eq!(hits[0].chunk.locator.line.to_string(), "image-1");
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_upload_is_skipped_without_stopping_the_batch(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let workspace = Workspace::new()?;
        fs::write(workspace.upload().join("a.txt"), "alpha line")?;
        fs::write(workspace.upload().join("b.docx"), "not parsed")?;
        fs::write(workspace.upload().join("c.txt"), "gamma line")?;

        let mut service = workspace.service(Box::new(NoOcr)).await?;
        let report = service
            .ingest_uploads(&workspace.upload(), &workspace.chunks())
            .await?;

        assert_eq!(report.ingested.len(), 2);
        assert_eq!(report.skipped_files.len(), 1);
        assert!(report.skipped_files[0].path.ends_with("b.docx"));
        assert!(workspace.chunks().join("c.json").exists());
        assert!(!workspace.chunks().join("b.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn re_ingesting_the_same_uploads_does_not_grow_the_index(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let workspace = Workspace::new()?;
        fs::write(workspace.upload().join("a.txt"), "first\nsecond\nthird")?;

        let mut service = workspace.service(Box::new(NoOcr)).await?;
        service
            .ingest_uploads(&workspace.upload(), &workspace.chunks())
            .await?;
        let first = service.index().len().await?;

        service
            .ingest_uploads(&workspace.upload(), &workspace.chunks())
            .await?;
        assert_eq!(service.index().len().await?, first);
        assert_eq!(first, 3);
        Ok(())
    }

    #[tokio::test]
    async fn empty_upload_folder_gives_an_empty_report() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = Workspace::new()?;
        let mut service = workspace.service(Box::new(NoOcr)).await?;

        let report = service
            .ingest_uploads(&workspace.upload(), &workspace.chunks())
            .await?;
        assert!(report.ingested.is_empty());
        assert!(report.skipped_files.is_empty());

        let missing = service
            .ingest_uploads(&workspace.root.path().join("nope"), &workspace.chunks())
            .await;
        assert!(matches!(missing, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_answers_depend_on_query_kind() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = Workspace::new()?;
        let service = workspace.service(Box::new(NoOcr)).await?;

        let specific = service.answer("What does report.pdf say?", ["report.pdf"]).await?;
        assert_eq!(specific.text, NOT_FOUND_MESSAGE);
        assert!(specific.citations.is_empty());

        let general = service.answer("capital of France", ["report.pdf"]).await?;
        assert_eq!(
            general.text,
            "Generated response for: capital of France (using local model, no external data)"
        );
        assert_eq!(general.citations[0].source, AI_GENERATED_SOURCE);

        assert!(matches!(
            service.answer("   ", Vec::<String>::new()).await,
            Err(SearchError::Request(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn zero_top_k_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = Workspace::new()?;
        let embedder = CharacterNgramEmbedder::default();
        let store = LocalVectorStore::open(workspace.root.path().join("index"), "c", embedder.dimensions()).await?;
        let index = RetrievalIndex::new(store, embedder)?;
        let options = IngestionOptions {
            top_k: 0,
            ..IngestionOptions::default()
        };

        assert!(RagService::with_ocr(index, Box::new(NoOcr), options).is_err());
        Ok(())
    }
}

use anyhow::{bail, Context};
use chrono::Utc;
use cited_rag_core::{
    uploaded_file_names, Answer, CharacterNgramEmbedder, DocumentParser, Embedder, HttpOcr,
    IngestionOptions, IngestionReport, LocalVectorStore, NoOcr, OcrEngine, OllamaEmbedder,
    QdrantStore, RagService, RetrievalIndex, TesseractOcr, VectorIndex,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// all-minilm produces 384-dimensional vectors.
const OLLAMA_DEFAULT_DIMENSIONS: usize = 384;

#[derive(Parser)]
#[command(name = "cited-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Folder whose .txt and .pdf files are ingested
    #[arg(long, env = "RAG_UPLOAD_DIR", default_value = "./upload")]
    upload_dir: PathBuf,

    /// Folder for the per-document chunk manifests
    #[arg(long, env = "RAG_CHUNK_DIR", default_value = "./chunks")]
    manifest_dir: PathBuf,

    /// Folder of the local vector collection
    #[arg(long, env = "RAG_INDEX_DIR", default_value = "./output/vector_index")]
    index_dir: PathBuf,

    /// Collection name, shared by the local and Qdrant stores
    #[arg(long, env = "RAG_COLLECTION", default_value = "rag_collection")]
    collection: String,

    #[arg(long, env = "RAG_STORE", value_enum, default_value_t = StoreKind::Local)]
    store: StoreKind,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    #[arg(long, env = "RAG_EMBEDDER", value_enum, default_value_t = EmbedderKind::Ngram)]
    embedder: EmbedderKind,

    /// Model name sent to the embedding service
    #[arg(long, env = "RAG_EMBEDDING_MODEL", default_value = "all-minilm")]
    embedding_model: String,

    /// Ollama-compatible embedding service base URL
    #[arg(long, env = "RAG_EMBEDDING_URL", default_value = "http://localhost:11434")]
    embedding_url: String,

    /// Vector size; defaults to 128 for ngram and 384 for ollama
    #[arg(long, env = "RAG_EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    /// Maximum chunk length in characters
    #[arg(long, env = "RAG_CHUNK_SIZE", default_value = "500")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks of one line
    #[arg(long, env = "RAG_CHUNK_OVERLAP", default_value = "50")]
    chunk_overlap: usize,

    /// Number of retrieved chunks per answer
    #[arg(long, env = "RAG_TOP_K", default_value = "3")]
    top_k: usize,

    #[arg(long, env = "RAG_OCR", value_enum, default_value_t = OcrKind::Tesseract)]
    ocr: OcrKind,

    /// Tesseract language
    #[arg(long, env = "RAG_OCR_LANG", default_value = "eng")]
    ocr_lang: String,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest the upload folder and print a summary.
    Ingest,
    /// Answer one query against the existing index.
    Ask {
        #[arg(long)]
        query: String,
        /// Overrides the global --top-k for this query.
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Ingest, then answer queries from stdin until `quit`.
    Chat {
        /// Reuse the existing index without ingesting.
        #[arg(long, default_value_t = false)]
        skip_ingest: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Local,
    Qdrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    Ngram,
    Ollama,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OcrKind {
    Tesseract,
    Http,
    None,
}

impl Cli {
    fn options(&self) -> IngestionOptions {
        let top_k = match &self.command {
            Some(Command::Ask {
                top_k: Some(top_k), ..
            }) => *top_k,
            _ => self.top_k,
        };
        IngestionOptions {
            chunk_max_chars: self.chunk_size,
            chunk_overlap_chars: self.chunk_overlap,
            top_k,
        }
    }

    fn ocr_engine(&self) -> anyhow::Result<Box<dyn OcrEngine>> {
        let engine: Box<dyn OcrEngine> = match self.ocr {
            OcrKind::Tesseract => Box::new(TesseractOcr {
                language: self.ocr_lang.clone(),
                ..TesseractOcr::default()
            }),
            OcrKind::Http => match HttpOcr::from_env() {
                Some(engine) => Box::new(engine),
                None => bail!("--ocr http needs LLM_OCR_ENDPOINT to be set"),
            },
            OcrKind::None => Box::new(NoOcr),
        };
        Ok(engine)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    // a missing .env is fine, real environment variables still win
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "cited-rag boot"
    );

    match cli.embedder {
        EmbedderKind::Ngram => {
            let embedder = CharacterNgramEmbedder {
                dimensions: cli.embedding_dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            };
            with_store(cli, embedder).await
        }
        EmbedderKind::Ollama => {
            let embedder = OllamaEmbedder::new(
                &cli.embedding_url,
                cli.embedding_model.clone(),
                cli.embedding_dimensions.unwrap_or(OLLAMA_DEFAULT_DIMENSIONS),
            )?;
            with_store(cli, embedder).await
        }
    }
}

async fn with_store<E: Embedder>(cli: Cli, embedder: E) -> anyhow::Result<()> {
    match cli.store {
        StoreKind::Local => {
            let store =
                LocalVectorStore::open(&cli.index_dir, &cli.collection, embedder.dimensions())
                    .await?;
            run(cli, store, embedder).await
        }
        StoreKind::Qdrant => {
            let store = QdrantStore::new(&cli.qdrant_url, cli.collection.clone(), embedder.dimensions())?;
            store.ensure_collection().await?;
            run(cli, store, embedder).await
        }
    }
}

async fn run<V, E>(cli: Cli, store: V, embedder: E) -> anyhow::Result<()>
where
    V: VectorIndex + Send + Sync,
    E: Embedder,
{
    let index = RetrievalIndex::new(store, embedder)?;
    let parser = DocumentParser::new(cli.ocr_engine()?);
    let mut service = RagService::new(index, parser, cli.options())?;

    match cli.command {
        Some(Command::Ingest) => {
            let report = ingest(&mut service, &cli).await?;
            println!(
                "{} files ingested, {} chunks, {} skipped at {}",
                report.ingested.len(),
                report.total_chunks(),
                report.skipped_files.len(),
                Utc::now().to_rfc3339()
            );
        }
        Some(Command::Ask { ref query, .. }) => {
            let names = file_names(&cli.upload_dir);
            let answer = service.answer(query, &names).await?;
            print_answer(&answer);
        }
        Some(Command::Chat { skip_ingest }) => chat(&mut service, &cli, skip_ingest).await?,
        None => chat(&mut service, &cli, false).await?,
    }

    Ok(())
}

async fn ingest<V, E>(service: &mut RagService<V, E>, cli: &Cli) -> anyhow::Result<IngestionReport>
where
    V: VectorIndex + Send + Sync,
    E: Embedder,
{
    let report = service
        .ingest_uploads(&cli.upload_dir, &cli.manifest_dir)
        .await
        .with_context(|| format!("ingesting {}", cli.upload_dir.display()))?;

    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped upload");
    }
    Ok(report)
}

async fn chat<V, E>(service: &mut RagService<V, E>, cli: &Cli, skip_ingest: bool) -> anyhow::Result<()>
where
    V: VectorIndex + Send + Sync,
    E: Embedder,
{
    if !skip_ingest {
        ingest(service, cli).await?;
    }
    let names = file_names(&cli.upload_dir);

    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        print!("Enter your query (or 'quit' to exit): ");
        io::stdout().flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.eq_ignore_ascii_case("quit") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        let answer = service.answer(query, &names).await?;
        print_answer(&answer);
    }

    Ok(())
}

fn file_names(upload_dir: &Path) -> Vec<String> {
    match uploaded_file_names(upload_dir) {
        Ok(names) => names,
        Err(error) => {
            warn!(%error, "no uploaded file names, every query is treated as general");
            Vec::new()
        }
    }
}

fn print_answer(answer: &Answer) {
    println!("\nResponse:");
    println!("{}", answer.text);
    println!("\nCitations:");
    for citation in &answer.citations {
        println!("{citation}");
    }
}

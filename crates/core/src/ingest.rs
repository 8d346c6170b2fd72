use crate::chunking::{build_chunks, TextSplitter};
use crate::embeddings::Embedder;
use crate::extractor::{file_name, DocumentParser};
use crate::index::RetrievalIndex;
use crate::traits::VectorIndex;
use crate::{IngestError, ManifestRecord};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Regular files directly inside `folder`, symlinks resolved, sorted by path.
pub fn discover_uploads(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "upload directory does not exist: {}",
            folder.display()
        )));
    }

    let mut files = Vec::new();
    for item in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = match item {
            Ok(entry) => entry,
            Err(error) => {
                warn!(folder = %folder.display(), %error, "cannot read upload entry");
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub fn uploaded_file_names(folder: &Path) -> Result<Vec<String>, IngestError> {
    discover_uploads(folder)?
        .iter()
        .map(|path| file_name(path))
        .collect()
}

/// `<manifest_dir>/<file stem>.json`
pub fn manifest_path(manifest_dir: &Path, source: &Path) -> Result<PathBuf, IngestError> {
    let stem = source
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IngestError::MissingFileName(source.display().to_string()))?;
    Ok(manifest_dir.join(format!("{stem}.json")))
}

pub fn write_manifest(path: &Path, records: &[ManifestRecord]) -> Result<(), IngestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.flush()?;
    Ok(())
}

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRecord>, IngestError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub manifest_path: PathBuf,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub ingested: Vec<IngestedFile>,
    pub skipped_files: Vec<SkippedFile>,
}

impl IngestionReport {
    pub fn total_chunks(&self) -> usize {
        self.ingested.iter().map(|file| file.chunk_count).sum()
    }
}

/// Parses, chunks, indexes and writes the manifest for one file.
pub async fn ingest_file<V, E>(
    parser: &DocumentParser,
    splitter: &TextSplitter,
    index: &mut RetrievalIndex<V, E>,
    path: &Path,
    manifest_dir: &Path,
) -> Result<IngestedFile, IngestError>
where
    V: VectorIndex + Send + Sync,
    E: Embedder,
{
    let lines = parser.parse(path)?;
    let chunks = build_chunks(&lines, splitter);

    let manifest = manifest_path(manifest_dir, path)?;
    let records = chunks.iter().map(ManifestRecord::from).collect::<Vec<_>>();
    write_manifest(&manifest, &records)?;

    index.add(&chunks).await?;

    Ok(IngestedFile {
        path: path.to_path_buf(),
        manifest_path: manifest,
        chunk_count: chunks.len(),
    })
}

/// Ingests every upload, one file at a time.
///
/// A file that cannot be parsed is recorded in the report and the rest are
/// still processed. Index and embedding failures stop the batch.
pub async fn ingest_folder<V, E>(
    parser: &DocumentParser,
    splitter: &TextSplitter,
    index: &mut RetrievalIndex<V, E>,
    upload_dir: &Path,
    manifest_dir: &Path,
) -> Result<IngestionReport, IngestError>
where
    V: VectorIndex + Send + Sync,
    E: Embedder,
{
    let files = discover_uploads(upload_dir)?;
    fs::create_dir_all(manifest_dir)?;

    let mut report = IngestionReport::default();
    for path in files {
        match ingest_file(parser, splitter, index, &path, manifest_dir).await {
            Ok(file) => {
                info!(
                    file = %path.display(),
                    chunks = file.chunk_count,
                    manifest = %file.manifest_path.display(),
                    "processed file"
                );
                report.ingested.push(file);
            }
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => {
                warn!(file = %path.display(), %error, "skipping file");
                report.skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::NoOcr;
    use crate::stores::LocalVectorStore;
    use crate::{LineRef, Locator};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_flat_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        fs::create_dir(base.join("nested"))?;
        fs::write(base.join("nested").join("deep.txt"), "x")?;
        fs::write(base.join("b.txt"), "x")?;
        fs::write(base.join("a.pdf"), "x")?;

        let files = discover_uploads(base)?;
        let names = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.pdf", "b.txt"]);

        assert_eq!(uploaded_file_names(base)?, vec!["a.pdf", "b.txt"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_uploads_are_discovered() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let outside = tempdir()?;
        let target = outside.path().join("shared.txt");
        fs::write(&target, "linked content")?;
        std::os::unix::fs::symlink(&target, dir.path().join("linked.txt"))?;
        std::os::unix::fs::symlink(dir.path().join("gone.txt"), dir.path().join("dangling.txt"))?;

        let names = uploaded_file_names(dir.path())?;
        assert_eq!(names, vec!["linked.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn report_lists_each_indexed_file_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let upload = dir.path().join("upload");
        let manifests = dir.path().join("chunks");
        fs::create_dir(&upload)?;
        fs::write(upload.join("a.txt"), "first\nsecond")?;
        fs::write(upload.join("b.csv"), "x,y")?;

        let embedder = CharacterNgramEmbedder::default();
        let store = LocalVectorStore::open(dir.path().join("index"), "c", embedder.dimensions).await?;
        let mut index = RetrievalIndex::new(store, embedder)?;
        let parser = DocumentParser::new(Box::new(NoOcr));
        let splitter = TextSplitter::new(ChunkingConfig::default())?;

        let report = ingest_folder(&parser, &splitter, &mut index, &upload, &manifests).await?;
        assert_eq!(report.ingested.len(), 1);
        assert_eq!(report.ingested[0].chunk_count, 2);
        assert_eq!(report.ingested[0].manifest_path, manifests.join("a.json"));
        assert_eq!(report.skipped_files.len(), 1);
        assert!(report.skipped_files[0].path.ends_with("b.csv"));
        assert_eq!(index.len().await?, report.total_chunks());
        Ok(())
    }

    #[test]
    fn missing_upload_directory_is_an_error() {
        let result = discover_uploads(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }

    #[test]
    fn manifest_is_named_after_the_file_stem() -> Result<(), Box<dyn std::error::Error>> {
        let path = manifest_path(Path::new("chunks"), Path::new("upload/report.v2.pdf"))?;
        assert_eq!(path, Path::new("chunks").join("report.v2.json"));
        Ok(())
    }

    #[test]
    fn manifest_round_trips_pretty_json() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("out").join("notes.json");
        let records = vec![ManifestRecord {
            text: "Hello world".to_string(),
            metadata: Locator {
                file: "notes.txt".to_string(),
                page: 1,
                line: LineRef::Text(1),
            },
        }];

        write_manifest(&path, &records)?;
        let raw = fs::read_to_string(&path)?;
        assert!(raw.starts_with("[\n"));
        assert!(raw.contains("\"metadata\""));
        assert_eq!(read_manifest(&path)?, records);
        Ok(())
    }
}

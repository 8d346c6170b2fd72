use crate::error::IngestError;
use crate::models::{LineRef, Locator, TextLine};
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Pdf,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("txt") => Ok(Self::PlainText),
            Some("pdf") => Ok(Self::Pdf),
            _ => Err(IngestError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Encoded raster image ready to hand to an OCR engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    /// File extension understood by OCR tools: `jpg`, `jp2`, `pgm` or `ppm`.
    pub extension: &'static str,
}

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
    /// Raster images in the order the page content draws them.
    pub images: Vec<ImagePayload>,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

pub trait OcrEngine {
    fn recognize(&self, image: &ImagePayload, source: &Path, page: u32)
        -> Result<String, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOcr;

impl OcrEngine for NoOcr {
    fn recognize(&self, _image: &ImagePayload, _source: &Path, _page: u32) -> Result<String, IngestError> {
        Ok(String::new())
    }
}

/// Runs the `tesseract` binary against a temporary copy of the image.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub binary: String,
    pub language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: "eng".to_string(),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &ImagePayload, source: &Path, page: u32) -> Result<String, IngestError> {
        let mut file = tempfile::Builder::new()
            .prefix("cited-rag-ocr-")
            .suffix(&format!(".{}", image.extension))
            .tempfile()?;
        file.write_all(&image.bytes)?;
        file.flush()?;

        let output = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .args(["-l", &self.language])
            .output()
            .map_err(|error| IngestError::OcrFailed(format!("{} could not run: {error}", self.binary)))?;

        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "{} exited with {} on {} page {}: {}",
                self.binary,
                output.status,
                source.display(),
                page,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    image_base64: String,
    image_format: String,
    source_path: String,
    page: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    lines: Option<Vec<String>>,
}

/// Multimodal OCR service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpOcr {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl HttpOcr {
    /// Reads `LLM_OCR_ENDPOINT` and the optional `LLM_OCR_API_KEY`.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("LLM_OCR_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = std::env::var("LLM_OCR_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|key| !key.is_empty());

        Some(Self { endpoint, api_key })
    }

    fn recognize_blocking(&self, image: &ImagePayload, source: &Path, page: u32) -> Result<String, IngestError> {
        let payload = LlmOcrRequest {
            image_base64: STANDARD.encode(&image.bytes),
            image_format: image.extension.to_string(),
            source_path: source.to_string_lossy().to_string(),
            page,
        };

        let mut request = Client::new()
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "OCR request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json()?;
        Ok(payload_to_text(payload))
    }
}

impl OcrEngine for HttpOcr {
    fn recognize(&self, image: &ImagePayload, source: &Path, page: u32) -> Result<String, IngestError> {
        tokio::task::block_in_place(|| self.recognize_blocking(image, source, page))
    }
}

fn payload_to_text(payload: LlmOcrResponse) -> String {
    match (payload.lines, payload.text) {
        (Some(lines), _) if !lines.is_empty() => lines.join("\n"),
        (_, Some(text)) => text,
        _ => String::new(),
    }
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        extract_document_pages(&document)
    }
}

pub fn extract_document_pages(document: &Document) -> Result<Vec<PageText>, IngestError> {
    let mut pages = Vec::new();
    for (page_no, page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| IngestError::PdfParse(format!("page {page_no}: {error}")))?;

        pages.push(PageText {
            number: page_no,
            text,
            images: page_images(document, page_id, page_no),
        });
    }

    Ok(pages)
}

fn page_images(document: &Document, page_id: ObjectId, page_no: u32) -> Vec<ImagePayload> {
    let Some(xobjects) = page_xobjects(document, page_id) else {
        return Vec::new();
    };

    let content = match document
        .get_page_content(page_id)
        .and_then(|data| Content::decode(&data))
    {
        Ok(content) => content,
        Err(error) => {
            warn!(page = page_no, %error, "could not decode page content, skipping images");
            return Vec::new();
        }
    };

    let mut images = Vec::new();
    for operation in content.operations.iter().filter(|op| op.operator == "Do") {
        let Some(name) = operation.operands.first().and_then(|operand| operand.as_name().ok()) else {
            continue;
        };
        let Some(stream) = xobjects
            .get(name)
            .ok()
            .and_then(|object| resolve_stream(document, object))
        else {
            continue;
        };

        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|subtype| subtype == b"Image")
            .unwrap_or(false);
        if !is_image {
            continue;
        }

        match image_payload(stream) {
            Ok(payload) => images.push(payload),
            Err(error) => warn!(
                page = page_no,
                image = %String::from_utf8_lossy(name),
                %error,
                "unsupported embedded image, skipping OCR"
            ),
        }
    }

    debug!(page = page_no, count = images.len(), "collected page images");
    images
}

/// Looks up the page's XObject resources, following `Parent` for inherited resources.
fn page_xobjects<'a>(document: &'a Document, page_id: ObjectId) -> Option<&'a Dictionary> {
    let mut node = document.get_dictionary(page_id).ok();
    while let Some(dictionary) = node {
        if let Some(resources) = dictionary
            .get(b"Resources")
            .ok()
            .and_then(|object| resolve_dict(document, object))
        {
            return resources
                .get(b"XObject")
                .ok()
                .and_then(|object| resolve_dict(document, object));
        }
        node = dictionary
            .get(b"Parent")
            .and_then(Object::as_reference)
            .and_then(|parent| document.get_dictionary(parent))
            .ok();
    }
    None
}

fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match object {
        Object::Dictionary(dictionary) => Some(dictionary),
        Object::Reference(id) => document.get_dictionary(*id).ok(),
        _ => None,
    }
}

fn resolve_stream<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Stream> {
    match object {
        Object::Stream(stream) => Some(stream),
        Object::Reference(id) => document.get_object(*id).and_then(Object::as_stream).ok(),
        _ => None,
    }
}

fn stream_filters(stream: &Stream) -> Vec<Vec<u8>> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok().map(|name| name.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

fn image_payload(stream: &Stream) -> Result<ImagePayload, IngestError> {
    let filters = stream_filters(stream);
    match filters.as_slice() {
        [only] if only.as_slice() == b"DCTDecode" => {
            return Ok(ImagePayload {
                bytes: stream.content.clone(),
                extension: "jpg",
            })
        }
        [only] if only.as_slice() == b"JPXDecode" => {
            return Ok(ImagePayload {
                bytes: stream.content.clone(),
                extension: "jp2",
            })
        }
        _ => {}
    }

    let samples = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream
            .decompressed_content()
            .map_err(|error| IngestError::OcrFailed(format!("cannot decode image stream: {error}")))?
    };

    let dimension = |key: &[u8]| -> Result<usize, IngestError> {
        stream
            .dict
            .get(key)
            .and_then(Object::as_i64)
            .ok()
            .and_then(|value| usize::try_from(value).ok())
            .filter(|value| *value > 0)
            .ok_or_else(|| {
                IngestError::OcrFailed(format!(
                    "image is missing {}",
                    String::from_utf8_lossy(key)
                ))
            })
    };
    let width = dimension(&b"Width"[..])?;
    let height = dimension(&b"Height"[..])?;

    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    if bits != 8 {
        return Err(IngestError::OcrFailed(format!(
            "{bits}-bit images are not supported"
        )));
    }

    let (magic, channels, extension) = match stream.dict.get(b"ColorSpace").and_then(Object::as_name) {
        Ok(b"DeviceGray") => ("P5", 1, "pgm"),
        Ok(b"DeviceRGB") => ("P6", 3, "ppm"),
        _ => {
            return Err(IngestError::OcrFailed(
                "only DeviceGray and DeviceRGB raw images are supported".to_string(),
            ))
        }
    };

    let expected = width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(channels))
        .ok_or_else(|| {
            IngestError::OcrFailed(format!("image size {width}x{height} is out of range"))
        })?;
    if samples.len() < expected {
        return Err(IngestError::OcrFailed(format!(
            "image data has {} bytes, expected {expected}",
            samples.len()
        )));
    }

    let mut bytes = format!("{magic}\n{width} {height}\n255\n").into_bytes();
    bytes.extend_from_slice(&samples[..expected]);
    Ok(ImagePayload { bytes, extension })
}

/// Turns files into ordered, located text lines.
pub struct DocumentParser {
    extractor: Box<dyn PdfExtractor>,
    ocr: Box<dyn OcrEngine>,
}

impl DocumentParser {
    pub fn new(ocr: Box<dyn OcrEngine>) -> Self {
        Self::with_extractor(Box::new(LopdfExtractor), ocr)
    }

    pub fn with_extractor(extractor: Box<dyn PdfExtractor>, ocr: Box<dyn OcrEngine>) -> Self {
        Self { extractor, ocr }
    }

    pub fn parse(&self, path: &Path) -> Result<Vec<TextLine>, IngestError> {
        let format = DocumentFormat::from_path(path)?;
        let file = file_name(path)?;

        match format {
            DocumentFormat::PlainText => {
                let content = std::fs::read_to_string(path)?;
                Ok(numbered_lines(&content, &file, 1, LineRef::Text))
            }
            DocumentFormat::Pdf => {
                let pages = self.extractor.extract_pages(path)?;
                Ok(self.lines_from_pages(path, &file, &pages))
            }
        }
    }

    fn lines_from_pages(&self, path: &Path, file: &str, pages: &[PageText]) -> Vec<TextLine> {
        let mut lines = Vec::new();
        for page in pages {
            lines.extend(numbered_lines(&page.text, file, page.number, LineRef::Text));

            for image in &page.images {
                match self.ocr.recognize(image, path, page.number) {
                    Ok(text) => {
                        lines.extend(numbered_lines(&text, file, page.number, LineRef::image))
                    }
                    Err(error) => warn!(
                        file = %file,
                        page = page.number,
                        %error,
                        "OCR failed, image contributes no lines"
                    ),
                }
            }
        }
        lines
    }
}

pub fn file_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

/// Numbers every line from 1 (blank ones included) and keeps the non-blank ones.
fn numbered_lines(text: &str, file: &str, page: u32, line_ref: fn(u32) -> LineRef) -> Vec<TextLine> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return None;
            }
            Some(TextLine {
                text: trimmed.to_string(),
                locator: Locator {
                    file: file.to_string(),
                    page,
                    line: line_ref(index as u32 + 1),
                },
            })
        })
        .collect()
}

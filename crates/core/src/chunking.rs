use crate::error::IngestError;
use crate::models::{Chunk, IngestionOptions, TextLine};
use regex::Regex;
use std::collections::VecDeque;

/// Boundaries tried from coarsest to finest: paragraph, line, sentence, word.
/// Text with none of them falls back to a hard character cut.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IngestionOptions::default())
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max_chars {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Recursive boundary-aware splitter. Lengths are counted in chars, not bytes.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: ChunkingConfig,
    separators: Vec<Regex>,
}

impl TextSplitter {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let separators = SEPARATORS
            .iter()
            .map(|separator| Regex::new(&regex::escape(separator)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { config, separators })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.config.max_chars {
            return vec![text.to_string()];
        }
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[Regex]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|separator| separator.is_match(text));

        let (pieces, finer) = match position {
            Some(index) => (
                split_after_matches(text, &separators[index]),
                &separators[index + 1..],
            ),
            None => (split_chars(text), &separators[separators.len()..]),
        };
        let hard_cut = position.is_none();

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.config.max_chars {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge_pieces(&pending));
                pending.clear();
            }

            if hard_cut {
                push_trimmed(&mut chunks, piece);
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge_pieces(&pending));
        }

        chunks
    }

    /// Greedily packs pieces into chunks of at most `max_chars`, carrying up to
    /// `overlap_chars` worth of trailing pieces into the next chunk.
    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let max = self.config.max_chars;
        let overlap = self.config.overlap_chars;

        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > max && !window.is_empty() {
                push_trimmed(&mut chunks, &window.iter().copied().collect::<String>());

                while total > overlap || (total + len > max && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            window.push_back(piece);
            total += len;
        }

        push_trimmed(&mut chunks, &window.iter().copied().collect::<String>());
        chunks
    }
}

/// Splits a list of extracted lines into chunks, each carrying its line's locator.
pub fn build_chunks(lines: &[TextLine], splitter: &TextSplitter) -> Vec<Chunk> {
    lines
        .iter()
        .flat_map(|line| {
            splitter
                .split_text(&line.text)
                .into_iter()
                .map(|text| Chunk {
                    text,
                    locator: line.locator.clone(),
                })
        })
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Splits after every separator match so each separator stays with the piece it ends.
fn split_after_matches<'a>(text: &'a str, separator: &Regex) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;

    for found in separator.find_iter(text) {
        if found.end() > start {
            pieces.push(&text[start..found.end()]);
            start = found.end();
        }
    }

    if start < text.len() {
        pieces.push(&text[start..]);
    }

    pieces
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(index, ch)| &text[index..index + ch.len_utf8()])
        .collect()
}

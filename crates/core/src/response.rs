use crate::models::{Answer, Citation, QueryHit};

pub const NOT_FOUND_MESSAGE: &str = "No relevant information found in the provided files.";

/// Builds the answer text and citations for a query from its retrieved hits.
///
/// Hits become a bulleted list with one citation each, in retrieval order. With
/// no hits, a query naming an uploaded file gets [`NOT_FOUND_MESSAGE`] and no
/// citations; any other query gets a generated fallback cited as `AI-generated`.
pub fn assemble(query: &str, hits: &[QueryHit], is_file_specific: bool) -> Answer {
    if hits.is_empty() {
        return if is_file_specific {
            Answer {
                text: NOT_FOUND_MESSAGE.to_string(),
                citations: Vec::new(),
            }
        } else {
            Answer {
                text: format!("Generated response for: {query} (using local model, no external data)"),
                citations: vec![Citation::ai_generated()],
            }
        };
    }

    let text = hits
        .iter()
        .map(|hit| format!("- {}", hit.chunk.text))
        .collect::<Vec<_>>()
        .join("\n");
    let citations = hits
        .iter()
        .map(|hit| Citation::from(&hit.chunk.locator))
        .collect();

    Answer { text, citations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, LineRef, Locator, AI_GENERATED_SOURCE};

    fn hit(text: &str, page: u32, line: LineRef) -> QueryHit {
        QueryHit {
            chunk: Chunk {
                text: text.to_string(),
                locator: Locator {
                    file: "manual.pdf".to_string(),
                    page,
                    line,
                },
            },
            score: 0.5,
        }
    }

    #[test]
    fn hits_become_bullets_with_matching_citations() {
        let hits = vec![hit("Torque to 40 Nm", 3, LineRef::Text(7)), hit("Invoice #42", 2, LineRef::image(1))];

        let answer = assemble("torque", &hits, false);
        assert_eq!(answer.text, "- Torque to 40 Nm\n- Invoice #42");
        assert_eq!(
            answer.citations,
            vec![
                Citation {
                    source: "manual.pdf".to_string(),
                    page: Some(3),
                    line: Some(LineRef::Text(7)),
                },
                Citation {
                    source: "manual.pdf".to_string(),
                    page: Some(2),
                    line: Some(LineRef::image(1)),
                },
            ]
        );
    }

    #[test]
    fn empty_file_specific_result_has_no_citations() {
        let answer = assemble("what is in manual.pdf", &[], true);
        assert_eq!(answer.text, NOT_FOUND_MESSAGE);
        assert!(answer.citations.is_empty());
    }

    #[test]
    fn empty_general_result_falls_back_to_generated_answer() {
        let answer = assemble("capital of France", &[], false);
        assert!(answer.text.contains("capital of France"));
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].source, AI_GENERATED_SOURCE);
        assert_eq!(answer.citations[0].page, None);
        assert_eq!(answer.citations[0].line, None);
    }
}

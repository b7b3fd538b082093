use crate::database::ScoredChunk;
use crate::retrieval::{ChatTurn, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write;

/// Sentence the model must give when the context lacks the answer
pub const NOT_IN_DOCUMENTS: &str = "This information is not available in the uploaded documents.";
pub const NO_DOCUMENTS: &str = "No documents uploaded yet.";
pub const NO_RELEVANT_CONTENT: &str = "No relevant content found.";

/// How many recent history messages go into the prompt
const HISTORY_TURNS: usize = 4;

/// Answer to a question, with the passages it was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
}

impl Answer {
    pub fn no_documents() -> Self {
        Answer {
            answer: NO_DOCUMENTS.to_string(),
            sources: Vec::new(),
        }
    }

    pub fn no_relevant_content() -> Self {
        Answer {
            answer: NO_RELEVANT_CONTENT.to_string(),
            sources: Vec::new(),
        }
    }
}

/// Render the selected chunks as a labelled context block
pub fn render_context(chunks: &[ScoredChunk]) -> String {
    chunks.iter().fold(String::new(), |mut context, scored| {
        let _ = write!(
            context,
            "[Source: {} | Page: {}]\n{}\n\n",
            scored.chunk.source, scored.chunk.page, scored.chunk.text
        );
        context
    })
}

/// Render the last few history messages as `User:` / `Assistant:` lines
pub fn render_history(history: &[ChatTurn]) -> String {
    let recent = &history[history.len().saturating_sub(HISTORY_TURNS)..];
    recent.iter().fold(String::new(), |mut text, turn| {
        let speaker = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        let _ = writeln!(text, "{}: {}", speaker, turn.content);
        text
    })
}

/// Build the grounded prompt sent to the language model
pub fn build_prompt(question: &str, history: &[ChatTurn], chunks: &[ScoredChunk]) -> String {
    format!(
        "You are a helpful assistant that answers questions strictly based on the provided document context.

RULES:
- Answer ONLY using the context below.
- If the answer is not found in the context, say exactly: \"{fallback}\"
- Do NOT make up or guess any information.
- Be clear and concise.

CONVERSATION HISTORY:
{history}

CONTEXT:
{context}

QUESTION:
{question}

ANSWER:",
        fallback = NOT_IN_DOCUMENTS,
        history = render_history(history),
        context = render_context(chunks),
        question = question,
    )
}

/// One citation per chunk, duplicates dropped, first occurrence kept
pub fn citations(chunks: &[ScoredChunk]) -> Vec<String> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .map(|scored| {
            format!(
                "{} — Page {} (score: {})",
                scored.chunk.source,
                scored.chunk.page,
                format_score(scored.score)
            )
        })
        .filter(|citation| seen.insert(citation.clone()))
        .collect()
}

/// Whole numbers keep one decimal place, e.g. `2.0`
fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{:.1}", score)
    } else {
        score.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunk;

    fn scored(source: &str, page: u32, text: &str, score: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                text: text.to_string(),
                page,
                source: source.to_string(),
                chunk_index: 0,
            },
            score,
        }
    }

    #[test]
    fn test_context_block_format() {
        let chunks = vec![
            scored("a.pdf", 3, "First passage", 0.5),
            scored("b.txt", 1, "Second passage", 0.7),
        ];
        assert_eq!(
            render_context(&chunks),
            "[Source: a.pdf | Page: 3]\nFirst passage\n\n[Source: b.txt | Page: 1]\nSecond passage\n\n"
        );
    }

    #[test]
    fn test_history_keeps_last_four_turns() {
        let history = vec![
            ChatTurn::user("one"),
            ChatTurn::assistant("two"),
            ChatTurn::user("three"),
            ChatTurn::assistant("four"),
            ChatTurn::user("five"),
        ];
        assert_eq!(
            render_history(&history),
            "Assistant: two\nUser: three\nAssistant: four\nUser: five\n"
        );
        assert_eq!(render_history(&[]), "");
    }

    #[test]
    fn test_prompt_contains_rules_and_sections() {
        let chunks = vec![scored("manual.pdf", 2, "Press the red button.", 0.1)];
        let history = vec![ChatTurn::user("How do I start it?")];
        let prompt = build_prompt("How do I start it?", &history, &chunks);

        assert!(prompt.contains(
            "say exactly: \"This information is not available in the uploaded documents.\""
        ));
        assert!(prompt.contains("CONVERSATION HISTORY:\nUser: How do I start it?\n"));
        assert!(prompt.contains("CONTEXT:\n[Source: manual.pdf | Page: 2]\nPress the red button.\n\n"));
        assert!(prompt.ends_with("QUESTION:\nHow do I start it?\n\nANSWER:"));
    }

    #[test]
    fn test_citations_are_deduplicated_in_order() {
        let chunks = vec![
            scored("a.pdf", 1, "x", 0.25),
            scored("b.pdf", 4, "y", 0.5),
            scored("a.pdf", 1, "z", 0.25),
            scored("a.pdf", 1, "w", 0.3),
        ];
        assert_eq!(
            citations(&chunks),
            vec![
                "a.pdf — Page 1 (score: 0.25)".to_string(),
                "b.pdf — Page 4 (score: 0.5)".to_string(),
                "a.pdf — Page 1 (score: 0.3)".to_string(),
            ]
        );
    }

    #[test]
    fn test_whole_scores_keep_a_decimal() {
        assert_eq!(format_score(1.0), "1.0");
        assert_eq!(format_score(0.0), "0.0");
        assert_eq!(format_score(0.1235), "0.1235");
    }

    #[test]
    fn test_short_circuit_answers_serialize() {
        let json = serde_json::to_string(&Answer::no_documents()).unwrap();
        assert_eq!(json, r#"{"answer":"No documents uploaded yet.","sources":[]}"#);

        let json = serde_json::to_string(&Answer::no_relevant_content()).unwrap();
        assert_eq!(json, r#"{"answer":"No relevant content found.","sources":[]}"#);
    }
}

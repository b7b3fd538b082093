use crate::database::ScoredChunk;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How many nearest neighbours are fetched for a question
pub const CANDIDATE_POOL: usize = 30;
/// How many chunks end up in the prompt
pub const CONTEXT_CHUNKS: usize = 5;

const VOTE_EPSILON: f64 = 1e-6;
const MIN_NAME_WORD_LEN: usize = 3;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the chat history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        ChatTurn {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatTurn {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Guess which document a question is about from the words in its file name.
///
/// Each name is stripped of its extension, lower-cased and split on runs of
/// whitespace, `-` and `_`; words shorter than three characters are ignored.
/// A document scores one point per name word found inside the lower-cased
/// question. Only a strictly higher score replaces the current best, so ties go
/// to the document listed first in `catalog`. Nothing is returned unless some
/// document scores at least one point.
pub fn detect_target<'a>(question: &str, catalog: &'a [String]) -> Option<&'a str> {
    let question = question.to_lowercase();
    let mut best: Option<&str> = None;
    let mut best_score = 0;

    for source in catalog {
        let score = name_words(source)
            .iter()
            .filter(|word| question.contains(word.as_str()))
            .count();
        if score > best_score {
            best_score = score;
            best = Some(source.as_str());
        }
    }

    best
}

/// Lower-cased words of a file name without its extension
fn name_words(source: &str) -> Vec<String> {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(source)
        .to_lowercase();

    stem.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|word| word.chars().count() >= MIN_NAME_WORD_LEN)
        .map(str::to_string)
        .collect()
}

/// Build the text that gets embedded for the search.
///
/// `history` is the conversation as the caller sends it, ending with the
/// message being answered. Once it holds at least two messages, the latest
/// earlier user message is prepended so follow-up questions keep their subject.
pub fn build_search_query(question: &str, history: &[ChatTurn]) -> String {
    if history.len() < 2 {
        return question.to_string();
    }

    let previous = &history[..history.len() - 1];
    match previous.iter().rev().find(|turn| turn.role == Role::User) {
        Some(turn) => format!("{} {}", turn.content, question),
        None => question.to_string(),
    }
}

/// Round a distance to four decimal places
pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Narrow the candidate pool down to the chunks used as context.
///
/// With a target document, its chunks are kept; if none made the pool, the
/// closest chunks overall are used instead. Without one, the closest chunks
/// vote for their document with weight `1 / (distance + 1e-6)` and the
/// winner's chunks from the whole pool are kept. At most [`CONTEXT_CHUNKS`]
/// chunks are returned, closest first.
pub fn select_chunks(candidates: &[ScoredChunk], target: Option<&str>) -> Vec<ScoredChunk> {
    let top = &candidates[..candidates.len().min(CONTEXT_CHUNKS)];

    let document = match target {
        Some(target) => target,
        None => match vote_document(top) {
            Some(winner) => {
                debug!("Closest chunks point to {}", winner);
                winner
            }
            None => return top.to_vec(),
        },
    };

    let scoped: Vec<ScoredChunk> = candidates
        .iter()
        .filter(|candidate| candidate.chunk.source == document)
        .take(CONTEXT_CHUNKS)
        .cloned()
        .collect();

    if scoped.is_empty() {
        debug!("No candidates from {}, using closest chunks", document);
        top.to_vec()
    } else {
        scoped
    }
}

/// Document with the largest summed inverse distance; first seen wins ties
fn vote_document(candidates: &[ScoredChunk]) -> Option<&str> {
    let mut weights: Vec<(&str, f64)> = Vec::new();
    for candidate in candidates {
        let weight = 1.0 / (candidate.score + VOTE_EPSILON);
        let source = candidate.chunk.source.as_str();
        match weights.iter_mut().find(|(name, _)| *name == source) {
            Some((_, total)) => *total += weight,
            None => weights.push((source, weight)),
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for (source, weight) in weights {
        if best.map_or(true, |(_, top)| weight > top) {
            best = Some((source, weight));
        }
    }
    best.map(|(source, _)| source)
}

use crate::document::Segment;
use serde::{Deserialize, Serialize};

/// Separators tried in order: paragraph, line, sentence, word, character
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Represents a text chunk with its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The actual text content of this chunk
    pub text: String,
    /// 1-based page of the segment the chunk came from
    pub page: u32,
    /// Original file name of the document this chunk belongs to
    pub source: String,
    /// 0-based position of this chunk within its segment
    pub chunk_index: usize,
}

/// Size settings for the recursive splitter, in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        SplitterConfig {
            chunk_size: 700,
            chunk_overlap: 100,
        }
    }
}

/// Split every segment into overlapping chunks, keeping page and source.
pub fn chunk_segments(segments: &[Segment], config: SplitterConfig) -> Vec<Chunk> {
    segments
        .iter()
        .flat_map(|segment| {
            split_text(&segment.text, config)
                .into_iter()
                .enumerate()
                .map(|(chunk_index, text)| Chunk {
                    text,
                    page: segment.page,
                    source: segment.source.clone(),
                    chunk_index,
                })
        })
        .collect()
}

/// Split text into chunks of at most `chunk_size` characters.
///
/// Pieces are cut at the coarsest separator present in the text; pieces that
/// are still too long are split again with the next separator down. Each
/// separator stays at the front of the piece that follows it, so no text is
/// lost. Adjacent pieces are merged back up to the chunk size, and each new
/// chunk starts with up to `chunk_overlap` characters carried over from the
/// end of the previous one.
pub fn split_text(text: &str, config: SplitterConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: SplitterConfig) -> Vec<String> {
    // Coarsest separator that occurs in the text; "" always matches
    let (position, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
        .map(|(i, sep)| (i, *sep))
        .unwrap_or((separators.len(), ""));
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        let mut parts = text.split(separator);
        parts
            .next()
            .map(str::to_string)
            .into_iter()
            .chain(parts.map(|part| format!("{}{}", separator, part)))
            .filter(|piece| !piece.is_empty())
            .collect()
    };

    let mut chunks = Vec::new();
    let mut fitting = Vec::new();

    for piece in pieces {
        if char_len(&piece) < config.chunk_size {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            chunks.extend(merge_pieces(&fitting, config));
            fitting.clear();
        }

        if separator.is_empty() || finer.is_empty() {
            chunks.push(piece);
        } else {
            chunks.extend(split_recursive(&piece, finer, config));
        }
    }

    if !fitting.is_empty() {
        chunks.extend(merge_pieces(&fitting, config));
    }

    chunks
}

/// Greedily join pieces into chunks, carrying the overlap window forward.
/// Pieces already hold their separators, so they are concatenated as-is.
fn merge_pieces(pieces: &[String], config: SplitterConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: Vec<&str> = Vec::new();
    let mut total = 0;

    for piece in pieces {
        let piece_len = char_len(piece);

        if total + piece_len > config.chunk_size && !window.is_empty() {
            push_trimmed(&mut chunks, &window.concat());

            // Drop from the front until what is left fits as overlap
            while !window.is_empty()
                && (total > config.chunk_overlap || total + piece_len > config.chunk_size)
            {
                total -= char_len(window[0]);
                window.remove(0);
            }
        }

        window.push(piece);
        total += piece_len;
    }

    if !window.is_empty() {
        push_trimmed(&mut chunks, &window.concat());
    }

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str, page: u32) -> Segment {
        Segment {
            text: text.to_string(),
            page,
            source: "guide.txt".to_string(),
        }
    }

    /// Length of the longest prefix of `next` that `previous` ends with
    fn overlap_len(previous: &str, next: &str) -> usize {
        let next_chars: Vec<char> = next.chars().collect();
        (1..=next_chars.len())
            .rev()
            .find(|&k| {
                let prefix: String = next_chars[..k].iter().collect();
                previous.ends_with(&prefix)
            })
            .unwrap_or(0)
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = split_text("A short note.", SplitterConfig::default());
        assert_eq!(chunks, vec!["A short note.".to_string()]);
    }

    #[test]
    fn test_chunks_respect_size_and_overlap() {
        let text = (0..400)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let config = SplitterConfig::default();
        let chunks = split_text(&text, config);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= config.chunk_size);
            assert!(!chunk.is_empty());
        }
        for pair in chunks.windows(2) {
            let shared = overlap_len(&pair[0], &pair[1]);
            assert!(shared > 0, "consecutive chunks must overlap");
            assert!(shared <= config.chunk_overlap);
            // Words are at most 7 characters, so the window fills close to the limit
            assert!(shared >= config.chunk_overlap - 10);
        }
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let first = "alpha ".repeat(80);
        let second = "beta ".repeat(80);
        let text = format!("{}\n\n{}", first.trim(), second.trim());
        let chunks = split_text(&text, SplitterConfig::default());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], first.trim());
        assert_eq!(chunks[1], second.trim());
    }

    #[test]
    fn test_words_are_not_severed() {
        let text = "tokenization ".repeat(200);
        let chunks = split_text(&text, SplitterConfig::default());
        for chunk in chunks {
            assert!(chunk.split(' ').all(|word| word == "tokenization"));
        }
    }

    #[test]
    fn test_unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(1500);
        let config = SplitterConfig {
            chunk_size: 700,
            chunk_overlap: 100,
        };
        let chunks = split_text(&text, config);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| char_len(c) <= 700));
    }

    #[test]
    fn test_chunk_index_restarts_per_segment() {
        let long = (0..300)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let segments = vec![segment(&long, 1), segment("tiny page", 2)];
        let chunks = chunk_segments(&segments, SplitterConfig::default());

        let first_page: Vec<&Chunk> = chunks.iter().filter(|c| c.page == 1).collect();
        assert!(first_page.len() > 1);
        for (i, chunk) in first_page.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.source, "guide.txt");
        }

        let last = chunks.last().unwrap();
        assert_eq!(last.page, 2);
        assert_eq!(last.chunk_index, 0);
        assert_eq!(last.text, "tiny page");
    }

    #[test]
    fn test_sentence_boundaries_lose_no_text() {
        let text = (0..40)
            .map(|i| format!("Sentence {} describes the warranty terms", i))
            .collect::<Vec<_>>()
            .join(". ")
            + ".";
        let chunks = split_text(&text, SplitterConfig::default());
        assert!(chunks.len() > 1);

        let mut rebuilt = chunks[0].clone();
        for pair in chunks.windows(2) {
            let shared = overlap_len(&pair[0], &pair[1]);
            rebuilt.push_str(&pair[1][shared..]);
        }
        assert_eq!(rebuilt, text);
        assert_eq!(rebuilt.matches('.').count(), 40);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = "Sentence one. Sentence two.\nAnother line.\n\nNew paragraph. ".repeat(40);
        let config = SplitterConfig::default();
        assert_eq!(split_text(&text, config), split_text(&text, config));
    }
}

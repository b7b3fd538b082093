use crate::error::RagError;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use mime_guess::mime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Characters per page-like block for formats without real pages
pub const PAGE_SIZE: usize = 3000;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const DOC_MIME: &str = "application/msword";

/// A page-like run of text taken from one source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    /// 1-based page (PDF) or block index (text, word processor)
    pub page: u32,
    /// Original file name of the document
    pub source: String,
}

/// File formats the extractor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    PlainText,
    WordProcessor,
}

impl DocumentFormat {
    /// Classify a document by the extension of its original file name.
    pub fn from_filename(filename: &str) -> Result<Self, RagError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let unsupported = || RagError::UnsupportedFormat {
            extension: if extension.is_empty() {
                String::new()
            } else {
                format!(".{}", extension)
            },
        };

        if extension.is_empty() {
            return Err(unsupported());
        }

        let mime = mime_guess::from_ext(&extension)
            .first()
            .ok_or_else(unsupported)?;
        debug!("Detected MIME type for {}: {}", filename, mime);

        match mime.essence_str() {
            essence if essence == mime::APPLICATION_PDF.essence_str() => Ok(DocumentFormat::Pdf),
            essence if essence == mime::TEXT_PLAIN.essence_str() && extension == "txt" => {
                Ok(DocumentFormat::PlainText)
            }
            DOCX_MIME | DOC_MIME => Ok(DocumentFormat::WordProcessor),
            _ => Err(unsupported()),
        }
    }
}

/// Extract the page-like segments of a document.
///
/// `path` is where the bytes live (possibly a temporary file); `filename` is
/// the original name, which decides the format and becomes the segment source.
pub fn extract<P: AsRef<Path>>(path: P, filename: &str) -> Result<Vec<Segment>> {
    let path = path.as_ref();
    let format = DocumentFormat::from_filename(filename)?;

    let segments = match format {
        DocumentFormat::Pdf => {
            info!("Processing PDF document: {}", filename);
            let pages = pdf_extract::extract_text_by_pages(path)
                .with_context(|| format!("Failed to extract text from PDF: {}", filename))?;
            pdf_segments(pages, filename)
        }
        DocumentFormat::PlainText => {
            info!("Processing text document: {}", filename);
            let bytes = fs::read(path)
                .with_context(|| format!("Failed to read text file: {}", path.display()))?;
            text_segments(&String::from_utf8_lossy(&bytes), filename)
        }
        DocumentFormat::WordProcessor => {
            info!("Processing word document: {}", filename);
            let paragraphs = read_docx_paragraphs(path)
                .with_context(|| format!("Failed to read word document: {}", filename))?;
            paragraph_segments(paragraphs, filename)
        }
    };

    if segments.is_empty() {
        warn!("No text could be extracted from {}", filename);
    }

    Ok(segments)
}

/// One segment per page that has any text on it
fn pdf_segments(pages: Vec<String>, filename: &str) -> Vec<Segment> {
    pages
        .into_iter()
        .zip(1..)
        .filter_map(|(text, page)| {
            let text = normalize_whitespace(&text);
            (!text.is_empty()).then(|| Segment {
                text,
                page,
                source: filename.to_string(),
            })
        })
        .collect()
}

/// Fixed-size character windows over the whole text
fn text_segments(text: &str, filename: &str) -> Vec<Segment> {
    let chars: Vec<char> = text.chars().collect();

    chars
        .chunks(PAGE_SIZE)
        .zip(1..)
        .filter_map(|(window, page)| {
            let window: String = window.iter().collect();
            let trimmed = window.trim();
            (!trimmed.is_empty()).then(|| Segment {
                text: trimmed.to_string(),
                page,
                source: filename.to_string(),
            })
        })
        .collect()
}

/// Accumulate paragraphs until a block reaches the page size
fn paragraph_segments<I>(paragraphs: I, filename: &str) -> Vec<Segment>
where
    I: IntoIterator<Item = String>,
{
    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut buffer_chars = 0;
    let mut page = 1;

    for paragraph in paragraphs {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        buffer.push_str(paragraph);
        buffer.push('\n');
        buffer_chars += paragraph.chars().count() + 1;

        if buffer_chars >= PAGE_SIZE {
            segments.push(Segment {
                text: buffer.trim().to_string(),
                page,
                source: filename.to_string(),
            });
            buffer.clear();
            buffer_chars = 0;
            page += 1;
        }
    }

    if !buffer.trim().is_empty() {
        segments.push(Segment {
            text: buffer.trim().to_string(),
            page,
            source: filename.to_string(),
        });
    }

    segments
}

/// Read the paragraphs of a .docx file in document order
fn read_docx_paragraphs(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open word document: {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("Not a valid .docx archive")?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("Archive has no word/document.xml part")?
        .read_to_string(&mut xml)?;

    docx_paragraphs(&xml)
}

/// Pull paragraph text out of WordprocessingML.
///
/// One ordered pass over the tags: run text, tabs and line breaks land in the
/// innermost open paragraph. A paragraph nested in a text box is emitted on
/// its own when it closes, and the outer paragraph carries on.
fn docx_paragraphs(xml: &str) -> Result<Vec<String>> {
    let token_re = Regex::new(
        r"<w:t(?:\s[^>]*)?>(?P<text>[^<]*)</w:t>|<(?P<close>/)?w:(?P<name>p|r|tab|br|cr)(?P<attrs>(?:[\s/][^>]*)?)>",
    )?;
    let entity_re = Regex::new(r"&(#[xX][0-9A-Fa-f]+|#[0-9]+|lt|gt|quot|apos|amp);")?;

    let mut paragraphs = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut run_depth = 0usize;

    for caps in token_re.captures_iter(xml) {
        if let Some(text) = caps.name("text") {
            if let Some(current) = open.last_mut() {
                current.push_str(&unescape_xml(&entity_re, text.as_str()));
            }
            continue;
        }

        let closing = caps.name("close").is_some();
        let attrs = caps.name("attrs").map_or("", |m| m.as_str());
        let self_closing = attrs.ends_with('/');
        let in_run = run_depth > 0;

        let emitted = match (caps.name("name").map(|m| m.as_str()), closing) {
            (Some("p"), false) if !self_closing => {
                open.push(String::new());
                None
            }
            (Some("p"), true) => {
                if let Some(paragraph) = open.pop() {
                    paragraphs.push(paragraph);
                }
                None
            }
            (Some("r"), false) if !self_closing => {
                run_depth += 1;
                None
            }
            (Some("r"), true) => {
                run_depth = run_depth.saturating_sub(1);
                None
            }
            // Tab stops in paragraph properties also use <w:tab>, only runs count
            (Some("tab"), false) if in_run => Some('\t'),
            (Some("br"), false) if in_run && is_line_break(attrs) => Some('\n'),
            (Some("cr"), false) if in_run => Some('\n'),
            _ => None,
        };

        if let (Some(c), Some(current)) = (emitted, open.last_mut()) {
            current.push(c);
        }
    }

    Ok(paragraphs)
}

/// Page and column breaks carry no text
fn is_line_break(attrs: &str) -> bool {
    !attrs.contains("w:type=") || attrs.contains("textWrapping")
}

/// Decode the predefined entities and numeric character references
fn unescape_xml(entity_re: &Regex, text: &str) -> String {
    entity_re
        .replace_all(text, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "amp" => Some('&'),
                _ => match entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => entity.strip_prefix('#').and_then(|dec| dec.parse().ok()),
                }
                .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    // Cap newline runs at a paragraph break
    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
        } else {
            if newline_count > 0 {
                if newline_count >= 2 {
                    normalized.push_str("\n\n");
                } else {
                    normalized.push('\n');
                }
                newline_count = 0;
            }

            if !(c == ' ' && prev_char == ' ') {
                normalized.push(c);
            }

            prev_char = c;
        }
    }

    normalized.trim().to_string()
}

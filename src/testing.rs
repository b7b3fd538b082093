//! Deterministic stand-ins for the external embedding and generation services.

use crate::embeddings::{Embedder, Embedding};
use crate::error::RagError;
use crate::llm::LanguageModel;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One dimension per vocabulary word, valued by how often the word occurs
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    embedded: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        KeywordEmbedder {
            vocabulary: vocabulary.iter().map(|w| w.to_string()).collect(),
            embedded: AtomicUsize::new(0),
        }
    }

    /// Total number of texts embedded so far
    pub fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        self.vocabulary
            .iter()
            .map(|term| words.iter().filter(|w| *w == term).count() as f32)
            .collect()
    }
}

impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| Embedding {
                values: self.vector(text),
            })
            .collect())
    }
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Embedding>> {
        Err(RagError::EmbeddingFailure("service rejected input".to_string()).into())
    }
}

/// Remembers every prompt and answers with a canned reply
pub struct RecordingModel {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingModel {
    pub fn new(reply: &str) -> Self {
        RecordingModel {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl LanguageModel for RecordingModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        Ok(self.reply.clone())
    }
}

pub struct FailingModel;

impl LanguageModel for FailingModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(anyhow!("rate limited"))
    }
}

use crate::chunking::{chunk_segments, Chunk, SplitterConfig};
use crate::context::{build_prompt, citations, Answer};
use crate::database::{DocumentSummary, VectorStore};
use crate::document::extract;
use crate::embeddings::{embed_batch, Embedder};
use crate::llm::LanguageModel;
use crate::retrieval::{
    build_search_query, detect_target, round_score, select_chunks, ChatTurn, CANDIDATE_POOL,
};
use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;

/// A file handed over for ingestion
#[derive(Debug, Clone)]
pub struct Upload {
    /// Where the bytes are, possibly a temporary file owned by the caller
    pub path: PathBuf,
    /// Original file name; identifies the document
    pub filename: String,
}

impl Upload {
    pub fn new(path: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Upload {
            path: path.into(),
            filename: filename.into(),
        }
    }
}

/// A file that could not be ingested
#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub filename: String,
    pub error: String,
}

/// Outcome of an ingestion batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Chunks written to the store
    pub total_chunks: usize,
    /// Files whose name was already in the catalog
    pub skipped: Vec<String>,
    /// Files that failed extraction; the rest of the batch still went in
    pub failed: Vec<IngestFailure>,
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<E, L> {
    store: VectorStore,
    embedder: E,
    llm: L,
    splitter: SplitterConfig,
}

impl<E: Embedder, L: LanguageModel> RagEngine<E, L> {
    /// Create a new RAG engine
    pub fn new(store: VectorStore, embedder: E, llm: L) -> Self {
        RagEngine {
            store,
            embedder,
            llm,
            splitter: SplitterConfig::default(),
        }
    }

    pub fn with_splitter(mut self, splitter: SplitterConfig) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Extract, chunk, embed and store a batch of files.
    ///
    /// Files already in the catalog are skipped whole. A file that cannot be
    /// extracted is recorded in the report and the others carry on. Embedding
    /// or store failures abort the batch before anything is written.
    pub async fn ingest(&self, uploads: &[Upload]) -> Result<IngestReport> {
        let mut known: HashSet<String> = self
            .store
            .load()?
            .map(|snapshot| snapshot.catalog().into_iter().collect())
            .unwrap_or_default();

        let mut report = IngestReport::default();
        let mut new_chunks: Vec<Chunk> = Vec::new();

        for upload in uploads {
            if known.contains(&upload.filename) {
                info!("Skipping {}, already ingested", upload.filename);
                report.skipped.push(upload.filename.clone());
                continue;
            }

            match extract(&upload.path, &upload.filename) {
                Ok(segments) => {
                    let chunks = chunk_segments(&segments, self.splitter);
                    info!(
                        "Split {} into {} chunks across {} pages",
                        upload.filename,
                        chunks.len(),
                        segments.len()
                    );
                    new_chunks.extend(chunks);
                    known.insert(upload.filename.clone());
                }
                Err(e) => {
                    warn!("Could not ingest {}: {:#}", upload.filename, e);
                    report.failed.push(IngestFailure {
                        filename: upload.filename.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        if new_chunks.is_empty() {
            return Ok(report);
        }

        info!("Generating embeddings for {} chunks...", new_chunks.len());
        let texts: Vec<String> = new_chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embed_batch(&self.embedder, &texts).await?;

        report.total_chunks = new_chunks.len();
        self.store.add(embeddings, new_chunks)?;

        Ok(report)
    }

    /// Documents in the store with their chunk counts
    pub fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.store.documents()
    }

    /// Remove every chunk of a document.
    ///
    /// The remaining chunks are re-embedded and the index rebuilt from them;
    /// removing the last document deletes the store. Returns `false` when the
    /// document was not there.
    pub async fn delete_document(&self, name: &str) -> Result<bool> {
        let Some(snapshot) = self.store.load()? else {
            return Ok(false);
        };

        let total = snapshot.len();
        let remaining: Vec<Chunk> = snapshot
            .chunks()
            .iter()
            .filter(|chunk| chunk.source != name)
            .cloned()
            .collect();

        if remaining.len() == total {
            debug!("{} is not in the store", name);
            return Ok(false);
        }

        info!(
            "Deleting {} ({} chunks), {} chunks remain",
            name,
            total - remaining.len(),
            remaining.len()
        );

        if remaining.is_empty() {
            self.store.clear()?;
            return Ok(true);
        }

        let texts: Vec<String> = remaining.iter().map(|c| c.text.clone()).collect();
        let embeddings = embed_batch(&self.embedder, &texts).await?;
        self.store.rebuild(embeddings, remaining)?;

        Ok(true)
    }

    /// Remove the whole store
    pub fn clear(&self) -> Result<()> {
        info!("Clearing vector store");
        self.store.clear()
    }

    /// Answer a question from the stored documents.
    ///
    /// `history` is the conversation so far, ending with the current question.
    /// `target_doc` restricts retrieval to one document; without it the
    /// document is guessed from the question.
    pub async fn answer_question(
        &self,
        question: &str,
        history: &[ChatTurn],
        target_doc: Option<&str>,
    ) -> Result<Answer> {
        let Some(snapshot) = self.store.load()? else {
            return Ok(Answer::no_documents());
        };

        let catalog = snapshot.catalog();
        let target = target_doc.or_else(|| detect_target(question, &catalog));
        debug!("Target document: {:?}", target);

        let search_query = build_search_query(question, history);
        let query_embedding = self.embedder.embed_query(&search_query).await?;

        let mut candidates = snapshot.search(&query_embedding.values, CANDIDATE_POOL)?;
        if candidates.is_empty() {
            return Ok(Answer::no_relevant_content());
        }
        for candidate in &mut candidates {
            candidate.score = round_score(candidate.score);
        }

        let selected = select_chunks(&candidates, target);
        let prompt = build_prompt(question, history, &selected);
        let answer = self.llm.complete(&prompt).await?;

        Ok(Answer {
            answer,
            sources: citations(&selected),
        })
    }

    /// Run an interactive chat that keeps its own history
    pub async fn run_chat_loop(&self, target_doc: Option<&str>) -> Result<()> {
        println!("Ask questions about your documents. Type 'exit' to quit.");

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut buffer = String::new();
        let mut history: Vec<ChatTurn> = Vec::new();

        loop {
            print!("\nYour question: ");
            stdout.flush()?;

            buffer.clear();
            if stdin.read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();
            if question.is_empty() {
                continue;
            }
            if question.eq_ignore_ascii_case("exit") {
                println!("Goodbye!");
                break;
            }

            history.push(ChatTurn::user(question));
            let answer = self.answer_question(question, &history, target_doc).await?;

            println!("\n{}", answer.answer);
            for source in &answer.sources {
                println!("  - {}", source);
            }

            history.push(ChatTurn::assistant(answer.answer));
        }

        Ok(())
    }
}

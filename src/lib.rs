pub mod chunking;
pub mod context;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod llm;
pub mod rag;
pub mod retrieval;

#[cfg(test)]
mod testing;

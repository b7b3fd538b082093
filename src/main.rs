use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::path::PathBuf;

use doc_rag::database::{StoreConfig, VectorStore};
use doc_rag::gemini::{GeminiClient, GeminiConfig};
use doc_rag::rag::{RagEngine, Upload};

/// Ask questions about your documents, answered by Gemini from the passages it retrieves
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding the vector index and metadata (defaults to RAG_STORE_DIR or .)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add documents (PDF, text, Word) to the index
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List indexed documents and their chunk counts
    Documents,
    /// Remove one document from the index
    Delete { name: String },
    /// Remove the whole index
    Clear,
    /// Ask a single question
    Ask {
        question: String,
        /// Only search this document
        #[arg(long)]
        doc: Option<String>,
    },
    /// Interactive question loop with conversation history
    Chat {
        /// Only search this document
        #[arg(long)]
        doc: Option<String>,
    },
}

fn build_engine(store: VectorStore) -> Result<RagEngine<GeminiClient, GeminiClient>> {
    let gemini_config = GeminiConfig::from_env().context("Missing GEMINI_API_KEY")?;
    let gemini = GeminiClient::new(gemini_config);
    Ok(RagEngine::new(store, gemini.clone(), gemini))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut store_config = StoreConfig::from_env();
    if let Some(dir) = args.store_dir {
        store_config.dir = dir;
    }
    info!("Using vector store in {}", store_config.dir.display());
    let store = VectorStore::new(store_config);

    match args.command {
        Command::Ingest { files } => {
            let mut uploads = Vec::with_capacity(files.len());
            for path in files {
                if !path.exists() {
                    error!("File not found: {}", path.display());
                    return Err(anyhow::anyhow!("File not found: {}", path.display()));
                }
                let filename = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .context("Invalid file name")?
                    .to_string();
                uploads.push(Upload::new(path, filename));
            }

            let engine = build_engine(store)?;
            let report = engine.ingest(&uploads).await.context("Failed to ingest files")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Documents => {
            let documents = store.documents()?;
            println!("{}", serde_json::to_string_pretty(&documents)?);
        }
        Command::Delete { name } => {
            let engine = build_engine(store)?;
            if engine.delete_document(&name).await? {
                println!("Deleted {}", name);
            } else {
                println!("No document named {}", name);
            }
        }
        Command::Clear => {
            store.clear()?;
            println!("Cleared vector store");
        }
        Command::Ask { question, doc } => {
            let engine = build_engine(store)?;
            let answer = engine
                .answer_question(&question, &[], doc.as_deref())
                .await
                .context("Failed to answer question")?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
        Command::Chat { doc } => {
            let engine = build_engine(store)?;
            engine
                .run_chat_loop(doc.as_deref())
                .await
                .context("Error in chat loop")?;
        }
    }

    Ok(())
}

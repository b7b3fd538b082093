use crate::chunking::Chunk;
use crate::embeddings::Embedding;
use crate::error::RagError;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const INDEX_FILE: &str = "vector_store.index";
const METADATA_FILE: &str = "metadata.json";

/// Where the index and metadata artifacts live
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl StoreConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Self {
        let dir = env::var("RAG_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        StoreConfig { dir }
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }
}

/// Distance used by the flat index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    SquaredEuclidean,
}

/// Raw vectors laid out back to back, `dimension` floats each
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlatIndex {
    stamp: u64,
    metric: Metric,
    dimension: usize,
    data: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct Metadata {
    stamp: u64,
    chunks: Vec<Chunk>,
}

/// A chunk returned by a search, with its distance from the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// A document in the catalog and how many chunks it has
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub name: String,
    pub chunks: usize,
}

/// The index and its metadata as loaded from disk.
///
/// `chunks[i]` describes the i-th vector of the index.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    index: FlatIndex,
    chunks: Vec<Chunk>,
}

impl StoreSnapshot {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension
    }

    pub fn metric(&self) -> Metric {
        self.index.metric
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Number of stored vectors
    pub fn vector_count(&self) -> usize {
        self.vectors().count()
    }

    /// Stored vectors in chunk order
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.index.data.chunks_exact(self.index.dimension.max(1))
    }

    /// Distinct sources in order of first appearance
    pub fn catalog(&self) -> Vec<String> {
        self.documents().into_iter().map(|doc| doc.name).collect()
    }

    /// Distinct sources with chunk counts, in order of first appearance
    pub fn documents(&self) -> Vec<DocumentSummary> {
        let mut documents: Vec<DocumentSummary> = Vec::new();
        for chunk in &self.chunks {
            match documents.iter_mut().find(|doc| doc.name == chunk.source) {
                Some(doc) => doc.chunks += 1,
                None => documents.push(DocumentSummary {
                    name: chunk.source.clone(),
                    chunks: 1,
                }),
            }
        }
        documents
    }

    /// Exact nearest neighbours by squared Euclidean distance, closest first.
    ///
    /// `k` is clamped to the number of stored vectors.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.index.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.index.dimension,
                actual: query.len(),
            }
            .into());
        }

        let mut distances: Vec<(usize, f32)> = self
            .vectors()
            .map(|vector| squared_l2(vector, query))
            .enumerate()
            .collect();
        // Stable sort keeps insertion order among equal distances
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(distances
            .into_iter()
            .take(k.min(self.len()))
            .map(|(position, distance)| ScoredChunk {
                chunk: self.chunks[position].clone(),
                score: f64::from(distance),
            })
            .collect())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Handle on the persisted vector index and its metadata.
///
/// Every mutation reads the whole pair, computes the new state, and writes both
/// files back. There is no locking; only one writer may use a directory at a time.
pub struct VectorStore {
    config: StoreConfig,
}

impl VectorStore {
    pub fn new(config: StoreConfig) -> Self {
        VectorStore { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Check if both artifacts are on disk
    pub fn exists(&self) -> bool {
        self.config.index_path().exists() && self.config.metadata_path().exists()
    }

    /// Load the persisted pair.
    ///
    /// Returns `None` when either artifact is missing, unreadable, or the two
    /// do not belong together.
    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        let index_path = self.config.index_path();
        let metadata_path = self.config.metadata_path();

        if !index_path.exists() || !metadata_path.exists() {
            debug!("No vector store in {}", self.config.dir.display());
            return Ok(None);
        }

        let index: FlatIndex = {
            let file = File::open(&index_path)
                .with_context(|| format!("Failed to open index {}", index_path.display()))?;
            match bincode::deserialize_from(BufReader::new(file)) {
                Ok(index) => index,
                Err(e) => {
                    warn!("Ignoring unreadable index {}: {}", index_path.display(), e);
                    return Ok(None);
                }
            }
        };

        let metadata: Metadata = {
            let file = File::open(&metadata_path).with_context(|| {
                format!("Failed to open metadata {}", metadata_path.display())
            })?;
            match serde_json::from_reader(BufReader::new(file)) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(
                        "Ignoring unreadable metadata {}: {}",
                        metadata_path.display(),
                        e
                    );
                    return Ok(None);
                }
            }
        };

        if index.stamp != metadata.stamp
            || index.dimension == 0
            || index.data.len() != index.dimension * metadata.chunks.len()
        {
            warn!(
                "Index and metadata in {} do not match, treating store as absent",
                self.config.dir.display()
            );
            return Ok(None);
        }

        Ok(Some(StoreSnapshot {
            index,
            chunks: metadata.chunks,
        }))
    }

    /// Distinct documents currently stored
    pub fn documents(&self) -> Result<Vec<DocumentSummary>> {
        Ok(self
            .load()?
            .map(|snapshot| snapshot.documents())
            .unwrap_or_default())
    }

    /// Nearest neighbours of `query`; empty when there is no store
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        match self.load()? {
            Some(snapshot) => snapshot.search(query, k),
            None => Ok(Vec::new()),
        }
    }

    /// Append chunks and their embeddings, creating the store if needed.
    ///
    /// Nothing is written unless every embedding matches the store's dimension.
    pub fn add(&self, embeddings: Vec<Embedding>, chunks: Vec<Chunk>) -> Result<()> {
        let dimension = batch_dimension(&embeddings, &chunks)?;
        let Some(dimension) = dimension else {
            return Ok(());
        };

        let (mut index, mut all_chunks) = match self.load()? {
            Some(snapshot) => {
                if snapshot.index.dimension != dimension {
                    return Err(RagError::DimensionMismatch {
                        expected: snapshot.index.dimension,
                        actual: dimension,
                    }
                    .into());
                }
                (snapshot.index, snapshot.chunks)
            }
            None => (
                FlatIndex {
                    stamp: 0,
                    metric: Metric::SquaredEuclidean,
                    dimension,
                    data: Vec::new(),
                },
                Vec::new(),
            ),
        };

        info!(
            "Adding {} chunks to a store of {}",
            chunks.len(),
            all_chunks.len()
        );
        for embedding in embeddings {
            index.data.extend(embedding.values);
        }
        all_chunks.extend(chunks);

        self.save(index, all_chunks)
    }

    /// Replace the whole index with a new set of embeddings.
    ///
    /// The flat index cannot drop single vectors, so removing a document goes
    /// through here with every remaining chunk re-embedded. An empty set clears
    /// the store.
    pub fn rebuild(&self, embeddings: Vec<Embedding>, chunks: Vec<Chunk>) -> Result<()> {
        let Some(dimension) = batch_dimension(&embeddings, &chunks)? else {
            return self.clear();
        };

        info!("Rebuilding vector store with {} chunks", chunks.len());
        let index = FlatIndex {
            stamp: 0,
            metric: Metric::SquaredEuclidean,
            dimension,
            data: embeddings.into_iter().flat_map(|e| e.values).collect(),
        };

        self.save(index, chunks)
    }

    /// Delete both artifacts
    pub fn clear(&self) -> Result<()> {
        for path in [self.config.index_path(), self.config.metadata_path()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", path.display()))
                }
            }
        }
        Ok(())
    }

    fn save(&self, mut index: FlatIndex, chunks: Vec<Chunk>) -> Result<()> {
        fs::create_dir_all(&self.config.dir).with_context(|| {
            format!("Failed to create store directory {}", self.config.dir.display())
        })?;

        // Both artifacts carry the same stamp so a torn write is detectable
        let stamp = new_stamp().max(index.stamp + 1);
        index.stamp = stamp;
        let metadata = Metadata { stamp, chunks };

        write_atomically(&self.config.index_path(), |writer| {
            bincode::serialize_into(writer, &index).context("Failed to encode index")
        })?;
        write_atomically(&self.config.metadata_path(), |writer| {
            serde_json::to_writer(writer, &metadata).context("Failed to encode metadata")
        })?;

        Ok(())
    }
}

/// Common dimension of a batch, or `None` for an empty batch
fn batch_dimension(embeddings: &[Embedding], chunks: &[Chunk]) -> Result<Option<usize>> {
    if embeddings.len() != chunks.len() {
        return Err(RagError::MisalignedBatch {
            embeddings: embeddings.len(),
            chunks: chunks.len(),
        }
        .into());
    }

    let Some(first) = embeddings.first() else {
        return Ok(None);
    };

    let dimension = first.dimension();
    if let Some(odd) = embeddings
        .iter()
        .find(|e| e.dimension() != dimension || e.dimension() == 0)
    {
        return Err(RagError::DimensionMismatch {
            expected: dimension,
            actual: odd.dimension(),
        }
        .into());
    }

    Ok(Some(dimension))
}

fn new_stamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Write to a sibling temp file, then rename it over `path`.
/// The temp file is removed again if any step fails.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp_path = path.with_extension("tmp");
    let result = write_synced(&tmp_path, write).and_then(|()| {
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace {}", path.display()))
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_synced<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writer
        .get_ref()
        .sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    Ok(())
}

use crate::error::RagError;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Maps text to fixed-dimension vectors.
///
/// One instance is built at start-up and shared by ingestion and queries.
/// Output is order preserving: `embed(texts)[i]` belongs to `texts[i]`.
#[allow(async_fn_in_trait)]
pub trait Embedder {
    /// Generate embeddings for a batch of texts
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Generate the embedding for a single query string
    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let mut embeddings = embed_batch(self, &[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| RagError::EmbeddingFailure("no embedding returned".to_string()).into())
    }
}

/// Embed a batch and check that the embedder kept its contract.
pub async fn embed_batch<E: Embedder + ?Sized>(
    embedder: &E,
    texts: &[String],
) -> Result<Vec<Embedding>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let embeddings = embedder.embed(texts).await?;

    if embeddings.len() != texts.len() {
        return Err(RagError::EmbeddingFailure(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            embeddings.len()
        ))
        .into());
    }

    let dimension = embeddings[0].dimension();
    if dimension == 0 {
        return Err(RagError::EmbeddingFailure("empty embedding vector".to_string()).into());
    }
    if let Some(odd) = embeddings.iter().find(|e| e.dimension() != dimension) {
        return Err(RagError::DimensionMismatch {
            expected: dimension,
            actual: odd.dimension(),
        }
        .into());
    }

    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEmbedder, KeywordEmbedder};

    struct Ragged;

    impl Embedder for Ragged {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, _)| Embedding {
                    values: vec![1.0; i + 1],
                })
                .collect())
        }
    }

    struct Short;

    impl Embedder for Short {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(vec![Embedding { values: vec![1.0] }])
        }
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let embedder = KeywordEmbedder::new(&["apple", "pear"]);
        let texts = vec!["pear pear".to_string(), "apple".to_string()];
        let embeddings = embed_batch(&embedder, &texts).await.unwrap();

        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].values[..2], [0.0, 2.0]);
        assert_eq!(embeddings[1].values[..2], [1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_query_uses_same_dimension() {
        let embedder = KeywordEmbedder::new(&["apple", "pear"]);
        let query = embedder.embed_query("apple pie").await.unwrap();
        let batch = embed_batch(&embedder, &["pear".to_string()]).await.unwrap();
        assert_eq!(query.dimension(), batch[0].dimension());
    }

    #[tokio::test]
    async fn test_ragged_batch_is_rejected() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_batch(&Ragged, &texts).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<RagError>(),
            Some(&RagError::DimensionMismatch {
                expected: 1,
                actual: 2
            })
        );
    }

    #[tokio::test]
    async fn test_missing_embeddings_are_a_failure() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_batch(&Short, &texts).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::EmbeddingFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_embedder_failure_propagates() {
        let err = FailingEmbedder.embed_query("anything").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::EmbeddingFailure(_))
        ));
    }
}

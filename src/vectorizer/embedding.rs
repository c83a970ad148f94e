use std::collections::HashMap;

use ahash::RandomState;

use crate::error::ValidationError;

/// Pretrained word embedding
pub trait Embedding: Send + Sync {
    fn dimensions(&self) -> usize;
    fn vector(&self, token: &str) -> Option<&[f64]>;
}

/// Mean of the embedding vectors of the known tokens.
/// `None` when no token is in the embedding.
pub fn average_embedding(tokens: &[String], embedding: &dyn Embedding) -> Option<Vec<f64>> {
    let mut sum = vec![0.0; embedding.dimensions()];
    let mut known = 0usize;
    for token in tokens {
        if let Some(vector) = embedding.vector(token) {
            for (s, v) in sum.iter_mut().zip(vector) {
                *s += v;
            }
            known += 1;
        }
    }
    if known == 0 {
        return None;
    }
    sum.iter_mut().for_each(|s| *s /= known as f64);
    Some(sum)
}

#[derive(Debug, Clone)]
pub struct InMemoryEmbedding {
    dimensions: usize,
    vectors: HashMap<String, Vec<f64>, RandomState>,
}

impl InMemoryEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: HashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn insert(&mut self, token: &str, vector: Vec<f64>) -> Result<(), ValidationError> {
        if vector.len() != self.dimensions {
            return Err(ValidationError::InvalidParameter {
                name: "embedding".to_string(),
                reason: format!(
                    "vector for '{}' has {} dimensions, expected {}",
                    token,
                    vector.len(),
                    self.dimensions
                ),
            });
        }
        self.vectors.insert(token.to_lowercase(), vector);
        Ok(())
    }
}

impl Embedding for InMemoryEmbedding {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn vector(&self, token: &str) -> Option<&[f64]> {
        self.vectors.get(token).map(Vec::as_slice)
    }
}

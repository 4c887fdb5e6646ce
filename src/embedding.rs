//! Embedding seam.
//!
//! The store consumes embeddings, it does not produce them. Real providers
//! live outside this crate and plug in through [`EmbeddingGenerator`]. The
//! bundled [`HashEmbeddingGenerator`] is a deterministic feature-hashing
//! embedder used by the CLI and tests; it captures token overlap, not
//! meaning.

use crate::vector::{VectorDimension, VectorError, normalized};

/// Trait for generating embeddings from text.
///
/// Implementations of this trait should be thread-safe and
/// capable of handling batch processing efficiently.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts, one per input.
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Embeds a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.generate_embeddings(&[text])?
            .pop()
            .ok_or_else(|| VectorError::EmbeddingFailed("provider returned no embedding".to_string()))
    }
}

/// Feature-hashing embedder over identifier-ish tokens.
///
/// Each token lands in a bucket chosen by its hash with a hashed sign; the
/// result is L2-normalized. Texts sharing tokens get positive similarity.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbeddingGenerator {
    dimension: VectorDimension,
}

impl HashEmbeddingGenerator {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbeddingGenerator {
    fn default() -> Self {
        Self::new(VectorDimension::default())
    }
}

impl EmbeddingGenerator for HashEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let dim = self.dimension.get();
        Ok(texts
            .iter()
            .map(|text| {
                let mut embedding = vec![0.0f32; dim];
                for token in tokens(text) {
                    let hash = fnv1a(token.as_bytes());
                    let bucket = (hash % dim as u64) as usize;
                    let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
                    embedding[bucket] += sign;
                }
                normalized(&embedding)
            })
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Lowercased tokens, splitting on non-alphanumerics and camelCase humps.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .flat_map(|word| {
            let mut parts = Vec::new();
            let mut current = String::new();
            let mut prev_lower = false;
            for c in word.chars() {
                if c.is_uppercase() && prev_lower && !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
                prev_lower = c.is_lowercase() || c.is_ascii_digit();
                current.extend(c.to_lowercase());
            }
            if !current.is_empty() {
                parts.push(current);
            }
            parts
        })
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

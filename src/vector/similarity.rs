//! Similarity primitives shared by the encoder, the HNSW graph and the
//! exact re-ranking step of a query.
//!
//! Every function assumes both slices have the same length; callers validate
//! dimensions at the collection boundary.

/// Computes the dot product of two vectors.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Computes the Euclidean norm of a vector.
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Computes cosine similarity between two vectors.
///
/// # Returns
/// * Cosine similarity in range [-1, 1], where 1 is most similar. A zero
///   vector is orthogonal to everything and scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot(a, b) / (norm_a * norm_b)
    }
}

/// Cosine distance (`1 - similarity`), the metric the HNSW graph minimizes.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Returns a unit-length copy of the vector.
///
/// A zero vector is returned unchanged.
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

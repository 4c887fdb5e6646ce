//! Vector primitives: validated types, similarity math, the seeded
//! projection, the path encoder and the HNSW graph.
//!
//! # Architecture
//! Records are placed on disk by [`VectorPathEncoder`], which projects each
//! embedding through a per-collection [`ProjectionMatrix`] and quantizes the
//! result into a directory path. Nearby vectors share directories, which is
//! what the neighbourhood scan relies on. [`HnswGraph`] provides the
//! approximate nearest neighbour index built on top of the stored records.

mod encoder;
mod hnsw;
mod projection;
mod similarity;
mod types;

pub use encoder::{EncoderParams, QuantizedPath, VectorPathEncoder};
pub use hnsw::{HnswGraph, HnswParams, Neighbor};
pub use projection::ProjectionMatrix;
pub use similarity::{cosine_distance, cosine_similarity, dot, l2_norm, normalized};
pub use types::{QuantizationBits, Score, DEFAULT_VECTOR_DIM, VectorDimension, VectorError};

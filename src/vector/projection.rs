//! Seeded random projection matrix used to reduce embeddings before
//! quantization.
//!
//! The matrix is generated once when a collection is created and persisted
//! next to the records. Every path ever computed for the collection depends
//! on it, so it is never regenerated.
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic, version, rows (`vector_dim`), cols (`reduced_dim`)
//! - Body: `rows * cols` little-endian f32 values, row-major

use std::fs::File;
use std::path::Path;

use memmap2::MmapOptions;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::fsutil::write_atomic;
use crate::vector::similarity::normalized;
use crate::vector::types::{VectorDimension, VectorError};

/// Current projection file format version.
const PROJECTION_VERSION: u32 = 1;

/// Size of the file header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify projection matrix files.
const MAGIC_BYTES: &[u8; 4] = b"SDPM";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Fixed pseudo-random matrix of shape `[vector_dim, reduced_dim]`.
///
/// Entries are drawn from a standard normal distribution, so projecting a
/// unit vector yields reduced components that are themselves roughly
/// standard normal. The quantizer's fixed thresholds rely on that.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl ProjectionMatrix {
    /// Generates a matrix deterministically from `seed`.
    pub fn generate(dimension: VectorDimension, reduced_dim: usize, seed: u64) -> Self {
        let rows = dimension.get();
        let cols = reduced_dim;
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..rows * cols).map(|_| standard_normal(&mut rng)).collect();
        Self { rows, cols, data }
    }

    /// Input dimension (rows).
    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.rows
    }

    /// Reduced dimension (cols).
    #[must_use]
    pub fn reduced_dim(&self) -> usize {
        self.cols
    }

    /// Projects a vector into the reduced space.
    ///
    /// The input is normalized first so the projection depends only on the
    /// vector's direction, matching the cosine metric used everywhere else.
    pub fn project(&self, vector: &[f32]) -> Result<Vec<f32>, VectorError> {
        if vector.len() != self.rows {
            return Err(VectorError::DimensionMismatch {
                expected: self.rows,
                actual: vector.len(),
            });
        }

        let unit = normalized(vector);
        let mut reduced = vec![0.0f32; self.cols];
        for (row, &value) in unit.iter().enumerate() {
            if value == 0.0 {
                continue;
            }
            let offset = row * self.cols;
            for (out, &weight) in reduced
                .iter_mut()
                .zip(&self.data[offset..offset + self.cols])
            {
                *out += value * weight;
            }
        }
        Ok(reduced)
    }

    /// Persists the matrix atomically.
    pub fn save(&self, path: &Path) -> Result<(), VectorError> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.data.len() * BYTES_PER_F32);
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&PROJECTION_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.rows as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.cols as u32).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Loads a matrix previously written by [`ProjectionMatrix::save`].
    pub fn load(path: &Path) -> Result<Self, VectorError> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        if mmap.len() < HEADER_SIZE {
            return Err(VectorError::InvalidProjection(
                "File too small to contain header".to_string(),
            ));
        }
        if &mmap[0..4] != MAGIC_BYTES {
            return Err(VectorError::InvalidProjection(
                "Invalid magic bytes".to_string(),
            ));
        }

        let version = read_u32(&mmap, 4);
        if version != PROJECTION_VERSION {
            return Err(VectorError::UnsupportedFormat {
                found: version,
                supported: PROJECTION_VERSION,
            });
        }

        let rows = read_u32(&mmap, 8) as usize;
        let cols = read_u32(&mmap, 12) as usize;
        let expected_len = HEADER_SIZE + rows * cols * BYTES_PER_F32;
        if rows == 0 || cols == 0 || mmap.len() != expected_len {
            return Err(VectorError::InvalidProjection(format!(
                "Expected {expected_len} bytes for a {rows}x{cols} matrix, found {}",
                mmap.len()
            )));
        }

        let data = mmap[HEADER_SIZE..]
            .chunks_exact(BYTES_PER_F32)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self { rows, cols, data })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Box-Muller transform over the seeded generator.
fn standard_normal(rng: &mut StdRng) -> f32 {
    // random::<f64>() is in [0, 1); shift to (0, 1] so ln() stays finite
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

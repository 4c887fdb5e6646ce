//! Deterministic mapping from an embedding to a directory path.
//!
//! A vector is projected through the collection's [`ProjectionMatrix`],
//! each reduced component is quantized into a small digit, the digits are
//! packed into hex characters and the hex string is cut into fixed-width path
//! segments. Vectors pointing in similar directions share most digits and
//! therefore land in the same or neighbouring directories.
//!
//! # Quantization
//! - 1 bit: the sign of the component
//! - 2 bits: quartile bucket of a standard normal, thresholds at ±0.6745 and 0
//!
//! Only the digits that make it into the (depth-capped) path matter for
//! placement; the rest are dropped, which makes deep collections coarser
//! rather than deeper.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::vector::projection::ProjectionMatrix;
use crate::vector::types::{QuantizationBits, VectorError};

/// Quartile boundaries of the standard normal distribution.
const QUARTILE_THRESHOLDS: [f32; 3] = [-0.674_49, 0.0, 0.674_49];

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Path segments produced for one vector, relative to the collection root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuantizedPath {
    segments: Vec<String>,
}

impl QuantizedPath {
    /// The individual directory names, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Resolves the bucket directory under a collection root.
    #[must_use]
    pub fn join_onto(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in &self.segments {
            path.push(segment);
        }
        path
    }
}

impl fmt::Display for QuantizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Parameters controlling quantization and directory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    pub quantization_bits: QuantizationBits,
    /// Hex characters per path segment.
    pub depth_factor: usize,
    /// Maximum number of path segments.
    pub max_depth: usize,
}

/// Encodes vectors into [`QuantizedPath`]s for one collection.
#[derive(Debug, Clone)]
pub struct VectorPathEncoder {
    matrix: Arc<ProjectionMatrix>,
    params: EncoderParams,
}

/// A digit that can be nudged into a neighbouring level, with how far the
/// projected value sits from that boundary.
#[derive(Debug, Clone, Copy)]
struct Flip {
    digit: usize,
    alternative: u8,
    margin: f32,
}

impl VectorPathEncoder {
    /// Creates an encoder over a shared projection matrix.
    pub fn new(matrix: Arc<ProjectionMatrix>, params: EncoderParams) -> Result<Self, VectorError> {
        if params.depth_factor == 0 || params.max_depth == 0 {
            return Err(VectorError::InvalidEncoderParams(format!(
                "depth_factor ({}) and max_depth ({}) must be positive",
                params.depth_factor, params.max_depth
            )));
        }
        Ok(Self { matrix, params })
    }

    /// Encoder parameters.
    #[must_use]
    pub fn params(&self) -> EncoderParams {
        self.params
    }

    /// Maps a vector to its bucket path.
    ///
    /// Pure and deterministic: the same vector, matrix and parameters always
    /// yield the same path.
    pub fn encode(&self, vector: &[f32]) -> Result<QuantizedPath, VectorError> {
        let reduced = self.matrix.project(vector)?;
        let digits = self.quantize(&reduced);
        Ok(self.digits_to_path(&digits))
    }

    /// Returns the query's own bucket followed by up to `radius` rings of
    /// Hamming-adjacent buckets.
    ///
    /// Ring `r` changes `r` digits by one level each. Digits whose projected
    /// value sits closest to a quantization boundary are tried first, so
    /// when `max_buckets` truncates the walk the most likely neighbours
    /// survive.
    pub fn neighborhood(
        &self,
        vector: &[f32],
        radius: usize,
        max_buckets: usize,
    ) -> Result<Vec<QuantizedPath>, VectorError> {
        let reduced = self.matrix.project(vector)?;
        let digits = self.quantize(&reduced);

        let mut flips = self.candidate_flips(&reduced, &digits);
        flips.sort_by(|a, b| a.margin.total_cmp(&b.margin));

        let center = self.digits_to_path(&digits);
        let mut seen: HashSet<QuantizedPath> = HashSet::new();
        seen.insert(center.clone());
        let mut buckets = vec![center];

        let radius = radius.min(flips.len());
        'rings: for ring in 1..=radius {
            for combination in Combinations::new(flips.len(), ring) {
                if buckets.len() >= max_buckets {
                    break 'rings;
                }
                let mut neighbour = digits.clone();
                for &idx in &combination {
                    let flip = flips[idx];
                    neighbour[flip.digit] = flip.alternative;
                }
                let path = self.digits_to_path(&neighbour);
                if seen.insert(path.clone()) {
                    buckets.push(path);
                }
            }
        }

        Ok(buckets)
    }

    fn quantize(&self, reduced: &[f32]) -> Vec<u8> {
        reduced
            .iter()
            .map(|&value| match self.params.quantization_bits {
                QuantizationBits::One => u8::from(value >= 0.0),
                QuantizationBits::Two => {
                    QUARTILE_THRESHOLDS.iter().filter(|&&t| value >= t).count() as u8
                }
            })
            .collect()
    }

    /// Number of leading digits that influence the path.
    fn covered_digits(&self, total_digits: usize) -> usize {
        let per_hex = self.params.quantization_bits.digits_per_hex();
        let max_hex = self.params.depth_factor * self.params.max_depth;
        (max_hex * per_hex).min(total_digits)
    }

    fn candidate_flips(&self, reduced: &[f32], digits: &[u8]) -> Vec<Flip> {
        let covered = self.covered_digits(digits.len());
        (0..covered)
            .map(|digit| {
                let value = reduced[digit];
                let level = digits[digit];
                match self.params.quantization_bits {
                    QuantizationBits::One => Flip {
                        digit,
                        alternative: 1 - level,
                        margin: value.abs(),
                    },
                    QuantizationBits::Two => {
                        let below = (level > 0)
                            .then(|| (level - 1, value - QUARTILE_THRESHOLDS[level as usize - 1]));
                        let above = (level < 3)
                            .then(|| (level + 1, QUARTILE_THRESHOLDS[level as usize] - value));
                        let (alternative, margin) = match (below, above) {
                            (Some(b), Some(a)) => {
                                if b.1 <= a.1 {
                                    b
                                } else {
                                    a
                                }
                            }
                            (Some(b), None) => b,
                            (None, Some(a)) => a,
                            (None, None) => (level, f32::MAX),
                        };
                        Flip {
                            digit,
                            alternative,
                            margin,
                        }
                    }
                }
            })
            .collect()
    }

    fn digits_to_path(&self, digits: &[u8]) -> QuantizedPath {
        let bits = self.params.quantization_bits.bits();
        let per_hex = self.params.quantization_bits.digits_per_hex();
        let covered = self.covered_digits(digits.len());

        let mut hex = String::with_capacity(covered.div_ceil(per_hex));
        for chunk in digits[..covered].chunks(per_hex) {
            let mut nibble = 0u8;
            for i in 0..per_hex {
                let digit = chunk.get(i).copied().unwrap_or(0);
                nibble = (nibble << bits) | digit;
            }
            hex.push(HEX_DIGITS[nibble as usize] as char);
        }

        let segments = hex
            .as_bytes()
            .chunks(self.params.depth_factor)
            .take(self.params.max_depth)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect();

        QuantizedPath { segments }
    }
}

/// Lexicographic k-combinations of `0..n`.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    first: bool,
    done: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            first: true,
            done: k == 0 || k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.first {
            self.first = false;
            return Some(self.indices.clone());
        }

        let k = self.indices.len();
        let mut i = k;
        while i > 0 {
            i -= 1;
            if self.indices[i] < self.n - k + i {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                return Some(self.indices.clone());
            }
        }
        self.done = true;
        None
    }
}

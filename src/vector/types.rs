//! Validated scalar types shared by the vector layer.
//!
//! A collection's dimension, its quantization depth and similarity scores
//! are checked once when they enter the crate and trusted afterwards.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimension used when neither the config nor the CLI names one.
pub const DEFAULT_VECTOR_DIM: usize = 384;

/// Cosine similarity between a query and a stored vector, in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Score(f32);

impl Score {
    pub fn new(value: f32) -> Result<Self, VectorError> {
        match value {
            v if (-1.0..=1.0).contains(&v) => Ok(Self(v)),
            v => Err(VectorError::ScoreOutOfRange(v)),
        }
    }

    /// Pulls rounding overshoot back into range. NaN maps to 0.
    #[must_use]
    pub fn saturating(value: f32) -> Self {
        Self(if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) })
    }

    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl TryFrom<f32> for Score {
    type Error = VectorError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Score> for f32 {
    fn from(score: Score) -> Self {
        score.0
    }
}

// NaN never gets past the constructors, so the order is total.
impl Eq for Score {}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Length every vector in a collection must have. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct VectorDimension(usize);

impl VectorDimension {
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            Err(VectorError::ZeroDimension)
        } else {
            Ok(Self(dim))
        }
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Rejects vectors whose length differs from this dimension, or that
    /// hold NaN or an infinity (JSON has no encoding for either).
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        match vector.iter().position(|x| !x.is_finite()) {
            Some(index) => Err(VectorError::NonFiniteComponent {
                index,
                value: vector[index],
            }),
            None => Ok(()),
        }
    }
}

impl Default for VectorDimension {
    fn default() -> Self {
        Self(DEFAULT_VECTOR_DIM)
    }
}

impl TryFrom<usize> for VectorDimension {
    type Error = VectorError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VectorDimension> for usize {
    fn from(dim: VectorDimension) -> Self {
        dim.0
    }
}

impl fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Number of bits each reduced dimension is quantized to.
///
/// One bit keeps only the sign of the projection. Two bits split the value
/// into quartile buckets using fixed thresholds of the standard normal
/// distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QuantizationBits {
    One,
    Two,
}

impl QuantizationBits {
    /// Bits per quantized digit.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    /// Number of discrete levels per digit.
    #[must_use]
    pub const fn levels(self) -> u8 {
        1 << self.bits()
    }

    /// Digits packed into one hex character.
    #[must_use]
    pub const fn digits_per_hex(self) -> usize {
        (4 / self.bits()) as usize
    }
}

impl TryFrom<u8> for QuantizationBits {
    type Error = VectorError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(VectorError::InvalidQuantization(other)),
        }
    }
}

impl From<QuantizationBits> for u8 {
    fn from(bits: QuantizationBits) -> Self {
        bits.bits() as u8
    }
}

/// Failures raised below the storage layer.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("vector has {actual} components but the collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector dimension must be at least 1")]
    ZeroDimension,

    #[error("vector component {index} is {value}, only finite values can be stored")]
    NonFiniteComponent { index: usize, value: f32 },

    #[error("encoder parameters rejected: {0}")]
    InvalidEncoderParams(String),

    #[error("similarity {0} lies outside [-1, 1]")]
    ScoreOutOfRange(f32),

    #[error("quantization depth of {0} bits is not supported (expected 1 or 2)")]
    InvalidQuantization(u8),

    #[error("projection matrix I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("projection matrix is unusable: {0}")]
    InvalidProjection(String),

    #[error("projection file format v{found} is not readable by this build (reads v{supported})")]
    UnsupportedFormat { found: u32, supported: u32 },

    #[error("embedding provider failed: {0}")]
    EmbeddingFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        assert_eq!(Score::new(-0.25).unwrap().get(), -0.25);
        for bad in [1.5, -1.01, f32::NAN] {
            assert!(matches!(Score::new(bad), Err(VectorError::ScoreOutOfRange(_))));
        }
        assert_eq!(Score::saturating(1.000_001).get(), 1.0);
        assert_eq!(Score::saturating(-3.0).get(), -1.0);
        assert_eq!(Score::saturating(f32::NAN).get(), 0.0);
    }

    #[test]
    fn test_scores_sort_descending() {
        let mut scores: Vec<Score> = [0.1, -0.4, 0.9].map(Score::saturating).to_vec();
        scores.sort_by(|a, b| b.cmp(a));
        let raw: Vec<f32> = scores.iter().map(Score::get).collect();
        assert_eq!(raw, vec![0.9, 0.1, -0.4]);
    }

    #[test]
    fn test_dimension_checks_vector_length() {
        let dim = VectorDimension::new(12).unwrap();
        assert!(dim.validate_vector(&[0.0; 12]).is_ok());
        assert!(matches!(
            dim.validate_vector(&[0.0; 5]),
            Err(VectorError::DimensionMismatch {
                expected: 12,
                actual: 5
            })
        ));
        assert!(matches!(VectorDimension::new(0), Err(VectorError::ZeroDimension)));

        let mut v = [0.5; 12];
        v[7] = f32::INFINITY;
        assert!(matches!(
            dim.validate_vector(&v),
            Err(VectorError::NonFiniteComponent { index: 7, .. })
        ));
        v[7] = f32::NAN;
        assert!(dim.validate_vector(&v).is_err());
        assert_eq!(VectorDimension::default().get(), DEFAULT_VECTOR_DIM);
    }

    #[test]
    fn test_quantization_bits() {
        assert_eq!(QuantizationBits::try_from(1).unwrap(), QuantizationBits::One);
        assert_eq!(QuantizationBits::try_from(2).unwrap(), QuantizationBits::Two);
        assert!(QuantizationBits::try_from(3).is_err());

        assert_eq!(QuantizationBits::One.levels(), 2);
        assert_eq!(QuantizationBits::Two.levels(), 4);
        assert_eq!(QuantizationBits::One.digits_per_hex(), 4);
        assert_eq!(QuantizationBits::Two.digits_per_hex(), 2);
    }

    #[test]
    fn test_serde_representation() {
        let json = serde_json::to_string(&QuantizationBits::Two).unwrap();
        assert_eq!(json, "2");
        let dim: VectorDimension = serde_json::from_str("8").unwrap();
        assert_eq!(dim.get(), 8);
        assert!(serde_json::from_str::<VectorDimension>("0").is_err());
    }
}

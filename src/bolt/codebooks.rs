//! Codebook tensor in codebook-major, lane-friendly layout.
//!
//! Callers supply centroids as a stacked row-major matrix (16 rows for
//! codebook 0, then 16 for codebook 1, ...). Internally each codebook is one
//! contiguous block in which the j-th coordinate of all 16 centroids is
//! adjacent:
//!
//! ```text
//! block m = [ c₀[0] c₁[0] ... c₁₅[0] | c₀[1] c₁[1] ... c₁₅[1] | ... ]
//! ```
//!
//! so one subvector coordinate updates 16 partial distances with two 8-lane
//! fused multiply-adds.

use serde::{Deserialize, Serialize};

use super::shape::CentroidShape;
use super::{CodeWidth, NCENTROIDS};
use crate::error::{BoltError, Result};
use crate::simd::{self, F32_LANES};

/// Raw scores of one subvector against the 16 centroids of a codebook,
/// split into two registers (centroids 0..8 and 8..16).
pub type CentroidScores = [[f32; F32_LANES]; 2];

/// Immutable codebook tensor owned by the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CodebooksRaw")]
pub struct Codebooks {
    width: CodeWidth,
    subvector_len: usize,
    /// `[codebook][coordinate][centroid]`
    data: Vec<f32>,
}

impl Codebooks {
    /// Copy a stacked row-major centroid matrix into the internal layout.
    pub fn from_rows(x: &[f32], shape: CentroidShape) -> Result<Self> {
        shape.shape().check_buffer("centroids", x.len())?;
        let width = shape.width();
        let subvector_len = shape.subvector_len();

        let mut data = vec![0.0f32; x.len()];
        for m in 0..width.ncodebooks() {
            let block = m * NCENTROIDS * subvector_len;
            for i in 0..NCENTROIDS {
                let row = &x[(m * NCENTROIDS + i) * subvector_len..][..subvector_len];
                for (j, &v) in row.iter().enumerate() {
                    data[block + j * NCENTROIDS + i] = v;
                }
            }
        }

        Ok(Self {
            width,
            subvector_len,
            data,
        })
    }

    pub fn width(&self) -> CodeWidth {
        self.width
    }

    pub fn ncodebooks(&self) -> usize {
        self.width.ncodebooks()
    }

    pub fn subvector_len(&self) -> usize {
        self.subvector_len
    }

    /// Dimensionality of the vectors these codebooks encode.
    pub fn dim(&self) -> usize {
        self.ncodebooks() * self.subvector_len
    }

    /// The block for codebook `m`: `subvector_len` runs of 16 floats.
    #[inline]
    pub fn codebook(&self, m: usize) -> &[f32] {
        let len = NCENTROIDS * self.subvector_len;
        &self.data[m * len..(m + 1) * len]
    }

    /// Coordinate `j` of centroid `i` in codebook `m`.
    #[inline]
    pub fn coord(&self, m: usize, i: usize, j: usize) -> f32 {
        self.codebook(m)[j * NCENTROIDS + i]
    }

    /// Centroid `i` of codebook `m` as a plain vector.
    pub fn centroid(&self, m: usize, i: usize) -> Vec<f32> {
        (0..self.subvector_len).map(|j| self.coord(m, i, j)).collect()
    }

    /// Squared L2 distance from `sub` to each centroid of codebook `m`.
    pub fn distances(&self, m: usize, sub: &[f32]) -> CentroidScores {
        debug_assert_eq!(sub.len(), self.subvector_len);
        let block = self.codebook(m);
        let mut acc = [[0.0f32; F32_LANES]; 2];
        for (j, &q) in sub.iter().enumerate() {
            let column = &block[j * NCENTROIDS..(j + 1) * NCENTROIDS];
            for (half, sum) in acc.iter_mut().enumerate() {
                let diff: [f32; F32_LANES] =
                    std::array::from_fn(|l| column[half * F32_LANES + l] - q);
                *sum = simd::fma(diff, diff, *sum);
            }
        }
        acc
    }

    /// Dot product of `sub` with each centroid of codebook `m`.
    pub fn dots(&self, m: usize, sub: &[f32]) -> CentroidScores {
        debug_assert_eq!(sub.len(), self.subvector_len);
        let block = self.codebook(m);
        let mut acc = [[0.0f32; F32_LANES]; 2];
        for (j, &q) in sub.iter().enumerate() {
            let column = &block[j * NCENTROIDS..(j + 1) * NCENTROIDS];
            for (half, sum) in acc.iter_mut().enumerate() {
                let c: [f32; F32_LANES] = std::array::from_fn(|l| column[half * F32_LANES + l]);
                *sum = simd::fma(c, simd::splat(q), *sum);
            }
        }
        acc
    }

    /// Index of the centroid of codebook `m` closest to `sub` (first on ties).
    pub fn nearest(&self, m: usize, sub: &[f32]) -> u8 {
        let [lo, hi] = self.distances(m, sub);
        let best = simd::horizontal_min(lo).min(simd::horizontal_min(hi));
        lo.iter()
            .chain(hi.iter())
            .position(|&d| d == best)
            .unwrap_or(0) as u8
    }

    /// Per-coordinate mean of each codebook's 16 centroids, laid out like a
    /// query vector.
    pub fn means(&self) -> Vec<f32> {
        let mut means = vec![0.0f32; self.dim()];
        for m in 0..self.ncodebooks() {
            let block = self.codebook(m);
            for (j, mean) in means[m * self.subvector_len..][..self.subvector_len]
                .iter_mut()
                .enumerate()
            {
                let column = &block[j * NCENTROIDS..(j + 1) * NCENTROIDS];
                *mean = column.iter().sum::<f32>() / NCENTROIDS as f32;
            }
        }
        means
    }
}

/// Serialized form, checked before it becomes a [`Codebooks`].
#[derive(Deserialize)]
struct CodebooksRaw {
    width: CodeWidth,
    subvector_len: usize,
    data: Vec<f32>,
}

impl TryFrom<CodebooksRaw> for Codebooks {
    type Error = BoltError;

    fn try_from(raw: CodebooksRaw) -> Result<Self> {
        if raw.subvector_len == 0 {
            return Err(BoltError::EmptyInput("subvector"));
        }
        let expected = raw.width.ncodebooks() * NCENTROIDS * raw.subvector_len;
        if raw.data.len() != expected {
            return Err(BoltError::shape("centroids", expected, raw.data.len()));
        }
        Ok(Self {
            width: raw.width,
            subvector_len: raw.subvector_len,
            data: raw.data,
        })
    }
}

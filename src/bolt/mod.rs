//! Bolt: 4-bit product quantization scanned with byte lookup tables.
//!
//! Vectors are split into `ncodebooks = 2 * nbytes` contiguous subvectors.
//! Each subvector is replaced by the index of its nearest of 16 centroids,
//! and two 4-bit indices share one byte, so a vector costs `nbytes` bytes.
//!
//! ```text
//! x = [x₀ x₁ x₂ x₃ | x₄ x₅ x₆ x₇ | ... ]      (subvector_len = 4)
//!      └─ codebook 0 ─┘ └─ codebook 1 ─┘
//!             ↓               ↓
//!            c₀=9            c₁=3          byte 0 = (3 << 4) | 9
//! ```
//!
//! ## Queries
//!
//! For a query, the [`LutBuilder`] computes the distance (or negated dot
//! product) to all 16 centroids of every codebook and quantizes each one to a
//! byte with a caller-supplied affine map:
//!
//! ```text
//! lut[m][i] = clamp(round(raw(q_m, c_{m,i}) * scale + offsets[m]), 0, 255)
//! ```
//!
//! The [`ScanEngine`] then scores every stored row as
//! `Σ_m lut[m][code_m]`, 32 rows at a time. Lower is more similar for both
//! reductions.
//!
//! ## Intentional imprecision
//!
//! Two things here lose information on purpose:
//!
//! 1. The byte quantization of LUT entries. Ranking precision is traded for a
//!    table narrow enough to live in one shuffle register per codebook.
//! 2. The 8-bit accumulation policies ([`Accumulation::FastU8`] and
//!    [`Accumulation::Upcast`]). They wrap silently when a partial sum exceeds
//!    255. Choosing them is a caller promise about the LUT value range.
//!
//! ## Usage
//!
//! ```rust
//! use bolt_vq::bolt::{BoltEncoder, Reduction, NCENTROIDS};
//!
//! let nbytes = 2; // 4 codebooks
//! let subvector_len = 2;
//! let ncodebooks = 2 * nbytes;
//! let dim = ncodebooks * subvector_len;
//!
//! // codebook m, centroid i = [i + 100m, i + 100m]
//! let mut centroids = Vec::new();
//! for m in 0..ncodebooks {
//!     for i in 0..NCENTROIDS {
//!         let v = (i + 100 * m) as f32;
//!         centroids.extend_from_slice(&[v, v]);
//!     }
//! }
//!
//! let mut encoder = BoltEncoder::new(nbytes, 1.0)?;
//! encoder.set_centroids(&centroids, ncodebooks * NCENTROIDS, subvector_len)?;
//!
//! let data: Vec<f32> = (0..3)
//!     .flat_map(|row| (0..dim).map(move |j| (row * 5 + 100 * (j / 2)) as f32))
//!     .collect();
//! encoder.set_data(&data, 3, dim)?;
//!
//! let mut scratch = encoder.new_scratch();
//! let nearest = encoder.knn(&data[dim..2 * dim], 1, Reduction::L2, &mut scratch)?;
//! assert_eq!(nearest, vec![1]);
//! # Ok::<(), bolt_vq::BoltError>(())
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BoltError, Result};

pub mod codebooks;
pub mod codes;
pub mod encoder;
pub mod lut;
pub mod query;
pub mod scan;
pub mod shape;

pub use codebooks::Codebooks;
pub use codes::CodeMatrix;
pub use encoder::BoltEncoder;
pub use lut::{Lut, LutBuilder};
pub use query::QueryScratch;
pub use scan::{Accumulation, ScanEngine, UpcastEvery};
pub use shape::{CentroidShape, CodesShape, Shape};

/// Centroids per codebook. Fixed: a code is one nibble.
pub const NCENTROIDS: usize = 16;

/// Codebooks whose indices share one code byte.
pub const CODEBOOKS_PER_BYTE: usize = 2;

/// Rows scanned together; the code matrix is zero-padded to a multiple.
pub const BLOCK_ROWS: usize = 32;

/// Bytes per encoded vector. Only these five widths exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum CodeWidth {
    B2,
    B8,
    B16,
    B24,
    B32,
}

impl CodeWidth {
    /// All supported widths, narrowest first.
    pub const ALL: [CodeWidth; 5] = [
        CodeWidth::B2,
        CodeWidth::B8,
        CodeWidth::B16,
        CodeWidth::B24,
        CodeWidth::B32,
    ];

    /// Bytes per encoded vector.
    #[inline]
    pub const fn nbytes(self) -> usize {
        match self {
            CodeWidth::B2 => 2,
            CodeWidth::B8 => 8,
            CodeWidth::B16 => 16,
            CodeWidth::B24 => 24,
            CodeWidth::B32 => 32,
        }
    }

    /// Number of codebooks, `2 * nbytes`.
    #[inline]
    pub const fn ncodebooks(self) -> usize {
        CODEBOOKS_PER_BYTE * self.nbytes()
    }
}

impl TryFrom<usize> for CodeWidth {
    type Error = BoltError;

    fn try_from(nbytes: usize) -> Result<Self> {
        match nbytes {
            2 => Ok(CodeWidth::B2),
            8 => Ok(CodeWidth::B8),
            16 => Ok(CodeWidth::B16),
            24 => Ok(CodeWidth::B24),
            32 => Ok(CodeWidth::B32),
            other => Err(BoltError::InvalidCodeWidth(other)),
        }
    }
}

impl From<CodeWidth> for usize {
    fn from(width: CodeWidth) -> usize {
        width.nbytes()
    }
}

/// How a query is compared against centroids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reduction {
    /// Squared Euclidean distance.
    L2,
    /// Negated dot product, so lower still means more similar.
    DotProd,
    /// Declared but without a defined formula; always rejected.
    L1,
}

/// Codec configuration.
///
/// `scale` and per-codebook offsets come from whoever trained the codebooks;
/// nothing here derives them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoltConfig {
    /// Bytes per encoded vector, one of `{2, 8, 16, 24, 32}`.
    pub nbytes: usize,
    /// Multiplier applied to raw scores before adding offsets.
    pub scale: f32,
    /// Accumulation policy used by query scratch built from this config.
    pub accumulation: Accumulation,
}

impl Default for BoltConfig {
    fn default() -> Self {
        Self {
            nbytes: 16,
            scale: 1.0,
            accumulation: Accumulation::SafeU16,
        }
    }
}

/// Rows rounded up to a whole number of scan blocks.
#[inline]
pub const fn padded_rows(rows: usize) -> usize {
    rows.div_ceil(BLOCK_ROWS) * BLOCK_ROWS
}

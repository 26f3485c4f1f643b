//! Packed code matrix.
//!
//! `padded_rows × nbytes` bytes, row-major. Byte `b` of a row holds the index
//! for codebook `2b` in its low nibble and codebook `2b + 1` in its high
//! nibble. Rows past the logical row count are zero so a block scan never
//! reads uninitialized memory.

use serde::{Deserialize, Serialize};

use super::shape::CodesShape;
use super::{padded_rows, CodeWidth, CODEBOOKS_PER_BYTE, NCENTROIDS};
use crate::error::{BoltError, Result};

/// Encoded database, block-padded for scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CodeMatrixRaw")]
pub struct CodeMatrix {
    width: CodeWidth,
    nrows: usize,
    data: Vec<u8>,
}

impl CodeMatrix {
    /// All-zero matrix for `nrows` logical rows.
    pub fn zeroed(nrows: usize, width: CodeWidth) -> Self {
        Self {
            width,
            nrows,
            data: vec![0u8; padded_rows(nrows) * width.nbytes()],
        }
    }

    /// Copy already packed codes (`nrows × nbytes`).
    pub fn from_packed(codes: &[u8], nrows: usize, ncols: usize, width: CodeWidth) -> Result<Self> {
        let shape = CodesShape::packed(nrows, ncols, width)?;
        shape.shape().check_buffer("packed codes", codes.len())?;

        let mut out = Self::zeroed(nrows, width);
        out.data[..codes.len()].copy_from_slice(codes);
        Ok(out)
    }

    /// Pack one-index-per-byte codes (`nrows × 2*nbytes`, each `< 16`).
    pub fn from_unpacked(
        indices: &[u8],
        nrows: usize,
        ncols: usize,
        width: CodeWidth,
    ) -> Result<Self> {
        let shape = CodesShape::unpacked(nrows, ncols, width)?;
        shape.shape().check_buffer("unpacked codes", indices.len())?;
        if let Some(&bad) = indices.iter().find(|&&c| c as usize >= NCENTROIDS) {
            return Err(BoltError::InvalidParameter(format!(
                "code index {bad} out of range [0, {NCENTROIDS})"
            )));
        }

        let mut out = Self::zeroed(nrows, width);
        let nbytes = width.nbytes();
        for (row, unpacked) in indices.chunks_exact(ncols).enumerate() {
            let packed = &mut out.data[row * nbytes..(row + 1) * nbytes];
            for (byte, pair) in packed.iter_mut().zip(unpacked.chunks_exact(CODEBOOKS_PER_BYTE)) {
                *byte = pack_pair(pair[0], pair[1]);
            }
        }
        Ok(out)
    }

    pub fn width(&self) -> CodeWidth {
        self.width
    }

    /// Logical (unpadded) row count.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Row count including zero guard rows.
    pub fn padded_rows(&self) -> usize {
        padded_rows(self.nrows)
    }

    /// Bytes per row.
    pub fn nbytes(&self) -> usize {
        self.width.nbytes()
    }

    /// The whole padded buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Packed bytes of row `i` (guard rows included).
    #[inline]
    pub fn row(&self, i: usize) -> &[u8] {
        let nbytes = self.nbytes();
        &self.data[i * nbytes..(i + 1) * nbytes]
    }

    pub(crate) fn row_mut(&mut self, i: usize) -> &mut [u8] {
        let nbytes = self.nbytes();
        &mut self.data[i * nbytes..(i + 1) * nbytes]
    }

    /// The 4-bit index row `i` stores for codebook `m`.
    #[inline]
    pub fn index(&self, i: usize, m: usize) -> u8 {
        let byte = self.row(i)[m / CODEBOOKS_PER_BYTE];
        if m % CODEBOOKS_PER_BYTE == 0 {
            byte & 0x0f
        } else {
            byte >> 4
        }
    }
}

/// Two 4-bit indices in one byte, even codebook in the low nibble.
#[inline]
pub(crate) fn pack_pair(even: u8, odd: u8) -> u8 {
    debug_assert!((even as usize) < NCENTROIDS && (odd as usize) < NCENTROIDS);
    (odd << 4) | even
}

/// Serialized form, checked before it becomes a [`CodeMatrix`].
#[derive(Deserialize)]
struct CodeMatrixRaw {
    width: CodeWidth,
    nrows: usize,
    data: Vec<u8>,
}

impl TryFrom<CodeMatrixRaw> for CodeMatrix {
    type Error = BoltError;

    fn try_from(raw: CodeMatrixRaw) -> Result<Self> {
        if raw.nrows == 0 {
            return Err(BoltError::EmptyInput("codes"));
        }
        let nbytes = raw.width.nbytes();
        let expected = padded_rows(raw.nrows) * nbytes;
        if raw.data.len() != expected {
            return Err(BoltError::shape("padded codes", expected, raw.data.len()));
        }
        if raw.data[raw.nrows * nbytes..].iter().any(|&b| b != 0) {
            return Err(BoltError::InvalidParameter(
                "guard rows past the last code row must be zero".into(),
            ));
        }
        Ok(Self {
            width: raw.width,
            nrows: raw.nrows,
            data: raw.data,
        })
    }
}

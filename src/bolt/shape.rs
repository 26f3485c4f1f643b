//! Matrix shapes, validated once at the API boundary.
//!
//! Callers hand over flat buffers plus `(rows, cols)`. The width a buffer
//! implies (centroid rows / 32, code columns / 2) is derived here and checked
//! against the configured [`CodeWidth`], so the kernels never re-derive it.

use super::{padded_rows, CodeWidth, CODEBOOKS_PER_BYTE, NCENTROIDS};
use crate::error::{BoltError, Result};

/// Row-major `rows × cols` matrix shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows rounded up to a multiple of the scan block.
    #[inline]
    pub fn padded_rows(&self) -> usize {
        padded_rows(self.rows)
    }

    /// Check a flat buffer holds exactly this shape.
    pub fn check_buffer(&self, what: &'static str, len: usize) -> Result<()> {
        if len != self.len() {
            return Err(BoltError::shape(what, self.len(), len));
        }
        Ok(())
    }

    fn require_nonempty(&self, what: &'static str) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(BoltError::EmptyInput(what));
        }
        Ok(())
    }
}

/// Shape of a stacked centroid matrix: `2 * nbytes * 16` rows of
/// `subvector_len` floats, codebook 0's sixteen rows first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentroidShape {
    shape: Shape,
    width: CodeWidth,
}

impl CentroidShape {
    /// Derive the implied width from `rows` and require it to equal `width`.
    pub fn new(rows: usize, cols: usize, width: CodeWidth) -> Result<Self> {
        let shape = Shape::new(rows, cols);
        shape.require_nonempty("centroids")?;

        let rows_per_byte = CODEBOOKS_PER_BYTE * NCENTROIDS;
        if rows % rows_per_byte != 0 {
            return Err(BoltError::shape(
                "centroid rows",
                width.ncodebooks() * NCENTROIDS,
                rows,
            ));
        }
        let implied = CodeWidth::try_from(rows / rows_per_byte).ok();
        if implied != Some(width) {
            return Err(BoltError::shape(
                "centroid rows",
                width.ncodebooks() * NCENTROIDS,
                rows,
            ));
        }
        Ok(Self { shape, width })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn width(&self) -> CodeWidth {
        self.width
    }

    /// Length of each subvector (one centroid).
    pub fn subvector_len(&self) -> usize {
        self.shape.cols
    }

    /// Dimensionality of the vectors these centroids encode.
    pub fn dim(&self) -> usize {
        self.width.ncodebooks() * self.shape.cols
    }
}

/// Shape of a matrix of codes.
///
/// `packed` codes hold two indices per byte (`nbytes` columns); unpacked codes
/// hold one index per byte (`2 * nbytes` columns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodesShape {
    shape: Shape,
    width: CodeWidth,
    packed: bool,
}

impl CodesShape {
    pub fn packed(rows: usize, cols: usize, width: CodeWidth) -> Result<Self> {
        Self::new(rows, cols, width, true)
    }

    pub fn unpacked(rows: usize, cols: usize, width: CodeWidth) -> Result<Self> {
        Self::new(rows, cols, width, false)
    }

    fn new(rows: usize, cols: usize, width: CodeWidth, packed: bool) -> Result<Self> {
        let shape = Shape::new(rows, cols);
        shape.require_nonempty("codes")?;
        let expected = if packed {
            width.nbytes()
        } else {
            width.ncodebooks()
        };
        if cols != expected {
            return Err(BoltError::shape("code columns", expected, cols));
        }
        Ok(Self {
            shape,
            width,
            packed,
        })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn width(&self) -> CodeWidth {
        self.width
    }

    pub fn is_packed(&self) -> bool {
        self.packed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_shape_implies_width() {
        let s = CentroidShape::new(16 * 16, 4, CodeWidth::B8).unwrap();
        assert_eq!(s.subvector_len(), 4);
        assert_eq!(s.dim(), 64);

        assert!(matches!(
            CentroidShape::new(16 * 16, 4, CodeWidth::B16),
            Err(BoltError::ShapeMismatch { .. })
        ));
        assert!(CentroidShape::new(100, 4, CodeWidth::B8).is_err());
        assert_eq!(
            CentroidShape::new(0, 4, CodeWidth::B8),
            Err(BoltError::EmptyInput("centroids"))
        );
    }

    #[test]
    fn test_codes_shape_columns() {
        assert!(CodesShape::packed(10, 8, CodeWidth::B8).unwrap().is_packed());
        assert!(!CodesShape::unpacked(10, 16, CodeWidth::B8).unwrap().is_packed());
        assert!(CodesShape::unpacked(10, 8, CodeWidth::B8).is_err());
        assert!(CodesShape::packed(0, 8, CodeWidth::B8).is_err());
    }

    #[test]
    fn test_shape_padding() {
        let s = Shape::new(33, 4);
        assert_eq!(s.padded_rows(), 64);
        assert!(s.check_buffer("x", 132).is_ok());
        assert!(s.check_buffer("x", 131).is_err());
    }
}

//! The codec: centroids, quantization parameters and the encoded database.

use serde::{Deserialize, Serialize};

use super::codebooks::Codebooks;
use super::codes::{pack_pair, CodeMatrix};
use super::lut::{Lut, LutBuilder};
use super::query::QueryScratch;
use super::scan::Accumulation;
use super::shape::CentroidShape;
use super::{BoltConfig, CodeWidth, Reduction, CODEBOOKS_PER_BYTE};
use crate::error::{BoltError, Result};

/// Bolt encoder.
///
/// Built once for a code width, then configured with [`Self::set_centroids`]
/// (and usually [`Self::set_offsets`] / [`Self::set_scale`]) before any
/// encoding. The database is installed with [`Self::set_data`] or
/// [`Self::set_codes`].
///
/// Queries only read the encoder, so it can be shared across threads as long
/// as each thread brings its own [`QueryScratch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "BoltEncoderRaw")]
pub struct BoltEncoder {
    width: CodeWidth,
    scale: f32,
    offsets: Vec<f32>,
    accumulation: Accumulation,
    codebooks: Option<Codebooks>,
    codes: Option<CodeMatrix>,
}

impl BoltEncoder {
    /// Create an encoder for `nbytes` bytes per vector.
    ///
    /// Fails with [`BoltError::InvalidCodeWidth`] unless `nbytes` is one of
    /// `{2, 8, 16, 24, 32}`; no encoder exists for any other width.
    pub fn new(nbytes: usize, scale: f32) -> Result<Self> {
        let width = CodeWidth::try_from(nbytes).inspect_err(|err| {
            tracing::error!(nbytes, %err, "rejected code width");
        })?;
        check_scale(scale)?;
        Ok(Self {
            width,
            scale,
            offsets: vec![0.0; width.ncodebooks()],
            accumulation: Accumulation::default(),
            codebooks: None,
            codes: None,
        })
    }

    pub fn from_config(config: &BoltConfig) -> Result<Self> {
        let mut encoder = Self::new(config.nbytes, config.scale)?;
        encoder.accumulation = config.accumulation;
        Ok(encoder)
    }

    pub fn width(&self) -> CodeWidth {
        self.width
    }

    pub fn nbytes(&self) -> usize {
        self.width.nbytes()
    }

    pub fn ncodebooks(&self) -> usize {
        self.width.ncodebooks()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// One additive offset per codebook (zero until set).
    pub fn offsets(&self) -> &[f32] {
        &self.offsets
    }

    /// Policy used by scratch from [`Self::new_scratch`].
    pub fn accumulation(&self) -> Accumulation {
        self.accumulation
    }

    pub fn codebooks(&self) -> Option<&Codebooks> {
        self.codebooks.as_ref()
    }

    pub fn codes(&self) -> Option<&CodeMatrix> {
        self.codes.as_ref()
    }

    /// Logical rows in the installed database, 0 if none.
    pub fn nrows(&self) -> usize {
        self.codes.as_ref().map_or(0, CodeMatrix::nrows)
    }

    pub fn set_scale(&mut self, scale: f32) -> Result<()> {
        check_scale(scale)?;
        self.scale = scale;
        Ok(())
    }

    pub fn set_offsets(&mut self, offsets: &[f32]) -> Result<()> {
        check_offsets(offsets, self.ncodebooks())?;
        self.offsets.copy_from_slice(offsets);
        Ok(())
    }

    pub fn set_accumulation(&mut self, accumulation: Accumulation) {
        self.accumulation = accumulation;
    }

    /// Install centroids from an `m × n` row-major matrix.
    ///
    /// `m` must be `2 * nbytes * 16` (sixteen rows per codebook, codebook 0
    /// first) and `n` is the subvector length. Replaces any previous
    /// centroids.
    pub fn set_centroids(&mut self, x: &[f32], m: usize, n: usize) -> Result<()> {
        let shape = CentroidShape::new(m, n, self.width)?;
        let codebooks = Codebooks::from_rows(x, shape)?;
        tracing::debug!(
            nbytes = self.nbytes(),
            subvector_len = n,
            dim = codebooks.dim(),
            "installed centroids"
        );
        self.codebooks = Some(codebooks);
        Ok(())
    }

    /// Encode `m` row-major vectors of dimension `n`.
    ///
    /// Each subvector gets the index of its nearest centroid (squared L2,
    /// lowest index on ties). The result is zero-padded to a multiple of 32
    /// rows.
    pub fn encode(&self, x: &[f32], m: usize, n: usize) -> Result<CodeMatrix> {
        let codebooks = self.require_codebooks()?;
        if m == 0 || n == 0 {
            return Err(BoltError::EmptyInput("vectors"));
        }
        // every subvector needs at least one coordinate
        if n <= self.ncodebooks() {
            return Err(BoltError::InvalidParameter(format!(
                "dimension {n} must exceed the {} codebooks",
                self.ncodebooks()
            )));
        }
        if n != codebooks.dim() {
            return Err(BoltError::shape("vector dimension", codebooks.dim(), n));
        }
        if x.len() != m * n {
            return Err(BoltError::shape("vectors", m * n, x.len()));
        }

        let sublen = codebooks.subvector_len();
        let mut out = CodeMatrix::zeroed(m, self.width);
        for (row, vector) in x.chunks_exact(n).enumerate() {
            let subvectors = vector.chunks_exact(CODEBOOKS_PER_BYTE * sublen);
            for (j, (byte, pair)) in out.row_mut(row).iter_mut().zip(subvectors).enumerate() {
                let (even, odd) = pair.split_at(sublen);
                let m0 = CODEBOOKS_PER_BYTE * j;
                *byte = pack_pair(codebooks.nearest(m0, even), codebooks.nearest(m0 + 1, odd));
            }
        }
        Ok(out)
    }

    /// Encode `m × n` vectors and keep them as the database.
    pub fn set_data(&mut self, x: &[f32], m: usize, n: usize) -> Result<()> {
        let codes = self.encode(x, m, n)?;
        tracing::debug!(
            nrows = codes.nrows(),
            padded_rows = codes.padded_rows(),
            "encoded database"
        );
        self.codes = Some(codes);
        Ok(())
    }

    /// Install pre-computed codes, one index per codebook per row.
    ///
    /// `codes` is `m × n` with `n == 2 * nbytes` and every value `< 16`;
    /// indices are packed two per byte, even codebook in the low nibble.
    pub fn set_codes(&mut self, codes: &[u8], m: usize, n: usize) -> Result<()> {
        let matrix = CodeMatrix::from_unpacked(codes, m, n, self.width)?;
        tracing::debug!(
            nrows = matrix.nrows(),
            padded_rows = matrix.padded_rows(),
            "installed codes"
        );
        self.codes = Some(matrix);
        Ok(())
    }

    /// Install already packed codes (`m × nbytes`).
    pub fn set_packed_codes(&mut self, codes: &[u8], m: usize, n: usize) -> Result<()> {
        let matrix = CodeMatrix::from_packed(codes, m, n, self.width)?;
        tracing::debug!(nrows = matrix.nrows(), "installed packed codes");
        self.codes = Some(matrix);
        Ok(())
    }

    /// A [`LutBuilder`] over this encoder's centroids, offsets and scale.
    pub fn lut_builder(&self) -> Result<LutBuilder<'_>> {
        LutBuilder::new(self.require_codebooks()?, &self.offsets, self.scale)
    }

    /// Fill `out` with the L2 table for `query`.
    pub fn lut_l2(&self, query: &[f32], out: &mut Lut) -> Result<()> {
        self.lut_builder()?.build(query, Reduction::L2, out)
    }

    /// Fill `out` with the (negated) dot-product table for `query`.
    pub fn lut_dot(&self, query: &[f32], out: &mut Lut) -> Result<()> {
        self.lut_builder()?.build(query, Reduction::DotProd, out)
    }

    /// Fresh per-query buffers sized for this encoder.
    pub fn new_scratch(&self) -> QueryScratch {
        QueryScratch::new(self.width).with_accumulation(self.accumulation)
    }

    fn require_codebooks(&self) -> Result<&Codebooks> {
        self.codebooks
            .as_ref()
            .ok_or(BoltError::NotConfigured("centroids"))
    }

    pub(crate) fn require_codes(&self) -> Result<&CodeMatrix> {
        self.codes.as_ref().ok_or(BoltError::NotConfigured("codes"))
    }
}

/// Serialized form, checked before it becomes a [`BoltEncoder`].
#[derive(Deserialize)]
struct BoltEncoderRaw {
    width: CodeWidth,
    scale: f32,
    offsets: Vec<f32>,
    accumulation: Accumulation,
    codebooks: Option<Codebooks>,
    codes: Option<CodeMatrix>,
}

impl TryFrom<BoltEncoderRaw> for BoltEncoder {
    type Error = BoltError;

    fn try_from(raw: BoltEncoderRaw) -> Result<Self> {
        check_scale(raw.scale)?;
        check_offsets(&raw.offsets, raw.width.ncodebooks())?;
        if let Some(cb) = &raw.codebooks {
            if cb.width() != raw.width {
                let (expected, actual) = (raw.width.nbytes(), cb.width().nbytes());
                return Err(BoltError::shape("centroid nbytes", expected, actual));
            }
        }
        if let Some(codes) = &raw.codes {
            if codes.width() != raw.width {
                let (expected, actual) = (raw.width.nbytes(), codes.nbytes());
                return Err(BoltError::shape("code nbytes", expected, actual));
            }
        }
        Ok(Self {
            width: raw.width,
            scale: raw.scale,
            offsets: raw.offsets,
            accumulation: raw.accumulation,
            codebooks: raw.codebooks,
            codes: raw.codes,
        })
    }
}

fn check_offsets(offsets: &[f32], ncodebooks: usize) -> Result<()> {
    if offsets.len() != ncodebooks {
        return Err(BoltError::shape("offsets", ncodebooks, offsets.len()));
    }
    if let Some(bad) = offsets.iter().find(|v| !v.is_finite()) {
        return Err(BoltError::InvalidParameter(format!(
            "offsets must be finite, got {bad}"
        )));
    }
    Ok(())
}

fn check_scale(scale: f32) -> Result<()> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(BoltError::InvalidParameter(format!(
            "scale must be finite and > 0, got {scale}"
        )));
    }
    Ok(())
}

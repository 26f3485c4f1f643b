//! Per-query lookup tables.
//!
//! A [`Lut`] is a `16 × ncodebooks` byte matrix stored column-major: the 16
//! entries for codebook `m` are contiguous, which is exactly one 128-bit
//! shuffle table for the scan kernel.
//!
//! Entry `(i, m)` is the raw score of the query's `m`-th subvector against
//! centroid `i` of codebook `m`, mapped to a byte:
//!
//! ```text
//! byte = clamp(round(raw * scale + offsets[m]), 0, 255)
//! ```
//!
//! `raw` is the squared L2 distance for [`Reduction::L2`] and the *negated*
//! dot product for [`Reduction::DotProd`], so a smaller byte always means a
//! closer match. The mapping is lossy; values outside `[0, 255]` saturate and
//! are counted in [`Lut::saturated`].

use super::codebooks::{CentroidScores, Codebooks};
use super::{padded_rows, CodeWidth, Reduction, NCENTROIDS};
use crate::error::{BoltError, Result};
use crate::simd::{self, F32_LANES};

/// Quantized per-codebook, per-centroid scores for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lut {
    width: CodeWidth,
    /// `[codebook][centroid]`
    data: Vec<u8>,
    saturated: usize,
}

impl Lut {
    /// All-zero table sized for `width`.
    pub fn zeroed(width: CodeWidth) -> Self {
        Self {
            width,
            data: vec![0u8; NCENTROIDS * width.ncodebooks()],
            saturated: 0,
        }
    }

    /// Build a table from raw column-major bytes (`16 × ncodebooks`).
    pub fn from_bytes(bytes: &[u8], width: CodeWidth) -> Result<Self> {
        let expected = NCENTROIDS * width.ncodebooks();
        if bytes.len() != expected {
            return Err(BoltError::shape("lut bytes", expected, bytes.len()));
        }
        Ok(Self {
            width,
            data: bytes.to_vec(),
            saturated: 0,
        })
    }

    pub fn width(&self) -> CodeWidth {
        self.width
    }

    pub fn ncodebooks(&self) -> usize {
        self.width.ncodebooks()
    }

    /// Entry for `centroid` of `codebook`.
    #[inline]
    pub fn get(&self, centroid: usize, codebook: usize) -> u8 {
        self.data[codebook * NCENTROIDS + centroid]
    }

    /// The 16 entries of codebook `m`.
    #[inline]
    pub fn column(&self, m: usize) -> &[u8] {
        &self.data[m * NCENTROIDS..(m + 1) * NCENTROIDS]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Entries whose scaled score fell outside `[0, 255]` in the last build.
    pub fn saturated(&self) -> usize {
        self.saturated
    }

    fn reset(&mut self, width: CodeWidth) {
        self.width = width;
        self.data.clear();
        self.data.resize(NCENTROIDS * width.ncodebooks(), 0);
        self.saturated = 0;
    }
}

/// Applies a codec's centroids, offsets and scale to queries.
#[derive(Debug, Clone, Copy)]
pub struct LutBuilder<'a> {
    codebooks: &'a Codebooks,
    offsets: &'a [f32],
    scale: f32,
}

impl<'a> LutBuilder<'a> {
    pub fn new(codebooks: &'a Codebooks, offsets: &'a [f32], scale: f32) -> Result<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(BoltError::InvalidParameter(format!(
                "scale must be finite and > 0, got {scale}"
            )));
        }
        if offsets.len() != codebooks.ncodebooks() {
            return Err(BoltError::shape(
                "offsets",
                codebooks.ncodebooks(),
                offsets.len(),
            ));
        }
        Ok(Self {
            codebooks,
            offsets,
            scale,
        })
    }

    /// Fill `out` with the table for one query.
    pub fn build(&self, query: &[f32], reduction: Reduction, out: &mut Lut) -> Result<()> {
        check_reduction(reduction)?;
        let cb = self.codebooks;
        if query.len() != cb.dim() {
            return Err(BoltError::shape("query", cb.dim(), query.len()));
        }

        out.reset(cb.width());
        let sublen = cb.subvector_len();
        for pair in 0..cb.width().nbytes() {
            let raw: [CentroidScores; 2] = std::array::from_fn(|k| {
                let m = 2 * pair + k;
                let sub = &query[m * sublen..(m + 1) * sublen];
                match reduction {
                    Reduction::DotProd => negate(cb.dots(m, sub)),
                    _ => cb.distances(m, sub),
                }
            });
            self.store_pair(out, pair, raw);
        }

        if out.saturated > 0 {
            tracing::trace!(
                saturated = out.saturated,
                ?reduction,
                "lut entries clamped to [0, 255]"
            );
        }
        Ok(())
    }

    /// Tables for `nqueries` row-major queries at once.
    ///
    /// Centroid dot products for every query come from one
    /// [`simd::narrow_matmul`] against a block-diagonal centroid matrix; L2
    /// uses `‖q‖² − 2 q·c + ‖c‖²`. For L2 both sides are first shifted by
    /// each codebook's centroid mean, which leaves distances unchanged and
    /// keeps the expansion from cancelling when coordinates are large.
    /// Entries can differ from [`Self::build`] by one where the two float
    /// evaluation orders round differently.
    pub fn build_batch(
        &self,
        queries: &[f32],
        nqueries: usize,
        reduction: Reduction,
    ) -> Result<Vec<Lut>> {
        check_reduction(reduction)?;
        let cb = self.codebooks;
        let dim = cb.dim();
        if nqueries == 0 {
            return Err(BoltError::EmptyInput("queries"));
        }
        if queries.len() != nqueries * dim {
            return Err(BoltError::shape("queries", nqueries * dim, queries.len()));
        }

        let sublen = cb.subvector_len();
        let ncodebooks = cb.ncodebooks();
        let n = padded_rows(nqueries);
        let d = dim.next_multiple_of(simd::MATMUL_READ_COLS);
        let ncols = ncodebooks * NCENTROIDS;

        // coordinate j of the query belongs to codebook j / sublen
        let shift = match reduction {
            Reduction::L2 => cb.means(),
            _ => vec![0.0f32; dim],
        };

        let mut a = vec![0.0f32; n * d];
        for (q, query) in queries.chunks_exact(dim).enumerate() {
            for (j, &v) in query.iter().enumerate() {
                a[j * n + q] = v - shift[j];
            }
        }
        let mut b = vec![0.0f32; d * ncols];
        let mut centroid_norms = vec![0.0f32; ncols];
        for m in 0..ncodebooks {
            for i in 0..NCENTROIDS {
                let c = m * NCENTROIDS + i;
                for j in 0..sublen {
                    let v = cb.coord(m, i, j) - shift[m * sublen + j];
                    b[c * d + m * sublen + j] = v;
                    centroid_norms[c] += v * v;
                }
            }
        }
        let mut products = vec![0.0f32; n * ncols];
        simd::narrow_matmul(&a, &b, n, d, ncols, &mut products)?;

        let mut sub = vec![0.0f32; sublen];
        let mut luts = Vec::with_capacity(nqueries);
        for (q, query) in queries.chunks_exact(dim).enumerate() {
            let mut lut = Lut::zeroed(cb.width());
            for pair in 0..cb.width().nbytes() {
                let raw: [CentroidScores; 2] = std::array::from_fn(|k| {
                    let m = 2 * pair + k;
                    for (j, dst) in sub.iter_mut().enumerate() {
                        *dst = query[m * sublen + j] - shift[m * sublen + j];
                    }
                    let query_norm = simd::dot(&sub, &sub);
                    std::array::from_fn(|half| {
                        std::array::from_fn(|l| {
                            let c = m * NCENTROIDS + half * F32_LANES + l;
                            let prod = products[c * n + q];
                            match reduction {
                                Reduction::L2 => query_norm - 2.0 * prod + centroid_norms[c],
                                _ => -prod,
                            }
                        })
                    })
                });
                self.store_pair(&mut lut, pair, raw);
            }
            luts.push(lut);
        }
        Ok(luts)
    }

    /// Quantize two codebooks' raw scores and write them as one 32-byte run.
    fn store_pair(&self, out: &mut Lut, pair: usize, raw: [CentroidScores; 2]) {
        let mut groups = [[0.0f32; F32_LANES]; 4];
        for (k, scores) in raw.iter().enumerate() {
            let offset = simd::splat(self.offsets[2 * pair + k]);
            for (half, lanes) in scores.iter().enumerate() {
                let v = simd::fma(*lanes, simd::splat(self.scale), offset);
                if simd::horizontal_min(v) < 0.0 || simd::horizontal_max(v) > 255.0 {
                    out.saturated += v.iter().filter(|&&x| !(0.0..=255.0).contains(&x)).count();
                }
                groups[2 * k + half] = v.map(|x| x.clamp(0.0, 255.0));
            }
        }
        let bytes = simd::pack_floats_to_bytes(&groups, false);
        let start = pair * 2 * NCENTROIDS;
        out.data[start..start + 2 * NCENTROIDS].copy_from_slice(&bytes);
    }
}

fn check_reduction(reduction: Reduction) -> Result<()> {
    match reduction {
        Reduction::L2 | Reduction::DotProd => Ok(()),
        Reduction::L1 => Err(BoltError::UnsupportedReduction(reduction)),
    }
}

fn negate(scores: CentroidScores) -> CentroidScores {
    scores.map(|half| half.map(|x| -x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::shape::CentroidShape;

    fn codebooks(width: CodeWidth, subvector_len: usize) -> Codebooks {
        codebooks_at(0.0, width, subvector_len)
    }

    fn codebooks_at(base: f32, width: CodeWidth, subvector_len: usize) -> Codebooks {
        // centroid i of codebook m has every coordinate = base + i + 0.25m
        let mut x = Vec::new();
        for m in 0..width.ncodebooks() {
            for i in 0..NCENTROIDS {
                for _ in 0..subvector_len {
                    x.push(base + i as f32 + 0.25 * m as f32);
                }
            }
        }
        let shape =
            CentroidShape::new(width.ncodebooks() * NCENTROIDS, subvector_len, width).unwrap();
        Codebooks::from_rows(&x, shape).unwrap()
    }

    #[test]
    fn test_l2_lut_matches_formula() {
        let width = CodeWidth::B2;
        let cb = codebooks(width, 2);
        let offsets = vec![1.0, 2.0, 3.0, 4.0];
        let builder = LutBuilder::new(&cb, &offsets, 0.5).unwrap();

        let query: Vec<f32> = (0..8).map(|j| (j / 2) as f32 * 1.5).collect();
        let mut lut = Lut::zeroed(width);
        builder.build(&query, Reduction::L2, &mut lut).unwrap();

        for m in 0..4 {
            let q = (m as f32) * 1.5;
            for i in 0..NCENTROIDS {
                let c = i as f32 + 0.25 * m as f32;
                let raw = 2.0 * (c - q) * (c - q);
                let expected = (raw * 0.5 + offsets[m]).round_ties_even().clamp(0.0, 255.0) as u8;
                assert_eq!(lut.get(i, m), expected, "centroid {i} codebook {m}");
            }
        }
        assert_eq!(lut.column(3).len(), NCENTROIDS);
        assert_eq!(lut.saturated(), 0);
    }

    #[test]
    fn test_dot_lut_is_negated() {
        let width = CodeWidth::B2;
        let cb = codebooks(width, 1);
        let offsets = vec![100.0; 4];
        let builder = LutBuilder::new(&cb, &offsets, 1.0).unwrap();

        let query = vec![2.0, 2.0, 2.0, 2.0];
        let mut lut = Lut::zeroed(width);
        builder.build(&query, Reduction::DotProd, &mut lut).unwrap();

        // larger centroid => larger dot => smaller entry
        for i in 1..NCENTROIDS {
            assert!(lut.get(i, 0) < lut.get(i - 1, 0));
        }
        assert_eq!(lut.get(0, 0), 100);
        assert_eq!(lut.get(15, 0), 70);
    }

    #[test]
    fn test_extreme_scores_saturate() {
        let width = CodeWidth::B2;
        let cb = codebooks(width, 1);
        let offsets = vec![0.0; 4];
        let builder = LutBuilder::new(&cb, &offsets, 1e6).unwrap();

        let mut lut = Lut::zeroed(width);
        builder
            .build(&[1e3, -1e3, 0.0, 1e3], Reduction::L2, &mut lut)
            .unwrap();
        assert!(lut.as_bytes().iter().all(|&b| b == 0 || b == 255));
        assert!(lut.saturated() > 0);

        builder
            .build(&[1e3, -1e3, 0.0, 1e3], Reduction::DotProd, &mut lut)
            .unwrap();
        // negative raw scores clamp to 0, positive ones to 255
        assert_eq!(lut.get(5, 0), 0);
        assert_eq!(lut.get(5, 1), 255);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let width = CodeWidth::B2;
        let cb = codebooks(width, 2);
        let offsets = vec![0.0; 4];

        assert!(LutBuilder::new(&cb, &offsets, 0.0).is_err());
        assert!(LutBuilder::new(&cb, &offsets, f32::NAN).is_err());
        assert!(LutBuilder::new(&cb, &offsets[..3], 1.0).is_err());

        let builder = LutBuilder::new(&cb, &offsets, 1.0).unwrap();
        let mut lut = Lut::zeroed(width);
        assert!(matches!(
            builder.build(&[0.0; 7], Reduction::L2, &mut lut),
            Err(BoltError::ShapeMismatch { .. })
        ));
        assert_eq!(
            builder.build(&[0.0; 8], Reduction::L1, &mut lut),
            Err(BoltError::UnsupportedReduction(Reduction::L1))
        );
    }

    #[test]
    fn test_batch_matches_single() {
        let width = CodeWidth::B8;
        let cb = codebooks(width, 3);
        let offsets: Vec<f32> = (0..16).map(|m| m as f32).collect();
        let builder = LutBuilder::new(&cb, &offsets, 0.3).unwrap();

        let nqueries = 5;
        let dim = cb.dim();
        let queries: Vec<f32> = (0..nqueries * dim)
            .map(|i| ((i * 37) % 29) as f32 * 0.4 - 3.0)
            .collect();

        for reduction in [Reduction::L2, Reduction::DotProd] {
            let batch = builder.build_batch(&queries, nqueries, reduction).unwrap();
            assert_eq!(batch.len(), nqueries);
            for (q, lut) in batch.iter().enumerate() {
                let mut single = Lut::zeroed(width);
                builder
                    .build(&queries[q * dim..(q + 1) * dim], reduction, &mut single)
                    .unwrap();
                for (a, b) in lut.as_bytes().iter().zip(single.as_bytes()) {
                    assert!(a.abs_diff(*b) <= 1, "{reduction:?} query {q}: {a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn test_batch_l2_with_large_coordinates() {
        let width = CodeWidth::B2;
        let sublen = 4;
        let cb = codebooks_at(3000.0, width, sublen);
        let offsets = vec![0.0; 4];
        let builder = LutBuilder::new(&cb, &offsets, 10.0).unwrap();

        // query q sits between centroids 5 and 6 of every codebook
        let nqueries = 3;
        let dim = cb.dim();
        let queries: Vec<f32> = (0..nqueries * dim)
            .map(|k| {
                let (q, m) = (k / dim, (k % dim) / sublen);
                3005.4 + 0.3 * q as f32 + 0.25 * m as f32
            })
            .collect();

        let batch = builder.build_batch(&queries, nqueries, Reduction::L2).unwrap();
        for (q, lut) in batch.iter().enumerate() {
            let mut single = Lut::zeroed(width);
            builder
                .build(&queries[q * dim..(q + 1) * dim], Reduction::L2, &mut single)
                .unwrap();
            for (a, b) in lut.as_bytes().iter().zip(single.as_bytes()) {
                assert!(a.abs_diff(*b) <= 1, "query {q}: {a} vs {b}");
            }
            for m in 0..4 {
                let argmin = |t: &Lut| (0..NCENTROIDS).min_by_key(|&i| t.get(i, m)).unwrap();
                assert_eq!(argmin(lut), argmin(&single), "query {q} codebook {m}");
                assert_eq!(argmin(&single), if q == 0 { 5 } else { 6 });
            }
        }
    }
}

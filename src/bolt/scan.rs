//! Lookup-table scan over packed codes.
//!
//! # Algorithm
//!
//! Rows are processed in blocks of 32. For each code byte column the kernel
//! gathers that byte from the block's 32 rows, splits it into the two 4-bit
//! indices and looks both up in their codebook's 16-entry table:
//!
//! ```text
//! score(row) = Σ_m lut[m][code_m(row)]
//! ```
//!
//! On x86_64 with AVX2 the lookup is `vpshufb`: the 16-byte table for a
//! codebook is broadcast to both halves of a register and indexed by 32
//! nibbles at once.
//!
//! # Accumulation policies
//!
//! | Policy | Lanes | Exact when |
//! |--------|-------|------------|
//! | [`Accumulation::FastU8`] | 8-bit throughout | the full sum is ≤ 255 |
//! | [`Accumulation::SafeU16`] | 16-bit throughout | always (≤ 64 × 255) |
//! | [`Accumulation::Upcast`] | 8-bit per K codebooks, then 16-bit | each K-group sum is ≤ 255 |
//!
//! **Correctness hazard**: the 8-bit policies never report overflow. A sum
//! past 255 wraps modulo 256 and the row gets a wrong, usually *too small*,
//! score. Picking them is a promise about the LUT, e.g. entries bounded by
//! `255 / ncodebooks` for `FastU8` or `255 / K` for `Upcast`.
//!
//! The policy never changes what a score means: lower is more similar.

use serde::{Deserialize, Serialize};

use super::codes::CodeMatrix;
use super::lut::Lut;
use super::{BLOCK_ROWS, CODEBOOKS_PER_BYTE, NCENTROIDS};
use crate::error::{BoltError, Result};
use crate::simd;

/// Number of codebooks summed in 8-bit lanes before widening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpcastEvery {
    Four,
    Eight,
    Sixteen,
}

impl UpcastEvery {
    #[inline]
    pub const fn codebooks(self) -> usize {
        match self {
            UpcastEvery::Four => 4,
            UpcastEvery::Eight => 8,
            UpcastEvery::Sixteen => 16,
        }
    }
}

/// How per-codebook contributions are summed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Accumulation {
    /// Wrapping 8-bit sums.
    FastU8,
    /// 16-bit sums from the start.
    #[default]
    SafeU16,
    /// Wrapping 8-bit sums over groups of K codebooks, folded into 16 bits.
    Upcast(UpcastEvery),
}

impl Accumulation {
    /// Codebooks per 8-bit group, if the policy widens periodically.
    #[inline]
    fn group(self) -> Option<usize> {
        match self {
            Accumulation::Upcast(every) => Some(every.codebooks()),
            _ => None,
        }
    }
}

/// Scans a [`CodeMatrix`] with a [`Lut`] under one accumulation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanEngine {
    accumulation: Accumulation,
}

impl ScanEngine {
    pub fn new(accumulation: Accumulation) -> Self {
        Self { accumulation }
    }

    pub fn accumulation(&self) -> Accumulation {
        self.accumulation
    }

    /// Score every row, guard rows included.
    ///
    /// `out` must hold at least `codes.padded_rows()` values; the first
    /// `codes.nrows()` are the real scores.
    pub fn scan(&self, codes: &CodeMatrix, lut: &Lut, out: &mut [u16]) -> Result<()> {
        check_inputs(codes, lut, out.len())?;
        let nblocks = codes.padded_rows() / BLOCK_ROWS;
        let out = &mut out[..codes.padded_rows()];

        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") {
                tracing::trace!(
                    kernel = "avx2",
                    nblocks,
                    accumulation = ?self.accumulation,
                    "scan"
                );
                unsafe {
                    x86_64::scan_avx2(
                        codes.as_bytes(),
                        codes.nbytes(),
                        nblocks,
                        lut.as_bytes(),
                        self.accumulation,
                        out,
                    )
                };
                return Ok(());
            }
        }

        tracing::trace!(
            kernel = "portable",
            nblocks,
            accumulation = ?self.accumulation,
            "scan"
        );
        scan_portable(codes, lut, self.accumulation, out);
        Ok(())
    }

    /// Scores for the logical rows only.
    pub fn scan_to_vec(&self, codes: &CodeMatrix, lut: &Lut) -> Result<Vec<u16>> {
        let mut out = vec![0u16; codes.padded_rows()];
        self.scan(codes, lut, &mut out)?;
        out.truncate(codes.nrows());
        Ok(out)
    }

    /// Wrapping 8-bit scores written as bytes, regardless of the engine's
    /// policy. Exact only when every row's true sum is ≤ 255.
    pub fn scan_u8(codes: &CodeMatrix, lut: &Lut, out: &mut [u8]) -> Result<()> {
        check_inputs(codes, lut, out.len())?;
        let nblocks = codes.padded_rows() / BLOCK_ROWS;
        let out = &mut out[..codes.padded_rows()];

        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") {
                unsafe {
                    x86_64::scan_fast_u8_avx2(
                        codes.as_bytes(),
                        codes.nbytes(),
                        nblocks,
                        lut.as_bytes(),
                        out,
                    )
                };
                return Ok(());
            }
        }

        let mut wide = [0u16; BLOCK_ROWS];
        for block in 0..nblocks {
            scan_block_portable(codes, lut, Accumulation::FastU8, block, &mut wide);
            for (dst, &src) in out[block * BLOCK_ROWS..].iter_mut().zip(wide.iter()) {
                *dst = src as u8;
            }
        }
        Ok(())
    }

    /// Narrow 16-bit scores to bytes, saturating at 255.
    ///
    /// Both slices must have the same length, a multiple of 32 (a padded
    /// score buffer).
    pub fn saturate_to_u8(scores: &[u16], out: &mut [u8]) -> Result<()> {
        if scores.len() != out.len() {
            return Err(BoltError::shape("saturated scores", scores.len(), out.len()));
        }
        if scores.len() % BLOCK_ROWS != 0 {
            return Err(BoltError::InvalidParameter(format!(
                "score buffer length {} is not a multiple of {BLOCK_ROWS}",
                scores.len()
            )));
        }
        for (src, dst) in scores
            .chunks_exact(BLOCK_ROWS)
            .zip(out.chunks_exact_mut(BLOCK_ROWS))
        {
            let block: [u16; BLOCK_ROWS] = std::array::from_fn(|i| src[i]);
            dst.copy_from_slice(&simd::pack_u16_to_u8_saturating(&block));
        }
        Ok(())
    }

    /// Minimum score of each 32-row block; a trailing partial block is
    /// padded with `u16::MAX`.
    ///
    /// A block whose minimum is worse than the current k-th best candidate
    /// cannot contribute to a top-k result.
    pub fn block_minima(scores: &[u16]) -> Vec<u16> {
        scores
            .chunks(BLOCK_ROWS)
            .map(|block| {
                let lane = |i: usize| block.get(i).copied().unwrap_or(u16::MAX);
                let lo: [u16; 16] = std::array::from_fn(lane);
                let hi: [u16; 16] = std::array::from_fn(|i| lane(16 + i));
                simd::horizontal_min_u16(lo).min(simd::horizontal_min_u16(hi))
            })
            .collect()
    }
}

fn check_inputs(codes: &CodeMatrix, lut: &Lut, out_len: usize) -> Result<()> {
    if lut.width() != codes.width() {
        return Err(BoltError::shape(
            "lut codebooks",
            codes.width().ncodebooks(),
            lut.ncodebooks(),
        ));
    }
    if out_len < codes.padded_rows() {
        return Err(BoltError::shape("scan output", codes.padded_rows(), out_len));
    }
    Ok(())
}

/// Portable implementation of [`ScanEngine::scan`].
fn scan_portable(codes: &CodeMatrix, lut: &Lut, accumulation: Accumulation, out: &mut [u16]) {
    let mut block_out = [0u16; BLOCK_ROWS];
    for block in 0..codes.padded_rows() / BLOCK_ROWS {
        scan_block_portable(codes, lut, accumulation, block, &mut block_out);
        out[block * BLOCK_ROWS..(block + 1) * BLOCK_ROWS].copy_from_slice(&block_out);
    }
}

fn scan_block_portable(
    codes: &CodeMatrix,
    lut: &Lut,
    accumulation: Accumulation,
    block: usize,
    out: &mut [u16; BLOCK_ROWS],
) {
    let mut acc8 = [0u8; BLOCK_ROWS];
    let mut acc16 = [0u16; BLOCK_ROWS];
    let group = accumulation.group();

    for j in 0..codes.nbytes() {
        let lo_table = lut.column(CODEBOOKS_PER_BYTE * j);
        let hi_table = lut.column(CODEBOOKS_PER_BYTE * j + 1);
        for r in 0..BLOCK_ROWS {
            let byte = codes.row(block * BLOCK_ROWS + r)[j];
            let a = lo_table[(byte & 0x0f) as usize];
            let b = hi_table[(byte >> 4) as usize];
            match accumulation {
                Accumulation::SafeU16 => acc16[r] += a as u16 + b as u16,
                _ => acc8[r] = acc8[r].wrapping_add(a).wrapping_add(b),
            }
        }
        if group.is_some_and(|k| (CODEBOOKS_PER_BYTE * (j + 1)) % k == 0) {
            fold(&mut acc8, &mut acc16);
        }
    }
    fold(&mut acc8, &mut acc16);
    *out = acc16;
}

/// Widen the 8-bit partial sums into the 16-bit totals and reset them.
#[inline]
fn fold(acc8: &mut [u8; BLOCK_ROWS], acc16: &mut [u16; BLOCK_ROWS]) {
    for (wide, narrow) in acc16.iter_mut().zip(acc8.iter_mut()) {
        *wide += *narrow as u16;
        *narrow = 0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SIMD implementations
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
pub mod x86_64 {
    //! AVX2 shuffle-based scan kernels.

    use super::{Accumulation, BLOCK_ROWS, CODEBOOKS_PER_BYTE, NCENTROIDS};
    use std::arch::x86_64::*;

    /// Look up both codebooks of byte column `j` for one block of rows.
    ///
    /// Returns the 32 entries for the low-nibble codebook and the 32 for the
    /// high-nibble codebook, in row order.
    ///
    /// # Safety
    ///
    /// Requires AVX2. `codes` must hold `(block + 1) * 32` rows of `nbytes`
    /// and `lut` at least `16 * 2 * (j + 1)` bytes.
    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn lookup_column(
        codes: &[u8],
        nbytes: usize,
        block: usize,
        j: usize,
        lut: &[u8],
    ) -> (__m256i, __m256i) {
        let low_mask = _mm256_set1_epi8(0x0f);

        // Gather byte j of the block's rows (row-major storage)
        let mut column = [0u8; BLOCK_ROWS];
        for (r, c) in column.iter_mut().enumerate() {
            *c = codes[(block * BLOCK_ROWS + r) * nbytes + j];
        }
        let packed = _mm256_loadu_si256(column.as_ptr().cast());
        let lo_idx = _mm256_and_si256(packed, low_mask);
        let hi_idx = _mm256_and_si256(_mm256_srli_epi16(packed, 4), low_mask);

        let m = CODEBOOKS_PER_BYTE * j;
        let lo_table =
            _mm256_broadcastsi128_si256(_mm_loadu_si128(lut.as_ptr().add(m * NCENTROIDS).cast()));
        let hi_table = _mm256_broadcastsi128_si256(_mm_loadu_si128(
            lut.as_ptr().add((m + 1) * NCENTROIDS).cast(),
        ));

        (
            _mm256_shuffle_epi8(lo_table, lo_idx),
            _mm256_shuffle_epi8(hi_table, hi_idx),
        )
    }

    /// Zero-extend 32 bytes and add them to two registers of 16 `u16` each
    /// (rows 0..16 and 16..32).
    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn widen_add(lo: &mut __m256i, hi: &mut __m256i, x: __m256i) {
        *lo = _mm256_add_epi16(*lo, _mm256_cvtepu8_epi16(_mm256_castsi256_si128(x)));
        *hi = _mm256_add_epi16(*hi, _mm256_cvtepu8_epi16(_mm256_extracti128_si256(x, 1)));
    }

    /// AVX2 scan producing 16-bit scores.
    ///
    /// # Safety
    ///
    /// Requires AVX2. `codes` holds `nblocks * 32` rows of `nbytes`, `lut`
    /// holds `16 * 2 * nbytes` bytes and `out` at least `nblocks * 32` values.
    #[target_feature(enable = "avx2")]
    pub unsafe fn scan_avx2(
        codes: &[u8],
        nbytes: usize,
        nblocks: usize,
        lut: &[u8],
        accumulation: Accumulation,
        out: &mut [u16],
    ) {
        debug_assert!(codes.len() >= nblocks * BLOCK_ROWS * nbytes);
        debug_assert!(lut.len() >= CODEBOOKS_PER_BYTE * nbytes * NCENTROIDS);
        debug_assert!(out.len() >= nblocks * BLOCK_ROWS);
        let group = accumulation.group();

        for block in 0..nblocks {
            let mut acc8 = _mm256_setzero_si256();
            let mut acc16_lo = _mm256_setzero_si256();
            let mut acc16_hi = _mm256_setzero_si256();

            for j in 0..nbytes {
                let (d_lo, d_hi) = lookup_column(codes, nbytes, block, j, lut);
                match accumulation {
                    Accumulation::SafeU16 => {
                        widen_add(&mut acc16_lo, &mut acc16_hi, d_lo);
                        widen_add(&mut acc16_lo, &mut acc16_hi, d_hi);
                    }
                    _ => {
                        acc8 = _mm256_add_epi8(acc8, _mm256_add_epi8(d_lo, d_hi));
                    }
                }
                if group.is_some_and(|k| (CODEBOOKS_PER_BYTE * (j + 1)) % k == 0) {
                    widen_add(&mut acc16_lo, &mut acc16_hi, acc8);
                    acc8 = _mm256_setzero_si256();
                }
            }
            widen_add(&mut acc16_lo, &mut acc16_hi, acc8);

            let dst = out.as_mut_ptr().add(block * BLOCK_ROWS);
            _mm256_storeu_si256(dst.cast(), acc16_lo);
            _mm256_storeu_si256(dst.add(16).cast(), acc16_hi);
        }
    }

    /// AVX2 scan with wrapping 8-bit sums stored as bytes.
    ///
    /// # Safety
    ///
    /// Same requirements as [`scan_avx2`], with `out` in bytes.
    #[target_feature(enable = "avx2")]
    pub unsafe fn scan_fast_u8_avx2(
        codes: &[u8],
        nbytes: usize,
        nblocks: usize,
        lut: &[u8],
        out: &mut [u8],
    ) {
        debug_assert!(out.len() >= nblocks * BLOCK_ROWS);
        for block in 0..nblocks {
            let mut acc8 = _mm256_setzero_si256();
            for j in 0..nbytes {
                let (d_lo, d_hi) = lookup_column(codes, nbytes, block, j, lut);
                acc8 = _mm256_add_epi8(acc8, _mm256_add_epi8(d_lo, d_hi));
            }
            _mm256_storeu_si256(out.as_mut_ptr().add(block * BLOCK_ROWS).cast(), acc8);
        }
    }
}

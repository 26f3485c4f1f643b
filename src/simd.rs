//! Vector-math primitives with SIMD acceleration.
//!
//! Everything the codec, the LUT builder and the scan kernels need at the
//! register level lives here:
//!
//! - [`dot`]: dense dot product, from `innr` when the `innr` feature is on
//!   (default), portable otherwise
//! - [`fma`]: per-lane `a * b + c` with a single rounding
//! - [`pack_floats_to_bytes`]: 32 floats to 32 saturated bytes, order preserved
//! - [`pack_u16_to_u8_saturating`]: 32 u16 lanes to 32 saturated bytes
//! - [`horizontal_min`] / [`horizontal_max`] / [`horizontal_min_u16`]:
//!   log2(width) pairwise reductions
//! - [`narrow_matmul`]: blocked column-major `A · B` for thin outputs
//!
//! Each function has a portable implementation and, on x86_64, an AVX2 (+FMA)
//! path selected by runtime detection. Both paths produce identical results
//! for finite inputs that fit in `i32` after rounding.
//!
//! # Rounding
//!
//! [`fma`] is built on `f32::mul_add`, which is always fused: on targets
//! without a hardware FMA unit it lowers to a software `fmaf`, which is slow
//! but keeps the single rounding. Nothing in this crate falls back to a
//! separate multiply and add.
//!
//! ```rust
//! use bolt_vq::simd::{fma, horizontal_max};
//!
//! let a = [2.0_f32; 8];
//! let b = [3.0_f32; 8];
//! let c = [1.0_f32; 8];
//! assert_eq!(fma(a, b, c), [7.0; 8]);
//! assert_eq!(horizontal_max([1.0, 9.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]), 9.0);
//! ```

use crate::error::{BoltError, Result};

/// Number of `f32` lanes in one register (256-bit).
pub const F32_LANES: usize = 8;

/// Number of byte lanes in one register (256-bit).
pub const BYTE_LANES: usize = 32;

/// Input columns consumed per pass of [`narrow_matmul`].
pub const MATMUL_READ_COLS: usize = 4;

/// Output columns produced per pass of [`narrow_matmul`].
pub const MATMUL_WRITE_COLS: usize = 2;

/// Row granularity [`narrow_matmul`] requires.
pub const MATMUL_ROW_BLOCK: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Scalar helpers
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(feature = "innr")]
pub use innr::dot;

#[cfg(not(feature = "innr"))]
pub use fallback::dot;

#[cfg(not(feature = "innr"))]
mod fallback {
    //! Portable fallback when innr is not available.

    /// Dot product of two vectors (portable implementation).
    #[inline]
    #[must_use]
    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }
}

/// Broadcast one value to every lane.
#[inline]
#[must_use]
pub fn splat(x: f32) -> [f32; F32_LANES] {
    [x; F32_LANES]
}

// ─────────────────────────────────────────────────────────────────────────────
// Lane primitives
// ─────────────────────────────────────────────────────────────────────────────

/// Per-lane `a * b + c` with a single rounding.
#[inline]
#[must_use]
pub fn fma(
    a: [f32; F32_LANES],
    b: [f32; F32_LANES],
    c: [f32; F32_LANES],
) -> [f32; F32_LANES] {
    std::array::from_fn(|i| a[i].mul_add(b[i], c[i]))
}

/// Round four registers of floats to nearest (ties to even) and saturate
/// them into one register of bytes.
///
/// Output byte `8 * g + l` comes from `groups[g][l]`, i.e. the linear order of
/// the input floats. With `signed == true` each byte is the two's complement
/// of a value in `[-128, 127]`; otherwise the value lies in `[0, 255]`.
///
/// Inputs whose rounded value does not fit in `i32` (and NaN) produce
/// unspecified bytes; clamp beforehand if that can happen.
#[must_use]
pub fn pack_floats_to_bytes(groups: &[[f32; F32_LANES]; 4], signed: bool) -> [u8; BYTE_LANES] {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { x86_64::pack_floats_to_bytes(groups, signed) };
        }
    }
    pack_floats_to_bytes_portable(groups, signed)
}

/// Portable implementation of [`pack_floats_to_bytes`].
#[must_use]
pub fn pack_floats_to_bytes_portable(
    groups: &[[f32; F32_LANES]; 4],
    signed: bool,
) -> [u8; BYTE_LANES] {
    let mut out = [0u8; BYTE_LANES];
    for (g, group) in groups.iter().enumerate() {
        for (l, &x) in group.iter().enumerate() {
            let r = x.round_ties_even();
            out[g * F32_LANES + l] = if signed {
                r.clamp(-128.0, 127.0) as i8 as u8
            } else {
                r.clamp(0.0, 255.0) as u8
            };
        }
    }
    out
}

/// Saturate 32 `u16` lanes into 32 bytes, keeping lane order.
#[must_use]
pub fn pack_u16_to_u8_saturating(x: &[u16; BYTE_LANES]) -> [u8; BYTE_LANES] {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { x86_64::pack_u16_to_u8_saturating(x) };
        }
    }
    std::array::from_fn(|i| x[i].min(u8::MAX as u16) as u8)
}

/// Minimum over all lanes via three pairwise steps.
///
/// NaN lanes give an unspecified result.
#[must_use]
pub fn horizontal_min(x: [f32; F32_LANES]) -> f32 {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx") {
            return unsafe { x86_64::horizontal_min(x) };
        }
    }
    reduce_pairwise(x, f32::min)
}

/// Maximum over all lanes via three pairwise steps.
///
/// NaN lanes give an unspecified result.
#[must_use]
pub fn horizontal_max(x: [f32; F32_LANES]) -> f32 {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx") {
            return unsafe { x86_64::horizontal_max(x) };
        }
    }
    reduce_pairwise(x, f32::max)
}

/// Minimum over sixteen `u16` lanes via four pairwise steps.
#[must_use]
pub fn horizontal_min_u16(x: [u16; 16]) -> u16 {
    reduce_pairwise(x, std::cmp::min)
}

/// Fold the upper half of the lanes onto the lower half until one is left.
#[inline]
fn reduce_pairwise<T: Copy, const N: usize>(mut v: [T; N], combine: impl Fn(T, T) -> T) -> T {
    debug_assert!(N.is_power_of_two());
    let mut width = N;
    while width > 1 {
        width /= 2;
        for i in 0..width {
            v[i] = combine(v[i], v[i + width]);
        }
    }
    v[0]
}

// ─────────────────────────────────────────────────────────────────────────────
// Narrow matrix multiply
// ─────────────────────────────────────────────────────────────────────────────

/// Compute `out[N×M] = A[N×D] · B[D×M]`, all column-major.
///
/// Processes [`MATMUL_READ_COLS`] input columns and [`MATMUL_WRITE_COLS`]
/// output columns at a time so the broadcast coefficients and partial sums
/// stay in registers. The caller pads: `n % 32 == 0`, `d % 4 == 0`,
/// `m % 2 == 0`. `out` is overwritten.
pub fn narrow_matmul(
    a: &[f32],
    b: &[f32],
    n: usize,
    d: usize,
    m: usize,
    out: &mut [f32],
) -> Result<()> {
    if n % MATMUL_ROW_BLOCK != 0 {
        return Err(BoltError::InvalidParameter(format!(
            "narrow_matmul needs N divisible by {MATMUL_ROW_BLOCK}, got {n}"
        )));
    }
    if d % MATMUL_READ_COLS != 0 {
        return Err(BoltError::InvalidParameter(format!(
            "narrow_matmul needs D divisible by {MATMUL_READ_COLS}, got {d}"
        )));
    }
    if m % MATMUL_WRITE_COLS != 0 {
        return Err(BoltError::InvalidParameter(format!(
            "narrow_matmul needs M divisible by {MATMUL_WRITE_COLS}, got {m}"
        )));
    }
    if a.len() != n * d {
        return Err(BoltError::shape("matmul A", n * d, a.len()));
    }
    if b.len() != d * m {
        return Err(BoltError::shape("matmul B", d * m, b.len()));
    }
    if out.len() != n * m {
        return Err(BoltError::shape("matmul out", n * m, out.len()));
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            unsafe { x86_64::narrow_matmul(a, b, n, d, m, out) };
            return Ok(());
        }
    }
    narrow_matmul_portable(a, b, n, d, m, out);
    Ok(())
}

/// Portable implementation of [`narrow_matmul`]; shapes already validated.
fn narrow_matmul_portable(a: &[f32], b: &[f32], n: usize, d: usize, m: usize, out: &mut [f32]) {
    const R: usize = MATMUL_READ_COLS;
    const W: usize = MATMUL_WRITE_COLS;

    out.fill(0.0);
    for m0 in (0..m).step_by(W) {
        for j0 in (0..d).step_by(R) {
            let mut coeffs = [[0.0f32; W]; R];
            for (jj, row) in coeffs.iter_mut().enumerate() {
                for (mm, c) in row.iter_mut().enumerate() {
                    *c = b[(m0 + mm) * d + j0 + jj];
                }
            }

            for row in (0..n).step_by(F32_LANES) {
                let mut sums = [[0.0f32; F32_LANES]; W];
                for (mm, sum) in sums.iter_mut().enumerate() {
                    let start = (m0 + mm) * n + row;
                    sum.copy_from_slice(&out[start..start + F32_LANES]);
                }
                for (jj, row_coeffs) in coeffs.iter().enumerate() {
                    let start = (j0 + jj) * n + row;
                    let mut avec = [0.0f32; F32_LANES];
                    avec.copy_from_slice(&a[start..start + F32_LANES]);
                    for (sum, &coeff) in sums.iter_mut().zip(row_coeffs.iter()) {
                        *sum = fma(avec, splat(coeff), *sum);
                    }
                }
                for (mm, sum) in sums.iter().enumerate() {
                    let start = (m0 + mm) * n + row;
                    out[start..start + F32_LANES].copy_from_slice(sum);
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SIMD implementations
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
pub mod x86_64 {
    //! AVX2/FMA implementations.

    use super::{BYTE_LANES, F32_LANES, MATMUL_READ_COLS, MATMUL_WRITE_COLS};
    use std::arch::x86_64::*;

    /// `a * b + c` on one register.
    ///
    /// # Safety
    ///
    /// Requires FMA. Caller must verify via runtime detection.
    #[inline]
    #[target_feature(enable = "fma")]
    pub unsafe fn fma256(a: __m256, b: __m256, c: __m256) -> __m256 {
        _mm256_fmadd_ps(a, b, c)
    }

    /// Pack four registers of floats into one register of bytes.
    ///
    /// The hardware packs interleave the four sources per 128-bit lane, so a
    /// final dword permutation restores linear order.
    ///
    /// # Safety
    ///
    /// Requires AVX2.
    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn pack_ps_to_epi8(
        x0: __m256,
        x1: __m256,
        x2: __m256,
        x3: __m256,
        signed: bool,
    ) -> __m256i {
        let a = _mm256_cvtps_epi32(x0);
        let b = _mm256_cvtps_epi32(x1);
        let c = _mm256_cvtps_epi32(x2);
        let d = _mm256_cvtps_epi32(x3);
        let ab = _mm256_packs_epi32(a, b);
        let cd = _mm256_packs_epi32(c, d);
        // [a_lo, b_lo, c_lo, d_lo | a_hi, b_hi, c_hi, d_hi]
        let abcd = if signed {
            _mm256_packs_epi16(ab, cd)
        } else {
            _mm256_packus_epi16(ab, cd)
        };
        _mm256_permutevar8x32_epi32(abcd, _mm256_setr_epi32(0, 4, 1, 5, 2, 6, 3, 7))
    }

    /// Array form of [`pack_ps_to_epi8`].
    ///
    /// # Safety
    ///
    /// Requires AVX2.
    #[target_feature(enable = "avx2")]
    pub unsafe fn pack_floats_to_bytes(
        groups: &[[f32; F32_LANES]; 4],
        signed: bool,
    ) -> [u8; BYTE_LANES] {
        let packed = pack_ps_to_epi8(
            _mm256_loadu_ps(groups[0].as_ptr()),
            _mm256_loadu_ps(groups[1].as_ptr()),
            _mm256_loadu_ps(groups[2].as_ptr()),
            _mm256_loadu_ps(groups[3].as_ptr()),
            signed,
        );
        let mut out = [0u8; BYTE_LANES];
        _mm256_storeu_si256(out.as_mut_ptr().cast(), packed);
        out
    }

    /// Saturate two registers of `u16` into one register of bytes, in order.
    ///
    /// # Safety
    ///
    /// Requires AVX2.
    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn packus_epu16_ordered(lo: __m256i, hi: __m256i) -> __m256i {
        // packus reads i16, so clamp as unsigned first
        let cap = _mm256_set1_epi16(u8::MAX as i16);
        let lo = _mm256_min_epu16(lo, cap);
        let hi = _mm256_min_epu16(hi, cap);
        // [lo_0..8, hi_0..8 | lo_8..16, hi_8..16]
        let packed = _mm256_packus_epi16(lo, hi);
        _mm256_permute4x64_epi64(packed, 0b11_01_10_00)
    }

    /// Array form of [`packus_epu16_ordered`].
    ///
    /// # Safety
    ///
    /// Requires AVX2.
    #[target_feature(enable = "avx2")]
    pub unsafe fn pack_u16_to_u8_saturating(x: &[u16; BYTE_LANES]) -> [u8; BYTE_LANES] {
        let lo = _mm256_loadu_si256(x.as_ptr().cast());
        let hi = _mm256_loadu_si256(x.as_ptr().add(16).cast());
        let mut out = [0u8; BYTE_LANES];
        _mm256_storeu_si256(out.as_mut_ptr().cast(), packus_epu16_ordered(lo, hi));
        out
    }

    /// # Safety
    ///
    /// Requires AVX.
    #[target_feature(enable = "avx")]
    pub unsafe fn horizontal_min(x: [f32; F32_LANES]) -> f32 {
        let a = _mm256_loadu_ps(x.as_ptr());
        // swap 128-bit halves, then pairs of dwords, then adjacent dwords
        let t = _mm256_min_ps(a, _mm256_permute2f128_ps(a, a, 1));
        let t = _mm256_min_ps(t, _mm256_shuffle_ps(t, t, 0b01_00_11_10));
        let t = _mm256_min_ps(t, _mm256_shuffle_ps(t, t, 0b10_11_00_01));
        _mm256_cvtss_f32(t)
    }

    /// # Safety
    ///
    /// Requires AVX.
    #[target_feature(enable = "avx")]
    pub unsafe fn horizontal_max(x: [f32; F32_LANES]) -> f32 {
        let a = _mm256_loadu_ps(x.as_ptr());
        let t = _mm256_max_ps(a, _mm256_permute2f128_ps(a, a, 1));
        let t = _mm256_max_ps(t, _mm256_shuffle_ps(t, t, 0b01_00_11_10));
        let t = _mm256_max_ps(t, _mm256_shuffle_ps(t, t, 0b10_11_00_01));
        _mm256_cvtss_f32(t)
    }

    /// Blocked column-major matmul, 4 input x 2 output columns per pass.
    ///
    /// # Safety
    ///
    /// Requires AVX2 and FMA. Shapes must already be validated by
    /// [`super::narrow_matmul`].
    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn narrow_matmul(
        a: &[f32],
        b: &[f32],
        n: usize,
        d: usize,
        m: usize,
        out: &mut [f32],
    ) {
        const R: usize = MATMUL_READ_COLS;
        const W: usize = MATMUL_WRITE_COLS;

        out.fill(0.0);
        let a_ptr = a.as_ptr();
        let out_ptr = out.as_mut_ptr();

        for m0 in (0..m).step_by(W) {
            for j0 in (0..d).step_by(R) {
                let mut coeffs = [_mm256_setzero_ps(); R * W];
                for jj in 0..R {
                    for mm in 0..W {
                        coeffs[jj * W + mm] = _mm256_set1_ps(b[(m0 + mm) * d + j0 + jj]);
                    }
                }

                for row in (0..n).step_by(F32_LANES) {
                    let mut sums = [_mm256_setzero_ps(); W];
                    for (mm, sum) in sums.iter_mut().enumerate() {
                        *sum = _mm256_loadu_ps(out_ptr.add((m0 + mm) * n + row));
                    }
                    for jj in 0..R {
                        let avec = _mm256_loadu_ps(a_ptr.add((j0 + jj) * n + row));
                        for (mm, sum) in sums.iter_mut().enumerate() {
                            *sum = fma256(avec, coeffs[jj * W + mm], *sum);
                        }
                    }
                    for (mm, sum) in sums.iter().enumerate() {
                        _mm256_storeu_ps(out_ptr.add((m0 + mm) * n + row), *sum);
                    }
                }
            }
        }
    }
}

//! Property-based tests for the codec, LUT builder and scan engine.
//!
//! These tests verify invariants that should hold regardless of input:
//! - Encoded matrices are block-padded with zero guard rows
//! - Vectors built from centroids are their own nearest neighbors
//! - LUT entries saturate instead of wrapping
//! - Accumulation policies agree whenever no 8-bit sum overflows
//! - Dot-product tables rank larger inner products first
//! - A row scores better against itself than against its negation

use bolt_vq::bolt::{CodeMatrix, BLOCK_ROWS};
use bolt_vq::{
    Accumulation, BoltEncoder, CodeWidth, Lut, Reduction, ScanEngine, UpcastEvery, NCENTROIDS,
};
use proptest::prelude::*;

fn arb_width() -> impl Strategy<Value = CodeWidth> {
    prop::sample::select(CodeWidth::ALL.to_vec())
}

/// Centroid `i` of codebook `m` has every coordinate `i + 0.01 m`.
fn ladder_centroids(width: CodeWidth, subvector_len: usize) -> Vec<f32> {
    let mut x = Vec::with_capacity(width.ncodebooks() * NCENTROIDS * subvector_len);
    for m in 0..width.ncodebooks() {
        for i in 0..NCENTROIDS {
            x.extend(std::iter::repeat(i as f32 + 0.01 * m as f32).take(subvector_len));
        }
    }
    x
}

fn ladder_encoder(width: CodeWidth, subvector_len: usize, scale: f32) -> BoltEncoder {
    let mut enc = BoltEncoder::new(width.nbytes(), scale).unwrap();
    enc.set_centroids(
        &ladder_centroids(width, subvector_len),
        width.ncodebooks() * NCENTROIDS,
        subvector_len,
    )
    .unwrap();
    enc
}

/// Rows whose subvector for codebook `m` is exactly centroid `indices[r][m]`.
fn rows_from_indices(width: CodeWidth, subvector_len: usize, indices: &[Vec<u8>]) -> Vec<f32> {
    indices
        .iter()
        .flat_map(|row| {
            row.iter().enumerate().flat_map(move |(m, &i)| {
                std::iter::repeat(i as f32 + 0.01 * m as f32).take(subvector_len)
            })
        })
        .collect()
}

mod shape_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(40))]

        #[test]
        fn encode_pads_to_block_with_zero_guard_rows(
            width in arb_width(),
            nrows in 1usize..100,
            seed in any::<u64>(),
        ) {
            let enc = ladder_encoder(width, 2, 1.0);
            let dim = 2 * width.ncodebooks();
            let x: Vec<f32> = (0..nrows * dim)
                .map(|i| ((seed.wrapping_add(i as u64 * 2_654_435_761)) % 1700) as f32 / 100.0)
                .collect();

            let codes = enc.encode(&x, nrows, dim).unwrap();
            prop_assert_eq!(width.ncodebooks(), 2 * width.nbytes());
            prop_assert_eq!(codes.nbytes(), width.nbytes());
            prop_assert_eq!(codes.padded_rows(), nrows.div_ceil(BLOCK_ROWS) * BLOCK_ROWS);
            prop_assert_eq!(codes.as_bytes().len(), codes.padded_rows() * width.nbytes());
            for row in nrows..codes.padded_rows() {
                prop_assert!(codes.row(row).iter().all(|&b| b == 0), "guard row {} not zero", row);
            }
        }
    }
}

mod ranking_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(30))]

        #[test]
        fn centroid_rows_find_themselves(
            width in arb_width(),
            indices in prop::collection::vec(prop::collection::vec(0u8..16, 64), 1..60),
            pick in any::<prop::sample::Index>(),
        ) {
            let ncodebooks = width.ncodebooks();
            let indices: Vec<Vec<u8>> =
                indices.into_iter().map(|row| row[..ncodebooks].to_vec()).collect();
            let nrows = indices.len();
            let subvector_len = 2;
            let dim = ncodebooks * subvector_len;

            let mut enc = ladder_encoder(width, subvector_len, 1.0);
            let data = rows_from_indices(width, subvector_len, &indices);
            enc.set_data(&data, nrows, dim).unwrap();

            let codes = enc.codes().unwrap();
            for (r, row) in indices.iter().enumerate() {
                for (m, &i) in row.iter().enumerate() {
                    prop_assert_eq!(codes.index(r, m), i);
                }
            }

            let target = pick.index(nrows);
            let query = &data[target * dim..(target + 1) * dim];
            let mut scratch = enc.new_scratch();
            let scores = enc.score_l2(query, &mut scratch).unwrap().to_vec();
            prop_assert_eq!(scores[target], 0);

            let best = enc.knn(query, 1, Reduction::L2, &mut scratch).unwrap();
            prop_assert_eq!(best.len(), 1);
            // any zero-score row is an exact duplicate of the target's codes
            prop_assert_eq!(scores[best[0]], 0);
            prop_assert!(best[0] <= target);
            prop_assert_eq!(&indices[best[0]], &indices[target]);
        }
    }
}

mod quantization_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(60))]

        #[test]
        fn lut_entries_clamp_instead_of_wrapping(
            scale in 0.01f32..10.0,
            offsets in prop::collection::vec(-500.0f32..500.0, 4),
            query in prop::collection::vec(-20.0f32..20.0, 8),
            dot in any::<bool>(),
        ) {
            let width = CodeWidth::B2;
            let mut enc = ladder_encoder(width, 2, scale);
            enc.set_offsets(&offsets).unwrap();
            let reduction = if dot { Reduction::DotProd } else { Reduction::L2 };

            let mut lut = Lut::zeroed(width);
            enc.lut_builder().unwrap().build(&query, reduction, &mut lut).unwrap();

            let centroids = enc.codebooks().unwrap();
            for m in 0..4 {
                let sub = &query[2 * m..2 * m + 2];
                for i in 0..NCENTROIDS {
                    let c = centroids.centroid(m, i);
                    let raw: f64 = match reduction {
                        Reduction::L2 => sub
                            .iter()
                            .zip(&c)
                            .map(|(&q, &v)| (q as f64 - v as f64).powi(2))
                            .sum(),
                        _ => -sub
                            .iter()
                            .zip(&c)
                            .map(|(&q, &v)| q as f64 * v as f64)
                            .sum::<f64>(),
                    };
                    let expected = (raw * scale as f64 + offsets[m] as f64).clamp(0.0, 255.0);
                    let got = lut.get(i, m) as f64;
                    prop_assert!(
                        (got - expected).abs() <= 1.0,
                        "codebook {} centroid {}: got {} expected {}", m, i, got, expected
                    );
                }
            }
        }
    }
}

mod accumulation_props {
    use super::*;

    fn random_codes(width: CodeWidth, bytes: &[u8]) -> CodeMatrix {
        let nrows = bytes.len() / width.nbytes();
        CodeMatrix::from_packed(&bytes[..nrows * width.nbytes()], nrows, width.nbytes(), width)
            .unwrap()
    }

    fn all_policies() -> [Accumulation; 5] {
        [
            Accumulation::FastU8,
            Accumulation::SafeU16,
            Accumulation::Upcast(UpcastEvery::Four),
            Accumulation::Upcast(UpcastEvery::Eight),
            Accumulation::Upcast(UpcastEvery::Sixteen),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(40))]

        #[test]
        fn policies_agree_without_overflow(
            width in arb_width(),
            codes in prop::collection::vec(any::<u8>(), 64..2048),
            table in prop::collection::vec(any::<u8>(), 16 * 64),
        ) {
            prop_assume!(codes.len() >= width.nbytes());
            let codes = random_codes(width, &codes);
            let ncodebooks = width.ncodebooks();
            let bound = (255 / ncodebooks) as u8;
            let table: Vec<u8> = table[..16 * ncodebooks]
                .iter()
                .map(|&b| b % (bound + 1))
                .collect();
            let lut = Lut::from_bytes(&table, width).unwrap();

            let reference = ScanEngine::new(Accumulation::SafeU16)
                .scan_to_vec(&codes, &lut)
                .unwrap();
            for policy in all_policies() {
                let got = ScanEngine::new(policy).scan_to_vec(&codes, &lut).unwrap();
                prop_assert_eq!(&got, &reference, "policy {:?}", policy);
            }
        }

        #[test]
        fn fast_u8_wraps_where_safe_u16_is_exact(
            codes in prop::collection::vec(any::<u8>(), 2..256),
            table in prop::collection::vec(128u8..=255, 16 * 4),
        ) {
            let width = CodeWidth::B2;
            let codes = random_codes(width, &codes);
            let lut = Lut::from_bytes(&table, width).unwrap();

            let fast = ScanEngine::new(Accumulation::FastU8).scan_to_vec(&codes, &lut).unwrap();
            let safe = ScanEngine::new(Accumulation::SafeU16).scan_to_vec(&codes, &lut).unwrap();
            for row in 0..codes.nrows() {
                let truth: u32 = (0..4)
                    .map(|m| lut.get(codes.index(row, m) as usize, m) as u32)
                    .sum();
                prop_assert!(truth >= 512);
                prop_assert_eq!(safe[row] as u32, truth);
                prop_assert_eq!(fast[row] as u32, truth % 256);
            }
        }
    }
}

mod dot_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(40))]

        #[test]
        fn larger_dot_scores_lower(
            indices in prop::collection::vec(prop::collection::vec(0u8..16, 4), 2..40),
            q in 0.1f32..1.0,
        ) {
            let width = CodeWidth::B2;
            let nrows = indices.len();
            let mut enc = ladder_encoder(width, 1, 1.0);
            // -q * c ≥ -16, so an offset of 20 keeps every entry in range
            enc.set_offsets(&[20.0; 4]).unwrap();
            let data = rows_from_indices(width, 1, &indices);
            // dim 4 equals ncodebooks; install codes directly
            let flat: Vec<u8> = indices.iter().flatten().copied().collect();
            enc.set_codes(&flat, nrows, 4).unwrap();

            let query = vec![q; 4];
            let mut scratch = enc.new_scratch();
            let scores = enc.score_dot(&query, &mut scratch).unwrap().to_vec();

            let dots: Vec<f32> = data
                .chunks_exact(4)
                .map(|row| row.iter().map(|v| v * q).sum())
                .collect();
            for a in 0..nrows {
                for b in 0..nrows {
                    // separated by more than the rounding of four entries
                    if dots[a] > dots[b] + 4.0 {
                        prop_assert!(scores[a] < scores[b], "rows {} {}: {:?}", a, b, scores);
                    }
                }
            }
        }

        #[test]
        fn row_prefers_itself_over_its_negation(
            indices in prop::collection::vec(prop::collection::vec(2u8..16, 4), 1..40),
            pick in any::<prop::sample::Index>(),
        ) {
            let width = CodeWidth::B2;
            let subvector_len = 2;
            let dim = width.ncodebooks() * subvector_len;
            let nrows = indices.len();
            let mut enc = ladder_encoder(width, subvector_len, 0.25);
            // |v · c| ≤ 2 * 15.03², so 128 ± 0.25 * 452 stays inside [0, 255]
            enc.set_offsets(&[128.0; 4]).unwrap();
            let data = rows_from_indices(width, subvector_len, &indices);
            enc.set_data(&data, nrows, dim).unwrap();

            let row = pick.index(nrows);
            let v = &data[row * dim..(row + 1) * dim];
            let neg: Vec<f32> = v.iter().map(|x| -x).collect();
            let mut scratch = enc.new_scratch();
            let own = enc.score_dot(v, &mut scratch).unwrap()[row];
            let flipped = enc.score_dot(&neg, &mut scratch).unwrap()[row];
            prop_assert!(own < flipped, "row {}: {} vs {}", row, own, flipped);
        }
    }
}

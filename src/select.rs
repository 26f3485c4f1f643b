//! Top-k selection over scan scores.

use crate::bolt::{ScanEngine, BLOCK_ROWS};

/// Indices of the `k` smallest scores, best first; equal scores go to the
/// lower index.
///
/// Returns every index when `k >= scores.len()` and nothing when `k == 0`.
///
/// Blocks of 32 rows are visited in order of their minimum score, and the
/// walk stops at the first block whose minimum is worse than the current
/// k-th best. The result is the same as a full sort.
pub fn select_k(scores: &[u16], k: usize) -> Vec<usize> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }

    let minima = ScanEngine::block_minima(scores);
    let mut blocks: Vec<usize> = (0..minima.len()).collect();
    blocks.sort_unstable_by_key(|&b| (minima[b], b));

    let mut best: Vec<(u16, usize)> = Vec::with_capacity(k + BLOCK_ROWS);
    for b in blocks {
        if best.len() == k && minima[b] > best[k - 1].0 {
            break;
        }
        let start = b * BLOCK_ROWS;
        let end = (start + BLOCK_ROWS).min(scores.len());
        best.extend((start..end).map(|i| (scores[i], i)));
        best.sort_unstable();
        best.truncate(k);
    }

    best.into_iter().map(|(_, i)| i).collect()
}

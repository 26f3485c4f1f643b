//! Query facade: LUT build, scan and top-k in one call.

use super::encoder::BoltEncoder;
use super::lut::Lut;
use super::scan::{Accumulation, ScanEngine};
use super::{CodeWidth, Reduction};
use crate::error::Result;
use crate::select::select_k;

/// Per-query buffers: the LUT and the padded score array.
///
/// Reused across queries to avoid reallocation. Not shared: concurrent
/// queries each need their own.
#[derive(Debug, Clone)]
pub struct QueryScratch {
    lut: Lut,
    scores: Vec<u16>,
    accumulation: Accumulation,
}

impl QueryScratch {
    pub fn new(width: CodeWidth) -> Self {
        Self {
            lut: Lut::zeroed(width),
            scores: Vec::new(),
            accumulation: Accumulation::default(),
        }
    }

    pub fn with_accumulation(mut self, accumulation: Accumulation) -> Self {
        self.accumulation = accumulation;
        self
    }

    /// Table from the most recent query.
    pub fn lut(&self) -> &Lut {
        &self.lut
    }

    pub fn accumulation(&self) -> Accumulation {
        self.accumulation
    }
}

impl BoltEncoder {
    /// One score per database row for `query`; lower is more similar.
    pub fn scores<'s>(
        &self,
        query: &[f32],
        reduction: Reduction,
        scratch: &'s mut QueryScratch,
    ) -> Result<&'s [u16]> {
        let codes = self.require_codes()?;
        self.lut_builder()?.build(query, reduction, &mut scratch.lut)?;

        scratch.scores.resize(codes.padded_rows(), 0);
        ScanEngine::new(scratch.accumulation).scan(codes, &scratch.lut, &mut scratch.scores)?;
        Ok(&scratch.scores[..codes.nrows()])
    }

    /// Approximate squared L2 distance to every row.
    pub fn score_l2<'s>(&self, query: &[f32], scratch: &'s mut QueryScratch) -> Result<&'s [u16]> {
        self.scores(query, Reduction::L2, scratch)
    }

    /// Approximate negated dot product with every row.
    pub fn score_dot<'s>(
        &self,
        query: &[f32],
        scratch: &'s mut QueryScratch,
    ) -> Result<&'s [u16]> {
        self.scores(query, Reduction::DotProd, scratch)
    }

    /// Indices of the `k` best rows, best first.
    pub fn knn(
        &self,
        query: &[f32],
        k: usize,
        reduction: Reduction,
        scratch: &mut QueryScratch,
    ) -> Result<Vec<usize>> {
        self.knn_with(query, k, reduction, scratch, select_k)
    }

    /// Maximum inner product search: [`Self::knn`] with [`Reduction::DotProd`].
    pub fn knn_mips(
        &self,
        query: &[f32],
        k: usize,
        scratch: &mut QueryScratch,
    ) -> Result<Vec<usize>> {
        self.knn(query, k, Reduction::DotProd, scratch)
    }

    /// [`Self::knn`] with a caller-provided selection over the scores.
    pub fn knn_with<F>(
        &self,
        query: &[f32],
        k: usize,
        reduction: Reduction,
        scratch: &mut QueryScratch,
        select: F,
    ) -> Result<Vec<usize>>
    where
        F: FnOnce(&[u16], usize) -> Vec<usize>,
    {
        let scores = self.scores(query, reduction, scratch)?;
        Ok(select(scores, k))
    }

    /// [`Self::knn`] for `nqueries` row-major queries, sharing one batched
    /// LUT build.
    pub fn knn_batch(
        &self,
        queries: &[f32],
        nqueries: usize,
        k: usize,
        reduction: Reduction,
        accumulation: Accumulation,
    ) -> Result<Vec<Vec<usize>>> {
        let codes = self.require_codes()?;
        let luts = self.lut_builder()?.build_batch(queries, nqueries, reduction)?;

        let engine = ScanEngine::new(accumulation);
        let mut scores = vec![0u16; codes.padded_rows()];
        luts.iter()
            .map(|lut| {
                engine.scan(codes, lut, &mut scores)?;
                Ok(select_k(&scores[..codes.nrows()], k))
            })
            .collect()
    }
}

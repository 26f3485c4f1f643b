//! bolt-vq: 4-bit product quantization with byte lookup-table scans.
//!
//! Compresses float vectors to 2 to 32 bytes and answers approximate L2 and
//! inner-product queries by summing per-codebook byte tables over the
//! compressed database.
//!
//! - [`bolt`]: the codec ([`BoltEncoder`]), LUT construction, the scan
//!   engine and the query facade
//! - [`simd`]: vector-math primitives with AVX2 kernels and portable
//!   fallbacks (fma, float→byte packs, horizontal reductions, narrow matmul)
//! - [`select`]: default top-k over scan scores
//!
//! # Critical Nuances
//!
//! ## Scores Are Bytes, Not Distances
//!
//! Every LUT entry is `clamp(round(raw * scale + offset), 0, 255)`. `scale`
//! and per-codebook `offsets` come from whoever trained the centroids; they
//! decide how much of the raw score range survives. Badly chosen values
//! collapse distinct distances onto 0 or 255 and ranking degrades
//! silently (see [`bolt::Lut::saturated`]).
//!
//! ## Dot Products Are Negated
//!
//! [`bolt::Reduction::DotProd`] tables hold `-q·c`, so "lower is better"
//! holds for both reductions and one top-k routine serves L2 and MIPS.
//!
//! ## 8-Bit Accumulation Wraps
//!
//! [`bolt::Accumulation::SafeU16`] is always exact. The faster 8-bit
//! policies are only exact when the LUT values are small enough that no
//! partial sum passes 255; past that they wrap without notice.
//!
//! # Example
//!
//! ```rust
//! use bolt_vq::{BoltEncoder, Reduction, NCENTROIDS};
//!
//! let nbytes = 8;
//! let ncodebooks = 2 * nbytes;
//! let subvector_len = 2;
//!
//! // centroid i of every codebook is [i, i]
//! let centroids: Vec<f32> = (0..ncodebooks * NCENTROIDS)
//!     .flat_map(|r| [(r % NCENTROIDS) as f32; 2])
//!     .collect();
//!
//! let mut encoder = BoltEncoder::new(nbytes, 0.5)?;
//! encoder.set_centroids(&centroids, ncodebooks * NCENTROIDS, subvector_len)?;
//!
//! let dim = ncodebooks * subvector_len;
//! let data: Vec<f32> = (0..50).flat_map(|r| vec![(r % 16) as f32; dim]).collect();
//! encoder.set_data(&data, 50, dim)?;
//!
//! let mut scratch = encoder.new_scratch();
//! let query = vec![5.0; dim];
//! assert_eq!(encoder.knn(&query, 2, Reduction::L2, &mut scratch)?, vec![5, 21]);
//! # Ok::<(), bolt_vq::BoltError>(())
//! ```

pub mod bolt;
pub mod error;
pub mod select;
pub mod simd;

pub use bolt::{
    Accumulation, BoltConfig, BoltEncoder, CodeWidth, Lut, LutBuilder, QueryScratch, Reduction,
    ScanEngine, UpcastEvery, NCENTROIDS,
};
pub use error::{BoltError, Result};
pub use select::select_k;

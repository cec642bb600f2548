//! Reslicing: the collective redistribution of worker chunks when the
//! active pattern changes.
//!
//! Every worker's new chunk is assembled from the relevant portions of
//! every worker's old chunk, so the result depends only on the logical
//! dataset, never on the previous partitioning. All workers reach this
//! point together; the exchange is a barrier.

use crate::block::worker_range;
use ndarray::{Array3, Axis, Slice};

#[derive(Debug, thiserror::Error)]
pub enum ResliceError {
    #[error("chunk assembly failed: {0}")]
    Assembly(String),

    #[error("assembled dataset has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: Vec<usize>,
    },

    #[error("element count changed during reslice: {expected} before, {actual} after")]
    CountMismatch { expected: usize, actual: usize },
}

/// Redistribute chunks partitioned along `from_dim` into chunks partitioned
/// along `to_dim`, preserving worker count.
///
/// Post-conditions: no element duplicated or dropped, the union of the new
/// chunks is the same logical dataset, and reslicing back reproduces the
/// original chunk boundaries exactly (the split depends only on the global
/// extent and worker count).
pub fn redistribute(
    chunks: &[Array3<f32>],
    from_dim: usize,
    to_dim: usize,
    global_shape: [usize; 3],
) -> Result<Vec<Array3<f32>>, ResliceError> {
    let workers = chunks.len();
    let before: usize = chunks.iter().map(|c| c.len()).sum();

    let views: Vec<_> = chunks.iter().map(|c| c.view()).collect();
    let global = ndarray::concatenate(Axis(from_dim), &views)
        .map_err(|e| ResliceError::Assembly(e.to_string()))?;
    if global.shape() != global_shape {
        return Err(ResliceError::ShapeMismatch {
            expected: global_shape,
            actual: global.shape().to_vec(),
        });
    }

    let extent = global_shape[to_dim];
    let mut out = Vec::with_capacity(workers);
    for w in 0..workers {
        let range = worker_range(extent, workers, w);
        out.push(
            global
                .slice_axis(Axis(to_dim), Slice::from(range))
                .to_owned(),
        );
    }

    let after: usize = out.iter().map(|c| c.len()).sum();
    if before != after {
        return Err(ResliceError::CountMismatch {
            expected: before,
            actual: after,
        });
    }
    Ok(out)
}

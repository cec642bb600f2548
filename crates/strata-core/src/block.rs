//! Blocks: worker-owned contiguous slabs of the dataset.
//!
//! A block is cut from a worker's chunk along the slicing dim of the active
//! pattern. It may carry halo slices on each side so padded methods can see
//! neighbouring data without crossing worker ownership.

use crate::pattern::Pattern;
use ndarray::{Array3, ArrayView3, ArrayViewMut3, Axis, Slice};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// Element type of the source payload, used for memory estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    UInt8,
    UInt16,
    Float32,
    Float64,
}

impl DType {
    pub fn bytes(self) -> usize {
        match self {
            DType::UInt8 => 1,
            DType::UInt16 => 2,
            DType::Float32 => 4,
            DType::Float64 => 8,
        }
    }
}

/// Boundary fill policy for halo slices at the global edges of the dataset.
///
/// This is declared per method because it affects numerical behaviour at
/// the data edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Mirror about the edge (index -1 maps to 1).
    #[default]
    Reflect,
    /// Fill with zeros.
    Zero,
    /// Repeat the edge slice.
    Clamp,
}

/// Map a possibly out-of-range slice index to a source index.
///
/// Returns `None` when the policy is `Zero` and the index is outside
/// `0..extent`; the caller fills those slices with zeros.
pub(crate) fn edge_index(index: isize, extent: usize, policy: EdgePolicy) -> Option<usize> {
    let last = extent.saturating_sub(1);
    if index >= 0 && (index as usize) < extent {
        return Some(index as usize);
    }
    match policy {
        EdgePolicy::Zero => None,
        EdgePolicy::Clamp => Some(if index < 0 { 0 } else { last }),
        EdgePolicy::Reflect => {
            let mirrored = if index < 0 {
                (-index) as usize
            } else {
                (2 * last).saturating_sub(index as usize)
            };
            Some(mirrored.min(last))
        }
    }
}

/// The global index range a worker owns along the partitioned axis.
///
/// The split is as even as possible: any two workers' extents differ by at
/// most one slice, and the ranges exactly cover `0..extent` with no overlap.
pub fn worker_range(extent: usize, workers: usize, worker: usize) -> Range<usize> {
    debug_assert!(workers > 0 && worker < workers);
    (extent * worker / workers)..(extent * (worker + 1) / workers)
}

/// Auxiliary arrays that ride along with every block, keyed to the same
/// axes as the data: rotation angles per projection, dark/flat reference
/// frames per detector pixel.
#[derive(Debug, Clone, Default)]
pub struct AuxData {
    pub angles: Vec<f32>,
    pub darks: Option<Array3<f32>>,
    pub flats: Option<Array3<f32>>,
}

/// Errors from block construction.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("replacement data has {actual} slices along dim {dim}, expected {expected}")]
    SliceCountMismatch {
        dim: usize,
        expected: usize,
        actual: usize,
    },
}

/// A contiguous slab of the dataset, exclusively owned by one worker while
/// a step processes it.
#[derive(Debug, Clone)]
pub struct Block {
    /// Block payload, including any halo slices along the slicing dim.
    data: Array3<f32>,
    /// Halo slices on each side currently present in `data`.
    halo: usize,
    /// Global offset of the core region (halo excluded).
    global_index: [usize; 3],
    /// Shape of the full dataset this block was cut from.
    global_shape: [usize; 3],
    pattern: Pattern,
    aux: Arc<AuxData>,
}

impl Block {
    pub fn new(
        data: Array3<f32>,
        halo: usize,
        global_index: [usize; 3],
        global_shape: [usize; 3],
        pattern: Pattern,
        aux: Arc<AuxData>,
    ) -> Self {
        Self {
            data,
            halo,
            global_index,
            global_shape,
            pattern,
            aux,
        }
    }

    /// Full payload view, halo included.
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// Mutable payload view, for methods that work in place.
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        self.data.view_mut()
    }

    /// Payload view with halo slices stripped.
    pub fn core(&self) -> ArrayView3<'_, f32> {
        let dim = self.slicing_dim();
        let end = self.data.shape()[dim] - self.halo;
        self.data
            .slice_axis(Axis(dim), Slice::from(self.halo..end))
    }

    pub fn halo(&self) -> usize {
        self.halo
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    pub fn slicing_dim(&self) -> usize {
        self.pattern.slicing_dim()
    }

    pub fn global_index(&self) -> [usize; 3] {
        self.global_index
    }

    pub fn global_shape(&self) -> [usize; 3] {
        self.global_shape
    }

    /// Extent of the core region along the slicing dim.
    pub fn core_slices(&self) -> usize {
        self.data.shape()[self.slicing_dim()] - 2 * self.halo
    }

    pub fn is_padded(&self) -> bool {
        self.halo > 0
    }

    pub fn aux(&self) -> &AuxData {
        &self.aux
    }

    /// Replace the payload with unpadded output data.
    ///
    /// The slicing-dim extent must match the current core extent; the
    /// non-slice dimensions may differ (dims-changing methods). The block's
    /// recorded global shape is updated accordingly.
    pub fn with_core_data(mut self, data: Array3<f32>) -> Result<Self, BlockError> {
        let dim = self.slicing_dim();
        let expected = self.core_slices();
        let actual = data.shape()[dim];
        if actual != expected {
            return Err(BlockError::SliceCountMismatch {
                dim,
                expected,
                actual,
            });
        }

        let mut global_shape = [0usize; 3];
        for (axis, out) in global_shape.iter_mut().enumerate() {
            *out = if axis == dim {
                self.global_shape[dim]
            } else {
                data.shape()[axis]
            };
        }
        let mut global_index = [0usize; 3];
        global_index[dim] = self.global_index[dim];

        self.data = data;
        self.halo = 0;
        self.global_index = global_index;
        self.global_shape = global_shape;
        Ok(self)
    }
}

//! Worker-partitioned dataset store.
//!
//! The store owns one chunk per worker, split along the slicing dim of the
//! active pattern. Blocks are cut from chunks on demand (with halo padding
//! when a method asks for it) and committed back after each step.

use crate::block::{edge_index, worker_range, AuxData, Block, EdgePolicy};
use crate::io::{DataSource, SourceError};
use crate::pattern::Pattern;
use crate::reslice::{redistribute, ResliceError};
use ndarray::{Array3, Axis, Slice};
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("worker {worker}: block core shape {actual:?} does not match expected non-slice dims {expected:?}")]
    BlockShape {
        worker: usize,
        expected: (usize, usize),
        actual: Vec<usize>,
    },

    #[error("worker {worker}: block at global slice {start} does not fit chunk range {range:?}")]
    BlockOutOfRange {
        worker: usize,
        start: usize,
        range: Range<usize>,
    },

    #[error("worker {worker}: block index {index} out of range, chunk splits into {count} blocks")]
    BlockIndex {
        worker: usize,
        index: usize,
        count: usize,
    },

    #[error("global slice {index} outside dataset extent {extent}")]
    SliceRange { index: usize, extent: usize },

    #[error("worker {worker}: slice {slice} written by more than one block")]
    OverlappingWrite { worker: usize, slice: usize },

    #[error("worker {worker}: slice {slice} not covered by any block")]
    Coverage { worker: usize, slice: usize },
}

/// The dataset, partitioned across workers along the active pattern's
/// slicing dim.
#[derive(Debug, Clone)]
pub struct BlockStore {
    chunks: Vec<Array3<f32>>,
    pattern: Pattern,
    global_shape: [usize; 3],
    aux: Arc<AuxData>,
    workers: usize,
}

impl BlockStore {
    /// Load the dataset from a source, partitioned for `workers` along the
    /// slicing dim of `pattern`.
    pub fn from_source(
        source: &dyn DataSource,
        workers: usize,
        pattern: Pattern,
    ) -> Result<Self, StoreError> {
        let workers = workers.max(1);
        let global_shape = source.global_shape();
        let dim = pattern.slicing_dim();
        let extent = global_shape[dim];

        let mut chunks = Vec::with_capacity(workers);
        for w in 0..workers {
            chunks.push(source.read_chunk(dim, worker_range(extent, workers, w))?);
        }
        let aux = Arc::new(source.aux()?);

        Ok(Self {
            chunks,
            pattern,
            global_shape,
            aux,
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    pub fn global_shape(&self) -> [usize; 3] {
        self.global_shape
    }

    pub fn aux(&self) -> Arc<AuxData> {
        Arc::clone(&self.aux)
    }

    fn slicing_dim(&self) -> usize {
        self.pattern.slicing_dim()
    }

    /// Extents of the two dimensions that are not sliced over, in axis
    /// order.
    pub fn non_slice_dims(&self) -> (usize, usize) {
        match self.slicing_dim() {
            0 => (self.global_shape[1], self.global_shape[2]),
            _ => (self.global_shape[0], self.global_shape[2]),
        }
    }

    /// The global slice range a worker's chunk covers.
    pub fn chunk_range(&self, worker: usize) -> Range<usize> {
        worker_range(self.global_shape[self.slicing_dim()], self.workers, worker)
    }

    /// Number of blocks a worker's chunk splits into at `max_slices` per
    /// block.
    pub fn block_count(&self, worker: usize, max_slices: usize) -> usize {
        self.chunk_range(worker).len().div_ceil(max_slices.max(1))
    }

    /// One global slice of the dataset, wherever it currently lives.
    fn global_slice(&self, index: usize) -> Result<ndarray::ArrayView3<'_, f32>, StoreError> {
        let dim = self.slicing_dim();
        for w in 0..self.workers {
            let range = self.chunk_range(w);
            if range.contains(&index) {
                let local = index - range.start;
                return Ok(self.chunks[w].slice_axis(Axis(dim), Slice::from(local..local + 1)));
            }
        }
        Err(StoreError::SliceRange {
            index,
            extent: self.global_shape[dim],
        })
    }

    /// Cut block `index` from a worker's chunk, padding with `halo` slices
    /// on each side filled per `edges`.
    ///
    /// Halo slices may come from neighbouring workers' chunks; at the
    /// global edges of the dataset they are synthesised per the policy.
    /// Fails if `index` is past the chunk's block count.
    pub fn read_block(
        &self,
        worker: usize,
        index: usize,
        max_slices: usize,
        halo: usize,
        edges: EdgePolicy,
    ) -> Result<Block, StoreError> {
        let dim = self.slicing_dim();
        let chunk_range = self.chunk_range(worker);
        let max_slices = max_slices.max(1);

        let count = self.block_count(worker, max_slices);
        if index >= count {
            return Err(StoreError::BlockIndex {
                worker,
                index,
                count,
            });
        }

        let local_start = index * max_slices;
        let local_end = (local_start + max_slices).min(chunk_range.len());
        let core_start = chunk_range.start + local_start;
        let core_len = local_end - local_start;

        let mut shape = self.global_shape;
        shape[dim] = core_len + 2 * halo;
        let mut data = Array3::<f32>::zeros((shape[0], shape[1], shape[2]));

        let extent = self.global_shape[dim];
        for p in 0..core_len + 2 * halo {
            let g = core_start as isize - halo as isize + p as isize;
            if let Some(src) = edge_index(g, extent, edges) {
                data.slice_axis_mut(Axis(dim), Slice::from(p..p + 1))
                    .assign(&self.global_slice(src)?);
            }
        }

        let mut global_index = [0usize; 3];
        global_index[dim] = core_start;
        Ok(Block::new(
            data,
            halo,
            global_index,
            self.global_shape,
            self.pattern,
            Arc::clone(&self.aux),
        ))
    }

    /// Replace every worker's chunk with the step's output blocks.
    ///
    /// `outputs[worker]` holds that worker's blocks in any order; together
    /// their cores must tile the worker's slice range exactly. `out_ns` is
    /// the output's non-slice dimensions (unchanged for most methods).
    pub fn commit_step(
        &mut self,
        outputs: Vec<Vec<Block>>,
        out_ns: (usize, usize),
    ) -> Result<(), StoreError> {
        let dim = self.slicing_dim();

        let mut new_chunks = Vec::with_capacity(self.workers);
        for (worker, blocks) in outputs.into_iter().enumerate() {
            let range = self.chunk_range(worker);
            let shape = match dim {
                0 => (range.len(), out_ns.0, out_ns.1),
                _ => (out_ns.0, range.len(), out_ns.1),
            };
            let mut chunk = Array3::<f32>::zeros(shape);
            let mut written = vec![false; range.len()];

            for block in blocks {
                let core = block.core();
                let expected = match dim {
                    0 => (core.shape()[1], core.shape()[2]),
                    _ => (core.shape()[0], core.shape()[2]),
                };
                if expected != out_ns {
                    return Err(StoreError::BlockShape {
                        worker,
                        expected: out_ns,
                        actual: core.shape().to_vec(),
                    });
                }

                let start = block.global_index()[dim];
                let len = core.shape()[dim];
                if start < range.start || start + len > range.end {
                    return Err(StoreError::BlockOutOfRange {
                        worker,
                        start,
                        range: range.clone(),
                    });
                }
                let local = start - range.start;
                for s in local..local + len {
                    if written[s] {
                        return Err(StoreError::OverlappingWrite {
                            worker,
                            slice: range.start + s,
                        });
                    }
                    written[s] = true;
                }
                chunk
                    .slice_axis_mut(Axis(dim), Slice::from(local..local + len))
                    .assign(&core);
            }

            if let Some(s) = written.iter().position(|w| !w) {
                return Err(StoreError::Coverage {
                    worker,
                    slice: range.start + s,
                });
            }
            new_chunks.push(chunk);
        }

        self.chunks = new_chunks;
        match dim {
            0 => {
                self.global_shape[1] = out_ns.0;
                self.global_shape[2] = out_ns.1;
            }
            _ => {
                self.global_shape[0] = out_ns.0;
                self.global_shape[2] = out_ns.1;
            }
        }
        Ok(())
    }

    /// Repartition all chunks for a new pattern orientation.
    ///
    /// A no-op when the target pattern slices the same dim.
    pub fn reslice(&mut self, to: Pattern) -> Result<(), ResliceError> {
        let from_dim = self.slicing_dim();
        let to_dim = to.slicing_dim();
        if from_dim == to_dim {
            self.pattern = to;
            return Ok(());
        }
        self.chunks = redistribute(&self.chunks, from_dim, to_dim, self.global_shape)?;
        self.pattern = to;
        Ok(())
    }

    /// Reassemble the full dataset from all chunks, in global order.
    pub fn assemble(&self) -> Array3<f32> {
        let views: Vec<_> = self.chunks.iter().map(|c| c.view()).collect();
        ndarray::concatenate(Axis(self.slicing_dim()), &views)
            .unwrap_or_else(|_| Array3::zeros((0, 0, 0)))
    }
}

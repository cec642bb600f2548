//! Loader and result-sink boundaries.
//!
//! The engine's external surface is file-shaped: a `DataSource` supplies
//! the initial volume (shape, dtype, block reads, auxiliary arrays) and a
//! `ResultSink` accepts block payloads at global offsets. In-memory
//! implementations back the tests.

use crate::block::{AuxData, DType};
use crate::pattern::Pattern;
use ndarray::{Array3, ArrayView3, Axis, Slice};
use std::ops::Range;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("requested range {start}..{end} exceeds extent {extent} along dim {dim}")]
    OutOfRange {
        dim: usize,
        start: usize,
        end: usize,
        extent: usize,
    },

    #[error("source read failed: {0}")]
    Read(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("write of shape {shape:?} at {index:?} does not fit output {global:?}")]
    OutOfBounds {
        shape: Vec<usize>,
        index: [usize; 3],
        global: [usize; 3],
    },

    #[error("sink write failed: {0}")]
    Write(String),
}

/// Supplies the initial dataset.
pub trait DataSource {
    fn global_shape(&self) -> [usize; 3];

    /// Element type of the raw payload (the engine works in f32 after
    /// loading; this drives memory estimation of the load itself).
    fn dtype(&self) -> DType;

    /// Read a contiguous slab of the global volume along `dim`.
    fn read_chunk(&self, dim: usize, range: Range<usize>) -> Result<Array3<f32>, SourceError>;

    /// Auxiliary arrays keyed to the same axes (angles, darks, flats).
    fn aux(&self) -> Result<AuxData, SourceError>;
}

/// One block's contribution to a persisted output volume.
#[derive(Debug)]
pub struct WriteRequest<'a> {
    /// Index of the producing step within the pipeline.
    pub step_index: usize,
    /// Dotted method path of the producing step.
    pub method: &'a str,
    pub data: ArrayView3<'a, f32>,
    pub global_index: [usize; 3],
    pub global_shape: [usize; 3],
    pub pattern: Pattern,
}

/// Accepts block payloads and assembles persisted volumetric outputs.
pub trait ResultSink {
    fn write_block(&mut self, req: &WriteRequest<'_>) -> Result<(), SinkError>;

    /// Stride-downsampled preview of a block. Implementations may ignore
    /// previews entirely.
    fn write_preview(&mut self, req: &WriteRequest<'_>, stride: usize) -> Result<(), SinkError> {
        let _ = (req, stride);
        Ok(())
    }

    /// Called exactly once at the end of a run. `complete` is false when
    /// the run aborted and whatever was written is partial.
    fn finalize(&mut self, complete: bool) -> Result<(), SinkError>;
}

/// Downsample a block view by `stride`, phase-aligned to the global grid:
/// only elements whose global index is a multiple of the stride survive, so
/// block boundaries do not shift the sampling.
pub fn downsample(view: ArrayView3<'_, f32>, global_index: [usize; 3], stride: usize) -> Array3<f32> {
    let stride = stride.max(1);
    let mut out = view;
    for axis in 0..3 {
        let phase = (stride - global_index[axis] % stride) % stride;
        out = out.slice_axis_move(
            Axis(axis),
            Slice::new(phase as isize, None, stride as isize),
        );
    }
    out.to_owned()
}

/// In-memory source over a pre-loaded volume.
#[derive(Debug, Clone)]
pub struct ArraySource {
    data: Array3<f32>,
    dtype: DType,
    aux: AuxData,
}

impl ArraySource {
    pub fn new(data: Array3<f32>, dtype: DType, aux: AuxData) -> Self {
        Self { data, dtype, aux }
    }
}

impl DataSource for ArraySource {
    fn global_shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn read_chunk(&self, dim: usize, range: Range<usize>) -> Result<Array3<f32>, SourceError> {
        let extent = self.data.shape()[dim];
        if range.end > extent {
            return Err(SourceError::OutOfRange {
                dim,
                start: range.start,
                end: range.end,
                extent,
            });
        }
        Ok(self
            .data
            .slice_axis(Axis(dim), Slice::from(range))
            .to_owned())
    }

    fn aux(&self) -> Result<AuxData, SourceError> {
        Ok(self.aux.clone())
    }
}

/// A persisted output volume in the in-memory sink.
#[derive(Debug, Clone)]
pub struct SinkOutput {
    pub data: Array3<f32>,
    pub written: usize,
}

/// In-memory sink assembling outputs keyed by `{step_index}_{method}`.
#[derive(Debug, Default)]
pub struct ArraySink {
    outputs: indexmap::IndexMap<String, SinkOutput>,
    previews: indexmap::IndexMap<String, SinkOutput>,
    complete: Option<bool>,
}

impl ArraySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self, key: &str) -> Option<&SinkOutput> {
        self.outputs.get(key)
    }

    pub fn preview(&self, key: &str) -> Option<&SinkOutput> {
        self.previews.get(key)
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&String, &SinkOutput)> {
        self.outputs.iter()
    }

    /// `Some(true)` after a successful run, `Some(false)` after an abort.
    pub fn completion(&self) -> Option<bool> {
        self.complete
    }

    fn place(
        target: &mut indexmap::IndexMap<String, SinkOutput>,
        key: String,
        data: ArrayView3<'_, f32>,
        index: [usize; 3],
        global: [usize; 3],
    ) -> Result<(), SinkError> {
        let shape = data.shape();
        for axis in 0..3 {
            if index[axis] + shape[axis] > global[axis] {
                return Err(SinkError::OutOfBounds {
                    shape: shape.to_vec(),
                    index,
                    global,
                });
            }
        }
        let entry = target.entry(key).or_insert_with(|| SinkOutput {
            data: Array3::zeros((global[0], global[1], global[2])),
            written: 0,
        });
        entry
            .data
            .slice_mut(ndarray::s![
                index[0]..index[0] + shape[0],
                index[1]..index[1] + shape[1],
                index[2]..index[2] + shape[2]
            ])
            .assign(&data);
        entry.written += data.len();
        Ok(())
    }
}

impl ResultSink for ArraySink {
    fn write_block(&mut self, req: &WriteRequest<'_>) -> Result<(), SinkError> {
        let key = format!("{:02}_{}", req.step_index, req.method);
        Self::place(
            &mut self.outputs,
            key,
            req.data,
            req.global_index,
            req.global_shape,
        )
    }

    fn write_preview(&mut self, req: &WriteRequest<'_>, stride: usize) -> Result<(), SinkError> {
        let stride = stride.max(1);
        let key = format!("{:02}_{}_preview", req.step_index, req.method);
        let down = downsample(req.data, req.global_index, stride);
        let mut index = [0usize; 3];
        let mut global = [0usize; 3];
        for axis in 0..3 {
            index[axis] = req.global_index[axis].div_ceil(stride);
            global[axis] = req.global_shape[axis].div_ceil(stride);
        }
        Self::place(&mut self.previews, key, down.view(), index, global)
    }

    fn finalize(&mut self, complete: bool) -> Result<(), SinkError> {
        self.complete = Some(complete);
        Ok(())
    }
}

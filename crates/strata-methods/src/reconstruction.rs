//! Unfiltered backprojection.

use ndarray::Array3;
use std::f32::consts::PI;
use strata_core::{
    block_bytes, Block, DType, Method, MethodDecl, MethodError, MethodOutput, Params,
};

/// Reconstructs each sinogram row into a square image by smearing every
/// projection back along its angle. Input blocks are (angle, row, column);
/// output blocks are (size, row, size) with `size` equal to the detector
/// column count, so the non-slice dimensions change.
///
/// Projection angles come from the auxiliary arrays; when absent, a uniform
/// half-turn sweep is assumed. The rotation center defaults to the detector
/// middle and is usually wired to a centering step's side output.
pub struct Backproject {
    decl: MethodDecl,
}

impl Backproject {
    pub fn new(decl: MethodDecl) -> Self {
        Self { decl }
    }
}

impl Method for Backproject {
    fn decl(&self) -> &MethodDecl {
        &self.decl
    }

    fn execute(&self, block: Block, params: &Params) -> Result<MethodOutput, MethodError> {
        let cols = block.global_shape()[2];
        let center = params
            .get("center")
            .and_then(|v| v.as_f64())
            .unwrap_or((cols as f64 - 1.0) / 2.0) as f32;
        if !(0.0..cols as f32).contains(&center) {
            return Err(MethodError::InvalidParameter {
                name: "center".into(),
                reason: format!("{center} outside detector width {cols}"),
            });
        }

        let out = {
            let sino = block.core();
            let (n_angles, rows) = (sino.shape()[0], sino.shape()[1]);
            let angles: Vec<f32> = if block.aux().angles.len() == n_angles {
                block.aux().angles.clone()
            } else {
                (0..n_angles)
                    .map(|a| a as f32 * PI / n_angles.max(1) as f32)
                    .collect()
            };

            let size = cols;
            let mid = (size as f32 - 1.0) / 2.0;
            let mut out = Array3::<f32>::zeros((size, rows, size));
            for (a, &theta) in angles.iter().enumerate() {
                let (sin_t, cos_t) = theta.sin_cos();
                for r in 0..rows {
                    for x in 0..size {
                        for z in 0..size {
                            let t = (x as f32 - mid) * cos_t + (z as f32 - mid) * sin_t + center;
                            let col = t.round();
                            if col >= 0.0 && (col as usize) < cols {
                                out[[x, r, z]] += sino[[a, r, col as usize]];
                            }
                        }
                    }
                }
            }
            let scale = PI / (2.0 * n_angles.max(1) as f32);
            out.mapv_inplace(|v| v * scale);
            out
        };

        let block = block
            .with_core_data(out)
            .map_err(|e| MethodError::Failed(e.to_string()))?;
        Ok(MethodOutput::new(block))
    }

    fn estimate_device_memory(
        &self,
        slices: usize,
        non_slice_dims: (usize, usize),
        dtype: DType,
        _params: &Params,
    ) -> u64 {
        // sinogram input plus the square output volume held simultaneously
        let input = block_bytes(slices, non_slice_dims, dtype);
        let output = block_bytes(slices, (non_slice_dims.1, non_slice_dims.1), dtype);
        input + output
    }

    fn output_dims(&self, non_slice_dims: (usize, usize), _params: &Params) -> (usize, usize) {
        (non_slice_dims.1, non_slice_dims.1)
    }
}

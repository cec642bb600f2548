//! Median filtering along the slicing axis.

use ndarray::Axis;
use strata_core::{Block, Method, MethodDecl, MethodError, MethodOutput, Params};

/// Replaces each element with the median over a window of neighbouring
/// slices along the current slicing axis. The window radius is the block's
/// halo, so the filter sees across block and worker boundaries without
/// ever reading another worker's data directly.
pub struct MedianFilter {
    decl: MethodDecl,
}

impl MedianFilter {
    pub fn new(decl: MethodDecl) -> Self {
        Self { decl }
    }
}

impl Method for MedianFilter {
    fn decl(&self) -> &MethodDecl {
        &self.decl
    }

    fn execute(&self, block: Block, _params: &Params) -> Result<MethodOutput, MethodError> {
        let radius = block.halo();
        if radius == 0 {
            return Ok(MethodOutput::new(block));
        }

        let dim = block.slicing_dim();
        let core_len = block.core_slices();
        let window = 2 * radius + 1;

        let mut out = block.core().to_owned();
        {
            let data = block.data();
            let mut buf = vec![0.0f32; window];
            for s in 0..core_len {
                let mut target = out.index_axis_mut(Axis(dim), s);
                for (idx, o) in target.indexed_iter_mut() {
                    for (w, slot) in buf.iter_mut().enumerate() {
                        // s..s+window indexes the padded payload directly
                        let full = match dim {
                            0 => [s + w, idx.0, idx.1],
                            _ => [idx.0, s + w, idx.1],
                        };
                        *slot = data[full];
                    }
                    buf.sort_by(|a, b| a.total_cmp(b));
                    *o = buf[radius];
                }
            }
        }

        let block = block
            .with_core_data(out)
            .map_err(|e| MethodError::Failed(e.to_string()))?;
        Ok(MethodOutput::new(block))
    }
}

//! Center-of-rotation estimation.

use ndarray::s;
use strata_core::{Block, Method, MethodDecl, MethodError, MethodOutput, Params};

/// Estimates the center of rotation from the middle sinogram as the
/// intensity-weighted mean detector column, and emits it as the side
/// output `cor`.
///
/// Only the block holding the dataset's middle detector row computes and
/// emits the value; every other block passes through untouched. Because a
/// sinogram block always holds complete (angle, column) planes for its
/// rows, the estimate does not depend on worker count or block size.
pub struct FindCenter {
    decl: MethodDecl,
}

impl FindCenter {
    pub fn new(decl: MethodDecl) -> Self {
        Self { decl }
    }
}

impl Method for FindCenter {
    fn decl(&self) -> &MethodDecl {
        &self.decl
    }

    fn execute(&self, block: Block, _params: &Params) -> Result<MethodOutput, MethodError> {
        let mid = block.global_shape()[1] / 2;
        let row_start = block.global_index()[1];
        let rows = block.core().shape()[1];

        let mut output = MethodOutput::new(block);
        if (row_start..row_start + rows).contains(&mid) {
            let sino = output.block.core();
            let plane = sino.slice(s![.., mid - row_start, ..]);

            let mut weighted = 0.0f64;
            let mut total = 0.0f64;
            for ((_, k), &v) in plane.indexed_iter() {
                weighted += k as f64 * v as f64;
                total += v as f64;
            }
            let cols = output.block.global_shape()[2];
            let cor = if total.abs() > f64::EPSILON {
                weighted / total
            } else {
                (cols as f64 - 1.0) / 2.0
            };
            log::debug!("estimated center of rotation at column {cor:.3}");
            output = output.with_side_output("cor", cor);
        }
        Ok(output)
    }
}

//! Device-memory estimation and block sizing.
//!
//! Estimates are advisory and deterministic: identical inputs always yield
//! identical predictions, so every worker derives the same block size. They
//! are consulted before a block is produced, never while it is in flight.

use crate::block::DType;
use crate::params::Params;
use crate::registry::{EstimatorKind, Method};

/// Plain byte size of a block with `slices` slabs along the partition axis.
pub fn block_bytes(slices: usize, non_slice_dims: (usize, usize), dtype: DType) -> u64 {
    slices as u64 * non_slice_dims.0 as u64 * non_slice_dims.1 as u64 * dtype.bytes() as u64
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error(
        "method '{method}' needs {needed} bytes of device memory even for a \
         single-slice block, budget is {budget} bytes"
    )]
    BudgetExceeded {
        method: String,
        needed: u64,
        budget: u64,
    },
}

/// Predicted peak device bytes for a candidate block, per the method's
/// declared memory model.
pub fn estimate(
    method: &dyn Method,
    slices: usize,
    non_slice_dims: (usize, usize),
    dtype: DType,
    params: &Params,
) -> u64 {
    let model = &method.decl().memory_gpu;
    match model.method {
        EstimatorKind::None => 0,
        EstimatorKind::Direct => {
            let multiplier = model.multiplier.unwrap_or(1.0);
            (multiplier * block_bytes(slices, non_slice_dims, dtype) as f64) as u64
        }
        EstimatorKind::Module => method.estimate_device_memory(slices, non_slice_dims, dtype, params),
    }
}

/// Largest block extent along the partition axis whose estimate fits the
/// budget, clamped to `total` slices.
///
/// Direct models are linear, so the answer is a division; module models may
/// scale non-linearly, so the answer is found by binary search (module
/// estimators must be monotonic in the slice count).
pub fn max_slices(
    method: &dyn Method,
    total: usize,
    non_slice_dims: (usize, usize),
    dtype: DType,
    params: &Params,
    budget: u64,
) -> Result<usize, MemoryError> {
    let total = total.max(1);
    let model = &method.decl().memory_gpu;
    match model.method {
        EstimatorKind::None => Ok(total),
        EstimatorKind::Direct => {
            let per_slice = estimate(method, 1, non_slice_dims, dtype, params);
            if per_slice > budget {
                return Err(MemoryError::BudgetExceeded {
                    method: method.decl().path(),
                    needed: per_slice,
                    budget,
                });
            }
            if per_slice == 0 {
                return Ok(total);
            }
            // the single-slice estimate truncates fractional bytes, so the
            // division can land one slice too high; walk down until the
            // candidate's own prediction fits
            let mut fit = ((budget / per_slice) as usize).min(total).max(1);
            while fit > 1 && estimate(method, fit, non_slice_dims, dtype, params) > budget {
                fit -= 1;
            }
            Ok(fit)
        }
        EstimatorKind::Module => {
            if estimate(method, 1, non_slice_dims, dtype, params) > budget {
                return Err(MemoryError::BudgetExceeded {
                    method: method.decl().path(),
                    needed: estimate(method, 1, non_slice_dims, dtype, params),
                    budget,
                });
            }
            let mut low = 1usize; // known to fit
            let mut high = total;
            while low < high {
                let mid = low + (high - low).div_ceil(2);
                if estimate(method, mid, non_slice_dims, dtype, params) <= budget {
                    low = mid;
                } else {
                    high = mid - 1;
                }
            }
            Ok(low)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::pattern::Pattern;
    use crate::registry::{
        Implementation, MemoryModel, MethodDecl, MethodError, MethodOutput,
    };

    const MIB: u64 = 1024 * 1024;

    struct Stub {
        decl: MethodDecl,
    }

    impl Stub {
        fn direct(multiplier: f64) -> Self {
            let decl = MethodDecl::new("testlib.prep", "scale", Pattern::Projection)
                .implementation(Implementation::Gpu)
                .memory(MemoryModel {
                    multiplier: Some(multiplier),
                    method: EstimatorKind::Direct,
                });
            Self { decl }
        }

        fn module() -> Self {
            let decl = MethodDecl::new("testlib.recon", "iterative", Pattern::Sinogram)
                .implementation(Implementation::Gpu)
                .memory(MemoryModel {
                    multiplier: None,
                    method: EstimatorKind::Module,
                });
            Self { decl }
        }
    }

    impl Method for Stub {
        fn decl(&self) -> &MethodDecl {
            &self.decl
        }

        fn execute(&self, block: Block, _params: &Params) -> Result<MethodOutput, MethodError> {
            Ok(MethodOutput::new(block))
        }

        fn estimate_device_memory(
            &self,
            slices: usize,
            non_slice_dims: (usize, usize),
            dtype: DType,
            params: &Params,
        ) -> u64 {
            // scales with an iteration-count parameter, like an iterative
            // reconstruction would
            let iterations = params
                .get("iterations")
                .and_then(|v| v.as_i64())
                .unwrap_or(1) as u64;
            block_bytes(slices, non_slice_dims, dtype) * iterations
        }
    }

    #[test]
    fn test_block_bytes() {
        assert_eq!(block_bytes(1, (512, 512), DType::Float32), MIB);
        assert_eq!(block_bytes(10, (512, 512), DType::Float32), 10 * MIB);
        assert_eq!(block_bytes(10, (512, 512), DType::UInt16), 5 * MIB);
    }

    #[test]
    fn test_direct_estimate_scenario() {
        // multiplier 2.1 over a 10 MiB block predicts 21 MiB
        let method = Stub::direct(2.1);
        let params = Params::new();
        let predicted = estimate(&method, 10, (512, 512), DType::Float32, &params);
        assert_eq!(predicted, 21 * MIB);
    }

    #[test]
    fn test_budget_forces_smaller_block() {
        // 16 MiB budget fits floor(16 / 2.1) = 7 slices of 1 MiB each
        let method = Stub::direct(2.1);
        let params = Params::new();
        let fit = max_slices(&method, 10, (512, 512), DType::Float32, &params, 16 * MIB).unwrap();
        assert_eq!(fit, 7);
    }

    #[test]
    fn test_direct_fit_prediction_stays_under_budget() {
        // one UInt16 slice of (5, 1) is 10 bytes; multiplier 1.55 truncates
        // to 15 bytes per slice, so plain division would pick 4 slices whose
        // own prediction is 62 bytes, over the 60 byte budget
        let method = Stub::direct(1.55);
        let params = Params::new();
        let fit = max_slices(&method, 10, (5, 1), DType::UInt16, &params, 60).unwrap();
        assert_eq!(fit, 3);
        assert!(estimate(&method, fit, (5, 1), DType::UInt16, &params) <= 60);
    }

    #[test]
    fn test_direct_estimate_is_monotonic() {
        let method = Stub::direct(3.5);
        let params = Params::new();
        let one = estimate(&method, 8, (256, 256), DType::Float32, &params);
        let two = estimate(&method, 16, (256, 256), DType::Float32, &params);
        assert!(two >= one);
    }

    #[test]
    fn test_no_model_uses_no_memory() {
        let decl = MethodDecl::new("testlib.prep", "cpu_only", Pattern::All);
        let method = Stub { decl };
        let params = Params::new();
        assert_eq!(estimate(&method, 100, (512, 512), DType::Float32, &params), 0);
        assert_eq!(
            max_slices(&method, 100, (512, 512), DType::Float32, &params, 1).unwrap(),
            100
        );
    }

    #[test]
    fn test_module_model_binary_search() {
        use crate::params::ParamsExt;
        let method = Stub::module();
        // 1 MiB per slice per iteration, 4 iterations, 10 MiB budget:
        // 2 slices fit (8 MiB), 3 do not (12 MiB)
        let params = Params::new().with("iterations", 4i64);
        let fit =
            max_slices(&method, 50, (512, 512), DType::Float32, &params, 10 * MIB).unwrap();
        assert_eq!(fit, 2);
    }

    #[test]
    fn test_budget_exceeded_at_minimum_block() {
        let method = Stub::direct(2.0);
        let params = Params::new();
        let err = max_slices(&method, 10, (512, 512), DType::Float32, &params, MIB).unwrap_err();
        match err {
            MemoryError::BudgetExceeded { needed, budget, .. } => {
                assert_eq!(needed, 2 * MIB);
                assert_eq!(budget, MIB);
            }
        }
    }
}

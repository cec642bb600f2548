//! Intensity rescaling.

use strata_core::{Block, Method, MethodDecl, MethodError, MethodOutput, Params};

/// Multiplies every element by a required `factor`, plus an optional
/// additive `offset`. Pattern-indifferent; works in place.
pub struct Rescale {
    decl: MethodDecl,
}

impl Rescale {
    pub fn new(decl: MethodDecl) -> Self {
        Self { decl }
    }
}

impl Method for Rescale {
    fn decl(&self) -> &MethodDecl {
        &self.decl
    }

    fn execute(&self, mut block: Block, params: &Params) -> Result<MethodOutput, MethodError> {
        let factor = params
            .get("factor")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| MethodError::MissingParameter("factor".into()))?
            as f32;
        let offset = params
            .get("offset")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as f32;

        block.data_mut().mapv_inplace(|v| v * factor + offset);
        Ok(MethodOutput::new(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::sync::Arc;
    use strata_core::{AuxData, ParamsExt, Pattern};

    fn method() -> Rescale {
        Rescale::new(MethodDecl::new("stratalib.prep", "rescale", Pattern::All))
    }

    fn block() -> Block {
        Block::new(
            Array3::from_elem((2, 2, 2), 3.0),
            0,
            [0, 0, 0],
            [2, 2, 2],
            Pattern::Projection,
            Arc::new(AuxData::default()),
        )
    }

    #[test]
    fn test_rescale_applies_factor_and_offset() {
        let params = Params::new().with("factor", 2.0).with("offset", 1.0);
        let out = method().execute(block(), &params).unwrap();
        assert!(out.block.data().iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_missing_factor_fails() {
        let err = method().execute(block(), &Params::new()).unwrap_err();
        assert!(matches!(err, MethodError::MissingParameter(_)));
    }
}

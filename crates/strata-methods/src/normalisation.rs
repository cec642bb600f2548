//! Flat/dark-field normalisation.

use ndarray::{Array2, Axis};
use strata_core::{Block, Method, MethodDecl, MethodError, MethodOutput, Params};

/// Normalises projections against averaged dark and flat reference frames:
/// `(v - dark) / (flat - dark)`, clamped below by `min_ratio`, with an
/// optional `minus_log` conversion to attenuation values.
pub struct Normalize {
    decl: MethodDecl,
}

impl Normalize {
    pub fn new(decl: MethodDecl) -> Self {
        Self { decl }
    }
}

fn frame_mean(frames: &ndarray::Array3<f32>, name: &str) -> Result<Array2<f32>, MethodError> {
    frames
        .mean_axis(Axis(0))
        .ok_or_else(|| MethodError::Failed(format!("empty {name} reference stack")))
}

impl Method for Normalize {
    fn decl(&self) -> &MethodDecl {
        &self.decl
    }

    fn execute(&self, mut block: Block, params: &Params) -> Result<MethodOutput, MethodError> {
        let min_ratio = params
            .get("min_ratio")
            .and_then(|v| v.as_f64())
            .unwrap_or(1e-6) as f32;
        let minus_log = params
            .get("minus_log")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let (dark, flat) = {
            let aux = block.aux();
            let darks = aux
                .darks
                .as_ref()
                .ok_or_else(|| MethodError::MissingAuxData("darks".into()))?;
            let flats = aux
                .flats
                .as_ref()
                .ok_or_else(|| MethodError::MissingAuxData("flats".into()))?;
            (frame_mean(darks, "dark")?, frame_mean(flats, "flat")?)
        };

        // projection blocks are (angle, row, column); the references are
        // per detector pixel
        let mut data = block.data_mut();
        for ((_, j, k), v) in data.indexed_iter_mut() {
            let d = dark[[j, k]];
            let denom = (flat[[j, k]] - d).max(min_ratio);
            let ratio = ((*v - d) / denom).max(min_ratio);
            *v = if minus_log { -ratio.ln() } else { ratio };
        }

        Ok(MethodOutput::new(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::sync::Arc;
    use strata_core::{AuxData, ParamsExt, Pattern};

    fn block(data: Array3<f32>, aux: AuxData) -> Block {
        let shape = data.shape().to_vec();
        Block::new(
            data,
            0,
            [0, 0, 0],
            [shape[0], shape[1], shape[2]],
            Pattern::Projection,
            Arc::new(aux),
        )
    }

    fn aux(rows: usize, cols: usize) -> AuxData {
        AuxData {
            angles: Vec::new(),
            darks: Some(Array3::from_elem((2, rows, cols), 1.0)),
            flats: Some(Array3::from_elem((2, rows, cols), 5.0)),
        }
    }

    #[test]
    fn test_normalize_scales_between_references() {
        let method = Normalize::new(MethodDecl::new(
            "stratalib.normalisation",
            "normalize",
            Pattern::Projection,
        ));
        // raw value 3 sits halfway between dark 1 and flat 5
        let input = block(Array3::from_elem((2, 3, 4), 3.0), aux(3, 4));
        let out = method.execute(input, &Params::new()).unwrap();
        assert!(out.block.data().iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_minus_log_converts_to_attenuation() {
        let method = Normalize::new(MethodDecl::new(
            "stratalib.normalisation",
            "normalize",
            Pattern::Projection,
        ));
        let input = block(Array3::from_elem((1, 2, 2), 3.0), aux(2, 2));
        let params = Params::new().with("minus_log", true);
        let out = method.execute(input, &params).unwrap();
        let expected = -(0.5f32).ln();
        assert!(out
            .block
            .data()
            .iter()
            .all(|&v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn test_missing_references_fail() {
        let method = Normalize::new(MethodDecl::new(
            "stratalib.normalisation",
            "normalize",
            Pattern::Projection,
        ));
        let input = block(Array3::zeros((1, 2, 2)), AuxData::default());
        let err = method.execute(input, &Params::new()).unwrap_err();
        assert!(matches!(err, MethodError::MissingAuxData(_)));
    }
}

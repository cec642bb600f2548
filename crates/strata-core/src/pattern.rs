//! Data orientation patterns.
//!
//! A volume is processed either projection-major (partitioned along the
//! angle axis) or sinogram-major (partitioned along the detector-row axis).
//! Methods declare which orientation they need; `All` means indifferent.

use serde::{Deserialize, Serialize};

/// Orientation a method requires its input blocks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Angle-major: blocks are slabs of projections.
    #[default]
    Projection,
    /// Detector-row-major: blocks are slabs of sinograms.
    Sinogram,
    /// Indifferent; inherits whatever orientation is active.
    All,
}

impl Pattern {
    /// The axis the dataset is partitioned along in this orientation.
    ///
    /// Only meaningful for a concrete pattern; plans resolve `All` before
    /// any data is sliced.
    pub fn slicing_dim(self) -> usize {
        match self {
            Pattern::Projection => 0,
            Pattern::Sinogram => 1,
            Pattern::All => 0,
        }
    }

    /// Whether two adjacent steps can share an orientation without a reslice.
    pub fn is_compatible(self, other: Pattern) -> bool {
        self == Pattern::All || other == Pattern::All || self == other
    }

    /// True for `Projection` and `Sinogram`, false for `All`.
    pub fn is_concrete(self) -> bool {
        self != Pattern::All
    }
}

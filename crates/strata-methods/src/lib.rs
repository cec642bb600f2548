//! Built-in processing methods for the strata engine.
//!
//! Each method implements [`strata_core::Method`] and is described in the
//! declarative catalog (`catalog.yaml`, keyed library → module → method).
//! [`standard_registry`] loads the catalog and pairs every entry with its
//! implementation; entries without one are registered declaration-only so
//! pipelines naming them still validate.

mod centering;
mod filtering;
mod normalisation;
mod prep;
mod reconstruction;

pub use centering::FindCenter;
pub use filtering::MedianFilter;
pub use normalisation::Normalize;
pub use prep::Rescale;
pub use reconstruction::Backproject;

use strata_core::{load_catalog, CatalogError, Registry};

/// The declarative method catalog shipped with this crate.
pub const CATALOG: &str = include_str!("catalog.yaml");

/// Build a registry with every built-in method registered.
pub fn standard_registry() -> Result<Registry, CatalogError> {
    let mut registry = Registry::new();
    for decl in load_catalog(CATALOG)? {
        match decl.path().as_str() {
            "stratalib.normalisation.normalize" => registry.register(Normalize::new(decl)),
            "stratalib.prep.rescale" => registry.register(Rescale::new(decl)),
            "stratalib.centering.find_center" => registry.register(FindCenter::new(decl)),
            "stratalib.filtering.median_filter" => registry.register(MedianFilter::new(decl)),
            "stratalib.reconstruction.backproject" => registry.register(Backproject::new(decl)),
            _ => registry.register_decl(decl),
        }
    }
    Ok(registry)
}

//! Method registry: declarations, implementations, and the declarative
//! catalog they are loaded from.
//!
//! The registry is closed at startup: every method a pipeline names must be
//! declared here, so unknown names fail validation instead of failing at
//! call time.

use crate::block::{Block, DType, EdgePolicy};
use crate::params::{Params, Value};
use crate::pattern::Pattern;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a method's computation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Implementation {
    Cpu,
    Gpu,
}

/// Which estimator a method's device-memory model uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// No device memory is used.
    #[default]
    None,
    /// Linear in block bytes: `multiplier * bytes(block)`.
    Direct,
    /// Delegates to the method's own `estimate_device_memory`.
    Module,
}

/// Per-method device-memory model, as declared in the catalog.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryModel {
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub method: EstimatorKind,
}

/// Declaration of a method's scheduling-relevant properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    /// Module path in dotted notation, e.g. `stratalib.normalisation`.
    pub module_path: String,
    /// Method name within the module.
    pub name: String,
    pub pattern: Pattern,
    #[serde(default)]
    pub output_dims_change: bool,
    pub implementation: Implementation,
    #[serde(default)]
    pub save_result_default: bool,
    #[serde(default)]
    pub padding: bool,
    /// Halo slices added on each boundary when `padding` is set.
    #[serde(default = "default_halo")]
    pub halo: usize,
    /// Boundary fill policy at the global edges of the dataset.
    #[serde(default)]
    pub edges: EdgePolicy,
    #[serde(default)]
    pub memory_gpu: MemoryModel,
}

fn default_halo() -> usize {
    1
}

impl MethodDecl {
    pub fn new(module_path: impl Into<String>, name: impl Into<String>, pattern: Pattern) -> Self {
        Self {
            module_path: module_path.into(),
            name: name.into(),
            pattern,
            output_dims_change: false,
            implementation: Implementation::Cpu,
            save_result_default: false,
            padding: false,
            halo: 1,
            edges: EdgePolicy::default(),
            memory_gpu: MemoryModel::default(),
        }
    }

    /// Full dotted path used as the registry key.
    pub fn path(&self) -> String {
        format!("{}.{}", self.module_path, self.name)
    }

    pub fn implementation(mut self, implementation: Implementation) -> Self {
        self.implementation = implementation;
        self
    }

    pub fn output_dims_change(mut self, change: bool) -> Self {
        self.output_dims_change = change;
        self
    }

    pub fn save_result_default(mut self, save: bool) -> Self {
        self.save_result_default = save;
        self
    }

    pub fn padding(mut self, halo: usize, edges: EdgePolicy) -> Self {
        self.padding = true;
        self.halo = halo;
        self.edges = edges;
        self
    }

    pub fn memory(mut self, model: MemoryModel) -> Self {
        self.memory_gpu = model;
        self
    }
}

/// What a method produced for one block.
#[derive(Debug)]
pub struct MethodOutput {
    pub block: Block,
    pub side_outputs: IndexMap<String, Value>,
}

impl MethodOutput {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            side_outputs: IndexMap::new(),
        }
    }

    pub fn with_side_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.side_outputs.insert(name.into(), value.into());
        self
    }
}

/// Errors raised by method implementations.
#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    #[error("method failed: {0}")]
    Failed(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("missing auxiliary data: {0}")]
    MissingAuxData(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Trait implemented by processing methods.
///
/// Methods transform one block at a time and may emit side outputs. The
/// resolved parameter mapping is passed on every call.
pub trait Method: Send + Sync {
    /// The declaration this method was registered with.
    fn decl(&self) -> &MethodDecl;

    /// Process one block.
    fn execute(&self, block: Block, params: &Params) -> Result<MethodOutput, MethodError>;

    /// Predicted peak device bytes for a candidate block, used when the
    /// declaration's memory model is `module`. The default is the plain
    /// block byte size.
    fn estimate_device_memory(
        &self,
        slices: usize,
        non_slice_dims: (usize, usize),
        dtype: DType,
        params: &Params,
    ) -> u64 {
        let _ = params;
        crate::memory::block_bytes(slices, non_slice_dims, dtype)
    }

    /// New non-slice dimensions after this method, used when the
    /// declaration sets `output_dims_change`.
    fn output_dims(&self, non_slice_dims: (usize, usize), params: &Params) -> (usize, usize) {
        let _ = params;
        non_slice_dims
    }
}

/// Registry of method declarations and (optionally) their implementations.
#[derive(Clone, Default)]
pub struct Registry {
    declarations: IndexMap<String, MethodDecl>,
    implementations: IndexMap<String, Arc<dyn Method>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration without an implementation.
    ///
    /// Useful for planning and validation when the backing library is not
    /// linked in.
    pub fn register_decl(&mut self, decl: MethodDecl) {
        self.declarations.insert(decl.path(), decl);
    }

    /// Register a method with its implementation.
    pub fn register(&mut self, method: impl Method + 'static) {
        let decl = method.decl().clone();
        let path = decl.path();
        self.declarations.insert(path.clone(), decl);
        self.implementations.insert(path, Arc::new(method));
    }

    pub fn get_decl(&self, path: &str) -> Option<&MethodDecl> {
        self.declarations.get(path)
    }

    pub fn get(&self, path: &str) -> Option<Arc<dyn Method>> {
        self.implementations.get(path).cloned()
    }

    pub fn declarations(&self) -> impl Iterator<Item = &MethodDecl> {
        self.declarations.values()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

/// One value record in the declarative catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub pattern: Pattern,
    #[serde(default)]
    pub output_dims_change: bool,
    pub implementation: Implementation,
    #[serde(default)]
    pub save_result_default: bool,
    #[serde(default)]
    pub padding: bool,
    #[serde(default = "default_halo")]
    pub halo: usize,
    #[serde(default)]
    pub edges: EdgePolicy,
    #[serde(default)]
    pub memory_gpu: MemoryModel,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to parse method catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Load method declarations from a YAML catalog.
///
/// The key path is implementation library, then module category, then
/// method name; the value is a [`CatalogEntry`].
pub fn load_catalog(yaml: &str) -> Result<Vec<MethodDecl>, CatalogError> {
    type Catalog = IndexMap<String, IndexMap<String, IndexMap<String, CatalogEntry>>>;
    let catalog: Catalog = serde_yaml::from_str(yaml)?;

    let mut decls = Vec::new();
    for (library, modules) in catalog {
        for (module, methods) in modules {
            for (name, entry) in methods {
                decls.push(MethodDecl {
                    module_path: format!("{library}.{module}"),
                    name,
                    pattern: entry.pattern,
                    output_dims_change: entry.output_dims_change,
                    implementation: entry.implementation,
                    save_result_default: entry.save_result_default,
                    padding: entry.padding,
                    halo: entry.halo,
                    edges: entry.edges,
                    memory_gpu: entry.memory_gpu,
                });
            }
        }
    }
    Ok(decls)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
stratalib:
  normalisation:
    normalize:
      pattern: projection
      implementation: cpu
  filtering:
    median_filter:
      pattern: all
      implementation: gpu
      padding: true
      halo: 1
      memory_gpu:
        multiplier: 2.1
        method: direct
  reconstruction:
    backproject:
      pattern: sinogram
      implementation: gpu
      output_dims_change: true
      save_result_default: true
      memory_gpu:
        method: module
"#;

    #[test]
    fn test_load_catalog() {
        let decls = load_catalog(CATALOG).unwrap();
        assert_eq!(decls.len(), 3);

        let norm = &decls[0];
        assert_eq!(norm.path(), "stratalib.normalisation.normalize");
        assert_eq!(norm.pattern, Pattern::Projection);
        assert_eq!(norm.implementation, Implementation::Cpu);
        assert_eq!(norm.memory_gpu.method, EstimatorKind::None);

        let median = &decls[1];
        assert!(median.padding);
        assert_eq!(median.halo, 1);
        assert_eq!(median.memory_gpu.multiplier, Some(2.1));
        assert_eq!(median.memory_gpu.method, EstimatorKind::Direct);

        let recon = &decls[2];
        assert!(recon.output_dims_change);
        assert!(recon.save_result_default);
        assert_eq!(recon.memory_gpu.method, EstimatorKind::Module);
    }

    #[test]
    fn test_registry_decl_lookup() {
        let mut registry = Registry::new();
        for decl in load_catalog(CATALOG).unwrap() {
            registry.register_decl(decl);
        }

        assert_eq!(registry.len(), 3);
        assert!(registry
            .get_decl("stratalib.reconstruction.backproject")
            .is_some());
        assert!(registry.get_decl("stratalib.prep.unknown").is_none());
        // no implementation registered
        assert!(registry.get("stratalib.normalisation.normalize").is_none());
    }

    #[test]
    fn test_catalog_rejects_bad_pattern() {
        let bad = r#"
lib:
  prep:
    scale:
      pattern: diagonal
      implementation: cpu
"#;
        assert!(load_catalog(bad).is_err());
    }
}

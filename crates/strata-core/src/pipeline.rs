//! Pipeline definitions.
//!
//! A pipeline is a serializable ordered list of steps, each naming a method
//! from the registry, its parameters, and optionally an identifier plus a
//! mapping of emitted side outputs that later steps may reference.

use crate::params::{Params, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Method name, resolved against `module_path` in the registry.
    pub method: String,

    /// Dotted module path, e.g. `stratalib.normalisation`.
    pub module_path: String,

    /// Parameter mapping; values are literals or reference strings of the
    /// form `${{step_id.side_outputs.name}}`.
    #[serde(default)]
    pub parameters: Params,

    /// Identifier later steps use to reference this step's side outputs.
    #[serde(default)]
    pub id: Option<String>,

    /// Maps names the method emits to the names published in the
    /// side-output table. Outputs not named here are discarded.
    #[serde(default)]
    pub side_outputs: IndexMap<String, String>,

    /// Overrides the method's default persistence flag.
    #[serde(default)]
    pub save_result: Option<bool>,
}

impl StepSpec {
    pub fn new(module_path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            module_path: module_path.into(),
            parameters: Params::new(),
            id: None,
            side_outputs: IndexMap::new(),
            save_result: None,
        }
    }

    /// Full dotted path used for registry lookup.
    pub fn path(&self) -> String {
        format!("{}.{}", self.module_path, self.method)
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Publish the method's emitted output `emitted` under `published`.
    pub fn side_output(
        mut self,
        emitted: impl Into<String>,
        published: impl Into<String>,
    ) -> Self {
        self.side_outputs.insert(emitted.into(), published.into());
        self
    }

    pub fn save_result(mut self, save: bool) -> Self {
        self.save_result = Some(save);
        self
    }
}

/// An ordered pipeline of steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub steps: Vec<StepSpec>,
}

impl PipelineSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Parse a pipeline from bytes, auto-detecting format from a path hint.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, PipelineError> {
        let format = path
            .and_then(detect_format)
            .unwrap_or_else(|| "yaml".to_string());
        Self::from_bytes_format(data, &format)
    }

    /// Parse a pipeline from bytes with explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, PipelineError> {
        match format {
            "json" => serde_json::from_slice(data).map_err(|e| PipelineError::Parse(e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_slice(data).map_err(|e| PipelineError::Parse(e.to_string()))
            }
            "toml" => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| PipelineError::Parse(format!("Invalid UTF-8: {}", e)))?;
                toml::from_str(s).map_err(|e| PipelineError::Parse(e.to_string()))
            }
            _ => Err(PipelineError::Parse(format!(
                "Unsupported pipeline format: {}",
                format
            ))),
        }
    }

    /// Serialize the pipeline to bytes.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, PipelineError> {
        match format {
            "json" => {
                serde_json::to_vec_pretty(self).map_err(|e| PipelineError::Parse(e.to_string()))
            }
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map(|s| s.into_bytes())
                .map_err(|e| PipelineError::Parse(e.to_string())),
            "toml" => toml::to_string_pretty(self)
                .map(|s| s.into_bytes())
                .map_err(|e| PipelineError::Parse(e.to_string())),
            _ => Err(PipelineError::Parse(format!(
                "Unsupported pipeline format: {}",
                format
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to parse pipeline: {0}")]
    Parse(String),
}

fn detect_format(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?;
    match ext.to_lowercase().as_str() {
        "json" => Some("json".into()),
        "yaml" | "yml" => Some("yaml".into()),
        "toml" => Some("toml".into()),
        _ => None,
    }
}

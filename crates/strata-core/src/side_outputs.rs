//! Side outputs: named values produced by one step and consumed by later
//! steps through `${{step_id.side_outputs.name}}` parameter references.
//!
//! The table is an explicit, append-only key-value store passed through the
//! run; it is never global state, so a run can be replayed or a test can
//! pre-seed it.

use crate::params::{OutputRef, Params, Value};
use indexmap::IndexMap;

/// Collect every reference appearing in a parameter mapping, including
/// inside arrays and nested objects.
pub fn collect_references(params: &Params) -> Vec<OutputRef> {
    fn walk(value: &Value, out: &mut Vec<OutputRef>) {
        match value {
            Value::Array(items) => {
                for item in items {
                    walk(item, out);
                }
            }
            Value::Object(map) => {
                for item in map.values() {
                    walk(item, out);
                }
            }
            other => {
                if let Some(r) = other.as_reference() {
                    out.push(r);
                }
            }
        }
    }

    let mut refs = Vec::new();
    for value in params.values() {
        walk(value, &mut refs);
    }
    refs
}

/// A referenced side output was not available.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unresolved side output reference '${{{{{step_id}.side_outputs.{output}}}}}'")]
pub struct UnresolvedReference {
    pub step_id: String,
    pub output: String,
}

/// A side output key was written more than once.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("side output '{step_id}.{output}' was already recorded")]
pub struct SideOutputConflict {
    pub step_id: String,
    pub output: String,
}

/// Write-once table of `(step_id, output_name) -> value`, spanning one run.
#[derive(Debug, Clone, Default)]
pub struct SideOutputTable {
    entries: IndexMap<(String, String), Value>,
}

impl SideOutputTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value. Fails if the key already holds one.
    pub fn insert(
        &mut self,
        step_id: &str,
        output: &str,
        value: Value,
    ) -> Result<(), SideOutputConflict> {
        let key = (step_id.to_string(), output.to_string());
        if self.entries.contains_key(&key) {
            return Err(SideOutputConflict {
                step_id: step_id.to_string(),
                output: output.to_string(),
            });
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn get(&self, step_id: &str, output: &str) -> Option<&Value> {
        self.entries
            .get(&(step_id.to_string(), output.to_string()))
    }

    pub fn contains(&self, step_id: &str, output: &str) -> bool {
        self.get(step_id, output).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(String, String), &Value)> {
        self.entries.iter()
    }
}

/// Substitute every reference in `params` with its table entry.
///
/// Literal values pass through unchanged. Pure: neither input is mutated.
pub fn resolve(params: &Params, table: &SideOutputTable) -> Result<Params, UnresolvedReference> {
    fn walk(value: &Value, table: &SideOutputTable) -> Result<Value, UnresolvedReference> {
        match value {
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| walk(v, table))
                    .collect::<Result<_, _>>()?,
            )),
            Value::Object(map) => {
                let mut out = IndexMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), walk(v, table)?);
                }
                Ok(Value::Object(out))
            }
            other => match other.as_reference() {
                Some(r) => table
                    .get(&r.step_id, &r.output)
                    .cloned()
                    .ok_or(UnresolvedReference {
                        step_id: r.step_id,
                        output: r.output,
                    }),
                None => Ok(other.clone()),
            },
        }
    }

    let mut resolved = Params::new();
    for (key, value) in params {
        resolved.insert(key.clone(), walk(value, table)?);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamsExt;

    #[test]
    fn test_resolve_substitutes_and_passes_literals() {
        let mut table = SideOutputTable::new();
        table.insert("centering", "cor", Value::Float(64.5)).unwrap();

        let params = Params::new()
            .with("center", "${{centering.side_outputs.cor}}")
            .with("iterations", 10i64)
            .with("label", "raw");

        let resolved = resolve(&params, &table).unwrap();
        assert_eq!(resolved.get("center"), Some(&Value::Float(64.5)));
        assert_eq!(resolved.get("iterations"), Some(&Value::Int(10)));
        assert_eq!(resolved.get("label"), Some(&Value::String("raw".into())));
    }

    #[test]
    fn test_resolve_inside_array() {
        let mut table = SideOutputTable::new();
        table.insert("stats", "max", Value::Float(3.0)).unwrap();

        let params = Params::new().with(
            "limits",
            vec![
                Value::Int(0),
                Value::String("${{stats.side_outputs.max}}".into()),
            ],
        );

        let resolved = resolve(&params, &table).unwrap();
        assert_eq!(
            resolved.get("limits"),
            Some(&Value::Array(vec![Value::Int(0), Value::Float(3.0)]))
        );
    }

    #[test]
    fn test_resolve_missing_entry_fails() {
        let table = SideOutputTable::new();
        let params = Params::new().with("center", "${{centering.side_outputs.cor}}");

        let err = resolve(&params, &table).unwrap_err();
        assert_eq!(err.step_id, "centering");
        assert_eq!(err.output, "cor");
    }

    #[test]
    fn test_table_is_write_once() {
        let mut table = SideOutputTable::new();
        table.insert("centering", "cor", Value::Float(1.0)).unwrap();
        assert!(table.insert("centering", "cor", Value::Float(2.0)).is_err());
        assert_eq!(table.get("centering", "cor"), Some(&Value::Float(1.0)));
    }

    #[test]
    fn test_collect_references() {
        let params = Params::new()
            .with("center", "${{centering.side_outputs.cor}}")
            .with("plain", 1i64)
            .with(
                "nested",
                vec![Value::String("${{stats.side_outputs.max}}".into())],
            );

        let refs = collect_references(&params);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].step_id, "centering");
        assert_eq!(refs[1].step_id, "stats");
    }
}

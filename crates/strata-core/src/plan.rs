//! Pipeline validation and execution planning.
//!
//! Planning happens before any data is touched. It checks every step
//! against the registry, runs the forward dependency check over side-output
//! references, and pins down the concrete pattern for every step so that
//! reslices become explicit, inspectable scheduling decisions rather than
//! something discovered mid-run.

use crate::block::EdgePolicy;
use crate::pattern::Pattern;
use crate::pipeline::PipelineSpec;
use crate::registry::Registry;
use crate::side_outputs::{collect_references, UnresolvedReference};
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("pipeline has no steps")]
    EmptyPipeline,

    #[error("step {step}: unknown method '{path}'")]
    UnknownMethod { step: usize, path: String },

    #[error("duplicate step id '{id}'")]
    DuplicateId { id: String },

    #[error("step {step} ('{path}'): {source}")]
    Unresolved {
        step: usize,
        path: String,
        #[source]
        source: UnresolvedReference,
    },
}

/// One step of the execution plan, with its scheduling decisions pinned.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    /// Index into the pipeline's step list.
    pub index: usize,
    /// Full dotted method path.
    pub path: String,
    /// Concrete pattern the step runs under (never `All`).
    pub pattern: Pattern,
    /// Whether a reslice must happen before this step.
    pub reslice_before: bool,
    /// Halo slices on each block boundary, zero when unpadded.
    pub halo: usize,
    pub edges: EdgePolicy,
    /// Whether the step's output is persisted to the result sink.
    pub save_result: bool,
}

/// A validated pipeline with all orientation decisions made.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Pattern the dataset is loaded in.
    pub initial_pattern: Pattern,
    pub steps: Vec<PlannedStep>,
}

impl ExecutionPlan {
    /// Number of redistributions the plan will perform.
    pub fn reslice_count(&self) -> usize {
        self.steps.iter().filter(|s| s.reslice_before).count()
    }
}

/// Validate a pipeline against the registry and derive its execution plan.
///
/// With `save_all`, every step's output is persisted regardless of its
/// declared default.
pub fn plan(
    pipeline: &PipelineSpec,
    registry: &Registry,
    save_all: bool,
) -> Result<ExecutionPlan, ValidationError> {
    if pipeline.is_empty() {
        return Err(ValidationError::EmptyPipeline);
    }

    // every step must be declared, ids must be unique
    let mut ids = HashSet::new();
    for (index, step) in pipeline.steps.iter().enumerate() {
        if registry.get_decl(&step.path()).is_none() {
            return Err(ValidationError::UnknownMethod {
                step: index,
                path: step.path(),
            });
        }
        if let Some(id) = &step.id {
            if !ids.insert(id.clone()) {
                return Err(ValidationError::DuplicateId { id: id.clone() });
            }
        }
    }

    // forward dependency check: a reference is only valid if an earlier
    // step with that id publishes that output name
    let mut available: HashSet<(String, String)> = HashSet::new();
    for (index, step) in pipeline.steps.iter().enumerate() {
        for reference in collect_references(&step.parameters) {
            if !available.contains(&(reference.step_id.clone(), reference.output.clone())) {
                return Err(ValidationError::Unresolved {
                    step: index,
                    path: step.path(),
                    source: UnresolvedReference {
                        step_id: reference.step_id,
                        output: reference.output,
                    },
                });
            }
        }
        if let Some(id) = &step.id {
            for published in step.side_outputs.values() {
                available.insert((id.clone(), published.clone()));
            }
        }
    }

    // pin a concrete pattern for every step: a pattern-indifferent step
    // inherits the active pattern; leading indifferent steps take the first
    // concrete pattern downstream so no pointless reslice happens later
    let declared: Vec<Pattern> = pipeline
        .steps
        .iter()
        .map(|s| registry.get_decl(&s.path()).map(|d| d.pattern).unwrap_or_default())
        .collect();

    let first_concrete = declared.iter().copied().find(|p| p.is_concrete());
    let initial_pattern = first_concrete.unwrap_or_else(|| {
        log::warn!("no step declares an orientation, defaulting to projection");
        Pattern::default()
    });

    let mut current = initial_pattern;
    let mut steps = Vec::with_capacity(pipeline.steps.len());
    for (index, step) in pipeline.steps.iter().enumerate() {
        let decl = registry
            .get_decl(&step.path())
            .ok_or_else(|| ValidationError::UnknownMethod {
                step: index,
                path: step.path(),
            })?;

        let pattern = if decl.pattern.is_concrete() {
            decl.pattern
        } else {
            current
        };
        let reslice_before = pattern != current;
        current = pattern;

        steps.push(PlannedStep {
            index,
            path: step.path(),
            pattern,
            reslice_before,
            halo: if decl.padding { decl.halo } else { 0 },
            edges: decl.edges,
            save_result: save_all || step.save_result.unwrap_or(decl.save_result_default),
        });
    }

    Ok(ExecutionPlan {
        initial_pattern,
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StepSpec;
    use crate::registry::MethodDecl;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_decl(MethodDecl::new(
            "lib.normalisation",
            "normalize",
            Pattern::Projection,
        ));
        registry.register_decl(MethodDecl::new("lib.centering", "find_center", Pattern::Sinogram));
        registry.register_decl(
            MethodDecl::new("lib.reconstruction", "backproject", Pattern::Sinogram)
                .save_result_default(true),
        );
        registry.register_decl(MethodDecl::new("lib.filtering", "median", Pattern::All));
        registry.register_decl(MethodDecl::new("lib.prep", "rescale", Pattern::Projection));
        registry
    }

    #[test]
    fn test_reslice_inserted_between_incompatible_steps() {
        // projection -> sinogram -> projection: exactly one reslice per
        // orientation change
        let pipeline = PipelineSpec::new()
            .step(StepSpec::new("lib.normalisation", "normalize"))
            .step(StepSpec::new("lib.centering", "find_center"))
            .step(StepSpec::new("lib.prep", "rescale"));

        let plan = plan(&pipeline, &registry(), false).unwrap();
        assert_eq!(plan.initial_pattern, Pattern::Projection);
        assert!(!plan.steps[0].reslice_before);
        assert!(plan.steps[1].reslice_before);
        assert!(plan.steps[2].reslice_before);
        assert_eq!(plan.reslice_count(), 2);
    }

    #[test]
    fn test_indifferent_step_never_reslices() {
        // replacing the middle step with a pattern-indifferent one removes
        // the reslices entirely
        let pipeline = PipelineSpec::new()
            .step(StepSpec::new("lib.normalisation", "normalize"))
            .step(StepSpec::new("lib.filtering", "median"))
            .step(StepSpec::new("lib.prep", "rescale"));

        let plan = plan(&pipeline, &registry(), false).unwrap();
        assert_eq!(plan.reslice_count(), 0);
        assert_eq!(plan.steps[1].pattern, Pattern::Projection);
    }

    #[test]
    fn test_leading_indifferent_steps_take_downstream_pattern() {
        let pipeline = PipelineSpec::new()
            .step(StepSpec::new("lib.filtering", "median"))
            .step(StepSpec::new("lib.centering", "find_center"));

        let plan = plan(&pipeline, &registry(), false).unwrap();
        assert_eq!(plan.initial_pattern, Pattern::Sinogram);
        assert_eq!(plan.steps[0].pattern, Pattern::Sinogram);
        assert_eq!(plan.reslice_count(), 0);
    }

    #[test]
    fn test_all_indifferent_defaults_to_projection() {
        let pipeline = PipelineSpec::new().step(StepSpec::new("lib.filtering", "median"));
        let plan = plan(&pipeline, &registry(), false).unwrap();
        assert_eq!(plan.initial_pattern, Pattern::Projection);
    }

    #[test]
    fn test_unknown_method_fails_validation() {
        let pipeline = PipelineSpec::new().step(StepSpec::new("lib.prep", "nonexistent"));
        let err = plan(&pipeline, &registry(), false).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownMethod { step: 0, .. }));
    }

    #[test]
    fn test_empty_pipeline_fails_validation() {
        let err = plan(&PipelineSpec::new(), &registry(), false).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyPipeline));
    }

    #[test]
    fn test_duplicate_id_fails_validation() {
        let pipeline = PipelineSpec::new()
            .step(StepSpec::new("lib.normalisation", "normalize").id("a"))
            .step(StepSpec::new("lib.prep", "rescale").id("a"));
        let err = plan(&pipeline, &registry(), false).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateId { .. }));
    }

    #[test]
    fn test_forward_reference_fails_validation() {
        // the reference names a step that runs later
        let pipeline = PipelineSpec::new()
            .step(
                StepSpec::new("lib.reconstruction", "backproject")
                    .parameter("center", "${{centering.side_outputs.cor}}"),
            )
            .step(
                StepSpec::new("lib.centering", "find_center")
                    .id("centering")
                    .side_output("cor", "cor"),
            );
        let err = plan(&pipeline, &registry(), false).unwrap_err();
        match err {
            ValidationError::Unresolved { step, source, .. } => {
                assert_eq!(step, 0);
                assert_eq!(source.step_id, "centering");
                assert_eq!(source.output, "cor");
            }
            other => panic!("expected Unresolved, got {other:?}"),
        }
    }

    #[test]
    fn test_backward_reference_validates() {
        let pipeline = PipelineSpec::new()
            .step(
                StepSpec::new("lib.centering", "find_center")
                    .id("centering")
                    .side_output("cor", "cor"),
            )
            .step(
                StepSpec::new("lib.reconstruction", "backproject")
                    .parameter("center", "${{centering.side_outputs.cor}}"),
            );
        assert!(plan(&pipeline, &registry(), false).is_ok());
    }

    #[test]
    fn test_unpublished_output_fails_validation() {
        // the producing step exists but never publishes that name
        let pipeline = PipelineSpec::new()
            .step(StepSpec::new("lib.centering", "find_center").id("centering"))
            .step(
                StepSpec::new("lib.reconstruction", "backproject")
                    .parameter("center", "${{centering.side_outputs.cor}}"),
            );
        assert!(matches!(
            plan(&pipeline, &registry(), false),
            Err(ValidationError::Unresolved { .. })
        ));
    }

    #[test]
    fn test_save_all_overrides_defaults() {
        let pipeline = PipelineSpec::new()
            .step(StepSpec::new("lib.normalisation", "normalize"))
            .step(StepSpec::new("lib.centering", "find_center"));
        let plan = plan(&pipeline, &registry(), true).unwrap();
        assert!(plan.steps.iter().all(|s| s.save_result));
    }

    #[test]
    fn test_explicit_save_result_overrides_default() {
        let pipeline = PipelineSpec::new()
            .step(StepSpec::new("lib.reconstruction", "backproject").save_result(false));
        let plan = plan(&pipeline, &registry(), false).unwrap();
        assert!(!plan.steps[0].save_result);
    }
}

//! Runner: drives a validated pipeline over the dataset.
//!
//! The runner owns the run's state machine. It validates the pipeline into
//! an execution plan, loads the dataset into the block store, and then
//! advances step by step: resolve parameters, reslice if the plan says so,
//! size blocks against the device-memory budget, push every worker's blocks
//! through the method, publish side outputs, persist results, commit.
//!
//! Workers advance in lockstep: no worker moves to step i+1 until all
//! blocks of step i are committed, because side outputs of step i may feed
//! step i+1's parameters.

use crate::block::{Block, DType};
use crate::io::{DataSource, ResultSink, SinkError, SourceError, WriteRequest};
use crate::memory::{self, MemoryError};
use crate::params::{Params, Value};
use crate::pipeline::PipelineSpec;
use crate::plan::{plan, ExecutionPlan, PlannedStep, ValidationError};
use crate::registry::{Implementation, Method, MethodError, Registry};
use crate::reslice::ResliceError;
use crate::side_outputs::{resolve, SideOutputConflict, SideOutputTable, UnresolvedReference};
use crate::store::{BlockStore, StoreError};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Run configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Fixed worker count, established at run start.
    pub workers: usize,
    /// Per-worker device memory budget in bytes.
    pub device_memory_budget: u64,
    /// Slice cap for CPU-implemented methods, which are bounded by cache
    /// behaviour rather than device memory.
    pub max_cpu_block_slices: usize,
    /// Persist every step's output, not just those that ask for it.
    pub save_all: bool,
    /// When set, also write stride-downsampled previews of persisted steps.
    pub preview_stride: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            device_memory_budget: u64::MAX,
            max_cpu_block_slices: 64,
            save_all: false,
            preview_stride: None,
        }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    Running(usize),
    Completed,
    Failed,
}

/// Statistics from a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Total run duration.
    pub duration: Duration,
    /// Number of pipeline steps executed.
    pub steps_executed: usize,
    /// Number of pattern redistributions performed.
    pub reslices: usize,
    /// Number of blocks pushed through methods, summed over workers.
    pub blocks_processed: usize,
    /// Largest device-memory estimate consulted while sizing blocks.
    pub peak_estimated_memory: u64,
}

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("step {step}: no implementation registered for '{path}'")]
    MissingImplementation { step: usize, path: String },

    #[error("step {step} ('{path}'): {source}")]
    Unresolved {
        step: usize,
        path: String,
        #[source]
        source: UnresolvedReference,
    },

    #[error("step {step} ('{path}') failed: {source}")]
    Method {
        step: usize,
        path: String,
        #[source]
        source: MethodError,
    },

    #[error("step {step}: method emitted no output named '{name}'")]
    MissingSideOutput { step: usize, name: String },

    #[error("step {step}: {source}")]
    SideOutput {
        step: usize,
        #[source]
        source: SideOutputConflict,
    },

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Reslice(#[from] ResliceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("run cancelled before step {step}")]
    Cancelled { step: usize },
}

/// Drives pipelines to completion.
pub struct Runner {
    registry: Registry,
    config: RunnerConfig,
    state: RunState,
    cancel: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(registry: Registry, config: RunnerConfig) -> Self {
        Self {
            registry,
            config,
            state: RunState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Handle for aborting the run from another thread. Cancellation takes
    /// effect between steps, never mid-step, so the partition is always
    /// left consistent.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Validate and run a pipeline over a dataset.
    ///
    /// On failure the sink is finalized as incomplete; whatever was already
    /// written stays available for diagnostics.
    pub fn run(
        &mut self,
        pipeline: &PipelineSpec,
        source: &dyn DataSource,
        sink: &mut dyn ResultSink,
    ) -> Result<RunStats, RunError> {
        self.state = RunState::Validating;
        let execution_plan = match plan(pipeline, &self.registry, self.config.save_all) {
            Ok(p) => p,
            Err(e) => {
                self.state = RunState::Failed;
                return Err(e.into());
            }
        };
        log::info!(
            "plan validated: {} steps, {} reslices, initial pattern {:?}",
            execution_plan.steps.len(),
            execution_plan.reslice_count(),
            execution_plan.initial_pattern
        );

        match self.execute(pipeline, &execution_plan, source, sink) {
            Ok(stats) => {
                self.state = RunState::Completed;
                sink.finalize(true)?;
                log::info!(
                    "run completed: {} steps in {:?}",
                    stats.steps_executed,
                    stats.duration
                );
                Ok(stats)
            }
            Err(e) => {
                self.state = RunState::Failed;
                log::error!("run failed: {e}");
                // best effort; the run error is the one worth reporting
                let _ = sink.finalize(false);
                Err(e)
            }
        }
    }

    fn execute(
        &mut self,
        pipeline: &PipelineSpec,
        execution_plan: &ExecutionPlan,
        source: &dyn DataSource,
        sink: &mut dyn ResultSink,
    ) -> Result<RunStats, RunError> {
        let started = Instant::now();
        let workers = self.config.workers.max(1);
        let mut store = BlockStore::from_source(source, workers, execution_plan.initial_pattern)?;
        let mut table = SideOutputTable::new();
        let mut stats = RunStats::default();

        for planned in &execution_plan.steps {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(RunError::Cancelled {
                    step: planned.index,
                });
            }
            self.state = RunState::Running(planned.index);

            let step = &pipeline.steps[planned.index];
            let method =
                self.registry
                    .get(&planned.path)
                    .ok_or_else(|| RunError::MissingImplementation {
                        step: planned.index,
                        path: planned.path.clone(),
                    })?;

            let params = resolve(&step.parameters, &table).map_err(|e| RunError::Unresolved {
                step: planned.index,
                path: planned.path.clone(),
                source: e,
            })?;

            if planned.reslice_before {
                log::debug!(
                    "reslicing to {:?} before step {} ('{}')",
                    planned.pattern,
                    planned.index,
                    planned.path
                );
                store.reslice(planned.pattern)?;
                stats.reslices += 1;
            }

            let slices_cap = self.block_slices(&store, &*method, &params, planned, &mut stats)?;
            log::debug!(
                "step {} ('{}'): blocks of up to {} slices",
                planned.index,
                planned.path,
                slices_cap
            );

            let results = process_workers(&store, &method, &params, planned, slices_cap);

            let mut outputs: Vec<Vec<Block>> = Vec::with_capacity(workers);
            let mut emitted: IndexMap<String, Value> = IndexMap::new();
            for result in results {
                let (blocks, side) = result?;
                stats.blocks_processed += blocks.len();
                for (name, value) in side {
                    // first emission wins; methods that emit globals do so
                    // from exactly one designated block
                    emitted.entry(name).or_insert(value);
                }
                outputs.push(blocks);
            }

            if let Some(id) = &step.id {
                for (emitted_name, published) in &step.side_outputs {
                    let value =
                        emitted
                            .get(emitted_name)
                            .ok_or_else(|| RunError::MissingSideOutput {
                                step: planned.index,
                                name: emitted_name.clone(),
                            })?;
                    table
                        .insert(id, published, value.clone())
                        .map_err(|e| RunError::SideOutput {
                            step: planned.index,
                            source: e,
                        })?;
                }
            }

            if planned.save_result {
                for blocks in &outputs {
                    for block in blocks {
                        let req = WriteRequest {
                            step_index: planned.index,
                            method: &planned.path,
                            data: block.core(),
                            global_index: block.global_index(),
                            global_shape: block.global_shape(),
                            pattern: planned.pattern,
                        };
                        sink.write_block(&req)?;
                        if let Some(stride) = self.config.preview_stride {
                            sink.write_preview(&req, stride)?;
                        }
                    }
                }
            }

            let out_ns = if method.decl().output_dims_change {
                method.output_dims(store.non_slice_dims(), &params)
            } else {
                store.non_slice_dims()
            };
            store.commit_step(outputs, out_ns)?;
            stats.steps_executed += 1;
        }

        stats.duration = started.elapsed();
        Ok(stats)
    }

    /// Largest block extent along the partition axis for this step, per the
    /// method's memory model and implementation.
    fn block_slices(
        &self,
        store: &BlockStore,
        method: &dyn Method,
        params: &Params,
        planned: &PlannedStep,
        stats: &mut RunStats,
    ) -> Result<usize, MemoryError> {
        let extent = store.global_shape()[planned.pattern.slicing_dim()];
        let chunk_max = extent.div_ceil(self.config.workers.max(1)).max(1);
        let ns = store.non_slice_dims();

        let cap = match method.decl().implementation {
            Implementation::Gpu => memory::max_slices(
                method,
                chunk_max,
                ns,
                DType::Float32,
                params,
                self.config.device_memory_budget,
            )?,
            Implementation::Cpu => chunk_max.min(self.config.max_cpu_block_slices),
        };

        let predicted = memory::estimate(method, cap, ns, DType::Float32, params);
        stats.peak_estimated_memory = stats.peak_estimated_memory.max(predicted);
        Ok(cap)
    }
}

type WorkerResult = Result<(Vec<Block>, IndexMap<String, Value>), RunError>;

fn process_one_worker(
    store: &BlockStore,
    method: &Arc<dyn Method>,
    params: &Params,
    planned: &PlannedStep,
    slices_cap: usize,
    worker: usize,
) -> WorkerResult {
    let mut blocks = Vec::new();
    let mut side = IndexMap::new();
    for b in 0..store.block_count(worker, slices_cap) {
        let block = store.read_block(worker, b, slices_cap, planned.halo, planned.edges)?;
        let output = method.execute(block, params).map_err(|e| RunError::Method {
            step: planned.index,
            path: planned.path.clone(),
            source: e,
        })?;
        for (name, value) in output.side_outputs {
            side.entry(name).or_insert(value);
        }
        blocks.push(output.block);
    }
    Ok((blocks, side))
}

/// Process every worker's blocks for one step.
///
/// Results come back in worker order regardless of scheduling, so side
/// output merging stays deterministic.
#[cfg(feature = "parallel")]
fn process_workers(
    store: &BlockStore,
    method: &Arc<dyn Method>,
    params: &Params,
    planned: &PlannedStep,
    slices_cap: usize,
) -> Vec<WorkerResult> {
    (0..store.workers())
        .into_par_iter()
        .map(|w| process_one_worker(store, method, params, planned, slices_cap, w))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn process_workers(
    store: &BlockStore,
    method: &Arc<dyn Method>,
    params: &Params,
    planned: &PlannedStep,
    slices_cap: usize,
) -> Vec<WorkerResult> {
    (0..store.workers())
        .map(|w| process_one_worker(store, method, params, planned, slices_cap, w))
        .collect()
}

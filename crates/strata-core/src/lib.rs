//! Strata: out-of-core pipeline execution for tomography volumes.
//!
//! A pipeline is a declarative ordered list of steps, each naming a method
//! from a registry. The engine validates the pipeline up front, plans the
//! data orientation for every step (inserting reslices where consecutive
//! steps disagree), sizes blocks against each method's device-memory model,
//! and drives worker-owned blocks through the methods one step at a time.

mod block;
mod io;
mod memory;
mod params;
mod pattern;
mod pipeline;
mod plan;
mod registry;
mod reslice;
mod runner;
mod side_outputs;
mod store;

pub use block::{worker_range, AuxData, Block, BlockError, DType, EdgePolicy};
pub use io::{
    downsample, ArraySink, ArraySource, DataSource, ResultSink, SinkError, SinkOutput,
    SourceError, WriteRequest,
};
pub use memory::{block_bytes, estimate, max_slices, MemoryError};
pub use params::{OutputRef, Params, ParamsExt, Value};
pub use pattern::Pattern;
pub use pipeline::{PipelineError, PipelineSpec, StepSpec};
pub use plan::{plan, ExecutionPlan, PlannedStep, ValidationError};
pub use registry::{
    load_catalog, CatalogError, EstimatorKind, Implementation, MemoryModel, Method, MethodDecl,
    MethodError, MethodOutput, Registry,
};
pub use reslice::ResliceError;
pub use runner::{RunError, RunState, RunStats, Runner, RunnerConfig};
pub use side_outputs::{
    collect_references, resolve, SideOutputConflict, SideOutputTable, UnresolvedReference,
};
pub use store::{BlockStore, StoreError};

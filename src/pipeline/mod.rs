//! Configurable record transformation pipeline.
//!
//! A [`Pipeline`] owns an atomically swappable list of compiled steps and a
//! process-lifetime [`GlobalContext`]. Each call to `process` runs the batch
//! through the enabled steps with a fresh [`SessionContext`].

pub mod action;
pub mod actions;
pub mod context;
pub mod engine;
pub mod occurrence;
pub mod report;
pub mod step;


pub use action::{
    ActionContext, ActionRegistry, ActionSpec, BatchAction, EntityRepository, InMemoryRepository,
    ItemAction, StepAction,
};
pub use context::{EntityStore, GlobalContext, SessionContext};
pub use engine::{Pipeline, RunOutcome};
pub use occurrence::{OccurrenceIndex, SequenceKey};
pub use report::{RunReport, StepStat};
pub use step::{CompiledStep, PipelineConfig, StepConfig};

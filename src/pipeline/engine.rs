// In: src/pipeline/engine.rs

//! The pipeline engine: runs a batch through the active step list.
//!
//! Steps run strictly in order. Inside an item-wise step, large batches are
//! split into contiguous chunks processed on scoped worker threads and
//! re-joined in input order, so output order never depends on scheduling.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};

use crate::config::{resolve_workers, CmlConfig, EngineConfig};
use crate::error::CmlError;
use crate::pipeline::action::{ActionContext, ActionRegistry, ItemAction, StepAction};
use crate::pipeline::context::{GlobalContext, SessionContext};
use crate::pipeline::report::{RunReport, StepStat};
use crate::pipeline::step::{compile_steps, CompiledStep, PipelineConfig};
use crate::types::Record;

/// Output of one run.
#[derive(Debug)]
pub struct RunOutcome {
    pub items: Vec<Record>,
    pub report: RunReport,
}

pub struct Pipeline {
    steps: RwLock<Arc<Vec<CompiledStep>>>,
    registry: ActionRegistry,
    global: Arc<GlobalContext>,
    config: EngineConfig,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, registry: ActionRegistry) -> Result<Self, CmlError> {
        let steps = compile_steps(config, &registry)?;
        info!("Pipeline compiled with {} enabled step(s)", steps.len());
        Ok(Self {
            steps: RwLock::new(Arc::new(steps)),
            registry,
            global: Arc::new(GlobalContext::new()),
            config: EngineConfig::default(),
        })
    }

    /// Builds a pipeline with the engine settings and default offset of `config`.
    pub fn from_config(
        config: &CmlConfig,
        pipeline: &PipelineConfig,
        registry: ActionRegistry,
    ) -> Result<Self, CmlError> {
        let registry = registry.with_default_utc_offset(config.default_utc_offset.clone());
        Ok(Self::new(pipeline, registry)?.with_engine_config(config.engine.clone()))
    }

    pub fn from_json_str(json: &str, registry: ActionRegistry) -> Result<Self, CmlError> {
        Self::new(&PipelineConfig::from_json_str(json)?, registry)
    }

    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares an existing global context, e.g. between pipelines.
    pub fn with_global(mut self, global: Arc<GlobalContext>) -> Self {
        self.global = global;
        self
    }

    pub fn global(&self) -> &Arc<GlobalContext> {
        &self.global
    }

    fn active_steps(&self) -> Arc<Vec<CompiledStep>> {
        let guard = self.steps.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn step_names(&self) -> Vec<String> {
        self.active_steps().iter().map(|s| s.name.clone()).collect()
    }

    //==============================================================================
    // Reload
    //==============================================================================

    /// Compiles `config` off to the side and swaps it in. On error the current
    /// step list stays active.
    pub fn reload(&self, config: &PipelineConfig) -> Result<(), CmlError> {
        let compiled = match compile_steps(config, &self.registry) {
            Ok(steps) => Arc::new(steps),
            Err(e) => {
                warn!("Pipeline reload rejected, keeping previous configuration: {e}");
                return Err(e);
            }
        };
        let count = compiled.len();
        *self.steps.write().unwrap_or_else(PoisonError::into_inner) = compiled;
        info!("Pipeline reloaded with {count} enabled step(s)");
        Ok(())
    }

    pub fn reload_json(&self, json: &str) -> Result<(), CmlError> {
        self.reload(&PipelineConfig::from_json_str(json)?)
    }

    pub fn reload_path(&self, path: impl AsRef<Path>) -> Result<(), CmlError> {
        self.reload(&PipelineConfig::from_path(path)?)
    }

    //==============================================================================
    // Processing
    //==============================================================================

    pub fn process(&self, batch: Vec<Record>) -> Result<Vec<Record>, CmlError> {
        self.run(batch, &[] as &[&str]).map(|outcome| outcome.items)
    }

    /// Runs every active step except those named in `ignored`.
    pub fn process_ignoring<S: AsRef<str>>(
        &self,
        batch: Vec<Record>,
        ignored: &[S],
    ) -> Result<Vec<Record>, CmlError> {
        self.run(batch, ignored).map(|outcome| outcome.items)
    }

    /// Runs the batch with a fresh session and returns the items with the report.
    pub fn run<S: AsRef<str>>(
        &self,
        batch: Vec<Record>,
        ignored: &[S],
    ) -> Result<RunOutcome, CmlError> {
        self.run_in_session(batch, ignored, &SessionContext::new())
    }

    pub fn run_in_session<S: AsRef<str>>(
        &self,
        batch: Vec<Record>,
        ignored: &[S],
        session: &SessionContext,
    ) -> Result<RunOutcome, CmlError> {
        let steps = self.active_steps();
        let started = Instant::now();
        let items_in = batch.len();
        let mut current = batch;
        let mut stats = Vec::with_capacity(steps.len());

        for step in steps.iter() {
            if ignored.iter().any(|name| name.as_ref() == step.name) {
                debug!("[{}] Step '{}' ignored for this run", session.key(), step.name);
                continue;
            }

            let ctx = ActionContext {
                step: &step.name,
                global: &self.global,
                session,
            };
            let step_started = Instant::now();
            let step_in = current.len();

            current = match &step.action {
                StepAction::Batch(action) => action.apply(current, &ctx).map_err(|e| {
                    warn!("[{}] Batch step '{}' failed: {e}", session.key(), step.name);
                    e
                })?,
                StepAction::Item(action) => self.run_item_step(step, action.as_ref(), current, &ctx),
            };

            let stat = StepStat {
                name: step.name.clone(),
                kind: step.action.kind(),
                items_in: step_in,
                items_out: current.len(),
                elapsed: step_started.elapsed(),
            };
            debug!(
                "[{}] Step '{}' ({}) {} → {} items",
                session.key(),
                stat.name,
                stat.kind,
                stat.items_in,
                stat.items_out
            );
            stats.push(stat);
        }

        let report = RunReport {
            session_key: session.key().to_string(),
            steps: stats,
            items_in,
            items_out: current.len(),
            elapsed: started.elapsed(),
        };
        info!("{}", report.render(self.config.colorize_report));
        log_metric!(
            "event" = "pipeline_run",
            "session" = session.key(),
            "items_in" = report.items_in,
            "items_out" = report.items_out,
            "millis" = report.elapsed.as_millis()
        );

        Ok(RunOutcome {
            items: current,
            report,
        })
    }

    fn run_item_step(
        &self,
        step: &CompiledStep,
        action: &dyn ItemAction,
        batch: Vec<Record>,
        ctx: &ActionContext<'_>,
    ) -> Vec<Record> {
        let prepared = action.prepare(ctx);
        let action: &dyn ItemAction = prepared.as_deref().unwrap_or(action);

        let workers = resolve_workers(self.config.item_parallelism);
        if workers <= 1 || batch.len() < self.config.parallel_threshold.max(2) {
            return batch
                .into_iter()
                .flat_map(|item| apply_item(step, action, item, ctx))
                .collect();
        }

        let chunk_size = batch.len().div_ceil(workers);
        let mut chunks: Vec<Vec<Record>> = Vec::with_capacity(workers);
        let mut items = batch.into_iter();
        loop {
            let chunk: Vec<Record> = items.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);
        }

        thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .into_iter()
                            .flat_map(|item| apply_item(step, action, item, ctx))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut out = Vec::new();
            for handle in handles {
                match handle.join() {
                    Ok(part) => out.extend(part),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            out
        })
    }
}

/// Applies the step condition and the action to a single item.
/// Items failing the condition pass through; action errors drop the item.
fn apply_item(
    step: &CompiledStep,
    action: &dyn ItemAction,
    item: Record,
    ctx: &ActionContext<'_>,
) -> Vec<Record> {
    let matched = match step.condition.matches(&item) {
        Ok(matched) => matched,
        Err(e) => {
            debug!(
                "[{}] Condition of step '{}' failed, treating as false: {e}",
                ctx.session.key(),
                step.name
            );
            false
        }
    };
    if !matched {
        return vec![item];
    }

    match action.apply(item, ctx) {
        Ok(items) => items,
        Err(e) => {
            warn!(
                "[{}] Step '{}' dropped an item: {e}",
                ctx.session.key(),
                step.name
            );
            Vec::new()
        }
    }
}

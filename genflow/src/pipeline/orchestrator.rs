//! Sequential execution of a pipeline over one request.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::builder::Pipeline;
use super::context::{Contribution, StageContext};
use super::progress::{notify, percentage, ProgressObserver, ProgressUpdate};
use super::request::GenerationRequest;
use super::stage::Stage;
use crate::assembly::{ArtifactAssembler, AssemblyResult, AssetSet, BudgetConfig};
use crate::cache::ResultCache;
use crate::cancellation::CancellationToken;
use crate::config::GenflowConfig;
use crate::errors::{
    PipelineError, PipelineFailure, ProviderError, ProviderErrorKind, RetryError, ValidationError,
};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::observability::{RunSpanAttributes, SpanTimer};
use crate::resilience::RetryEngine;

/// Stage name reported for the terminal assembly step.
pub const ASSEMBLY_STAGE: &str = "assembly";

/// Timing and cache information for one completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub stage: String,
    /// Whether the contribution came from the result cache.
    pub cache_hit: bool,
    /// Wall-clock duration.
    pub duration_ms: f64,
    /// Fields written by the stage.
    pub written: Vec<String>,
    /// Fields whose earlier value the stage replaced.
    pub overwritten: Vec<String>,
}

/// Output of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    /// The run's request id.
    pub request_id: Uuid,
    /// The assembled document, if the pipeline assembles one.
    pub document: Option<String>,
    /// Full assembly report.
    pub assembly: Option<AssemblyResult>,
    /// Final context fields.
    pub fields: BTreeMap<String, Value>,
    /// Every produced asset, for external persistence.
    #[serde(skip)]
    pub assets: AssetSet,
    /// Per-stage records, in execution order.
    pub stages: Vec<StageRecord>,
    /// Wall-clock duration of the run.
    pub duration_ms: f64,
}

/// Serializable outcome of [`Orchestrator::run_reported`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Whether the run completed.
    pub success: bool,
    /// The run's request id.
    pub request_id: Uuid,
    /// The failing stage.
    pub stage: Option<String>,
    /// Error message.
    pub error: Option<String>,
    /// Short error type name.
    pub error_type: Option<String>,
    /// The result of a successful run.
    pub result: Option<FinalResult>,
}

impl RunReport {
    fn succeeded(result: FinalResult) -> Self {
        Self {
            success: true,
            request_id: result.request_id,
            stage: None,
            error: None,
            error_type: None,
            result: Some(result),
        }
    }

    fn failed(request_id: Uuid, error: &PipelineError) -> Self {
        Self {
            success: false,
            request_id,
            stage: Some(error.stage.clone()),
            error: Some(error.cause.to_string()),
            error_type: Some(error.cause.type_name().to_string()),
            result: None,
        }
    }
}

/// Drives a [`Pipeline`]: stages run strictly in order, each through the
/// retry engine and optionally the result cache, and the generated document
/// is finally handed to the assembler.
pub struct Orchestrator {
    pipeline: Pipeline,
    engine: Arc<RetryEngine>,
    cache: Option<Arc<ResultCache<Contribution>>>,
    assembler: ArtifactAssembler,
    budget: BudgetConfig,
    observer: Option<Arc<dyn ProgressObserver>>,
    events: Arc<dyn EventSink>,
    run_deadline: Option<Duration>,
    sweeper: Option<JoinHandle<()>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.pipeline.name())
            .field("stages", &self.pipeline.stage_names())
            .field("cache", &self.cache.is_some())
            .field("run_deadline", &self.run_deadline)
            .field("sweeper", &self.sweeper.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl Orchestrator {
    /// Creates an orchestrator sharing `engine`'s circuit state.
    #[must_use]
    pub fn new(pipeline: Pipeline, engine: Arc<RetryEngine>) -> Self {
        Self {
            pipeline,
            engine,
            cache: None,
            assembler: ArtifactAssembler::with_default_transcoder(),
            budget: BudgetConfig::default(),
            observer: None,
            events: Arc::new(NoOpEventSink),
            run_deadline: None,
            sweeper: None,
        }
    }

    /// Creates an orchestrator with a fresh engine, cache and budgets from `config`.
    ///
    /// When called inside a tokio runtime, the cache's background expiry
    /// sweep is started and lives as long as the orchestrator.
    pub fn from_config(pipeline: Pipeline, config: &GenflowConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        let engine = Arc::new(RetryEngine::new(config.retry.clone(), config.circuit.clone()));
        let mut orchestrator = Self::new(pipeline, engine).with_budget(config.assembly.clone());
        if config.cache_enabled {
            let cache = Arc::new(ResultCache::new(config.cache.clone()));
            if tokio::runtime::Handle::try_current().is_ok() {
                orchestrator.sweeper = Some(cache.spawn_sweeper());
            } else {
                debug!("No tokio runtime, expired cache entries are only dropped on lookup");
            }
            orchestrator = orchestrator.with_cache(cache);
        }
        if let Some(deadline) = config.run_deadline() {
            orchestrator = orchestrator.with_run_deadline(deadline);
        }
        Ok(orchestrator)
    }

    /// Whether a background cache sweep is running for this orchestrator.
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Attaches a result cache for cacheable stages.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResultCache<Contribution>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replaces the assembler.
    #[must_use]
    pub fn with_assembler(mut self, assembler: ArtifactAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    /// Sets the assembly budgets.
    #[must_use]
    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    /// Attaches a progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Bounds the whole run.
    #[must_use]
    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = Some(deadline);
        self
    }

    /// The pipeline being driven.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The shared retry engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<RetryEngine> {
        &self.engine
    }

    /// The result cache, if attached.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<ResultCache<Contribution>>> {
        self.cache.as_ref()
    }

    /// Runs every stage and assembles the document.
    ///
    /// The first unrecovered failure aborts the run. Raising `cancel` stops
    /// the run at the next stage boundary or pending retry.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        initial: StageContext,
        cancel: &CancellationToken,
    ) -> Result<FinalResult, PipelineError> {
        let span = info_span!(
            "pipeline.run",
            pipeline = %self.pipeline.name(),
            request_id = %request.id()
        );
        self.run_inner(request, initial, cancel).instrument(span).await
    }

    /// Like [`Orchestrator::run`] but never returns an error.
    pub async fn run_reported(
        &self,
        request: &GenerationRequest,
        initial: StageContext,
        cancel: &CancellationToken,
    ) -> RunReport {
        match self.run(request, initial, cancel).await {
            Ok(result) => RunReport::succeeded(result),
            Err(error) => RunReport::failed(request.id(), &error),
        }
    }

    async fn run_inner(
        &self,
        request: &GenerationRequest,
        initial: StageContext,
        cancel: &CancellationToken,
    ) -> Result<FinalResult, PipelineError> {
        let timer = SpanTimer::start(self.pipeline.name());
        let request_id = request.id();
        let stages = self.pipeline.stages();
        let total_steps = stages.len() + usize::from(self.pipeline.document_key().is_some());
        let deadline = self.run_deadline.map(|limit| Instant::now() + limit);

        let attributes = RunSpanAttributes::new(self.pipeline.name(), request_id.to_string())
            .with_stages(self.pipeline.stage_names())
            .with_cache_enabled(self.cache.is_some())
            .with_deadline_ms(self.deadline_ms());
        info!(stages = stages.len(), "Pipeline started");
        self.emit(PipelineEvent::new("pipeline.started", request_id).with_data(attributes.to_event_data()))
            .await;

        let mut ctx = initial;
        let mut records = Vec::with_capacity(stages.len());

        for (index, stage) in stages.iter().enumerate() {
            let name = stage.name();
            if cancel.is_cancelled() {
                return Err(self.abort(request_id, name, self.cancellation(cancel), &ctx).await);
            }

            self.progress(name, percentage(index, total_steps), format!("Starting {name}"));
            self.emit(PipelineEvent::new("stage.started", request_id).with_stage(name))
                .await;

            let stage_timer = SpanTimer::start(name);
            let executed = self
                .within_deadline(deadline, self.execute_stage(stage.as_ref(), &ctx, request, cancel))
                .await;
            let (contribution, cache_hit) = match executed {
                Ok(done) => done,
                Err(failure) => return Err(self.stage_failed(request_id, name, failure, &ctx).await),
            };

            let written: Vec<String> = contribution.fields.keys().cloned().collect();
            let asset_count = contribution.assets.len();
            let overwritten = ctx.merge(contribution);
            let duration_ms = stage_timer.elapsed_ms();

            info!(stage = name, cache_hit, duration_ms, written = ?written, assets = asset_count, "Stage completed");
            self.emit(
                PipelineEvent::new("stage.completed", request_id)
                    .with_stage(name)
                    .with_data(json!({
                        "cache_hit": cache_hit,
                        "duration_ms": duration_ms,
                        "written": written,
                        "overwritten": overwritten,
                        "assets": asset_count,
                    })),
            )
            .await;
            let message = if cache_hit {
                format!("Completed {name} (cached)")
            } else {
                format!("Completed {name}")
            };
            self.progress(name, percentage(index + 1, total_steps), message);

            records.push(StageRecord {
                stage: name.to_string(),
                cache_hit,
                duration_ms,
                written,
                overwritten,
            });
        }

        let (document, assembly) = match self.pipeline.document_key() {
            Some(key) => {
                if cancel.is_cancelled() {
                    return Err(self.abort(request_id, ASSEMBLY_STAGE, self.cancellation(cancel), &ctx).await);
                }
                self.progress(ASSEMBLY_STAGE, percentage(stages.len(), total_steps), "Assembling document");

                let result = match self.within_deadline(deadline, self.assemble(key, &ctx)).await {
                    Ok(result) => result,
                    Err(failure) => {
                        return Err(self.stage_failed(request_id, ASSEMBLY_STAGE, failure, &ctx).await)
                    }
                };

                self.emit(
                    PipelineEvent::new("assembly.completed", request_id)
                        .with_stage(ASSEMBLY_STAGE)
                        .with_data(json!({
                            "embedded": result.embedded_count(),
                            "references": result.outcomes.len(),
                            "failures": result.failures,
                            "aggregate_size": result.aggregate_size,
                            "total_budget": result.total_budget,
                        })),
                )
                .await;
                self.progress(
                    ASSEMBLY_STAGE,
                    100,
                    format!("Embedded {} of {} assets", result.embedded_count(), result.outcomes.len()),
                );
                (Some(result.document.clone()), Some(result))
            }
            None => (None, None),
        };

        let duration_ms = timer.elapsed_ms();
        info!(duration_ms, "Pipeline completed");
        self.emit(
            PipelineEvent::new("pipeline.completed", request_id).with_data(json!({
                "duration_ms": duration_ms,
                "stages": records.len(),
                "cache_hits": records.iter().filter(|r| r.cache_hit).count(),
            })),
        )
        .await;

        Ok(FinalResult {
            request_id,
            document,
            assembly,
            fields: ctx.fields().clone(),
            assets: ctx.assets().clone(),
            stages: records,
            duration_ms,
        })
    }

    /// Runs one stage through the cache (when enabled) and the retry engine.
    ///
    /// Contributions are contract-checked inside each attempt, so a
    /// violating contribution is never cached.
    async fn execute_stage(
        &self,
        stage: &dyn Stage,
        ctx: &StageContext,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<(Contribution, bool), PipelineFailure> {
        let name = stage.name();
        let contract = stage.contract();
        let view = ctx.view(name, &contract, request);
        let max_attempts = stage
            .max_attempts()
            .unwrap_or(self.engine.config().max_attempts);

        let (view, contract) = (&view, &contract);
        let attempt = move || async move {
            let contribution = stage.generate(view).await?;
            contract.check(name, &contribution)?;
            Ok::<_, ProviderError>(contribution)
        };

        let outcome = match (&self.cache, stage.cacheable()) {
            (Some(cache), true) => {
                let ttl = stage
                    .cache_ttl()
                    .unwrap_or_else(|| cache.config().default_ttl());
                let mut computed = false;
                let value = cache
                    .get_or_compute(view.fingerprint(), ttl, || {
                        computed = true;
                        self.engine
                            .execute_with_cancel(name, max_attempts, Some(cancel), attempt)
                    })
                    .await;
                value.map(|contribution| (contribution, !computed))
            }
            _ => self
                .engine
                .execute_with_cancel(name, max_attempts, Some(cancel), attempt)
                .await
                .map(|contribution| (contribution, false)),
        };

        outcome.map_err(|error| match error {
            RetryError::Cancelled { .. } => self.cancellation(cancel),
            RetryError::Terminal { source, .. } if source.kind == ProviderErrorKind::ContractViolation => {
                PipelineFailure::Contract(source.message)
            }
            other => PipelineFailure::Retry(other),
        })
    }

    async fn assemble(&self, key: &str, ctx: &StageContext) -> Result<AssemblyResult, PipelineFailure> {
        let document = ctx
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::for_field(key, "document field is missing or not a string"))?
            .to_string();
        let assembler = self.assembler.clone();
        let assets = ctx.assets().clone();
        let budget = self.budget.clone();

        let result = tokio::task::spawn_blocking(move || assembler.assemble(&document, &assets, &budget))
            .await
            .map_err(|e| PipelineFailure::Internal(format!("assembly task failed: {e}")))??;

        info!(
            embedded = result.embedded_count(),
            failures = result.failures.len(),
            aggregate_size = result.aggregate_size,
            "Assembly completed"
        );
        Ok(result)
    }

    async fn within_deadline<T, Fut>(&self, deadline: Option<Instant>, work: Fut) -> Result<T, PipelineFailure>
    where
        Fut: Future<Output = Result<T, PipelineFailure>>,
    {
        match deadline {
            Some(at) => tokio::time::timeout_at(at, work).await.unwrap_or_else(|_| {
                Err(PipelineFailure::DeadlineExceeded {
                    deadline_ms: self.deadline_ms().unwrap_or_default(),
                })
            }),
            None => work.await,
        }
    }

    fn deadline_ms(&self) -> Option<u64> {
        self.run_deadline
            .map(|limit| u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
    }

    fn cancellation(&self, cancel: &CancellationToken) -> PipelineFailure {
        PipelineFailure::Cancelled {
            reason: cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
        }
    }

    async fn stage_failed(
        &self,
        request_id: Uuid,
        stage: &str,
        failure: PipelineFailure,
        ctx: &StageContext,
    ) -> PipelineError {
        self.emit(
            PipelineEvent::new("stage.failed", request_id)
                .with_stage(stage)
                .with_data(json!({
                    "error": failure.to_string(),
                    "error_type": failure.type_name(),
                })),
        )
        .await;
        self.abort(request_id, stage, failure, ctx).await
    }

    async fn abort(
        &self,
        request_id: Uuid,
        stage: &str,
        failure: PipelineFailure,
        ctx: &StageContext,
    ) -> PipelineError {
        let error = PipelineError::new(stage, failure);
        if let PipelineFailure::Cancelled { reason } = &error.cause {
            warn!(stage, reason = %reason, "Pipeline cancelled");
            self.emit(
                PipelineEvent::new("pipeline.cancelled", request_id)
                    .with_stage(stage)
                    .with_data(json!({
                        "reason": reason,
                        "populated_keys": ctx.keys(),
                    })),
            )
            .await;
        } else {
            warn!(stage, error = %error.cause, "Pipeline failed");
            self.emit(
                PipelineEvent::new("pipeline.failed", request_id)
                    .with_stage(stage)
                    .with_data(json!({
                        "error": error.cause.to_string(),
                        "error_type": error.cause.type_name(),
                        "populated_keys": ctx.keys(),
                    })),
            )
            .await;
        }
        error
    }

    fn progress(&self, stage: &str, percentage: u8, message: impl Into<String>) {
        if let Some(observer) = &self.observer {
            notify(observer.as_ref(), &ProgressUpdate::new(stage, percentage, message));
        }
    }

    async fn emit(&self, event: PipelineEvent) {
        self.events.emit(event).await;
    }
}

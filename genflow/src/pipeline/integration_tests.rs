//! End-to-end tests for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::assembly::{ArtifactAssembler, AssetStatus, PassthroughTranscoder};
    use crate::cache::{CacheConfig, ResultCache};
    use crate::cancellation::CancellationToken;
    use crate::config::GenflowConfig;
    use crate::errors::{PipelineFailure, ProviderError, RetryError};
    use crate::events::CollectingEventSink;
    use crate::fanout::Fanout;
    use crate::pipeline::{
        Contribution, FnStage, GenerationRequest, Orchestrator, Pipeline, PipelineBuilder, ProgressUpdate, Stage,
        StageContext, StageContract, StageView, ASSEMBLY_STAGE,
    };
    use crate::resilience::BreakerState;
    use crate::testing::{
        png_asset, sample_assets, test_engine, FailingStage, ProgressRecorder, ScriptedStage, StaticStage, SAMPLE_DOCUMENT,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Cancels the shared token from inside the run.
    #[derive(Debug)]
    struct CancellingStage {
        token: Arc<CancellationToken>,
    }

    #[async_trait]
    impl Stage for CancellingStage {
        fn name(&self) -> &str {
            "outline"
        }

        fn contract(&self) -> StageContract {
            StageContract::new().reads(["keyword"]).writes(["outline"])
        }

        async fn generate(&self, _view: &StageView) -> Result<Contribution, ProviderError> {
            self.token.cancel("operator stop");
            Ok(Contribution::new("outline", 1).with_field("outline", json!(["hero"])))
        }
    }

    fn outline_stage() -> StaticStage {
        StaticStage::new("outline")
            .reading(["keyword"])
            .with_field("outline", json!(["hero", "features", "pricing"]))
    }

    fn copy_stage() -> StaticStage {
        StaticStage::new("copy")
            .reading(["outline"])
            .with_field("document", SAMPLE_DOCUMENT)
    }

    fn standalone_copy() -> StaticStage {
        StaticStage::new("copy").with_field("document", SAMPLE_DOCUMENT)
    }

    fn images_stage() -> StaticStage {
        sample_assets()
            .into_iter()
            .fold(StaticStage::new("images").reading(["outline"]), StaticStage::with_asset)
    }

    fn landing_pipeline(stages: Vec<Arc<dyn Stage>>) -> Pipeline {
        stages
            .into_iter()
            .try_fold(
                PipelineBuilder::new("landing_page").with_seed_keys(["keyword"]),
                PipelineBuilder::stage,
            )
            .and_then(PipelineBuilder::build)
            .unwrap()
    }

    fn orchestrator(pipeline: Pipeline) -> Orchestrator {
        Orchestrator::new(pipeline, test_engine(5, 60_000))
            .with_assembler(ArtifactAssembler::new(Arc::new(PassthroughTranscoder)))
    }

    fn seed() -> StageContext {
        StageContext::new().with_field("keyword", "trail shoes")
    }

    #[tokio::test]
    async fn test_full_run_assembles_document() {
        let pipeline = landing_pipeline(vec![
            Arc::new(outline_stage()),
            Arc::new(copy_stage()),
            Arc::new(images_stage()),
        ]);
        let events = Arc::new(CollectingEventSink::new());
        let recorder = Arc::new(ProgressRecorder::new());
        let orchestrator = orchestrator(pipeline)
            .with_event_sink(events.clone())
            .with_observer(recorder.clone());
        let request = GenerationRequest::new().with_param("locale", "en-GB");

        let result = orchestrator
            .run(&request, seed(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.request_id, request.id());
        let document = result.document.as_deref().unwrap();
        assert!(!document.contains("hero.jpg"));
        assert!(!document.contains("logo.png"));
        assert!(document.contains("data:image/jpeg;base64,"));
        assert!(document.contains("data:image/png;base64,"));
        assert!(document.contains("icon-x.png"));
        assert!(document.contains("<pre>  keep   this  </pre>"));

        let assembly = result.assembly.as_ref().unwrap();
        assert_eq!(assembly.embedded_count(), 3);
        assert_eq!(assembly.outcome("hero.jpg").unwrap().occurrences, 2);
        assert_eq!(assembly.outcome("icon-x.png").unwrap().status, AssetStatus::Unresolved);
        assert!(assembly.aggregate_size <= assembly.total_budget);

        assert_eq!(result.assets.len(), 3);
        assert_eq!(result.fields.get("keyword"), Some(&json!("trail shoes")));
        let stages: Vec<&str> = result.stages.iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(stages, vec!["outline", "copy", "images"]);
        assert!(result.stages.iter().all(|r| !r.cache_hit));

        assert_eq!(
            events.names(),
            vec![
                "pipeline.started",
                "stage.started",
                "stage.completed",
                "stage.started",
                "stage.completed",
                "stage.started",
                "stage.completed",
                "assembly.completed",
                "pipeline.completed",
            ]
        );
        assert_eq!(recorder.percentages(), vec![0, 25, 25, 50, 50, 75, 75, 100]);
        let last = recorder.updates().pop().unwrap();
        assert_eq!(last.stage, ASSEMBLY_STAGE);
        assert_eq!(last.message, "Embedded 3 of 4 assets");
    }

    #[tokio::test]
    async fn test_fanout_stage_keeps_partial_results() {
        let images = FnStage::new(
            "images",
            StageContract::new().reads(["outline"]).producing_assets(),
            |view: StageView| async move {
                let sections: Vec<String> = view.decode("outline")?;
                let units: Vec<(String, _)> = sections
                    .into_iter()
                    .map(|section| {
                        let label = section.clone();
                        (label, async move {
                            if section == "pricing" {
                                Err(ProviderError::terminal("no artwork for pricing"))
                            } else {
                                Ok(png_asset(&format!("{section}.png"), 64))
                            }
                        })
                    })
                    .collect();
                let (made, _skipped) = Fanout::new(2).settle_all(units).await.partition();
                Ok::<_, ProviderError>(
                    made.into_iter()
                        .fold(Contribution::new("images", 1), |c, (_, asset)| c.with_asset(asset)),
                )
            },
        );
        let pipeline = landing_pipeline(vec![
            Arc::new(outline_stage()),
            Arc::new(copy_stage()),
            Arc::new(images),
        ]);

        let result = orchestrator(pipeline)
            .run(&GenerationRequest::new(), seed(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.assets.len(), 2);
        assert!(result.assets.get("hero.png").is_some());
        assert!(result.assets.get("features.png").is_some());
        assert!(result.assets.get("pricing.png").is_none());
    }

    #[tokio::test]
    async fn test_stage_sees_only_declared_reads() {
        let copy = Arc::new(copy_stage());
        let pipeline = landing_pipeline(vec![Arc::new(outline_stage()), copy.clone()]);

        orchestrator(pipeline)
            .run(&GenerationRequest::new(), seed(), &CancellationToken::new())
            .await
            .unwrap();

        let seen = copy.seen_fields();
        assert_eq!(seen.len(), 1);
        let keys: Vec<&String> = seen[0].keys().collect();
        assert_eq!(keys, vec!["outline"]);
    }

    #[tokio::test]
    async fn test_run_without_assembly() {
        let pipeline = PipelineBuilder::new("outline_only")
            .with_seed_keys(["keyword"])
            .without_assembly()
            .stage(Arc::new(outline_stage()))
            .and_then(PipelineBuilder::build)
            .unwrap();
        let recorder = Arc::new(ProgressRecorder::new());

        let result = orchestrator(pipeline)
            .with_observer(recorder.clone())
            .run(&GenerationRequest::new(), seed(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.document.is_none());
        assert!(result.assembly.is_none());
        assert_eq!(recorder.percentages(), vec![0, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_across_runs() {
        let structure = Arc::new(
            ScriptedStage::new(
                StaticStage::new("structure_generation").with_field("structure", json!({"sections": 4})),
            )
            .failing_first(3, ProviderError::transient("upstream 503")),
        );
        let pipeline = PipelineBuilder::new("structure")
            .without_assembly()
            .stage(structure.clone())
            .and_then(PipelineBuilder::build)
            .unwrap();
        let engine = test_engine(3, 60_000);
        let orchestrator = Orchestrator::new(pipeline, engine.clone());
        let cancel = CancellationToken::new();

        let first = orchestrator
            .run(&GenerationRequest::new(), StageContext::new(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(first.stage, "structure_generation");
        assert!(matches!(
            first.cause,
            PipelineFailure::Retry(RetryError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(structure.attempts(), 3);
        assert_eq!(engine.snapshot("structure_generation").state, BreakerState::Open);

        let second = orchestrator
            .run(&GenerationRequest::new(), StageContext::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(second.cause, PipelineFailure::Retry(RetryError::CircuitOpen { .. })));
        assert_eq!(second.cause.type_name(), "CircuitOpenError");
        assert_eq!(structure.attempts(), 3);

        tokio::time::advance(Duration::from_millis(60_001)).await;
        let third = orchestrator
            .run(&GenerationRequest::new(), StageContext::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(third.fields.get("structure"), Some(&json!({"sections": 4})));
        assert_eq!(structure.attempts(), 4);
        let circuit = engine.snapshot("structure_generation");
        assert_eq!(circuit.state, BreakerState::Closed);
        assert_eq!(circuit.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_recovered_within_run() {
        let copy = Arc::new(
            ScriptedStage::new(standalone_copy())
                .failing_first(2, ProviderError::rate_limited("slow down")),
        );
        let pipeline = landing_pipeline(vec![copy.clone()]);

        let result = orchestrator(pipeline)
            .run(&GenerationRequest::new(), seed(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(copy.attempts(), 3);
        assert!(result.document.is_some());
    }

    #[tokio::test]
    async fn test_cache_hit_on_second_run() {
        let outline = Arc::new(outline_stage().cached());
        let pipeline = PipelineBuilder::new("outline_only")
            .with_seed_keys(["keyword"])
            .without_assembly()
            .stage(outline.clone())
            .and_then(PipelineBuilder::build)
            .unwrap();
        let cache = Arc::new(ResultCache::new(CacheConfig::new()));
        let recorder = Arc::new(ProgressRecorder::new());
        let orchestrator = orchestrator(pipeline)
            .with_cache(cache.clone())
            .with_observer(recorder.clone());
        let cancel = CancellationToken::new();

        let first = orchestrator
            .run(&GenerationRequest::new(), seed(), &cancel)
            .await
            .unwrap();
        let second = orchestrator
            .run(&GenerationRequest::new(), seed(), &cancel)
            .await
            .unwrap();

        assert_eq!(outline.call_count(), 1);
        assert!(!first.stages[0].cache_hit);
        assert!(second.stages[0].cache_hit);
        assert_eq!(first.fields, second.fields);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
        assert!(recorder
            .updates()
            .iter()
            .any(|update: &ProgressUpdate| update.message == "Completed outline (cached)"));

        let other_seed = StageContext::new().with_field("keyword", "road shoes");
        orchestrator
            .run(&GenerationRequest::new(), other_seed, &cancel)
            .await
            .unwrap();
        assert_eq!(outline.call_count(), 2);
    }

    #[tokio::test]
    async fn test_undeclared_write_aborts_run() {
        let rogue = Arc::new(
            StaticStage::new("outline")
                .with_field("outline", json!([]))
                .with_field("secret", "leak")
                .with_contract(StageContract::new().writes(["outline"]))
                .cached(),
        );
        let pipeline = PipelineBuilder::new("rogue")
            .without_assembly()
            .stage(rogue.clone())
            .and_then(PipelineBuilder::build)
            .unwrap();
        let events = Arc::new(CollectingEventSink::new());
        let cache = Arc::new(ResultCache::new(CacheConfig::new()));

        let error = orchestrator(pipeline)
            .with_cache(cache.clone())
            .with_event_sink(events.clone())
            .run(&GenerationRequest::new(), StageContext::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.stage, "outline");
        assert!(matches!(&error.cause, PipelineFailure::Contract(message) if message.contains("'secret'")));
        assert_eq!(rogue.call_count(), 1);
        assert!(cache.is_empty());
        assert_eq!(events.events_named("stage.failed").len(), 1);
        let failed = events.events_named("pipeline.failed");
        assert_eq!(failed[0].data["error_type"], "ContractViolation");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let outline = Arc::new(outline_stage());
        let pipeline = landing_pipeline(vec![outline.clone(), Arc::new(copy_stage())]);
        let events = Arc::new(CollectingEventSink::new());
        let cancel = CancellationToken::new();
        cancel.cancel("user abort");

        let error = orchestrator(pipeline)
            .with_event_sink(events.clone())
            .run(&GenerationRequest::new(), seed(), &cancel)
            .await
            .unwrap_err();

        assert!(error.is_cancelled());
        assert_eq!(error.stage, "outline");
        assert_eq!(
            error.cause,
            PipelineFailure::Cancelled {
                reason: "user abort".to_string()
            }
        );
        assert_eq!(outline.call_count(), 0);
        assert_eq!(events.names(), vec!["pipeline.started", "pipeline.cancelled"]);
    }

    #[tokio::test]
    async fn test_cancelled_between_stages() {
        let token = Arc::new(CancellationToken::new());
        let copy = Arc::new(copy_stage());
        let pipeline = landing_pipeline(vec![
            Arc::new(CancellingStage {
                token: token.clone(),
            }),
            copy.clone(),
        ]);
        let events = Arc::new(CollectingEventSink::new());

        let error = orchestrator(pipeline)
            .with_event_sink(events.clone())
            .run(&GenerationRequest::new(), seed(), &token)
            .await
            .unwrap_err();

        assert_eq!(error.stage, "copy");
        assert!(error.is_cancelled());
        assert_eq!(copy.call_count(), 0);
        let cancelled = events.events_named("pipeline.cancelled");
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].data["reason"], "operator stop");
        assert_eq!(cancelled[0].data["populated_keys"], json!(["keyword", "outline"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_exceeded() {
        let pipeline = landing_pipeline(vec![
            Arc::new(outline_stage()),
            Arc::new(copy_stage().with_delay(Duration::from_secs(5))),
        ]);

        let error = orchestrator(pipeline)
            .with_run_deadline(Duration::from_secs(1))
            .run(&GenerationRequest::new(), seed(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.stage, "copy");
        assert_eq!(error.cause, PipelineFailure::DeadlineExceeded { deadline_ms: 1000 });
    }

    #[tokio::test]
    async fn test_run_reported_failure() {
        let images = Arc::new(
            FailingStage::new("images", ProviderError::terminal("prompt rejected"))
                .with_contract(StageContract::new().reads(["outline"]).producing_assets()),
        );
        let pipeline = landing_pipeline(vec![Arc::new(outline_stage()), Arc::new(copy_stage()), images.clone()]);

        let report = orchestrator(pipeline)
            .run_reported(&GenerationRequest::new(), seed(), &CancellationToken::new())
            .await;

        assert!(!report.success);
        assert_eq!(report.stage.as_deref(), Some("images"));
        assert_eq!(report.error_type.as_deref(), Some("ProviderError"));
        assert!(report.error.as_deref().unwrap().contains("prompt rejected"));
        assert!(report.result.is_none());
        assert_eq!(images.call_count(), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["stage"], "images");
    }

    #[tokio::test]
    async fn test_run_reported_success() {
        let pipeline = landing_pipeline(vec![Arc::new(standalone_copy())]);

        let report = orchestrator(pipeline)
            .run_reported(&GenerationRequest::new(), StageContext::new(), &CancellationToken::new())
            .await;

        assert!(report.success);
        assert!(report.error.is_none());
        assert!(report.result.unwrap().document.is_some());
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_break_run() {
        let pipeline = landing_pipeline(vec![Arc::new(outline_stage()), Arc::new(copy_stage())]);
        let observer = |_: &ProgressUpdate| panic!("observer bug");

        let result = orchestrator(pipeline)
            .with_observer(Arc::new(observer))
            .run(&GenerationRequest::new(), seed(), &CancellationToken::new())
            .await;

        let result = assert_ok!(result);
        assert!(result.document.is_some());
    }

    #[tokio::test]
    async fn test_missing_document_fails_assembly() {
        let copy = StaticStage::new("copy").with_field("document", json!({"html": "<p/>"}));
        let pipeline = landing_pipeline(vec![Arc::new(copy)]);

        let error = orchestrator(pipeline)
            .run(&GenerationRequest::new(), StageContext::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.stage, ASSEMBLY_STAGE);
        assert!(matches!(error.cause, PipelineFailure::Assembly(_)));
    }

    #[test]
    fn test_from_config() {
        let pipeline = landing_pipeline(vec![Arc::new(standalone_copy())]);

        let cached = Orchestrator::from_config(
            pipeline.clone(),
            &GenflowConfig::new().with_run_deadline_ms(30_000),
        )
        .unwrap();
        assert!(cached.cache().is_some());
        assert!(format!("{cached:?}").contains("Some(30s)"));

        let uncached =
            Orchestrator::from_config(pipeline.clone(), &GenflowConfig::new().with_cache_enabled(false)).unwrap();
        assert!(uncached.cache().is_none());

        assert_err!(Orchestrator::from_config(
            pipeline,
            &GenflowConfig::new().with_run_deadline_ms(0)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_cache_sweeps_expired_entries() {
        let pipeline = PipelineBuilder::new("outline_only")
            .with_seed_keys(["keyword"])
            .without_assembly()
            .stage(Arc::new(outline_stage().cached()))
            .and_then(PipelineBuilder::build)
            .unwrap();
        let config = GenflowConfig::new().with_cache(
            CacheConfig::new()
                .with_default_ttl_ms(1_000)
                .with_sweep_interval_ms(100)
                .with_max_entries(None),
        );
        let orchestrator = Orchestrator::from_config(pipeline, &config).unwrap();
        assert!(orchestrator.is_sweeping());

        for n in 0..20 {
            let seed = StageContext::new().with_field("keyword", format!("keyword {n}"));
            assert_ok!(
                orchestrator
                    .run(&GenerationRequest::new(), seed, &CancellationToken::new())
                    .await
            );
        }
        let cache = orchestrator.cache().unwrap();
        assert_eq!(cache.len(), 20);

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 20);
    }

    #[test]
    fn test_from_config_outside_runtime_does_not_sweep() {
        let pipeline = landing_pipeline(vec![Arc::new(standalone_copy().cached())]);
        let orchestrator = Orchestrator::from_config(pipeline, &GenflowConfig::new()).unwrap();
        assert!(orchestrator.cache().is_some());
        assert!(!orchestrator.is_sweeping());
    }
}

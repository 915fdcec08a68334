//! End-to-end tests across routing, execution and store-and-forward.

use super::*;
use crate::context::FunctionContext;
use crate::core::{AddEventRequest, Event, FunctionOutput, PipelineData};
use crate::functions::{AppFunction, Batch, FnFunction, MessageBusExport, PassThrough};
use crate::messaging::MessageEnvelope;
use crate::storeforward::{RetryPolicy, SqliteStoreClient, StoreForward};
use crate::testing::{
    assert_completed, assert_failed_at, assert_halted_at, CountingFunction, FailingFunction,
    MockMessageClient, RecordingFunction,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn event_envelope(topic: &str, device: &str) -> MessageEnvelope {
    let event = Event::new("thermostat", device, "reading").with_reading("temperature", "Int32", "21");
    let payload = serde_json::to_vec(&AddEventRequest::new(event)).unwrap_or_default();
    MessageEnvelope::new(payload, "application/json").with_topic(topic)
}

fn raw_envelope(topic: &str, payload: &[u8]) -> MessageEnvelope {
    MessageEnvelope::new(payload, "application/octet-stream").with_topic(topic)
}

struct Service {
    registry: Arc<PipelineRegistry>,
    store: Arc<SqliteStoreClient>,
    store_forward: Arc<StoreForward>,
    router: PipelineRouter,
}

fn service(max_retry_count: u32) -> Service {
    let registry = Arc::new(PipelineRegistry::new());
    let store = Arc::new(SqliteStoreClient::in_memory().unwrap());
    let store_forward = Arc::new(StoreForward::new(
        "svc",
        RetryPolicy {
            enabled: true,
            retry_interval: Duration::from_secs(1),
            max_retry_count,
        },
        store.clone(),
        registry.clone(),
    ));
    let engine = PipelineEngine::new().with_store_forward(store_forward.clone());
    let router = PipelineRouter::new(registry.clone(), engine).with_target_type(TargetType::Raw);
    Service {
        registry,
        store,
        store_forward,
        router,
    }
}

#[tokio::test]
async fn test_router_runs_only_matching_pipelines() {
    let svc = service(1);
    let temperature = Arc::new(CountingFunction::new("temperature"));
    let alerts = Arc::new(CountingFunction::new("alerts"));
    svc.registry
        .add_function_pipeline(FunctionPipeline::new(
            "temperature",
            vec!["events/+/temperature".into()],
            vec![temperature.clone()],
        ))
        .unwrap();
    svc.registry
        .add_function_pipeline(FunctionPipeline::new(
            "alerts",
            vec!["alerts/#".into()],
            vec![alerts.clone()],
        ))
        .unwrap();
    let router = svc.router.with_target_type(TargetType::Event);

    let outcomes = router
        .route(&event_envelope("events/d1/temperature", "d1"), None)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].pipeline_id, "temperature");
    assert_eq!(outcomes[0].context.value("devicename"), Some("d1"));
    assert_eq!(outcomes[0].context.value("receivedtopic"), Some("events/d1/temperature"));

    let none = router
        .route(&event_envelope("events/d1/humidity", "d1"), None)
        .await
        .unwrap();
    assert!(none.is_empty());

    assert_eq!(temperature.calls(), 1);
    assert_eq!(alerts.calls(), 0);
    assert_eq!(router.metrics().messages_received.get(), 1);
}

#[tokio::test]
async fn test_undecodable_message_is_counted_and_rejected() {
    let svc = service(1);
    let counter = Arc::new(CountingFunction::new("count"));
    svc.registry
        .set_default_functions_pipeline(vec![counter.clone() as Arc<dyn AppFunction>]);
    let router = svc.router.with_target_type(TargetType::Event);

    let result = router.route(&raw_envelope("events/d1", b"not an event"), None).await;
    assert!(result.is_err());
    assert_eq!(router.metrics().invalid_messages_received.get(), 1);
    assert_eq!(counter.calls(), 0);
}

#[tokio::test]
async fn test_pipelines_get_isolated_contexts() {
    let svc = service(1);
    let writer = Arc::new(RecordingFunction::new("writer").writing("marker", "a"));
    let reader = Arc::new(RecordingFunction::new("reader"));
    svc.registry
        .add_function_pipeline(FunctionPipeline::new("a", vec!["#".into()], vec![writer.clone()]))
        .unwrap();
    svc.registry
        .add_function_pipeline(FunctionPipeline::new(
            "b",
            vec!["#".into()],
            vec![Arc::new(PassThrough::new("noop")), reader.clone()],
        ))
        .unwrap();

    let outcomes = svc
        .router
        .route(&raw_envelope("any/topic", b"x").with_correlation_id("corr"), None)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].pipeline_id, "a");
    assert_eq!(outcomes[0].context.value("marker"), Some("a"));
    assert_eq!(outcomes[1].context.value("marker"), None);

    let seen = reader.calls();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].correlation_id, "corr");
    assert_eq!(seen[0].values.get("pipelineid"), Some(&"b".to_string()));
    assert!(!seen[0].values.contains_key("marker"));
}

#[tokio::test]
async fn test_short_circuit_with_and_without_error() {
    let svc = service(1);
    let after_halt = Arc::new(CountingFunction::new("after-halt"));
    let after_fail = Arc::new(CountingFunction::new("after-fail"));
    svc.registry
        .add_function_pipeline(
            FunctionPipeline::new(
                "halts",
                vec!["#".into()],
                vec![
                    Arc::new(FnFunction::new("drop", |_: &mut FunctionContext, _| {
                        FunctionOutput::halt()
                    })),
                    after_halt.clone(),
                ],
            )
            .with_store_and_forward(false),
        )
        .unwrap();
    svc.registry
        .add_function_pipeline(
            FunctionPipeline::new(
                "fails",
                vec!["#".into()],
                vec![
                    Arc::new(PassThrough::new("noop")),
                    Arc::new(FailingFunction::new("export")),
                    after_fail.clone(),
                ],
            )
            .with_store_and_forward(false),
        )
        .unwrap();

    let outcomes = svc.router.route(&raw_envelope("t", b"x"), None).await.unwrap();
    assert_halted_at(&outcomes[0].outcome, 0);
    assert_failed_at(&outcomes[1].outcome, 1);
    assert_eq!(after_halt.calls(), 0);
    assert_eq!(after_fail.calls(), 0);
    assert_eq!(svc.store.count().unwrap(), 0);
}

#[tokio::test]
async fn test_failed_message_is_retried_until_exhausted() {
    let svc = service(2);
    let export = Arc::new(FailingFunction::new("export"));
    svc.registry
        .add_function_pipeline(FunctionPipeline::new("p", vec!["#".into()], vec![export.clone()]))
        .unwrap();

    let outcomes = svc.router.route(&raw_envelope("t", b"reading"), None).await.unwrap();
    assert_failed_at(&outcomes[0].outcome, 0);
    assert_eq!(svc.store.count().unwrap(), 1);
    assert_eq!(svc.store_forward.pending(), 1);

    let first = svc.store_forward.retry_stored_data().await.unwrap();
    assert_eq!(first.updated, 1);
    assert_eq!(svc.store.count().unwrap(), 1);

    let second = svc.store_forward.retry_stored_data().await.unwrap();
    assert_eq!(second.exhausted, 1);
    assert_eq!(svc.store.count().unwrap(), 0);
    assert_eq!(svc.store_forward.pending(), 0);
    assert_eq!(export.calls(), 3);

    let third = svc.store_forward.retry_stored_data().await.unwrap();
    assert_eq!(third.loaded, 0);
    assert_eq!(svc.store_forward.pending(), 0);
    assert_eq!(export.calls(), 3);
}

#[tokio::test]
async fn test_retry_resumes_at_failing_function_with_retry_data() {
    let svc = service(3);
    let upstream = Arc::new(CountingFunction::new("upstream"));
    let export = Arc::new(FailingFunction::fail_first("export", 1).with_retry_data(b"prepared".to_vec()));
    let sink = Arc::new(RecordingFunction::new("sink"));
    svc.registry
        .add_function_pipeline(FunctionPipeline::new(
            "p",
            vec!["#".into()],
            vec![upstream.clone(), export.clone(), sink.clone()],
        ))
        .unwrap();

    svc.router
        .route(&raw_envelope("t", b"original").with_correlation_id("corr"), None)
        .await
        .unwrap();
    assert_eq!(svc.store.count().unwrap(), 1);

    let summary = svc.store_forward.retry_stored_data().await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(svc.store.count().unwrap(), 0);

    assert_eq!(upstream.calls(), 1);
    assert_eq!(export.calls(), 2);
    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].correlation_id, "corr");
    assert_eq!(calls[0].data, Some(PipelineData::Bytes(b"prepared".to_vec())));
}

#[tokio::test]
async fn test_changed_pipeline_discards_stored_items() {
    let svc = service(3);
    svc.registry
        .add_function_pipeline(FunctionPipeline::new(
            "p",
            vec!["#".into()],
            vec![Arc::new(FailingFunction::new("export"))],
        ))
        .unwrap();
    svc.router.route(&raw_envelope("t", b"x"), None).await.unwrap();
    assert_eq!(svc.store.count().unwrap(), 1);

    let replacement = Arc::new(CountingFunction::new("replacement"));
    svc.registry
        .set_functions_pipeline_transforms("p", vec![replacement.clone() as Arc<dyn AppFunction>])
        .unwrap();

    let summary = svc.store_forward.retry_stored_data().await.unwrap();
    assert_eq!(summary.stale, 1);
    assert_eq!(svc.store.count().unwrap(), 0);
    assert_eq!(replacement.calls(), 0);
}

#[tokio::test]
async fn test_success_with_retry_trigger_replays_stored_items() {
    let svc = service(3);
    let export = Arc::new(FailingFunction::fail_first("export", 1));
    let notify = FnFunction::new("notify", |ctx: &mut FunctionContext, data| {
        ctx.trigger_retry_failed_data();
        FunctionOutput::proceed_with(data)
    });
    svc.registry
        .add_function_pipeline(FunctionPipeline::new(
            "p",
            vec!["#".into()],
            vec![export.clone(), Arc::new(notify)],
        ))
        .unwrap();

    svc.router.route(&raw_envelope("t", b"first"), None).await.unwrap();
    assert_eq!(svc.store.count().unwrap(), 1);

    // The second message succeeds and requests a retry pass in the background.
    let outcomes = svc.router.route(&raw_envelope("t", b"second"), None).await.unwrap();
    assert!(outcomes[0].outcome.is_success());

    for _ in 0..100 {
        if svc.store.count().unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(svc.store.count().unwrap(), 0);
    assert_eq!(export.calls(), 3);
}

#[tokio::test]
async fn test_batch_by_count_through_router() {
    let svc = service(1);
    let sink = Arc::new(RecordingFunction::new("sink"));
    svc.registry
        .add_function_pipeline(FunctionPipeline::new(
            "batched",
            vec!["#".into()],
            vec![Arc::new(Batch::by_count(3)), sink.clone()],
        ))
        .unwrap();

    for (i, payload) in [b"a", b"b"].iter().enumerate() {
        let outcomes = svc.router.route(&raw_envelope("t", *payload), None).await.unwrap();
        assert_halted_at(&outcomes[0].outcome, 0);
        assert_eq!(sink.calls().len(), 0, "released early at message {i}");
    }

    let outcomes = svc.router.route(&raw_envelope("t", b"c"), None).await.unwrap();
    let data = assert_completed(&outcomes[0].outcome).cloned();
    assert_eq!(
        data,
        Some(PipelineData::Batch(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]))
    );
    assert_eq!(sink.calls().len(), 1);
}

#[tokio::test]
async fn test_route_to_unknown_pipeline() {
    let svc = service(1);
    let result = svc
        .router
        .route_to(&raw_envelope("t", b"x"), "missing", None)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_failed_bus_export_is_replayed_once_the_broker_recovers() {
    let client = Arc::new(MockMessageClient::new());
    client.set_failing(true);
    let registry = Arc::new(PipelineRegistry::new());
    let store = Arc::new(SqliteStoreClient::in_memory().unwrap());
    let store_forward = Arc::new(
        StoreForward::new(
            "svc",
            RetryPolicy {
                enabled: true,
                retry_interval: Duration::from_secs(1),
                max_retry_count: 3,
            },
            store.clone(),
            registry.clone(),
        )
        .with_message_client(client.clone(), None),
    );
    let engine = PipelineEngine::new().with_store_forward(store_forward.clone());
    let router = PipelineRouter::new(registry.clone(), engine)
        .with_target_type(TargetType::Raw)
        .with_message_client(client.clone());
    registry
        .add_function_pipeline(FunctionPipeline::new(
            "export",
            vec!["#".into()],
            vec![
                Arc::new(PassThrough::new("noop")),
                Arc::new(MessageBusExport::new("export/out").with_persist_on_error(true)),
            ],
        ))
        .unwrap();

    let outcomes = router.route(&raw_envelope("t", b"reading"), None).await.unwrap();
    assert_failed_at(&outcomes[0].outcome, 1);
    assert_eq!(store.count().unwrap(), 1);
    assert!(client.published().is_empty());

    client.set_failing(false);
    let pass = store_forward.retry_stored_data().await.unwrap();
    assert_eq!(pass.loaded, 1);
    assert_eq!(pass.succeeded, 1);
    assert_eq!(store.count().unwrap(), 0);
    assert_eq!(store_forward.pending(), 0);

    let published = client.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "export/out");
    assert_eq!(published[0].1.payload, b"reading".to_vec());
}

//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use edgeflow::prelude::*;

fn event_payload() -> Vec<u8> {
    let event = Event::new("thermostat", "device-1", "reading")
        .with_reading("temperature", "Int32", "21")
        .with_reading("humidity", "Int32", "40");
    serde_json::to_vec(&AddEventRequest::new(event)).unwrap_or_default()
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let passthrough = FunctionPipeline::new(
        "passthrough",
        vec!["#".into()],
        (0..8)
            .map(|i| Arc::new(PassThrough::new(format!("noop-{i}"))) as Arc<dyn AppFunction>)
            .collect(),
    );
    let engine = PipelineEngine::new();
    c.bench_function("engine_eight_passthrough_functions", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let mut ctx = FunctionContext::new("bench", "");
                black_box(engine.run(&mut ctx, &passthrough, Some("x".into())).await)
            })
        });
    });

    let registry = Arc::new(PipelineRegistry::new());
    registry.set_default_functions_pipeline(vec![
        Arc::new(
            Filter::new(FilterTarget::DeviceName, &["device-.*"], false)
                .unwrap(),
        ),
        Arc::new(Conversion::new(ConversionFormat::Json)),
        Arc::new(Compression::new(CompressionAlgorithm::Gzip)),
        Arc::new(ResponseData::new()),
    ]);
    let router = PipelineRouter::new(registry, PipelineEngine::new());
    let envelope = MessageEnvelope::new(event_payload(), "application/json").with_topic("events/device-1");
    c.bench_function("router_event_filter_convert_compress", |b| {
        b.iter(|| runtime.block_on(async { black_box(router.route(&envelope, None).await) }));
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);

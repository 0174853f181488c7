//! Bridge response parsing and failure classification benchmarks.
//!
//! Both run on every poll of every running execution, so they sit on the
//! hot path of the status poller.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Map, Value};

use labexec::domain::models::{BridgeOperation, ExecutionMode, FailureSignals};
use labexec::services::{classify, BridgeContractParser};

fn envelope(status: &str) -> String {
    json!({
        "contractVersion": "bridge-contract/v1",
        "adapterId": "ot2",
        "operation": "status",
        "result": {"status": status}
    })
    .to_string()
}

/// A legacy payload with the status buried `depth` objects deep.
fn nested_legacy(depth: usize) -> String {
    let mut value = json!({"status": "running", "telemetry": {"tempC": 37.0}});
    for level in 0..depth {
        let mut layer = Map::new();
        layer.insert(format!("layer{level}"), value);
        layer.insert("noise".to_string(), json!([1, 2, 3]));
        layer.insert("meta".to_string(), json!({"source": "bridge"}));
        value = Value::Object(layer);
    }
    value.to_string()
}

fn bench_strict_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("contract/strict");
    let parser = BridgeContractParser::strict();
    let raw = envelope("running");

    group.bench_function("status_envelope", |b| {
        b.iter(|| parser.parse(BridgeOperation::Status, "ot2", black_box(&raw)));
    });

    let bad = r#"{"status": "running"}"#;
    group.bench_function("rejected_bare_payload", |b| {
        b.iter(|| parser.parse(BridgeOperation::Status, "ot2", black_box(bad)));
    });

    group.finish();
}

fn bench_legacy_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("contract/legacy");
    let parser = BridgeContractParser::legacy_compatible();

    for depth in [0usize, 2, 4] {
        let raw = nested_legacy(depth);
        group.bench_with_input(BenchmarkId::new("status_depth", depth), &raw, |b, raw| {
            b.iter(|| parser.parse(BridgeOperation::Status, "ot2", black_box(raw)));
        });
    }

    group.finish();
}

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");

    let cases = [
        ("timeout", FailureSignals::default().with_stderr("Connection timeout after 30s")),
        (
            "remote_pending",
            FailureSignals::default()
                .with_mode(ExecutionMode::TwoStepHttp)
                .with_status_raw("queued"),
        ),
        ("signal_exit", FailureSignals::default().with_exit_code(137)),
        ("generic", FailureSignals::default().with_status_raw("failed")),
    ];

    for (name, signals) in &cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), signals, |b, signals| {
            b.iter(|| classify(black_box(signals)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_strict_envelope,
    bench_legacy_search,
    bench_classification
);
criterion_main!(benches);

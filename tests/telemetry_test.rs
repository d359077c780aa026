//! Integration tests for telemetry initialization and span helpers.

use rescue::task::ObjectId;
use rescue::telemetry::task::{record_object, record_state_transition, start_operation_span};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let config = rescue::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "rescue-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = rescue::telemetry::init_telemetry(config);
}

#[test]
fn operation_span_records_object_and_transition() {
    let span = start_operation_span("search", "jobs", "w1");
    record_object(&span, ObjectId(42));
    record_state_transition(&span, ObjectId(42), "unowned", "owned");
}

#[test]
fn metric_instruments_build_against_noop_provider() {
    use opentelemetry::KeyValue;
    use rescue::telemetry::metrics;

    let queue = [KeyValue::new("queue", "jobs")];
    metrics::tasks_created().add(1, &queue);
    metrics::tasks_expired().add(2, &queue);
    metrics::operation_duration_ms().record(1.5, &queue);
}

#[test]
fn engine_operations_run_under_a_subscriber() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let engine = rescue::Engine::in_memory();
    let task = rescue::Task::new().meta(rescue::task::Meta::new().with("test.api.io/key", "foo"));
    engine.create(task).unwrap();
    let claimed = engine.search().unwrap();
    engine.delete(&claimed).unwrap();
}

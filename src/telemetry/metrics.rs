//! Metric instruments for rescue.
//!
//! Created from the `"rescue"` meter of the globally registered
//! `MeterProvider`. Every instrument carries a `queue` label.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("rescue")
}

/// Counter: tasks accepted by create.
pub fn tasks_created() -> Counter<u64> {
    meter()
        .u64_counter("rescue.task.created")
        .with_description("Number of tasks created")
        .build()
}

/// Counter: tasks handed to a worker by search.
/// Labels: `queue`, `method`.
pub fn tasks_claimed() -> Counter<u64> {
    meter()
        .u64_counter("rescue.task.claimed")
        .with_description("Number of tasks claimed by workers")
        .build()
}

/// Counter: tasks acknowledged and removed.
pub fn tasks_deleted() -> Counter<u64> {
    meter()
        .u64_counter("rescue.task.deleted")
        .with_description("Number of tasks deleted")
        .build()
}

/// Counter: tasks removed by the system because another task subsumes them.
/// Labels: `queue`, `reason`.
pub fn tasks_obsolete() -> Counter<u64> {
    meter()
        .u64_counter("rescue.task.obsolete")
        .with_description("Number of obsolete tasks removed")
        .build()
}

/// Counter: leases stripped after expiry.
pub fn tasks_expired() -> Counter<u64> {
    meter()
        .u64_counter("rescue.task.expired")
        .with_description("Number of expired leases reclaimed")
        .build()
}

/// Counter: leases pushed forward by their owner.
pub fn tasks_extended() -> Counter<u64> {
    meter()
        .u64_counter("rescue.task.extended")
        .with_description("Number of leases extended")
        .build()
}

/// Counter: tasks emitted from templates.
/// Labels: `queue`, `source` ("cron" | "gate").
pub fn tasks_emitted() -> Counter<u64> {
    meter()
        .u64_counter("rescue.task.emitted")
        .with_description("Number of tasks emitted from templates")
        .build()
}

/// Counter: stale delete/extend attempts.
/// Labels: `queue`, `operation`.
pub fn tasks_outdated() -> Counter<u64> {
    meter()
        .u64_counter("rescue.task.outdated")
        .with_description("Number of stale lease operations")
        .build()
}

/// Counter: expire runs that left fairness deviation unresolved.
pub fn tasks_not_revoked() -> Counter<u64> {
    meter()
        .u64_counter("rescue.task.not_revoked")
        .with_description("Number of unresolved fairness corrections")
        .build()
}

/// Histogram: engine operation duration in milliseconds, lock wait included.
/// Labels: `queue`, `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("rescue.operation.duration_ms")
        .with_description("Engine operation duration in milliseconds")
        .with_unit("ms")
        .build()
}

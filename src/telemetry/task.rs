//! Engine operation span helpers.

use tracing::Span;

use crate::task::ObjectId;

/// Start a span for one engine call.
///
/// `task.object` is declared empty and filled in via [`record_object`] once
/// the operation knows which task it is working on.
pub fn start_operation_span(operation: &'static str, queue: &str, worker: &str) -> Span {
    tracing::info_span!(
        "task.operation",
        "task.operation" = operation,
        "task.queue" = queue,
        "task.worker" = worker,
        "task.object" = tracing::field::Empty,
    )
}

pub fn record_object(span: &Span, object: ObjectId) {
    span.record("task.object", object.0);
}

/// Record a lifecycle step of one task on the given span.
pub fn record_state_transition(span: &Span, object: ObjectId, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::debug!(object = object.0, from, to, "state_transition");
    });
}

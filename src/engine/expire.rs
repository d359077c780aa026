use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{Span, debug, warn};

use super::{Engine, nanos};
use crate::balancer::Counts;
use crate::error::{Error, Result};
use crate::task::{Method, ObjectId, Task};
use crate::telemetry::metrics;
use crate::telemetry::task::record_state_transition;

impl Engine {
    /// Reclaim lapsed leases and check the fleet for unfair ownership.
    ///
    /// Broadcasts older than the retention window are removed first. Every
    /// task whose lease ran out is returned to the queue with its cycle
    /// count bumped. The balancer is then asked how far ownership
    /// still deviates from a fair split. Only lapsed leases are ever taken
    /// back, so a deviation that remains is reported as
    /// [`Error::TaskNotRevoked`] for the caller to log.
    pub fn expire(&self) -> Result<()> {
        self.locked("expire", |span| {
            let now = self.timer.now();
            let mut lis = self.list()?;
            self.retire(&mut lis, now, span)?;

            let mut current = Counts::new();
            current.insert(self.worker.clone(), 0);
            for t in &lis {
                if let Some(w) = t.worker() {
                    *current.entry(w.to_string()).or_default() += 1;
                }
            }

            for t in lis.iter_mut() {
                if let Some(w) = self.reclaim(t, now, span)?
                    && let Some(n) = current.get_mut(&w)
                {
                    *n = n.saturating_sub(1);
                }
            }

            let workers: Vec<String> = current.keys().cloned().collect();
            let owned: usize = current.values().sum();
            let Some(desired) = self.balancer.opt(&workers, owned) else {
                return Ok(());
            };
            let Some(mut deviation) = self.balancer.dev(&current, &desired) else {
                return Ok(());
            };

            for t in lis.iter_mut() {
                let Some(w) = t.worker().map(str::to_string) else { continue };
                let Some(n) = deviation.get_mut(&w).filter(|n| **n > 0) else {
                    continue;
                };
                if self.reclaim(t, now, span)?.is_some() {
                    *n -= 1;
                }
            }

            deviation.retain(|_, n| *n > 0);
            if deviation.is_empty() {
                return Ok(());
            }

            metrics::tasks_not_revoked().add(1, &self.queue_attr());
            warn!(?deviation, ?current, ?desired, "ownership deviates from fair share");
            Err(Error::TaskNotRevoked(
                deviation
                    .iter()
                    .map(|(w, n)| format!("{w}={n}"))
                    .collect::<Vec<_>>()
                    .join(","),
            ))
        })
    }

    /// Delete broadcasts created more than one retention window ago and drop
    /// them from `lis`. Templates are kept.
    fn retire(&self, lis: &mut Vec<Task>, now: DateTime<Utc>, span: &Span) -> Result<()> {
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return Ok(());
        };
        let cutoff = ObjectId(nanos(cutoff));

        let (old, keep): (Vec<Task>, Vec<Task>) = std::mem::take(lis).into_iter().partition(|t| {
            t.method() == Method::All && !t.is_template() && t.object().is_some_and(|o| o < cutoff)
        });
        *lis = keep;

        for object in old.iter().filter_map(Task::object) {
            self.remove(object)?;
            record_state_transition(span, object, "unowned", "retired");
            metrics::tasks_obsolete().add(
                1,
                &[
                    KeyValue::new("queue", self.queue.clone()),
                    KeyValue::new("reason", "retention"),
                ],
            );
            debug!(object = object.0, "broadcast retired");
        }
        Ok(())
    }

    /// Strip `task`'s lease if it ran out. Returns the former owner.
    fn reclaim(&self, task: &mut Task, now: DateTime<Utc>, span: &Span) -> Result<Option<String>> {
        if !task.is_owned() || !task.is_expired(now) {
            return Ok(None);
        }
        let Some(core) = task.core.as_mut() else {
            return Ok(None);
        };
        let owner = core.worker.clone();
        core.release();
        self.update(task)?;

        if let Some(object) = task.object() {
            record_state_transition(span, object, "owned", "unowned");
            debug!(object = object.0, owner = ?owner, "lease expired");
        }
        metrics::tasks_expired().add(1, &self.queue_attr());
        Ok(owner)
    }
}

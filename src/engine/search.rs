use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{Span, debug, info};

use super::Engine;
use crate::balancer::Counts;
use crate::error::{Error, Result};
use crate::matcher;
use crate::task::{Method, Task};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_object, record_state_transition};

impl Engine {
    /// Claim the next task for this worker.
    ///
    /// Broadcasts this worker has not seen yet come first. Otherwise the
    /// queue is cleaned up and, if this worker is below its fair share, the
    /// oldest unowned task addressed to it (or to anyone) is leased to it.
    /// Fails with [`Error::TaskNotFound`] when there is nothing to hand out.
    pub fn search(&self) -> Result<Task> {
        self.locked("search", |span| {
            let now = self.timer.now();
            let mut lis = self.list()?;

            if let Some(task) = self.broadcast(&lis, now)? {
                if let Some(object) = task.object() {
                    record_object(span, object);
                }
                self.claimed(&task);
                return Ok(task);
            }

            self.cleanup(&mut lis, span)?;

            let mut current = Counts::new();
            for t in &lis {
                *current.entry(t.worker().unwrap_or_default().to_string()).or_default() += 1;
            }
            let mut workers: Vec<String> = current
                .keys()
                .filter(|w| !w.is_empty())
                .cloned()
                .collect();
            workers.push(self.worker.clone());

            let desired = self.balancer.opt(&workers, lis.len()).unwrap_or_default();
            let want = desired.get(&self.worker).copied().unwrap_or(0);
            let have = current.get(&self.worker).copied().unwrap_or(0);
            if want <= have {
                debug!(want, have, "at fair share");
                return Err(Error::TaskNotFound);
            }

            let unowned = |method: Method| {
                lis.iter().position(|t| {
                    !t.is_owned()
                        && t.method() == method
                        && (method != Method::Uni
                            || t.node.as_ref().and_then(|n| n.worker.as_deref())
                                == Some(self.worker.as_str()))
                })
            };
            let Some(pick) = unowned(Method::Uni).or_else(|| unowned(Method::Any)) else {
                return Err(Error::TaskNotFound);
            };

            let mut task = lis.swap_remove(pick);
            let core = task.core.get_or_insert_default();
            core.worker = Some(self.worker.clone());
            core.expiry = Some(now + self.ttl);
            self.update(&task)?;

            if let Some(object) = task.object() {
                record_object(span, object);
                record_state_transition(span, object, "unowned", "owned");
            }
            self.claimed(&task);
            Ok(task)
        })
    }

    /// Hand out the oldest broadcast this worker is due to process.
    ///
    /// Deliveries are tracked locally only; the stored record stays
    /// unowned so every participant gets its own copy.
    fn broadcast(&self, lis: &[Task], now: DateTime<Utc>) -> Result<Option<Task>> {
        let mut local = self.local()?;
        local.sweep(lis.iter().filter_map(Task::object));

        for t in lis {
            if t.method() != Method::All || t.is_template() {
                continue;
            }
            let Some(object) = t.object() else { continue };

            match local.get(object) {
                Some(d) if d.done || d.expiry > now => continue,
                None if object < self.pointer => continue,
                _ => {}
            }

            let expiry = now + self.ttl;
            local.lease(object, expiry);

            let mut task = t.clone();
            let core = task.core.get_or_insert_default();
            core.worker = Some(self.worker.clone());
            core.expiry = Some(expiry);
            return Ok(Some(task));
        }
        Ok(None)
    }

    /// Drop everything search must not hand out from `lis`, and delete
    /// tasks made obsolete by a task named in their root.
    fn cleanup(&self, lis: &mut Vec<Task>, span: &Span) -> Result<()> {
        let mut i = 0;
        while i < lis.len() {
            let obsolete = lis[i].superseded_by().is_some_and(|root| {
                lis.iter().enumerate().any(|(j, other)| {
                    j != i && other.meta.as_ref().is_some_and(|m| matcher::has(m, root))
                })
            });
            if !obsolete {
                i += 1;
                continue;
            }

            let task = lis.remove(i);
            if let Some(object) = task.object() {
                self.remove(object)?;
                record_state_transition(span, object, "unowned", "obsolete");
                info!(object = object.0, "obsolete task removed");
            }
            metrics::tasks_obsolete().add(
                1,
                &[
                    KeyValue::new("queue", self.queue.clone()),
                    KeyValue::new("reason", "superseded"),
                ],
            );
        }

        lis.retain(|t| !t.is_tripped() && t.method() != Method::All && !t.is_template());
        Ok(())
    }

    fn claimed(&self, task: &Task) {
        metrics::tasks_claimed().add(
            1,
            &[
                KeyValue::new("queue", self.queue.clone()),
                KeyValue::new("method", task.method().to_string()),
            ],
        );
        debug!(object = ?task.object(), method = %task.method(), "task claimed");
    }
}

use opentelemetry::KeyValue;
use tracing::{Span, debug, info};

use super::Engine;
use crate::error::{Error, Result};
use crate::task::{Gate, Method, ObjectId, SyncState, Task};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_object, record_state_transition};

impl Engine {
    /// Acknowledge a finished task.
    ///
    /// `task` is the copy the caller was handed by [`Engine::search`]. If the
    /// lease it carries is no longer the stored one, the stored task's cycle
    /// count goes up and [`Error::TaskOutdated`] is returned. Deleting a
    /// trigger advances matching gate templates; deleting a cron child
    /// carries its sync state back to the template.
    pub fn delete(&self, task: &Task) -> Result<()> {
        let core = task
            .core
            .as_ref()
            .ok_or_else(|| Error::TaskCore("delete needs the task's core".into()))?;
        let object = core
            .object
            .ok_or_else(|| Error::TaskCore("delete needs an object id".into()))?;

        self.locked("delete", |span| {
            record_object(span, object);

            let Some(mut stored) = self.find(object)? else {
                return Err(self.outdated("delete", object, "task no longer exists"));
            };

            if stored.method() == Method::All && !core.bypass {
                if !self.local()?.finish(object) {
                    return Err(self.outdated("delete", object, "broadcast not delivered here"));
                }
                record_state_transition(span, object, "delivered", "done");
                return Ok(());
            }

            let current = stored.core.get_or_insert_default();
            if !core.same_lease(current) {
                current.cycles += 1;
                self.update(&stored)?;
                return Err(self.outdated("delete", object, "lease changed hands"));
            }

            if let Some(trigger) = stored.gate.as_ref().filter(|g| g.is_trigger()) {
                self.resolve(trigger, task.sync.as_ref(), span)?;
            }

            if let Some(template) = task.template()
                && let Some(sync) = task.sync.as_ref().filter(|s| !s.is_empty())
            {
                self.carry_sync(template, sync)?;
            }

            self.remove(object)?;
            record_state_transition(span, object, "owned", "deleted");
            metrics::tasks_deleted().add(1, &self.queue_attr());
            info!(object = object.0, "task deleted");
            Ok(())
        })
    }

    /// Flip the slots `trigger` addresses on every gate template and emit a
    /// task from each template left with nothing waiting.
    fn resolve(&self, trigger: &Gate, sync: Option<&SyncState>, span: &Span) -> Result<()> {
        let now = self.timer.now();
        for mut template in self.list()?.into_iter().filter(Task::is_gate_template) {
            let Some(gate) = template.gate.as_mut() else { continue };
            if !gate.resolve(trigger) {
                continue;
            }
            let open = !gate.is_waiting();

            if let Some(sync) = sync {
                template
                    .sync
                    .get_or_insert_default()
                    .extend(sync.iter().map(|(k, v)| (k.clone(), v.clone())));
            }

            if open {
                let object = self.next_object(now)?;
                if let Some(child) = template.emit(object) {
                    self.insert(&child)?;
                    record_state_transition(span, object, "gated", "unowned");
                    metrics::tasks_emitted().add(
                        1,
                        &[
                            KeyValue::new("queue", self.queue.clone()),
                            KeyValue::new("source", "gate"),
                        ],
                    );
                    info!(object = object.0, template = ?template.object(), "gate opened");
                }
                if let Some(gate) = template.gate.as_mut() {
                    gate.reset();
                }
            }
            self.update(&template)?;
        }
        Ok(())
    }

    /// Copy a finished cron child's sync state onto its template so the next
    /// emission resumes where this one stopped.
    fn carry_sync(&self, template: ObjectId, sync: &SyncState) -> Result<()> {
        let Some(mut stored) = self.find(template)? else {
            debug!(template = template.0, "template gone, sync dropped");
            return Ok(());
        };
        if !stored.is_cron_template() {
            return Ok(());
        }
        stored
            .sync
            .get_or_insert_default()
            .extend(sync.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.update(&stored)
    }

    pub(super) fn outdated(&self, operation: &'static str, object: ObjectId, why: &str) -> Error {
        metrics::tasks_outdated().add(
            1,
            &[
                KeyValue::new("queue", self.queue.clone()),
                KeyValue::new("operation", operation),
            ],
        );
        debug!(object = object.0, operation, why, "outdated");
        Error::TaskOutdated(format!("{operation} {object}: {why}"))
    }
}

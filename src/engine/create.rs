use tracing::info;

use super::Engine;
use crate::error::{Error, Result};
use crate::task::{self, Core, Method, Node, Task};
use crate::telemetry::metrics;
use crate::telemetry::task::record_object;
use crate::ticker::Interval;

impl Engine {
    /// Validate `task`, assign it a fresh object id and store it.
    ///
    /// Returns the task as stored, including the computed core and, for
    /// cron templates, the initial scheduling watermarks.
    pub fn create(&self, mut task: Task) -> Result<Task> {
        verify(&task)?;

        self.locked("create", |span| {
            let now = self.timer.now();
            let object = self.next_object(now)?;
            record_object(span, object);

            let cancel = task.core.as_ref().and_then(|c| c.cancel);
            task.core = Some(Core {
                cancel,
                ..Core::object(object)
            });
            if task.node.is_none() {
                task.node = Some(Node::any());
            }
            if let Some(cron) = task.cron.as_mut() {
                cron.schedule(now).map_err(Error::TaskCron)?;
            }

            self.insert(&task)?;

            metrics::tasks_created().add(1, &self.queue_attr());
            info!(
                object = object.0,
                method = %task.method(),
                template = task.is_template(),
                "task created"
            );
            Ok(task)
        })
    }
}

/// Reject anything a caller may not ask for.
fn verify(task: &Task) -> Result<()> {
    if task.is_empty() {
        return Err(Error::TaskEmpty);
    }

    if let Some(core) = &task.core
        && core.is_internal()
    {
        return Err(Error::TaskCore(
            "only the cancel threshold may be set on create".into(),
        ));
    }

    let Some(meta) = task.meta.as_ref().filter(|m| !m.is_empty()) else {
        return Err(Error::TaskMetaEmpty);
    };
    let caller_groups = [Some(meta.labels()), task.root.as_ref().map(|r| r.labels())];
    for labels in caller_groups.into_iter().flatten() {
        if let Some(k) = labels.keys().find(|k| task::is_reserved(k)) {
            return Err(Error::LabelReserved(k.clone()));
        }
    }

    if let Some(node) = &task.node
        && node.method == Method::Uni
        && node.worker.as_deref().is_none_or(str::is_empty)
    {
        return Err(Error::TaskNode("uni delivery needs a target worker".into()));
    }

    if let Some(gate) = &task.gate {
        if gate.is_empty() {
            return Err(Error::TaskGate("gate names no slots".into()));
        }
        if gate.is_trigger() && gate.triggers().count() != gate.len() {
            return Err(Error::TaskGate(
                "a trigger may not carry template slots".into(),
            ));
        }
    }

    if let Some(cron) = &task.cron {
        if !cron.is_template() {
            return Err(Error::TaskCron("no @every, @exact or @defer given".into()));
        }
        if task.gate.is_some() {
            return Err(Error::TaskCron("a cron template may not be gated".into()));
        }
        for spec in [&cron.every, &cron.defer].into_iter().flatten() {
            spec.parse::<Interval>().map_err(Error::TaskCron)?;
        }
        if cron.tick_m1.is_some() || cron.tick_p1.is_some() {
            return Err(Error::TaskCron("tick watermarks are engine-owned".into()));
        }
    }

    Ok(())
}

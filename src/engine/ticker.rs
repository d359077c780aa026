use std::collections::BTreeSet;

use chrono::TimeDelta;
use opentelemetry::KeyValue;
use tracing::{info, warn};

use super::Engine;
use crate::error::Result;
use crate::task::{Method, ObjectId, Task};
use crate::telemetry::metrics;
use crate::telemetry::task::record_state_transition;
use crate::ticker::Ticker;

impl Engine {
    /// Advance cron templates.
    ///
    /// First, `@every` templates whose current cycle moved on and that have
    /// no child in flight get their cycle start realigned. Then every due
    /// template emits a child unless one still exists. A broadcast child
    /// from the previous cycle is replaced. One-shot templates are removed
    /// after emitting; recurring ones are rescheduled to the next boundary.
    pub fn ticker(&self) -> Result<()> {
        self.locked("ticker", |span| {
            let now = self.timer.now();
            let lis = self.list()?;

            for template in lis.iter().filter(|t| t.is_cron_template()) {
                let Some(id) = template.object() else { continue };
                let Some(every) = template.cron.as_ref().and_then(|c| c.every.as_deref()) else {
                    continue;
                };
                let Some(m1) = Ticker::new(every, now).tick_m1() else {
                    warn!(object = id.0, every, "unparseable @every");
                    continue;
                };
                if template.cron.as_ref().and_then(|c| c.tick_m1) == Some(m1)
                    || children(&lis, id).next().is_some()
                {
                    continue;
                }
                let mut template = template.clone();
                if let Some(cron) = template.cron.as_mut() {
                    cron.tick_m1 = Some(m1);
                }
                self.update(&template)?;
            }

            // Re-read: phase one may have rewritten templates.
            let lis = self.list()?;
            let mut gone = BTreeSet::new();

            for template in lis.iter().filter(|t| t.is_cron_template()) {
                let Some(id) = template.object() else { continue };
                let Some(cron) = template.cron.as_ref().filter(|c| c.is_due(now)) else {
                    continue;
                };

                for child in children(&lis, id).filter(|c| c.method() == Method::All) {
                    if let Some(object) = child.object()
                        && gone.insert(object)
                    {
                        self.remove(object)?;
                        record_state_transition(span, object, "unowned", "superseded");
                    }
                }

                let pending = children(&lis, id)
                    .filter_map(Task::object)
                    .any(|o| !gone.contains(&o));
                if !pending {
                    let object = self.next_object(now)?;
                    if let Some(child) = template.emit(object) {
                        self.insert(&child)?;
                        record_state_transition(span, object, "scheduled", "unowned");
                        metrics::tasks_emitted().add(
                            1,
                            &[
                                KeyValue::new("queue", self.queue.clone()),
                                KeyValue::new("source", "cron"),
                            ],
                        );
                        info!(object = object.0, template = id.0, "cron emitted");
                    }
                }

                if cron.is_one_shot() {
                    self.remove(id)?;
                    info!(template = id.0, "one-shot template retired");
                    continue;
                }

                // Strictly after now, also when now sits on a boundary.
                let after = now + TimeDelta::nanoseconds(1);
                let next = cron.every.as_deref().and_then(|e| Ticker::new(e, after).tick_p1());
                let mut template = template.clone();
                if let Some(cron) = template.cron.as_mut() {
                    cron.tick_p1 = next;
                }
                self.update(&template)?;
            }
            Ok(())
        })
    }
}

/// Tasks emitted by `template` that still exist.
fn children(lis: &[Task], template: ObjectId) -> impl Iterator<Item = &Task> {
    lis.iter()
        .filter(move |t| !t.is_template() && t.template() == Some(template))
}

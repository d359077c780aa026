use tracing::debug;

use super::Engine;
use crate::error::{Error, Result};
use crate::task::{Method, Task};
use crate::telemetry::metrics;
use crate::telemetry::task::record_object;

impl Engine {
    /// Push the lease on `task` one ttl past now.
    ///
    /// Only the current owner may extend. A broadcast extends this worker's
    /// private delivery only.
    pub fn extend(&self, task: &Task) -> Result<()> {
        let core = task
            .core
            .as_ref()
            .ok_or_else(|| Error::TaskCore("extend needs the task's core".into()))?;
        let object = core
            .object
            .ok_or_else(|| Error::TaskCore("extend needs an object id".into()))?;

        self.locked("extend", |span| {
            record_object(span, object);
            let expiry = self.timer.now() + self.ttl;

            let Some(mut stored) = self.find(object)? else {
                return Err(self.outdated("extend", object, "task no longer exists"));
            };

            if stored.method() == Method::All && !core.bypass {
                if !self.local()?.extend(object, expiry) {
                    return Err(self.outdated("extend", object, "broadcast not delivered here"));
                }
            } else {
                let current = stored.core.get_or_insert_default();
                let mine = core.bypass || core.worker.as_deref() == Some(self.worker.as_str());
                if !mine || !core.same_lease(current) || current.worker.is_none() {
                    return Err(self.outdated("extend", object, "not the lease owner"));
                }
                current.expiry = Some(expiry);
                self.update(&stored)?;
            }

            metrics::tasks_extended().add(1, &self.queue_attr());
            debug!(object = object.0, %expiry, "lease extended");
            Ok(())
        })
    }
}

//! Task data model.
//!
//! A task is a bag of independent, optional label groups. Which groups are
//! present decides what a task is: a plain unit of work, a cron template,
//! a gate template, a trigger, or a broadcast. A missing group and an empty
//! group are different things and both survive encoding.

pub mod cron;
pub mod gate;
pub mod labels;
pub mod node;
pub mod owner;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::matcher::{self, Labels};

pub use self::cron::Cron;
pub use self::gate::{Gate, Slot};
pub use self::labels::{Meta, Root, SyncState};
pub use self::node::{Method, Node};
pub use self::owner::{Core, ObjectId};

/// Reserved label keys.
pub mod key {
    pub const OBJECT: &str = "task.rescue.io/object";
    pub const WORKER: &str = "task.rescue.io/worker";
    pub const EXPIRY: &str = "task.rescue.io/expiry";
    pub const CYCLES: &str = "task.rescue.io/cycles";
    pub const BYPASS: &str = "task.rescue.io/bypass";
    pub const CANCEL: &str = "task.rescue.io/cancel";

    pub const METHOD: &str = "addr.rescue.io/method";
    pub const NODE_WORKER: &str = "addr.rescue.io/worker";

    pub const EVERY: &str = "time.rescue.io/@every";
    pub const EXACT: &str = "time.rescue.io/@exact";
    pub const DEFER: &str = "time.rescue.io/@defer";
    pub const TICK_M1: &str = "time.rescue.io/tick-1";
    pub const TICK_P1: &str = "time.rescue.io/tick+1";

    pub const PAGING: &str = "sync.rescue.io/paging";

    /// Namespace suffix shared by every reserved key.
    pub const RESERVED: &str = ".rescue.io/";
}

pub fn is_reserved(label: &str) -> bool {
    label.contains(key::RESERVED)
}

pub(crate) fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_time(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core: Option<Core>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<Cron>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<Gate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Root>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncState>,
}

impl Task {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn core(mut self, core: Core) -> Self {
        self.core = Some(core);
        self
    }

    pub fn cron(mut self, cron: Cron) -> Self {
        self.cron = Some(cron);
        self
    }

    pub fn gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.node = Some(node);
        self
    }

    pub fn root(mut self, root: Root) -> Self {
        self.root = Some(root);
        self
    }

    pub fn sync(mut self, sync: SyncState) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Serialize into the record stored under the task's object id.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_none()
            && self.cron.is_none()
            && self.gate.is_none()
            && self.meta.is_none()
            && self.node.is_none()
            && self.root.is_none()
            && self.sync.is_none()
    }

    pub fn object(&self) -> Option<ObjectId> {
        self.core.as_ref().and_then(|c| c.object)
    }

    pub fn worker(&self) -> Option<&str> {
        self.core.as_ref().and_then(|c| c.worker.as_deref())
    }

    pub fn is_owned(&self) -> bool {
        self.core.as_ref().is_some_and(Core::is_owned)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.core.as_ref().is_some_and(|c| c.is_expired(now))
    }

    pub fn is_tripped(&self) -> bool {
        self.core.as_ref().is_some_and(Core::is_tripped)
    }

    pub fn is_bypass(&self) -> bool {
        self.core.as_ref().is_some_and(|c| c.bypass)
    }

    /// Delivery method, `any` when no node group is present.
    pub fn method(&self) -> Method {
        self.node.as_ref().map(|n| n.method).unwrap_or_default()
    }

    pub fn is_cron_template(&self) -> bool {
        self.cron.as_ref().is_some_and(Cron::is_template)
    }

    pub fn is_gate_template(&self) -> bool {
        self.gate.as_ref().is_some_and(Gate::is_template)
    }

    pub fn is_trigger(&self) -> bool {
        self.gate.as_ref().is_some_and(Gate::is_trigger)
    }

    /// Templates are never handed to workers.
    pub fn is_template(&self) -> bool {
        self.is_cron_template() || self.is_gate_template()
    }

    /// Template this task was emitted from.
    pub fn template(&self) -> Option<ObjectId> {
        self.root.as_ref().and_then(Root::object)
    }

    /// Caller metadata of a task that supersedes this one, if any.
    pub fn superseded_by(&self) -> Option<&Labels> {
        self.root
            .as_ref()
            .filter(|r| r.object().is_none() && !r.is_empty())
            .map(|r| r.labels())
    }

    /// Wildcard selection. Every group present in `selector` must be present
    /// here and contain the selector's labels; absent groups match anything.
    pub fn matches(&self, selector: &Task) -> bool {
        fn group<T: Clone + Into<Labels>>(have: &Option<T>, want: &Option<T>) -> bool {
            match (have, want) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(h), Some(w)) => matcher::has(&h.clone().into(), &w.clone().into()),
            }
        }

        fn plain(have: Option<&Labels>, want: Option<&Labels>) -> bool {
            match (have, want) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(h), Some(w)) => matcher::has(h, w),
            }
        }

        group(&self.core, &selector.core)
            && group(&self.cron, &selector.cron)
            && group(&self.node, &selector.node)
            && plain(
                self.gate.as_ref().map(Gate::labels).as_ref(),
                selector.gate.as_ref().map(Gate::labels).as_ref(),
            )
            && plain(
                self.meta.as_ref().map(|m| m.labels()),
                selector.meta.as_ref().map(|m| m.labels()),
            )
            && plain(
                self.root.as_ref().map(|r| r.labels()),
                selector.root.as_ref().map(|r| r.labels()),
            )
            && plain(
                self.sync.as_ref().map(|s| s.labels()),
                selector.sync.as_ref().map(|s| s.labels()),
            )
    }

    /// New task emitted by a template: metadata, state and routing are
    /// copied, the root links back to the template.
    pub(crate) fn emit(&self, object: ObjectId) -> Option<Task> {
        let template = self.object()?;
        Some(Task {
            core: Some(Core::object(object)),
            cron: None,
            gate: None,
            meta: self.meta.clone(),
            node: self.node.clone(),
            root: Some(Root::linked(template)),
            sync: self.sync.clone(),
        })
    }
}

//! Ownership group: identity, lease and retry accounting.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key;
use super::{format_time, parse_time};
use crate::matcher::Labels;

/// Identity of a task and its score in the shared store: the creation
/// timestamp in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub i64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ObjectId)
    }
}

/// Internal bookkeeping written by the engine. Callers may only set
/// `cancel` (and `bypass` on delete/extend).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Labels", try_from = "Labels")]
pub struct Core {
    pub object: Option<ObjectId>,
    /// Current lease holder. `None` means unowned.
    pub worker: Option<String>,
    /// Lease deadline.
    pub expiry: Option<DateTime<Utc>>,
    /// Lost leases and stale acknowledgements so far.
    pub cycles: u32,
    /// The caller claims authority over the task without owning it.
    pub bypass: bool,
    /// Circuit breaker: once `cycles >= cancel` the task is not scheduled.
    pub cancel: Option<u32>,
}

impl Core {
    pub fn object(object: ObjectId) -> Self {
        Self {
            object: Some(object),
            ..Self::default()
        }
    }

    /// Threshold-only core, the one form callers may pass to create.
    pub fn cancel(cancel: u32) -> Self {
        Self {
            cancel: Some(cancel),
            ..Self::default()
        }
    }

    pub fn is_owned(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|e| e <= now)
    }

    pub fn is_tripped(&self) -> bool {
        self.cancel.is_some_and(|c| self.cycles >= c)
    }

    /// Does this core carry anything only the engine may write?
    pub fn is_internal(&self) -> bool {
        self.object.is_some()
            || self.worker.is_some()
            || self.expiry.is_some()
            || self.cycles > 0
            || self.bypass
    }

    /// Strip the lease and count the loss.
    pub fn release(&mut self) {
        self.worker = None;
        self.expiry = None;
        self.cycles += 1;
    }

    /// Ownership equality between a caller's copy (`self`) and the stored
    /// copy. Cycles and the exact expiry are not compared; `bypass` skips
    /// the worker checks.
    pub fn same_lease(&self, stored: &Core) -> bool {
        if self.object.is_none() || self.object != stored.object {
            return false;
        }
        if self.bypass {
            return true;
        }
        self.worker.is_some() == stored.worker.is_some()
            && self.worker == stored.worker
            && self.expiry.is_some() == stored.expiry.is_some()
    }
}

impl From<Core> for Labels {
    fn from(c: Core) -> Self {
        let mut l = Labels::new();
        if let Some(object) = c.object {
            l.insert(key::OBJECT.into(), object.to_string());
        }
        if let Some(worker) = c.worker {
            l.insert(key::WORKER.into(), worker);
        }
        if let Some(expiry) = c.expiry {
            l.insert(key::EXPIRY.into(), format_time(expiry));
        }
        if c.cycles > 0 {
            l.insert(key::CYCLES.into(), c.cycles.to_string());
        }
        if c.bypass {
            l.insert(key::BYPASS.into(), "true".into());
        }
        if let Some(cancel) = c.cancel {
            l.insert(key::CANCEL.into(), cancel.to_string());
        }
        l
    }
}

impl TryFrom<Labels> for Core {
    type Error = String;

    fn try_from(l: Labels) -> Result<Self, Self::Error> {
        let mut c = Core::default();
        for (k, v) in l {
            match k.as_str() {
                key::OBJECT => {
                    c.object = Some(v.parse().map_err(|e| format!("{k}={v:?}: {e}"))?);
                }
                key::WORKER => c.worker = Some(v).filter(|w| !w.is_empty()),
                key::EXPIRY => c.expiry = Some(parse_time(&v).map_err(|e| format!("{k}: {e}"))?),
                key::CYCLES => c.cycles = v.parse().map_err(|e| format!("{k}={v:?}: {e}"))?,
                key::BYPASS => c.bypass = v == "true",
                key::CANCEL => {
                    c.cancel = Some(v.parse().map_err(|e| format!("{k}={v:?}: {e}"))?);
                }
                _ => return Err(format!("unknown core label: {k}")),
            }
        }
        Ok(c)
    }
}

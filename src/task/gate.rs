//! Dependency gates.
//!
//! A gate template holds named slots that start out `waiting`. Deleting a
//! trigger task addressing a slot flips it to `deleted`; once no slot is
//! waiting anymore the template emits a task and resets.

use std::collections::BTreeMap;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::matcher::Labels;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Waiting,
    Trigger,
    Deleted,
}

impl Slot {
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Waiting => "waiting",
            Slot::Trigger => "trigger",
            Slot::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gate(BTreeMap<String, Slot>);

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, slot: Slot) -> Self {
        self.0.insert(name.into(), slot);
        self
    }

    /// Template with every named slot waiting.
    pub fn waiting<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(|n| (n.into(), Slot::Waiting)).collect())
    }

    /// Trigger addressing every named slot.
    pub fn trigger<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(|n| (n.into(), Slot::Trigger)).collect())
    }

    pub fn is_trigger(&self) -> bool {
        self.0.values().any(|s| *s == Slot::Trigger)
    }

    pub fn is_template(&self) -> bool {
        !self.0.is_empty() && !self.is_trigger()
    }

    pub fn is_waiting(&self) -> bool {
        self.0.values().any(|s| *s == Slot::Waiting)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, s)| **s == Slot::Trigger)
            .map(|(k, _)| k.as_str())
    }

    /// Flip waiting slots named by `trigger` to deleted. Returns whether any
    /// slot of this gate was addressed at all.
    pub(crate) fn resolve(&mut self, trigger: &Gate) -> bool {
        let mut hit = false;
        for name in trigger.triggers() {
            if let Some(slot) = self.0.get_mut(name) {
                hit = true;
                if *slot == Slot::Waiting {
                    *slot = Slot::Deleted;
                }
            }
        }
        hit
    }

    pub(crate) fn reset(&mut self) {
        for slot in self.0.values_mut() {
            *slot = Slot::Waiting;
        }
    }

    pub fn labels(&self) -> Labels {
        self.0
            .iter()
            .map(|(k, s)| (k.clone(), s.as_str().to_string()))
            .collect()
    }
}

impl Deref for Gate {
    type Target = BTreeMap<String, Slot>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

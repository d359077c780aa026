//! Per-engine record of broadcast deliveries.
//!
//! Broadcast tasks are never written to by workers. Each engine keeps its
//! own view of which broadcasts it has been handed, whether it finished
//! them and when its private lease runs out.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::task::ObjectId;

/// Entries kept before the oldest finished ones are dropped.
const CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub done: bool,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub(crate) struct Local {
    seen: BTreeMap<ObjectId, Delivery>,
}

impl Local {
    pub fn get(&self, object: ObjectId) -> Option<Delivery> {
        self.seen.get(&object).copied()
    }

    pub fn lease(&mut self, object: ObjectId, expiry: DateTime<Utc>) {
        self.seen.insert(
            object,
            Delivery {
                done: false,
                expiry,
            },
        );
        self.shrink();
    }

    /// Push an open delivery's deadline. False if there is none.
    pub fn extend(&mut self, object: ObjectId, expiry: DateTime<Utc>) -> bool {
        match self.seen.get_mut(&object) {
            Some(d) if !d.done => {
                d.expiry = expiry;
                true
            }
            _ => false,
        }
    }

    /// Mark an open delivery finished. False if there is none.
    pub fn finish(&mut self, object: ObjectId) -> bool {
        match self.seen.get_mut(&object) {
            Some(d) if !d.done => {
                d.done = true;
                true
            }
            _ => false,
        }
    }

    /// Forget deliveries whose task no longer exists.
    pub fn sweep(&mut self, live: impl IntoIterator<Item = ObjectId>) {
        let live: BTreeSet<ObjectId> = live.into_iter().collect();
        self.seen.retain(|object, _| live.contains(object));
    }

    fn shrink(&mut self) {
        while self.seen.len() > CAPACITY {
            let victim = self
                .seen
                .iter()
                .find(|(_, d)| d.done)
                .or_else(|| self.seen.iter().next())
                .map(|(object, _)| *object);
            match victim {
                Some(object) => {
                    self.seen.remove(&object);
                }
                None => break,
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }
}

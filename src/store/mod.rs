//! Storage collaborators.
//!
//! The engine needs two things from its backend: an ordered set of records
//! keyed by an integer score, and one process-wide mutual-exclusion lock.
//! Every queue-visible state transition happens while the lock is held.

pub mod memory;
pub mod sqlite;

use crate::error::Result;

pub use memory::Memory;
pub use sqlite::Storage;

/// Ordered set of string values keyed by a unique score.
pub trait Sorted: Send + Sync {
    /// Insert `value` under `score`. Fails if the score is already taken.
    fn insert(&self, score: i64, value: &str) -> Result<()>;

    /// Replace the value stored under `score`. Returns `false` if absent.
    fn update(&self, score: i64, value: &str) -> Result<bool>;

    /// Remove the value stored under `score`. Returns `false` if absent.
    fn delete(&self, score: i64) -> Result<bool>;

    /// All `(score, value)` pairs with `min <= score <= max`, ascending.
    fn search(&self, min: i64, max: i64) -> Result<Vec<(i64, String)>>;

    fn score(&self, score: i64) -> Result<Option<String>> {
        Ok(self.search(score, score)?.into_iter().next().map(|(_, v)| v))
    }
}

/// Global named lock.
pub trait Locker: Send + Sync {
    /// Block until the lock is held by the caller.
    fn acquire(&self) -> Result<()>;

    fn release(&self) -> Result<()>;
}

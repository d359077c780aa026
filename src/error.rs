//! Error types for rescue.
//!
//! `TaskNotFound` and `TaskOutdated` are ordinary control flow for workers:
//! nothing to claim right now, or the lease held by the caller is stale.
//! Everything else is misuse or a system-level failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("task must not be empty")]
    TaskEmpty,

    #[error("task meta must not be empty")]
    TaskMetaEmpty,

    #[error("task core invalid: {0}")]
    TaskCore(String),

    #[error("label reserved: {0}")]
    LabelReserved(String),

    #[error("task cron invalid: {0}")]
    TaskCron(String),

    #[error("task gate invalid: {0}")]
    TaskGate(String),

    #[error("task node invalid: {0}")]
    TaskNode(String),

    #[error("task not found")]
    TaskNotFound,

    #[error("task outdated: {0}")]
    TaskOutdated(String),

    #[error("task not revoked: {0}")]
    TaskNotRevoked(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// No eligible task could be claimed. Retry later.
    pub fn is_task_not_found(&self) -> bool {
        matches!(self, Error::TaskNotFound)
    }

    /// The caller's copy of the task no longer reflects the stored lease.
    pub fn is_task_outdated(&self) -> bool {
        matches!(self, Error::TaskOutdated(_))
    }

    /// Fairness correction stayed incomplete because no over-allocated
    /// worker had an expired lease to give back.
    pub fn is_task_not_revoked(&self) -> bool {
        matches!(self, Error::TaskNotRevoked(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_their_own_kind_only() {
        assert!(Error::TaskNotFound.is_task_not_found());
        assert!(!Error::TaskNotFound.is_task_not_revoked());

        let outdated = Error::TaskOutdated("lease".into());
        assert!(outdated.is_task_outdated());
        assert!(!outdated.is_task_not_found());

        let revoked = Error::TaskNotRevoked("a".into());
        assert!(revoked.is_task_not_revoked());
        assert!(!revoked.is_task_not_found());
    }
}

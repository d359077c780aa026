use super::Engine;
use crate::error::{Error, Result};
use crate::task::Task;

impl Engine {
    /// Every stored task matching `selector`, in object order.
    ///
    /// Each label group present in the selector must be present on the task
    /// and contain the selector's labels; `*` matches any key or value.
    pub fn lister(&self, selector: &Task) -> Result<Vec<Task>> {
        if selector.is_empty() {
            return Err(Error::TaskEmpty);
        }
        self.locked("lister", |_| {
            Ok(self
                .list()?
                .into_iter()
                .filter(|t| t.matches(selector))
                .collect())
        })
    }

    /// Whether any stored task matches `selector`.
    pub fn exists(&self, selector: &Task) -> Result<bool> {
        if selector.is_empty() {
            return Err(Error::TaskEmpty);
        }
        self.locked("exists", |_| {
            Ok(self.list()?.iter().any(|t| t.matches(selector)))
        })
    }
}

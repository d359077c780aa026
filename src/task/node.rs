//! Delivery routing group.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::key;
use crate::matcher::Labels;

/// Who may process a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Any single worker.
    #[default]
    Any,
    /// Only the named worker.
    Uni,
    /// Every participating worker, once each.
    All,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Any => "any",
            Method::Uni => "uni",
            Method::All => "all",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(Method::Any),
            "uni" => Ok(Method::Uni),
            "all" => Ok(Method::All),
            _ => Err(format!("unknown delivery method: {s:?}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Labels", try_from = "Labels")]
pub struct Node {
    pub method: Method,
    /// Target worker for [`Method::Uni`].
    pub worker: Option<String>,
}

impl Node {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn uni(worker: impl Into<String>) -> Self {
        Self {
            method: Method::Uni,
            worker: Some(worker.into()),
        }
    }

    pub fn all() -> Self {
        Self {
            method: Method::All,
            worker: None,
        }
    }
}

impl From<Node> for Labels {
    fn from(n: Node) -> Self {
        let mut l = Labels::new();
        l.insert(key::METHOD.into(), n.method.to_string());
        if let Some(worker) = n.worker {
            l.insert(key::NODE_WORKER.into(), worker);
        }
        l
    }
}

impl TryFrom<Labels> for Node {
    type Error = String;

    fn try_from(l: Labels) -> Result<Self, Self::Error> {
        let mut n = Node::default();
        for (k, v) in l {
            match k.as_str() {
                key::METHOD => n.method = v.parse()?,
                key::NODE_WORKER => n.worker = Some(v).filter(|w| !w.is_empty()),
                _ => return Err(format!("unknown node label: {k}")),
            }
        }
        Ok(n)
    }
}

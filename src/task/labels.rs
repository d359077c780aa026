//! Free-form label groups: caller metadata, root references and carry-over
//! state.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use super::key;
use super::owner::ObjectId;
use crate::matcher::Labels;

macro_rules! label_group {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Labels);

        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
                self.0.insert(key.into(), value.into());
                self
            }

            pub fn labels(&self) -> &Labels {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = Labels;

            fn deref(&self) -> &Labels {
                &self.0
            }
        }

        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Labels {
                &mut self.0
            }
        }

        impl From<Labels> for $name {
            fn from(l: Labels) -> Self {
                Self(l)
            }
        }

        impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for $name {
            fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
                Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
            }
        }
    };
}

label_group! {
    /// Caller-defined metadata. Required on create; the reserved
    /// `*.rescue.io/` namespace is off limits.
    Meta
}

label_group! {
    /// Either a link to the template a task was emitted from, or caller
    /// metadata naming a superseding task whose existence makes this one
    /// obsolete.
    Root
}

label_group! {
    /// Carry-over state, e.g. a pagination cursor, copied back onto the
    /// originating template when the task is deleted.
    SyncState
}

impl Root {
    /// Reference to the template `object`.
    pub fn linked(object: ObjectId) -> Self {
        Self::new().with(key::OBJECT, object.to_string())
    }

    /// Template this task was emitted from, if it is a reference.
    pub fn object(&self) -> Option<ObjectId> {
        self.0.get(key::OBJECT).and_then(|v| v.parse().ok())
    }
}

impl SyncState {
    pub fn paging(cursor: impl Into<String>) -> Self {
        Self::new().with(key::PAGING, cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_reference_round_trips_object() {
        let r = Root::linked(ObjectId(42));
        assert_eq!(r.object(), Some(ObjectId(42)));
        assert_eq!(Root::new().with("test.api.io/key", "foo").object(), None);
    }

    #[test]
    fn groups_serialize_as_flat_maps() {
        let m: Meta = [("test.api.io/key", "foo")].into_iter().collect();
        assert_eq!(serde_json::to_string(&m).unwrap(), r#"{"test.api.io/key":"foo"}"#);
    }
}

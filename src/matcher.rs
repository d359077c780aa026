//! Wildcard label-set matching.
//!
//! A selector is itself a label set. `*` in a selector key matches any key,
//! `*` in a selector value matches any value, so `{"*": "*"}` selects every
//! non-empty label set.

use std::collections::BTreeMap;

/// String-keyed, string-valued label set. Ordered so that serialized
/// records and log output are stable.
pub type Labels = BTreeMap<String, String>;

pub const WILDCARD: &str = "*";

/// Does `labels` contain every pair of `selector`?
///
/// An empty selector is contained in everything.
pub fn has(labels: &Labels, selector: &Labels) -> bool {
    selector.iter().all(|(sk, sv)| {
        labels
            .iter()
            .any(|(lk, lv)| matches(sk, lk) && matches(sv, lv))
    })
}

/// Does `labels` satisfy every one of `selectors`?
pub fn all<'a>(labels: &Labels, selectors: impl IntoIterator<Item = &'a Labels>) -> bool {
    selectors.into_iter().all(|s| has(labels, s))
}

/// Does `labels` satisfy at least one of `selectors`?
pub fn any<'a>(labels: &Labels, selectors: impl IntoIterator<Item = &'a Labels>) -> bool {
    selectors.into_iter().any(|s| has(labels, s))
}

fn matches(pattern: &str, value: &str) -> bool {
    pattern == WILDCARD || pattern == value
}

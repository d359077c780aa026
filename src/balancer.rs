//! Fair distribution of tasks across workers.
//!
//! `opt` answers how many tasks each worker should own; `dev` answers how
//! far the fleet has drifted from that and how much of the drift to correct
//! in one step.

use std::collections::{BTreeMap, BTreeSet};

/// Per-worker task counts.
pub type Counts = BTreeMap<String, usize>;

pub trait Balancer: Send + Sync {
    /// Fair target distribution of `tasks` across `workers`.
    ///
    /// Returns `None` when there are no workers.
    fn opt(&self, workers: &[String], tasks: usize) -> Option<Counts>;

    /// Damped correction for workers owning more than their share.
    ///
    /// Returns `None` when the drift is too small to be worth correcting.
    fn dev(&self, current: &Counts, desired: &Counts) -> Option<Counts>;
}

/// Round-robin fair shares with damped, thresholded corrections.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fairness;

impl Balancer for Fairness {
    fn opt(&self, workers: &[String], tasks: usize) -> Option<Counts> {
        let workers: BTreeSet<&String> = workers.iter().collect();
        if workers.is_empty() {
            return None;
        }

        // One task at a time in sorted order, so earlier names win ties.
        let base = tasks / workers.len();
        let rest = tasks % workers.len();

        Some(
            workers
                .into_iter()
                .enumerate()
                .map(|(i, w)| (w.clone(), base + usize::from(i < rest)))
                .collect(),
        )
    }

    fn dev(&self, current: &Counts, desired: &Counts) -> Option<Counts> {
        let raw: Counts = current
            .iter()
            .filter_map(|(w, &cur)| {
                let des = desired.get(w).copied().unwrap_or(0);
                let d = (cur as i64 - des as i64) * 2;
                (d > 0).then(|| (w.clone(), d as usize))
            })
            .collect();

        if raw.is_empty() {
            return None;
        }

        let total = current.values().sum::<usize>() as f64;
        let sum = raw.values().sum::<usize>() as f64;
        let max = raw.values().copied().max().unwrap_or(0) as f64;

        let significant = (total > 5.0 && sum >= 0.20 * total)
            || (total > 50.0 && sum >= 0.10 * total)
            || (total > 50.0 && max >= 0.10 * total);
        if !significant {
            return None;
        }

        Some(raw.into_iter().map(|(w, d)| (w, damp(d))).collect())
    }
}

/// Halve a deviation, then halve large ones again so the fleet converges
/// over several rounds instead of swinging in one.
fn damp(d: usize) -> usize {
    let r = d as f64 * 0.5;
    if r < 2.0 { 1 } else { r.floor() as usize / 2 }
}

//! Scheduling group. A task carrying `@every`, `@exact` or `@defer` is a
//! template: the ticker emits children from it, workers never claim it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key;
use super::{format_time, parse_time};
use crate::matcher::Labels;
use crate::ticker::{Interval, Ticker};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Labels", try_from = "Labels")]
pub struct Cron {
    /// Recurring interval, e.g. `"6 hours"`.
    pub every: Option<String>,
    /// Emit once at this instant.
    pub exact: Option<DateTime<Utc>>,
    /// Emit once, this long after creation, e.g. `"30 minutes"`.
    pub defer: Option<String>,
    /// Start of the scheduling cycle currently open.
    pub tick_m1: Option<DateTime<Utc>>,
    /// Next emission.
    pub tick_p1: Option<DateTime<Utc>>,
}

impl Cron {
    pub fn every(spec: impl Into<String>) -> Self {
        Self {
            every: Some(spec.into()),
            ..Self::default()
        }
    }

    pub fn exact(at: DateTime<Utc>) -> Self {
        Self {
            exact: Some(at),
            ..Self::default()
        }
    }

    pub fn defer(spec: impl Into<String>) -> Self {
        Self {
            defer: Some(spec.into()),
            ..Self::default()
        }
    }

    pub fn is_template(&self) -> bool {
        self.every.is_some() || self.exact.is_some() || self.defer.is_some()
    }

    /// `@exact` and `@defer` templates emit a single child.
    pub fn is_one_shot(&self) -> bool {
        self.every.is_none() && (self.exact.is_some() || self.defer.is_some())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.tick_p1.is_some_and(|t| t <= now)
    }

    /// Check the directives and compute the initial watermarks for a
    /// template created at `now`.
    pub(crate) fn schedule(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if let Some(every) = &self.every {
            let interval: Interval = every.parse()?;
            let t = Ticker::from_interval(interval, now);
            self.tick_m1 = t.tick_m1();
            self.tick_p1 = t.tick_p1();
        }
        if let Some(defer) = &self.defer {
            let interval: Interval = defer.parse()?;
            let at = interval
                .after(now)
                .ok_or_else(|| format!("@defer out of range: {defer:?}"))?;
            self.tick_p1 = Some(at);
        }
        if let Some(exact) = self.exact {
            self.tick_p1 = Some(exact);
        }
        if [self.every.is_some(), self.exact.is_some(), self.defer.is_some()]
            .iter()
            .filter(|b| **b)
            .count()
            > 1
        {
            return Err("@every, @exact and @defer are mutually exclusive".into());
        }
        Ok(())
    }
}

impl From<Cron> for Labels {
    fn from(c: Cron) -> Self {
        let mut l = Labels::new();
        if let Some(every) = c.every {
            l.insert(key::EVERY.into(), every);
        }
        if let Some(exact) = c.exact {
            l.insert(key::EXACT.into(), format_time(exact));
        }
        if let Some(defer) = c.defer {
            l.insert(key::DEFER.into(), defer);
        }
        if let Some(t) = c.tick_m1 {
            l.insert(key::TICK_M1.into(), format_time(t));
        }
        if let Some(t) = c.tick_p1 {
            l.insert(key::TICK_P1.into(), format_time(t));
        }
        l
    }
}

impl TryFrom<Labels> for Cron {
    type Error = String;

    fn try_from(l: Labels) -> Result<Self, Self::Error> {
        let mut c = Cron::default();
        for (k, v) in l {
            match k.as_str() {
                key::EVERY => c.every = Some(v),
                key::EXACT => c.exact = Some(parse_time(&v).map_err(|e| format!("{k}: {e}"))?),
                key::DEFER => c.defer = Some(v),
                key::TICK_M1 => c.tick_m1 = Some(parse_time(&v).map_err(|e| format!("{k}: {e}"))?),
                key::TICK_P1 => c.tick_p1 = Some(parse_time(&v).map_err(|e| format!("{k}: {e}"))?),
                _ => return Err(format!("unknown cron label: {k}")),
            }
        }
        Ok(c)
    }
}

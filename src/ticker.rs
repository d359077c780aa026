//! Interval arithmetic for cron-like scheduling.
//!
//! An interval is written `[quantity] unit`, e.g. `"hour"`, `"6 hours"`,
//! `"week"`. Boundaries are anchored: minutes count from the top of the
//! hour, hours from midnight, days from the unix epoch, weeks from the first
//! unix Monday (1970-01-05) and months from the start of the year.
//!
//! Boundaries are half-open on the right. A reference instant that lands
//! exactly on a boundary belongs to the previous interval, so `tick_m1`
//! returns the boundary before it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeDelta, Timelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Unit {
    fn as_str(self) -> &'static str {
        match self {
            Unit::Minute => "minute",
            Unit::Hour => "hour",
            Unit::Day => "day",
            Unit::Week => "week",
            Unit::Month => "month",
        }
    }
}

/// A parsed `[quantity] unit` specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub quantity: u32,
    pub unit: Unit,
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let (quantity, unit) = match parts.as_slice() {
            [unit] => (1, *unit),
            [quantity, unit] => {
                let quantity: u32 = quantity
                    .parse()
                    .map_err(|_| format!("quantity must be a positive integer: {s:?}"))?;
                (quantity, *unit)
            }
            _ => return Err(format!("expected \"[quantity] unit\": {s:?}")),
        };

        if quantity == 0 {
            return Err(format!("quantity must be a positive integer: {s:?}"));
        }

        let (base, plural) = match unit.strip_suffix('s') {
            Some(base) => (base, true),
            None => (unit, false),
        };
        if plural != (quantity > 1) {
            return Err(format!("unit does not agree with quantity: {s:?}"));
        }

        let unit = match base {
            "minute" => Unit::Minute,
            "hour" => Unit::Hour,
            "day" => Unit::Day,
            "week" => Unit::Week,
            "month" => Unit::Month,
            _ => return Err(format!("unsupported unit: {s:?}")),
        };

        Ok(Self { quantity, unit })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quantity == 1 {
            write!(f, "{}", self.unit.as_str())
        } else {
            write!(f, "{} {}s", self.quantity, self.unit.as_str())
        }
    }
}

impl Interval {
    /// `t` moved forward by one interval. Months are calendar months.
    pub fn after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.unit {
            Unit::Month => t.checked_add_months(Months::new(self.quantity)),
            _ => t.checked_add_signed(self.step()?),
        }
    }

    /// Boundary at or before `t`.
    fn floor(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.unit {
            Unit::Minute => {
                let anchor = t
                    .date_naive()
                    .and_hms_opt(t.hour(), 0, 0)?
                    .and_utc();
                floor_from(anchor, self.step()?, t)
            }
            Unit::Hour => {
                let anchor = t.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
                floor_from(anchor, self.step()?, t)
            }
            Unit::Day => floor_from(DateTime::UNIX_EPOCH, self.step()?, t),
            Unit::Week => {
                // 1970-01-01 was a Thursday.
                let anchor = DateTime::UNIX_EPOCH + TimeDelta::days(4);
                floor_from(anchor, self.step()?, t)
            }
            Unit::Month => {
                let month0 = t.month0() / self.quantity * self.quantity;
                Some(
                    NaiveDate::from_ymd_opt(t.year(), month0 + 1, 1)?
                        .and_hms_opt(0, 0, 0)?
                        .and_utc(),
                )
            }
        }
    }

    fn step(&self) -> Option<TimeDelta> {
        let q = i64::from(self.quantity);
        match self.unit {
            Unit::Minute => TimeDelta::try_minutes(q),
            Unit::Hour => TimeDelta::try_hours(q),
            Unit::Day => TimeDelta::try_days(q),
            Unit::Week => TimeDelta::try_weeks(q),
            Unit::Month => None,
        }
    }
}

fn floor_from(anchor: DateTime<Utc>, step: TimeDelta, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let offset = (t - anchor).num_nanoseconds()?;
    let step = step.num_nanoseconds()?;
    let k = offset.div_euclid(step);
    anchor.checked_add_signed(TimeDelta::nanoseconds(k.checked_mul(step)?))
}

/// Most recent and next boundary of an interval around a reference instant.
///
/// Malformed specifications leave both ticks unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    m1: Option<DateTime<Utc>>,
    p1: Option<DateTime<Utc>>,
}

impl Ticker {
    pub fn new(spec: &str, now: DateTime<Utc>) -> Self {
        match spec.parse::<Interval>() {
            Ok(interval) => Self::from_interval(interval, now),
            Err(_) => Self { m1: None, p1: None },
        }
    }

    pub fn from_interval(interval: Interval, now: DateTime<Utc>) -> Self {
        let m1 = interval.floor(now).and_then(|b| {
            if b == now {
                interval.floor(now - TimeDelta::nanoseconds(1))
            } else {
                Some(b)
            }
        });
        let p1 = m1.and_then(|m1| interval.after(m1));
        Self { m1, p1 }
    }

    /// Boundary strictly before the reference instant.
    pub fn tick_m1(&self) -> Option<DateTime<Utc>> {
        self.m1
    }

    /// One interval after [`Ticker::tick_m1`].
    pub fn tick_p1(&self) -> Option<DateTime<Utc>> {
        self.p1
    }
}

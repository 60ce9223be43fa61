//! Recurrence expansion for repeating appointments.
//!
//! A [`RecurrencePattern`] steps from an anchor date by whole days, weeks or
//! months. Expansion is lazy ([`Occurrences`] is an iterator) and bounded by
//! an explicit horizon cap. It ends at the pattern's own end or at the cap,
//! whichever comes first.
//!
//! Counting follows RFC 5545: `COUNT` counts generated dates before
//! exception dates are removed, and monthly patterns anchored on a day a
//! month lacks (the 31st, say) skip that month entirely.
//!
//! # Example
//!
//! ```
//! use booking_engine::recurrence::{expand, Frequency, RecurrencePattern, SeriesAnchor};
//! use chrono::{Duration, NaiveDate};
//!
//! let pattern = RecurrencePattern::new(Frequency::Weekly, 1).with_count(3);
//! let anchor = SeriesAnchor {
//!     start_local: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(9, 0, 0).unwrap(),
//!     duration: Duration::minutes(30),
//!     timezone: chrono_tz::UTC,
//! };
//! let dates: Vec<_> = expand(&pattern, &anchor, 52)
//!     .unwrap()
//!     .map(|o| o.unwrap().date.to_string())
//!     .collect();
//! assert_eq!(dates, ["2026-03-02", "2026-03-09", "2026-03-16"]);
//! ```

use std::collections::BTreeSet;

use chrono::{Datelike, Days, Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};
use crate::interval::TimeInterval;
use crate::model::{RecurrenceId, ResourceId, ServiceId};
use crate::temporal::{resolve_local_start, DstAdjustment};

/// RRULE keys a pattern can represent. `WKST` is accepted and ignored
/// because it only matters for BYDAY/BYWEEKNO expansion.
const SUPPORTED_RRULE_KEYS: &[&str] = &["FREQ", "INTERVAL", "COUNT", "UNTIL", "WKST"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

/// When a series stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceEnd {
    /// After this many generated dates, exceptions included.
    Count(u32),
    /// On or before this local date.
    Until(NaiveDate),
    #[default]
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub end: RecurrenceEnd,
    /// Local dates removed from the series (cancelled or detached instances).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exception_dates: BTreeSet<NaiveDate>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrencePattern {
    /// An open-ended pattern.
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
            end: RecurrenceEnd::Open,
            exception_dates: BTreeSet::new(),
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.end = RecurrenceEnd::Count(count);
        self
    }

    pub fn with_until(mut self, until: NaiveDate) -> Self {
        self.end = RecurrenceEnd::Until(until);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(BookingError::InvalidInput(
                "recurrence interval must be at least 1".into(),
            ));
        }
        if self.end == RecurrenceEnd::Count(0) {
            return Err(BookingError::InvalidInput(
                "recurrence count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.end == RecurrenceEnd::Open
    }

    /// Remove a single occurrence. Returns `false` if it was already excluded.
    pub fn exclude(&mut self, date: NaiveDate) -> bool {
        self.exception_dates.insert(date)
    }

    /// End the series the day before `date`, dropping `date` and everything
    /// after it. An earlier existing end is kept.
    pub fn truncate_before(&mut self, date: NaiveDate) -> Result<()> {
        let last = date.pred_opt().ok_or_else(|| {
            BookingError::InvalidInput(format!("no day before {date}"))
        })?;
        if let RecurrenceEnd::Until(until) = self.end {
            if until <= last {
                return Ok(());
            }
        }
        self.end = RecurrenceEnd::Until(last);
        Ok(())
    }

    /// Iterate the generated dates starting at `anchor`, exceptions included.
    pub fn candidate_dates(&self, anchor: NaiveDate) -> CandidateDates {
        CandidateDates {
            anchor,
            frequency: self.frequency,
            interval: self.interval.max(1),
            end: self.end,
            step: 0,
            generated: 0,
            finished: false,
        }
    }

    /// Parse an RFC 5545 `RRULE` value such as `FREQ=WEEKLY;INTERVAL=2;COUNT=10`.
    ///
    /// Only `FREQ` (daily, weekly, monthly), `INTERVAL`, `COUNT` and `UNTIL`
    /// are representable; any `BY*` part is rejected rather than silently
    /// dropped.
    pub fn from_rrule(value: &str) -> Result<Self> {
        let value = value.trim();
        let value = value.strip_prefix("RRULE:").unwrap_or(value);

        for part in value.split(';').filter(|p| !p.is_empty()) {
            let key = part.split('=').next().unwrap_or_default().to_ascii_uppercase();
            if !SUPPORTED_RRULE_KEYS.contains(&key.as_str()) {
                return Err(BookingError::InvalidInput(format!(
                    "unsupported RRULE part '{part}'"
                )));
            }
        }

        let parsed: rrule::RRule<rrule::Unvalidated> = value
            .parse()
            .map_err(|e| BookingError::InvalidInput(format!("RRULE '{value}': {e}")))?;

        let frequency = match parsed.get_freq() {
            rrule::Frequency::Daily => Frequency::Daily,
            rrule::Frequency::Weekly => Frequency::Weekly,
            rrule::Frequency::Monthly => Frequency::Monthly,
            other => {
                return Err(BookingError::InvalidInput(format!(
                    "unsupported RRULE frequency {other:?}"
                )))
            }
        };

        let end = match (parsed.get_count(), parsed.get_until()) {
            (Some(_), Some(_)) => {
                return Err(BookingError::InvalidInput(
                    "RRULE cannot carry both COUNT and UNTIL".into(),
                ))
            }
            (Some(count), None) => RecurrenceEnd::Count(count),
            (None, Some(until)) => RecurrenceEnd::Until(until.date_naive()),
            (None, None) => RecurrenceEnd::Open,
        };

        let pattern = Self {
            frequency,
            interval: u32::from(parsed.get_interval()),
            end,
            exception_dates: BTreeSet::new(),
        };
        pattern.validate()?;
        Ok(pattern)
    }

    /// Render as an RFC 5545 `RRULE` value. Exception dates belong in
    /// `EXDATE` and are not included.
    pub fn to_rrule(&self) -> String {
        let freq = match self.frequency {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        };
        let mut out = format!("FREQ={freq}");
        if self.interval != 1 {
            out.push_str(&format!(";INTERVAL={}", self.interval));
        }
        match self.end {
            RecurrenceEnd::Count(n) => out.push_str(&format!(";COUNT={n}")),
            RecurrenceEnd::Until(date) => {
                out.push_str(&format!(";UNTIL={}T235959Z", date.format("%Y%m%d")))
            }
            RecurrenceEnd::Open => {}
        }
        out
    }
}

/// Dates a pattern generates, in order, before exceptions are applied.
#[derive(Debug, Clone)]
pub struct CandidateDates {
    anchor: NaiveDate,
    frequency: Frequency,
    interval: u32,
    end: RecurrenceEnd,
    step: u64,
    generated: u32,
    finished: bool,
}

enum Step {
    Date(NaiveDate),
    /// A month without the anchor's day.
    Skip,
    /// Past the end of the representable calendar.
    Exhausted,
}

impl CandidateDates {
    fn date_at(&self, k: u64) -> Step {
        let stride = k * u64::from(self.interval);
        let date = match self.frequency {
            Frequency::Daily => self.anchor.checked_add_days(Days::new(stride)),
            Frequency::Weekly => self.anchor.checked_add_days(Days::new(stride * 7)),
            Frequency::Monthly => {
                let base = i64::from(self.anchor.year()) * 12 + i64::from(self.anchor.month0());
                let total = base + stride as i64;
                let Ok(year) = i32::try_from(total.div_euclid(12)) else {
                    return Step::Exhausted;
                };
                if year > NaiveDate::MAX.year() {
                    return Step::Exhausted;
                }
                let month = total.rem_euclid(12) as u32 + 1;
                return match NaiveDate::from_ymd_opt(year, month, self.anchor.day()) {
                    Some(date) => Step::Date(date),
                    None => Step::Skip,
                };
            }
        };
        date.map_or(Step::Exhausted, Step::Date)
    }
}

impl Iterator for CandidateDates {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        while !self.finished {
            if let RecurrenceEnd::Count(n) = self.end {
                if self.generated >= n {
                    self.finished = true;
                    break;
                }
            }
            let k = self.step;
            self.step += 1;
            let date = match self.date_at(k) {
                Step::Date(date) => date,
                Step::Skip => continue,
                Step::Exhausted => {
                    self.finished = true;
                    break;
                }
            };
            if let RecurrenceEnd::Until(until) = self.end {
                if date > until {
                    self.finished = true;
                    break;
                }
            }
            self.generated += 1;
            return Some(date);
        }
        None
    }
}

/// Local start and length shared by every occurrence of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesAnchor {
    pub start_local: NaiveDateTime,
    /// Absolute length; an occurrence spanning a DST change keeps it.
    pub duration: Duration,
    pub timezone: Tz,
}

/// One expanded instance of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    /// Local date the occurrence was generated for.
    pub date: NaiveDate,
    pub interval: TimeInterval,
    pub dst_adjustment: DstAdjustment,
}

/// Lazy occurrence iterator returned by [`expand`].
#[derive(Debug, Clone)]
pub struct Occurrences {
    dates: CandidateDates,
    anchor: SeriesAnchor,
    exceptions: BTreeSet<NaiveDate>,
    remaining: usize,
}

impl Iterator for Occurrences {
    type Item = Result<Occurrence>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let date = self.dates.by_ref().find(|d| !self.exceptions.contains(d))?;
        self.remaining -= 1;
        Some(occurrence_on(&self.anchor, date))
    }
}

fn occurrence_on(anchor: &SeriesAnchor, date: NaiveDate) -> Result<Occurrence> {
    let local = date.and_time(anchor.start_local.time());
    let resolved = resolve_local_start(&anchor.timezone, local)?;
    Ok(Occurrence {
        date,
        interval: TimeInterval::starting_at(resolved.instant, anchor.duration)?,
        dst_adjustment: resolved.adjustment,
    })
}

/// Expand a pattern into at most `horizon_cap` occurrences.
///
/// Expansion stops at the pattern's `Count` or `Until`, or after
/// `horizon_cap` occurrences, whichever comes first.
pub fn expand(
    pattern: &RecurrencePattern,
    anchor: &SeriesAnchor,
    horizon_cap: usize,
) -> Result<Occurrences> {
    pattern.validate()?;
    if horizon_cap == 0 {
        return Err(BookingError::InvalidInput(
            "horizon cap must be at least 1".into(),
        ));
    }

    Ok(Occurrences {
        dates: pattern.candidate_dates(anchor.start_local.date()),
        anchor: *anchor,
        exceptions: pattern.exception_dates.clone(),
        remaining: horizon_cap,
    })
}

/// A persisted recurring booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringSeries {
    pub id: RecurrenceId,
    pub resource_ids: BTreeSet<ResourceId>,
    pub service_id: ServiceId,
    /// Local start of the first occurrence.
    pub anchor_local: NaiveDateTime,
    pub timezone: Tz,
    pub duration_minutes: u32,
    pub pattern: RecurrencePattern,
}

impl RecurringSeries {
    pub fn anchor(&self) -> SeriesAnchor {
        SeriesAnchor {
            start_local: self.anchor_local,
            duration: Duration::minutes(i64::from(self.duration_minutes)),
            timezone: self.timezone,
        }
    }

    pub fn expand(&self, horizon_cap: usize) -> Result<Occurrences> {
        expand(&self.pattern, &self.anchor(), horizon_cap)
    }
}

//! Plain data records the scheduler operates on.
//!
//! Nothing here knows about storage or locking. Records are validated by
//! their constructors or by an explicit `validate()` (for values arriving
//! through deserialization), and the scheduling modules take them by
//! reference.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BookingError, Result};
use crate::interval::TimeInterval;
use crate::temporal::local_day_start;

// ── Identifiers ─────────────────────────────────────────────────────────────

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// A fresh random (v4) identifier.
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = BookingError;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| BookingError::InvalidInput(format!("id '{}': {}", s, e)))
            }
        }
    };
}

string_id!(
    /// Identity of a bookable resource. Ordering is used for tie-breaks.
    ResourceId
);
string_id!(ServiceId);
uuid_id!(AppointmentId);
uuid_id!(
    /// Identity of a recurring series shared by all of its instances.
    RecurrenceId
);

// ── Resource ────────────────────────────────────────────────────────────────

/// What kind of thing a resource is. Only rooms and equipment may be shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    Staff { display_name: String },
    Room { seats: u32 },
    Equipment { label: String },
}

impl ResourceKind {
    pub fn is_shareable(&self) -> bool {
        !matches!(self, ResourceKind::Staff { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// IANA timezone the resource's working hours and holidays are written in.
    pub timezone: Tz,
    /// Concurrent scheduled appointments the resource can hold (≥ 1).
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_capacity() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

impl Resource {
    /// An active resource with capacity 1.
    pub fn new(id: impl Into<String>, kind: ResourceKind, timezone: Tz) -> Self {
        Self {
            id: ResourceId::new(id),
            kind,
            timezone,
            capacity: 1,
            active: true,
        }
    }

    /// Set the capacity, rejecting values a resource of this kind cannot hold.
    pub fn with_capacity(mut self, capacity: u32) -> Result<Self> {
        self.capacity = capacity;
        self.validate()?;
        Ok(self)
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(BookingError::InvalidInput(format!(
                "resource {} must have capacity of at least 1",
                self.id
            )));
        }
        if self.capacity > 1 && !self.kind.is_shareable() {
            return Err(BookingError::InvalidInput(format!(
                "resource {} is not shareable and cannot have capacity {}",
                self.id, self.capacity
            )));
        }
        Ok(())
    }
}

// ── Working hours ───────────────────────────────────────────────────────────

/// Which local day a working-hours rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleDay {
    /// Every week on this weekday.
    Weekday(Weekday),
    /// Only on this date. Any date rule for a day replaces that day's weekday rules.
    Date(NaiveDate),
}

/// A working window in the resource's local time.
///
/// `end <= start` means the window runs past midnight into the next day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHoursRule {
    pub resource_id: ResourceId,
    pub day: RuleDay,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_WEEK: i64 = 7 * SECONDS_PER_DAY;

impl WorkingHoursRule {
    pub fn weekly(
        resource_id: impl Into<String>,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Self> {
        let rule = Self {
            resource_id: ResourceId::new(resource_id),
            day: RuleDay::Weekday(weekday),
            start,
            end,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn on_date(
        resource_id: impl Into<String>,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Self> {
        let rule = Self {
            resource_id: ResourceId::new(resource_id),
            day: RuleDay::Date(date),
            start,
            end,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start == self.end {
            return Err(BookingError::InvalidInput(format!(
                "working hours for {} start and end at {}",
                self.resource_id, self.start
            )));
        }
        Ok(())
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end <= self.start
    }

    /// Length of the window in seconds, counting the overnight part.
    pub fn span_seconds(&self) -> i64 {
        let start = self.start.num_seconds_from_midnight() as i64;
        let end = self.end.num_seconds_from_midnight() as i64;
        if end > start {
            end - start
        } else {
            end + SECONDS_PER_DAY - start
        }
    }

    /// Whether the rule produces a window beginning on `date`.
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        match self.day {
            RuleDay::Weekday(weekday) => date.weekday() == weekday,
            RuleDay::Date(d) => d == date,
        }
    }
}

/// Check that no two rules of the same resource overlap.
///
/// Weekly rules are compared on a circular week, so a Sunday night shift
/// running into Monday collides with an early Monday shift. Date rules are
/// compared with each other only; they override weekly rules rather than
/// add to them.
pub fn validate_working_hours(rules: &[WorkingHoursRule]) -> Result<()> {
    let mut weekly: BTreeMap<&ResourceId, Vec<(i64, i64, &WorkingHoursRule)>> = BTreeMap::new();
    let mut dated: BTreeMap<&ResourceId, Vec<(i64, i64, &WorkingHoursRule)>> = BTreeMap::new();

    for rule in rules {
        rule.validate()?;
        let start = rule.start.num_seconds_from_midnight() as i64;
        match rule.day {
            RuleDay::Weekday(weekday) => {
                let offset = weekday.num_days_from_monday() as i64 * SECONDS_PER_DAY + start;
                weekly
                    .entry(&rule.resource_id)
                    .or_default()
                    .push((offset, offset + rule.span_seconds(), rule));
            }
            RuleDay::Date(date) => {
                let offset = date.num_days_from_ce() as i64 * SECONDS_PER_DAY + start;
                dated
                    .entry(&rule.resource_id)
                    .or_default()
                    .push((offset, offset + rule.span_seconds(), rule));
            }
        }
    }

    for spans in weekly.values() {
        check_pairwise(spans, &[-SECONDS_PER_WEEK, 0, SECONDS_PER_WEEK])?;
    }
    for spans in dated.values() {
        check_pairwise(spans, &[0])?;
    }
    Ok(())
}

fn check_pairwise(
    spans: &[(i64, i64, &WorkingHoursRule)],
    shifts: &[i64],
) -> Result<()> {
    for (i, (a_start, a_end, a)) in spans.iter().enumerate() {
        for (b_start, b_end, b) in &spans[i + 1..] {
            let collides = shifts
                .iter()
                .any(|shift| *a_start < b_end + shift && b_start + shift < *a_end);
            if collides {
                return Err(BookingError::InvalidInput(format!(
                    "working hours for {} overlap: {:?} {}-{} and {:?} {}-{}",
                    a.resource_id, a.day, a.start, a.end, b.day, b.start, b.end
                )));
            }
        }
    }
    Ok(())
}

// ── Holidays ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolidayScope {
    Global,
    Resource(ResourceId),
}

/// Whole local days on which a resource (or every resource) is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub scope: HolidayScope,
    pub first_day: NaiveDate,
    /// Inclusive.
    pub last_day: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Holiday {
    pub fn single(scope: HolidayScope, date: NaiveDate) -> Self {
        Self {
            scope,
            first_day: date,
            last_day: date,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_day > self.last_day {
            return Err(BookingError::InvalidInput(format!(
                "holiday runs backwards: {} to {}",
                self.first_day, self.last_day
            )));
        }
        Ok(())
    }

    pub fn applies_to(&self, resource_id: &ResourceId) -> bool {
        match &self.scope {
            HolidayScope::Global => true,
            HolidayScope::Resource(id) => id == resource_id,
        }
    }

    /// The holiday as an interval from local midnight to local midnight.
    pub fn window(&self, tz: &Tz) -> Result<TimeInterval> {
        let day_after = self.last_day.succ_opt().ok_or_else(|| {
            BookingError::InvalidInput(format!("no day after {}", self.last_day))
        })?;
        TimeInterval::new(
            local_day_start(tz, self.first_day)?,
            local_day_start(tz, day_after)?,
        )
    }
}

// ── Service ─────────────────────────────────────────────────────────────────

/// What is being booked: a fixed duration plus preparation and cleanup buffers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    #[serde(default)]
    pub name: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub buffer_before_minutes: u32,
    #[serde(default)]
    pub buffer_after_minutes: u32,
}

impl Service {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        duration_minutes: u32,
    ) -> Result<Self> {
        let service = Self {
            id: ServiceId::new(id),
            name: name.into(),
            duration_minutes,
            buffer_before_minutes: 0,
            buffer_after_minutes: 0,
        };
        service.validate()?;
        Ok(service)
    }

    pub fn with_buffers(mut self, before_minutes: u32, after_minutes: u32) -> Self {
        self.buffer_before_minutes = before_minutes;
        self.buffer_after_minutes = after_minutes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.duration_minutes == 0 {
            return Err(BookingError::InvalidInput(format!(
                "service {} must have a positive duration",
                self.id
            )));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes as i64)
    }

    pub fn buffer_before(&self) -> Duration {
        Duration::minutes(self.buffer_before_minutes as i64)
    }

    pub fn buffer_after(&self) -> Duration {
        Duration::minutes(self.buffer_after_minutes as i64)
    }

    /// The appointment itself, `[start, start + duration)`.
    pub fn appointment_interval(&self, start: DateTime<Utc>) -> Result<TimeInterval> {
        TimeInterval::starting_at(start, self.duration())
    }

    /// Everything the appointment blocks, buffers included:
    /// `[start - before, start + duration + after)`.
    pub fn footprint(&self, start: DateTime<Utc>) -> Result<TimeInterval> {
        Ok(self
            .appointment_interval(start)?
            .widen(self.buffer_before(), self.buffer_after()))
    }
}

// ── Appointment ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Scheduled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub resource_ids: BTreeSet<ResourceId>,
    pub service_id: ServiceId,
    /// The service time, without buffers.
    pub interval: TimeInterval,
    pub status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_id: Option<RecurrenceId>,
    /// Local date of the series occurrence this appointment was generated for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_date: Option<NaiveDate>,
    #[serde(default)]
    pub buffer_before_minutes: u32,
    #[serde(default)]
    pub buffer_after_minutes: u32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Appointment {
    /// A scheduled appointment. Buffers are copied from the service so the
    /// blocked span stays fixed if the service is edited later.
    pub fn new(
        resource_ids: impl IntoIterator<Item = ResourceId>,
        service: &Service,
        interval: TimeInterval,
    ) -> Self {
        Self {
            id: AppointmentId::new(),
            resource_ids: resource_ids.into_iter().collect(),
            service_id: service.id.clone(),
            interval,
            status: AppointmentStatus::Scheduled,
            recurrence_id: None,
            occurrence_date: None,
            buffer_before_minutes: service.buffer_before_minutes,
            buffer_after_minutes: service.buffer_after_minutes,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }

    pub fn uses(&self, resource_id: &ResourceId) -> bool {
        self.resource_ids.contains(resource_id)
    }

    /// The interval widened by the appointment's own buffers.
    pub fn occupied(&self) -> TimeInterval {
        self.interval.widen(
            Duration::minutes(self.buffer_before_minutes as i64),
            Duration::minutes(self.buffer_after_minutes as i64),
        )
    }

    /// Move to `next`, enforcing `scheduled → cancelled | completed`.
    pub fn transition(&mut self, next: AppointmentStatus) -> Result<()> {
        if self.status.is_terminal() || next == AppointmentStatus::Scheduled {
            return Err(BookingError::InvalidTransition(format!(
                "appointment {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Drop the link to the recurring series this appointment came from.
    pub fn detach(&mut self) {
        self.recurrence_id = None;
        self.occurrence_date = None;
    }
}

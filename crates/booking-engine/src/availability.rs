//! Per-resource availability calendar.
//!
//! An [`AvailabilityCalendar`] owns everything that shapes one resource's
//! time: its working-hours rules, the holidays that apply to it, and its
//! scheduled appointments. [`AvailabilityCalendar::free_intervals`] turns
//! them into a clean timeline:
//!
//! ```text
//! working windows  ─ holidays ─ saturated appointment spans ─▶ free
//! ```
//!
//! The calendar only knows about the buffers of appointments that already
//! exist (they are part of what those appointments occupy). The buffers of
//! the service being searched for are applied by the slot generator.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::conflict::saturated_spans;
use crate::error::{BookingError, Result};
use crate::interval::{clip, merge, subtract_all, TimeInterval};
use crate::model::{Appointment, Holiday, Resource, RuleDay, WorkingHoursRule};
use crate::temporal::{resolve_local_end, resolve_local_start};

#[derive(Debug, Clone)]
pub struct AvailabilityCalendar {
    resource: Resource,
    rules: Vec<WorkingHoursRule>,
    holidays: Vec<Holiday>,
    appointments: Vec<Appointment>,
}

impl AvailabilityCalendar {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            rules: Vec::new(),
            holidays: Vec::new(),
            appointments: Vec::new(),
        }
    }

    /// Add working-hours rules. Rules belonging to other resources are dropped.
    pub fn with_working_hours<I>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = WorkingHoursRule>,
    {
        let id = self.resource.id.clone();
        self.rules
            .extend(rules.into_iter().filter(|r| r.resource_id == id));
        self
    }

    /// Add holidays. Holidays scoped to other resources are dropped.
    pub fn with_holidays<I>(mut self, holidays: I) -> Self
    where
        I: IntoIterator<Item = Holiday>,
    {
        let id = self.resource.id.clone();
        self.holidays
            .extend(holidays.into_iter().filter(|h| h.applies_to(&id)));
        self
    }

    /// Add appointments. Only scheduled ones on this resource are kept.
    pub fn with_appointments<I>(mut self, appointments: I) -> Self
    where
        I: IntoIterator<Item = Appointment>,
    {
        let id = self.resource.id.clone();
        self.appointments.extend(
            appointments
                .into_iter()
                .filter(|a| a.is_scheduled() && a.uses(&id)),
        );
        self
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn appointments(&self) -> &[Appointment] {
        &self.appointments
    }

    /// Working windows inside `range`, as a merged UTC timeline.
    ///
    /// For every local date touching the range (plus the day before, whose
    /// overnight rules can spill into it) the applicable rules are resolved
    /// through the resource timezone. Date rules replace weekday rules for
    /// their date. Every window is cut at local midnight before the union,
    /// so a rule running past midnight counts once on each side of it.
    pub fn working_windows(&self, range: &TimeInterval) -> Result<Vec<TimeInterval>> {
        let tz = self.resource.timezone;
        let first = local_date(range.start(), &tz)
            .pred_opt()
            .ok_or_else(|| BookingError::InvalidInterval("range starts too early".into()))?;
        let last = local_date(range.end(), &tz);

        let mut windows = Vec::new();
        let mut date = first;
        while date <= last {
            for rule in self.rules_for(date) {
                let end_date = if rule.crosses_midnight() {
                    date.succ_opt().ok_or_else(|| {
                        BookingError::InvalidInterval(format!("no day after {date}"))
                    })?
                } else {
                    date
                };
                let start = resolve_local_start(&tz, date.and_time(rule.start))?.instant;
                let end = resolve_local_end(&tz, end_date.and_time(rule.end))?.instant;
                // A window that sits entirely inside a DST gap collapses.
                if let Ok(window) = TimeInterval::new(start, end) {
                    windows.extend(window.split_at_local_midnights(&tz)?);
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        Ok(clip(&merge(windows), range))
    }

    /// Working windows minus holidays: where a booking may be placed at all,
    /// ignoring existing appointments.
    pub fn open_intervals(&self, range: &TimeInterval) -> Result<Vec<TimeInterval>> {
        if !self.resource.active {
            return Ok(Vec::new());
        }
        let working = self.working_windows(range)?;
        let closed = self.holiday_windows()?;
        Ok(subtract_all(&working, &closed))
    }

    /// Free time inside `range`: ordered, disjoint, clipped to the range.
    ///
    /// Pure in its inputs; two calls on the same calendar return the same
    /// timeline. An inactive resource has no free time.
    pub fn free_intervals(&self, range: &TimeInterval) -> Result<Vec<TimeInterval>> {
        let open = self.open_intervals(range)?;
        if open.is_empty() {
            return Ok(open);
        }
        let busy = self.saturated();
        let free = subtract_all(&open, &busy);
        debug!(
            resource = %self.resource.id,
            open = open.len(),
            busy = busy.len(),
            free = free.len(),
            "computed free intervals"
        );
        Ok(free)
    }

    /// Spans in which the resource is already at capacity.
    pub fn saturated(&self) -> Vec<TimeInterval> {
        let occupied: Vec<TimeInterval> = self.appointments.iter().map(|a| a.occupied()).collect();
        saturated_spans(&occupied, self.resource.capacity)
    }

    fn holiday_windows(&self) -> Result<Vec<TimeInterval>> {
        self.holidays
            .iter()
            .map(|h| h.window(&self.resource.timezone))
            .collect()
    }

    fn rules_for(&self, date: NaiveDate) -> Vec<&WorkingHoursRule> {
        let dated: Vec<&WorkingHoursRule> = self
            .rules
            .iter()
            .filter(|r| r.day == RuleDay::Date(date))
            .collect();
        if !dated.is_empty() {
            return dated;
        }
        self.rules
            .iter()
            .filter(|r| matches!(r.day, RuleDay::Weekday(_)) && r.applies_on(date))
            .collect()
    }
}

fn local_date(instant: DateTime<Utc>, tz: &chrono_tz::Tz) -> NaiveDate {
    instant.with_timezone(tz).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HolidayScope, ResourceId, ResourceKind, Service};
    use chrono::{NaiveTime, TimeZone, Weekday};
    use chrono_tz::Tz;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        // March 2026: the 2nd is a Monday.
        Utc.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap()
    }

    fn iv(a: DateTime<Utc>, b: DateTime<Utc>) -> TimeInterval {
        TimeInterval::new(a, b).unwrap()
    }

    fn staff(tz: Tz) -> Resource {
        Resource::new(
            "r1",
            ResourceKind::Staff {
                display_name: "R".into(),
            },
            tz,
        )
    }

    fn monday_nine_to_five() -> WorkingHoursRule {
        WorkingHoursRule::weekly("r1", Weekday::Mon, t(9, 0), t(17, 0)).unwrap()
    }

    fn whole_monday() -> TimeInterval {
        iv(utc(2, 0, 0), utc(3, 0, 0))
    }

    #[test]
    fn test_working_hours_only() {
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC))
            .with_working_hours([monday_nine_to_five()]);
        let free = cal.free_intervals(&whole_monday()).unwrap();
        assert_eq!(free, vec![iv(utc(2, 9, 0), utc(2, 17, 0))]);
    }

    #[test]
    fn test_appointment_is_subtracted() {
        let service = Service::new("s", "s", 60).unwrap();
        let appt = Appointment::new(
            [ResourceId::new("r1")],
            &service,
            iv(utc(2, 10, 0), utc(2, 11, 0)),
        );
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC))
            .with_working_hours([monday_nine_to_five()])
            .with_appointments([appt]);
        let free = cal.free_intervals(&whole_monday()).unwrap();
        assert_eq!(
            free,
            vec![
                iv(utc(2, 9, 0), utc(2, 10, 0)),
                iv(utc(2, 11, 0), utc(2, 17, 0))
            ]
        );
    }

    #[test]
    fn test_holiday_removes_day() {
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC))
            .with_working_hours([monday_nine_to_five()])
            .with_holidays([Holiday::single(
                HolidayScope::Global,
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            )]);
        assert!(cal.free_intervals(&whole_monday()).unwrap().is_empty());
    }

    #[test]
    fn test_other_resources_holiday_is_ignored() {
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC))
            .with_working_hours([monday_nine_to_five()])
            .with_holidays([Holiday::single(
                HolidayScope::Resource(ResourceId::new("r2")),
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            )]);
        assert_eq!(cal.free_intervals(&whole_monday()).unwrap().len(), 1);
    }

    #[test]
    fn test_result_is_clipped_to_range() {
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC))
            .with_working_hours([monday_nine_to_five()]);
        let free = cal
            .free_intervals(&iv(utc(2, 12, 0), utc(2, 13, 30)))
            .unwrap();
        assert_eq!(free, vec![iv(utc(2, 12, 0), utc(2, 13, 30))]);
    }

    #[test]
    fn test_overnight_rule_spans_midnight_once() {
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC)).with_working_hours([
            WorkingHoursRule::weekly("r1", Weekday::Mon, t(22, 0), t(2, 0)).unwrap(),
        ]);
        let free = cal
            .free_intervals(&iv(utc(2, 0, 0), utc(4, 0, 0)))
            .unwrap();
        assert_eq!(free, vec![iv(utc(2, 22, 0), utc(3, 2, 0))]);
    }

    #[test]
    fn test_overnight_rule_spill_visible_from_next_day_query() {
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC)).with_working_hours([
            WorkingHoursRule::weekly("r1", Weekday::Mon, t(22, 0), t(2, 0)).unwrap(),
        ]);
        // Query Tuesday only: the 00:00-02:00 tail of Monday's shift shows up.
        let free = cal
            .free_intervals(&iv(utc(3, 0, 0), utc(4, 0, 0)))
            .unwrap();
        assert_eq!(free, vec![iv(utc(3, 0, 0), utc(3, 2, 0))]);
    }

    #[test]
    fn test_holiday_cuts_overnight_rule_at_midnight() {
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC))
            .with_working_hours([
                WorkingHoursRule::weekly("r1", Weekday::Mon, t(22, 0), t(2, 0)).unwrap(),
            ])
            .with_holidays([Holiday::single(
                HolidayScope::Global,
                NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
            )]);
        let free = cal
            .free_intervals(&iv(utc(2, 0, 0), utc(4, 0, 0)))
            .unwrap();
        assert_eq!(free, vec![iv(utc(2, 22, 0), utc(3, 0, 0))]);
    }

    #[test]
    fn test_date_rule_overrides_weekday_rule() {
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC)).with_working_hours([
            monday_nine_to_five(),
            WorkingHoursRule::on_date(
                "r1",
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                t(9, 0),
                t(12, 0),
            )
            .unwrap(),
        ]);
        let free = cal.free_intervals(&whole_monday()).unwrap();
        assert_eq!(free, vec![iv(utc(2, 9, 0), utc(2, 12, 0))]);
    }

    #[test]
    fn test_local_timezone_is_respected() {
        // 09:00-17:00 in New York during EST is 14:00-22:00 UTC.
        let tz: Tz = "America/New_York".parse().unwrap();
        let cal = AvailabilityCalendar::new(staff(tz)).with_working_hours([monday_nine_to_five()]);
        let free = cal
            .free_intervals(&iv(utc(2, 0, 0), utc(3, 12, 0)))
            .unwrap();
        assert_eq!(free, vec![iv(utc(2, 14, 0), utc(2, 22, 0))]);
    }

    #[test]
    fn test_inactive_resource_has_no_free_time() {
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC).deactivated())
            .with_working_hours([monday_nine_to_five()]);
        assert!(cal.free_intervals(&whole_monday()).unwrap().is_empty());
    }

    #[test]
    fn test_free_intervals_is_idempotent() {
        let service = Service::new("s", "s", 45).unwrap().with_buffers(5, 10);
        let cal = AvailabilityCalendar::new(staff(chrono_tz::UTC))
            .with_working_hours([monday_nine_to_five()])
            .with_appointments([Appointment::new(
                [ResourceId::new("r1")],
                &service,
                iv(utc(2, 13, 0), utc(2, 13, 45)),
            )]);
        let first = cal.free_intervals(&whole_monday()).unwrap();
        let second = cal.free_intervals(&whole_monday()).unwrap();
        assert_eq!(first, second);
    }
}

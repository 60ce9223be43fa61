//! The write path: serialized booking against a [`ScheduleStore`].
//!
//! Reads ([`SchedulingCoordinator::find_slots`]) take no lock and are
//! advisory; the slots they return may be gone by the time a client picks
//! one. Every write locks each resource it touches (in ascending id order),
//! reloads what it needs from the store, re-validates and only then writes.
//! A commit that lost a race therefore fails with
//! [`BookingError::Conflict`] instead of double-booking.
//!
//! Lock acquisition is bounded by [`EngineConfig::lock_timeout`]. When the
//! deadline passes the operation fails with
//! [`BookingError::ConcurrencyTimeout`] and holds nothing.
//!
//! Observers are notified after the locks are released.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::availability::AvailabilityCalendar;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::conflict::check_conflict;
use crate::error::{BookingError, Result};
use crate::interval::TimeInterval;
use crate::model::{
    Appointment, AppointmentId, AppointmentStatus, RecurrenceId, Resource, ResourceId, ServiceId,
};
use crate::observer::{BookingEvent, BookingObserver, ObserverList};
use crate::recurrence::{Occurrence, RecurrencePattern, RecurringSeries};
use crate::slots::{candidate_slots, rank_slots, RankedSlot};
use crate::store::ScheduleStore;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One mutex per resource, created on first use.
#[derive(Debug, Default)]
struct ResourceLocks {
    registry: Mutex<HashMap<ResourceId, Arc<Mutex<()>>>>,
}

impl ResourceLocks {
    /// Run `f` while holding the lock of every id in `ids`.
    ///
    /// Locks are taken in the set's (ascending) order against one shared
    /// deadline. On timeout the locks already taken are released.
    fn with_locks<T>(
        &self,
        ids: &BTreeSet<ResourceId>,
        timeout: std::time::Duration,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let mutexes: Vec<(&ResourceId, Arc<Mutex<()>>)> = {
            let mut registry = self.registry.lock();
            ids.iter()
                .map(|id| (id, Arc::clone(registry.entry(id.clone()).or_default())))
                .collect()
        };

        let deadline = Instant::now() + timeout;
        let mut guards = Vec::with_capacity(mutexes.len());
        for (id, mutex) in &mutexes {
            match mutex.try_lock_until(deadline) {
                Some(guard) => guards.push(guard),
                None => {
                    warn!(resource = %id, timeout_ms = timeout.as_millis() as u64, "lock wait timed out");
                    return Err(BookingError::ConcurrencyTimeout(format!(
                        "resource {id} is busy"
                    )));
                }
            }
        }
        f()
    }
}

/// A committed series and the appointments generated for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommittedSeries {
    pub series: RecurringSeries,
    pub appointments: Vec<Appointment>,
}

/// Entry point for searching and booking.
pub struct SchedulingCoordinator {
    store: Arc<dyn ScheduleStore>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    locks: ResourceLocks,
    observers: ObserverList,
}

impl std::fmt::Debug for SchedulingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingCoordinator")
            .field("config", &self.config)
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

impl SchedulingCoordinator {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            clock,
            locks: ResourceLocks::default(),
            observers: ObserverList::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register_observer(&self, observer: Arc<dyn BookingObserver>) {
        self.observers.register(observer);
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// The calendar of one resource with everything that can affect `range`.
    pub fn calendar(
        &self,
        resource_id: &ResourceId,
        range: &TimeInterval,
    ) -> Result<AvailabilityCalendar> {
        let resource = self.store.load_resource(resource_id)?;
        self.calendar_for(resource, range)
    }

    fn calendar_for(
        &self,
        resource: Resource,
        range: &TimeInterval,
    ) -> Result<AvailabilityCalendar> {
        let id = resource.id.clone();
        Ok(AvailabilityCalendar::new(resource)
            .with_working_hours(self.store.load_working_hours(&id)?)
            .with_holidays(self.store.load_holidays(&id)?)
            .with_appointments(self.store.load_scheduled_appointments(&id, range)?))
    }

    pub fn free_intervals(
        &self,
        resource_id: &ResourceId,
        range: &TimeInterval,
    ) -> Result<Vec<TimeInterval>> {
        self.check_query_range(range)?;
        self.calendar(resource_id, range)?.free_intervals(range)
    }

    /// Bookable slots for `service_id` on any of `candidates`, best first.
    pub fn find_slots(
        &self,
        service_id: &ServiceId,
        candidates: &[ResourceId],
        range: &TimeInterval,
    ) -> Result<Vec<RankedSlot>> {
        self.find_slots_with_granularity(
            service_id,
            candidates,
            range,
            self.config.granularity_minutes,
        )
    }

    /// [`find_slots`](Self::find_slots) with an explicit step between starts.
    ///
    /// Unknown and inactive resources are skipped. Slots starting before now
    /// or past the booking horizon are dropped.
    pub fn find_slots_with_granularity(
        &self,
        service_id: &ServiceId,
        candidates: &[ResourceId],
        range: &TimeInterval,
        granularity_minutes: u32,
    ) -> Result<Vec<RankedSlot>> {
        self.check_query_range(range)?;
        let service = self.store.load_service(service_id)?;
        let now = self.clock.now();
        let horizon = self.horizon_end(now);

        let mut per_resource = Vec::new();
        for resource_id in candidates.iter().collect::<BTreeSet<_>>() {
            let resource = match self.store.load_resource(resource_id) {
                Ok(resource) => resource,
                Err(BookingError::NotFound(_)) => {
                    warn!(resource = %resource_id, "skipping unknown resource");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if !resource.active {
                debug!(resource = %resource_id, "skipping inactive resource");
                continue;
            }
            let tz = resource.timezone;
            let free = self.calendar_for(resource, range)?.free_intervals(range)?;
            let slots: Vec<TimeInterval> = candidate_slots(&free, &service, granularity_minutes)?
                .filter(|slot| slot.start() >= now)
                .filter(|slot| horizon.is_none_or(|h| slot.start() <= h))
                .collect();
            debug!(resource = %resource_id, slots = slots.len(), "generated slots");
            per_resource.push((resource_id.clone(), tz, slots));
        }
        Ok(rank_slots(per_resource))
    }

    pub fn appointment(&self, id: AppointmentId) -> Result<Appointment> {
        self.store.load_appointment(id)
    }

    pub fn series(&self, id: RecurrenceId) -> Result<RecurringSeries> {
        self.store.load_series(id)
    }

    /// Remaining occurrences of a series: cancelled and detached dates are
    /// left out.
    pub fn expand_series(
        &self,
        id: RecurrenceId,
        horizon_cap: usize,
    ) -> Result<Vec<Occurrence>> {
        self.store.load_series(id)?.expand(horizon_cap)?.collect()
    }

    // ── Single appointments ─────────────────────────────────────────────────

    pub fn commit(
        &self,
        resource_id: &ResourceId,
        interval: TimeInterval,
        service_id: &ServiceId,
        metadata: Metadata,
    ) -> Result<Appointment> {
        self.commit_group(std::slice::from_ref(resource_id), interval, service_id, metadata)
    }

    /// Book one appointment that needs every resource in `resource_ids`
    /// (a clinician and a room, say).
    pub fn commit_group(
        &self,
        resource_ids: &[ResourceId],
        interval: TimeInterval,
        service_id: &ServiceId,
        metadata: Metadata,
    ) -> Result<Appointment> {
        let ids: BTreeSet<ResourceId> = resource_ids.iter().cloned().collect();
        if ids.is_empty() {
            return Err(BookingError::InvalidInput(
                "a booking needs at least one resource".into(),
            ));
        }
        let service = self.store.load_service(service_id)?;
        if interval.duration() != service.duration() {
            return Err(BookingError::InvalidInterval(format!(
                "{interval} does not match the {} minute duration of service {}",
                service.duration_minutes, service.id
            )));
        }
        let now = self.clock.now();
        self.check_bookable_time(&interval, now)?;
        self.ensure_known(&ids)?;
        let footprint = service.footprint(interval.start())?;

        let appointment = self.locks.with_locks(&ids, self.config.lock_timeout(), || {
            let resources = self.load_resources(&ids)?;
            let mut appointment = Appointment::new(ids.iter().cloned(), &service, interval);
            appointment.metadata = metadata;
            let existing = self.existing_on(&ids, &footprint)?;
            for resource in &resources {
                self.check_placement(resource, &footprint)?;
            }
            check_conflict(&footprint, &resources, &existing, None).into_result()?;
            self.store.insert_appointment(&appointment)?;
            Ok(appointment)
        })?;

        info!(
            appointment = %appointment.id,
            resources = ?appointment.resource_ids,
            start = %appointment.interval.start(),
            "committed appointment"
        );
        self.observers.notify(&BookingEvent::Committed {
            appointment: appointment.clone(),
            at: now,
        });
        Ok(appointment)
    }

    /// Move an appointment. The old slot stays held until the new one is
    /// written, so a failed move leaves the booking untouched. A series
    /// instance is detached from its series.
    pub fn reschedule(
        &self,
        id: AppointmentId,
        new_interval: TimeInterval,
    ) -> Result<Appointment> {
        let current = self.store.load_appointment(id)?;
        let now = self.clock.now();
        self.check_bookable_time(&new_interval, now)?;

        let (previous, appointment) =
            self.locks
                .with_locks(&current.resource_ids, self.config.lock_timeout(), || {
                    let mut appointment = self.store.load_appointment(id)?;
                    if !appointment.is_scheduled() {
                        return Err(BookingError::InvalidTransition(format!(
                            "appointment {id} is {} and cannot be rescheduled",
                            appointment.status
                        )));
                    }
                    if new_interval.duration() != appointment.interval.duration() {
                        return Err(BookingError::InvalidInterval(format!(
                            "{new_interval} does not keep the appointment's length of {} minutes",
                            appointment.interval.duration_minutes()
                        )));
                    }
                    let previous = appointment.interval;
                    let resources = self.load_resources(&appointment.resource_ids)?;
                    appointment.interval = new_interval;
                    let footprint = appointment.occupied();
                    for resource in &resources {
                        self.check_placement(resource, &footprint)?;
                    }
                    let existing = self.existing_on(&appointment.resource_ids, &footprint)?;
                    check_conflict(&footprint, &resources, &existing, Some(id)).into_result()?;

                    if appointment.recurrence_id.is_some() {
                        self.exclude_from_series(&appointment)?;
                        appointment.detach();
                    }
                    self.store.update_appointment(&appointment)?;
                    Ok((previous, appointment))
                })?;

        info!(
            appointment = %id,
            from = %previous.start(),
            to = %appointment.interval.start(),
            "rescheduled appointment"
        );
        self.observers.notify(&BookingEvent::Rescheduled {
            previous,
            appointment: appointment.clone(),
            at: now,
        });
        Ok(appointment)
    }

    /// Cancel an appointment. Cancelling a series instance also records its
    /// date as an exception on the series.
    pub fn cancel(&self, id: AppointmentId) -> Result<Appointment> {
        self.finish(id, AppointmentStatus::Cancelled)
    }

    pub fn complete(&self, id: AppointmentId) -> Result<Appointment> {
        self.finish(id, AppointmentStatus::Completed)
    }

    fn finish(
        &self,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment> {
        let current = self.store.load_appointment(id)?;
        let appointment =
            self.locks
                .with_locks(&current.resource_ids, self.config.lock_timeout(), || {
                    let mut appointment = self.store.load_appointment(id)?;
                    appointment.transition(status)?;
                    if status == AppointmentStatus::Cancelled && appointment.recurrence_id.is_some()
                    {
                        self.exclude_from_series(&appointment)?;
                    }
                    self.store.update_appointment_status(id, status)?;
                    Ok(appointment)
                })?;

        info!(appointment = %id, status = %status, "appointment finished");
        let at = self.clock.now();
        let event = match status {
            AppointmentStatus::Completed => BookingEvent::Completed {
                appointment: appointment.clone(),
                at,
            },
            _ => BookingEvent::Cancelled {
                appointment: appointment.clone(),
                at,
            },
        };
        self.observers.notify(&event);
        Ok(appointment)
    }

    // ── Series ──────────────────────────────────────────────────────────────

    /// Book every occurrence of a bounded series, or none of them.
    ///
    /// Occurrence times are resolved in the timezone of the first resource
    /// (in id order). Open-ended patterns and patterns producing more than
    /// `max_series_occurrences` fail with
    /// [`BookingError::RecurrenceBoundsExceeded`].
    pub fn commit_series(
        &self,
        resource_ids: &[ResourceId],
        service_id: &ServiceId,
        anchor_local: NaiveDateTime,
        pattern: RecurrencePattern,
        metadata: Metadata,
    ) -> Result<CommittedSeries> {
        let ids: BTreeSet<ResourceId> = resource_ids.iter().cloned().collect();
        let first = ids.iter().next().ok_or_else(|| {
            BookingError::InvalidInput("a series needs at least one resource".into())
        })?;
        pattern.validate()?;
        if pattern.is_open() {
            return Err(BookingError::RecurrenceBoundsExceeded(
                "an open-ended series cannot be booked; give it a count or an end date".into(),
            ));
        }
        let service = self.store.load_service(service_id)?;
        self.ensure_known(&ids)?;
        let timezone = self.store.load_resource(first)?.timezone;

        let series = RecurringSeries {
            id: RecurrenceId::new(),
            resource_ids: ids.clone(),
            service_id: service.id.clone(),
            anchor_local,
            timezone,
            duration_minutes: service.duration_minutes,
            pattern,
        };
        let limit = self.config.max_series_occurrences;
        let occurrences: Vec<Occurrence> = series
            .expand(limit.saturating_add(1))?
            .collect::<Result<_>>()?;
        if occurrences.len() > limit {
            return Err(BookingError::RecurrenceBoundsExceeded(format!(
                "series produces more than {limit} occurrences"
            )));
        }
        if occurrences.is_empty() {
            return Err(BookingError::InvalidInput(format!(
                "series starting {anchor_local} has no occurrences"
            )));
        }

        let now = self.clock.now();
        for occurrence in &occurrences {
            self.check_bookable_time(&occurrence.interval, now)?;
        }

        let appointments = self.locks.with_locks(&ids, self.config.lock_timeout(), || {
            let resources = self.load_resources(&ids)?;
            let span = TimeInterval::new(
                occurrences[0].interval.start() - service.buffer_before(),
                occurrences[occurrences.len() - 1].interval.end() + service.buffer_after(),
            )?;
            let mut existing = self.existing_on(&ids, &span)?;
            let mut planned = Vec::with_capacity(occurrences.len());
            for occurrence in &occurrences {
                let mut appointment =
                    Appointment::new(ids.iter().cloned(), &service, occurrence.interval);
                appointment.recurrence_id = Some(series.id);
                appointment.occurrence_date = Some(occurrence.date);
                appointment.metadata = metadata.clone();
                let footprint = service.footprint(occurrence.interval.start())?;
                for resource in &resources {
                    self.check_placement(resource, &footprint)?;
                }
                check_conflict(&footprint, &resources, &existing, None).into_result()?;
                existing.push(appointment.clone());
                planned.push(appointment);
            }
            self.store.insert_appointments(&planned)?;
            self.store.save_series(&series)?;
            Ok(planned)
        })?;

        info!(
            series = %series.id,
            occurrences = appointments.len(),
            rrule = %series.pattern.to_rrule(),
            "committed series"
        );
        self.observers.notify(&BookingEvent::SeriesCommitted {
            series: series.clone(),
            appointment_ids: appointments.iter().map(|a| a.id).collect(),
            at: now,
        });
        Ok(CommittedSeries {
            series,
            appointments,
        })
    }

    /// Cancel the occurrence on `date`. The date becomes an exception even if
    /// no appointment is linked to it any more.
    pub fn cancel_occurrence(
        &self,
        id: RecurrenceId,
        date: NaiveDate,
    ) -> Result<Option<Appointment>> {
        let series = self.store.load_series(id)?;
        let cancelled = self
            .locks
            .with_locks(&series.resource_ids, self.config.lock_timeout(), || {
                let mut series = self.store.load_series(id)?;
                let generated = series
                    .pattern
                    .candidate_dates(series.anchor_local.date())
                    .take_while(|d| *d <= date)
                    .any(|d| d == date);
                if !generated {
                    return Err(BookingError::NotFound(format!(
                        "series {id} has no occurrence on {date}"
                    )));
                }
                series.pattern.exclude(date);
                self.store.save_series(&series)?;
                self.cancel_linked(id, |d| d == date)
            })?;

        info!(series = %id, %date, "cancelled occurrence");
        Ok(self.notify_cancelled(cancelled).into_iter().next())
    }

    /// Cancel the occurrence on `from` and every later one.
    pub fn cancel_following(
        &self,
        id: RecurrenceId,
        from: NaiveDate,
    ) -> Result<Vec<Appointment>> {
        let series = self.store.load_series(id)?;
        let cancelled = self
            .locks
            .with_locks(&series.resource_ids, self.config.lock_timeout(), || {
                let mut series = self.store.load_series(id)?;
                series.pattern.truncate_before(from)?;
                self.store.save_series(&series)?;
                self.cancel_linked(id, |d| d >= from)
            })?;

        info!(series = %id, %from, cancelled = cancelled.len(), "cancelled following occurrences");
        Ok(self.notify_cancelled(cancelled))
    }

    /// Turn a series instance into a standalone appointment. The series
    /// stops producing an occurrence on its date.
    pub fn detach_occurrence(&self, id: AppointmentId) -> Result<Appointment> {
        let current = self.store.load_appointment(id)?;
        let appointment =
            self.locks
                .with_locks(&current.resource_ids, self.config.lock_timeout(), || {
                    let mut appointment = self.store.load_appointment(id)?;
                    if appointment.recurrence_id.is_none() {
                        return Err(BookingError::InvalidInput(format!(
                            "appointment {id} is not part of a series"
                        )));
                    }
                    if !appointment.is_scheduled() {
                        return Err(BookingError::InvalidTransition(format!(
                            "appointment {id} is {} and cannot be detached",
                            appointment.status
                        )));
                    }
                    self.exclude_from_series(&appointment)?;
                    appointment.detach();
                    self.store.update_appointment(&appointment)?;
                    Ok(appointment)
                })?;
        info!(appointment = %id, "detached occurrence");
        Ok(appointment)
    }

    /// Fails with `NotFound` for ids the store does not know, so that no
    /// lock is ever registered for them.
    fn ensure_known(&self, ids: &BTreeSet<ResourceId>) -> Result<()> {
        for id in ids {
            self.store.load_resource(id)?;
        }
        Ok(())
    }

    // ── Helpers (callers hold the relevant locks) ──────────────────────────

    fn load_resources(&self, ids: &BTreeSet<ResourceId>) -> Result<Vec<Resource>> {
        ids.iter()
            .map(|id| {
                let resource = self.store.load_resource(id)?;
                if !resource.active {
                    return Err(BookingError::ResourceInactive(id.to_string()));
                }
                Ok(resource)
            })
            .collect()
    }

    /// Scheduled appointments on any of `ids` overlapping `range`, once each.
    fn existing_on(
        &self,
        ids: &BTreeSet<ResourceId>,
        range: &TimeInterval,
    ) -> Result<Vec<Appointment>> {
        let mut seen: BTreeMap<AppointmentId, Appointment> = BTreeMap::new();
        for id in ids {
            for appointment in self.store.load_scheduled_appointments(id, range)? {
                seen.entry(appointment.id).or_insert(appointment);
            }
        }
        Ok(seen.into_values().collect())
    }

    /// With working hours enforced, the whole footprint must fall inside one
    /// open window of the resource.
    fn check_placement(
        &self,
        resource: &Resource,
        footprint: &TimeInterval,
    ) -> Result<()> {
        if !self.config.enforce_working_hours {
            return Ok(());
        }
        let calendar = AvailabilityCalendar::new(resource.clone())
            .with_working_hours(self.store.load_working_hours(&resource.id)?)
            .with_holidays(self.store.load_holidays(&resource.id)?);
        let open = calendar.open_intervals(footprint)?;
        if open.iter().any(|window| window.contains(footprint)) {
            Ok(())
        } else {
            Err(BookingError::InvalidInterval(format!(
                "{footprint} is outside the working hours of {}",
                resource.id
            )))
        }
    }

    fn check_bookable_time(
        &self,
        interval: &TimeInterval,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if interval.start() < now {
            return Err(BookingError::InvalidInterval(format!(
                "{interval} starts in the past"
            )));
        }
        if let Some(limit) = self.horizon_end(now) {
            if interval.start() > limit {
                return Err(BookingError::InvalidInterval(format!(
                    "{interval} is beyond the booking horizon of {} days",
                    self.config.booking_horizon_days.unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    fn check_query_range(&self, range: &TimeInterval) -> Result<()> {
        if range.duration() > Duration::days(i64::from(self.config.max_query_days)) {
            return Err(BookingError::InvalidInterval(format!(
                "{range} spans more than {} days",
                self.config.max_query_days
            )));
        }
        Ok(())
    }

    fn horizon_end(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.config
            .booking_horizon_days
            .map(|days| now + Duration::days(i64::from(days)))
    }

    fn exclude_from_series(&self, appointment: &Appointment) -> Result<()> {
        let (Some(series_id), Some(date)) = (appointment.recurrence_id, appointment.occurrence_date)
        else {
            return Ok(());
        };
        let mut series = self.store.load_series(series_id)?;
        if series.pattern.exclude(date) {
            self.store.save_series(&series)?;
        }
        Ok(())
    }

    fn cancel_linked(
        &self,
        id: RecurrenceId,
        matches: impl Fn(NaiveDate) -> bool,
    ) -> Result<Vec<Appointment>> {
        let mut cancelled = Vec::new();
        for mut appointment in self.store.load_series_appointments(id)? {
            let selected = appointment.is_scheduled()
                && appointment.occurrence_date.is_some_and(&matches);
            if selected {
                appointment.transition(AppointmentStatus::Cancelled)?;
                self.store
                    .update_appointment_status(appointment.id, AppointmentStatus::Cancelled)?;
                cancelled.push(appointment);
            }
        }
        Ok(cancelled)
    }

    fn notify_cancelled(&self, cancelled: Vec<Appointment>) -> Vec<Appointment> {
        let at = self.clock.now();
        for appointment in &cancelled {
            self.observers.notify(&BookingEvent::Cancelled {
                appointment: appointment.clone(),
                at,
            });
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{ResourceKind, Service, WorkingHoursRule};
    use crate::recurrence::Frequency;
    use crate::store::InMemoryStore;
    use chrono::{NaiveTime, TimeZone, Weekday};

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap()
    }

    fn iv(d: u32, sh: u32, sm: u32, eh: u32, em: u32) -> TimeInterval {
        TimeInterval::new(at(d, sh, sm), at(d, eh, em)).unwrap()
    }

    fn weekdays_nine_to_five(store: &InMemoryStore, id: &str) {
        for day in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
            store
                .add_working_hours(
                    WorkingHoursRule::weekly(
                        id,
                        day,
                        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                        NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                    )
                    .unwrap(),
                )
                .unwrap();
        }
    }

    fn clinic() -> (Arc<InMemoryStore>, SchedulingCoordinator) {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_resource(Resource::new(
                "dr-lee",
                ResourceKind::Staff {
                    display_name: "Dr Lee".into(),
                },
                chrono_tz::UTC,
            ))
            .unwrap();
        weekdays_nine_to_five(&store, "dr-lee");
        store
            .upsert_service(Service::new("consult", "Consultation", 30).unwrap())
            .unwrap();
        let coordinator = SchedulingCoordinator::new(
            store.clone(),
            EngineConfig::default(),
            Arc::new(FixedClock::new(at(1, 8, 0))),
        )
        .unwrap();
        (store, coordinator)
    }

    fn lee() -> ResourceId {
        ResourceId::new("dr-lee")
    }

    fn consult() -> ServiceId {
        ServiceId::new("consult")
    }

    #[test]
    fn test_commit_then_overlap_conflicts() {
        let (_, coordinator) = clinic();
        let first = coordinator
            .commit(&lee(), iv(2, 10, 0, 10, 30), &consult(), Metadata::new())
            .unwrap();
        let err = coordinator
            .commit(&lee(), iv(2, 10, 15, 10, 45), &consult(), Metadata::new())
            .unwrap_err();
        assert_eq!(err.conflicting_ids(), &[first.id]);
    }

    #[test]
    fn test_commit_requires_service_duration() {
        let (_, coordinator) = clinic();
        let err = coordinator
            .commit(&lee(), iv(2, 10, 0, 11, 0), &consult(), Metadata::new())
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidInterval(_)));
    }

    #[test]
    fn test_commit_outside_working_hours_rejected() {
        let (_, coordinator) = clinic();
        let err = coordinator
            .commit(&lee(), iv(2, 16, 45, 17, 15), &consult(), Metadata::new())
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidInterval(_)));
    }

    #[test]
    fn test_commit_in_the_past_rejected() {
        let (_, coordinator) = clinic();
        let err = coordinator
            .commit(&lee(), iv(1, 7, 0, 7, 30), &consult(), Metadata::new())
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidInterval(_)));
    }

    #[test]
    fn test_commit_on_inactive_resource() {
        let (store, coordinator) = clinic();
        let resource = store.load_resource(&lee()).unwrap().deactivated();
        store.upsert_resource(resource).unwrap();
        let err = coordinator
            .commit(&lee(), iv(2, 10, 0, 10, 30), &consult(), Metadata::new())
            .unwrap_err();
        assert_eq!(err.kind(), "resource_inactive");
        // Searching skips it instead of failing.
        assert!(coordinator
            .find_slots(&consult(), &[lee()], &iv(2, 9, 0, 17, 0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unknown_resources_never_get_a_lock() {
        let (_, coordinator) = clinic();
        for n in 0..20 {
            let ghost = ResourceId::new(format!("ghost-{n}"));
            let err = coordinator
                .commit_group(&[lee(), ghost], iv(2, 10, 0, 10, 30), &consult(), Metadata::new())
                .unwrap_err();
            assert_eq!(err.kind(), "not_found");
        }
        assert!(coordinator.locks.registry.lock().is_empty());

        coordinator
            .commit(&lee(), iv(2, 10, 0, 10, 30), &consult(), Metadata::new())
            .unwrap();
        assert_eq!(coordinator.locks.registry.lock().len(), 1);
    }

    #[test]
    fn test_find_slots_skips_unknown_resources() {
        let (_, coordinator) = clinic();
        let slots = coordinator
            .find_slots(&consult(), &[ResourceId::new("ghost"), lee()], &iv(2, 9, 0, 10, 0))
            .unwrap();
        // 09:00, 09:15 and 09:30 at the default 15 minute step.
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|s| s.resource_id == lee()));
    }

    #[test]
    fn test_find_slots_rejects_oversized_range() {
        let (_, coordinator) = clinic();
        let range = TimeInterval::new(at(1, 0, 0), at(1, 0, 0) + Duration::days(90)).unwrap();
        assert!(matches!(
            coordinator.find_slots(&consult(), &[lee()], &range),
            Err(BookingError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_reschedule_keeps_old_slot_on_conflict() {
        let (_, coordinator) = clinic();
        let a = coordinator
            .commit(&lee(), iv(2, 10, 0, 10, 30), &consult(), Metadata::new())
            .unwrap();
        let b = coordinator
            .commit(&lee(), iv(2, 11, 0, 11, 30), &consult(), Metadata::new())
            .unwrap();
        assert!(coordinator.reschedule(a.id, iv(2, 11, 15, 11, 45)).is_err());
        assert_eq!(coordinator.appointment(a.id).unwrap().interval, iv(2, 10, 0, 10, 30));

        // Moving onto its own old slot, partially, is fine.
        let moved = coordinator.reschedule(a.id, iv(2, 10, 15, 10, 45)).unwrap();
        assert_eq!(moved.interval, iv(2, 10, 15, 10, 45));
        assert!(coordinator.reschedule(b.id, iv(2, 10, 30, 11, 0)).is_err());
    }

    #[test]
    fn test_cancel_frees_the_slot_and_is_terminal() {
        let (_, coordinator) = clinic();
        let a = coordinator
            .commit(&lee(), iv(2, 10, 0, 10, 30), &consult(), Metadata::new())
            .unwrap();
        coordinator.cancel(a.id).unwrap();
        coordinator
            .commit(&lee(), iv(2, 10, 0, 10, 30), &consult(), Metadata::new())
            .unwrap();
        assert!(matches!(
            coordinator.cancel(a.id),
            Err(BookingError::InvalidTransition(_))
        ));
        assert!(matches!(
            coordinator.reschedule(a.id, iv(2, 12, 0, 12, 30)),
            Err(BookingError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_complete_is_terminal() {
        let (_, coordinator) = clinic();
        let a = coordinator
            .commit(&lee(), iv(2, 10, 0, 10, 30), &consult(), Metadata::new())
            .unwrap();
        assert_eq!(coordinator.complete(a.id).unwrap().status, AppointmentStatus::Completed);
        assert!(coordinator.cancel(a.id).is_err());
    }

    #[test]
    fn test_open_series_cannot_be_committed() {
        let (_, coordinator) = clinic();
        let err = coordinator
            .commit_series(
                &[lee()],
                &consult(),
                at(2, 9, 0).naive_utc(),
                RecurrencePattern::new(Frequency::Weekly, 1),
                Metadata::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "recurrence_bounds_exceeded");
    }

    #[test]
    fn test_series_is_all_or_nothing() {
        let (store, coordinator) = clinic();
        // Blocks the third weekly occurrence.
        coordinator
            .commit(&lee(), iv(16, 9, 0, 9, 30), &consult(), Metadata::new())
            .unwrap();
        let err = coordinator
            .commit_series(
                &[lee()],
                &consult(),
                at(2, 9, 0).naive_utc(),
                RecurrencePattern::new(Frequency::Weekly, 1).with_count(4),
                Metadata::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(store.appointments().len(), 1);
    }

    #[test]
    fn test_series_instance_lifecycle() {
        let (_, coordinator) = clinic();
        let committed = coordinator
            .commit_series(
                &[lee()],
                &consult(),
                at(2, 9, 0).naive_utc(),
                RecurrencePattern::new(Frequency::Weekly, 1).with_count(4),
                Metadata::new(),
            )
            .unwrap();
        let series_id = committed.series.id;
        assert_eq!(committed.appointments.len(), 4);

        // Rescheduling the second instance detaches it.
        let second = committed.appointments[1].clone();
        let moved = coordinator.reschedule(second.id, iv(9, 14, 0, 14, 30)).unwrap();
        assert_eq!(moved.recurrence_id, None);

        // Cancel this-and-following from the fourth.
        let dropped = coordinator
            .cancel_following(series_id, NaiveDate::from_ymd_opt(2026, 3, 23).unwrap())
            .unwrap();
        assert_eq!(dropped.len(), 1);

        let remaining: Vec<NaiveDate> = coordinator
            .expand_series(series_id, 52)
            .unwrap()
            .iter()
            .map(|o| o.date)
            .collect();
        assert_eq!(
            remaining,
            vec![
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                NaiveDate::from_ymd_opt(2026, 3, 16).unwrap()
            ]
        );
    }

    #[test]
    fn test_detach_requires_series_instance() {
        let (_, coordinator) = clinic();
        let single = coordinator
            .commit(&lee(), iv(2, 10, 0, 10, 30), &consult(), Metadata::new())
            .unwrap();
        assert!(matches!(
            coordinator.detach_occurrence(single.id),
            Err(BookingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cancel_occurrence_rejects_foreign_dates() {
        let (_, coordinator) = clinic();
        let committed = coordinator
            .commit_series(
                &[lee()],
                &consult(),
                at(2, 9, 0).naive_utc(),
                RecurrencePattern::new(Frequency::Weekly, 1).with_count(2),
                Metadata::new(),
            )
            .unwrap();
        let wednesday = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
        assert!(matches!(
            coordinator.cancel_occurrence(committed.series.id, wednesday),
            Err(BookingError::NotFound(_))
        ));
        let monday = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let cancelled = coordinator
            .cancel_occurrence(committed.series.id, monday)
            .unwrap()
            .unwrap();
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    }
}

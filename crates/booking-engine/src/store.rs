//! Persistence boundary.
//!
//! The coordinator talks to storage only through [`ScheduleStore`]. Every
//! method takes `&self`; implementations are shared across threads behind an
//! `Arc` and provide their own interior synchronization.
//!
//! [`InMemoryStore`] is the bundled implementation. It can be seeded from a
//! [`StoreSnapshot`], the JSON shape the CLI reads scenarios from.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BookingError, Result};
use crate::interval::TimeInterval;
use crate::model::{
    validate_working_hours, Appointment, AppointmentId, AppointmentStatus, Holiday,
    RecurrenceId, Resource, ResourceId, Service, ServiceId, WorkingHoursRule,
};
use crate::recurrence::RecurringSeries;

pub trait ScheduleStore: Send + Sync {
    fn load_resource(&self, id: &ResourceId) -> Result<Resource>;

    fn load_service(&self, id: &ServiceId) -> Result<Service>;

    fn load_working_hours(&self, id: &ResourceId) -> Result<Vec<WorkingHoursRule>>;

    /// Global holidays plus the ones scoped to `id`.
    fn load_holidays(&self, id: &ResourceId) -> Result<Vec<Holiday>>;

    /// Scheduled appointments on `id` whose occupied interval (buffers
    /// included) overlaps `range`.
    fn load_scheduled_appointments(
        &self,
        id: &ResourceId,
        range: &TimeInterval,
    ) -> Result<Vec<Appointment>>;

    fn load_appointment(&self, id: AppointmentId) -> Result<Appointment>;

    /// Fails with [`BookingError::Storage`] if the id already exists.
    fn insert_appointment(&self, appointment: &Appointment) -> Result<()>;

    /// Insert several appointments. The default inserts one by one; stores
    /// that can should make this atomic.
    fn insert_appointments(&self, appointments: &[Appointment]) -> Result<()> {
        appointments
            .iter()
            .try_for_each(|appointment| self.insert_appointment(appointment))
    }

    /// Replace a stored appointment. Fails with [`BookingError::NotFound`] if
    /// it does not exist.
    fn update_appointment(&self, appointment: &Appointment) -> Result<()>;

    fn update_appointment_status(
        &self,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<()>;

    fn load_series(&self, id: RecurrenceId) -> Result<RecurringSeries>;

    fn save_series(&self, series: &RecurringSeries) -> Result<()>;

    /// Every appointment linked to the series, in any status.
    fn load_series_appointments(&self, id: RecurrenceId) -> Result<Vec<Appointment>>;
}

/// Serializable contents of a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub resources: Vec<Resource>,
    pub services: Vec<Service>,
    pub working_hours: Vec<WorkingHoursRule>,
    pub holidays: Vec<Holiday>,
    pub appointments: Vec<Appointment>,
    pub series: Vec<RecurringSeries>,
}

#[derive(Debug, Default)]
struct StoreState {
    resources: BTreeMap<ResourceId, Resource>,
    services: BTreeMap<ServiceId, Service>,
    working_hours: Vec<WorkingHoursRule>,
    holidays: Vec<Holiday>,
    appointments: BTreeMap<AppointmentId, Appointment>,
    series: BTreeMap<RecurrenceId, RecurringSeries>,
}

/// A [`ScheduleStore`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, validating every record and every
    /// reference between them.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let store = Self::new();
        for resource in snapshot.resources {
            store.upsert_resource(resource)?;
        }
        for service in snapshot.services {
            store.upsert_service(service)?;
        }
        for rule in snapshot.working_hours {
            store.add_working_hours(rule)?;
        }
        for holiday in snapshot.holidays {
            store.add_holiday(holiday)?;
        }

        {
            let mut state = store.state.write();
            for appointment in snapshot.appointments {
                state.check_references(&appointment.resource_ids, &appointment.service_id)?;
                if state.appointments.contains_key(&appointment.id) {
                    return Err(BookingError::InvalidInput(format!(
                        "duplicate appointment {}",
                        appointment.id
                    )));
                }
                state.appointments.insert(appointment.id, appointment);
            }
            for series in snapshot.series {
                series.pattern.validate()?;
                state.check_references(&series.resource_ids, &series.service_id)?;
                state.series.insert(series.id, series);
            }
        }
        Ok(store)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            resources: state.resources.values().cloned().collect(),
            services: state.services.values().cloned().collect(),
            working_hours: state.working_hours.clone(),
            holidays: state.holidays.clone(),
            appointments: state.appointments.values().cloned().collect(),
            series: state.series.values().cloned().collect(),
        }
    }

    pub fn upsert_resource(&self, resource: Resource) -> Result<()> {
        resource.validate()?;
        self.state.write().resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    pub fn upsert_service(&self, service: Service) -> Result<()> {
        service.validate()?;
        self.state.write().services.insert(service.id.clone(), service);
        Ok(())
    }

    /// Add a rule, rejecting it if it overlaps the resource's existing rules.
    pub fn add_working_hours(&self, rule: WorkingHoursRule) -> Result<()> {
        let mut state = self.state.write();
        if !state.resources.contains_key(&rule.resource_id) {
            return Err(BookingError::NotFound(format!("resource {}", rule.resource_id)));
        }
        let mut same_resource: Vec<WorkingHoursRule> = state
            .working_hours
            .iter()
            .filter(|r| r.resource_id == rule.resource_id)
            .cloned()
            .collect();
        same_resource.push(rule.clone());
        validate_working_hours(&same_resource)?;
        state.working_hours.push(rule);
        Ok(())
    }

    pub fn add_holiday(&self, holiday: Holiday) -> Result<()> {
        holiday.validate()?;
        self.state.write().holidays.push(holiday);
        Ok(())
    }

    /// All stored appointments ordered by start time.
    pub fn appointments(&self) -> Vec<Appointment> {
        let mut all: Vec<Appointment> = self.state.read().appointments.values().cloned().collect();
        all.sort_by_key(|a| (a.interval.start(), a.id));
        all
    }
}

impl StoreState {
    fn check_references<'a>(
        &self,
        resource_ids: impl IntoIterator<Item = &'a ResourceId>,
        service_id: &ServiceId,
    ) -> Result<()> {
        for id in resource_ids {
            if !self.resources.contains_key(id) {
                return Err(BookingError::NotFound(format!("resource {id}")));
            }
        }
        if !self.services.contains_key(service_id) {
            return Err(BookingError::NotFound(format!("service {service_id}")));
        }
        Ok(())
    }
}

impl ScheduleStore for InMemoryStore {
    fn load_resource(&self, id: &ResourceId) -> Result<Resource> {
        self.state
            .read()
            .resources
            .get(id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("resource {id}")))
    }

    fn load_service(&self, id: &ServiceId) -> Result<Service> {
        self.state
            .read()
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("service {id}")))
    }

    fn load_working_hours(&self, id: &ResourceId) -> Result<Vec<WorkingHoursRule>> {
        Ok(self
            .state
            .read()
            .working_hours
            .iter()
            .filter(|r| &r.resource_id == id)
            .cloned()
            .collect())
    }

    fn load_holidays(&self, id: &ResourceId) -> Result<Vec<Holiday>> {
        Ok(self
            .state
            .read()
            .holidays
            .iter()
            .filter(|h| h.applies_to(id))
            .cloned()
            .collect())
    }

    fn load_scheduled_appointments(
        &self,
        id: &ResourceId,
        range: &TimeInterval,
    ) -> Result<Vec<Appointment>> {
        let state = self.state.read();
        let mut found: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| a.is_scheduled() && a.uses(id) && a.occupied().overlaps(range))
            .cloned()
            .collect();
        found.sort_by_key(|a| (a.interval.start(), a.id));
        Ok(found)
    }

    fn load_appointment(&self, id: AppointmentId) -> Result<Appointment> {
        self.state
            .read()
            .appointments
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("appointment {id}")))
    }

    fn insert_appointment(&self, appointment: &Appointment) -> Result<()> {
        self.insert_appointments(std::slice::from_ref(appointment))
    }

    fn insert_appointments(&self, appointments: &[Appointment]) -> Result<()> {
        let mut state = self.state.write();
        if let Some(dup) = appointments
            .iter()
            .find(|a| state.appointments.contains_key(&a.id))
        {
            return Err(BookingError::Storage(format!(
                "appointment {} already exists",
                dup.id
            )));
        }
        for appointment in appointments {
            debug!(appointment = %appointment.id, start = %appointment.interval.start(), "stored appointment");
            state.appointments.insert(appointment.id, appointment.clone());
        }
        Ok(())
    }

    fn update_appointment(&self, appointment: &Appointment) -> Result<()> {
        let mut state = self.state.write();
        match state.appointments.get_mut(&appointment.id) {
            Some(stored) => {
                *stored = appointment.clone();
                Ok(())
            }
            None => Err(BookingError::NotFound(format!("appointment {}", appointment.id))),
        }
    }

    fn update_appointment_status(
        &self,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<()> {
        let mut state = self.state.write();
        let stored = state
            .appointments
            .get_mut(&id)
            .ok_or_else(|| BookingError::NotFound(format!("appointment {id}")))?;
        stored.status = status;
        Ok(())
    }

    fn load_series(&self, id: RecurrenceId) -> Result<RecurringSeries> {
        self.state
            .read()
            .series
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("series {id}")))
    }

    fn save_series(&self, series: &RecurringSeries) -> Result<()> {
        self.state.write().series.insert(series.id, series.clone());
        Ok(())
    }

    fn load_series_appointments(&self, id: RecurrenceId) -> Result<Vec<Appointment>> {
        let state = self.state.read();
        let mut linked: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| a.recurrence_id == Some(id))
            .cloned()
            .collect();
        linked.sort_by_key(|a| (a.interval.start(), a.id));
        Ok(linked)
    }
}

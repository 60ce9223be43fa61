//! Capacity-aware conflict detection.
//!
//! Two appointments conflict when their occupied intervals overlap
//! (`a.start < b.end && b.start < a.end`) **and** a resource they share
//! would hold more concurrent appointments than its capacity. For the
//! common capacity-1 case that reduces to "any overlap is a conflict".
//!
//! The check is pure. The coordinator calls it with appointments read while
//! holding the resource's lock, so a slot computed earlier from a stale view
//! is always re-validated against current data before it is written.

use serde::Serialize;

use crate::error::{BookingError, Result};
use crate::interval::{merge, TimeInterval};
use crate::model::{Appointment, AppointmentId, Resource};

/// Outcome of [`check_conflict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "appointment_ids", rename_all = "snake_case")]
pub enum ConflictCheck {
    Ok,
    /// Scheduled appointments that leave no capacity for the candidate,
    /// sorted and deduplicated.
    Conflict(Vec<AppointmentId>),
}

impl ConflictCheck {
    pub fn is_ok(&self) -> bool {
        matches!(self, ConflictCheck::Ok)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            ConflictCheck::Ok => Ok(()),
            ConflictCheck::Conflict(appointment_ids) => {
                Err(BookingError::Conflict { appointment_ids })
            }
        }
    }
}

/// Check whether a new booking occupying `candidate` fits on every resource.
///
/// # Arguments
///
/// * `candidate` — The span the new booking would block, buffers included
/// * `resources` — Every resource the booking needs
/// * `existing` — Appointments to check against; non-scheduled ones and
///   ones not using a given resource are ignored
/// * `exclude` — An appointment to leave out (the one being rescheduled)
pub fn check_conflict(
    candidate: &TimeInterval,
    resources: &[Resource],
    existing: &[Appointment],
    exclude: Option<AppointmentId>,
) -> ConflictCheck {
    let mut conflicting: Vec<AppointmentId> = Vec::new();

    for resource in resources {
        let overlapping: Vec<&Appointment> = existing
            .iter()
            .filter(|a| a.is_scheduled())
            .filter(|a| Some(a.id) != exclude)
            .filter(|a| a.uses(&resource.id))
            .filter(|a| a.occupied().overlaps(candidate))
            .collect();

        if overlapping.is_empty() {
            continue;
        }

        // Only the part inside the candidate matters: two bookings that
        // overlap each other elsewhere do not reduce capacity here.
        let clipped: Vec<TimeInterval> = overlapping
            .iter()
            .filter_map(|a| a.occupied().intersect(candidate))
            .collect();

        if peak_concurrency(&clipped) + 1 > resource.capacity as usize {
            conflicting.extend(overlapping.iter().map(|a| a.id));
        }
    }

    if conflicting.is_empty() {
        ConflictCheck::Ok
    } else {
        conflicting.sort();
        conflicting.dedup();
        ConflictCheck::Conflict(conflicting)
    }
}

/// Boundary events for a sweep over half-open intervals. At equal instants
/// ends sort before starts, so touching intervals never count as concurrent.
fn sweep_events(intervals: &[TimeInterval]) -> Vec<(chrono::DateTime<chrono::Utc>, i32)> {
    let mut events: Vec<_> = intervals
        .iter()
        .flat_map(|i| [(i.start(), 1), (i.end(), -1)])
        .collect();
    events.sort();
    events
}

/// The largest number of intervals covering any single instant.
pub fn peak_concurrency(intervals: &[TimeInterval]) -> usize {
    let mut current: i32 = 0;
    let mut peak: i32 = 0;
    for (_, delta) in sweep_events(intervals) {
        current += delta;
        peak = peak.max(current);
    }
    peak.max(0) as usize
}

/// Spans during which at least `capacity` intervals are active.
///
/// These are the spans a resource of that capacity cannot accept another
/// booking in.
pub fn saturated_spans(intervals: &[TimeInterval], capacity: u32) -> Vec<TimeInterval> {
    let threshold = capacity.max(1) as i32;
    let mut spans = Vec::new();
    let mut current: i32 = 0;
    let mut opened_at = None;

    for (at, delta) in sweep_events(intervals) {
        current += delta;
        match opened_at {
            None if current >= threshold => opened_at = Some(at),
            Some(start) if current < threshold => {
                if let Ok(span) = TimeInterval::new(start, at) {
                    spans.push(span);
                }
                opened_at = None;
            }
            _ => {}
        }
    }
    merge(spans)
}

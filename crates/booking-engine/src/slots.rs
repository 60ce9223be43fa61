//! Discrete bookable start times.
//!
//! [`candidate_slots`] walks a free timeline at a fixed granularity and
//! yields every appointment interval whose full footprint
//! (`start - buffer_before .. start + duration + buffer_after`) fits inside
//! one free interval. The walk restarts at each free interval's start, so
//! slots line up with the edges of existing bookings rather than with the
//! clock face.
//!
//! [`rank_slots`] merges the per-resource results of an "any available
//! resource" search into one deterministic order.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::{BookingError, Result};
use crate::interval::TimeInterval;
use crate::model::{ResourceId, Service};

/// Lazy iterator over candidate appointment intervals.
///
/// Cloning (or calling [`CandidateSlots::restart`]) yields an independent
/// walk over the same timeline.
#[derive(Debug, Clone)]
pub struct CandidateSlots {
    free: Vec<TimeInterval>,
    index: usize,
    cursor: Option<DateTime<Utc>>,
    duration: Duration,
    buffer_before: Duration,
    buffer_after: Duration,
    step: Duration,
}

impl CandidateSlots {
    /// A fresh walk from the first free interval.
    pub fn restart(&self) -> Self {
        Self {
            index: 0,
            cursor: None,
            ..self.clone()
        }
    }
}

impl Iterator for CandidateSlots {
    type Item = TimeInterval;

    fn next(&mut self) -> Option<TimeInterval> {
        loop {
            let free = self.free.get(self.index)?;
            let start = self
                .cursor
                .unwrap_or_else(|| free.start() + self.buffer_before);
            if start + self.duration + self.buffer_after <= free.end() {
                self.cursor = Some(start + self.step);
                return Some(TimeInterval::from_ordered(start, start + self.duration));
            }
            self.index += 1;
            self.cursor = None;
        }
    }
}

/// Candidate slots for `service` over a free timeline.
///
/// # Errors
///
/// Returns [`BookingError::InvalidInput`] if `granularity_minutes` is zero or
/// the service has no duration.
pub fn candidate_slots(
    free: &[TimeInterval],
    service: &Service,
    granularity_minutes: u32,
) -> Result<CandidateSlots> {
    if granularity_minutes == 0 {
        return Err(BookingError::InvalidInput(
            "slot granularity must be at least one minute".into(),
        ));
    }
    service.validate()?;
    Ok(CandidateSlots {
        free: free.to_vec(),
        index: 0,
        cursor: None,
        duration: service.duration(),
        buffer_before: service.buffer_before(),
        buffer_after: service.buffer_after(),
        step: Duration::minutes(granularity_minutes as i64),
    })
}

/// A slot on a specific resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedSlot {
    pub resource_id: ResourceId,
    /// The resource's timezone, for rendering the slot in local time.
    pub timezone: Tz,
    pub interval: TimeInterval,
}

/// Order slots from several resources.
///
/// Earlier slots come first. Between slots starting at the same instant,
/// the resource whose first available slot is earliest wins, then the
/// lowest resource id.
pub fn rank_slots(per_resource: Vec<(ResourceId, Tz, Vec<TimeInterval>)>) -> Vec<RankedSlot> {
    let first_available: BTreeMap<ResourceId, DateTime<Utc>> = per_resource
        .iter()
        .filter_map(|(id, _, slots)| slots.iter().map(|s| s.start()).min().map(|t| (id.clone(), t)))
        .collect();

    let mut ranked: Vec<RankedSlot> = per_resource
        .into_iter()
        .flat_map(|(resource_id, timezone, slots)| {
            slots.into_iter().map(move |interval| RankedSlot {
                resource_id: resource_id.clone(),
                timezone,
                interval,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.interval
            .start()
            .cmp(&b.interval.start())
            .then_with(|| first_available[&a.resource_id].cmp(&first_available[&b.resource_id]))
            .then_with(|| a.resource_id.cmp(&b.resource_id))
    });
    ranked
}

/// The earliest slot of every resource, best resource first.
pub fn first_available(ranked: &[RankedSlot]) -> Vec<RankedSlot> {
    let mut seen: Vec<&ResourceId> = Vec::new();
    let mut firsts = Vec::new();
    for slot in ranked {
        if !seen.contains(&&slot.resource_id) {
            seen.push(&slot.resource_id);
            firsts.push(slot.clone());
        }
    }
    firsts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn iv(sh: u32, sm: u32, eh: u32, em: u32) -> TimeInterval {
        TimeInterval::new(at(sh, sm), at(eh, em)).unwrap()
    }

    fn starts(slots: impl Iterator<Item = TimeInterval>) -> Vec<String> {
        slots.map(|s| s.start().format("%H:%M").to_string()).collect()
    }

    #[test]
    fn test_slots_step_through_each_free_interval() {
        let service = Service::new("s", "s", 30).unwrap();
        let slots = candidate_slots(&[iv(9, 0, 10, 0), iv(11, 0, 12, 0)], &service, 30).unwrap();
        assert_eq!(starts(slots), vec!["09:00", "09:30", "11:00", "11:30"]);
    }

    #[test]
    fn test_slot_past_interval_end_is_dropped() {
        let service = Service::new("s", "s", 45).unwrap();
        let slots = candidate_slots(&[iv(9, 0, 10, 0)], &service, 30).unwrap();
        // 09:30 + 45 min would end at 10:15.
        assert_eq!(starts(slots), vec!["09:00"]);
    }

    #[test]
    fn test_buffers_shrink_the_usable_window() {
        let service = Service::new("s", "s", 30).unwrap().with_buffers(10, 5);
        let slots: Vec<_> = candidate_slots(&[iv(9, 0, 10, 0)], &service, 15)
            .unwrap()
            .collect();
        // First start leaves room for the 10 min buffer; last must end by 09:55.
        assert_eq!(starts(slots.clone().into_iter()), vec!["09:10", "09:25"]);
        assert_eq!(slots[0].duration_minutes(), 30);
    }

    #[test]
    fn test_interval_too_small_yields_nothing() {
        let service = Service::new("s", "s", 60).unwrap();
        assert_eq!(
            candidate_slots(&[iv(9, 0, 9, 30)], &service, 15)
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn test_zero_granularity_rejected() {
        let service = Service::new("s", "s", 30).unwrap();
        assert!(candidate_slots(&[iv(9, 0, 10, 0)], &service, 0).is_err());
    }

    #[test]
    fn test_restart_replays_the_sequence() {
        let service = Service::new("s", "s", 20).unwrap();
        let mut slots = candidate_slots(&[iv(9, 0, 10, 0)], &service, 20).unwrap();
        let first = slots.next();
        let fresh = slots.restart();
        assert_eq!(fresh.clone().next(), first);
        assert_eq!(fresh.count(), 3);
        assert_eq!(slots.count(), 2);
    }

    #[test]
    fn test_rank_prefers_earliest_then_lowest_id() {
        let ranked = rank_slots(vec![
            (ResourceId::new("b"), chrono_tz::UTC, vec![iv(9, 0, 9, 30), iv(10, 0, 10, 30)]),
            (ResourceId::new("a"), chrono_tz::UTC, vec![iv(10, 0, 10, 30)]),
            (ResourceId::new("c"), chrono_tz::UTC, vec![iv(9, 0, 9, 30)]),
        ]);
        let order: Vec<(String, String)> = ranked
            .iter()
            .map(|s| {
                (
                    s.resource_id.to_string(),
                    s.interval.start().format("%H:%M").to_string(),
                )
            })
            .collect();
        // At 10:00 "b" beats "a" because b's first slot is earlier.
        let expected: Vec<(String, String)> = [("b", "09:00"), ("c", "09:00"), ("b", "10:00"), ("a", "10:00")]
            .iter()
            .map(|(id, t)| (id.to_string(), t.to_string()))
            .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_first_available_per_resource() {
        let ranked = rank_slots(vec![
            (ResourceId::new("a"), chrono_tz::UTC, vec![iv(10, 0, 10, 30), iv(11, 0, 11, 30)]),
            (ResourceId::new("b"), chrono_tz::UTC, vec![iv(9, 0, 9, 30)]),
        ]);
        let firsts = first_available(&ranked);
        assert_eq!(firsts.len(), 2);
        assert_eq!(firsts[0].resource_id, ResourceId::new("b"));
        assert_eq!(firsts[1].interval, iv(10, 0, 10, 30));
    }
}

//! JSON shapes handed to callers outside the process.
//!
//! Instants are rendered as RFC 3339 strings carrying the resource's UTC
//! offset at that instant, so a client can show local times without a
//! timezone database.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::BookingError;
use crate::model::{AppointmentId, ResourceId};
use crate::recurrence::Occurrence;
use crate::slots::RankedSlot;
use crate::temporal::{format_local, format_utc_offset, DstAdjustment};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub resource_id: ResourceId,
    pub start_time: String,
    pub end_time: String,
}

impl From<&RankedSlot> for SlotView {
    fn from(slot: &RankedSlot) -> Self {
        Self {
            resource_id: slot.resource_id.clone(),
            start_time: format_local(slot.interval.start(), &slot.timezone),
            end_time: format_local(slot.interval.end(), &slot.timezone),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceView {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub utc_offset: String,
    pub dst_adjustment: DstAdjustment,
}

impl OccurrenceView {
    pub fn new(occurrence: &Occurrence, tz: &Tz) -> Self {
        let start = occurrence.interval.start();
        Self {
            date: occurrence.date.to_string(),
            start_time: format_local(start, tz),
            end_time: format_local(occurrence.interval.end(), tz),
            utc_offset: format_utc_offset(start, tz),
            dst_adjustment: occurrence.dst_adjustment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorView {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_appointment_ids: Vec<AppointmentId>,
}

impl From<&BookingError> for ErrorView {
    fn from(err: &BookingError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            conflicting_appointment_ids: err.conflicting_ids().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::TimeInterval;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_slot_view_uses_resource_offset() {
        let slot = RankedSlot {
            resource_id: ResourceId::new("dr-lee"),
            timezone: chrono_tz::America::New_York,
            interval: TimeInterval::new(
                Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap(),
            )
            .unwrap(),
        };
        let view = SlotView::from(&slot);
        assert_eq!(view.start_time, "2026-03-02T09:00:00-05:00");
        assert_eq!(view.end_time, "2026-03-02T09:30:00-05:00");
    }

    #[test]
    fn test_occurrence_view_reports_adjustment() {
        let occurrence = Occurrence {
            date: NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
            interval: TimeInterval::new(
                Utc.with_ymd_and_hms(2026, 3, 8, 7, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 3, 8, 7, 30, 0).unwrap(),
            )
            .unwrap(),
            dst_adjustment: DstAdjustment::ShiftedForward,
        };
        let json = serde_json::to_value(OccurrenceView::new(
            &occurrence,
            &chrono_tz::America::New_York,
        ))
        .unwrap();
        assert_eq!(json["start_time"], "2026-03-08T03:00:00-04:00");
        assert_eq!(json["utc_offset"], "-04:00");
        assert_eq!(json["dst_adjustment"], "shifted_forward");
    }

    #[test]
    fn test_error_view_carries_conflicts() {
        let id = AppointmentId::new();
        let view = ErrorView::from(&BookingError::Conflict {
            appointment_ids: vec![id],
        });
        assert_eq!(view.kind, "conflict");
        assert!(!view.retryable);
        assert_eq!(view.conflicting_appointment_ids, vec![id]);

        let json = serde_json::to_value(ErrorView::from(&BookingError::ConcurrencyTimeout(
            "dr-lee".into(),
        )))
        .unwrap();
        assert_eq!(json["retryable"], true);
        assert!(json.get("conflicting_appointment_ids").is_none());
    }
}

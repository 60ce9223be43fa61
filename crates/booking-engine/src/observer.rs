//! Post-commit notifications.
//!
//! Observers run synchronously after a state change has been written and
//! the resource locks released. They cannot veto or undo the change: an
//! observer that returns an error or panics is logged and skipped, and the
//! caller still gets the successful result. Pricing, reminders and audit
//! trails hang off this list.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::interval::TimeInterval;
use crate::model::{Appointment, AppointmentId};
use crate::recurrence::RecurringSeries;

/// Every successful state change produces one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    Committed {
        appointment: Appointment,
        at: DateTime<Utc>,
    },
    Rescheduled {
        /// Service interval before the move.
        previous: TimeInterval,
        appointment: Appointment,
        at: DateTime<Utc>,
    },
    Cancelled {
        appointment: Appointment,
        at: DateTime<Utc>,
    },
    Completed {
        appointment: Appointment,
        at: DateTime<Utc>,
    },
    SeriesCommitted {
        series: RecurringSeries,
        appointment_ids: Vec<AppointmentId>,
        at: DateTime<Utc>,
    },
}

impl BookingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BookingEvent::Committed { .. } => "committed",
            BookingEvent::Rescheduled { .. } => "rescheduled",
            BookingEvent::Cancelled { .. } => "cancelled",
            BookingEvent::Completed { .. } => "completed",
            BookingEvent::SeriesCommitted { .. } => "series_committed",
        }
    }
}

pub trait BookingObserver: Send + Sync {
    fn on_event(&self, event: &BookingEvent) -> anyhow::Result<()>;
}

impl<F> BookingObserver for F
where
    F: Fn(&BookingEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &BookingEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Registered observers, notified in registration order.
#[derive(Default)]
pub struct ObserverList {
    observers: RwLock<Vec<Arc<dyn BookingObserver>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn BookingObserver>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer. Returns how many failed.
    pub fn notify(&self, event: &BookingEvent) -> usize {
        // Observers may register further observers; do not hold the lock
        // while calling out.
        let observers: Vec<Arc<dyn BookingObserver>> = self.observers.read().clone();
        let mut failures = 0;
        for (index, observer) in observers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    warn!(observer = index, event = event.name(), error = %err, "observer failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(observer = index, event = event.name(), "observer panicked");
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.len())
            .finish()
    }
}

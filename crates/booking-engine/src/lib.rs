//! # booking-engine
//!
//! Appointment scheduling for services that book people, rooms and
//! equipment.
//!
//! The engine answers two questions and keeps one promise. It computes when
//! a resource is free (working hours, holidays, existing bookings and their
//! buffers, all in the resource's own timezone), and which discrete slots a
//! service fits into. It promises that a commit never double-books: every
//! write is serialized per resource and re-validated against current data.
//!
//! ## Modules
//!
//! - [`interval`] — Half-open UTC intervals and their set algebra
//! - [`temporal`] — Local time resolution with an explicit DST policy
//! - [`model`] — Resources, services, working hours, holidays, appointments
//! - [`availability`] — Per-resource calendar producing free intervals
//! - [`slots`] — Candidate slot generation and multi-resource ranking
//! - [`conflict`] — Capacity-aware overlap detection
//! - [`recurrence`] — Bounded expansion of repeating bookings, RRULE mapping
//! - [`store`] — Storage trait and the in-memory implementation
//! - [`coordinator`] — Serialized commit, reschedule, cancel and series operations
//! - [`observer`] — Post-commit notifications
//! - [`config`] — Engine tunables
//! - [`clock`] — Injectable source of the current time
//! - [`wire`] — JSON views for callers outside the process
//! - [`error`] — Error types

pub mod availability;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod interval;
pub mod model;
pub mod observer;
pub mod recurrence;
pub mod slots;
pub mod store;
pub mod temporal;
pub mod wire;

pub use availability::AvailabilityCalendar;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use conflict::{check_conflict, peak_concurrency, saturated_spans, ConflictCheck};
pub use coordinator::{CommittedSeries, Metadata, SchedulingCoordinator};
pub use error::BookingError;
pub use interval::{clip, merge, subtract_all, TimeInterval};
pub use model::{
    validate_working_hours, Appointment, AppointmentId, AppointmentStatus, Holiday, HolidayScope,
    RecurrenceId, Resource, ResourceId, ResourceKind, RuleDay, Service, ServiceId,
    WorkingHoursRule,
};
pub use observer::{BookingEvent, BookingObserver, ObserverList};
pub use recurrence::{
    expand, Frequency, Occurrence, Occurrences, RecurrenceEnd, RecurrencePattern, RecurringSeries,
    SeriesAnchor,
};
pub use slots::{candidate_slots, first_available, rank_slots, CandidateSlots, RankedSlot};
pub use store::{InMemoryStore, ScheduleStore, StoreSnapshot};
pub use temporal::DstAdjustment;
pub use wire::{ErrorView, OccurrenceView, SlotView};

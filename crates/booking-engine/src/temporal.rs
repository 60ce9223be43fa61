//! Timezone helpers shared by the calendar and the recurrence expander.
//!
//! Every instant the engine compares is a `DateTime<Utc>`. Local wall-clock
//! values (working hours, series anchors, holidays) only exist at the edges
//! and are resolved here, through an IANA timezone, with an explicit policy
//! for the two DST hazards:
//!
//! - **Gap** (spring forward): the local time does not exist. It is shifted to
//!   the first valid local time after the gap and reported as
//!   [`DstAdjustment::ShiftedForward`].
//! - **Fold** (fall back): the local time exists twice. Starts take the
//!   earlier instant, ends take the later one, and the result is reported as
//!   [`DstAdjustment::Ambiguous`].

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};

/// Longest span probed when walking out of a DST gap.
const MAX_GAP_PROBE_MINUTES: i64 = 24 * 60;

/// How a local wall-clock value was mapped onto the UTC timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DstAdjustment {
    /// The local time mapped to exactly one instant.
    #[default]
    None,
    /// The local time fell into a DST gap and was moved forward.
    ShiftedForward,
    /// The local time occurred twice; one of the two instants was chosen.
    Ambiguous,
}

/// A resolved local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalResolution {
    pub instant: DateTime<Utc>,
    pub adjustment: DstAdjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FoldChoice {
    Earliest,
    Latest,
}

/// Resolve a local start time (earliest instant inside a fold).
pub fn resolve_local_start(tz: &Tz, naive: NaiveDateTime) -> Result<LocalResolution> {
    resolve_local(tz, naive, FoldChoice::Earliest)
}

/// Resolve a local end time (latest instant inside a fold).
pub fn resolve_local_end(tz: &Tz, naive: NaiveDateTime) -> Result<LocalResolution> {
    resolve_local(tz, naive, FoldChoice::Latest)
}

fn resolve_local(
    tz: &Tz,
    naive: NaiveDateTime,
    fold: FoldChoice,
) -> Result<LocalResolution> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(LocalResolution {
            instant: dt.with_timezone(&Utc),
            adjustment: DstAdjustment::None,
        }),
        LocalResult::Ambiguous(earliest, latest) => {
            let chosen = match fold {
                FoldChoice::Earliest => earliest,
                FoldChoice::Latest => latest,
            };
            Ok(LocalResolution {
                instant: chosen.with_timezone(&Utc),
                adjustment: DstAdjustment::Ambiguous,
            })
        }
        LocalResult::None => {
            // Walk forward minute by minute; the first local time that exists
            // is the transition instant itself.
            for minutes in 1..=MAX_GAP_PROBE_MINUTES {
                let probe = naive + Duration::minutes(minutes);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return Ok(LocalResolution {
                        instant: dt.with_timezone(&Utc),
                        adjustment: DstAdjustment::ShiftedForward,
                    });
                }
            }
            Err(BookingError::InvalidInput(format!(
                "local time {naive} does not exist in {tz}"
            )))
        }
    }
}

/// The instant a local calendar day begins.
pub fn local_day_start(tz: &Tz, date: NaiveDate) -> Result<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
        BookingError::InvalidInput(format!("cannot build midnight for {date}"))
    })?;
    Ok(resolve_local_start(tz, midnight)?.instant)
}

/// Parse an RFC 3339 datetime string into `DateTime<Utc>`.
pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BookingError::InvalidInput(format!("datetime '{}': {}", s, e)))
}

/// Render an instant as RFC 3339 with the timezone's offset at that instant.
pub fn format_local(instant: DateTime<Utc>, tz: &Tz) -> String {
    instant.with_timezone(tz).to_rfc3339()
}

/// Format the UTC offset as a string (e.g., "-05:00", "+09:00").
pub fn format_utc_offset(instant: DateTime<Utc>, tz: &Tz) -> String {
    let offset_secs = instant.with_timezone(tz).offset().fix().local_minus_utc();
    let sign = if offset_secs >= 0 { "+" } else { "-" };
    let abs_secs = offset_secs.unsigned_abs();
    let hours = abs_secs / 3600;
    let minutes = (abs_secs % 3600) / 60;
    format!("{sign}{hours:02}:{minutes:02}")
}

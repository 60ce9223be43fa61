//! Half-open time intervals and the set algebra the calendar is built from.
//!
//! A [`TimeInterval`] is `[start, end)` on the UTC timeline with
//! `start < end`. The only way to build one from outside the crate is
//! [`TimeInterval::new`] (or deserialization, which goes through it), so
//! an empty or inverted interval never reaches the scheduling code.
//!
//! The free functions operate on sequences:
//!
//! - [`merge`] — union into sorted, disjoint, non-touching intervals
//! - [`subtract_all`] — remove one set of intervals from another
//! - [`clip`] — intersect every interval with a range

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};
use crate::temporal::local_day_start;

/// A half-open `[start, end)` range of UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct TimeInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawInterval> for TimeInterval {
    type Error = BookingError;

    fn try_from(raw: RawInterval) -> Result<Self> {
        TimeInterval::new(raw.start, raw.end)
    }
}

/// ISO 8601 interval notation, `start/end`.
impl std::fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

impl TimeInterval {
    /// Build an interval from two instants in any timezone.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidInterval`] unless `start < end`.
    pub fn new<A: TimeZone, B: TimeZone>(
        start: DateTime<A>,
        end: DateTime<B>,
    ) -> Result<Self> {
        let start = start.with_timezone(&Utc);
        let end = end.with_timezone(&Utc);
        if start >= end {
            return Err(BookingError::InvalidInterval(format!(
                "start {} is not before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// An interval of `length` beginning at `start`.
    pub fn starting_at(start: DateTime<Utc>, length: Duration) -> Result<Self> {
        Self::new(start, start + length)
    }

    /// Internal constructor for bounds already known to be ordered.
    pub(crate) fn from_ordered(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "interval bounds out of order");
        Self { start, end }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    /// `a.start < b.end && b.start < a.end`. Touching intervals do not overlap.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersect(&self, other: &TimeInterval) -> Option<TimeInterval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then(|| TimeInterval::from_ordered(start, end))
    }

    /// The parts of `self` not covered by `other` (zero, one or two pieces).
    pub fn subtract(&self, other: &TimeInterval) -> Vec<TimeInterval> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut pieces = Vec::with_capacity(2);
        if self.start < other.start {
            pieces.push(TimeInterval::from_ordered(self.start, other.start));
        }
        if other.end < self.end {
            pieces.push(TimeInterval::from_ordered(other.end, self.end));
        }
        pieces
    }

    /// Extend the interval by `before` on the left and `after` on the right.
    ///
    /// Negative durations are treated as zero.
    pub fn widen(&self, before: Duration, after: Duration) -> TimeInterval {
        let before = before.max(Duration::zero());
        let after = after.max(Duration::zero());
        TimeInterval::from_ordered(self.start - before, self.end + after)
    }

    /// Cut the interval at every local midnight of `tz` it spans.
    ///
    /// Each returned piece lies within a single local calendar day.
    pub fn split_at_local_midnights(&self, tz: &Tz) -> Result<Vec<TimeInterval>> {
        let mut pieces = Vec::new();
        let mut cursor = self.start;
        let mut date = self.start.with_timezone(tz).date_naive();
        while cursor < self.end {
            let next_date = date.succ_opt().ok_or_else(|| {
                BookingError::InvalidInterval(format!("no day after {date}"))
            })?;
            let boundary = local_day_start(tz, next_date)?.min(self.end);
            if cursor < boundary {
                pieces.push(TimeInterval::from_ordered(cursor, boundary));
                cursor = boundary;
            }
            date = next_date;
        }
        Ok(pieces)
    }
}

/// Union intervals into ascending, disjoint intervals.
///
/// Overlapping and touching intervals are coalesced, so
/// `[09:00, 12:00)` and `[12:00, 17:00)` become `[09:00, 17:00)`.
pub fn merge<I>(intervals: I) -> Vec<TimeInterval>
where
    I: IntoIterator<Item = TimeInterval>,
{
    let mut sorted: Vec<TimeInterval> = intervals.into_iter().collect();
    sorted.sort();

    let mut merged: Vec<TimeInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                if interval.end > last.end {
                    last.end = interval.end;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Remove every interval in `removals` from `base`.
///
/// Both inputs may be unsorted and overlapping; the result is merged.
pub fn subtract_all(base: &[TimeInterval], removals: &[TimeInterval]) -> Vec<TimeInterval> {
    let base = merge(base.iter().copied());
    let removals = merge(removals.iter().copied());

    let mut result = Vec::with_capacity(base.len());
    let mut r = 0;
    for interval in base {
        let mut remaining = Some(interval);
        // Skip removals that end before this interval starts.
        while r < removals.len() && removals[r].end <= interval.start {
            r += 1;
        }
        let mut k = r;
        while let Some(current) = remaining {
            if k >= removals.len() || removals[k].start >= current.end {
                result.push(current);
                break;
            }
            let cut = removals[k];
            if current.start < cut.start {
                result.push(TimeInterval::from_ordered(current.start, cut.start));
            }
            remaining = (cut.end < current.end)
                .then(|| TimeInterval::from_ordered(cut.end.max(current.start), current.end));
            k += 1;
        }
    }
    result
}

/// Intersect every interval with `range`, dropping the ones outside it.
pub fn clip(intervals: &[TimeInterval], range: &TimeInterval) -> Vec<TimeInterval> {
    intervals
        .iter()
        .filter_map(|interval| interval.intersect(range))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn iv(sh: u32, sm: u32, eh: u32, em: u32) -> TimeInterval {
        TimeInterval::new(at(sh, sm), at(eh, em)).unwrap()
    }

    #[test]
    fn test_new_rejects_empty_and_inverted() {
        assert!(matches!(
            TimeInterval::new(at(10, 0), at(10, 0)),
            Err(BookingError::InvalidInterval(_))
        ));
        assert!(TimeInterval::new(at(11, 0), at(10, 0)).is_err());
    }

    #[test]
    fn test_new_normalizes_offsets_to_utc() {
        let start = chrono::DateTime::parse_from_rfc3339("2026-03-02T10:00:00+02:00").unwrap();
        let end = chrono::DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z").unwrap();
        let interval = TimeInterval::new(start, end).unwrap();
        assert_eq!(interval.start(), at(8, 0));
        assert_eq!(interval.duration_minutes(), 60);
    }

    #[test]
    fn test_touching_intervals_do_not_overlap() {
        assert!(!iv(9, 0, 10, 0).overlaps(&iv(10, 0, 11, 0)));
        assert!(iv(9, 0, 10, 1).overlaps(&iv(10, 0, 11, 0)));
    }

    #[test]
    fn test_subtract_middle_leaves_two_pieces() {
        let pieces = iv(9, 0, 17, 0).subtract(&iv(10, 0, 11, 0));
        assert_eq!(pieces, vec![iv(9, 0, 10, 0), iv(11, 0, 17, 0)]);
    }

    #[test]
    fn test_subtract_covering_leaves_nothing() {
        assert!(iv(10, 0, 11, 0).subtract(&iv(9, 0, 12, 0)).is_empty());
    }

    #[test]
    fn test_merge_coalesces_overlapping_and_touching() {
        let merged = merge(vec![iv(12, 0, 17, 0), iv(9, 0, 10, 0), iv(9, 30, 12, 0)]);
        assert_eq!(merged, vec![iv(9, 0, 17, 0)]);
    }

    #[test]
    fn test_merge_keeps_gaps() {
        let merged = merge(vec![iv(13, 0, 14, 0), iv(9, 0, 10, 0)]);
        assert_eq!(merged, vec![iv(9, 0, 10, 0), iv(13, 0, 14, 0)]);
    }

    #[test]
    fn test_subtract_all_multiple_cuts() {
        let free = subtract_all(
            &[iv(9, 0, 17, 0)],
            &[iv(10, 0, 11, 0), iv(12, 0, 12, 30), iv(16, 30, 18, 0)],
        );
        assert_eq!(
            free,
            vec![iv(9, 0, 10, 0), iv(11, 0, 12, 0), iv(12, 30, 16, 30)]
        );
    }

    #[test]
    fn test_subtract_all_removal_spanning_two_bases() {
        let free = subtract_all(&[iv(9, 0, 12, 0), iv(13, 0, 17, 0)], &[iv(11, 0, 14, 0)]);
        assert_eq!(free, vec![iv(9, 0, 11, 0), iv(14, 0, 17, 0)]);
    }

    #[test]
    fn test_clip_to_range() {
        let clipped = clip(&[iv(8, 0, 10, 0), iv(16, 0, 18, 0)], &iv(9, 0, 17, 0));
        assert_eq!(clipped, vec![iv(9, 0, 10, 0), iv(16, 0, 17, 0)]);
    }

    #[test]
    fn test_widen_applies_buffers() {
        let widened = iv(10, 0, 10, 30).widen(Duration::minutes(10), Duration::minutes(5));
        assert_eq!(widened, iv(9, 50, 10, 35));
    }

    #[test]
    fn test_split_at_local_midnights() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        // 22:00 to 02:00 Berlin time (UTC+1 in March before DST) = 21:00Z to 01:00Z.
        let overnight = TimeInterval::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 21, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 3, 1, 0, 0).unwrap(),
        )
        .unwrap();
        let pieces = overnight.split_at_local_midnights(&tz).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].end(), Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap());
        assert_eq!(pieces[1].start(), pieces[0].end());
        assert_eq!(pieces[1].end(), overnight.end());
    }

    #[test]
    fn test_deserialize_rejects_inverted() {
        let json = r#"{"start":"2026-03-02T10:00:00Z","end":"2026-03-02T09:00:00Z"}"#;
        assert!(serde_json::from_str::<TimeInterval>(json).is_err());
        let ok = r#"{"start":"2026-03-02T09:00:00Z","end":"2026-03-02T10:00:00Z"}"#;
        assert_eq!(serde_json::from_str::<TimeInterval>(ok).unwrap(), iv(9, 0, 10, 0));
    }
}

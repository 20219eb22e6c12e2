//! Next/last occurrence arithmetic.
//!
//! All functions here are pure and synchronous. The schedule of an item is the
//! sequence `anchor, anchor + 1*interval, anchor + 2*interval, ...`; each step
//! is computed from the anchor rather than from the previous step, so month
//! clamping (Jan 31 -> Feb 29) never accumulates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::Interval;

/// Result of [`compute_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub next_due: DateTime<Utc>,
    /// `None` when the first occurrence is still in the future.
    pub effective_last: Option<DateTime<Utc>>,
}

/// How to move an overdue item forward when it is finally performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReschedulePolicy {
    /// Next due is one interval after "now".
    FromNow,
    /// Keep the original cadence; skip every missed slot.
    FromOriginal,
}

/// First point of the sequence strictly after `now`, plus the one before it.
///
/// Returns `(previous, next)`; `previous` is `anchor` itself when the first
/// step already lands after `now`. `None` when `anchor > now` or the interval
/// cannot advance (degenerate or out of range).
pub fn step_past(
    anchor: DateTime<Utc>,
    interval: Interval,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if anchor > now || interval.amount() == 0 {
        return None;
    }
    if matches!(interval.fixed_seconds(), Some(secs) if secs <= 0) {
        return None;
    }

    let mut k = initial_steps(anchor, interval, now);
    let mut candidate = interval.advance(anchor, k)?;
    // The estimate is exact for fixed units; months may land one step either side.
    while k > 1 {
        let prev = interval.advance(anchor, k - 1)?;
        if prev > now {
            k -= 1;
            candidate = prev;
        } else {
            break;
        }
    }
    while candidate <= now {
        k = k.checked_add(1)?;
        candidate = interval.advance(anchor, k)?;
    }

    let previous = if k <= 1 {
        anchor
    } else {
        interval.advance(anchor, k - 1)?
    };
    Some((previous, candidate))
}

fn initial_steps(anchor: DateTime<Utc>, interval: Interval, now: DateTime<Utc>) -> u32 {
    let estimate = match interval.fixed_seconds() {
        Some(secs) if secs > 0 => (now - anchor).num_seconds() / secs + 1,
        Some(_) => 1,
        None => {
            let months = months_between(anchor, now);
            months / i64::from(interval.amount()).max(1)
        }
    };
    u32::try_from(estimate.max(1)).unwrap_or(u32::MAX)
}

fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    use chrono::Datelike;
    let (a, b) = (from.date_naive(), to.date_naive());
    (i64::from(b.year()) - i64::from(a.year())) * 12 + i64::from(b.month()) - i64::from(a.month())
}

/// Next due time for a schedule declared to start at `start`.
///
/// A future start is the next occurrence and nothing has been performed yet.
/// Otherwise `start` counts as the last occurrence and the catch-up loop
/// finds the first slot strictly after `now`.
pub fn compute_next(start: DateTime<Utc>, interval: Interval, now: DateTime<Utc>) -> Occurrence {
    if start > now {
        return Occurrence {
            next_due: start,
            effective_last: None,
        };
    }

    match step_past(start, interval, now) {
        Some((_, next_due)) => Occurrence {
            next_due,
            effective_last: Some(start),
        },
        None => {
            tracing::warn!(%start, %interval, "interval cannot advance; pinning next due to start");
            Occurrence {
                next_due: start,
                effective_last: Some(start),
            }
        }
    }
}

/// Exactly one interval after an explicit perform event, even if that is
/// still in the past.
pub fn compute_after_perform(performed_at: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    interval.advance(performed_at, 1).unwrap_or(performed_at)
}

/// New next-due for an item marked done after its due time passed.
pub fn compute_overdue_reschedule(
    original_next_due: DateTime<Utc>,
    interval: Interval,
    now: DateTime<Utc>,
    policy: ReschedulePolicy,
) -> DateTime<Utc> {
    match policy {
        ReschedulePolicy::FromNow => compute_after_perform(now, interval),
        ReschedulePolicy::FromOriginal => step_past(original_next_due, interval, now)
            .map(|(_, next)| next)
            .unwrap_or(original_next_due),
    }
}

/// Perform time for an overdue item such that one interval after it lands
/// where `policy` wants the next due time.
///
/// Returns `(performed_at, lands_on)`. `FromOriginal` uses the last slot of
/// the original cadence not after `now`. After month-end clamping no perform
/// time reaches the target (Jan 31 monthly, caught up in early March: nothing
/// in February plus one month is Mar 31); the clamped slot is still used, so
/// `lands_on` may fall short of [`compute_overdue_reschedule`].
pub fn overdue_perform_time(
    original_next_due: DateTime<Utc>,
    interval: Interval,
    now: DateTime<Utc>,
    policy: ReschedulePolicy,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let performed_at = match policy {
        ReschedulePolicy::FromNow => now,
        ReschedulePolicy::FromOriginal => step_past(original_next_due, interval, now)
            .map(|(prev, _)| prev)
            .unwrap_or(now),
    };
    (performed_at, compute_after_perform(performed_at, interval))
}

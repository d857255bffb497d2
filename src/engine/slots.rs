use chrono::Duration;

use crate::model::{Slot, TimeRange};

// ── Slot Grid Algorithm ──────────────────────────────────────────

/// Walk the working window in `granularity_min` steps and flag each
/// candidate start against the service's real footprint.
///
/// The grid step and the occupancy width are independent: candidates always
/// advance by the display granularity, but each one is checked as
/// `[start, start + duration_min)`. A 90-minute service on a 60-minute grid
/// therefore blocks one and a half display slots.
///
/// Rules, in order, per candidate `s`:
/// - the loop never emits a candidate at or past `window.end`;
/// - if `s + duration` overruns `window.end`, the slot is unavailable no
///   matter what is booked (the service cannot finish inside the window);
/// - otherwise it is available iff its occupancy window overlaps none of
///   `busy` (half-open, so touching an existing booking is fine).
///
/// `busy` is the caller's pre-fetched list of occupied ranges; the function
/// itself is pure and deterministic.
pub fn slot_grid(
    window: TimeRange,
    granularity_min: u32,
    duration_min: u32,
    busy: &[TimeRange],
) -> Vec<Slot> {
    if granularity_min == 0 {
        return Vec::new();
    }
    let step = Duration::minutes(granularity_min as i64);
    let duration = Duration::minutes(duration_min as i64);

    let mut slots = Vec::new();
    let mut cursor = window.start;
    while cursor < window.end {
        let occupancy = TimeRange::new(cursor, cursor + duration);
        let is_available = if occupancy.end > window.end {
            false
        } else {
            !busy.iter().any(|b| occupancy.overlaps(b))
        };
        slots.push(Slot {
            time: cursor.time(),
            is_available,
        });
        cursor += step;
    }
    slots
}

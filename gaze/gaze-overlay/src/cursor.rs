//! Forward-only lookup of the events and gaze samples active at a sequence of
//! non-decreasing query times.

use gaze_types::{GazePoint, Sample, TimeInterval};

/// Finds the event active at each query time in a list sorted by start with
/// no overlapping events.
///
/// Queries must not decrease. Each event is passed over at most once, so a
/// full pass over `n` events and `m` queries costs `O(n + m)`.
pub struct EventCursor<'a, T> {
    events: &'a [T],
    pos: usize,
    last_query: f64,
}

impl<'a, T: TimeInterval> EventCursor<'a, T> {
    pub fn new(events: &'a [T]) -> Self {
        Self {
            events,
            pos: 0,
            last_query: f64::NEG_INFINITY,
        }
    }

    /// Return the event whose inclusive `[start, end]` contains `t`.
    pub fn advance(&mut self, t: f64) -> Option<&'a T> {
        debug_assert!(t >= self.last_query, "query time went backward");
        self.last_query = t;
        // Ends are sorted because events do not overlap.
        while let Some(ev) = self.events.get(self.pos) {
            if (ev.end() as f64) < t {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.events.get(self.pos).filter(|ev| ev.contains(t))
    }
}

/// Gaze position at query times, linearly interpolated between neighboring
/// valid samples.
pub struct SampleCursor<'a> {
    samples: &'a [Sample],
    /// index of the last sample at or before the previous query
    pos: usize,
    max_gap_ms: i64,
}

impl<'a> SampleCursor<'a> {
    /// `samples` must be sorted by time. Interpolation is skipped across
    /// gaps longer than `max_gap_ms`.
    pub fn new(samples: &'a [Sample], max_gap_ms: i64) -> Self {
        Self {
            samples,
            pos: 0,
            max_gap_ms,
        }
    }

    pub fn gaze_at(&mut self, t: f64) -> Option<GazePoint> {
        while let Some(next) = self.samples.get(self.pos + 1) {
            if next.time as f64 <= t {
                self.pos += 1;
            } else {
                break;
            }
        }
        let before = self.samples.get(self.pos)?;
        let before_time = before.time as f64;
        if before_time > t {
            return None;
        }
        if before_time == t {
            return before.is_valid().then(|| before.point());
        }
        let after = self.samples.get(self.pos + 1)?;
        if !before.is_valid() || !after.is_valid() || after.time - before.time > self.max_gap_ms {
            return None;
        }
        let frac = (t - before_time) / (after.time - before.time) as f64;
        Some(GazePoint::new(
            before.x + frac * (after.x - before.x),
            before.y + frac * (after.y - before.y),
        ))
    }
}

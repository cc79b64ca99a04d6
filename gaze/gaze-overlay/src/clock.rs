//! Map video time onto the tracker clock using the screen recording sync
//! messages.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gaze_types::{Message, SCREEN_REC_END_PREFIX, SCREEN_REC_START_PREFIX};

/// How sync messages are matched to the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerMatching {
    /// Prefer messages containing the token, otherwise use the outermost
    /// start and end messages.
    #[default]
    Lenient,
    /// Only accept messages containing the token.
    Strict,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("missing sync markers: no message with prefix \"{prefix}\"")]
    MissingMarker { prefix: &'static str },
    #[error("missing sync markers: no message with prefix \"{prefix}\" contains token \"{token}\"")]
    NoTokenMatch { prefix: &'static str, token: String },
    #[error("sync marker end time {end} is not after start time {start}")]
    EndNotAfterStart { start: i64, end: i64 },
}

/// Linear map from video time to tracker time.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockAlignment {
    /// tracker time (ms) of the first video frame
    pub origin_time: f64,
    /// tracker clock span (ms) of the whole video
    pub duration: f64,
    pub start_marker: Message,
    pub end_marker: Message,
    /// True if a marker was chosen without matching the session token.
    pub degraded: bool,
}

impl ClockAlignment {
    /// Tracker time for `t` in `[0, video_duration]`, in any unit as long as
    /// both use the same one.
    pub fn tracker_time_at(&self, t: f64, video_duration: f64) -> f64 {
        if video_duration <= 0.0 {
            return self.origin_time;
        }
        self.origin_time + self.duration * (t / video_duration)
    }

    /// Tracker time of frame `frame_index` of `total_frames`.
    ///
    /// The first frame maps to `origin_time` and the last frame to
    /// `origin_time + duration`.
    pub fn tracker_time_for_frame(&self, frame_index: usize, total_frames: usize) -> f64 {
        if total_frames <= 1 {
            return self.origin_time;
        }
        self.tracker_time_at(frame_index as f64, (total_frames - 1) as f64)
    }
}

#[derive(Clone, Copy)]
enum Pick {
    First,
    Last,
}

/// Select the marker message with `prefix`. Returns the message and whether
/// the choice was a fallback.
fn find_marker<'a>(
    messages: &'a [Message],
    prefix: &'static str,
    token: &str,
    pick: Pick,
    matching: MarkerMatching,
) -> Result<(&'a Message, bool), AlignmentError> {
    let candidates: Vec<&Message> = messages
        .iter()
        .filter(|m| m.text.contains(prefix))
        .collect();
    let choose = |v: &[&'a Message]| -> Option<&'a Message> {
        match pick {
            Pick::First => v.iter().min_by_key(|m| m.time).copied(),
            Pick::Last => v.iter().max_by_key(|m| m.time).copied(),
        }
    };

    let token_matches: Vec<&Message> = candidates
        .iter()
        .filter(|m| m.text.contains(token))
        .copied()
        .collect();
    if let Some(msg) = choose(&token_matches) {
        return Ok((msg, false));
    }

    if candidates.is_empty() {
        return Err(AlignmentError::MissingMarker { prefix });
    }
    if matching == MarkerMatching::Strict {
        return Err(AlignmentError::NoTokenMatch {
            prefix,
            token: token.to_string(),
        });
    }
    // Not empty, so a message is always chosen.
    let msg = choose(&candidates).ok_or(AlignmentError::MissingMarker { prefix })?;
    warn!(
        "no \"{prefix}\" message contains token \"{token}\", degraded match on \"{}\" at {}",
        msg.text, msg.time
    );
    Ok((msg, true))
}

/// Find the sync messages bracketing the recording `token`.
pub fn align(
    messages: &[Message],
    token: &str,
    matching: MarkerMatching,
) -> Result<ClockAlignment, AlignmentError> {
    let (start, start_degraded) =
        find_marker(messages, SCREEN_REC_START_PREFIX, token, Pick::First, matching)?;
    let (end, end_degraded) =
        find_marker(messages, SCREEN_REC_END_PREFIX, token, Pick::Last, matching)?;
    if end.time <= start.time {
        return Err(AlignmentError::EndNotAfterStart {
            start: start.time,
            end: end.time,
        });
    }
    let alignment = ClockAlignment {
        origin_time: start.time as f64,
        duration: (end.time - start.time) as f64,
        start_marker: start.clone(),
        end_marker: end.clone(),
        degraded: start_degraded || end_degraded,
    };
    debug!(
        "aligned token \"{token}\": origin {} ms, duration {} ms",
        alignment.origin_time, alignment.duration
    );
    Ok(alignment)
}

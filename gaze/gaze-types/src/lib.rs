use serde::{Deserialize, Serialize};

/// Gaze coordinates below this value mean the tracker lost the eye.
pub const SENTINEL_THRESHOLD: f64 = -10000.0;

/// The value written by the tracker for a missing gaze coordinate.
pub const MISSING_VALUE: f64 = -32768.0;

/// Prefix of the message emitted when a screen recording starts.
pub const SCREEN_REC_START_PREFIX: &str = "SCREEN_REC_START_";

/// Prefix of the message emitted when a screen recording stops.
pub const SCREEN_REC_END_PREFIX: &str = "SCREEN_REC_END_";

/// Text of the sync message sent when the recording `token` starts.
pub fn start_marker(token: &str) -> String {
    format!("{SCREEN_REC_START_PREFIX}{token}")
}

/// Text of the sync message sent when the recording `token` stops.
pub fn end_marker(token: &str) -> String {
    format!("{SCREEN_REC_END_PREFIX}{token}")
}

/// Return true if `value` is a usable gaze coordinate.
#[inline]
pub fn is_valid_coord(value: f64) -> bool {
    value.is_finite() && value >= SENTINEL_THRESHOLD
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("unknown eye \"{0}\", expected \"left\" or \"right\"")]
pub struct UnknownEye(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub fn as_str(&self) -> &'static str {
        match self {
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

impl std::fmt::Display for Eye {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Eye {
    type Err = UnknownEye;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Eye::Left),
            "right" => Ok(Eye::Right),
            _ => Err(UnknownEye(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazePoint {
    pub x: f64,
    pub y: f64,
}

impl GazePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
    pub fn is_valid(&self) -> bool {
        is_valid_coord(self.x) && is_valid_coord(self.y)
    }
}

/// A single gaze sample of one eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// tracker clock, milliseconds
    pub time: i64,
    pub x: f64,
    pub y: f64,
    pub eye: Eye,
}

impl Sample {
    pub fn is_valid(&self) -> bool {
        self.point().is_valid()
    }
    pub fn point(&self) -> GazePoint {
        GazePoint::new(self.x, self.y)
    }
}

/// An event spanning the inclusive tracker clock interval `[start, end]`.
pub trait TimeInterval {
    fn start(&self) -> i64;
    fn end(&self) -> i64;

    fn duration(&self) -> i64 {
        self.end() - self.start()
    }

    /// Inclusive on both ends.
    fn contains(&self, t: f64) -> bool {
        self.start() as f64 <= t && t <= self.end() as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fixation {
    pub eye: Eye,
    pub start: i64,
    pub end: i64,
    /// mean gaze position during the fixation
    pub x: f64,
    pub y: f64,
}

impl TimeInterval for Fixation {
    fn start(&self) -> i64 {
        self.start
    }
    fn end(&self) -> i64 {
        self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Saccade {
    pub eye: Eye,
    pub start: i64,
    pub end: i64,
    pub start_x: f64,
    pub start_y: f64,
    pub end_x: f64,
    pub end_y: f64,
}

impl Saccade {
    pub fn start_point(&self) -> GazePoint {
        GazePoint::new(self.start_x, self.start_y)
    }
    pub fn end_point(&self) -> GazePoint {
        GazePoint::new(self.end_x, self.end_y)
    }
}

impl TimeInterval for Saccade {
    fn start(&self) -> i64 {
        self.start
    }
    fn end(&self) -> i64 {
        self.end
    }
}

/// A text message in the tracker's message stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub time: i64,
    pub text: String,
}

// ---- CSV rows of the gaze archive ----

/// Row of `samples.csv`. Empty cells are missing coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRow {
    pub time: i64,
    pub gx_left: Option<f64>,
    pub gy_left: Option<f64>,
    pub gx_right: Option<f64>,
    pub gy_right: Option<f64>,
}

impl SampleRow {
    pub const COLUMNS: &'static [&'static str] =
        &["time", "gx_left", "gy_left", "gx_right", "gy_right"];
}

/// Row of `events.csv`.
///
/// Fixations use `gavx`, `gavy`. Saccades use `gstx`, `gsty`, `genx`,
/// `geny`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRow {
    #[serde(rename = "type")]
    pub kind: String,
    pub eye: String,
    pub start: i64,
    pub end: i64,
    pub gavx: Option<f64>,
    pub gavy: Option<f64>,
    pub gstx: Option<f64>,
    pub gsty: Option<f64>,
    pub genx: Option<f64>,
    pub geny: Option<f64>,
}

impl EventRow {
    pub const COLUMNS: &'static [&'static str] = &[
        "type", "eye", "start", "end", "gavx", "gavy", "gstx", "gsty", "genx", "geny",
    ];
}

impl From<&Fixation> for EventRow {
    fn from(f: &Fixation) -> Self {
        Self {
            kind: "fixation".into(),
            eye: f.eye.to_string(),
            start: f.start,
            end: f.end,
            gavx: Some(f.x),
            gavy: Some(f.y),
            ..Default::default()
        }
    }
}

impl From<&Saccade> for EventRow {
    fn from(s: &Saccade) -> Self {
        Self {
            kind: "saccade".into(),
            eye: s.eye.to_string(),
            start: s.start,
            end: s.end,
            gstx: Some(s.start_x),
            gsty: Some(s.start_y),
            genx: Some(s.end_x),
            geny: Some(s.end_y),
            ..Default::default()
        }
    }
}

/// Row of `messages.csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub time: i64,
    pub message: String,
}

impl MessageRow {
    pub const COLUMNS: &'static [&'static str] = &["time", "message"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_parse() {
        assert_eq!("left".parse::<Eye>(), Ok(Eye::Left));
        assert_eq!("RIGHT".parse::<Eye>(), Ok(Eye::Right));
        assert_eq!("up".parse::<Eye>(), Err(UnknownEye("up".into())));
        assert!("".parse::<Eye>().is_err());
    }

    #[test]
    fn test_sentinel() {
        assert!(is_valid_coord(0.0));
        assert!(is_valid_coord(-10000.0));
        assert!(!is_valid_coord(-10000.5));
        assert!(!is_valid_coord(MISSING_VALUE));
        assert!(!is_valid_coord(f64::NAN));
        assert!(!is_valid_coord(f64::INFINITY));
    }

    #[test]
    fn test_interval_is_inclusive() {
        let fix = Fixation {
            eye: Eye::Left,
            start: 10,
            end: 20,
            x: 0.0,
            y: 0.0,
        };
        assert!(!fix.contains(9.999));
        assert!(fix.contains(10.0));
        assert!(fix.contains(20.0));
        assert!(!fix.contains(20.001));
        assert_eq!(fix.duration(), 10);
    }

    #[test]
    fn test_markers() {
        assert_eq!(start_marker("sess1"), "SCREEN_REC_START_sess1");
        assert_eq!(end_marker("sess1"), "SCREEN_REC_END_sess1");
    }

    #[test]
    fn test_eye_serde() {
        assert_eq!(serde_json::to_string(&Eye::Right).unwrap(), "\"right\"");
        let eye: Eye = serde_json::from_str("\"left\"").unwrap();
        assert_eq!(eye, Eye::Left);
    }
}

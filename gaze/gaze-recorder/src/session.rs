use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::{DateTime, Local};
use regex::Regex;

use crate::{Error, Result};

// Sync messages are split on whitespace by the tracker software.
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Token of a session started at `now`: `screen_YYYYmmdd_HHMMSS`.
pub fn new_session_token(now: &DateTime<Local>) -> String {
    now.format("screen_%Y%m%d_%H%M%S").to_string()
}

pub fn validate_session_token(token: &str) -> Result<()> {
    if TOKEN_RE.is_match(token) {
        Ok(())
    } else {
        Err(Error::InvalidSessionToken(token.to_string()))
    }
}

/// Name of the data file on the tracker host.
///
/// The host only accepts DOS 8.3 names, so this is day, hour, minute and
/// second: `ddHHMMSS.edf`.
pub fn host_data_file_name(now: &DateTime<Local>) -> String {
    now.format("%d%H%M%S.edf").to_string()
}

/// One start/stop cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSession {
    /// Embedded in both sync messages.
    pub token: String,
    pub started: DateTime<Local>,
    /// Data file name on the tracker host.
    pub host_data_file: String,
    pub video_path: PathBuf,
    /// Where the tracker data is transferred to.
    pub gaze_data_path: PathBuf,
}

impl RecordingSession {
    /// Lay out the files of session `token` in `dir`.
    pub fn new(token: String, started: DateTime<Local>, dir: &Path) -> Result<Self> {
        validate_session_token(&token)?;
        Ok(Self {
            host_data_file: host_data_file_name(&started),
            video_path: dir.join(format!("{token}.mp4")),
            gaze_data_path: dir.join(format!("{token}.zip")),
            token,
            started,
        })
    }

    pub fn start_marker(&self) -> String {
        gaze_types::start_marker(&self.token)
    }

    pub fn end_marker(&self) -> String {
        gaze_types::end_marker(&self.token)
    }
}

//! Capture a screen recording while an eye tracker records gaze, then overlay
//! the gaze onto the recording.
//!
//! A [RecordingController] owns one [TrackerDriver], one [ScreenCapture] and
//! one [SessionProcessor]. Each start/stop cycle is a [RecordingSession] with
//! its own token. The token is embedded in the `SCREEN_REC_START_<token>` and
//! `SCREEN_REC_END_<token>` messages so the recording can be aligned with the
//! tracker clock afterwards.

use std::{path::PathBuf, time::Duration};

mod capture;
mod config;
mod controller;
mod processor;
mod session;
mod tracker;

pub use capture::{CaptureSummary, FrameGrabber, ScreenCapture, ScreenRecorder, WriterFactory};
pub use config::{CAPTURE_FPS_RANGE, OverlaySettings, RecorderConfig};
pub use controller::{ControllerState, ProcessedSession, RecordingController};
pub use processor::{OverlayProcessor, SessionProcessor};
pub use session::{RecordingSession, host_data_file_name, new_session_token, validate_session_token};
pub use tracker::{DummyTracker, Marker, MarkerKind, RECORDING_FILTER_COMMANDS, TrackerDriver};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },
    #[error("tracker error: {0}")]
    Tracker(String),
    #[error("screen capture did not stop within {0:?}")]
    CaptureTimeout(Duration),
    #[error("screen capture error: {0}")]
    Capture(String),
    #[error("overlay error: {0}")]
    Overlay(#[from] gaze_overlay::Error),
    #[error("invalid session token \"{0}\"")]
    InvalidSessionToken(String),
    #[error("session output \"{0}\" already exists")]
    SessionExists(PathBuf),
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("gaze archive error: {0}")]
    GazeArchive(#[from] gaze_parser::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

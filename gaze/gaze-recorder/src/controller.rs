//! The start/stop state machine of a recording session.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::{
    CaptureSummary, Error, Marker, RECORDING_FILTER_COMMANDS, RecorderConfig, RecordingSession,
    Result, ScreenCapture, SessionProcessor, TrackerDriver, new_session_token,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    Idle,
    Recording(RecordingSession),
    /// Producers stopped, output being transferred and processed.
    Processing(RecordingSession),
}

impl ControllerState {
    fn name(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Recording(_) => "recording",
            ControllerState::Processing(_) => "processing",
        }
    }
}

/// Result of a complete start/stop cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSession {
    pub session: RecordingSession,
    pub capture: CaptureSummary,
    /// What the processor produced.
    pub output: PathBuf,
}

pub struct RecordingController<T, C, P> {
    config: RecorderConfig,
    tracker: T,
    capture: C,
    processor: P,
    connected: bool,
    state: ControllerState,
}

impl<T, C, P> RecordingController<T, C, P>
where
    T: TrackerDriver,
    C: ScreenCapture,
    P: SessionProcessor,
{
    pub fn new(config: RecorderConfig, tracker: T, capture: C, processor: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tracker,
            capture,
            processor,
            connected: false,
            state: ControllerState::Idle,
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connect to the tracker and tell it the screen geometry.
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        self.tracker.connect()?;
        let coords = format!(
            "0 0 {} {}",
            self.config.screen_width - 1,
            self.config.screen_height - 1
        );
        self.tracker
            .send_command(&format!("screen_pixel_coords {coords}"))?;
        self.tracker.send_message(&format!("DISPLAY_COORDS {coords}"))?;
        self.connected = true;
        info!(
            "connected to tracker at {} (dummy mode: {})",
            self.config.host_ip, self.config.dummy_mode
        );
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.require_idle("disconnect")?;
        if self.connected {
            self.tracker.disconnect()?;
            self.connected = false;
        }
        Ok(())
    }

    pub fn send_marker(&mut self, marker: &Marker) -> Result<()> {
        if !self.connected {
            return Err(Error::InvalidState {
                action: "send marker",
                state: "disconnected",
            });
        }
        for message in marker.tracker_messages() {
            self.tracker.send_message(&message)?;
        }
        Ok(())
    }

    fn require_idle(&self, action: &'static str) -> Result<()> {
        match &self.state {
            ControllerState::Idle => Ok(()),
            other => Err(Error::InvalidState {
                action,
                state: other.name(),
            }),
        }
    }

    /// Start a session named after the current time.
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(&mut self) -> Result<RecordingSession> {
        let now = Local::now();
        self.start_session(new_session_token(&now), now).await
    }

    /// Start a session with the given token.
    pub async fn start_with_token(&mut self, token: &str) -> Result<RecordingSession> {
        self.start_session(token.to_string(), Local::now()).await
    }

    async fn start_session(
        &mut self,
        token: String,
        now: DateTime<Local>,
    ) -> Result<RecordingSession> {
        self.require_idle("start")?;
        if !self.connected {
            return Err(Error::InvalidState {
                action: "start",
                state: "disconnected",
            });
        }
        let session = RecordingSession::new(token, now, &self.config.recording_dir)?;
        std::fs::create_dir_all(&self.config.recording_dir)?;
        for path in [&session.video_path, &session.gaze_data_path] {
            if path.exists() {
                return Err(Error::SessionExists(path.clone()));
            }
        }

        self.tracker.open_data_file(&session.host_data_file)?;
        if let Err(e) = self.start_tracker() {
            self.abandon_tracker();
            return Err(e);
        }
        if let Err(e) = self.capture.start(&session.video_path) {
            self.abandon_tracker();
            return Err(e);
        }
        if let Err(e) = self.tracker.send_message(&session.start_marker()) {
            if let Err(stop_err) = self.capture.stop(self.config.stop_timeout()).await {
                warn!("stopping capture after failed start: {stop_err}");
            }
            self.abandon_tracker();
            return Err(e);
        }

        info!("started session \"{}\"", session.token);
        self.state = ControllerState::Recording(session.clone());
        Ok(session)
    }

    fn start_tracker(&mut self) -> Result<()> {
        for command in RECORDING_FILTER_COMMANDS {
            self.tracker.send_command(command)?;
        }
        self.tracker.start_recording()
    }

    fn abandon_tracker(&mut self) {
        if let Err(e) = self.tracker.stop_recording() {
            warn!("stopping tracker after failed start: {e}");
        }
    }

    /// Stop the session, wait for both producers and process the result.
    ///
    /// The controller is idle afterwards, also on error.
    pub async fn stop(&mut self) -> Result<ProcessedSession> {
        let session = match &self.state {
            ControllerState::Recording(session) => session.clone(),
            other => {
                return Err(Error::InvalidState {
                    action: "stop",
                    state: other.name(),
                });
            }
        };
        self.state = ControllerState::Processing(session.clone());
        let result = self.finish_session(session).await;
        if let Err(e) = &result {
            error!("session failed: {e}");
        }
        self.state = ControllerState::Idle;
        result
    }

    async fn finish_session(&mut self, session: RecordingSession) -> Result<ProcessedSession> {
        // Stop both producers even if one fails. The first error is reported.
        let end_marker = self.tracker.send_message(&session.end_marker());
        let capture = self.capture.stop(self.config.stop_timeout()).await;
        let tracker = self.tracker.stop_recording();
        end_marker?;
        let capture = capture?;
        tracker?;

        self.tracker
            .transfer_file(&session.host_data_file, &session.gaze_data_path)?;
        info!(
            "session \"{}\" stopped after {} frames",
            session.token, capture.frames
        );

        let output = self.processor.process(&session).await?;
        info!("session \"{}\" processed to \"{}\"", session.token, output.display());
        Ok(ProcessedSession {
            session,
            capture,
            output,
        })
    }
}

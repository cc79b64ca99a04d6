//! Eye tracker driver interface and an in-memory driver for dummy mode.

use std::{collections::BTreeMap, path::Path, time::Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use gaze_parser::GazeTables;
use gaze_types::{MISSING_VALUE, MessageRow, SampleRow};

use crate::{Error, Result};

/// Commands selecting what the tracker stores in its data file and sends over
/// the link while recording.
pub const RECORDING_FILTER_COMMANDS: [&str; 4] = [
    "file_event_filter = LEFT,RIGHT,FIXATION,SACCADE,BLINK,MESSAGE,BUTTON,INPUT",
    "file_sample_data = LEFT,RIGHT,GAZE,HREF,RAW,AREA,HTARGET,GAZERES,BUTTON,STATUS,INPUT",
    "link_event_filter = LEFT,RIGHT,FIXATION,SACCADE,BLINK,BUTTON,FIXUPDATE,INPUT",
    "link_sample_data = LEFT,RIGHT,GAZE,GAZERES,AREA,HTARGET,STATUS,INPUT",
];

/// Connection to an eye tracker.
///
/// Messages are timestamped by the tracker on its own clock and stored in the
/// open data file.
pub trait TrackerDriver: Send {
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
    fn send_command(&mut self, command: &str) -> Result<()>;
    fn send_message(&mut self, message: &str) -> Result<()>;
    /// Open `host_fname` on the tracker host. It receives everything recorded
    /// until [Self::stop_recording].
    fn open_data_file(&mut self, host_fname: &str) -> Result<()>;
    fn start_recording(&mut self) -> Result<()>;
    /// Stop recording and close the data file.
    fn stop_recording(&mut self) -> Result<()>;
    /// Copy the closed data file `host_fname` to `local_path` as a gaze
    /// archive.
    fn transfer_file(&mut self, host_fname: &str, local_path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Message,
    TrialStart,
    TrialEnd,
    StimulusOn,
    StimulusOff,
    Response,
    Custom,
}

/// An experiment event to be written into the tracker's message stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub kind: MarkerKind,
    #[serde(default)]
    pub message: String,
    pub trial_id: Option<String>,
    /// Written as `!V TRIAL_VAR <key> <value>` after the marker.
    #[serde(default)]
    pub trial_vars: BTreeMap<String, String>,
}

impl Marker {
    pub fn new(kind: MarkerKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
            trial_id: None,
            trial_vars: BTreeMap::new(),
        }
    }

    /// The tracker messages for this marker, in order.
    pub fn tracker_messages(&self) -> Vec<String> {
        let first = match self.kind {
            MarkerKind::Message | MarkerKind::Custom => self.message.clone(),
            MarkerKind::TrialStart => {
                format!("TRIALID {}", self.trial_id.as_deref().unwrap_or("unknown"))
            }
            MarkerKind::TrialEnd => "TRIAL_RESULT 0".to_string(),
            MarkerKind::StimulusOn => format!("STIMULUS_ON {}", self.message),
            MarkerKind::StimulusOff => format!("STIMULUS_OFF {}", self.message),
            MarkerKind::Response => format!("RESPONSE {}", self.message),
        };
        std::iter::once(first)
            .chain(
                self.trial_vars
                    .iter()
                    .map(|(k, v)| format!("!V TRIAL_VAR {k} {v}")),
            )
            .collect()
    }
}

/// Sample interval of [DummyTracker] in ms (500 Hz).
const DUMMY_SAMPLE_INTERVAL_MS: usize = 2;

struct DataFile {
    name: String,
    recording_since: Option<i64>,
    tables: GazeTables,
}

/// Driver without hardware.
///
/// Keeps a millisecond clock starting at construction, records every command
/// and stores messages while a data file is open. While recording it produces
/// samples at 500 Hz with both eyes missing, like a tracker in dummy mode.
pub struct DummyTracker {
    t0: Instant,
    connected: bool,
    commands: Vec<String>,
    open_file: Option<DataFile>,
    closed_files: BTreeMap<String, GazeTables>,
}

impl Default for DummyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyTracker {
    pub fn new() -> Self {
        Self {
            t0: Instant::now(),
            connected: false,
            commands: Vec::new(),
            open_file: None,
            closed_files: BTreeMap::new(),
        }
    }

    /// Current tracker time in ms.
    pub fn now(&self) -> i64 {
        self.t0.elapsed().as_millis() as i64
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_recording(&self) -> bool {
        self.open_file
            .as_ref()
            .is_some_and(|f| f.recording_since.is_some())
    }

    /// All commands sent since construction.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Messages stored in the data file `host_fname`, open or closed and not
    /// yet transferred.
    pub fn messages(&self, host_fname: &str) -> Option<&[MessageRow]> {
        match &self.open_file {
            Some(f) if f.name == host_fname => Some(&f.tables.messages),
            _ => self
                .closed_files
                .get(host_fname)
                .map(|t| t.messages.as_slice()),
        }
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::Tracker("not connected".into()))
        }
    }

    fn add_samples(tables: &mut GazeTables, start: i64, stop: i64) {
        tables.samples.extend(
            (start..stop)
                .step_by(DUMMY_SAMPLE_INTERVAL_MS)
                .map(|time| SampleRow {
                    time,
                    gx_left: Some(MISSING_VALUE),
                    gy_left: Some(MISSING_VALUE),
                    gx_right: Some(MISSING_VALUE),
                    gy_right: Some(MISSING_VALUE),
                }),
        );
    }
}

impl TrackerDriver for DummyTracker {
    fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Err(Error::Tracker("already connected".into()));
        }
        info!("connected to dummy tracker");
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.is_recording() {
            self.stop_recording()?;
        }
        self.connected = false;
        info!("disconnected from dummy tracker");
        Ok(())
    }

    fn send_command(&mut self, command: &str) -> Result<()> {
        self.check_connected()?;
        debug!("command: {command}");
        self.commands.push(command.to_string());
        Ok(())
    }

    fn send_message(&mut self, message: &str) -> Result<()> {
        self.check_connected()?;
        let time = self.now();
        match self.open_file.as_mut() {
            Some(f) => f.tables.messages.push(MessageRow {
                time,
                message: message.to_string(),
            }),
            None => debug!("no data file open, message not stored: {message}"),
        }
        Ok(())
    }

    fn open_data_file(&mut self, host_fname: &str) -> Result<()> {
        self.check_connected()?;
        if let Some(f) = &self.open_file {
            return Err(Error::Tracker(format!(
                "data file \"{}\" is still open",
                f.name
            )));
        }
        self.open_file = Some(DataFile {
            name: host_fname.to_string(),
            recording_since: None,
            tables: GazeTables::default(),
        });
        Ok(())
    }

    fn start_recording(&mut self) -> Result<()> {
        self.check_connected()?;
        let now = self.now();
        let f = self
            .open_file
            .as_mut()
            .ok_or_else(|| Error::Tracker("no data file open".into()))?;
        if f.recording_since.is_some() {
            return Err(Error::Tracker("already recording".into()));
        }
        f.recording_since = Some(now);
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<()> {
        self.check_connected()?;
        let now = self.now();
        let mut f = self
            .open_file
            .take()
            .ok_or_else(|| Error::Tracker("no data file open".into()))?;
        if let Some(since) = f.recording_since {
            Self::add_samples(&mut f.tables, since, now);
        }
        info!(
            "closed data file \"{}\" with {} samples",
            f.name,
            f.tables.samples.len()
        );
        self.closed_files.insert(f.name, f.tables);
        Ok(())
    }

    fn transfer_file(&mut self, host_fname: &str, local_path: &Path) -> Result<()> {
        self.check_connected()?;
        // Each file is handed over once. On failure it stays on the host.
        let tables = self.closed_files.remove(host_fname).ok_or_else(|| {
            Error::Tracker(format!("no closed data file \"{host_fname}\" on host"))
        })?;
        if let Err(e) = gaze_parser::write_zip(local_path, &tables) {
            self.closed_files.insert(host_fname.to_string(), tables);
            return Err(e.into());
        }
        info!(
            "transferred \"{host_fname}\" to \"{}\"",
            local_path.display()
        );
        Ok(())
    }
}

//! Overlay eye-tracker fixations and saccades onto a screen recording.
//!
//! The tracker clock and the video are aligned with the
//! `SCREEN_REC_START_<token>` and `SCREEN_REC_END_<token>` messages written
//! into the tracker's message stream when the recording started and stopped.
//! Frame `i` of `n` is mapped linearly onto the span between the two
//! messages, so the first frame lands on the start message and the last frame
//! on the end message.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use gaze_parser::GazeRecording;
use gaze_types::{Eye, Fixation, Saccade, Sample};
use video_frame::RgbFrame;

pub mod clock;
mod config;
pub mod cursor;
mod ffmpeg_io;
pub mod memory;
pub mod render;

pub use clock::{AlignmentError, ClockAlignment, MarkerMatching, align};
pub use config::{GazeOverlayConfig, Valid, default_output_path};
pub use ffmpeg_io::FfmpegMovieWriter;
pub use render::{OverlayRenderer, OverlayStyle, Progress, RenderControl, RenderSummary, Rgb};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] gaze_parser::Error),
    #[error("alignment error: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no valid gaze samples for the {eye} eye")]
    NoValidData { eye: Eye },
    #[error("video reader error: {0}")]
    FrameReader(#[from] ffmpeg_frame_reader::Error),
    #[error("video writer error: {0}")]
    FfmpegWriter(#[from] ffmpeg_writer::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("render error: {0}")]
    Render(String),
    #[error("aborted")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Broad classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The gaze archive is unreadable or malformed.
    Parse,
    /// Sync messages are missing or inconsistent.
    Alignment,
    /// The caller asked for something invalid.
    Configuration,
    /// The selected eye has no usable samples.
    NoValidData,
    /// Reading, encoding or drawing video failed.
    Video,
    Aborted,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse(_) => ErrorKind::Parse,
            Error::Alignment(_) => ErrorKind::Alignment,
            Error::Configuration(_) | Error::Toml(_) | Error::TomlSer(_) => {
                ErrorKind::Configuration
            }
            Error::NoValidData { .. } => ErrorKind::NoValidData,
            Error::FrameReader(_) | Error::FfmpegWriter(_) | Error::Io(_) | Error::Render(_) => {
                ErrorKind::Video
            }
            Error::Aborted => ErrorKind::Aborted,
        }
    }
}

/// A source of decoded frames.
pub trait MovieReader {
    fn filename(&self) -> &str;
    /// The expected number of frames.
    fn frame_count(&self) -> usize;
    fn fps(&self) -> f64;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn next_frame(&mut self) -> Option<Result<RgbFrame>>;
}

/// A sink of frames.
pub trait MovieWriter {
    fn write_frame(&mut self, frame: &RgbFrame) -> Result<()>;
    /// Flush and close the output. No frames may be written afterwards.
    fn finish(&mut self) -> Result<()>;
}

/// Everything needed to render, resolved before any video is opened.
#[derive(Debug, Clone)]
pub struct PreparedOverlay {
    pub eye: Eye,
    pub alignment: ClockAlignment,
    pub fixations: Vec<Fixation>,
    pub saccades: Vec<Saccade>,
    pub samples: Vec<Sample>,
    pub style: OverlayStyle,
    pub log_interval_frames: usize,
}

impl PreparedOverlay {
    /// Select the events of `eye` and align the recording `token`.
    pub fn new(
        recording: &GazeRecording,
        eye: &str,
        token: &str,
        matching: MarkerMatching,
        style: OverlayStyle,
    ) -> Result<Self> {
        let eye: Eye = eye
            .parse()
            .map_err(|e: gaze_types::UnknownEye| Error::Configuration(e.to_string()))?;
        style.validate().map_err(Error::Configuration)?;

        let n_valid = recording.count_valid_samples(eye);
        if n_valid == 0 {
            return Err(Error::NoValidData { eye });
        }
        info!(
            "{eye} eye: {n_valid} of {} samples valid",
            recording.samples(eye).len()
        );

        let alignment = align(&recording.messages, token, matching)?;
        if alignment.degraded {
            warn!(
                "sync messages \"{}\" and \"{}\" do not both match token \"{token}\"",
                alignment.start_marker.text, alignment.end_marker.text
            );
        }

        Ok(Self {
            eye,
            alignment,
            fixations: recording.fixations(eye),
            saccades: recording.saccades(eye),
            samples: recording.samples(eye).to_vec(),
            style,
            log_interval_frames: 100,
        })
    }

    /// Copy all frames from `reader` to `writer`, drawing the overlay.
    ///
    /// The writer is not finished.
    pub fn render(
        &self,
        reader: &mut dyn MovieReader,
        writer: &mut dyn MovieWriter,
        control: RenderControl,
    ) -> Result<RenderSummary> {
        let events = render::EyeEvents {
            fixations: &self.fixations,
            saccades: &self.saccades,
            samples: &self.samples,
        };
        render::render_frames(
            reader,
            writer,
            &events,
            &self.alignment,
            &self.style,
            self.log_interval_frames.max(1),
            control,
        )
    }
}

/// Parse the eye, load the gaze archive and align it. Opens no video.
pub fn prepare(cfg: &Valid<GazeOverlayConfig>) -> Result<PreparedOverlay> {
    let cfg = cfg.valid();
    // Fail on a bad eye before touching any file.
    cfg.eye()?;
    let token = cfg.session_token()?;
    let recording = gaze_parser::load(&cfg.input_gaze_data)?;
    let mut prepared = PreparedOverlay::new(
        &recording,
        &cfg.eye,
        &token,
        cfg.marker_matching,
        cfg.style.clone(),
    )?;
    prepared.log_interval_frames = cfg.log_interval_frames();
    Ok(prepared)
}

/// Removes a file when dropped unless [Self::keep] was called.
struct RemoveOnDrop {
    path: PathBuf,
    keep: bool,
}

impl RemoveOnDrop {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            keep: false,
        }
    }
    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("removed incomplete output \"{}\"", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove \"{}\": {e}", self.path.display()),
        }
    }
}

/// Run the whole pipeline with ffmpeg for video input and output.
///
/// Returns the path of the written video. On failure no output file is left
/// behind.
pub fn overlay_gaze_on_video(
    cfg: &Valid<GazeOverlayConfig>,
    control: RenderControl,
) -> Result<PathBuf> {
    let prepared = prepare(cfg)?;
    let cfg = cfg.valid();
    let output = cfg.output_path()?;

    let mut reader = ffmpeg_frame_reader::FfmpegFrameReader::new(&cfg.input_video)?;
    let format = ffmpeg_writer::VideoFormat {
        width: reader.width(),
        height: reader.height(),
        fps: reader.fps(),
    };

    let guard = RemoveOnDrop::new(&output);
    let mut writer = FfmpegMovieWriter::new(&output, format, cfg.encoder.unwrap_or_default())?;
    let rendered = prepared.render(&mut reader, &mut writer, control);
    let finished = writer.finish();
    let summary = rendered?;
    finished?;
    guard.keep();

    info!(
        "wrote {} frames to \"{}\" ({} with fixation, {} with saccade)",
        summary.frames,
        output.display(),
        summary.fixation_frames,
        summary.saccade_frames
    );
    Ok(output)
}

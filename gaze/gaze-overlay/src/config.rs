use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ffmpeg_writer::FfmpegEncoderOptions;
use gaze_types::Eye;

use crate::{Error, Result, clock::MarkerMatching, render::OverlayStyle};

/// A wrapper newtype indicating the inner type has been validated.
#[derive(Debug, Clone)]
pub struct Valid<T>(T);

impl<T> Valid<T> {
    /// Return a reference to the validated inner type.
    pub fn valid(&self) -> &T {
        &self.0
    }
}

fn default_eye() -> String {
    "right".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GazeOverlayConfig {
    /// The screen recording.
    pub input_video: String,
    /// The gaze archive (directory or zip) exported from the tracker.
    pub input_gaze_data: String,
    /// The output video. Defaults to `<video_stem>_gaze.<ext>` next to the
    /// input video.
    pub output: Option<String>,
    /// Which eye to draw, "left" or "right".
    #[serde(default = "default_eye")]
    pub eye: String,
    /// The token in the sync messages. Defaults to the input video file stem.
    pub session_token: Option<String>,
    #[serde(default)]
    pub marker_matching: MarkerMatching,
    /// Every `log_interval_frames` a status message will be displayed.
    pub log_interval_frames: Option<usize>,
    /// Defaults to letting ffmpeg choose from the output file extension.
    pub encoder: Option<FfmpegEncoderOptions>,
    #[serde(default)]
    pub style: OverlayStyle,
}

impl Default for GazeOverlayConfig {
    fn default() -> Self {
        Self {
            input_video: "screen_20250101_120000.mp4".to_string(),
            input_gaze_data: "screen_20250101_120000.zip".to_string(),
            output: None,
            eye: default_eye(),
            session_token: None,
            marker_matching: MarkerMatching::default(),
            log_interval_frames: Some(100),
            encoder: None,
            style: OverlayStyle::default(),
        }
    }
}

impl GazeOverlayConfig {
    /// Validate the configuration. Performs no file I/O.
    ///
    /// If `basedir` is not `None`, it specifies the directory in which relative
    /// filenames are searched.
    pub fn validate(self, basedir: Option<&Path>) -> Result<Valid<Self>> {
        parse_eye(&self.eye)?;
        self.style.validate().map_err(Error::Configuration)?;
        if self.log_interval_frames == Some(0) {
            return Err(Error::Configuration(
                "log_interval_frames must be at least 1".into(),
            ));
        }
        if let Some(token) = &self.session_token {
            if token.is_empty() {
                return Err(Error::Configuration("session_token is empty".into()));
            }
        }

        let input_video = base_join_inner(self.input_video, basedir)?;
        let input_gaze_data = base_join_inner(self.input_gaze_data, basedir)?;
        let output = base_join(self.output, basedir)?;

        let cfg = Self {
            input_video,
            input_gaze_data,
            output,
            ..self
        };
        if cfg.output_path()? == Path::new(&cfg.input_video) {
            return Err(Error::Configuration(format!(
                "output would overwrite input video \"{}\"",
                cfg.input_video
            )));
        }
        Ok(Valid(cfg))
    }

    pub fn eye(&self) -> Result<Eye> {
        parse_eye(&self.eye)
    }

    /// The requested output path or the default derived from the input video.
    pub fn output_path(&self) -> Result<PathBuf> {
        match &self.output {
            Some(output) => Ok(PathBuf::from(output)),
            None => default_output_path(Path::new(&self.input_video)),
        }
    }

    pub fn session_token(&self) -> Result<String> {
        match &self.session_token {
            Some(token) => Ok(token.clone()),
            None => video_stem(Path::new(&self.input_video)),
        }
    }

    pub fn log_interval_frames(&self) -> usize {
        self.log_interval_frames.unwrap_or(100)
    }
}

fn parse_eye(eye: &str) -> Result<Eye> {
    eye.parse()
        .map_err(|e: gaze_types::UnknownEye| Error::Configuration(e.to_string()))
}

fn video_stem(video: &Path) -> Result<String> {
    video
        .file_stem()
        .and_then(|s| s.to_str())
        .map(String::from)
        .ok_or_else(|| {
            Error::Configuration(format!("no UTF8 file stem in \"{}\"", video.display()))
        })
}

/// `<dir>/<stem>_gaze.<ext>` for input `<dir>/<stem>.<ext>`.
pub fn default_output_path(video: &Path) -> Result<PathBuf> {
    let stem = video_stem(video)?;
    let ext = video
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4");
    Ok(video.with_file_name(format!("{stem}_gaze.{ext}")))
}

/// If `filename` is relative, join it to `basedir` if possible.
fn base_join_inner(filename: String, basedir: Option<&Path>) -> Result<String> {
    fn path_to_string(p: PathBuf) -> Result<String> {
        p.into_os_string().into_string().map_err(|os_str| {
            Error::Configuration(format!("path \"{}\" is not UTF8", os_str.to_string_lossy()))
        })
    }

    fn maybe_join(filename: String, basedir: Option<&Path>) -> PathBuf {
        let p = PathBuf::from(filename);
        match (p.is_relative(), basedir) {
            (true, Some(dirpath)) => dirpath.join(p),
            _ => p,
        }
    }

    path_to_string(maybe_join(filename, basedir))
}

/// If `filename` is not None and is relative, join it to `basedir` if possible.
fn base_join(filename: Option<String>, basedir: Option<&Path>) -> Result<Option<String>> {
    filename.map(|s| base_join_inner(s, basedir)).transpose()
}

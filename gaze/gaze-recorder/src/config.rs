use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use ffmpeg_writer::FfmpegEncoderOptions;
use gaze_overlay::{MarkerMatching, OverlayStyle};

use crate::{Error, Result};

/// How recorded sessions are overlaid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OverlaySettings {
    /// "left" or "right"
    pub eye: String,
    pub marker_matching: MarkerMatching,
    pub log_interval_frames: Option<usize>,
    pub encoder: Option<FfmpegEncoderOptions>,
    pub style: OverlayStyle,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            eye: "right".to_string(),
            marker_matching: MarkerMatching::default(),
            log_interval_frames: None,
            encoder: None,
            style: OverlayStyle::default(),
        }
    }
}

/// Accepted screen capture rates.
pub const CAPTURE_FPS_RANGE: std::ops::RangeInclusive<f64> = 0.1..=1000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RecorderConfig {
    /// Address of the tracker host.
    pub host_ip: String,
    /// Run without tracker hardware.
    pub dummy_mode: bool,
    pub screen_width: u32,
    pub screen_height: u32,
    /// Videos and gaze archives of all sessions are saved here.
    pub recording_dir: PathBuf,
    pub capture_fps: f64,
    /// How long stopping may wait for the capture to close its file.
    pub stop_timeout_ms: u64,
    pub overlay: OverlaySettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            host_ip: "100.1.1.1".to_string(),
            dummy_mode: false,
            screen_width: 1920,
            screen_height: 1080,
            recording_dir: PathBuf::from("logdata/recordings"),
            capture_fps: 30.0,
            stop_timeout_ms: 2000,
            overlay: OverlaySettings::default(),
        }
    }
}

impl RecorderConfig {
    pub fn from_toml_str(buf: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(buf)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(Error::Configuration(format!(
                "screen size {}x{} is empty",
                self.screen_width, self.screen_height
            )));
        }
        if !CAPTURE_FPS_RANGE.contains(&self.capture_fps) {
            return Err(Error::Configuration(format!(
                "capture_fps must be within {CAPTURE_FPS_RANGE:?}, not {}",
                self.capture_fps
            )));
        }
        if self.stop_timeout_ms == 0 {
            return Err(Error::Configuration("stop_timeout_ms is zero".into()));
        }
        self.overlay
            .eye
            .parse::<gaze_types::Eye>()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let cfg = RecorderConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, RecorderConfig::default());
        assert_eq!(cfg.stop_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_toml() {
        let buf = r#"
            dummy_mode = true
            capture_fps = 10.0

            [overlay]
            eye = "left"
            marker_matching = "strict"

            [overlay.style]
            fixation_radius = 12.0
        "#;
        let cfg = RecorderConfig::from_toml_str(buf).unwrap();
        assert!(cfg.dummy_mode);
        assert_eq!(cfg.capture_fps, 10.0);
        assert_eq!(cfg.screen_width, 1920);
        assert_eq!(cfg.overlay.eye, "left");
        assert_eq!(cfg.overlay.marker_matching, MarkerMatching::Strict);
        assert_eq!(cfg.overlay.style.fixation_radius, 12.0);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            RecorderConfig::from_toml_str("no_such_field = 1"),
            Err(Error::Toml(_))
        ));
        for buf in [
            "capture_fps = 0.0",
            "capture_fps = 1e-300",
            "capture_fps = 5000.0",
            "capture_fps = nan",
            "screen_width = 0",
            "stop_timeout_ms = 0",
            "[overlay]\neye = \"both\"",
        ] {
            assert!(
                matches!(
                    RecorderConfig::from_toml_str(buf),
                    Err(Error::Configuration(_))
                ),
                "{buf}"
            );
        }
    }
}

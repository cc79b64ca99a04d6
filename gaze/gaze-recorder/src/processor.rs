use std::{future::Future, path::{Path, PathBuf}};

use gaze_overlay::{GazeOverlayConfig, RenderControl};

use crate::{Error, OverlaySettings, RecordingSession, Result};

/// Runs once the video and gaze files of a session are closed.
pub trait SessionProcessor: Send + Sync {
    /// Returns the path of the produced output.
    fn process(&self, session: &RecordingSession)
    -> impl Future<Output = Result<PathBuf>> + Send;
}

/// Overlays the session's gaze onto its video on a blocking task.
#[derive(Debug, Clone, Default)]
pub struct OverlayProcessor {
    settings: OverlaySettings,
}

impl OverlayProcessor {
    pub fn new(settings: OverlaySettings) -> Self {
        Self { settings }
    }

    fn overlay_config(&self, session: &RecordingSession) -> Result<GazeOverlayConfig> {
        Ok(GazeOverlayConfig {
            input_video: utf8(&session.video_path)?,
            input_gaze_data: utf8(&session.gaze_data_path)?,
            output: None,
            eye: self.settings.eye.clone(),
            session_token: Some(session.token.clone()),
            marker_matching: self.settings.marker_matching,
            log_interval_frames: self.settings.log_interval_frames,
            encoder: self.settings.encoder,
            style: self.settings.style.clone(),
        })
    }
}

fn utf8(path: &Path) -> Result<String> {
    path.to_str()
        .map(String::from)
        .ok_or_else(|| Error::Configuration(format!("path \"{}\" is not UTF8", path.display())))
}

impl SessionProcessor for OverlayProcessor {
    async fn process(&self, session: &RecordingSession) -> Result<PathBuf> {
        let cfg = self.overlay_config(session)?.validate(None)?;
        let output = tokio::task::spawn_blocking(move || {
            gaze_overlay::overlay_gaze_on_video(&cfg, RenderControl::default())
        })
        .await??;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;

    #[test]
    fn test_overlay_config_uses_session_token() -> eyre::Result<()> {
        let session = RecordingSession::new(
            "screen_20250101_000000".into(),
            Local::now(),
            Path::new("/rec"),
        )?;
        let processor = OverlayProcessor::default();
        let cfg = processor.overlay_config(&session)?;
        assert_eq!(cfg.session_token.as_deref(), Some("screen_20250101_000000"));
        assert_eq!(cfg.input_video, "/rec/screen_20250101_000000.mp4");
        assert_eq!(cfg.input_gaze_data, "/rec/screen_20250101_000000.zip");
        let cfg = cfg.validate(None)?;
        assert_eq!(
            cfg.valid().output_path()?,
            Path::new("/rec/screen_20250101_000000_gaze.mp4")
        );
        Ok(())
    }
}

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use gaze_overlay::{MarkerMatching, align};
use gaze_recorder::{
    CaptureSummary, ControllerState, DummyTracker, Error, Marker, MarkerKind, OverlayProcessor,
    RECORDING_FILTER_COMMANDS, RecorderConfig, RecordingController, RecordingSession, Result,
    ScreenCapture, SessionProcessor,
};
use test_log::test;

#[derive(Default)]
struct FakeCapture {
    video_path: Option<PathBuf>,
    fail_start: bool,
    hang_on_stop: bool,
}

impl ScreenCapture for FakeCapture {
    fn start(&mut self, video_path: &Path) -> Result<()> {
        if self.fail_start {
            return Err(Error::Capture("no display".into()));
        }
        self.video_path = Some(video_path.to_path_buf());
        Ok(())
    }

    async fn stop(&mut self, timeout: Duration) -> Result<CaptureSummary> {
        if self.hang_on_stop {
            tokio::time::sleep(timeout).await;
            return Err(Error::CaptureTimeout(timeout));
        }
        let video_path = self
            .video_path
            .take()
            .ok_or_else(|| Error::Capture("not started".into()))?;
        std::fs::write(&video_path, b"video")?;
        Ok(CaptureSummary {
            video_path,
            frames: 3,
        })
    }
}

/// Keeps the messages of every processed gaze archive.
#[derive(Default)]
struct Collect {
    messages: Mutex<Vec<Vec<String>>>,
}

impl SessionProcessor for Collect {
    async fn process(&self, session: &RecordingSession) -> Result<PathBuf> {
        assert!(session.video_path.exists());
        let recording = gaze_parser::load(&session.gaze_data_path)?;
        let texts = recording.messages.iter().map(|m| m.text.clone()).collect();
        self.messages.lock().unwrap().push(texts);
        Ok(session.gaze_data_path.clone())
    }
}

fn config(dir: &Path) -> RecorderConfig {
    RecorderConfig {
        dummy_mode: true,
        recording_dir: dir.to_path_buf(),
        stop_timeout_ms: 100,
        ..Default::default()
    }
}

fn controller(
    dir: &Path,
    capture: FakeCapture,
) -> Result<RecordingController<DummyTracker, FakeCapture, Collect>> {
    RecordingController::new(
        config(dir),
        DummyTracker::new(),
        capture,
        Collect::default(),
    )
}

#[test(tokio::test)]
async fn full_cycle_writes_aligned_markers() -> eyre::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let mut ctrl = controller(tempdir.path(), FakeCapture::default())?;
    ctrl.connect()?;
    assert_eq!(
        ctrl.tracker().commands()[0],
        "screen_pixel_coords 0 0 1919 1079"
    );

    let session = ctrl.start_with_token("sess1").await?;
    assert!(matches!(ctrl.state(), ControllerState::Recording(s) if s == &session));
    assert!(matches!(
        ctrl.start_with_token("sess2").await,
        Err(Error::InvalidState { .. })
    ));
    assert_eq!(&ctrl.tracker().commands()[1..], &RECORDING_FILTER_COMMANDS);
    assert!(ctrl.tracker().is_recording());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut marker = Marker::new(MarkerKind::StimulusOn, "face.png");
    marker.trial_vars.insert("block".into(), "1".into());
    ctrl.send_marker(&marker)?;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let processed = ctrl.stop().await?;
    assert_eq!(ctrl.state(), &ControllerState::Idle);
    assert!(!ctrl.tracker().is_recording());
    assert_eq!(processed.session, session);
    assert_eq!(processed.capture.frames, 3);
    assert_eq!(processed.output, session.gaze_data_path);

    let messages = ctrl.processor().messages.lock().unwrap().clone();
    assert_eq!(
        messages,
        vec![vec![
            "SCREEN_REC_START_sess1".to_string(),
            "STIMULUS_ON face.png".to_string(),
            "!V TRIAL_VAR block 1".to_string(),
            "SCREEN_REC_END_sess1".to_string(),
        ]]
    );

    let recording = gaze_parser::load(&session.gaze_data_path)?;
    let alignment = align(&recording.messages, "sess1", MarkerMatching::Strict)?;
    assert!(!alignment.degraded);
    assert!(alignment.duration >= 40.0);
    Ok(())
}

#[test(tokio::test)]
async fn generated_token_names_the_files() -> eyre::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let mut ctrl = controller(tempdir.path(), FakeCapture::default())?;
    ctrl.connect()?;
    let session = ctrl.start().await?;
    assert!(session.token.starts_with("screen_"), "{}", session.token);
    assert_eq!(session.host_data_file.len(), "ddHHMMSS.edf".len());
    assert_eq!(
        session.video_path,
        tempdir.path().join(format!("{}.mp4", session.token))
    );
    ctrl.stop().await?;
    Ok(())
}

#[test(tokio::test)]
async fn transitions_are_checked() -> eyre::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let mut ctrl = controller(tempdir.path(), FakeCapture::default())?;

    let err = ctrl.start_with_token("sess1").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { state: "disconnected", .. }), "{err}");
    let err = ctrl.stop().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { state: "idle", .. }), "{err}");
    assert!(ctrl.send_marker(&Marker::new(MarkerKind::Message, "x")).is_err());

    ctrl.connect()?;
    ctrl.start_with_token("sess1").await?;
    let err = ctrl.disconnect().unwrap_err();
    assert!(matches!(err, Error::InvalidState { state: "recording", .. }), "{err}");
    ctrl.stop().await?;
    ctrl.disconnect()?;
    assert!(!ctrl.is_connected());
    Ok(())
}

#[test(tokio::test)]
async fn bad_token_touches_nothing() -> eyre::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let mut ctrl = controller(tempdir.path(), FakeCapture::default())?;
    ctrl.connect()?;
    let err = ctrl.start_with_token("two words").await.unwrap_err();
    assert!(matches!(err, Error::InvalidSessionToken(_)), "{err}");
    assert_eq!(ctrl.state(), &ControllerState::Idle);
    assert_eq!(ctrl.tracker().commands().len(), 1);
    Ok(())
}

#[test(tokio::test)]
async fn existing_session_files_are_not_overwritten() -> eyre::Result<()> {
    let tempdir = tempfile::tempdir()?;
    std::fs::write(tempdir.path().join("sess1.mp4"), b"earlier")?;
    let mut ctrl = controller(tempdir.path(), FakeCapture::default())?;
    ctrl.connect()?;
    let err = ctrl.start_with_token("sess1").await.unwrap_err();
    assert!(matches!(err, Error::SessionExists(_)), "{err}");
    assert_eq!(std::fs::read(tempdir.path().join("sess1.mp4"))?, b"earlier");
    Ok(())
}

#[test(tokio::test)]
async fn failed_capture_start_stops_tracker() -> eyre::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let capture = FakeCapture {
        fail_start: true,
        ..Default::default()
    };
    let mut ctrl = controller(tempdir.path(), capture)?;
    ctrl.connect()?;
    let err = ctrl.start_with_token("sess1").await.unwrap_err();
    assert!(matches!(err, Error::Capture(_)), "{err}");
    assert_eq!(ctrl.state(), &ControllerState::Idle);
    assert!(!ctrl.tracker().is_recording());
    Ok(())
}

#[test(tokio::test)]
async fn capture_timeout_leaves_controller_idle() -> eyre::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let capture = FakeCapture {
        hang_on_stop: true,
        ..Default::default()
    };
    let mut ctrl = controller(tempdir.path(), capture)?;
    ctrl.connect()?;
    ctrl.start_with_token("sess1").await?;
    let err = ctrl.stop().await.unwrap_err();
    assert!(matches!(err, Error::CaptureTimeout(_)), "{err}");
    assert_eq!(ctrl.state(), &ControllerState::Idle);
    assert!(!ctrl.tracker().is_recording());
    assert!(ctrl.processor().messages.lock().unwrap().is_empty());
    Ok(())
}

#[test(tokio::test)]
async fn dummy_tracker_data_has_no_valid_gaze() -> eyre::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let cfg = config(tempdir.path());
    let processor = OverlayProcessor::new(cfg.overlay.clone());
    let mut ctrl =
        RecordingController::new(cfg, DummyTracker::new(), FakeCapture::default(), processor)?;
    ctrl.connect()?;
    let session = ctrl.start_with_token("sess1").await?;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = ctrl.stop().await.unwrap_err();
    match err {
        Error::Overlay(e) => assert_eq!(e.kind(), gaze_overlay::ErrorKind::NoValidData),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(ctrl.state(), &ControllerState::Idle);
    assert!(session.gaze_data_path.exists());
    assert!(!tempdir.path().join("sess1_gaze.mp4").exists());
    Ok(())
}

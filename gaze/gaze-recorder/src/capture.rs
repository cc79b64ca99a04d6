//! Screen capture on a blocking task.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ffmpeg_writer::{FfmpegEncoderOptions, VideoFormat};
use gaze_overlay::{FfmpegMovieWriter, MovieWriter};
use video_frame::RgbFrame;

use crate::{Error, Result};

/// Produces the video file of a session.
pub trait ScreenCapture: Send {
    /// Begin writing to `video_path`. Must be called within a tokio runtime.
    fn start(&mut self, video_path: &Path) -> Result<()>;
    /// Stop and wait until the video file is closed, at most `timeout`.
    fn stop(&mut self, timeout: Duration) -> impl Future<Output = Result<CaptureSummary>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    pub video_path: PathBuf,
    pub frames: usize,
}

/// Source of screen images.
pub trait FrameGrabber: Send + 'static {
    /// Size of every grabbed frame.
    fn size(&self) -> (u32, u32);
    fn grab(&mut self) -> Result<RgbFrame>;
}

/// Opens the video writer of a capture.
pub type WriterFactory =
    Box<dyn Fn(&Path, VideoFormat) -> Result<Box<dyn MovieWriter + Send>> + Send + Sync>;

/// Filled by the capture task when it ends.
type Finished<G> = Arc<Mutex<Option<(G, Result<usize>)>>>;

struct Running<G> {
    video_path: PathBuf,
    stop: Arc<AtomicBool>,
    finished: Finished<G>,
    handle: JoinHandle<()>,
}

/// Grabs frames at a fixed rate and writes them until stopped.
pub struct ScreenRecorder<G> {
    grabber: Option<G>,
    fps: f64,
    open_writer: WriterFactory,
    running: Option<Running<G>>,
}

impl<G: FrameGrabber> ScreenRecorder<G> {
    pub fn new(grabber: G, fps: f64, open_writer: WriterFactory) -> Self {
        Self {
            grabber: Some(grabber),
            fps,
            open_writer,
            running: None,
        }
    }

    /// Encode with ffmpeg.
    pub fn with_ffmpeg(grabber: G, fps: f64, encoder: FfmpegEncoderOptions) -> Self {
        let open_writer: WriterFactory = Box::new(
            move |path: &Path, format: VideoFormat| -> Result<Box<dyn MovieWriter + Send>> {
                let writer = FfmpegMovieWriter::new(path, format, encoder)?;
                Ok(Box::new(writer))
            },
        );
        Self::new(grabber, fps, open_writer)
    }

    /// True from `start` until a `stop` has collected the capture task.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Take back the grabber from an ended capture task.
    fn reclaim(&mut self, running: Running<G>) -> Result<CaptureSummary> {
        let (grabber, result) = running
            .finished
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| Error::Capture("capture task ended without a result".into()))?;
        self.grabber = Some(grabber);
        let frames = result?;
        Ok(CaptureSummary {
            video_path: running.video_path,
            frames,
        })
    }
}

fn capture_loop<G: FrameGrabber>(
    grabber: &mut G,
    writer: &mut dyn MovieWriter,
    interval: Duration,
    stop: &AtomicBool,
) -> Result<usize> {
    let mut frames = 0;
    let mut next = Instant::now();
    // At least one frame, even if stop was requested before this task ran.
    loop {
        let frame = grabber.grab()?;
        writer.write_frame(&frame)?;
        frames += 1;
        if stop.load(Ordering::SeqCst) {
            break;
        }

        next += interval;
        let now = Instant::now();
        match next.checked_duration_since(now) {
            Some(wait) => std::thread::sleep(wait),
            None => {
                debug!("capture running behind at frame {frames}");
                next = now;
            }
        }
    }
    writer.finish()?;
    Ok(frames)
}

impl<G: FrameGrabber> ScreenCapture for ScreenRecorder<G> {
    fn start(&mut self, video_path: &Path) -> Result<()> {
        let busy = match &self.running {
            Some(running) if !running.stop.load(Ordering::SeqCst) => Some("capturing"),
            Some(running) if !running.handle.is_finished() => Some("stopping"),
            _ => None,
        };
        if let Some(state) = busy {
            return Err(Error::InvalidState {
                action: "start capture",
                state,
            });
        }
        // A capture whose stop timed out has ended since.
        if let Some(running) = self.running.take() {
            let path = running.video_path.clone();
            match self.reclaim(running) {
                Ok(summary) => info!(
                    "late capture of \"{}\" ended with {} frames",
                    path.display(),
                    summary.frames
                ),
                Err(e) => warn!("late capture of \"{}\" failed: {e}", path.display()),
            }
        }
        let interval = (self.fps.is_finite() && self.fps > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / self.fps).ok())
            .flatten()
            .ok_or_else(|| {
                Error::Configuration(format!("capture fps {} is out of range", self.fps))
            })?;
        let mut grabber = self
            .grabber
            .take()
            .ok_or_else(|| Error::Capture("frame grabber lost in an earlier capture".into()))?;
        let (width, height) = grabber.size();
        let format = VideoFormat {
            width,
            height,
            fps: self.fps,
        };
        let mut writer = match (self.open_writer)(video_path, format) {
            Ok(writer) => writer,
            Err(e) => {
                self.grabber = Some(grabber);
                return Err(e);
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let finished: Finished<G> = Default::default();
        let handle = {
            let stop = stop.clone();
            let finished = finished.clone();
            tokio::task::spawn_blocking(move || {
                let result = capture_loop(&mut grabber, &mut *writer, interval, &stop);
                if let Ok(mut slot) = finished.lock() {
                    *slot = Some((grabber, result));
                }
            })
        };
        info!(
            "capturing {width}x{height} @ {} fps to \"{}\"",
            self.fps,
            video_path.display()
        );
        self.running = Some(Running {
            video_path: video_path.to_path_buf(),
            stop,
            finished,
            handle,
        });
        Ok(())
    }

    async fn stop(&mut self, timeout: Duration) -> Result<CaptureSummary> {
        let mut running = self.running.take().ok_or(Error::InvalidState {
            action: "stop capture",
            state: "not capturing",
        })?;
        running.stop.store(true, Ordering::SeqCst);
        let waited = tokio::time::timeout(timeout, &mut running.handle).await;
        match waited {
            Ok(joined) => joined?,
            Err(_elapsed) => {
                warn!(
                    "capture of \"{}\" did not stop in time",
                    running.video_path.display()
                );
                // Kept so a later stop or start can collect it.
                self.running = Some(running);
                return Err(Error::CaptureTimeout(timeout));
            }
        }
        let summary = self.reclaim(running)?;
        info!(
            "captured {} frames to \"{}\"",
            summary.frames,
            summary.video_path.display()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use test_log::test;

    struct Gray {
        n: u8,
    }

    impl FrameGrabber for Gray {
        fn size(&self) -> (u32, u32) {
            (8, 4)
        }
        fn grab(&mut self) -> Result<RgbFrame> {
            self.n = self.n.wrapping_add(1);
            Ok(RgbFrame::filled(8, 4, [self.n; 3]))
        }
    }

    struct Broken;

    impl FrameGrabber for Broken {
        fn size(&self) -> (u32, u32) {
            (8, 4)
        }
        fn grab(&mut self) -> Result<RgbFrame> {
            Err(Error::Capture("display gone".into()))
        }
    }

    struct Slow;

    impl FrameGrabber for Slow {
        fn size(&self) -> (u32, u32) {
            (8, 4)
        }
        fn grab(&mut self) -> Result<RgbFrame> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(RgbFrame::filled(8, 4, [0; 3]))
        }
    }

    struct Counting {
        frames: Arc<AtomicUsize>,
        finished: Arc<AtomicBool>,
    }

    impl MovieWriter for Counting {
        fn write_frame(&mut self, _frame: &RgbFrame) -> gaze_overlay::Result<()> {
            self.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn finish(&mut self) -> gaze_overlay::Result<()> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_factory(frames: Arc<AtomicUsize>, finished: Arc<AtomicBool>) -> WriterFactory {
        Box::new(
            move |_path: &Path, format: VideoFormat| -> Result<Box<dyn MovieWriter + Send>> {
                assert_eq!((format.width, format.height), (8, 4));
                Ok(Box::new(Counting {
                    frames: frames.clone(),
                    finished: finished.clone(),
                }))
            },
        )
    }

    #[test(tokio::test)]
    async fn test_start_stop() -> eyre::Result<()> {
        let frames = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let mut rec = ScreenRecorder::new(
            Gray { n: 0 },
            100.0,
            counting_factory(frames.clone(), finished.clone()),
        );

        rec.start(Path::new("a.mp4"))?;
        assert!(rec.start(Path::new("b.mp4")).is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let summary = rec.stop(Duration::from_secs(5)).await?;

        assert!(summary.frames > 0);
        assert_eq!(summary.frames, frames.load(Ordering::SeqCst));
        assert_eq!(summary.video_path, Path::new("a.mp4"));
        assert!(finished.load(Ordering::SeqCst));
        assert!(!rec.is_running());

        // The grabber is returned, so capture can run again.
        rec.start(Path::new("b.mp4"))?;
        rec.stop(Duration::from_secs(5)).await?;
        Ok(())
    }

    #[test(tokio::test)]
    async fn test_stop_without_start() {
        let mut rec = ScreenRecorder::new(
            Gray { n: 0 },
            10.0,
            counting_factory(Default::default(), Default::default()),
        );
        let err = rec.stop(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }), "{err}");
    }

    #[test(tokio::test)]
    async fn test_grab_error_is_reported_on_stop() -> eyre::Result<()> {
        let finished = Arc::new(AtomicBool::new(false));
        let mut rec = ScreenRecorder::new(
            Broken,
            10.0,
            counting_factory(Default::default(), finished.clone()),
        );
        rec.start(Path::new("a.mp4"))?;
        let err = rec.stop(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::Capture(_)), "{err}");
        assert!(!finished.load(Ordering::SeqCst));
        Ok(())
    }

    #[test(tokio::test)]
    async fn test_immediate_stop_writes_one_frame() -> eyre::Result<()> {
        let frames = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let mut rec = ScreenRecorder::new(
            Gray { n: 0 },
            10.0,
            counting_factory(frames.clone(), finished.clone()),
        );
        rec.start(Path::new("a.mp4"))?;
        let summary = rec.stop(Duration::from_secs(5)).await?;
        assert!(summary.frames >= 1);
        assert_eq!(summary.frames, frames.load(Ordering::SeqCst));
        assert!(finished.load(Ordering::SeqCst));
        Ok(())
    }

    #[test(tokio::test)]
    async fn test_restart_after_stop_timeout() -> eyre::Result<()> {
        let mut rec = ScreenRecorder::new(
            Slow,
            10.0,
            counting_factory(Default::default(), Default::default()),
        );

        // Collected by a second stop.
        rec.start(Path::new("a.mp4"))?;
        let err = rec.stop(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, Error::CaptureTimeout(_)), "{err}");
        assert!(rec.is_running());
        let err = rec.start(Path::new("b.mp4")).unwrap_err();
        assert!(
            matches!(err, Error::InvalidState { state: "stopping", .. }),
            "{err}"
        );
        let summary = rec.stop(Duration::from_secs(5)).await?;
        assert_eq!(summary.video_path, Path::new("a.mp4"));
        assert_eq!(summary.frames, 1);

        // Collected by the next start once the task has ended.
        rec.start(Path::new("c.mp4"))?;
        let err = rec.stop(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, Error::CaptureTimeout(_)), "{err}");
        tokio::time::sleep(Duration::from_secs(1)).await;
        rec.start(Path::new("d.mp4"))?;
        let summary = rec.stop(Duration::from_secs(5)).await?;
        assert_eq!(summary.video_path, Path::new("d.mp4"));
        assert!(!rec.is_running());
        Ok(())
    }

    #[test(tokio::test)]
    async fn test_bad_fps() {
        for fps in [0.0, -1.0, f64::NAN, 1e-300] {
            let mut rec = ScreenRecorder::new(
                Gray { n: 0 },
                fps,
                counting_factory(Default::default(), Default::default()),
            );
            assert!(
                matches!(rec.start(Path::new("a.mp4")), Err(Error::Configuration(_))),
                "{fps}"
            );
            // The grabber is kept.
            rec.fps = 10.0;
            assert!(rec.start(Path::new("a.mp4")).is_ok());
            rec.stop(Duration::from_secs(5)).await.ok();
        }
    }
}

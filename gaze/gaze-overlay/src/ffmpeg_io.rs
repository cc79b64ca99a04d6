use std::path::Path;

use ffmpeg_frame_reader::FfmpegFrameReader;
use ffmpeg_writer::{FfmpegEncoderOptions, FfmpegWriter, VideoFormat};
use video_frame::RgbFrame;

use crate::{Error, MovieReader, MovieWriter, Result};

impl MovieReader for FfmpegFrameReader {
    fn filename(&self) -> &str {
        FfmpegFrameReader::filename(self)
    }
    fn frame_count(&self) -> usize {
        self.info().frame_count
    }
    fn fps(&self) -> f64 {
        self.info().fps
    }
    fn width(&self) -> u32 {
        self.info().width
    }
    fn height(&self) -> u32 {
        self.info().height
    }
    fn next_frame(&mut self) -> Option<Result<RgbFrame>> {
        FfmpegFrameReader::next_frame(self).map(|r| r.map_err(Error::from))
    }
}

/// Encode frames to a file with ffmpeg.
pub struct FfmpegMovieWriter {
    inner: Option<FfmpegWriter>,
}

impl FfmpegMovieWriter {
    /// Start ffmpeg writing to `path`, replacing any existing file.
    pub fn new(path: &Path, format: VideoFormat, opts: FfmpegEncoderOptions) -> Result<Self> {
        let fname = path.to_str().ok_or_else(|| {
            Error::Configuration(format!("path \"{}\" is not UTF8", path.display()))
        })?;
        tracing::debug!("writing \"{fname}\" as {format:?} with {opts:?}");
        Ok(Self {
            inner: Some(FfmpegWriter::new(fname, format, opts)?),
        })
    }
}

impl MovieWriter for FfmpegMovieWriter {
    fn write_frame(&mut self, frame: &RgbFrame) -> Result<()> {
        let inner = self.inner.as_mut().ok_or(ffmpeg_writer::Error::Closed)?;
        inner.write_frame(frame)?;
        Ok(())
    }
    fn finish(&mut self) -> Result<()> {
        if let Some(inner) = self.inner.take() {
            inner.close()?;
        }
        Ok(())
    }
}

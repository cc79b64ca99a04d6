//! Frame sources and sinks held in memory.

use std::collections::VecDeque;

use video_frame::RgbFrame;

use crate::{Error, MovieReader, MovieWriter, Result};

/// Frames of a known size and rate, handed out in order.
pub struct InMemoryReader {
    name: String,
    fps: f64,
    width: u32,
    height: u32,
    frame_count: usize,
    frames: VecDeque<RgbFrame>,
}

impl InMemoryReader {
    /// All frames must be `width` by `height`.
    pub fn new(name: &str, fps: f64, width: u32, height: u32, frames: Vec<RgbFrame>) -> Result<Self> {
        if let Some(bad) = frames
            .iter()
            .find(|f| f.width != width || f.height != height)
        {
            return Err(Error::Configuration(format!(
                "frame {bad:?} is not {width}x{height}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            fps,
            width,
            height,
            frame_count: frames.len(),
            frames: frames.into(),
        })
    }
}

impl MovieReader for InMemoryReader {
    fn filename(&self) -> &str {
        &self.name
    }
    fn frame_count(&self) -> usize {
        self.frame_count
    }
    fn fps(&self) -> f64 {
        self.fps
    }
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn next_frame(&mut self) -> Option<Result<RgbFrame>> {
        self.frames.pop_front().map(Ok)
    }
}

/// Collects written frames.
#[derive(Debug, Default)]
pub struct InMemoryWriter {
    pub frames: Vec<RgbFrame>,
    pub finished: bool,
}

impl MovieWriter for InMemoryWriter {
    fn write_frame(&mut self, frame: &RgbFrame) -> Result<()> {
        if self.finished {
            return Err(Error::Render("write after finish".into()));
        }
        self.frames.push(frame.clone());
        Ok(())
    }
    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

//! Read a video file frame-by-frame by running `ffprobe` for the stream
//! properties and `ffmpeg` to decode into raw RGB24 frames on a pipe.

use std::{
    io::{BufReader, Read},
    process::{Child, ChildStdout, Command, Stdio},
};

use serde::Deserialize;

use video_frame::RgbFrame;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffprobe error ({})", output.status)]
    FfprobeError { output: std::process::Output },
    #[error("ffmpeg error ({})", output.status)]
    FfmpegError { output: std::process::Output },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no video stream in \"{0}\"")]
    NoVideoStream(String),
    #[error("cannot parse frame rate \"{0}\"")]
    BadFrameRate(String),
    #[error("frame count of \"{0}\" unknown")]
    UnknownFrameCount(String),
    #[error("video ended within a frame")]
    TruncatedFrame,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Convert a Result<T,E> into Option<Result<T,E>> and return Some(Err(E)) on error.
macro_rules! try_iter {
    ($x:expr) => {
        match $x {
            Ok(val) => val,
            Err(e) => {
                return Some(Err(e.into()));
            }
        }
    };
}

/// Properties of the first video stream of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// frames per second
    pub fps: f64,
    pub frame_count: usize,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
}

/// Parse an ffprobe rational like "30000/1001". Returns None for zero or
/// undefined rates like "0/0".
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    let fps = num / den;
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_probe_json(filename: &str, buf: &[u8]) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_slice(buf)?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| Error::NoVideoStream(filename.to_string()))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .ok_or_else(|| {
            Error::BadFrameRate(
                stream
                    .r_frame_rate
                    .clone()
                    .unwrap_or_else(|| "(missing)".into()),
            )
        })?;

    let frame_count = stream
        .nb_read_packets
        .as_deref()
        .or(stream.nb_frames.as_deref())
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| Error::UnknownFrameCount(filename.to_string()))?;

    Ok(VideoInfo {
        width: stream.width,
        height: stream.height,
        fps,
        frame_count,
    })
}

/// Query the first video stream of `filename` with ffprobe.
///
/// Packets are counted, which requires reading through the file once.
pub fn probe(filename: &str) -> Result<VideoInfo> {
    let args = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-count_packets",
        "-show_entries",
        "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames,nb_read_packets",
        "-of",
        "json",
        filename,
    ];
    let child = Command::new("ffprobe")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(Error::FfprobeError { output });
    }
    let info = parse_probe_json(filename, &output.stdout)?;
    tracing::debug!("probed \"{filename}\": {info:?}");
    Ok(info)
}

/// Read a file frame-by-frame.
pub struct FfmpegFrameReader {
    filename: String,
    info: VideoInfo,
    ffmpeg_child: Child,
    stdout: BufReader<ChildStdout>,
    count: usize,
    file_done: bool,
}

impl FfmpegFrameReader {
    pub fn new(filename: &str) -> Result<Self> {
        let info = probe(filename)?;
        let args = [
            "-hide_banner",
            "-v",
            "error",
            "-nostdin",
            "-i",
            filename,
            "-fps_mode",
            "passthrough",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-",
        ];
        let mut ffmpeg_child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = ffmpeg_child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no stdout from ffmpeg")
        })?;
        Ok(Self {
            filename: filename.to_string(),
            info,
            ffmpeg_child,
            stdout: BufReader::new(stdout),
            count: 0,
            file_done: false,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// The number of frames returned so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Fill `buf` completely. Returns false if the stream ended before any
    /// byte was read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            Ok(false)
        } else if filled < buf.len() {
            Err(Error::TruncatedFrame)
        } else {
            Ok(true)
        }
    }

    /// Wait for ffmpeg to exit and check its status.
    fn finish(&mut self) -> Result<()> {
        let status = self.ffmpeg_child.wait()?;
        if status.success() {
            return Ok(());
        }
        let mut stderr = Vec::new();
        if let Some(mut err) = self.ffmpeg_child.stderr.take() {
            err.read_to_end(&mut stderr)?;
        }
        let output = std::process::Output {
            status,
            stdout: Vec::new(),
            stderr,
        };
        Err(Error::FfmpegError { output })
    }

    /// Get the next frame.
    pub fn next_frame(&mut self) -> Option<Result<RgbFrame>> {
        if self.file_done {
            return None;
        }
        let mut buf = vec![0u8; video_frame::buffer_size(self.info.width, self.info.height)];
        let got_frame = match self.fill(&mut buf) {
            Ok(got_frame) => got_frame,
            Err(e) => {
                self.file_done = true;
                return Some(Err(e));
            }
        };
        if !got_frame {
            self.file_done = true;
            try_iter!(self.finish());
            if self.count != self.info.frame_count {
                tracing::warn!(
                    "\"{}\": decoded {} frames, but ffprobe reported {}",
                    self.filename,
                    self.count,
                    self.info.frame_count
                );
            }
            return None;
        }
        self.count += 1;
        // Buffer size is exact, so construction cannot fail.
        RgbFrame::new(self.info.width, self.info.height, buf).map(Ok)
    }
}

impl Drop for FfmpegFrameReader {
    fn drop(&mut self) {
        if !self.file_done {
            // Stop decoding if the caller quit early.
            let _ = self.ffmpeg_child.kill();
            let _ = self.ffmpeg_child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert_eq!(parse_rate("10"), Some(10.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("abc"), None);
    }

    #[test]
    fn test_parse_probe_json() -> eyre::Result<()> {
        let buf = br#"{"programs": [], "streams": [{"width": 640, "height": 480,
            "r_frame_rate": "10/1", "avg_frame_rate": "0/0",
            "nb_read_packets": "10"}]}"#;
        let info = parse_probe_json("x.mkv", buf)?;
        assert_eq!(
            info,
            VideoInfo {
                width: 640,
                height: 480,
                fps: 10.0,
                frame_count: 10
            }
        );
        Ok(())
    }

    #[test]
    fn test_parse_probe_json_no_stream() {
        let result = parse_probe_json("x.mp4", br#"{"streams": []}"#);
        assert!(matches!(result, Err(Error::NoVideoStream(_))));
    }

    #[test]
    #[ignore = "requires ffmpeg and ffprobe"]
    fn test_read_back_frames() -> eyre::Result<()> {
        let tempdir = tempfile::tempdir()?;
        let fname = tempdir.path().join("gray.mkv");
        let fname = fname.to_str().unwrap();

        let mut wtr = ffmpeg_writer::FfmpegWriter::new(
            fname,
            ffmpeg_writer::VideoFormat {
                width: 32,
                height: 16,
                fps: 10.0,
            },
            ffmpeg_writer::FfmpegEncoderOptions::Lossless,
        )?;
        for i in 0..5u8 {
            wtr.write_frame(&RgbFrame::filled(32, 16, [i * 40, i * 40, i * 40]))?;
        }
        wtr.close()?;

        let mut rdr = FfmpegFrameReader::new(fname)?;
        assert_eq!(rdr.info().frame_count, 5);
        assert_eq!(rdr.info().fps, 10.0);
        let mut n = 0;
        while let Some(frame) = rdr.next_frame() {
            let frame = frame?;
            assert_eq!(frame.width, 32);
            n += 1;
        }
        assert_eq!(n, 5);
        Ok(())
    }
}

use std::{
    collections::VecDeque,
    io::Write,
    process::{Child, ChildStdin, Command, Stdio},
};

use serde::{Deserialize, Serialize};

use video_frame::RgbFrame;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg error ({})", output.status)]
    FfmpegError { output: std::process::Output },
    #[error("string not valid UTF8")]
    FromUtf8Error(#[from] std::string::FromUtf8Error),
    #[error("unexpected ffmpeg output: {0}")]
    UnexpectedFfmpegOutput(String),
    #[error("frame is {actual_width}x{actual_height}, but video is {width}x{height}")]
    FrameSizeMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("writer already closed")]
    Closed,
}

type Result<T> = std::result::Result<T, Error>;

/// Properties of the video to be written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// frames per second
    pub fps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FfmpegEncoderOptions {
    H264VideoToolbox,
    H264Nvenc,
    H264Vaapi,
    /// FFV1, lossless. Needs a container supporting it, such as `.mkv`.
    Lossless,
    /// Let ffmpeg pick the codec from the output filename.
    #[default]
    BareFfmpeg,
}

/// stderr is only read once ffmpeg exits, so it must stay small.
fn prefix() -> Vec<String> {
    zq(&[
        "-hide_banner",
        "-nostdin",
        "-loglevel",
        "error",
        "-nostats",
        "-y",
    ])
}

fn raw_input(format: &VideoFormat) -> Vec<String> {
    let size = format!("{}x{}", format.width, format.height);
    let rate = format!("{}", format.fps);
    vec![
        zq(&["-f", "rawvideo", "-pix_fmt", "rgb24", "-s"]),
        vec![size, "-r".into(), rate],
        zq(&["-i", "-", "-fps_mode", "passthrough"]),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn zq(x: &[&str]) -> Vec<String> {
    x.iter().map(|x| String::from(*x)).collect()
}

impl FfmpegEncoderOptions {
    fn to_args(self, format: &VideoFormat) -> Vec<String> {
        const VIDEO_CODEC: &str = "-c:v";
        const YUV420: [&str; 2] = ["-pix_fmt", "yuv420p"];
        use FfmpegEncoderOptions::*;
        match self {
            H264Vaapi => vec![
                prefix(),
                zq(&["-vaapi_device", "/dev/dri/renderD128"]),
                raw_input(format),
                zq(&["-vf", "format=nv12,hwupload", VIDEO_CODEC, "h264_vaapi"]),
            ],
            H264Nvenc => vec![
                prefix(),
                raw_input(format),
                zq(&[VIDEO_CODEC, "h264_nvenc"]),
                zq(&YUV420),
            ],
            H264VideoToolbox => vec![
                prefix(),
                raw_input(format),
                zq(&[VIDEO_CODEC, "h264_videotoolbox"]),
                zq(&YUV420),
            ],
            Lossless => vec![prefix(), raw_input(format), zq(&[VIDEO_CODEC, "ffv1"])],
            BareFfmpeg => vec![prefix(), raw_input(format)],
        }
        .into_iter()
        .flatten()
        .collect()
    }

    fn from_hwaccel(s: &str) -> Option<Self> {
        use FfmpegEncoderOptions::*;
        match s.trim() {
            "vaapi" => Some(H264Vaapi),
            "videotoolbox" => Some(H264VideoToolbox),
            _ => None,
        }
    }
}

/// Ask ffmpeg which hardware acceleration methods are available.
pub fn platform_hardware_encoder() -> Result<FfmpegEncoderOptions> {
    let args = ["-hide_banner", "-nostdin", "-hwaccels"];
    let ffmpeg_child = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let out = ffmpeg_child.wait_with_output()?;
    let lines = String::from_utf8(out.stdout)?;
    parse_hwaccels(&lines)
}

fn parse_hwaccels(lines: &str) -> Result<FfmpegEncoderOptions> {
    let mut lines: VecDeque<_> = lines.lines().collect();
    let line0 = lines.pop_front().unwrap_or_default();
    if line0 != "Hardware acceleration methods:" {
        return Err(Error::UnexpectedFfmpegOutput(line0.into()));
    }
    for line in lines.into_iter() {
        if let Some(opt) = FfmpegEncoderOptions::from_hwaccel(line) {
            return Ok(opt);
        }
    }
    Ok(FfmpegEncoderOptions::BareFfmpeg)
}

/// Write raw frames into an ffmpeg process which encodes them to a file.
pub struct FfmpegWriter {
    format: VideoFormat,
    stdin: Option<ChildStdin>,
    ffmpeg_child: Child,
    count: usize,
}

impl FfmpegWriter {
    pub fn new(fname: &str, format: VideoFormat, opts: FfmpegEncoderOptions) -> Result<Self> {
        let mut args = opts.to_args(&format);
        args.push(fname.into());
        tracing::debug!("running: ffmpeg {}", args.join(" "));
        let mut ffmpeg_child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = ffmpeg_child.stdin.take();
        if stdin.is_none() {
            return Err(Error::Closed);
        }
        Ok(Self {
            format,
            stdin,
            ffmpeg_child,
            count: 0,
        })
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    /// The number of frames written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn write_frame(&mut self, frame: &RgbFrame) -> Result<()> {
        if frame.width != self.format.width || frame.height != self.format.height {
            return Err(Error::FrameSizeMismatch {
                width: self.format.width,
                height: self.format.height,
                actual_width: frame.width,
                actual_height: frame.height,
            });
        }
        let stdin = self.stdin.as_mut().ok_or(Error::Closed)?;
        match stdin.write_all(frame.image_data()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                // Apparently ffmpeg died.
                self.stdin = None;
                let status = self.ffmpeg_child.wait()?;
                use std::io::Read;
                let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
                if let Some(mut out) = self.ffmpeg_child.stdout.take() {
                    out.read_to_end(&mut stdout)?;
                }
                if let Some(mut err) = self.ffmpeg_child.stderr.take() {
                    err.read_to_end(&mut stderr)?;
                }
                let output = std::process::Output {
                    status,
                    stdout,
                    stderr,
                };
                return Err(Error::FfmpegError { output });
            }
            Err(e) => {
                return Err(e.into());
            }
        }
        self.count += 1;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        // Close stdin, telling ffmpeg to end.
        std::mem::drop(self.stdin.take());

        // Wait for ffmpeg to end.
        let output = self.ffmpeg_child.wait_with_output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::FfmpegError { output })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn args_str(opts: FfmpegEncoderOptions) -> String {
        let format = VideoFormat {
            width: 640,
            height: 480,
            fps: 29.5,
        };
        opts.to_args(&format).join(" ")
    }

    #[test]
    fn test_args() {
        assert_eq!(
            args_str(FfmpegEncoderOptions::BareFfmpeg),
            "-hide_banner -nostdin -loglevel error -nostats -y -f rawvideo -pix_fmt rgb24 -s 640x480 -r 29.5 -i - -fps_mode passthrough"
        );
        assert!(args_str(FfmpegEncoderOptions::Lossless).ends_with("-c:v ffv1"));
        assert!(args_str(FfmpegEncoderOptions::H264Vaapi).contains("h264_vaapi"));
    }

    #[test]
    fn test_no_progress_output_for_any_encoder() {
        use FfmpegEncoderOptions::*;
        for opts in [H264VideoToolbox, H264Nvenc, H264Vaapi, Lossless, BareFfmpeg] {
            let args = args_str(opts);
            assert!(args.contains("-loglevel error"), "{args}");
            assert!(args.contains("-nostats"), "{args}");
        }
    }

    #[test]
    fn test_parse_hwaccels() -> eyre::Result<()> {
        let out = "Hardware acceleration methods:\ncuda\nvaapi\n";
        assert_eq!(parse_hwaccels(out)?, FfmpegEncoderOptions::H264Vaapi);
        let out = "Hardware acceleration methods:\n\n";
        assert_eq!(parse_hwaccels(out)?, FfmpegEncoderOptions::BareFfmpeg);
        assert!(parse_hwaccels("something else").is_err());
        Ok(())
    }

    #[test]
    #[ignore = "requires ffmpeg"]
    fn test_write_video() -> eyre::Result<()> {
        let tempdir = tempfile::tempdir()?;
        let fname = tempdir.path().join("out.mkv");
        let format = VideoFormat {
            width: 32,
            height: 16,
            fps: 25.0,
        };
        let mut wtr = FfmpegWriter::new(
            fname.to_str().unwrap(),
            format,
            FfmpegEncoderOptions::Lossless,
        )?;
        for _ in 0..3 {
            wtr.write_frame(&RgbFrame::zeros(32, 16))?;
        }
        assert!(matches!(
            wtr.write_frame(&RgbFrame::zeros(8, 8)),
            Err(Error::FrameSizeMismatch { .. })
        ));
        assert_eq!(wtr.count(), 3);
        wtr.close()?;
        assert!(fname.exists());
        Ok(())
    }
}

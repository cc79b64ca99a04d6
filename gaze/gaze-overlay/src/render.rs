//! Draw fixation and saccade markers onto video frames.

use std::sync::atomic::{AtomicBool, Ordering};

use resvg::tiny_skia::{
    FillRule, LineCap, Paint, Path, PathBuilder, Pixmap, Stroke, Transform,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use gaze_types::{Fixation, GazePoint, Saccade, TimeInterval, is_valid_coord};
use video_frame::RgbFrame;

use crate::{
    Error, MovieReader, MovieWriter, Result,
    clock::ClockAlignment,
    cursor::{EventCursor, SampleCursor},
};

/// Fixation duration drawn at the configured base radius.
pub const REFERENCE_FIXATION_MS: f32 = 250.0;

/// Smallest ring radius for very short fixations.
pub const MIN_FIXATION_RADIUS: f32 = 4.0;

/// An RGB color, written as `[r, g, b]` in configuration files and as
/// `"r,g,b"` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const GREEN: Rgb = Rgb([0, 255, 0]);

    fn paint(&self) -> Paint<'static> {
        let [r, g, b] = self.0;
        let mut paint = Paint::default();
        paint.set_color_rgba8(r, g, b, 255);
        paint.anti_alias = true;
        paint
    }
}

impl std::str::FromStr for Rgb {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u8>())
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|e| format!("color \"{s}\": {e}"))?;
        match parts.as_slice() {
            [r, g, b] => Ok(Rgb([*r, *g, *b])),
            _ => Err(format!("color \"{s}\" is not of the form R,G,B")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OverlayStyle {
    pub fixation_color: Rgb,
    /// Ring radius in pixels of a fixation lasting [REFERENCE_FIXATION_MS].
    pub fixation_radius: f32,
    /// Upper limit of the ring radius. Defaults to three times
    /// `fixation_radius`.
    pub max_fixation_radius: Option<f32>,
    pub ring_width: f32,
    pub saccade_color: Rgb,
    pub saccade_width: f32,
    /// Also draw the interpolated gaze position of every frame.
    pub show_gaze_point: bool,
    pub gaze_point_color: Rgb,
    pub gaze_point_radius: f32,
    /// Gaze is not interpolated between samples further apart than this.
    pub max_interpolation_gap_ms: i64,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            fixation_color: Rgb::GREEN,
            fixation_radius: 20.0,
            max_fixation_radius: None,
            ring_width: 3.0,
            saccade_color: Rgb([255, 200, 0]),
            saccade_width: 2.0,
            show_gaze_point: false,
            gaze_point_color: Rgb([255, 0, 0]),
            gaze_point_radius: 5.0,
            max_interpolation_gap_ms: 20,
        }
    }
}

impl OverlayStyle {
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        let positive = [
            ("fixation_radius", self.fixation_radius),
            ("ring_width", self.ring_width),
            ("saccade_width", self.saccade_width),
            ("gaze_point_radius", self.gaze_point_radius),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{name} must be positive, not {value}"));
            }
        }
        if self.max_fixation_radius() < self.fixation_radius {
            return Err(format!(
                "max_fixation_radius {} is smaller than fixation_radius {}",
                self.max_fixation_radius(),
                self.fixation_radius
            ));
        }
        if self.max_interpolation_gap_ms < 0 {
            return Err("max_interpolation_gap_ms must not be negative".into());
        }
        Ok(())
    }

    pub fn max_fixation_radius(&self) -> f32 {
        self.max_fixation_radius
            .unwrap_or(3.0 * self.fixation_radius)
    }

    /// Ring radius of a fixation lasting `duration_ms`.
    pub fn fixation_radius_for(&self, duration_ms: i64) -> f32 {
        let max = self.max_fixation_radius();
        let r = self.fixation_radius * duration_ms as f32 / REFERENCE_FIXATION_MS;
        r.max(MIN_FIXATION_RADIUS).min(max)
    }
}

/// What is active at one frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameOverlay<'a> {
    pub fixation: Option<&'a Fixation>,
    pub saccade: Option<&'a Saccade>,
    pub gaze: Option<GazePoint>,
}

/// Draws markers onto frames of a fixed size.
pub struct OverlayRenderer {
    width: u32,
    height: u32,
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(width: u32, height: u32, style: OverlayStyle) -> Self {
        Self {
            width,
            height,
            style,
        }
    }

    fn in_frame(&self, p: GazePoint) -> bool {
        is_valid_coord(p.x)
            && is_valid_coord(p.y)
            && p.x >= 0.0
            && p.y >= 0.0
            && p.x < self.width as f64
            && p.y < self.height as f64
    }

    /// Drop markers with coordinates outside the frame.
    fn visible<'a>(&self, overlay: &FrameOverlay<'a>) -> FrameOverlay<'a> {
        FrameOverlay {
            fixation: overlay
                .fixation
                .filter(|f| self.in_frame(GazePoint::new(f.x, f.y))),
            saccade: overlay
                .saccade
                .filter(|s| self.in_frame(s.start_point()) && self.in_frame(s.end_point())),
            gaze: overlay.gaze.filter(|p| self.in_frame(*p)),
        }
    }

    /// Draw `overlay` onto `frame`. A frame with nothing visible to draw is
    /// returned untouched.
    pub fn draw(&self, mut frame: RgbFrame, overlay: &FrameOverlay) -> Result<RgbFrame> {
        let visible = self.visible(overlay);
        if visible.fixation.is_none() && visible.saccade.is_none() && visible.gaze.is_none() {
            return Ok(frame);
        }

        let mut pixmap = to_pixmap(&frame)?;
        if let Some(saccade) = visible.saccade {
            self.draw_saccade(&mut pixmap, saccade);
        }
        if let Some(fixation) = visible.fixation {
            self.draw_fixation(&mut pixmap, fixation);
        }
        if let Some(gaze) = visible.gaze {
            if let Some(dot) = PathBuilder::from_circle(
                px(gaze.x),
                px(gaze.y),
                self.style.gaze_point_radius,
            ) {
                pixmap.fill_path(
                    &dot,
                    &self.style.gaze_point_color.paint(),
                    FillRule::Winding,
                    Transform::identity(),
                    None,
                );
            }
        }
        copy_from_pixmap(&pixmap, &mut frame);
        Ok(frame)
    }

    fn draw_fixation(&self, pixmap: &mut Pixmap, fixation: &Fixation) {
        let (cx, cy) = (px(fixation.x), px(fixation.y));
        let radius = self.style.fixation_radius_for(fixation.duration());
        let paint = self.style.fixation_color.paint();
        if let Some(ring) = PathBuilder::from_circle(cx, cy, radius) {
            let stroke = Stroke {
                width: self.style.ring_width,
                ..Default::default()
            };
            pixmap.stroke_path(&ring, &paint, &stroke, Transform::identity(), None);
        }
        let center_radius = (radius * 0.25).max(2.0);
        if let Some(center) = PathBuilder::from_circle(cx, cy, center_radius) {
            pixmap.fill_path(
                &center,
                &paint,
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
    }

    fn draw_saccade(&self, pixmap: &mut Pixmap, saccade: &Saccade) {
        let (x0, y0) = (px(saccade.start_x), px(saccade.start_y));
        let (x1, y1) = (px(saccade.end_x), px(saccade.end_y));
        let paint = self.style.saccade_color.paint();
        let stroke = Stroke {
            width: self.style.saccade_width,
            line_cap: LineCap::Round,
            ..Default::default()
        };
        let mut pb = PathBuilder::new();
        pb.move_to(x0, y0);
        pb.line_to(x1, y1);
        if let Some(line) = pb.finish() {
            pixmap.stroke_path(&line, &paint, &stroke, Transform::identity(), None);
        }
        if let Some(head) = arrow_head(x0, y0, x1, y1, self.style.saccade_width) {
            pixmap.fill_path(&head, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }
}

/// Pixel center of a gaze coordinate.
fn px(v: f64) -> f32 {
    v as f32 + 0.5
}

/// Triangle at `(x1, y1)` pointing away from `(x0, y0)`.
fn arrow_head(x0: f32, y0: f32, x1: f32, y1: f32, line_width: f32) -> Option<Path> {
    let (dx, dy) = (x1 - x0, y1 - y0);
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1.0 {
        return None;
    }
    let (ux, uy) = (dx / len, dy / len);
    let head_len = (4.0 * line_width).max(8.0).min(len);
    let half_width = 0.5 * head_len;
    let (bx, by) = (x1 - ux * head_len, y1 - uy * head_len);
    let mut pb = PathBuilder::new();
    pb.move_to(x1, y1);
    pb.line_to(bx - uy * half_width, by + ux * half_width);
    pb.line_to(bx + uy * half_width, by - ux * half_width);
    pb.close();
    pb.finish()
}

fn to_pixmap(frame: &RgbFrame) -> Result<Pixmap> {
    let mut pixmap = Pixmap::new(frame.width, frame.height)
        .ok_or_else(|| Error::Render(format!("cannot draw on {frame:?}")))?;
    for (dst, src) in pixmap
        .data_mut()
        .chunks_exact_mut(4)
        .zip(frame.image_data().chunks_exact(3))
    {
        dst[..3].copy_from_slice(src);
        dst[3] = 255;
    }
    Ok(pixmap)
}

fn copy_from_pixmap(pixmap: &Pixmap, frame: &mut RgbFrame) {
    for (dst, pixel) in frame
        .image_data_mut()
        .chunks_exact_mut(3)
        .zip(pixmap.pixels())
    {
        let c = pixel.demultiply();
        dst.copy_from_slice(&[c.red(), c.green(), c.blue()]);
    }
}

/// Progress of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// frames written so far
    pub frames_done: usize,
    pub total_frames: usize,
}

/// Caller hooks of a render pass.
#[derive(Default)]
pub struct RenderControl<'a> {
    /// Called after every written frame.
    pub progress: Option<&'a mut dyn FnMut(Progress)>,
    /// Checked before every frame. When set, rendering stops with
    /// [Error::Aborted].
    pub cancel: Option<&'a AtomicBool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub frames: usize,
    pub fixation_frames: usize,
    pub saccade_frames: usize,
    pub gaze_frames: usize,
}

/// Events of the selected eye, sorted and non-overlapping.
pub struct EyeEvents<'a> {
    pub fixations: &'a [Fixation],
    pub saccades: &'a [Saccade],
    pub samples: &'a [gaze_types::Sample],
}

/// Copy every frame of `reader` to `writer`, drawing what is active at the
/// frame's tracker time.
pub(crate) fn render_frames(
    reader: &mut dyn MovieReader,
    writer: &mut dyn MovieWriter,
    events: &EyeEvents,
    alignment: &ClockAlignment,
    style: &OverlayStyle,
    log_interval_frames: usize,
    control: RenderControl,
) -> Result<RenderSummary> {
    let RenderControl {
        mut progress,
        cancel,
    } = control;
    let total_frames = reader.frame_count();
    let renderer = OverlayRenderer::new(reader.width(), reader.height(), style.clone());
    let mut fixation_cursor = EventCursor::new(events.fixations);
    let mut saccade_cursor = EventCursor::new(events.saccades);
    let mut sample_cursor = SampleCursor::new(events.samples, style.max_interpolation_gap_ms);
    let mut summary = RenderSummary::default();

    info!(
        "rendering {total_frames} frames of \"{}\" ({}x{} @ {} fps)",
        reader.filename(),
        reader.width(),
        reader.height(),
        reader.fps()
    );

    loop {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            info!("rendering aborted after {} frames", summary.frames);
            return Err(Error::Aborted);
        }
        let Some(frame) = reader.next_frame() else {
            break;
        };
        let frame = frame?;
        let fno = summary.frames;

        let t = alignment.tracker_time_for_frame(fno, total_frames);
        let overlay = FrameOverlay {
            fixation: fixation_cursor.advance(t),
            saccade: saccade_cursor.advance(t),
            gaze: if style.show_gaze_point {
                sample_cursor.gaze_at(t)
            } else {
                None
            },
        };
        summary.fixation_frames += usize::from(overlay.fixation.is_some());
        summary.saccade_frames += usize::from(overlay.saccade.is_some());
        summary.gaze_frames += usize::from(overlay.gaze.is_some());

        let frame = renderer.draw(frame, &overlay)?;
        writer.write_frame(&frame)?;
        summary.frames += 1;

        if fno % log_interval_frames == 0 {
            info!("frame {fno}/{total_frames}, tracker time {t:.1} ms");
        }
        if let Some(progress) = progress.as_mut() {
            progress(Progress {
                frames_done: summary.frames,
                total_frames,
            });
        }
    }

    if summary.frames != total_frames {
        tracing::warn!(
            "video has {} frames, but {total_frames} were expected",
            summary.frames
        );
    }
    Ok(summary)
}

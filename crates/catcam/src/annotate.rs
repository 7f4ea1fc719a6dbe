//! Detection overlays drawn directly into RGB565 frames.

use frame_source::{RawFrame, pixel};
use infer_core::Detection;

/// RGB565 green, the outline color for detection boxes.
const BOX_COLOR: u16 = 0x07E0;

/// Draws a one-pixel rectangle outline for each detection.
///
/// Normalized box corners are scaled to pixels and clamped to the frame, so a
/// box that only partially overlaps is drawn where it lands instead of being
/// rejected. Inverted corners are swapped into order first.
pub(crate) fn annotate(frame: &mut RawFrame, detections: &[Detection]) {
    if frame.width() == 0 || frame.height() == 0 {
        return;
    }
    for detection in detections {
        let (left, top, right, bottom) = pixel_rect(detection, frame.width(), frame.height());
        draw_outline(frame, left, top, right, bottom);
    }
}

fn pixel_rect(detection: &Detection, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let x_a = (detection.bbox.x_min * width as f32).clamp(0.0, max_x) as u32;
    let x_b = (detection.bbox.x_max * width as f32).clamp(0.0, max_x) as u32;
    let y_a = (detection.bbox.y_min * height as f32).clamp(0.0, max_y) as u32;
    let y_b = (detection.bbox.y_max * height as f32).clamp(0.0, max_y) as u32;
    (x_a.min(x_b), y_a.min(y_b), x_a.max(x_b), y_a.max(y_b))
}

fn draw_outline(frame: &mut RawFrame, left: u32, top: u32, right: u32, bottom: u32) {
    let width = frame.width() as usize;
    let data = frame.data_mut();
    for x in left..=right {
        pixel::put(data, top as usize * width + x as usize, BOX_COLOR);
        pixel::put(data, bottom as usize * width + x as usize, BOX_COLOR);
    }
    for y in top..=bottom {
        pixel::put(data, y as usize * width + left as usize, BOX_COLOR);
        pixel::put(data, y as usize * width + right as usize, BOX_COLOR);
    }
}

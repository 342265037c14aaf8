//! Draw detection boxes and label bars onto a frame.

use crate::matcher::{DetectionEvent, MatchOutcome};
use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: f32 = 16.0;
const LABEL_PAD: u32 = 2;

static LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

/// One drawn detection: where, and the text that belongs on its label.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub label: String,
}

/// Draw every event onto `frame` and return the annotations drawn.
///
/// Labels are skipped, and only boxes drawn, if the embedded font fails to
/// parse.
pub fn annotate(frame: &mut RgbImage, events: &[DetectionEvent]) -> Vec<Annotation> {
    let font = match FontRef::try_from_slice(LABEL_FONT) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "label font unavailable, drawing boxes only");
            None
        }
    };
    events
        .iter()
        .filter_map(|event| annotate_one(frame, event, font.as_ref()))
        .collect()
}

fn annotate_one(frame: &mut RgbImage, event: &DetectionEvent, font: Option<&FontRef<'_>>) -> Option<Annotation> {
    let (left, top, right, bottom) = event.bounding_box.pixel_bounds(frame.width(), frame.height())?;
    let color = match event.outcome {
        MatchOutcome::Known { .. } => BOX_COLOR,
        MatchOutcome::Unknown { .. } => UNKNOWN_COLOR,
    };

    for inset in 0..BOX_THICKNESS {
        let w = (right - left).saturating_sub(2 * inset);
        let h = (bottom - top).saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((left + inset) as i32, (top + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(frame, rect, color);
    }

    let label = event.outcome.label();
    if let Some(font) = font {
        draw_label(frame, font, &label, left as i32, top as i32, color);
    }

    Some(Annotation {
        left: left as i32,
        top: top as i32,
        right: right as i32,
        bottom: bottom as i32,
        label,
    })
}

/// Filled bar sitting on top of the box, with the label text inside it.
fn draw_label(frame: &mut RgbImage, font: &FontRef<'_>, label: &str, left: i32, top: i32, color: Rgb<u8>) {
    let scale = PxScale::from(LABEL_SCALE);
    let (text_width, _) = text_size(scale, font, label);
    let bar_width = text_width + 2 * LABEL_PAD;
    let bar_height = LABEL_SCALE.ceil() as u32 + 2 * LABEL_PAD;
    let bar_top = top - bar_height as i32;

    draw_filled_rect_mut(frame, Rect::at(left, bar_top).of_size(bar_width, bar_height), color);
    draw_text_mut(
        frame,
        TEXT_COLOR,
        left + LABEL_PAD as i32,
        bar_top + LABEL_PAD as i32,
        scale,
        font,
        label,
    );
}

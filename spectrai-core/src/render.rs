use std::path::Path;

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use snafu::ResultExt;
use tracing::*;

use crate::{
    annotation::{BoundingBox, BoxSource},
    error::{ImageWriteSnafu, SpectraiError},
};

pub const SELECTED_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
pub const PREDICTION_COLOR: Rgb<u8> = Rgb([255, 140, 0]);
pub const MANUAL_COLOR: Rgb<u8> = Rgb([200, 0, 0]);

/// Outline width in image pixels.
const LINE_WIDTH: i32 = 2;

pub fn box_color(bbox: &BoundingBox) -> Rgb<u8> {
    if bbox.is_selected() {
        SELECTED_COLOR
    } else if bbox.source() == BoxSource::Prediction {
        PREDICTION_COLOR
    } else {
        MANUAL_COLOR
    }
}

/// Draws every box as a hollow rectangle over a copy of `image`.
pub fn draw_annotations(image: &DynamicImage, boxes: &[BoundingBox]) -> RgbImage {
    let mut output_img = image.to_rgb8();

    for bbox in boxes {
        let (x1, y1, x2, y2) = bbox.get_bounds();
        let x = x1.round() as i32;
        let y = y1.round() as i32;
        let width = (x2 - x1).round() as u32;
        let height = (y2 - y1).round() as u32;

        if width == 0 || height == 0 {
            continue;
        }

        let color = box_color(bbox);

        // Nested rectangles, growing inwards, give the line its width
        for offset in 0..LINE_WIDTH {
            let inner_w = width.saturating_sub(2 * offset as u32);
            let inner_h = height.saturating_sub(2 * offset as u32);
            if inner_w == 0 || inner_h == 0 {
                break;
            }
            let rect = Rect::at(x + offset, y + offset).of_size(inner_w, inner_h);
            draw_hollow_rect_mut(&mut output_img, rect, color);
        }
    }

    output_img
}

pub fn save_preview<P: AsRef<Path>>(
    image: &DynamicImage,
    boxes: &[BoundingBox],
    output: P,
) -> Result<(), SpectraiError> {
    let output = output.as_ref();
    let rendered = draw_annotations(image, boxes);
    rendered.save(output).context(ImageWriteSnafu {
        path: output.to_string_lossy(),
    })?;
    info!("Rendered {} boxes to {}", boxes.len(), output.display());
    Ok(())
}

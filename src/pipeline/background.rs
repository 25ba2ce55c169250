//! Background production helpers: text masks and background resizing.
//!
//! The mask marks every pixel the inpainter must regenerate. It is built
//! from the **full** layout view, so text that is excluded from rendering
//! is still erased from the background.

use crate::error::CollaboratorError;
use crate::layout::LayoutItem;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use std::path::Path;
use tracing::debug;

/// Fraction of the box height added around each box.
const PAD_RATIO: f64 = 0.05;
/// Constant padding in pixels on top of the proportional part.
const PAD_BASE: i32 = 3;
/// 3×3 dilation passes applied after filling boxes.
pub const DILATE_ITERATIONS: u32 = 2;

const MASKED: Luma<u8> = Luma([255]);

/// Decode an image from disk as 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage, CollaboratorError> {
    Ok(image::open(path)?.to_rgb8())
}

/// Binary mask (255 = regenerate) covering every item's padded pixel box.
///
/// Each box is grown by `int(0.05·h) + 3` pixels on all sides, clipped to
/// the image, then the whole mask is dilated. Items without a pixel box
/// contribute nothing.
pub fn build_text_mask(items: &[LayoutItem], width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return mask;
    }
    let (max_x, max_y) = (width as i64 - 1, height as i64 - 1);

    for b in items.iter().filter_map(|i| i.bbox_px) {
        let pad = i64::from((f64::from(b.h) * PAD_RATIO) as i32 + PAD_BASE);
        // Inclusive corners, like a filled rectangle primitive.
        let (left, top) = (i64::from(b.x) - pad, i64::from(b.y) - pad);
        let right = i64::from(b.x) + i64::from(b.w) + pad;
        let bottom = i64::from(b.y) + i64::from(b.h) + pad;
        if right < 0 || bottom < 0 || left > max_x || top > max_y {
            continue;
        }
        let (x0, y0) = (left.max(0), top.max(0));
        let (x1, y1) = (right.min(max_x), bottom.min(max_y));
        for y in y0..=y1 {
            for x in x0..=x1 {
                mask.put_pixel(x as u32, y as u32, MASKED);
            }
        }
    }

    let mask = dilate(&mask, DILATE_ITERATIONS);
    debug!(
        masked = mask.pixels().filter(|p| p.0[0] > 0).count(),
        "Text mask built"
    );
    mask
}

/// Square dilation with a 3×3 kernel repeated `iterations` times.
///
/// Repeating a 3×3 max filter n times equals one (2n+1)×(2n+1) max filter,
/// which is separable into a horizontal and a vertical pass.
pub fn dilate(mask: &GrayImage, iterations: u32) -> GrayImage {
    if iterations == 0 {
        return mask.clone();
    }
    let r = iterations as i64;
    let (w, h) = mask.dimensions();
    let max_filter = |src: &GrayImage, horizontal: bool| {
        GrayImage::from_fn(w, h, |x, y| {
            let mut v = 0u8;
            for d in -r..=r {
                let (sx, sy) = if horizontal {
                    (x as i64 + d, y as i64)
                } else {
                    (x as i64, y as i64 + d)
                };
                if sx >= 0 && sy >= 0 && sx < w as i64 && sy < h as i64 {
                    v = v.max(src.get_pixel(sx as u32, sy as u32).0[0]);
                }
            }
            Luma([v])
        })
    };
    let horizontal = max_filter(mask, true);
    max_filter(&horizontal, false)
}

/// Resize a supplied background to the source dimensions (Lanczos).
pub fn fit_background(background: &RgbImage, width: u32, height: u32) -> RgbImage {
    if background.dimensions() == (width, height) {
        return background.clone();
    }
    debug!(
        from = ?background.dimensions(),
        to = ?(width, height),
        "Resizing supplied background"
    );
    imageops::resize(background, width, height, FilterType::Lanczos3)
}

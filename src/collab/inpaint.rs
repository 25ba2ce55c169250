//! Built-in inpainter: onion-peel diffusion.
//!
//! Masked pixels are filled from the boundary inward. Each peel assigns
//! every masked pixel that touches a known pixel the mean of its known
//! 8-neighbours, then marks it known. A few smoothing passes over the
//! filled region remove the streaks peeling leaves behind.
//!
//! This is good enough for the flat or gently graded backgrounds slides
//! usually have. Photographic backgrounds want a model-based inpainter,
//! registered under its own backend identifier.

use super::Inpainter;
use crate::error::CollaboratorError;
use image::{GrayImage, Rgb, RgbImage};
use tracing::debug;

/// Backend identifier the default bundle registers this inpainter under.
pub const BACKEND_ID: &str = "diffusion";

const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

#[derive(Debug, Clone)]
pub struct DiffusionInpainter {
    /// 3×3 box-blur passes over the filled region. Default: 2.
    pub smoothing_passes: u32,
}

impl Default for DiffusionInpainter {
    fn default() -> Self {
        Self {
            smoothing_passes: 2,
        }
    }
}

impl Inpainter for DiffusionInpainter {
    fn clean_background(
        &self,
        image: &RgbImage,
        mask: &GrayImage,
    ) -> Result<RgbImage, CollaboratorError> {
        if image.dimensions() != mask.dimensions() {
            return Err(CollaboratorError::Backend {
                backend: BACKEND_ID.into(),
                detail: format!(
                    "mask is {:?} but image is {:?}",
                    mask.dimensions(),
                    image.dimensions()
                ),
            });
        }

        let (w, h) = image.dimensions();
        let idx = |x: u32, y: u32| (y as usize) * (w as usize) + x as usize;
        let region: Vec<bool> = mask.pixels().map(|p| p.0[0] > 0).collect();
        let mut known: Vec<bool> = region.iter().map(|m| !m).collect();
        if known.iter().all(|k| !k) {
            // Nothing to diffuse from.
            return Ok(image.clone());
        }

        let mut out = image.clone();
        let mut remaining: Vec<(u32, u32)> = (0..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .filter(|&(x, y)| region[idx(x, y)])
            .collect();
        let mut peels = 0u32;

        while !remaining.is_empty() {
            let mut filled = Vec::new();
            let mut pending = Vec::new();
            for &(x, y) in &remaining {
                match mean_of(&out, x, y, |nx, ny| known[idx(nx, ny)]) {
                    Some(px) => filled.push((x, y, px)),
                    None => pending.push((x, y)),
                }
            }
            if filled.is_empty() {
                break;
            }
            for (x, y, px) in filled {
                out.put_pixel(x, y, px);
                known[idx(x, y)] = true;
            }
            remaining = pending;
            peels += 1;
        }

        for _ in 0..self.smoothing_passes {
            let src = out.clone();
            for y in 0..h {
                for x in 0..w {
                    if region[idx(x, y)] {
                        if let Some(px) = mean_of(&src, x, y, |_, _| true) {
                            out.put_pixel(x, y, px);
                        }
                    }
                }
            }
        }

        debug!(
            peels,
            masked = region.iter().filter(|m| **m).count(),
            "Background inpainted"
        );
        Ok(out)
    }
}

/// Mean colour of the 8-neighbours accepted by `accept`, if any.
fn mean_of(
    img: &RgbImage,
    x: u32,
    y: u32,
    accept: impl Fn(u32, u32) -> bool,
) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    let mut sum = [0u32; 3];
    let mut n = 0u32;
    for (dx, dy) in NEIGHBOURS {
        let (nx, ny) = (i64::from(x) + dx, i64::from(y) + dy);
        if nx < 0 || ny < 0 || nx >= i64::from(w) || ny >= i64::from(h) {
            continue;
        }
        let (nx, ny) = (nx as u32, ny as u32);
        if !accept(nx, ny) {
            continue;
        }
        let p = img.get_pixel(nx, ny).0;
        for c in 0..3 {
            sum[c] += u32::from(p[c]);
        }
        n += 1;
    }
    (n > 0).then(|| Rgb([(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn fills_text_with_surrounding_colour() {
        let mut img = RgbImage::from_pixel(20, 20, Rgb([40, 80, 120]));
        let mut mask = GrayImage::new(20, 20);
        for y in 8..12 {
            for x in 5..15 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let out = DiffusionInpainter::default()
            .clean_background(&img, &mask)
            .unwrap();
        assert!(out.pixels().all(|p| *p == Rgb([40, 80, 120])));
    }

    #[test]
    fn unmasked_pixels_are_untouched() {
        let img = RgbImage::from_fn(10, 10, |x, y| Rgb([x as u8 * 20, y as u8 * 20, 0]));
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(5, 5, Luma([255]));
        let out = DiffusionInpainter::default()
            .clean_background(&img, &mask)
            .unwrap();
        for (x, y, p) in out.enumerate_pixels() {
            if (x, y) != (5, 5) {
                assert_eq!(p, img.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let err = DiffusionInpainter::default()
            .clean_background(&RgbImage::new(4, 4), &GrayImage::new(5, 4))
            .unwrap_err();
        assert!(err.to_string().contains("diffusion"));
    }

    #[test]
    fn fully_masked_image_is_returned_unchanged() {
        let img = RgbImage::from_pixel(3, 3, Rgb([1, 2, 3]));
        let mask = GrayImage::from_pixel(3, 3, Luma([255]));
        let out = DiffusionInpainter::default()
            .clean_background(&img, &mask)
            .unwrap();
        assert_eq!(out, img);
    }
}

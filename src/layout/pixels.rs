//! Normalised-to-pixel box conversion.

use super::{LayoutItem, NormalizedBox, PixelBox, NORMALIZED_SCALE};

impl NormalizedBox {
    /// Map onto an image of `width` × `height` pixels, truncating to integers.
    ///
    /// `x = xmin/1000·width`, `y = ymin/1000·height`,
    /// `w = (xmax−xmin)/1000·width`, `h = (ymax−ymin)/1000·height`.
    /// Multiplying before dividing keeps integer-valued inputs exact.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelBox {
        let (w, h) = (f64::from(width), f64::from(height));
        PixelBox {
            x: (self.xmin * w / NORMALIZED_SCALE) as i32,
            y: (self.ymin * h / NORMALIZED_SCALE) as i32,
            w: ((self.xmax - self.xmin) * w / NORMALIZED_SCALE) as i32,
            h: ((self.ymax - self.ymin) * h / NORMALIZED_SCALE) as i32,
        }
    }
}

/// Fill `bbox_px` for every item that does not have one yet.
///
/// Items that were already converted are left alone, so applying this twice
/// is the same as applying it once.
pub fn convert_to_pixels(items: &mut [LayoutItem], width: u32, height: u32) {
    for item in items.iter_mut().filter(|i| i.bbox_px.is_none()) {
        item.bbox_px = Some(item.bbox.to_pixels(width, height));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(b: [f64; 4]) -> LayoutItem {
        LayoutItem::new("text", NormalizedBox::from(b))
    }

    #[test]
    fn converts_reference_box() {
        let mut items = vec![item([100.0, 100.0, 200.0, 400.0])];
        convert_to_pixels(&mut items, 1000, 800);
        assert_eq!(
            items[0].bbox_px,
            Some(PixelBox {
                x: 100,
                y: 80,
                w: 300,
                h: 80
            })
        );
    }

    #[test]
    fn truncates_fractional_pixels() {
        let b = NormalizedBox::new(333.0, 333.0, 667.0, 667.0).to_pixels(100, 10);
        assert_eq!(b, PixelBox { x: 33, y: 3, w: 33, h: 3 });
    }

    #[test]
    fn conversion_is_idempotent() {
        let mut once = vec![
            item([100.0, 100.0, 200.0, 400.0]),
            item([950.0, 850.0, 990.0, 990.0]),
        ];
        convert_to_pixels(&mut once, 1920, 1080);
        let mut twice = once.clone();
        convert_to_pixels(&mut twice, 1920, 1080);
        assert_eq!(once, twice);

        // A later call with other dimensions must not rescale either.
        convert_to_pixels(&mut twice, 640, 480);
        assert_eq!(once, twice);
    }

    #[test]
    fn only_unconverted_items_are_filled() {
        let mut items = vec![item([0.0, 0.0, 500.0, 500.0]), item([0.0, 0.0, 500.0, 500.0])];
        items[0].bbox_px = Some(PixelBox { x: 1, y: 2, w: 3, h: 4 });
        convert_to_pixels(&mut items, 200, 200);
        assert_eq!(items[0].bbox_px, Some(PixelBox { x: 1, y: 2, w: 3, h: 4 }));
        assert_eq!(items[1].bbox_px, Some(PixelBox { x: 0, y: 0, w: 100, h: 100 }));
    }
}

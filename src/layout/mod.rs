//! Layout items and the deterministic transforms applied to them.
//!
//! A [`LayoutItem`] is produced by the vision collaborator and consumed by
//! the renderers. The pipeline mostly threads items through untouched; the
//! few things it does compute live in the submodules:
//!
//! ```text
//! detect ─▶ refine ─▶ pixels ─▶ fonts ─▶ exclusion ─┬─▶ full view      (inpainting)
//!                                                   └─▶ filtered view  (rendering)
//! ```
//!
//! * [`pixels`]:    normalised `[ymin, xmin, ymax, xmax]` → pixel `(x, y, w, h)`
//! * [`fonts`]:     cluster estimated font sizes and snap to cluster medians
//! * [`exclusion`]: fork the layout into full and filtered views
//! * [`refine`]:    compare a refined layout against the initial one
//!
//! Fields the pipeline does not know about are kept in `extra` and written
//! back out unchanged, so collaborators may exchange richer records.

pub mod exclusion;
pub mod fonts;
pub mod pixels;
pub mod refine;

pub use exclusion::{ExclusionFilter, LayoutViews, WATERMARK_TOKEN};
pub use fonts::normalize_font_sizes;
pub use pixels::convert_to_pixels;
pub use refine::{diff_refinement, RefinementReport};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Side of the normalised coordinate square.
pub const NORMALIZED_SCALE: f64 = 1000.0;

/// One detected text region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutItem {
    /// Text content; `\n` marks visual line breaks.
    pub text: String,
    /// Box on the 0–1000 scale, serialised as `[ymin, xmin, ymax, xmax]`.
    pub bbox: NormalizedBox,
    #[serde(default)]
    pub style: TextStyle,
    /// Absolute pixel box, filled once by [`convert_to_pixels`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox_px: Option<PixelBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_font_size_px: Option<f64>,
    /// Font size in container-query-width units (percent of slide width).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size_cqw: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LayoutItem {
    pub fn new(text: impl Into<String>, bbox: NormalizedBox) -> Self {
        Self {
            text: text.into(),
            bbox,
            style: TextStyle::default(),
            bbox_px: None,
            raw_font_size: None,
            normalized_font_size_px: None,
            font_size_cqw: None,
            extra: Map::new(),
        }
    }

    /// Number of visual lines, never less than one.
    pub fn line_count(&self) -> usize {
        self.text.split('\n').count().max(1)
    }
}

/// Normalised bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct NormalizedBox {
    pub ymin: f64,
    pub xmin: f64,
    pub ymax: f64,
    pub xmax: f64,
}

impl NormalizedBox {
    pub fn new(ymin: f64, xmin: f64, ymax: f64, xmax: f64) -> Self {
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }

    pub fn area(&self) -> f64 {
        (self.ymax - self.ymin).max(0.0) * (self.xmax - self.xmin).max(0.0)
    }

    /// Intersection over union, 0 when the boxes are disjoint or empty.
    pub fn iou(&self, other: &Self) -> f64 {
        let h = (self.ymax.min(other.ymax) - self.ymin.max(other.ymin)).max(0.0);
        let w = (self.xmax.min(other.xmax) - self.xmin.max(other.xmin)).max(0.0);
        let inter = h * w;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Sum of absolute coordinate shifts between two boxes.
    pub fn shift(&self, other: &Self) -> f64 {
        (self.ymin - other.ymin).abs()
            + (self.xmin - other.xmin).abs()
            + (self.ymax - other.ymax).abs()
            + (self.xmax - other.xmax).abs()
    }
}

impl From<[f64; 4]> for NormalizedBox {
    fn from([ymin, xmin, ymax, xmax]: [f64; 4]) -> Self {
        Self::new(ymin, xmin, ymax, xmax)
    }
}

impl From<NormalizedBox> for [f64; 4] {
    fn from(b: NormalizedBox) -> Self {
        [b.ymin, b.xmin, b.ymax, b.xmax]
    }
}

/// Absolute pixel box, serialised as `[x, y, w, h]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct PixelBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl From<[i32; 4]> for PixelBox {
    fn from([x, y, w, h]: [i32; 4]) -> Self {
        Self { x, y, w, h }
    }
}

impl From<PixelBox> for [i32; 4] {
    fn from(b: PixelBox) -> Self {
        [b.x, b.y, b.w, b.h]
    }
}

/// Style hints reported by the vision backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TextStyle {
    pub fn is_bold(&self) -> bool {
        self.font_weight
            .as_deref()
            .is_some_and(|w| w.eq_ignore_ascii_case("bold"))
    }

    /// `left`, `center` or `right`; anything else reads as `left`.
    pub fn alignment(&self) -> &'static str {
        match self.align.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("center") => "center",
            Some("right") => "right",
            _ => "left",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_round_trips_unknown_fields() {
        let json = r##"{
            "text": "Hello\nWorld",
            "bbox": [100, 100, 200, 400],
            "style": {"color": "#FFFFFF", "font_weight": "bold", "shadow": true},
            "confidence": 0.93
        }"##;
        let item: LayoutItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.bbox, NormalizedBox::new(100.0, 100.0, 200.0, 400.0));
        assert_eq!(item.line_count(), 2);
        assert!(item.style.is_bold());
        assert_eq!(item.extra["confidence"], 0.93);
        assert_eq!(item.style.extra["shadow"], true);

        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(back["confidence"], 0.93);
        assert_eq!(back["bbox"], serde_json::json!([100.0, 100.0, 200.0, 400.0]));
        assert!(back.get("bbox_px").is_none());
    }

    #[test]
    fn missing_style_defaults() {
        let item: LayoutItem =
            serde_json::from_str(r#"{"text": "x", "bbox": [0, 0, 10, 10]}"#).unwrap();
        assert_eq!(item.style, TextStyle::default());
        assert_eq!(item.style.alignment(), "left");
        assert!(!item.style.is_bold());
    }

    #[test]
    fn alignment_is_case_insensitive() {
        let style = TextStyle {
            align: Some("Center".into()),
            ..Default::default()
        };
        assert_eq!(style.alignment(), "center");
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = NormalizedBox::new(0.0, 0.0, 100.0, 100.0);
        let b = NormalizedBox::new(200.0, 200.0, 300.0, 300.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
        assert_eq!(a.iou(&b), 0.0);
    }
}

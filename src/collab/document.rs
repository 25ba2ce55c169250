//! Built-in document renderer: a JSON slide deck.
//!
//! Geometry is expressed in inches on a 13.333 × 7.5 in (16:9) slide, font
//! sizes in points, colours as `#RRGGBB`. Presentation tools or a converter
//! script can lay the deck out without looking at the source image again.

use super::{DocumentRenderer, RenderRequest};
use crate::error::CollaboratorError;
use crate::layout::LayoutItem;
use crate::pipeline::artifacts::DOCUMENT_FILE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

pub const SLIDE_WIDTH_IN: f64 = 13.333;
pub const SLIDE_HEIGHT_IN: f64 = 7.5;
const POINTS_PER_INCH: f64 = 72.0;
/// Glyph size as a fraction of box height when no normalised size exists.
const FALLBACK_HEIGHT_RATIO: f64 = 0.75;
const DECK_FORMAT: &str = "slide-deck/1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub format: String,
    pub width_in: f64,
    pub height_in: f64,
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    /// Full-bleed background picture, relative to the deck file.
    pub background: String,
    pub text_boxes: Vec<TextBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBox {
    pub text: String,
    pub left_in: f64,
    pub top_in: f64,
    pub width_in: f64,
    pub height_in: f64,
    pub font_size_pt: f64,
    pub font_family: String,
    pub color: String,
    pub bold: bool,
    pub align: String,
}

#[derive(Debug, Clone, Default)]
pub struct SlideDeckRenderer;

impl DocumentRenderer for SlideDeckRenderer {
    fn render_document(&self, request: &RenderRequest) -> Result<PathBuf, CollaboratorError> {
        if request.width == 0 || request.height == 0 {
            return Err(CollaboratorError::MalformedResponse(
                "cannot lay out a slide with zero source dimensions".into(),
            ));
        }
        let background = request
            .background
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let deck = build_deck(
            &request.items,
            request.width,
            request.height,
            background,
            &request.font_family,
        );
        let json = serde_json::to_vec_pretty(&deck)
            .map_err(|e| CollaboratorError::MalformedResponse(e.to_string()))?;

        let path = request.output.path(DOCUMENT_FILE);
        std::fs::write(&path, json)?;
        info!("Slide deck written: {}", path.display());
        Ok(request.output.relative(DOCUMENT_FILE))
    }
}

/// Map pixel-space items onto a single deck slide.
pub fn build_deck(
    items: &[LayoutItem],
    width_px: u32,
    height_px: u32,
    background: String,
    font_family: &str,
) -> Deck {
    let scale_x = SLIDE_WIDTH_IN / f64::from(width_px);
    let scale_y = SLIDE_HEIGHT_IN / f64::from(height_px);

    let text_boxes: Vec<TextBox> = items
        .iter()
        .filter_map(|item| {
            let b = item.bbox_px?;
            let font_px = item
                .normalized_font_size_px
                .unwrap_or(f64::from(b.h) * FALLBACK_HEIGHT_RATIO);
            Some(TextBox {
                text: item.text.clone(),
                left_in: f64::from(b.x) * scale_x,
                top_in: f64::from(b.y) * scale_y,
                width_in: f64::from(b.w) * scale_x,
                height_in: f64::from(b.h) * scale_y,
                font_size_pt: font_px * scale_x * POINTS_PER_INCH,
                font_family: font_family.to_string(),
                color: normalize_hex(item.style.color.as_deref()),
                bold: item.style.is_bold(),
                align: item.style.alignment().to_string(),
            })
        })
        .collect();
    debug!(boxes = text_boxes.len(), "Deck slide laid out");

    Deck {
        format: DECK_FORMAT.to_string(),
        width_in: SLIDE_WIDTH_IN,
        height_in: SLIDE_HEIGHT_IN,
        slides: vec![Slide {
            background,
            text_boxes,
        }],
    }
}

/// `#RGB` or `#RRGGBB` (hash optional) to upper-case `#RRGGBB`; anything
/// else becomes black.
pub fn normalize_hex(raw: Option<&str>) -> String {
    let hex = raw.unwrap_or_default().trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return "#000000".into();
    }
    match hex.len() {
        3 => {
            let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
            format!("#{}", expanded.to_ascii_uppercase())
        }
        6 => format!("#{}", hex.to_ascii_uppercase()),
        _ => "#000000".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{NormalizedBox, PixelBox, TextStyle};

    #[test]
    fn hex_colours_normalise() {
        assert_eq!(normalize_hex(Some("#f0a")), "#FF00AA");
        assert_eq!(normalize_hex(Some("12ab9f")), "#12AB9F");
        assert_eq!(normalize_hex(Some("red")), "#000000");
        assert_eq!(normalize_hex(Some("#12345")), "#000000");
        assert_eq!(normalize_hex(None), "#000000");
    }

    #[test]
    fn geometry_scales_to_inches_and_points() {
        let mut it = LayoutItem::new("Hello", NormalizedBox::new(0.0, 0.0, 0.0, 0.0));
        it.bbox_px = Some(PixelBox { x: 960, y: 540, w: 480, h: 108 });
        it.normalized_font_size_px = Some(40.0);
        it.style = TextStyle {
            font_weight: Some("bold".into()),
            align: Some("right".into()),
            ..Default::default()
        };

        let deck = build_deck(&[it], 1920, 1080, "background.png".into(), "Arial");
        let tb = &deck.slides[0].text_boxes[0];
        assert!((tb.left_in - SLIDE_WIDTH_IN / 2.0).abs() < 1e-9);
        assert!((tb.top_in - SLIDE_HEIGHT_IN / 2.0).abs() < 1e-9);
        let expected_pt = 40.0 * SLIDE_WIDTH_IN / 1920.0 * 72.0;
        assert!((tb.font_size_pt - expected_pt).abs() < 1e-9);
        assert!(tb.bold);
        assert_eq!(tb.align, "right");
        assert_eq!(tb.color, "#000000");
        assert_eq!(deck.slides[0].background, "background.png");
    }

    #[test]
    fn items_without_pixel_boxes_are_skipped() {
        let it = LayoutItem::new("x", NormalizedBox::new(0.0, 0.0, 1.0, 1.0));
        let deck = build_deck(&[it], 100, 100, String::new(), "Arial");
        assert!(deck.slides[0].text_boxes.is_empty());
    }
}

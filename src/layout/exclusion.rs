//! Keyword exclusion: fork a layout into a full view and a filtered view.
//!
//! The two views go to different places. Inpainting needs every text region,
//! excluded or not, so that watermarks and the like are erased from the
//! background. Renderers only see what survived the filter, so excluded
//! text is neither redrawn nor left behind on the clean background.

use super::{LayoutItem, NormalizedBox};

/// Watermark stamped in the bottom-right corner of generated slides.
pub const WATERMARK_TOKEN: &str = "NotebookLM";

/// The watermark only counts when its box starts past these normalised
/// coordinates.
const WATERMARK_MIN_YMIN: f64 = 900.0;
const WATERMARK_MIN_XMIN: f64 = 800.0;

/// Both views of one layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutViews {
    /// Every item, for mask construction.
    pub full: Vec<LayoutItem>,
    /// Items that survived exclusion, for rendering.
    pub filtered: Vec<LayoutItem>,
}

impl LayoutViews {
    pub fn excluded(&self) -> usize {
        self.full.len() - self.filtered.len()
    }
}

/// Case-insensitive substring filter over item text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionFilter {
    watermark: String,
    keywords: Vec<String>,
}

impl ExclusionFilter {
    /// Build from an optional comma-separated keyword list.
    ///
    /// Keywords are trimmed and lower-cased; empties and duplicates are
    /// dropped. The watermark token is always present and keeps its
    /// positional rule even when listed explicitly.
    pub fn new(user_keywords: Option<&str>) -> Self {
        let watermark = WATERMARK_TOKEN.to_lowercase();
        let mut keywords: Vec<String> = Vec::new();
        for kw in user_keywords.unwrap_or_default().split(',') {
            let kw = kw.trim().to_lowercase();
            if kw.is_empty() || kw == watermark || keywords.contains(&kw) {
                continue;
            }
            keywords.push(kw);
        }
        Self {
            watermark,
            keywords,
        }
    }

    /// Lower-cased keywords in effect, watermark first.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.watermark.as_str()).chain(self.keywords.iter().map(String::as_str))
    }

    pub fn is_excluded(&self, item: &LayoutItem) -> bool {
        let text = item.text.to_lowercase();
        if text.contains(&self.watermark) && in_watermark_corner(&item.bbox) {
            return true;
        }
        self.keywords.iter().any(|kw| text.contains(kw.as_str()))
    }

    /// Produce both views. Item order is preserved in each.
    pub fn split(&self, items: Vec<LayoutItem>) -> LayoutViews {
        let filtered = items
            .iter()
            .filter(|item| !self.is_excluded(item))
            .cloned()
            .collect();
        LayoutViews {
            full: items,
            filtered,
        }
    }
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        Self::new(None)
    }
}

fn in_watermark_corner(b: &NormalizedBox) -> bool {
    b.ymin > WATERMARK_MIN_YMIN && b.xmin > WATERMARK_MIN_XMIN
}

//! Prompts for the LLM-backed vision analyzer.
//!
//! Every prompt lives here so prompt changes never touch retry or parsing
//! logic in [`crate::collab::vision`], and tests can inspect them directly.
//!
//! Both prompts ask for the same JSON shape, which is what
//! [`crate::layout::LayoutItem`] deserialises:
//!
//! ```json
//! [{"text": "...", "bbox": [ymin, xmin, ymax, xmax], "style": {...}}]
//! ```

/// Instruction for the initial detection pass.
pub const DETECT_LAYOUT_PROMPT: &str = r##"Analyze this slide image for pixel-perfect HTML reconstruction.

1. TEXT BLOCKS: Identify every text element on the slide.
2. GEOMETRY: Each bounding box must tightly enclose its text.
   Coordinates are normalized to 0-1000 on both axes: [ymin, xmin, ymax, xmax].
3. CONTENT: Preserve visual line breaks exactly, using \n.

Return ONLY a JSON list, no commentary and no code fences:
[
  {
    "text": "Content string with \n",
    "bbox": [ymin, xmin, ymax, xmax],
    "style": {
      "color": "#HEX",
      "font_weight": "bold" | "normal",
      "align": "left" | "center" | "right"
    }
  }
]"##;

/// System message shared by both passes.
pub const SYSTEM_PROMPT: &str = "You are a precise slide layout analyst. \
You answer with strict JSON only.";

/// Build the refinement instruction around the serialised initial layout.
///
/// The model sees the original image again and corrects positions and
/// typos in the supplied layout.
pub fn refine_layout_prompt(layout_json: &str) -> String {
    format!(
        r#"You are a design QA expert. Check the layout data below against the slide image.

INPUT DATA:
{layout_json}

GOAL: Improve the accuracy of the text bounding boxes and their content.

1. COMPARE: Look at the image and the boxes (normalized 0-1000: [ymin, xmin, ymax, xmax]).
2. FIX POSITION: If a box is off, too large, or cuts off text, adjust its coordinates.
3. FIX CONTENT: If a "text" value has typos compared to the image, correct it.
4. STRICT FORMAT: Return ONLY the corrected JSON list, same shape as the input. Do not explain."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_prompt_describes_coordinate_order() {
        assert!(DETECT_LAYOUT_PROMPT.contains("[ymin, xmin, ymax, xmax]"));
        assert!(DETECT_LAYOUT_PROMPT.contains("0-1000"));
    }

    #[test]
    fn refine_prompt_embeds_layout() {
        let p = refine_layout_prompt(r#"[{"text":"Hi","bbox":[1,2,3,4]}]"#);
        assert!(p.contains(r#""text":"Hi""#));
        assert!(p.contains("Return ONLY the corrected JSON list"));
    }
}

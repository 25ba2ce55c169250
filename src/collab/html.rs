//! Built-in markup renderer: one self-contained HTML page per slide.
//!
//! The page scales with its container. Positions are percentages of the
//! slide box and font sizes are `cqw` (percent of container width), so text
//! keeps its proportions at any viewport size. The background is embedded
//! as a data URI; the file has no external dependencies besides web fonts.

use super::{MarkupRenderer, RenderRequest};
use crate::error::CollaboratorError;
use crate::layout::LayoutItem;
use crate::pipeline::artifacts::MARKUP_FILE;
use crate::pipeline::encode::data_uri;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// Font size used when an item was never normalised.
const FALLBACK_FONT_CQW: f64 = 2.0;
/// Extra width so the browser does not wrap text the model measured tightly.
const WIDTH_BUFFER: f64 = 1.05;
const LINE_HEIGHT: f64 = 1.3;

#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

impl MarkupRenderer for HtmlRenderer {
    fn render_markup(&self, request: &RenderRequest) -> Result<PathBuf, CollaboratorError> {
        let bytes = std::fs::read(&request.background)?;
        let bg = data_uri(&bytes, mime_for(&request.background));
        let html = render_page(
            &request.items,
            request.width,
            request.height,
            &bg,
            &request.font_family,
        );

        let path = request.output.path(MARKUP_FILE);
        std::fs::write(&path, html)?;
        info!("Markup written: {}", path.display());
        Ok(request.output.relative(MARKUP_FILE))
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

/// Build the complete HTML document.
pub fn render_page(
    items: &[LayoutItem],
    width: u32,
    height: u32,
    background_uri: &str,
    font_family: &str,
) -> String {
    let font = escape_css_string(font_family);
    let css_font = if font_family.contains("Pretendard") {
        "Pretendard".to_string()
    } else {
        font.clone()
    };

    let mut elements = String::new();
    for item in items {
        if let Some(div) = text_element(item, width, height, &font) {
            elements.push_str("            ");
            elements.push_str(&div);
            elements.push('\n');
        }
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Reconstructed Slide</title>
    {font_link}
    <style>
        body {{
            margin: 0;
            padding: 0;
            background-color: #222;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            font-family: '{css_font}', sans-serif;
        }}
        .slide-wrapper {{
            width: 90vw;
            max-width: 1200px;
            container-type: inline-size;
            background: #000;
        }}
        .slide-container {{
            position: relative;
            width: 100%;
            aspect-ratio: {width} / {height};
            background-image: url('{background_uri}');
            background-size: 100% 100%;
            background-repeat: no-repeat;
            overflow: hidden;
        }}
    </style>
</head>
<body>
    <div class="slide-wrapper">
        <div class="slide-container">
{elements}        </div>
    </div>
</body>
</html>
"#,
        font_link = font_link(font_family),
    )
}

fn text_element(item: &LayoutItem, width: u32, height: u32, font: &str) -> Option<String> {
    let b = item.bbox_px?;
    if width == 0 || height == 0 {
        return None;
    }
    let (w, h) = (f64::from(width), f64::from(height));
    let left = f64::from(b.x) / w * 100.0;
    let top = f64::from(b.y) / h * 100.0;
    let box_width = f64::from(b.w) / w * 100.0 * WIDTH_BUFFER;
    let size = item.font_size_cqw.unwrap_or(FALLBACK_FONT_CQW);
    let weight = if item.style.is_bold() { "bold" } else { "normal" };

    let mut css = String::new();
    let _ = write!(
        css,
        "position: absolute; left: {left:.2}%; top: {top:.2}%; width: {box_width:.2}%; \
         color: {color}; font-size: {size:.2}cqw; font-weight: {weight}; \
         text-align: {align}; font-family: '{font}', sans-serif; \
         line-height: {LINE_HEIGHT}; white-space: normal; z-index: 10;",
        color = css_color(item.style.color.as_deref()),
        align = item.style.alignment(),
    );

    let text = item
        .text
        .split('\n')
        .map(escape_html)
        .collect::<Vec<_>>()
        .join("<br>");
    Some(format!(r#"<div class="slide-text" style="{css}">{text}</div>"#))
}

fn font_link(font_family: &str) -> &'static str {
    if font_family.contains("Noto Sans") {
        r#"<link href="https://fonts.googleapis.com/css2?family=Noto+Sans+KR:wght@400;700&display=swap" rel="stylesheet">"#
    } else if font_family.contains("Nanum") {
        r#"<link href="https://fonts.googleapis.com/css2?family=Nanum+Gothic:wght@400;700&display=swap" rel="stylesheet">"#
    } else if font_family.contains("Pretendard") {
        r#"<link rel="stylesheet" crossorigin href="https://cdn.jsdelivr.net/gh/orioncactus/pretendard@v1.3.9/dist/web/static/pretendard.min.css">"#
    } else {
        ""
    }
}

/// Colours come from a model; only pass through values that are plainly
/// a hex colour or a named colour.
fn css_color(raw: Option<&str>) -> String {
    let Some(c) = raw.map(str::trim) else {
        return "#000000".into();
    };
    let hex_ok = c
        .strip_prefix('#')
        .is_some_and(|h| matches!(h.len(), 3 | 4 | 6 | 8) && h.chars().all(|ch| ch.is_ascii_hexdigit()));
    let name_ok = !c.is_empty() && c.len() <= 32 && c.chars().all(|ch| ch.is_ascii_alphabetic());
    if hex_ok || name_ok {
        c.to_string()
    } else {
        "#000000".into()
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Font names end up inside a quoted CSS string inside an attribute.
fn escape_css_string(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '\'' | '"' | '\\' | '<' | '>' | ';' | '{' | '}'))
        .collect()
}

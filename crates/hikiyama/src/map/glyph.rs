//! Shogi-piece marker glyph.

use std::fmt::Write;

/// Glyph width in pixels.
pub const WIDTH: u32 = 44;
/// Glyph height in pixels.
pub const HEIGHT: u32 = 50;

const FILL: &str = "#f9e4b7";
const STROKE: &str = "#000";

/// Outline as fractions of the glyph box: a pentagon with a pointed top.
const OUTLINE: [(f64, f64); 6] = [
    (0.2, 0.0),
    (0.8, 0.0),
    (1.0, 0.25),
    (1.0, 1.0),
    (0.0, 1.0),
    (0.0, 0.25),
];

/// Render the marker glyph for `label` rotated by `rotation` degrees about
/// its center.
#[must_use]
pub fn marker_svg(label: &str, rotation: f64) -> String {
    let (w, h) = (f64::from(WIDTH), f64::from(HEIGHT));
    let rotation = if rotation.is_finite() { rotation } else { 0.0 };

    let mut points = String::new();
    for (i, (x, y)) in OUTLINE.iter().enumerate() {
        if i > 0 {
            points.push(' ');
        }
        let _ = write!(points, "{},{}", x * w, y * h);
    }

    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" overflow="visible">"#,
            r#"<g transform="rotate({rot} {cx} {cy})">"#,
            r#"<polygon points="{points}" fill="{fill}" stroke="{stroke}" stroke-width="2"/>"#,
            r#"<text x="{cx}" y="{cy}" writing-mode="vertical-rl" text-orientation="upright" "#,
            r#"text-anchor="middle" dominant-baseline="central" font-size="13" font-weight="700" "#,
            r#"font-family="'Noto Sans JP', sans-serif" letter-spacing="1">{label}</text>"#,
            "</g></svg>"
        ),
        w = WIDTH,
        h = HEIGHT,
        rot = rotation,
        cx = w / 2.0,
        cy = h / 2.0,
        points = points,
        fill = FILL,
        stroke = STROKE,
        label = escape(label),
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glyph_shape() {
        let svg = marker_svg("岩瀬", 0.0);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(r#"points="8.8,0 35.2,0 44,12.5 44,50 0,50 0,12.5""#));
        assert!(svg.contains("#f9e4b7"));
        assert!(svg.contains("vertical-rl"));
        assert!(svg.contains(">岩瀬</text>"));
    }

    #[test]
    fn test_glyph_rotation() {
        assert!(marker_svg("a", 45.0).contains("rotate(45 22 25)"));
        assert!(marker_svg("a", -12.5).contains("rotate(-12.5 22 25)"));
        assert!(marker_svg("a", f64::NAN).contains("rotate(0 22 25)"));
    }

    #[test]
    fn test_label_is_escaped() {
        let svg = marker_svg("<a&b>", 0.0);
        assert!(svg.contains("&lt;a&amp;b&gt;"));
        assert!(!svg.contains("<a&b>"));
    }
}

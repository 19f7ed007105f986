//! Minimal SVG charts.

use std::fmt::Write;

const WIDTH: f64 = 504.0;
const HEIGHT: f64 = 360.0;
const MARGIN: f64 = 40.0;

/// A vertical bar chart. Bars grow up from zero, or down for negative values.
pub fn bar_chart(heights: &[f64], labels: &[String], title: Option<&str>) -> String {
    let lo = heights.iter().copied().fold(0.0, f64::min);
    let mut hi = heights.iter().copied().fold(0.0, f64::max);
    if hi == lo {
        hi = lo + 1.0;
    }

    let top = if title.is_some() { MARGIN * 1.5 } else { MARGIN };
    let plot_height = HEIGHT - top - MARGIN;
    let plot_width = WIDTH - 2.0 * MARGIN;
    let y = |v: f64| top + (hi - v) / (hi - lo) * plot_height;
    let slot = plot_width / heights.len().max(1) as f64;
    let bar = slot * 0.8;

    let mut svg = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = WIDTH,
        h = HEIGHT
    );
    if let Some(title) = title {
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="16">{}</text>"#,
            WIDTH / 2.0,
            MARGIN,
            escape_xml(title)
        );
    }
    for (i, &value) in heights.iter().enumerate() {
        let x = MARGIN + i as f64 * slot + (slot - bar) / 2.0;
        let y_top = y(value.max(0.0));
        let y_bottom = y(value.min(0.0));
        let _ = writeln!(
            svg,
            r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="#4e79a7"/>"##,
            x,
            y_top,
            bar,
            y_bottom - y_top
        );
        if let Some(label) = labels.get(i) {
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="12">{}</text>"#,
                x + bar / 2.0,
                HEIGHT - MARGIN / 2.0,
                escape_xml(label)
            );
        }
    }
    let _ = writeln!(
        svg,
        r#"<line x1="{m:.1}" y1="{z:.1}" x2="{e:.1}" y2="{z:.1}" stroke="black"/>"#,
        m = MARGIN,
        e = WIDTH - MARGIN,
        z = y(0.0)
    );
    svg.push_str("</svg>\n");
    svg
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

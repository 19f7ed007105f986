use crate::evaluator::{Artifact, Image};
use crate::fragment::{Fragment, Output, RenderOutcome};
use crate::metadata::Metadata;
use crate::options::ResultsMode;
use crate::value::Table;

use super::{RenderError, Renderer, Report, figure_attachments, figure_path};

/// Plain Markdown: fenced code, `##`-commented output, pipe tables and
/// image links.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn name(&self) -> &str {
        "markdown"
    }

    fn render(&self, outcome: &RenderOutcome) -> Result<Report, RenderError> {
        Ok(Report {
            format: self.name().to_string(),
            extension: "md".to_string(),
            body: write_markdown(outcome, FigureStyle::Link),
            attachments: figure_attachments(outcome),
        })
    }
}

/// How images are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FigureStyle {
    /// `![caption](path)`
    Link,
    /// A raw `<figure>` element carrying size hints.
    Html,
}

pub(crate) fn write_markdown(outcome: &RenderOutcome, style: FigureStyle) -> String {
    let mut out = String::new();
    write_title_block(&mut out, &outcome.header);

    for fragment in &outcome.fragments {
        match fragment {
            Fragment::Text { text, .. } => {
                if out.is_empty() || out.ends_with("\n\n") {
                    out.push_str(text.trim_start_matches('\n'));
                } else {
                    out.push_str(text);
                }
            }
            Fragment::CodeEcho { engine, code, .. } => {
                block_break(&mut out);
                let fence = fence_for(code);
                out.push_str(&fence);
                out.push_str(engine);
                out.push('\n');
                push_line(&mut out, code);
                out.push_str(&fence);
                out.push('\n');
            }
            Fragment::Output {
                output,
                results,
                comment,
                ..
            } => write_output(&mut out, output, *results, comment, style),
            Fragment::Skipped { .. } => {}
        }
    }

    if let Some(error) = &outcome.terminal_error {
        block_break(&mut out);
        out.push_str(&format!(
            "**Rendering stopped at line {}:** {}\n",
            error.line, error.error
        ));
    }

    out
}

fn write_title_block(out: &mut String, meta: &Metadata) {
    if let Some(title) = &meta.title {
        out.push_str(&format!("# {}\n\n", title));
    }
    if let Some(subtitle) = &meta.subtitle {
        out.push_str(&format!("*{}*\n\n", subtitle));
    }
    let authors = meta.authors();
    if !authors.is_empty() {
        out.push_str(&format!("{}\n\n", authors.join(", ")));
    }
    if let Some(date) = &meta.date {
        out.push_str(&format!("{}\n\n", date));
    }
    if let Some(text) = &meta.abstract_text {
        out.push_str(&format!("**Abstract:** {}\n\n", text.trim()));
    }
    if !meta.keywords.is_empty() {
        out.push_str(&format!("*Keywords:* {}\n\n", meta.keywords.join(", ")));
    }
}

fn write_output(
    out: &mut String,
    output: &Output,
    results: ResultsMode,
    comment: &str,
    style: FigureStyle,
) {
    match output {
        Output::Text(text) => write_text(out, text, results, comment),
        Output::Table(table) => write_table(out, table),
        Output::Image(image) => write_image(out, image, style),
        Output::Error { message, partial } => {
            for artifact in partial {
                match artifact {
                    Artifact::Text(text) => write_text(out, text, results, comment),
                    Artifact::Table(table) => write_table(out, table),
                    Artifact::Image(image) => write_image(out, image, style),
                }
            }
            block_break(out);
            for (i, line) in message.lines().enumerate() {
                if i == 0 {
                    out.push_str(&format!("> **Error:** {}\n", line));
                } else {
                    out.push_str(&format!("> {}\n", line));
                }
            }
        }
    }
}

fn write_text(out: &mut String, text: &str, results: ResultsMode, comment: &str) {
    block_break(out);
    if results == ResultsMode::Raw {
        push_line(out, text);
        return;
    }
    let fence = fence_for(text);
    out.push_str(&fence);
    out.push('\n');
    for line in text.lines() {
        if comment.is_empty() {
            out.push_str(line);
        } else {
            out.push_str(comment);
            out.push(' ');
            out.push_str(line);
        }
        out.push('\n');
    }
    out.push_str(&fence);
    out.push('\n');
}

fn write_table(out: &mut String, table: &Table) {
    block_break(out);
    out.push_str(&table.to_string());
}

fn write_image(out: &mut String, image: &Image, style: FigureStyle) {
    block_break(out);
    let path = figure_path(&image.name);
    let caption = image.caption.as_deref().unwrap_or("");
    match style {
        FigureStyle::Link => out.push_str(&format!("![{}]({})\n", caption, path)),
        FigureStyle::Html => {
            out.push_str("<figure>\n");
            out.push_str(&format!(
                "<img src=\"{}\" alt=\"{}\"",
                escape_attr(&path),
                escape_attr(caption)
            ));
            let dpi = hint(image, "dpi").unwrap_or(72.0);
            for (key, attr) in [("fig_width", "width"), ("fig_height", "height")] {
                if let Some(inches) = hint(image, key) {
                    out.push_str(&format!(" {}=\"{}\"", attr, (inches * dpi).round()));
                }
            }
            out.push_str(">\n");
            if !caption.is_empty() {
                out.push_str(&format!("<figcaption>{}</figcaption>\n", escape_attr(caption)));
            }
            out.push_str("</figure>\n");
        }
    }
}

fn hint(image: &Image, key: &str) -> Option<f64> {
    image.hints.get(key)?.parse().ok()
}

pub(crate) fn escape_attr(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Separate what follows from the previous block by one blank line.
fn block_break(out: &mut String) {
    if out.is_empty() {
        return;
    }
    while !out.ends_with("\n\n") {
        out.push('\n');
    }
}

fn push_line(out: &mut String, text: &str) {
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
}

/// A backtick fence longer than any backtick run in `content`.
fn fence_for(content: &str) -> String {
    let longest = content
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::error::{ExecutionError, TerminalError};
    use crate::metadata::Authors;

    fn output(block: usize, output: Output) -> Fragment {
        Fragment::Output {
            block,
            output,
            results: ResultsMode::Markup,
            comment: "##".into(),
        }
    }

    #[test]
    fn title_block() {
        let outcome = RenderOutcome {
            header: Metadata {
                title: Some("Trial".into()),
                author: Some(Authors::Many(vec!["Ada".into(), "Grace".into()])),
                date: Some("2024-05-01".into()),
                ..Metadata::default()
            },
            ..RenderOutcome::default()
        };
        assert_eq!(
            write_markdown(&outcome, FigureStyle::Link),
            "# Trial\n\nAda, Grace\n\n2024-05-01\n\n"
        );
    }

    #[test]
    fn text_echo_and_output() {
        let outcome = RenderOutcome {
            fragments: vec![
                Fragment::Text {
                    block: 0,
                    text: "Intro.\n".into(),
                },
                Fragment::CodeEcho {
                    block: 1,
                    engine: "calc".into(),
                    code: "1 + 1\n".into(),
                },
                output(1, Output::Text("2".into())),
                Fragment::Text {
                    block: 2,
                    text: "\nDone.\n".into(),
                },
            ],
            ..RenderOutcome::default()
        };
        assert_eq!(
            write_markdown(&outcome, FigureStyle::Link),
            "Intro.\n\n```calc\n1 + 1\n```\n\n```\n## 2\n```\n\nDone.\n"
        );
    }

    #[test]
    fn raw_results_and_empty_comment() {
        let raw = Fragment::Output {
            block: 0,
            output: Output::Text("**bold**".into()),
            results: ResultsMode::Raw,
            comment: "##".into(),
        };
        let bare = Fragment::Output {
            block: 1,
            output: Output::Text("x".into()),
            results: ResultsMode::Markup,
            comment: String::new(),
        };
        let outcome = RenderOutcome {
            fragments: vec![raw, bare],
            ..RenderOutcome::default()
        };
        assert_eq!(
            write_markdown(&outcome, FigureStyle::Link),
            "**bold**\n\n```\nx\n```\n"
        );
    }

    #[test]
    fn failure_is_visible() {
        let outcome = RenderOutcome {
            fragments: vec![output(
                0,
                Output::Error {
                    message: "division by zero".into(),
                    partial: vec![Artifact::Text("before".into())],
                },
            )],
            terminal_error: Some(TerminalError {
                block: 0,
                line: 3,
                span: 0..10,
                error: ExecutionError::Eval {
                    message: "division by zero".into(),
                },
            }),
            ..RenderOutcome::default()
        };
        assert_eq!(
            write_markdown(&outcome, FigureStyle::Link),
            "```\n## before\n```\n\n> **Error:** division by zero\n\n**Rendering stopped at line 3:** division by zero\n"
        );
    }

    #[test]
    fn images_as_links_or_figures() {
        let image = Image {
            name: "plot-1.svg".into(),
            media_type: "image/svg+xml".into(),
            caption: Some("Effects".into()),
            hints: BTreeMap::from([
                ("fig_width".to_string(), "7".to_string()),
                ("dpi".to_string(), "96".to_string()),
            ]),
            data: Vec::new(),
        };
        let outcome = RenderOutcome {
            fragments: vec![output(0, Output::Image(image))],
            ..RenderOutcome::default()
        };
        assert_eq!(
            write_markdown(&outcome, FigureStyle::Link),
            "![Effects](figures/plot-1.svg)\n"
        );
        assert_eq!(
            write_markdown(&outcome, FigureStyle::Html),
            "<figure>\n<img src=\"figures/plot-1.svg\" alt=\"Effects\" width=\"672\">\n<figcaption>Effects</figcaption>\n</figure>\n"
        );
    }

    #[test]
    fn fences_outgrow_content() {
        assert_eq!(fence_for("plain"), "```");
        assert_eq!(fence_for("has ``` inside"), "````");
    }
}

use pulldown_cmark::{Options, Parser, html};

use crate::fragment::RenderOutcome;

use super::markdown::{FigureStyle, escape_attr, write_markdown};
use super::{RenderError, Renderer, Report, figure_attachments};

/// A standalone HTML page: the Markdown rendering converted with
/// pulldown-cmark. Figure size hints become `width`/`height` attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl Renderer for HtmlRenderer {
    fn name(&self) -> &str {
        "html"
    }

    fn render(&self, outcome: &RenderOutcome) -> Result<Report, RenderError> {
        let markdown = write_markdown(outcome, FigureStyle::Html);
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);

        let mut content = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut content, Parser::new_ext(&markdown, options));

        let title = outcome.header.title.as_deref().unwrap_or("Untitled");
        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}</body>\n</html>\n",
            escape_attr(title),
            content
        );

        Ok(Report {
            format: self.name().to_string(),
            extension: "html".to_string(),
            body,
            attachments: figure_attachments(outcome),
        })
    }
}

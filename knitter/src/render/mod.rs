//! Renderers turn a `RenderOutcome` into a finished report.

pub mod html;
pub mod json;
pub mod markdown;

use thiserror::Error;

use crate::fragment::RenderOutcome;

pub use html::HtmlRenderer;
pub use json::JsonRenderer;
pub use markdown::MarkdownRenderer;

/// Directory, relative to the report, that figures are written to.
pub const FIGURE_DIR: &str = "figures";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to serialise render outcome: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A rendered report and the files that go with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Renderer name (`markdown`, `html`, `json`).
    pub format: String,
    /// File extension for the main output, without the dot.
    pub extension: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// A file referenced by the report body, by relative path.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub path: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    /// Render a complete or partial outcome. A terminal error must be
    /// visible in the output.
    fn render(&self, outcome: &RenderOutcome) -> Result<Report, RenderError>;
}

/// Look a renderer up by name, accepting R Markdown output format names.
pub fn renderer_for(format: &str) -> Option<Box<dyn Renderer>> {
    match format {
        "markdown" | "md" | "md_document" | "github_document" => Some(Box::new(MarkdownRenderer)),
        "html" | "html_document" => Some(Box::new(HtmlRenderer)),
        "json" => Some(Box::new(JsonRenderer)),
        _ => None,
    }
}

/// Names accepted by `renderer_for`, for messages.
pub const FORMATS: &[&str] = &["markdown", "html", "json"];

/// Every image in the outcome, as attachments under `FIGURE_DIR`.
pub(crate) fn figure_attachments(outcome: &RenderOutcome) -> Vec<Attachment> {
    outcome
        .images()
        .into_iter()
        .map(|image| Attachment {
            path: figure_path(&image.name),
            media_type: image.media_type.clone(),
            data: image.data.clone(),
        })
        .collect()
}

pub(crate) fn figure_path(name: &str) -> String {
    format!("{}/{}", FIGURE_DIR, name)
}

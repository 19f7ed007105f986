//! End-to-end rendering: parse, validate, execute, release, render.

use litdoc::Document;
use litdoc::parser::{ParseError, Parser};
use thiserror::Error;
use tracing::{info, warn};

use crate::cancellation::Cancellation;
use crate::context::Context;
use crate::error::ConfigError;
use crate::evaluator::EvaluatorRegistry;
use crate::fragment::RenderOutcome;
use crate::metadata::Metadata;
use crate::pipeline::{Pipeline, Plan, validate};
use crate::render::{self, FORMATS, RenderError, Renderer, Report};
use crate::resource::Resources;
use crate::value::Value;

/// Format used when neither the caller nor the document picks one.
pub const DEFAULT_FORMAT: &str = "markdown";

#[derive(Debug, Error)]
pub enum AssembleError {
    /// The document could not be parsed. Nothing was executed.
    #[error("document has {} parse error(s)", .0.len())]
    Parse(Vec<ParseError>),

    /// The document or its chunk options are invalid. Nothing was executed.
    #[error("document has {} configuration error(s)", .0.len())]
    Config(Vec<ConfigError>),

    /// Execution finished but the renderer failed.
    #[error("render failed: {error}")]
    Render {
        error: RenderError,
        outcome: Box<RenderOutcome>,
    },
}

/// The result of a render that reached the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub report: Report,
    /// Check `outcome.terminal_error`: a report can be partial.
    pub outcome: RenderOutcome,
    /// Non-fatal problems, such as resources that failed to close.
    pub warnings: Vec<String>,
}

/// Renders documents. Holds no per-render state, so one assembler can serve
/// many renders, including concurrent ones.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    evaluators: EvaluatorRegistry,
    format: Option<String>,
    params: Vec<(String, Value)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluators(mut self, evaluators: EvaluatorRegistry) -> Self {
        self.evaluators = evaluators;
        self
    }

    /// Override the document's `output` format.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Override declared parameters.
    pub fn with_params(mut self, params: Vec<(String, Value)>) -> Self {
        self.params = params;
        self
    }

    pub fn evaluators(&self) -> &EvaluatorRegistry {
        &self.evaluators
    }

    /// Parse and validate without executing anything.
    pub fn check(&self, source: &str, file_id: usize) -> Result<(Document, Plan), AssembleError> {
        let document = Parser::new(source.to_string(), file_id)
            .parse()
            .map_err(AssembleError::Parse)?;
        let plan = validate(&document, &self.evaluators, &self.params).map_err(AssembleError::Config)?;
        self.renderer(&document, &plan.metadata)
            .map_err(|err| AssembleError::Config(vec![err]))?;
        Ok((document, plan))
    }

    /// Render one document.
    ///
    /// `resources` are owned by the render from the start: they are closed
    /// exactly once whatever happens, including on parse and config errors.
    pub fn run(
        &self,
        source: &str,
        file_id: usize,
        resources: Resources,
        cancellation: &Cancellation,
    ) -> Result<Assembled, AssembleError> {
        let mut ctx = Context::with_resources(resources);

        let (document, plan) = self.check(source, file_id)?;
        let renderer = self
            .renderer(&document, &plan.metadata)
            .map_err(|err| AssembleError::Config(vec![err]))?;
        info!(format = renderer.name(), blocks = document.len(), "rendering document");

        let outcome = Pipeline::new(&self.evaluators, cancellation).execute(&document, &plan, &mut ctx);

        let warnings: Vec<String> = ctx
            .release_resources()
            .into_iter()
            .map(|(name, err)| format!("resource '{}' failed to close: {}", name, err))
            .collect();
        drop(ctx);

        match renderer.render(&outcome) {
            Ok(report) => {
                if let Some(error) = &outcome.terminal_error {
                    warn!("rendered a partial report: {}", error);
                }
                Ok(Assembled {
                    report,
                    outcome,
                    warnings,
                })
            }
            Err(error) => Err(AssembleError::Render {
                error,
                outcome: Box::new(outcome),
            }),
        }
    }

    fn renderer(&self, document: &Document, metadata: &Metadata) -> Result<Box<dyn Renderer>, ConfigError> {
        let unsupported = |format: &str| {
            format!(
                "unsupported output format `{}` (available: {})",
                format,
                FORMATS.join(", ")
            )
        };

        if let Some(format) = &self.format {
            return render::renderer_for(format).ok_or_else(|| ConfigError::global(unsupported(format)));
        }

        match metadata.output_format() {
            Some(format) => render::renderer_for(format).ok_or_else(|| match document.header() {
                Some(header) => ConfigError::at(
                    unsupported(format),
                    header.index,
                    header.span.clone(),
                    header.line,
                ),
                None => ConfigError::global(unsupported(format)),
            }),
            None => render::renderer_for(DEFAULT_FORMAT)
                .ok_or_else(|| ConfigError::global(unsupported(DEFAULT_FORMAT))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_resolution() {
        let assembler = Assembler::new();
        let (_, plan) = assembler
            .check("---\noutput: html_document\n---\n\nHi\n", 0)
            .unwrap();
        assert_eq!(plan.metadata.output_format(), Some("html_document"));

        let report = assembler
            .run("---\noutput: html_document\n---\n\nHi\n", 0, Vec::new(), &Cancellation::new())
            .unwrap()
            .report;
        assert_eq!(report.format, "html");

        let report = Assembler::new()
            .with_format("json")
            .run("Hi\n", 0, Vec::new(), &Cancellation::new())
            .unwrap()
            .report;
        assert_eq!(report.format, "json");

        let report = assembler
            .run("Hi\n", 0, Vec::new(), &Cancellation::new())
            .unwrap()
            .report;
        assert_eq!(report.format, "markdown");
    }

    #[test]
    fn unsupported_format_is_a_config_error() {
        let err = Assembler::new()
            .run("---\noutput: pdf_document\n---\n\nHi\n", 0, Vec::new(), &Cancellation::new())
            .unwrap_err();
        match err {
            AssembleError::Config(errors) => {
                assert!(errors[0].message.contains("`pdf_document`"));
                assert_eq!(errors[0].line, Some(1));
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn parse_errors_abort() {
        let err = Assembler::new()
            .run("```{calc}\nunterminated\n", 0, Vec::new(), &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, AssembleError::Parse(errors) if !errors.is_empty()));
    }
}

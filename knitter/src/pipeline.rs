//! Validation and sequential execution of a parsed document.

use std::collections::HashMap;

use litdoc::Document;
use litdoc::block::{Block, CodeBlock, HeaderBlock, NarrativeBlock};
use tracing::{debug, info, warn};

use crate::cancellation::Cancellation;
use crate::context::Context;
use crate::error::{ConfigError, ExecutionError, TerminalError};
use crate::evaluator::{Artifact, EvalError, EvalErrorKind, EvaluatorRegistry};
use crate::fragment::{Fragment, Output, RenderOutcome};
use crate::metadata::Metadata;
use crate::options::{ChunkOptions, ResultsMode};
use crate::value::{Table, Value};

/// The result of validation: everything execution needs, already type-checked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub metadata: Metadata,
    /// The `params` record, when the header declares parameters.
    pub params: Option<Table>,
    chunks: HashMap<usize, ChunkOptions>,
}

impl Plan {
    /// Resolved options for the code block at `index`.
    pub fn options(&self, index: usize) -> Option<&ChunkOptions> {
        self.chunks.get(&index)
    }
}

/// Check the whole document before anything runs. Every problem found is
/// returned, not just the first.
pub fn validate(
    document: &Document,
    registry: &EvaluatorRegistry,
    param_overrides: &[(String, Value)],
) -> Result<Plan, Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut plan = Plan::default();

    match document.header() {
        Some(header) => match Metadata::from_header(header) {
            Ok(metadata) => {
                match metadata.params_table(param_overrides) {
                    Ok(params) if !params.columns.is_empty() => plan.params = Some(params),
                    Ok(_) => {}
                    Err(message) => errors.push(ConfigError::at(
                        message,
                        header.index,
                        header.span.clone(),
                        header.line,
                    )),
                }
                plan.metadata = metadata;
            }
            Err(err) => errors.push(err),
        },
        None => {
            for (name, _) in param_overrides {
                errors.push(ConfigError::global(format!(
                    "parameter `{}` is not declared in the document header",
                    name
                )));
            }
        }
    }

    // label -> line where it was first used
    let mut labels: HashMap<String, usize> = HashMap::new();

    for (ordinal, code) in document.code_blocks().enumerate() {
        let Some(evaluator) = registry.get(&code.engine) else {
            errors.push(
                ConfigError::at(
                    format!("unknown engine `{}`", code.engine),
                    code.index,
                    code.span.clone(),
                    code.line,
                )
                .with_note(format!("available engines: {}", registry.names().join(", "))),
            );
            continue;
        };

        let options = match ChunkOptions::from_block(code, ordinal + 1) {
            Ok(options) => options,
            Err(mut option_errors) => {
                errors.append(&mut option_errors);
                continue;
            }
        };

        if let Err(message) = evaluator.validate(&options) {
            errors.push(ConfigError::at(
                message,
                code.index,
                code.span.clone(),
                code.line,
            ));
        }

        if let Some(first) = labels.insert(options.label.clone(), code.line) {
            errors.push(
                ConfigError::at(
                    format!("duplicate chunk label `{}`", options.label),
                    code.index,
                    code.span.clone(),
                    code.line,
                )
                .with_note(format!("first used on line {}", first)),
            );
            labels.insert(options.label.clone(), first);
        }

        plan.chunks.insert(code.index, options);
    }

    if errors.is_empty() {
        Ok(plan)
    } else {
        Err(errors)
    }
}

/// Why a block stopped the render.
struct Failure {
    error: TerminalError,
    partial: Vec<Artifact>,
    comment: String,
}

impl Failure {
    fn new(error: TerminalError) -> Self {
        Failure {
            error,
            partial: Vec::new(),
            comment: ChunkOptions::default().comment,
        }
    }

    fn into_fragment(self) -> (Fragment, TerminalError) {
        let message = match &self.error.error {
            ExecutionError::Eval { message } => message.clone(),
            other => other.to_string(),
        };
        let fragment = Fragment::Output {
            block: self.error.block,
            output: Output::Error {
                message,
                partial: self.partial,
            },
            results: ResultsMode::Markup,
            comment: self.comment,
        };
        (fragment, self.error)
    }
}

fn execution_error(err: &EvalError) -> ExecutionError {
    match &err.kind {
        EvalErrorKind::UnboundReference(name) => ExecutionError::UnboundReference { name: name.clone() },
        EvalErrorKind::Runtime | EvalErrorKind::Resource(_) => ExecutionError::Eval {
            message: err.message.clone(),
        },
    }
}

/// Walks a validated document's blocks in order against one context.
pub struct Pipeline<'a> {
    registry: &'a EvaluatorRegistry,
    cancellation: &'a Cancellation,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a EvaluatorRegistry, cancellation: &'a Cancellation) -> Self {
        Pipeline {
            registry,
            cancellation,
        }
    }

    /// Execute every block. Stops at the first failure, keeping the fragments
    /// produced so far plus an error fragment for the failed block.
    pub fn execute(&self, document: &Document, plan: &Plan, ctx: &mut Context) -> RenderOutcome {
        info!(blocks = document.len(), "executing document");
        let mut outcome = RenderOutcome {
            header: plan.metadata.clone(),
            ..RenderOutcome::default()
        };

        for block in &document.blocks {
            let step = if self.cancellation.is_cancelled() {
                Err(Failure::new(TerminalError {
                    block: block.index(),
                    line: block.line(),
                    span: block.span().clone(),
                    error: ExecutionError::Cancelled,
                }))
            } else {
                debug!(block = block.index(), kind = block.kind_name(), line = block.line(), "executing block");
                match block {
                    Block::Header(header) => Ok(self.header(header, plan, ctx)),
                    Block::Narrative(narrative) => self.narrative(narrative, ctx),
                    Block::Code(code) => self.code(code, plan, ctx),
                }
            };

            match step {
                Ok(fragments) => outcome.fragments.extend(fragments),
                Err(failure) => {
                    let (fragment, error) = failure.into_fragment();
                    warn!(block = error.block, line = error.line, "render stopped: {}", error.error);
                    outcome.fragments.push(fragment);
                    outcome.terminal_error = Some(error);
                    break;
                }
            }
        }

        info!(
            fragments = outcome.fragments.len(),
            complete = outcome.is_complete(),
            "document executed"
        );
        outcome
    }

    fn header(&self, header: &HeaderBlock, plan: &Plan, ctx: &mut Context) -> Vec<Fragment> {
        if let Some(params) = &plan.params {
            debug!(block = header.index, "binding params");
            ctx.set("params", Value::Table(params.clone()));
        }
        Vec::new()
    }

    fn narrative(&self, narrative: &NarrativeBlock, ctx: &Context) -> Result<Vec<Fragment>, Failure> {
        let evaluator = self.registry.default_evaluator();
        let text = narrative.substitute(|inline| {
            evaluator
                .evaluate_inline(&inline.expression, ctx)
                .map(|value| value.to_inline_string())
                .map_err(|err| {
                    let line = narrative.line + narrative.text[..inline.range.start].matches('\n').count();
                    Failure::new(TerminalError {
                        block: narrative.index,
                        line,
                        span: narrative.inline_span(inline),
                        error: execution_error(&err),
                    })
                })
        })?;
        Ok(vec![Fragment::Text {
            block: narrative.index,
            text,
        }])
    }

    fn code(&self, code: &CodeBlock, plan: &Plan, ctx: &mut Context) -> Result<Vec<Fragment>, Failure> {
        let terminal = |error: ExecutionError| TerminalError {
            block: code.index,
            line: code.line,
            span: code.span.clone(),
            error,
        };
        let (Some(options), Some(evaluator)) = (plan.options(code.index), self.registry.get(&code.engine))
        else {
            return Err(Failure::new(terminal(ExecutionError::Eval {
                message: format!("chunk `{}` was not validated", code.display_name()),
            })));
        };

        let mut fragments = Vec::new();
        let echo = Fragment::CodeEcho {
            block: code.index,
            engine: code.engine.clone(),
            code: code.code.clone(),
        };

        if !options.eval {
            debug!(block = code.index, label = %options.label, "evaluation disabled");
            if options.include {
                if options.echo {
                    fragments.push(echo);
                }
                fragments.push(Fragment::Skipped {
                    block: code.index,
                    label: options.label.clone(),
                });
            }
            return Ok(fragments);
        }

        let result = evaluator.evaluate(&code.code, options, ctx).map_err(|err| Failure {
            error: terminal(execution_error(&err)),
            partial: err.partial_output,
            comment: options.comment.clone(),
        })?;
        debug!(block = code.index, artifacts = result.artifacts.len(), "chunk evaluated");

        if !options.include {
            return Ok(fragments);
        }
        if options.echo {
            fragments.push(echo);
        }
        if options.results != ResultsMode::Hide {
            for artifact in result.artifacts {
                let output = match artifact {
                    Artifact::Image(mut image) => {
                        image.hints = options.figure.clone();
                        Output::Image(image)
                    }
                    other => Output::from(other),
                };
                fragments.push(Fragment::Output {
                    block: code.index,
                    output,
                    results: options.results,
                    comment: options.comment.clone(),
                });
            }
        }
        Ok(fragments)
    }
}

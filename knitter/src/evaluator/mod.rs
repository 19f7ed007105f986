//! The code evaluator interface and the evaluators that ship with the engine.

pub mod calc;
pub mod query;
pub mod registry;

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::context::Context;
use crate::options::ChunkOptions;
use crate::value::{Table, Value};

pub use calc::CalcEvaluator;
pub use query::QueryEvaluator;
pub use registry::EvaluatorRegistry;

/// Executes the code of one kind of chunk.
///
/// Implementations must be deterministic given the code, the options and the
/// context contents: rendering a document twice yields identical output.
pub trait Evaluator: Send + Sync {
    /// Engine name used in chunk headers (`{calc}`).
    fn name(&self) -> &str;

    /// Other engine names this evaluator answers to.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Evaluator-specific option checks, run before any block executes.
    fn validate(&self, _options: &ChunkOptions) -> Result<(), String> {
        Ok(())
    }

    /// Run a chunk. May read and write bindings and use resources.
    fn evaluate(
        &self,
        code: &str,
        options: &ChunkOptions,
        ctx: &mut Context,
    ) -> Result<EvalResult, EvalError>;

    /// Evaluate an inline expression. The context is read-only here.
    fn evaluate_inline(&self, expression: &str, ctx: &Context) -> Result<Value, EvalError> {
        ctx.lookup(expression.trim()).cloned()
    }
}

/// Everything a successful chunk produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalResult {
    /// Value of the last statement.
    pub value: Value,
    /// Output in production order.
    pub artifacts: Vec<Artifact>,
}

impl EvalResult {
    /// All text output, concatenated.
    pub fn captured_output(&self) -> String {
        captured_text(&self.artifacts)
    }
}

pub(crate) fn captured_text(artifacts: &[Artifact]) -> String {
    artifacts
        .iter()
        .filter_map(|artifact| match artifact {
            Artifact::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One piece of chunk output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Artifact {
    Text(String),
    Table(Table),
    Image(Image),
}

/// A rendered plot or other binary output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Image {
    /// File name, unique within a render (`<label>-<n>.svg`).
    pub name: String,
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// `fig_*`/`dpi` chunk options, attached by the pipeline.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub hints: BTreeMap<String, String>,
    #[serde(skip)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// Code failed at run time.
    Runtime,
    /// A name no earlier block bound.
    UnboundReference(String),
    /// A named resource was missing, unusable, or failed.
    Resource(String),
}

/// A failed evaluation, with whatever output was produced before the failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
    pub partial_output: Vec<Artifact>,
}

impl EvalError {
    pub fn runtime(message: impl Into<String>) -> Self {
        EvalError {
            kind: EvalErrorKind::Runtime,
            message: message.into(),
            partial_output: Vec::new(),
        }
    }

    pub fn unbound(name: &str) -> Self {
        EvalError {
            kind: EvalErrorKind::UnboundReference(name.to_string()),
            message: format!("object '{}' not found", name),
            partial_output: Vec::new(),
        }
    }

    pub fn resource(name: &str, message: impl Into<String>) -> Self {
        EvalError {
            kind: EvalErrorKind::Resource(name.to_string()),
            message: message.into(),
            partial_output: Vec::new(),
        }
    }

    pub fn with_partial_output(mut self, artifacts: Vec<Artifact>) -> Self {
        self.partial_output = artifacts;
        self
    }
}

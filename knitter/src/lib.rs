//! Execution engine for literate documents: runs the code chunks of a parsed
//! [`litdoc::Document`] in order against one shared [`Context`], substitutes
//! inline expressions, and renders the resulting fragments.

pub mod assembler;
pub mod cancellation;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod fragment;
pub mod metadata;
pub mod options;
pub mod pipeline;
pub mod render;
pub mod resource;
pub mod value;

pub use assembler::{AssembleError, Assembled, Assembler};
pub use cancellation::Cancellation;
pub use context::Context;
pub use error::{ConfigError, ExecutionError, TerminalError};
pub use evaluator::{EvalError, EvalResult, Evaluator, EvaluatorRegistry};
pub use fragment::{Fragment, Output, RenderOutcome};
pub use render::{Renderer, Report};
pub use resource::{MemoryDatabase, Resource, ResourceHandle, Resources};
pub use value::{Table, Value};

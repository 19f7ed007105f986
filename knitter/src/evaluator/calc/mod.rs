//! `calc`: the default evaluator. A small expression language with
//! assignments, lists, table access and a handful of statistics builtins.

mod builtins;
mod eval;
mod plot;
mod syntax;

use tracing::trace;

use crate::context::Context;
use crate::evaluator::{EvalError, EvalResult, Evaluator};
use crate::options::ChunkOptions;
use crate::value::Value;

use eval::Output;
use syntax::{Statement, parse_expression, parse_program};

#[derive(Debug, Clone, Copy, Default)]
pub struct CalcEvaluator;

impl Evaluator for CalcEvaluator {
    fn name(&self) -> &str {
        "calc"
    }

    fn aliases(&self) -> &[&str] {
        &["r"]
    }

    fn evaluate(
        &self,
        code: &str,
        options: &ChunkOptions,
        ctx: &mut Context,
    ) -> Result<EvalResult, EvalError> {
        let program = parse_program(code).map_err(|err| EvalError::runtime(err.to_string()))?;
        let mut out = Output::new(&options.label);
        let mut value = Value::Null;

        for located in program {
            trace!(line = located.line, "calc statement");
            match located.statement {
                Statement::Assign { name, value: expr } => {
                    let result = match eval::evaluate(&expr, ctx, &mut out) {
                        Ok(result) => result,
                        Err(err) => return Err(err.with_partial_output(out.into_artifacts())),
                    };
                    ctx.set(name, result);
                    value = Value::Null;
                }
                Statement::Expr(expr) => {
                    value = match eval::evaluate(&expr, ctx, &mut out) {
                        Ok(result) => result,
                        Err(err) => return Err(err.with_partial_output(out.into_artifacts())),
                    };
                    out.show(&value);
                }
            }
        }

        Ok(EvalResult {
            value,
            artifacts: out.into_artifacts(),
        })
    }

    fn evaluate_inline(&self, expression: &str, ctx: &Context) -> Result<Value, EvalError> {
        let expr = parse_expression(expression).map_err(|err| EvalError::runtime(err.to_string()))?;
        let mut out = Output::new("inline");
        let value = eval::evaluate(&expr, ctx, &mut out)?;
        if !out.is_empty() {
            return Err(EvalError::runtime(
                "inline expressions cannot print or plot",
            ));
        }
        Ok(value)
    }
}

use crate::context::Context;
use crate::evaluator::{Artifact, EvalError};
use crate::value::{Table, Value};

use super::builtins;
use super::syntax::{BinaryOperator, Expr, UnaryOperator};

/// Output collected while a chunk runs.
pub(crate) struct Output {
    artifacts: Vec<Artifact>,
    /// Chunk label, used to name figures.
    label: String,
    figures: usize,
}

impl Output {
    pub(crate) fn new(label: &str) -> Self {
        Output {
            artifacts: Vec::new(),
            label: label.to_string(),
            figures: 0,
        }
    }

    /// Append text. Consecutive text output is merged into one artifact.
    pub(crate) fn text(&mut self, text: String) {
        if let Some(Artifact::Text(last)) = self.artifacts.last_mut() {
            last.push('\n');
            last.push_str(&text);
        } else {
            self.artifacts.push(Artifact::Text(text));
        }
    }

    /// Show a value the way an interactive session would.
    pub(crate) fn show(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            Value::Table(table) => self.artifacts.push(Artifact::Table(table.clone())),
            other => self.text(other.to_string()),
        }
    }

    pub(crate) fn push(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    /// Name for the next figure: `<label>-<n>.svg`.
    pub(crate) fn next_figure_name(&mut self) -> String {
        self.figures += 1;
        format!("{}-{}.svg", self.label, self.figures)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub(crate) fn into_artifacts(self) -> Vec<Artifact> {
        self.artifacts
    }
}

pub(crate) fn type_error(expected: &str, got: &Value) -> EvalError {
    EvalError::runtime(format!(
        "type error: expected {}, got {}",
        expected,
        got.type_name()
    ))
}

pub(crate) fn evaluate(expr: &Expr, ctx: &Context, out: &mut Output) -> Result<Value, EvalError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Boolean(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Variable(name) => ctx.lookup(name).cloned(),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, ctx, out))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),

        Expr::Unary { op, operand } => {
            let value = evaluate(operand, ctx, out)?;
            match op {
                UnaryOperator::LogicalNot => Ok(Value::Boolean(value.is_falsy())),
                UnaryOperator::Negation => elementwise(&value, |v| match v {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    other => Err(type_error("Number", other)),
                }),
            }
        }

        // Short-circuiting
        Expr::Binary {
            op: BinaryOperator::LogicalAnd,
            left,
            right,
        } => {
            if evaluate(left, ctx, out)?.is_falsy() {
                return Ok(Value::Boolean(false));
            }
            Ok(Value::Boolean(evaluate(right, ctx, out)?.is_truthy()))
        }
        Expr::Binary {
            op: BinaryOperator::LogicalOr,
            left,
            right,
        } => {
            if evaluate(left, ctx, out)?.is_truthy() {
                return Ok(Value::Boolean(true));
            }
            Ok(Value::Boolean(evaluate(right, ctx, out)?.is_truthy()))
        }

        Expr::Binary { op, left, right } => {
            let left = evaluate(left, ctx, out)?;
            let right = evaluate(right, ctx, out)?;
            eval_binary_op(*op, &left, &right)
        }

        Expr::Field { target, name } => {
            let target = evaluate(target, ctx, out)?;
            field(&target, name)
        }

        Expr::Index { target, index } => {
            let target = evaluate(target, ctx, out)?;
            let index = evaluate(index, ctx, out)?;
            index_value(&target, &index)
        }

        Expr::Call { function, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, ctx, out))
                .collect::<Result<Vec<_>, _>>()?;
            builtins::call(function, args, out)
        }
    }
}

/// Apply `f` to a scalar, or to every element of a list.
fn elementwise(
    value: &Value,
    f: impl Fn(&Value) -> Result<Value, EvalError>,
) -> Result<Value, EvalError> {
    match value {
        Value::List(items) => items.iter().map(&f).collect::<Result<_, _>>().map(Value::List),
        other => f(other),
    }
}

fn eval_binary_op(
    op: BinaryOperator,
    left: &Value,
    right: &Value,
) -> Result<Value, EvalError> {
    match op {
        BinaryOperator::Equality => Ok(Value::Boolean(left == right)),
        BinaryOperator::Inequality => Ok(Value::Boolean(left != right)),
        _ => broadcast(left, right, |a, b| scalar_op(op, a, b)),
    }
}

/// Combine two values, pairing list elements and repeating scalars.
fn broadcast(
    left: &Value,
    right: &Value,
    f: impl Fn(&Value, &Value) -> Result<Value, EvalError>,
) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::List(a), Value::List(b)) => {
            if a.len() != b.len() {
                return Err(EvalError::runtime(format!(
                    "lists have different lengths ({} and {})",
                    a.len(),
                    b.len()
                )));
            }
            a.iter()
                .zip(b)
                .map(|(x, y)| f(x, y))
                .collect::<Result<_, _>>()
                .map(Value::List)
        }
        (Value::List(a), b) => a.iter().map(|x| f(x, b)).collect::<Result<_, _>>().map(Value::List),
        (a, Value::List(b)) => b.iter().map(|y| f(a, y)).collect::<Result<_, _>>().map(Value::List),
        (a, b) => f(a, b),
    }
}

fn scalar_op(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOperator::Addition => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            _ => Err(EvalError::runtime(format!(
                "type error: expected matching numeric or string types, got {} + {}",
                left.type_name(),
                right.type_name()
            ))),
        },
        BinaryOperator::Subtraction => numeric_binop(left, right, |a, b| a - b),
        BinaryOperator::Multiplication => numeric_binop(left, right, |a, b| a * b),
        BinaryOperator::Power => numeric_binop(left, right, f64::powf),
        BinaryOperator::Division => {
            let a = coerce_number(left)?;
            let b = coerce_number(right)?;
            if b == 0.0 {
                return Err(EvalError::runtime("division by zero"));
            }
            Ok(Value::Number(a / b))
        }
        BinaryOperator::Modulo => {
            let a = coerce_number(left)?;
            let b = coerce_number(right)?;
            if b == 0.0 {
                return Err(EvalError::runtime("division by zero"));
            }
            Ok(Value::Number(a % b))
        }
        BinaryOperator::GreaterThan => compare(left, right, |o| o.is_gt()),
        BinaryOperator::LessThan => compare(left, right, |o| o.is_lt()),
        BinaryOperator::GreaterThanOrEqual => compare(left, right, |o| o.is_ge()),
        BinaryOperator::LessThanOrEqual => compare(left, right, |o| o.is_le()),
        BinaryOperator::Equality => Ok(Value::Boolean(left == right)),
        BinaryOperator::Inequality => Ok(Value::Boolean(left != right)),
        BinaryOperator::LogicalAnd => Ok(Value::Boolean(left.is_truthy() && right.is_truthy())),
        BinaryOperator::LogicalOr => Ok(Value::Boolean(left.is_truthy() || right.is_truthy())),
    }
}

pub(crate) fn coerce_number(value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(type_error("Number", other)),
    }
}

fn numeric_binop(
    left: &Value,
    right: &Value,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    let a = coerce_number(left)?;
    let b = coerce_number(right)?;
    Ok(Value::Number(f(a, b)))
}

/// Numbers compare numerically and strings lexically.
fn compare(
    left: &Value,
    right: &Value,
    f: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, EvalError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => {
            return Err(EvalError::runtime(format!(
                "type error: cannot compare {} with {}",
                left.type_name(),
                right.type_name()
            )));
        }
    };
    Ok(Value::Boolean(ordering.is_some_and(f)))
}

/// `table$column`: the cell for a one-row table, otherwise the whole column.
fn field(target: &Value, name: &str) -> Result<Value, EvalError> {
    let Value::Table(table) = target else {
        return Err(type_error("Table", target));
    };
    column(table, name)
}

fn column(table: &Table, name: &str) -> Result<Value, EvalError> {
    let values = table.column(name).ok_or_else(|| {
        EvalError::runtime(format!(
            "no column '{}' (columns: {})",
            name,
            table.columns.join(", ")
        ))
    })?;
    if table.is_record() {
        Ok(values.into_iter().next().unwrap_or_default())
    } else {
        Ok(Value::List(values))
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Table(table), Value::String(name)) => column(table, name),
        (Value::Table(table), Value::Number(n)) => {
            let row = position(*n, table.rows.len())?;
            Ok(Value::Table(Table {
                columns: table.columns.clone(),
                rows: vec![table.rows[row].clone()],
            }))
        }
        (Value::List(items), Value::Number(n)) => {
            let at = position(*n, items.len())?;
            Ok(items[at].clone())
        }
        (Value::List(_), other) => Err(type_error("Number", other)),
        (other, _) => Err(type_error("List or Table", other)),
    }
}

/// 1-based position to a checked 0-based index.
fn position(n: f64, len: usize) -> Result<usize, EvalError> {
    if n.fract() != 0.0 || n < 1.0 || n > len as f64 {
        return Err(EvalError::runtime(format!(
            "index {} out of bounds (length {})",
            crate::value::format_number(n),
            len
        )));
    }
    Ok(n as usize - 1)
}

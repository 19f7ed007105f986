//! Functions callable from calc code.

use crate::evaluator::{Artifact, EvalError, Image};
use crate::value::{Table, Value, format_number};

use super::eval::{Output, coerce_number, type_error};
use super::plot;

pub(crate) fn call(name: &str, args: Vec<Value>, out: &mut Output) -> Result<Value, EvalError> {
    match name {
        "print" => {
            for arg in &args {
                out.show(arg);
            }
            Ok(Value::Null)
        }
        "c" => Ok(Value::List(
            args.into_iter()
                .flat_map(|arg| match arg {
                    Value::List(items) => items,
                    other => vec![other],
                })
                .collect(),
        )),
        "paste" => Ok(Value::String(join(&args, " "))),
        "paste0" => Ok(Value::String(join(&args, ""))),

        "sum" => Ok(Value::Number(numbers(name, &args)?.iter().sum())),
        "mean" => {
            let xs = non_empty(name, numbers(name, &args)?)?;
            Ok(Value::Number(mean(&xs)))
        }
        "median" => {
            let mut xs = non_empty(name, numbers(name, &args)?)?;
            xs.sort_by(f64::total_cmp);
            let mid = xs.len() / 2;
            let median = if xs.len() % 2 == 0 {
                (xs[mid - 1] + xs[mid]) / 2.0
            } else {
                xs[mid]
            };
            Ok(Value::Number(median))
        }
        "sd" => {
            let xs = numbers(name, &args)?;
            if xs.len() < 2 {
                return Err(EvalError::runtime("sd() needs at least two values"));
            }
            let m = mean(&xs);
            let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
            Ok(Value::Number(var.sqrt()))
        }
        "min" => {
            let xs = non_empty(name, numbers(name, &args)?)?;
            Ok(Value::Number(xs.into_iter().fold(f64::INFINITY, f64::min)))
        }
        "max" => {
            let xs = non_empty(name, numbers(name, &args)?)?;
            Ok(Value::Number(xs.into_iter().fold(f64::NEG_INFINITY, f64::max)))
        }

        "abs" => map_numbers(&arity(name, &args, 1, 1)?[0], &f64::abs),
        "sqrt" => {
            let arg = &arity(name, &args, 1, 1)?[0];
            if numbers(name, std::slice::from_ref(arg))?.iter().any(|x| *x < 0.0) {
                return Err(EvalError::runtime("sqrt() of a negative number"));
            }
            map_numbers(arg, &f64::sqrt)
        }
        "round" => {
            let args = arity(name, &args, 1, 2)?;
            let digits = match args.get(1) {
                Some(d) => coerce_number(d)?,
                None => 0.0,
            };
            let scale = 10f64.powi(digits as i32);
            map_numbers(&args[0], &|x: f64| (x * scale).round() / scale)
        }

        "length" => {
            let arg = &arity(name, &args, 1, 1)?[0];
            let n = match arg {
                Value::List(items) => items.len(),
                Value::Table(table) => table.rows.len(),
                Value::Null => 0,
                _ => 1,
            };
            Ok(Value::Number(n as f64))
        }
        "nrow" => Ok(Value::Number(table_arg(name, &args)?.rows.len() as f64)),
        "ncol" => Ok(Value::Number(table_arg(name, &args)?.columns.len() as f64)),
        "names" => Ok(Value::List(
            table_arg(name, &args)?
                .columns
                .iter()
                .map(|c| Value::String(c.clone()))
                .collect(),
        )),
        "head" => {
            let args = arity(name, &args, 1, 2)?;
            let n = match args.get(1) {
                Some(n) => count(coerce_number(n)?)?,
                None => 6,
            };
            match &args[0] {
                Value::Table(table) => Ok(Value::Table(table.head(n))),
                Value::List(items) => Ok(Value::List(items.iter().take(n).cloned().collect())),
                other => Err(type_error("List or Table", other)),
            }
        }
        "seq" => {
            let args = arity(name, &args, 2, 3)?;
            let from = coerce_number(&args[0])?;
            let to = coerce_number(&args[1])?;
            let by = match args.get(2) {
                Some(by) => coerce_number(by)?,
                None if to >= from => 1.0,
                None => -1.0,
            };
            seq(from, to, by)
        }

        "barplot" => {
            let args = arity(name, &args, 1, 3)?;
            let heights = numbers(name, &args[..1])?;
            let mut labels = Vec::new();
            let mut title = None;
            for extra in &args[1..] {
                match extra {
                    Value::List(items) => {
                        labels = items.iter().map(Value::to_inline_string).collect();
                    }
                    Value::String(s) => title = Some(s.clone()),
                    other => return Err(type_error("List of labels or a title", other)),
                }
            }
            if !labels.is_empty() && labels.len() != heights.len() {
                return Err(EvalError::runtime(format!(
                    "barplot() got {} labels for {} bars",
                    labels.len(),
                    heights.len()
                )));
            }
            let svg = plot::bar_chart(&heights, &labels, title.as_deref());
            let name = out.next_figure_name();
            out.push(Artifact::Image(Image {
                name,
                media_type: "image/svg+xml".to_string(),
                caption: title,
                hints: Default::default(),
                data: svg.into_bytes(),
            }));
            Ok(Value::Null)
        }

        _ => Err(EvalError::runtime(format!("could not find function \"{}\"", name))),
    }
}

fn arity<'a>(
    name: &str,
    args: &'a [Value],
    min: usize,
    max: usize,
) -> Result<&'a [Value], EvalError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(EvalError::runtime(format!(
            "{}() takes {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(args)
}

/// Flatten arguments into numbers. Booleans count as 1 and 0; nulls are
/// skipped.
fn numbers(name: &str, args: &[Value]) -> Result<Vec<f64>, EvalError> {
    let mut xs = Vec::new();
    for arg in args {
        match arg {
            Value::Number(n) => xs.push(*n),
            Value::Boolean(b) => xs.push(if *b { 1.0 } else { 0.0 }),
            Value::Null => {}
            Value::List(items) => xs.extend(numbers(name, items)?),
            other => {
                return Err(EvalError::runtime(format!(
                    "{}() needs numbers, got {}",
                    name,
                    other.type_name()
                )));
            }
        }
    }
    Ok(xs)
}

fn non_empty(name: &str, xs: Vec<f64>) -> Result<Vec<f64>, EvalError> {
    if xs.is_empty() {
        return Err(EvalError::runtime(format!("{}() of no values", name)));
    }
    Ok(xs)
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn map_numbers(value: &Value, f: &dyn Fn(f64) -> f64) -> Result<Value, EvalError> {
    match value {
        Value::Number(n) => Ok(Value::Number(f(*n))),
        Value::List(items) => items
            .iter()
            .map(|item| map_numbers(item, f))
            .collect::<Result<_, _>>()
            .map(Value::List),
        Value::Null => Ok(Value::Null),
        other => Err(type_error("Number", other)),
    }
}

fn table_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Table, EvalError> {
    match &arity(name, args, 1, 1)?[0] {
        Value::Table(table) => Ok(table),
        other => Err(type_error("Table", other)),
    }
}

fn count(n: f64) -> Result<usize, EvalError> {
    if n < 0.0 || n.fract() != 0.0 {
        return Err(EvalError::runtime(format!(
            "expected a whole, non-negative count, got {}",
            format_number(n)
        )));
    }
    Ok(n as usize)
}

fn join(args: &[Value], sep: &str) -> String {
    args.iter()
        .map(Value::to_inline_string)
        .collect::<Vec<_>>()
        .join(sep)
}

const MAX_SEQ_LEN: f64 = 1_000_000.0;

fn seq(from: f64, to: f64, by: f64) -> Result<Value, EvalError> {
    if by == 0.0 {
        return Err(EvalError::runtime("seq() step must not be zero"));
    }
    if (to - from) * by < 0.0 {
        return Err(EvalError::runtime("seq() step has the wrong sign"));
    }
    let steps = ((to - from) / by + 1e-10).floor();
    if steps > MAX_SEQ_LEN {
        return Err(EvalError::runtime("seq() would produce too many values"));
    }
    Ok(Value::List(
        (0..=steps as usize)
            .map(|i| Value::Number(from + i as f64 * by))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        call(name, args, &mut Output::new("t"))
    }

    fn list(xs: &[f64]) -> Value {
        Value::List(xs.iter().map(|x| Value::Number(*x)).collect())
    }

    #[test]
    fn aggregates() {
        let xs = list(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(run("sum", vec![xs.clone()]), Ok(Value::Number(40.0)));
        assert_eq!(run("mean", vec![xs.clone()]), Ok(Value::Number(5.0)));
        assert_eq!(run("median", vec![xs.clone()]), Ok(Value::Number(4.5)));
        assert_eq!(run("min", vec![xs.clone(), 1.0.into()]), Ok(Value::Number(1.0)));
        assert_eq!(run("max", vec![xs.clone()]), Ok(Value::Number(9.0)));
        let sd = run("sd", vec![xs]).unwrap().as_number().unwrap();
        assert!((sd - 2.138).abs() < 1e-3);
        assert_eq!(run("sum", vec![]), Ok(Value::Number(0.0)));
        assert_eq!(
            run("sum", vec![Value::List(vec![true.into(), false.into(), true.into()])]),
            Ok(Value::Number(2.0))
        );
        assert!(run("mean", vec![Value::List(vec![])]).is_err());
        assert!(run("sum", vec!["a".into()]).is_err());
    }

    #[test]
    fn nulls_are_skipped() {
        let xs = Value::List(vec![1.0.into(), Value::Null, 3.0.into()]);
        assert_eq!(run("mean", vec![xs]), Ok(Value::Number(2.0)));
    }

    #[test]
    fn elementwise_math_descends_into_nested_lists() {
        let nested = Value::List(vec![(-1.0).into(), list(&[-2.5, 4.0]), Value::Null]);
        assert_eq!(
            run("abs", vec![nested]),
            Ok(Value::List(vec![1.0.into(), list(&[2.5, 4.0]), Value::Null]))
        );
        assert_eq!(
            run("sqrt", vec![Value::List(vec![list(&[4.0, 9.0])])]),
            Ok(Value::List(vec![list(&[2.0, 3.0])]))
        );
        assert_eq!(
            run("round", vec![Value::List(vec![list(&[1.26])]), 1.0.into()]),
            Ok(Value::List(vec![list(&[1.3])]))
        );
        assert!(run("abs", vec![Value::List(vec!["x".into()])]).is_err());
    }

    #[test]
    fn shaping() {
        assert_eq!(
            run("c", vec![1.0.into(), list(&[2.0, 3.0])]),
            Ok(list(&[1.0, 2.0, 3.0]))
        );
        assert_eq!(run("seq", vec![1.0.into(), 4.0.into()]), Ok(list(&[1.0, 2.0, 3.0, 4.0])));
        assert_eq!(
            run("seq", vec![0.0.into(), 1.0.into(), 0.25.into()]),
            Ok(list(&[0.0, 0.25, 0.5, 0.75, 1.0]))
        );
        assert_eq!(run("seq", vec![3.0.into(), 1.0.into()]), Ok(list(&[3.0, 2.0, 1.0])));
        assert!(run("seq", vec![1.0.into(), 3.0.into(), (-1.0).into()]).is_err());
        assert_eq!(run("round", vec![3.14159.into(), 2.0.into()]), Ok(Value::Number(3.14)));
        assert_eq!(run("length", vec![list(&[1.0, 2.0])]), Ok(Value::Number(2.0)));
        assert_eq!(run("head", vec![list(&[1.0, 2.0, 3.0]), 2.0.into()]), Ok(list(&[1.0, 2.0])));
        assert_eq!(
            run("paste", vec!["n =".into(), 3.0.into()]),
            Ok(Value::from("n = 3"))
        );
    }

    #[test]
    fn tables() {
        let mut table = Table::new(vec!["a".into(), "b".into()]);
        table.rows.push(vec![1.0.into(), 2.0.into()]);
        let t = Value::Table(table);
        assert_eq!(run("nrow", vec![t.clone()]), Ok(Value::Number(1.0)));
        assert_eq!(run("ncol", vec![t.clone()]), Ok(Value::Number(2.0)));
        assert_eq!(
            run("names", vec![t]),
            Ok(Value::List(vec!["a".into(), "b".into()]))
        );
        assert!(run("nrow", vec![1.0.into()]).is_err());
    }

    #[test]
    fn print_and_unknown() {
        let mut out = Output::new("t");
        call("print", vec![1.0.into(), "x".into()], &mut out).unwrap();
        assert_eq!(out.into_artifacts(), vec![Artifact::Text("1\nx".into())]);

        let err = run("lm", vec![]).unwrap_err();
        assert_eq!(err.message, "could not find function \"lm\"");
        assert!(run("abs", vec![]).unwrap_err().message.contains("takes 1 argument"));
    }

    #[test]
    fn barplot_names_figures_after_label() {
        let mut out = Output::new("effects");
        call("barplot", vec![list(&[1.0, 2.0])], &mut out).unwrap();
        call(
            "barplot",
            vec![list(&[3.0]), Value::List(vec!["x".into()]), "Title".into()],
            &mut out,
        )
        .unwrap();
        let artifacts = out.into_artifacts();
        let names: Vec<&str> = artifacts
            .iter()
            .map(|a| match a {
                Artifact::Image(image) => image.name.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(names, vec!["effects-1.svg", "effects-2.svg"]);
        assert!(call("barplot", vec![list(&[1.0]), Value::List(vec![])], &mut Output::new("t")).is_ok());
        assert!(
            call(
                "barplot",
                vec![list(&[1.0, 2.0]), Value::List(vec!["a".into()])],
                &mut Output::new("t")
            )
            .is_err()
        );
    }
}

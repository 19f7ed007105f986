use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use knitter::error::ExecutionError;
use knitter::evaluator::{EvalError, EvalResult, Evaluator, EvaluatorRegistry};
use knitter::fragment::{Fragment, Output};
use knitter::options::ChunkOptions;
use knitter::resource::{Resource, ResourceError};
use knitter::{AssembleError, Assembled, Assembler, Cancellation, Context, MemoryDatabase, Table, Value};

fn render(source: &str) -> Assembled {
    Assembler::new()
        .run(source, 0, Vec::new(), &Cancellation::new())
        .expect("render failed")
}

fn render_markdown(source: &str) -> String {
    render(source).report.body
}

fn blocks(assembled: &Assembled) -> Vec<usize> {
    assembled.outcome.fragments.iter().map(Fragment::block).collect()
}

const TRIAL_REPORT: &str = "---
title: Trial summary
params:
  threshold: 0.5
---

Responders are those above «params$threshold».

```{sql fetch, connection=clinic, output_var=trials}
SELECT arm, response FROM trials ORDER BY response DESC
```

```{calc summary}
responders <- sum(trials$response > params$threshold)
n <- nrow(trials)
mean(trials$response)
```

We saw «responders» responders out of «n» patients.
";

fn clinic() -> Box<dyn Resource> {
    let mut table = Table::new(vec!["arm".into(), "response".into()]);
    table.rows.push(vec!["placebo".into(), 0.25.into()]);
    table.rows.push(vec!["drug".into(), 0.75.into()]);
    table.rows.push(vec!["drug".into(), 1.0.into()]);
    table.rows.push(vec!["placebo".into(), 0.5.into()]);
    Box::new(MemoryDatabase::new("clinic").with_table("trials", table))
}

#[test]
fn full_report_in_markdown() {
    let assembled = Assembler::new()
        .run(
            TRIAL_REPORT,
            0,
            vec![("clinic".to_string(), clinic())],
            &Cancellation::new(),
        )
        .unwrap();
    assert!(assembled.outcome.is_complete());
    assert!(assembled.warnings.is_empty());
    assert_eq!(
        assembled.report.body,
        "# Trial summary

Responders are those above 0.5.

```sql
SELECT arm, response FROM trials ORDER BY response DESC
```

```calc
responders <- sum(trials$response > params$threshold)
n <- nrow(trials)
mean(trials$response)
```

```
## 0.625
```

We saw 2 responders out of 4 patients.
"
    );
}

#[test]
fn parameters_can_be_overridden() {
    let assembled = Assembler::new()
        .with_params(vec![("threshold".to_string(), Value::Number(0.3))])
        .run(
            TRIAL_REPORT,
            0,
            vec![("clinic".to_string(), clinic())],
            &Cancellation::new(),
        )
        .unwrap();
    assert!(assembled.report.body.contains("We saw 3 responders out of 4 patients."));
}

// Narrative after the code that binds `n` substitutes; narrative before it fails.
#[test]
fn binding_order_decides_substitution() {
    let after = render("---\ntitle: T\n---\n\n```{calc}\nn <- 3\n```\n\nRows: «n»\n");
    assert!(after.outcome.is_complete());
    assert!(after.report.body.contains("Rows: 3"));

    let before = render("---\ntitle: T\n---\n\nRows: «n»\n\n```{calc}\nn <- 3\n```\n");
    let error = before.outcome.terminal_error.as_ref().unwrap();
    assert_eq!(error.block, 1);
    assert_eq!(error.error, ExecutionError::UnboundReference { name: "n".into() });
    assert_eq!(blocks(&before), vec![1]);
}

#[test]
fn excluded_chunk_still_updates_context() {
    let assembled = render(
        "```{calc include=FALSE}\nanswer <- 42\nanswer\n```\n\nThe answer is «answer».\n",
    );
    let outputs = assembled
        .outcome
        .fragments
        .iter()
        .filter(|f| f.is_output())
        .count();
    assert_eq!(outputs, 0);
    assert_eq!(assembled.report.body, "The answer is 42.\n");
}

#[test]
fn failure_stops_at_the_failing_block() {
    let source = "Intro.\n\n```{calc}\nx <- 1\n```\n\n```{calc}\nprint('partial')\nx / 0\n```\n\nNever «x».\n\n```{calc}\nx\n```\n";
    let assembled = render(source);
    assert_eq!(blocks(&assembled), vec![0, 1, 2]);

    let error = assembled.outcome.terminal_error.as_ref().unwrap();
    assert_eq!(error.block, 2);
    assert_eq!(error.line, 7);
    assert_eq!(
        error.error,
        ExecutionError::Eval {
            message: "division by zero".into()
        }
    );

    match assembled.outcome.fragments.last() {
        Some(Fragment::Output {
            output: Output::Error { message, partial },
            ..
        }) => {
            assert_eq!(message, "division by zero");
            assert_eq!(partial.len(), 1);
        }
        other => panic!("expected an error fragment, got {:?}", other),
    }

    let body = &assembled.report.body;
    assert!(body.contains("## partial"));
    assert!(body.contains("> **Error:** division by zero"));
    assert!(body.ends_with("**Rendering stopped at line 7:** division by zero\n"));
    assert!(!body.contains("Never"));
}

#[test]
fn narrative_only_document() {
    let source = "# Notes\n\nNo code here, and `«not»` an expression either.\n";
    let assembled = render(source);
    assert!(assembled.outcome.is_complete());
    assert_eq!(assembled.outcome.fragments.len(), 1);
    assert_eq!(assembled.report.body, source);
}

#[test]
fn fragments_follow_document_order() {
    let source = "A\n\n```{calc}\n1\n```\n\nB «2 + 2»\n\n```{calc echo=FALSE}\nc(1, 2)\n```\n\nC\n";
    let assembled = render(source);
    let order = blocks(&assembled);
    assert!(order.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(order, vec![0, 1, 1, 2, 3, 4]);
}

#[test]
fn rendering_is_idempotent() {
    let source = "---\ntitle: Again\n---\n\n```{calc fig}\nx <- seq(1, 5)\nbarplot(x, 'Counts')\nmean(x)\n```\n\nMean «mean(x)».\n";
    let first = render(source);
    let second = render(source);
    assert_eq!(first, second);
    assert_eq!(first.report.attachments.len(), 1);
    assert_eq!(first.report.attachments[0].path, "figures/fig-1.svg");
}

#[test]
fn html_and_json_renderers() {
    let source = "---\ntitle: Formats\n---\n\n```{calc plot, fig.width=5, fig.height=4, echo=FALSE}\nbarplot(c(3, 1))\n```\n";
    let html = Assembler::new()
        .with_format("html")
        .run(source, 0, Vec::new(), &Cancellation::new())
        .unwrap();
    assert!(html.report.body.contains("<title>Formats</title>"));
    assert!(html.report.body.contains(
        "<img src=\"figures/plot-1.svg\" alt=\"\" width=\"360\" height=\"288\">"
    ));

    let json = Assembler::new()
        .with_format("json")
        .run(source, 0, Vec::new(), &Cancellation::new())
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json.report.body).unwrap();
    assert_eq!(value["header"]["title"], "Formats");
    assert_eq!(value["fragments"][0]["output"]["kind"], "image");
    assert_eq!(value["fragments"][0]["output"]["data"]["name"], "plot-1.svg");
}

#[test]
fn config_errors_prevent_execution() {
    let err = Assembler::new()
        .run(
            "```{calc}\nprint('ran')\n```\n\n```{calc echo=maybe}\n1\n```\n",
            0,
            Vec::new(),
            &Cancellation::new(),
        )
        .unwrap_err();
    match err {
        AssembleError::Config(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].block, Some(1));
        }
        other => panic!("expected config errors, got {:?}", other),
    }
}

#[test]
fn labels_that_are_not_file_names_are_rejected() {
    let source = "```{calc ../../escape}\nbarplot(c(1, 2))\n```\n\n```{calc my plot}\nbarplot(c(3))\n```\n";
    match Assembler::new().run(source, 0, Vec::new(), &Cancellation::new()) {
        Err(AssembleError::Config(errors)) => {
            let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
            assert_eq!(
                messages,
                vec!["invalid chunk label `../../escape`", "invalid chunk label `my plot`"]
            );
        }
        other => panic!("expected config errors, got {:?}", other),
    }
}

#[test]
fn non_finite_numeric_options_are_rejected() {
    let source = "```{calc, dpi=inf}\n1\n```\n\n```{calc, dpi=NaN}\n2\n```\n";
    match Assembler::new().run(source, 0, Vec::new(), &Cancellation::new()) {
        Err(AssembleError::Config(errors)) => {
            let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
            assert_eq!(
                messages,
                vec![
                    "chunk option `dpi` expects a number, found string `inf`",
                    "chunk option `dpi` expects a number, found string `NaN`",
                ]
            );
        }
        other => panic!("expected config errors, got {:?}", other),
    }
}

#[test]
fn cancelled_render_stops_before_first_block() {
    let cancellation = Cancellation::new();
    cancellation.cancel();
    let assembled = Assembler::new()
        .run("Text\n\n```{calc}\n1\n```\n", 0, Vec::new(), &cancellation)
        .unwrap();
    let error = assembled.outcome.terminal_error.unwrap();
    assert_eq!(error.block, 0);
    assert_eq!(error.error, ExecutionError::Cancelled);
    assert_eq!(assembled.outcome.fragments.len(), 1);
}

// ---------------------------------------------------------------------------
// Resource release
// ---------------------------------------------------------------------------

struct Tracked {
    closes: Arc<AtomicUsize>,
}

impl Resource for Tracked {
    fn describe(&self) -> String {
        "tracked".into()
    }

    fn close(&mut self) -> Result<(), ResourceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn tracked(closes: &Arc<AtomicUsize>) -> Vec<(String, Box<dyn Resource>)> {
    vec![(
        "handle".to_string(),
        Box::new(Tracked {
            closes: Arc::clone(closes),
        }) as Box<dyn Resource>,
    )]
}

#[test]
fn resources_close_once_on_every_path() {
    let cases = [
        // success
        "```{calc}\n1\n```\n",
        // evaluation failure
        "```{calc}\n1 / 0\n```\n",
        // parse failure
        "```{calc}\nunterminated\n",
        // configuration failure
        "```{nope}\n1\n```\n",
    ];
    for source in cases {
        let closes = Arc::new(AtomicUsize::new(0));
        let _ = Assembler::new().run(source, 0, tracked(&closes), &Cancellation::new());
        assert_eq!(closes.load(Ordering::SeqCst), 1, "source: {:?}", source);
    }
}

#[test]
fn close_failures_become_warnings() {
    let mut db = MemoryDatabase::new("db");
    // Closing twice fails, so pre-close it.
    db.close().unwrap();
    let assembled = Assembler::new()
        .run("Text\n", 0, vec![("db".to_string(), Box::new(db) as Box<dyn Resource>)], &Cancellation::new())
        .unwrap();
    assert_eq!(assembled.warnings.len(), 1);
    assert!(assembled.warnings[0].contains("resource 'db'"));
}

// ---------------------------------------------------------------------------
// Custom evaluators
// ---------------------------------------------------------------------------

/// Upper-cases its code and counts invocations in the context.
struct Shout;

impl Evaluator for Shout {
    fn name(&self) -> &str {
        "shout"
    }

    fn evaluate(
        &self,
        code: &str,
        _options: &ChunkOptions,
        ctx: &mut Context,
    ) -> Result<EvalResult, EvalError> {
        let calls = ctx.get("calls").and_then(Value::as_number).unwrap_or(0.0) + 1.0;
        ctx.set("calls", Value::Number(calls));
        Ok(EvalResult {
            value: Value::Null,
            artifacts: vec![knitter::evaluator::Artifact::Text(code.trim().to_uppercase())],
        })
    }
}

#[test]
fn custom_evaluator_shares_the_context() {
    let mut registry = EvaluatorRegistry::new();
    registry.register(Arc::new(Shout));
    let assembled = Assembler::new()
        .with_evaluators(registry)
        .run(
            "```{shout}\nhello\n```\n\n```{shout echo=FALSE}\nagain\n```\n\nCalls: «calls».\n",
            0,
            Vec::new(),
            &Cancellation::new(),
        )
        .unwrap();
    let body = &assembled.report.body;
    assert!(body.contains("## HELLO"));
    assert!(body.contains("## AGAIN"));
    assert!(body.contains("Calls: 2."));
}

/// Closes the resource named by its code, reporting whether it was still open.
struct Hangup;

impl Evaluator for Hangup {
    fn name(&self) -> &str {
        "hangup"
    }

    fn evaluate(
        &self,
        code: &str,
        _options: &ChunkOptions,
        ctx: &mut Context,
    ) -> Result<EvalResult, EvalError> {
        let name = code.trim();
        let was_open = ctx
            .close_resource(name)
            .map_err(|err| EvalError::resource(name, err.to_string()))?;
        Ok(EvalResult {
            value: Value::Boolean(was_open),
            artifacts: vec![knitter::evaluator::Artifact::Text(format!("{} open: {}", name, was_open))],
        })
    }
}

#[test]
fn evaluator_closing_a_resource_closes_it_once() {
    let closes = Arc::new(AtomicUsize::new(0));
    let mut registry = EvaluatorRegistry::new();
    registry.register(Arc::new(Hangup));
    let assembled = Assembler::new()
        .with_evaluators(registry)
        .run(
            "```{hangup}\nhandle\n```\n\n```{hangup}\nhandle\n```\n",
            0,
            tracked(&closes),
            &Cancellation::new(),
        )
        .unwrap();
    let body = &assembled.report.body;
    assert!(body.contains("handle open: true"));
    assert!(body.contains("handle open: false"));
    assert!(assembled.warnings.is_empty());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn one_assembler_renders_documents_on_separate_threads() {
    let assembler = Arc::new(Assembler::new());
    let handles: Vec<_> = (1..=4)
        .map(|i| {
            let assembler = Arc::clone(&assembler);
            std::thread::spawn(move || {
                let source = format!("```{{calc echo=FALSE}}\nn <- {}\nn * 10\n```\n\nn is «n».\n", i);
                assembler
                    .run(&source, 0, vec![("clinic".to_string(), clinic())], &Cancellation::new())
                    .unwrap()
                    .report
                    .body
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let body = handle.join().unwrap();
        let n = i + 1;
        assert_eq!(body, format!("```\n## {}\n```\n\nn is {}.\n", n * 10, n));
    }
}

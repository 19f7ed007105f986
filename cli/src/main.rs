mod config;
mod test_runner;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use knitter::{AssembleError, Assembler, Cancellation, ConfigError, Report, TerminalError, Value};

use crate::config::Config;

const SUBCOMMANDS: &[&str] = &["render", "test", "help"];

#[derive(Parser)]
#[command(name = "litdoc", version, about = "Literate document renderer")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a literate document
    Render(RenderArgs),

    /// Run .test.md fixture files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RenderArgs {
    /// Document to render
    file: String,

    /// Output format (markdown, html, json). Overrides the document header.
    #[arg(long)]
    to: Option<String>,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file (default: litdoc.toml next to the document)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override a declared parameter. Repeatable.
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, Value)>,

    /// Parse and validate only, don't execute (exit 0 if valid)
    #[arg(long)]
    check: bool,

    /// Dump the parsed document
    #[arg(long)]
    ast: bool,

    /// List code chunks with their resolved options
    #[arg(long)]
    list_chunks: bool,

    /// Render but don't write the report
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.md file or directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // `litdoc report.Rmd` means `litdoc render report.Rmd`.
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args
        .iter()
        .skip(1)
        .position(|a| !a.starts_with('-'))
        .map(|i| i + 1)
    {
        if !SUBCOMMANDS.contains(&args[pos].as_str()) {
            args.insert(pos, "render".to_string());
        }
    }

    let cli = Cli::parse_from(&args);

    match cli.command {
        Command::Render(render_args) => do_render(render_args, cli.no_color),
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, cli.no_color, &test_args.category);
            process::exit(exit_code);
        }
    }
}

fn do_render(args: RenderArgs, no_color: bool) {
    let color_choice = if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };
    let writer = StandardStream::stderr(color_choice);
    let term_config = term::Config::default();

    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.file, e);
            process::exit(1);
        }
    };

    let config = match Config::load(args.config.as_deref(), Path::new(&args.file)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    let mut files = SimpleFiles::new();
    let file_id = files.add(args.file.clone(), source.clone());
    let emit = |diagnostic: &Diagnostic<usize>| {
        let _ = term::emit_to_write_style(&mut writer.lock(), &term_config, &files, diagnostic);
    };

    // --ast: dump the parse tree, before any validation
    if args.ast {
        match litdoc::parser::Parser::new(source.clone(), file_id).parse() {
            Ok(document) => println!("{:#?}", document),
            Err(errors) => {
                errors.iter().for_each(|e| emit(&e.to_diagnostic()));
                process::exit(1);
            }
        }
        return;
    }

    let mut assembler = Assembler::new().with_params(args.params);
    if let Some(format) = args.to.as_ref().or(config.format.as_ref()) {
        assembler = assembler.with_format(format.clone());
    }

    if args.check || args.list_chunks {
        let (document, plan) = match assembler.check(&source, file_id) {
            Ok(checked) => checked,
            Err(error) => {
                emit_assemble_error(&error, file_id, &emit);
                process::exit(1);
            }
        };

        if args.check {
            eprintln!("ok: {} is valid", args.file);
        }
        if args.list_chunks {
            for block in document.code_blocks() {
                let Some(options) = plan.options(block.index) else {
                    continue;
                };
                println!(
                    "{:>4}  {:<8} {:<24} eval={} echo={} include={}",
                    block.line,
                    block.engine,
                    options.label,
                    options.eval,
                    options.echo,
                    options.include
                );
            }
        }
        return;
    }

    let resources = match config.resources() {
        Ok(resources) => resources,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    let assembled = match assembler.run(&source, file_id, resources, &Cancellation::new()) {
        Ok(assembled) => assembled,
        Err(error) => {
            emit_assemble_error(&error, file_id, &emit);
            process::exit(1);
        }
    };

    for warning in &assembled.warnings {
        emit(&Diagnostic::warning().with_message(warning));
    }

    if !args.quiet {
        let destination = output_path(
            Path::new(&args.file),
            args.output.as_deref(),
            config.output_dir.as_deref(),
            &assembled.report,
        );
        if let Err(e) = write_report(&assembled.report, destination.as_deref()) {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }

    if let Some(error) = &assembled.outcome.terminal_error {
        emit(&terminal_diagnostic(error, file_id));
        process::exit(1);
    }
}

fn emit_assemble_error(error: &AssembleError, file_id: usize, emit: &impl Fn(&Diagnostic<usize>)) {
    match error {
        AssembleError::Parse(errors) => {
            for e in errors {
                emit(&e.to_diagnostic());
            }
        }
        AssembleError::Config(errors) => {
            for e in errors {
                emit(&config_diagnostic(e, file_id));
            }
        }
        AssembleError::Render { error, .. } => {
            emit(&Diagnostic::error().with_message(format!("render failed: {}", error)));
        }
    }
}

fn config_diagnostic(error: &ConfigError, file_id: usize) -> Diagnostic<usize> {
    let diagnostic = Diagnostic::error()
        .with_message(&error.message)
        .with_notes(error.notes.clone());
    match &error.span {
        Some(span) => diagnostic.with_labels(vec![Label::primary(file_id, span.clone())]),
        None => diagnostic,
    }
}

fn terminal_diagnostic(error: &TerminalError, file_id: usize) -> Diagnostic<usize> {
    Diagnostic::error()
        .with_message(error.error.to_string())
        .with_labels(vec![
            Label::primary(file_id, error.span.clone())
                .with_message(format!("rendering stopped at block {}", error.block)),
        ])
        .with_notes(vec!["the report was written up to this block".to_string()])
}

/// Where the report goes: `-o`, else `<output_dir>/<stem>.<ext>`, else stdout.
fn output_path(
    document: &Path,
    explicit: Option<&Path>,
    output_dir: Option<&Path>,
    report: &Report,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let dir = output_dir?;
    let stem = document.file_stem().and_then(|s| s.to_str()).unwrap_or("report");
    Some(dir.join(format!("{}.{}", stem, report.extension)))
}

/// Write the report body and its attachments. Attachments are placed
/// relative to the report's directory and are skipped on stdout.
fn write_report(report: &Report, destination: Option<&Path>) -> Result<(), String> {
    let Some(path) = destination else {
        print!("{}", report.body);
        if !report.attachments.is_empty() {
            tracing::warn!(
                count = report.attachments.len(),
                "figures are not written when printing to stdout; use --output"
            );
        }
        return Ok(());
    };

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    if !base.as_os_str().is_empty() {
        std::fs::create_dir_all(base)
            .map_err(|e| format!("cannot create '{}': {}", base.display(), e))?;
    }
    std::fs::write(path, &report.body)
        .map_err(|e| format!("cannot write '{}': {}", path.display(), e))?;

    for attachment in &report.attachments {
        let relative = Path::new(&attachment.path);
        if !relative
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)))
        {
            return Err(format!("refusing to write figure outside the output directory: '{}'", attachment.path));
        }
        let target = base.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create '{}': {}", parent.display(), e))?;
        }
        std::fs::write(&target, &attachment.data)
            .map_err(|e| format!("cannot write '{}': {}", target.display(), e))?;
    }
    tracing::info!(path = %path.display(), attachments = report.attachments.len(), "wrote report");
    Ok(())
}

/// Parse `-P key=value`.
fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing parameter name in '{}'", s));
    }
    Ok((key.to_string(), parse_arg(raw)))
}

/// Numbers become Number, TRUE/FALSE become Boolean, everything else is String.
fn parse_arg(s: &str) -> Value {
    if let Ok(n) = s.parse::<f64>() {
        return Value::Number(n);
    }
    match s {
        "TRUE" | "true" => Value::Boolean(true),
        "FALSE" | "false" => Value::Boolean(false),
        _ => Value::String(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knitter::render::Attachment;

    fn report(attachments: Vec<Attachment>) -> Report {
        Report {
            format: "markdown".to_string(),
            extension: "md".to_string(),
            body: "# Trial\n".to_string(),
            attachments,
        }
    }

    #[test]
    fn param_arguments() {
        assert!(matches!(parse_param("threshold=0.3"), Ok((k, Value::Number(n))) if k == "threshold" && n == 0.3));
        assert!(matches!(parse_param("site=north"), Ok((_, Value::String(s))) if s == "north"));
        assert!(matches!(parse_param("full=TRUE"), Ok((_, Value::Boolean(true)))));
        assert!(parse_param("threshold").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn output_destination() {
        let doc = Path::new("reports/trial.Rmd");
        let r = report(Vec::new());

        assert_eq!(output_path(doc, None, None, &r), None);
        assert_eq!(
            output_path(doc, None, Some(Path::new("out")), &r),
            Some(PathBuf::from("out/trial.md"))
        );
        assert_eq!(
            output_path(doc, Some(Path::new("x.md")), Some(Path::new("out")), &r),
            Some(PathBuf::from("x.md"))
        );
    }

    #[test]
    fn attachments_stay_inside_the_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("trial.md");
        let r = report(vec![Attachment {
            path: "figures/../../escape-1.svg".to_string(),
            media_type: "image/svg+xml".to_string(),
            data: b"<svg/>".to_vec(),
        }]);

        let err = write_report(&r, Some(&path)).unwrap_err();
        assert!(err.contains("outside the output directory"), "{}", err);
        assert!(!dir.path().join("escape-1.svg").exists());
    }

    #[test]
    fn writes_attachments_next_to_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("trial.md");
        let r = report(vec![Attachment {
            path: "figures/plot-1.svg".to_string(),
            media_type: "image/svg+xml".to_string(),
            data: b"<svg/>".to_vec(),
        }]);

        write_report(&r, Some(&path)).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Trial\n");
        let figure = dir.path().join("out").join("figures").join("plot-1.svg");
        assert_eq!(std::fs::read(figure).unwrap(), b"<svg/>");
    }
}

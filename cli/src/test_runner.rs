use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use knitter::{AssembleError, Assembler, Cancellation, ConfigError};

use crate::config::{ConnectionConfig, connections_to_resources, toml_to_value};

#[derive(Debug, Deserialize)]
pub struct ExpectedError {
    /// Substring that must appear in the error message.
    pub contains: String,

    /// If set, the error must be reported on this 1-based source line.
    #[serde(default)]
    pub line: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    /// Human-readable test description.
    #[serde(default)]
    pub description: Option<String>,

    /// Output format. Defaults to the document's own choice.
    #[serde(default)]
    pub format: Option<String>,

    /// Parameter overrides.
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,

    /// In-memory databases, same shape as in `litdoc.toml`.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,

    /// Expected exact report body (trimmed comparison).
    #[serde(default)]
    pub expect_output: Option<String>,

    /// Substrings that must all appear in the report body.
    #[serde(default)]
    pub expect_contains: Vec<String>,

    /// Expected terminal execution error. The partial report is still checked.
    #[serde(default)]
    pub expect_error: Option<ExpectedError>,

    /// If true, the test expects parsing to fail.
    #[serde(default)]
    pub expect_parse_error: bool,

    /// Expected configuration error (one of the reported errors must match).
    #[serde(default)]
    pub expect_config_error: Option<ExpectedError>,
}

/// Parse a `.test.md` file into its TOML config and document source.
/// The config sits between `+++` lines so the document keeps its own
/// `---` YAML header.
fn parse_test_file(content: &str) -> Result<(TestConfig, &str), String> {
    let content = content.trim_start_matches('\u{feff}');

    let after_open = content
        .strip_prefix("+++")
        .ok_or("missing opening +++ frontmatter delimiter")?;
    let after_open = after_open
        .strip_prefix('\n')
        .or_else(|| after_open.strip_prefix("\r\n"))
        .unwrap_or(after_open);

    let close_pos = after_open
        .find("\n+++")
        .ok_or("missing closing +++ frontmatter delimiter")?;

    let toml_str = after_open[..close_pos].trim_end_matches('\r');
    let rest = &after_open[close_pos + 4..];
    let source = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);

    let config: TestConfig =
        toml::from_str(toml_str).map_err(|e| format!("TOML parse error: {}", e))?;

    Ok((config, source))
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

fn run_single_test(path: &Path) -> TestResult {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            return TestResult {
                path: path.to_path_buf(),
                description: None,
                outcome: TestOutcome::Fail(format!("cannot read file: {}", e)),
            };
        }
    };

    let (config, source) = match parse_test_file(&content) {
        Ok(pair) => pair,
        Err(e) => {
            return TestResult {
                path: path.to_path_buf(),
                description: None,
                outcome: TestOutcome::Fail(format!("frontmatter error: {}", e)),
            };
        }
    };

    let outcome = match check_document(&config, source) {
        Ok(()) => TestOutcome::Pass,
        Err(reason) => TestOutcome::Fail(reason),
    };

    TestResult {
        path: path.to_path_buf(),
        description: config.description,
        outcome,
    }
}

/// Render `source` and compare against the fixture's expectations.
fn check_document(config: &TestConfig, source: &str) -> Result<(), String> {
    let params = config
        .params
        .iter()
        .map(|(name, value)| Ok((name.clone(), toml_to_value(value)?)))
        .collect::<Result<Vec<_>, String>>()
        .map_err(|e| format!("invalid params: {}", e))?;
    let resources = connections_to_resources(&config.connections)?;

    let mut assembler = Assembler::new().with_params(params);
    if let Some(format) = &config.format {
        assembler = assembler.with_format(format.clone());
    }

    let result = assembler.run(source, 0, resources, &Cancellation::new());

    if config.expect_parse_error {
        return match result {
            Err(AssembleError::Parse(_)) => Ok(()),
            Err(other) => Err(format!("expected parse error, got {}", describe(&other))),
            Ok(_) => Err("expected parse error, but parsing succeeded".into()),
        };
    }

    if let Some(expected) = &config.expect_config_error {
        return match result {
            Err(AssembleError::Config(errors)) => {
                let found = errors.iter().any(|e| {
                    e.message.contains(&expected.contains)
                        && expected.line.is_none_or(|line| e.line == Some(line))
                });
                if found {
                    Ok(())
                } else {
                    Err(format!(
                        "expected config error containing \"{}\"{}, got:\n{}",
                        expected.contains,
                        line_suffix(expected.line),
                        config_messages(&errors)
                    ))
                }
            }
            Err(other) => Err(format!("expected config error, got {}", describe(&other))),
            Ok(_) => Err("expected config error, but validation succeeded".into()),
        };
    }

    let assembled = result.map_err(|e| format!("unexpected {}", describe(&e)))?;

    match (&config.expect_error, &assembled.outcome.terminal_error) {
        (Some(expected), Some(actual)) => {
            let message = actual.error.to_string();
            if !message.contains(&expected.contains) {
                return Err(format!(
                    "expected error containing \"{}\", got: {}",
                    expected.contains, message
                ));
            }
            if let Some(line) = expected.line {
                if actual.line != line {
                    return Err(format!(
                        "expected error on line {}, but it was reported on line {}",
                        line, actual.line
                    ));
                }
            }
        }
        (Some(expected), None) => {
            return Err(format!(
                "expected error containing \"{}\", but rendering completed",
                expected.contains
            ));
        }
        (None, Some(actual)) => return Err(format!("unexpected execution error: {}", actual)),
        (None, None) => {}
    }

    let body = &assembled.report.body;
    if let Some(expected) = &config.expect_output {
        let expected = expected.trim();
        let actual = body.trim();
        if expected != actual {
            return Err(format!(
                "output mismatch\n  expected:\n{}\n  actual:\n{}",
                indent(expected),
                indent(actual)
            ));
        }
    }

    for needle in &config.expect_contains {
        if !body.contains(needle.as_str()) {
            return Err(format!(
                "expected output to contain \"{}\"\n  actual:\n{}",
                needle,
                indent(body.trim())
            ));
        }
    }

    Ok(())
}

fn describe(error: &AssembleError) -> String {
    match error {
        AssembleError::Parse(errors) => {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            format!("parse error: {}", msgs.join("; "))
        }
        AssembleError::Config(errors) => format!("config error:\n{}", config_messages(errors)),
        AssembleError::Render { error, .. } => format!("render error: {}", error),
    }
}

fn config_messages(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| match e.line {
            Some(line) => format!("    - line {}: {}", line, e.message),
            None => format!("    - {}", e.message),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn line_suffix(line: Option<usize>) -> String {
    line.map(|l| format!(" on line {}", l)).unwrap_or_default()
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

const FIXTURE_SUFFIX: &str = ".test.md";

/// Fixture files keyed by category: the subfolder path relative to the
/// suite root, `""` for files at the root.
struct Suite {
    categories: BTreeMap<String, Vec<PathBuf>>,
}

impl Suite {
    fn discover(root: &Path) -> Suite {
        let mut suite = Suite {
            categories: BTreeMap::new(),
        };
        suite.walk(root, root);
        suite.categories.values_mut().for_each(|files| files.sort());
        suite
    }

    fn single(path: &Path) -> Suite {
        Suite {
            categories: BTreeMap::from([(String::new(), vec![path.to_path_buf()])]),
        }
    }

    fn walk(&mut self, dir: &Path, root: &Path) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for path in entries.flatten().map(|entry| entry.path()) {
            if path.is_dir() {
                self.walk(&path, root);
                continue;
            }
            let is_fixture = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.ends_with(FIXTURE_SUFFIX));
            if is_fixture {
                let category = dir
                    .strip_prefix(root)
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                self.categories.entry(category).or_default().push(path);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    fn names(&self) -> String {
        self.categories
            .keys()
            .map(|k| category_label(k))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Keep the requested categories and their subcategories.
    fn select(self, requested: &[String]) -> Suite {
        if requested.is_empty() {
            return self;
        }

        let wanted: Vec<&str> = requested.iter().map(|r| r.trim_matches('/')).collect();
        for req in &wanted {
            if !self.categories.keys().any(|cat| in_category(cat, req)) {
                eprintln!("warning: category '{}' not found (available: {})", req, self.names());
            }
        }

        let categories = self
            .categories
            .into_iter()
            .filter(|(cat, _)| wanted.iter().any(|req| in_category(cat, req)))
            .collect();
        Suite { categories }
    }
}

fn in_category(cat: &str, req: &str) -> bool {
    cat == req || cat.strip_prefix(req).is_some_and(|rest| rest.starts_with('/'))
}

fn category_label(cat: &str) -> &str {
    if cat.is_empty() { "(root)" } else { cat }
}

/// Print the categories under `path` with their fixture counts.
pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("{} is a single fixture", path.display());
        return;
    }

    let suite = Suite::discover(path);
    if suite.is_empty() {
        eprintln!("no {} files under {}", FIXTURE_SUFFIX, path.display());
        return;
    }

    for (cat, files) in &suite.categories {
        eprintln!("  {:<24} {} fixture(s)", category_label(cat), files.len());
    }
}

fn paint(text: &str, code: &str, no_color: bool) -> String {
    if no_color {
        text.to_string()
    } else {
        format!("\x1b[{}m{}\x1b[0m", code, text)
    }
}

fn test_label(result: &TestResult) -> &str {
    result.description.as_deref().unwrap_or_else(|| {
        result
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("?")
    })
}

/// Run every fixture under `path` (or the single fixture `path`), limited
/// to `categories` when given. Returns the process exit code.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String]) -> i32 {
    let single = path.is_file();
    let suite = if single {
        Suite::single(path)
    } else {
        let suite = Suite::discover(path);
        if suite.is_empty() {
            eprintln!("no {} files under {}", FIXTURE_SUFFIX, path.display());
            return 1;
        }
        suite.select(categories)
    };

    if suite.is_empty() {
        eprintln!("nothing to run");
        return 1;
    }

    let mut passed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for (cat, files) in &suite.categories {
        if !single {
            eprintln!();
            eprintln!("{}", paint(category_label(cat), "1", no_color));
        }

        for result in files.iter().map(|file| run_single_test(file)) {
            if let TestOutcome::Pass = result.outcome {
                passed += 1;
                eprintln!("  {}  {}", paint("PASS", "32", no_color), test_label(&result));
            } else {
                eprintln!("  {}  {}", paint("FAIL", "31", no_color), test_label(&result));
                failures.push(result);
            }
        }
    }

    if !failures.is_empty() {
        eprintln!();
        eprintln!("failures:");
        for failure in &failures {
            eprintln!();
            eprintln!("  --- {} ---", failure.path.display());
            if let TestOutcome::Fail(reason) = &failure.outcome {
                reason.lines().for_each(|line| eprintln!("  {}", line));
            }
        }
    }

    eprintln!();
    if failures.is_empty() {
        eprintln!("test result: {}. {} passed, 0 failed", paint("ok", "32", no_color), passed);
        0
    } else {
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            paint("FAILED", "31", no_color),
            passed,
            failures.len(),
            passed + failures.len()
        );
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
    }

    #[test]
    fn frontmatter_split() {
        let (config, source) = parse_test_file(
            "+++\ndescription = \"header\"\nexpect_contains = [\"# T\"]\n+++\n---\ntitle: T\n---\n",
        )
        .unwrap();
        assert_eq!(config.description.as_deref(), Some("header"));
        assert_eq!(config.expect_contains, vec!["# T".to_string()]);
        assert_eq!(source, "---\ntitle: T\n---\n");
    }

    #[test]
    fn frontmatter_errors() {
        assert!(parse_test_file("no frontmatter").is_err());
        assert!(parse_test_file("+++\nexpect_output = \"x\"\n").is_err());
        assert!(parse_test_file("+++\nexpect_outptu = \"x\"\n+++\n").is_err());
    }

    #[test]
    fn mismatches_are_reported() {
        let (config, source) =
            parse_test_file("+++\nexpect_output = \"Goodbye.\"\n+++\nHello.\n").unwrap();
        let reason = check_document(&config, source).unwrap_err();
        assert!(reason.starts_with("output mismatch"), "{}", reason);

        let (config, source) = parse_test_file(
            "+++\n[expect_error]\ncontains = \"not found\"\n+++\nAll good.\n",
        )
        .unwrap();
        let reason = check_document(&config, source).unwrap_err();
        assert!(reason.contains("rendering completed"), "{}", reason);
    }

    #[test]
    fn category_filter() {
        let suite = Suite::discover(&fixtures());
        assert!(suite.categories.contains_key("errors"));
        assert!(suite.categories.keys().all(|cat| !cat.is_empty()));

        let selected = suite.select(&["errors/".to_string()]);
        assert_eq!(selected.categories.keys().collect::<Vec<_>>(), vec!["errors"]);

        assert!(in_category("sql/joins", "sql"));
        assert!(!in_category("sqlite", "sql"));
    }

    #[test]
    fn fixtures_pass() {
        assert_eq!(run_tests(&fixtures(), true, &[]), 0);
    }
}

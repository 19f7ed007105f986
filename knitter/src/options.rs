use std::collections::BTreeMap;

use litdoc::block::{ChunkOption, CodeBlock, OptionValue};
use serde::Serialize;

use crate::error::ConfigError;

/// Recognised chunk option keys, besides the `fig_*` family.
pub const KNOWN_OPTIONS: &[&str] = &[
    "eval",
    "echo",
    "include",
    "results",
    "comment",
    "label",
    "dpi",
    "connection",
    "output_var",
];

/// How an output fragment is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultsMode {
    /// Formatted by the renderer (fenced and commented text, tables).
    #[default]
    Markup,
    /// Inserted verbatim.
    Raw,
    /// Produced but not shown.
    #[serde(rename = "none")]
    Hide,
}

impl ResultsMode {
    pub fn parse(raw: &str) -> Option<ResultsMode> {
        match raw {
            "markup" => Some(ResultsMode::Markup),
            "raw" | "asis" => Some(ResultsMode::Raw),
            "none" | "hide" => Some(ResultsMode::Hide),
            _ => None,
        }
    }
}

/// Typed options for one code chunk, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOptions {
    /// Always set: chunks without a label get `unnamed-chunk-N`.
    pub label: String,
    pub eval: bool,
    pub echo: bool,
    pub include: bool,
    pub results: ResultsMode,
    /// Prefix for text output lines. Empty means no prefix.
    pub comment: String,
    /// `fig_*` and `dpi` hints, passed through to the renderer as written.
    pub figure: BTreeMap<String, String>,
    pub connection: Option<String>,
    pub output_var: Option<String>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        ChunkOptions {
            label: String::from("unnamed-chunk-1"),
            eval: true,
            echo: true,
            include: true,
            results: ResultsMode::Markup,
            comment: String::from("##"),
            figure: BTreeMap::new(),
            connection: None,
            output_var: None,
        }
    }
}

impl ChunkOptions {
    /// Type-check a chunk's raw options. `ordinal` numbers unlabelled chunks.
    pub fn from_block(block: &CodeBlock, ordinal: usize) -> Result<ChunkOptions, Vec<ConfigError>> {
        let mut options = ChunkOptions {
            label: block
                .label
                .clone()
                .unwrap_or_else(|| format!("unnamed-chunk-{}", ordinal)),
            ..ChunkOptions::default()
        };
        let mut errors = Vec::new();

        if let Some(label) = &block.label {
            if !is_safe_label(label) {
                errors.push(
                    ConfigError::at(
                        format!("invalid chunk label `{}`", label),
                        block.index,
                        block.span.clone(),
                        block.line,
                    )
                    .with_note("labels name figure files: use letters, digits, `_`, `-` and `.` (no `..`)"),
                );
            }
        }

        for opt in &block.options {
            if let Err(err) = options.apply(block, opt) {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(options)
        } else {
            Err(errors)
        }
    }

    fn apply(&mut self, block: &CodeBlock, opt: &ChunkOption) -> Result<(), ConfigError> {
        let error = |message: String| {
            ConfigError::at(message, block.index, opt.span.clone(), block.line)
        };

        match opt.key.as_str() {
            "eval" => self.eval = expect_bool(opt).map_err(error)?,
            "echo" => self.echo = expect_bool(opt).map_err(error)?,
            "include" => self.include = expect_bool(opt).map_err(error)?,
            "results" => {
                let raw = expect_string(opt).map_err(error)?;
                self.results = ResultsMode::parse(&raw).ok_or_else(|| {
                    error(format!("invalid value `{}` for chunk option `results`", raw))
                        .with_note("expected one of: markup, raw, none (or asis, hide)")
                })?;
            }
            "comment" => self.comment = opt.value.to_string(),
            // Stored on the block by the parser.
            "label" => {}
            "connection" => self.connection = Some(expect_string(opt).map_err(error)?),
            "output_var" => {
                let name = expect_string(opt).map_err(error)?;
                if !is_identifier(&name) {
                    return Err(error(format!(
                        "chunk option `output_var` must be a plain name, found `{}`",
                        name
                    )));
                }
                self.output_var = Some(name);
            }
            "dpi" => {
                expect_number(opt).map_err(error)?;
                self.figure.insert(opt.key.clone(), opt.value.to_string());
            }
            key if key.starts_with("fig_") => {
                self.figure.insert(opt.key.clone(), opt.value.to_string());
            }
            other => {
                let mut err = error(format!("unknown chunk option `{}`", other));
                if let Some(suggestion) = suggest(other) {
                    err = err.with_note(format!("did you mean `{}`?", suggestion));
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Numeric figure hint, if present and numeric.
    pub fn figure_number(&self, key: &str) -> Option<f64> {
        self.figure.get(key)?.parse().ok()
    }
}

fn expect_bool(opt: &ChunkOption) -> Result<bool, String> {
    match &opt.value {
        OptionValue::Boolean(b) => Ok(*b),
        other => Err(format!(
            "chunk option `{}` expects TRUE or FALSE, found {} `{}`",
            opt.key,
            other.type_name(),
            other
        )),
    }
}

fn expect_string(opt: &ChunkOption) -> Result<String, String> {
    match &opt.value {
        OptionValue::String(s) => Ok(s.clone()),
        other => Err(format!(
            "chunk option `{}` expects a string, found {} `{}`",
            opt.key,
            other.type_name(),
            other
        )),
    }
}

fn expect_number(opt: &ChunkOption) -> Result<f64, String> {
    match &opt.value {
        OptionValue::Number(n) => Ok(*n),
        other => Err(format!(
            "chunk option `{}` expects a number, found {} `{}`",
            opt.key,
            other.type_name(),
            other
        )),
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Labels become figure file names (`<label>-<n>.svg`), so they must stay a
/// single path component that is also a valid Markdown link target.
fn is_safe_label(label: &str) -> bool {
    !label.is_empty()
        && !label.contains("..")
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Closest known option within edit distance 2.
fn suggest(key: &str) -> Option<&'static str> {
    KNOWN_OPTIONS
        .iter()
        .map(|known| (edit_distance(key, known), *known))
        .filter(|(distance, _)| *distance <= 2)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, known)| known)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

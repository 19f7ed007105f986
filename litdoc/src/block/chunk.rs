use std::fmt;
use std::ops::Range;

/// A fenced code chunk: ```` ```{engine label, key=value} ````.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub index: usize,
    /// Evaluator kind tag (the first word inside the braces).
    pub engine: String,
    /// Chunk label, positional or from `label=`.
    pub label: Option<String>,
    /// Options in the order they were written. Keys are unique.
    pub options: Vec<ChunkOption>,
    /// Chunk body, verbatim, without the fence lines.
    pub code: String,
    /// Byte span in source, fence lines included.
    pub span: Range<usize>,
    /// 1-based line of the opening fence.
    pub line: usize,
}

impl CodeBlock {
    pub fn option(&self, key: &str) -> Option<&ChunkOption> {
        self.options.iter().find(|opt| opt.key == key)
    }

    /// Label to show in messages: the chunk label, or `chunk <index>`.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("chunk {}", self.index),
        }
    }
}

/// A single `key=value` pair from a chunk's opening fence.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOption {
    /// Option name. knitr-style dotted names (`fig.width`) are stored with
    /// underscores (`fig_width`).
    pub key: String,
    pub value: OptionValue,
    /// Byte span of the whole `key=value` text in source.
    pub span: Range<usize>,
}

/// A literal chunk option value. Interpretation is left to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl OptionValue {
    /// Parse the raw text to the right of `=`.
    pub fn parse(raw: &str) -> OptionValue {
        let raw = raw.trim();
        if raw.len() >= 2 {
            let first = raw.as_bytes()[0];
            let last = raw.as_bytes()[raw.len() - 1];
            if (first == b'"' || first == b'\'') && first == last {
                return OptionValue::String(raw[1..raw.len() - 1].to_string());
            }
        }
        match raw {
            "TRUE" | "true" => return OptionValue::Boolean(true),
            "FALSE" | "false" => return OptionValue::Boolean(false),
            _ => {}
        }
        // `f64` parsing also accepts `inf` and `NaN`; those stay strings.
        if let Ok(n) = raw.parse::<f64>() {
            if n.is_finite() {
                return OptionValue::Number(n);
            }
        }
        OptionValue::String(raw.to_string())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Boolean(_) => "boolean",
            OptionValue::Number(_) => "number",
            OptionValue::String(_) => "string",
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            OptionValue::Number(n) => write!(f, "{}", n),
            OptionValue::String(s) => write!(f, "{}", s),
        }
    }
}

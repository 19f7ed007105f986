use std::fmt;

use serde::Serialize;

/// A value bound in the execution context or produced by an evaluator.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    /// Tabular data with named columns.
    /// A one-row table doubles as a record.
    Table(Table),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// A single-row table built from `(name, value)` pairs.
    pub fn record(fields: Vec<(String, Value)>) -> Self {
        let (columns, row): (Vec<String>, Vec<Value>) = fields.into_iter().unzip();
        Table {
            columns,
            rows: vec![row],
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values in a column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    pub fn is_record(&self) -> bool {
        self.rows.len() == 1
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Boolean(false) | Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Table(_) => "Table",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text used when the value is substituted into narrative.
    /// Lists are joined with commas, as knitr does for inline vectors.
    pub fn to_inline_string(&self) -> String {
        match self {
            Value::List(items) => items
                .iter()
                .map(Value::to_inline_string)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Format a number without a trailing `.0` when it is integral.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n == n.floor() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Value::String(s) => write!(f, "{:?}", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, "]")
            }
            Value::Table(table) => write!(f, "{}", table),
        }
    }
}

impl fmt::Display for Table {
    /// Render as a Markdown pipe table.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "|")?;
        for column in &self.columns {
            write!(f, " {} |", column)?;
        }
        writeln!(f)?;
        write!(f, "|")?;
        for _ in &self.columns {
            write!(f, "---|")?;
        }
        writeln!(f)?;
        for row in &self.rows {
            write!(f, "|")?;
            for cell in row {
                write!(f, " {} |", cell.to_inline_string())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b, // NaN != NaN per IEEE 754
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::resource::{Connection, Resource, ResourceError};
use crate::value::{Table, Value};

/// An in-memory table store answering a small `SELECT` dialect:
///
/// ```text
/// SELECT * | col, ... FROM table
///     [WHERE col <op> literal]
///     [ORDER BY col [ASC | DESC]]
///     [LIMIT n]
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    name: String,
    tables: BTreeMap<String, Table>,
    closed: bool,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryDatabase {
            name: name.into(),
            tables: BTreeMap::new(),
            closed: false,
        }
    }

    pub fn with_table(mut self, name: impl Into<String>, table: Table) -> Self {
        self.tables.insert(name.into(), table);
        self
    }

    pub fn insert_table(&mut self, name: impl Into<String>, table: Table) {
        self.tables.insert(name.into(), table);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Resource for MemoryDatabase {
    fn describe(&self) -> String {
        format!("memory database '{}' ({} tables)", self.name, self.tables.len())
    }

    fn as_connection(&mut self) -> Option<&mut dyn Connection> {
        Some(self)
    }

    fn close(&mut self) -> Result<(), ResourceError> {
        if self.closed {
            return Err(ResourceError::Closed(self.name.clone()));
        }
        self.closed = true;
        Ok(())
    }
}

impl Connection for MemoryDatabase {
    fn query(&mut self, sql: &str) -> Result<Table, ResourceError> {
        if self.closed {
            return Err(ResourceError::Closed(self.name.clone()));
        }
        let query = parse_select(sql)?;
        let table = self
            .tables
            .get(&query.from)
            .ok_or_else(|| ResourceError::Query(format!("no such table: {}", query.from)))?;
        run_select(&query, table)
    }
}

// ---------------------------------------------------------------------------
// Query parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(f64),
    Str(String),
    Symbol(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug)]
struct Select {
    columns: Option<Vec<String>>,
    from: String,
    filter: Option<(String, CompareOp, Value)>,
    order_by: Option<(String, bool)>,
    limit: Option<usize>,
}

fn tokenize(sql: &str) -> Result<Vec<Token>, ResourceError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse()
                .map_err(|_| ResourceError::Query(format!("bad number: {}", text)))?;
            tokens.push(Token::Number(n));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        } else if c == '\'' {
            let start = i + 1;
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                i += 1;
            }
            if i >= chars.len() {
                return Err(ResourceError::Query("unterminated string literal".into()));
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
        } else {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let symbol = match two.as_str() {
                "<=" => Some("<="),
                ">=" => Some(">="),
                "!=" | "<>" => Some("!="),
                _ => None,
            };
            if let Some(symbol) = symbol {
                tokens.push(Token::Symbol(symbol));
                i += 2;
                continue;
            }
            let symbol = match c {
                '*' => "*",
                ',' => ",",
                '=' => "=",
                '<' => "<",
                '>' => ">",
                ';' => ";",
                other => {
                    return Err(ResourceError::Query(format!(
                        "unexpected character '{}'",
                        other
                    )));
                }
            };
            tokens.push(Token::Symbol(symbol));
            i += 1;
        }
    }

    Ok(tokens)
}

struct QueryParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl QueryParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ResourceError> {
        if self.at_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ResourceError::Query(format!(
                "expected {}, found {}",
                keyword,
                describe(self.peek())
            )))
        }
    }

    fn identifier(&mut self) -> Result<String, ResourceError> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            other => Err(ResourceError::Query(format!(
                "expected a name, found {}",
                describe(other.as_ref())
            ))),
        }
    }

    fn literal(&mut self) -> Result<Value, ResourceError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Value::Number(n)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("true") => Ok(Value::Boolean(true)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("false") => Ok(Value::Boolean(false)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("null") => Ok(Value::Null),
            other => Err(ResourceError::Query(format!(
                "expected a literal, found {}",
                describe(other.as_ref())
            ))),
        }
    }
}

fn describe(token: Option<&Token>) -> String {
    match token {
        None => "end of query".to_string(),
        Some(Token::Word(w)) => format!("'{}'", w),
        Some(Token::Number(n)) => format!("{}", n),
        Some(Token::Str(s)) => format!("'{}'", s),
        Some(Token::Symbol(s)) => format!("'{}'", s),
    }
}

fn parse_select(sql: &str) -> Result<Select, ResourceError> {
    let mut p = QueryParser {
        tokens: tokenize(sql)?,
        pos: 0,
    };

    p.expect_keyword("select")?;
    let columns = if p.peek() == Some(&Token::Symbol("*")) {
        p.pos += 1;
        None
    } else {
        let mut cols = vec![p.identifier()?];
        while p.peek() == Some(&Token::Symbol(",")) {
            p.pos += 1;
            cols.push(p.identifier()?);
        }
        Some(cols)
    };
    p.expect_keyword("from")?;
    let from = p.identifier()?;

    let mut filter = None;
    if p.at_keyword("where") {
        p.pos += 1;
        let column = p.identifier()?;
        let op = match p.next() {
            Some(Token::Symbol("=")) => CompareOp::Eq,
            Some(Token::Symbol("!=")) => CompareOp::Ne,
            Some(Token::Symbol("<")) => CompareOp::Lt,
            Some(Token::Symbol(">")) => CompareOp::Gt,
            Some(Token::Symbol("<=")) => CompareOp::Le,
            Some(Token::Symbol(">=")) => CompareOp::Ge,
            other => {
                return Err(ResourceError::Query(format!(
                    "expected a comparison, found {}",
                    describe(other.as_ref())
                )));
            }
        };
        filter = Some((column, op, p.literal()?));
    }

    let mut order_by = None;
    if p.at_keyword("order") {
        p.pos += 1;
        p.expect_keyword("by")?;
        let column = p.identifier()?;
        let descending = if p.at_keyword("desc") {
            p.pos += 1;
            true
        } else {
            if p.at_keyword("asc") {
                p.pos += 1;
            }
            false
        };
        order_by = Some((column, descending));
    }

    let mut limit = None;
    if p.at_keyword("limit") {
        p.pos += 1;
        match p.next() {
            Some(Token::Number(n)) if n >= 0.0 && n == n.floor() => limit = Some(n as usize),
            other => {
                return Err(ResourceError::Query(format!(
                    "LIMIT expects a non-negative integer, found {}",
                    describe(other.as_ref())
                )));
            }
        }
    }

    if p.peek() == Some(&Token::Symbol(";")) {
        p.pos += 1;
    }
    if let Some(extra) = p.peek() {
        return Err(ResourceError::Query(format!(
            "unexpected {} after query",
            describe(Some(extra))
        )));
    }

    Ok(Select {
        columns,
        from,
        filter,
        order_by,
        limit,
    })
}

// ---------------------------------------------------------------------------
// Query execution
// ---------------------------------------------------------------------------

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn column_of(table: &Table, name: &str) -> Result<usize, ResourceError> {
    table
        .column_index(name)
        .ok_or_else(|| ResourceError::Query(format!("no such column: {}", name)))
}

fn run_select(query: &Select, table: &Table) -> Result<Table, ResourceError> {
    let mut rows: Vec<&Vec<Value>> = table.rows.iter().collect();

    if let Some((column, op, literal)) = &query.filter {
        let idx = column_of(table, column)?;
        rows.retain(|row| {
            let cell = row.get(idx).unwrap_or(&Value::Null);
            match (op, compare(cell, literal)) {
                (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
                (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
                (CompareOp::Ne, None) => true,
                (CompareOp::Lt, Some(o)) => o == Ordering::Less,
                (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
                (CompareOp::Le, Some(o)) => o != Ordering::Greater,
                (CompareOp::Ge, Some(o)) => o != Ordering::Less,
                _ => false,
            }
        });
    }

    if let Some((column, descending)) = &query.order_by {
        let idx = column_of(table, column)?;
        rows.sort_by(|a, b| {
            let a = a.get(idx).unwrap_or(&Value::Null);
            let b = b.get(idx).unwrap_or(&Value::Null);
            let ord = match (a, b) {
                (Value::Null, Value::Null) => Ordering::Equal,
                (Value::Null, _) => return Ordering::Greater,
                (_, Value::Null) => return Ordering::Less,
                _ => compare(a, b).unwrap_or(Ordering::Equal),
            };
            if *descending { ord.reverse() } else { ord }
        });
    }

    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }

    let indices: Vec<usize> = match &query.columns {
        None => (0..table.columns.len()).collect(),
        Some(names) => names
            .iter()
            .map(|name| column_of(table, name))
            .collect::<Result<_, _>>()?,
    };

    Ok(Table {
        columns: indices.iter().map(|&i| table.columns[i].clone()).collect(),
        rows: rows
            .into_iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trials() -> MemoryDatabase {
        let mut table = Table::new(vec!["id".into(), "arm".into(), "response".into()]);
        table.rows = vec![
            vec![1.0.into(), "placebo".into(), 0.2.into()],
            vec![2.0.into(), "drug".into(), 0.7.into()],
            vec![3.0.into(), "drug".into(), 0.5.into()],
            vec![4.0.into(), "placebo".into(), Value::Null],
        ];
        MemoryDatabase::new("db").with_table("trials", table)
    }

    #[test]
    fn select_star() {
        let result = trials().query("SELECT * FROM trials").unwrap();
        assert_eq!(result.columns.len(), 3);
        assert_eq!(result.rows.len(), 4);
    }

    #[test]
    fn projection_filter_order_limit() {
        let result = trials()
            .query("select id, response from trials where arm = 'drug' order by response desc limit 1;")
            .unwrap();
        assert_eq!(result.columns, vec!["id".to_string(), "response".to_string()]);
        assert_eq!(result.rows, vec![vec![Value::Number(2.0), Value::Number(0.7)]]);
    }

    #[test]
    fn nulls_sort_last() {
        let result = trials()
            .query("SELECT id FROM trials ORDER BY response")
            .unwrap();
        let ids: Vec<Value> = result.rows.into_iter().map(|mut r| r.remove(0)).collect();
        assert_eq!(ids, vec![1.0.into(), 3.0.into(), 2.0.into(), 4.0.into()]);
    }

    #[test]
    fn numeric_filters() {
        let result = trials()
            .query("SELECT id FROM trials WHERE response >= 0.5")
            .unwrap();
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn query_errors() {
        let mut db = trials();
        assert!(matches!(db.query("SELECT * FROM nope"), Err(ResourceError::Query(_))));
        assert!(matches!(db.query("SELECT bogus FROM trials"), Err(ResourceError::Query(_))));
        assert!(matches!(db.query("DELETE FROM trials"), Err(ResourceError::Query(_))));
        assert!(matches!(db.query("SELECT * FROM trials LIMIT x"), Err(ResourceError::Query(_))));
        assert!(matches!(db.query("SELECT * FROM trials WHERE arm = 'x"), Err(ResourceError::Query(_))));
    }

    #[test]
    fn closed_database_refuses_queries() {
        let mut db = trials();
        db.close().unwrap();
        assert!(db.is_closed());
        assert_eq!(
            db.query("SELECT * FROM trials"),
            Err(ResourceError::Closed("db".into()))
        );
        assert!(db.close().is_err());
    }
}

use std::fmt;

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Variable(String),
    List(Vec<Expr>),
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `target$name`
    Field {
        target: Box<Expr>,
        name: String,
    },
    /// `target[index]`, 1-based.
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negation,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulo,
    Power,
    Equality,
    Inequality,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    LogicalAnd,
    LogicalOr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign { name: String, value: Expr },
    Expr(Expr),
}

/// A statement and the 1-based chunk line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub line: usize,
    pub statement: Statement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syntax error on line {}: {}", self.line, self.message)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse chunk code: statements separated by newlines or `;`.
pub fn parse_program(code: &str) -> Result<Vec<Located>, SyntaxError> {
    let tokens = tokenize(code)?;
    let mut parser = ExprParser::new(tokens);
    let mut program = Vec::new();

    loop {
        parser.skip_separators();
        if parser.at_end() {
            break;
        }
        let line = parser.line();
        let statement = parser.parse_statement()?;
        if !parser.at_end() && !parser.at_separator() {
            return Err(parser.unexpected());
        }
        program.push(Located { line, statement });
    }

    Ok(program)
}

/// Parse a single expression (inline code). Assignments are rejected.
pub fn parse_expression(code: &str) -> Result<Expr, SyntaxError> {
    let tokens = tokenize(code)?;
    let mut parser = ExprParser::new(tokens);
    if parser.at_end() {
        return Err(SyntaxError {
            message: "empty expression".into(),
            line: 1,
        });
    }
    if parser.is_assignment() {
        return Err(parser.error("assignment is not allowed in an inline expression"));
    }
    let expr = parser.parse_expr(0)?;
    parser.skip_separators();
    if !parser.at_end() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,     // =
    Arrow,  // <-
    EqEq,   // ==
    BangEq, // !=
    Gt,
    Lt,
    GtEq,
    LtEq,
    AmpAmp,
    PipePipe,
    Bang,
    Dollar,
    Comma,

    LParen,
    RParen,
    LBracket,
    RBracket,

    /// Newline or `;` outside brackets.
    Separator,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Number(n) => format!("number `{}`", n),
        Tok::Str(s) => format!("string {:?}", s),
        Tok::Ident(name) => format!("name `{}`", name),
        Tok::Separator => "end of statement".to_string(),
        other => format!("`{}`", symbol(other)),
    }
}

fn symbol(tok: &Tok) -> &'static str {
    match tok {
        Tok::True => "TRUE",
        Tok::False => "FALSE",
        Tok::Null => "NULL",
        Tok::Plus => "+",
        Tok::Minus => "-",
        Tok::Star => "*",
        Tok::Slash => "/",
        Tok::Percent => "%",
        Tok::Caret => "^",
        Tok::Eq => "=",
        Tok::Arrow => "<-",
        Tok::EqEq => "==",
        Tok::BangEq => "!=",
        Tok::Gt => ">",
        Tok::Lt => "<",
        Tok::GtEq => ">=",
        Tok::LtEq => "<=",
        Tok::AmpAmp => "&&",
        Tok::PipePipe => "||",
        Tok::Bang => "!",
        Tok::Dollar => "$",
        Tok::Comma => ",",
        Tok::LParen => "(",
        Tok::RParen => ")",
        Tok::LBracket => "[",
        Tok::RBracket => "]",
        Tok::Number(_) | Tok::Str(_) | Tok::Ident(_) | Tok::Separator => "?",
    }
}

fn tokenize(code: &str) -> Result<Vec<Token>, SyntaxError> {
    let chars: Vec<char> = code.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    // Bracket nesting; newlines inside brackets do not end a statement.
    let mut depth: usize = 0;

    let peek = |i: usize| chars.get(i).copied();

    while i < len {
        let c = chars[i];
        let start_line = line;
        let mut push = |tok: Tok| tokens.push(Token { tok, line: start_line });

        match c {
            '\n' => {
                if depth == 0 {
                    push(Tok::Separator);
                }
                line += 1;
                i += 1;
            }
            ';' => {
                push(Tok::Separator);
                i += 1;
            }
            ' ' | '\t' | '\r' => i += 1,

            // Comment to end of line
            '#' => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
            }

            '"' | '\'' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                loop {
                    match peek(i) {
                        None | Some('\n') => {
                            return Err(SyntaxError {
                                message: "unterminated string".into(),
                                line,
                            });
                        }
                        Some(ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = match peek(i + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some(other) => other,
                                None => '\\',
                            };
                            s.push(escaped);
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                push(Tok::Str(s));
            }

            '0'..='9' => {
                let start = i;
                while i < len && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < len && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if matches!(peek(j), Some('+') | Some('-')) {
                        j += 1;
                    }
                    if matches!(peek(j), Some(d) if d.is_ascii_digit()) {
                        i = j;
                        while i < len && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| SyntaxError {
                    message: format!("malformed number `{}`", text),
                    line,
                })?;
                push(Tok::Number(n));
            }

            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < len && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                match ident.as_str() {
                    "TRUE" | "true" => push(Tok::True),
                    "FALSE" | "false" => push(Tok::False),
                    "NULL" | "null" => push(Tok::Null),
                    _ => push(Tok::Ident(ident)),
                }
            }

            _ => {
                let next = peek(i + 1);
                let (tok, width) = match (c, next) {
                    ('<', Some('-')) => (Tok::Arrow, 2),
                    ('=', Some('=')) => (Tok::EqEq, 2),
                    ('!', Some('=')) => (Tok::BangEq, 2),
                    ('>', Some('=')) => (Tok::GtEq, 2),
                    ('<', Some('=')) => (Tok::LtEq, 2),
                    ('&', Some('&')) => (Tok::AmpAmp, 2),
                    ('|', Some('|')) => (Tok::PipePipe, 2),
                    ('+', _) => (Tok::Plus, 1),
                    ('-', _) => (Tok::Minus, 1),
                    ('*', _) => (Tok::Star, 1),
                    ('/', _) => (Tok::Slash, 1),
                    ('%', _) => (Tok::Percent, 1),
                    ('^', _) => (Tok::Caret, 1),
                    ('=', _) => (Tok::Eq, 1),
                    ('>', _) => (Tok::Gt, 1),
                    ('<', _) => (Tok::Lt, 1),
                    ('!', _) => (Tok::Bang, 1),
                    ('$', _) => (Tok::Dollar, 1),
                    (',', _) => (Tok::Comma, 1),
                    ('(', _) => (Tok::LParen, 1),
                    (')', _) => (Tok::RParen, 1),
                    ('[', _) => (Tok::LBracket, 1),
                    (']', _) => (Tok::RBracket, 1),
                    _ => {
                        return Err(SyntaxError {
                            message: format!("unexpected character `{}`", c),
                            line,
                        });
                    }
                };
                match tok {
                    Tok::LParen | Tok::LBracket => depth += 1,
                    Tok::RParen | Tok::RBracket => depth = depth.saturating_sub(1),
                    _ => {}
                }
                push(tok);
                i += width;
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Expression parser
// ---------------------------------------------------------------------------

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

// Binding powers. Higher binds tighter.
const BP_OR: u8 = 4; // ||
const BP_AND: u8 = 6; // &&
const BP_EQUALITY: u8 = 8; // == !=
const BP_COMPARISON: u8 = 10; // < > <= >=
const BP_ADDITIVE: u8 = 12; // + -
const BP_MULTIPLICATIVE: u8 = 14; // * / %
const BP_UNARY: u8 = 16; // ! -
const BP_POWER: u8 = 18; // ^ (right-associative)

impl ExprParser {
    fn new(tokens: Vec<Token>) -> Self {
        ExprParser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn at_separator(&self) -> bool {
        self.peek() == Some(&Tok::Separator)
    }

    fn skip_separators(&mut self) {
        while self.at_separator() {
            self.pos += 1;
        }
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            line: self.line(),
        }
    }

    fn unexpected(&self) -> SyntaxError {
        match self.peek() {
            Some(tok) => self.error(format!("unexpected {}", describe(tok))),
            None => self.error("unexpected end of input"),
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), SyntaxError> {
        if self.peek() == Some(&tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.expected(&tok))
        }
    }

    fn expected(&self, tok: &Tok) -> SyntaxError {
        match self.peek() {
            Some(found) => self.error(format!(
                "expected `{}`, found {}",
                symbol(tok),
                describe(found)
            )),
            None => self.error(format!("expected `{}`, found end of input", symbol(tok))),
        }
    }

    /// `name = expr` or `name <- expr`
    fn is_assignment(&self) -> bool {
        matches!(
            (
                self.tokens.get(self.pos).map(|t| &t.tok),
                self.tokens.get(self.pos + 1).map(|t| &t.tok)
            ),
            (Some(Tok::Ident(_)), Some(Tok::Eq | Tok::Arrow))
        )
    }

    fn parse_statement(&mut self) -> Result<Statement, SyntaxError> {
        if self.is_assignment() {
            let Some(Tok::Ident(name)) = self.advance() else {
                return Err(self.unexpected());
            };
            self.advance();
            let value = self.parse_expr(0)?;
            return Ok(Statement::Assign { name, value });
        }
        Ok(Statement::Expr(self.parse_expr(0)?))
    }

    // ------------------------------------------------------------------
    // Pratt parser core
    // ------------------------------------------------------------------

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_prefix()?;

        loop {
            left = match self.peek() {
                Some(Tok::Dollar) => {
                    self.advance();
                    match self.advance() {
                        Some(Tok::Ident(name)) | Some(Tok::Str(name)) => Expr::Field {
                            target: Box::new(left),
                            name,
                        },
                        _ => return Err(self.error("expected a column name after `$`")),
                    }
                }
                Some(Tok::LBracket) => {
                    self.advance();
                    let index = self.parse_expr(0)?;
                    self.expect(Tok::RBracket)?;
                    Expr::Index {
                        target: Box::new(left),
                        index: Box::new(index),
                    }
                }
                _ => break,
            };
        }

        loop {
            let Some(tok) = self.peek() else { break };
            let Some((l_bp, r_bp, op)) = infix_bp(tok) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let right = self.parse_expr(r_bp)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, SyntaxError> {
        let Some(tok) = self.advance() else {
            return Err(self.error("unexpected end of input"));
        };

        match tok {
            Tok::Number(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::True => Ok(Expr::Bool(true)),
            Tok::False => Ok(Expr::Bool(false)),
            Tok::Null => Ok(Expr::Null),

            Tok::Ident(name) => {
                if self.peek() == Some(&Tok::LParen) {
                    self.advance();
                    let args = self.parse_list(Tok::RParen)?;
                    Ok(Expr::Call {
                        function: name,
                        args,
                    })
                } else {
                    Ok(Expr::Variable(name))
                }
            }

            Tok::Bang => Ok(Expr::Unary {
                op: UnaryOperator::LogicalNot,
                operand: Box::new(self.parse_expr(BP_UNARY)?),
            }),
            Tok::Minus => Ok(Expr::Unary {
                op: UnaryOperator::Negation,
                operand: Box::new(self.parse_expr(BP_UNARY)?),
            }),

            Tok::LParen => {
                let expr = self.parse_expr(0)?;
                self.expect(Tok::RParen)?;
                Ok(expr)
            }

            Tok::LBracket => Ok(Expr::List(self.parse_list(Tok::RBracket)?)),

            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {}", describe(&other))))
            }
        }
    }

    /// Comma-separated expressions up to `close`. The opener is consumed.
    fn parse_list(&mut self, close: Tok) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        if self.peek() == Some(&close) {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr(0)?);
            match self.peek() {
                Some(Tok::Comma) => {
                    self.advance();
                }
                Some(tok) if *tok == close => {
                    self.advance();
                    return Ok(items);
                }
                _ => return Err(self.expected(&close)),
            }
        }
    }
}

fn infix_bp(tok: &Tok) -> Option<(u8, u8, BinaryOperator)> {
    let entry = match tok {
        Tok::PipePipe => (BP_OR, BP_OR + 1, BinaryOperator::LogicalOr),
        Tok::AmpAmp => (BP_AND, BP_AND + 1, BinaryOperator::LogicalAnd),
        Tok::EqEq => (BP_EQUALITY, BP_EQUALITY + 1, BinaryOperator::Equality),
        Tok::BangEq => (BP_EQUALITY, BP_EQUALITY + 1, BinaryOperator::Inequality),
        Tok::Gt => (BP_COMPARISON, BP_COMPARISON + 1, BinaryOperator::GreaterThan),
        Tok::Lt => (BP_COMPARISON, BP_COMPARISON + 1, BinaryOperator::LessThan),
        Tok::GtEq => (
            BP_COMPARISON,
            BP_COMPARISON + 1,
            BinaryOperator::GreaterThanOrEqual,
        ),
        Tok::LtEq => (
            BP_COMPARISON,
            BP_COMPARISON + 1,
            BinaryOperator::LessThanOrEqual,
        ),
        Tok::Plus => (BP_ADDITIVE, BP_ADDITIVE + 1, BinaryOperator::Addition),
        Tok::Minus => (BP_ADDITIVE, BP_ADDITIVE + 1, BinaryOperator::Subtraction),
        Tok::Star => (
            BP_MULTIPLICATIVE,
            BP_MULTIPLICATIVE + 1,
            BinaryOperator::Multiplication,
        ),
        Tok::Slash => (
            BP_MULTIPLICATIVE,
            BP_MULTIPLICATIVE + 1,
            BinaryOperator::Division,
        ),
        Tok::Percent => (
            BP_MULTIPLICATIVE,
            BP_MULTIPLICATIVE + 1,
            BinaryOperator::Modulo,
        ),
        Tok::Caret => (BP_POWER, BP_POWER, BinaryOperator::Power),
        _ => return None,
    };
    Some(entry)
}

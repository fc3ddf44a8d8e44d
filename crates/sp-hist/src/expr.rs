//! Expression engine for selections and weights.
//!
//! Cut and weight strings are compiled once into a small tree and evaluated
//! row by row over event columns. Supported: arithmetic (`+ - * /`),
//! comparisons (`== != < <= > >=`), boolean `&& || !`, and the functions
//! `abs sqrt log exp pow min max`. Booleans evaluate to `1.0`/`0.0`; any value
//! `> 0` counts as true.

use crate::error::{HistError, Result};
use crate::events::EventColumns;

// ── Tree ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl Op {
    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            Op::Add => lhs + rhs,
            Op::Sub => lhs - rhs,
            Op::Mul => lhs * rhs,
            Op::Div => lhs / rhs,
            Op::Eq => truth((lhs - rhs).abs() < f64::EPSILON),
            Op::Ne => truth((lhs - rhs).abs() >= f64::EPSILON),
            Op::Lt => truth(lhs < rhs),
            Op::Le => truth(lhs <= rhs),
            Op::Gt => truth(lhs > rhs),
            Op::Ge => truth(lhs >= rhs),
            Op::And => truth(lhs > 0.0 && rhs > 0.0),
            Op::Or => truth(lhs > 0.0 || rhs > 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Builtin {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" | "fabs" => Builtin::Abs,
            "sqrt" => Builtin::Sqrt,
            "log" => Builtin::Log,
            "exp" => Builtin::Exp,
            "pow" => Builtin::Pow,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Builtin::Pow | Builtin::Min | Builtin::Max => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    Column(usize),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(Op, Box<Node>, Box<Node>),
    Call(Builtin, Vec<Node>),
}

impl Node {
    fn eval(&self, row: &[f64]) -> f64 {
        match self {
            Node::Const(v) => *v,
            Node::Column(i) => row[*i],
            Node::Neg(a) => -a.eval(row),
            Node::Not(a) => {
                if a.eval(row) > 0.0 {
                    0.0
                } else {
                    1.0
                }
            }
            Node::Binary(op, a, b) => op.apply(a.eval(row), b.eval(row)),
            Node::Call(f, args) => {
                let arg = |i: usize| args[i].eval(row);
                match f {
                    Builtin::Abs => arg(0).abs(),
                    Builtin::Sqrt => arg(0).sqrt(),
                    Builtin::Log => arg(0).ln(),
                    Builtin::Exp => arg(0).exp(),
                    Builtin::Pow => arg(0).powf(arg(1)),
                    Builtin::Min => arg(0).min(arg(1)),
                    Builtin::Max => arg(0).max(arg(1)),
                }
            }
        }
    }
}

// ── Compiled expression ────────────────────────────────────────

/// A compiled expression ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    root: Node,
    /// Column names referenced by the expression, in order of first use.
    pub columns: Vec<String>,
}

impl CompiledExpr {
    /// Parse and compile an expression string.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = Lexer::new(input).tokenize()?;
        if tokens.is_empty() {
            return Err(HistError::Expression("empty expression".into()));
        }
        let mut parser = Parser { tokens: &tokens, pos: 0, columns: Vec::new() };
        let root = parser.parse_expr(0)?;
        if let Some(tok) = parser.tokens.get(parser.pos) {
            return Err(HistError::Expression(format!(
                "unexpected {:?} after expression in '{}'",
                tok, input
            )));
        }
        Ok(Self { source: input.to_string(), root, columns: parser.columns })
    }

    /// The source string this expression was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate for one row; `row` follows the order of [`CompiledExpr::columns`].
    pub fn eval_row(&self, row: &[f64]) -> f64 {
        self.root.eval(row)
    }

    /// Evaluate for every entry of `events`.
    pub fn eval_columns(&self, events: &EventColumns) -> Result<Vec<f64>> {
        let n = events.n_entries();
        let cols: Vec<&[f64]> = self
            .columns
            .iter()
            .map(|name| {
                events.get(name).ok_or_else(|| {
                    HistError::MissingSource(format!("column '{}' required by '{}'", name, self.source))
                })
            })
            .collect::<Result<_>>()?;

        let mut row = vec![0.0f64; cols.len()];
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            for (slot, col) in row.iter_mut().zip(&cols) {
                *slot = col[i];
            }
            out.push(self.root.eval(&row));
        }
        Ok(out)
    }
}

// ── Lexer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Bang,
    Cmp(Op),
    AndAnd,
    OrOr,
}

struct Lexer<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, chars: src.char_indices().peekable() }
    }

    fn next_is(&mut self, c: char) -> bool {
        if self.chars.peek().map(|&(_, p)| p) == Some(c) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut out = Vec::new();
        while let Some((start, c)) = self.chars.next() {
            let tok = match c {
                c if c.is_whitespace() => continue,
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                '&' if self.next_is('&') => Token::AndAnd,
                '|' if self.next_is('|') => Token::OrOr,
                '=' if self.next_is('=') => Token::Cmp(Op::Eq),
                '!' if self.next_is('=') => Token::Cmp(Op::Ne),
                '!' => Token::Bang,
                '<' if self.next_is('=') => Token::Cmp(Op::Le),
                '<' => Token::Cmp(Op::Lt),
                '>' if self.next_is('=') => Token::Cmp(Op::Ge),
                '>' => Token::Cmp(Op::Gt),
                c if c.is_ascii_digit() || c == '.' => self.number(start)?,
                c if c.is_ascii_alphabetic() || c == '_' => self.ident(start),
                other => {
                    return Err(HistError::Expression(format!(
                        "unexpected character '{}' at {} in '{}'",
                        other, start, self.src
                    )));
                }
            };
            out.push(tok);
        }
        Ok(out)
    }

    fn number(&mut self, start: usize) -> Result<Token> {
        let mut end = start + 1;
        let mut prev = self.src[start..].chars().next().unwrap_or('0');
        while let Some(&(i, c)) = self.chars.peek() {
            let exponent_sign = (c == '+' || c == '-') && (prev == 'e' || prev == 'E');
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                self.chars.next();
                end = i + c.len_utf8();
                prev = c;
            } else {
                break;
            }
        }
        let text = &self.src[start..end];
        text.parse()
            .map(Token::Number)
            .map_err(|_| HistError::Expression(format!("invalid number '{}'", text)))
    }

    fn ident(&mut self, start: usize) -> Token {
        let mut end = start + 1;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.chars.next();
                end = i + 1;
            } else {
                break;
            }
        }
        Token::Ident(self.src[start..end].to_string())
    }
}

// ── Parser (precedence climbing) ───────────────────────────────

const PREFIX_BP: u8 = 6;

fn infix(tok: &Token) -> Option<(u8, Op)> {
    Some(match tok {
        Token::OrOr => (1, Op::Or),
        Token::AndAnd => (2, Op::And),
        Token::Cmp(op) => (3, *op),
        Token::Plus => (4, Op::Add),
        Token::Minus => (4, Op::Sub),
        Token::Star => (5, Op::Mul),
        Token::Slash => (5, Op::Div),
        _ => return None,
    })
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    columns: Vec<String>,
}

impl Parser<'_> {
    fn next(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += usize::from(tok.is_some());
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(t) if *t == expected => Ok(()),
            other => Err(HistError::Expression(format!("expected {:?}, got {:?}", expected, other))),
        }
    }

    fn column(&mut self, name: String) -> usize {
        match self.columns.iter().position(|c| *c == name) {
            Some(i) => i,
            None => {
                self.columns.push(name);
                self.columns.len() - 1
            }
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Node> {
        let mut lhs = self.parse_prefix()?;
        while let Some((bp, op)) = self.tokens.get(self.pos).and_then(infix) {
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_expr(bp + 1)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Node> {
        match self.next().cloned() {
            Some(Token::Number(v)) => Ok(Node::Const(v)),
            Some(Token::Minus) => Ok(Node::Neg(Box::new(self.parse_expr(PREFIX_BP)?))),
            Some(Token::Plus) => self.parse_expr(PREFIX_BP),
            Some(Token::Bang) => Ok(Node::Not(Box::new(self.parse_expr(PREFIX_BP)?))),
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.tokens.get(self.pos) == Some(&Token::LParen) {
                    self.pos += 1;
                    self.parse_call(&name)
                } else {
                    Ok(Node::Column(self.column(name)))
                }
            }
            other => Err(HistError::Expression(format!(
                "expected number, column, call or '(', got {:?}",
                other
            ))),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Node> {
        let func = Builtin::lookup(name)
            .ok_or_else(|| HistError::Expression(format!("unknown function '{}'", name)))?;
        let mut args = vec![self.parse_expr(0)?];
        while self.tokens.get(self.pos) == Some(&Token::Comma) {
            self.pos += 1;
            args.push(self.parse_expr(0)?);
        }
        self.expect(Token::RParen)?;
        if args.len() != func.arity() {
            return Err(HistError::Expression(format!(
                "'{}' takes {} argument(s), got {}",
                name,
                func.arity(),
                args.len()
            )));
        }
        Ok(Node::Call(func, args))
    }
}

//! A small arithmetic kernel.
//!
//! Each line is `name = expr`, `print expr`, or a bare expression; `#`
//! starts a comment. A trailing bare expression becomes the cell result.
//! Names resolve against the kernel's own bindings first, then numeric
//! values in the shared variable store.

use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use aster_core::{
    CellOutput, Completion, Diagnostic, Error, ExecutionContext, Kernel, Result, Severity,
    VariableStore,
};

pub const LANGUAGE: &str = "calc";

const NAME_ERROR: &str = "NameError";
const ZERO_DIVISION_ERROR: &str = "ZeroDivisionError";
const SYNTAX_ERROR: &str = "SyntaxError";

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*=(.*)$")
        .unwrap_or_else(|e| panic!("invalid assignment pattern: {e}"))
});

static PRINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^print\b(.*)$").unwrap_or_else(|e| panic!("invalid print pattern: {e}"))
});

#[derive(Default)]
struct State {
    bindings: FxHashMap<String, f64>,
    /// Names bound by the last execution, in first-assignment order.
    assigned: Vec<String>,
}

/// The `calc` kernel.
#[derive(Default)]
pub struct CalcKernel {
    state: Mutex<State>,
}

impl CalcKernel {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, source: &str, ctx: &ExecutionContext) -> Result<Vec<CellOutput>> {
        let mut state = self.state();
        state.assigned.clear();
        let mut last = None;

        for line in source.lines() {
            ctx.check_aborted()?;
            let line = strip_comment(line);
            if line.is_empty() {
                continue;
            }

            let lookup = |name: &str| {
                state
                    .bindings
                    .get(name)
                    .copied()
                    .or_else(|| ctx.variables().get(name).and_then(|v| v.as_f64()))
            };

            if let Some(caps) = ASSIGNMENT.captures(line) {
                let value = evaluate(&caps[2], &lookup)?;
                let name = caps[1].to_string();
                if !state.assigned.contains(&name) {
                    state.assigned.push(name.clone());
                }
                state.bindings.insert(name, value);
                last = None;
            } else if let Some(caps) = PRINT.captures(line) {
                let value = evaluate(&caps[1], &lookup)?;
                ctx.write(CellOutput::stdout(format!("{}\n", format_number(value))));
                last = None;
            } else {
                last = Some(evaluate(line, &lookup)?);
            }
        }

        Ok(last
            .map(|v| CellOutput::execute_result(ctx.execution_count(), format_number(v)))
            .into_iter()
            .collect())
    }
}

#[async_trait]
impl Kernel for CalcKernel {
    fn language(&self) -> &str {
        LANGUAGE
    }

    fn display_name(&self) -> &str {
        "Calc"
    }

    async fn execute(&self, source: &str, ctx: &ExecutionContext) -> Result<Vec<CellOutput>> {
        self.run(source, ctx)
    }

    async fn publish_variables(&self, variables: &VariableStore) -> Result<()> {
        let mut state = self.state();
        let assigned = std::mem::take(&mut state.assigned);
        for name in assigned {
            if let Some(value) = state.bindings.get(&name) {
                variables.set_from(LANGUAGE, name, number_value(*value));
            }
        }
        Ok(())
    }

    async fn complete(&self, source: &str, cursor: usize) -> Result<Vec<Completion>> {
        let prefix = word_before(source, cursor);
        let state = self.state();
        let mut items: Vec<Completion> = state
            .bindings
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, value)| Completion {
                label: name.clone(),
                detail: Some(format_number(*value)),
            })
            .collect();
        if "print".starts_with(prefix) {
            items.push(Completion {
                label: "print".to_string(),
                detail: None,
            });
        }
        items.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(items)
    }

    async fn hover(&self, source: &str, cursor: usize) -> Result<Option<String>> {
        let name = word_at(source, cursor);
        Ok(self
            .state()
            .bindings
            .get(name)
            .map(|v| format!("{name} = {}", format_number(*v))))
    }

    async fn diagnose(&self, source: &str) -> Result<Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();
        let mut offset = 0;
        for raw in source.split_inclusive('\n') {
            let line = strip_comment(raw);
            let expr = if let Some(caps) = ASSIGNMENT.captures(line) {
                caps.get(2).map_or("", |m| m.as_str())
            } else if let Some(caps) = PRINT.captures(line) {
                caps.get(1).map_or("", |m| m.as_str())
            } else {
                line
            };
            if !line.is_empty() {
                // Names and values are irrelevant to syntax.
                if let Err(Error::Execution { kind, message }) = evaluate(expr, &|_| Some(1.0)) {
                    if kind == SYNTAX_ERROR {
                        diagnostics.push(Diagnostic {
                            severity: Severity::Error,
                            message,
                            start: offset,
                            end: offset + raw.trim_end().len(),
                        });
                    }
                }
            }
            offset += raw.len();
        }
        Ok(diagnostics)
    }

    async fn shutdown(&self) -> Result<()> {
        let mut state = self.state();
        state.bindings.clear();
        state.assigned.clear();
        Ok(())
    }
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or("").trim()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn clamp(source: &str, cursor: usize) -> usize {
    let mut cursor = cursor.min(source.len());
    while !source.is_char_boundary(cursor) {
        cursor -= 1;
    }
    cursor
}

/// Byte offset where the identifier ending `head` starts.
fn word_start(head: &str) -> usize {
    head.char_indices()
        .rev()
        .find(|&(_, c)| !is_ident_char(c))
        .map_or(0, |(i, c)| i + c.len_utf8())
}

fn word_before(source: &str, cursor: usize) -> &str {
    let head = &source[..clamp(source, cursor)];
    &head[word_start(head)..]
}

fn word_at(source: &str, cursor: usize) -> &str {
    let cursor = clamp(source, cursor);
    let start = word_start(&source[..cursor]);
    let end = source[cursor..]
        .find(|c: char| !is_ident_char(c))
        .map_or(source.len(), |i| cursor + i);
    &source[start..end]
}

/// Render a number the way a user would type it: integral values without a
/// fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    Open,
    Close,
}

fn syntax(message: impl Into<String>) -> Error {
    Error::execution(SYNTAX_ERROR, message)
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &source[start..end];
                let n = text
                    .parse()
                    .map_err(|_| syntax(format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if is_ident_char(d) {
                        end = i + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(source[start..end].to_string()));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            other => return Err(syntax(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    lookup: &'a dyn Fn(&str) -> Option<f64>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => {
                    return Err(Error::execution(ZERO_DIVISION_ERROR, "division by zero"));
                }
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64> {
        let base = self.atom()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Ident(name)) => (self.lookup)(&name)
                .ok_or_else(|| Error::execution(NAME_ERROR, format!("name '{name}' is not defined"))),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(syntax("expected ')'")),
                }
            }
            Some(token) => Err(syntax(format!("unexpected {token:?}"))),
            None => Err(syntax("unexpected end of expression")),
        }
    }
}

/// Evaluate one expression.
fn evaluate(source: &str, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        lookup,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(syntax(format!("unexpected {token:?}")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Result<f64> {
        evaluate(source, &|name| (name == "x").then_some(4.0))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(eval("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(eval("-2 ^ 2").unwrap(), -4.0);
        assert_eq!(eval("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(eval("x / 8").unwrap(), 0.5);
        assert_eq!(eval("7 % 4").unwrap(), 3.0);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(eval("y + 1").unwrap_err().kind(), NAME_ERROR);
        assert_eq!(eval("1 / 0").unwrap_err().kind(), ZERO_DIVISION_ERROR);
        assert_eq!(eval("1 +").unwrap_err().kind(), SYNTAX_ERROR);
        assert_eq!(eval("(1").unwrap_err().kind(), SYNTAX_ERROR);
        assert_eq!(eval("1 2").unwrap_err().kind(), SYNTAX_ERROR);
        assert_eq!(eval("1 $ 2").unwrap_err().kind(), SYNTAX_ERROR);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.25), "0.25");
        assert_eq!(number_value(2.0), Value::from(2));
    }

    #[test]
    fn test_words_around_cursor() {
        assert_eq!(word_before("a + tot", 7), "tot");
        assert_eq!(word_before("a + tot", 99), "tot");
        assert_eq!(word_at("a + total * 2", 5), "total");
        assert_eq!(word_at("", 0), "");
    }

    #[tokio::test]
    async fn test_diagnose_reports_line_span() {
        let kernel = CalcKernel::new();
        let diagnostics = kernel.diagnose("a = 1\nb = (2\n").await.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].start, 6);
        assert_eq!(diagnostics[0].end, 12);
        assert!(kernel.diagnose("a = 1 # ok\nmissing * 2").await.unwrap().is_empty());
    }
}

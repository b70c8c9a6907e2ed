//! Arithmetic formula evaluation for dynamic element positions.
//!
//! Formulas are small infix expressions over record fields and numeric
//! literals: `"badge_x + 12"`, `"slot * 40 - 8"`, `"(col + 1) * 96"`.
//! Supported operators: `+ - * /`, unary minus, parentheses. Identifiers
//! are dotted data-key paths looked up in the record.

use super::Record;

/// Evaluate a formula against a record.
///
/// Returns `None` when the formula is malformed, references a missing or
/// non-numeric field, or divides by zero. Callers treat that as a
/// recoverable per-element condition, not a fatal error.
pub fn eval(formula: &str, record: &Record) -> Option<f64> {
    let tokens = tokenize(formula)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        record,
    };
    let value = parser.expr()?;
    // Trailing garbage means the formula didn't parse as a whole.
    if parser.pos != tokens.len() {
        return None;
    }
    value.is_finite().then_some(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

fn tokenize(input: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '0'..='9' | '.' => {
                let mut num = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(num.parse().ok()?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            _ => return None,
        }
    }

    Some(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    record: &'a Record,
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

    fn expr(&mut self) -> Option<f64> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Some(value)
    }

    fn term(&mut self) -> Option<f64> {
        let mut value = self.factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return None;
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Some(value)
    }

    fn factor(&mut self) -> Option<f64> {
        match self.next()? {
            Token::Number(n) => Some(n),
            Token::Ident(path) => self.record.number(&path),
            Token::Minus => Some(-self.factor()?),
            Token::Open => {
                let value = self.expr()?;
                match self.next()? {
                    Token::Close => Some(value),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Record {
        Record::from_value(json!({
            "slot": 3,
            "badge": {"x": 12.5},
            "name": "Ada"
        }))
    }

    #[test]
    fn literals_and_precedence() {
        let r = Record::default();
        assert_eq!(eval("1 + 2 * 3", &r), Some(7.0));
        assert_eq!(eval("(1 + 2) * 3", &r), Some(9.0));
        assert_eq!(eval("10 / 4", &r), Some(2.5));
        assert_eq!(eval("-5 + 2", &r), Some(-3.0));
    }

    #[test]
    fn field_references() {
        let r = record();
        assert_eq!(eval("slot * 40", &r), Some(120.0));
        assert_eq!(eval("badge.x + 0.5", &r), Some(13.0));
    }

    #[test]
    fn missing_or_non_numeric_fields_fail() {
        let r = record();
        assert_eq!(eval("unknown + 1", &r), None);
        assert_eq!(eval("name + 1", &r), None);
    }

    #[test]
    fn malformed_input_fails() {
        let r = Record::default();
        assert_eq!(eval("1 +", &r), None);
        assert_eq!(eval("(1 + 2", &r), None);
        assert_eq!(eval("1 2", &r), None);
        assert_eq!(eval("1 / 0", &r), None);
        assert_eq!(eval("$weird", &r), None);
    }
}

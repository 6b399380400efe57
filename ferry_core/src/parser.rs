//! Text form of language objects.
//!
//! Expressions are written as prefix S-expressions: `(f x 1L 2.5 "s" :name TRUE)`.
//! Named arguments are introduced by a `:name` marker. Symbols and argument
//! names that would read back as something else are wrapped in backquotes.

use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

use crate::value::{Arg, Constant, Expr};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unexpected token '{token}' at offset {offset}")]
    UnexpectedToken { token: String, offset: usize },
    #[error("unclosed delimiter opened at offset {offset}")]
    UnclosedDelimiter { offset: usize },
    #[error("unterminated {what} starting at offset {offset}")]
    Unterminated { what: &'static str, offset: usize },
    #[error("argument name ':{name}' is not followed by a value")]
    DanglingName { name: String },
    #[error("trailing input at offset {offset}")]
    TrailingInput { offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Quoted(String),
    Name(String),
    Atom(String),
}

/// Reads a `"` or backquote delimited token; the opening quote is at `offset`.
fn read_quoted(chars: &mut Peekable<CharIndices<'_>>, offset: usize) -> Result<String, ParseError> {
    let Some((_, quote)) = chars.next() else {
        return Err(ParseError::UnexpectedEof);
    };
    let mut text = String::new();
    while let Some((_, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, 'n')) => text.push('\n'),
                Some((_, 't')) => text.push('\t'),
                Some((_, 'r')) => text.push('\r'),
                Some((_, other)) => text.push(other),
                None => break,
            },
            ch if ch == quote => return Ok(text),
            ch => text.push(ch),
        }
    }
    let what = if quote == '"' { "string literal" } else { "quoted symbol" };
    Err(ParseError::Unterminated { what, offset })
}

fn tokenize(code: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = code.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            '(' => {
                chars.next();
                tokens.push((Token::Open, offset));
            }
            ')' => {
                chars.next();
                tokens.push((Token::Close, offset));
            }
            '"' | '`' => {
                let text = read_quoted(&mut chars, offset)?;
                let token = if c == '"' { Token::Str(text) } else { Token::Quoted(text) };
                tokens.push((token, offset));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut text = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | '`') {
                        break;
                    }
                    text.push(ch);
                    chars.next();
                }
                let token = match text.strip_prefix(':') {
                    Some("") if matches!(chars.peek(), Some(&(_, '`'))) => {
                        let quote = chars.peek().map_or(offset, |&(at, _)| at);
                        Token::Name(read_quoted(&mut chars, quote)?)
                    }
                    Some(name) if !name.is_empty() => Token::Name(name.to_string()),
                    _ => Token::Atom(text),
                };
                tokens.push((token, offset));
            }
        }
    }

    Ok(tokens)
}

fn atom(token: &str) -> Expr {
    match token {
        "NULL" => return Expr::Constant(Constant::Null),
        "TRUE" => return Expr::Constant(Constant::Logical(true)),
        "FALSE" => return Expr::Constant(Constant::Logical(false)),
        _ => {}
    }
    if let Some(int) = token.strip_suffix('L').and_then(|t| t.parse::<i32>().ok()) {
        return Expr::Constant(Constant::Integer(int));
    }
    if let Ok(n) = token.parse::<f64>() {
        return Expr::Constant(Constant::Double(n));
    }
    Expr::Symbol(token.to_string())
}

struct Reader {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Reader {
    fn next(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn read(&mut self) -> Result<Expr, ParseError> {
        let (token, offset) = self.next().ok_or(ParseError::UnexpectedEof)?;
        match token {
            Token::Open => self.read_call(offset),
            Token::Close => Err(ParseError::UnexpectedToken { token: ")".into(), offset }),
            Token::Name(name) => Err(ParseError::UnexpectedToken { token: format!(":{}", name), offset }),
            Token::Str(s) => Ok(Expr::Constant(Constant::Str(s))),
            Token::Quoted(s) => Ok(Expr::Symbol(s)),
            Token::Atom(a) => Ok(atom(&a)),
        }
    }

    fn read_call(&mut self, open: usize) -> Result<Expr, ParseError> {
        match self.peek().cloned() {
            None => return Err(ParseError::UnclosedDelimiter { offset: open }),
            Some(Token::Close) => {
                let (_, offset) = self.next().ok_or(ParseError::UnexpectedEof)?;
                return Err(ParseError::UnexpectedToken { token: "()".into(), offset });
            }
            Some(_) => {}
        }
        let function = self.read()?;
        let mut args = Vec::new();

        loop {
            match self.peek().cloned() {
                None => return Err(ParseError::UnclosedDelimiter { offset: open }),
                Some(Token::Close) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Name(name)) => {
                    self.pos += 1;
                    if matches!(self.peek(), None | Some(Token::Close)) {
                        return Err(ParseError::DanglingName { name });
                    }
                    let value = self.read()?;
                    args.push(Arg { name: Some(name), value });
                }
                Some(_) => {
                    let value = self.read()?;
                    args.push(Arg { name: None, value });
                }
            }
        }

        Ok(Expr::Call {
            function: Box::new(function),
            args,
        })
    }
}

/// Parses exactly one expression.
pub fn parse(code: &str) -> Result<Expr, ParseError> {
    let mut reader = Reader {
        tokens: tokenize(code)?,
        pos: 0,
    };
    let expr = reader.read()?;
    if let Some((_, offset)) = reader.tokens.get(reader.pos) {
        return Err(ParseError::TrailingInput { offset: *offset });
    }
    Ok(expr)
}

fn escape(s: &str, quote: char) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn symbol_needs_quoting(name: &str) -> bool {
    name.is_empty()
        || name.starts_with(':')
        || name.chars().any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | '`' | '\\'))
        || !matches!(atom(name), Expr::Symbol(_))
}

fn deparse_double(n: f64) -> String {
    // Debug formatting always keeps a fraction or exponent, so it never reads back as integer
    format!("{:?}", n)
}

pub fn deparse(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(expr, &mut out);
    out
}

fn write_expr(expr: &Expr, out: &mut String) {
    match expr {
        Expr::Symbol(name) if symbol_needs_quoting(name) => out.push_str(&escape(name, '`')),
        Expr::Symbol(name) => out.push_str(name),
        Expr::Constant(Constant::Null) => out.push_str("NULL"),
        Expr::Constant(Constant::Logical(true)) => out.push_str("TRUE"),
        Expr::Constant(Constant::Logical(false)) => out.push_str("FALSE"),
        Expr::Constant(Constant::Integer(n)) => out.push_str(&format!("{}L", n)),
        Expr::Constant(Constant::Double(n)) => out.push_str(&deparse_double(*n)),
        Expr::Constant(Constant::Str(s)) => out.push_str(&escape(s, '"')),
        Expr::Call { function, args } => {
            out.push('(');
            write_expr(function, out);
            for arg in args {
                out.push(' ');
                if let Some(name) = &arg.name {
                    out.push(':');
                    if symbol_needs_quoting(name) {
                        out.push_str(&escape(name, '`'));
                    } else {
                        out.push_str(name);
                    }
                    out.push(' ');
                }
                write_expr(&arg.value, out);
            }
            out.push(')');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deparse_then_parse_gives_same_expression() {
        let expr = Expr::call_named(
            Expr::symbol("f"),
            vec![
                (None, Expr::symbol("x")),
                (Some("n"), Expr::int(3)),
                (None, Expr::call(Expr::symbol("g"), vec![Expr::double(2.0), Expr::string("a \"b\"\n")])),
                (Some("flag"), Expr::logical(false)),
                (None, Expr::null()),
            ],
        );
        let text = deparse(&expr);
        assert_eq!(parse(&text).unwrap(), expr);
    }

    #[test]
    fn odd_symbols_are_backquoted() {
        for name in ["1", "TRUE", "my var", ":kw", "", "a(b"] {
            let expr = Expr::symbol(name);
            let text = deparse(&expr);
            assert!(text.starts_with('`'), "{} deparsed as {}", name, text);
            assert_eq!(parse(&text).unwrap(), expr);
        }
    }

    #[test]
    fn odd_argument_names_are_backquoted() {
        for name in ["my arg", "", "a(b", ":kw", "x`y"] {
            let expr = Expr::call_named(Expr::symbol("f"), vec![(Some(name), Expr::int(1)), (None, Expr::symbol("z"))]);
            let text = deparse(&expr);
            assert!(text.starts_with("(f :`"), "{:?} deparsed as {}", name, text);
            assert_eq!(parse(&text).unwrap(), expr);
        }
        assert_eq!(deparse(&Expr::call_named(Expr::symbol("f"), vec![(Some("n"), Expr::int(1))])), "(f :n 1L)");
    }

    #[test]
    fn whole_doubles_stay_doubles() {
        let text = deparse(&Expr::double(3.0));
        assert_eq!(parse(&text).unwrap(), Expr::double(3.0));
        assert_eq!(parse("3L").unwrap(), Expr::int(3));
    }

    #[test]
    fn call_head_can_be_a_call() {
        let expr = parse("((g 1L) 2L)").unwrap();
        assert_eq!(
            expr,
            Expr::call(Expr::call(Expr::symbol("g"), vec![Expr::int(1)]), vec![Expr::int(2)])
        );
    }

    #[test]
    fn reports_malformed_input() {
        assert_eq!(parse("(f x"), Err(ParseError::UnclosedDelimiter { offset: 0 }));
        assert_eq!(parse(""), Err(ParseError::UnexpectedEof));
        assert!(matches!(parse("\"abc"), Err(ParseError::Unterminated { .. })));
        assert!(matches!(parse("(f :x)"), Err(ParseError::DanglingName { .. })));
        assert!(matches!(parse("(f :`x)"), Err(ParseError::Unterminated { .. })));
        assert!(matches!(parse("a b"), Err(ParseError::TrailingInput { offset: 2 })));
        assert!(matches!(parse(")"), Err(ParseError::UnexpectedToken { .. })));
    }
}
